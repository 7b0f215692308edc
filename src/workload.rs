//! Pluggable benchmark workloads.
//!
//! The orchestrator drives every workload through the same three-phase
//! contract: `setup` prepares buffers, `run` performs the timed work for
//! the thread's share of iterations, `teardown` releases resources. Each
//! phase returns a pass/fail status; after a successful run the workload
//! reports the bytes processed by a single call and an output/input ratio.
//!
//! The built-in corpus workloads exercise the contract with a chunked,
//! self-inverse packing transform. The real DEFLATE codec is deliberately
//! not part of this crate; a codec-backed workload plugs in through the
//! [`Workload`] trait without touching the orchestrator.

use crate::cli::{BenchmarkConfiguration, Corpus, StreamFormat, WorkloadKind};
use std::path::PathBuf;
use tracing::error;

/// Outcome of one workload phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadStatus {
    Passed,
    Failed,
}

impl WorkloadStatus {
    pub fn passed(&self) -> bool {
        matches!(self, WorkloadStatus::Passed)
    }
}

/// Per-thread workload parameters: the global configuration plus this
/// thread's identity and share of the iteration count.
#[derive(Debug, Clone)]
pub struct WorkloadParams {
    pub thread_id: usize,
    pub iterations: usize,
    pub chunk_size: usize,
    pub level: i32,
    pub deflate_buffering: bool,
    pub inflate_buffering: bool,
    pub stream_format: StreamFormat,
    pub corpus: Corpus,
    pub allow_partial_chunks: bool,
    pub verify: bool,
    pub file_path: Option<PathBuf>,
}

impl WorkloadParams {
    pub fn for_thread(config: &BenchmarkConfiguration, thread_id: usize) -> Self {
        Self {
            thread_id,
            iterations: config.iterations_per_thread(),
            chunk_size: config.chunk_size,
            level: config.level,
            deflate_buffering: config.deflate_buffering,
            inflate_buffering: config.inflate_buffering,
            stream_format: config.stream_format,
            corpus: config.corpus,
            allow_partial_chunks: config.allow_partial_chunks,
            verify: config.verify,
            file_path: config.file_path.clone(),
        }
    }
}

/// Three-phase benchmarkable workload.
///
/// Implementations must be `Send`: each instance is moved into exactly one
/// worker thread and owned by it until join. Phase calls execute unlocked;
/// any internal blocking is opaque to the orchestrator.
pub trait Workload: Send {
    fn name(&self) -> &'static str;

    /// Prepare buffers and state. Runs before the Start gate; its cost is
    /// outside the timed region.
    fn setup(&mut self, params: &WorkloadParams) -> WorkloadStatus;

    /// The timed phase: perform `params.iterations` repetitions.
    fn run(&mut self, params: &WorkloadParams) -> WorkloadStatus;

    /// Release resources. Invoked even after an earlier phase failed.
    fn teardown(&mut self, params: &WorkloadParams) -> WorkloadStatus;

    /// Input bytes consumed by one run call, valid after a passed run.
    fn bytes_per_call(&self) -> u64;

    /// Output/input size ratio, valid after a passed run.
    fn ratio(&self) -> f64;
}

/// Construct the built-in workload for a selector tag.
pub fn build(kind: WorkloadKind) -> Box<dyn Workload> {
    match kind {
        WorkloadKind::CorpusCompression => Box::new(CorpusCompression::new()),
        WorkloadKind::CorpusDecompression => Box::new(CorpusDecompression::new()),
    }
}

/// Chunked corpus compression.
///
/// Loads the corpus into memory during setup, then repeatedly packs it
/// chunk by chunk inside the timed phase.
pub struct CorpusCompression {
    input: Vec<u8>,
    bytes_per_call: u64,
    ratio: f64,
}

impl CorpusCompression {
    pub fn new() -> Self {
        Self {
            input: Vec::new(),
            bytes_per_call: 0,
            ratio: 0.0,
        }
    }
}

impl Default for CorpusCompression {
    fn default() -> Self {
        Self::new()
    }
}

impl Workload for CorpusCompression {
    fn name(&self) -> &'static str {
        "Corpus Compression"
    }

    fn setup(&mut self, params: &WorkloadParams) -> WorkloadStatus {
        match load_corpus(params) {
            Ok(input) => {
                self.input = input;
                WorkloadStatus::Passed
            }
            Err(status) => status,
        }
    }

    fn run(&mut self, params: &WorkloadParams) -> WorkloadStatus {
        let mut consumed = 0u64;
        let mut produced = 0u64;

        for _ in 0..params.iterations {
            let (input_bytes, output) = pack::pack_buffer(&self.input, params);
            consumed = input_bytes;
            produced = output.len() as u64;

            if params.verify {
                let restored = match pack::unpack_buffer(&output, params.stream_format) {
                    Ok(restored) => restored,
                    Err(()) => {
                        error!(
                            "thread {}: packed stream failed to unpack during verify",
                            params.thread_id
                        );
                        return WorkloadStatus::Failed;
                    }
                };
                if restored != self.input[..input_bytes as usize] {
                    error!(
                        "thread {}: verification mismatch after round trip",
                        params.thread_id
                    );
                    return WorkloadStatus::Failed;
                }
            }
        }

        if consumed == 0 {
            error!(
                "thread {}: corpus smaller than one chunk and partial chunks disabled",
                params.thread_id
            );
            return WorkloadStatus::Failed;
        }

        self.bytes_per_call = consumed;
        self.ratio = produced as f64 / consumed as f64;
        WorkloadStatus::Passed
    }

    fn teardown(&mut self, _params: &WorkloadParams) -> WorkloadStatus {
        self.input = Vec::new();
        WorkloadStatus::Passed
    }

    fn bytes_per_call(&self) -> u64 {
        self.bytes_per_call
    }

    fn ratio(&self) -> f64 {
        self.ratio
    }
}

/// Chunked corpus decompression.
///
/// Setup packs the corpus once so the timed phase exercises only the
/// unpacking direction.
pub struct CorpusDecompression {
    original: Vec<u8>,
    packed: Vec<u8>,
    bytes_per_call: u64,
    ratio: f64,
}

impl CorpusDecompression {
    pub fn new() -> Self {
        Self {
            original: Vec::new(),
            packed: Vec::new(),
            bytes_per_call: 0,
            ratio: 0.0,
        }
    }
}

impl Default for CorpusDecompression {
    fn default() -> Self {
        Self::new()
    }
}

impl Workload for CorpusDecompression {
    fn name(&self) -> &'static str {
        "Corpus Decompression"
    }

    fn setup(&mut self, params: &WorkloadParams) -> WorkloadStatus {
        let input = match load_corpus(params) {
            Ok(input) => input,
            Err(status) => return status,
        };
        let (consumed, packed) = pack::pack_buffer(&input, params);
        if consumed == 0 {
            error!(
                "thread {}: corpus smaller than one chunk and partial chunks disabled",
                params.thread_id
            );
            return WorkloadStatus::Failed;
        }
        self.original = input[..consumed as usize].to_vec();
        self.packed = packed;
        WorkloadStatus::Passed
    }

    fn run(&mut self, params: &WorkloadParams) -> WorkloadStatus {
        let mut restored_len = 0u64;

        for _ in 0..params.iterations {
            let restored = match pack::unpack_buffer(&self.packed, params.stream_format) {
                Ok(restored) => restored,
                Err(()) => {
                    error!("thread {}: corrupt packed stream", params.thread_id);
                    return WorkloadStatus::Failed;
                }
            };
            restored_len = restored.len() as u64;

            if params.verify && restored != self.original {
                error!(
                    "thread {}: verification mismatch after unpack",
                    params.thread_id
                );
                return WorkloadStatus::Failed;
            }
        }

        self.bytes_per_call = self.packed.len() as u64;
        self.ratio = restored_len as f64 / self.packed.len() as f64;
        WorkloadStatus::Passed
    }

    fn teardown(&mut self, _params: &WorkloadParams) -> WorkloadStatus {
        self.original = Vec::new();
        self.packed = Vec::new();
        WorkloadStatus::Passed
    }

    fn bytes_per_call(&self) -> u64 {
        self.bytes_per_call
    }

    fn ratio(&self) -> f64 {
        self.ratio
    }
}

/// Load the corpus bytes: the override file when given, otherwise a
/// deterministic synthetic buffer derived from the corpus selector.
fn load_corpus(params: &WorkloadParams) -> Result<Vec<u8>, WorkloadStatus> {
    if let Some(path) = &params.file_path {
        return std::fs::read(path).map_err(|err| {
            error!("could not read corpus file {}: {}", path.display(), err);
            WorkloadStatus::Failed
        });
    }
    Ok(synthetic_corpus(params.corpus))
}

/// Deterministic, compressible pseudo-text corpus stand-in. The selector
/// seeds the generator so distinct corpora produce distinct data.
fn synthetic_corpus(corpus: Corpus) -> Vec<u8> {
    const WORDS: &[&str] = &[
        "the", "quick", "brown", "fox", "jumps", "over", "lazy", "dog",
        "benchmark", "corpus", "stream", "chunk", "buffer",
    ];
    const LEN: usize = 256 * 1024;

    let mut seed: u64 = match corpus {
        Corpus::Custom => 0x6b63_7573_746f_6d01,
        Corpus::Canterbury => 0x6361_6e74_6572_6201,
        Corpus::Calgary => 0x6361_6c67_6172_7901,
        Corpus::Silesia => 0x7369_6c65_7369_6101,
    };

    let mut out = Vec::with_capacity(LEN + 16);
    while out.len() < LEN {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let word = WORDS[(seed >> 33) as usize % WORDS.len()];
        out.extend_from_slice(word.as_bytes());
        // Occasional runs keep the data compressible for the run-length
        // transform.
        if seed % 7 == 0 {
            out.extend(std::iter::repeat(b' ').take((seed % 13) as usize + 1));
        } else {
            out.push(b' ');
        }
    }
    out.truncate(LEN);
    out
}

/// Self-inverse chunked packing transform used by the built-in workloads.
///
/// Run-length encoding with per-format framing. It stands in for the
/// excluded codec: structurally it consumes input in chunks, emits a
/// framed stream with a checksum trailer, and inverts exactly.
mod pack {
    use super::{StreamFormat, WorkloadParams};

    const ZLIB_HEADER: [u8; 2] = [0x78, 0x9c];
    const GZIP_HEADER: [u8; 10] = [0x1f, 0x8b, 0x08, 0, 0, 0, 0, 0, 0, 0xff];

    fn checksum(data: &[u8]) -> u32 {
        let mut a: u32 = 1;
        let mut b: u32 = 0;
        for &byte in data {
            a = (a + byte as u32) % 65521;
            b = (b + a) % 65521;
        }
        (b << 16) | a
    }

    /// Pack `input` chunk by chunk. The trailing partial chunk is consumed
    /// only when the configuration allows partial chunks. Returns the
    /// number of input bytes consumed and the framed output stream.
    pub fn pack_buffer(input: &[u8], params: &WorkloadParams) -> (u64, Vec<u8>) {
        let mut out = Vec::with_capacity(input.len() / 2 + 32);
        match params.stream_format {
            StreamFormat::Raw => {}
            StreamFormat::Zlib => out.extend_from_slice(&ZLIB_HEADER),
            StreamFormat::Gzip => out.extend_from_slice(&GZIP_HEADER),
        }

        let store_only = params.level == 0;
        let mut consumed = 0usize;
        for chunk in input.chunks(params.chunk_size) {
            if chunk.len() < params.chunk_size && !params.allow_partial_chunks {
                break;
            }
            encode_chunk(chunk, store_only, &mut out);
            consumed += chunk.len();
        }

        let body_checksum = checksum(&input[..consumed]);
        match params.stream_format {
            StreamFormat::Raw => {}
            StreamFormat::Zlib => out.extend_from_slice(&body_checksum.to_le_bytes()),
            StreamFormat::Gzip => {
                out.extend_from_slice(&body_checksum.to_le_bytes());
                out.extend_from_slice(&(consumed as u32).to_le_bytes());
            }
        }

        (consumed as u64, out)
    }

    /// Invert [`pack_buffer`]. Fails on a truncated stream or a checksum
    /// mismatch.
    pub fn unpack_buffer(packed: &[u8], format: StreamFormat) -> Result<Vec<u8>, ()> {
        let (header_len, trailer_len) = match format {
            StreamFormat::Raw => (0, 0),
            StreamFormat::Zlib => (ZLIB_HEADER.len(), 4),
            StreamFormat::Gzip => (GZIP_HEADER.len(), 8),
        };
        if packed.len() < header_len + trailer_len {
            return Err(());
        }
        let body = &packed[header_len..packed.len() - trailer_len];

        let mut out = Vec::with_capacity(body.len() * 2);
        let mut i = 0;
        while i < body.len() {
            if i + 1 >= body.len() {
                return Err(());
            }
            let count = body[i] as usize;
            let byte = body[i + 1];
            if count == 0 {
                return Err(());
            }
            out.extend(std::iter::repeat(byte).take(count));
            i += 2;
        }

        if trailer_len >= 4 {
            let trailer = &packed[packed.len() - trailer_len..];
            let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
            if checksum(&out) != expected {
                return Err(());
            }
        }

        Ok(out)
    }

    fn encode_chunk(chunk: &[u8], store_only: bool, out: &mut Vec<u8>) {
        if store_only {
            for &byte in chunk {
                out.push(1);
                out.push(byte);
            }
            return;
        }

        let mut run_byte = chunk[0];
        let mut run_len = 0usize;
        for &byte in chunk {
            if byte == run_byte && run_len < 255 {
                run_len += 1;
            } else {
                out.push(run_len as u8);
                out.push(run_byte);
                run_byte = byte;
                run_len = 1;
            }
        }
        out.push(run_len as u8);
        out.push(run_byte);
    }
}
