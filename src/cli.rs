use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Corpus Bench - a barrier-synchronized multi-threaded benchmark harness
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Workload to benchmark
    #[clap(short = 't', long, value_enum, default_value_t = WorkloadKind::CorpusCompression)]
    pub workload: WorkloadKind,

    /// Total iteration count, divided evenly between threads
    #[clap(short = 'c', long, default_value_t = crate::defaults::ITERATIONS)]
    pub iterations: usize,

    /// Number of worker threads to run
    #[clap(short = 'n', long, default_value_t = crate::defaults::THREADS)]
    pub threads: usize,

    /// Number of CPU cores assumed for utilization math and affinity plans
    #[clap(long, default_value_t = crate::defaults::CORES)]
    pub cores: usize,

    /// Chunk size in bytes submitted per workload call
    #[clap(short = 'k', long, default_value_t = crate::defaults::CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Compression level passed through to the workload (-1 = default)
    #[clap(short = 'l', long, default_value_t = crate::defaults::COMPRESSION_LEVEL, allow_hyphen_values = true)]
    pub level: i32,

    /// Corpus driving the workload
    #[clap(short = 'o', long, value_enum, default_value_t = Corpus::Calgary)]
    pub corpus: Corpus,

    /// Deflate stream framing the workload should produce or consume
    #[clap(short = 's', long, value_enum, default_value_t = StreamFormat::Gzip)]
    pub stream_format: StreamFormat,

    /// Disable internal buffering on the deflate side
    #[clap(long, default_value_t = false)]
    pub no_deflate_buffering: bool,

    /// Disable internal buffering on the inflate side
    #[clap(long, default_value_t = false)]
    pub no_inflate_buffering: bool,

    /// Submit the trailing partial chunk instead of dropping it
    #[clap(long, default_value_t = false)]
    pub partial_chunks: bool,

    /// Verify workload output (intended for single-iteration runs)
    #[clap(short = 'v', long, default_value_t = false)]
    pub verify: bool,

    /// Pin each thread to a core (thread i -> core i mod cores)
    #[clap(long, default_value_t = false)]
    pub affinity: bool,

    /// Display per-core CPU usage deltas after the run
    #[clap(short = 'u', long, default_value_t = false)]
    pub cpu_core_info: bool,

    /// Corpus file overriding the built-in corpus data
    #[clap(short = 'f', long)]
    pub file_path: Option<PathBuf>,

    /// Optional JSON results artifact
    #[clap(long)]
    pub output_file: Option<PathBuf>,

    /// Microseconds represented by one accounting tick. The kernel's
    /// tick unit is environment-dependent; 10ms is typical but not
    /// universal, so the conversion is configurable rather than assumed.
    #[clap(long, default_value_t = crate::defaults::TICK_USEC)]
    pub tick_usec: u64,
}

/// Available benchmark workloads.
///
/// New variants plug in through the three-phase `Workload` contract; the
/// orchestrator dispatches through the trait and never switches on this
/// tag outside workload construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum WorkloadKind {
    /// Chunked compression over a corpus buffer
    #[clap(name = "corpus-compression")]
    CorpusCompression,

    /// Chunked decompression of a pre-compressed corpus buffer
    #[clap(name = "corpus-decompression")]
    CorpusDecompression,
}

impl WorkloadKind {
    /// Stable numeric tag used in the CSV row.
    pub fn type_id(&self) -> u32 {
        match self {
            WorkloadKind::CorpusCompression => 1,
            WorkloadKind::CorpusDecompression => 2,
        }
    }
}

impl std::fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkloadKind::CorpusCompression => write!(f, "Corpus Compression"),
            WorkloadKind::CorpusDecompression => write!(f, "Corpus Decompression"),
        }
    }
}

/// Corpus selector for the built-in workloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum Corpus {
    /// Single custom file (use with --file-path)
    #[clap(name = "custom")]
    Custom,

    #[clap(name = "canterbury")]
    Canterbury,

    #[clap(name = "calgary")]
    Calgary,

    #[clap(name = "silesia")]
    Silesia,
}

impl std::fmt::Display for Corpus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Corpus::Custom => write!(f, "Custom File"),
            Corpus::Canterbury => write!(f, "Canterbury Corpus"),
            Corpus::Calgary => write!(f, "Calgary Corpus"),
            Corpus::Silesia => write!(f, "Silesia Corpus"),
        }
    }
}

/// Deflate stream framing variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum StreamFormat {
    #[clap(name = "raw")]
    Raw,

    #[clap(name = "zlib")]
    Zlib,

    #[clap(name = "gzip")]
    Gzip,
}

impl StreamFormat {
    /// Stable numeric tag used in the CSV row.
    pub fn type_id(&self) -> u32 {
        match self {
            StreamFormat::Raw => 0,
            StreamFormat::Zlib => 1,
            StreamFormat::Gzip => 2,
        }
    }
}

impl std::fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamFormat::Raw => write!(f, "Raw Deflate Stream"),
            StreamFormat::Zlib => write!(f, "Zlib Format Deflate Stream"),
            StreamFormat::Gzip => write!(f, "Gzip Format Deflate Stream"),
        }
    }
}

/// Configuration rejected before any thread is spawned.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("thread count must be at least 1")]
    ZeroThreads,

    #[error("chunk size must be at least 1 byte")]
    ZeroChunkSize,

    #[error(
        "iteration count {iterations} divided over {threads} threads \
         leaves 0 iterations per thread"
    )]
    ZeroIterationsPerThread { iterations: usize, threads: usize },
}

/// Immutable run configuration consumed by the harness.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BenchmarkConfiguration {
    pub workload: WorkloadKind,
    pub iterations: usize,
    pub threads: usize,
    pub cores: usize,
    pub chunk_size: usize,
    pub level: i32,
    pub corpus: Corpus,
    pub stream_format: StreamFormat,
    pub deflate_buffering: bool,
    pub inflate_buffering: bool,
    pub allow_partial_chunks: bool,
    pub verify: bool,
    pub affinity: bool,
    pub cpu_core_info: bool,
    pub file_path: Option<PathBuf>,
    pub output_file: Option<PathBuf>,
    pub tick_usec: u64,
}

impl BenchmarkConfiguration {
    /// Validate the parsed arguments into a run configuration.
    ///
    /// A configuration whose iteration count rounds to zero iterations for
    /// any thread is rejected here, before spawning, so a bad invocation
    /// never produces a partial run.
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        if args.threads == 0 {
            return Err(ConfigError::ZeroThreads);
        }
        if args.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if args.iterations / args.threads == 0 {
            return Err(ConfigError::ZeroIterationsPerThread {
                iterations: args.iterations,
                threads: args.threads,
            });
        }

        Ok(Self {
            workload: args.workload,
            iterations: args.iterations,
            threads: args.threads,
            cores: args.cores.max(1),
            chunk_size: args.chunk_size,
            level: args.level,
            corpus: args.corpus,
            stream_format: args.stream_format,
            deflate_buffering: !args.no_deflate_buffering,
            inflate_buffering: !args.no_inflate_buffering,
            allow_partial_chunks: args.partial_chunks,
            verify: args.verify,
            affinity: args.affinity,
            cpu_core_info: args.cpu_core_info,
            file_path: args.file_path.clone(),
            output_file: args.output_file.clone(),
            tick_usec: args.tick_usec,
        })
    }

    /// Workload repetitions assigned to each thread.
    pub fn iterations_per_thread(&self) -> usize {
        self.iterations / self.threads
    }

    /// Total operations actually performed: the requested count rounded
    /// down to a multiple of the thread count.
    pub fn effective_operations(&self) -> usize {
        self.iterations_per_thread() * self.threads
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{CommandFactory, Parser};

    fn base_args() -> Args {
        Args::parse_from(["corpus-bench"])
    }

    #[test]
    fn verify_cli() {
        Args::command().debug_assert();
    }

    #[test]
    fn default_configuration_is_accepted() {
        let config = BenchmarkConfiguration::from_args(&base_args()).unwrap();
        assert_eq!(config.threads, 1);
        assert_eq!(config.iterations_per_thread(), 1);
        assert_eq!(config.effective_operations(), 1);
        assert!(config.deflate_buffering);
        assert!(config.inflate_buffering);
    }

    #[test]
    fn operations_round_down_to_thread_multiple() {
        let mut args = base_args();
        args.threads = 4;
        args.iterations = 10;

        let config = BenchmarkConfiguration::from_args(&args).unwrap();
        assert_eq!(config.iterations_per_thread(), 2);
        assert_eq!(config.effective_operations(), 8);
    }

    #[test]
    fn rounding_holds_across_thread_counts() {
        for threads in 1..=16usize {
            for iterations in threads..(threads * 5) {
                let mut args = base_args();
                args.threads = threads;
                args.iterations = iterations;
                let config = BenchmarkConfiguration::from_args(&args).unwrap();
                assert_eq!(
                    config.effective_operations(),
                    (iterations / threads) * threads
                );
            }
        }
    }

    #[test]
    fn zero_iterations_per_thread_is_rejected() {
        let mut args = base_args();
        args.threads = 4;
        args.iterations = 3;

        match BenchmarkConfiguration::from_args(&args) {
            Err(ConfigError::ZeroIterationsPerThread { iterations, threads }) => {
                assert_eq!(iterations, 3);
                assert_eq!(threads, 4);
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn zero_threads_is_rejected() {
        let mut args = base_args();
        args.threads = 0;
        assert!(matches!(
            BenchmarkConfiguration::from_args(&args),
            Err(ConfigError::ZeroThreads)
        ));
    }

    #[test]
    fn buffering_flags_invert_into_config() {
        let mut args = base_args();
        args.no_deflate_buffering = true;
        let config = BenchmarkConfiguration::from_args(&args).unwrap();
        assert!(!config.deflate_buffering);
        assert!(config.inflate_buffering);
    }

    #[test]
    fn display_and_type_ids_match_the_report_schema() {
        assert_eq!(
            WorkloadKind::CorpusCompression.to_string(),
            "Corpus Compression"
        );
        assert_eq!(WorkloadKind::CorpusCompression.type_id(), 1);
        assert_eq!(WorkloadKind::CorpusDecompression.type_id(), 2);
        assert_eq!(StreamFormat::Raw.type_id(), 0);
        assert_eq!(StreamFormat::Gzip.type_id(), 2);
        assert_eq!(Corpus::Calgary.to_string(), "Calgary Corpus");
    }
}
