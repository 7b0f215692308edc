//! Benchmark orchestration: thread spawning, phase sequencing, timing.
//!
//! The driver spawns one worker per configured thread, participates as the
//! barrier coordinator, and samples the timing instruments immediately
//! around the unguarded timed region:
//!
//! 1. every worker signals Ready, then runs setup and signals
//!    StartupComplete;
//! 2. the coordinator samples the accounting source and the cycle counter,
//!    then releases the Start gate so all workers begin together;
//! 3. workers run their timed share, signal Stop, tear down, signal End;
//! 4. the coordinator samples again after the Stop drain, then joins every
//!    thread before any report is produced.
//!
//! A workload failure on one thread never stops the others: the failing
//! worker still passes every later gate so the counters stay consistent,
//! and the run is reported as untrustworthy instead of being suppressed.

use crate::affinity::AffinityPlanner;
use crate::barrier::{Gate, PhaseBarrier};
use crate::cli::{BenchmarkConfiguration, ConfigError};
use crate::cpustat::{cycle_counter, CpuAccounting, SystemTimeSampler};
use crate::workload::{Workload, WorkloadParams};
use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{error, info, warn};

/// Per-worker bookkeeping. Created by the driver before spawn, owned
/// exclusively by its worker until join, read-only afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadContext {
    pub id: usize,
    pub core: Option<usize>,
    pub iterations: usize,
    pub aborted: bool,
    pub bytes_per_call: u64,
    pub ratio: f64,
}

impl ThreadContext {
    fn new(id: usize, iterations: usize) -> Self {
        Self {
            id,
            core: None,
            iterations,
            aborted: false,
            bytes_per_call: 0,
            ratio: 0.0,
        }
    }
}

/// Aggregate outcome of one run. Constructed once after the final join;
/// immutable thereafter.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub elapsed_usec: u64,
    pub cycle_delta: u64,
    /// Requested iteration count rounded down to a thread-count multiple.
    pub operations: usize,
    pub bytes_per_op: u64,
    pub ratio: f64,
    /// True if any thread recorded a failure anywhere in the lifecycle.
    pub failure: bool,
}

/// Everything the report renderer needs from a completed run.
#[derive(Debug)]
pub struct HarnessOutput {
    pub result: RunResult,
    pub cpu_delta: CpuAccounting,
    pub contexts: Vec<ThreadContext>,
}

/// Per-thread driver through the five-phase lifecycle.
struct WorkerRunner {
    ctx: ThreadContext,
    params: WorkloadParams,
    workload: Box<dyn Workload>,
    barrier: Arc<PhaseBarrier>,
    planner: Arc<AffinityPlanner>,
}

impl WorkerRunner {
    /// Sequence this thread through every gate. Failure in any workload
    /// phase is recorded in the shared flag; the runner still signals all
    /// later gates so the barrier counts stay consistent.
    fn run(mut self) -> ThreadContext {
        match self.planner.bind_current(self.ctx.id) {
            Ok(core) => self.ctx.core = core,
            Err(err) => {
                // Unpinned execution would invalidate the requested
                // measurement methodology; terminate rather than degrade.
                error!("{err}");
                std::process::exit(1);
            }
        }

        let mut abort = !self.barrier.arrive(Gate::Ready);

        if !self.workload.setup(&self.params).passed() {
            error!("thread {}: workload setup failed", self.ctx.id);
            self.barrier.mark_failure();
            abort = true;
        }
        // Signaled even after a failed setup so the coordinator is never
        // starved waiting for this gate.
        if !self.barrier.arrive(Gate::StartupComplete) {
            abort = true;
        }

        if !self.barrier.wait_for_release() {
            abort = true;
        }

        if !abort {
            if !self.workload.run(&self.params).passed() {
                error!("thread {}: workload run failed", self.ctx.id);
                self.barrier.mark_failure();
            }
            self.ctx.bytes_per_call = self.workload.bytes_per_call();
            self.ctx.ratio = self.workload.ratio();
        }
        self.barrier.arrive(Gate::Stop);

        // Teardown runs regardless of prior aborts.
        if !self.workload.teardown(&self.params).passed() {
            error!("thread {}: workload teardown failed", self.ctx.id);
            self.barrier.mark_failure();
        }
        self.barrier.arrive(Gate::End);

        self.ctx.aborted = abort;
        self.ctx
    }
}

/// Single-shot, fixed-thread benchmark driver.
pub struct BenchmarkHarness {
    config: BenchmarkConfiguration,
    sampler: SystemTimeSampler,
}

impl BenchmarkHarness {
    pub fn new(config: BenchmarkConfiguration) -> Self {
        Self {
            config,
            sampler: SystemTimeSampler::new(),
        }
    }

    /// Substitute the accounting source, primarily for tests.
    pub fn with_sampler(config: BenchmarkConfiguration, sampler: SystemTimeSampler) -> Self {
        Self { config, sampler }
    }

    /// Execute one run, constructing each thread's workload through
    /// `factory`. Fatal conditions (spawn failure, affinity failure,
    /// malformed accounting source, invalid configuration) surface as
    /// errors; workload failures surface in `RunResult::failure`.
    pub fn run<F>(&self, mut factory: F) -> Result<HarnessOutput>
    where
        F: FnMut(usize) -> Box<dyn Workload>,
    {
        let threads = self.config.threads;
        let per_thread = self.config.iterations_per_thread();
        if threads == 0 || per_thread == 0 {
            return Err(ConfigError::ZeroIterationsPerThread {
                iterations: self.config.iterations,
                threads,
            }
            .into());
        }

        let planner = Arc::new(if self.config.affinity {
            AffinityPlanner::new(self.config.cores)?
        } else {
            AffinityPlanner::disabled()
        });
        let barrier = Arc::new(PhaseBarrier::new(threads));

        let mut handles = Vec::with_capacity(threads);
        for id in 0..threads {
            let runner = WorkerRunner {
                ctx: ThreadContext::new(id, per_thread),
                params: WorkloadParams::for_thread(&self.config, id),
                workload: factory(id),
                barrier: Arc::clone(&barrier),
                planner: Arc::clone(&planner),
            };
            let handle = thread::Builder::new()
                .name(format!("worker-{id}"))
                .spawn(move || runner.run())
                .with_context(|| format!("failed to spawn worker thread {id}"))?;
            handles.push(handle);
        }

        barrier.await_all(Gate::Ready)?;
        barrier.await_all(Gate::StartupComplete)?;

        info!("Beginning benchmark run");
        let pre = self.sampler.sample()?;
        let wall_start = Instant::now();
        barrier.release()?;

        barrier.await_all(Gate::Stop)?;
        let cycles_end = cycle_counter();
        let elapsed = wall_start.elapsed();
        let post = self.sampler.sample()?;

        barrier.await_all(Gate::End)?;

        let mut contexts = Vec::with_capacity(threads);
        for (id, handle) in handles.into_iter().enumerate() {
            match handle.join() {
                Ok(ctx) => contexts.push(ctx),
                Err(_) => {
                    warn!("could not join worker thread {id}");
                    barrier.mark_failure();
                }
            }
        }

        let cpu_delta = post.accounting.delta_from(&pre.accounting)?;

        // Last measurement wins, matching the shared-slot behavior the
        // single-value report schema implies.
        let (bytes_per_op, ratio) = contexts
            .iter()
            .rev()
            .find(|ctx| !ctx.aborted && ctx.bytes_per_call > 0)
            .map(|ctx| (ctx.bytes_per_call, ctx.ratio))
            .unwrap_or((0, 0.0));

        let result = RunResult {
            elapsed_usec: elapsed.as_micros() as u64,
            cycle_delta: cycles_end.saturating_sub(pre.cycles),
            operations: per_thread * threads,
            bytes_per_op,
            ratio,
            failure: barrier.failed(),
        };

        info!("All threads complete");
        Ok(HarnessOutput {
            result,
            cpu_delta,
            contexts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Corpus, StreamFormat, WorkloadKind};
    use crate::workload::WorkloadStatus;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::NamedTempFile;

    const STAT_TEXT: &str = "cpu 100 0 50 800 10 1 2\ncpu0 100 0 50 800 10 1 2\nctxt 1000\n";

    fn test_config(threads: usize, iterations: usize) -> BenchmarkConfiguration {
        BenchmarkConfiguration {
            workload: WorkloadKind::CorpusCompression,
            iterations,
            threads,
            cores: 1,
            chunk_size: 1024,
            level: -1,
            corpus: Corpus::Calgary,
            stream_format: StreamFormat::Gzip,
            deflate_buffering: true,
            inflate_buffering: true,
            allow_partial_chunks: false,
            verify: false,
            affinity: false,
            cpu_core_info: false,
            file_path: None,
            output_file: None,
            tick_usec: 10_000,
        }
    }

    fn stat_harness(config: BenchmarkConfiguration) -> (BenchmarkHarness, NamedTempFile) {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(STAT_TEXT.as_bytes()).unwrap();
        let sampler = SystemTimeSampler::with_source(file.path());
        (BenchmarkHarness::with_sampler(config, sampler), file)
    }

    /// Scripted workload: fails the configured phase, counts run calls.
    struct MockWorkload {
        fail_setup: bool,
        fail_run: bool,
        fail_teardown: bool,
        bytes: u64,
        runs: Arc<AtomicUsize>,
        teardowns: Arc<AtomicUsize>,
    }

    impl MockWorkload {
        fn passing(runs: Arc<AtomicUsize>, teardowns: Arc<AtomicUsize>) -> Self {
            Self {
                fail_setup: false,
                fail_run: false,
                fail_teardown: false,
                bytes: 1000,
                runs,
                teardowns,
            }
        }
    }

    impl Workload for MockWorkload {
        fn name(&self) -> &'static str {
            "Mock"
        }

        fn setup(&mut self, _params: &WorkloadParams) -> WorkloadStatus {
            if self.fail_setup {
                WorkloadStatus::Failed
            } else {
                WorkloadStatus::Passed
            }
        }

        fn run(&mut self, _params: &WorkloadParams) -> WorkloadStatus {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail_run {
                WorkloadStatus::Failed
            } else {
                WorkloadStatus::Passed
            }
        }

        fn teardown(&mut self, _params: &WorkloadParams) -> WorkloadStatus {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
            if self.fail_teardown {
                WorkloadStatus::Failed
            } else {
                WorkloadStatus::Passed
            }
        }

        fn bytes_per_call(&self) -> u64 {
            self.bytes
        }

        fn ratio(&self) -> f64 {
            0.5
        }
    }

    #[test]
    fn clean_run_counts_operations_and_reports_bytes() {
        let runs = Arc::new(AtomicUsize::new(0));
        let teardowns = Arc::new(AtomicUsize::new(0));
        let (harness, _file) = stat_harness(test_config(4, 10));

        let output = harness
            .run(|_| {
                Box::new(MockWorkload::passing(
                    Arc::clone(&runs),
                    Arc::clone(&teardowns),
                ))
            })
            .unwrap();

        assert_eq!(output.result.operations, 8); // floor(10/4) * 4
        assert!(!output.result.failure);
        assert_eq!(output.result.bytes_per_op, 1000);
        assert_eq!(output.contexts.len(), 4);
        assert_eq!(runs.load(Ordering::SeqCst), 4);
        assert_eq!(teardowns.load(Ordering::SeqCst), 4);
        assert!(output.contexts.iter().all(|ctx| ctx.iterations == 2));
    }

    #[test]
    fn setup_failure_on_one_thread_degrades_but_completes() {
        let runs = Arc::new(AtomicUsize::new(0));
        let teardowns = Arc::new(AtomicUsize::new(0));
        let (harness, _file) = stat_harness(test_config(4, 4));

        let output = harness
            .run(|id| {
                let mut workload =
                    MockWorkload::passing(Arc::clone(&runs), Arc::clone(&teardowns));
                workload.fail_setup = id == 2;
                Box::new(workload)
            })
            .unwrap();

        assert!(output.result.failure);
        // The aborted worker skips its run phase but everyone tears down.
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(teardowns.load(Ordering::SeqCst), 4);
        assert_eq!(output.contexts.iter().filter(|ctx| ctx.aborted).count(), 1);
        // The surviving workers still supply the measured byte count.
        assert_eq!(output.result.bytes_per_op, 1000);
    }

    #[test]
    fn run_failure_marks_report_untrustworthy() {
        let runs = Arc::new(AtomicUsize::new(0));
        let teardowns = Arc::new(AtomicUsize::new(0));
        let (harness, _file) = stat_harness(test_config(2, 2));

        let output = harness
            .run(|id| {
                let mut workload =
                    MockWorkload::passing(Arc::clone(&runs), Arc::clone(&teardowns));
                workload.fail_run = id == 0;
                Box::new(workload)
            })
            .unwrap();

        assert!(output.result.failure);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn teardown_failure_is_recorded() {
        let runs = Arc::new(AtomicUsize::new(0));
        let teardowns = Arc::new(AtomicUsize::new(0));
        let (harness, _file) = stat_harness(test_config(1, 1));

        let output = harness
            .run(|_| {
                let mut workload =
                    MockWorkload::passing(Arc::clone(&runs), Arc::clone(&teardowns));
                workload.fail_teardown = true;
                Box::new(workload)
            })
            .unwrap();

        assert!(output.result.failure);
    }

    #[test]
    fn zero_iterations_per_thread_is_rejected_before_spawn() {
        let runs = Arc::new(AtomicUsize::new(0));
        let teardowns = Arc::new(AtomicUsize::new(0));
        let mut config = test_config(4, 3);
        config.iterations = 3; // floor(3/4) == 0
        let (harness, _file) = stat_harness(config);

        let spawned = Arc::new(AtomicUsize::new(0));
        let spawned_probe = Arc::clone(&spawned);
        let err = harness
            .run(|_| {
                spawned_probe.fetch_add(1, Ordering::SeqCst);
                Box::new(MockWorkload::passing(
                    Arc::clone(&runs),
                    Arc::clone(&teardowns),
                ))
            })
            .unwrap_err();

        assert!(err.to_string().contains("0 iterations per thread"));
        assert_eq!(spawned.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn malformed_accounting_source_is_fatal() {
        let runs = Arc::new(AtomicUsize::new(0));
        let teardowns = Arc::new(AtomicUsize::new(0));

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"cpu 1 2 3\n").unwrap();
        let sampler = SystemTimeSampler::with_source(file.path());
        let harness = BenchmarkHarness::with_sampler(test_config(1, 1), sampler);

        let err = harness
            .run(|_| {
                Box::new(MockWorkload::passing(
                    Arc::clone(&runs),
                    Arc::clone(&teardowns),
                ))
            })
            .unwrap_err();

        assert!(err.to_string().contains("malformed accounting line"));
    }
}
