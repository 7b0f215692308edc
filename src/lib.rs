//! # Corpus Bench Library
//!
//! A barrier-synchronized multi-threaded benchmark harness. The library
//! drives a pluggable workload (setup / timed run / teardown) across N OS
//! threads, releasing every thread into its timed phase simultaneously and
//! sampling the timing instruments only around the window where all
//! threads are running.
//!
//! ## Architecture Overview
//!
//! The library is organized into several key modules:
//!
//! - `barrier`: five-gate rendezvous primitive shared by every thread
//! - `harness`: per-thread worker driver and the coordinating run loop
//! - `affinity`: round-robin thread-to-core planning and binding
//! - `cpustat`: CPU-time-accounting snapshots and the cycle counter
//! - `workload`: three-phase workload contract plus built-in workloads
//! - `report`: human summary, CSV row, and JSON artifact rendering
//! - `cli`: argument parsing and validated run configuration
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use corpus_bench::cli::{Args, BenchmarkConfiguration};
//! use corpus_bench::harness::BenchmarkHarness;
//! use corpus_bench::{report::ReportAggregator, workload};
//! use clap::Parser;
//!
//! fn main() -> anyhow::Result<()> {
//!     let args = Args::parse_from(["corpus-bench", "-n", "4", "-c", "100"]);
//!     let config = BenchmarkConfiguration::from_args(&args)?;
//!
//!     let workload_kind = config.workload;
//!     let harness = BenchmarkHarness::new(config.clone());
//!     let output = harness.run(|_| workload::build(workload_kind))?;
//!
//!     print!("{}", ReportAggregator::new(&config).render(&output));
//!     Ok(())
//! }
//! ```
//!
//! ## Measurement Guarantees
//!
//! - No worker executes its timed run before every worker finished setup.
//! - Wall clock, cycle counter, and accounting snapshots bracket only the
//!   release-to-stop window.
//! - The report is rendered only after every worker has been joined.
//! - A workload failure degrades the run (reported as untrustworthy)
//!   rather than aborting the other threads.

/// Thread-to-core planning and binding with read-back confirmation
pub mod affinity;

/// Five-gate rendezvous barrier
///
/// One `PhaseBarrier` instance coordinates a single run: arrival gates for
/// Ready and StartupComplete, a broadcast Start release, and drain gates
/// for Stop and End, plus the shared best-effort failure flag.
pub mod barrier;

/// Command-line interface and validated configuration
pub mod cli;

/// CPU-time accounting and cycle counting
///
/// Parses the line-oriented accounting source (aggregate `cpu`, per-core
/// `cpuN`, and `ctxt` lines), computes field-wise pre/post deltas, and
/// reads the hardware cycle counter.
pub mod cpustat;

/// Benchmark orchestration: spawning, phase sequencing, joining, timing
pub mod harness;

/// Diagnostic logging setup
pub mod logging;

/// Report rendering: human summary, CSV row, JSON artifact
pub mod report;

/// The three-phase workload contract and the built-in corpus workloads
pub mod workload;

pub use affinity::AffinityPlanner;
pub use barrier::{Gate, PhaseBarrier};
pub use cli::{Args, BenchmarkConfiguration};
pub use cpustat::SystemTimeSampler;
pub use harness::{BenchmarkHarness, HarnessOutput, RunResult};
pub use report::ReportAggregator;
pub use workload::Workload;

/// Crate version, embedded in result output for reproducibility.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    /// Default total iteration count.
    ///
    /// A single iteration is the verification-friendly default; throughput
    /// runs override this with a much larger count.
    pub const ITERATIONS: usize = 1;

    /// Default worker thread count.
    pub const THREADS: usize = 1;

    /// Default core count assumed for utilization math and affinity plans.
    pub const CORES: usize = 1;

    /// Default chunk size in bytes submitted per workload call.
    pub const CHUNK_SIZE: usize = 8096;

    /// Default compression level passed to the workload (-1 selects the
    /// workload's own default).
    pub const COMPRESSION_LEVEL: i32 = -1;

    /// Microseconds represented by one accounting tick.
    ///
    /// 10ms ticks are typical but environment-dependent, so this is only
    /// a default; `--tick-usec` overrides it.
    pub const TICK_USEC: u64 = 10_000;
}
