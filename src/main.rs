//! # Corpus Bench - Main Entry Point
//!
//! Command-line front end for the barrier-synchronized benchmark harness.
//! The binary performs these key operations:
//!
//! 1. **Initialize logging**: whole-line colorized diagnostics on stderr
//! 2. **Parse and validate arguments**: CLI args become an immutable
//!    `BenchmarkConfiguration`, rejected before any thread spawns
//! 3. **Print the parameter banner**: the resolved configuration
//! 4. **Run the harness**: one barrier-coordinated pass over N threads
//! 5. **Render the report**: verdict line, human summary, CSV block, and
//!    the optional per-core table and JSON artifact
//!
//! ## Exit Behavior
//!
//! Fatal conditions (invalid configuration, thread spawn failure, affinity
//! failure, malformed accounting source) exit non-zero through error
//! propagation. A workload failure is not fatal: the run completes, the
//! report is printed with an untrustworthy-results warning, and the
//! process still exits zero.

use anyhow::Result;
use clap::Parser;
use corpus_bench::cli::{Args, BenchmarkConfiguration};
use corpus_bench::harness::BenchmarkHarness;
use corpus_bench::{logging, report, workload};
use tracing::info;

fn main() -> Result<()> {
    // Verbosity is controlled via RUST_LOG, e.g. RUST_LOG=debug.
    logging::init();

    let args = Args::parse();
    let config = BenchmarkConfiguration::from_args(&args)?;

    print_parameter_banner(&config);
    if !config.deflate_buffering {
        println!("Buffering within workload on deflate side disabled !");
    }
    if !config.inflate_buffering {
        println!("Buffering within workload on inflate side disabled !");
    }

    info!("Starting {} benchmark", config.workload);

    let workload_kind = config.workload;
    let harness = BenchmarkHarness::new(config.clone());
    let output = harness.run(|_| workload::build(workload_kind))?;

    println!();
    if output.result.failure {
        println!(
            "AT LEAST ONE FAILURE OCCURRED DURING THE TESTS - DO NOT TRUST THE FIGURES PRODUCED"
        );
    } else {
        println!("# PASS verify for {}", config.workload);
    }

    let aggregator = report::ReportAggregator::new(&config);
    print!("{}", aggregator.render(&output));

    if config.cpu_core_info {
        println!();
        print!("{}", report::per_core_table(&output.cpu_delta));
    }

    if let Some(ref path) = config.output_file {
        report::write_json_artifact(path, &config, &output)?;
    }

    Ok(())
}

/// Echo the resolved configuration before the run, so every report is
/// self-describing in captured output.
fn print_parameter_banner(config: &BenchmarkConfiguration) {
    let yes_no = |flag: bool| if flag { "Yes" } else { "No" };

    println!("\ncorpus benchmark harness");
    println!("\nTest parameters:\n");
    println!(
        "\tWorkload:                         {} ({})",
        config.workload.type_id(),
        config.workload
    );
    println!("\tCompression level:                {}", config.level);
    println!(
        "\tStream type:                      {} ({})",
        config.stream_format.type_id(),
        config.stream_format
    );
    println!("\tIteration count:                  {}", config.iterations);
    println!("\tThread count:                     {}", config.threads);
    println!("\tNumber of cores:                  {}", config.cores);
    println!("\tChunk size:                       {}", config.chunk_size);
    println!(
        "\tCorpus used:                      {}",
        config.corpus
    );
    println!(
        "\tBuffering in deflate enabled:     {}",
        yes_no(config.deflate_buffering)
    );
    println!(
        "\tBuffering in inflate enabled:     {}",
        yes_no(config.inflate_buffering)
    );
    println!(
        "\tAllow partial chunks:             {}",
        yes_no(config.allow_partial_chunks)
    );
    println!(
        "\tCPU core affinity:                {}",
        yes_no(config.affinity)
    );
    println!("\tVerification:                     {}", yes_no(config.verify));
    println!();
}
