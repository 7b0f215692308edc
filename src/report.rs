//! Report rendering and the optional JSON results artifact.
//!
//! The aggregator is a pure renderer: it computes derived figures from
//! whatever it is given, including a degraded run, and never errors. The
//! caller prints the PASS/FAIL verdict line before the report based on the
//! aggregate failure flag.

use crate::cli::BenchmarkConfiguration;
use crate::cpustat::{CpuAccounting, CpuTimes};
use crate::harness::{HarnessOutput, RunResult, ThreadContext};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::info;

const CSV_HEADER: &str = "Algorithm,Test_type,Deflate_buffering_enabled,\
Inflate_buffering_enabled,Compression_Level,Chunk_Size,Stream_type,\
Elapsed_usec,Cores,Threads,Count,Data_per_test,Mbps,CPU_%,User_%,\
Kernel_%,Ratio,Context_switches,Cycles";

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "Yes"
    } else {
        "No"
    }
}

/// Throughput in megabits per second: total bits moved over elapsed
/// microseconds. Bits per microsecond and megabits per second coincide.
pub fn throughput_mbps(bytes_per_op: u64, operations: usize, elapsed_usec: u64) -> f64 {
    let bits = bytes_per_op as f64 * operations as f64 * 8.0;
    bits / elapsed_usec.max(1) as f64
}

/// Utilization percentages derived from accounting-tick deltas.
///
/// Each figure is accumulated ticks converted to microseconds through the
/// configured tick length, normalized per core, expressed as a percentage
/// of elapsed wall-clock time.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CpuPercentages {
    pub total: u64,
    pub user: u64,
    pub kernel: u64,
}

impl CpuPercentages {
    pub fn compute(delta: &CpuAccounting, cores: usize, tick_usec: u64, elapsed_usec: u64) -> Self {
        let cores = cores.max(1) as u64;
        let elapsed = elapsed_usec.max(1);
        let percent = |ticks: u64| ticks * tick_usec / cores * 100 / elapsed;
        Self {
            total: percent(delta.total.busy_ticks()),
            user: percent(delta.total.user),
            kernel: percent(delta.total.system),
        }
    }
}

/// Renders a completed run as the human summary plus the CSV block.
pub struct ReportAggregator<'a> {
    config: &'a BenchmarkConfiguration,
}

impl<'a> ReportAggregator<'a> {
    pub fn new(config: &'a BenchmarkConfiguration) -> Self {
        Self { config }
    }

    /// The multi-line human-readable summary.
    pub fn human_summary(&self, result: &RunResult) -> String {
        let elapsed = result.elapsed_usec.max(1);
        let operations = result.operations.max(1);
        let ops_per_sec = (operations as f64 * 1_000_000.0 / elapsed as f64) as u64;

        let mut out = String::new();
        let _ = writeln!(out, "Elapsed time   = {:.3} msec", elapsed as f64 / 1000.0);
        let _ = writeln!(out, "Operations     = {}", result.operations);
        let _ = writeln!(
            out,
            "Time per op    = {:.3} usec ({} ops/sec)",
            elapsed as f64 / operations as f64,
            ops_per_sec
        );
        let _ = writeln!(out, "Elapsed cycles = {}", result.cycle_delta);
        let _ = writeln!(
            out,
            "Throughput     = {:.2} (Mbps)",
            throughput_mbps(result.bytes_per_op, result.operations, result.elapsed_usec)
        );
        out
    }

    /// The fixed-schema machine-parsable row.
    pub fn csv_row(&self, result: &RunResult, cpu_delta: &CpuAccounting) -> String {
        let percentages = CpuPercentages::compute(
            cpu_delta,
            self.config.cores,
            self.config.tick_usec,
            result.elapsed_usec,
        );
        format!(
            "csv,{},{},{},{},{},{},{},{},{},{},{},{},{:.2},{},{},{},{:.3},{},{}",
            self.config.workload,
            self.config.workload.type_id(),
            yes_no(self.config.deflate_buffering),
            yes_no(self.config.inflate_buffering),
            self.config.level,
            self.config.chunk_size,
            self.config.stream_format.type_id(),
            result.elapsed_usec,
            self.config.cores,
            self.config.threads,
            result.operations,
            result.bytes_per_op,
            throughput_mbps(result.bytes_per_op, result.operations, result.elapsed_usec),
            percentages.total,
            percentages.user,
            percentages.kernel,
            result.ratio,
            cpu_delta.context_switches,
            result.cycle_delta,
        )
    }

    /// Human summary, CSV header, and CSV row in display order.
    pub fn render(&self, output: &HarnessOutput) -> String {
        let mut out = self.human_summary(&output.result);
        let _ = writeln!(out, "\nCSV summary:");
        let _ = writeln!(out, "{CSV_HEADER}");
        let _ = writeln!(out, "{}", self.csv_row(&output.result, &output.cpu_delta));
        out
    }
}

/// Per-core accounting delta table plus the context-switch count.
pub fn per_core_table(delta: &CpuAccounting) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "      {:>10} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10}",
        "user", "nice", "sys", "idle", "io", "irq", "sirq"
    );

    let row = |out: &mut String, label: String, times: &CpuTimes| {
        let _ = writeln!(
            out,
            "{label:<6} {:10} {:10} {:10} {:10} {:10} {:10} {:10}",
            times.user, times.nice, times.system, times.idle, times.iowait, times.irq,
            times.softirq
        );
    };

    row(&mut out, "total".to_string(), &delta.total);
    for (core, times) in delta.per_core.iter().enumerate() {
        row(&mut out, format!("cpu{core}"), times);
    }
    let _ = writeln!(out, "Context switches: {}", delta.context_switches);
    out
}

#[derive(Debug, Serialize)]
struct ArtifactMetadata {
    timestamp: DateTime<Utc>,
    version: String,
    cpu_count: usize,
}

/// Everything a later analysis pass needs from one run.
#[derive(Debug, Serialize)]
struct ResultsArtifact<'a> {
    metadata: ArtifactMetadata,
    configuration: &'a BenchmarkConfiguration,
    result: &'a RunResult,
    cpu_percentages: CpuPercentages,
    cpu_delta: &'a CpuAccounting,
    threads: &'a [ThreadContext],
}

/// Write the run as a pretty-printed JSON artifact.
pub fn write_json_artifact(
    path: &Path,
    config: &BenchmarkConfiguration,
    output: &HarnessOutput,
) -> Result<()> {
    let artifact = ResultsArtifact {
        metadata: ArtifactMetadata {
            timestamp: Utc::now(),
            version: crate::VERSION.to_string(),
            cpu_count: num_cpus::get(),
        },
        configuration: config,
        result: &output.result,
        cpu_percentages: CpuPercentages::compute(
            &output.cpu_delta,
            config.cores,
            config.tick_usec,
            output.result.elapsed_usec,
        ),
        cpu_delta: &output.cpu_delta,
        threads: &output.contexts,
    };

    let file = File::create(path)
        .with_context(|| format!("could not create results file {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &artifact)
        .context("could not serialize results artifact")?;
    info!("Results written to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Args, Corpus, StreamFormat, WorkloadKind};
    use clap::Parser;

    fn test_config() -> BenchmarkConfiguration {
        let args = Args::parse_from(["corpus-bench"]);
        BenchmarkConfiguration::from_args(&args).unwrap()
    }

    fn single_op_result() -> RunResult {
        RunResult {
            elapsed_usec: 1000,
            cycle_delta: 123_456,
            operations: 1,
            bytes_per_op: 1000,
            ratio: 0.5,
            failure: false,
        }
    }

    fn accounting(user: u64, system: u64, ctxt: u64) -> CpuAccounting {
        CpuAccounting {
            total: CpuTimes {
                user,
                system,
                ..CpuTimes::default()
            },
            per_core: vec![CpuTimes {
                user,
                system,
                ..CpuTimes::default()
            }],
            context_switches: ctxt,
        }
    }

    #[test]
    fn single_op_throughput_matches_bit_rate() {
        // 1000 bytes once in 1000 usec is 8 bits per usec, i.e. 8 Mbps.
        let mbps = throughput_mbps(1000, 1, 1000);
        assert!((mbps - 8.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_elapsed_does_not_divide_by_zero() {
        assert!(throughput_mbps(1000, 1, 0).is_finite());
        let pct = CpuPercentages::compute(&accounting(5, 5, 0), 1, 10_000, 0);
        assert!(pct.total >= pct.user);
    }

    #[test]
    fn csv_row_has_fixed_column_count_and_order() {
        let config = test_config();
        let aggregator = ReportAggregator::new(&config);
        let row = aggregator.csv_row(&single_op_result(), &accounting(2, 1, 42));

        let columns: Vec<&str> = row.split(',').collect();
        assert_eq!(columns.len(), 20);
        assert_eq!(columns[0], "csv");
        assert_eq!(columns[1], "Corpus Compression");
        assert_eq!(columns[2], "1"); // workload type id
        assert_eq!(columns[3], "Yes"); // deflate buffering
        assert_eq!(columns[4], "Yes"); // inflate buffering
        assert_eq!(columns[8], "1000"); // elapsed usec
        assert_eq!(columns[11], "1"); // operations
        assert_eq!(columns[12], "1000"); // bytes per op
        assert_eq!(columns[13], "8.00"); // Mbps
        assert_eq!(columns[17], "0.500"); // ratio
        assert_eq!(columns[18], "42"); // context switches
        assert_eq!(columns[19], "123456"); // cycles
    }

    #[test]
    fn csv_header_matches_row_arity() {
        assert_eq!(CSV_HEADER.split(',').count() + 1, 20);
    }

    #[test]
    fn cpu_percentages_follow_tick_conversion() {
        // 50 busy ticks at 10ms each over 1 core is 500_000 usec of CPU
        // time; across 1_000_000 usec elapsed that is 50 percent.
        let delta = accounting(30, 20, 0);
        let pct = CpuPercentages::compute(&delta, 1, 10_000, 1_000_000);
        assert_eq!(pct.total, 50);
        assert_eq!(pct.user, 30);
        assert_eq!(pct.kernel, 20);

        // Normalized over 2 cores the same ticks read as half the usage.
        let pct = CpuPercentages::compute(&delta, 2, 10_000, 1_000_000);
        assert_eq!(pct.total, 25);
    }

    #[test]
    fn human_summary_contains_every_figure() {
        let config = test_config();
        let aggregator = ReportAggregator::new(&config);
        let summary = aggregator.human_summary(&single_op_result());

        assert!(summary.contains("Elapsed time   = 1.000 msec"));
        assert!(summary.contains("Operations     = 1"));
        assert!(summary.contains("1000 ops/sec"));
        assert!(summary.contains("Elapsed cycles = 123456"));
        assert!(summary.contains("Throughput     = 8.00 (Mbps)"));
    }

    #[test]
    fn per_core_table_lists_total_then_each_core() {
        let table = per_core_table(&accounting(7, 3, 99));
        let lines: Vec<&str> = table.lines().collect();
        assert!(lines[0].contains("user"));
        assert!(lines[1].starts_with("total"));
        assert!(lines[2].starts_with("cpu0"));
        assert_eq!(lines[3], "Context switches: 99");
    }

    #[test]
    fn render_emits_summary_then_csv_block() {
        let config = test_config();
        let aggregator = ReportAggregator::new(&config);
        let output = HarnessOutput {
            result: single_op_result(),
            cpu_delta: accounting(1, 1, 5),
            contexts: vec![],
        };
        let text = aggregator.render(&output);
        let summary_pos = text.find("Elapsed time").unwrap();
        let header_pos = text.find("Algorithm,").unwrap();
        let row_pos = text.find("\ncsv,").unwrap();
        assert!(summary_pos < header_pos && header_pos < row_pos);
    }

    #[test]
    fn json_artifact_round_trips_configuration() {
        let config = test_config();
        let output = HarnessOutput {
            result: single_op_result(),
            cpu_delta: accounting(1, 1, 5),
            contexts: vec![],
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        write_json_artifact(&path, &config, &output).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["result"]["operations"], 1);
        assert_eq!(value["configuration"]["threads"], 1);
        assert!(value["metadata"]["cpu_count"].as_u64().unwrap() >= 1);
    }
}
