//! System-wide CPU time accounting and cycle counting.
//!
//! Reads the kernel's cumulative CPU accounting source (`/proc/stat` format)
//! immediately before and after the timed region and computes field-wise
//! deltas, per core and in aggregate, plus the context-switch delta. The
//! accounting source is assumed trustworthy: a line that does not parse to
//! the expected field count is a fatal environment error, because silently
//! degrading accuracy would corrupt the measurement this tool exists to
//! produce.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Highest per-core index tracked individually. Cores beyond the cap still
/// contribute to the aggregate `cpu` line and are otherwise ignored.
pub const MAX_TRACKED_CORES: usize = 32;

/// Number of time-domain fields consumed from each `cpu` line.
pub const STAT_FIELD_COUNT: usize = 7;

/// Errors raised while sampling the accounting source.
#[derive(Debug, Error)]
pub enum StatError {
    #[error("cannot read accounting source {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The offending line is carried verbatim for the diagnostic.
    #[error("malformed accounting line: {0:?}")]
    MalformedLine(String),

    #[error("accounting counter {field} decreased between samples")]
    NonMonotonic { field: &'static str },
}

/// Cumulative time-in-state counters for one core (or the aggregate line),
/// in kernel ticks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
}

impl CpuTimes {
    const FIELD_NAMES: [&'static str; STAT_FIELD_COUNT] =
        ["user", "nice", "system", "idle", "iowait", "irq", "softirq"];

    fn fields(&self) -> [u64; STAT_FIELD_COUNT] {
        [
            self.user,
            self.nice,
            self.system,
            self.idle,
            self.iowait,
            self.irq,
            self.softirq,
        ]
    }

    fn from_fields(fields: [u64; STAT_FIELD_COUNT]) -> Self {
        Self {
            user: fields[0],
            nice: fields[1],
            system: fields[2],
            idle: fields[3],
            iowait: fields[4],
            irq: fields[5],
            softirq: fields[6],
        }
    }

    /// Time spent doing anything other than idling. Idle time is excluded;
    /// io-wait is counted as busy, matching the utilization formula used in
    /// the report.
    pub fn busy_ticks(&self) -> u64 {
        self.user + self.nice + self.system + self.iowait + self.irq + self.softirq
    }

    /// Field-wise `self - earlier`, rejecting any decreasing counter.
    fn delta_from(&self, earlier: &Self) -> Result<Self, StatError> {
        let mut out = [0u64; STAT_FIELD_COUNT];
        let now = self.fields();
        let then = earlier.fields();
        for i in 0..STAT_FIELD_COUNT {
            out[i] = now[i]
                .checked_sub(then[i])
                .ok_or(StatError::NonMonotonic { field: Self::FIELD_NAMES[i] })?;
        }
        Ok(Self::from_fields(out))
    }
}

/// One parsed accounting snapshot: the aggregate line, every tracked
/// per-core line, and the whole-system context-switch counter.
#[derive(Debug, Default, Clone, Serialize)]
pub struct CpuAccounting {
    pub total: CpuTimes,
    /// Indexed by core number; only cores present in the source appear.
    pub per_core: Vec<CpuTimes>,
    pub context_switches: u64,
}

impl CpuAccounting {
    /// Parse the accounting source text. Unknown line kinds are skipped;
    /// recognized lines that fail to parse are fatal.
    pub fn parse(text: &str) -> Result<Self, StatError> {
        let mut acc = CpuAccounting::default();

        for line in text.lines() {
            if let Some(rest) = line.strip_prefix("ctxt") {
                acc.context_switches = rest
                    .split_whitespace()
                    .next()
                    .and_then(|tok| tok.parse().ok())
                    .ok_or_else(|| StatError::MalformedLine(line.to_string()))?;
                continue;
            }

            if !line.starts_with("cpu") {
                continue;
            }

            let mut tokens = line.split_whitespace();
            let tag = tokens
                .next()
                .ok_or_else(|| StatError::MalformedLine(line.to_string()))?;

            let mut fields = [0u64; STAT_FIELD_COUNT];
            for slot in fields.iter_mut() {
                *slot = tokens
                    .next()
                    .and_then(|tok| tok.parse().ok())
                    .ok_or_else(|| StatError::MalformedLine(line.to_string()))?;
            }
            let times = CpuTimes::from_fields(fields);

            if tag == "cpu" {
                acc.total = times;
            } else {
                let index: usize = tag[3..]
                    .parse()
                    .map_err(|_| StatError::MalformedLine(line.to_string()))?;
                // Indices beyond the cap do not corrupt the aggregate, so
                // they are ignored rather than rejected.
                if index < MAX_TRACKED_CORES {
                    if acc.per_core.len() <= index {
                        acc.per_core.resize(index + 1, CpuTimes::default());
                    }
                    acc.per_core[index] = times;
                }
            }
        }

        Ok(acc)
    }

    /// Field-wise `self - earlier` across the aggregate, every core, and
    /// the context-switch counter. Any decreasing counter means one of the
    /// two samples is erroneous and the pair is rejected.
    pub fn delta_from(&self, earlier: &Self) -> Result<Self, StatError> {
        let mut per_core = Vec::with_capacity(self.per_core.len());
        for (index, times) in self.per_core.iter().enumerate() {
            let then = earlier.per_core.get(index).copied().unwrap_or_default();
            per_core.push(times.delta_from(&then)?);
        }

        Ok(Self {
            total: self.total.delta_from(&earlier.total)?,
            per_core,
            context_switches: self
                .context_switches
                .checked_sub(earlier.context_switches)
                .ok_or(StatError::NonMonotonic { field: "ctxt" })?,
        })
    }
}

/// One sample: the accounting counters plus the hardware cycle counter,
/// captured as close together as the sampler allows.
#[derive(Debug, Clone)]
pub struct StatSnapshot {
    pub accounting: CpuAccounting,
    pub cycles: u64,
}

/// Reads the OS CPU accounting source and the cycle counter.
///
/// The source path defaults to `/proc/stat` and is overridable so tests can
/// feed synthetic counter files.
#[derive(Debug, Clone)]
pub struct SystemTimeSampler {
    source: PathBuf,
}

impl SystemTimeSampler {
    pub fn new() -> Self {
        Self::with_source("/proc/stat")
    }

    pub fn with_source<P: AsRef<Path>>(source: P) -> Self {
        Self {
            source: source.as_ref().to_path_buf(),
        }
    }

    pub fn sample(&self) -> Result<StatSnapshot, StatError> {
        let text = fs::read_to_string(&self.source).map_err(|source| StatError::Unreadable {
            path: self.source.clone(),
            source,
        })?;

        Ok(StatSnapshot {
            accounting: CpuAccounting::parse(&text)?,
            cycles: cycle_counter(),
        })
    }
}

impl Default for SystemTimeSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonic hardware cycle counter.
///
/// On x86_64 this is the time-stamp counter. Other architectures fall back
/// to a monotonic nanosecond reading so deltas stay meaningful, if not
/// cycle-accurate.
#[cfg(target_arch = "x86_64")]
pub fn cycle_counter() -> u64 {
    // Safe on every x86_64 CPU this tool targets.
    unsafe { core::arch::x86_64::_rdtsc() }
}

#[cfg(not(target_arch = "x86_64"))]
pub fn cycle_counter() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;

    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_nanos() as u64
}
