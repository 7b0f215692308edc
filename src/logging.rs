//! Diagnostic output setup.
//!
//! Diagnostics go to stderr through `tracing`, colorized whole-line by
//! severity with no timestamps or level prefixes, so they stay visually
//! separate from the report itself, which is written to stdout. Verbosity
//! is controlled through `RUST_LOG` (default `info`).

use colored::Colorize;
use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// Event formatter that colors the whole line by level and emits nothing
/// else.
struct LevelColorFormatter;

impl<S, N> FormatEvent<S, N> for LevelColorFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        // Fields are buffered first so the color applies to the full line.
        let mut line = String::new();
        ctx.format_fields(Writer::new(&mut line), event)?;

        let colored = match *event.metadata().level() {
            Level::ERROR => line.red(),
            Level::WARN => line.yellow(),
            Level::INFO => line.white(),
            Level::DEBUG => line.blue(),
            Level::TRACE => line.purple(),
        };
        writeln!(writer, "{colored}")
    }
}

/// Install the global subscriber. Called once from `main` before any
/// diagnostic is emitted.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .event_format(LevelColorFormatter)
        .init();
}
