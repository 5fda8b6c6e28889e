//! Logging setup for linebus programs.
//!
//! A program calls one of the `init_*` functions once at startup to install
//! a subscriber. Library code then uses `use crate::tracing::prelude::*` for
//! the `trace!()`, `debug!()`, `info!()`, `warn!()` and `error!()` macros
//! and attaches structured fields (`debug!(fd, "Opened line request")`).

use std::env;
use time::OffsetDateTime;
use tracing_subscriber::{
    filter::EnvFilter,
    fmt::{format::Writer, time::FormatTime},
    prelude::*,
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

pub use tracing_subscriber::filter::LevelFilter;

use prelude::*;

/// Target prefix stripped from our own events.
const CRATE_PREFIX: &str = "linebus::";

/// Initialize logging.
///
/// Under systemd (`JOURNAL_STREAM` set) events go to journald; otherwise
/// to stdout at INFO unless `RUST_LOG` says differently.
pub fn init_journald_or_stdout() {
    if env::var("JOURNAL_STREAM").is_ok() {
        match tracing_journald::layer() {
            Ok(layer) => tracing_subscriber::registry().with(layer).init(),
            Err(e) => {
                init_stdout(LevelFilter::INFO, true);
                error!(error = %e, "Failed to initialize journald logging, using stdout");
            }
        }
    } else {
        init_stdout(LevelFilter::INFO, true);
    }
}

/// Log to stdout with `default_level` unless overridden by `RUST_LOG`.
pub fn init_stdout(default_level: LevelFilter, color: bool) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .with_env_var("RUST_LOG")
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .fmt_fields(tracing_subscriber::fmt::format::DefaultFields::new())
                .event_format(LineFormatter { color }),
        )
        .init();
}

/// Single-line events with structured fields on a dimmed second line.
struct LineFormatter {
    color: bool,
}

impl LineFormatter {
    fn paint(&self, w: &mut Writer<'_>, code: &str, text: &str) -> std::fmt::Result {
        if self.color {
            write!(w, "{}{}\x1b[0m", code, text)
        } else {
            write!(w, "{}", text)
        }
    }
}

/// Collects the message and remaining fields of one event.
#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    fields: Vec<(&'static str, String)>,
}

impl tracing::field::Visit for FieldCollector {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.push((field.name(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        let formatted = format!("{:?}", value);
        if field.name() == "message" {
            self.message = Some(formatted);
        } else {
            // Some(x) -> x
            let cleaned = formatted
                .strip_prefix("Some(")
                .and_then(|inner| inner.strip_suffix(')'))
                .map(str::to_string)
                .unwrap_or(formatted);
            self.fields.push((field.name(), cleaned));
        }
    }
}

fn short_target(target: &str) -> &str {
    target.strip_prefix(CRATE_PREFIX).unwrap_or(target)
}

impl<S, N> tracing_subscriber::fmt::FormatEvent<S, N> for LineFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let mut visitor = FieldCollector::default();
        event.record(&mut visitor);

        LocalTimer.format_time(&mut writer)?;
        write!(writer, " ")?;

        let (code, text) = match *event.metadata().level() {
            tracing::Level::ERROR => ("\x1b[31m", "ERROR"),
            tracing::Level::WARN => ("\x1b[33m", "WARN "),
            tracing::Level::INFO => ("\x1b[32m", "INFO "),
            tracing::Level::DEBUG => ("\x1b[34m", "DEBUG"),
            tracing::Level::TRACE => ("\x1b[35m", "TRACE"),
        };
        self.paint(&mut writer, code, text)?;
        write!(writer, " {}: ", short_target(event.metadata().target()))?;

        if let Some(ref msg) = visitor.message {
            write!(writer, "{}", msg)?;
        }

        if !visitor.fields.is_empty() {
            let fields = visitor
                .fields
                .iter()
                .map(|(k, v)| format!("{}={}", k, v.trim_matches('"')))
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(writer)?;
            // Align under the target column: "HH:MM:SS LEVEL "
            write!(writer, "{:15}", "")?;
            self.paint(&mut writer, "\x1b[90m", &fields)?;
        }

        writeln!(writer)
    }
}

/// Local wall-clock time to the second.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        let formatted = now
            .format(time::macros::format_description!("[hour]:[minute]:[second]"))
            .map_err(|_| std::fmt::Error)?;
        write!(w, "{}", formatted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_target_strips_own_prefix() {
        assert_eq!(short_target("linebus::event::poller"), "event::poller");
        assert_eq!(short_target("mio::poll"), "mio::poll");
    }
}
