//! Logger initialization for the server

use jiff::{Zoned, tz::TimeZone};
use logforth::{append::Stderr, filter::EnvFilter, layout::Layout};
use std::{fmt::Write, io::IsTerminal, str::FromStr, sync::Once};

static INIT: Once = Once::new();

const DEFAULT_FILTER: &str = "info";

/// Formats records with a UTC timestamp and a padded, optionally colored, level.
#[derive(Debug)]
struct UtcLayout {
    no_color: bool,
}

impl UtcLayout {
    fn for_stderr() -> Self {
        Self {
            no_color: !std::io::stderr().is_terminal(),
        }
    }

    fn level(&self, level: log::Level) -> String {
        if self.no_color {
            return format!("{level:>5}");
        }

        let color = match level {
            log::Level::Error => 31,
            log::Level::Warn => 33,
            log::Level::Info => 32,
            log::Level::Debug => 34,
            log::Level::Trace => 35,
        };

        format!("\x1b[{color}m{level:>5}\x1b[0m")
    }
}

impl Layout for UtcLayout {
    fn format(
        &self,
        record: &log::Record<'_>,
        _diagnostics: &[Box<dyn logforth::diagnostic::Diagnostic>],
    ) -> anyhow::Result<Vec<u8>> {
        let mut output = String::new();
        let now = Zoned::now().with_time_zone(TimeZone::UTC);

        write!(output, "{} ", now.strftime("%Y-%m-%dT%H:%M:%S%.6fZ"))?;
        write!(output, "{}  ", self.level(record.level()))?;
        write!(output, "{}", record.args())?;

        Ok(output.into_bytes())
    }
}

/// Initialize the stderr logger.
///
/// The filter is a string like "info" or "chat=debug,server=info". An invalid
/// filter falls back to "info". Only the first call has an effect.
pub fn init(log_filter: &str) {
    let log_filter = log_filter.to_owned();

    INIT.call_once(move || {
        logforth::builder()
            .dispatch(move |d| {
                let filter = EnvFilter::from_str(&log_filter).unwrap_or_else(|_| {
                    eprintln!("Invalid log filter '{log_filter}', falling back to '{DEFAULT_FILTER}'");
                    EnvFilter::from_str(DEFAULT_FILTER).expect("default filter should be valid")
                });

                d.filter(filter).append(Stderr::default().with_layout(UtcLayout::for_stderr()))
            })
            .apply();
    });
}
