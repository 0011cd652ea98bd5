//! Subscriber setup for binaries and demos. The library itself only emits `tracing` events.

use std::str::FromStr;

use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = std::convert::Infallible;

    /// `json` selects JSON lines; anything else is the human-readable format.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(if s.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        })
    }
}

/// Installs a global fmt subscriber. `RUST_LOG` wins over `level`.
///
/// Returns `false` when a subscriber was already installed.
pub fn init(level: &str, format: LogFormat) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let installed = match format {
        LogFormat::Json => fmt().json().with_env_filter(filter).try_init(),
        LogFormat::Pretty => fmt().with_env_filter(filter).try_init(),
    };
    installed.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_parsing_defaults_to_pretty() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("pretty".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert_eq!("whatever".parse::<LogFormat>(), Ok(LogFormat::Pretty));
    }

    #[test]
    fn second_init_reports_existing_subscriber() {
        init("debug", LogFormat::Pretty);

        assert!(!init("info", LogFormat::Json));
    }
}
