//! Log output for the binary.
//!
//! Library code only emits `tracing` events; installing a subscriber is the
//! caller's choice. The CLI installs one that writes to stderr, filtered by
//! `REPO_ANALYST_LOG` when set and by `[logging] level` otherwise.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Environment variable holding an `EnvFilter` directive.
pub const LOG_ENV: &str = "REPO_ANALYST_LOG";

/// Build the filter: the environment wins over the configured level.
pub fn filter(config: &LoggingConfig, verbose: bool) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV) {
        return filter;
    }
    let level = if verbose { "debug" } else { config.level.as_str() };
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// Install the global subscriber. A second call is a no-op.
pub fn init_logging(config: &LoggingConfig, verbose: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(config, verbose))
        .with_writer(std::io::stderr)
        .with_target(false);
    let _ = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_level_falls_back_to_warn() {
        if std::env::var(LOG_ENV).is_ok() {
            return;
        }
        let config = LoggingConfig {
            level: "not a level=[".to_string(),
            json: false,
        };
        assert_eq!(filter(&config, false).to_string(), "warn");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        let config = LoggingConfig::default();
        init_logging(&config, false);
        init_logging(&config, true);
    }
}
