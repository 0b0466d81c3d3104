//! Process-wide log/tracing setup for binaries embedding the client.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::LoggingError;

/// Environment variable holding the filter directives.
pub const LOG_ENV: &str = "SEQWATCH_LOG";

/// Builds the filter from [`LOG_ENV`], falling back to `info`.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber and routes `log` records into it.
///
/// Output goes to stderr, as JSON lines when `json` is set. Fails if a
/// logger or subscriber is already installed.
pub fn init_logging(json: bool) -> Result<(), LoggingError> {
    tracing_log::LogTracer::init()?;

    let registry = tracing_subscriber::registry().with(env_filter());
    if json {
        tracing::subscriber::set_global_default(
            registry.with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            ),
        )?;
    } else {
        tracing::subscriber::set_global_default(
            registry.with(fmt::layer().with_target(false).with_writer(std::io::stderr)),
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_env_filter_default() {
        std::env::remove_var(LOG_ENV);
        assert_eq!(env_filter().to_string(), "info");
    }

    #[test]
    #[serial]
    fn test_env_filter_from_env() {
        std::env::set_var(LOG_ENV, "seqwatch=debug");
        let filter = env_filter();
        std::env::remove_var(LOG_ENV);
        assert_eq!(filter.to_string(), "seqwatch=debug");
    }
}
