//! Logging setup for qrattend.
//!
//! Diagnostics are `tracing` events written to stderr. Stdout belongs to the
//! kiosk's status line and log feed, so the two never interleave on a
//! redirected terminal.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Verbosity level for logging output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Info and above.
    #[default]
    Normal,
    /// Debug and above.
    Verbose,
    /// Everything, including per-frame decode misses.
    Trace,
}

impl Verbosity {
    /// Verbosity from the `-q` flag and the number of `-v` flags.
    #[must_use]
    pub fn from_flags(quiet: bool, verbose: u8) -> Self {
        match (quiet, verbose) {
            (true, _) => Self::Quiet,
            (false, 0) => Self::Normal,
            (false, 1) => Self::Verbose,
            (false, _) => Self::Trace,
        }
    }

    /// Convert verbosity to tracing level filter.
    #[must_use]
    pub fn to_level_filter(&self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }

    /// Filter directive for this verbosity.
    ///
    /// The HTTP stack stays at `warn` unless tracing, since every delivery
    /// attempt would otherwise log a connection pool line.
    #[must_use]
    pub fn filter_directive(&self) -> String {
        let http = if *self == Self::Trace { "debug" } else { "warn" };
        format!(
            "qrattend={},reqwest={http},hyper_util={http}",
            self.to_level_filter()
        )
    }
}

/// Initialize the logging system.
///
/// Call once at startup. `RUST_LOG`, when set, replaces the filter derived
/// from `verbosity`.
///
/// # Examples
///
/// ```no_run
/// use qrattend::{init_logging, logging::Verbosity};
///
/// init_logging(Verbosity::Verbose);
/// ```
pub fn init_logging(verbosity: Verbosity) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.filter_directive()));

    let subscriber = tracing_subscriber::registry().with(env_filter).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false),
    );

    // A subscriber may already be installed (tests, embedding hosts)
    let _ = subscriber.try_init();
}

/// Initialize logging for tests: warnings and errors through the test writer.
#[cfg(test)]
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_to_level() {
        assert_eq!(Verbosity::Quiet.to_level_filter(), Level::ERROR);
        assert_eq!(Verbosity::Normal.to_level_filter(), Level::INFO);
        assert_eq!(Verbosity::Verbose.to_level_filter(), Level::DEBUG);
        assert_eq!(Verbosity::Trace.to_level_filter(), Level::TRACE);
    }

    #[test]
    fn test_from_flags() {
        assert_eq!(Verbosity::from_flags(true, 3), Verbosity::Quiet);
        assert_eq!(Verbosity::from_flags(false, 0), Verbosity::Normal);
        assert_eq!(Verbosity::from_flags(false, 1), Verbosity::Verbose);
        assert_eq!(Verbosity::from_flags(false, 5), Verbosity::Trace);
    }

    #[test]
    fn test_filter_directive() {
        assert_eq!(
            Verbosity::Normal.filter_directive(),
            "qrattend=INFO,reqwest=warn,hyper_util=warn"
        );
        assert!(Verbosity::Trace
            .filter_directive()
            .contains("reqwest=debug"));
        assert!(EnvFilter::try_new(Verbosity::Verbose.filter_directive()).is_ok());
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging(Verbosity::Quiet);
        init_logging(Verbosity::Trace);
        init_test_logging();
    }
}
