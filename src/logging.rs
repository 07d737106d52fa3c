//! Diagnostic logging
//!
//! Installs a `tracing` subscriber that writes to stderr so command output on
//! stdout stays machine-readable. `RUST_LOG` overrides the default filter and
//! `LOG_FORMAT=json` switches to one JSON object per line.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "warn,budget_store=info";

/// Environment variable selecting the output format
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Output format of the subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    /// Read the format from [`LOG_FORMAT_ENV`], defaulting to text
    pub fn from_env() -> Self {
        Self::parse(std::env::var(LOG_FORMAT_ENV).ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Build the filter from `RUST_LOG`, falling back to `default`
pub fn filter_from_env(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber
///
/// `verbose` raises this crate to `debug` when `RUST_LOG` is unset. Calling
/// this more than once is harmless; later calls are ignored.
pub fn init(verbose: bool) {
    let default = if verbose {
        "warn,budget_store=debug"
    } else {
        DEFAULT_FILTER
    };
    let filter = filter_from_env(default);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let _ = match LogFormat::from_env() {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
}
