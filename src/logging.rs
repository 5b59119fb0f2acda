use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

/// Initialize tracing for binaries and tests.
///
/// Reads the filter from `RUST_LOG`, defaulting to `info`. Returns an error
/// if a global subscriber is already set, so callers can `.ok()` it.
pub fn init() -> Result<(), TryInitError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .finish()
        .try_init()
}
