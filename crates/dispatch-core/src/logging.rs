use tracing_subscriber::EnvFilter;

use crate::models::{DispatchError, DispatchErrorKind, DispatchResult};

/// Installs a `fmt` subscriber filtered by `filter`.
///
/// Returns `Ok(false)` when a global subscriber was already installed.
pub fn init_logging(filter: &str) -> DispatchResult<bool> {
    let filter = EnvFilter::try_new(filter).map_err(|error| {
        DispatchError::new(
            DispatchErrorKind::InvalidInput,
            format!("invalid log filter '{filter}': {error}"),
        )
    })?;

    Ok(tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init()
        .is_ok())
}
