//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;
use vaultcore_types::{Result, VaultError};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info,vaultcore::activity=info";

/// Install the global subscriber: env filter from `RUST_LOG` (falling back
/// to [`DEFAULT_FILTER`]), human-readable or JSON lines.
///
/// # Errors
/// `Configuration` if the filter does not parse or a global subscriber is
/// already installed.
pub fn init(json: bool) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(DEFAULT_FILTER)
            .map_err(|e| VaultError::Configuration(format!("log filter: {e}")))?,
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| VaultError::Configuration(format!("tracing subscriber: {e}")))
}
