//! Logging setup.
//!
//! Logs go to stderr so they never interleave with the module's mirrored
//! stdout. `RUST_LOG` overrides the default filter.

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

/// Default filter directive
pub const DEFAULT_DIRECTIVE: &str = "wasi_runner=info";

static INITIALISED: OnceCell<()> = OnceCell::new();

/// Install the global subscriber. Later calls are no-ops.
pub fn init() {
    INITIALISED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
