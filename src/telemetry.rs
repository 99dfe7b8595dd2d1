//! Tracing initialization for embedders and binaries.

use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Initializes the global tracing subscriber once.
///
/// Filtering follows `RUST_LOG` (e.g. `RUST_LOG=soundlog=debug`), defaulting
/// to `info`. Safe to call multiple times; later calls are no-ops, including
/// when the embedding application already installed its own subscriber.
pub fn init_tracing() {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
