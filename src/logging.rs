//! Optional `tracing` subscriber setup.
//!
//! The engine itself only emits `tracing` events. Binaries and tests that
//! want to see them can call [`init`], which reads `RUST_LOG` and falls back
//! to `info`.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Installs a global fmt subscriber filtered by `RUST_LOG`.
///
/// Calling it again, or after another subscriber was installed, does nothing.
pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
