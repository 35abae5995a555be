pub mod bridge;

pub use bridge::{BridgeConfig, BridgeError, TranslationOrchestrator};

/// Install a `fmt` tracing subscriber for hosts that have none.
///
/// The filter comes from `RUST_LOG`, falling back to
/// `dialect_bridge=info,warn`. Safe to call more than once: later calls are
/// no-ops when a global subscriber is already set.
pub fn init_tracing() {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("dialect_bridge=info,warn"));

    let installed = fmt::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(version = env!("CARGO_PKG_VERSION"), "dialect-bridge tracing initialized");
    }
}
