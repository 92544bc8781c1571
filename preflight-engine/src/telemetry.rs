use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Installs a formatted `tracing` subscriber honoring `RUST_LOG`, falling
/// back to the given default directive.
///
/// Embedders that own their own subscriber simply never call this; the
/// engine only ever emits events. Repeated calls are no-ops.
pub fn init_tracing(default_directive: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    });
}
