//! Shared helpers for the end-to-end suites.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// Install a test subscriber once per binary. Controlled with `RUST_LOG`;
/// silent by default so assertion output stays readable.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
