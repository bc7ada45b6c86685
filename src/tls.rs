use std::sync::Once;

/// Install the process-wide rustls crypto provider before the first HTTPS
/// client is built. Safe to call from multiple places; only the first call
/// does anything, and a provider installed elsewhere in the process wins.
pub fn ensure_rustls_provider_installed() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
