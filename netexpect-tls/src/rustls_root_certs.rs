use once_cell::sync::Lazy;
use rustls::RootCertStore;
use tracing::*;

/// Native trust store, loaded once. Certificates that fail to parse are
/// skipped with a warning rather than poisoning the whole store.
pub static ROOT_CERT_STORE: Lazy<RootCertStore> = Lazy::new(|| {
    let loaded = rustls_native_certs::load_native_certs();
    for error in &loaded.errors {
        warn!(?error, "failed to load a native root certificate");
    }
    let mut roots = RootCertStore::empty();
    for cert in loaded.certs {
        if let Err(error) = roots.add(cert) {
            warn!(?error, "rejected native root certificate");
        }
    }
    roots
});
