use std::sync::Arc;

use rustls::pki_types::{InvalidDnsNameError, ServerName};
use rustls::ClientConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::*;

#[derive(thiserror::Error, Debug)]
pub enum TlsUpgradeError {
    #[error("invalid server name: {0}")]
    ServerName(#[from] InvalidDnsNameError),
    #[error("handshake: {0}")]
    Io(#[from] std::io::Error),
}

/// Promote an established plain stream to a client TLS session.
///
/// Legacy network gear speaks the same line protocol in the clear and
/// behind TLS on a neighboring port. Transports call this right after
/// dialing, before any protocol bytes flow, and keep working with the
/// wrapped stream as before.
pub async fn upgrade_client<S>(
    stream: S,
    server_name: &str,
    config: Arc<ClientConfig>,
) -> Result<TlsStream<S>, TlsUpgradeError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let domain = ServerName::try_from(server_name.to_owned())?;
    let connector = TlsConnector::from(config);
    let stream = connector.connect(domain, stream).await?;
    debug!(%server_name, "TLS session established");
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TlsSettings;

    #[tokio::test]
    async fn test_rejects_invalid_server_name() {
        let (local, _far) = tokio::io::duplex(16);
        let settings = TlsSettings {
            accept_invalid_certs: true,
            ..Default::default()
        };
        let config = settings.client_config().unwrap();
        let result = upgrade_client(local, "not a hostname!", config).await;
        assert!(matches!(result, Err(TlsUpgradeError::ServerName(_))));
    }
}
