use std::sync::Arc;

use netexpect_common::{CredentialsProvider, Endpoint, NetexpectError, NetworkKind};
use netexpect_core::RemoteDialer;
use russh::client::Handle;
use russh::keys::agent::client::AgentClient;
use tokio::net::TcpStream;
use tracing::*;
use uuid::Uuid;

use crate::handler::{ClientHandler, HostKeyVerification};

#[derive(Debug, Clone)]
pub struct SshOptions {
    pub term: String,
    pub pty_width: u32,
    pub pty_height: u32,
    /// Ask the server pty not to echo our writes back.
    pub suppress_echo: bool,
    pub verification: HostKeyVerification,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            term: "xterm".into(),
            pty_width: 200,
            pty_height: 200,
            suppress_echo: false,
            verification: HostKeyVerification::default(),
        }
    }
}

/// Open a transport-level connection (directly or through `dialer`) and run
/// the authentication ladder: agent identities first, then each private
/// key, then each password, per username. First success wins.
pub(crate) async fn open_authenticated(
    endpoint: &Endpoint,
    credentials: &Arc<dyn CredentialsProvider>,
    verification: &HostKeyVerification,
    dialer: Option<&Arc<dyn RemoteDialer>>,
    session_id: Uuid,
) -> Result<Handle<ClientHandler>, NetexpectError> {
    let config = Arc::new(russh::client::Config::default());
    let handler = ClientHandler {
        endpoint: endpoint.clone(),
        verification: verification.clone(),
        session_id,
    };

    info!(session=%session_id, endpoint=%endpoint, "connecting");
    let mut handle = match dialer {
        Some(dialer) => {
            let stream = dialer
                .dial_remote(NetworkKind::Tcp, &endpoint.address())
                .await?;
            russh::client::connect_stream(config, stream, handler).await?
        }
        None => {
            let stream = TcpStream::connect(endpoint.address())
                .await
                .map_err(NetexpectError::Unreachable)?;
            russh::client::connect_stream(config, stream, handler).await?
        }
    };

    if authenticate(&mut handle, credentials, session_id).await? {
        return Ok(handle);
    }

    let _ = handle
        .disconnect(russh::Disconnect::ByApplication, "", "")
        .await;
    Err(NetexpectError::Auth)
}

async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    credentials: &Arc<dyn CredentialsProvider>,
    session_id: Uuid,
) -> Result<bool, NetexpectError> {
    let usernames = credentials.usernames().await;
    let passphrase = credentials.passphrase().await;

    for username in &usernames {
        if let Some(socket) = credentials.agent_socket() {
            match AgentClient::connect_uds(&socket).await {
                Ok(mut agent) => {
                    let identities = agent.request_identities().await?;
                    for identity in identities {
                        let key = identity.public_key().into_owned();
                        let result = handle
                            .authenticate_publickey_with(username.clone(), key, None, &mut agent)
                            .await
                            .map_err(NetexpectError::other)?;
                        if result.success() {
                            debug!(session=%session_id, username=%username, "authenticated via agent");
                            return Ok(true);
                        }
                    }
                }
                Err(error) => {
                    warn!(session=%session_id, ?error, socket=%socket.display(), "cannot reach SSH agent");
                }
            }
        }

        for key_material in credentials.private_keys().await {
            let key = match russh::keys::decode_secret_key(
                key_material.expose_secret(),
                passphrase.as_ref().map(|p| p.expose_secret().as_str()),
            ) {
                Ok(key) => key,
                Err(error) => {
                    warn!(session=%session_id, ?error, "skipping undecodable private key");
                    continue;
                }
            };
            let result = handle
                .authenticate_publickey(
                    username.clone(),
                    russh::keys::PrivateKeyWithHashAlg::new(Arc::new(key), None),
                )
                .await?;
            if result.success() {
                debug!(session=%session_id, username=%username, "authenticated with key");
                return Ok(true);
            }
        }

        for password in credentials.passwords().await {
            let result = handle
                .authenticate_password(username.clone(), password.expose_secret().clone())
                .await?;
            if result.success() {
                debug!(session=%session_id, username=%username, "authenticated with password");
                return Ok(true);
            }
        }
    }

    Ok(false)
}
