use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use netexpect_common::{CredentialsProvider, Endpoint, NetexpectError, NetworkKind};
use netexpect_core::{BoxedStream, RemoteDialer, Trace};
use russh::client::{Handle, Msg};
use russh::Channel;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::*;
use uuid::Uuid;

use crate::connect::open_authenticated;
use crate::control_master::ControlMasterStream;
use crate::handler::{ClientHandler, HostKeyVerification};

/// Buffer of the in-memory stream pair backing each forwarded connection.
/// Bounded on purpose: a stalled consumer stalls the copier, which stops
/// reading from its peer, so nothing queues without limit.
const FORWARD_BUFFER: usize = 64 * 1024;

/// How the jump hop is reached.
pub enum TunnelTarget {
    /// Authenticate our own SSH client against the jump host.
    Jump {
        endpoint: Endpoint,
        credentials: Arc<dyn CredentialsProvider>,
        verification: HostKeyVerification,
    },
    /// Reuse a preauthenticated OpenSSH multiplex socket outside this
    /// process; forwards are `ssh -W` children.
    ControlMaster {
        socket: PathBuf,
        destination: String,
    },
}

/// A jump-host connection handing out forwarded streams to device
/// endpoints behind it.
///
/// `connect` runs once; `dial_remote` may then be called concurrently.
/// `close` is terminal: a closed tunnel never reopens.
pub struct Tunnel {
    target: TunnelTarget,
    session: Mutex<Option<Handle<ClientHandler>>>,
    connected: AtomicBool,
    closed: AtomicBool,
    trace: Option<Trace>,
    id: Uuid,
}

impl Tunnel {
    pub fn new(target: TunnelTarget) -> Self {
        Self {
            target,
            session: Mutex::new(None),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            trace: None,
            id: Uuid::new_v4(),
        }
    }

    pub fn with_trace(mut self, trace: Trace) -> Self {
        self.trace = Some(trace);
        self
    }

    pub async fn connect(&self) -> Result<(), NetexpectError> {
        let mut session = self.session.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(NetexpectError::Closed);
        }
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        match &self.target {
            TunnelTarget::Jump {
                endpoint,
                credentials,
                verification,
            } => {
                let handle =
                    open_authenticated(endpoint, credentials, verification, None, self.id).await?;
                *session = Some(handle);
            }
            TunnelTarget::ControlMaster { socket, .. } => {
                tokio::fs::metadata(socket).await.map_err(|error| {
                    NetexpectError::ControlMaster(format!(
                        "multiplex socket {}: {error}",
                        socket.display()
                    ))
                })?;
            }
        }
        self.connected.store(true, Ordering::SeqCst);
        info!(tunnel=%self.id, "tunnel up");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    /// Open a stream to `addr` on the far side of the jump hop.
    pub async fn dial(
        &self,
        network: NetworkKind,
        addr: &str,
    ) -> Result<BoxedStream, NetexpectError> {
        if !self.is_connected() {
            return Err(NetexpectError::Closed);
        }
        // Only TCP can ride a forwarded channel; the unix and streampipe
        // kinds exist for local endpoints.
        if network != NetworkKind::Tcp {
            return Err(NetexpectError::NotSupported);
        }
        let (host, port) = split_host_port(addr)?;

        match &self.target {
            TunnelTarget::Jump { .. } => {
                let session = self.session.lock().await;
                let session = session.as_ref().ok_or(NetexpectError::Closed)?;
                let channel = session
                    .channel_open_direct_tcpip(host.clone(), port.into(), "127.0.0.1", 0)
                    .await?;
                debug!(tunnel=%self.id, %host, port, "forwarding");
                Ok(bridge(channel, self.id))
            }
            TunnelTarget::ControlMaster {
                socket,
                destination,
            } => {
                let stream = ControlMasterStream::spawn(
                    socket,
                    destination,
                    &host,
                    port,
                    self.trace.clone(),
                )
                .await?;
                Ok(Box::new(stream))
            }
        }
    }

    /// Terminal and idempotent.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        let mut session = self.session.lock().await;
        if let Some(handle) = session.take() {
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "", "")
                .await;
            info!(tunnel=%self.id, "tunnel closed");
        }
    }
}

#[async_trait]
impl RemoteDialer for Tunnel {
    async fn dial_remote(
        &self,
        network: NetworkKind,
        addr: &str,
    ) -> Result<BoxedStream, NetexpectError> {
        self.dial(network, addr).await
    }
}

/// Bridge a forwarded channel to a locally handed-out stream through two
/// independently scheduled copiers. Either direction finishing shuts down
/// its peer's write side.
fn bridge(channel: Channel<Msg>, tunnel_id: Uuid) -> BoxedStream {
    let (local, far) = tokio::io::duplex(FORWARD_BUFFER);
    let (mut remote_read, mut remote_write) = tokio::io::split(channel.into_stream());
    let (mut far_read, mut far_write) = tokio::io::split(far);

    tokio::spawn(async move {
        let result = tokio::io::copy(&mut remote_read, &mut far_write).await;
        let _ = far_write.shutdown().await;
        debug!(tunnel=%tunnel_id, ?result, "remote->local copier done");
    });
    tokio::spawn(async move {
        let result = tokio::io::copy(&mut far_read, &mut remote_write).await;
        let _ = remote_write.shutdown().await;
        debug!(tunnel=%tunnel_id, ?result, "local->remote copier done");
    });

    Box::new(local)
}

fn split_host_port(addr: &str) -> Result<(String, u16), NetexpectError> {
    let (host, port) = addr.rsplit_once(':').ok_or_else(|| {
        NetexpectError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("address {addr:?} is not host:port"),
        ))
    })?;
    let port = port.parse().map_err(|_| {
        NetexpectError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid port in {addr:?}"),
        ))
    })?;
    Ok((host.trim_matches(['[', ']']).to_owned(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_host_port() {
        assert_eq!(
            split_host_port("10.0.0.1:22").unwrap(),
            ("10.0.0.1".into(), 22)
        );
        assert_eq!(
            split_host_port("[2001:db8::1]:2222").unwrap(),
            ("2001:db8::1".into(), 2222)
        );
        assert!(split_host_port("no-port").is_err());
    }

    #[tokio::test]
    async fn test_closed_tunnel_stays_closed() {
        let tunnel = Tunnel::new(TunnelTarget::ControlMaster {
            socket: "/nonexistent/mux.sock".into(),
            destination: "jump".into(),
        });
        assert!(!tunnel.is_connected());
        tunnel.close().await;
        assert!(!tunnel.is_connected());
        assert!(matches!(
            tunnel.connect().await,
            Err(NetexpectError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_control_master_needs_existing_socket() {
        let tunnel = Tunnel::new(TunnelTarget::ControlMaster {
            socket: "/nonexistent/mux.sock".into(),
            destination: "jump".into(),
        });
        assert!(matches!(
            tunnel.connect().await,
            Err(NetexpectError::ControlMaster(_))
        ));
    }
}
