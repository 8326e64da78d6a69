use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use netexpect_common::{NetexpectError, NetworkKind};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::Trace;

pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// A plain duplex byte stream, e.g. one end of a tunnel.
pub type BoxedStream = Box<dyn AsyncStream>;

/// An authenticated byte-duplex connection to a device.
///
/// Implementations own authentication and any in-band protocol chatter
/// (telnet option negotiation, SSH channels); what `read` yields is the
/// device's CLI byte stream.
#[async_trait]
pub trait Streamer: Send {
    /// Open and authenticate the connection. Must be called once before
    /// any I/O.
    async fn connect(&mut self) -> Result<(), NetexpectError>;

    /// Blocking read; returns as soon as any bytes are available.
    /// `Ok(0)` means the peer closed the stream.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, NetexpectError>;

    /// Write the whole buffer; short writes are errors.
    async fn write(&mut self, data: &[u8]) -> Result<(), NetexpectError>;

    /// Idempotent.
    async fn close(&mut self) -> Result<(), NetexpectError>;

    /// Fetch remote files. Transports without a file-transfer facility
    /// return [`NetexpectError::NotSupported`].
    async fn download(
        &mut self,
        paths: &[String],
    ) -> Result<HashMap<String, Bytes>, NetexpectError> {
        let _ = paths;
        Err(NetexpectError::NotSupported)
    }

    /// Write remote files. See [`Streamer::download`].
    async fn upload(&mut self, files: HashMap<String, Bytes>) -> Result<(), NetexpectError> {
        let _ = files;
        Err(NetexpectError::NotSupported)
    }

    /// Attach a byte-level trace sink. Takes effect for subsequent I/O.
    fn set_trace(&mut self, trace: Trace);
}

/// Dials network addresses on the far side of a jump host.
#[async_trait]
pub trait RemoteDialer: Send + Sync {
    async fn dial_remote(
        &self,
        network: NetworkKind,
        addr: &str,
    ) -> Result<BoxedStream, NetexpectError>;
}
