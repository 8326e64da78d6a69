use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};

use netexpect_common::NetexpectError;
use netexpect_core::Trace;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader, ReadBuf};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::*;

/// Stdio of an `ssh -W` child riding an existing multiplex socket,
/// presented as a byte stream.
///
/// The child is spawned with `kill_on_drop`, so dropping the stream signals
/// it even without an explicit [`close`](ControlMasterStream::close).
pub struct ControlMasterStream {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

impl ControlMasterStream {
    /// Spawn `ssh -S <socket> -W <host>:<port> <destination>`. The child's
    /// stderr is drained into the trace sink.
    pub async fn spawn(
        socket: &Path,
        destination: &str,
        host: &str,
        port: u16,
        trace: Option<Trace>,
    ) -> Result<Self, NetexpectError> {
        let mut child = Command::new("ssh")
            .arg("-S")
            .arg(socket)
            .arg("-W")
            .arg(format!("{host}:{port}"))
            .arg(destination)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|error| {
                NetexpectError::ControlMaster(format!("cannot spawn ssh: {error}"))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| NetexpectError::ControlMaster("no stdin pipe".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| NetexpectError::ControlMaster("no stdout pipe".into()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(line=%line, "control master stderr");
                    if let Some(trace) = &trace {
                        trace.note(&line).await;
                    }
                }
            });
        }

        debug!(socket=%socket.display(), %host, port, "control master forward open");
        Ok(Self {
            child,
            stdin,
            stdout,
        })
    }

    /// Signal the child and reap it. Non-zero exits are reported, as they
    /// usually mean the multiplex socket went away.
    pub async fn close(mut self) -> Result<(), NetexpectError> {
        let _ = self.child.start_kill();
        let status = self
            .child
            .wait()
            .await
            .map_err(|error| NetexpectError::ControlMaster(error.to_string()))?;
        if !status.success() && status.code().is_some() {
            return Err(NetexpectError::ControlMaster(format!(
                "ssh exited with {status}"
            )));
        }
        Ok(())
    }
}

impl AsyncRead for ControlMasterStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        match Pin::new(&mut self.stdout).poll_read(cx, buf) {
            Poll::Ready(Ok(())) if buf.filled().len() == before => {
                // EOF: surface a failed child instead of a silent close.
                if let Ok(Some(status)) = self.child.try_wait() {
                    if !status.success() {
                        return Poll::Ready(Err(std::io::Error::other(format!(
                            "control master ssh exited with {status}"
                        ))));
                    }
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

impl AsyncWrite for ControlMasterStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.stdin).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stdin).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stdin).poll_shutdown(cx)
    }
}
