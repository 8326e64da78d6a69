use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::*;

enum TraceEvent {
    Read(Vec<u8>),
    Written(Vec<u8>),
    Note(String),
}

/// Side-channel dump of every byte crossing a transport, for audit and
/// debugging. Cheap to clone; all clones feed the same sink.
///
/// Events are queued to a background task that owns the sink and writes
/// asynchronously, so a slow sink backs up the bounded queue instead of
/// stalling device I/O on a blocking write. Lines are prefixed `>>`
/// (written to the device), `<<` (read from it) or `--` (out-of-band notes
/// such as control-master stderr); payload bytes are ASCII-escaped so
/// binary option negotiation stays printable.
#[derive(Clone)]
pub struct Trace {
    sender: mpsc::Sender<TraceEvent>,
}

impl Trace {
    /// Spawns the drain task, so this must be called from within a runtime.
    /// The sink is closed and flushed once every clone is dropped.
    pub fn new<W>(mut sink: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (sender, mut receiver) = mpsc::channel::<TraceEvent>(1024);
        tokio::spawn(async move {
            if let Err(error) = async {
                while let Some(event) = receiver.recv().await {
                    let line = match event {
                        TraceEvent::Written(data) => format!(">> {}\n", data.escape_ascii()),
                        TraceEvent::Read(data) => format!("<< {}\n", data.escape_ascii()),
                        TraceEvent::Note(message) => format!("-- {message}\n"),
                    };
                    sink.write_all(line.as_bytes()).await?;
                }
                sink.flush().await?;
                Ok::<(), std::io::Error>(())
            }
            .await
            {
                error!(%error, "failed to write trace");
            }
        });
        Self { sender }
    }

    pub async fn did_read(&self, data: &[u8]) {
        let _ = self.sender.send(TraceEvent::Read(data.to_vec())).await;
    }

    pub async fn did_write(&self, data: &[u8]) {
        let _ = self.sender.send(TraceEvent::Written(data.to_vec())).await;
    }

    pub async fn note(&self, message: &str) {
        let _ = self.sender.send(TraceEvent::Note(message.to_owned())).await;
    }
}

impl std::fmt::Debug for Trace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Trace")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_directions_and_escaping() {
        let (sink, mut out) = tokio::io::duplex(4096);
        let trace = Trace::new(sink);
        trace.did_write(b"show version\n").await;
        trace.did_read(b"\xff\xfb\x03").await;
        trace.note("child exited").await;

        // Dropping the last handle ends the drain task, which closes the
        // sink and lets the read side hit EOF.
        drop(trace);
        let mut dump = String::new();
        out.read_to_string(&mut dump).await.unwrap();
        assert!(dump.contains(">> show version\\n"));
        assert!(dump.contains("<< \\xff\\xfb\\x03"));
        assert!(dump.contains("-- child exited"));
    }

    #[tokio::test]
    async fn test_clones_share_one_sink() {
        let (sink, mut out) = tokio::io::duplex(4096);
        let trace = Trace::new(sink);
        let clone = trace.clone();
        trace.did_write(b"a").await;
        clone.did_read(b"b").await;

        drop(trace);
        drop(clone);
        let mut dump = String::new();
        out.read_to_string(&mut dump).await.unwrap();
        assert_eq!(dump, ">> a\n<< b\n");
    }
}
