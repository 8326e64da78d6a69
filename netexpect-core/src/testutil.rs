use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use netexpect_common::NetexpectError;

use crate::{Streamer, Trace};

enum ScriptItem {
    Chunk(Vec<u8>),
    Delay(Duration),
    Eof,
    Silent,
}

/// Scripted transport: reads pop the scripted items in order, writes are
/// recorded for assertions. After the script runs out the stream goes
/// silent (reads pend forever), which is what a healthy idle device looks
/// like.
pub struct MockStreamer {
    script: VecDeque<ScriptItem>,
    written: Arc<Mutex<Vec<u8>>>,
    leftover: Vec<u8>,
    closed: bool,
}

impl MockStreamer {
    pub fn new() -> Self {
        Self {
            script: VecDeque::new(),
            written: Arc::new(Mutex::new(Vec::new())),
            leftover: Vec::new(),
            closed: false,
        }
    }

    pub fn chunk(mut self, data: &[u8]) -> Self {
        self.script.push_back(ScriptItem::Chunk(data.to_vec()));
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.script.push_back(ScriptItem::Delay(delay));
        self
    }

    pub fn eof(mut self) -> Self {
        self.script.push_back(ScriptItem::Eof);
        self
    }

    pub fn silent(mut self) -> Self {
        self.script.push_back(ScriptItem::Silent);
        self
    }

    /// Shared handle to everything written so far.
    pub fn written(&self) -> Arc<Mutex<Vec<u8>>> {
        self.written.clone()
    }
}

#[async_trait]
impl Streamer for MockStreamer {
    async fn connect(&mut self) -> Result<(), NetexpectError> {
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, NetexpectError> {
        if self.closed {
            return Err(NetexpectError::Closed);
        }
        loop {
            if !self.leftover.is_empty() {
                let n = self.leftover.len().min(buf.len());
                buf[..n].copy_from_slice(&self.leftover[..n]);
                self.leftover.drain(..n);
                return Ok(n);
            }
            match self.script.pop_front() {
                Some(ScriptItem::Chunk(data)) => self.leftover = data,
                Some(ScriptItem::Delay(delay)) => tokio::time::sleep(delay).await,
                Some(ScriptItem::Eof) => return Ok(0),
                Some(ScriptItem::Silent) | None => std::future::pending::<()>().await,
            }
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), NetexpectError> {
        self.written.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), NetexpectError> {
        self.closed = true;
        Ok(())
    }

    async fn download(
        &mut self,
        _paths: &[String],
    ) -> Result<HashMap<String, Bytes>, NetexpectError> {
        Err(NetexpectError::NotSupported)
    }

    fn set_trace(&mut self, _trace: Trace) {}
}
