use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use netexpect_common::NetexpectError;
use regex::bytes::Regex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{ReadBuffer, Streamer};

const READ_CHUNK: usize = 8192;

/// Ordered set of named patterns. Declaration order is part of the
/// contract: when several patterns match at the same earliest offset, the
/// first-declared one wins.
#[derive(Default, Clone)]
pub struct ExpectSet {
    patterns: Vec<(String, Regex)>,
}

impl ExpectSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: &str, pattern: &str) -> Result<(), NetexpectError> {
        self.patterns.push((name.to_owned(), Regex::new(pattern)?));
        Ok(())
    }

    pub fn add_regex(&mut self, name: &str, regex: Regex) {
        self.patterns.push((name.to_owned(), regex));
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// The single winning match over `haystack`: smallest start offset,
    /// ties broken by declaration order.
    pub fn match_earliest(&self, haystack: &[u8]) -> Option<ExpectMatch> {
        let mut best: Option<(usize, regex::bytes::Captures)> = None;
        for (index, (_, regex)) in self.patterns.iter().enumerate() {
            if let Some(caps) = regex.captures(haystack) {
                let start = caps.get(0).map(|m| m.start()).unwrap_or(0);
                let better = match &best {
                    // Strictly earlier only: at equal starts the
                    // earlier-declared pattern keeps the slot.
                    Some((_, best_caps)) => {
                        start < best_caps.get(0).map(|m| m.start()).unwrap_or(0)
                    }
                    None => true,
                };
                if better {
                    best = Some((index, caps));
                }
            }
        }

        let (index, caps) = best?;
        let (name, regex) = &self.patterns[index];
        let whole = caps.get(0)?;

        let mut named_groups = HashMap::new();
        for group_name in regex.capture_names().flatten() {
            if let Some(m) = caps.name(group_name) {
                named_groups.insert(group_name.to_owned(), Bytes::copy_from_slice(m.as_bytes()));
            }
        }
        let groups = caps
            .iter()
            .skip(1)
            .map(|m| m.map(|m| Bytes::copy_from_slice(m.as_bytes())))
            .collect();

        Some(ExpectMatch {
            index,
            name: name.clone(),
            start: whole.start(),
            end: whole.end(),
            groups,
            named_groups,
        })
    }
}

impl std::fmt::Debug for ExpectSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.patterns.iter().map(|(name, _)| name))
            .finish()
    }
}

/// One winning match. Offsets are relative to the consumed edge of the
/// buffer at match time.
#[derive(Debug, Clone)]
pub struct ExpectMatch {
    pub index: usize,
    pub name: String,
    pub start: usize,
    pub end: usize,
    pub groups: Vec<Option<Bytes>>,
    pub named_groups: HashMap<String, Bytes>,
}

impl ExpectMatch {
    pub fn group(&self, n: usize) -> Option<&Bytes> {
        self.groups.get(n.checked_sub(1)?)?.as_ref()
    }

    pub fn named_group(&self, name: &str) -> Option<&Bytes> {
        self.named_groups.get(name)
    }
}

/// Why an expect call stopped without a match. The session layer wraps
/// these with the command string and accumulated output.
#[derive(thiserror::Error, Debug)]
pub enum ExpectError {
    #[error("no pattern matched in time")]
    Timeout,
    #[error("cancelled")]
    Cancelled,
    #[error("connection closed")]
    Closed,
    #[error(transparent)]
    Transport(NetexpectError),
}

/// Wait until one of `set` matches the live stream.
///
/// `read_timeout` bounds each wait for new bytes and resets on every batch
/// received; `deadline` is the hard overall bound. Already-buffered bytes
/// are scanned before the first read, and every scan restarts at the
/// consumed edge so matches straddling reads are caught.
pub async fn expect(
    transport: &mut dyn Streamer,
    buffer: &mut ReadBuffer,
    set: &ExpectSet,
    read_timeout: Duration,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Result<ExpectMatch, ExpectError> {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        if let Some(found) = set.match_earliest(buffer.pending()) {
            return Ok(found);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(ExpectError::Timeout);
        }
        let window = read_timeout.min(deadline - now);

        tokio::select! {
            _ = cancel.cancelled() => return Err(ExpectError::Cancelled),
            read = tokio::time::timeout(window, transport.read(&mut chunk)) => {
                match read {
                    Err(_) => return Err(ExpectError::Timeout),
                    Ok(Ok(0)) => return Err(ExpectError::Closed),
                    Ok(Ok(n)) => buffer.append(&chunk[..n]),
                    Ok(Err(NetexpectError::Closed)) => return Err(ExpectError::Closed),
                    Ok(Err(error)) => return Err(ExpectError::Transport(error)),
                }
            }
        }
    }
}
