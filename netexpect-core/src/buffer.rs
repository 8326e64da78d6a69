use bytes::{Bytes, BytesMut};

/// Discard already-consumed bytes once they pass this size.
const COMPACT_THRESHOLD: usize = 64 * 1024;

/// Growing byte log shared by the expect loop of one session.
///
/// Bytes accumulate via [`append`](ReadBuffer::append) and leave through
/// [`take`](ReadBuffer::take)/[`skip`](ReadBuffer::skip) once the session
/// has accounted for them as command output, echo or matched tokens.
/// Scanning always starts at the consumed offset, so a pattern straddling
/// an append boundary is found on a later scan.
#[derive(Default)]
pub struct ReadBuffer {
    data: BytesMut,
    consumed: usize,
}

impl ReadBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Everything received but not yet consumed.
    pub fn pending(&self) -> &[u8] {
        &self.data[self.consumed..]
    }

    pub fn is_empty(&self) -> bool {
        self.consumed == self.data.len()
    }

    /// Consume the next `n` pending bytes and hand them out.
    pub fn take(&mut self, n: usize) -> Bytes {
        debug_assert!(self.consumed + n <= self.data.len());
        let out = Bytes::copy_from_slice(&self.data[self.consumed..self.consumed + n]);
        self.consumed += n;
        self.maybe_compact();
        out
    }

    /// Consume and hand out everything pending.
    pub fn take_all(&mut self) -> Bytes {
        let n = self.data.len() - self.consumed;
        self.take(n)
    }

    /// Consume the next `n` pending bytes without handing them out.
    pub fn skip(&mut self, n: usize) {
        debug_assert!(self.consumed + n <= self.data.len());
        self.consumed += n;
        self.maybe_compact();
    }

    /// Drop everything, consumed or not. Used when a transport restarts its
    /// dialog from scratch.
    pub fn clear(&mut self) {
        self.data.clear();
        self.consumed = 0;
    }

    fn maybe_compact(&mut self) {
        if self.consumed >= COMPACT_THRESHOLD {
            let _ = self.data.split_to(self.consumed);
            self.consumed = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_and_skip_advance_consumed() {
        let mut buffer = ReadBuffer::new();
        buffer.append(b"hello world");
        assert_eq!(buffer.take(6), &b"hello "[..]);
        assert_eq!(buffer.pending(), b"world");
        buffer.skip(5);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_pending_survives_appends() {
        let mut buffer = ReadBuffer::new();
        buffer.append(b"par");
        buffer.append(b"tial");
        assert_eq!(buffer.pending(), b"partial");
    }

    #[test]
    fn test_compaction_preserves_pending() {
        let mut buffer = ReadBuffer::new();
        let chunk = vec![0xabu8; 16 * 1024];
        for _ in 0..8 {
            buffer.append(&chunk);
            buffer.skip(chunk.len());
        }
        buffer.append(b"tail");
        assert_eq!(buffer.pending(), b"tail");
        assert_eq!(buffer.take(4), &b"tail"[..]);
    }
}
