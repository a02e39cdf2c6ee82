//! Transfer bookkeeping: the chunk buffer and the single pending request.
//!
//! A bulk-in endpoint delivers data in chunks of at most one max-packet-size,
//! but callers read an arbitrary number of bytes at a time. [`TransferBuffer`]
//! holds the last delivered chunk and tracks how much of it has been handed
//! out; [`PendingRequest`] records whether a transfer is outstanding.

use std::fmt;

/// Final status of a bulk transfer, as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferStatus {
    #[default]
    Ok,
    /// Superseded or cancelled by the host (kill/unlink).
    Cancelled,
    /// Endpoint shut down or reset, e.g. the device went away.
    Aborted,
    /// Transfer failed with an errno-style code.
    Error(i32),
}

impl TransferStatus {
    /// Cancellation and shutdown are expected during teardown and are not
    /// reported to the reader.
    pub fn is_benign(self) -> bool {
        matches!(self, TransferStatus::Cancelled | TransferStatus::Aborted)
    }

    /// Error code to surface to the reader, if any.
    pub fn error_code(self) -> Option<i32> {
        match self {
            TransferStatus::Error(code) => Some(code),
            _ => None,
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferStatus::Ok => write!(f, "ok"),
            TransferStatus::Cancelled => write!(f, "cancelled"),
            TransferStatus::Aborted => write!(f, "aborted"),
            TransferStatus::Error(code) => {
                write!(f, "error {code} ({})", crate::protocol::status_name(*code))
            }
        }
    }
}

/// Result of one bulk-in transfer, handed to the completion handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub data: Vec<u8>,
    pub status: TransferStatus,
}

impl Completion {
    pub fn ok(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            status: TransferStatus::Ok,
        }
    }

    pub fn error(code: i32) -> Self {
        Self {
            data: Vec::new(),
            status: TransferStatus::Error(code),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            data: Vec::new(),
            status: TransferStatus::Cancelled,
        }
    }

    pub fn aborted() -> Self {
        Self {
            data: Vec::new(),
            status: TransferStatus::Aborted,
        }
    }
}

/// Fixed-capacity chunk buffer with a fill cursor and a consume cursor.
///
/// Invariant: `consumed_len <= filled_len <= capacity`.
#[derive(Debug)]
pub struct TransferBuffer {
    data: Box<[u8]>,
    filled_len: usize,
    consumed_len: usize,
}

impl TransferBuffer {
    /// Allocate a buffer of `capacity` bytes (the endpoint's max chunk size).
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity].into_boxed_slice(),
            filled_len: 0,
            consumed_len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn filled_len(&self) -> usize {
        self.filled_len
    }

    pub fn consumed_len(&self) -> usize {
        self.consumed_len
    }

    /// Bytes delivered but not yet handed to a caller.
    pub fn available(&self) -> usize {
        self.filled_len - self.consumed_len
    }

    /// Drop both cursors. Called exactly when a new transfer is submitted.
    pub fn reset(&mut self) {
        self.filled_len = 0;
        self.consumed_len = 0;
    }

    /// Store a delivered chunk, truncated to capacity. Returns the stored length.
    ///
    /// Copies into the preallocated storage; never allocates.
    pub fn fill(&mut self, chunk: &[u8]) -> usize {
        let n = chunk.len().min(self.capacity());
        self.data[..n].copy_from_slice(&chunk[..n]);
        self.filled_len = n;
        self.consumed_len = 0;
        n
    }

    /// Copy up to `out.len()` unconsumed bytes into `out` and advance the
    /// consume cursor. Returns the number of bytes copied.
    pub fn consume_into(&mut self, out: &mut [u8]) -> usize {
        let chunk = self.available().min(out.len());
        let start = self.consumed_len;
        out[..chunk].copy_from_slice(&self.data[start..start + chunk]);
        self.consumed_len += chunk;
        chunk
    }
}

/// Bookkeeping for the single bulk-in transfer allowed per device.
///
/// The completion status itself is not kept: errors move into the device's
/// last-error slot, benign statuses are dropped.
#[derive(Debug, Default)]
pub struct PendingRequest {
    in_flight: bool,
}

impl PendingRequest {
    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Mark a transfer as submitted.
    pub fn begin(&mut self) {
        self.in_flight = true;
    }

    /// Roll back [`begin`](Self::begin) after the transport refused the submission.
    pub fn abandon(&mut self) {
        self.in_flight = false;
    }

    /// Record the completion of the outstanding transfer.
    pub fn finish(&mut self) {
        self.in_flight = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_buffer_is_empty() {
        let buf = TransferBuffer::new(64);
        assert_eq!(buf.capacity(), 64);
        assert_eq!(buf.filled_len(), 0);
        assert_eq!(buf.consumed_len(), 0);
        assert_eq!(buf.available(), 0);
    }

    #[test]
    fn fill_truncates_to_capacity() {
        let mut buf = TransferBuffer::new(4);
        assert_eq!(buf.fill(&[1, 2, 3, 4, 5, 6]), 4);
        assert_eq!(buf.filled_len(), 4);
    }

    #[test]
    fn consume_in_pieces_sums_to_filled_len() {
        let mut buf = TransferBuffer::new(64);
        let chunk: Vec<u8> = (0..50).collect();
        buf.fill(&chunk);

        let mut collected = Vec::new();
        for want in [7usize, 13, 1, 64, 64] {
            let mut out = vec![0u8; want];
            let n = buf.consume_into(&mut out);
            collected.extend_from_slice(&out[..n]);
            assert!(buf.consumed_len() <= buf.filled_len());
        }
        assert_eq!(collected, chunk);
        assert_eq!(buf.available(), 0);
    }

    #[test]
    fn consume_with_empty_output_is_noop() {
        let mut buf = TransferBuffer::new(8);
        buf.fill(&[9, 9, 9]);
        assert_eq!(buf.consume_into(&mut []), 0);
        assert_eq!(buf.consumed_len(), 0);
    }

    #[test]
    fn reset_clears_cursors() {
        let mut buf = TransferBuffer::new(8);
        buf.fill(&[1, 2, 3]);
        let mut out = [0u8; 2];
        buf.consume_into(&mut out);
        buf.reset();
        assert_eq!(buf.filled_len(), 0);
        assert_eq!(buf.consumed_len(), 0);
    }

    #[test]
    fn zero_capacity_buffer_never_stores() {
        let mut buf = TransferBuffer::new(0);
        assert_eq!(buf.fill(&[1, 2]), 0);
        assert_eq!(buf.available(), 0);
    }

    #[test]
    fn pending_request_transitions() {
        let mut req = PendingRequest::default();
        assert!(!req.in_flight());
        req.begin();
        assert!(req.in_flight());
        req.finish();
        assert!(!req.in_flight());
        req.begin();
        req.abandon();
        assert!(!req.in_flight());
    }

    #[test]
    fn benign_statuses() {
        assert!(TransferStatus::Cancelled.is_benign());
        assert!(TransferStatus::Aborted.is_benign());
        assert!(!TransferStatus::Ok.is_benign());
        assert!(!TransferStatus::Error(32).is_benign());
        assert_eq!(TransferStatus::Error(32).error_code(), Some(32));
        assert_eq!(TransferStatus::Cancelled.error_code(), None);
    }

    #[test]
    fn status_display() {
        assert_eq!(TransferStatus::Ok.to_string(), "ok");
        assert_eq!(TransferStatus::Error(5).to_string(), "error 5 (I/O error)");
    }
}
