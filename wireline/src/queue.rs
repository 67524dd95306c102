//! Per-connection pending-write queue with lossy backpressure.

use std::collections::VecDeque;

use bytes::{Buf, Bytes};

use crate::address::Address;

pub(crate) struct PendingWrite {
    pub to: Option<Address>,
    pub data: Bytes,
}

/// FIFO of unflushed buffers.
///
/// A running byte count backs the high-watermark policy: once pending bytes
/// exceed the limit, new buffers are refused (the caller drops them with a
/// warning). Entries already queued are never dropped by the watermark; a
/// partial flush advances the head entry in place.
pub(crate) struct WriteQueue {
    entries: VecDeque<PendingWrite>,
    pending_bytes: u64,
    limit: u64,
}

impl WriteQueue {
    /// `limit` of zero disables the watermark.
    pub(crate) fn new(limit: u64) -> Self {
        WriteQueue {
            entries: VecDeque::new(),
            pending_bytes: 0,
            limit,
        }
    }

    /// Enqueue unless the watermark is already exceeded. Returns `false`
    /// when the buffer was refused.
    pub(crate) fn push(&mut self, to: Option<Address>, data: Bytes) -> bool {
        if self.limit != 0 && self.pending_bytes > self.limit {
            return false;
        }
        self.pending_bytes += data.len() as u64;
        self.entries.push_back(PendingWrite { to, data });
        true
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn front(&self) -> Option<&PendingWrite> {
        self.entries.front()
    }

    /// Account for `n` bytes flushed from the head entry; pops it once
    /// fully written.
    pub(crate) fn advance(&mut self, n: usize) {
        if let Some(front) = self.entries.front_mut() {
            let n = n.min(front.data.len());
            front.data.advance(n);
            self.pending_bytes -= n as u64;
            if front.data.is_empty() {
                self.entries.pop_front();
            }
        }
    }

    /// Discard the head entry entirely, e.g. after a failed datagram
    /// resolution.
    pub(crate) fn discard_front(&mut self) {
        if let Some(front) = self.entries.pop_front() {
            self.pending_bytes -= front.data.len() as u64;
        }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.pending_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flushes_in_fifo_order() {
        let mut queue = WriteQueue::new(0);
        queue.push(None, Bytes::from_static(b"first"));
        queue.push(None, Bytes::from_static(b"second"));
        assert_eq!(queue.front().unwrap().data.as_ref(), b"first");
        queue.advance(5);
        assert_eq!(queue.front().unwrap().data.as_ref(), b"second");
        queue.advance(6);
        assert!(queue.is_empty());
    }

    #[test]
    fn partial_advance_keeps_remainder_at_head() {
        let mut queue = WriteQueue::new(0);
        queue.push(None, Bytes::from_static(b"abcdef"));
        queue.advance(2);
        assert_eq!(queue.front().unwrap().data.as_ref(), b"cdef");
        queue.advance(4);
        assert!(queue.is_empty());
    }

    #[test]
    fn watermark_refuses_new_buffers_only() {
        let mut queue = WriteQueue::new(8);
        assert!(queue.push(None, Bytes::from(vec![0u8; 6])));
        assert!(queue.push(None, Bytes::from(vec![0u8; 6])));
        // 12 pending > 8: refused, queued entries untouched
        assert!(!queue.push(None, Bytes::from(vec![0u8; 1])));
        queue.advance(6);
        assert!(queue.push(None, Bytes::from(vec![0u8; 1])));
    }

    #[test]
    fn discard_front_releases_budget() {
        let mut queue = WriteQueue::new(4);
        assert!(queue.push(None, Bytes::from(vec![0u8; 5])));
        assert!(!queue.push(None, Bytes::from(vec![0u8; 1])));
        queue.discard_front();
        assert!(queue.push(None, Bytes::from(vec![0u8; 1])));
    }
}
