//! Inbound reassembly queue for out-of-order segments.
//!
//! `unpack_and_recv_data` in the prior art buffers a segment that arrives
//! ahead of `nextSeqExpected` in a sorted list (`list_seek`/insertion by
//! sequence number), then on every in-order arrival drains as much of
//! that buffer as is now contiguous before sending a single cumulative
//! ACK. This module is that buffer, kept sorted by sequence number as
//! entries are inserted rather than sorted after the fact.

use std::collections::VecDeque;

use crate::codec::Segment;
use crate::seq::wrapping_lt;

/// A segment buffered because it arrived ahead of `rcv_nxt`.
#[derive(Debug, Clone)]
pub struct ReassemblyEntry {
    pub seq: u32,
    pub ack_expected: u32,
    pub segment: Segment,
}

impl ReassemblyEntry {
    pub fn new(segment: Segment) -> ReassemblyEntry {
        ReassemblyEntry { seq: segment.header.seq, ack_expected: segment.ack_expected(), segment }
    }
}

/// Out-of-order segments received above `rcv_nxt`, kept sorted by `seq`
/// with no duplicate `seq` values.
#[derive(Debug, Default)]
pub struct ReassemblyQueue {
    pending: VecDeque<ReassemblyEntry>,
}

impl ReassemblyQueue {
    pub fn new() -> ReassemblyQueue {
        ReassemblyQueue { pending: VecDeque::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True if a buffered entry already covers this `ack_expected` — the
    /// "already-buffered, drop and re-ACK" case `unpack_and_recv_data`
    /// checks via `list_seek` before inserting.
    pub fn contains_ack_expected(&self, ack_expected: u32) -> bool {
        self.pending.iter().any(|e| e.ack_expected == ack_expected)
    }

    /// Inserts in sorted position; no-ops (does not duplicate) if `seq`
    /// is already present.
    pub fn insert(&mut self, entry: ReassemblyEntry) {
        if self.pending.iter().any(|e| e.seq == entry.seq) {
            return;
        }
        let pos = self
            .pending
            .iter()
            .position(|e| wrapping_lt(entry.seq, e.seq))
            .unwrap_or(self.pending.len());
        self.pending.insert(pos, entry);
    }

    /// Pops and returns every entry, in order, while the queue's minimum
    /// `seq` equals the running `rcv_nxt` (advanced locally by each
    /// popped entry's `seq_len`). Callers fold the return value into app
    /// delivery / FIN handling and the resulting `rcv_nxt`.
    pub fn drain_contiguous(&mut self, mut rcv_nxt: u32) -> Vec<ReassemblyEntry> {
        let mut drained = Vec::new();
        while let Some(front) = self.pending.front() {
            if front.seq == rcv_nxt {
                let entry = self.pending.pop_front().unwrap();
                rcv_nxt = entry.ack_expected;
                drained.push(entry);
            } else {
                break;
            }
        }
        drained
    }
}
