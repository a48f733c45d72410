//! The per-connection state machine and control loop.
//!
//! This is the direct descendant of `tcb.rs`'s `TCB` and `transport.c`'s
//! `context_t` fused together: one `Engine` per connection, carrying the
//! send/receive sequence variables, the retransmission and reassembly
//! queues, and the state machine that used to be spread across
//! `on_segment`/`on_tick` in the prior art and `unpack_and_recv_data`/
//! `pack_and_send_data`/`control_loop` in the original C source.

use std::collections::VecDeque;
use std::time::Instant;

use log::{debug, info, trace, warn};

use crate::codec::{Flags, Header, Segment, MAX_PAYLOAD, MAX_SEGMENT_LEN};
use crate::facade::{EventMask, Facade};
use crate::reassembly::{ReassemblyEntry, ReassemblyQueue};
use crate::retransmit::{RetransmitEntry, RetransmitQueue, MAX_RETRIES};
use crate::seq::wrapping_lt;

/// Fixed receive/congestion ceiling; this crate does not grow it.
pub const CONGESTION_CEILING: u32 = 3072;
/// Retransmission timeout used for every entry, matching the original
/// source's fixed `TIMEOUTSECS`.
pub const RTO: std::time::Duration = std::time::Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Listen,
    SynSent,
    SynRcvd,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    LastAck,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Active,
    Passive,
}

/// What happened as a result of feeding a segment through the receive
/// pipeline, or of running a control loop iteration. Mirrors the prior
/// art's `Action` enum; the caller (a `Facade` implementation, or its
/// owner) decides what to do with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing notable happened.
    Noop,
    /// The handshake just completed; the application may now read/write.
    Established,
    /// The peer sent a FIN; our read half is now closed.
    PeerClosed,
    /// A SYN_SENT handshake was refused (an ACK for a sequence number we
    /// never sent).
    ConnectionRefused,
    /// The connection has fully torn down.
    Done,
}

/// One STCP connection: sequence-space bookkeeping, retransmission and
/// reassembly queues, and the state machine that ties them together.
pub struct Engine {
    state: State,
    kind: Kind,

    iss: u32,
    snd_una: u32,
    snd_nxt: u32,
    rcv_nxt: u32,

    /// Free space in our receive buffer we're willing to advertise.
    local_window: u32,
    /// The peer's last-advertised window, clamped to the congestion
    /// ceiling.
    peer_window: u32,

    retransmit_queue: RetransmitQueue,
    reassembly: ReassemblyQueue,

    unblocked: bool,
    done: bool,
}

impl Engine {
    /// Builds a passive-open context sitting in `Listen`, waiting for a
    /// SYN. No segment is transmitted yet.
    pub fn listen() -> Engine {
        Self::listen_with_iss(crate::facade::Iss::random())
    }

    pub fn listen_with_iss(iss: u32) -> Engine {
        Engine {
            state: State::Listen,
            kind: Kind::Passive,
            iss,
            snd_una: iss,
            snd_nxt: iss,
            rcv_nxt: 0,
            local_window: CONGESTION_CEILING,
            peer_window: MAX_PAYLOAD as u32,
            retransmit_queue: RetransmitQueue::new(),
            reassembly: ReassemblyQueue::new(),
            unblocked: false,
            done: false,
        }
    }

    /// Builds an active-open context, immediately transmitting a SYN
    /// with `seq = iss` and moving to `SynSent`.
    pub fn connect(facade: &mut impl Facade) -> Engine {
        Self::connect_with_iss(facade, crate::facade::Iss::random())
    }

    pub fn connect_with_iss(facade: &mut impl Facade, iss: u32) -> Engine {
        let mut engine = Engine {
            state: State::SynSent,
            kind: Kind::Active,
            iss,
            snd_una: iss,
            snd_nxt: iss,
            rcv_nxt: 0,
            local_window: CONGESTION_CEILING,
            peer_window: MAX_PAYLOAD as u32,
            retransmit_queue: RetransmitQueue::new(),
            reassembly: ReassemblyQueue::new(),
            unblocked: false,
            done: false,
        };
        let syn = Segment::new(
            Header { seq: iss, ack: 0, flags: Flags::SYN, window: engine.local_window as u16 },
            Vec::new(),
        );
        let seq_len = syn.seq_len();
        engine.transmit(facade, syn);
        engine.snd_nxt = engine.snd_nxt.wrapping_add(seq_len);
        info!("connect: SYN sent, iss={iss}");
        engine
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    fn closing(&self) -> bool {
        matches!(self.state, State::FinWait1 | State::FinWait2 | State::LastAck)
    }

    /// Encodes and hands a segment to the network, recording it in the
    /// retransmission queue if it carries sequence-consuming data or
    /// control flags (pure ACKs are fire-and-forget).
    fn transmit(&mut self, facade: &mut impl Facade, seg: Segment) {
        let bytes = seg.encode();
        if let Err(e) = facade.network_send(&bytes) {
            warn!("network_send failed: {e}");
        }
        if seg.seq_len() > 0 {
            let entry = RetransmitEntry::new(
                seg.header.seq,
                seg.ack_expected(),
                seg.len(),
                bytes,
                Instant::now() + RTO,
            );
            self.retransmit_queue.insert(entry);
        }
    }

    fn send_ack(&mut self, facade: &mut impl Facade) {
        let ack = Segment::new(
            Header { seq: self.snd_nxt, ack: self.rcv_nxt, flags: Flags::ACK, window: self.local_window as u16 },
            Vec::new(),
        );
        let bytes = ack.encode();
        if let Err(e) = facade.network_send(&bytes) {
            warn!("network_send (ack) failed: {e}");
        }
    }

    /// The application-close entry point: from `Established` moves to
    /// `FinWait1`; from `CloseWait` moves to `LastAck`; both enqueue and
    /// transmit a FIN. Calling it from any other state is a logic error.
    pub fn close(&mut self, facade: &mut impl Facade) {
        debug_assert!(
            matches!(self.state, State::Established | State::CloseWait),
            "close() called outside Established/CloseWait (state = {:?})",
            self.state
        );
        if !matches!(self.state, State::Established | State::CloseWait) {
            return;
        }
        let fin = Segment::new(
            Header { seq: self.snd_nxt, ack: self.rcv_nxt, flags: Flags::FIN, window: self.local_window as u16 },
            Vec::new(),
        );
        let seq_len = fin.seq_len();
        self.state = if self.state == State::Established { State::FinWait1 } else { State::LastAck };
        debug!("state -> {:?} (application close)", self.state);
        self.transmit(facade, fin);
        self.snd_nxt = self.snd_nxt.wrapping_add(seq_len);
    }

    /// Accepts up to `peer_window` bytes, chunks into segments of at
    /// most `MAX_PAYLOAD` octets, and transmits them immediately.
    /// Returns the number of bytes actually queued.
    pub fn send(&mut self, data: &[u8], facade: &mut impl Facade) -> usize {
        if !matches!(self.state, State::Established | State::CloseWait) {
            return 0;
        }
        let cap = (self.peer_window as usize).min(data.len());
        let mut sent = 0;
        while sent < cap {
            let chunk_len = (cap - sent).min(MAX_PAYLOAD);
            let chunk = &data[sent..sent + chunk_len];
            let seg = Segment::new(
                Header {
                    seq: self.snd_nxt,
                    ack: self.rcv_nxt,
                    flags: Flags::SYN, // data-bearing marker, per the overloaded SYN flag
                    window: self.local_window as u16,
                },
                chunk.to_vec(),
            );
            let seq_len = seg.seq_len();
            self.transmit(facade, seg);
            self.snd_nxt = self.snd_nxt.wrapping_add(seq_len);
            sent += chunk_len;
        }
        sent
    }

    /// Feeds one received segment through the receive pipeline.
    pub fn on_segment(&mut self, seg: Segment, facade: &mut impl Facade) -> Outcome {
        self.peer_window = (seg.header.window as u32).min(CONGESTION_CEILING);

        if seg.header.flags.syn && !seg.header.flags.ack
            && matches!(self.state, State::Listen | State::SynSent)
        {
            // A bare SYN in SynSent (simultaneous-open-ish crossed SYNs,
            // or a peer that never saw our own SYN) is handled exactly
            // like a SYN in Listen: move to SynRcvd and reply SYN+ACK.
            return self.on_syn_in_listen(seg, facade);
        }

        match self.state {
            State::SynSent => self.on_segment_syn_sent(seg, facade),
            State::SynRcvd => self.on_segment_syn_rcvd(seg, facade),
            _ if seg.is_control_or_data() => self.on_data_or_control(seg, facade),
            _ => self.on_pure_ack(seg, facade),
        }
    }

    /// Handles a bare SYN (no ACK) arriving in `Listen` or `SynSent`:
    /// both move to `SynRcvd` and reply SYN+ACK, per the spec's
    /// "LISTEN | recv SYN" and "SYN_SENT | recv SYN (no ACK)" rows.
    fn on_syn_in_listen(&mut self, seg: Segment, facade: &mut impl Facade) -> Outcome {
        let from = self.state;
        self.rcv_nxt = seg.ack_expected();
        self.state = State::SynRcvd;
        let synack = Segment::new(
            Header {
                seq: self.snd_nxt,
                ack: self.rcv_nxt,
                flags: Flags::SYN_ACK,
                window: self.local_window as u16,
            },
            Vec::new(),
        );
        let seq_len = synack.seq_len();
        self.transmit(facade, synack);
        self.snd_nxt = self.snd_nxt.wrapping_add(seq_len);
        debug!("state {from:?} -> SynRcvd");
        Outcome::Noop
    }

    fn on_segment_syn_sent(&mut self, seg: Segment, facade: &mut impl Facade) -> Outcome {
        if seg.header.flags.syn && seg.header.flags.ack {
            if seg.header.ack != self.snd_nxt {
                warn!(
                    "SynSent: ACK {} doesn't match snd_nxt {}, refusing connection",
                    seg.header.ack, self.snd_nxt
                );
                self.state = State::Closed;
                self.done = true;
                return Outcome::ConnectionRefused;
            }
            self.retransmit_queue.mark_acked(seg.header.ack);
            self.retransmit_queue.sweep_acked();
            self.rcv_nxt = seg.ack_expected();
            self.snd_una = seg.header.ack;
            self.state = State::Established;
            self.send_ack(facade);
            debug!("state SynSent -> Established");
            if !self.unblocked {
                self.unblocked = true;
                facade.unblock_application();
            }
            return Outcome::Established;
        }
        Outcome::Noop
    }

    fn on_segment_syn_rcvd(&mut self, seg: Segment, facade: &mut impl Facade) -> Outcome {
        if seg.header.flags.syn && !seg.header.flags.ack {
            // Duplicate SYN: re-emit SYN+ACK idempotently, no state advance.
            let synack = Segment::new(
                Header { seq: self.iss, ack: self.rcv_nxt, flags: Flags::SYN_ACK, window: self.local_window as u16 },
                Vec::new(),
            );
            self.transmit(facade, synack);
            return Outcome::Noop;
        }
        if seg.header.flags.ack && seg.header.ack == self.snd_nxt {
            self.retransmit_queue.mark_acked(seg.header.ack);
            self.retransmit_queue.sweep_acked();
            self.snd_una = seg.header.ack;
            self.state = State::Established;
            debug!("state SynRcvd -> Established");
            if !self.unblocked {
                self.unblocked = true;
                facade.unblock_application();
            }
            return Outcome::Established;
        }
        Outcome::Noop
    }

    fn on_data_or_control(&mut self, seg: Segment, facade: &mut impl Facade) -> Outcome {
        let seq = seg.header.seq;
        let ack_expected = seg.ack_expected();

        if wrapping_lt(seq, self.rcv_nxt) || self.reassembly.contains_ack_expected(ack_expected) {
            trace!("duplicate segment seq={seq}, re-ACKing");
            self.send_ack(facade);
            return Outcome::Noop;
        }

        if seq != self.rcv_nxt {
            trace!("out-of-order segment seq={seq}, expected {}", self.rcv_nxt);
            if self.local_window > 0 {
                self.reassembly.insert(ReassemblyEntry::new(seg));
            }
            self.send_ack(facade);
            return Outcome::Noop;
        }

        if self.local_window == 0 {
            self.send_ack(facade);
            return Outcome::Noop;
        }

        let mut outcome = Outcome::Noop;
        // `drain_contiguous` already pops every entry that chains off the
        // current `rcv_nxt` in one call; queue them all rather than just
        // the first, or a chain of 2+ buffered segments would have its
        // tail silently dropped instead of delivered.
        let mut pending: VecDeque<Segment> = VecDeque::from([seg]);
        while let Some(deliver) = pending.pop_front() {
            if !deliver.payload.is_empty() {
                if let Err(e) = facade.app_send(&deliver.payload) {
                    warn!("app_send failed: {e}");
                }
            }
            self.rcv_nxt = deliver.ack_expected();
            if deliver.header.flags.fin {
                facade.fin_received();
                match self.state {
                    State::Established => {
                        self.state = State::CloseWait;
                        debug!("state Established -> CloseWait (FIN received)");
                    }
                    State::FinWait2 => {
                        self.state = State::Closed;
                        self.done = true;
                        info!("state FinWait2 -> Closed (peer FIN received)");
                    }
                    State::FinWait1 => {
                        // Closes unconditionally, independent of whether
                        // our own FIN has been acked yet — the peer's FIN
                        // is all FinWait1 is waiting on.
                        self.state = State::Closed;
                        self.done = true;
                        info!("state FinWait1 -> Closed (peer FIN received)");
                    }
                    other => {
                        warn!("FIN received in unexpected state {other:?}");
                    }
                }
                outcome = Outcome::PeerClosed;
            }

            if pending.is_empty() {
                pending.extend(self.reassembly.drain_contiguous(self.rcv_nxt).into_iter().map(|e| e.segment));
            }
        }

        self.send_ack(facade);
        outcome
    }

    fn on_pure_ack(&mut self, seg: Segment, _facade: &mut impl Facade) -> Outcome {
        let ack = seg.header.ack;
        if self.retransmit_queue.mark_acked(ack) {
            let swept = self.retransmit_queue.sweep_acked();
            self.snd_una = ack;
            for entry in &swept {
                if let Ok(sent) = Segment::decode(&entry.bytes) {
                    if sent.header.flags.fin {
                        self.on_our_fin_acked();
                    }
                }
            }
        }
        // Credit back the buffer space this ACK itself occupied; it
        // carries no payload, so the debit taken for it in `poll` was
        // purely the header.
        self.local_window = (self.local_window + seg.len()).min(CONGESTION_CEILING);
        Outcome::Noop
    }

    fn on_our_fin_acked(&mut self) {
        match self.state {
            State::FinWait1 => {
                self.state = State::FinWait2;
                debug!("state FinWait1 -> FinWait2 (our FIN acked)");
            }
            State::LastAck => {
                self.state = State::Closed;
                self.done = true;
                info!("state LastAck -> Closed (our FIN acked)");
            }
            _ => {}
        }
    }

    /// Drives one iteration of the control loop.
    pub fn poll(&mut self, facade: &mut impl Facade) -> Outcome {
        let swept = self.retransmit_queue.sweep_acked();
        for entry in &swept {
            if let Ok(sent) = Segment::decode(&entry.bytes) {
                if sent.header.flags.fin {
                    self.on_our_fin_acked();
                }
            }
        }
        if self.done {
            return Outcome::Done;
        }

        let deadline = self.retransmit_queue.earliest_deadline();
        let events = facade.wait_for_event(EventMask::ALL, deadline);

        if events.network_data {
            let mut buf = [0u8; MAX_SEGMENT_LEN];
            let read_cap = (self.peer_window as usize).min(self.local_window as usize).min(MAX_SEGMENT_LEN).max(20);
            match facade.network_recv(&mut buf[..read_cap]) {
                Ok(0) => {}
                Ok(n) => {
                    self.local_window = self.local_window.saturating_sub(n as u32);
                    match Segment::decode(&buf[..n]) {
                        Ok(seg) => {
                            let outcome = self.on_segment(seg, facade);
                            if outcome != Outcome::Noop {
                                return outcome;
                            }
                        }
                        Err(e) => warn!("segment decode failed: {e}"),
                    }
                }
                Err(e) => warn!("network_recv failed: {e}"),
            }
        }

        if events.timeout && self.retransmit_queue.front_expired(Instant::now()) {
            self.handle_timeout(facade);
        }

        if events.app_data && matches!(self.state, State::Established | State::CloseWait) {
            if let Ok(data) = facade.app_recv(self.peer_window as usize) {
                if !data.is_empty() {
                    self.send(&data, facade);
                }
            }
        }

        if events.app_close_requested {
            self.close(facade);
        }

        if self.done {
            Outcome::Done
        } else {
            Outcome::Noop
        }
    }

    /// Timeout handling per the control loop: if the connection is
    /// closing or the front entry has exhausted its retries, drop it
    /// (and finish tearing down if it carried our FIN); otherwise
    /// go-back-N retransmit the front entry and everything after it.
    fn handle_timeout(&mut self, facade: &mut impl Facade) {
        let front_retries = self.retransmit_queue.front().map(|e| e.retries).unwrap_or(0);
        if self.closing() || front_retries >= MAX_RETRIES {
            if let Some(front) = self.retransmit_queue.drop_front() {
                warn!("retransmission exhausted for seq={}, dropping", front.seq);
                if let Ok(seg) = Segment::decode(&front.bytes) {
                    if seg.header.flags.fin {
                        self.state = State::Closed;
                        self.done = true;
                        info!("giving up on FIN retransmission; connection closed");
                    }
                }
            }
            return;
        }

        warn!("timeout firing, go-back-N retransmit");
        self.retransmit_queue.retransmit_from_front(|entry| {
            if let Err(e) = facade.network_send(&entry.bytes) {
                warn!("retransmit network_send failed: {e}");
            }
        });
        if let Some(front) = self.retransmit_queue.front_mut() {
            front.retries += 1;
            front.deadline = Instant::now() + RTO;
        }
    }

    pub fn local_window(&self) -> u32 {
        self.local_window
    }

    pub fn peer_window(&self) -> u32 {
        self.peer_window
    }

    /// Runs `poll` until the connection is fully torn down.
    pub fn run(&mut self, facade: &mut impl Facade) {
        while !self.done {
            self.poll(facade);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::channel::{self, NetworkConditions};

    #[test]
    fn handshake_reaches_established_both_sides() {
        let (mut a, mut b) = channel::pair(NetworkConditions::perfect());
        let mut client = Engine::connect_with_iss(&mut a, 100);
        let mut server = Engine::listen_with_iss(200);

        // SYN: client -> server
        let seg = channel::recv_one(&mut b).expect("SYN should arrive");
        assert!(server.on_segment(seg, &mut b) == Outcome::Noop);
        assert_eq!(server.state(), State::SynRcvd);

        // SYN+ACK: server -> client
        let seg = channel::recv_one(&mut a).expect("SYN+ACK should arrive");
        assert_eq!(client.on_segment(seg, &mut a), Outcome::Established);
        assert_eq!(client.state(), State::Established);

        // final ACK: client -> server
        let seg = channel::recv_one(&mut b).expect("final ACK should arrive");
        assert_eq!(server.on_segment(seg, &mut b), Outcome::Established);
        assert_eq!(server.state(), State::Established);
    }

    /// Crossed active opens: both sides send a bare SYN and each
    /// receives the other's bare SYN (no ACK) while in SynSent. Per the
    /// "SYN_SENT | recv SYN (no ACK) | SYN_RECEIVED | SYN+ACK" row,
    /// both must move to SynRcvd and reply SYN+ACK, just like a SYN
    /// arriving in Listen.
    #[test]
    fn bare_syn_in_syn_sent_moves_to_syn_rcvd() {
        let (mut a, mut b) = channel::pair(NetworkConditions::perfect());
        let mut client = Engine::connect_with_iss(&mut a, 100);
        let mut server = Engine::connect_with_iss(&mut b, 200);

        let syn_from_client = channel::recv_one(&mut b).expect("client's SYN should arrive");
        let syn_from_server = channel::recv_one(&mut a).expect("server's SYN should arrive");

        assert_eq!(server.on_segment(syn_from_client, &mut b), Outcome::Noop);
        assert_eq!(server.state(), State::SynRcvd);
        assert_eq!(client.on_segment(syn_from_server, &mut a), Outcome::Noop);
        assert_eq!(client.state(), State::SynRcvd);
    }

    /// A chain of three out-of-order segments, delivered to the
    /// reassembly queue last-to-first: filling the gap at the front
    /// must drain every one of them, not just the next in line.
    #[test]
    fn filling_gap_drains_entire_reassembly_chain() {
        let (mut a, mut b) = channel::pair(NetworkConditions::perfect());
        let mut client = Engine::connect_with_iss(&mut a, 100);
        let mut server = Engine::listen_with_iss(200);

        let seg = channel::recv_one(&mut b).unwrap();
        server.on_segment(seg, &mut b);
        let seg = channel::recv_one(&mut a).unwrap();
        client.on_segment(seg, &mut a);
        let seg = channel::recv_one(&mut b).unwrap();
        server.on_segment(seg, &mut b);

        client.send(b"one-", &mut a);
        client.send(b"two-", &mut a);
        client.send(b"three", &mut a);

        let first = channel::recv_one(&mut a).unwrap();
        let second = channel::recv_one(&mut a).unwrap();
        let third = channel::recv_one(&mut a).unwrap();

        // Buffer #3 then #2, both ahead of rcv_nxt.
        server.on_segment(third, &mut b);
        server.on_segment(second, &mut b);
        assert!(b.take_delivered().is_empty());

        // Delivering #1 must drain #2 and #3 behind it in one shot.
        server.on_segment(first, &mut b);
        assert_eq!(b.take_delivered(), b"one-two-three");
    }

    /// Receiving a segment through `poll` (not `on_segment` directly)
    /// must debit `local_window` by the bytes actually read off the
    /// network, so a sustained stream of incoming data eventually
    /// exhausts the advertised window instead of staying pinned at the
    /// congestion ceiling forever.
    #[test]
    fn poll_debits_local_window_on_data_receipt() {
        let (mut a, mut b) = channel::pair(NetworkConditions::perfect());
        let mut client = Engine::connect_with_iss(&mut a, 100);
        let mut server = Engine::listen_with_iss(200);

        let seg = channel::recv_one(&mut b).unwrap();
        server.on_segment(seg, &mut b);
        let seg = channel::recv_one(&mut a).unwrap();
        client.on_segment(seg, &mut a);
        let seg = channel::recv_one(&mut b).unwrap();
        server.on_segment(seg, &mut b);

        assert_eq!(server.local_window(), CONGESTION_CEILING);
        client.send(b"twelve bytes", &mut a);
        let before = server.local_window();
        server.poll(&mut b);
        assert_eq!(server.local_window(), before - (crate::codec::HEADER_LEN as u32 + 12));
    }

    /// A segment that arrives while `local_window` is exhausted is
    /// dropped rather than buffered or delivered, per the out-of-window
    /// receipt behavior.
    #[test]
    fn out_of_window_segment_is_dropped() {
        let (mut a, mut b) = channel::pair(NetworkConditions::perfect());
        let mut client = Engine::connect_with_iss(&mut a, 100);
        let mut server = Engine::listen_with_iss(200);

        let seg = channel::recv_one(&mut b).unwrap();
        server.on_segment(seg, &mut b);
        let seg = channel::recv_one(&mut a).unwrap();
        client.on_segment(seg, &mut a);
        let seg = channel::recv_one(&mut b).unwrap();
        server.on_segment(seg, &mut b);
        b.take_delivered();

        server.local_window = 0;
        client.send(b"never fits", &mut a);
        let seg = channel::recv_one(&mut b).unwrap();
        server.on_segment(seg, &mut b);
        assert!(b.take_delivered().is_empty());
    }
}
