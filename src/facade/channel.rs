//! An in-process `Facade` pairing two engines over `mpsc` channels, with
//! pluggable network conditions (loss, reordering, duplication).
//!
//! The prior art wires connections together with a shared
//! `Mutex<Manager>` plus condvars (`src/lib.rs`, `src/tcp/stream.rs`):
//! every `TcpStream`/`TcpListener` call locks the manager and waits on a
//! condition variable for a wakeup. A single engine per connection has
//! no need for that shared-state dance, so this harness uses plain
//! message passing instead — but it is solving the same problem the
//! prior art's `Manager` did: letting two endpoints exchange segments
//! without a real network underneath, which is exactly what the test
//! suite needs to exercise the control loop deterministically.

use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::time::{Duration, Instant};

use rand::Rng;

use crate::error::{Error, Result};
use crate::facade::{EventMask, EventSet, Facade};

/// Describes how lossy/reordering/duplicating the simulated network
/// between two [`ChannelFacade`]s should be.
#[derive(Debug, Clone, Copy)]
pub struct NetworkConditions {
    pub loss_probability: f64,
    pub reorder_probability: f64,
    pub duplicate_probability: f64,
}

impl NetworkConditions {
    /// No loss, no reordering, no duplication.
    pub fn perfect() -> NetworkConditions {
        NetworkConditions { loss_probability: 0.0, reorder_probability: 0.0, duplicate_probability: 0.0 }
    }

    pub fn lossy(loss_probability: f64) -> NetworkConditions {
        NetworkConditions { loss_probability, ..NetworkConditions::perfect() }
    }

    pub fn reordering(reorder_probability: f64) -> NetworkConditions {
        NetworkConditions { reorder_probability, ..NetworkConditions::perfect() }
    }
}

/// One endpoint of an in-process connection. Construct a pair with
/// [`pair`].
pub struct ChannelFacade {
    network_tx: Sender<Vec<u8>>,
    network_rx: Receiver<Vec<u8>>,
    conditions: NetworkConditions,
    /// A segment held back by the reordering roll, sent just before the
    /// next one — swapping the order of two consecutive sends.
    held_back: Option<Vec<u8>>,
    /// A segment pulled off `network_rx` by `wait_for_event`'s readiness
    /// probe (since `Receiver` has no non-consuming peek), waiting for
    /// the matching `network_recv` call to hand it over.
    peeked: Option<Vec<u8>>,

    /// Data the receive pipeline has delivered to "the application".
    delivered: VecDeque<u8>,
    /// Data "the application" has queued to send.
    outgoing: VecDeque<u8>,

    pub peer_fin_received: bool,
    pub application_unblocked: bool,
    pub app_close_requested: bool,
}

/// Builds two endpoints wired to each other through `mpsc` channels,
/// each applying `conditions` to what it sends.
pub fn pair(conditions: NetworkConditions) -> (ChannelFacade, ChannelFacade) {
    let (a_tx, b_rx) = std::sync::mpsc::channel();
    let (b_tx, a_rx) = std::sync::mpsc::channel();
    let a = ChannelFacade {
        network_tx: a_tx,
        network_rx: a_rx,
        conditions,
        held_back: None,
        peeked: None,
        delivered: VecDeque::new(),
        outgoing: VecDeque::new(),
        peer_fin_received: false,
        application_unblocked: false,
        app_close_requested: false,
    };
    let b = ChannelFacade {
        network_tx: b_tx,
        network_rx: b_rx,
        conditions,
        held_back: None,
        peeked: None,
        delivered: VecDeque::new(),
        outgoing: VecDeque::new(),
        peer_fin_received: false,
        application_unblocked: false,
        app_close_requested: false,
    };
    (a, b)
}

impl ChannelFacade {
    /// Test helper: queues bytes for the engine to pick up on its next
    /// `APP_DATA` poll.
    pub fn queue_app_data(&mut self, bytes: &[u8]) {
        self.outgoing.extend(bytes.iter().copied());
    }

    /// Test helper: drains everything delivered to the application so
    /// far.
    pub fn take_delivered(&mut self) -> Vec<u8> {
        self.delivered.drain(..).collect()
    }

    fn roll(&self, p: f64) -> bool {
        if p <= 0.0 {
            false
        } else {
            rand::thread_rng().gen_bool(p.min(1.0))
        }
    }
}

impl Facade for ChannelFacade {
    fn network_send(&mut self, bytes: &[u8]) -> Result<()> {
        if self.roll(self.conditions.loss_probability) {
            return Ok(()); // dropped on the floor
        }

        let send_now = if self.roll(self.conditions.reorder_probability) && self.held_back.is_none() {
            self.held_back = Some(bytes.to_vec());
            None
        } else {
            Some(bytes.to_vec())
        };

        if let Some(held) = self.held_back.take() {
            if send_now.is_some() {
                // Flush the held-back segment first, then this one:
                // the two are now reordered relative to send order.
                let _ = self.network_tx.send(held);
            } else {
                self.held_back = Some(held);
            }
        }
        if let Some(now) = send_now {
            let _ = self.network_tx.send(now.clone());
            if self.roll(self.conditions.duplicate_probability) {
                let _ = self.network_tx.send(now);
            }
        }
        Ok(())
    }

    fn network_recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        let bytes = match self.peeked.take() {
            Some(bytes) => bytes,
            None => match self.network_rx.try_recv() {
                Ok(bytes) => bytes,
                Err(TryRecvError::Empty) => return Ok(0),
                Err(TryRecvError::Disconnected) => return Err(Error::PortClosed(0)),
            },
        };
        let n = bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&bytes[..n]);
        Ok(n)
    }

    fn app_send(&mut self, bytes: &[u8]) -> Result<usize> {
        self.delivered.extend(bytes.iter().copied());
        Ok(bytes.len())
    }

    fn app_recv(&mut self, max: usize) -> Result<Vec<u8>> {
        let n = self.outgoing.len().min(max);
        Ok(self.outgoing.drain(..n).collect())
    }

    fn wait_for_event(&mut self, mask: EventMask, deadline: Option<Instant>) -> EventSet {
        let poll_interval = Duration::from_millis(1);
        loop {
            let mut events = EventSet::default();
            if mask.network_data && self.peeked.is_none() {
                match self.network_rx.try_recv() {
                    Ok(bytes) => self.peeked = Some(bytes),
                    Err(_) => {}
                }
            }
            if mask.network_data && self.peeked.is_some() {
                events.network_data = true;
            }
            if mask.app_data && !self.outgoing.is_empty() {
                events.app_data = true;
            }
            if mask.app_close_requested && self.app_close_requested {
                events.app_close_requested = true;
                self.app_close_requested = false;
            }
            if events.any() {
                return events;
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return EventSet { timeout: true, ..EventSet::default() };
                }
            } else {
                return EventSet::default();
            }
            std::thread::sleep(poll_interval);
        }
    }

    fn fin_received(&mut self) {
        self.peer_fin_received = true;
    }

    fn unblock_application(&mut self) {
        self.application_unblocked = true;
    }
}

/// Test helper: reads exactly one segment from `facade`'s network side,
/// busy-waiting briefly if nothing is ready yet. Used by unit/
/// integration tests that drive two engines by hand instead of calling
/// `Engine::run`.
pub fn recv_one(facade: &mut ChannelFacade) -> Option<crate::codec::Segment> {
    let mut buf = [0u8; crate::codec::MAX_SEGMENT_LEN];
    for _ in 0..50 {
        match facade.network_recv(&mut buf) {
            Ok(0) => std::thread::sleep(Duration::from_millis(1)),
            Ok(n) => return crate::codec::Segment::decode(&buf[..n]).ok(),
            Err(_) => return None,
        }
    }
    None
}
