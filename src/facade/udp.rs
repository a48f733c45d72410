//! A `Facade` over `std::net::UdpSocket`: "an unreliable, datagram-like
//! network service" taken literally, standing in for the prior art's
//! raw-IP-over-TUN transport (`tidy_tuntap` plus hand-built
//! `etherparse::Ipv4Header`/`TcpHeader` framing). The demo binaries use
//! this; the test suite uses [`super::channel`] instead so scenarios are
//! deterministic.

use std::collections::VecDeque;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use log::trace;
use rand::Rng;

use crate::codec::MAX_SEGMENT_LEN;
use crate::error::Result;
use crate::facade::{EventMask, EventSet, Facade};

/// A UDP-backed facade bound to `local` and talking to a fixed `peer`.
/// Unlike the prior art's TUN device, a bound UDP socket already demuxes
/// by address/port, so no IP or port fields need to travel in the STCP
/// header itself.
///
/// Real UDP already drops and reorders on its own, but the demo
/// binaries expose `--loss`/`--reorder` flags to exaggerate that beyond
/// whatever the local network happens to do, for exercising the engine
/// by hand the way `facade::channel`'s `NetworkConditions` does in
/// tests.
pub struct UdpFacade {
    socket: UdpSocket,
    peer: SocketAddr,
    app_rx: VecDeque<u8>,
    app_tx_to_deliver: VecDeque<u8>,
    loss_probability: f64,
    reorder_probability: f64,
    held_back: Option<Vec<u8>>,
}

impl UdpFacade {
    pub fn bind(local: SocketAddr, peer: SocketAddr) -> std::io::Result<UdpFacade> {
        let socket = UdpSocket::bind(local)?;
        socket.set_nonblocking(true)?;
        Ok(UdpFacade {
            socket,
            peer,
            app_rx: VecDeque::new(),
            app_tx_to_deliver: VecDeque::new(),
            loss_probability: 0.0,
            reorder_probability: 0.0,
            held_back: None,
        })
    }

    pub fn with_conditions(mut self, loss_probability: f64, reorder_probability: f64) -> UdpFacade {
        self.loss_probability = loss_probability;
        self.reorder_probability = reorder_probability;
        self
    }

    fn roll(&self, p: f64) -> bool {
        p > 0.0 && rand::thread_rng().gen_bool(p.min(1.0))
    }

    /// Queues bytes read from stdin (or any other application source)
    /// for the send pipeline to pick up.
    pub fn queue_outgoing(&mut self, bytes: &[u8]) {
        self.app_rx.extend(bytes.iter().copied());
    }

    /// Drains bytes the receive pipeline has delivered, e.g. to write to
    /// stdout.
    pub fn take_incoming(&mut self) -> Vec<u8> {
        self.app_tx_to_deliver.drain(..).collect()
    }
}

impl Facade for UdpFacade {
    fn network_send(&mut self, bytes: &[u8]) -> Result<()> {
        if self.roll(self.loss_probability) {
            trace!("simulated loss: dropping outbound segment");
            return Ok(());
        }
        if self.roll(self.reorder_probability) && self.held_back.is_none() {
            self.held_back = Some(bytes.to_vec());
            return Ok(());
        }
        if let Some(held) = self.held_back.take() {
            self.socket.send_to(&held, self.peer)?;
        }
        self.socket.send_to(bytes, self.peer)?;
        Ok(())
    }

    fn network_recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.socket.recv_from(buf) {
            Ok((n, from)) => {
                if from != self.peer {
                    trace!("dropping datagram from unexpected peer {from}");
                    return Ok(0);
                }
                Ok(n)
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn app_send(&mut self, bytes: &[u8]) -> Result<usize> {
        self.app_tx_to_deliver.extend(bytes.iter().copied());
        Ok(bytes.len())
    }

    fn app_recv(&mut self, max: usize) -> Result<Vec<u8>> {
        let n = self.app_rx.len().min(max);
        Ok(self.app_rx.drain(..n).collect())
    }

    fn wait_for_event(&mut self, mask: EventMask, deadline: Option<Instant>) -> EventSet {
        let poll_interval = Duration::from_millis(5);
        loop {
            let mut events = EventSet::default();
            if mask.network_data {
                let mut probe = [0u8; MAX_SEGMENT_LEN];
                match self.socket.peek_from(&mut probe) {
                    Ok(_) => events.network_data = true,
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(_) => {}
                }
            }
            if mask.app_data && !self.app_rx.is_empty() {
                events.app_data = true;
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
        trace!("peer FIN received");
    }

    fn unblock_application(&mut self) {
        trace!("connection established, application unblocked");
    }
}
