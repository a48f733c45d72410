//! The `Facade` trait: the boundary between an [`crate::engine::Engine`]
//! and the outside world.
//!
//! The original design treats the socket interface ("mysocket") as an
//! out-of-scope collaborator the engine calls into for network I/O,
//! application I/O, and event multiplexing. This module is that
//! boundary made concrete as a trait, so the engine itself stays free of
//! any particular transport (UDP, an in-process channel, ...) — exactly
//! how the prior art's `TcpStream`/`Manager` split kept the state
//! machine (`tcb.rs`) ignorant of whether segments arrived over a TUN
//! device or a loopback test harness.

use std::time::Instant;

use crate::error::Result;

pub mod channel;
pub mod udp;

/// Bitset of event kinds a [`Facade::wait_for_event`] call may be
/// interested in, or may report having observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventMask {
    pub network_data: bool,
    pub app_data: bool,
    pub app_close_requested: bool,
    pub timeout: bool,
}

impl EventMask {
    pub const ALL: EventMask =
        EventMask { network_data: true, app_data: true, app_close_requested: true, timeout: true };
    pub const NETWORK_ONLY: EventMask =
        EventMask { network_data: true, app_data: false, app_close_requested: false, timeout: true };

    pub fn any(&self) -> bool {
        self.network_data || self.app_data || self.app_close_requested || self.timeout
    }
}

/// Alias kept distinct from [`EventMask`] at the type level even though
/// the representation is identical: a mask says what we're willing to
/// see, a set says what we actually saw.
pub type EventSet = EventMask;

/// The per-connection transport and application boundary an [`Engine`](crate::engine::Engine)
/// drives itself against.
///
/// Implementors decide how segments actually travel (a UDP socket, an
/// in-process channel, ...) and how application bytes flow in and out;
/// the engine only ever sees this trait.
///
/// `set_context`/`get_context` from the original socket-facade contract
/// are deliberately not reproduced here: Rust's ownership model means
/// the engine is owned by (or passed to) its facade directly, rather
/// than looked up from a table by file descriptor.
pub trait Facade {
    /// Sends one already-encoded segment over the network.
    fn network_send(&mut self, bytes: &[u8]) -> Result<()>;

    /// Reads one segment from the network into `buf`, returning the
    /// number of bytes written. Never blocks; a facade with nothing
    /// ready returns `Ok(0)`.
    fn network_recv(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Delivers received, in-order application data up to the local
    /// application. Returns the number of bytes the application
    /// consumed.
    fn app_send(&mut self, bytes: &[u8]) -> Result<usize>;

    /// Reads up to `max` bytes the local application wants transmitted.
    /// Returns an empty vector if the application has nothing ready.
    fn app_recv(&mut self, max: usize) -> Result<Vec<u8>>;

    /// Blocks (or busy-waits, depending on the implementation) until at
    /// least one event in `mask` is ready, or `deadline` elapses,
    /// whichever comes first. A `None` deadline means wait indefinitely.
    fn wait_for_event(&mut self, mask: EventMask, deadline: Option<Instant>) -> EventSet;

    /// Signals that the peer has sent a FIN: half of the stream is now
    /// closed for reading.
    fn fin_received(&mut self);

    /// Signals that the connection has completed its handshake (in
    /// either direction) and any application thread blocked waiting to
    /// use the connection should wake up. Called exactly once per
    /// connection.
    fn unblock_application(&mut self);
}

/// Initial sequence number selection.
///
/// The prior art's `Cargo.toml` declares `rand` but its `NetStack`
/// actually drives the ISN with a 4ms-ticking `AtomicU32` instead; this
/// crate is the first to call `rand` for its stated purpose.
pub struct Iss;

impl Iss {
    /// A uniformly random initial sequence number in `0..256`, matching
    /// the magnitude of the original `rand() % 256` (the original source
    /// notes a small ISN range keeps its diagrams legible; this crate
    /// keeps that same modest range rather than spanning the full
    /// `u32`).
    pub fn random() -> u32 {
        use rand::Rng;
        rand::thread_rng().gen_range(0..256)
    }

    /// A fixed ISN of 1, for reproducible traces. Stands in for the
    /// original's `FIXED_INITNUM` compile-time switch, exposed here as a
    /// runtime choice (a `--debug-iss` flag or environment variable at
    /// the call site) rather than a build-time `#ifdef`.
    pub fn fixed_for_debug() -> u32 {
        1
    }
}
