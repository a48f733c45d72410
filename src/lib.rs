//! STCP: a simplified, TCP-like reliable transport layer over an
//! unreliable, datagram-oriented network service.
//!
//! This crate provides one [`engine::Engine`] per connection. The
//! engine owns the send/receive sequence bookkeeping, a
//! [`retransmit::RetransmitQueue`] for outbound go-back-N retransmission,
//! and a [`reassembly::ReassemblyQueue`] for inbound out-of-order
//! buffering, and runs a single-threaded control loop driven by a
//! [`facade::Facade`] implementation supplying network I/O, application
//! I/O, and event multiplexing.
//!
//! The engine is transport-agnostic: [`facade::channel`] pairs two
//! engines in-process for deterministic testing, and [`facade::udp`]
//! rides on a real `UdpSocket` for the demo binaries in `src/bin/`.
//!
//! Congestion control beyond a fixed window ceiling, selective ACK, fast
//! retransmit, PAWS, and Nagle's algorithm are all out of scope, as is
//! any notion of IP addressing or wire compatibility with real TCP.

pub mod codec;
pub mod engine;
pub mod error;
pub mod facade;
pub mod reassembly;
pub mod retransmit;
pub mod seq;

pub use engine::{Engine, Kind, Outcome, State};
pub use error::Error;
