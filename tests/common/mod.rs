//! Shared handshake helper for the end-to-end scenario tests, named
//! after the scenario they exercise the way
//! `PetrichorIT-inet/tests/tcp_*.rs` names its own integration tests.

use stcp::facade::channel::{self, ChannelFacade, NetworkConditions};
use stcp::{Engine, Outcome};

/// Drives a full three-way handshake between a freshly connected client
/// and a freshly listening server over a channel pair, returning both
/// engines and facades in `Established`.
pub fn handshake(conditions: NetworkConditions) -> (Engine, ChannelFacade, Engine, ChannelFacade) {
    let (mut facade_a, mut facade_b) = channel::pair(conditions);
    let mut client = Engine::connect_with_iss(&mut facade_a, 100);
    let mut server = Engine::listen_with_iss(200);

    let syn = channel::recv_one(&mut facade_b).expect("SYN should arrive at the server");
    let outcome = server.on_segment(syn, &mut facade_b);
    assert_eq!(outcome, Outcome::Noop);

    let synack = channel::recv_one(&mut facade_a).expect("SYN+ACK should arrive at the client");
    let outcome = client.on_segment(synack, &mut facade_a);
    assert_eq!(outcome, Outcome::Established);

    let ack = channel::recv_one(&mut facade_b).expect("final ACK should arrive at the server");
    let outcome = server.on_segment(ack, &mut facade_b);
    assert_eq!(outcome, Outcome::Established);

    (client, facade_a, server, facade_b)
}
