mod common;

use stcp::facade::channel::{self, NetworkConditions};
use stcp::State;

/// Mirrors spec scenario 5 ("Simultaneous close"): both sides issue an
/// application close while Established, each transitions to FinWait1
/// and sends its own FIN, and on receipt of the peer's FIN each side
/// ACKs and moves straight to Closed, setting `done` — independent of
/// whether its own FIN has been acked yet.
#[test]
fn both_sides_closing_at_once_reach_closed() {
    let (mut client, mut facade_a, mut server, mut facade_b) = common::handshake(NetworkConditions::perfect());

    client.close(&mut facade_a);
    assert_eq!(client.state(), State::FinWait1);
    server.close(&mut facade_b);
    assert_eq!(server.state(), State::FinWait1);

    // Each side's FIN is in flight to the other.
    let client_fin = channel::recv_one(&mut facade_b).expect("client's FIN should arrive at server");
    let server_fin = channel::recv_one(&mut facade_a).expect("server's FIN should arrive at client");

    // Each delivers the peer's FIN: the FinWait1 row closes unconditionally,
    // even though neither side's own FIN has been acked yet.
    server.on_segment(client_fin, &mut facade_b);
    assert_eq!(server.state(), State::Closed);
    assert!(server.is_done());
    client.on_segment(server_fin, &mut facade_a);
    assert_eq!(client.state(), State::Closed);
    assert!(client.is_done());

    // Each side ACKed the peer's FIN in the step above; those ACKs still
    // arrive and retire each side's own outstanding FIN entry, but the
    // connection is already closed by this point.
    let ack_retiring_client_fin =
        channel::recv_one(&mut facade_a).expect("server's ACK of the client's FIN should arrive at the client");
    let ack_retiring_server_fin =
        channel::recv_one(&mut facade_b).expect("client's ACK of the server's FIN should arrive at the server");

    client.on_segment(ack_retiring_client_fin, &mut facade_a);
    server.on_segment(ack_retiring_server_fin, &mut facade_b);

    assert_eq!(client.state(), State::Closed);
    assert!(client.is_done());
    assert_eq!(server.state(), State::Closed);
    assert!(server.is_done());
}
