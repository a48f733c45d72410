mod common;

use stcp::facade::channel::{self, NetworkConditions};

#[test]
fn out_of_order_segments_are_buffered_then_delivered_in_order() {
    let (mut client, mut facade_a, mut server, mut facade_b) = common::handshake(NetworkConditions::perfect());

    let first = b"hello ".to_vec();
    let second = b"world".to_vec();
    client.send(&first, &mut facade_a);
    client.send(&second, &mut facade_a);

    // Both segments are already in flight on facade_b's network side, in
    // the order the client sent them.
    let seg_first = channel::recv_one(&mut facade_b).expect("first segment should arrive");
    let seg_second = channel::recv_one(&mut facade_b).expect("second segment should arrive");

    // Deliver the second segment first: it arrives ahead of rcv_nxt and
    // must be buffered, not delivered, until the gap is filled.
    server.on_segment(seg_second, &mut facade_b);
    assert!(facade_b.take_delivered().is_empty());

    // Delivering the first segment now fills the gap and should drain
    // both, in the original order.
    server.on_segment(seg_first, &mut facade_b);
    assert_eq!(facade_b.take_delivered(), b"hello world");
}
