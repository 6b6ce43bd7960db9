//! Data-channel replay protection: a duplicated wire packet is dropped
//! silently rather than delivered twice, and the channel keeps working
//! for everything sent after it.

mod common;

use ovpncore_protocol::LifetimeConfig;

#[test]
fn duplicate_data_packet_is_dropped_not_redelivered() {
    let lifetime = LifetimeConfig::default();
    let (mut client, mut server) = common::make_pair(lifetime);
    let now = common::establish(&mut client, &mut server, lifetime);

    let wire = client.encrypt_outbound(b"first packet", now).unwrap();

    let out = server.handle_incoming(&wire, now).unwrap();
    assert_eq!(out.tunnelled.len(), 1);
    assert_eq!(&out.tunnelled[0][..], b"first packet");

    // Replay the exact same bytes: the server must not error and must not
    // deliver it a second time.
    let out = server.handle_incoming(&wire, now).unwrap();
    assert!(out.tunnelled.is_empty(), "replayed packet was redelivered");

    // The channel still works for subsequent fresh packets.
    let wire = client.encrypt_outbound(b"second packet", now).unwrap();
    let out = server.handle_incoming(&wire, now).unwrap();
    assert_eq!(out.tunnelled.len(), 1);
    assert_eq!(&out.tunnelled[0][..], b"second packet");
}

#[test]
fn out_of_order_arrival_within_window_is_still_accepted() {
    let lifetime = LifetimeConfig::default();
    let (mut client, mut server) = common::make_pair(lifetime);
    let now = common::establish(&mut client, &mut server, lifetime);

    let wire_a = client.encrypt_outbound(b"a", now).unwrap();
    let wire_b = client.encrypt_outbound(b"b", now).unwrap();
    let wire_c = client.encrypt_outbound(b"c", now).unwrap();

    // Deliver out of order: b, a, c. All three are within the sliding
    // replay window and should all be accepted exactly once.
    let out_b = server.handle_incoming(&wire_b, now).unwrap();
    let out_a = server.handle_incoming(&wire_a, now).unwrap();
    let out_c = server.handle_incoming(&wire_c, now).unwrap();

    assert_eq!(&out_b.tunnelled[0][..], b"b");
    assert_eq!(&out_a.tunnelled[0][..], b"a");
    assert_eq!(&out_c.tunnelled[0][..], b"c");

    // Now replay the earliest one again; it's still within window history
    // and must be rejected as a duplicate.
    let out = server.handle_incoming(&wire_a, now).unwrap();
    assert!(out.tunnelled.is_empty(), "out-of-order replay was redelivered");
}
