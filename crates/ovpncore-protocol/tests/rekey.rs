//! Lifetime-driven transitions across an established pair: staying up
//! across a renegotiate deadline, and losing the data channel once a slot's
//! hard expiry passes with nothing having replaced it.

mod common;

use std::time::Duration;

use ovpncore_protocol::LifetimeConfig;

#[test]
fn session_stays_established_past_renegotiate_deadline() {
    // renegotiate fires well before expire, but with nothing driving a
    // replacement handshake to completion the original primary keeps
    // serving traffic right up to its own hard expiry.
    let lifetime = LifetimeConfig {
        handshake_window: Duration::from_secs(60),
        become_primary: Duration::from_millis(50),
        renegotiate: Duration::from_secs(2),
        expire: Duration::from_secs(10),
    };
    assert!(lifetime.is_well_ordered());

    let (mut client, mut server) = common::make_pair(lifetime);
    let t1 = common::establish(&mut client, &mut server, lifetime);

    // Past renegotiate, short of expire: housekeeping must not tear down
    // the working primary, and the data channel keeps working.
    let t2 = t1 + Duration::from_secs(3);
    server.housekeeping(t2);
    client.housekeeping(t2);
    assert!(server.is_established());
    assert!(client.is_established());

    let wire = client.encrypt_outbound(b"still alive", t2).unwrap();
    let out = server.handle_incoming(&wire, t2).unwrap();
    assert_eq!(&out.tunnelled[0][..], b"still alive");
}

#[test]
fn primary_slot_is_dropped_once_its_hard_expiry_passes() {
    let lifetime = LifetimeConfig {
        handshake_window: Duration::from_secs(60),
        become_primary: Duration::from_millis(50),
        renegotiate: Duration::from_secs(2),
        expire: Duration::from_secs(4),
    };
    let (mut client, mut server) = common::make_pair(lifetime);
    let t1 = common::establish(&mut client, &mut server, lifetime);

    assert!(server.is_established());

    let t2 = t1 + Duration::from_secs(5);
    server.housekeeping(t2);

    // The slot's hard expiry has passed with no replacement promoted, so
    // the server is left with no usable primary.
    assert!(!server.is_established());
}

#[test]
fn established_session_survives_many_housekeeping_ticks() {
    let lifetime = LifetimeConfig::default();
    let (mut client, mut server) = common::make_pair(lifetime);
    let t1 = common::establish(&mut client, &mut server, lifetime);

    let mut now = t1;
    for _ in 0..20 {
        now += Duration::from_secs(1);
        server.housekeeping(now);
        client.housekeeping(now);
    }

    assert!(server.is_established());
    assert!(client.is_established());

    let wire = client.encrypt_outbound(b"post-ticks", now).unwrap();
    let out = server.handle_incoming(&wire, now).unwrap();
    assert_eq!(&out.tunnelled[0][..], b"post-ticks");
}
