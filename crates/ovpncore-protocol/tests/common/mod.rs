//! Shared harness for multi-module integration tests: a loopback pair of
//! `Session`s (no sockets) pumped against each other until both sides settle.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::DigitallySignedStruct;

use ovpncore_core::Event;
use ovpncore_crypto::CipherSuite;
use ovpncore_protocol::{ControlWrap, KeepaliveConfig, LifetimeConfig, PushFilter, ReliableConfig, Session};

/// Accepts any server certificate; the pair in these tests shares a
/// self-signed fixture that isn't in any trust store.
#[derive(Debug)]
pub struct AcceptAny;

impl ServerCertVerifier for AcceptAny {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

pub fn fixture_cert() -> (CertificateDer<'static>, PrivateKeyDer<'static>) {
    let rcgen::CertifiedKey { cert, signing_key } =
        rcgen::generate_simple_self_signed(vec!["test.local".to_string()]).unwrap();
    let cert_der = CertificateDer::from(cert.der().to_vec());
    let key_der = PrivateKeyDer::Pkcs8(rustls::pki_types::PrivatePkcs8KeyDer::from(
        signing_key.serialize_der(),
    ));
    (cert_der, key_der)
}

/// Build an unestablished client/server pair sharing a lifetime policy,
/// plaintext control wrapping (TLS alone protects the control channel).
pub fn make_pair(lifetime: LifetimeConfig) -> (Session, Session) {
    let (cert, key) = fixture_cert();
    let server_config = ovpncore_protocol::create_server_config(vec![cert], key, None).unwrap();
    let client_config = ovpncore_protocol::create_client_config(Arc::new(AcceptAny), None).unwrap();
    let server_name = ServerName::try_from("test.local").unwrap();

    let server = Session::new_server(
        server_config,
        CipherSuite::ChaCha20Poly1305,
        lifetime,
        ReliableConfig::default(),
        ControlWrap::Plain,
        KeepaliveConfig::default(),
        PushFilter::default(),
    );
    let client = Session::new_client(
        client_config,
        server_name,
        CipherSuite::ChaCha20Poly1305,
        lifetime,
        ReliableConfig::default(),
        ControlWrap::Plain,
        KeepaliveConfig::default(),
        PushFilter::default(),
    );
    (client, server)
}

/// Round-trip wire bytes between `client` and `server` at fixed time `now`
/// until neither side has anything queued, feeding `first` to the server to
/// begin. Returns every event either side raised along the way.
pub fn pump(client: &mut Session, server: &mut Session, now: Instant, first: Bytes) -> Vec<Event> {
    let mut to_server = vec![first];
    let mut to_client: Vec<Bytes> = Vec::new();
    let mut events = Vec::new();

    for _ in 0..64 {
        if to_server.is_empty() && to_client.is_empty() {
            break;
        }

        for pkt in to_server.drain(..).collect::<Vec<_>>() {
            let out = server.handle_incoming(&pkt, now).expect("server rejected packet");
            events.extend(out.events);
            to_client.extend(out.send);
        }

        for pkt in to_client.drain(..).collect::<Vec<_>>() {
            let out = client.handle_incoming(&pkt, now).expect("client rejected packet");
            events.extend(out.events);
            to_server.extend(out.send);
        }
    }

    events
}

/// Drive a full handshake (reset, TLS, push exchange) and then advance time
/// past `become_primary` on both sides so the fresh slot is promoted to
/// PRIMARY. Returns the time at which both sides are established.
pub fn establish(client: &mut Session, server: &mut Session, lifetime: LifetimeConfig) -> Instant {
    let t0 = Instant::now();
    let first = client.start(t0).unwrap();
    pump(client, server, t0, first);

    let t1 = t0 + lifetime.become_primary + std::time::Duration::from_millis(10);
    server.housekeeping(t1);
    client.housekeeping(t1);

    assert!(server.is_established(), "server never reached PRIMARY");
    assert!(client.is_established(), "client never reached PRIMARY");
    t1
}
