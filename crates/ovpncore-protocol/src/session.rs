//! Session multiplexer (C9).
//!
//! Owns up to three [`KeyState`] slots -- at most one `Primary`, one
//! `Secondary` (a handshake racing to replace it), and one `LameDuck`
//! (the previous primary, kept briefly so in-flight data still
//! decrypts) -- and dispatches inbound wire packets to whichever slot
//! they belong to by op-code and key-id. A single `housekeeping` call
//! drives every time-based transition: retransmit, handshake-window
//! expiry, promotion, renegotiation, and slot expiry.

use std::sync::Arc;
use std::time::Instant;

use bytes::{BufMut, Bytes, BytesMut};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ServerConfig};

use ovpncore_core::Event;
use ovpncore_crypto::{CipherSuite, HmacAuth, KeyMaterial, TlsCryptKey, WrappedClientKey};

use crate::keepalive::{KeepaliveConfig, KeepaliveEvent, KeepaliveTracker};
use crate::keystate::{HandshakeState, KeyState, LifetimeConfig, SlotRole};
use crate::opcode::{KeyId, OpCode};
use crate::packet::{ControlPacketData, DataPacketData, Packet, PacketHeader};
use crate::push::{PushAssembler, PushFilter};
use crate::reliable::ReliableConfig;
use crate::tls::TlsHandler;
use crate::{ProtocolError, Result};

/// Session-id type re-exported for callers that don't want to reach into
/// `keystate`.
pub type SessionIdBytes = crate::keystate::SessionIdBytes;

/// How control-channel packets are authenticated and/or encrypted on the
/// wire, independent of the TLS session they carry.
pub enum ControlWrap {
    /// No extra wrapping (TLS alone protects the control channel).
    Plain,
    /// HMAC-authenticated (`tls-auth`): packets are signed, not encrypted.
    TlsAuth(HmacAuth),
    /// Encrypted and authenticated (`tls-crypt`/`tls-crypt-v2`).
    TlsCrypt(TlsCryptKey),
    /// Server-side tls-crypt-v2 bootstrap: the long-term key used only to
    /// unwrap the first client's Wrapped Client Key. Replaced by
    /// `TlsCrypt` holding the client's own derived key once that first
    /// `HARD_RESET_CLIENT_V3` is processed; never used to wrap or unwrap
    /// any other packet.
    TlsCryptV2Server(TlsCryptKey),
}

impl ControlWrap {
    fn wrap(&self, data: &[u8]) -> Bytes {
        match self {
            ControlWrap::Plain => Bytes::copy_from_slice(data),
            ControlWrap::TlsAuth(key) => Bytes::from(key.wrap(data)),
            ControlWrap::TlsCrypt(key) => {
                Bytes::from(key.wrap(data).unwrap_or_else(|_| data.to_vec()))
            }
            ControlWrap::TlsCryptV2Server(_) => Bytes::copy_from_slice(data),
        }
    }

    fn unwrap(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            ControlWrap::Plain => Ok(data.to_vec()),
            ControlWrap::TlsAuth(key) => Ok(key.unwrap(data)?),
            ControlWrap::TlsCrypt(key) => Ok(key.unwrap(data)?),
            ControlWrap::TlsCryptV2Server(_) => Err(ProtocolError::NotReady),
        }
    }
}

/// Which end of the TLS handshake this `Session` drives, and the
/// materials needed to spin up a fresh [`TlsHandler`] for each new slot
/// (every rekey runs its own TLS session).
enum TlsEndpoint {
    Server(Arc<ServerConfig>),
    Client(Arc<ClientConfig>, ServerName<'static>),
}

impl TlsEndpoint {
    fn new_handler(&self) -> Result<TlsHandler> {
        match self {
            TlsEndpoint::Server(cfg) => TlsHandler::new_server(cfg.clone()),
            TlsEndpoint::Client(cfg, name) => TlsHandler::new_client(cfg.clone(), name.clone()),
        }
    }

    fn is_server(&self) -> bool {
        matches!(self, TlsEndpoint::Server(_))
    }
}

/// One side of an OpenVPN control/data-channel protocol instance.
pub struct Session {
    tls_endpoint: TlsEndpoint,
    cipher_suite: CipherSuite,
    lifetime: LifetimeConfig,
    reliable_config: ReliableConfig,
    control_wrap: ControlWrap,

    slots: Vec<KeyState>,
    next_key_id: u8,

    keepalive_config: KeepaliveConfig,
    keepalive: Option<KeepaliveTracker>,

    push_filter: PushFilter,
    push_assembler: Option<PushAssembler>,
    push_reply: Option<crate::control::PushReply>,

    /// Server-side only: the client's `peer_info` blob, assembled and
    /// exposed but never interpreted key-by-key (that's policy, not core).
    peer_info: Option<String>,

    /// Client-side tls-crypt-v2 only: the Wrapped Client Key blob to embed
    /// in the very first `HARD_RESET_CLIENT_V3`, taken (and cleared) the
    /// first time [`Session::start`] runs.
    pending_wkc: Option<Bytes>,

    /// Set once the server has sent a `RELAY` directive: the peer is a
    /// relay, not the real endpoint; the caller must not install tun
    /// routes off this session.
    relay: bool,

    terminal: Option<Event>,
}

/// Everything a `handle_incoming`/`housekeeping` call may produce: wire
/// bytes to send, and events to surface to the application.
#[derive(Debug, Default)]
pub struct SessionOutput {
    /// Wire-ready packets the caller should transmit.
    pub send: Vec<Bytes>,
    /// Events for the embedding application.
    pub events: Vec<Event>,
    /// Tunnelled payloads decrypted off the data channel, in arrival
    /// order.
    pub tunnelled: Vec<Bytes>,
}

impl Session {
    fn new(
        tls_endpoint: TlsEndpoint,
        cipher_suite: CipherSuite,
        lifetime: LifetimeConfig,
        reliable_config: ReliableConfig,
        control_wrap: ControlWrap,
        keepalive_config: KeepaliveConfig,
        push_filter: PushFilter,
    ) -> Self {
        Self {
            tls_endpoint,
            cipher_suite,
            lifetime,
            reliable_config,
            control_wrap,
            slots: Vec::with_capacity(3),
            next_key_id: 0,
            keepalive_config,
            keepalive: None,
            push_filter,
            push_assembler: None,
            push_reply: None,
            pending_wkc: None,
            relay: false,
            terminal: None,
        }
    }

    /// Construct a server-side session.
    #[allow(clippy::too_many_arguments)]
    pub fn new_server(
        tls_config: Arc<ServerConfig>,
        cipher_suite: CipherSuite,
        lifetime: LifetimeConfig,
        reliable_config: ReliableConfig,
        control_wrap: ControlWrap,
        keepalive_config: KeepaliveConfig,
        push_filter: PushFilter,
    ) -> Self {
        Self::new(
            TlsEndpoint::Server(tls_config),
            cipher_suite,
            lifetime,
            reliable_config,
            control_wrap,
            keepalive_config,
            push_filter,
        )
    }

    /// Construct a client-side session against `server_name`.
    #[allow(clippy::too_many_arguments)]
    pub fn new_client(
        tls_config: Arc<ClientConfig>,
        server_name: ServerName<'static>,
        cipher_suite: CipherSuite,
        lifetime: LifetimeConfig,
        reliable_config: ReliableConfig,
        control_wrap: ControlWrap,
        keepalive_config: KeepaliveConfig,
        push_filter: PushFilter,
    ) -> Self {
        let mut session = Self::new(
            TlsEndpoint::Client(tls_config, server_name),
            cipher_suite,
            lifetime,
            reliable_config,
            control_wrap,
            keepalive_config,
            push_filter,
        );
        session.push_assembler = Some(PushAssembler::new());
        session
    }

    /// Attach a tls-crypt-v2 Wrapped Client Key, to be embedded in this
    /// client's very first `HARD_RESET_CLIENT_V3`. Only meaningful when
    /// `control_wrap` was constructed as `ControlWrap::TlsCrypt` with the
    /// client's own ephemeral key (the same key `wkc` was wrapped around).
    pub fn with_wrapped_client_key(mut self, wkc: Bytes) -> Self {
        self.pending_wkc = Some(wkc);
        self
    }

    /// Whether this session is driving the server side of the TLS
    /// handshake.
    pub fn is_server(&self) -> bool {
        self.tls_endpoint.is_server()
    }

    /// Whether a primary slot is active and data may flow.
    pub fn is_established(&self) -> bool {
        self.primary_index().is_some()
    }

    /// The stable terminal event, once this session has failed; after
    /// this is set no further wire bytes should be sent.
    pub fn terminal(&self) -> Option<&Event> {
        self.terminal.as_ref()
    }

    /// Whether the server identified itself as a relay via a `RELAY`
    /// control directive. The caller must not install tun routes off a
    /// relay session; it should instead initiate a fresh handshake over
    /// the tunnel this session provides.
    pub fn is_relay(&self) -> bool {
        self.relay
    }

    fn primary_index(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.slot_role() == SlotRole::Primary)
    }

    fn secondary_index(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.slot_role() == SlotRole::Secondary)
    }

    fn slot_index_for_key_id(&self, key_id: KeyId) -> Option<usize> {
        self.slots.iter().position(|s| s.key_id() == key_id)
    }

    fn allocate_key_id(&mut self) -> KeyId {
        let id = KeyId::new(self.next_key_id);
        self.next_key_id = (self.next_key_id + 1) & 0x07;
        id
    }

    /// Begin a fresh handshake in a new `Secondary` slot. The very first
    /// call (session creation) produces the initial primary-to-be; later
    /// calls drive a rekey alongside an existing primary.
    fn spawn_slot(&mut self, now: Instant) -> Result<usize> {
        if self.slots.len() >= 3 {
            // Room must be reclaimed by housekeeping expiry first.
            return Err(ProtocolError::HandshakeFailed(
                "no free key slot for new handshake".into(),
            ));
        }

        let key_id = self.allocate_key_id();
        let local_session_id = ovpncore_crypto::generate_session_id();
        let tls = self.tls_endpoint.new_handler()?;

        let slot = KeyState::new(
            key_id,
            SlotRole::Secondary,
            self.tls_endpoint.is_server(),
            local_session_id,
            tls,
            self.cipher_suite,
            self.lifetime,
            self.reliable_config.clone(),
            now,
        );
        self.slots.push(slot);
        Ok(self.slots.len() - 1)
    }

    /// Client entry point: start the handshake by emitting
    /// `HARD_RESET_CLIENT_V2`. Must be called once before feeding any
    /// inbound packets.
    pub fn start(&mut self, now: Instant) -> Result<Bytes> {
        let idx = self.spawn_slot(now)?;
        let slot = &mut self.slots[idx];
        slot.on_send_hard_reset_client();

        let wkc = self.pending_wkc.take();
        let opcode = if wkc.is_some() {
            OpCode::HardResetClientV3
        } else {
            OpCode::HardResetClientV2
        };

        let header = PacketHeader {
            opcode,
            key_id: slot.key_id(),
            session_id: Some(slot.local_session_id()),
            hmac: None,
            packet_id: None,
            timestamp: None,
        };
        let packet = ControlPacketData {
            header,
            remote_session_id: None,
            acks: vec![],
            message_packet_id: None,
            payload: Bytes::new(),
        };
        let serialized = Packet::Control(packet).serialize();

        // tls-crypt-v2 bootstrap: the op-byte rides in the clear (so the
        // server can recognize the bootstrap packet before it knows which
        // per-client key to unwrap with), followed by a length-prefixed WKc
        // blob, followed by the whole packet wrapped as usual with this
        // client's own tls-crypt key.
        if let Some(wkc) = wkc {
            let wrapped = self.control_wrap.wrap(&serialized);
            let mut buf = BytesMut::with_capacity(1 + 2 + wkc.len() + wrapped.len());
            buf.put_u8(serialized[0]);
            buf.put_u16(wkc.len() as u16);
            buf.put_slice(&wkc);
            buf.put_slice(&wrapped);
            return Ok(buf.freeze());
        }

        Ok(self.control_wrap.wrap(&serialized))
    }

    /// Feed one received wire packet through the session.
    pub fn handle_incoming(&mut self, raw: &[u8], now: Instant) -> Result<SessionOutput> {
        let mut out = SessionOutput::default();
        if self.terminal.is_some() {
            return Ok(out);
        }

        if matches!(self.control_wrap, ControlWrap::TlsCryptV2Server(_)) {
            let unwrapped = match self.bootstrap_tls_crypt_v2(raw) {
                Some(u) => u,
                None => return Ok(out), // not (yet) a valid bootstrap packet: drop
            };
            let packet = match Packet::parse(&unwrapped, false) {
                Ok(p) => p,
                Err(_) => return Ok(out),
            };
            if let Packet::Control(ctrl) = packet {
                self.handle_control(ctrl, now, &mut out)?;
            }
            return Ok(out);
        }

        let unwrapped = match self.control_wrap.unwrap(raw) {
            Ok(d) => d,
            Err(_) => return Ok(out), // bad auth: drop silently, per C6 policy
        };

        let packet = match Packet::parse(&unwrapped, false) {
            Ok(p) => p,
            Err(_) => return Ok(out), // malformed: drop silently
        };

        match packet {
            Packet::Control(ctrl) => self.handle_control(ctrl, now, &mut out)?,
            Packet::Data(data_pkt) => self.handle_data(data_pkt, now, &mut out)?,
        }

        Ok(out)
    }

    /// Server-side tls-crypt-v2 bootstrap: peel the cleartext op-byte and
    /// length-prefixed WKc off the first `HARD_RESET_CLIENT_V3`, unwrap the
    /// WKc under our long-term key to learn the client's own tls-crypt key,
    /// then use that key to unwrap the rest of the packet. On success,
    /// `control_wrap` is replaced with `TlsCrypt(client_key)` for the
    /// remainder of this session's life. Returns `None` for anything that
    /// doesn't parse as a bootstrap packet, so the caller can drop silently.
    fn bootstrap_tls_crypt_v2(&mut self, raw: &[u8]) -> Option<Vec<u8>> {
        if raw.len() < 3 {
            return None;
        }
        if OpCode::from_byte(raw[0]).ok()? != OpCode::HardResetClientV3 {
            return None;
        }
        let wkc_len = u16::from_be_bytes([raw[1], raw[2]]) as usize;
        if raw.len() < 3 + wkc_len {
            return None;
        }
        let wkc_blob = &raw[3..3 + wkc_len];
        let wrapped_body = &raw[3 + wkc_len..];

        let server_key = match &self.control_wrap {
            ControlWrap::TlsCryptV2Server(k) => k,
            _ => return None,
        };
        let (client_key, _metadata) = WrappedClientKey::unwrap(server_key, wkc_blob).ok()?;
        let unwrapped = client_key.unwrap(wrapped_body).ok()?;
        self.control_wrap = ControlWrap::TlsCrypt(client_key);
        Some(unwrapped)
    }

    fn handle_control(
        &mut self,
        ctrl: ControlPacketData,
        now: Instant,
        out: &mut SessionOutput,
    ) -> Result<()> {
        let key_id = ctrl.header.key_id;
        let peer_session_id = ctrl.header.session_id;

        match ctrl.header.opcode {
            OpCode::HardResetClientV2 | OpCode::HardResetClientV3 => {
                // Server: a new client handshake. Only valid server-side.
                if !self.tls_endpoint.is_server() {
                    return Ok(());
                }
                let psid = peer_session_id.ok_or(ProtocolError::InvalidSessionId)?;
                let idx = match self.slot_index_for_key_id(key_id) {
                    Some(idx) => idx,
                    None => self.spawn_slot(now)?,
                };
                self.slots[idx].on_hard_reset_client(psid)?;
                self.slots[idx].on_send_hard_reset_server();

                let header = PacketHeader {
                    opcode: OpCode::HardResetServerV2,
                    key_id: self.slots[idx].key_id(),
                    session_id: Some(self.slots[idx].local_session_id()),
                    hmac: None,
                    packet_id: None,
                    timestamp: None,
                };
                let packet = ControlPacketData {
                    header,
                    remote_session_id: Some(psid),
                    acks: vec![0],
                    message_packet_id: None,
                    payload: Bytes::new(),
                };
                let serialized = Packet::Control(packet).serialize();
                out.send.push(self.control_wrap.wrap(&serialized));
                self.drive_tls(idx, now, out)?;
                Ok(())
            }

            OpCode::HardResetServerV2 => {
                if self.tls_endpoint.is_server() {
                    return Ok(());
                }
                let psid = peer_session_id.ok_or(ProtocolError::InvalidSessionId)?;
                let idx = self
                    .slot_index_for_key_id(key_id)
                    .ok_or(ProtocolError::SessionNotFound)?;
                self.slots[idx].on_hard_reset_server(psid)?;

                // The client's TLS session already has its ClientHello
                // queued the moment it was constructed; pull it now so it
                // rides out alongside (or just after) the reset ack instead
                // of waiting for a ControlV1 that will never arrive first.
                self.drive_tls(idx, now, out)?;

                // This AckV1 only signals "reset handshake complete" (via
                // opcode + remote_session_id); `on_reset_acked` doesn't
                // inspect the ack list, so it stays empty rather than
                // carrying a synthetic id that could collide with the
                // reliable layer's own packet-id numbering.
                let ack = ControlPacketData {
                    header: PacketHeader {
                        opcode: OpCode::AckV1,
                        key_id,
                        session_id: Some(self.slots[idx].local_session_id()),
                        hmac: None,
                        packet_id: None,
                        timestamp: None,
                    },
                    remote_session_id: Some(psid),
                    acks: vec![],
                    message_packet_id: None,
                    payload: Bytes::new(),
                };
                out.send.push(self.control_wrap.wrap(&Packet::Control(ack).serialize()));
                Ok(())
            }

            OpCode::AckV1 => {
                if let Some(idx) = self.slot_index_for_key_id(key_id) {
                    self.slots[idx].reliable_mut().process_acks(&ctrl.acks, now);
                    self.slots[idx].on_reset_acked();
                    self.drive_tls(idx, now, out)?;
                }
                Ok(())
            }

            OpCode::ControlV1 => {
                let idx = self
                    .slot_index_for_key_id(key_id)
                    .ok_or(ProtocolError::SessionNotFound)?;

                if let Some(psid) = peer_session_id {
                    self.slots[idx].observe_peer_session_id(psid)?;
                }
                if !ctrl.acks.is_empty() {
                    self.slots[idx].reliable_mut().process_acks(&ctrl.acks, now);
                    self.slots[idx].on_reset_acked();
                }

                if let Some(packet_id) = ctrl.message_packet_id {
                    let fragments = self.slots[idx]
                        .reliable_mut()
                        .receive(packet_id, ctrl.payload, now);
                    for fragment in fragments {
                        self.slots[idx].tls_reassembler_mut().add(&fragment)?;
                    }
                    let records = self.slots[idx].tls_reassembler_mut().extract_records();
                    self.slots[idx].tls_mut().process_tls_records(records)?;
                    self.drive_tls(idx, now, out)?;
                }

                self.flush_acks(idx, now, out);
                Ok(())
            }

            OpCode::SoftResetV1 => {
                // Peer-initiated rekey: mirror it with our own secondary.
                if self.secondary_index().is_none() {
                    self.spawn_slot(now)?;
                }
                Ok(())
            }

            _ => Err(ProtocolError::UnknownOpcode(ctrl.header.opcode as u8)),
        }
    }

    fn handle_data(
        &mut self,
        data_pkt: DataPacketData,
        now: Instant,
        out: &mut SessionOutput,
    ) -> Result<()> {
        let packet = crate::data::DataPacket {
            key_id: data_pkt.header.key_id,
            peer_id: data_pkt.peer_id,
            payload: data_pkt.payload,
        };

        let idx = match self.slot_index_for_key_id(packet.key_id) {
            Some(idx) => idx,
            None => return Ok(()), // KEY_NOT_FOUND: drop silently, per-slot recoverable
        };

        let plaintext = match self.slots[idx].decrypt(&packet) {
            Ok(p) => p,
            Err(_) => return Ok(()), // BAD_HMAC/REPLAY: drop silently
        };

        if crate::keepalive::is_exit_notify(&plaintext) {
            if self.terminal.is_none() {
                self.terminal = Some(Event::Disconnect);
                out.events.push(Event::Disconnect);
            }
            return Ok(());
        }

        if let Some(tracker) = &mut self.keepalive {
            if self.slots[idx].slot_role() == SlotRole::Primary {
                if crate::keepalive::is_ping(&plaintext) {
                    tracker.on_receive(now, 0);
                    return Ok(());
                }
                tracker.on_receive(now, plaintext.len());
            }
        }

        out.tunnelled.push(plaintext);
        Ok(())
    }

    /// Drive the TLS handshake and, once complete, the push exchange,
    /// for the slot at `idx`. Queues any outgoing control-channel
    /// fragments and application events produced along the way.
    fn drive_tls(&mut self, idx: usize, now: Instant, out: &mut SessionOutput) -> Result<()> {
        let was_complete = self.slots[idx].tls_mut().is_handshake_complete();

        while let Some(chunk) = self.slots[idx].tls_mut().pull_ciphertext()? {
            self.queue_control_fragment(idx, chunk, now, out)?;
        }

        let now_complete = self.slots[idx].tls_mut().is_handshake_complete();
        if now_complete && !was_complete {
            self.on_handshake_complete(idx, now, out)?;
        }

        if now_complete {
            // Drain any control-channel application data TLS has for us
            // (PUSH_REQUEST / PUSH_REPLY travel as plaintext over this
            // channel once the handshake is done).
            let mut buf = [0u8; 4096];
            loop {
                let n = self.slots[idx].tls_mut().read_plaintext(&mut buf)?;
                if n == 0 {
                    break;
                }
                self.on_control_plaintext(idx, &buf[..n], now, out)?;
            }
        }

        Ok(())
    }

    fn on_handshake_complete(&mut self, idx: usize, now: Instant, out: &mut SessionOutput) -> Result<()> {
        let material = self.slots[idx]
            .tls_mut()
            .export_keying_material(b"EXPORTER-OpenVPN-datakeys", None)?;
        let key_material = KeyMaterial {
            client_write_key: material[0..32].try_into().unwrap(),
            server_write_key: material[32..64].try_into().unwrap(),
            client_hmac_key: material[64..96].try_into().unwrap(),
            server_hmac_key: material[96..128].try_into().unwrap(),
        };
        self.slots[idx].install_keys(&key_material, now);

        if self.tls_endpoint.is_server() {
            // The server has nothing to request; it waits for the
            // client's PUSH_REQUEST before it replies.
        } else {
            let peer_info = crate::control::default_peer_info();
            let blob = format!("{}{}", crate::control::PEER_INFO_PREFIX, peer_info);
            self.queue_control_fragment(idx, Bytes::from(blob.into_bytes()), now, out)?;
            self.queue_control_fragment(idx, Bytes::from_static(b"PUSH_REQUEST"), now, out)?;
        }
        Ok(())
    }

    fn on_control_plaintext(
        &mut self,
        idx: usize,
        data: &[u8],
        now: Instant,
        out: &mut SessionOutput,
    ) -> Result<()> {
        let text = String::from_utf8_lossy(data).into_owned();

        if self.tls_endpoint.is_server() {
            if let Some(info) = text.strip_prefix(crate::control::PEER_INFO_PREFIX) {
                self.peer_info = Some(info.to_string());
                return Ok(());
            }
            if text.trim() == "PUSH_REQUEST" {
                let reply = crate::control::PushReply::default();
                let encoded = format!("PUSH_REPLY,{}", reply.encode());
                self.queue_control_fragment(idx, Bytes::from(encoded.into_bytes()), now, out)?;
                self.slots[idx].mark_push_complete();
                self.try_promote(idx, now, out);
            }
            return Ok(());
        }

        // Client-only directives, checked before the PUSH_REPLY path
        // since any of them can arrive instead of (or instead of
        // completing) the push exchange.
        if let Some(temp) = ovpncore_core::AuthFailedTemp::parse(&text) {
            self.slots[idx].set_auth_pending(false);
            let event = Event::AuthFailed {
                reason: temp.reason,
                backoff: temp.backoff,
                advance: temp.advance,
            };
            self.terminal = Some(event.clone());
            out.events.push(event);
            return Ok(());
        }
        if let Some(reason) = text.strip_prefix("AUTH_FAILED") {
            self.slots[idx].set_auth_pending(false);
            let reason = reason.trim_start_matches(',').trim_start_matches(':').trim().to_string();
            let event = Event::AuthFailed {
                reason,
                backoff: None,
                advance: None,
            };
            self.terminal = Some(event.clone());
            out.events.push(event);
            return Ok(());
        }
        if let Some(parsed) = ovpncore_core::AuthPendingMsg::parse(&text) {
            let cap = self.lifetime.renegotiate / 2;
            let timeout = parsed.timeout.min(cap);
            self.slots[idx].set_auth_pending(true);
            self.slots[idx].extend_handshake_deadline(now, timeout);
            out.events.push(Event::AuthPending {
                timeout,
                methods: parsed.methods,
            });
            return Ok(());
        }
        if let Some(reason) = text.strip_prefix("RESTART") {
            let reason = reason.trim_start_matches(':').trim().to_string();
            let event = Event::ClientRestart { reason };
            self.terminal = Some(event.clone());
            out.events.push(event);
            return Ok(());
        }
        if let Some(reason) = text.strip_prefix("HALT") {
            let reason = reason.trim_start_matches(':').trim().to_string();
            let event = Event::ClientHalt { reason };
            self.terminal = Some(event.clone());
            out.events.push(event);
            return Ok(());
        }
        if text.trim() == "RELAY" {
            if self.relay {
                let event = Event::RelayError {
                    reason: "duplicate RELAY directive".into(),
                };
                self.terminal = Some(event.clone());
                out.events.push(event);
            } else {
                self.relay = true;
                out.events.push(Event::Info { text: "RELAY".into() });
            }
            return Ok(());
        }

        if text.starts_with("PUSH_REPLY") {
            let assembler = self.push_assembler.get_or_insert_with(PushAssembler::new);
            let complete = assembler.feed(&text)?;
            if complete {
                let reply = assembler.finish(&self.push_filter)?;
                out.events.push(Event::Echo {
                    text: format!("pushed {} routes", reply.routes.len()),
                });
                self.push_reply = Some(reply);
                self.slots[idx].set_auth_pending(false);
                self.slots[idx].mark_push_complete();
                self.try_promote(idx, now, out);
                out.events.push(Event::Connected);
            }
        }
        Ok(())
    }

    fn try_promote(&mut self, idx: usize, now: Instant, out: &mut SessionOutput) {
        if !self.slots[idx].can_become_primary(now) {
            return;
        }
        if let Some(old_primary) = self.primary_index() {
            if old_primary == idx {
                return;
            }
            self.slots[old_primary].demote_to_lame_duck(now);
        }
        self.slots[idx].promote_to_primary();
        self.keepalive = Some(KeepaliveTracker::new(self.keepalive_config, now));
        out.events.push(Event::Connected);
    }

    fn queue_control_fragment(
        &mut self,
        idx: usize,
        data: Bytes,
        now: Instant,
        out: &mut SessionOutput,
    ) -> Result<()> {
        let (packet_id, payload) = self.slots[idx].reliable_mut().send(data, now)?;
        let acks = self.slots[idx].reliable_mut().get_acks();
        let packet = ControlPacketData {
            header: PacketHeader {
                opcode: OpCode::ControlV1,
                key_id: self.slots[idx].key_id(),
                session_id: Some(self.slots[idx].local_session_id()),
                hmac: None,
                packet_id: None,
                timestamp: None,
            },
            remote_session_id: self.slots[idx].peer_session_id(),
            acks,
            message_packet_id: Some(packet_id),
            payload,
        };
        let serialized = Packet::Control(packet).serialize();
        out.send.push(self.control_wrap.wrap(&serialized));
        Ok(())
    }

    fn flush_acks(&mut self, idx: usize, now: Instant, out: &mut SessionOutput) {
        let acks = self.slots[idx].reliable_mut().get_acks();
        if acks.is_empty() {
            return;
        }
        let ack = ControlPacketData {
            header: PacketHeader {
                opcode: OpCode::AckV1,
                key_id: self.slots[idx].key_id(),
                session_id: Some(self.slots[idx].local_session_id()),
                hmac: None,
                packet_id: None,
                timestamp: None,
            },
            remote_session_id: self.slots[idx].peer_session_id(),
            acks,
            message_packet_id: None,
            payload: Bytes::new(),
        };
        self.slots[idx].reliable_mut().ack_sent(now);
        out.send.push(self.control_wrap.wrap(&Packet::Control(ack).serialize()));
    }

    /// Encrypt a tunnelled IP packet for transmission over the primary
    /// data channel.
    pub fn encrypt_outbound(&mut self, plaintext: &[u8], now: Instant) -> Result<Bytes> {
        let idx = self.primary_index().ok_or(ProtocolError::NotReady)?;
        let wire = self.slots[idx].encrypt(plaintext)?;
        if let Some(tracker) = &mut self.keepalive {
            tracker.on_send(now);
        }
        Ok(wire)
    }

    /// Clean shutdown: send an explicit-exit-notify over the primary data
    /// channel (if one exists), mark the session terminal, and drop every
    /// slot -- releasing their data-channel and TLS key material, which
    /// zeroises on drop.
    pub fn stop(&mut self) -> SessionOutput {
        let mut out = SessionOutput::default();
        if self.terminal.is_some() {
            self.slots.clear();
            return out;
        }

        if let Some(idx) = self.primary_index() {
            if let Ok(wire) = self.slots[idx].encrypt(&KeepaliveTracker::exit_notify_payload()) {
                out.send.push(wire);
            }
        }

        self.terminal = Some(Event::Disconnect);
        out.events.push(Event::Disconnect);
        self.slots.clear();
        out
    }

    /// Run all time-based transitions: control-channel retransmits,
    /// handshake-window expiry, promotion, renegotiation, slot expiry,
    /// and keepalive. Call whenever `now` reaches the time implied by
    /// the most recent return, or at least once a second.
    pub fn housekeeping(&mut self, now: Instant) -> SessionOutput {
        let mut out = SessionOutput::default();
        if self.terminal.is_some() {
            return out;
        }

        for idx in 0..self.slots.len() {
            for (id, data) in self.slots[idx].reliable_mut().get_retransmits(now) {
                let acks = self.slots[idx].reliable_mut().get_acks();
                let packet = ControlPacketData {
                    header: PacketHeader {
                        opcode: OpCode::ControlV1,
                        key_id: self.slots[idx].key_id(),
                        session_id: Some(self.slots[idx].local_session_id()),
                        hmac: None,
                        packet_id: None,
                        timestamp: None,
                    },
                    remote_session_id: self.slots[idx].peer_session_id(),
                    acks,
                    message_packet_id: Some(id),
                    payload: data,
                };
                out.send
                    .push(self.control_wrap.wrap(&Packet::Control(packet).serialize()));
            }

            if self.slots[idx].reliable_mut().has_excess_retry() {
                self.slots[idx].fail();
            }

            if self.slots[idx].handshake_window_expired(now) {
                self.slots[idx].fail();
                if self.slots[idx].slot_role() != SlotRole::LameDuck && self.primary_index().is_none() {
                    self.terminal = Some(Event::TransportError {
                        reason: "handshake window expired".into(),
                    });
                }
            }

            if self.slots[idx].state() == HandshakeState::Active {
                self.try_promote(idx, now, &mut out);
            }

            if self.slots[idx].slot_role() == SlotRole::Primary && self.slots[idx].should_renegotiate(now)
            {
                if self.slots[idx].is_auth_pending() {
                    // A rekey trigger during an outstanding out-of-band
                    // auth aborts that auth and fails this slot rather
                    // than racing a second handshake alongside it.
                    self.slots[idx].fail();
                } else if self.secondary_index().is_none() {
                    let _ = self.spawn_slot(now);
                }
            }
        }

        self.slots.retain(|s| !s.should_expire(now));

        if let Some(tracker) = &mut self.keepalive {
            match tracker.check(now) {
                KeepaliveEvent::Idle => {}
                KeepaliveEvent::SendPing => {
                    if let Some(idx) = self.primary_index() {
                        if let Ok(wire) = self.slots[idx].encrypt(&KeepaliveTracker::ping_payload()) {
                            out.send.push(wire);
                            tracker.on_send(now);
                        }
                    }
                }
                KeepaliveEvent::Timeout => {
                    self.terminal = Some(Event::KeepaliveTimeout);
                }
                KeepaliveEvent::Inactive => {
                    if let Some(idx) = self.primary_index() {
                        if let Ok(wire) =
                            self.slots[idx].encrypt(&KeepaliveTracker::exit_notify_payload())
                        {
                            out.send.push(wire);
                        }
                    }
                    self.terminal = Some(Event::InactiveTimeout);
                }
            }
        }

        if let Some(event) = self.terminal.clone() {
            out.events.push(event);
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_fixture_cert() -> (
        rustls::pki_types::CertificateDer<'static>,
        rustls::pki_types::PrivateKeyDer<'static>,
    ) {
        let rcgen::CertifiedKey { cert, signing_key } =
            rcgen::generate_simple_self_signed(vec!["test.local".to_string()]).unwrap();
        let cert_der = rustls::pki_types::CertificateDer::from(cert.der().to_vec());
        let key_der = rustls::pki_types::PrivateKeyDer::Pkcs8(
            rustls::pki_types::PrivatePkcs8KeyDer::from(signing_key.serialize_der()),
        );
        (cert_der, key_der)
    }

    fn make_server() -> Session {
        let (cert, key) = test_fixture_cert();
        let config = crate::tls::create_server_config(vec![cert], key, None).unwrap();
        Session::new_server(
            config,
            CipherSuite::ChaCha20Poly1305,
            LifetimeConfig::default(),
            ReliableConfig::default(),
            ControlWrap::Plain,
            KeepaliveConfig::default(),
            PushFilter::default(),
        )
    }

    #[test]
    fn test_server_accepts_hard_reset() {
        let mut server = make_server();
        let now = Instant::now();

        let hard_reset = ControlPacketData {
            header: PacketHeader {
                opcode: OpCode::HardResetClientV2,
                key_id: KeyId::new(0),
                session_id: Some([1; 8]),
                hmac: None,
                packet_id: None,
                timestamp: None,
            },
            remote_session_id: None,
            acks: vec![],
            message_packet_id: None,
            payload: Bytes::new(),
        };
        let wire = Packet::Control(hard_reset).serialize();

        let out = server.handle_incoming(&wire, now).unwrap();
        assert_eq!(out.send.len(), 1);
        assert_eq!(server.slots.len(), 1);
        assert_eq!(server.slots[0].state(), HandshakeState::SWaitResetAck);
    }

    #[test]
    fn test_tls_crypt_v2_bootstrap_resolves_client_key() {
        let server_key = TlsCryptKey::new([0x11; 32], [0x22; 32]);
        let client_key = TlsCryptKey::new([0x33; 32], [0x44; 32]);
        let wkc = WrappedClientKey::wrap(&server_key, &client_key, b"");

        let mut server = make_server();
        server.control_wrap = ControlWrap::TlsCryptV2Server(server_key);

        let mut client = Session::new(
            TlsEndpoint::Client(
                crate::tls::create_client_config(Arc::new(danger::AcceptAny), None).unwrap(),
                ServerName::try_from("test.local").unwrap(),
            ),
            CipherSuite::ChaCha20Poly1305,
            LifetimeConfig::default(),
            ReliableConfig::default(),
            ControlWrap::TlsCrypt(client_key),
            KeepaliveConfig::default(),
            PushFilter::default(),
        )
        .with_wrapped_client_key(Bytes::from(wkc));

        let now = Instant::now();
        let wire = client.start(now).unwrap();

        // The op-byte must stay in the clear so the server can recognize
        // the bootstrap packet before it knows which key unwraps the rest.
        assert_eq!(wire[0], OpCode::HardResetClientV3.to_byte(KeyId::new(0)));

        let out = server.handle_incoming(&wire, now).unwrap();
        assert_eq!(server.slots.len(), 1);
        assert!(matches!(server.control_wrap, ControlWrap::TlsCrypt(_)));
        assert_eq!(out.send.len(), 1);
    }

    #[test]
    fn test_client_start_emits_hard_reset() {
        let (cert, key) = test_fixture_cert();
        let config = crate::tls::create_server_config(vec![cert], key, None).unwrap();
        let client_config = crate::tls::create_client_config(
            Arc::new(danger::AcceptAny),
            None,
        )
        .unwrap();
        let _ = config; // server config unused in this client-only test
        let server_name = ServerName::try_from("test.local").unwrap();

        let mut client = Session::new_client(
            client_config,
            server_name,
            CipherSuite::ChaCha20Poly1305,
            LifetimeConfig::default(),
            ReliableConfig::default(),
            ControlWrap::Plain,
            KeepaliveConfig::default(),
            PushFilter::default(),
        );

        let now = Instant::now();
        let wire = client.start(now).unwrap();
        let packet = Packet::parse(&wire, false).unwrap();
        assert_eq!(packet.opcode(), OpCode::HardResetClientV2);
    }

    #[test]
    fn test_unparseable_packet_dropped_not_errored() {
        let mut server = make_server();
        let out = server.handle_incoming(&[], Instant::now()).unwrap();
        assert!(out.send.is_empty());
        assert!(out.events.is_empty());
    }

    #[test]
    fn test_housekeeping_without_slots_is_noop() {
        let mut server = make_server();
        let out = server.housekeeping(Instant::now() + Duration::from_secs(120));
        assert!(out.send.is_empty());
        assert!(out.events.is_empty());
    }

    fn make_client() -> Session {
        let client_config =
            crate::tls::create_client_config(Arc::new(danger::AcceptAny), None).unwrap();
        let server_name = ServerName::try_from("test.local").unwrap();
        Session::new_client(
            client_config,
            server_name,
            CipherSuite::ChaCha20Poly1305,
            LifetimeConfig::default(),
            ReliableConfig::default(),
            ControlWrap::Plain,
            KeepaliveConfig::default(),
            PushFilter::default(),
        )
    }

    #[test]
    fn test_auth_failed_plain_sets_terminal_event() {
        let mut client = make_client();
        let now = Instant::now();
        client.start(now).unwrap();
        let mut out = SessionOutput::default();

        client
            .on_control_plaintext(0, b"AUTH_FAILED:bad credentials", now, &mut out)
            .unwrap();

        match client.terminal() {
            Some(Event::AuthFailed { reason, backoff, advance }) => {
                assert_eq!(reason, "bad credentials");
                assert_eq!(*backoff, None);
                assert_eq!(*advance, None);
            }
            other => panic!("expected AuthFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_auth_failed_temp_carries_backoff_and_advance() {
        let mut client = make_client();
        let now = Instant::now();
        client.start(now).unwrap();
        let mut out = SessionOutput::default();

        client
            .on_control_plaintext(
                0,
                b"AUTH_FAILED,TEMP[backoff=30,advance=remote]:server full",
                now,
                &mut out,
            )
            .unwrap();

        match client.terminal() {
            Some(Event::AuthFailed { reason, backoff, advance }) => {
                assert_eq!(reason, "server full");
                assert_eq!(*backoff, Some(Duration::from_secs(30)));
                assert_eq!(*advance, Some(ovpncore_core::AdvanceMode::Remote));
            }
            other => panic!("expected AuthFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_auth_pending_sets_flag_and_extends_deadline() {
        let mut client = make_client();
        let now = Instant::now();
        client.start(now).unwrap();
        let mut out = SessionOutput::default();

        client
            .on_control_plaintext(0, b"AUTH_PENDING,timeout=30,webauth", now, &mut out)
            .unwrap();

        assert!(client.slots[0].is_auth_pending());
        assert!(client.terminal().is_none());
        assert!(matches!(out.events[0], Event::AuthPending { .. }));
    }

    #[test]
    fn test_relay_directive_sets_flag_then_duplicate_is_fatal() {
        let mut client = make_client();
        let now = Instant::now();
        client.start(now).unwrap();
        let mut out = SessionOutput::default();

        client.on_control_plaintext(0, b"RELAY", now, &mut out).unwrap();
        assert!(client.is_relay());
        assert!(client.terminal().is_none());

        let mut out2 = SessionOutput::default();
        client.on_control_plaintext(0, b"RELAY", now, &mut out2).unwrap();
        assert!(matches!(client.terminal(), Some(Event::RelayError { .. })));
    }

    #[test]
    fn test_stop_without_primary_is_still_terminal() {
        let mut server = make_server();
        let out = server.stop();
        assert!(out.send.is_empty());
        assert_eq!(out.events, vec![Event::Disconnect]);
        assert_eq!(server.terminal(), Some(&Event::Disconnect));
    }

    mod danger {
        use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
        use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
        use rustls::DigitallySignedStruct;

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
            ) -> std::result::Result<ServerCertVerified, rustls::Error> {
                Ok(ServerCertVerified::assertion())
            }

            fn verify_tls12_signature(
                &self,
                _message: &[u8],
                _cert: &CertificateDer<'_>,
                _dss: &DigitallySignedStruct,
            ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
                Ok(HandshakeSignatureValid::assertion())
            }

            fn verify_tls13_signature(
                &self,
                _message: &[u8],
                _cert: &CertificateDer<'_>,
                _dss: &DigitallySignedStruct,
            ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
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
    }
}
