//! Key-exchange state machine (one instance per keying epoch).
//!
//! A `KeyState` is the unit the `Session` multiplexer (C9) schedules and
//! dispatches into: it owns one control-channel reliability pair, one TLS
//! session, and -- once the handshake completes -- one data-channel codec.
//! Up to three coexist in a `Session`: at most one `Primary`, at most one
//! `Secondary` (a handshake in progress for the next epoch), and at most
//! one `LameDuck` (the previous primary, retained briefly to decrypt
//! in-flight data during the crossover).

use std::time::{Duration, Instant};

use bytes::Bytes;

use ovpncore_crypto::{CipherSuite, DataChannelKey, DataLimit, DataLimitStatus, KeyMaterial};

use crate::data::DataChannel;
use crate::opcode::KeyId;
use crate::reliable::{ReliableConfig, ReliableTransport, TlsRecordReassembler};
use crate::tls::TlsHandler;
use crate::{ProtocolError, Result};

/// 8-byte OpenVPN session identifier.
pub type SessionIdBytes = [u8; 8];

/// Handshake state of one `KeyState`, matching spec §4.8's diagram names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Freshly created, nothing sent or received yet.
    Initial,
    /// Client: sent HARD_RESET_CLIENT, awaiting HARD_RESET_SERVER.
    CWaitReset,
    /// Server: awaiting HARD_RESET_CLIENT.
    SWaitReset,
    /// Client: received HARD_RESET_SERVER, awaiting ACK of its own reset.
    CWaitResetAck,
    /// Server: sent HARD_RESET_SERVER, awaiting ACK of its own reset.
    SWaitResetAck,
    /// Reset handshake acked both ways; TLS handshake running.
    WaitAuth,
    /// TLS handshake done and data keys derived; push exchange running.
    GotKey,
    /// Push exchange complete; this slot may become PRIMARY.
    Active,
    /// Terminal: this slot failed and must not be used further.
    Failed,
}

/// This slot's role among the up to three coexisting in a `Session`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRole {
    /// Currently chosen for data-channel transmit.
    Primary,
    /// A newer handshake in progress for the next epoch.
    Secondary,
    /// The previous primary, retained briefly for in-flight data.
    LameDuck,
}

/// Lifetime bounds for one keying epoch, measured from its creation time.
/// Per the data-model invariant, `expire >= renegotiate >= become_primary`.
#[derive(Debug, Clone, Copy)]
pub struct LifetimeConfig {
    /// How long the initial handshake has to complete before
    /// `HANDSHAKE_WINDOW_EXPIRED`.
    pub handshake_window: Duration,
    /// Minimum time after GOT_KEY before this slot may be promoted to
    /// PRIMARY (prevents a server promoting before the client ACKs its
    /// HARD_RESET_SERVER, avoiding UDP amplification).
    pub become_primary: Duration,
    /// Time after creation at which a rekey should be triggered.
    pub renegotiate: Duration,
    /// Time after creation at which this slot must be destroyed.
    pub expire: Duration,
}

impl Default for LifetimeConfig {
    fn default() -> Self {
        Self {
            handshake_window: Duration::from_secs(60),
            become_primary: Duration::from_secs(1),
            renegotiate: Duration::from_secs(3600),
            expire: Duration::from_secs(3600 + 300),
        }
    }
}

impl LifetimeConfig {
    /// Validate the data-model ordering invariant against a given
    /// creation time; used when constructing a `KeyState`.
    pub fn is_well_ordered(&self) -> bool {
        self.expire >= self.renegotiate && self.renegotiate >= self.become_primary
    }

    /// Lame-duck retention duration once a slot is demoted:
    /// `min(expire - become_primary, 60s)`.
    pub fn lame_duck_retention(&self) -> Duration {
        self.expire
            .saturating_sub(self.become_primary)
            .min(Duration::from_secs(60))
    }
}

/// One keying epoch: handshake state, control-channel reliability, TLS
/// session, and (once derived) data-channel keys.
pub struct KeyState {
    key_id: KeyId,
    slot_role: SlotRole,
    state: HandshakeState,
    is_server: bool,
    local_session_id: SessionIdBytes,
    peer_session_id: Option<SessionIdBytes>,
    reliable: ReliableTransport,
    tls_reassembler: TlsRecordReassembler,
    tls: TlsHandler,
    data_channel: Option<DataChannel>,
    cipher_suite: CipherSuite,
    peer_id: Option<u32>,

    created_at: Instant,
    handshake_deadline: Instant,
    lifetime: LifetimeConfig,
    /// Set once this slot reaches `GotKey`; `become_primary_at`,
    /// `renegotiate_at` and `expire_at` are computed relative to it.
    got_key_at: Option<Instant>,
    demoted_at: Option<Instant>,

    /// Set when the client ACKs our HARD_RESET_SERVER (server only); a
    /// server must not promote to PRIMARY before this, per §4.8.
    reset_acked: bool,

    /// Client only: set while an `AUTH_PENDING` out-of-band auth is
    /// outstanding on this slot.
    auth_pending: bool,
}

impl KeyState {
    /// Create a freshly initialized slot.
    pub fn new(
        key_id: KeyId,
        slot_role: SlotRole,
        is_server: bool,
        local_session_id: SessionIdBytes,
        tls: TlsHandler,
        cipher_suite: CipherSuite,
        lifetime: LifetimeConfig,
        reliable_config: ReliableConfig,
        now: Instant,
    ) -> Self {
        assert!(
            lifetime.is_well_ordered(),
            "KeyState lifetime bounds must satisfy expire >= renegotiate >= become_primary"
        );
        Self {
            key_id,
            slot_role,
            state: HandshakeState::Initial,
            is_server,
            local_session_id,
            peer_session_id: None,
            reliable: ReliableTransport::new(reliable_config),
            tls_reassembler: TlsRecordReassembler::new(65536),
            tls,
            data_channel: None,
            cipher_suite,
            peer_id: None,
            created_at: now,
            handshake_deadline: now + lifetime.handshake_window,
            lifetime,
            got_key_at: None,
            demoted_at: None,
            reset_acked: false,
            auth_pending: false,
        }
    }

    /// This slot's key-id (3-bit, wire-visible).
    pub fn key_id(&self) -> KeyId {
        self.key_id
    }

    /// Current slot role.
    pub fn slot_role(&self) -> SlotRole {
        self.slot_role
    }

    /// Current handshake state.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Local session-id, immutable for the life of this slot.
    pub fn local_session_id(&self) -> SessionIdBytes {
        self.local_session_id
    }

    /// Peer session-id, once learned from the first HARD_RESET.
    pub fn peer_session_id(&self) -> Option<SessionIdBytes> {
        self.peer_session_id
    }

    /// Mutable access to the control-channel reliability layer.
    pub fn reliable_mut(&mut self) -> &mut ReliableTransport {
        &mut self.reliable
    }

    /// Mutable access to the TLS record reassembler.
    pub fn tls_reassembler_mut(&mut self) -> &mut TlsRecordReassembler {
        &mut self.tls_reassembler
    }

    /// Mutable access to the TLS handler.
    pub fn tls_mut(&mut self) -> &mut TlsHandler {
        &mut self.tls
    }

    /// Whether this slot has a data channel installed and ready to use.
    pub fn has_data_channel(&self) -> bool {
        self.data_channel.is_some()
    }

    /// Mutable access to the data channel, if installed.
    pub fn data_channel_mut(&mut self) -> Option<&mut DataChannel> {
        self.data_channel.as_mut()
    }

    /// Learn or verify the peer's session-id. Per the data-model
    /// invariant, a mismatch on an already-learned id is fatal.
    pub fn observe_peer_session_id(&mut self, id: SessionIdBytes) -> Result<()> {
        match self.peer_session_id {
            None => {
                self.peer_session_id = Some(id);
                Ok(())
            }
            Some(existing) if existing == id => Ok(()),
            Some(_) => Err(ProtocolError::SessionIdMismatch),
        }
    }

    /// Record the client-originated HARD_RESET and move to the
    /// post-reset-ack state, learning the peer session-id if this is the
    /// first one seen.
    pub fn on_hard_reset_client(&mut self, peer_session_id: SessionIdBytes) -> Result<()> {
        self.observe_peer_session_id(peer_session_id)?;
        self.state = if self.is_server {
            HandshakeState::SWaitResetAck
        } else {
            // A client receiving its own HARD_RESET_CLIENT echoed back is
            // a retransmit of a race; ignore at the state level.
            self.state
        };
        Ok(())
    }

    /// Record the server-originated HARD_RESET (client only) and move to
    /// awaiting-ack-of-our-own-reset.
    pub fn on_hard_reset_server(&mut self, peer_session_id: SessionIdBytes) -> Result<()> {
        if self.is_server {
            return Ok(()); // server never receives its own opcode kind
        }
        self.observe_peer_session_id(peer_session_id)?;
        self.state = HandshakeState::CWaitResetAck;
        Ok(())
    }

    /// The client has sent its initial HARD_RESET_CLIENT.
    pub fn on_send_hard_reset_client(&mut self) {
        self.state = HandshakeState::CWaitReset;
    }

    /// The server has sent its HARD_RESET_SERVER in response.
    pub fn on_send_hard_reset_server(&mut self) {
        self.state = HandshakeState::SWaitResetAck;
    }

    /// Our own HARD_RESET has been ACKed by the peer: the reset handshake
    /// is complete and the TLS handshake may begin.
    pub fn on_reset_acked(&mut self) {
        if matches!(
            self.state,
            HandshakeState::CWaitResetAck | HandshakeState::SWaitResetAck
        ) {
            self.state = HandshakeState::WaitAuth;
        }
        if self.is_server {
            self.reset_acked = true;
        }
    }

    /// TLS handshake has completed and keying material has been derived;
    /// install the data-channel keys for this slot.
    pub fn install_keys(&mut self, key_material: &KeyMaterial, now: Instant) {
        let idx_is_server = self.is_server;
        let (encrypt_key, decrypt_key) = if idx_is_server {
            (
                key_material.server_data_key(self.cipher_suite),
                key_material.client_data_key(self.cipher_suite),
            )
        } else {
            (
                key_material.client_data_key(self.cipher_suite),
                key_material.server_data_key(self.cipher_suite),
            )
        };
        self.install_keys_with_limit(encrypt_key, decrypt_key, DataLimit::unlimited(), now);
    }

    /// As [`KeyState::install_keys`], but with an explicit data-limit
    /// policy (used for the legacy CBC data-channel mode).
    pub fn install_keys_with_limit(
        &mut self,
        encrypt_key: DataChannelKey,
        decrypt_key: DataChannelKey,
        data_limit: DataLimit,
        now: Instant,
    ) {
        self.data_channel = Some(DataChannel::with_data_limit(
            self.key_id,
            encrypt_key,
            decrypt_key,
            true,
            self.peer_id,
            data_limit,
        ));
        self.state = HandshakeState::GotKey;
        self.got_key_at = Some(now);
    }

    /// Set the negotiated peer-id (v2 data packets only).
    pub fn set_peer_id(&mut self, peer_id: u32) {
        self.peer_id = Some(peer_id);
    }

    /// The post-handshake option push exchange (`PUSH_REQUEST`/
    /// `PUSH_REPLY`) has completed; this slot may now be considered for
    /// promotion to PRIMARY once `become_primary_at` elapses.
    pub fn mark_push_complete(&mut self) {
        if self.state == HandshakeState::GotKey {
            self.state = HandshakeState::Active;
        }
    }

    /// Whether this slot is eligible for promotion to PRIMARY right now:
    /// active, `become_primary_at` has elapsed, and (for a server) the
    /// client has ACKed our HARD_RESET_SERVER.
    pub fn can_become_primary(&self, now: Instant) -> bool {
        if self.state != HandshakeState::Active {
            return false;
        }
        if self.is_server && !self.reset_acked {
            return false;
        }
        match self.got_key_at {
            Some(t) => now >= t + self.lifetime.become_primary,
            None => false,
        }
    }

    /// Demote this (formerly primary) slot to lame-duck, recording the
    /// demotion time so its retention window can be enforced.
    pub fn demote_to_lame_duck(&mut self, now: Instant) {
        self.slot_role = SlotRole::LameDuck;
        self.demoted_at = Some(now);
    }

    /// Promote this slot to PRIMARY.
    pub fn promote_to_primary(&mut self) {
        self.slot_role = SlotRole::Primary;
    }

    /// Whether the initial handshake window has expired without reaching
    /// `Active`.
    pub fn handshake_window_expired(&self, now: Instant) -> bool {
        !matches!(self.state, HandshakeState::Active | HandshakeState::Failed)
            && now >= self.handshake_deadline
    }

    /// Set or clear the outstanding-out-of-band-auth flag for this slot.
    pub fn set_auth_pending(&mut self, pending: bool) {
        self.auth_pending = pending;
    }

    /// Whether an `AUTH_PENDING` out-of-band auth is outstanding.
    pub fn is_auth_pending(&self) -> bool {
        self.auth_pending
    }

    /// Push `handshake_deadline` out to at least `now + by`, used to
    /// extend the handshake timer for an `AUTH_PENDING` suspend (capped
    /// by the caller at half the renegotiate interval, per §4.8).
    pub fn extend_handshake_deadline(&mut self, now: Instant, by: Duration) {
        self.handshake_deadline = self.handshake_deadline.max(now + by);
    }

    /// Whether a rekey should be triggered: either the time-based
    /// renegotiate deadline has elapsed, or the data channel has crossed
    /// its configured soft data limit.
    pub fn should_renegotiate(&self, now: Instant) -> bool {
        if now >= self.created_at + self.lifetime.renegotiate {
            return true;
        }
        matches!(
            self.data_channel.as_ref().map(|c| c.data_limit_status()),
            Some(DataLimitStatus::SoftExceeded)
        )
    }

    /// Whether this slot's hard expiry has passed (for a lame-duck slot,
    /// its retention window substitutes for the full expiry).
    pub fn should_expire(&self, now: Instant) -> bool {
        if self.state == HandshakeState::Failed {
            return true;
        }
        if self.slot_role == SlotRole::LameDuck {
            if let Some(demoted_at) = self.demoted_at {
                return now >= demoted_at + self.lifetime.lame_duck_retention();
            }
        }
        now >= self.created_at + self.lifetime.expire
            || self
                .data_channel
                .as_ref()
                .map(|c| c.hard_limit_exceeded())
                .unwrap_or(false)
    }

    /// Mark this slot permanently failed (fatal per-slot error).
    pub fn fail(&mut self) {
        self.state = HandshakeState::Failed;
    }

    /// Encrypt a tunnelled IP packet for transmission using this slot's
    /// data channel. Fails with `NotReady` if no data channel is
    /// installed yet, matching the C4 contract.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Bytes> {
        let channel = self.data_channel.as_mut().ok_or(ProtocolError::NotReady)?;
        Ok(channel.encrypt(plaintext)?.serialize().freeze())
    }

    /// Decrypt a data-channel packet belonging to this slot. Allowed even
    /// when this slot is a lame-duck (for in-flight data), but the caller
    /// should not extend this slot's lifetime/ACK on that basis.
    pub fn decrypt(&mut self, packet: &crate::data::DataPacket) -> Result<Bytes> {
        let channel = self.data_channel.as_mut().ok_or(ProtocolError::NotReady)?;
        channel.decrypt(packet)
    }
}
