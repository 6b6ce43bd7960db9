//! Symmetric cipher implementations for data channel encryption
//!
//! Supports ChaCha20-Poly1305 (preferred) and AES-256-GCM (fallback).
//! Both provide authenticated encryption with associated data (AEAD).
//!
//! # Performance Optimizations
//! - Cipher instances are cached in PacketCipher
//! - Counter-based nonces avoid RNG syscalls
//! - Pre-allocated output buffers reduce allocations
//! - Inlined hot paths for better performance

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use aes_gcm::{Aes256Gcm, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, aead::AeadCore};
use zeroize::ZeroizeOnDrop;
use serde::{Serialize, Deserialize};

use crate::hmac_auth::HmacDigest;
use crate::{CryptoError, Result};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Supported cipher suites
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CipherSuite {
    /// ChaCha20-Poly1305 - preferred for software implementations
    #[default]
    ChaCha20Poly1305,
    /// AES-256-GCM - hardware accelerated on modern CPUs
    Aes256Gcm,
}

impl CipherSuite {
    /// Key size in bytes (256 bits for both suites)
    pub const KEY_SIZE: usize = 32;
    /// Nonce size in bytes (96 bits for both suites)
    pub const NONCE_SIZE: usize = 12;
    /// Authentication tag size in bytes (128 bits for both suites)
    pub const TAG_SIZE: usize = 16;

    /// Get the key size for this cipher suite
    #[inline(always)]
    pub const fn key_size(&self) -> usize {
        Self::KEY_SIZE
    }

    /// Get the nonce size for this cipher suite
    #[inline(always)]
    pub const fn nonce_size(&self) -> usize {
        Self::NONCE_SIZE
    }

    /// Get the tag size for this cipher suite
    #[inline(always)]
    pub const fn tag_size(&self) -> usize {
        Self::TAG_SIZE
    }
}

/// Data channel encryption key with secure memory handling
pub struct DataChannelKey {
    key: [u8; 32],
    cipher_suite: CipherSuite,
}

impl DataChannelKey {
    /// Create a new data channel key
    pub fn new(key: [u8; 32], cipher_suite: CipherSuite) -> Self {
        Self { key, cipher_suite }
    }

    /// Get the cipher suite
    pub fn cipher_suite(&self) -> CipherSuite {
        self.cipher_suite
    }

    /// Create a cipher instance
    pub fn cipher(&self) -> Cipher {
        Cipher::new(&self.key, self.cipher_suite)
    }
}

impl Drop for DataChannelKey {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.key.zeroize();
    }
}

impl ZeroizeOnDrop for DataChannelKey {}

/// AEAD cipher for encrypting/decrypting data channel packets
pub struct Cipher {
    inner: CipherInner,
    suite: CipherSuite,
}

enum CipherInner {
    ChaCha(ChaCha20Poly1305),
    Aes(Box<Aes256Gcm>),
}

impl Cipher {
    /// Create a new cipher instance
    #[inline]
    pub fn new(key: &[u8; 32], suite: CipherSuite) -> Self {
        let inner = match suite {
            CipherSuite::ChaCha20Poly1305 => {
                CipherInner::ChaCha(ChaCha20Poly1305::new(key.into()))
            }
            CipherSuite::Aes256Gcm => {
                CipherInner::Aes(Box::new(Aes256Gcm::new(key.into())))
            }
        };
        Self { inner, suite }
    }

    /// Encrypt plaintext with associated data
    ///
    /// Returns ciphertext with authentication tag appended.
    #[inline]
    pub fn encrypt(&self, nonce: &[u8; 12], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        use chacha20poly1305::aead::Aead;
        use aes_gcm::aead::Payload;

        let payload = Payload { msg: plaintext, aad };

        match &self.inner {
            CipherInner::ChaCha(cipher) => {
                cipher.encrypt(nonce.into(), payload)
                    .map_err(|_| CryptoError::EncryptionFailed("ChaCha20-Poly1305 encryption failed"))
            }
            CipherInner::Aes(cipher) => {
                cipher.encrypt(nonce.into(), payload)
                    .map_err(|_| CryptoError::EncryptionFailed("AES-256-GCM encryption failed"))
            }
        }
    }

    /// Encrypt plaintext into pre-allocated buffer
    ///
    /// Returns the number of bytes written.
    /// Buffer must have capacity for plaintext + TAG_SIZE bytes.
    #[inline]
    pub fn encrypt_into(&self, nonce: &[u8; 12], plaintext: &[u8], aad: &[u8], out: &mut Vec<u8>) -> Result<usize> {
        use chacha20poly1305::aead::Aead;
        use aes_gcm::aead::Payload;

        let payload = Payload { msg: plaintext, aad };
        let start_len = out.len();

        let ciphertext = match &self.inner {
            CipherInner::ChaCha(cipher) => {
                cipher.encrypt(nonce.into(), payload)
                    .map_err(|_| CryptoError::EncryptionFailed("ChaCha20-Poly1305 encryption failed"))?
            }
            CipherInner::Aes(cipher) => {
                cipher.encrypt(nonce.into(), payload)
                    .map_err(|_| CryptoError::EncryptionFailed("AES-256-GCM encryption failed"))?
            }
        };

        out.extend_from_slice(&ciphertext);
        Ok(out.len() - start_len)
    }

    /// Decrypt ciphertext with associated data
    ///
    /// Verifies authentication tag and returns plaintext.
    #[inline]
    pub fn decrypt(&self, nonce: &[u8; 12], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        use chacha20poly1305::aead::Aead;
        use aes_gcm::aead::Payload;

        let payload = Payload { msg: ciphertext, aad };

        match &self.inner {
            CipherInner::ChaCha(cipher) => {
                cipher.decrypt(nonce.into(), payload)
                    .map_err(|_| CryptoError::DecryptionFailed)
            }
            CipherInner::Aes(cipher) => {
                cipher.decrypt(nonce.into(), payload)
                    .map_err(|_| CryptoError::DecryptionFailed)
            }
        }
    }

    /// Generate a random nonce using OsRng
    ///
    /// Note: For high-throughput scenarios, consider using counter-based nonces
    /// via PacketCipher which avoids syscall overhead.
    #[inline]
    pub fn generate_nonce(&self) -> [u8; 12] {
        match &self.inner {
            CipherInner::ChaCha(_) => {
                ChaCha20Poly1305::generate_nonce(&mut rand::rngs::OsRng).into()
            }
            CipherInner::Aes(_) => {
                Aes256Gcm::generate_nonce(&mut rand::rngs::OsRng).into()
            }
        }
    }

    /// Get the cipher suite
    #[inline(always)]
    pub fn suite(&self) -> CipherSuite {
        self.suite
    }
}

/// Tracks bytes processed under one key so 64-bit-block ciphers (the legacy
/// CBC-with-HMAC mode) can be rekeyed before a birthday-bound collision
/// becomes likely. AEAD suites in this crate use a 128-bit block and don't
/// need this, but the counter is harmless to keep for them too.
#[derive(Debug, Clone, Copy)]
pub struct DataLimit {
    /// Schedule a rekey once this many bytes have been processed.
    pub soft_limit: Option<u64>,
    /// Refuse to encrypt/decrypt once this many bytes have been processed.
    pub hard_limit: Option<u64>,
}

impl Default for DataLimit {
    fn default() -> Self {
        Self {
            soft_limit: None,
            hard_limit: None,
        }
    }
}

impl DataLimit {
    /// No limit enforced (AEAD suites with a 128-bit block).
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// The conventional OpenVPN default for 64-bit block ciphers: soft
    /// limit at 2^20 * block_size for rekey scheduling, hard limit at
    /// 2^20 * 2^17 * block_size as an absolute cutoff. Expressed here
    /// directly in bytes for an 8-byte block cipher.
    pub fn legacy_64bit_block() -> Self {
        const BLOCK_SIZE: u64 = 8;
        Self {
            soft_limit: Some((1u64 << 16) * BLOCK_SIZE),
            hard_limit: Some((1u64 << 20) * BLOCK_SIZE),
        }
    }
}

/// Outcome of a data-limit check after processing a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataLimitStatus {
    /// Well under any configured limit.
    Ok,
    /// Soft limit crossed: the caller should schedule an immediate rekey
    /// but may keep using this key until the new one is active.
    SoftExceeded,
}

/// Packet encryptor with automatic nonce management and replay protection
///
/// # Performance
/// - Uses counter-based nonces (no RNG syscalls)
/// - Caches cipher instance for reuse
/// - Pre-allocates output buffers with known capacity
pub struct PacketCipher {
    cipher: Cipher,
    /// Outgoing packet counter (used as nonce)
    tx_counter: u64,
    /// Replay protection window
    rx_window: ReplayWindow,
    /// Data-limit policy for this key (only meaningful for legacy CBC).
    data_limit: DataLimit,
    /// Bytes encrypted (tx) or decrypted (rx) under this key so far.
    bytes_processed: u64,
    /// Set once the hard limit has been crossed; further calls fail.
    hard_limit_hit: bool,
}

/// Packet header size (8-byte counter)
const PACKET_HEADER_SIZE: usize = 8;

impl PacketCipher {
    /// Create a new packet cipher with no data-limit enforcement (the
    /// right choice for the AEAD suites this struct wraps).
    #[inline]
    pub fn new(key: DataChannelKey) -> Self {
        Self::with_data_limit(key, DataLimit::unlimited())
    }

    /// Create a new packet cipher with an explicit data-limit policy.
    #[inline]
    pub fn with_data_limit(key: DataChannelKey, data_limit: DataLimit) -> Self {
        Self {
            cipher: key.cipher(),
            tx_counter: 0,
            rx_window: ReplayWindow::new(),
            data_limit,
            bytes_processed: 0,
            hard_limit_hit: false,
        }
    }

    /// Record `n` processed bytes and report whether the soft limit was
    /// just crossed. Call after every successful encrypt/decrypt.
    #[inline]
    fn record_bytes(&mut self, n: usize) -> DataLimitStatus {
        let before = self.bytes_processed;
        self.bytes_processed = self.bytes_processed.saturating_add(n as u64);
        match self.data_limit.soft_limit {
            Some(limit) if before < limit && self.bytes_processed >= limit => {
                DataLimitStatus::SoftExceeded
            }
            _ => DataLimitStatus::Ok,
        }
    }

    /// Whether this key has crossed its hard data limit and must not be
    /// used for encrypt/decrypt again.
    #[inline]
    pub fn hard_limit_exceeded(&self) -> bool {
        self.hard_limit_hit
            || matches!(self.data_limit.hard_limit, Some(limit) if self.bytes_processed >= limit)
    }

    /// Bytes processed so far under this key.
    #[inline(always)]
    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed
    }

    /// Encrypt a packet
    ///
    /// Returns: [8-byte packet_id | ciphertext | 16-byte tag]
    #[inline]
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        if self.hard_limit_exceeded() {
            return Err(CryptoError::DataLimitExceeded);
        }

        // Increment counter (fail if overflow - extremely unlikely)
        self.tx_counter = self.tx_counter.checked_add(1)
            .ok_or(CryptoError::EncryptionFailed("packet counter overflow"))?;

        // Build nonce from counter (padded to 12 bytes)
        // Using a fixed-size array and copy is faster than iteration
        let mut nonce = [0u8; 12];
        let packet_id = self.tx_counter.to_be_bytes();
        nonce[4..].copy_from_slice(&packet_id);

        // Pre-allocate output with exact capacity
        // Header (8) + plaintext + tag (16)
        let output_len = PACKET_HEADER_SIZE + plaintext.len() + CipherSuite::TAG_SIZE;
        let mut output = Vec::with_capacity(output_len);

        // Write packet ID header
        output.extend_from_slice(&packet_id);

        // Encrypt directly into output buffer
        self.cipher.encrypt_into(&nonce, plaintext, &packet_id, &mut output)?;
        self.record_bytes(plaintext.len());
        if self.hard_limit_exceeded() {
            self.hard_limit_hit = true;
        }

        Ok(output)
    }

    /// Encrypt a packet into a pre-allocated buffer
    ///
    /// Returns the total bytes written (header + ciphertext + tag).
    /// Buffer should be cleared before calling.
    #[inline]
    pub fn encrypt_into(&mut self, plaintext: &[u8], output: &mut Vec<u8>) -> Result<usize> {
        self.tx_counter = self.tx_counter.checked_add(1)
            .ok_or(CryptoError::EncryptionFailed("packet counter overflow"))?;

        let mut nonce = [0u8; 12];
        let packet_id = self.tx_counter.to_be_bytes();
        nonce[4..].copy_from_slice(&packet_id);

        output.extend_from_slice(&packet_id);
        let cipher_bytes = self.cipher.encrypt_into(&nonce, plaintext, &packet_id, output)?;

        Ok(PACKET_HEADER_SIZE + cipher_bytes)
    }

    /// Decrypt a packet with replay protection
    #[inline]
    pub fn decrypt(&mut self, packet: &[u8]) -> Result<Vec<u8>> {
        const MIN_PACKET_SIZE: usize = PACKET_HEADER_SIZE + CipherSuite::TAG_SIZE;

        if self.hard_limit_exceeded() {
            return Err(CryptoError::DataLimitExceeded);
        }

        if packet.len() < MIN_PACKET_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }

        // Extract packet ID using array pattern matching (faster than slice ops)
        let packet_id: [u8; 8] = packet[..8].try_into().unwrap();
        let counter = u64::from_be_bytes(packet_id);

        // Check replay (inline for performance)
        if !self.rx_window.check_and_update(counter) {
            return Err(CryptoError::ReplayDetected);
        }

        // Build nonce from packet ID
        let mut nonce = [0u8; 12];
        nonce[4..].copy_from_slice(&packet_id);

        // Decrypt
        let plaintext = self.cipher.decrypt(&nonce, &packet[8..], &packet_id)?;
        self.record_bytes(plaintext.len());
        if self.hard_limit_exceeded() {
            self.hard_limit_hit = true;
        }
        Ok(plaintext)
    }

    /// Check the data-limit status without processing a packet -- used by
    /// housekeeping to decide whether a rekey must be scheduled.
    #[inline]
    pub fn data_limit_status(&self) -> DataLimitStatus {
        match self.data_limit.soft_limit {
            Some(limit) if self.bytes_processed >= limit => DataLimitStatus::SoftExceeded,
            _ => DataLimitStatus::Ok,
        }
    }

    /// Get current TX counter (for debugging/stats)
    #[inline(always)]
    pub fn tx_counter(&self) -> u64 {
        self.tx_counter
    }
}

/// Sliding window for replay protection
///
/// Uses a 128-bit bitmap for efficient replay detection with O(1) operations.
/// The window tracks the last 128 packet IDs relative to the highest seen.
struct ReplayWindow {
    /// Highest seen packet ID
    highest: u64,
    /// Bitmap of recently seen packets (relative to highest)
    /// Bit 0 = highest, bit N = highest - N
    bitmap: u128,
}

impl ReplayWindow {
    /// Window size in packets (128 bits = 128 packet tracking)
    const WINDOW_SIZE: u64 = 128;

    #[inline]
    fn new() -> Self {
        Self {
            highest: 0,
            bitmap: 0,
        }
    }

    /// Check if packet ID is valid (not replayed) and update window
    ///
    /// Returns true if the packet should be processed, false if it's a replay
    /// or too old.
    #[inline]
    fn check_and_update(&mut self, packet_id: u64) -> bool {
        // Packet ID 0 is invalid (counter starts at 1)
        if packet_id == 0 {
            return false;
        }

        if packet_id > self.highest {
            // New highest packet - advance window
            let shift = packet_id - self.highest;

            if shift >= Self::WINDOW_SIZE {
                // Packet is way ahead, clear entire window
                self.bitmap = 1; // Only mark current packet
            } else {
                // Shift window and mark current packet
                // Use saturating shift to handle edge cases
                self.bitmap = (self.bitmap << shift) | 1;
            }
            self.highest = packet_id;
            true
        } else {
            // Packet is at or before highest
            let diff = self.highest - packet_id;

            // Check if packet is within window
            if diff >= Self::WINDOW_SIZE {
                return false; // Too old
            }

            // Check if already seen using bit test
            let mask = 1u128 << diff;
            if self.bitmap & mask != 0 {
                return false; // Replay detected
            }

            // Mark as seen
            self.bitmap |= mask;
            true
        }
    }

    /// Reset the replay window (e.g., for key renegotiation)
    #[allow(dead_code)]
    #[inline]
    pub fn reset(&mut self) {
        self.highest = 0;
        self.bitmap = 0;
    }
}

/// Legacy CBC-with-external-HMAC data-channel cipher (`--cipher AES-256-CBC
/// --auth ...`), kept for interop with peers that haven't moved to an AEAD
/// suite. Per-packet layout: `HMAC(hmac_key, IV || ciphertext) || IV ||
/// ciphertext`, where the plaintext under CBC is `packet_id(4 bytes,
/// big-endian) || payload`, PKCS7-padded.
pub struct CbcHmacCipher {
    cipher_key: [u8; 32],
    hmac_digest: HmacDigest,
    hmac_key: Vec<u8>,
    tx_counter: u32,
    rx_window: ReplayWindow,
}

const CBC_IV_SIZE: usize = 16;

impl CbcHmacCipher {
    /// Create a new CBC+HMAC cipher from a 256-bit AES key and an HMAC key
    /// matching the configured digest.
    pub fn new(cipher_key: [u8; 32], hmac_digest: HmacDigest, hmac_key: Vec<u8>) -> Self {
        Self {
            cipher_key,
            hmac_digest,
            hmac_key,
            tx_counter: 0,
            rx_window: ReplayWindow::new(),
        }
    }

    /// Encrypt one data-channel packet. Returns `hmac || iv || ciphertext`.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.tx_counter = self
            .tx_counter
            .checked_add(1)
            .ok_or(CryptoError::EncryptionFailed("packet counter overflow"))?;

        let mut inner = Vec::with_capacity(4 + plaintext.len());
        inner.extend_from_slice(&self.tx_counter.to_be_bytes());
        inner.extend_from_slice(plaintext);

        let iv: [u8; CBC_IV_SIZE] = crate::random_bytes();
        let ciphertext = Aes256CbcEnc::new(&self.cipher_key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(&inner);

        let mut mac_input = Vec::with_capacity(iv.len() + ciphertext.len());
        mac_input.extend_from_slice(&iv);
        mac_input.extend_from_slice(&ciphertext);
        let hmac = crate::hmac_auth::hmac_compute(self.hmac_digest, &self.hmac_key, &mac_input);

        let mut out = Vec::with_capacity(hmac.len() + iv.len() + ciphertext.len());
        out.extend_from_slice(&hmac);
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt and verify one data-channel packet, checking replay on the
    /// embedded packet-id. Returns the plaintext payload (packet-id stripped).
    pub fn decrypt(&mut self, packet: &[u8]) -> Result<Vec<u8>> {
        use subtle::ConstantTimeEq;

        let hmac_size = self.hmac_digest.output_size();
        if packet.len() < hmac_size + CBC_IV_SIZE {
            return Err(CryptoError::PacketTooShort);
        }

        let (hmac, rest) = packet.split_at(hmac_size);
        let computed = crate::hmac_auth::hmac_compute(self.hmac_digest, &self.hmac_key, rest);
        if !bool::from(computed.ct_eq(hmac)) {
            return Err(CryptoError::HmacVerificationFailed);
        }

        let (iv, ciphertext) = rest.split_at(CBC_IV_SIZE);
        let iv: [u8; CBC_IV_SIZE] = iv.try_into().unwrap();

        let inner = Aes256CbcDec::new(&self.cipher_key.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)?;

        if inner.len() < 4 {
            return Err(CryptoError::PacketTooShort);
        }
        let packet_id = u32::from_be_bytes(inner[..4].try_into().unwrap());
        if !self.rx_window.check_and_update(packet_id as u64) {
            return Err(CryptoError::ReplayDetected);
        }

        Ok(inner[4..].to_vec())
    }
}

impl Drop for CbcHmacCipher {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.cipher_key.zeroize();
        self.hmac_key.zeroize();
    }
}
