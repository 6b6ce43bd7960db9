//! HMAC authentication for the control channel: tls-auth and tls-crypt.
//!
//! tls-auth runs an HMAC-then-clear scheme over the otherwise-plaintext
//! control channel; tls-crypt additionally encrypts it. Both are driven by
//! a static key distributed out of band (`ta.key`), independent of the
//! per-session TLS-derived data channel keys.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use subtle::ConstantTimeEq;
use zeroize::ZeroizeOnDrop;

use crate::{CryptoError, Result};

/// HMAC digest selectable for tls-auth, matching the `--auth` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HmacDigest {
    /// HMAC-SHA1 (20-byte output). Legacy default, still the most
    /// widely deployed `--auth` setting.
    Sha1,
    /// HMAC-SHA256 (32-byte output).
    Sha256,
    /// HMAC-SHA512 (64-byte output).
    Sha512,
}

impl HmacDigest {
    /// HMAC output size in bytes for this digest.
    pub fn output_size(self) -> usize {
        match self {
            HmacDigest::Sha1 => 20,
            HmacDigest::Sha256 => 32,
            HmacDigest::Sha512 => 64,
        }
    }
}

pub(crate) fn hmac_compute(digest: HmacDigest, key: &[u8], data: &[u8]) -> Vec<u8> {
    match digest {
        HmacDigest::Sha1 => {
            let mut mac = Hmac::<Sha1>::new_from_slice(key).expect("HMAC accepts any key length");
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        HmacDigest::Sha256 => {
            let mut mac =
                Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key length");
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        HmacDigest::Sha512 => {
            let mut mac =
                Hmac::<Sha512>::new_from_slice(key).expect("HMAC accepts any key length");
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
    }
}

/// HMAC authentication key for tls-auth.
#[derive(ZeroizeOnDrop)]
pub struct HmacAuth {
    #[zeroize(skip)]
    digest: HmacDigest,
    /// Key for outgoing packets.
    tx_key: Vec<u8>,
    /// Key for incoming packets.
    rx_key: Vec<u8>,
}

impl HmacAuth {
    /// Create from separate TX and RX keys under the given digest.
    pub fn new(digest: HmacDigest, tx_key: Vec<u8>, rx_key: Vec<u8>) -> Self {
        Self {
            digest,
            tx_key,
            rx_key,
        }
    }

    /// Create from a single key (same key for both directions), SHA256.
    pub fn from_single_key(key: [u8; 32]) -> Self {
        Self {
            digest: HmacDigest::Sha256,
            tx_key: key.to_vec(),
            rx_key: key.to_vec(),
        }
    }

    /// Create from OpenVPN's static key file format (2048-bit / 256 bytes),
    /// divided into four 64-byte blocks. tls-auth uses blocks 0 and 2 as the
    /// HMAC send/receive key material, truncated to the digest's output
    /// size -- HMAC accepts any key length, so the untruncated remainder of
    /// each block is simply unused.
    pub fn from_ta_key(
        digest: HmacDigest,
        ta_key: &[u8; 256],
        is_server: bool,
        key_direction: Option<u8>,
    ) -> Self {
        let key_len = digest.output_size();
        let block = |i: usize| -> Vec<u8> { ta_key[i * 64..i * 64 + key_len].to_vec() };

        let (tx_key, rx_key) = match (is_server, key_direction) {
            (true, Some(0)) | (true, None) => (block(1), block(0)),
            (true, Some(1)) => (block(0), block(1)),
            (false, Some(1)) | (false, None) => (block(0), block(1)),
            (false, Some(0)) => (block(1), block(0)),
            _ => panic!("invalid key direction"),
        };

        Self {
            digest,
            tx_key,
            rx_key,
        }
    }

    /// HMAC output size for this instance's digest.
    pub fn hmac_size(&self) -> usize {
        self.digest.output_size()
    }

    /// Compute HMAC for an outgoing packet.
    pub fn authenticate(&self, data: &[u8]) -> Vec<u8> {
        hmac_compute(self.digest, &self.tx_key, data)
    }

    /// Verify HMAC for an incoming packet (constant-time).
    pub fn verify(&self, data: &[u8], expected_hmac: &[u8]) -> Result<()> {
        let computed = hmac_compute(self.digest, &self.rx_key, data);

        if computed.len() == expected_hmac.len() && computed.ct_eq(expected_hmac).into() {
            Ok(())
        } else {
            Err(CryptoError::HmacVerificationFailed)
        }
    }

    /// Wrap a packet with HMAC (prepends HMAC to data).
    pub fn wrap(&self, data: &[u8]) -> Vec<u8> {
        let hmac = self.authenticate(data);
        let mut output = Vec::with_capacity(hmac.len() + data.len());
        output.extend_from_slice(&hmac);
        output.extend_from_slice(data);
        output
    }

    /// Unwrap a packet and verify HMAC.
    pub fn unwrap(&self, packet: &[u8]) -> Result<Vec<u8>> {
        let hmac_size = self.hmac_size();
        if packet.len() < hmac_size {
            return Err(CryptoError::HmacVerificationFailed);
        }

        let (hmac, data) = packet.split_at(hmac_size);
        self.verify(data, hmac)?;
        Ok(data.to_vec())
    }
}

/// tls-crypt key for both HMAC and encryption.
#[derive(ZeroizeOnDrop)]
pub struct TlsCryptKey {
    /// Encryption key.
    cipher_key: [u8; 32],
    /// HMAC authentication key.
    hmac_key: [u8; 32],
}

impl TlsCryptKey {
    /// Create from raw keys.
    pub fn new(cipher_key: [u8; 32], hmac_key: [u8; 32]) -> Self {
        Self {
            cipher_key,
            hmac_key,
        }
    }

    /// Create from a 512-bit (64-byte) combined key.
    pub fn from_combined(key: &[u8; 64]) -> Self {
        let mut cipher_key = [0u8; 32];
        let mut hmac_key = [0u8; 32];
        cipher_key.copy_from_slice(&key[0..32]);
        hmac_key.copy_from_slice(&key[32..64]);
        Self {
            cipher_key,
            hmac_key,
        }
    }

    /// The cipher key.
    pub fn cipher_key(&self) -> &[u8; 32] {
        &self.cipher_key
    }

    /// The HMAC key.
    pub fn hmac_key(&self) -> &[u8; 32] {
        &self.hmac_key
    }

    /// Wrap a control channel packet with tls-crypt (encrypt-then-MAC).
    ///
    /// Format: `HMAC-SHA256(nonce || ciphertext) | nonce | ciphertext`.
    pub fn wrap(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        use crate::cipher::Cipher;
        use crate::CipherSuite;

        let cipher = Cipher::new(&self.cipher_key, CipherSuite::ChaCha20Poly1305);
        let nonce = cipher.generate_nonce();
        let ciphertext = cipher.encrypt(&nonce, plaintext, &[])?;

        let mut hmac_input = Vec::with_capacity(nonce.len() + ciphertext.len());
        hmac_input.extend_from_slice(&nonce);
        hmac_input.extend_from_slice(&ciphertext);
        let hmac = hmac_compute(HmacDigest::Sha256, &self.hmac_key, &hmac_input);

        let mut output = Vec::with_capacity(hmac.len() + nonce.len() + ciphertext.len());
        output.extend_from_slice(&hmac);
        output.extend_from_slice(&nonce);
        output.extend_from_slice(&ciphertext);

        Ok(output)
    }

    /// Unwrap a tls-crypt protected packet.
    pub fn unwrap(&self, packet: &[u8]) -> Result<Vec<u8>> {
        use crate::cipher::Cipher;
        use crate::CipherSuite;

        if packet.len() < 32 + 12 + 16 {
            return Err(CryptoError::DecryptionFailed);
        }

        let (hmac, rest) = packet.split_at(32);
        let (nonce, ciphertext) = rest.split_at(12);

        let mut hmac_input = Vec::with_capacity(nonce.len() + ciphertext.len());
        hmac_input.extend_from_slice(nonce);
        hmac_input.extend_from_slice(ciphertext);
        let computed = hmac_compute(HmacDigest::Sha256, &self.hmac_key, &hmac_input);

        if !bool::from(computed.ct_eq(hmac)) {
            return Err(CryptoError::HmacVerificationFailed);
        }

        let nonce: [u8; 12] = nonce.try_into().unwrap();
        let cipher = Cipher::new(&self.cipher_key, CipherSuite::ChaCha20Poly1305);
        cipher.decrypt(&nonce, ciphertext, &[])
    }
}

/// A wrapped client key (`WKc`) for tls-crypt-v2: a client's ephemeral
/// tls-crypt key, encrypted under the server's long-term tls-crypt-v2 key
/// and carried inline in `HARD_RESET_CLIENT_V3` so the server need not
/// provision per-client static keys out of band.
pub struct WrappedClientKey;

impl WrappedClientKey {
    /// Wrap a freshly generated client tls-crypt key under the server's
    /// long-term tls-crypt-v2 key, plus opaque metadata the server should
    /// echo back uninterpreted (OpenVPN uses this for a client ID).
    pub fn wrap(server_key: &TlsCryptKey, client_key: &TlsCryptKey, metadata: &[u8]) -> Vec<u8> {
        let mut plaintext =
            Vec::with_capacity(32 + 32 + 2 + metadata.len());
        plaintext.extend_from_slice(client_key.cipher_key());
        plaintext.extend_from_slice(client_key.hmac_key());
        plaintext.extend_from_slice(&(metadata.len() as u16).to_be_bytes());
        plaintext.extend_from_slice(metadata);

        // wrap() already appends its own HMAC/nonce framing; the result is
        // self-describing and self-authenticating as WKc.
        server_key.wrap(&plaintext).expect("ChaCha20Poly1305 encryption cannot fail")
    }

    /// Unwrap a WKc under the server's long-term tls-crypt-v2 key, yielding
    /// the client's ephemeral tls-crypt key and the opaque metadata.
    pub fn unwrap(server_key: &TlsCryptKey, wkc: &[u8]) -> Result<(TlsCryptKey, Vec<u8>)> {
        let plaintext = server_key.unwrap(wkc)?;
        if plaintext.len() < 66 {
            return Err(CryptoError::DecryptionFailed);
        }
        let mut combined = [0u8; 64];
        combined.copy_from_slice(&plaintext[0..64]);
        let meta_len = u16::from_be_bytes([plaintext[64], plaintext[65]]) as usize;
        if plaintext.len() < 66 + meta_len {
            return Err(CryptoError::DecryptionFailed);
        }
        let metadata = plaintext[66..66 + meta_len].to_vec();
        Ok((TlsCryptKey::from_combined(&combined), metadata))
    }
}
