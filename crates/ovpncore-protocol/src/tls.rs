//! TLS Integration for OpenVPN Control Channel
//!
//! Bridges rustls with the OpenVPN control channel transport. This is the
//! non-blocking four-operation contract the key-exchange state machine
//! drives: `feed_ciphertext` / `pull_ciphertext` move bytes to and from the
//! network side, `write_plaintext` / `read_plaintext` move bytes to and
//! from the application (control-channel) side. Every call advances TLS
//! state as far as it can and returns without blocking.

use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, ClientConnection, ServerConfig, ServerConnection};

use crate::{ProtocolError, Result};

enum Conn {
    Server(ServerConnection),
    Client(ClientConnection),
}

impl Conn {
    fn is_handshaking(&self) -> bool {
        match self {
            Conn::Server(c) => c.is_handshaking(),
            Conn::Client(c) => c.is_handshaking(),
        }
    }

    fn wants_write(&self) -> bool {
        match self {
            Conn::Server(c) => c.wants_write(),
            Conn::Client(c) => c.wants_write(),
        }
    }

    fn read_tls(&mut self, rd: &mut dyn Read) -> std::io::Result<usize> {
        match self {
            Conn::Server(c) => c.read_tls(rd),
            Conn::Client(c) => c.read_tls(rd),
        }
    }

    fn write_tls(&mut self, wr: &mut dyn Write) -> std::io::Result<usize> {
        match self {
            Conn::Server(c) => c.write_tls(wr),
            Conn::Client(c) => c.write_tls(wr),
        }
    }

    fn process_new_packets(&mut self) -> std::result::Result<rustls::IoState, rustls::Error> {
        match self {
            Conn::Server(c) => c.process_new_packets(),
            Conn::Client(c) => c.process_new_packets(),
        }
    }

    fn read_plaintext(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Conn::Server(c) => c.reader().read(buf),
            Conn::Client(c) => c.reader().read(buf),
        }
    }

    fn write_plaintext(&mut self, data: &[u8]) -> std::io::Result<usize> {
        match self {
            Conn::Server(c) => c.writer().write(data),
            Conn::Client(c) => c.writer().write(data),
        }
    }

    fn peer_certificates(&self) -> Option<Vec<CertificateDer<'static>>> {
        let certs = match self {
            Conn::Server(c) => c.peer_certificates(),
            Conn::Client(c) => c.peer_certificates(),
        }?;
        Some(certs.iter().map(|c| c.clone().into_owned()).collect())
    }

    fn negotiated_cipher_suite_name(&self) -> Option<&'static str> {
        match self {
            Conn::Server(c) => c.negotiated_cipher_suite(),
            Conn::Client(c) => c.negotiated_cipher_suite(),
        }
        .map(|cs| cs.suite().as_str().unwrap_or("unknown"))
    }

    fn export_keying_material(
        &self,
        out: [u8; 128],
        label: &[u8],
        context: Option<&[u8]>,
    ) -> std::result::Result<[u8; 128], rustls::Error> {
        match self {
            Conn::Server(c) => c.export_keying_material(out, label, context),
            Conn::Client(c) => c.export_keying_material(out, label, context),
        }
    }
}

/// Non-blocking TLS plumbing for one key-exchange slot.
pub struct TlsHandler {
    conn: Conn,
    /// Incoming ciphertext buffer (from the control channel).
    incoming: BytesMut,
    /// Outgoing ciphertext buffer (to the control channel).
    outgoing: BytesMut,
    /// Whether handshake is complete.
    handshake_complete: bool,
}

impl TlsHandler {
    /// Create a new server-side TLS handler.
    pub fn new_server(config: Arc<ServerConfig>) -> Result<Self> {
        let conn =
            ServerConnection::new(config).map_err(|e| ProtocolError::TlsError(e.to_string()))?;
        Ok(Self::from_conn(Conn::Server(conn)))
    }

    /// Create a new client-side TLS handler against `server_name`.
    pub fn new_client(config: Arc<ClientConfig>, server_name: ServerName<'static>) -> Result<Self> {
        let conn = ClientConnection::new(config, server_name)
            .map_err(|e| ProtocolError::TlsError(e.to_string()))?;
        Ok(Self::from_conn(Conn::Client(conn)))
    }

    fn from_conn(conn: Conn) -> Self {
        Self {
            conn,
            incoming: BytesMut::with_capacity(16384),
            outgoing: BytesMut::with_capacity(16384),
            handshake_complete: false,
        }
    }

    /// Feed ciphertext received over the control channel into TLS.
    pub fn feed_ciphertext(&mut self, data: &[u8]) -> Result<()> {
        self.incoming.extend_from_slice(data);
        self.process_tls()
    }

    /// Backwards-compatible alias for [`TlsHandler::feed_ciphertext`].
    pub fn process_incoming(&mut self, data: &[u8]) -> Result<()> {
        self.feed_ciphertext(data)
    }

    /// Feed already-reassembled control-channel records into TLS.
    pub fn process_tls_records(&mut self, records: Vec<Bytes>) -> Result<()> {
        for record in records {
            self.incoming.extend_from_slice(&record);
        }
        self.process_tls()
    }

    fn process_tls(&mut self) -> Result<()> {
        let mut reader = &self.incoming[..];

        match self.conn.read_tls(&mut reader) {
            Ok(0) => {}
            Ok(n) => {
                let _ = self.incoming.split_to(n);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => return Err(ProtocolError::TlsError(e.to_string())),
        }

        match self.conn.process_new_packets() {
            Ok(_state) => {
                if !self.handshake_complete && !self.conn.is_handshaking() {
                    self.handshake_complete = true;
                }
            }
            Err(e) => return Err(ProtocolError::TlsError(e.to_string())),
        }

        Ok(())
    }

    /// Pull ciphertext TLS wants sent over the control channel, if any.
    pub fn pull_ciphertext(&mut self) -> Result<Option<Bytes>> {
        self.outgoing.clear();

        match self.conn.write_tls(&mut VecWriter(&mut self.outgoing)) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(self.outgoing.clone().freeze())),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(ProtocolError::TlsError(e.to_string())),
        }
    }

    /// Backwards-compatible alias for [`TlsHandler::pull_ciphertext`].
    pub fn get_outgoing(&mut self) -> Result<Option<Bytes>> {
        self.pull_ciphertext()
    }

    /// Whether the TLS handshake has completed.
    pub fn is_handshake_complete(&self) -> bool {
        self.handshake_complete
    }

    /// Whether TLS is still mid-handshake.
    pub fn is_handshaking(&self) -> bool {
        self.conn.is_handshaking()
    }

    /// Whether TLS has ciphertext queued to write.
    pub fn wants_write(&self) -> bool {
        self.conn.wants_write()
    }

    /// Read application (control-channel) plaintext TLS has decrypted.
    pub fn read_plaintext(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.conn.read_plaintext(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(ProtocolError::TlsError(e.to_string())),
        }
    }

    /// Queue application (control-channel) plaintext for TLS to encrypt.
    pub fn write_plaintext(&mut self, data: &[u8]) -> Result<usize> {
        self.conn
            .write_plaintext(data)
            .map_err(|e| ProtocolError::TlsError(e.to_string()))
    }

    /// Peer certificate chain, once the handshake has progressed enough
    /// to have received it.
    pub fn peer_certificates(&self) -> Option<Vec<CertificateDer<'static>>> {
        self.conn.peer_certificates()
    }

    /// Negotiated TLS cipher suite name, once negotiated.
    pub fn cipher_suite(&self) -> Option<&'static str> {
        self.conn.negotiated_cipher_suite_name()
    }

    /// Export 128 bytes of keying material derived from the TLS session
    /// secret, used in place of OpenVPN2's raw pre-master-secret PRF to
    /// derive data-channel keys -- only callable once the handshake has
    /// completed.
    pub fn export_keying_material(&self, label: &[u8], context: Option<&[u8]>) -> Result<[u8; 128]> {
        self.conn
            .export_keying_material([0u8; 128], label, context)
            .map_err(|e| ProtocolError::TlsError(e.to_string()))
    }
}

struct VecWriter<'a>(&'a mut BytesMut);

impl<'a> Write for VecWriter<'a> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Create a TLS server config from a certificate chain and key, optionally
/// requiring and verifying a client certificate.
pub fn create_server_config(
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    client_cert_verifier: Option<Arc<dyn rustls::server::danger::ClientCertVerifier>>,
) -> Result<Arc<ServerConfig>> {
    let config = if let Some(verifier) = client_cert_verifier {
        ServerConfig::builder()
            .with_client_cert_verifier(verifier)
            .with_single_cert(cert_chain, key)
            .map_err(|e| ProtocolError::TlsError(e.to_string()))?
    } else {
        ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(cert_chain, key)
            .map_err(|e| ProtocolError::TlsError(e.to_string()))?
    };

    Ok(Arc::new(config))
}

/// Create a TLS client config, verifying the server certificate against
/// `server_cert_verifier` (typically a pinned CA, since OpenVPN peers carry
/// their own CA out of band rather than relying on the public Web PKI).
pub fn create_client_config(
    server_cert_verifier: Arc<dyn rustls::client::danger::ServerCertVerifier>,
    client_cert: Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)>,
) -> Result<Arc<ClientConfig>> {
    let builder = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(server_cert_verifier);

    let config = match client_cert {
        Some((chain, key)) => builder
            .with_client_auth_cert(chain, key)
            .map_err(|e| ProtocolError::TlsError(e.to_string()))?,
        None => builder.with_no_client_auth(),
    };

    Ok(Arc::new(config))
}

/// Load certificate chain from PEM
pub fn load_certs_from_pem(pem: &str) -> Result<Vec<CertificateDer<'static>>> {
    let mut certs = Vec::new();
    for cert in rustls_pemfile::certs(&mut pem.as_bytes()) {
        match cert {
            Ok(c) => certs.push(c),
            Err(e) => return Err(ProtocolError::TlsError(format!("Failed to parse cert: {}", e))),
        }
    }
    Ok(certs)
}

/// Load private key from PEM
pub fn load_key_from_pem(pem: &str) -> Result<PrivateKeyDer<'static>> {
    for item in rustls_pemfile::read_all(&mut pem.as_bytes()) {
        match item {
            Ok(rustls_pemfile::Item::Pkcs8Key(key)) => return Ok(PrivateKeyDer::Pkcs8(key)),
            Ok(rustls_pemfile::Item::Pkcs1Key(key)) => return Ok(PrivateKeyDer::Pkcs1(key)),
            Ok(rustls_pemfile::Item::Sec1Key(key)) => return Ok(PrivateKeyDer::Sec1(key)),
            _ => continue,
        }
    }
    Err(ProtocolError::TlsError("No private key found in PEM".into()))
}

#[cfg(test)]
mod tests {
    // Exercising a full handshake needs valid cert fixtures; see
    // `tests/handshake.rs` for the end-to-end scenario that drives this
    // through `Session`.
}
