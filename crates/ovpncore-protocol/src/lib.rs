//! OpenVPN Protocol Implementation
//!
//! This crate implements the OpenVPN protocol for compatibility with
//! standard OpenVPN clients.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod buffer;
pub mod error;
pub mod opcode;
pub mod packet;
pub mod control;
pub mod data;
pub mod keepalive;
pub mod keystate;
pub mod push;
pub mod reliable;
pub mod session;
pub mod tls;

pub use buffer::{Frame, PacketBuffer};
pub use error::{ProtocolError, Result};
pub use opcode::{OpCode, KeyId};
pub use packet::{Packet, PacketHeader};
pub use control::{ControlPacket, ControlMessage};
pub use data::{DataPacket, DataChannel};
pub use keepalive::{KeepaliveConfig, KeepaliveEvent, KeepaliveTracker};
pub use keystate::{HandshakeState, KeyState, LifetimeConfig, SlotRole};
pub use push::{PushAssembler, PushFilter};
pub use reliable::{ReliableTransport, ReliableConfig, TlsRecordReassembler};
pub use session::{ControlWrap, Session, SessionIdBytes, SessionOutput};
pub use tls::{
    create_client_config, create_server_config, load_certs_from_pem, load_key_from_pem, TlsHandler,
};
