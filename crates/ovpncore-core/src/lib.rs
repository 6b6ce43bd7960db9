//! Shared value types for the OpenVPN-compatible protocol core.
//!
//! This crate holds everything that is not protocol *state* (that lives in
//! `ovpncore-protocol`): the stable application-facing event set, tun/route
//! capture structs, credentials, and the clock abstraction threaded through
//! every component that schedules.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod clock;
pub mod credentials;
pub mod error;
pub mod event;
pub mod network;
pub mod tun;

pub use clock::{Clock, SystemClock, VirtualClock};
pub use credentials::Credentials;
pub use error::{CoreError, Result};
pub use event::{AdvanceMode, AuthFailedTemp, AuthPendingMsg, Event};
pub use network::{DnsConfig, Route, VpnAddress};
pub use tun::{Layer, RerouteGateway, TunBuilderCapture, VpnIpv4, VpnIpv6};
