//! The stable event set emitted to the embedding application.
//!
//! Names and shapes are part of the wire-compatible contract with the
//! application layer, independent of transport/tun glue. See the fatal
//! variants grouping in [`Event::is_fatal`] -- once a fatal event is
//! emitted the session that produced it stops producing further events.

use std::time::Duration;

/// How the reconnect layer should advance after a temporary auth failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceMode {
    /// Retry the same remote.
    No,
    /// Advance to the next address of the current remote.
    Addr,
    /// Advance to the next remote entry entirely.
    Remote,
}

impl AdvanceMode {
    /// Parse the `advance=` flag value from an `AUTH_FAILED,TEMP` message.
    pub fn parse(s: &str) -> Self {
        match s {
            "addr" => AdvanceMode::Addr,
            "remote" => AdvanceMode::Remote,
            _ => AdvanceMode::No,
        }
    }
}

/// Parsed detail of an `AUTH_FAILED,TEMP[flags]:reason` server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFailedTemp {
    /// Free-form reason text after the `:`.
    pub reason: String,
    /// `backoff=N` in milliseconds, if present.
    pub backoff: Option<Duration>,
    /// `advance=` directive, if present.
    pub advance: Option<AdvanceMode>,
}

impl AuthFailedTemp {
    /// Parse `AUTH_FAILED,TEMP[backoff=30,advance=remote]:server full`.
    ///
    /// Returns `None` if the message does not carry the `TEMP[...]` form.
    pub fn parse(message: &str) -> Option<Self> {
        let rest = message.strip_prefix("AUTH_FAILED,TEMP")?;
        let (flags, reason) = match rest.split_once(':') {
            Some((flags, reason)) => (flags, reason.trim().to_string()),
            None => (rest, String::new()),
        };

        let flags = flags.trim();
        let flags = flags.strip_prefix('[').unwrap_or(flags);
        let flags = flags.strip_suffix(']').unwrap_or(flags);

        let mut backoff = None;
        let mut advance = None;
        for field in flags.split(',') {
            let field = field.trim();
            if field.is_empty() {
                continue;
            }
            if let Some(v) = field.strip_prefix("backoff=") {
                if let Ok(secs) = v.parse::<u64>() {
                    backoff = Some(Duration::from_secs(secs));
                }
            } else if let Some(v) = field.strip_prefix("advance=") {
                advance = Some(AdvanceMode::parse(v));
            }
        }

        Some(Self {
            reason,
            backoff,
            advance,
        })
    }
}

/// Parsed detail of an `AUTH_PENDING[,timeout=N]` server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPendingMsg {
    /// Requested out-of-band auth suspend timeout, before capping.
    pub timeout: Duration,
    /// Supported out-of-band methods, as advertised by the server.
    pub methods: Vec<String>,
}

impl AuthPendingMsg {
    /// Suspend timeout assumed when the server doesn't send `timeout=`.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

    /// Parse `AUTH_PENDING[,timeout=N][,method,...]`.
    ///
    /// Returns `None` if `message` isn't an `AUTH_PENDING` directive.
    pub fn parse(message: &str) -> Option<Self> {
        let rest = message.strip_prefix("AUTH_PENDING")?;
        let rest = rest.trim_start_matches(',');

        let mut timeout = None;
        let mut methods = Vec::new();
        for field in rest.split(',') {
            let field = field.trim();
            if field.is_empty() {
                continue;
            }
            if let Some(v) = field.strip_prefix("timeout=") {
                if let Ok(secs) = v.parse::<u64>() {
                    timeout = Some(Duration::from_secs(secs));
                }
            } else {
                methods.push(field.to_string());
            }
        }

        Some(Self {
            timeout: timeout.unwrap_or(Self::DEFAULT_TIMEOUT),
            methods,
        })
    }
}

/// Events emitted by the core to the embedding application.
///
/// This is a closed, stable set -- the embedder matches on it once at the
/// top of its event loop, per the typed-event-enum design called for in
/// place of virtual-method callback dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Resolving the remote address.
    Resolve,
    /// Waiting before connecting (reconnect backoff).
    Wait,
    /// Waiting for a proxy handshake.
    WaitProxy,
    /// Transport-level connect in progress.
    Connecting,
    /// Fetching a dynamically-served client config.
    GetConfig,
    /// Tun IP address assigned.
    AssignIp,
    /// Routes added to the tun device.
    AddRoutes,
    /// Session fully established, data may flow.
    Connected,
    /// Server requested out-of-band authentication.
    AuthPending {
        /// Suspend timeout.
        timeout: Duration,
        /// Supported out-of-band methods, as advertised by the server.
        methods: Vec<String>,
    },
    /// Informational message from the server.
    Info {
        /// Free-form text.
        text: String,
    },
    /// Warning, non-fatal.
    Warn {
        /// Free-form text.
        text: String,
    },
    /// Compression stub negotiated (never actually performed).
    CompressionEnabled {
        /// The negotiated stub name, e.g. "stub".
        text: String,
    },
    /// Echo directive from the server.
    Echo {
        /// Free-form text.
        text: String,
    },
    /// Clean disconnect in progress.
    Disconnect,

    /// Fatal: authentication failed. `backoff`/`advance` are populated
    /// when the server sent the `AUTH_FAILED,TEMP[...]` form; plain
    /// `AUTH_FAILED` leaves both `None`.
    AuthFailed {
        /// Free-form reason.
        reason: String,
        /// `backoff=N`, if the server's message carried it.
        backoff: Option<Duration>,
        /// `advance=` directive, if the server's message carried it.
        advance: Option<AdvanceMode>,
    },
    /// Fatal: server directed a client halt.
    ClientHalt {
        /// Free-form reason.
        reason: String,
    },
    /// Fatal-with-restart: server directed a client restart.
    ClientRestart {
        /// Free-form reason.
        reason: String,
    },
    /// Fatal: tun device error.
    TunError {
        /// Free-form reason.
        reason: String,
    },
    /// Fatal: transport error.
    TransportError {
        /// Free-form reason.
        reason: String,
    },
    /// Fatal-with-restart: no data received within `ping-restart`.
    KeepaliveTimeout,
    /// Fatal-with-restart: no tunnelled bytes within the inactivity window.
    InactiveTimeout,
    /// Fatal: relay hop misbehaved.
    RelayError {
        /// Free-form reason.
        reason: String,
    },
}

impl Event {
    /// Whether this event ends the session -- no further events follow.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Event::AuthFailed { .. }
                | Event::ClientHalt { .. }
                | Event::ClientRestart { .. }
                | Event::TunError { .. }
                | Event::TransportError { .. }
                | Event::KeepaliveTimeout
                | Event::InactiveTimeout
                | Event::RelayError { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failed_temp_parse() {
        let parsed =
            AuthFailedTemp::parse("AUTH_FAILED,TEMP[backoff=30,advance=remote]:server full")
                .unwrap();
        assert_eq!(parsed.reason, "server full");
        assert_eq!(parsed.backoff, Some(Duration::from_secs(30)));
        assert_eq!(parsed.advance, Some(AdvanceMode::Remote));
    }

    #[test]
    fn test_auth_failed_temp_no_flags() {
        let parsed = AuthFailedTemp::parse("AUTH_FAILED,TEMP:no flags here").unwrap();
        assert_eq!(parsed.reason, "no flags here");
        assert_eq!(parsed.backoff, None);
    }

    #[test]
    fn test_not_temp_form() {
        assert!(AuthFailedTemp::parse("AUTH_FAILED").is_none());
    }

    #[test]
    fn test_event_fatal() {
        assert!(Event::KeepaliveTimeout.is_fatal());
        assert!(!Event::Connected.is_fatal());
    }

    #[test]
    fn test_auth_pending_parse_with_timeout_and_methods() {
        let parsed = AuthPendingMsg::parse("AUTH_PENDING,timeout=30,webauth").unwrap();
        assert_eq!(parsed.timeout, Duration::from_secs(30));
        assert_eq!(parsed.methods, vec!["webauth".to_string()]);
    }

    #[test]
    fn test_auth_pending_parse_defaults_timeout() {
        let parsed = AuthPendingMsg::parse("AUTH_PENDING").unwrap();
        assert_eq!(parsed.timeout, AuthPendingMsg::DEFAULT_TIMEOUT);
        assert!(parsed.methods.is_empty());
    }

    #[test]
    fn test_auth_pending_rejects_other_messages() {
        assert!(AuthPendingMsg::parse("PUSH_REPLY,ping 10").is_none());
    }
}
