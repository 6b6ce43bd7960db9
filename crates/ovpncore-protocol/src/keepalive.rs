//! Data-channel keepalive and inactivity timers (C10).
//!
//! Tracks when the last data packet was sent/received on the primary
//! slot and decides when to emit a ping, when the link should be
//! considered dead (`ping-restart`), and when an inactivity threshold
//! has been crossed. All methods take an explicit `now: Instant` so
//! callers can drive them from either `SystemClock` or a test's
//! `VirtualClock`.

use std::time::{Duration, Instant};

use bytes::Bytes;

/// The 16-byte payload OpenVPN uses for a keepalive ping data packet.
/// Not an IP packet; recognized and dropped by the peer without being
/// handed to the tun device.
pub const PING_PAYLOAD: [u8; 16] = [
    0x2a, 0x18, 0x7b, 0xf3, 0x64, 0x1e, 0xb4, 0xcb, 0x07, 0xed, 0x2d, 0x0a, 0x98, 0x1f, 0xc7, 0x48,
];

/// Whether `payload` is the keepalive ping sentinel.
pub fn is_ping(payload: &[u8]) -> bool {
    payload == PING_PAYLOAD
}

/// The 16-byte payload for an explicit-exit-notify: a data packet sent
/// once at clean shutdown so the peer doesn't have to wait out
/// `ping-restart` to notice the session is gone. Distinct from
/// `PING_PAYLOAD` so a receiver can tell the two apart.
pub const EXIT_NOTIFY_PAYLOAD: [u8; 16] = [
    0x08, 0x8a, 0x00, 0x15, 0xc6, 0x37, 0x2a, 0x94, 0xe1, 0x5b, 0x41, 0xf6, 0xd9, 0x02, 0x7a, 0x3c,
];

/// Whether `payload` is the explicit-exit-notify sentinel.
pub fn is_exit_notify(payload: &[u8]) -> bool {
    payload == EXIT_NOTIFY_PAYLOAD
}

/// Configuration for keepalive and inactivity behavior, normally sourced
/// from a pushed `ping`/`ping-restart`/`inactive` directive.
#[derive(Debug, Clone, Copy)]
pub struct KeepaliveConfig {
    /// Emit a ping after this much silence on outbound data.
    pub ping: Duration,
    /// Consider the link dead after this much silence on inbound data.
    pub ping_restart: Duration,
    /// Optional inactivity window: terminate if fewer than
    /// `inactive_bytes` tunnelled bytes move in a rolling window of this
    /// duration.
    pub inactive: Option<(Duration, u64)>,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            ping: Duration::from_secs(10),
            ping_restart: Duration::from_secs(60),
            inactive: None,
        }
    }
}

/// Outcome of a housekeeping check against a `KeepaliveTracker`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveEvent {
    /// Nothing to do yet.
    Idle,
    /// Emit a ping data packet now.
    SendPing,
    /// No inbound data within `ping_restart`; the session is dead.
    Timeout,
    /// The inactivity threshold was crossed; terminate with
    /// explicit-exit-notify.
    Inactive,
}

/// Tracks send/receive activity for one active data channel.
pub struct KeepaliveTracker {
    config: KeepaliveConfig,
    last_sent: Instant,
    last_received: Instant,
    window_start: Instant,
    window_bytes: u64,
}

impl KeepaliveTracker {
    /// Start tracking from `now`, treating it as the most recent
    /// activity in both directions.
    pub fn new(config: KeepaliveConfig, now: Instant) -> Self {
        Self {
            config,
            last_sent: now,
            last_received: now,
            window_start: now,
            window_bytes: 0,
        }
    }

    /// Record that a data packet (real or ping) was sent.
    pub fn on_send(&mut self, now: Instant) {
        self.last_sent = now;
    }

    /// Record that a data packet was received; `payload_len` feeds the
    /// inactivity byte counter (callers should pass 0 for a ping
    /// sentinel, since it carries no tunnelled payload).
    pub fn on_receive(&mut self, now: Instant, payload_len: usize) {
        self.last_received = now;
        self.window_bytes += payload_len as u64;
    }

    /// Check for a due ping, a ping-restart timeout, or an inactivity
    /// breach, in that priority order. Resets the inactivity window as a
    /// side effect once it elapses, so callers should act on
    /// `KeepaliveEvent::Inactive` by tearing the session down rather than
    /// continuing to poll.
    pub fn check(&mut self, now: Instant) -> KeepaliveEvent {
        if now.saturating_duration_since(self.last_received) >= self.config.ping_restart {
            return KeepaliveEvent::Timeout;
        }

        if let Some((window, min_bytes)) = self.config.inactive {
            if now.saturating_duration_since(self.window_start) >= window {
                let breached = self.window_bytes < min_bytes;
                self.window_start = now;
                self.window_bytes = 0;
                if breached {
                    return KeepaliveEvent::Inactive;
                }
            }
        }

        if now.saturating_duration_since(self.last_sent) >= self.config.ping {
            return KeepaliveEvent::SendPing;
        }

        KeepaliveEvent::Idle
    }

    /// The ping sentinel payload as a `Bytes`, ready for encryption.
    pub fn ping_payload() -> Bytes {
        Bytes::from_static(&PING_PAYLOAD)
    }

    /// The explicit-exit-notify sentinel payload as a `Bytes`, ready for
    /// encryption.
    pub fn exit_notify_payload() -> Bytes {
        Bytes::from_static(&EXIT_NOTIFY_PAYLOAD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_emitted_after_silence() {
        let now = Instant::now();
        let mut tracker = KeepaliveTracker::new(
            KeepaliveConfig {
                ping: Duration::from_secs(1),
                ping_restart: Duration::from_secs(3),
                inactive: None,
            },
            now,
        );

        assert_eq!(tracker.check(now + Duration::from_millis(500)), KeepaliveEvent::Idle);
        assert_eq!(tracker.check(now + Duration::from_secs(1)), KeepaliveEvent::SendPing);
    }

    #[test]
    fn test_timeout_after_ping_restart_silence() {
        let now = Instant::now();
        let mut tracker = KeepaliveTracker::new(
            KeepaliveConfig {
                ping: Duration::from_secs(1),
                ping_restart: Duration::from_secs(3),
                inactive: None,
            },
            now,
        );

        assert_eq!(
            tracker.check(now + Duration::from_secs(3)),
            KeepaliveEvent::Timeout
        );
    }

    #[test]
    fn test_receiving_data_resets_timeout() {
        let now = Instant::now();
        let mut tracker = KeepaliveTracker::new(
            KeepaliveConfig {
                ping: Duration::from_secs(1),
                ping_restart: Duration::from_secs(3),
                inactive: None,
            },
            now,
        );

        let t1 = now + Duration::from_secs(2);
        tracker.on_receive(t1, 100);
        assert_eq!(tracker.check(t1 + Duration::from_secs(2)), KeepaliveEvent::Idle);
    }

    #[test]
    fn test_inactive_threshold() {
        let now = Instant::now();
        let mut tracker = KeepaliveTracker::new(
            KeepaliveConfig {
                ping: Duration::from_secs(100),
                ping_restart: Duration::from_secs(200),
                inactive: Some((Duration::from_secs(10), 1000)),
            },
            now,
        );

        tracker.on_receive(now + Duration::from_secs(1), 500);
        assert_eq!(
            tracker.check(now + Duration::from_secs(11)),
            KeepaliveEvent::Inactive
        );
    }

    #[test]
    fn test_ping_sentinel_recognized() {
        assert!(is_ping(&PING_PAYLOAD));
        assert!(!is_ping(b"not a ping"));
    }

    #[test]
    fn test_exit_notify_distinct_from_ping() {
        assert!(is_exit_notify(&EXIT_NOTIFY_PAYLOAD));
        assert!(!is_ping(&EXIT_NOTIFY_PAYLOAD));
        assert!(!is_exit_notify(&PING_PAYLOAD));
    }
}
