//! Option continuation and push filter (C11).
//!
//! A `PUSH_REPLY` may arrive as several control-channel messages, each
//! ending in `push-continuation 2` to signal "more fragments follow" or
//! `push-continuation 1` (or no marker at all) to signal "this is the
//! last one". [`PushAssembler`] collects the comma-separated option
//! fragments across messages and, once complete, hands the assembled
//! profile to [`PushFilter`] before it is parsed into a `PushReply`.

use crate::control::PushReply;
use crate::{ProtocolError, Result};

/// Maximum size of the fully-assembled push profile.
pub const MAX_PROFILE_SIZE: usize = 256 * 1024;
/// Maximum size of one control-channel push message.
pub const MAX_LINE_SIZE: usize = 3840;
/// Maximum size of a single directive within the profile.
pub const MAX_DIRECTIVE_SIZE: usize = 256;

/// Directives a client must never accept from a server push -- they
/// configure behavior that only makes sense server-side, or that would
/// let a compromised/misbehaving server reconfigure the client outside
/// its intended scope.
pub const DEFAULT_DENY_LIST: &[&str] = &[
    "tls-server",
    "client-config-dir",
    "client-to-client",
    "mode",
    "dh",
    "ca",
    "cert",
    "key",
    "crl-verify",
];

/// Assembles multi-fragment `PUSH_REPLY` messages into one profile.
#[derive(Debug, Default)]
pub struct PushAssembler {
    accumulated: String,
    done: bool,
}

impl PushAssembler {
    /// Create a new, empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one `PUSH_REPLY,...` control message into the assembler.
    /// Returns `true` once the profile is complete (a final fragment was
    /// just consumed).
    pub fn feed(&mut self, message: &str) -> Result<bool> {
        if self.done {
            return Ok(true);
        }
        if message.len() > MAX_LINE_SIZE {
            return Err(ProtocolError::SizeLimitExceeded(format!(
                "push reply line of {} bytes exceeds {} byte limit",
                message.len(),
                MAX_LINE_SIZE
            )));
        }

        let body = message.strip_prefix("PUSH_REPLY,").unwrap_or(message);

        let (body, continuation) = match body.rsplit_once(",push-continuation 2") {
            Some((rest, _)) => (rest, true),
            None => match body.rsplit_once(",push-continuation 1") {
                Some((rest, _)) => (rest, false),
                None => (body, false),
            },
        };

        for directive in body.split(',').filter(|d| !d.is_empty()) {
            if directive.len() > MAX_DIRECTIVE_SIZE {
                return Err(ProtocolError::SizeLimitExceeded(format!(
                    "pushed directive of {} bytes exceeds {} byte limit",
                    directive.len(),
                    MAX_DIRECTIVE_SIZE
                )));
            }
            if !self.accumulated.is_empty() {
                self.accumulated.push(',');
            }
            self.accumulated.push_str(directive);

            if self.accumulated.len() > MAX_PROFILE_SIZE {
                return Err(ProtocolError::SizeLimitExceeded(format!(
                    "assembled push profile exceeds {} byte limit",
                    MAX_PROFILE_SIZE
                )));
            }
        }

        self.done = !continuation;
        Ok(self.done)
    }

    /// Whether assembly has completed (a non-continuation fragment was
    /// seen).
    pub fn is_complete(&self) -> bool {
        self.done
    }

    /// Parse the assembled profile into a `PushReply`, applying `filter`
    /// first. Fails fatally (per §4.11) if the profile contains any
    /// directive on the deny list, or if assembly is still incomplete.
    pub fn finish(&self, filter: &PushFilter) -> Result<PushReply> {
        if !self.done {
            return Err(ProtocolError::InvalidPacket(
                "push profile incomplete".into(),
            ));
        }
        filter.check(&self.accumulated)?;
        PushReply::parse(&self.accumulated)
    }
}

/// Rejects pushed directives matching a configured deny list.
#[derive(Debug, Clone)]
pub struct PushFilter {
    deny_list: Vec<String>,
}

impl Default for PushFilter {
    fn default() -> Self {
        Self {
            deny_list: DEFAULT_DENY_LIST.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl PushFilter {
    /// Build a filter from an explicit deny list (e.g. loaded from
    /// `ProtocolConfig`).
    pub fn new(deny_list: Vec<String>) -> Self {
        Self { deny_list }
    }

    /// Check an assembled, comma-separated profile against the deny
    /// list. The first directive word (before any whitespace) is what's
    /// matched, so `tls-server` rejects the directive regardless of any
    /// arguments it carries.
    pub fn check(&self, profile: &str) -> Result<()> {
        for directive in profile.split(',') {
            let name = directive.trim().split_whitespace().next().unwrap_or("");
            if self.deny_list.iter().any(|d| d == name) {
                return Err(ProtocolError::PushedOptionRejected(name.to_string()));
            }
        }
        Ok(())
    }
}
