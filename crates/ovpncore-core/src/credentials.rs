//! Credentials supplied by the embedding application.

use zeroize::ZeroizeOnDrop;

/// Credentials the application supplies for the control-channel auth
/// exchange. Never sent to a peer flagged as a relay.
#[derive(ZeroizeOnDrop)]
pub struct Credentials {
    /// Username.
    pub username: String,
    /// Password. Replaced by `session_id` on reconnect when one is cached.
    pub password: String,
    /// Challenge/response value (static-challenge or dynamic CR auth).
    pub response: Option<String>,
    /// Static challenge response, concatenated with the password per the
    /// `--static-challenge` wire convention.
    pub static_challenge_response: Option<String>,
    /// Cached session-id token, substituted for `password` on reconnect.
    pub session_id: Option<String>,
}

impl Credentials {
    /// Create plain username/password credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            response: None,
            static_challenge_response: None,
            session_id: None,
        }
    }

    /// The value to place in the password field of the auth exchange:
    /// the cached session-id token if present, otherwise the password.
    pub fn effective_password(&self) -> &str {
        self.session_id.as_deref().unwrap_or(&self.password)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_password_prefers_session_id() {
        let mut creds = Credentials::new("alice", "hunter2");
        assert_eq!(creds.effective_password(), "hunter2");
        creds.session_id = Some("token-abc".to_string());
        assert_eq!(creds.effective_password(), "token-abc");
    }
}
