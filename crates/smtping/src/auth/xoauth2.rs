//! XOAUTH2 mechanism (Google/Microsoft proprietary).

use super::{InitialResponse, Mechanism, ServerInfo, ensure_secure};
use crate::error::Result;

/// XOAUTH2 authentication with an `OAuth2` bearer token.
///
/// Initial response: `user=<user>\x01auth=Bearer <token>\x01\x01`.
#[derive(Clone)]
pub struct XOAuth2 {
    user: String,
    token: String,
    error: Option<String>,
}

impl XOAuth2 {
    /// Creates XOAUTH2 credentials.
    #[must_use]
    pub fn new(user: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            token: token.into(),
            error: None,
        }
    }

    /// Returns the JSON error document the server sent, if any.
    #[must_use]
    pub fn server_error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

impl std::fmt::Debug for XOAuth2 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XOAuth2")
            .field("user", &self.user)
            .field("token", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl Mechanism for XOAuth2 {
    fn start(&mut self, server: &ServerInfo) -> Result<InitialResponse> {
        ensure_secure(server)?;
        let response = format!("user={}\x01auth=Bearer {}\x01\x01", self.user, self.token);
        Ok(InitialResponse::new("XOAUTH2", response))
    }

    fn next(&mut self, challenge: &[u8], more: bool) -> Result<Option<Vec<u8>>> {
        if !more {
            return Ok(None);
        }
        // A 334 here carries a JSON error; an empty answer makes the server
        // finish with its failure reply.
        self.error = Some(String::from_utf8_lossy(challenge).into_owned());
        Ok(Some(Vec::new()))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    fn tls_server() -> ServerInfo {
        ServerInfo {
            host: "smtp.gmail.com".into(),
            tls: true,
            mechanisms: vec!["XOAUTH2".into()],
        }
    }

    #[test]
    fn test_xoauth2_format() {
        let mut mech = XOAuth2::new("test@test.com", "abc");
        let start = mech.start(&tls_server()).unwrap();

        assert_eq!(start.mechanism, "XOAUTH2");
        assert_eq!(start.response, b"user=test@test.com\x01auth=Bearer abc\x01\x01");
    }

    #[test]
    fn test_error_challenge_answered_with_empty_line() {
        let mut mech = XOAuth2::new("test@test.com", "expired");
        mech.start(&tls_server()).unwrap();

        let json = br#"{"status":"401","schemes":"bearer","scope":"https://mail.google.com/"}"#;
        assert_eq!(mech.next(json, true).unwrap(), Some(Vec::new()));
        assert!(mech.server_error().unwrap().contains("\"401\""));
    }

    #[test]
    fn test_success_ends_exchange() {
        let mut mech = XOAuth2::new("u", "t");
        assert_eq!(mech.next(b"2.7.0 Accepted", false).unwrap(), None);
        assert!(mech.server_error().is_none());
    }
}
