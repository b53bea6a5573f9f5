//! PLAIN mechanism (RFC 4616).

use super::{InitialResponse, Mechanism, ServerInfo, ensure_secure};
use crate::error::{Error, Result};

/// PLAIN authentication.
///
/// The whole exchange is the initial response
/// `<identity>\0<username>\0<password>`. Credentials are only offered over
/// TLS or to localhost, and only to the host they were created for.
#[derive(Clone)]
pub struct Plain {
    identity: String,
    username: String,
    password: String,
    host: String,
}

impl Plain {
    /// Creates PLAIN credentials bound to `host`.
    ///
    /// An empty `identity` means "act as `username`".
    #[must_use]
    pub fn new(
        identity: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            identity: identity.into(),
            username: username.into(),
            password: password.into(),
            host: host.into(),
        }
    }
}

impl std::fmt::Debug for Plain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plain")
            .field("identity", &self.identity)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .finish()
    }
}

impl Mechanism for Plain {
    fn start(&mut self, server: &ServerInfo) -> Result<InitialResponse> {
        ensure_secure(server)?;
        if server.host != self.host {
            return Err(Error::Auth("wrong host name".into()));
        }

        let response = format!("{}\0{}\0{}", self.identity, self.username, self.password);
        Ok(InitialResponse::new("PLAIN", response))
    }

    fn next(&mut self, _challenge: &[u8], more: bool) -> Result<Option<Vec<u8>>> {
        if more {
            return Err(Error::Auth("unexpected server challenge".into()));
        }
        Ok(None)
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

    fn server(host: &str, tls: bool) -> ServerInfo {
        ServerInfo {
            host: host.to_string(),
            tls,
            mechanisms: vec!["PLAIN".to_string()],
        }
    }

    #[test]
    fn test_initial_response_format() {
        let mut plain = Plain::new("", "test", "pass", "mail.example.com");
        let start = plain.start(&server("mail.example.com", true)).unwrap();

        assert_eq!(start.mechanism, "PLAIN");
        assert_eq!(start.response, b"\0test\0pass");
    }

    #[test]
    fn test_identity_is_first_field() {
        let mut plain = Plain::new("admin", "user", "pass@word!", "localhost");
        let start = plain.start(&server("localhost", false)).unwrap();
        assert_eq!(start.response, b"admin\0user\0pass@word!");
    }

    #[test]
    fn test_refuses_plaintext_remote() {
        let mut plain = Plain::new("", "u", "p", "mail.example.com");
        let err = plain.start(&server("mail.example.com", false)).unwrap_err();
        assert!(err.to_string().contains("unencrypted connection"));
    }

    #[test]
    fn test_refuses_wrong_host() {
        let mut plain = Plain::new("", "u", "p", "mail.example.com");
        let err = plain.start(&server("other.example.com", true)).unwrap_err();
        assert!(err.to_string().contains("wrong host name"));
    }

    #[test]
    fn test_next() {
        let mut plain = Plain::new("", "u", "p", "localhost");
        assert!(plain.next(b"challenge", true).is_err());
        assert_eq!(plain.next(b"2.7.0 Accepted", false).unwrap(), None);
    }

    #[test]
    fn test_debug_hides_password() {
        let plain = Plain::new("", "user", "hunter2", "localhost");
        assert!(!format!("{plain:?}").contains("hunter2"));
    }
}
