//! SASL authentication mechanisms.
//!
//! A [`Mechanism`] is a small state machine driven by the client's AUTH
//! loop: [`Mechanism::start`] produces the mechanism name and initial
//! response, then [`Mechanism::next`] is fed every server challenge until it
//! reports that it has nothing more to send.
//!
//! Implements:
//! - PLAIN (RFC 4616) - Basic username/password authentication
//! - LOGIN - Legacy username/password prompts
//! - XOAUTH2 (Google/Microsoft proprietary) - `OAuth2` bearer token

mod login;
mod plain;
mod xoauth2;

pub use login::Login;
pub use plain::Plain;
pub use xoauth2::XOAuth2;

use crate::error::{Error, Result};

/// What the mechanism knows about the server when the exchange starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    /// Server hostname the client dialed.
    pub host: String,
    /// Whether the connection is TLS-protected.
    pub tls: bool,
    /// Mechanisms advertised in the EHLO `AUTH` extension.
    pub mechanisms: Vec<String>,
}

impl ServerInfo {
    /// Returns true if the server advertised `mechanism`.
    #[must_use]
    pub fn advertises(&self, mechanism: &str) -> bool {
        self.mechanisms.iter().any(|m| m.eq_ignore_ascii_case(mechanism))
    }
}

/// Mechanism name and initial response returned by [`Mechanism::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialResponse {
    /// Mechanism name sent with `AUTH`.
    pub mechanism: String,
    /// Raw (not yet base64-encoded) initial response; may be empty.
    pub response: Vec<u8>,
}

impl InitialResponse {
    /// Creates an initial response.
    #[must_use]
    pub fn new(mechanism: impl Into<String>, response: impl Into<Vec<u8>>) -> Self {
        Self {
            mechanism: mechanism.into(),
            response: response.into(),
        }
    }
}

/// A pluggable SASL mechanism.
pub trait Mechanism: Send {
    /// Begins the exchange.
    ///
    /// # Errors
    ///
    /// Returns an error if the mechanism refuses to run against this server.
    fn start(&mut self, server: &ServerInfo) -> Result<InitialResponse>;

    /// Answers a server challenge.
    ///
    /// `more` is true for a `334` continuation and false for the final `235`
    /// success text. Returning `Ok(None)` ends the exchange.
    ///
    /// # Errors
    ///
    /// Returns an error to abort the exchange; the client then cancels it.
    fn next(&mut self, challenge: &[u8], more: bool) -> Result<Option<Vec<u8>>>;
}

impl<M: Mechanism + ?Sized> Mechanism for Box<M> {
    fn start(&mut self, server: &ServerInfo) -> Result<InitialResponse> {
        (**self).start(server)
    }

    fn next(&mut self, challenge: &[u8], more: bool) -> Result<Option<Vec<u8>>> {
        (**self).next(challenge, more)
    }
}

fn is_localhost(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1")
}

/// Refuses to send credentials in the clear except to the local machine.
fn ensure_secure(server: &ServerInfo) -> Result<()> {
    if server.tls || is_localhost(&server.host) {
        Ok(())
    } else {
        Err(Error::Auth("unencrypted connection".into()))
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

    #[test]
    fn test_advertises_is_case_insensitive() {
        let info = ServerInfo {
            host: "mx".into(),
            tls: true,
            mechanisms: vec!["PLAIN".into(), "login".into()],
        };
        assert!(info.advertises("plain"));
        assert!(info.advertises("LOGIN"));
        assert!(!info.advertises("XOAUTH2"));
    }

    #[test]
    fn test_ensure_secure() {
        let mut info = ServerInfo {
            host: "mail.example.com".into(),
            ..ServerInfo::default()
        };
        assert!(ensure_secure(&info).is_err());

        info.tls = true;
        assert!(ensure_secure(&info).is_ok());

        let local = ServerInfo {
            host: "localhost".into(),
            ..ServerInfo::default()
        };
        assert!(ensure_secure(&local).is_ok());
    }

    #[test]
    fn test_boxed_mechanism_delegates() {
        let mut mech: Box<dyn Mechanism> = Box::new(Plain::new("", "u", "p", "localhost"));
        let info = ServerInfo {
            host: "localhost".into(),
            ..ServerInfo::default()
        };
        assert_eq!(mech.start(&info).unwrap().mechanism, "PLAIN");
    }
}
