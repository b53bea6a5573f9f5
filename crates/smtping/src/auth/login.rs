//! LOGIN mechanism.

use super::{InitialResponse, Mechanism, ServerInfo, ensure_secure};
use crate::error::{Error, Result};

/// LOGIN authentication: the server prompts for `Username:` then `Password:`.
#[derive(Clone)]
pub struct Login {
    username: String,
    password: String,
}

impl Login {
    /// Creates LOGIN credentials.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Login {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Login")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Mechanism for Login {
    fn start(&mut self, server: &ServerInfo) -> Result<InitialResponse> {
        ensure_secure(server)?;
        Ok(InitialResponse::new("LOGIN", Vec::new()))
    }

    fn next(&mut self, challenge: &[u8], more: bool) -> Result<Option<Vec<u8>>> {
        if !more {
            return Ok(None);
        }

        let prompt = String::from_utf8_lossy(challenge).trim().to_ascii_lowercase();
        match prompt.as_str() {
            "username:" | "user name" | "username" => Ok(Some(self.username.clone().into_bytes())),
            "password:" | "password" => Ok(Some(self.password.clone().into_bytes())),
            _ => Err(Error::Auth(format!("unexpected LOGIN prompt: {prompt}"))),
        }
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
    fn test_prompts() {
        let mut login = Login::new("alice", "secret");
        let info = ServerInfo {
            host: "mx".into(),
            tls: true,
            mechanisms: vec!["LOGIN".into()],
        };

        let start = login.start(&info).unwrap();
        assert_eq!(start.mechanism, "LOGIN");
        assert!(start.response.is_empty());

        assert_eq!(login.next(b"Username:", true).unwrap(), Some(b"alice".to_vec()));
        assert_eq!(login.next(b"Password:", true).unwrap(), Some(b"secret".to_vec()));
        assert_eq!(login.next(b"Authentication successful", false).unwrap(), None);
    }

    #[test]
    fn test_unknown_prompt() {
        let mut login = Login::new("alice", "secret");
        assert!(login.next(b"Favourite colour:", true).is_err());
    }

    #[test]
    fn test_requires_tls_for_remote_host() {
        let mut login = Login::new("alice", "secret");
        let info = ServerInfo {
            host: "mail.example.com".into(),
            ..ServerInfo::default()
        };
        assert!(login.start(&info).is_err());
    }
}
