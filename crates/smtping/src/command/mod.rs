//! SMTP commands and their outcomes.
//!
//! A [`Command`] is one outgoing protocol line together with the reply that
//! counts as success. After it has been executed by the transport it also
//! carries the server's [`Reply`]. Commands are single-use; a slice of them
//! executed together forms one batch.

use crate::error::Error;
use crate::types::{Reply, ReplyCode};

/// Reply a command must receive to count as successful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// Exactly this reply code.
    Code(ReplyCode),
    /// Any well-formed reply (the caller interprets it).
    Any,
}

impl Expect {
    /// Returns true if `code` satisfies this expectation.
    #[must_use]
    pub fn accepts(self, code: ReplyCode) -> bool {
        match self {
            Self::Code(expected) => expected == code,
            Self::Any => true,
        }
    }
}

/// An SMTP command line and, once executed, its reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    line: String,
    expect: Expect,
    reply: Option<Reply>,
}

impl Command {
    /// Creates a command expecting a specific reply code.
    #[must_use]
    pub fn new(expect: ReplyCode, line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            expect: Expect::Code(expect),
            reply: None,
        }
    }

    /// Creates a command that accepts any reply.
    #[must_use]
    pub fn any_reply(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            expect: Expect::Any,
            reply: None,
        }
    }

    /// `EHLO <identity>`
    #[must_use]
    pub fn ehlo(identity: &str) -> Self {
        Self::new(ReplyCode::OK, format!("EHLO {identity}"))
    }

    /// `HELO <identity>`
    #[must_use]
    pub fn helo(identity: &str) -> Self {
        Self::new(ReplyCode::OK, format!("HELO {identity}"))
    }

    /// `STARTTLS`
    #[must_use]
    pub fn starttls() -> Self {
        Self::new(ReplyCode::SERVICE_READY, "STARTTLS")
    }

    /// `AUTH <mechanism> <initial-response>`, trimmed when the response is empty.
    #[must_use]
    pub fn auth(mechanism: &str, encoded_response: &str) -> Self {
        Self::any_reply(format!("AUTH {mechanism} {encoded_response}").trim_end())
    }

    /// A bare base64 line answering a server challenge.
    #[must_use]
    pub fn auth_response(encoded_response: impl Into<String>) -> Self {
        Self::any_reply(encoded_response)
    }

    /// `*` - cancels an AUTH exchange.
    #[must_use]
    pub fn auth_cancel() -> Self {
        Self::new(ReplyCode::PARAMETER_ERROR, "*")
    }

    /// `MAIL FROM:<from> BODY=8BITMIME`
    #[must_use]
    pub fn mail_from(from: &str) -> Self {
        Self::new(ReplyCode::OK, format!("MAIL FROM:<{from}> BODY=8BITMIME"))
    }

    /// `RCPT TO:<to>`
    #[must_use]
    pub fn rcpt_to(to: &str) -> Self {
        Self::new(ReplyCode::OK, format!("RCPT TO:<{to}>"))
    }

    /// `DATA`
    #[must_use]
    pub fn data() -> Self {
        Self::new(ReplyCode::START_DATA, "DATA")
    }

    /// `QUIT`
    #[must_use]
    pub fn quit() -> Self {
        Self::new(ReplyCode::CLOSING, "QUIT")
    }

    /// Returns the protocol line (without CRLF).
    #[must_use]
    pub fn line(&self) -> &str {
        &self.line
    }

    /// Returns the reply expectation.
    #[must_use]
    pub const fn expect(&self) -> Expect {
        self.expect
    }

    /// Returns the reply, if the command has been executed.
    #[must_use]
    pub const fn reply(&self) -> Option<&Reply> {
        self.reply.as_ref()
    }

    /// Records the reply read for this command.
    pub(crate) fn set_reply(&mut self, reply: Reply) {
        self.reply = Some(reply);
    }

    /// Returns the error outcome of this command.
    ///
    /// `None` if the reply met the expectation. An unexecuted command reports
    /// an invalid-state error.
    #[must_use]
    pub fn error(&self) -> Option<Error> {
        match &self.reply {
            Some(reply) if self.expect.accepts(reply.code) => None,
            Some(reply) => Some(reply.to_error()),
            None => Some(Error::InvalidState(format!(
                "no reply received for {}",
                self.redacted()
            ))),
        }
    }

    /// Returns true if the command was executed and its reply met the expectation.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error().is_none()
    }

    /// Serializes the command to bytes, CRLF-terminated.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.line.len() + 2);
        buf.extend_from_slice(self.line.as_bytes());
        buf.extend_from_slice(b"\r\n");
        buf
    }

    /// Returns the line as it may appear in logs.
    ///
    /// Lines accepting any reply belong to an AUTH exchange and carry
    /// credentials, so only their shape is kept.
    #[must_use]
    pub fn redacted(&self) -> &str {
        match self.expect {
            Expect::Code(_) => &self.line,
            Expect::Any if self.line.starts_with("AUTH") => "AUTH <redacted>",
            Expect::Any => "<redacted>",
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

    fn reply(code: u16) -> Reply {
        Reply::new(ReplyCode::new(code), vec!["text".to_string()])
    }

    #[test]
    fn test_ehlo_command() {
        assert_eq!(Command::ehlo("localhost").serialize(), b"EHLO localhost\r\n");
    }

    #[test]
    fn test_helo_command() {
        assert_eq!(Command::helo("localhost").serialize(), b"HELO localhost\r\n");
    }

    #[test]
    fn test_mail_from_command() {
        let cmd = Command::mail_from("sender@example.com");
        assert_eq!(
            cmd.serialize(),
            b"MAIL FROM:<sender@example.com> BODY=8BITMIME\r\n"
        );
        assert_eq!(cmd.expect(), Expect::Code(ReplyCode::OK));
    }

    #[test]
    fn test_rcpt_and_data() {
        assert_eq!(
            Command::rcpt_to("user@example.com").serialize(),
            b"RCPT TO:<user@example.com>\r\n"
        );
        assert_eq!(Command::data().expect(), Expect::Code(ReplyCode::START_DATA));
    }

    #[test]
    fn test_auth_trims_empty_response() {
        assert_eq!(Command::auth("LOGIN", "").line(), "AUTH LOGIN");
        assert_eq!(
            Command::auth("PLAIN", "AHVzZXIAcGFzcw==").line(),
            "AUTH PLAIN AHVzZXIAcGFzcw=="
        );
        assert_eq!(Command::auth("PLAIN", "").expect(), Expect::Any);
    }

    #[test]
    fn test_quit_expects_221() {
        let mut cmd = Command::quit();
        cmd.set_reply(reply(221));
        assert!(cmd.is_success());
    }

    #[test]
    fn test_unexecuted_command_reports_error() {
        let cmd = Command::data();
        assert!(matches!(cmd.error(), Some(Error::InvalidState(_))));
    }

    #[test]
    fn test_mismatch_is_smtp_error() {
        let mut cmd = Command::rcpt_to("nobody@example.com");
        cmd.set_reply(reply(550));
        assert_eq!(cmd.error().and_then(|e| e.reply_code()), Some(550));
        assert!(!cmd.is_success());
    }

    #[test]
    fn test_any_reply_accepts_everything() {
        let mut cmd = Command::auth("PLAIN", "abc");
        cmd.set_reply(reply(535));
        assert!(cmd.is_success());
    }

    #[test]
    fn test_redacted_hides_credentials() {
        assert_eq!(
            Command::auth("PLAIN", "AHVzZXIAcGFzcw==").redacted(),
            "AUTH <redacted>"
        );
        assert_eq!(Command::auth_response("c2VjcmV0").redacted(), "<redacted>");
        assert_eq!(Command::mail_from("a@b").redacted(), "MAIL FROM:<a@b> BODY=8BITMIME");
    }
}
