//! Record of a single mail submission.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::command::Command;
use crate::error::{Error, Result};
use crate::types::Reply;

/// Final outcome of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The server accepted the message.
    Sent,
    /// The submission failed; see [`Envelope::error`].
    Bounce,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sent => write!(f, "sent"),
            Self::Bounce => write!(f, "bounce"),
        }
    }
}

/// A send attempt: its inputs, command trace, timing and outcome.
#[derive(Debug)]
pub struct Envelope {
    /// Reverse-path address.
    pub from: String,
    /// Recipient address (`user@domain`).
    pub to: String,
    /// Subject header value.
    pub subject: String,
    /// Message body.
    pub body: String,
    /// Body length in bytes.
    pub size: usize,
    /// When the submission started.
    pub started_at: DateTime<Utc>,
    /// When the submission finished.
    pub finished_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds.
    pub elapsed_ms: u64,
    /// Outcome.
    pub status: Status,
    /// Code of the final reply, or of the reply that caused the bounce.
    pub code: Option<u16>,
    /// Text of the final reply, or the bounce reason.
    pub message: String,
    /// Error that caused a bounce.
    pub error: Option<Error>,
    /// Commands executed, in order. Commands never sent have no reply.
    pub commands: Vec<Command>,
}

impl Envelope {
    /// Creates an envelope for a submission starting now.
    #[must_use]
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        let body = body.into();
        Self {
            from: from.into(),
            to: to.into(),
            subject: subject.into(),
            size: body.len(),
            body,
            started_at: now,
            finished_at: now,
            elapsed_ms: 0,
            status: Status::Sent,
            code: None,
            message: String::new(),
            error: None,
            commands: Vec::new(),
        }
    }

    /// Returns the message as written after DATA.
    #[must_use]
    pub fn content(&self) -> String {
        format!(
            "From:{}\r\nTo:{}\r\nSubject:{}\r\n{}\r\n",
            self.from, self.to, self.subject, self.body
        )
    }

    /// Returns true if the server accepted the message.
    #[must_use]
    pub fn is_sent(&self) -> bool {
        self.status == Status::Sent
    }

    /// Records the outcome of the submission.
    pub(crate) fn finish(
        &mut self,
        commands: Vec<Command>,
        outcome: Result<Reply>,
        elapsed: Duration,
    ) {
        self.commands = commands;
        self.finished_at = Utc::now();
        self.elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.size = self.body.len();

        match outcome {
            Ok(reply) => {
                self.status = Status::Sent;
                self.code = Some(reply.code.as_u16());
                self.message = reply.message_text();
            }
            Err(err) => {
                self.status = Status::Bounce;
                self.code = err.reply_code();
                self.message = match &err {
                    Error::SmtpError { message, .. } => message.clone(),
                    other => other.to_string(),
                };
                self.error = Some(err);
            }
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
    use crate::types::ReplyCode;

    #[test]
    fn test_content_format() {
        let envelope = Envelope::new("a@x.org", "b@y.org", "hi", "body");
        assert_eq!(
            envelope.content(),
            "From:a@x.org\r\nTo:b@y.org\r\nSubject:hi\r\nbody\r\n"
        );
    }

    #[test]
    fn test_status_display() {
        assert_eq!(Status::Sent.to_string(), "sent");
        assert_eq!(Status::Bounce.to_string(), "bounce");
    }

    #[test]
    fn test_finish_sent() {
        let mut envelope = Envelope::new("a@x.org", "b@y.org", "hi", "hello");
        let reply = Reply::new(ReplyCode::OK, vec!["2.0.0 queued as 42".into()]);
        envelope.finish(Vec::new(), Ok(reply), Duration::from_millis(12));

        assert!(envelope.is_sent());
        assert_eq!(envelope.code, Some(250));
        assert_eq!(envelope.message, "2.0.0 queued as 42");
        assert_eq!(envelope.elapsed_ms, 12);
        assert_eq!(envelope.size, 5);
        assert!(envelope.error.is_none());
        assert!(envelope.finished_at >= envelope.started_at);
    }

    #[test]
    fn test_finish_bounce_with_reply() {
        let mut envelope = Envelope::new("a@x.org", "nobody@y.org", "hi", "");
        envelope.finish(
            Vec::new(),
            Err(Error::smtp_error(550, "5.1.1 user unknown")),
            Duration::ZERO,
        );

        assert_eq!(envelope.status, Status::Bounce);
        assert_eq!(envelope.code, Some(550));
        assert_eq!(envelope.message, "5.1.1 user unknown");
        assert!(envelope.error.as_ref().unwrap().is_permanent());
    }

    #[test]
    fn test_finish_bounce_with_io_error() {
        let mut envelope = Envelope::new("a@x.org", "b@y.org", "hi", "x");
        let err = Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed",
        ));
        envelope.finish(Vec::new(), Err(err), Duration::ZERO);

        assert_eq!(envelope.status, Status::Bounce);
        assert_eq!(envelope.code, None);
        assert!(envelope.message.contains("connection closed"));
    }
}
