//! Line transport for the SMTP protocol.
//!
//! SMTP is a strict request/reply protocol: every command line is answered by
//! exactly one (possibly multi-line) numbered reply. [`Transport`] executes
//! batches of [`Command`]s over a byte stream, writing all lines of a batch
//! back-to-back before reading their replies in the same order. A batch of
//! one is the ordinary lock-step exchange; longer batches are pipelined.

mod dot;
mod sequencer;

pub use dot::{DotStuffer, DotWriter, dot_stuff};
pub use sequencer::Sequencer;

use std::future::Future;
use std::io;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::command::Command;
use crate::error::{Error, Result};
use crate::parser::{is_last_reply_line, parse_reply};
use crate::types::Reply;

/// Default buffer size for reading and writing.
const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Maximum reply line length to prevent memory exhaustion.
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Runs `fut` under an optional deadline.
pub(crate) async fn with_deadline<T, F>(timeout: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| Error::Timeout(limit))?,
        None => fut.await,
    }
}

/// Request/reply sequencer over a byte stream.
#[derive(Debug)]
pub struct Transport<S> {
    reader: BufReader<S>,
    write_buffer: BytesMut,
    sequencer: Sequencer,
    io_timeout: Option<Duration>,
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a transport without an I/O deadline.
    pub fn new(stream: S) -> Self {
        Self::with_timeout(stream, None)
    }

    /// Creates a transport whose every read and write is bounded by `io_timeout`.
    pub fn with_timeout(stream: S, io_timeout: Option<Duration>) -> Self {
        Self {
            reader: BufReader::with_capacity(DEFAULT_BUFFER_SIZE, stream),
            write_buffer: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE),
            sequencer: Sequencer::new(),
            io_timeout,
        }
    }

    /// Executes a batch of commands.
    ///
    /// All lines are written before any reply is read. Each command receives
    /// its own reply in send order; a reply with an unexpected code does not
    /// stop the remaining replies from being read. The result is the outcome
    /// of the last command. I/O and framing failures end the batch at once.
    ///
    /// # Errors
    ///
    /// Returns the last command's error, or the I/O error that broke the batch.
    pub async fn execute(&mut self, commands: &mut [Command]) -> Result<()> {
        let Some(last) = commands.len().checked_sub(1) else {
            return Err(Error::InvalidState("empty command batch".into()));
        };

        let id = self.sequencer.next_id();
        tracing::debug!(
            id,
            commands = commands.len(),
            pipelined = commands.len() > 1,
            "executing batch"
        );

        self.write_buffer.clear();
        for cmd in commands.iter() {
            tracing::trace!(id, line = cmd.redacted(), ">>");
            self.write_buffer.extend_from_slice(&cmd.serialize());
        }
        self.flush_write_buffer().await?;

        self.sequencer.start_response(id);
        let received = self.receive(id, commands).await;
        self.sequencer.end_response(id);
        received?;

        commands[last].error().map_or(Ok(()), Err)
    }

    async fn receive(&mut self, id: u64, commands: &mut [Command]) -> Result<()> {
        for cmd in commands.iter_mut() {
            let reply = self.read_reply().await?;
            if !cmd.expect().accepts(reply.code) {
                tracing::debug!(
                    id,
                    line = cmd.redacted(),
                    code = reply.code.as_u16(),
                    "unexpected reply"
                );
            }
            cmd.set_reply(reply);
        }
        Ok(())
    }

    /// Reads one complete (possibly multi-line) reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails, times out, or the reply is malformed.
    pub async fn read_reply(&mut self) -> Result<Reply> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await?;
            tracing::trace!(line = %line, "<<");

            let is_last = is_last_reply_line(&line);
            if !is_last && line.as_bytes().get(3) != Some(&b'-') {
                return Err(Error::Protocol(format!("Malformed reply line: {line}")));
            }
            lines.push(line);

            if is_last {
                break;
            }
        }

        parse_reply(&lines)
    }

    /// Reads a single line, stripping the CRLF (or bare LF) terminator.
    async fn read_line(&mut self) -> Result<String> {
        let timeout = self.io_timeout;
        let line = with_deadline(timeout, async {
            let mut line = Vec::new();
            loop {
                let buf = self.reader.fill_buf().await?;
                if buf.is_empty() {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed",
                    )));
                }

                if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                    if line.len() + pos > MAX_LINE_LENGTH {
                        return Err(Error::Protocol("line too long".to_string()));
                    }
                    line.extend_from_slice(&buf[..pos]);
                    self.reader.consume(pos + 1);
                    break;
                }

                let len = buf.len();
                line.extend_from_slice(buf);
                self.reader.consume(len);

                if line.len() > MAX_LINE_LENGTH {
                    return Err(Error::Protocol("line too long".to_string()));
                }
            }
            Ok::<_, Error>(line)
        })
        .await?;

        let line = line.strip_suffix(b"\r").unwrap_or(&line);
        Ok(String::from_utf8_lossy(line).into_owned())
    }

    /// Starts writing DATA content through the dot-stuffing layer.
    pub fn dot_writer(&mut self) -> DotWriter<'_, S> {
        DotWriter::new(self)
    }

    /// Writes raw bytes and flushes.
    pub(crate) async fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.write_buffer.clear();
        self.write_buffer.extend_from_slice(data);
        self.flush_write_buffer().await
    }

    async fn flush_write_buffer(&mut self) -> Result<()> {
        let timeout = self.io_timeout;
        with_deadline(timeout, async {
            let stream = self.reader.get_mut();
            stream.write_all(&self.write_buffer).await?;
            stream.flush().await?;
            Ok::<_, Error>(())
        })
        .await
    }

    /// Shuts down the write half of the stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the shutdown fails or times out.
    pub async fn shutdown(&mut self) -> Result<()> {
        let timeout = self.io_timeout;
        with_deadline(timeout, async {
            self.reader.get_mut().shutdown().await?;
            Ok::<_, Error>(())
        })
        .await
    }

    /// Returns true if bytes have been received but not yet consumed.
    #[must_use]
    pub fn has_buffered_input(&self) -> bool {
        !self.reader.buffer().is_empty()
    }

    /// Returns the sequencing state.
    #[must_use]
    pub const fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    /// Returns the configured I/O deadline.
    #[must_use]
    pub const fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout
    }

    /// Gets a reference to the underlying stream.
    pub fn get_ref(&self) -> &S {
        self.reader.get_ref()
    }

    /// Surrenders the underlying stream, e.g. for a TLS upgrade.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if unread bytes are buffered: they belong to
    /// the current exchange and would be lost with the transport.
    pub fn into_inner(self) -> Result<S> {
        let pending = self.reader.buffer().len();
        if pending > 0 {
            return Err(Error::Protocol(format!(
                "{pending} unread bytes buffered before stream handover"
            )));
        }
        Ok(self.reader.into_inner())
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
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_read_single_line_reply() {
        let mock = Builder::new().read(b"220 mx.example.com ESMTP\r\n").build();
        let mut transport = Transport::new(mock);

        let reply = transport.read_reply().await.unwrap();
        assert_eq!(reply.code, ReplyCode::SERVICE_READY);
        assert_eq!(reply.message_text(), "mx.example.com ESMTP");
    }

    #[tokio::test]
    async fn test_read_multi_line_reply_across_chunks() {
        let mock = Builder::new()
            .read(b"250-mail.example.com\r\n250-PIPE")
            .read(b"LINING\r\n250 AUTH PLAIN LOGIN\r\n")
            .build();
        let mut transport = Transport::new(mock);

        let reply = transport.read_reply().await.unwrap();
        assert_eq!(reply.message, vec!["mail.example.com", "PIPELINING", "AUTH PLAIN LOGIN"]);
    }

    #[tokio::test]
    async fn test_bare_lf_terminator() {
        let mock = Builder::new().read(b"250 OK\n").build();
        let mut transport = Transport::new(mock);
        assert_eq!(transport.read_reply().await.unwrap().code, ReplyCode::OK);
    }

    #[tokio::test]
    async fn test_single_command() {
        let mock = Builder::new()
            .write(b"EHLO localhost\r\n")
            .read(b"250 mx\r\n")
            .build();
        let mut transport = Transport::new(mock);

        let mut cmds = [Command::ehlo("localhost")];
        transport.execute(&mut cmds).await.unwrap();
        assert!(cmds[0].is_success());
        assert_eq!(transport.sequencer().issued(), 1);
        assert_eq!(transport.sequencer().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_pipelined_batch_writes_before_reading() {
        let mock = Builder::new()
            .write(b"MAIL FROM:<a@example.com> BODY=8BITMIME\r\nRCPT TO:<b@example.com>\r\nDATA\r\n")
            .read(b"250 sender ok\r\n250 rcpt ok\r\n354 go ahead\r\n")
            .build();
        let mut transport = Transport::new(mock);

        let mut cmds = [
            Command::mail_from("a@example.com"),
            Command::rcpt_to("b@example.com"),
            Command::data(),
        ];
        transport.execute(&mut cmds).await.unwrap();

        assert_eq!(cmds[0].reply().unwrap().message_text(), "sender ok");
        assert_eq!(cmds[1].reply().unwrap().message_text(), "rcpt ok");
        assert_eq!(cmds[2].reply().unwrap().code, ReplyCode::START_DATA);
    }

    #[tokio::test]
    async fn test_early_failure_does_not_stop_batch() {
        let mock = Builder::new()
            .write(b"MAIL FROM:<a@example.com> BODY=8BITMIME\r\nRCPT TO:<b@example.com>\r\nDATA\r\n")
            .read(b"550 sender rejected\r\n503 need MAIL\r\n503 need RCPT\r\n")
            .build();
        let mut transport = Transport::new(mock);

        let mut cmds = [
            Command::mail_from("a@example.com"),
            Command::rcpt_to("b@example.com"),
            Command::data(),
        ];
        let err = transport.execute(&mut cmds).await.unwrap_err();

        // The batch reports the last command; earlier ones keep their own outcome.
        assert_eq!(err.reply_code(), Some(503));
        assert_eq!(cmds[0].error().unwrap().reply_code(), Some(550));
        assert!(cmds.iter().all(|c| c.reply().is_some()));
    }

    #[tokio::test]
    async fn test_batch_succeeds_when_only_last_matches() {
        let mock = Builder::new()
            .write(b"RCPT TO:<x@example.com>\r\nDATA\r\n")
            .read(b"550 no\r\n354 go\r\n")
            .build();
        let mut transport = Transport::new(mock);

        let mut cmds = [Command::rcpt_to("x@example.com"), Command::data()];
        assert!(transport.execute(&mut cmds).await.is_ok());
        assert!(!cmds[0].is_success());
    }

    #[tokio::test]
    async fn test_empty_batch_rejected() {
        let mock = Builder::new().build();
        let mut transport = Transport::new(mock);
        assert!(matches!(
            transport.execute(&mut []).await,
            Err(Error::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_eof_is_io_error() {
        let mock = Builder::new().write(b"QUIT\r\n").build();
        let mut transport = Transport::new(mock);

        let mut cmds = [Command::quit()];
        let err = transport.execute(&mut cmds).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(transport.sequencer().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_malformed_line_rejected() {
        let mock = Builder::new().read(b"250_OK\r\n").build();
        let mut transport = Transport::new(mock);
        assert!(matches!(
            transport.read_reply().await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_line_length_limit() {
        // Exactly one byte over the limit so the mock is fully drained.
        let long_line = "2".repeat(MAX_LINE_LENGTH + 1);
        let mock = Builder::new().read(long_line.as_bytes()).build();
        let mut transport = Transport::new(mock);

        let err = transport.read_reply().await.unwrap_err();
        assert!(err.to_string().contains("line too long"));
    }

    #[tokio::test]
    async fn test_line_length_limit_when_newline_arrives_late() {
        let head = "2".repeat(MAX_LINE_LENGTH - 10);
        let tail = format!("{}\r\n", "x".repeat(20));
        let mock = Builder::new()
            .read(head.as_bytes())
            .read(tail.as_bytes())
            .build();
        let mut transport = Transport::new(mock);

        let err = transport.read_reply().await.unwrap_err();
        assert!(err.to_string().contains("line too long"));
    }

    #[tokio::test]
    async fn test_line_at_length_limit_is_accepted() {
        // The CR counts towards the limit.
        let text = "a".repeat(MAX_LINE_LENGTH - 5);
        let line = format!("250 {text}\r\n");
        let mock = Builder::new().read(line.as_bytes()).build();
        let mut transport = Transport::new(mock);

        let reply = transport.read_reply().await.unwrap();
        assert_eq!(reply.message_text().len(), MAX_LINE_LENGTH - 5);
    }

    #[tokio::test]
    async fn test_dot_writer_frames_content() {
        let mock = Builder::new()
            .write(b"Subject:x\r\n..dot\r\n")
            .write(b".\r\n")
            .build();
        let mut transport = Transport::new(mock);

        let mut writer = transport.dot_writer();
        writer.write(b"Subject:x\n.dot\r\n").await.unwrap();
        assert_eq!(writer.written(), 16);
        writer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_into_inner_refuses_buffered_bytes() {
        let mock = Builder::new()
            .read(b"220 ready\r\nEXTRA\r\n")
            .build();
        let mut transport = Transport::new(mock);
        transport.read_reply().await.unwrap();

        assert!(transport.has_buffered_input());
        assert!(matches!(transport.into_inner(), Err(Error::Protocol(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout() {
        let mock = Builder::new().wait(Duration::from_secs(10)).build();
        let mut transport = Transport::with_timeout(mock, Some(Duration::from_secs(1)));

        let err = transport.read_reply().await.unwrap_err();
        assert!(matches!(err, Error::Timeout(d) if d == Duration::from_secs(1)));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn run_batch(codes: &[u16]) -> (Result<()>, Vec<Command>) {
            let mut commands: Vec<Command> = (0..codes.len())
                .map(|i| Command::new(ReplyCode::OK, format!("NOOP {i}")))
                .collect();
            let written: Vec<u8> = commands.iter().flat_map(Command::serialize).collect();
            let replies: String = codes.iter().map(|code| format!("{code} r\r\n")).collect();

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let result = runtime.block_on(async {
                let mock = Builder::new().write(&written).read(replies.as_bytes()).build();
                let mut transport = Transport::new(mock);
                transport.execute(&mut commands).await
            });
            (result, commands)
        }

        proptest! {
            #[test]
            fn batch_outcome_follows_last_reply(
                codes in proptest::collection::vec(
                    prop_oneof![Just(250u16), Just(354u16), Just(451u16), Just(550u16)],
                    1..6,
                )
            ) {
                let (result, commands) = run_batch(&codes);

                prop_assert_eq!(result.is_ok(), codes.last() == Some(&250));
                for (command, code) in commands.iter().zip(&codes) {
                    prop_assert_eq!(command.reply().map(|r| r.code.as_u16()), Some(*code));
                    prop_assert_eq!(command.is_success(), *code == 250);
                }
            }
        }
    }
}
