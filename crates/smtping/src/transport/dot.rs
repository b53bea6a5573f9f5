//! Dot-stuffed DATA framing.
//!
//! Message content is sent line by line with CRLF endings. A line starting
//! with `.` gets a second `.` so the server does not mistake it for the end
//! of data, and the stream ends with a line holding a single `.`.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite};

use super::Transport;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Nothing written yet.
    Begin,
    /// At the start of a line.
    BeginLine,
    /// Just wrote a `\r`.
    Cr,
    /// Inside a line.
    Data,
}

/// Incremental dot-stuffing encoder.
///
/// Converts bare `\n` into `\r\n` and doubles leading dots. The state carries
/// over between calls so content may be fed in arbitrary chunks.
#[derive(Debug, Clone)]
pub struct DotStuffer {
    state: State,
}

impl Default for DotStuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl DotStuffer {
    /// Creates an encoder positioned before the first byte.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: State::Begin,
        }
    }

    /// Encodes `input`, appending the framed bytes to `out`.
    pub fn encode(&mut self, input: &[u8], out: &mut BytesMut) {
        out.reserve(input.len());
        for &b in input {
            match self.state {
                State::Begin | State::BeginLine => {
                    if b == b'.' {
                        out.extend_from_slice(b".");
                    }
                    self.state = State::Data;
                    self.data_byte(b, out);
                }
                State::Data => self.data_byte(b, out),
                State::Cr if b == b'\n' => self.state = State::BeginLine,
                State::Cr => {
                    self.state = State::Data;
                    self.data_byte(b, out);
                }
            }
            out.extend_from_slice(&[b]);
        }
    }

    fn data_byte(&mut self, b: u8, out: &mut BytesMut) {
        match b {
            b'\r' => self.state = State::Cr,
            b'\n' => {
                out.extend_from_slice(b"\r");
                self.state = State::BeginLine;
            }
            _ => {}
        }
    }

    /// Appends the end-of-data sequence, completing a partial last line.
    pub fn finish(self, out: &mut BytesMut) {
        match self.state {
            State::Begin | State::Data => out.extend_from_slice(b"\r\n.\r\n"),
            State::Cr => out.extend_from_slice(b"\n.\r\n"),
            State::BeginLine => out.extend_from_slice(b".\r\n"),
        }
    }
}

/// Writer for the DATA phase of a transaction.
///
/// Content written here is dot-stuffed and flushed to the server.
/// [`DotWriter::close`] sends the terminating `.` line; the final reply is
/// read separately through the transport.
pub struct DotWriter<'a, S> {
    transport: &'a mut Transport<S>,
    encoder: DotStuffer,
    written: usize,
}

impl<'a, S> DotWriter<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(super) const fn new(transport: &'a mut Transport<S>) -> Self {
        Self {
            transport,
            encoder: DotStuffer::new(),
            written: 0,
        }
    }

    /// Writes a chunk of message content.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or times out.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        let mut buf = BytesMut::with_capacity(data.len() + data.len() / 16);
        self.encoder.encode(data, &mut buf);
        self.written += data.len();
        self.transport.write_raw(&buf).await
    }

    /// Returns the number of content bytes accepted so far (before stuffing).
    #[must_use]
    pub const fn written(&self) -> usize {
        self.written
    }

    /// Terminates the data stream with `<CRLF>.<CRLF>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or times out.
    pub async fn close(self) -> Result<()> {
        let mut buf = BytesMut::with_capacity(5);
        self.encoder.finish(&mut buf);
        self.transport.write_raw(&buf).await
    }
}

/// Encodes a complete message in one go.
#[must_use]
pub fn dot_stuff(content: &[u8]) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(content.len() + 5);
    let mut encoder = DotStuffer::new();
    encoder.encode(content, &mut out);
    encoder.finish(&mut out);
    out.to_vec()
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
    use proptest::prelude::*;

    #[test]
    fn test_plain_content() {
        assert_eq!(dot_stuff(b"Hello\r\n"), b"Hello\r\n.\r\n");
    }

    #[test]
    fn test_missing_final_crlf() {
        assert_eq!(dot_stuff(b"Hello"), b"Hello\r\n.\r\n");
    }

    #[test]
    fn test_bare_lf_becomes_crlf() {
        assert_eq!(dot_stuff(b"a\nb\n"), b"a\r\nb\r\n.\r\n");
    }

    #[test]
    fn test_leading_dots_are_doubled() {
        assert_eq!(dot_stuff(b".hidden\r\n"), b"..hidden\r\n.\r\n");
        assert_eq!(dot_stuff(b"x\r\n.\r\ny\r\n"), b"x\r\n..\r\ny\r\n.\r\n");
    }

    #[test]
    fn test_dot_inside_line_untouched() {
        assert_eq!(dot_stuff(b"a.b\r\n"), b"a.b\r\n.\r\n");
    }

    #[test]
    fn test_trailing_cr() {
        assert_eq!(dot_stuff(b"a\r"), b"a\r\n.\r\n");
    }

    #[test]
    fn test_repeated_cr_before_crlf() {
        assert_eq!(dot_stuff(b"a\r\r\nb"), b"a\r\r\nb\r\n.\r\n");
        assert_eq!(dot_stuff(b"a\r\r\r\n"), b"a\r\r\r\n.\r\n");
    }

    #[test]
    fn test_cr_then_bare_lf_later() {
        assert_eq!(dot_stuff(b"a\rb\nc"), b"a\rb\r\nc\r\n.\r\n");
    }

    #[test]
    fn test_empty_content() {
        assert_eq!(dot_stuff(b""), b"\r\n.\r\n");
    }

    #[test]
    fn test_chunked_encoding_matches_whole() {
        let mut out = BytesMut::new();
        let mut encoder = DotStuffer::new();
        encoder.encode(b"line\r", &mut out);
        encoder.encode(b"\n.", &mut out);
        encoder.encode(b"dot\n", &mut out);
        encoder.finish(&mut out);
        assert_eq!(&out[..], dot_stuff(b"line\r\n.dot\n").as_slice());
    }

    proptest! {
        #[test]
        fn stuffed_output_never_ends_early(body in "[a-z.\r\n]{0,64}") {
            let out = dot_stuff(body.as_bytes());
            prop_assert!(out.ends_with(b"\r\n.\r\n"));
            // The only lone-dot line is the terminator.
            let text = String::from_utf8(out).unwrap();
            let lines: Vec<&str> = text.split("\r\n").collect();
            let dots = lines.iter().filter(|l| **l == ".").count();
            prop_assert_eq!(dots, 1);
        }

        #[test]
        fn only_bare_lf_gains_a_cr(body in "[a-z\r\n]{0,64}") {
            let mut expected = Vec::new();
            let mut prev = None;
            for b in body.bytes() {
                if b == b'\n' && prev != Some(b'\r') {
                    expected.push(b'\r');
                }
                expected.push(b);
                prev = Some(b);
            }
            let out = dot_stuff(body.as_bytes());
            prop_assert!(out.starts_with(&expected));
        }

        #[test]
        fn unstuffing_restores_lines(lines in proptest::collection::vec("[a-z.]{0,8}", 1..8)) {
            let body = lines.join("\r\n") + "\r\n";
            let out = String::from_utf8(dot_stuff(body.as_bytes())).unwrap();
            let restored: Vec<String> = out
                .strip_suffix(".\r\n")
                .unwrap()
                .split_terminator("\r\n")
                .map(|l| l.strip_prefix('.').unwrap_or(l).to_string())
                .collect();
            prop_assert_eq!(restored, lines);
        }
    }
}
