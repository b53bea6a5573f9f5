//! SMTP reply parser.

use crate::error::{Error, Result};
use crate::types::{Reply, ReplyCode};

/// Parses an SMTP reply from response lines.
///
/// SMTP replies can be single-line or multi-line:
/// - Single: `250 OK\r\n`
/// - Multi: `250-First line\r\n250-Second line\r\n250 Last line\r\n`
///
/// Lines are expected without their CRLF terminator. Every line of a
/// multi-line reply must carry the same code.
///
/// # Errors
///
/// Returns an error if the reply is malformed.
pub fn parse_reply<S: AsRef<str>>(lines: &[S]) -> Result<Reply> {
    let Some(first) = lines.first() else {
        return Err(Error::Protocol("Empty reply".into()));
    };

    let code = parse_code(first.as_ref())?;

    let mut message = Vec::with_capacity(lines.len());
    for line in lines {
        let line = line.as_ref();
        if parse_code(line)? != code {
            return Err(Error::Protocol(format!(
                "Reply code changed inside multi-line reply: {line}"
            )));
        }
        match line.len() {
            3 => message.push(String::new()),
            // Skip code and separator (e.g., "250-" or "250 ")
            _ if matches!(line.as_bytes()[3], b' ' | b'-') => message.push(line[4..].to_string()),
            _ => return Err(Error::Protocol(format!("Malformed reply line: {line}"))),
        }
    }

    Ok(Reply::new(ReplyCode::new(code), message))
}

fn parse_code(line: &str) -> Result<u16> {
    let code_str = line
        .get(0..3)
        .ok_or_else(|| Error::Protocol(format!("Reply too short: {line}")))?;

    if !code_str.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::Protocol(format!("Invalid reply code: {code_str}")));
    }

    code_str
        .parse::<u16>()
        .map_err(|_| Error::Protocol(format!("Invalid reply code: {code_str}")))
}

/// Checks if a line is the last line of a multi-line reply.
///
/// Multi-line replies use `-` separator for continuation and ` ` for the last
/// line. A bare three-digit code also ends the reply.
#[must_use]
pub fn is_last_reply_line(line: &str) -> bool {
    line.len() == 3 || (line.len() >= 4 && line.as_bytes()[3] == b' ')
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
    fn test_parse_single_line_reply() {
        let reply = parse_reply(&["250 OK"]).unwrap();
        assert_eq!(reply.code.as_u16(), 250);
        assert_eq!(reply.message, vec!["OK"]);
        assert!(reply.is_success());
    }

    #[test]
    fn test_parse_ehlo_reply() {
        let reply = parse_reply(&[
            "250-mail.example.com",
            "250-PIPELINING",
            "250 AUTH PLAIN LOGIN",
        ])
        .unwrap();
        assert_eq!(reply.code, ReplyCode::OK);
        assert_eq!(
            reply.message_text(),
            "mail.example.com\nPIPELINING\nAUTH PLAIN LOGIN"
        );
    }

    #[test]
    fn test_parse_bare_code() {
        let reply = parse_reply(&["354"]).unwrap();
        assert_eq!(reply.code, ReplyCode::START_DATA);
        assert_eq!(reply.message_text(), "");
    }

    #[test]
    fn test_is_last_reply_line() {
        assert!(is_last_reply_line("250 OK"));
        assert!(is_last_reply_line("250"));
        assert!(!is_last_reply_line("250-Continuing"));
        assert!(!is_last_reply_line("25"));
    }

    #[test]
    fn test_parse_error_empty() {
        let lines: [&str; 0] = [];
        assert!(parse_reply(&lines).is_err());
    }

    #[test]
    fn test_parse_error_too_short() {
        assert!(parse_reply(&["25"]).is_err());
    }

    #[test]
    fn test_parse_error_invalid_code() {
        assert!(parse_reply(&["ABC OK"]).is_err());
        assert!(parse_reply(&["+25 OK"]).is_err());
    }

    #[test]
    fn test_parse_error_code_mismatch() {
        assert!(parse_reply(&["250-first", "251 last"]).is_err());
    }

    #[test]
    fn test_parse_error_bad_separator() {
        assert!(parse_reply(&["250xOK"]).is_err());
    }
}
