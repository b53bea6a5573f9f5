//! Integration tests for the SMTP client.
//!
//! Each test runs the client against a scripted server on a loopback socket.
//! The server replays its script and records every line the client sent, so
//! tests assert on the resulting transcript.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

use smtping::auth::{Login, Plain};
use smtping::types::keyword;
use smtping::{Client, ClientConfig, Command, Error, Mechanism, ReplyCode, Status};

/// One step of the server script.
#[derive(Debug, Clone, Copy)]
enum Step {
    /// Write a reply; a CRLF is appended.
    Reply(&'static str),
    /// Read one line.
    Line,
    /// Read DATA content up to and including the terminating `.`.
    Data,
    /// Drop the connection immediately.
    Hangup,
}

use Step::{Data, Hangup, Line, Reply};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Replays `script` on `stream`, recording received lines. Returns false
/// if the script hung up.
async fn play<S>(stream: &mut BufReader<S>, script: Vec<Step>, transcript: &mut Vec<String>) -> bool
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    for step in script {
        match step {
            Reply(reply) => {
                let stream = stream.get_mut();
                stream
                    .write_all(format!("{reply}\r\n").as_bytes())
                    .await
                    .unwrap();
                stream.flush().await.unwrap();
            }
            Line => {
                if let Some(line) = next_line(stream).await.unwrap() {
                    transcript.push(line);
                }
            }
            Data => {
                while let Some(line) = next_line(stream).await.unwrap() {
                    let end = line == ".";
                    transcript.push(line);
                    if end {
                        break;
                    }
                }
            }
            Hangup => return false,
        }
    }
    true
}

async fn next_line<S>(stream: &mut BufReader<S>) -> std::io::Result<Option<String>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut line = String::new();
    if stream.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    let trimmed = line.trim_end_matches('\n').trim_end_matches('\r');
    Ok(Some(trimmed.to_string()))
}

/// Records whatever the client sends until it hangs up.
async fn drain<S>(stream: &mut BufReader<S>, transcript: &mut Vec<String>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Ok(Some(line)) = next_line(stream).await {
        transcript.push(line);
    }
}

async fn listen() -> (TcpListener, String) {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    (listener, address)
}

/// Starts a one-shot server. The handle yields every line received.
async fn serve(script: Vec<Step>) -> (String, JoinHandle<Vec<String>>) {
    let (listener, address) = listen().await;

    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut stream = BufReader::new(socket);
        let mut transcript = Vec::new();
        if play(&mut stream, script, &mut transcript).await {
            drain(&mut stream, &mut transcript).await;
        }
        transcript
    });

    (address, handle)
}

/// Self-signed certificate for 127.0.0.1.
fn tls_acceptor() -> TlsAcceptor {
    let certified = rcgen::generate_simple_self_signed(vec!["127.0.0.1".to_string()]).unwrap();
    let key = PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der());
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![certified.cert.der().clone()], PrivateKeyDer::Pkcs8(key))
        .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

/// Like [`serve`], but runs a TLS handshake after `plain` and replays `tls`
/// over the encrypted stream. A failed handshake ends the session.
async fn serve_tls(plain: Vec<Step>, tls: Vec<Step>) -> (String, JoinHandle<Vec<String>>) {
    let (listener, address) = listen().await;
    let acceptor = tls_acceptor();

    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut stream = BufReader::new(socket);
        let mut transcript = Vec::new();
        if !play(&mut stream, plain, &mut transcript).await {
            return transcript;
        }

        assert!(stream.buffer().is_empty(), "client wrote ahead of the handshake");
        let Ok(encrypted) = acceptor.accept(stream.into_inner()).await else {
            return transcript;
        };
        let mut stream = BufReader::new(encrypted);
        if play(&mut stream, tls, &mut transcript).await {
            drain(&mut stream, &mut transcript).await;
        }
        transcript
    });

    (address, handle)
}

fn config(address: &str) -> ClientConfig {
    ClientConfig::builder("example.com", address)
        .io_timeout(Duration::from_secs(5))
        .build()
}

fn greeting_and_ehlo(ehlo: &'static str) -> Vec<Step> {
    vec![Reply("220 mx.test ESMTP ready"), Line, Reply(ehlo)]
}

fn b64(raw: &[u8]) -> String {
    STANDARD.encode(raw)
}

#[tokio::test]
async fn test_greeting_must_be_220() {
    let (address, server) = serve(vec![Reply("554 5.3.2 go away")]).await;

    let err = Client::connect(config(&address), None).await.unwrap_err();
    assert!(matches!(err, Error::Connection(_)), "{err:?}");

    assert!(server.await.unwrap().is_empty());
}

#[tokio::test]
async fn test_address_without_port_is_rejected() {
    let err = Client::new("example.com", "127.0.0.1", None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Connection(_)));
}

#[tokio::test]
async fn test_pipelined_send() {
    let mut script = greeting_and_ehlo("250-mx.test\r\n250-PIPELINING\r\n250 8BITMIME");
    script.extend([
        // No reply until the whole batch has arrived.
        Line,
        Line,
        Line,
        Reply("250 2.1.0 ok"),
        Reply("250 2.1.5 ok"),
        Reply("354 go ahead"),
        Data,
        Reply("250 2.0.0 queued as 1F2E"),
        Line,
        Reply("221 2.0.0 bye"),
    ]);
    let (address, server) = serve(script).await;

    let mut client = Client::connect(config(&address), None).await.unwrap();
    assert!(client.is_extension("PIPELINING"));
    assert!(client.is_extension("8BITMIME"));
    assert!(!client.is_tls());
    assert_eq!(client.host(), "127.0.0.1");
    assert_eq!(client.domain(), "example.com");

    let body = "line one\r\n.hidden";
    let envelope = client
        .send_mail("bench@sender.test", "user", "hi", body)
        .await;

    assert!(envelope.is_sent(), "{:?}", envelope.error);
    assert_eq!(envelope.status, Status::Sent);
    assert_eq!(envelope.to, "user@example.com");
    assert_eq!(envelope.code, Some(250));
    assert_eq!(envelope.message, "2.0.0 queued as 1F2E");
    assert_eq!(envelope.size, body.len());
    assert_eq!(envelope.commands.len(), 3);
    assert!(envelope.commands.iter().all(Command::is_success));

    client.close().await.unwrap();

    assert_eq!(
        server.await.unwrap(),
        [
            "EHLO localhost",
            "MAIL FROM:<bench@sender.test> BODY=8BITMIME",
            "RCPT TO:<user@example.com>",
            "DATA",
            "From:bench@sender.test",
            "To:user@example.com",
            "Subject:hi",
            "line one",
            "..hidden",
            ".",
            "QUIT",
        ]
    );
}

#[tokio::test]
async fn test_disabled_pipelining_sends_sequentially() {
    let mut script = greeting_and_ehlo("250-mx.test\r\n250 PIPELINING");
    script.extend([
        Line,
        Reply("250 ok"),
        Line,
        Reply("250 ok"),
        Line,
        Reply("354 go ahead"),
        Data,
        Reply("250 queued"),
        Line,
        Reply("221 bye"),
    ]);
    let (address, server) = serve(script).await;

    let mut client = Client::connect(config(&address), None).await.unwrap();
    client.disable_extension("PIPELINING");
    assert!(!client.is_extension("PIPELINING"));

    let envelope = client.send_mail("a@b.test", "user", "s", "b").await;
    assert!(envelope.is_sent(), "{:?}", envelope.error);

    client.close().await.unwrap();
    assert_eq!(server.await.unwrap().len(), 10);
}

#[tokio::test]
async fn test_sequential_send_stops_at_first_failure() {
    let mut script = greeting_and_ehlo("250 mx.test");
    script.extend([
        Line,
        Reply("250 ok"),
        Line,
        Reply("550 5.1.1 no such user"),
        Line,
        Reply("221 bye"),
    ]);
    let (address, server) = serve(script).await;

    let mut client = Client::connect(config(&address), None).await.unwrap();
    let envelope = client
        .send_mail("a@b.test", "nobody", "s", "twelve bytes")
        .await;

    assert_eq!(envelope.status, Status::Bounce);
    assert_eq!(envelope.status.to_string(), "bounce");
    assert_eq!(envelope.code, Some(550));
    assert_eq!(envelope.message, "5.1.1 no such user");
    assert_eq!(envelope.size, 12);
    assert!(envelope.error.as_ref().unwrap().is_permanent());
    assert!(envelope.commands[0].is_success());
    assert!(!envelope.commands[1].is_success());
    assert!(envelope.commands[2].reply().is_none());
    assert!(envelope.finished_at >= envelope.started_at);

    client.close().await.unwrap();
    assert_eq!(
        server.await.unwrap(),
        [
            "EHLO localhost",
            "MAIL FROM:<a@b.test> BODY=8BITMIME",
            "RCPT TO:<nobody@example.com>",
            "QUIT",
        ]
    );
}

#[tokio::test]
async fn test_rejected_message_bounces() {
    let mut script = greeting_and_ehlo("250-mx.test\r\n250 PIPELINING");
    script.extend([
        Line,
        Line,
        Line,
        Reply("250 ok"),
        Reply("250 ok"),
        Reply("354 go ahead"),
        Data,
        Reply("554 5.7.1 message refused"),
        Line,
        Reply("221 bye"),
    ]);
    let (address, server) = serve(script).await;

    let mut client = Client::connect(config(&address), None).await.unwrap();
    let envelope = client.send_mail("a@b.test", "user", "s", "spam").await;

    assert!(!envelope.is_sent());
    assert_eq!(envelope.code, Some(554));
    assert_eq!(envelope.message, "5.7.1 message refused");
    assert!(envelope.commands.iter().all(Command::is_success));

    client.close().await.unwrap();
    drop(server.await.unwrap());
}

#[tokio::test]
async fn test_connection_lost_mid_send_bounces() {
    let mut script = greeting_and_ehlo("250 mx.test");
    script.extend([Line, Hangup]);
    let (address, server) = serve(script).await;

    let mut client = Client::connect(config(&address), None).await.unwrap();
    let envelope = client.send_mail("a@b.test", "user", "s", "b").await;

    assert_eq!(envelope.status, Status::Bounce);
    assert_eq!(envelope.code, None);
    assert!(matches!(envelope.error, Some(Error::Io(_))));

    drop(server.await.unwrap());
    assert!(client.close().await.is_err());
}

#[tokio::test]
async fn test_helo_fallback_skips_auth() {
    let script = vec![
        Reply("220 mx.test ready"),
        Line,
        Reply("502 5.5.2 command not recognized"),
        Line,
        Reply("250 mx.test"),
        Line,
        Reply("221 bye"),
    ];
    let (address, server) = serve(script).await;

    let auth: Box<dyn Mechanism> = Box::new(Plain::new("", "user", "pass", "127.0.0.1"));
    let client = Client::connect(config(&address), Some(auth)).await.unwrap();
    assert!(client.extensions().is_empty());
    assert!(client.auth_mechanisms().is_empty());

    client.close().await.unwrap();
    assert_eq!(
        server.await.unwrap(),
        ["EHLO localhost", "HELO localhost", "QUIT"]
    );
}

#[tokio::test]
async fn test_malformed_ehlo_reply_falls_back_to_helo() {
    let script = vec![
        Reply("220 mx.test ready"),
        Line,
        Reply("250_broken"),
        Line,
        Reply("250 mx.test"),
        Line,
        Reply("221 bye"),
    ];
    let (address, server) = serve(script).await;

    let client = Client::connect(config(&address), None).await.unwrap();
    assert!(client.extensions().is_empty());
    assert!(!client.is_extension("PIPELINING"));

    client.close().await.unwrap();
    assert_eq!(
        server.await.unwrap(),
        ["EHLO localhost", "HELO localhost", "QUIT"]
    );
}

#[tokio::test]
async fn test_local_name_is_announced() {
    let script = vec![
        Reply("220 mx.test ready"),
        Line,
        Reply("250 mx.test"),
        Line,
        Reply("221 bye"),
    ];
    let (address, server) = serve(script).await;

    let config = ClientConfig::builder("example.com", &address)
        .local_name("bench.example.net")
        .build();
    let client = Client::connect(config, None).await.unwrap();
    client.close().await.unwrap();

    assert_eq!(server.await.unwrap(), ["EHLO bench.example.net", "QUIT"]);
}

#[tokio::test]
async fn test_auth_plain() {
    let mut script = greeting_and_ehlo("250-mx.test\r\n250 AUTH PLAIN LOGIN");
    script.extend([
        Line,
        Reply("235 2.7.0 Authentication successful"),
        Line,
        Reply("221 bye"),
    ]);
    let (address, server) = serve(script).await;

    let auth = Plain::new("", "user", "pass", "127.0.0.1");
    let client = Client::connect(config(&address), Some(Box::new(auth)))
        .await
        .unwrap();
    assert_eq!(client.auth_mechanisms(), ["PLAIN", "LOGIN"]);

    client.close().await.unwrap();
    assert_eq!(
        server.await.unwrap(),
        [
            "EHLO localhost".to_string(),
            format!("AUTH PLAIN {}", b64(b"\0user\0pass")),
            "QUIT".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_auth_login_challenges() {
    let mut script = greeting_and_ehlo("250-mx.test\r\n250 AUTH LOGIN");
    script.extend([
        Line,
        Reply("334 VXNlcm5hbWU6"),
        Line,
        Reply("334 UGFzc3dvcmQ6"),
        Line,
        Reply("235 2.7.0 ok"),
        Line,
        Reply("221 bye"),
    ]);
    let (address, server) = serve(script).await;

    let auth = Login::new("alice", "secret");
    let client = Client::connect(config(&address), Some(Box::new(auth)))
        .await
        .unwrap();
    client.close().await.unwrap();

    assert_eq!(
        server.await.unwrap(),
        [
            "EHLO localhost".to_string(),
            "AUTH LOGIN".to_string(),
            b64(b"alice"),
            b64(b"secret"),
            "QUIT".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_auth_mechanism_error_cancels_and_closes() {
    let mut script = greeting_and_ehlo("250-mx.test\r\n250 AUTH PLAIN");
    script.extend([Line, Reply("334 "), Line, Reply("501 5.7.0 cancelled")]);
    let (address, server) = serve(script).await;

    let auth = Plain::new("", "user", "pass", "127.0.0.1");
    let err = Client::connect(config(&address), Some(Box::new(auth)))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Auth(_)), "{err:?}");

    let transcript = server.await.unwrap();
    assert_eq!(transcript.len(), 3);
    assert_eq!(transcript[2], "*");
}

#[tokio::test]
async fn test_auth_rejected_by_server() {
    let mut script = greeting_and_ehlo("250-mx.test\r\n250 AUTH PLAIN");
    script.extend([
        Line,
        Reply("535 5.7.8 bad credentials"),
        Line,
        Reply("501 5.7.0 cancelled"),
    ]);
    let (address, server) = serve(script).await;

    let auth = Plain::new("", "user", "wrong", "127.0.0.1");
    let err = Client::connect(config(&address), Some(Box::new(auth)))
        .await
        .unwrap_err();
    assert_eq!(err.reply_code(), Some(535));

    assert_eq!(server.await.unwrap().last().unwrap(), "*");
}

#[tokio::test]
async fn test_auth_invalid_challenge_cancels() {
    let mut script = greeting_and_ehlo("250-mx.test\r\n250 AUTH LOGIN");
    script.extend([
        Line,
        Reply("334 !!not base64!!"),
        Line,
        Reply("501 5.7.0 cancelled"),
    ]);
    let (address, server) = serve(script).await;

    let err = Client::connect(config(&address), Some(Box::new(Login::new("a", "b"))))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Base64(_)), "{err:?}");

    assert_eq!(server.await.unwrap().last().unwrap(), "*");
}

#[tokio::test]
async fn test_auth_start_failure_quits() {
    let mut script = greeting_and_ehlo("250-mx.test\r\n250 AUTH PLAIN");
    script.extend([Line, Reply("221 bye")]);
    let (address, server) = serve(script).await;

    let auth = Plain::new("", "user", "pass", "mx.example.com");
    let err = Client::connect(config(&address), Some(Box::new(auth)))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("wrong host name"));

    assert_eq!(server.await.unwrap(), ["EHLO localhost", "QUIT"]);
}

#[tokio::test]
async fn test_starttls_refused() {
    let mut script = greeting_and_ehlo("250-mx.test\r\n250 STARTTLS");
    script.extend([Line, Reply("454 4.7.0 TLS not available")]);
    let (address, server) = serve(script).await;

    let err = Client::connect(config(&address), None).await.unwrap_err();
    assert_eq!(err.reply_code(), Some(454));
    assert!(err.is_transient());

    assert_eq!(server.await.unwrap(), ["EHLO localhost", "STARTTLS"]);
}

#[tokio::test]
async fn test_starttls_handshake_failure() {
    let mut script = greeting_and_ehlo("250-mx.test\r\n250 STARTTLS");
    script.extend([Line, Reply("220 2.0.0 ready"), Hangup]);
    let (address, server) = serve(script).await;

    let err = Client::connect(config(&address), None).await.unwrap_err();
    assert!(matches!(err, Error::Io(_)), "{err:?}");

    drop(server.await.unwrap());
}

fn starttls_offer() -> Vec<Step> {
    let mut plain = greeting_and_ehlo("250-mx.test\r\n250-PIPELINING\r\n250 STARTTLS");
    plain.extend([Line, Reply("220 2.0.0 ready")]);
    plain
}

#[tokio::test]
async fn test_starttls_upgrade_keeps_extensions() {
    let (address, server) = serve_tls(starttls_offer(), vec![Line, Reply("221 bye")]).await;

    let client = Client::connect(config(&address), None).await.unwrap();
    assert!(client.is_tls());
    // Without revalidation the pre-TLS table stays in force.
    assert!(client.is_extension(keyword::STARTTLS));
    assert!(client.is_extension(keyword::PIPELINING));

    client.close().await.unwrap();
    assert_eq!(
        server.await.unwrap(),
        ["EHLO localhost", "STARTTLS", "QUIT"]
    );
}

#[tokio::test]
async fn test_starttls_revalidate_resends_ehlo() {
    let tls = vec![
        Line,
        Reply("250-mx.test\r\n250 AUTH PLAIN LOGIN"),
        Line,
        Reply("221 bye"),
    ];
    let (address, server) = serve_tls(starttls_offer(), tls).await;

    let config = ClientConfig::builder("example.com", &address)
        .io_timeout(Duration::from_secs(5))
        .revalidate_after_tls(true)
        .build();
    let client = Client::connect(config, None).await.unwrap();
    assert!(client.is_tls());
    assert!(!client.is_extension(keyword::STARTTLS));
    assert!(!client.is_extension(keyword::PIPELINING));
    assert_eq!(client.auth_mechanisms(), ["PLAIN", "LOGIN"]);

    client.close().await.unwrap();
    assert_eq!(
        server.await.unwrap(),
        ["EHLO localhost", "STARTTLS", "EHLO localhost", "QUIT"]
    );
}

#[tokio::test]
async fn test_starttls_strict_verify_rejects_self_signed() {
    let (address, server) = serve_tls(starttls_offer(), Vec::new()).await;

    let config = ClientConfig::builder("example.com", &address)
        .io_timeout(Duration::from_secs(5))
        .skip_cert_verify(false)
        .build();
    let err = Client::connect(config, None).await.unwrap_err();
    assert!(matches!(err, Error::Io(_)), "{err:?}");

    assert_eq!(server.await.unwrap(), ["EHLO localhost", "STARTTLS"]);
}

#[tokio::test]
async fn test_starttls_auth_runs_over_tls() {
    let tls = vec![Line, Reply("235 2.7.0 ok"), Line, Reply("221 bye")];
    let mut plain = greeting_and_ehlo("250-mx.test\r\n250-STARTTLS\r\n250 AUTH PLAIN");
    plain.extend([Line, Reply("220 2.0.0 ready")]);
    let (address, server) = serve_tls(plain, tls).await;

    let auth = Plain::new("", "user", "pass", "127.0.0.1");
    let client = Client::connect(config(&address), Some(Box::new(auth)))
        .await
        .unwrap();
    assert!(client.is_tls());

    client.close().await.unwrap();
    assert_eq!(
        server.await.unwrap(),
        [
            "EHLO localhost".to_string(),
            "STARTTLS".to_string(),
            format!("AUTH PLAIN {}", b64(b"\0user\0pass")),
            "QUIT".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_execute_exposes_transport() {
    let mut script = greeting_and_ehlo("250 mx.test");
    script.extend([
        Line,
        Line,
        Reply("250 2.0.0 ok"),
        Reply("250 2.0.0 reset"),
        Line,
        Reply("221 bye"),
    ]);
    let (address, server) = serve(script).await;

    let mut client = Client::connect(config(&address), None).await.unwrap();
    let mut batch = [
        Command::new(ReplyCode::OK, "NOOP"),
        Command::new(ReplyCode::OK, "RSET"),
    ];
    client.execute(&mut batch).await.unwrap();
    assert_eq!(batch[1].reply().unwrap().message_text(), "2.0.0 reset");

    client.close().await.unwrap();
    assert_eq!(
        server.await.unwrap(),
        ["EHLO localhost", "NOOP", "RSET", "QUIT"]
    );
}
