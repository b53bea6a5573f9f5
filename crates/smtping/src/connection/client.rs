//! SMTP client session.

use std::time::Instant;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::stream::{self, SmtpStream};
use crate::auth::{Mechanism, ServerInfo};
use crate::command::Command;
use crate::config::ClientConfig;
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::types::{Extensions, Reply, ReplyCode, keyword};

/// An open SMTP session.
///
/// Created by [`Client::connect`], which performs the greeting, EHLO (or
/// HELO), an opportunistic STARTTLS and optional authentication. Mail is then
/// submitted with [`Client::send_mail`] until [`Client::close`] ends the
/// session.
#[derive(Debug)]
pub struct Client {
    config: ClientConfig,
    host: String,
    transport: Transport<SmtpStream>,
    extensions: Extensions,
}

impl Client {
    /// Connects with default settings for `domain` via `address` (`host:port`).
    ///
    /// # Errors
    ///
    /// See [`Client::connect`].
    pub async fn new(
        domain: impl Into<String>,
        address: impl Into<String>,
        auth: Option<Box<dyn Mechanism>>,
    ) -> Result<Self> {
        Self::connect(ClientConfig::new(domain, address), auth).await
    }

    /// Opens a session.
    ///
    /// 1. Dial and require a `220` greeting.
    /// 2. `EHLO`, falling back to `HELO` if the server rejects it.
    /// 3. On the EHLO path, upgrade with STARTTLS when advertised, then run
    ///    `auth` if one was supplied.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the dial fails or the greeting is not
    /// `220`. Any handshake, TLS or authentication failure is returned after
    /// the connection has been released.
    pub async fn connect(config: ClientConfig, auth: Option<Box<dyn Mechanism>>) -> Result<Self> {
        let host = config.host()?.to_string();
        let stream = stream::connect(&config.address, config.connect_timeout).await?;
        tracing::info!(address = %config.address, "connected");

        let transport = Transport::with_timeout(stream, config.io_timeout);
        let mut client = Self {
            config,
            host,
            transport,
            extensions: Extensions::new(),
        };

        if let Err(err) = client.read_greeting().await {
            client.release().await;
            return Err(err);
        }

        let esmtp = match client.hello().await {
            Ok(esmtp) => esmtp,
            Err(err) => {
                client.release().await;
                return Err(err);
            }
        };
        if !esmtp {
            return Ok(client);
        }

        if client.is_extension(keyword::STARTTLS) {
            client = client.starttls().await?;
        }

        if let Some(mechanism) = auth {
            client.authenticate(mechanism).await?;
        }

        Ok(client)
    }

    async fn read_greeting(&mut self) -> Result<()> {
        let greeting = self.transport.read_reply().await?;
        if greeting.code != ReplyCode::SERVICE_READY {
            return Err(Error::Connection(format!(
                "unexpected greeting: {} {}",
                greeting.code,
                greeting.message_text()
            )));
        }
        tracing::debug!(greeting = %greeting.message_text(), "greeting");
        Ok(())
    }

    /// Sends EHLO, or HELO if EHLO fails in any way. Returns true for an ESMTP session.
    async fn hello(&mut self) -> Result<bool> {
        match self.ehlo().await {
            Ok(()) => Ok(true),
            Err(err) => {
                tracing::warn!(error = %err, "EHLO failed, falling back to HELO");
                self.extensions = Extensions::new();
                let mut helo = [Command::helo(&self.config.local_name)];
                self.transport.execute(&mut helo).await?;
                Ok(false)
            }
        }
    }

    async fn ehlo(&mut self) -> Result<()> {
        let mut ehlo = [Command::ehlo(&self.config.local_name)];
        self.transport.execute(&mut ehlo).await?;
        if let Some(reply) = ehlo[0].reply() {
            self.extensions = Extensions::from_ehlo(&reply.message);
        }
        tracing::debug!(extensions = self.extensions.len(), "EHLO accepted");
        Ok(())
    }

    /// Upgrades the session to TLS.
    ///
    /// Consumes the session: on failure the socket is dropped with it.
    async fn starttls(mut self) -> Result<Self> {
        self.transport.execute(&mut [Command::starttls()]).await?;

        let Self {
            config,
            host,
            transport,
            extensions,
        } = self;

        let stream = transport
            .into_inner()?
            .upgrade_to_tls(&host, config.skip_cert_verify, config.io_timeout)
            .await?;
        let transport = Transport::with_timeout(stream, config.io_timeout);
        tracing::info!(host = %host, "TLS established");

        let mut client = Self {
            config,
            host,
            transport,
            extensions,
        };
        if client.config.revalidate_after_tls
            && let Err(err) = client.ehlo().await
        {
            client.release().await;
            return Err(err);
        }
        Ok(client)
    }

    /// Runs a SASL exchange with `mechanism`.
    async fn authenticate(&mut self, mut mechanism: Box<dyn Mechanism>) -> Result<()> {
        let server = ServerInfo {
            host: self.host.clone(),
            tls: self.is_tls(),
            mechanisms: self.auth_mechanisms(),
        };

        let start = match mechanism.start(&server) {
            Ok(start) => start,
            Err(err) => {
                if let Err(quit_err) = self.quit().await {
                    tracing::debug!(error = %quit_err, "QUIT failed");
                }
                self.release().await;
                return Err(err);
            }
        };

        if !server.mechanisms.is_empty() && !server.advertises(&start.mechanism) {
            tracing::warn!(
                mechanism = %start.mechanism,
                "mechanism not advertised by server"
            );
        }

        let auth = Command::auth(&start.mechanism, &STANDARD.encode(&start.response));
        match self.exchange(&mut *mechanism, auth).await {
            Ok(()) => {
                tracing::info!(mechanism = %start.mechanism, "authenticated");
                Ok(())
            }
            Err(err) => {
                self.cancel_auth().await;
                Err(err)
            }
        }
    }

    /// Feeds server challenges to the mechanism until it has nothing more to send.
    async fn exchange(&mut self, mechanism: &mut dyn Mechanism, first: Command) -> Result<()> {
        let mut command = first;
        loop {
            let mut step = [command];
            self.transport.execute(&mut step).await?;
            let reply = step[0]
                .reply()
                .cloned()
                .ok_or_else(|| Error::InvalidState("AUTH step without reply".into()))?;

            let (challenge, more) = match reply.code {
                ReplyCode::AUTH_CONTINUE => (STANDARD.decode(reply.message_text())?, true),
                ReplyCode::AUTH_SUCCESS => (reply.message_text().into_bytes(), false),
                _ => return Err(reply.to_error()),
            };

            let Some(response) = mechanism.next(&challenge, more)? else {
                return Ok(());
            };
            command = Command::auth_response(STANDARD.encode(response));
        }
    }

    /// Aborts an AUTH exchange and releases the connection.
    async fn cancel_auth(&mut self) {
        if let Err(err) = self.transport.execute(&mut [Command::auth_cancel()]).await {
            tracing::warn!(error = %err, "AUTH cancel failed");
        }
        self.release().await;
    }

    async fn quit(&mut self) -> Result<()> {
        self.transport.execute(&mut [Command::quit()]).await
    }

    /// Shuts the stream down, logging rather than returning a failure.
    async fn release(&mut self) {
        if let Err(err) = self.transport.shutdown().await {
            tracing::debug!(error = %err, "shutdown failed");
        }
    }

    /// Submits one message to `user@<domain>`.
    ///
    /// `MAIL FROM`, `RCPT TO` and `DATA` are pipelined when the server
    /// advertises `PIPELINING`, otherwise sent one at a time until the first
    /// failure. Never fails: the outcome is recorded in the envelope.
    pub async fn send_mail(
        &mut self,
        from: &str,
        user: &str,
        subject: &str,
        body: &str,
    ) -> Envelope {
        let to = format!("{user}@{}", self.config.domain);
        let mut envelope = Envelope::new(from, to, subject, body);
        let started = Instant::now();

        let mut commands = vec![
            Command::mail_from(from),
            Command::rcpt_to(&envelope.to),
            Command::data(),
        ];
        let outcome = self.submit(&mut commands, envelope.content().as_bytes()).await;
        envelope.finish(commands, outcome, started.elapsed());

        tracing::debug!(
            to = %envelope.to,
            status = %envelope.status,
            code = envelope.code,
            elapsed_ms = envelope.elapsed_ms,
            "mail submitted"
        );
        envelope
    }

    async fn submit(&mut self, commands: &mut [Command], content: &[u8]) -> Result<Reply> {
        if self.is_extension(keyword::PIPELINING) {
            self.transport.execute(commands).await?;
        } else {
            for command in commands.iter_mut() {
                self.transport.execute(std::slice::from_mut(command)).await?;
            }
        }

        let mut writer = self.transport.dot_writer();
        writer.write(content).await?;
        writer.close().await?;

        let reply = self.transport.read_reply().await?;
        if reply.code == ReplyCode::OK {
            Ok(reply)
        } else {
            Err(reply.to_error())
        }
    }

    /// Executes a batch of commands directly on the transport.
    ///
    /// # Errors
    ///
    /// Returns the last command's error, or the I/O error that broke the batch.
    pub async fn execute(&mut self, commands: &mut [Command]) -> Result<()> {
        self.transport.execute(commands).await
    }

    /// Returns true if the server advertised `name` (case-sensitive).
    #[must_use]
    pub fn is_extension(&self, name: &str) -> bool {
        self.extensions.contains(name)
    }

    /// Forgets an advertised extension, e.g. to force unpipelined sends.
    pub fn disable_extension(&mut self, name: &str) {
        if self.extensions.remove(name).is_some() {
            tracing::debug!(extension = name, "extension disabled");
        }
    }

    /// Returns the extension table.
    #[must_use]
    pub const fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Returns the SASL mechanisms the server advertised.
    #[must_use]
    pub fn auth_mechanisms(&self) -> Vec<String> {
        self.extensions.auth_mechanisms()
    }

    /// Returns true if the session runs over TLS.
    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.transport.get_ref().is_tls()
    }

    /// Returns the server host name.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the recipient domain.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.config.domain
    }

    /// Returns the session configuration.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Ends the session with `QUIT`.
    ///
    /// The stream is shut down even if `QUIT` fails.
    ///
    /// # Errors
    ///
    /// Returns the first error from `QUIT` or the shutdown.
    pub async fn close(mut self) -> Result<()> {
        let quit = self.quit().await;
        let shutdown = self.transport.shutdown().await;
        tracing::debug!(host = %self.host, "session closed");
        quit.and(shutdown)
    }
}
