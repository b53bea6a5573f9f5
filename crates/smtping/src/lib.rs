//! # smtping
//!
//! An asynchronous SMTP client engine for checking and load-testing mail
//! servers (RFC 5321 subset).
//!
//! ## Features
//!
//! - **Pipelining**: `MAIL FROM`, `RCPT TO` and `DATA` go out as one batch
//!   when the server advertises `PIPELINING`
//! - **Opportunistic STARTTLS**: upgrades whenever the server offers it
//! - **Authentication**: pluggable SASL mechanisms (PLAIN, LOGIN, XOAUTH2)
//! - **Envelopes**: every submission yields a record with its command trace,
//!   timing and `sent`/`bounce` outcome
//!
//! ## Quick Start
//!
//! ```ignore
//! use smtping::{Client, ClientConfig};
//! use smtping::auth::Plain;
//!
//! #[tokio::main]
//! async fn main() -> smtping::Result<()> {
//!     let config = ClientConfig::builder("example.com", "mx.example.com:25")
//!         .local_name("bench.example.net")
//!         .build();
//!     let auth = Plain::new("", "user", "password", "mx.example.com");
//!
//!     let mut client = Client::connect(config, Some(Box::new(auth))).await?;
//!
//!     let envelope = client
//!         .send_mail("bench@example.net", "postmaster", "ping", "hello")
//!         .await;
//!     println!("{} {}ms", envelope.status, envelope.elapsed_ms);
//!
//!     client.close().await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`auth`]: SASL mechanisms
//! - [`command`]: Command lines and their expected replies
//! - [`connection`]: Streams and the client session
//! - [`parser`]: Reply parser
//! - [`transport`]: Pipelined request/reply transport and dot-stuffing
//! - [`types`]: Replies and the extension table

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod command;
mod config;
pub mod connection;
mod envelope;
mod error;
pub mod parser;
pub mod transport;
pub mod types;

pub use auth::Mechanism;
pub use command::{Command, Expect};
pub use config::{ClientConfig, ClientConfigBuilder, DEFAULT_CONNECT_TIMEOUT, DEFAULT_LOCAL_NAME};
pub use connection::Client;
pub use envelope::{Envelope, Status};
pub use error::{Error, Result};
pub use types::{Extensions, Reply, ReplyCode};
