//! SMTP connection management.

mod client;
mod stream;

pub use client::Client;
pub use stream::{SmtpStream, connect};
