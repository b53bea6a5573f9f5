//! Core SMTP types.

mod extension;
mod reply;

pub use extension::{Extensions, keyword};
pub use reply::{Reply, ReplyCode};
