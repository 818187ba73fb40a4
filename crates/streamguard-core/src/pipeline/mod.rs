//! Event pipeline: raw message → validated [`Comment`] → batched
//! [`DomainEvent`](crate::events::DomainEvent)s.

mod batcher;
mod comment;
mod parser;
mod processor;

pub use batcher::EventBatcher;
pub use comment::{Comment, sanitize_comment};
pub use parser::{
    MAX_TEXT_CHARS, MAX_USERNAME_CHARS, UNKNOWN_SESSION, parse_and_validate_comment,
    sanitize_text, sanitize_username,
};
pub use processor::{CommentProcessor, EventBreakerHandle, LATENCY_TARGET};
