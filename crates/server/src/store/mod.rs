//! Durable storage
//!
//! Whole-document JSON files written through per-document atomic write
//! queues.

pub mod json_store;
pub mod write_queue;

pub use json_store::{DocumentId, JsonStore};
pub use write_queue::{PendingWrite, WriteQueue};
