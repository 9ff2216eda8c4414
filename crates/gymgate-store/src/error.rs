//! Error types for store operations.

use thiserror::Error;

/// Errors surfaced by a [`crate::DocumentStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The watch subscription could not be established or broke down.
    #[error("subscription failed: {reason}")]
    Subscription { reason: String },

    /// The store connection is gone; no further reads or writes will work.
    #[error("store connection closed")]
    Closed,

    /// A document could not be encoded or decoded.
    #[error("document serialization failed: {reason}")]
    Serialization { reason: String },
}
