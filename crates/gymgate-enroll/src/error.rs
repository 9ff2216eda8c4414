//! The enrollment failure taxonomy.
//!
//! Every variant renders a distinct operator-facing message; "enrollment
//! failed" on its own tells the desk nothing about whether to retry, check
//! the device, or call support. Nothing here is retried automatically; a
//! retry is a brand-new attempt with a fresh correlation id, so hardware
//! state from an abandoned attempt can never be credited twice.

use std::time::Duration;

use thiserror::Error;

use gymgate_core::enrollee::AttributeError;
use gymgate_store::StoreError;

use crate::presence::UnavailableReason;

/// Errors surfaced by an enrollment attempt.
#[derive(Debug, Error)]
pub enum EnrollError {
    /// Malformed enrollee attributes; checked locally, nothing was written.
    #[error("invalid enrollee attributes: {0}")]
    Validation(#[from] AttributeError),

    /// The target device cannot take a command right now; nothing was
    /// written.
    #[error("device {device_id} is unavailable: {reason}")]
    DeviceUnavailable {
        device_id: String,
        reason: UnavailableReason,
    },

    /// No terminal status arrived within the attempt timeout.
    #[error("device did not answer within {}s", .waited.as_secs())]
    Timeout { waited: Duration },

    /// The device agent explicitly reported a capture failure.
    #[error("device reported enrollment failure: {message}")]
    Hardware { message: String },

    /// An operator cancelled the attempt.
    #[error("enrollment was cancelled by the operator")]
    Cancelled,

    /// The device agent violated the handshake contract.
    #[error("device protocol violation: {0}")]
    Protocol(String),

    /// The store subscription or a store operation broke down.
    #[error("store connection error: {0}")]
    Connection(#[from] StoreError),
}
