//! Document schemas for the shared store.
//!
//! These shapes are the contract between the web/desk side and the embedded
//! device agents. Timestamps are epoch milliseconds assigned by the store on
//! write; the agents only ever echo them back.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Capability flags a device may advertise in its presence document.
pub mod capability {
    /// Fingerprint enrollment support.
    pub const ENROLLMENT: &str = "enrollment";
    /// Attendance (check-in) capture support.
    pub const ATTENDANCE: &str = "attendance";
    /// Audio feedback (beeper/speaker) support.
    pub const AUDIO: &str = "audio";
}

/// The `reported_state` value an eligible device must carry.
pub const STATE_ONLINE: &str = "online";

/// Current epoch time in milliseconds.
///
/// Clamps to 0 for pre-epoch clocks rather than panicking.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

/// Status of an enrollment command, as written by the device agent.
///
/// The persisted field is a string; agents running older firmware may write
/// values this enum does not know. Parsing is therefore fallible and the
/// caller decides what an unknown value means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    /// Command written, not yet picked up by the device.
    Pending,
    /// Device is capturing; multi-stage hardware progress.
    InProgress,
    /// Capture succeeded; `fingerprint_id` must be present.
    Completed,
    /// Device reported a capture failure.
    Failed,
    /// Operator cancelled the attempt.
    Cancelled,
}

impl CommandStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a wire value. Returns `None` for unknown strings.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether this status still expects further device transitions.
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Single-slot enrollment mailbox, addressed by `(scope_id, device_id)`.
///
/// A new attempt overwrites the slot; documents are never deleted. The
/// correlation id is what makes the overwrite semantics safe: a stale
/// observer simply never sees a matching update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxDoc {
    pub correlation_id: String,
    pub status: String,
    pub subject_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Store-assigned write timestamp (epoch millis).
    pub issued_at: i64,
    /// Actor that last wrote the slot (operator id or device id).
    pub updated_by: String,
}

impl MailboxDoc {
    /// Build a fresh `pending` command. `issued_at` is stamped by the store
    /// on write.
    pub fn command(
        correlation_id: impl Into<String>,
        subject_name: impl Into<String>,
        operator: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            status: CommandStatus::Pending.as_str().to_string(),
            subject_name: subject_name.into(),
            fingerprint_id: None,
            message: None,
            issued_at: 0,
            updated_by: operator.into(),
        }
    }

    /// Parse the persisted status string.
    pub fn command_status(&self) -> Option<CommandStatus> {
        CommandStatus::parse(&self.status)
    }

    /// Whether the slot still holds an unresolved command.
    pub fn is_active(&self) -> bool {
        self.command_status().is_some_and(|s| s.is_active())
    }
}

/// Per-device presence document, written only by the device agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceDoc {
    pub device_id: String,
    /// Epoch millis of the last agent heartbeat.
    pub last_heartbeat: i64,
    /// Self-reported state; `online` and `busy` are known, anything else
    /// passes through untouched.
    pub reported_state: String,
    #[serde(default)]
    pub capabilities: HashMap<String, bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<u64>,
}

impl PresenceDoc {
    pub fn is_online(&self) -> bool {
        self.reported_state == STATE_ONLINE
    }

    pub fn has_capability(&self, flag: &str) -> bool {
        self.capabilities.get(flag).copied().unwrap_or(false)
    }
}

/// Finalized member record, keyed by the device-assigned fingerprint id.
///
/// Using the hardware id as the record key keeps the scanner's internal
/// enrollment table and the member table in lockstep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberDoc {
    pub fingerprint_id: i64,
    /// Secondary human-facing id, assigned independently of the hardware id.
    pub gym_member_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<u8>,
    pub enrolled_at: i64,
    pub enrolled_by_device: String,
}
