//! `GymGate` Enrollment Coordinator
//!
//! Implements the fingerprint-enrollment handshake between the desk client
//! and a remote scanner device. There is no socket between the two: the
//! client writes a command document into the device's single-slot mailbox on
//! the shared store, the device agent performs the capture and writes status
//! transitions back into the same slot, and the client follows along through
//! the store's watch subscription.
//!
//! - [`EnrollmentCoordinator`]: issues commands, follows status transitions,
//!   enforces the attempt timeout, finalizes the member record on
//!   hardware-confirmed success
//! - [`PresenceTracker`]: derives device availability from heartbeats
//! - [`MemberRepository`]: the one place member records are written
//! - [`EnrollError`]: the full failure taxonomy an attempt can surface

pub mod attempt;
pub mod coordinator;
pub mod error;
pub mod members;
pub mod observe;
pub mod presence;

pub use coordinator::{
    CoordinatorConfig, EnrollmentCoordinator, EnrollmentOutcome, EnrollmentRequest,
    EnrollmentUpdate,
};
pub use error::EnrollError;
pub use members::MemberRepository;
pub use observe::ObserveHandle;
pub use presence::{Availability, DeviceSnapshot, PresenceCache, PresenceTracker, UnavailableReason};
