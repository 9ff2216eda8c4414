//! `GymGate` Store Seam
//!
//! The managed document database is an external collaborator; this crate is
//! the boundary the rest of the workspace talks through:
//! - Document schemas shared with the device firmware team (mailbox,
//!   presence, member)
//! - The [`DocumentStore`] trait: typed reads/writes, compare-and-swap on
//!   the per-device mailbox slot, push-based watch subscriptions
//! - [`MemoryStore`], a complete in-process implementation used by tests
//!   and local development

pub mod document;
pub mod error;
pub mod memory;
pub mod store;

pub use document::{CommandStatus, MailboxDoc, MemberDoc, PresenceDoc, now_millis};
pub use error::StoreError;
pub use memory::MemoryStore;
pub use store::DocumentStore;
