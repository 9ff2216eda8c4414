//! The store interface the rest of the workspace is written against.
//!
//! The real backend is a managed document database with per-document atomic
//! writes and near-real-time change notifications. Adapters implement this
//! trait; everything above it stays backend-agnostic.

use std::future::Future;

use tokio::sync::broadcast;

use crate::document::{MailboxDoc, MemberDoc, PresenceDoc};
use crate::error::StoreError;

/// Typed document access plus mailbox watch subscriptions.
///
/// Watch semantics: each mailbox document's mutations are delivered to every
/// live receiver in write order. There is no ordering guarantee across
/// documents, which is why callers filter by correlation id. A receiver that
/// lags behind can always recover by re-reading the slot; the mailbox is
/// single-slot, so the latest state is all that matters.
pub trait DocumentStore: Send + Sync + 'static {
    /// Read the current mailbox slot for a device, if any write ever happened.
    fn read_mailbox(
        &self,
        scope_id: &str,
        device_id: &str,
    ) -> impl Future<Output = Result<Option<MailboxDoc>, StoreError>> + Send;

    /// Unconditionally overwrite the mailbox slot.
    ///
    /// The store stamps `issued_at`; the stored document is returned.
    fn write_mailbox(
        &self,
        scope_id: &str,
        device_id: &str,
        doc: MailboxDoc,
    ) -> impl Future<Output = Result<MailboxDoc, StoreError>> + Send;

    /// Atomically replace the mailbox slot if its current correlation id
    /// matches `expected` (`None` = the slot must be empty).
    ///
    /// Returns `false` without writing when the precondition fails, which is
    /// how competing operators lose the race instead of clobbering each
    /// other's attempts.
    fn swap_mailbox(
        &self,
        scope_id: &str,
        device_id: &str,
        expected: Option<&str>,
        doc: MailboxDoc,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Subscribe to mutations of a device's mailbox slot.
    ///
    /// Dropping the receiver ends the subscription.
    fn watch_mailbox(
        &self,
        scope_id: &str,
        device_id: &str,
    ) -> impl Future<Output = Result<broadcast::Receiver<MailboxDoc>, StoreError>> + Send;

    /// Read a device's presence document.
    fn read_presence(
        &self,
        scope_id: &str,
        device_id: &str,
    ) -> impl Future<Output = Result<Option<PresenceDoc>, StoreError>> + Send;

    /// List all presence documents registered under a scope.
    fn list_presence(
        &self,
        scope_id: &str,
    ) -> impl Future<Output = Result<Vec<PresenceDoc>, StoreError>> + Send;

    /// Persist a finalized member record, keyed by its fingerprint id.
    fn put_member(
        &self,
        scope_id: &str,
        member: MemberDoc,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Read a member record by fingerprint id.
    fn read_member(
        &self,
        scope_id: &str,
        fingerprint_id: i64,
    ) -> impl Future<Output = Result<Option<MemberDoc>, StoreError>> + Send;
}
