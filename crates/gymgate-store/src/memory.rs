//! In-process [`DocumentStore`] implementation.
//!
//! Backs tests and local development. Mutations go through a single
//! `RwLock`, which gives the same per-document atomicity the managed store
//! provides; watch fan-out uses one broadcast channel per mailbox document.

use std::collections::HashMap;

use tokio::sync::{RwLock, broadcast};
use tracing::debug;

use crate::document::{MailboxDoc, MemberDoc, PresenceDoc, now_millis};
use crate::error::StoreError;
use crate::store::DocumentStore;

const DEFAULT_WATCH_CAPACITY: usize = 64;

type DocKey = (String, String);

#[derive(Default)]
struct State {
    mailboxes: HashMap<DocKey, MailboxDoc>,
    watchers: HashMap<DocKey, broadcast::Sender<MailboxDoc>>,
    presence: HashMap<DocKey, PresenceDoc>,
    members: HashMap<(String, i64), MemberDoc>,
}

/// In-memory document store.
pub struct MemoryStore {
    state: RwLock<State>,
    watch_capacity: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_watch_capacity(DEFAULT_WATCH_CAPACITY)
    }

    /// Create a store whose watch channels buffer at most `capacity`
    /// undelivered mutations per mailbox. Small capacities are useful in
    /// tests that exercise subscriber lag recovery.
    pub fn with_watch_capacity(capacity: usize) -> Self {
        Self {
            state: RwLock::new(State::default()),
            watch_capacity: capacity,
        }
    }

    /// Device-agent side: publish or refresh a presence document.
    pub async fn write_presence(&self, scope_id: &str, doc: PresenceDoc) {
        let mut state = self.state.write().await;
        state
            .presence
            .insert((scope_id.to_string(), doc.device_id.clone()), doc);
    }

    fn notify(state: &State, key: &DocKey, doc: &MailboxDoc) {
        if let Some(tx) = state.watchers.get(key) {
            // No receivers is fine; the slot itself is the source of truth.
            let _ = tx.send(doc.clone());
        }
    }
}

impl DocumentStore for MemoryStore {
    async fn read_mailbox(
        &self,
        scope_id: &str,
        device_id: &str,
    ) -> Result<Option<MailboxDoc>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .mailboxes
            .get(&(scope_id.to_string(), device_id.to_string()))
            .cloned())
    }

    async fn write_mailbox(
        &self,
        scope_id: &str,
        device_id: &str,
        mut doc: MailboxDoc,
    ) -> Result<MailboxDoc, StoreError> {
        let key = (scope_id.to_string(), device_id.to_string());
        let mut state = self.state.write().await;
        doc.issued_at = now_millis();
        state.mailboxes.insert(key.clone(), doc.clone());
        Self::notify(&state, &key, &doc);
        debug!(scope_id, device_id, status = %doc.status, "Mailbox written");
        Ok(doc)
    }

    async fn swap_mailbox(
        &self,
        scope_id: &str,
        device_id: &str,
        expected: Option<&str>,
        mut doc: MailboxDoc,
    ) -> Result<bool, StoreError> {
        let key = (scope_id.to_string(), device_id.to_string());
        let mut state = self.state.write().await;

        let current = state
            .mailboxes
            .get(&key)
            .map(|d| d.correlation_id.as_str());
        if current != expected {
            debug!(scope_id, device_id, "Mailbox swap lost the precondition");
            return Ok(false);
        }

        doc.issued_at = now_millis();
        state.mailboxes.insert(key.clone(), doc.clone());
        Self::notify(&state, &key, &doc);
        debug!(scope_id, device_id, status = %doc.status, "Mailbox swapped");
        Ok(true)
    }

    async fn watch_mailbox(
        &self,
        scope_id: &str,
        device_id: &str,
    ) -> Result<broadcast::Receiver<MailboxDoc>, StoreError> {
        let key = (scope_id.to_string(), device_id.to_string());
        let mut state = self.state.write().await;
        let capacity = self.watch_capacity;
        let tx = state
            .watchers
            .entry(key)
            .or_insert_with(|| broadcast::channel(capacity).0);
        Ok(tx.subscribe())
    }

    async fn read_presence(
        &self,
        scope_id: &str,
        device_id: &str,
    ) -> Result<Option<PresenceDoc>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .presence
            .get(&(scope_id.to_string(), device_id.to_string()))
            .cloned())
    }

    async fn list_presence(&self, scope_id: &str) -> Result<Vec<PresenceDoc>, StoreError> {
        let state = self.state.read().await;
        let mut devices: Vec<PresenceDoc> = state
            .presence
            .iter()
            .filter(|((scope, _), _)| scope == scope_id)
            .map(|(_, doc)| doc.clone())
            .collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        Ok(devices)
    }

    async fn put_member(&self, scope_id: &str, member: MemberDoc) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state
            .members
            .insert((scope_id.to_string(), member.fingerprint_id), member);
        Ok(())
    }

    async fn read_member(
        &self,
        scope_id: &str,
        fingerprint_id: i64,
    ) -> Result<Option<MemberDoc>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .members
            .get(&(scope_id.to_string(), fingerprint_id))
            .cloned())
    }
}
