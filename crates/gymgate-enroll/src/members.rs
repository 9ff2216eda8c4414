//! Member finalization.
//!
//! A member record exists if and only if the hardware confirmed an
//! enrollment; the coordinator's success path is the only caller. The record
//! is keyed by the device-assigned fingerprint id so the scanner's internal
//! enrollment table and the member table stay in lockstep.

use std::sync::Arc;

use rand::RngExt;
use rand::distr::Alphanumeric;
use tracing::info;

use gymgate_core::EnrolleeAttributes;
use gymgate_store::{DocumentStore, MemberDoc, StoreError, now_millis};

/// Writes finalized member records to the store.
pub struct MemberRepository<S> {
    store: Arc<S>,
}

impl<S: DocumentStore> MemberRepository<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Persist the member record for a hardware-confirmed enrollment.
    pub async fn finalize(
        &self,
        scope_id: &str,
        device_id: &str,
        attributes: &EnrolleeAttributes,
        fingerprint_id: i64,
    ) -> Result<MemberDoc, StoreError> {
        let member = MemberDoc {
            fingerprint_id,
            gym_member_id: new_gym_member_id(),
            name: attributes.name.trim().to_string(),
            phone: attributes.phone.clone(),
            age: attributes.age,
            enrolled_at: now_millis(),
            enrolled_by_device: device_id.to_string(),
        };
        self.store.put_member(scope_id, member.clone()).await?;
        info!(
            scope_id,
            fingerprint_id,
            gym_member_id = %member.gym_member_id,
            "Member record finalized"
        );
        Ok(member)
    }
}

/// Human-facing member id, assigned independently of the hardware id.
///
/// The `GM-` prefix keeps it from ever colliding with the integer
/// fingerprint key.
fn new_gym_member_id() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("GM-{}", suffix.to_uppercase())
}
