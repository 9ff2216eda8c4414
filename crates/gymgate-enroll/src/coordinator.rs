//! The enrollment coordinator.
//!
//! `begin_enrollment` is the protocol's single suspension point: it writes
//! the command document, then stays suspended until a matching terminal
//! status arrives, the attempt timeout fires, or the subscription breaks.
//! Deliveries are matched by correlation id; the store only orders
//! mutations per document, so an update from an abandoned attempt can arrive
//! at any time and must never be mistaken for progress on the current one.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use gymgate_core::{Config, EnrolleeAttributes};
use gymgate_store::{CommandStatus, DocumentStore, MailboxDoc, StoreError, now_millis};

use crate::attempt::{AttemptState, Settlement, Step};
use crate::error::EnrollError;
use crate::members::MemberRepository;
use crate::observe::{self, ObserveHandle};
use crate::presence::{Availability, DeviceSnapshot, PresenceCache, PresenceTracker, UnavailableReason};

/// Protocol timing knobs.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Hard ceiling on one attempt, command write to terminal status.
    pub attempt_timeout: Duration,
    /// Heartbeat freshness window for the availability gate.
    pub reachability_window: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(180),
            reachability_window: Duration::from_secs(120),
        }
    }
}

impl CoordinatorConfig {
    /// Bridge from the resolved application configuration.
    pub fn from_settings(config: &Config) -> Self {
        Self {
            attempt_timeout: Duration::from_secs(config.enrollment.attempt_timeout_secs),
            reachability_window: Duration::from_secs(config.presence.reachability_window_secs),
        }
    }
}

/// One mailbox mutation, shaped for callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentUpdate {
    pub status: CommandStatus,
    pub fingerprint_id: Option<i64>,
    pub message: Option<String>,
}

/// Parameters for one enrollment attempt.
#[derive(Debug)]
pub struct EnrollmentRequest<'a> {
    pub scope_id: &'a str,
    pub device_id: &'a str,
    pub attributes: EnrolleeAttributes,
    /// Receives one update per `in_progress` transition. `None` if the
    /// caller does not care about hardware progress.
    pub progress: Option<mpsc::Sender<EnrollmentUpdate>>,
}

/// Result of a successful attempt.
///
/// `member_key` equals the fingerprint id: the hardware id *is* the member
/// record's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrollmentOutcome {
    pub fingerprint_id: i64,
    pub member_key: i64,
}

/// Coordinates fingerprint enrollment against one shared store.
pub struct EnrollmentCoordinator<S> {
    store: Arc<S>,
    presence: PresenceTracker<S>,
    members: MemberRepository<S>,
    config: CoordinatorConfig,
    /// Actor attribution written into every command this coordinator issues.
    operator: String,
}

impl<S: DocumentStore> EnrollmentCoordinator<S> {
    pub fn new(store: Arc<S>, config: CoordinatorConfig, operator: impl Into<String>) -> Self {
        let presence = PresenceTracker::new(Arc::clone(&store), config.reachability_window);
        let members = MemberRepository::new(Arc::clone(&store));
        Self {
            store,
            presence,
            members,
            config,
            operator: operator.into(),
        }
    }

    /// Attach a device-listing cache (see [`PresenceCache`]).
    pub fn with_presence_cache(mut self, cache: Arc<PresenceCache>) -> Self {
        self.presence = self.presence.with_cache(cache);
        self
    }

    /// Judge whether a device can take an enrollment command right now.
    pub async fn check_availability(
        &self,
        scope_id: &str,
        device_id: &str,
    ) -> Result<Availability, EnrollError> {
        self.presence.check_availability(scope_id, device_id).await
    }

    /// List registered devices with their derived reachability.
    pub async fn list_devices(&self, scope_id: &str) -> Result<Vec<DeviceSnapshot>, EnrollError> {
        self.presence.list_devices(scope_id).await
    }

    /// Run one enrollment attempt to completion.
    ///
    /// Validation and the availability gate fail locally without writing
    /// anything. After the command is written the call suspends until the
    /// device settles the attempt, the timeout fires, or the watch breaks;
    /// the member record is written on the success path only.
    pub async fn begin_enrollment(
        &self,
        request: EnrollmentRequest<'_>,
    ) -> Result<EnrollmentOutcome, EnrollError> {
        request.attributes.validate()?;

        let availability = self
            .presence
            .check_availability(request.scope_id, request.device_id)
            .await?;
        if let Some(reason) = availability.reason {
            return Err(EnrollError::DeviceUnavailable {
                device_id: request.device_id.to_string(),
                reason,
            });
        }

        let correlation_id = new_correlation_id();

        // Subscribe before writing so an agent that reacts instantly cannot
        // slip a transition past us.
        let mut watch = self
            .store
            .watch_mailbox(request.scope_id, request.device_id)
            .await?;

        self.claim_mailbox(&request, &correlation_id).await?;
        info!(
            scope_id = request.scope_id,
            device_id = request.device_id,
            correlation_id = %correlation_id,
            subject = request.attributes.name.trim(),
            "Enrollment command issued"
        );

        let waited = self.config.attempt_timeout;
        match tokio::time::timeout(
            waited,
            self.drive_attempt(&request, &correlation_id, &mut watch),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                // The slot is left as-is; a later attempt's correlation
                // check will skip right past it.
                warn!(
                    device_id = request.device_id,
                    correlation_id = %correlation_id,
                    "Enrollment attempt timed out"
                );
                Err(EnrollError::Timeout { waited })
            }
        }
    }

    /// Claim the single-slot mailbox for a new attempt.
    ///
    /// The slot may still hold a previous command. An active one younger
    /// than the attempt timeout wins; anything else (terminal, abandoned, or
    /// absent) is superseded through a compare-and-swap against exactly the
    /// slot state we read, so two operators cannot both claim the device.
    async fn claim_mailbox(
        &self,
        request: &EnrollmentRequest<'_>,
        correlation_id: &str,
    ) -> Result<(), EnrollError> {
        let current = self
            .store
            .read_mailbox(request.scope_id, request.device_id)
            .await?;
        if let Some(doc) = &current {
            let age_millis = now_millis().saturating_sub(doc.issued_at);
            let timeout_millis =
                i64::try_from(self.config.attempt_timeout.as_millis()).unwrap_or(i64::MAX);
            if doc.is_active() && age_millis < timeout_millis {
                return Err(EnrollError::DeviceUnavailable {
                    device_id: request.device_id.to_string(),
                    reason: UnavailableReason::Busy,
                });
            }
        }

        let command = MailboxDoc::command(
            correlation_id,
            request.attributes.name.trim(),
            self.operator.as_str(),
        );
        let claimed = self
            .store
            .swap_mailbox(
                request.scope_id,
                request.device_id,
                current.as_ref().map(|d| d.correlation_id.as_str()),
                command,
            )
            .await?;
        if claimed {
            Ok(())
        } else {
            debug!(
                device_id = request.device_id,
                "Lost the mailbox claim to a concurrent attempt"
            );
            Err(EnrollError::DeviceUnavailable {
                device_id: request.device_id.to_string(),
                reason: UnavailableReason::Busy,
            })
        }
    }

    /// Follow mailbox deliveries until the attempt settles.
    async fn drive_attempt(
        &self,
        request: &EnrollmentRequest<'_>,
        correlation_id: &str,
        watch: &mut broadcast::Receiver<MailboxDoc>,
    ) -> Result<EnrollmentOutcome, EnrollError> {
        let mut attempt = AttemptState::new();
        attempt.command_written();

        loop {
            let doc = match watch.recv().await {
                Ok(doc) => doc,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Single-slot mailbox: the current state is all that
                    // matters, so catch up by re-reading the slot.
                    warn!(skipped = n, "Mailbox watcher lagged, re-reading slot");
                    match self
                        .store
                        .read_mailbox(request.scope_id, request.device_id)
                        .await?
                    {
                        Some(doc) => doc,
                        None => continue,
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(EnrollError::Connection(StoreError::Closed));
                }
            };

            if doc.correlation_id != correlation_id {
                debug!(
                    device_id = request.device_id,
                    theirs = %doc.correlation_id,
                    "Ignoring mailbox update from a different attempt"
                );
                continue;
            }

            let Some(status) = doc.command_status() else {
                return Err(EnrollError::Protocol(format!(
                    "unknown status value '{}'",
                    doc.status
                )));
            };

            match attempt.observe(status) {
                Step::Ignore => {}
                Step::Progress => {
                    debug!(
                        device_id = request.device_id,
                        message = doc.message.as_deref().unwrap_or(""),
                        "Device reported capture progress"
                    );
                    if let Some(tx) = &request.progress {
                        let _ = tx
                            .send(EnrollmentUpdate {
                                status,
                                fingerprint_id: doc.fingerprint_id,
                                message: doc.message.clone(),
                            })
                            .await;
                    }
                }
                Step::Settle(Settlement::Succeeded) => {
                    let Some(fingerprint_id) = doc.fingerprint_id else {
                        return Err(EnrollError::Protocol(
                            "device reported completion without a fingerprint id".to_string(),
                        ));
                    };
                    self.members
                        .finalize(
                            request.scope_id,
                            request.device_id,
                            &request.attributes,
                            fingerprint_id,
                        )
                        .await?;
                    info!(
                        device_id = request.device_id,
                        fingerprint_id, "Enrollment completed"
                    );
                    return Ok(EnrollmentOutcome {
                        fingerprint_id,
                        member_key: fingerprint_id,
                    });
                }
                Step::Settle(Settlement::Failed) => {
                    return Err(EnrollError::Hardware {
                        message: doc
                            .message
                            .unwrap_or_else(|| "device reported failure".to_string()),
                    });
                }
                Step::Settle(Settlement::Cancelled) => {
                    return Err(EnrollError::Cancelled);
                }
            }
        }
    }

    /// Cancel whatever attempt currently holds the device's mailbox.
    ///
    /// Best-effort and cooperative: the device agent is trusted to observe
    /// the flip and abort its capture; the attempt timeout remains the
    /// backstop if it never does. Empty or already-terminal slots are left
    /// untouched, so cancelling after settlement is a no-op.
    pub async fn cancel_enrollment(
        &self,
        scope_id: &str,
        device_id: &str,
    ) -> Result<(), EnrollError> {
        let Some(current) = self.store.read_mailbox(scope_id, device_id).await? else {
            debug!(scope_id, device_id, "No mailbox to cancel");
            return Ok(());
        };
        if !current.is_active() {
            debug!(
                scope_id,
                device_id,
                status = %current.status,
                "Mailbox already terminal, cancel is a no-op"
            );
            return Ok(());
        }

        let mut doc = current.clone();
        doc.status = CommandStatus::Cancelled.as_str().to_string();
        doc.updated_by = self.operator.clone();

        let swapped = self
            .store
            .swap_mailbox(
                scope_id,
                device_id,
                Some(current.correlation_id.as_str()),
                doc,
            )
            .await?;
        if swapped {
            info!(
                scope_id,
                device_id,
                correlation_id = %current.correlation_id,
                "Enrollment cancelled"
            );
        } else {
            debug!(scope_id, device_id, "Mailbox changed while cancelling, leaving it alone");
        }
        Ok(())
    }

    /// Watch a device's mailbox passively, independent of any in-flight
    /// attempt. Used for dashboard status display.
    pub async fn observe_enrollment(
        &self,
        scope_id: &str,
        device_id: &str,
        callback: impl Fn(EnrollmentUpdate) + Send + 'static,
    ) -> Result<ObserveHandle, EnrollError> {
        let watch = self.store.watch_mailbox(scope_id, device_id).await?;
        Ok(observe::spawn_observer(watch, callback))
    }
}

/// Per-attempt token: unpredictable across concurrent attempts from any
/// client, with a time component for log legibility.
fn new_correlation_id() -> String {
    format!("{:x}-{}", now_millis(), Uuid::new_v4().simple())
}
