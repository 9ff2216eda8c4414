//! Passive enrollment observation.
//!
//! Dashboards display live device activity without driving an attempt of
//! their own; this is the read-only counterpart to the coordinator's
//! suspended `begin_enrollment` call. Every mailbox mutation is forwarded,
//! regardless of which attempt it belongs to.

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use gymgate_store::MailboxDoc;

use crate::coordinator::EnrollmentUpdate;

/// Handle for an active observation; dropping it also unsubscribes.
#[derive(Debug)]
pub struct ObserveHandle {
    task: JoinHandle<()>,
}

impl ObserveHandle {
    /// Stop forwarding updates.
    pub fn unsubscribe(self) {
        self.task.abort();
    }
}

impl Drop for ObserveHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Forward mailbox mutations to `callback` until the watch closes or the
/// handle is dropped.
pub(crate) fn spawn_observer(
    mut watch: broadcast::Receiver<MailboxDoc>,
    callback: impl Fn(EnrollmentUpdate) + Send + 'static,
) -> ObserveHandle {
    let task = tokio::spawn(async move {
        loop {
            match watch.recv().await {
                Ok(doc) => {
                    let Some(status) = doc.command_status() else {
                        warn!(status = %doc.status, "Skipping mailbox update with unknown status");
                        continue;
                    };
                    callback(EnrollmentUpdate {
                        status,
                        fingerprint_id: doc.fingerprint_id,
                        message: doc.message,
                    });
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Enrollment observer lagged, updates lost");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Mailbox watch closed, observer stopping");
                    return;
                }
            }
        }
    });
    ObserveHandle { task }
}
