#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! Integration tests for the enrollment handshake.
//!
//! Tests the full flow against the in-memory store with a scripted device
//! agent on the other side of the mailbox: command write → agent
//! transitions → resolution → member finalization.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use gymgate_core::EnrolleeAttributes;
use gymgate_enroll::{
    CoordinatorConfig, EnrollError, EnrollmentCoordinator, EnrollmentOutcome, EnrollmentRequest,
    UnavailableReason,
};
use gymgate_store::document::{STATE_ONLINE, capability};
use gymgate_store::{
    CommandStatus, DocumentStore, MailboxDoc, MemoryStore, PresenceDoc, now_millis,
};

const SCOPE: &str = "gym1";
const DEVICE: &str = "dev1";

/// Register a fresh, online, enrollment-capable device.
async fn online_device(store: &Arc<MemoryStore>, device_id: &str) {
    device_with_presence(store, device_id, Duration::ZERO, STATE_ONLINE, true).await;
}

async fn device_with_presence(
    store: &Arc<MemoryStore>,
    device_id: &str,
    heartbeat_age: Duration,
    state: &str,
    capable: bool,
) {
    let mut capabilities = HashMap::new();
    capabilities.insert(capability::ENROLLMENT.to_string(), capable);
    store
        .write_presence(
            SCOPE,
            PresenceDoc {
                device_id: device_id.to_string(),
                last_heartbeat: now_millis()
                    - i64::try_from(heartbeat_age.as_millis()).unwrap(),
                reported_state: state.to_string(),
                capabilities,
                location: Some("front desk".to_string()),
                firmware_version: Some("2.4.1".to_string()),
                uptime_seconds: Some(3600),
            },
        )
        .await;
}

fn coordinator_with_timeout(
    store: &Arc<MemoryStore>,
    attempt_timeout: Duration,
) -> EnrollmentCoordinator<MemoryStore> {
    let config = CoordinatorConfig {
        attempt_timeout,
        ..CoordinatorConfig::default()
    };
    EnrollmentCoordinator::new(Arc::clone(store), config, "operator-1")
}

fn coordinator(store: &Arc<MemoryStore>) -> EnrollmentCoordinator<MemoryStore> {
    coordinator_with_timeout(store, Duration::from_secs(5))
}

fn request(attributes: EnrolleeAttributes) -> EnrollmentRequest<'static> {
    EnrollmentRequest {
        scope_id: SCOPE,
        device_id: DEVICE,
        attributes,
        progress: None,
    }
}

fn spawn_attempt(
    coordinator: &Arc<EnrollmentCoordinator<MemoryStore>>,
    name: &'static str,
) -> JoinHandle<Result<EnrollmentOutcome, EnrollError>> {
    let coordinator = Arc::clone(coordinator);
    tokio::spawn(async move {
        coordinator
            .begin_enrollment(request(EnrolleeAttributes::named(name)))
            .await
    })
}

/// Scripted device agent: waits for a pending command, then writes the given
/// `(status, fingerprint_id, message)` transitions in order.
///
/// Subscribes before returning so no command write can be missed.
async fn spawn_agent(
    store: &Arc<MemoryStore>,
    device_id: &'static str,
    steps: Vec<(&'static str, Option<i64>, Option<&'static str>)>,
) -> JoinHandle<()> {
    let store = Arc::clone(store);
    let mut watch = store.watch_mailbox(SCOPE, device_id).await.unwrap();
    tokio::spawn(async move {
        let command = loop {
            let doc = watch.recv().await.unwrap();
            if doc.command_status() == Some(CommandStatus::Pending) {
                break doc;
            }
        };
        let mut next = command;
        for (status, fingerprint_id, message) in steps {
            next.status = status.to_string();
            next.fingerprint_id = fingerprint_id;
            next.message = message.map(str::to_string);
            next.updated_by = device_id.to_string();
            store
                .write_mailbox(SCOPE, device_id, next.clone())
                .await
                .unwrap();
        }
    })
}

async fn spawn_happy_agent(
    store: &Arc<MemoryStore>,
    device_id: &'static str,
    fingerprint_id: i64,
) -> JoinHandle<()> {
    spawn_agent(
        store,
        device_id,
        vec![
            ("in_progress", None, Some("place finger on sensor")),
            ("completed", Some(fingerprint_id), None),
        ],
    )
    .await
}

/// Device-side write of a single transition into the current slot.
async fn device_writes(
    store: &Arc<MemoryStore>,
    status: CommandStatus,
    fingerprint_id: Option<i64>,
    message: Option<&str>,
) {
    let mut doc = store.read_mailbox(SCOPE, DEVICE).await.unwrap().unwrap();
    doc.status = status.as_str().to_string();
    doc.fingerprint_id = fingerprint_id;
    doc.message = message.map(str::to_string);
    doc.updated_by = DEVICE.to_string();
    store.write_mailbox(SCOPE, DEVICE, doc).await.unwrap();
}

#[tokio::test]
async fn successful_enrollment_creates_member_keyed_by_fingerprint() {
    let store = Arc::new(MemoryStore::new());
    online_device(&store, DEVICE).await;
    let coordinator = coordinator(&store);
    let agent = spawn_happy_agent(&store, DEVICE, 7).await;

    let (tx, mut rx) = mpsc::channel(8);
    let outcome = coordinator
        .begin_enrollment(EnrollmentRequest {
            progress: Some(tx),
            ..request(EnrolleeAttributes::named("Alice"))
        })
        .await
        .unwrap();

    assert_eq!(outcome.fingerprint_id, 7);
    assert_eq!(outcome.member_key, 7);

    // Hardware progress was surfaced before resolution.
    let update = rx.recv().await.unwrap();
    assert_eq!(update.status, CommandStatus::InProgress);
    assert_eq!(update.message.as_deref(), Some("place finger on sensor"));

    let member = store.read_member(SCOPE, 7).await.unwrap().unwrap();
    assert_eq!(member.name, "Alice");
    assert_eq!(member.fingerprint_id, 7);
    assert_eq!(member.enrolled_by_device, DEVICE);
    assert!(member.gym_member_id.starts_with("GM-"));

    agent.await.unwrap();
}

#[tokio::test]
async fn hardware_failure_surfaces_device_message() {
    let store = Arc::new(MemoryStore::new());
    online_device(&store, DEVICE).await;
    let coordinator = coordinator(&store);
    let agent = spawn_agent(&store, DEVICE, vec![("failed", None, Some("sensor timeout"))]).await;

    let err = coordinator
        .begin_enrollment(request(EnrolleeAttributes::named("Alice")))
        .await
        .unwrap_err();

    assert!(matches!(err, EnrollError::Hardware { message } if message == "sensor timeout"));
    assert!(store.read_member(SCOPE, 7).await.unwrap().is_none());

    agent.await.unwrap();
}

#[tokio::test]
async fn stale_heartbeat_rejects_without_store_write() {
    let store = Arc::new(MemoryStore::new());
    device_with_presence(&store, DEVICE, Duration::from_secs(300), STATE_ONLINE, true).await;
    let coordinator = coordinator(&store);

    let started = Instant::now();
    let err = coordinator
        .begin_enrollment(request(EnrolleeAttributes::named("Alice")))
        .await
        .unwrap_err();

    // Local rejection: fast, and nothing hit the mailbox.
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(matches!(
        err,
        EnrollError::DeviceUnavailable {
            reason: UnavailableReason::StaleHeartbeat { age_secs },
            ..
        } if age_secs >= 300
    ));
    assert!(store.read_mailbox(SCOPE, DEVICE).await.unwrap().is_none());
}

#[tokio::test]
async fn non_online_state_rejects_without_store_write() {
    let store = Arc::new(MemoryStore::new());
    device_with_presence(&store, DEVICE, Duration::ZERO, "maintenance", true).await;
    let coordinator = coordinator(&store);

    let err = coordinator
        .begin_enrollment(request(EnrolleeAttributes::named("Alice")))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EnrollError::DeviceUnavailable {
            reason: UnavailableReason::NotOnline { state },
            ..
        } if state == "maintenance"
    ));
    assert!(store.read_mailbox(SCOPE, DEVICE).await.unwrap().is_none());
}

#[tokio::test]
async fn unknown_device_rejects_immediately() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = coordinator(&store);

    let err = coordinator
        .begin_enrollment(request(EnrolleeAttributes::named("Alice")))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EnrollError::DeviceUnavailable {
            reason: UnavailableReason::NotFound,
            ..
        }
    ));
    assert!(store.read_mailbox(SCOPE, DEVICE).await.unwrap().is_none());
}

#[tokio::test]
async fn invalid_attributes_reject_before_any_store_access() {
    let store = Arc::new(MemoryStore::new());
    // No presence registered: validation must fail first.
    let coordinator = coordinator(&store);

    let err = coordinator
        .begin_enrollment(request(EnrolleeAttributes::named("A")))
        .await
        .unwrap_err();
    assert!(matches!(err, EnrollError::Validation(_)));

    let err = coordinator
        .begin_enrollment(request(EnrolleeAttributes {
            phone: Some("not a number".to_string()),
            ..EnrolleeAttributes::named("Alice")
        }))
        .await
        .unwrap_err();
    assert!(matches!(err, EnrollError::Validation(_)));

    assert!(store.read_mailbox(SCOPE, DEVICE).await.unwrap().is_none());
}

#[tokio::test]
async fn attempt_times_out_when_device_stays_silent() {
    let store = Arc::new(MemoryStore::new());
    online_device(&store, DEVICE).await;
    let coordinator = coordinator_with_timeout(&store, Duration::from_millis(100));

    let started = Instant::now();
    let err = coordinator
        .begin_enrollment(request(EnrolleeAttributes::named("Alice")))
        .await
        .unwrap_err();

    assert!(matches!(err, EnrollError::Timeout { .. }));
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(started.elapsed() < Duration::from_secs(2));

    // The slot is left as-is for the next attempt to supersede.
    let slot = store.read_mailbox(SCOPE, DEVICE).await.unwrap().unwrap();
    assert_eq!(slot.command_status(), Some(CommandStatus::Pending));
    assert!(store.read_member(SCOPE, 7).await.unwrap().is_none());
}

#[tokio::test]
async fn competing_attempt_is_refused_while_first_is_active() {
    let store = Arc::new(MemoryStore::new());
    online_device(&store, DEVICE).await;
    let coordinator = Arc::new(coordinator(&store));

    let first = spawn_attempt(&coordinator, "Alice");
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Second operator: the slot is active and fresh, so the claim is refused
    // before anything is written over the first command.
    let err = coordinator
        .begin_enrollment(request(EnrolleeAttributes::named("Bob")))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EnrollError::DeviceUnavailable {
            reason: UnavailableReason::Busy,
            ..
        }
    ));

    // The first attempt is unaffected and completes normally.
    device_writes(&store, CommandStatus::Completed, Some(7), None).await;
    let outcome = first.await.unwrap().unwrap();
    assert_eq!(outcome.fingerprint_id, 7);
}

#[tokio::test]
async fn foreign_correlation_updates_never_resolve_an_attempt() {
    let store = Arc::new(MemoryStore::new());
    online_device(&store, DEVICE).await;
    let coordinator = Arc::new(coordinator_with_timeout(&store, Duration::from_millis(200)));

    let first = spawn_attempt(&coordinator, "Alice");
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Someone else's attempt lands in the slot, complete with a fingerprint.
    let mut foreign = MailboxDoc::command("foreign-correlation", "Mallory", "operator-2");
    foreign.status = CommandStatus::Completed.as_str().to_string();
    foreign.fingerprint_id = Some(9);
    store.write_mailbox(SCOPE, DEVICE, foreign).await.unwrap();

    // The waiting attempt ignores it and runs into its own timeout, and the
    // foreign completion is never credited to it.
    let err = first.await.unwrap().unwrap_err();
    assert!(matches!(err, EnrollError::Timeout { .. }));
    assert!(store.read_member(SCOPE, 9).await.unwrap().is_none());
}

#[tokio::test]
async fn cancel_flips_active_slot_and_attempt_reports_it() {
    let store = Arc::new(MemoryStore::new());
    online_device(&store, DEVICE).await;
    let coordinator = Arc::new(coordinator(&store));
    let agent = spawn_agent(&store, DEVICE, vec![("in_progress", None, None)]).await;

    let first = spawn_attempt(&coordinator, "Alice");
    tokio::time::sleep(Duration::from_millis(50)).await;

    coordinator.cancel_enrollment(SCOPE, DEVICE).await.unwrap();

    let err = first.await.unwrap().unwrap_err();
    assert!(matches!(err, EnrollError::Cancelled));

    let slot = store.read_mailbox(SCOPE, DEVICE).await.unwrap().unwrap();
    assert_eq!(slot.command_status(), Some(CommandStatus::Cancelled));
    assert_eq!(slot.updated_by, "operator-1");
    assert!(store.read_member(SCOPE, 7).await.unwrap().is_none());

    agent.await.unwrap();
}

#[tokio::test]
async fn cancel_after_terminal_is_a_noop() {
    let store = Arc::new(MemoryStore::new());
    online_device(&store, DEVICE).await;
    let coordinator = coordinator(&store);
    let agent = spawn_happy_agent(&store, DEVICE, 7).await;

    let outcome = coordinator
        .begin_enrollment(request(EnrolleeAttributes::named("Alice")))
        .await
        .unwrap();
    assert_eq!(outcome.fingerprint_id, 7);
    agent.await.unwrap();

    coordinator.cancel_enrollment(SCOPE, DEVICE).await.unwrap();

    // The settled slot and the finalized member are both untouched.
    let slot = store.read_mailbox(SCOPE, DEVICE).await.unwrap().unwrap();
    assert_eq!(slot.command_status(), Some(CommandStatus::Completed));
    assert!(store.read_member(SCOPE, 7).await.unwrap().is_some());
}

#[tokio::test]
async fn cancel_with_no_mailbox_is_a_noop() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = coordinator(&store);
    coordinator.cancel_enrollment(SCOPE, DEVICE).await.unwrap();
    assert!(store.read_mailbox(SCOPE, DEVICE).await.unwrap().is_none());
}

#[tokio::test]
async fn completion_without_fingerprint_is_a_protocol_error() {
    let store = Arc::new(MemoryStore::new());
    online_device(&store, DEVICE).await;
    let coordinator = coordinator(&store);
    let agent = spawn_agent(&store, DEVICE, vec![("completed", None, None)]).await;

    let err = coordinator
        .begin_enrollment(request(EnrolleeAttributes::named("Alice")))
        .await
        .unwrap_err();

    assert!(matches!(err, EnrollError::Protocol(_)));
    assert!(store.read_member(SCOPE, 7).await.unwrap().is_none());
    agent.await.unwrap();
}

#[tokio::test]
async fn unknown_status_value_is_a_protocol_error() {
    let store = Arc::new(MemoryStore::new());
    online_device(&store, DEVICE).await;
    let coordinator = coordinator(&store);
    let agent = spawn_agent(&store, DEVICE, vec![("rebooting", None, Some("fw update"))]).await;

    let err = coordinator
        .begin_enrollment(request(EnrolleeAttributes::named("Alice")))
        .await
        .unwrap_err();

    assert!(matches!(err, EnrollError::Protocol(msg) if msg.contains("rebooting")));
    agent.await.unwrap();
}

#[tokio::test]
async fn new_attempt_supersedes_terminal_slot() {
    let store = Arc::new(MemoryStore::new());
    online_device(&store, DEVICE).await;
    let coordinator = coordinator(&store);

    let agent = spawn_happy_agent(&store, DEVICE, 7).await;
    let first = coordinator
        .begin_enrollment(request(EnrolleeAttributes::named("Alice")))
        .await
        .unwrap();
    assert_eq!(first.fingerprint_id, 7);
    agent.await.unwrap();

    // Same device, next member: the terminal slot is claimed over.
    let agent = spawn_happy_agent(&store, DEVICE, 8).await;
    let second = coordinator
        .begin_enrollment(request(EnrolleeAttributes::named("Bob")))
        .await
        .unwrap();
    assert_eq!(second.fingerprint_id, 8);
    agent.await.unwrap();

    assert_eq!(
        store.read_member(SCOPE, 8).await.unwrap().unwrap().name,
        "Bob"
    );
}

#[tokio::test]
async fn abandoned_slot_is_superseded_once_it_ages_out() {
    let store = Arc::new(MemoryStore::new());
    online_device(&store, DEVICE).await;
    let coordinator = coordinator_with_timeout(&store, Duration::from_millis(80));

    // First attempt dies silently, leaving a pending slot behind.
    let err = coordinator
        .begin_enrollment(request(EnrolleeAttributes::named("Alice")))
        .await
        .unwrap_err();
    assert!(matches!(err, EnrollError::Timeout { .. }));

    tokio::time::sleep(Duration::from_millis(100)).await;

    // Once the leftover is older than the attempt timeout it no longer
    // blocks the device.
    let agent = spawn_happy_agent(&store, DEVICE, 9).await;
    let outcome = coordinator
        .begin_enrollment(request(EnrolleeAttributes::named("Bob")))
        .await
        .unwrap();
    assert_eq!(outcome.fingerprint_id, 9);
    agent.await.unwrap();
}

#[tokio::test]
async fn burst_of_updates_still_resolves() {
    // Tiny watch buffer: the coordinator may lag behind the agent's burst
    // and has to catch up from the slot itself.
    let store = Arc::new(MemoryStore::with_watch_capacity(1));
    online_device(&store, DEVICE).await;
    let coordinator = coordinator(&store);

    let mut steps: Vec<(&'static str, Option<i64>, Option<&'static str>)> = (0..10)
        .map(|_| ("in_progress", None, Some("hold still")))
        .collect();
    steps.push(("completed", Some(7), None));
    let agent = spawn_agent(&store, DEVICE, steps).await;

    let outcome = coordinator
        .begin_enrollment(request(EnrolleeAttributes::named("Alice")))
        .await
        .unwrap();
    assert_eq!(outcome.fingerprint_id, 7);
    assert!(store.read_member(SCOPE, 7).await.unwrap().is_some());
    agent.await.unwrap();
}

#[tokio::test]
async fn passive_observer_sees_full_lifecycle() {
    let store = Arc::new(MemoryStore::new());
    online_device(&store, DEVICE).await;
    let coordinator = coordinator(&store);
    let agent = spawn_happy_agent(&store, DEVICE, 7).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = coordinator
        .observe_enrollment(SCOPE, DEVICE, move |update| {
            let _ = tx.send(update);
        })
        .await
        .unwrap();

    coordinator
        .begin_enrollment(request(EnrolleeAttributes::named("Alice")))
        .await
        .unwrap();
    agent.await.unwrap();

    // Every mutation is forwarded, including the command write itself.
    let statuses = [
        rx.recv().await.unwrap().status,
        rx.recv().await.unwrap().status,
        rx.recv().await.unwrap().status,
    ];
    assert_eq!(
        statuses,
        [
            CommandStatus::Pending,
            CommandStatus::InProgress,
            CommandStatus::Completed,
        ]
    );

    handle.unsubscribe();
    assert!(rx.recv().await.is_none());
}
