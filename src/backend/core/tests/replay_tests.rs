//! Replay and event-store tests.
//!
//! Rehydration must be deterministic, versions must be gapless, and the
//! store must refuse anything that would make a stream ambiguous.

use std::sync::Arc;

use blueprint_core::domain::{Workspace, WorkspaceEvent, WorkspaceState, WorkspaceStatus};
use blueprint_core::error::ErrorCode;
use blueprint_core::events::{
    AggregateRoot, CausalityContext, EventServices, EventStore, FixedClock, InMemoryEventStore,
    SequentialIdGenerator, StoredEvent, StreamKey,
};
use blueprint_core::modules::ModuleRegistry;
use chrono::{Duration, TimeZone, Utc};

// ============================================================================
// Fixtures
// ============================================================================

fn services() -> (Arc<FixedClock>, EventServices) {
    let clock = Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    ));
    let services = EventServices::new(clock.clone(), Arc::new(SequentialIdGenerator::new("e")));
    (clock, services)
}

fn ctx(action: &str) -> CausalityContext {
    CausalityContext::new("A1", action)
}

/// A workspace with a realistic history, already committed.
async fn seeded_stream(store: &InMemoryEventStore) -> Vec<StoredEvent> {
    let (clock, services) = services();
    let registry = ModuleRegistry::with_builtins().unwrap();

    let mut ws =
        Workspace::create(&services, &ctx("CreateWorkspace"), "W1", "A1", "A1", "Acme").unwrap();
    clock.advance(Duration::seconds(1));
    ws.mark_ready(&services, &ctx("MarkReady")).unwrap();
    clock.advance(Duration::seconds(1));
    ws.enable_module(&services, &ctx("EnableModule"), &registry, "task")
        .unwrap();
    ws.enable_module(&services, &ctx("EnableModule"), &registry, "issue")
        .unwrap();
    clock.advance(Duration::seconds(1));
    ws.restrict(&services, &ctx("Restrict"), "billing").unwrap();
    ws.reinstate(&services, &ctx("Reinstate")).unwrap();

    let events = ws.uncommitted_stored().unwrap();
    store.append(&ws.stream_key(), events, 0).await.unwrap();
    store.load(&ws.stream_key()).await.unwrap()
}

async fn rename_once(
    store: &InMemoryEventStore,
    services: &EventServices,
    name: &str,
) -> blueprint_core::Result<()> {
    let events = store.load(&StreamKey::new("Workspace", "W1")).await?;
    let mut ws: Workspace = AggregateRoot::from_stored("W1", &events)?;
    ws.rename(services, &ctx("Rename"), name)?;
    let pending = ws.uncommitted_stored()?;
    store
        .append(&ws.stream_key(), pending, ws.persisted_version())
        .await
}

// ============================================================================
// Replay
// ============================================================================

#[tokio::test]
async fn test_replay_is_deterministic() {
    let store = InMemoryEventStore::new();
    let events = seeded_stream(&store).await;

    let first: Workspace = AggregateRoot::from_stored("W1", &events).unwrap();
    let second: Workspace = AggregateRoot::from_stored("W1", &events).unwrap();

    assert_eq!(first.state(), second.state());
    assert_eq!(first.version(), 6);
    assert_eq!(first.status, Some(WorkspaceStatus::Ready));
    assert_eq!(first.enabled_modules, vec!["issue", "task"]);
    assert!(!first.has_uncommitted_events());
    assert_eq!(first.persisted_version(), first.version());
}

#[tokio::test]
async fn test_versions_are_gapless() {
    let store = InMemoryEventStore::new();
    let events = seeded_stream(&store).await;

    let versions: Vec<u64> = events.iter().map(|e| e.version).collect();
    assert_eq!(versions, (1..=6).collect::<Vec<_>>());

    let mut ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), events.len());
}

#[tokio::test]
async fn test_causation_chain_links_every_event() {
    let store = InMemoryEventStore::new();
    let events = seeded_stream(&store).await;

    assert!(events[0].metadata.is_system_caused());
    for pair in events.windows(2) {
        assert_eq!(pair[1].metadata.caused_by, pair[0].id.as_str());
        assert!(pair[1].metadata.timestamp >= pair[0].metadata.timestamp);
    }
    assert!(events
        .iter()
        .all(|e| e.metadata.blueprint_id.as_deref() == Some("A1")));
}

#[tokio::test]
async fn test_replay_rejects_gap() {
    let store = InMemoryEventStore::new();
    let mut events = seeded_stream(&store).await;
    events.remove(2);

    let err = AggregateRoot::<WorkspaceState>::from_stored("W1", &events).unwrap_err();
    assert_eq!(err.code(), ErrorCode::StreamMismatch);
}

#[tokio::test]
async fn test_replay_rejects_unknown_event_type() {
    let store = InMemoryEventStore::new();
    let mut events = seeded_stream(&store).await;
    events[3].event_type = "WorkspaceTeleported".to_string();

    let err = AggregateRoot::<WorkspaceState>::from_stored("W1", &events).unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnknownEventType);
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_replay_rejects_corrupt_body() {
    let store = InMemoryEventStore::new();
    let mut events = seeded_stream(&store).await;
    events[4].data = serde_json::json!({ "reason": 42 });

    let err = AggregateRoot::<WorkspaceState>::from_stored("W1", &events).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Corruption);
}

#[tokio::test]
async fn test_replay_rejects_tenant_switch() {
    let store = InMemoryEventStore::new();
    let mut events = seeded_stream(&store).await;
    events[1].metadata.blueprint_id = Some("B1".to_string());

    let err = AggregateRoot::<WorkspaceState>::from_stored("W1", &events).unwrap_err();
    assert_eq!(err.code(), ErrorCode::TenantMismatch);
}

// ============================================================================
// Store
// ============================================================================

#[tokio::test]
async fn test_incremental_load_resumes_state() {
    let store = InMemoryEventStore::new();
    let events = seeded_stream(&store).await;
    let stream = StreamKey::new("Workspace", "W1");

    let mut ws: Workspace = AggregateRoot::from_stored("W1", &events[..3]).unwrap();
    let tail = store.load_from_version(&stream, ws.version()).await.unwrap();
    assert_eq!(tail.len(), 3);

    let decoded = tail
        .iter()
        .map(StoredEvent::decode::<WorkspaceEvent>)
        .collect::<blueprint_core::Result<Vec<_>>>()
        .unwrap();
    ws.replay(decoded).unwrap();

    let full: Workspace = AggregateRoot::from_stored("W1", &events).unwrap();
    assert_eq!(ws.state(), full.state());
    assert_eq!(ws.version(), full.version());
}

#[tokio::test]
async fn test_concurrent_writers_on_one_stream() {
    let store = Arc::new(InMemoryEventStore::new());
    seeded_stream(&store).await;
    let (_, services) = services();

    let mut handles = Vec::new();
    for n in 0..4 {
        let store = Arc::clone(&store);
        let services = services.clone();
        handles.push(tokio::spawn(async move {
            rename_once(&store, &services, &format!("Acme {}", n)).await
        }));
    }

    let mut winners = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => winners += 1,
            Err(err) => {
                assert_eq!(err.code(), ErrorCode::ConcurrencyConflict);
                conflicts += 1;
            }
        }
    }

    assert!(winners >= 1);
    assert_eq!(winners + conflicts, 4);
    assert_eq!(
        store.current_version(&StreamKey::new("Workspace", "W1")).await.unwrap(),
        6 + winners
    );
}
