//! Integration tests for the Blueprint kernel.
//!
//! These tests verify end-to-end behaviour across aggregates, the event store,
//! the repository and projections.

use std::sync::Arc;

use blueprint_core::domain::{Account, Workspace, WorkspaceState, WorkspaceStatus};
use blueprint_core::error::ErrorCode;
use blueprint_core::events::{
    CausalityContext, Command, CommandMetadata, EventServices, EventStore, FixedClock,
    InMemoryEventStore, Repository, SequentialIdGenerator, StreamKey, SYSTEM_CAUSE,
};
use blueprint_core::modules::{
    builtin_manifests, can_enable, missing_dependencies, ManifestMap, ModuleRegistry,
};
use blueprint_core::projections::{
    DocumentSink, InMemoryDocumentSink, ProjectionBuilder, ProjectionDispatcher,
    WorkspaceProjectionBuilder,
};
use chrono::{TimeZone, Utc};

// ============================================================================
// Test Utilities
// ============================================================================

fn services() -> EventServices {
    EventServices::new(
        Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap())),
        Arc::new(SequentialIdGenerator::new("evt")),
    )
}

fn ctx(action: &str) -> CausalityContext {
    CausalityContext::new("A1", action)
}

fn store() -> Arc<dyn EventStore> {
    Arc::new(InMemoryEventStore::new())
}

// ============================================================================
// Workspace Lifecycle
// ============================================================================

#[test]
fn test_workspace_create_and_archive_scenario() {
    let services = services();
    let mut ws =
        Workspace::create(&services, &ctx("CreateWorkspace"), "W1", "A1", "A1", "Acme").unwrap();

    assert_eq!(ws.status, Some(WorkspaceStatus::Initializing));
    assert_eq!(ws.version(), 1);
    let events = ws.uncommitted_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type(), "WorkspaceCreated");
    assert_eq!(events[0].metadata().caused_by, SYSTEM_CAUSE);

    ws.archive(&services, &ctx("ArchiveWorkspace"), None).unwrap();
    assert_eq!(ws.status, Some(WorkspaceStatus::Archived));
    assert_eq!(ws.version(), 2);
    let events = ws.uncommitted_events();
    assert_eq!(events[1].event_type(), "WorkspaceArchived");
    assert_eq!(events[1].metadata().caused_by, events[0].id().as_str());

    let err = ws.archive(&services, &ctx("ArchiveWorkspace"), None).unwrap_err();
    assert_eq!(err.user_message(), "Workspace is already archived");
    assert_eq!(ws.version(), 2);
    assert_eq!(ws.uncommitted_events().len(), 2);
}

#[test]
fn test_command_envelope_drives_aggregate() {
    let services = services();
    let command: Command = serde_json::from_value(serde_json::json!({
        "commandType": "CreateWorkspace",
        "data": { "workspaceId": "W7", "name": "Seven" },
        "metadata": {
            "actorAccountId": "A1",
            "blueprintId": "A1",
            "issuedAt": "2024-06-01T12:00:00Z",
            "action": "CreateWorkspace"
        }
    }))
    .unwrap();

    let blueprint = command.metadata.blueprint_id.clone().unwrap();
    let ws = Workspace::create(
        &services,
        &command.causality(),
        command.data["workspaceId"].as_str().unwrap(),
        &command.metadata.actor_account_id,
        &blueprint,
        command.data["name"].as_str().unwrap(),
    )
    .unwrap();

    let meta = ws.uncommitted_events()[0].metadata().clone();
    assert_eq!(meta.caused_by_user, "A1");
    assert_eq!(meta.caused_by_action, "CreateWorkspace");
    assert_eq!(meta.blueprint_id.as_deref(), Some("A1"));

    let _ = CommandMetadata::new("A1", "Noop", Utc::now()).with_blueprint("A1");
}

#[test]
fn test_command_tenant_must_match_workspace() {
    let services = services();
    let mut ws =
        Workspace::create(&services, &ctx("CreateWorkspace"), "W1", "A1", "A1", "Acme").unwrap();

    let foreign = Command::new(
        "RenameWorkspace",
        serde_json::json!({ "workspaceId": "W1", "name": "Hijacked" }),
        CommandMetadata::new("B1", "RenameWorkspace", Utc::now()).with_blueprint("B1"),
    );
    let err = ws
        .rename(&services, &foreign.causality(), "Hijacked")
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::TenantMismatch);
    assert_eq!(ws.name, "Acme");
    assert_eq!(ws.version(), 1);

    let err = Workspace::create(&services, &foreign.causality(), "W2", "B1", "A1", "Other")
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::TenantMismatch);

    let own = Command::new(
        "RenameWorkspace",
        serde_json::json!({ "workspaceId": "W1", "name": "Acme 2" }),
        CommandMetadata::new("A1", "RenameWorkspace", Utc::now()).with_blueprint("A1"),
    );
    ws.rename(&services, &own.causality(), "Acme 2").unwrap();
    assert_eq!(ws.version(), 2);
    assert_eq!(
        ws.uncommitted_events()[1].metadata().blueprint_id.as_deref(),
        Some("A1")
    );
}

// ============================================================================
// Module Gate
// ============================================================================

#[test]
fn test_issue_module_requires_task() {
    let manifests: ManifestMap = builtin_manifests()
        .into_iter()
        .map(|m| (m.key.clone(), m))
        .collect();

    assert!(!can_enable("issue", &[], &manifests));
    assert_eq!(missing_dependencies("issue", &[], &manifests), vec!["task".to_string()]);
}

#[test]
fn test_module_gate_inside_aggregate() {
    let services = services();
    let registry = ModuleRegistry::with_builtins().unwrap();
    let mut ws =
        Workspace::create(&services, &ctx("CreateWorkspace"), "W1", "A1", "A1", "Acme").unwrap();

    let err = ws
        .enable_module(&services, &ctx("EnableModule"), &registry, "payment")
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::DependencyNotMet);
    assert!(!err.is_retryable());
    assert_eq!(ws.version(), 1);
}

// ============================================================================
// Causality Completeness
// ============================================================================

#[test]
fn test_incomplete_provenance_fails_before_mutation() {
    let services = services();

    for bad in [
        CausalityContext::new("", "CreateWorkspace"),
        CausalityContext::new("A1", ""),
        CausalityContext::new("A1", "CreateWorkspace").caused_by(""),
    ] {
        let err = Workspace::create(&services, &bad, "W1", "A1", "A1", "Acme").unwrap_err();
        assert_eq!(err.code(), ErrorCode::CausalityViolation);
    }

    let mut ws =
        Workspace::create(&services, &ctx("CreateWorkspace"), "W1", "A1", "A1", "Acme").unwrap();
    let before = ws.state().clone();
    let err = ws
        .rename(&services, &CausalityContext::new(" ", "Rename"), "Other")
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::CausalityViolation);
    assert_eq!(ws.state(), &before);
    assert_eq!(ws.version(), 1);
}

#[test]
fn test_only_root_event_may_omit_blueprint() {
    let services = services();
    let account = Account::create(&services, &ctx("Signup"), "A1", "a1@example.com", "Ada").unwrap();
    assert!(account.uncommitted_events()[0].metadata().blueprint_id.is_none());

    let err = Workspace::create(&services, &ctx("CreateWorkspace"), "W1", "A1", "", "Acme")
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::CausalityViolation);
}

// ============================================================================
// Repository + Store
// ============================================================================

#[tokio::test]
async fn test_two_writers_one_winner() {
    let services = services();
    let store = store();
    let repo: Repository<WorkspaceState> = Repository::new(store.clone());

    let mut ws =
        Workspace::create(&services, &ctx("CreateWorkspace"), "W1", "A1", "A1", "Acme").unwrap();
    repo.save(&mut ws).await.unwrap();

    let mut first = repo.get("W1").await.unwrap();
    let mut second = repo.get("W1").await.unwrap();
    first.mark_ready(&services, &ctx("MarkReady")).unwrap();
    second.rename(&services, &ctx("Rename"), "Acme 2").unwrap();

    repo.save(&mut first).await.unwrap();
    let err = repo.save(&mut second).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConcurrencyConflict);
    assert!(err.is_retryable());
    assert!(second.has_uncommitted_events());

    // Loser reloads, reapplies and retries.
    let mut retry = repo.get("W1").await.unwrap();
    retry.rename(&services, &ctx("Rename"), "Acme 2").unwrap();
    repo.save(&mut retry).await.unwrap();

    let loaded = repo.get("W1").await.unwrap();
    assert_eq!(loaded.version(), 3);
    assert_eq!(loaded.status, Some(WorkspaceStatus::Ready));
    assert_eq!(loaded.name, "Acme 2");
}

#[tokio::test]
async fn test_duplicate_create_conflicts() {
    let services = services();
    let repo: Repository<WorkspaceState> = Repository::new(store());

    let mut a = Workspace::create(&services, &ctx("CreateWorkspace"), "W1", "A1", "A1", "A").unwrap();
    let mut b = Workspace::create(&services, &ctx("CreateWorkspace"), "W1", "A1", "A1", "B").unwrap();
    repo.save(&mut a).await.unwrap();
    assert_eq!(
        repo.save(&mut b).await.unwrap_err().code(),
        ErrorCode::ConcurrencyConflict
    );
}

#[tokio::test]
async fn test_execute_resolves_concurrent_commands() {
    let services = Arc::new(services());
    let store = store();
    let repo: Repository<WorkspaceState> = Repository::new(store.clone());
    let registry = ModuleRegistry::with_builtins().unwrap();

    let mut ws =
        Workspace::create(&services, &ctx("CreateWorkspace"), "W1", "A1", "A1", "Acme").unwrap();
    ws.mark_ready(&services, &ctx("MarkReady")).unwrap();
    repo.save(&mut ws).await.unwrap();

    let mut handles = Vec::new();
    for key in ["task", "membership"] {
        let repo = repo.clone();
        let services = Arc::clone(&services);
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            repo.execute("W1", |ws| {
                ws.enable_module(&services, &ctx("EnableModule"), &registry, key)
            })
            .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let loaded = repo.get("W1").await.unwrap();
    assert_eq!(loaded.enabled_modules, vec!["membership", "task"]);
    assert_eq!(loaded.version(), 4);
    assert_eq!(
        store.current_version(&StreamKey::new("Workspace", "W1")).await.unwrap(),
        4
    );
}

#[tokio::test]
async fn test_tenant_filtered_reads() {
    let services = services();
    let store = store();
    let accounts: Repository<blueprint_core::domain::AccountState> = Repository::new(store.clone());
    let workspaces: Repository<WorkspaceState> = Repository::new(store.clone());

    let mut account =
        Account::create(&services, &ctx("Signup"), "A1", "a1@example.com", "Ada").unwrap();
    account.rename(&services, &ctx("Rename"), "Ada L.").unwrap();
    accounts.save(&mut account).await.unwrap();

    let mut w1 = Workspace::create(&services, &ctx("CreateWorkspace"), "W1", "A1", "A1", "One").unwrap();
    let mut w2 = Workspace::create(&services, &ctx("CreateWorkspace"), "W2", "B1", "B1", "Two").unwrap();
    workspaces.save(&mut w1).await.unwrap();
    workspaces.save(&mut w2).await.unwrap();

    let events = store.load_by_blueprint("A1").await.unwrap();
    let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(types, vec!["AccountRenamed", "WorkspaceCreated"]);
}

// ============================================================================
// Projections
// ============================================================================

#[tokio::test]
async fn test_projection_follows_commits() {
    let services = services();
    let store = store();
    let sink = Arc::new(InMemoryDocumentSink::new());
    let builder = Arc::new(WorkspaceProjectionBuilder::new(sink.clone()));
    let builders: Vec<Arc<dyn ProjectionBuilder>> = vec![builder.clone()];
    let dispatcher = ProjectionDispatcher::spawn(store.clone(), builders, 16);
    let repo: Repository<WorkspaceState> =
        Repository::new(store.clone()).with_dispatcher(dispatcher.handle());
    let registry = ModuleRegistry::with_builtins().unwrap();

    let mut ws =
        Workspace::create(&services, &ctx("CreateWorkspace"), "W1", "A1", "A1", "Acme").unwrap();
    ws.mark_ready(&services, &ctx("MarkReady")).unwrap();
    ws.enable_module(&services, &ctx("EnableModule"), &registry, "task")
        .unwrap();
    repo.save(&mut ws).await.unwrap();
    ws.restrict(&services, &ctx("Restrict"), "unpaid").unwrap();
    repo.save(&mut ws).await.unwrap();

    let stats = dispatcher.shutdown().await.unwrap();
    assert_eq!(stats.applied, 4);
    assert_eq!(stats.failed, 0);

    let view = builder.get("W1").await.unwrap().unwrap();
    assert_eq!(view.status, WorkspaceStatus::Restricted);
    assert_eq!(view.enabled_modules, vec!["task"]);
    assert_eq!(view.version, ws.version());
    assert_eq!(view.last_event_id, ws.last_event_id().unwrap().as_str());
}

#[tokio::test]
async fn test_projection_rebuild_matches_live_and_is_idempotent() {
    let services = services();
    let store = store();
    let repo: Repository<WorkspaceState> = Repository::new(store.clone());
    let registry = ModuleRegistry::with_builtins().unwrap();

    let mut ws =
        Workspace::create(&services, &ctx("CreateWorkspace"), "W1", "A1", "A1", "Acme").unwrap();
    ws.mark_ready(&services, &ctx("MarkReady")).unwrap();
    ws.enable_module(&services, &ctx("EnableModule"), &registry, "membership")
        .unwrap();
    ws.enable_module(&services, &ctx("EnableModule"), &registry, "payment")
        .unwrap();
    ws.rename(&services, &ctx("Rename"), "Acme Ltd").unwrap();
    repo.save(&mut ws).await.unwrap();

    let events = store.load(&StreamKey::new("Workspace", "W1")).await.unwrap();

    let live_sink = Arc::new(InMemoryDocumentSink::new());
    let live = WorkspaceProjectionBuilder::new(live_sink.clone());
    for event in &events {
        live.handle_event(event).await.unwrap();
    }
    let live_doc = live_sink.get("workspaces", "W1").await.unwrap();

    // Redeliver everything: nothing changes.
    for event in &events {
        live.handle_event(event).await.unwrap();
    }
    assert_eq!(live_sink.get("workspaces", "W1").await.unwrap(), live_doc);

    // Rebuild into a fresh sink from a shuffled copy.
    let rebuilt_sink = Arc::new(InMemoryDocumentSink::new());
    let rebuilt = WorkspaceProjectionBuilder::new(rebuilt_sink.clone());
    let mut shuffled = events.clone();
    shuffled.reverse();
    rebuilt.rebuild("W1", &shuffled).await.unwrap();
    assert_eq!(rebuilt_sink.get("workspaces", "W1").await.unwrap(), live_doc);

    // Rebuilding over an existing document yields the same document.
    rebuilt.rebuild("W1", &events).await.unwrap();
    assert_eq!(rebuilt_sink.get("workspaces", "W1").await.unwrap(), live_doc);
}
