//! Access resolution order and graceful degradation.

use std::sync::Arc;

use folio_api::services::{
    create_folder, create_note, create_team, get_folder, get_note, get_team_members,
    share_folder, unshare_folder,
};
use folio_api::{AppState, GrantSource, InMemoryStore, RequestContext, METRICS};
use folio_cache::{CacheConfig, InMemoryCacheStore};
use folio_core::{AccessLevel, AssetKind, FolioError, StoreError, Topic};
use folio_events::InMemoryEventLog;
use folio_test_utils::assertions::assert_denied;
use folio_test_utils::fixtures::{member, peer_state, test_stack};
use folio_test_utils::{FailingCacheStore, FailingEventLog, FlakyStore};
use uuid::Uuid;

// ============================================================================
// RESOLUTION ORDER
// ============================================================================

#[tokio::test]
async fn test_owner_short_circuits_cache_and_table() {
    let stack = test_stack();
    let owner = member();
    let folder = create_folder(&stack.state, &owner, "F").await.unwrap();

    let grant = stack
        .state
        .reads
        .resolve_access(&owner, folder.owner_id, AssetKind::Folder, folder.id)
        .await
        .unwrap()
        .unwrap();
    assert!(grant.is_owner());
    assert_eq!(grant.level, AccessLevel::Write);
}

#[tokio::test]
async fn test_acl_cache_is_consulted_before_share_table() {
    let stack = test_stack();
    let owner = member();
    let reader = member();
    let folder = create_folder(&stack.state, &owner, "F").await.unwrap();
    share_folder(&stack.state, &owner, folder.id, reader.user_id, AccessLevel::Read)
        .await
        .unwrap();

    // A cached entry that disagrees with the table is trusted.
    stack
        .state
        .cache()
        .add_asset_access(folder.id, reader.user_id, AccessLevel::Write)
        .await
        .unwrap();

    let grant = stack
        .state
        .reads
        .resolve_access(&reader, owner.user_id, AssetKind::Folder, folder.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(grant.source, GrantSource::AclCache);
    assert_eq!(grant.level, AccessLevel::Write);
}

#[tokio::test]
async fn test_cache_miss_falls_back_to_share_table_and_populates() {
    let stack = test_stack();
    let (peer, _) = peer_state(&stack);
    let owner = member();
    let reader = member();
    let folder = create_folder(&stack.state, &owner, "F").await.unwrap();
    share_folder(&stack.state, &owner, folder.id, reader.user_id, AccessLevel::Read)
        .await
        .unwrap();

    let first = peer
        .reads
        .resolve_access(&reader, owner.user_id, AssetKind::Folder, folder.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.source, GrantSource::ShareTable);
    assert_eq!(first.level, AccessLevel::Read);

    let second = peer
        .reads
        .resolve_access(&reader, owner.user_id, AssetKind::Folder, folder.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.source, GrantSource::AclCache);
}

#[tokio::test]
async fn test_no_share_denies() {
    let stack = test_stack();
    let owner = member();
    let stranger = member();
    let folder = create_folder(&stack.state, &owner, "F").await.unwrap();

    assert!(stack
        .state
        .reads
        .resolve_access(&stranger, owner.user_id, AssetKind::Folder, folder.id)
        .await
        .unwrap()
        .is_none());
    assert_denied(&get_folder(&stack.state, &stranger, folder.id).await);
}

#[tokio::test]
async fn test_unshare_revokes_on_next_check() {
    let stack = test_stack();
    let owner = member();
    let reader = member();
    let folder = create_folder(&stack.state, &owner, "F").await.unwrap();
    share_folder(&stack.state, &owner, folder.id, reader.user_id, AccessLevel::Read)
        .await
        .unwrap();
    get_folder(&stack.state, &reader, folder.id).await.unwrap();

    unshare_folder(&stack.state, &owner, folder.id, reader.user_id)
        .await
        .unwrap();
    assert_denied(&get_folder(&stack.state, &reader, folder.id).await);
}

#[tokio::test]
async fn test_folder_share_reaches_notes() {
    let stack = test_stack();
    let owner = member();
    let reader = member();
    let folder = create_folder(&stack.state, &owner, "F").await.unwrap();
    let note = create_note(&stack.state, &owner, folder.id, "n", "body")
        .await
        .unwrap();
    share_folder(&stack.state, &owner, folder.id, reader.user_id, AccessLevel::Read)
        .await
        .unwrap();

    let view = get_note(&stack.state, &reader, note.id).await.unwrap();
    assert_eq!(view.access.source, GrantSource::Folder);
    assert_eq!(view.access.level, AccessLevel::Read);
}

// ============================================================================
// DEGRADATION
// ============================================================================

#[tokio::test]
async fn test_unavailable_cache_falls_back_to_store() {
    let cache_store = Arc::new(FailingCacheStore::new());
    let state = AppState::new(
        Arc::new(InMemoryStore::new()),
        cache_store.clone(),
        Arc::new(InMemoryEventLog::new()),
        CacheConfig::default(),
    );
    let owner = member();
    let reader = member();

    let folder = create_folder(&state, &owner, "F").await.unwrap();
    share_folder(&state, &owner, folder.id, reader.user_id, AccessLevel::Write)
        .await
        .unwrap();

    let view = get_folder(&state, &reader, folder.id).await.unwrap();
    assert!(!view.from_cache);
    assert_eq!(view.access.source, GrantSource::ShareTable);
    assert_eq!(view.access.level, AccessLevel::Write);
    assert!(cache_store.rejected() > 0);

    let manager = RequestContext::manager(Uuid::now_v7());
    let team = create_team(&state, &manager, "Team", &[reader.user_id])
        .await
        .unwrap()
        .team;
    let members = get_team_members(&state, team.id).await.unwrap();
    assert!(!members.from_cache);
    assert_eq!(members.members.len(), 2);
}

#[tokio::test]
async fn test_store_errors_propagate() {
    let store = Arc::new(FlakyStore::new());
    let state = AppState::new(
        store.clone(),
        Arc::new(InMemoryCacheStore::new()),
        Arc::new(InMemoryEventLog::new()),
        CacheConfig::default(),
    );
    let owner = member();
    let reader = member();
    let folder = create_folder(&state, &owner, "F").await.unwrap();

    store.set_failing_reads(true);
    let result = state
        .reads
        .resolve_access(&reader, owner.user_id, AssetKind::Folder, folder.id)
        .await;
    assert!(matches!(
        result,
        Err(FolioError::Store(StoreError::Pool { .. }))
    ));
}

#[tokio::test]
async fn test_unavailable_log_still_applies_inline() {
    let log = Arc::new(FailingEventLog::new());
    let state = AppState::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(InMemoryCacheStore::new()),
        log.clone(),
        CacheConfig::default(),
    );
    let owner = member();
    let reader = member();
    let failed_publishes = METRICS
        .as_ref()
        .unwrap()
        .events_published_total
        .with_label_values(&["asset.changes", "failure"]);
    let before = failed_publishes.get();

    let folder = create_folder(&state, &owner, "F").await.unwrap();
    share_folder(&state, &owner, folder.id, reader.user_id, AccessLevel::Read)
        .await
        .unwrap();

    assert!(failed_publishes.get() >= before + 2.0);
    assert_eq!(
        state.cache().get_asset_access(folder.id, reader.user_id).await.unwrap(),
        Some(AccessLevel::Read)
    );
    assert!(log.inner().is_empty(Topic::AssetChanges).unwrap());
    let published = state.publisher().metrics();
    assert_eq!(published.published, 0);
    assert!(published.failed >= 2);
}
