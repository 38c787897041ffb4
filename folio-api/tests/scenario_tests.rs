//! End-to-end cache consistency scenarios.
//!
//! Two processes share one store and one event log but keep separate
//! caches. Process A serves the mutation and updates its cache inline;
//! process B only learns about it through its consumer.

use std::collections::BTreeSet;

use folio_api::services::{
    add_team_members, create_folder, create_note, create_team, delete_folder, get_folder,
    get_team_members, share_folder,
};
use folio_api::RequestContext;
use folio_core::{AccessLevel, AssetKind, EntityKind, Topic};
use folio_test_utils::assertions::assert_not_found;
use folio_test_utils::fixtures::{peer_state, test_stack};
use uuid::Uuid;

use test_support::{drain, peer_consumer};

// ============================================================================
// SCENARIO A: MEMBERSHIP REACHES A PEER
// ============================================================================

#[tokio::test]
async fn scenario_member_added_reaches_peer_cache() {
    let stack = test_stack();
    let (peer, _) = peer_state(&stack);
    let consumer = peer_consumer(&stack, &peer, Topic::TeamActivity, "peer");

    let (u1, u2) = (Uuid::now_v7(), Uuid::now_v7());
    let team = create_team(&stack.state, &RequestContext::manager(u1), "Team 7", &[])
        .await
        .unwrap()
        .team;

    // B caches {U1} through its own read-through.
    let first = peer.reads.team_members(team.id).await.unwrap();
    assert!(first.was_cache_miss());
    assert_eq!(first.value(), &BTreeSet::from([u1]));

    add_team_members(&stack.state, &RequestContext::member(u1), team.id, &[u2])
        .await
        .unwrap();
    assert!(drain(&consumer).await >= 1);

    let after = peer.reads.team_members(team.id).await.unwrap();
    assert!(after.was_cache_hit());
    assert_eq!(after.into_value(), BTreeSet::from([u1, u2]));

    let view = get_team_members(&peer, team.id).await.unwrap();
    assert!(view.from_cache);
    assert_eq!(view.members.len(), 2);
}

#[tokio::test]
async fn scenario_member_added_with_cold_peer_reads_store() {
    let stack = test_stack();
    let (peer, cache_store) = peer_state(&stack);
    let consumer = peer_consumer(&stack, &peer, Topic::TeamActivity, "peer");

    let (u1, u2) = (Uuid::now_v7(), Uuid::now_v7());
    let team = create_team(&stack.state, &RequestContext::manager(u1), "Team 7", &[])
        .await
        .unwrap()
        .team;
    add_team_members(&stack.state, &RequestContext::member(u1), team.id, &[u2])
        .await
        .unwrap();

    // The conditional add leaves B's absent set absent.
    drain(&consumer).await;
    assert!(cache_store.is_empty().await);

    let members = peer.reads.team_members(team.id).await.unwrap();
    assert!(members.was_cache_miss());
    assert_eq!(members.into_value(), BTreeSet::from([u1, u2]));
}

// ============================================================================
// SCENARIO B: LAST SHARE WINS
// ============================================================================

#[tokio::test]
async fn scenario_share_upgrade_is_last_applied() {
    let stack = test_stack();
    let (peer, _) = peer_state(&stack);
    let consumer = peer_consumer(&stack, &peer, Topic::AssetChanges, "peer");

    let owner = RequestContext::member(Uuid::now_v7());
    let u3 = Uuid::now_v7();
    let folder = create_folder(&stack.state, &owner, "F").await.unwrap();

    share_folder(&stack.state, &owner, folder.id, u3, AccessLevel::Read)
        .await
        .unwrap();
    share_folder(&stack.state, &owner, folder.id, u3, AccessLevel::Write)
        .await
        .unwrap();
    drain(&consumer).await;

    let acl = peer.cache().get_asset_acl(folder.id).await.unwrap().unwrap();
    assert_eq!(acl.get(&u3), Some(&AccessLevel::Write));
    assert_eq!(
        stack.state.cache().get_asset_access(folder.id, u3).await.unwrap(),
        Some(AccessLevel::Write)
    );
}

// ============================================================================
// SCENARIO C: DELETE EVICTS EVERYWHERE
// ============================================================================

#[tokio::test]
async fn scenario_folder_delete_evicts_peer_metadata() {
    let stack = test_stack();
    let (peer, _) = peer_state(&stack);
    let consumer = peer_consumer(&stack, &peer, Topic::AssetChanges, "peer");

    let owner = RequestContext::member(Uuid::now_v7());
    let folder = create_folder(&stack.state, &owner, "F").await.unwrap();
    let note = create_note(&stack.state, &owner, folder.id, "n", "").await.unwrap();

    // B caches the folder and the note.
    get_folder(&peer, &owner, folder.id).await.unwrap();
    peer.reads
        .asset_metadata(AssetKind::Note, note.id)
        .await
        .unwrap()
        .unwrap();
    drain(&consumer).await;

    delete_folder(&stack.state, &owner, folder.id).await.unwrap();
    drain(&consumer).await;

    let cache = peer.cache();
    assert!(cache
        .get_asset_metadata(AssetKind::Folder, folder.id)
        .await
        .unwrap()
        .is_none());
    assert!(cache
        .get_asset_metadata(AssetKind::Note, note.id)
        .await
        .unwrap()
        .is_none());

    assert_not_found(&get_folder(&peer, &owner, folder.id).await, EntityKind::Folder);
    assert!(peer
        .reads
        .asset_metadata(AssetKind::Folder, folder.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn scenario_undelivered_delete_still_hides_folder() {
    let stack = test_stack();
    let (peer, _) = peer_state(&stack);

    let owner = RequestContext::member(Uuid::now_v7());
    let reader = RequestContext::member(Uuid::now_v7());
    let folder = create_folder(&stack.state, &owner, "F").await.unwrap();
    share_folder(&stack.state, &owner, folder.id, reader.user_id, AccessLevel::Read)
        .await
        .unwrap();

    // B caches the metadata and the reader's ACL entry.
    assert!(get_folder(&peer, &reader, folder.id).await.is_ok());
    assert!(get_folder(&peer, &owner, folder.id).await.unwrap().from_cache);

    // B never consumes the delete, so its cache still holds the folder.
    delete_folder(&stack.state, &owner, folder.id).await.unwrap();
    assert!(peer
        .cache()
        .get_asset_metadata(AssetKind::Folder, folder.id)
        .await
        .unwrap()
        .is_some());

    assert_not_found(&get_folder(&peer, &owner, folder.id).await, EntityKind::Folder);
    assert_not_found(&get_folder(&peer, &reader, folder.id).await, EntityKind::Folder);
}
