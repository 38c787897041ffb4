//! FOLIO Test Utilities
//!
//! Shared test infrastructure for the FOLIO workspace:
//! - Failure-injecting doubles for the cache store, the event log and the
//!   source of truth
//! - Proptest generators for access levels, membership and share operations
//! - Fixtures for common scenarios
//! - Assertions for FOLIO error variants

pub use folio_api::{AppState, InMemoryStore, RequestContext, SourceOfTruth};
pub use folio_cache::{CacheClient, CacheConfig, CacheStore, InMemoryCacheStore};
pub use folio_core::{
    AccessError, AccessLevel, AssetId, AssetKind, EntityKind, FolioError, FolioResult, StoreError,
    TeamId, UserId,
};
pub use folio_events::{EventLog, InMemoryEventLog};

use async_trait::async_trait;
use folio_api::{FolderDeletion, NewTeam, NoteChanges};
use folio_cache::{CacheKey, CacheStats};
use folio_core::{
    CacheError, EventLogError, Folder, Note, RosterEntry, Share, Team, TeamRole, Topic,
};
use folio_events::{LogPosition, LogRecord};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// FAILING CACHE STORE
// ============================================================================

/// Cache store that reports `Unavailable` on every call while failing, and
/// behaves like [`InMemoryCacheStore`] otherwise.
#[derive(Clone)]
pub struct FailingCacheStore {
    inner: InMemoryCacheStore,
    failing: Arc<AtomicBool>,
    rejected: Arc<AtomicU64>,
}

impl FailingCacheStore {
    /// Starts out failing.
    pub fn new() -> Self {
        Self {
            inner: InMemoryCacheStore::new(),
            failing: Arc::new(AtomicBool::new(true)),
            rejected: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Calls rejected so far.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &InMemoryCacheStore {
        &self.inner
    }

    fn check(&self) -> FolioResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(CacheError::Unavailable {
                reason: "injected cache outage".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

impl Default for FailingCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for FailingCacheStore {
    async fn get(&self, key: &CacheKey) -> FolioResult<Option<Vec<u8>>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> FolioResult<()> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &CacheKey) -> FolioResult<bool> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn set_add(&self, key: &CacheKey, members: &[String], ttl: Duration) -> FolioResult<()> {
        self.check()?;
        self.inner.set_add(key, members, ttl).await
    }

    async fn set_add_if_present(
        &self,
        key: &CacheKey,
        member: &str,
        ttl: Duration,
    ) -> FolioResult<bool> {
        self.check()?;
        self.inner.set_add_if_present(key, member, ttl).await
    }

    async fn set_remove(&self, key: &CacheKey, member: &str) -> FolioResult<()> {
        self.check()?;
        self.inner.set_remove(key, member).await
    }

    async fn set_members(&self, key: &CacheKey) -> FolioResult<Option<Vec<String>>> {
        self.check()?;
        self.inner.set_members(key).await
    }

    async fn set_replace(
        &self,
        key: &CacheKey,
        members: &[String],
        ttl: Duration,
    ) -> FolioResult<()> {
        self.check()?;
        self.inner.set_replace(key, members, ttl).await
    }

    async fn map_upsert(
        &self,
        key: &CacheKey,
        field: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> FolioResult<()> {
        self.check()?;
        self.inner.map_upsert(key, field, value, ttl).await
    }

    async fn map_remove(&self, key: &CacheKey, field: &str) -> FolioResult<()> {
        self.check()?;
        self.inner.map_remove(key, field).await
    }

    async fn map_get(&self, key: &CacheKey, field: &str) -> FolioResult<Option<String>> {
        self.check()?;
        self.inner.map_get(key, field).await
    }

    async fn map_get_all(&self, key: &CacheKey) -> FolioResult<Option<BTreeMap<String, String>>> {
        self.check()?;
        self.inner.map_get_all(key).await
    }

    async fn stats(&self) -> FolioResult<CacheStats> {
        let mut stats = self.inner.stats().await?;
        stats.errors += self.rejected();
        Ok(stats)
    }
}

// ============================================================================
// FAILING EVENT LOG
// ============================================================================

/// Event log whose appends fail while failing. Reads and commits always go
/// to the wrapped [`InMemoryEventLog`].
#[derive(Clone)]
pub struct FailingEventLog {
    inner: Arc<InMemoryEventLog>,
    failing: Arc<AtomicBool>,
}

impl FailingEventLog {
    /// Starts out failing.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(InMemoryEventLog::new()),
            failing: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &Arc<InMemoryEventLog> {
        &self.inner
    }
}

impl Default for FailingEventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventLog for FailingEventLog {
    fn partition_count(&self) -> u32 {
        self.inner.partition_count()
    }

    async fn append(&self, topic: Topic, key: &str, payload: Vec<u8>) -> FolioResult<LogPosition> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EventLogError::Backend {
                reason: "injected broker outage".to_string(),
            }
            .into());
        }
        self.inner.append(topic, key, payload).await
    }

    async fn read(
        &self,
        topic: Topic,
        partition: u32,
        from_offset: u64,
        max: usize,
    ) -> FolioResult<Vec<LogRecord>> {
        self.inner.read(topic, partition, from_offset, max).await
    }

    async fn end_offset(&self, topic: Topic, partition: u32) -> FolioResult<u64> {
        self.inner.end_offset(topic, partition).await
    }

    async fn start_offset(&self, topic: Topic, partition: u32) -> FolioResult<u64> {
        self.inner.start_offset(topic, partition).await
    }

    async fn truncate_before(&self, topic: Topic, partition: u32, before: u64) -> FolioResult<u64> {
        self.inner.truncate_before(topic, partition, before).await
    }

    async fn min_committed_offset(&self, topic: Topic, partition: u32) -> FolioResult<Option<u64>> {
        self.inner.min_committed_offset(topic, partition).await
    }

    async fn committed_offset(
        &self,
        group: &str,
        topic: Topic,
        partition: u32,
    ) -> FolioResult<Option<u64>> {
        self.inner.committed_offset(group, topic, partition).await
    }

    async fn commit(
        &self,
        group: &str,
        topic: Topic,
        partition: u32,
        next_offset: u64,
    ) -> FolioResult<()> {
        self.inner.commit(group, topic, partition, next_offset).await
    }
}

// ============================================================================
// FLAKY STORE
// ============================================================================

/// Source of truth whose reads fail while failing. Mutations always go to
/// the wrapped [`InMemoryStore`], so tests can seed data and then cut reads.
#[derive(Clone, Default)]
pub struct FlakyStore {
    inner: InMemoryStore,
    failing_reads: Arc<AtomicBool>,
}

impl FlakyStore {
    /// Starts out healthy.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing_reads(&self, failing: bool) {
        self.failing_reads.store(failing, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    fn check_read(&self) -> FolioResult<()> {
        if self.failing_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Pool {
                reason: "injected database outage".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl SourceOfTruth for FlakyStore {
    async fn create_team(
        &self,
        team_name: &str,
        creator: UserId,
        members: &[UserId],
    ) -> FolioResult<NewTeam> {
        self.inner.create_team(team_name, creator, members).await
    }

    async fn get_team(&self, team_id: TeamId) -> FolioResult<Option<Team>> {
        self.check_read()?;
        self.inner.get_team(team_id).await
    }

    async fn team_roster(&self, team_id: TeamId) -> FolioResult<Vec<RosterEntry>> {
        self.check_read()?;
        self.inner.team_roster(team_id).await
    }

    async fn roster_entry(
        &self,
        team_id: TeamId,
        user_id: UserId,
    ) -> FolioResult<Option<RosterEntry>> {
        self.check_read()?;
        self.inner.roster_entry(team_id, user_id).await
    }

    async fn add_team_members(
        &self,
        team_id: TeamId,
        user_ids: &[UserId],
    ) -> FolioResult<Vec<RosterEntry>> {
        self.inner.add_team_members(team_id, user_ids).await
    }

    async fn remove_team_member(&self, team_id: TeamId, user_id: UserId) -> FolioResult<bool> {
        self.inner.remove_team_member(team_id, user_id).await
    }

    async fn set_team_role(
        &self,
        team_id: TeamId,
        user_id: UserId,
        role: TeamRole,
    ) -> FolioResult<Option<RosterEntry>> {
        self.inner.set_team_role(team_id, user_id, role).await
    }

    async fn insert_folder(&self, folder: &Folder) -> FolioResult<()> {
        self.inner.insert_folder(folder).await
    }

    async fn get_folder(&self, folder_id: AssetId) -> FolioResult<Option<Folder>> {
        self.check_read()?;
        self.inner.get_folder(folder_id).await
    }

    async fn rename_folder(
        &self,
        folder_id: AssetId,
        folder_name: &str,
    ) -> FolioResult<Option<Folder>> {
        self.inner.rename_folder(folder_id, folder_name).await
    }

    async fn delete_folder_cascade(
        &self,
        folder_id: AssetId,
    ) -> FolioResult<Option<FolderDeletion>> {
        self.inner.delete_folder_cascade(folder_id).await
    }

    async fn folders_owned_by(&self, owner_id: UserId) -> FolioResult<Vec<Folder>> {
        self.check_read()?;
        self.inner.folders_owned_by(owner_id).await
    }

    async fn insert_note(&self, note: &Note) -> FolioResult<()> {
        self.inner.insert_note(note).await
    }

    async fn get_note(&self, note_id: AssetId) -> FolioResult<Option<Note>> {
        self.check_read()?;
        self.inner.get_note(note_id).await
    }

    async fn update_note(
        &self,
        note_id: AssetId,
        changes: &NoteChanges,
    ) -> FolioResult<Option<Note>> {
        self.inner.update_note(note_id, changes).await
    }

    async fn delete_note(&self, note_id: AssetId) -> FolioResult<Option<Note>> {
        self.inner.delete_note(note_id).await
    }

    async fn notes_in_folder(&self, folder_id: AssetId) -> FolioResult<Vec<Note>> {
        self.check_read()?;
        self.inner.notes_in_folder(folder_id).await
    }

    async fn upsert_share(
        &self,
        kind: AssetKind,
        asset_id: AssetId,
        user_id: UserId,
        level: AccessLevel,
        shared_by: UserId,
    ) -> FolioResult<Share> {
        self.inner
            .upsert_share(kind, asset_id, user_id, level, shared_by)
            .await
    }

    async fn remove_share(
        &self,
        kind: AssetKind,
        asset_id: AssetId,
        user_id: UserId,
    ) -> FolioResult<bool> {
        self.inner.remove_share(kind, asset_id, user_id).await
    }

    async fn find_share(
        &self,
        kind: AssetKind,
        asset_id: AssetId,
        user_id: UserId,
    ) -> FolioResult<Option<Share>> {
        self.check_read()?;
        self.inner.find_share(kind, asset_id, user_id).await
    }

    async fn shares_for(&self, kind: AssetKind, asset_id: AssetId) -> FolioResult<Vec<Share>> {
        self.check_read()?;
        self.inner.shares_for(kind, asset_id).await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for FOLIO values.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_access_level() -> impl Strategy<Value = AccessLevel> {
        prop_oneof![Just(AccessLevel::Read), Just(AccessLevel::Write)]
    }

    /// One roster change for a user drawn from a fixed pool.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum MembershipOp {
        Add(usize),
        Remove(usize),
    }

    /// A sequence of roster changes over `pool` users.
    pub fn arb_membership_ops(pool: usize, max_len: usize) -> impl Strategy<Value = Vec<MembershipOp>> {
        let op = prop_oneof![
            3 => (0..pool).prop_map(MembershipOp::Add),
            1 => (0..pool).prop_map(MembershipOp::Remove),
        ];
        proptest::collection::vec(op, 1..=max_len)
    }

    /// One share change for a user drawn from a fixed pool.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ShareOp {
        Share(usize, AccessLevel),
        Unshare(usize),
    }

    /// A sequence of share changes on one asset over `pool` users.
    pub fn arb_share_ops(pool: usize, max_len: usize) -> impl Strategy<Value = Vec<ShareOp>> {
        let op = prop_oneof![
            3 => (0..pool, arb_access_level()).prop_map(|(u, l)| ShareOp::Share(u, l)),
            1 => (0..pool).prop_map(ShareOp::Unshare),
        ];
        proptest::collection::vec(op, 1..=max_len)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built state for common testing scenarios.

    use super::*;

    /// A fully in-memory stack that exposes its parts.
    pub struct TestStack {
        pub state: AppState,
        pub store: Arc<InMemoryStore>,
        pub cache_store: Arc<InMemoryCacheStore>,
        pub log: Arc<InMemoryEventLog>,
    }

    /// In-memory store, cache and log with default TTLs.
    pub fn test_stack() -> TestStack {
        test_stack_with(CacheConfig::default())
    }

    pub fn test_stack_with(cache_config: CacheConfig) -> TestStack {
        let store = Arc::new(InMemoryStore::new());
        let cache_store = Arc::new(InMemoryCacheStore::new());
        let log = Arc::new(InMemoryEventLog::new());
        let state = AppState::new(
            store.clone(),
            cache_store.clone(),
            log.clone(),
            cache_config,
        );
        TestStack {
            state,
            store,
            cache_store,
            log,
        }
    }

    /// A second process: same store and log, its own empty cache.
    pub fn peer_state(stack: &TestStack) -> (AppState, Arc<InMemoryCacheStore>) {
        let cache_store = Arc::new(InMemoryCacheStore::new());
        let state = AppState::new(
            stack.store.clone(),
            cache_store.clone(),
            stack.log.clone(),
            stack.state.cache().config().clone(),
        );
        (state, cache_store)
    }

    pub fn manager() -> RequestContext {
        RequestContext::manager(uuid::Uuid::now_v7())
    }

    pub fn member() -> RequestContext {
        RequestContext::member(uuid::Uuid::now_v7())
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for FOLIO error variants.

    use super::*;

    /// Assert that a FolioResult is a NotFound store error for `entity`.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &FolioResult<T>, entity: EntityKind) {
        match result {
            Err(FolioError::Store(StoreError::NotFound { entity: e, .. })) => {
                assert_eq!(*e, entity, "Wrong entity in NotFound error");
            }
            other => panic!("Expected NotFound error for {}, got: {:?}", entity, other),
        }
    }

    /// Assert that a FolioResult is an access error.
    #[track_caller]
    pub fn assert_denied<T: std::fmt::Debug>(result: &FolioResult<T>) {
        match result {
            Err(FolioError::Access(_)) => {}
            other => panic!("Expected Access error, got: {:?}", other),
        }
    }
}
