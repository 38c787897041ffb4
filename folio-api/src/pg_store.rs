//! PostgreSQL source-of-truth store.
//!
//! Plain SQL over a deadpool-postgres pool. Multi-statement operations run in
//! an explicit transaction. The DDL lives in `sql/schema.sql`.

use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use folio_core::{
    AccessLevel, AssetId, AssetKind, EntityKind, Folder, FolioResult, Note, RosterEntry, Share,
    StoreError, Team, TeamId, TeamRole, UserId,
};
use std::time::Duration;
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

use crate::store::{FolderDeletion, NewTeam, NoteChanges, SourceOfTruth};

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Wait for a pooled connection
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "folio".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `FOLIO_DB_HOST` (default: localhost)
    /// - `FOLIO_DB_PORT` (default: 5432)
    /// - `FOLIO_DB_NAME` (default: folio)
    /// - `FOLIO_DB_USER` (default: postgres)
    /// - `FOLIO_DB_PASSWORD` (default: empty)
    /// - `FOLIO_DB_POOL_SIZE` (default: 16)
    /// - `FOLIO_DB_TIMEOUT` in seconds (default: 30)
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("FOLIO_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("FOLIO_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5432),
            dbname: std::env::var("FOLIO_DB_NAME").unwrap_or_else(|_| "folio".to_string()),
            user: std::env::var("FOLIO_DB_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: std::env::var("FOLIO_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("FOLIO_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(16),
            timeout: Duration::from_secs(
                std::env::var("FOLIO_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> FolioResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_cfg = deadpool_postgres::PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_cfg);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::Pool {
                reason: format!("Failed to create pool: {}", e),
            })?;

        Ok(pool)
    }
}

// ============================================================================
// ERROR AND ROW MAPPING
// ============================================================================

fn query_failed(e: tokio_postgres::Error) -> StoreError {
    StoreError::QueryFailed {
        reason: e.to_string(),
    }
}

fn tx_failed(e: tokio_postgres::Error) -> StoreError {
    StoreError::TransactionFailed {
        reason: e.to_string(),
    }
}

fn is_unique_violation(e: &tokio_postgres::Error) -> bool {
    e.code() == Some(&SqlState::UNIQUE_VIOLATION)
}

fn column<'a, T: tokio_postgres::types::FromSql<'a>>(row: &'a Row, name: &str) -> Result<T, StoreError> {
    row.try_get(name).map_err(query_failed)
}

fn team_from_row(row: &Row) -> Result<Team, StoreError> {
    Ok(Team {
        id: column(row, "team_id")?,
        team_name: column(row, "team_name")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn roster_from_row(row: &Row) -> Result<RosterEntry, StoreError> {
    let role: String = column(row, "role")?;
    Ok(RosterEntry {
        team_id: column(row, "team_id")?,
        user_id: column(row, "user_id")?,
        role: role.parse::<TeamRole>().map_err(|e| StoreError::QueryFailed {
            reason: e.to_string(),
        })?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn folder_from_row(row: &Row) -> Result<Folder, StoreError> {
    Ok(Folder {
        id: column(row, "folder_id")?,
        folder_name: column(row, "folder_name")?,
        owner_id: column(row, "owner_id")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn note_from_row(row: &Row) -> Result<Note, StoreError> {
    Ok(Note {
        id: column(row, "note_id")?,
        title: column(row, "title")?,
        content: column(row, "content")?,
        owner_id: column(row, "owner_id")?,
        folder_id: column(row, "folder_id")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn share_from_row(kind: AssetKind, row: &Row) -> Result<Share, StoreError> {
    let level: String = column(row, "access_level")?;
    Ok(Share {
        id: column(row, "share_id")?,
        asset_kind: kind,
        asset_id: column(row, "asset_id")?,
        user_id: column(row, "user_id")?,
        access_level: level.parse::<AccessLevel>().map_err(|e| StoreError::QueryFailed {
            reason: e.to_string(),
        })?,
        shared_by: column(row, "shared_by")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

/// Share table and its asset column.
fn share_table(kind: AssetKind) -> (&'static str, &'static str) {
    match kind {
        AssetKind::Folder => ("folder_shares", "folder_id"),
        AssetKind::Note => ("note_shares", "note_id"),
    }
}

const TEAM_COLUMNS: &str = "team_id, team_name, created_at, updated_at";
const ROSTER_COLUMNS: &str = "team_id, user_id, role, created_at, updated_at";
const FOLDER_COLUMNS: &str = "folder_id, folder_name, owner_id, created_at, updated_at";
const NOTE_COLUMNS: &str = "note_id, title, content, owner_id, folder_id, created_at, updated_at";

// ============================================================================
// STORE
// ============================================================================

/// Source of truth backed by PostgreSQL.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &DbConfig) -> FolioResult<Self> {
        Ok(Self::new(config.create_pool()?))
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn client(&self) -> Result<deadpool_postgres::Object, StoreError> {
        self.pool.get().await.map_err(|e| StoreError::Pool {
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl SourceOfTruth for PgStore {
    async fn create_team(
        &self,
        team_name: &str,
        creator: UserId,
        members: &[UserId],
    ) -> FolioResult<NewTeam> {
        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(tx_failed)?;
        let now = Utc::now();

        let row = tx
            .query_one(
                &format!(
                    "INSERT INTO teams (team_name, created_at, updated_at) VALUES ($1, $2, $2) RETURNING {}",
                    TEAM_COLUMNS
                ),
                &[&team_name, &now],
            )
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::AlreadyExists {
                        entity: EntityKind::Team,
                        id: team_name.to_string(),
                    }
                } else {
                    query_failed(e)
                }
            })?;
        let team = team_from_row(&row)?;

        let insert = format!(
            "INSERT INTO rosters (team_id, user_id, role, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $4) ON CONFLICT (team_id, user_id) DO NOTHING \
             RETURNING {}",
            ROSTER_COLUMNS
        );
        let mut roster = Vec::new();
        let entries = std::iter::once((creator, TeamRole::Manager))
            .chain(members.iter().map(|m| (*m, TeamRole::Member)));
        for (user_id, role) in entries {
            if let Some(row) = tx
                .query_opt(&insert, &[&team.id, &user_id, &role.as_db_str(), &now])
                .await
                .map_err(query_failed)?
            {
                roster.push(roster_from_row(&row)?);
            }
        }

        tx.commit().await.map_err(tx_failed)?;
        Ok(NewTeam { team, roster })
    }

    async fn get_team(&self, team_id: TeamId) -> FolioResult<Option<Team>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                &format!("SELECT {} FROM teams WHERE team_id = $1", TEAM_COLUMNS),
                &[&team_id],
            )
            .await
            .map_err(query_failed)?;
        Ok(row.as_ref().map(team_from_row).transpose()?)
    }

    async fn team_roster(&self, team_id: TeamId) -> FolioResult<Vec<RosterEntry>> {
        let client = self.client().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM rosters WHERE team_id = $1 ORDER BY user_id",
                    ROSTER_COLUMNS
                ),
                &[&team_id],
            )
            .await
            .map_err(query_failed)?;
        Ok(rows.iter().map(roster_from_row).collect::<Result<_, _>>()?)
    }

    async fn roster_entry(
        &self,
        team_id: TeamId,
        user_id: UserId,
    ) -> FolioResult<Option<RosterEntry>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {} FROM rosters WHERE team_id = $1 AND user_id = $2",
                    ROSTER_COLUMNS
                ),
                &[&team_id, &user_id],
            )
            .await
            .map_err(query_failed)?;
        Ok(row.as_ref().map(roster_from_row).transpose()?)
    }

    async fn add_team_members(
        &self,
        team_id: TeamId,
        user_ids: &[UserId],
    ) -> FolioResult<Vec<RosterEntry>> {
        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(tx_failed)?;

        let exists = tx
            .query_opt("SELECT 1 FROM teams WHERE team_id = $1", &[&team_id])
            .await
            .map_err(query_failed)?;
        if exists.is_none() {
            return Err(StoreError::not_found(EntityKind::Team, team_id).into());
        }

        let insert = format!(
            "INSERT INTO rosters (team_id, user_id, role, created_at, updated_at) \
             VALUES ($1, $2, 'MEMBER', $3, $3) ON CONFLICT (team_id, user_id) DO NOTHING \
             RETURNING {}",
            ROSTER_COLUMNS
        );
        let now = Utc::now();
        let mut added = Vec::new();
        for user_id in user_ids {
            if let Some(row) = tx
                .query_opt(&insert, &[&team_id, user_id, &now])
                .await
                .map_err(query_failed)?
            {
                added.push(roster_from_row(&row)?);
            }
        }

        tx.commit().await.map_err(tx_failed)?;
        Ok(added)
    }

    async fn remove_team_member(&self, team_id: TeamId, user_id: UserId) -> FolioResult<bool> {
        let client = self.client().await?;
        let removed = client
            .execute(
                "DELETE FROM rosters WHERE team_id = $1 AND user_id = $2",
                &[&team_id, &user_id],
            )
            .await
            .map_err(query_failed)?;
        Ok(removed > 0)
    }

    async fn set_team_role(
        &self,
        team_id: TeamId,
        user_id: UserId,
        role: TeamRole,
    ) -> FolioResult<Option<RosterEntry>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                &format!(
                    "UPDATE rosters SET role = $3, updated_at = now() \
                     WHERE team_id = $1 AND user_id = $2 RETURNING {}",
                    ROSTER_COLUMNS
                ),
                &[&team_id, &user_id, &role.as_db_str()],
            )
            .await
            .map_err(query_failed)?;
        Ok(row.as_ref().map(roster_from_row).transpose()?)
    }

    async fn insert_folder(&self, folder: &Folder) -> FolioResult<()> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO folders (folder_id, folder_name, owner_id, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5)",
                &[
                    &folder.id,
                    &folder.folder_name,
                    &folder.owner_id,
                    &folder.created_at,
                    &folder.updated_at,
                ],
            )
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::AlreadyExists {
                        entity: EntityKind::Folder,
                        id: folder.id.to_string(),
                    }
                } else {
                    query_failed(e)
                }
            })?;
        Ok(())
    }

    async fn get_folder(&self, folder_id: AssetId) -> FolioResult<Option<Folder>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                &format!("SELECT {} FROM folders WHERE folder_id = $1", FOLDER_COLUMNS),
                &[&folder_id],
            )
            .await
            .map_err(query_failed)?;
        Ok(row.as_ref().map(folder_from_row).transpose()?)
    }

    async fn rename_folder(
        &self,
        folder_id: AssetId,
        folder_name: &str,
    ) -> FolioResult<Option<Folder>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                &format!(
                    "UPDATE folders SET folder_name = $2, updated_at = now() \
                     WHERE folder_id = $1 RETURNING {}",
                    FOLDER_COLUMNS
                ),
                &[&folder_id, &folder_name],
            )
            .await
            .map_err(query_failed)?;
        Ok(row.as_ref().map(folder_from_row).transpose()?)
    }

    async fn delete_folder_cascade(
        &self,
        folder_id: AssetId,
    ) -> FolioResult<Option<FolderDeletion>> {
        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(tx_failed)?;

        let note_shares = tx
            .execute(
                "DELETE FROM note_shares WHERE note_id IN (SELECT note_id FROM notes WHERE folder_id = $1)",
                &[&folder_id],
            )
            .await
            .map_err(query_failed)?;
        let folder_shares = tx
            .execute("DELETE FROM folder_shares WHERE folder_id = $1", &[&folder_id])
            .await
            .map_err(query_failed)?;
        let note_rows = tx
            .query(
                &format!(
                    "DELETE FROM notes WHERE folder_id = $1 RETURNING {}",
                    NOTE_COLUMNS
                ),
                &[&folder_id],
            )
            .await
            .map_err(query_failed)?;
        let folder_row = tx
            .query_opt(
                &format!(
                    "DELETE FROM folders WHERE folder_id = $1 RETURNING {}",
                    FOLDER_COLUMNS
                ),
                &[&folder_id],
            )
            .await
            .map_err(query_failed)?;

        let Some(folder_row) = folder_row else {
            tx.rollback().await.map_err(tx_failed)?;
            return Ok(None);
        };
        let folder = folder_from_row(&folder_row)?;
        let mut notes = note_rows
            .iter()
            .map(note_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        notes.sort_by_key(|n| n.id);

        tx.commit().await.map_err(tx_failed)?;
        Ok(Some(FolderDeletion {
            folder,
            notes,
            shares_removed: (note_shares + folder_shares) as usize,
        }))
    }

    async fn folders_owned_by(&self, owner_id: UserId) -> FolioResult<Vec<Folder>> {
        let client = self.client().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM folders WHERE owner_id = $1 ORDER BY folder_id",
                    FOLDER_COLUMNS
                ),
                &[&owner_id],
            )
            .await
            .map_err(query_failed)?;
        Ok(rows.iter().map(folder_from_row).collect::<Result<_, _>>()?)
    }

    async fn insert_note(&self, note: &Note) -> FolioResult<()> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO notes (note_id, title, content, owner_id, folder_id, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
                &[
                    &note.id,
                    &note.title,
                    &note.content,
                    &note.owner_id,
                    &note.folder_id,
                    &note.created_at,
                    &note.updated_at,
                ],
            )
            .await
            .map_err(|e| match e.code().cloned() {
                Some(code) if code == SqlState::FOREIGN_KEY_VIOLATION => {
                    StoreError::not_found(EntityKind::Folder, note.folder_id)
                }
                Some(code) if code == SqlState::UNIQUE_VIOLATION => StoreError::AlreadyExists {
                    entity: EntityKind::Note,
                    id: note.id.to_string(),
                },
                _ => query_failed(e),
            })?;
        Ok(())
    }

    async fn get_note(&self, note_id: AssetId) -> FolioResult<Option<Note>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                &format!("SELECT {} FROM notes WHERE note_id = $1", NOTE_COLUMNS),
                &[&note_id],
            )
            .await
            .map_err(query_failed)?;
        Ok(row.as_ref().map(note_from_row).transpose()?)
    }

    async fn update_note(
        &self,
        note_id: AssetId,
        changes: &NoteChanges,
    ) -> FolioResult<Option<Note>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                &format!(
                    "UPDATE notes SET title = COALESCE($2, title), content = COALESCE($3, content), \
                     updated_at = now() WHERE note_id = $1 RETURNING {}",
                    NOTE_COLUMNS
                ),
                &[&note_id, &changes.title, &changes.content],
            )
            .await
            .map_err(query_failed)?;
        Ok(row.as_ref().map(note_from_row).transpose()?)
    }

    async fn delete_note(&self, note_id: AssetId) -> FolioResult<Option<Note>> {
        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(tx_failed)?;

        tx.execute("DELETE FROM note_shares WHERE note_id = $1", &[&note_id])
            .await
            .map_err(query_failed)?;
        let row = tx
            .query_opt(
                &format!("DELETE FROM notes WHERE note_id = $1 RETURNING {}", NOTE_COLUMNS),
                &[&note_id],
            )
            .await
            .map_err(query_failed)?;
        let note = row.as_ref().map(note_from_row).transpose()?;

        tx.commit().await.map_err(tx_failed)?;
        Ok(note)
    }

    async fn notes_in_folder(&self, folder_id: AssetId) -> FolioResult<Vec<Note>> {
        let client = self.client().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM notes WHERE folder_id = $1 ORDER BY note_id",
                    NOTE_COLUMNS
                ),
                &[&folder_id],
            )
            .await
            .map_err(query_failed)?;
        Ok(rows.iter().map(note_from_row).collect::<Result<_, _>>()?)
    }

    async fn upsert_share(
        &self,
        kind: AssetKind,
        asset_id: AssetId,
        user_id: UserId,
        level: AccessLevel,
        shared_by: UserId,
    ) -> FolioResult<Share> {
        let (table, asset_column) = share_table(kind);
        let client = self.client().await?;
        let row = client
            .query_one(
                &format!(
                    "INSERT INTO {table} (share_id, {col}, user_id, access_level, shared_by, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, now(), now()) \
                     ON CONFLICT ({col}, user_id) DO UPDATE \
                     SET access_level = EXCLUDED.access_level, shared_by = EXCLUDED.shared_by, updated_at = now() \
                     RETURNING share_id, {col} AS asset_id, user_id, access_level, shared_by, created_at, updated_at",
                    table = table,
                    col = asset_column
                ),
                &[&Uuid::new_v4(), &asset_id, &user_id, &level.as_str(), &shared_by],
            )
            .await
            .map_err(|e| {
                if e.code() == Some(&SqlState::FOREIGN_KEY_VIOLATION) {
                    StoreError::not_found(kind, asset_id)
                } else {
                    query_failed(e)
                }
            })?;
        Ok(share_from_row(kind, &row)?)
    }

    async fn remove_share(
        &self,
        kind: AssetKind,
        asset_id: AssetId,
        user_id: UserId,
    ) -> FolioResult<bool> {
        let (table, asset_column) = share_table(kind);
        let client = self.client().await?;
        let removed = client
            .execute(
                &format!(
                    "DELETE FROM {} WHERE {} = $1 AND user_id = $2",
                    table, asset_column
                ),
                &[&asset_id, &user_id],
            )
            .await
            .map_err(query_failed)?;
        Ok(removed > 0)
    }

    async fn find_share(
        &self,
        kind: AssetKind,
        asset_id: AssetId,
        user_id: UserId,
    ) -> FolioResult<Option<Share>> {
        let (table, asset_column) = share_table(kind);
        let client = self.client().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT share_id, {col} AS asset_id, user_id, access_level, shared_by, created_at, updated_at \
                     FROM {table} WHERE {col} = $1 AND user_id = $2",
                    table = table,
                    col = asset_column
                ),
                &[&asset_id, &user_id],
            )
            .await
            .map_err(query_failed)?;
        Ok(row.as_ref().map(|r| share_from_row(kind, r)).transpose()?)
    }

    async fn shares_for(&self, kind: AssetKind, asset_id: AssetId) -> FolioResult<Vec<Share>> {
        let (table, asset_column) = share_table(kind);
        let client = self.client().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT share_id, {col} AS asset_id, user_id, access_level, shared_by, created_at, updated_at \
                     FROM {table} WHERE {col} = $1 ORDER BY user_id",
                    table = table,
                    col = asset_column
                ),
                &[&asset_id],
            )
            .await
            .map_err(query_failed)?;
        Ok(rows
            .iter()
            .map(|r| share_from_row(kind, r))
            .collect::<Result<_, _>>()?)
    }
}

// ============================================================================
// TESTS
// ============================================================================
