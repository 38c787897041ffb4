//! Team Service
//!
//! Team creation and roster management. Membership changes publish
//! `MEMBER_*` events that keep every process's `team:{id}:members` set in
//! step; manager changes publish `MANAGER_*` events that consumers only log.

use folio_core::{
    AccessError, EntityKind, FolioResult, RosterEntry, StoreError, Team, TeamEvent, TeamId,
    TeamRole, UserId, UserRole,
};
use std::collections::BTreeSet;

use super::conflict;
use crate::auth::RequestContext;
use crate::state::AppState;
use crate::store::NewTeam;
use crate::validation::{required_name, MAX_NAME_LEN};

/// Result of adding users to a team.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberAddition {
    pub added: Vec<RosterEntry>,
    /// Requested users who were already on the roster.
    pub already_members: Vec<UserId>,
}

/// A team's roster as served to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamMembers {
    pub team: Team,
    pub members: Vec<RosterEntry>,
    pub from_cache: bool,
}

/// Create a team. The caller must hold the global `MANAGER` role and becomes
/// the team's first manager.
pub async fn create_team(
    state: &AppState,
    ctx: &RequestContext,
    team_name: &str,
    members: &[UserId],
) -> FolioResult<NewTeam> {
    ctx.require_role(UserRole::Manager)?;
    let team_name = required_name("teamName", team_name, MAX_NAME_LEN)?;

    let created = state
        .store
        .create_team(&team_name, ctx.user_id, members)
        .await?;
    let team_id = created.team.id;

    let roster: BTreeSet<UserId> = created.roster.iter().map(|entry| entry.user_id).collect();
    state.writes.populate_team(team_id, &roster).await;

    state
        .writes
        .team_event(&TeamEvent::team_created(team_id, ctx.user_id))
        .await;
    for entry in created.roster.iter().filter(|e| e.user_id != ctx.user_id) {
        state
            .writes
            .team_event(&TeamEvent::member_added(team_id, ctx.user_id, entry.user_id))
            .await;
    }

    tracing::info!(team_id, team_name = %team_name, members = created.roster.len(), "Team created");
    Ok(created)
}

/// Add users to a team as `MEMBER`. Users already on the roster are
/// reported, not re-added; at least one user must be new.
pub async fn add_team_members(
    state: &AppState,
    ctx: &RequestContext,
    team_id: TeamId,
    user_ids: &[UserId],
) -> FolioResult<MemberAddition> {
    require_team_manager(state, ctx, team_id).await?;
    if user_ids.is_empty() {
        return Err(folio_core::ValidationError::RequiredFieldMissing {
            field: "userIds".to_string(),
        }
        .into());
    }

    let added = state.store.add_team_members(team_id, user_ids).await?;
    let added_ids: BTreeSet<UserId> = added.iter().map(|e| e.user_id).collect();
    let already_members: Vec<UserId> = user_ids
        .iter()
        .copied()
        .filter(|id| !added_ids.contains(id))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    if added.is_empty() {
        return Err(conflict(
            "team_membership",
            "All requested users are already members of the team",
        ));
    }

    for entry in &added {
        state
            .writes
            .team_event(&TeamEvent::member_added(team_id, ctx.user_id, entry.user_id))
            .await;
    }

    tracing::info!(team_id, added = added.len(), skipped = already_members.len(), "Team members added");
    Ok(MemberAddition {
        added,
        already_members,
    })
}

/// Remove a user from a team. The last manager cannot remove themself.
pub async fn remove_team_member(
    state: &AppState,
    ctx: &RequestContext,
    team_id: TeamId,
    user_id: UserId,
) -> FolioResult<()> {
    let roster = require_team_manager(state, ctx, team_id).await?;

    if user_id == ctx.user_id && manager_count(&roster) == 1 {
        return Err(conflict(
            "team_manager",
            "Cannot remove yourself as the only team manager",
        ));
    }

    if !state.store.remove_team_member(team_id, user_id).await? {
        return Err(StoreError::not_found(EntityKind::RosterEntry, user_id).into());
    }

    state
        .writes
        .team_event(&TeamEvent::member_removed(team_id, ctx.user_id, user_id))
        .await;
    tracing::info!(team_id, user_id = %user_id, "Team member removed");
    Ok(())
}

/// Promote an existing member to manager.
pub async fn add_team_manager(
    state: &AppState,
    ctx: &RequestContext,
    team_id: TeamId,
    user_id: UserId,
) -> FolioResult<RosterEntry> {
    let roster = require_team_manager(state, ctx, team_id).await?;

    let entry = roster
        .iter()
        .find(|e| e.user_id == user_id)
        .ok_or_else(|| StoreError::not_found(EntityKind::RosterEntry, user_id))?;
    if entry.role.is_manager() {
        return Err(conflict("team_manager", "User is already a manager of this team"));
    }

    let updated = state
        .store
        .set_team_role(team_id, user_id, TeamRole::Manager)
        .await?
        .ok_or_else(|| StoreError::not_found(EntityKind::RosterEntry, user_id))?;

    state
        .writes
        .team_event(&TeamEvent::manager_added(team_id, ctx.user_id, user_id))
        .await;
    Ok(updated)
}

/// Demote a manager to member. The last manager cannot be demoted.
pub async fn remove_team_manager(
    state: &AppState,
    ctx: &RequestContext,
    team_id: TeamId,
    user_id: UserId,
) -> FolioResult<RosterEntry> {
    let roster = require_team_manager(state, ctx, team_id).await?;

    let is_manager = roster
        .iter()
        .any(|e| e.user_id == user_id && e.role.is_manager());
    if !is_manager {
        return Err(conflict("team_manager", "User is not a manager of this team"));
    }
    if manager_count(&roster) == 1 {
        return Err(conflict(
            "team_manager",
            "Cannot remove the only team manager",
        ));
    }

    let updated = state
        .store
        .set_team_role(team_id, user_id, TeamRole::Member)
        .await?
        .ok_or_else(|| StoreError::not_found(EntityKind::RosterEntry, user_id))?;

    state
        .writes
        .team_event(&TeamEvent::manager_removed(team_id, ctx.user_id, user_id))
        .await;
    Ok(updated)
}

/// Roster of a team. Member ids come through the membership cache; roster
/// rows are then read for those ids only.
pub async fn get_team_members(state: &AppState, team_id: TeamId) -> FolioResult<TeamMembers> {
    let team = state
        .store
        .get_team(team_id)
        .await?
        .ok_or_else(|| StoreError::not_found(EntityKind::Team, team_id))?;

    let ids = state.reads.team_members(team_id).await?;
    let from_cache = ids.was_cache_hit();
    let ids = ids.into_value();

    let members = state
        .store
        .team_roster(team_id)
        .await?
        .into_iter()
        .filter(|entry| ids.contains(&entry.user_id))
        .collect();

    Ok(TeamMembers {
        team,
        members,
        from_cache,
    })
}

/// Load the roster and check the caller manages the team.
async fn require_team_manager(
    state: &AppState,
    ctx: &RequestContext,
    team_id: TeamId,
) -> FolioResult<Vec<RosterEntry>> {
    if state.store.get_team(team_id).await?.is_none() {
        return Err(StoreError::not_found(EntityKind::Team, team_id).into());
    }
    let roster = state.store.team_roster(team_id).await?;
    let is_manager = roster
        .iter()
        .any(|e| e.user_id == ctx.user_id && e.role.is_manager());
    if !is_manager {
        return Err(AccessError::NotTeamManager { team_id }.into());
    }
    Ok(roster)
}

fn manager_count(roster: &[RosterEntry]) -> usize {
    roster.iter().filter(|e| e.role.is_manager()).count()
}

// =============================================================================
// TESTS
// =============================================================================
