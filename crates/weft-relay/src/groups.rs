//! Group lifecycle: create, invite, accept, decline, leave, remove,
//! dissolve, transfer, settings.
//!
//! Every state-changing operation appends to the group's ordered change log
//! so clients can reconcile membership from `/groups/{id}/changes`.

use rusqlite::Connection;

use weft_db::queries::{agents, groups};
use weft_types::{
    AgentStatus, GroupRole, GroupStatus, MembershipStatus, DEFAULT_MAX_GROUP_MEMBERS,
};

use crate::error::ApiError;

/// Group creation body.
#[derive(Clone, Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(default)]
    pub members_can_invite: Option<bool>,
    #[serde(default)]
    pub members_can_send: Option<bool>,
    #[serde(default)]
    pub max_members: Option<i64>,
}

/// Settings update body (owner only). Absent fields keep their value.
#[derive(Clone, Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettingsRequest {
    #[serde(default)]
    pub members_can_invite: Option<bool>,
    #[serde(default)]
    pub members_can_send: Option<bool>,
    #[serde(default)]
    pub max_members: Option<i64>,
}

/// API view of a group.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupView {
    pub group_id: String,
    pub name: String,
    pub owner: String,
    pub status: String,
    pub members_can_invite: bool,
    pub members_can_send: bool,
    pub max_members: i64,
    pub created_at: i64,
}

/// API view of a membership.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    pub agent: String,
    pub role: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invited_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub joined_at: Option<i64>,
}

fn group_view(row: groups::GroupRow) -> GroupView {
    GroupView {
        group_id: row.id,
        name: row.name,
        owner: row.owner,
        status: row.status,
        members_can_invite: row.members_can_invite,
        members_can_send: row.members_can_send,
        max_members: row.max_members,
        created_at: row.created_at,
    }
}

/// Load a group that must still be active.
fn active_group(tx: &Connection, id: &str) -> Result<groups::GroupRow, ApiError> {
    let group = groups::find(tx, id)?
        .ok_or_else(|| ApiError::not_found("Group not found"))?;
    if group.status != GroupStatus::Active.as_str() {
        return Err(ApiError::gone("Group has been dissolved"));
    }
    Ok(group)
}

/// Load the caller's membership row in any status.
fn membership(tx: &Connection, group_id: &str, agent: &str) -> Result<groups::MemberRow, ApiError> {
    groups::find_member(tx, group_id, agent)?
        .ok_or_else(|| ApiError::not_found("Not a member of this group"))
}

fn is_active_with_role(member: &groups::MemberRow, role: GroupRole) -> bool {
    member.status == MembershipStatus::Active.as_str() && member.role == role.as_str()
}

/// Create a group; the creator becomes its active owner.
pub fn create(
    conn: &mut Connection,
    owner: &str,
    req: &CreateGroupRequest,
    now: i64,
) -> Result<GroupView, ApiError> {
    if req.name.is_empty() || req.name.len() > 128 {
        return Err(ApiError::bad_request("Group name must be 1-128 characters"));
    }
    let max_members = req.max_members.unwrap_or(DEFAULT_MAX_GROUP_MEMBERS);
    if max_members < 1 {
        return Err(ApiError::bad_request("maxMembers must be positive"));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let tx = conn.transaction().map_err(weft_db::DbError::Sqlite)?;
    groups::create(
        &tx,
        &id,
        &req.name,
        owner,
        req.members_can_invite.unwrap_or(false),
        req.members_can_send.unwrap_or(true),
        max_members,
        now,
    )?;
    groups::append_change(&tx, &id, "created", owner, None, now)?;
    let view = groups::find(&tx, &id)?
        .map(group_view)
        .ok_or_else(|| ApiError::internal("Group vanished after insert"))?;
    tx.commit().map_err(weft_db::DbError::Sqlite)?;
    tracing::info!(group = %view.group_id, owner, "group created");
    Ok(view)
}

/// Invite an agent. Owners and admins may always invite; plain members only
/// when the group permits it.
pub fn invite(
    conn: &mut Connection,
    group_id: &str,
    inviter: &str,
    invitee: &str,
    now: i64,
) -> Result<(), ApiError> {
    let tx = conn.transaction().map_err(weft_db::DbError::Sqlite)?;
    let group = active_group(&tx, group_id)?;

    let actor = membership(&tx, group_id, inviter)?;
    if actor.status != MembershipStatus::Active.as_str() {
        return Err(ApiError::forbidden("Not an active member of this group"));
    }
    let may_invite = actor.role != GroupRole::Member.as_str() || group.members_can_invite;
    if !may_invite {
        return Err(ApiError::forbidden("Members may not invite in this group"));
    }

    let target = agents::find(&tx, invitee)?
        .ok_or_else(|| ApiError::not_found("Agent not found"))?;
    if target.status != AgentStatus::Active.as_str() {
        return Err(ApiError::forbidden("Agent is not active"));
    }

    if let Some(existing) = groups::find_member(&tx, group_id, invitee)? {
        if existing.status == MembershipStatus::Active.as_str()
            || existing.status == MembershipStatus::Pending.as_str()
        {
            return Err(ApiError::conflict("Agent is already invited or a member"));
        }
    }

    groups::upsert_invitation(&tx, group_id, invitee, inviter)?;
    groups::append_change(&tx, group_id, "invited", inviter, Some(invitee), now)?;
    tx.commit().map_err(weft_db::DbError::Sqlite)?;
    tracing::info!(group = group_id, inviter, invitee, "invitation issued");
    Ok(())
}

/// Accept an invitation; enforces the member cap and stamps `joined_at`.
pub fn accept(conn: &mut Connection, group_id: &str, agent: &str, now: i64) -> Result<(), ApiError> {
    let tx = conn.transaction().map_err(weft_db::DbError::Sqlite)?;
    let group = active_group(&tx, group_id)?;

    let member = membership(&tx, group_id, agent)?;
    if member.status != MembershipStatus::Pending.as_str() {
        return Err(ApiError::not_found("No pending invitation"));
    }
    if groups::count_active_members(&tx, group_id)? >= group.max_members {
        return Err(ApiError::conflict("Group is full"));
    }

    groups::activate_member(&tx, group_id, agent, now)?;
    groups::append_change(&tx, group_id, "joined", agent, None, now)?;
    tx.commit().map_err(weft_db::DbError::Sqlite)?;
    Ok(())
}

/// Decline an invitation.
pub fn decline(conn: &mut Connection, group_id: &str, agent: &str, now: i64) -> Result<(), ApiError> {
    let tx = conn.transaction().map_err(weft_db::DbError::Sqlite)?;
    active_group(&tx, group_id)?;

    let member = membership(&tx, group_id, agent)?;
    if member.status != MembershipStatus::Pending.as_str() {
        return Err(ApiError::not_found("No pending invitation"));
    }

    groups::set_member_status(&tx, group_id, agent, MembershipStatus::Removed.as_str())?;
    groups::append_change(&tx, group_id, "declined", agent, None, now)?;
    tx.commit().map_err(weft_db::DbError::Sqlite)?;
    Ok(())
}

/// Leave a group. The owner must transfer ownership first.
pub fn leave(conn: &mut Connection, group_id: &str, agent: &str, now: i64) -> Result<(), ApiError> {
    let tx = conn.transaction().map_err(weft_db::DbError::Sqlite)?;
    active_group(&tx, group_id)?;

    let member = membership(&tx, group_id, agent)?;
    if member.status != MembershipStatus::Active.as_str() {
        return Err(ApiError::not_found("Not an active member of this group"));
    }
    if member.role == GroupRole::Owner.as_str() {
        return Err(ApiError::conflict(
            "Owner must transfer ownership before leaving",
        ));
    }

    groups::mark_left(&tx, group_id, agent, now)?;
    groups::append_change(&tx, group_id, "left", agent, None, now)?;
    tx.commit().map_err(weft_db::DbError::Sqlite)?;
    Ok(())
}

/// Remove a member. Owners may remove anyone but themselves; admins only
/// plain members.
pub fn remove_member(
    conn: &mut Connection,
    group_id: &str,
    actor: &str,
    target: &str,
    now: i64,
) -> Result<(), ApiError> {
    if actor == target {
        return Err(ApiError::bad_request("Use leave to remove yourself"));
    }

    let tx = conn.transaction().map_err(weft_db::DbError::Sqlite)?;
    active_group(&tx, group_id)?;

    let actor_row = membership(&tx, group_id, actor)?;
    let target_row = membership(&tx, group_id, target)?;
    if target_row.status != MembershipStatus::Active.as_str()
        && target_row.status != MembershipStatus::Pending.as_str()
    {
        return Err(ApiError::not_found("Not a member of this group"));
    }

    let allowed = if is_active_with_role(&actor_row, GroupRole::Owner) {
        target_row.role != GroupRole::Owner.as_str()
    } else if is_active_with_role(&actor_row, GroupRole::Admin) {
        target_row.role == GroupRole::Member.as_str()
    } else {
        false
    };
    if !allowed {
        return Err(ApiError::forbidden("Not permitted to remove this member"));
    }

    groups::set_member_status(&tx, group_id, target, MembershipStatus::Removed.as_str())?;
    groups::append_change(&tx, group_id, "removed", actor, Some(target), now)?;
    tx.commit().map_err(weft_db::DbError::Sqlite)?;
    Ok(())
}

/// Dissolve a group (owner only).
pub fn dissolve(conn: &mut Connection, group_id: &str, actor: &str, now: i64) -> Result<(), ApiError> {
    let tx = conn.transaction().map_err(weft_db::DbError::Sqlite)?;
    let group = active_group(&tx, group_id)?;
    if group.owner != actor {
        return Err(ApiError::forbidden("Only the owner may dissolve a group"));
    }

    groups::append_change(&tx, group_id, "dissolved", actor, None, now)?;
    groups::dissolve(&tx, group_id, now)?;
    tx.commit().map_err(weft_db::DbError::Sqlite)?;
    tracing::info!(group = group_id, "group dissolved");
    Ok(())
}

/// Transfer ownership: the two roles are swapped in one transaction.
pub fn transfer(
    conn: &mut Connection,
    group_id: &str,
    owner: &str,
    new_owner: &str,
    now: i64,
) -> Result<(), ApiError> {
    if owner == new_owner {
        return Err(ApiError::bad_request("Already the owner"));
    }

    let tx = conn.transaction().map_err(weft_db::DbError::Sqlite)?;
    let group = active_group(&tx, group_id)?;
    if group.owner != owner {
        return Err(ApiError::forbidden("Only the owner may transfer ownership"));
    }

    let successor = membership(&tx, group_id, new_owner)?;
    if successor.status != MembershipStatus::Active.as_str() {
        return Err(ApiError::conflict("New owner must be an active member"));
    }

    groups::set_role(&tx, group_id, new_owner, GroupRole::Owner.as_str())?;
    groups::set_role(&tx, group_id, owner, &successor.role)?;
    groups::set_owner(&tx, group_id, new_owner)?;
    groups::append_change(&tx, group_id, "transferred", owner, Some(new_owner), now)?;
    tx.commit().map_err(weft_db::DbError::Sqlite)?;
    tracing::info!(group = group_id, owner, new_owner, "ownership transferred");
    Ok(())
}

/// Update settings (owner only).
pub fn update_settings(
    conn: &mut Connection,
    group_id: &str,
    actor: &str,
    req: &UpdateSettingsRequest,
    now: i64,
) -> Result<GroupView, ApiError> {
    let tx = conn.transaction().map_err(weft_db::DbError::Sqlite)?;
    let group = active_group(&tx, group_id)?;
    if group.owner != actor {
        return Err(ApiError::forbidden("Only the owner may change settings"));
    }

    let max_members = req.max_members.unwrap_or(group.max_members);
    if max_members < 1 {
        return Err(ApiError::bad_request("maxMembers must be positive"));
    }

    groups::update_settings(
        &tx,
        group_id,
        req.members_can_invite.unwrap_or(group.members_can_invite),
        req.members_can_send.unwrap_or(group.members_can_send),
        max_members,
    )?;
    groups::append_change(&tx, group_id, "settings_changed", actor, None, now)?;
    let view = groups::find(&tx, group_id)?
        .map(group_view)
        .ok_or_else(|| ApiError::internal("Group vanished"))?;
    tx.commit().map_err(weft_db::DbError::Sqlite)?;
    Ok(view)
}

/// Groups the caller belongs to (active or invited).
pub fn list_for(conn: &Connection, agent: &str) -> Result<Vec<GroupView>, ApiError> {
    Ok(groups::list_groups_for(conn, agent)?
        .into_iter()
        .map(group_view)
        .collect())
}

/// Membership roster (members only).
pub fn members(conn: &Connection, group_id: &str, caller: &str) -> Result<Vec<MemberView>, ApiError> {
    let member = membership(conn, group_id, caller)?;
    if member.status != MembershipStatus::Active.as_str() {
        return Err(ApiError::forbidden("Not an active member of this group"));
    }
    Ok(groups::list_members(conn, group_id)?
        .into_iter()
        .map(|row| MemberView {
            agent: row.agent,
            role: row.role,
            status: row.status,
            invited_by: row.invited_by,
            joined_at: row.joined_at,
        })
        .collect())
}

/// Ordered change log at or after `since` (members only, any status — a
/// removed member may reconcile their own removal).
pub fn changes(
    conn: &Connection,
    group_id: &str,
    caller: &str,
    since: i64,
) -> Result<Vec<weft_types::events::GroupChange>, ApiError> {
    membership(conn, group_id, caller)?;
    Ok(groups::list_changes_since(conn, group_id, since)?
        .into_iter()
        .map(|row| weft_types::events::GroupChange {
            seq: row.seq,
            group_id: row.group_id,
            change: row.change,
            actor: row.actor,
            subject: row.subject,
            created_at: row.created_at,
        })
        .collect())
}
