//! Group and membership queries.

use rusqlite::{Connection, OptionalExtension};

use crate::Result;

/// A raw group row.
#[derive(Clone, Debug)]
pub struct GroupRow {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub status: String,
    pub members_can_invite: bool,
    pub members_can_send: bool,
    pub max_members: i64,
    pub created_at: i64,
    pub dissolved_at: Option<i64>,
}

/// A raw membership row.
#[derive(Clone, Debug)]
pub struct MemberRow {
    pub group_id: String,
    pub agent: String,
    pub role: String,
    pub status: String,
    pub invited_by: Option<String>,
    pub joined_at: Option<i64>,
    pub left_at: Option<i64>,
}

/// A raw change-log row.
#[derive(Clone, Debug)]
pub struct ChangeRow {
    pub seq: i64,
    pub group_id: String,
    pub change: String,
    pub actor: String,
    pub subject: Option<String>,
    pub created_at: i64,
}

fn map_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupRow> {
    Ok(GroupRow {
        id: row.get(0)?,
        name: row.get(1)?,
        owner: row.get(2)?,
        status: row.get(3)?,
        members_can_invite: row.get(4)?,
        members_can_send: row.get(5)?,
        max_members: row.get(6)?,
        created_at: row.get(7)?,
        dissolved_at: row.get(8)?,
    })
}

fn map_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemberRow> {
    Ok(MemberRow {
        group_id: row.get(0)?,
        agent: row.get(1)?,
        role: row.get(2)?,
        status: row.get(3)?,
        invited_by: row.get(4)?,
        joined_at: row.get(5)?,
        left_at: row.get(6)?,
    })
}

const GROUP_COLUMNS: &str = "id, name, owner, status, members_can_invite, members_can_send, \
                             max_members, created_at, dissolved_at";

const MEMBER_COLUMNS: &str = "group_id, agent, role, status, invited_by, joined_at, left_at";

/// Create a group and its owner membership in one step.
#[allow(clippy::too_many_arguments)]
pub fn create(
    conn: &Connection,
    id: &str,
    name: &str,
    owner: &str,
    members_can_invite: bool,
    members_can_send: bool,
    max_members: i64,
    now: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO groups (id, name, owner, members_can_invite, members_can_send, max_members, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![id, name, owner, members_can_invite, members_can_send, max_members, now],
    )?;
    conn.execute(
        "INSERT INTO group_members (group_id, agent, role, status, joined_at)
         VALUES (?1, ?2, 'owner', 'active', ?3)",
        rusqlite::params![id, owner, now],
    )?;
    Ok(())
}

/// Find a group by id.
pub fn find(conn: &Connection, id: &str) -> Result<Option<GroupRow>> {
    conn.query_row(
        &format!("SELECT {GROUP_COLUMNS} FROM groups WHERE id = ?1"),
        [id],
        map_group,
    )
    .optional()
    .map_err(crate::DbError::Sqlite)
}

/// Update the three member-facing settings.
pub fn update_settings(
    conn: &Connection,
    id: &str,
    members_can_invite: bool,
    members_can_send: bool,
    max_members: i64,
) -> Result<()> {
    conn.execute(
        "UPDATE groups SET members_can_invite = ?2, members_can_send = ?3, max_members = ?4
         WHERE id = ?1",
        rusqlite::params![id, members_can_invite, members_can_send, max_members],
    )?;
    Ok(())
}

/// Mark the group dissolved.
pub fn dissolve(conn: &Connection, id: &str, now: i64) -> Result<()> {
    conn.execute(
        "UPDATE groups SET status = 'dissolved', dissolved_at = ?2 WHERE id = ?1",
        rusqlite::params![id, now],
    )?;
    Ok(())
}

/// Record the new owner on the group row.
pub fn set_owner(conn: &Connection, id: &str, owner: &str) -> Result<()> {
    conn.execute(
        "UPDATE groups SET owner = ?2 WHERE id = ?1",
        rusqlite::params![id, owner],
    )?;
    Ok(())
}

/// Find one membership row.
pub fn find_member(conn: &Connection, group_id: &str, agent: &str) -> Result<Option<MemberRow>> {
    conn.query_row(
        &format!("SELECT {MEMBER_COLUMNS} FROM group_members WHERE group_id = ?1 AND agent = ?2"),
        [group_id, agent],
        map_member,
    )
    .optional()
    .map_err(crate::DbError::Sqlite)
}

/// Insert or revive a pending invitation.
pub fn upsert_invitation(
    conn: &Connection,
    group_id: &str,
    agent: &str,
    invited_by: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO group_members (group_id, agent, role, status, invited_by)
         VALUES (?1, ?2, 'member', 'pending', ?3)
         ON CONFLICT(group_id, agent) DO UPDATE SET
             status = 'pending', role = 'member', invited_by = excluded.invited_by,
             joined_at = NULL, left_at = NULL",
        rusqlite::params![group_id, agent, invited_by],
    )?;
    Ok(())
}

/// Transition a pending invitation to active, stamping `joined_at`.
pub fn activate_member(conn: &Connection, group_id: &str, agent: &str, now: i64) -> Result<()> {
    conn.execute(
        "UPDATE group_members SET status = 'active', joined_at = ?3
         WHERE group_id = ?1 AND agent = ?2",
        rusqlite::params![group_id, agent, now],
    )?;
    Ok(())
}

/// Set a membership status without stamping instants (decline, removal).
pub fn set_member_status(
    conn: &Connection,
    group_id: &str,
    agent: &str,
    status: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE group_members SET status = ?3 WHERE group_id = ?1 AND agent = ?2",
        rusqlite::params![group_id, agent, status],
    )?;
    Ok(())
}

/// Record a voluntary departure.
pub fn mark_left(conn: &Connection, group_id: &str, agent: &str, now: i64) -> Result<()> {
    conn.execute(
        "UPDATE group_members SET status = 'left', left_at = ?3
         WHERE group_id = ?1 AND agent = ?2",
        rusqlite::params![group_id, agent, now],
    )?;
    Ok(())
}

/// Change a member's role.
pub fn set_role(conn: &Connection, group_id: &str, agent: &str, role: &str) -> Result<()> {
    conn.execute(
        "UPDATE group_members SET role = ?3 WHERE group_id = ?1 AND agent = ?2",
        rusqlite::params![group_id, agent, role],
    )?;
    Ok(())
}

/// Count members currently active in a group.
pub fn count_active_members(conn: &Connection, group_id: &str) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM group_members WHERE group_id = ?1 AND status = 'active'",
        [group_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// All membership rows of a group.
pub fn list_members(conn: &Connection, group_id: &str) -> Result<Vec<MemberRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MEMBER_COLUMNS} FROM group_members WHERE group_id = ?1 ORDER BY agent"
    ))?;
    let rows = stmt
        .query_map([group_id], map_member)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Groups where `agent` has an active or pending membership.
pub fn list_groups_for(conn: &Connection, agent: &str) -> Result<Vec<GroupRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT g.id, g.name, g.owner, g.status, g.members_can_invite, g.members_can_send, \
         g.max_members, g.created_at, g.dissolved_at FROM groups g
         JOIN group_members m ON m.group_id = g.id
         WHERE m.agent = ?1 AND m.status IN ('active', 'pending') AND g.status = 'active'
         ORDER BY g.created_at"
    ))?;
    let rows = stmt
        .query_map([agent], map_group)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Append to the group's ordered change log.
pub fn append_change(
    conn: &Connection,
    group_id: &str,
    change: &str,
    actor: &str,
    subject: Option<&str>,
    now: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO group_changes (group_id, change, actor, subject, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![group_id, change, actor, subject, now],
    )?;
    Ok(())
}

/// Changes for a group at or after `since`, in log order.
pub fn list_changes_since(conn: &Connection, group_id: &str, since: i64) -> Result<Vec<ChangeRow>> {
    let mut stmt = conn.prepare(
        "SELECT seq, group_id, change, actor, subject, created_at
         FROM group_changes WHERE group_id = ?1 AND created_at >= ?2
         ORDER BY seq ASC",
    )?;
    let rows = stmt
        .query_map(rusqlite::params![group_id, since], |row| {
            Ok(ChangeRow {
                seq: row.get(0)?,
                group_id: row.get(1)?,
                change: row.get(2)?,
                actor: row.get(3)?,
                subject: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
