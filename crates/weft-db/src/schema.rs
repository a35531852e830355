//! SQL schema definitions.

/// Initial schema (v1). The recovery columns on `agents` arrive in v2 via
/// additive migration.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Identity
-- ============================================================

CREATE TABLE IF NOT EXISTS agents (
    name TEXT PRIMARY KEY,
    public_key TEXT NOT NULL UNIQUE,
    owner_email TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    email_verified INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'pending',
    last_seen INTEGER,
    created_at INTEGER NOT NULL,
    approved_by TEXT,
    key_updated_at INTEGER
);

CREATE TABLE IF NOT EXISTS email_verifications (
    agent_name TEXT PRIMARY KEY REFERENCES agents(name) ON DELETE CASCADE,
    email TEXT NOT NULL,
    code_hash TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    expires_at INTEGER NOT NULL,
    verified INTEGER NOT NULL DEFAULT 0
);

-- ============================================================
-- Contact graph
-- ============================================================

-- Pair stored ordered (agent_a < agent_b); requested_by names the initiator.
CREATE TABLE IF NOT EXISTS contacts (
    agent_a TEXT NOT NULL,
    agent_b TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    requested_by TEXT NOT NULL,
    denial_count INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (agent_a, agent_b),
    CHECK (agent_a < agent_b)
);

CREATE INDEX IF NOT EXISTS idx_contacts_b ON contacts(agent_b);

CREATE TABLE IF NOT EXISTS blocks (
    blocker TEXT NOT NULL,
    blocked TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (blocker, blocked)
);

CREATE TABLE IF NOT EXISTS rate_limits (
    key TEXT PRIMARY KEY,
    count INTEGER NOT NULL,
    window_start INTEGER NOT NULL
);

-- ============================================================
-- Groups
-- ============================================================

CREATE TABLE IF NOT EXISTS groups (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    owner TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    members_can_invite INTEGER NOT NULL DEFAULT 0,
    members_can_send INTEGER NOT NULL DEFAULT 1,
    max_members INTEGER NOT NULL DEFAULT 50,
    created_at INTEGER NOT NULL,
    dissolved_at INTEGER
);

CREATE TABLE IF NOT EXISTS group_members (
    group_id TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
    agent TEXT NOT NULL,
    role TEXT NOT NULL,
    status TEXT NOT NULL,
    invited_by TEXT,
    joined_at INTEGER,
    left_at INTEGER,
    PRIMARY KEY (group_id, agent)
);

CREATE TABLE IF NOT EXISTS group_changes (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
    change TEXT NOT NULL,
    actor TEXT NOT NULL,
    subject TEXT,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_group_changes ON group_changes(group_id, created_at);

-- ============================================================
-- Admin
-- ============================================================

CREATE TABLE IF NOT EXISTS broadcasts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sender TEXT NOT NULL,
    subject TEXT NOT NULL,
    body TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS _meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;
