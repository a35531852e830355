//! HTTP surface of the relay.
//!
//! Handlers take the raw body so the request signature can be checked over
//! the exact bytes, authenticate where required, then delegate to the
//! manager modules. Register, verify, and recover are public; rotate-key
//! accepts either the agent's current key or, during an active recovery,
//! the pending recovery key.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post, put};
use axum::{Json, Router};
use chrono::Utc;

use weft_crypto::ed25519::VerifyingKey;
use weft_db::queries::agents;
use weft_wire::reqsig;

use crate::auth;
use crate::context::{unix_now, RelayContext};
use crate::error::ApiError;
use crate::{admin, contacts, groups, identity, presence};

/// Assemble the full relay router.
pub fn router(ctx: Arc<RelayContext>) -> Router {
    Router::new()
        // Registry (register/verify/recover are public)
        .route("/registry/agents", post(register))
        .route("/registry/agents/:name", get(agent_profile))
        .route("/registry/agents/:name/verify", post(verify))
        .route("/registry/agents/:name/rotate-key", post(rotate_key))
        .route("/registry/agents/:name/approve", post(approve_agent))
        .route("/registry/agents/:name/revoke", post(revoke_agent))
        .route("/recover", post(recover))
        // Contacts
        .route("/contacts", get(contacts_list))
        .route("/contacts/request", post(contacts_request))
        .route("/contacts/batch-request", post(contacts_batch_request))
        .route("/contacts/pending", get(contacts_pending))
        .route("/contacts/:agent/accept", post(contacts_accept))
        .route("/contacts/:agent/deny", post(contacts_deny))
        .route("/contacts/:agent", delete(contacts_remove))
        // Presence
        .route("/presence", put(presence_heartbeat))
        .route("/presence/batch", get(presence_batch))
        .route("/presence/:agent", get(presence_get))
        // Groups
        .route("/groups", post(groups_create).get(groups_list))
        .route("/groups/:id", delete(groups_dissolve))
        .route("/groups/:id/invite", post(groups_invite))
        .route("/groups/:id/accept", post(groups_accept))
        .route("/groups/:id/decline", post(groups_decline))
        .route("/groups/:id/leave", post(groups_leave))
        .route("/groups/:id/transfer", post(groups_transfer))
        .route("/groups/:id/settings", patch(groups_settings))
        .route("/groups/:id/members", get(groups_members))
        .route("/groups/:id/members/:agent", delete(groups_remove_member))
        .route("/groups/:id/changes", get(groups_changes))
        // Admin
        .route("/admin/broadcast", post(admin_broadcast))
        .route("/admin/broadcasts", get(admin_broadcasts))
        .with_state(ctx)
}

type Handled = Result<Response, ApiError>;

fn parse_json<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("Invalid body: {e}")))
}

fn reply(status: StatusCode, value: serde_json::Value) -> Response {
    (status, Json(value)).into_response()
}

// ---------------------------------------------------------------- registry

async fn register(State(ctx): State<Arc<RelayContext>>, body: Bytes) -> Handled {
    let req: identity::RegisterRequest = parse_json(&body)?;
    let mut conn = ctx.db.lock().await;
    identity::register(&mut conn, ctx.mailer.as_ref(), &req, unix_now())?;
    Ok(reply(
        StatusCode::CREATED,
        serde_json::json!({"name": req.name, "status": "pending"}),
    ))
}

async fn agent_profile(
    State(ctx): State<Arc<RelayContext>>,
    Path(name): Path<String>,
) -> Handled {
    let conn = ctx.db.lock().await;
    let profile = identity::profile(&conn, &name)?;
    Ok(reply(StatusCode::OK, serde_json::to_value(profile).map_err(internal_json)?))
}

#[derive(serde::Deserialize)]
struct VerifyRequest {
    code: String,
}

async fn verify(
    State(ctx): State<Arc<RelayContext>>,
    Path(name): Path<String>,
    body: Bytes,
) -> Handled {
    let req: VerifyRequest = parse_json(&body)?;
    let mut conn = ctx.db.lock().await;
    identity::verify_email(&mut conn, &name, &req.code, unix_now())?;
    Ok(reply(
        StatusCode::OK,
        serde_json::json!({"name": name, "status": "active"}),
    ))
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RotateKeyRequest {
    new_public_key: String,
}

async fn rotate_key(
    State(ctx): State<Arc<RelayContext>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Handled {
    let path = format!("/registry/agents/{name}/rotate-key");
    let now = Utc::now();
    let req: RotateKeyRequest = parse_json(&body)?;

    let mut conn = ctx.db.lock().await;
    let authenticated =
        match auth::authenticate(&conn, &headers, "POST", &path, &body, now) {
            Ok(agent) => Some(agent),
            Err(primary) => {
                // During an active recovery the request may be signed with
                // the pending key instead; the business layer then sees an
                // anonymous caller.
                if verify_with_pending_key(&conn, &name, &headers, &path, &body, now)? {
                    None
                } else {
                    return Err(primary);
                }
            }
        };

    let key_updated_at = identity::rotate_key(
        &mut conn,
        &name,
        &req.new_public_key,
        authenticated.as_deref(),
        now.timestamp(),
    )?;
    Ok(reply(
        StatusCode::OK,
        serde_json::json!({"name": name, "keyUpdatedAt": key_updated_at}),
    ))
}

/// Check a rotate-key signature against the agent's pending recovery key.
fn verify_with_pending_key(
    conn: &rusqlite::Connection,
    name: &str,
    headers: &HeaderMap,
    path: &str,
    body: &[u8],
    now: chrono::DateTime<Utc>,
) -> Result<bool, ApiError> {
    let signed = auth::parse_headers(headers, now)?;
    if signed.agent != name {
        return Ok(false);
    }
    let Some(agent) = agents::find(conn, name)? else {
        return Ok(false);
    };
    let Some(pending) = agent.pending_public_key else {
        return Ok(false);
    };
    let Ok(public) = VerifyingKey::from_base64(&pending) else {
        return Ok(false);
    };
    Ok(reqsig::verify_request(
        &public,
        "POST",
        path,
        &signed.timestamp,
        body,
        &signed.signature,
    )
    .is_ok())
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecoverRequest {
    name: String,
    email: String,
    new_public_key: String,
}

async fn recover(State(ctx): State<Arc<RelayContext>>, body: Bytes) -> Handled {
    let req: RecoverRequest = parse_json(&body)?;
    let mut conn = ctx.db.lock().await;
    identity::recover(&mut conn, &req.name, &req.email, &req.new_public_key, unix_now())?;
    Ok(reply(
        StatusCode::ACCEPTED,
        serde_json::json!({"name": req.name, "status": "recovery-pending"}),
    ))
}

async fn approve_agent(
    State(ctx): State<Arc<RelayContext>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Handled {
    let path = format!("/registry/agents/{name}/approve");
    let conn = ctx.db.lock().await;
    let caller = auth::authenticate(&conn, &headers, "POST", &path, &body, Utc::now())?;
    admin::require_admin(&ctx.config, &caller)?;
    admin::approve(&conn, &caller, &name)?;
    Ok(reply(StatusCode::OK, serde_json::json!({"name": name, "status": "active"})))
}

async fn revoke_agent(
    State(ctx): State<Arc<RelayContext>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Handled {
    let path = format!("/registry/agents/{name}/revoke");
    let conn = ctx.db.lock().await;
    let caller = auth::authenticate(&conn, &headers, "POST", &path, &body, Utc::now())?;
    admin::require_admin(&ctx.config, &caller)?;
    admin::revoke(&conn, &caller, &name)?;
    Ok(reply(StatusCode::OK, serde_json::json!({"name": name, "status": "revoked"})))
}

// ---------------------------------------------------------------- contacts

async fn contacts_request(
    State(ctx): State<Arc<RelayContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> Handled {
    let mut conn = ctx.db.lock().await;
    let caller = auth::authenticate(&conn, &headers, "POST", "/contacts/request", &body, Utc::now())?;
    let req: contacts::ContactRequest = parse_json(&body)?;
    contacts::request(&mut conn, &caller, &req, unix_now())?;
    Ok(reply(
        StatusCode::CREATED,
        serde_json::json!({"toAgent": req.to_agent, "status": "pending"}),
    ))
}

async fn contacts_batch_request(
    State(ctx): State<Arc<RelayContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> Handled {
    let mut conn = ctx.db.lock().await;
    let caller = auth::authenticate(
        &conn,
        &headers,
        "POST",
        "/contacts/batch-request",
        &body,
        Utc::now(),
    )?;
    let req: contacts::BatchContactRequest = parse_json(&body)?;
    let results = contacts::batch_request(&mut conn, &caller, &req, unix_now())?;

    let status = if results.iter().all(|r| r.status == 201) {
        StatusCode::CREATED
    } else {
        StatusCode::MULTI_STATUS
    };
    Ok(reply(
        status,
        serde_json::json!({"results": results}),
    ))
}

async fn contacts_pending(
    State(ctx): State<Arc<RelayContext>>,
    headers: HeaderMap,
) -> Handled {
    let conn = ctx.db.lock().await;
    let caller = auth::authenticate(&conn, &headers, "GET", "/contacts/pending", b"", Utc::now())?;
    let pending = contacts::list_pending(&conn, &caller, unix_now())?;
    Ok(reply(StatusCode::OK, serde_json::to_value(pending).map_err(internal_json)?))
}

async fn contacts_accept(
    State(ctx): State<Arc<RelayContext>>,
    Path(agent): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Handled {
    let path = format!("/contacts/{agent}/accept");
    let mut conn = ctx.db.lock().await;
    let caller = auth::authenticate(&conn, &headers, "POST", &path, &body, Utc::now())?;
    let view = contacts::accept(&mut conn, &caller, &agent, unix_now())?;
    Ok(reply(StatusCode::OK, serde_json::to_value(view).map_err(internal_json)?))
}

async fn contacts_deny(
    State(ctx): State<Arc<RelayContext>>,
    Path(agent): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Handled {
    let path = format!("/contacts/{agent}/deny");
    let mut conn = ctx.db.lock().await;
    let caller = auth::authenticate(&conn, &headers, "POST", &path, &body, Utc::now())?;
    let denial_count = contacts::deny(&mut conn, &caller, &agent, unix_now())?;
    Ok(reply(
        StatusCode::OK,
        serde_json::json!({"agent": agent, "denialCount": denial_count}),
    ))
}

async fn contacts_remove(
    State(ctx): State<Arc<RelayContext>>,
    Path(agent): Path<String>,
    headers: HeaderMap,
) -> Handled {
    let path = format!("/contacts/{agent}");
    let mut conn = ctx.db.lock().await;
    let caller = auth::authenticate(&conn, &headers, "DELETE", &path, b"", Utc::now())?;
    contacts::remove(&mut conn, &caller, &agent)?;
    Ok(reply(StatusCode::OK, serde_json::json!({"agent": agent, "status": "removed"})))
}

async fn contacts_list(
    State(ctx): State<Arc<RelayContext>>,
    headers: HeaderMap,
) -> Handled {
    let conn = ctx.db.lock().await;
    let caller = auth::authenticate(&conn, &headers, "GET", "/contacts", b"", Utc::now())?;
    let listed = contacts::list(&conn, &caller, unix_now())?;
    Ok(reply(StatusCode::OK, serde_json::to_value(listed).map_err(internal_json)?))
}

// ---------------------------------------------------------------- presence

async fn presence_heartbeat(
    State(ctx): State<Arc<RelayContext>>,
    headers: HeaderMap,
) -> Handled {
    let conn = ctx.db.lock().await;
    let caller = auth::authenticate(&conn, &headers, "PUT", "/presence", b"", Utc::now())?;
    let view = presence::heartbeat(&conn, &caller, unix_now())?;
    Ok(reply(StatusCode::OK, serde_json::to_value(view).map_err(internal_json)?))
}

#[derive(serde::Deserialize)]
struct PresenceBatchQuery {
    #[serde(default)]
    agents: String,
}

async fn presence_batch(
    State(ctx): State<Arc<RelayContext>>,
    Query(query): Query<PresenceBatchQuery>,
    headers: HeaderMap,
) -> Handled {
    let conn = ctx.db.lock().await;
    auth::authenticate(&conn, &headers, "GET", "/presence/batch", b"", Utc::now())?;
    let names: Vec<String> = query
        .agents
        .split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    let views = presence::batch(&conn, &names, unix_now())?;
    Ok(reply(StatusCode::OK, serde_json::to_value(views).map_err(internal_json)?))
}

async fn presence_get(
    State(ctx): State<Arc<RelayContext>>,
    Path(agent): Path<String>,
    headers: HeaderMap,
) -> Handled {
    let path = format!("/presence/{agent}");
    let conn = ctx.db.lock().await;
    auth::authenticate(&conn, &headers, "GET", &path, b"", Utc::now())?;
    let view = presence::get(&conn, &agent, unix_now())?;
    Ok(reply(StatusCode::OK, serde_json::to_value(view).map_err(internal_json)?))
}

// ---------------------------------------------------------------- groups

async fn groups_create(
    State(ctx): State<Arc<RelayContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> Handled {
    let mut conn = ctx.db.lock().await;
    let caller = auth::authenticate(&conn, &headers, "POST", "/groups", &body, Utc::now())?;
    let req: groups::CreateGroupRequest = parse_json(&body)?;
    let view = groups::create(&mut conn, &caller, &req, unix_now())?;
    Ok(reply(StatusCode::CREATED, serde_json::to_value(view).map_err(internal_json)?))
}

async fn groups_list(
    State(ctx): State<Arc<RelayContext>>,
    headers: HeaderMap,
) -> Handled {
    let conn = ctx.db.lock().await;
    let caller = auth::authenticate(&conn, &headers, "GET", "/groups", b"", Utc::now())?;
    let listed = groups::list_for(&conn, &caller)?;
    Ok(reply(StatusCode::OK, serde_json::to_value(listed).map_err(internal_json)?))
}

#[derive(serde::Deserialize)]
struct InviteRequest {
    agent: String,
}

async fn groups_invite(
    State(ctx): State<Arc<RelayContext>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Handled {
    let path = format!("/groups/{id}/invite");
    let mut conn = ctx.db.lock().await;
    let caller = auth::authenticate(&conn, &headers, "POST", &path, &body, Utc::now())?;
    let req: InviteRequest = parse_json(&body)?;
    groups::invite(&mut conn, &id, &caller, &req.agent, unix_now())?;
    Ok(reply(
        StatusCode::CREATED,
        serde_json::json!({"groupId": id, "agent": req.agent, "status": "pending"}),
    ))
}

async fn groups_accept(
    State(ctx): State<Arc<RelayContext>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Handled {
    let path = format!("/groups/{id}/accept");
    let mut conn = ctx.db.lock().await;
    let caller = auth::authenticate(&conn, &headers, "POST", &path, &body, Utc::now())?;
    groups::accept(&mut conn, &id, &caller, unix_now())?;
    Ok(reply(StatusCode::OK, serde_json::json!({"groupId": id, "status": "active"})))
}

async fn groups_decline(
    State(ctx): State<Arc<RelayContext>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Handled {
    let path = format!("/groups/{id}/decline");
    let mut conn = ctx.db.lock().await;
    let caller = auth::authenticate(&conn, &headers, "POST", &path, &body, Utc::now())?;
    groups::decline(&mut conn, &id, &caller, unix_now())?;
    Ok(reply(StatusCode::OK, serde_json::json!({"groupId": id, "status": "declined"})))
}

async fn groups_leave(
    State(ctx): State<Arc<RelayContext>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Handled {
    let path = format!("/groups/{id}/leave");
    let mut conn = ctx.db.lock().await;
    let caller = auth::authenticate(&conn, &headers, "POST", &path, &body, Utc::now())?;
    groups::leave(&mut conn, &id, &caller, unix_now())?;
    Ok(reply(StatusCode::OK, serde_json::json!({"groupId": id, "status": "left"})))
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferRequest {
    new_owner: String,
}

async fn groups_transfer(
    State(ctx): State<Arc<RelayContext>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Handled {
    let path = format!("/groups/{id}/transfer");
    let mut conn = ctx.db.lock().await;
    let caller = auth::authenticate(&conn, &headers, "POST", &path, &body, Utc::now())?;
    let req: TransferRequest = parse_json(&body)?;
    groups::transfer(&mut conn, &id, &caller, &req.new_owner, unix_now())?;
    Ok(reply(
        StatusCode::OK,
        serde_json::json!({"groupId": id, "owner": req.new_owner}),
    ))
}

async fn groups_settings(
    State(ctx): State<Arc<RelayContext>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Handled {
    let path = format!("/groups/{id}/settings");
    let mut conn = ctx.db.lock().await;
    let caller = auth::authenticate(&conn, &headers, "PATCH", &path, &body, Utc::now())?;
    let req: groups::UpdateSettingsRequest = parse_json(&body)?;
    let view = groups::update_settings(&mut conn, &id, &caller, &req, unix_now())?;
    Ok(reply(StatusCode::OK, serde_json::to_value(view).map_err(internal_json)?))
}

async fn groups_members(
    State(ctx): State<Arc<RelayContext>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Handled {
    let path = format!("/groups/{id}/members");
    let conn = ctx.db.lock().await;
    let caller = auth::authenticate(&conn, &headers, "GET", &path, b"", Utc::now())?;
    let roster = groups::members(&conn, &id, &caller)?;
    Ok(reply(StatusCode::OK, serde_json::to_value(roster).map_err(internal_json)?))
}

async fn groups_remove_member(
    State(ctx): State<Arc<RelayContext>>,
    Path((id, agent)): Path<(String, String)>,
    headers: HeaderMap,
) -> Handled {
    let path = format!("/groups/{id}/members/{agent}");
    let mut conn = ctx.db.lock().await;
    let caller = auth::authenticate(&conn, &headers, "DELETE", &path, b"", Utc::now())?;
    groups::remove_member(&mut conn, &id, &caller, &agent, unix_now())?;
    Ok(reply(
        StatusCode::OK,
        serde_json::json!({"groupId": id, "agent": agent, "status": "removed"}),
    ))
}

async fn groups_dissolve(
    State(ctx): State<Arc<RelayContext>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Handled {
    let path = format!("/groups/{id}");
    let mut conn = ctx.db.lock().await;
    let caller = auth::authenticate(&conn, &headers, "DELETE", &path, b"", Utc::now())?;
    groups::dissolve(&mut conn, &id, &caller, unix_now())?;
    Ok(reply(StatusCode::OK, serde_json::json!({"groupId": id, "status": "dissolved"})))
}

#[derive(serde::Deserialize)]
struct ChangesQuery {
    #[serde(default)]
    since: i64,
}

async fn groups_changes(
    State(ctx): State<Arc<RelayContext>>,
    Path(id): Path<String>,
    Query(query): Query<ChangesQuery>,
    headers: HeaderMap,
) -> Handled {
    let path = format!("/groups/{id}/changes");
    let conn = ctx.db.lock().await;
    let caller = auth::authenticate(&conn, &headers, "GET", &path, b"", Utc::now())?;
    let log = groups::changes(&conn, &id, &caller, query.since)?;
    Ok(reply(StatusCode::OK, serde_json::to_value(log).map_err(internal_json)?))
}

// ---------------------------------------------------------------- admin

async fn admin_broadcast(
    State(ctx): State<Arc<RelayContext>>,
    headers: HeaderMap,
    body: Bytes,
) -> Handled {
    let conn = ctx.db.lock().await;
    let caller = auth::authenticate(&conn, &headers, "POST", "/admin/broadcast", &body, Utc::now())?;
    admin::require_admin(&ctx.config, &caller)?;
    let req: admin::BroadcastRequest = parse_json(&body)?;
    let id = admin::broadcast(&conn, &caller, &req, unix_now())?;
    Ok(reply(StatusCode::CREATED, serde_json::json!({"id": id})))
}

async fn admin_broadcasts(
    State(ctx): State<Arc<RelayContext>>,
    headers: HeaderMap,
) -> Handled {
    let conn = ctx.db.lock().await;
    auth::authenticate(&conn, &headers, "GET", "/admin/broadcasts", b"", Utc::now())?;
    let listed = admin::list_broadcasts(&conn, 100)?;
    Ok(reply(StatusCode::OK, serde_json::to_value(listed).map_err(internal_json)?))
}

fn internal_json(e: serde_json::Error) -> ApiError {
    ApiError::internal(format!("Response serialization failed: {e}"))
}
