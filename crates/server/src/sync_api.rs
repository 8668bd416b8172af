//! HTTP surface of the sync engine.
//!
//! Routes are bearer-authenticated against the application's session store.
//! Sync invocations run inline in the request: the per-user running guard in
//! the orchestrator keeps overlapping invocations out, and clients poll
//! `/progress` and `/runs` for the state of longer imports.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use tracing::error;

use freightdesk_core::config::CrmConfig;
use freightdesk_core::{
    ConflictResolution, ExternalField, LocalField, MappingDirection, SyncAction, SyncEntityType,
    SyncReport, SyncRequest, SyncRunStatus, SyncScope,
};
use freightdesk_db::repositories::{
    BatchProgressRepository, ConflictRepository, ConflictRow, FieldMappingRepository,
    RecordRepository, SyncRunRepository,
};
use freightdesk_db::DbPool;
use freightdesk_sync::{HttpCrmClient, SyncError, SyncOrchestrator};

#[derive(Clone)]
pub struct SyncApiState {
    db_pool: DbPool,
    engine: Arc<SyncOrchestrator<HttpCrmClient>>,
}

#[derive(Debug, Serialize)]
struct ApiError {
    error: String,
}

type Rejection = (StatusCode, Json<ApiError>);

pub fn router(db_pool: DbPool, crm: CrmConfig) -> Router {
    let engine =
        Arc::new(SyncOrchestrator::new(db_pool.clone(), HttpCrmClient::new(crm.clone()), crm));
    let state = SyncApiState { db_pool, engine };

    Router::new()
        .route("/api/v1/sync", post(start_sync))
        .route("/api/v1/sync/resume/{entity_type}", post(resume_sync))
        .route("/api/v1/sync/runs", get(list_runs))
        .route("/api/v1/sync/runs/{run_id}", get(get_run))
        .route("/api/v1/sync/progress", get(get_progress))
        .route("/api/v1/sync/conflicts", get(list_conflicts))
        .route("/api/v1/sync/conflicts/{conflict_id}/resolve", post(resolve_conflict))
        .route("/api/v1/sync/mappings", get(list_mappings).post(upsert_mapping))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct SyncInvocation {
    action: Option<String>,
    #[serde(alias = "sync_type")]
    entity_type: Option<String>,
    #[serde(default)]
    full_sync: bool,
    batch_size: Option<u32>,
    max_pages: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ResolvePayload {
    resolution: String,
}

#[derive(Debug, Deserialize)]
struct MappingPayload {
    entity_type: String,
    local_field: String,
    external_field: String,
    direction: Option<String>,
    enabled: Option<bool>,
}

#[derive(Debug, Serialize)]
struct RunView {
    id: String,
    sync_type: String,
    status: SyncRunStatus,
    records_processed: i64,
    records_success: i64,
    records_failed: i64,
    error_details: Vec<String>,
    started_at: String,
    completed_at: Option<String>,
}

#[derive(Debug, Serialize)]
struct ProgressView {
    entity_type: &'static str,
    total_estimated: i64,
    total_imported: i64,
    last_imported_page: i64,
    status: &'static str,
    error_details: Option<String>,
}

#[derive(Debug, Serialize)]
struct ConflictView {
    id: String,
    record_type: &'static str,
    record_id: String,
    field: String,
    local_value: String,
    external_value: String,
    resolution: &'static str,
    created_at: String,
    resolved_at: Option<String>,
}

#[derive(Debug, Serialize)]
struct MappingView {
    id: String,
    entity_type: &'static str,
    local_field: &'static str,
    external_field: &'static str,
    direction: &'static str,
    enabled: bool,
}

async fn start_sync(
    State(state): State<SyncApiState>,
    headers: HeaderMap,
    Json(payload): Json<SyncInvocation>,
) -> Result<Json<SyncReport>, Rejection> {
    let user_id = require_user(&headers, &state.db_pool).await?;
    let request = parse_invocation(&payload).map_err(bad_request)?;

    match state.engine.run(&user_id, &request).await {
        Ok(report) => Ok(Json(report)),
        Err(error) => Err(reject_sync_error(error)),
    }
}

async fn resume_sync(
    State(state): State<SyncApiState>,
    headers: HeaderMap,
    Path(entity_type): Path<String>,
) -> Result<Json<SyncReport>, Rejection> {
    let user_id = require_user(&headers, &state.db_pool).await?;
    let entity = SyncEntityType::parse(&entity_type)
        .ok_or_else(|| bad_request(format!("unknown entity type `{entity_type}`")))?;

    match state.engine.resume(&user_id, entity).await {
        Ok(report) => Ok(Json(report)),
        Err(error) => Err(reject_sync_error(error)),
    }
}

async fn list_runs(
    State(state): State<SyncApiState>,
    headers: HeaderMap,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<RunView>>, Rejection> {
    let user_id = require_user(&headers, &state.db_pool).await?;
    let runs = SyncRunRepository::new(state.db_pool.clone())
        .list_recent(&user_id, query.limit.unwrap_or(20))
        .await
        .map_err(internal)?;
    Ok(Json(runs.into_iter().map(run_view).collect()))
}

async fn get_run(
    State(state): State<SyncApiState>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
) -> Result<Json<RunView>, Rejection> {
    let user_id = require_user(&headers, &state.db_pool).await?;
    let run = SyncRunRepository::new(state.db_pool.clone())
        .find(&run_id)
        .await
        .map_err(internal)?
        .filter(|run| run.user_id == user_id)
        .ok_or_else(|| not_found("sync run not found"))?;
    Ok(Json(run_view(run)))
}

async fn get_progress(
    State(state): State<SyncApiState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ProgressView>>, Rejection> {
    let user_id = require_user(&headers, &state.db_pool).await?;
    let cursors = BatchProgressRepository::new(state.db_pool.clone())
        .list(&user_id)
        .await
        .map_err(internal)?;
    let views = cursors
        .into_iter()
        .map(|cursor| ProgressView {
            entity_type: cursor.entity_type.as_str(),
            total_estimated: cursor.total_estimated,
            total_imported: cursor.total_imported,
            last_imported_page: cursor.last_imported_page,
            status: cursor.status.as_str(),
            error_details: cursor.error_details,
        })
        .collect();
    Ok(Json(views))
}

async fn list_conflicts(
    State(state): State<SyncApiState>,
    headers: HeaderMap,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<ConflictView>>, Rejection> {
    let user_id = require_user(&headers, &state.db_pool).await?;
    let conflicts = ConflictRepository::new(state.db_pool.clone())
        .list_pending(&user_id, query.limit.unwrap_or(50))
        .await
        .map_err(internal)?;
    Ok(Json(conflicts.into_iter().map(conflict_view).collect()))
}

async fn resolve_conflict(
    State(state): State<SyncApiState>,
    headers: HeaderMap,
    Path(conflict_id): Path<String>,
    Json(payload): Json<ResolvePayload>,
) -> Result<Json<ConflictView>, Rejection> {
    let user_id = require_user(&headers, &state.db_pool).await?;
    let resolution = parse_resolution(&payload.resolution).map_err(bad_request)?;

    let resolved = ConflictRepository::new(state.db_pool.clone())
        .resolve(&user_id, &conflict_id, resolution)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found("conflict not found or already resolved"))?;

    // Keeping the local value needs no write; taking the external one does.
    if resolution == ConflictResolution::UseExternal {
        RecordRepository::new(state.db_pool.clone())
            .apply_field(
                resolved.record_type,
                &resolved.record_id,
                &resolved.field,
                &resolved.external_value,
            )
            .await
            .map_err(internal)?;
    }

    Ok(Json(conflict_view(resolved)))
}

async fn list_mappings(
    State(state): State<SyncApiState>,
    headers: HeaderMap,
) -> Result<Json<Vec<MappingView>>, Rejection> {
    let user_id = require_user(&headers, &state.db_pool).await?;
    let mappings = FieldMappingRepository::new(state.db_pool.clone())
        .list(&user_id)
        .await
        .map_err(internal)?;
    let views = mappings
        .into_iter()
        .map(|mapping| MappingView {
            id: mapping.id,
            entity_type: mapping.entity_type.as_str(),
            local_field: mapping.local_field.as_str(),
            external_field: mapping.external_field.key(),
            direction: mapping.direction.as_str(),
            enabled: mapping.enabled,
        })
        .collect();
    Ok(Json(views))
}

async fn upsert_mapping(
    State(state): State<SyncApiState>,
    headers: HeaderMap,
    Json(payload): Json<MappingPayload>,
) -> Result<(StatusCode, Json<Vec<MappingView>>), Rejection> {
    let user_id = require_user(&headers, &state.db_pool).await?;

    let entity = SyncEntityType::parse(&payload.entity_type)
        .ok_or_else(|| bad_request(format!("unknown entity type `{}`", payload.entity_type)))?;
    let local_field = LocalField::parse(entity, &payload.local_field).ok_or_else(|| {
        bad_request(format!("`{}` is not a {entity} field", payload.local_field))
    })?;
    let external_field = ExternalField::parse(entity, &payload.external_field).ok_or_else(|| {
        bad_request(format!(
            "`{}` is not a supported {entity} attribute",
            payload.external_field
        ))
    })?;
    let direction = match &payload.direction {
        Some(raw) => MappingDirection::parse(raw)
            .ok_or_else(|| bad_request(format!("unknown direction `{raw}`")))?,
        None => MappingDirection::FromExternal,
    };

    let repository = FieldMappingRepository::new(state.db_pool.clone());
    repository
        .upsert(
            &user_id,
            entity,
            local_field,
            external_field,
            direction,
            payload.enabled.unwrap_or(true),
        )
        .await
        .map_err(internal)?;

    let views = repository
        .list(&user_id)
        .await
        .map_err(internal)?
        .into_iter()
        .map(|mapping| MappingView {
            id: mapping.id,
            entity_type: mapping.entity_type.as_str(),
            local_field: mapping.local_field.as_str(),
            external_field: mapping.external_field.key(),
            direction: mapping.direction.as_str(),
            enabled: mapping.enabled,
        })
        .collect();
    Ok((StatusCode::OK, Json(views)))
}

fn parse_invocation(payload: &SyncInvocation) -> Result<SyncRequest, String> {
    let action = match &payload.action {
        Some(raw) => SyncAction::parse(raw).ok_or_else(|| format!("unknown action `{raw}`"))?,
        None => SyncAction::Sync,
    };
    let scope = match &payload.entity_type {
        Some(raw) => {
            SyncScope::parse(raw).ok_or_else(|| format!("unknown entity type `{raw}`"))?
        }
        None => SyncScope::All,
    };
    if payload.batch_size == Some(0) {
        return Err("batch_size must be positive".to_string());
    }
    if payload.max_pages == Some(0) {
        return Err("max_pages must be positive".to_string());
    }

    Ok(SyncRequest {
        action,
        scope,
        full_sync: payload.full_sync,
        batch_size: payload.batch_size,
        max_pages: payload.max_pages,
    })
}

fn parse_resolution(raw: &str) -> Result<ConflictResolution, String> {
    match ConflictResolution::parse(raw) {
        Some(ConflictResolution::Pending) | None => {
            Err(format!("resolution must be `use_local` or `use_external`, got `{raw}`"))
        }
        Some(resolution) => Ok(resolution),
    }
}

fn run_view(run: freightdesk_db::repositories::SyncRunRow) -> RunView {
    RunView {
        id: run.id,
        sync_type: run.sync_type,
        status: run.status,
        records_processed: run.records_processed,
        records_success: run.records_success,
        records_failed: run.records_failed,
        error_details: run.error_details,
        started_at: run.started_at,
        completed_at: run.completed_at,
    }
}

fn conflict_view(conflict: ConflictRow) -> ConflictView {
    ConflictView {
        id: conflict.id,
        record_type: conflict.record_type.as_str(),
        record_id: conflict.record_id,
        field: conflict.field,
        local_value: conflict.local_value,
        external_value: conflict.external_value,
        resolution: conflict.resolution.as_str(),
        created_at: conflict.created_at,
        resolved_at: conflict.resolved_at,
    }
}

async fn require_user(headers: &HeaderMap, pool: &DbPool) -> Result<String, Rejection> {
    let token = bearer_token(headers).ok_or_else(|| unauthorized("missing bearer token"))?;

    let row = sqlx::query("SELECT user_id, expires_at FROM user_session WHERE token = ?")
        .bind(token)
        .fetch_optional(pool)
        .await
        .map_err(internal)?
        .ok_or_else(|| unauthorized("invalid session token"))?;

    if let Some(expires_at) = row.try_get::<Option<String>, _>("expires_at").map_err(internal)? {
        let expired = DateTime::parse_from_rfc3339(&expires_at)
            .map(|expiry| expiry.with_timezone(&Utc) <= Utc::now())
            .unwrap_or(true);
        if expired {
            return Err(unauthorized("session expired"));
        }
    }

    row.try_get::<String, _>("user_id").map_err(internal)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn reject_sync_error(error: SyncError) -> Rejection {
    match error {
        SyncError::RunInProgress => {
            (StatusCode::CONFLICT, Json(ApiError { error: error.to_string() }))
        }
        SyncError::ExportUnsupported => {
            (StatusCode::BAD_REQUEST, Json(ApiError { error: error.to_string() }))
        }
        other => internal(other),
    }
}

fn bad_request(message: impl Into<String>) -> Rejection {
    (StatusCode::BAD_REQUEST, Json(ApiError { error: message.into() }))
}

fn unauthorized(message: impl Into<String>) -> Rejection {
    (StatusCode::UNAUTHORIZED, Json(ApiError { error: message.into() }))
}

fn not_found(message: impl Into<String>) -> Rejection {
    (StatusCode::NOT_FOUND, Json(ApiError { error: message.into() }))
}

fn internal(error: impl std::fmt::Display) -> Rejection {
    error!(error = %error, "sync api request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, Json(ApiError { error: "internal error".to_string() }))
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, HeaderValue, StatusCode};
    use chrono::{Duration, Utc};

    use freightdesk_core::{SyncAction, SyncEntityType, SyncScope};
    use freightdesk_db::{connect_with_settings, migrations, DbPool};

    use super::{bearer_token, parse_invocation, parse_resolution, require_user, SyncInvocation};

    async fn setup() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    async fn seed_session(pool: &DbPool, token: &str, user_id: &str, expires_in_secs: Option<i64>) {
        let expires_at = expires_in_secs
            .map(|seconds| (Utc::now() + Duration::seconds(seconds)).to_rfc3339());
        sqlx::query("INSERT INTO user_session (token, user_id, expires_at) VALUES (?, ?, ?)")
            .bind(token)
            .bind(user_id)
            .bind(expires_at)
            .execute(pool)
            .await
            .expect("seed session");
    }

    fn auth_headers(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {token}")).expect("header value"),
        );
        headers
    }

    #[test]
    fn invocation_defaults_to_a_sync_of_everything() {
        let request = parse_invocation(&SyncInvocation::default()).expect("parse");
        assert_eq!(request.action, SyncAction::Sync);
        assert_eq!(request.scope, SyncScope::All);
        assert!(!request.full_sync);
        assert!(request.batch_size.is_none());
    }

    #[test]
    fn invocation_accepts_scoped_full_imports() {
        let payload = SyncInvocation {
            action: Some("full_import".to_string()),
            entity_type: Some("invoices".to_string()),
            full_sync: false,
            batch_size: Some(25),
            max_pages: Some(10),
        };
        let request = parse_invocation(&payload).expect("parse");
        assert_eq!(request.action, SyncAction::FullImport);
        assert_eq!(request.scope, SyncScope::One(SyncEntityType::Invoice));
        assert_eq!(request.batch_size, Some(25));
    }

    #[test]
    fn invocation_rejects_unknown_values() {
        let bad_action =
            SyncInvocation { action: Some("purge".to_string()), ..SyncInvocation::default() };
        assert!(parse_invocation(&bad_action).is_err());

        let bad_entity = SyncInvocation {
            entity_type: Some("widgets".to_string()),
            ..SyncInvocation::default()
        };
        assert!(parse_invocation(&bad_entity).is_err());

        let zero_batch =
            SyncInvocation { batch_size: Some(0), ..SyncInvocation::default() };
        assert!(parse_invocation(&zero_batch).is_err());
    }

    #[test]
    fn resolution_must_be_a_decision() {
        assert!(parse_resolution("use_local").is_ok());
        assert!(parse_resolution("use_external").is_ok());
        assert!(parse_resolution("pending").is_err());
        assert!(parse_resolution("merge").is_err());
    }

    #[test]
    fn bearer_token_requires_the_scheme() {
        let headers = auth_headers("tok-1");
        assert_eq!(bearer_token(&headers), Some("tok-1"));

        let mut basic = HeaderMap::new();
        basic.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&basic), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn sessions_resolve_to_their_user() {
        let pool = setup().await;
        seed_session(&pool, "tok-live", "user-9", Some(3600)).await;
        seed_session(&pool, "tok-forever", "user-10", None).await;

        let user = require_user(&auth_headers("tok-live"), &pool).await.expect("live session");
        assert_eq!(user, "user-9");

        // A session without an expiry never expires.
        let user =
            require_user(&auth_headers("tok-forever"), &pool).await.expect("open session");
        assert_eq!(user, "user-10");
    }

    #[tokio::test]
    async fn expired_or_unknown_sessions_are_rejected() {
        let pool = setup().await;
        seed_session(&pool, "tok-old", "user-9", Some(-60)).await;

        let (status, _) = require_user(&auth_headers("tok-old"), &pool)
            .await
            .expect_err("expired session");
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = require_user(&auth_headers("tok-missing"), &pool)
            .await
            .expect_err("unknown token");
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) =
            require_user(&HeaderMap::new(), &pool).await.expect_err("missing header");
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
