use super::{ApiError, Request};
use crate::app::App;
use crate::auth;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use models::{Credential, Id, Operation, Principal};
use std::sync::Arc;
use validator::Validate;

#[derive(Debug, serde::Deserialize, Validate)]
pub struct LogRequest {
    #[serde(default)]
    pub hook_data: serde_json::Value,
    pub transcript_records: Vec<serde_json::Value>,
    /// Client-side upload timestamp, ISO-8601; a malformed value falls
    /// back to the server clock.
    #[serde(default)]
    pub upload_timestamp: Option<String>,
}

/// Claude ingest endpoints resolve their organization from the bearer
/// token alone: only org-scoped access tokens may feed this plane.
fn require_token_org(principal: &Principal) -> Result<Id, ApiError> {
    match principal.credential {
        Credential::OrgToken(org_id) => Ok(org_id),
        _ => Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            anyhow::anyhow!("token is not associated with an organization"),
        )),
    }
}

fn parse_upload_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|raw| {
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|ts| ts.with_timezone(&Utc))
    })
    .unwrap_or_else(Utc::now)
}

/// Index of the first record to insert: everything at or before the last
/// already-stored uuid is a duplicate of a previous upload. The scan runs
/// backward to find the newest known record, then insertion proceeds
/// forward from the next one.
pub async fn first_new_record(
    app: &App,
    organization_id: Id,
    records: &[serde_json::Value],
) -> Result<usize, ApiError> {
    for idx in (0..records.len()).rev() {
        let Some(uuid) = records[idx].get("uuid").and_then(|v| v.as_str()) else {
            continue;
        };
        if docrouter_sql::claude::log_uuid_exists(&app.pg_pool, organization_id, uuid).await? {
            return Ok(idx + 1);
        }
    }
    Ok(0)
}

pub async fn ingest_log(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Request(body): Request<LogRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let organization_id = require_token_org(&principal)?;
    let upload_timestamp = parse_upload_timestamp(body.upload_timestamp.as_deref());

    let start = first_new_record(&app, organization_id, &body.transcript_records).await?;
    let to_save = body.transcript_records.len() - start;

    if to_save > 0 {
        ledger::check_spu(&app.pg_pool, organization_id, 1.0).await?;
    }

    for record in &body.transcript_records[start..] {
        let record_uuid = record.get("uuid").and_then(|v| v.as_str());
        docrouter_sql::claude::insert_log(
            &app.pg_pool,
            app.next_id(),
            organization_id,
            &body.hook_data,
            record,
            record_uuid,
            upload_timestamp,
        )
        .await?;
    }

    if to_save > 0 {
        ledger::record_spu(
            &app.pg_pool,
            organization_id,
            ledger::cost::CLAUDE_BATCH_SPUS,
            Operation::ClaudeLog,
            "claude",
        )
        .await?;
    }

    tracing::info!(%organization_id, saved = to_save, "claude logs ingested");
    Ok(Json(serde_json::json!({
        "log_id": format!("batch_{to_save}_records"),
    })))
}

#[derive(Debug, serde::Deserialize, Validate)]
pub struct HookRequest {
    pub hook_data: serde_json::Value,
    #[serde(default)]
    pub hook_timestamp: Option<String>,
}

pub async fn ingest_hook(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Request(body): Request<HookRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let organization_id = require_token_org(&principal)?;
    let hook_timestamp = parse_upload_timestamp(body.hook_timestamp.as_deref());

    ledger::check_spu(&app.pg_pool, organization_id, 1.0).await?;

    let id = app.next_id();
    docrouter_sql::claude::insert_hook(
        &app.pg_pool,
        id,
        organization_id,
        &body.hook_data,
        hook_timestamp,
    )
    .await?;

    ledger::record_spu(
        &app.pg_pool,
        organization_id,
        ledger::cost::CLAUDE_BATCH_SPUS,
        Operation::ClaudeHook,
        "claude",
    )
    .await?;

    Ok(Json(serde_json::json!({ "hook_id": id })))
}

#[derive(Debug, serde::Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "super::default_limit")]
    pub limit: i64,
    pub session_id: Option<String>,
}

pub async fn list_logs(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path(organization_id): Path<Id>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;

    let (rows, total) = docrouter_sql::claude::list_logs(
        &app.pg_pool,
        organization_id,
        query.session_id.as_deref(),
        query.skip,
        query.limit,
    )
    .await?;

    let logs: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|row| {
            serde_json::json!({
                "log_id": row.id,
                "hook_data": row.hook_data.0,
                "transcript_record": row.transcript_record.0,
                "upload_timestamp": row.upload_timestamp,
            })
        })
        .collect();

    Ok(Json(serde_json::json!({
        "logs": logs,
        "total": total,
        "skip": query.skip,
        "limit": query.limit,
    })))
}

pub async fn list_hooks(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path(organization_id): Path<Id>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;

    let (rows, total) = docrouter_sql::claude::list_hooks(
        &app.pg_pool,
        organization_id,
        query.skip,
        query.limit,
    )
    .await?;

    let hooks: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|row| {
            serde_json::json!({
                "hook_id": row.id,
                "hook_data": row.hook_data.0,
                "hook_timestamp": row.hook_timestamp,
            })
        })
        .collect();

    Ok(Json(serde_json::json!({
        "hooks": hooks,
        "total": total,
        "skip": query.skip,
        "limit": query.limit,
    })))
}

#[cfg(test)]
mod test {
    use super::parse_upload_timestamp;
    use chrono::{DateTime, Utc};

    #[test]
    fn test_timestamp_parsing_is_lenient() {
        let parsed = parse_upload_timestamp(Some("2025-01-15T23:00:00Z"));
        assert_eq!(
            parsed,
            "2025-01-15T23:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );

        // Offset timestamps normalize to UTC.
        let parsed = parse_upload_timestamp(Some("2025-01-16T01:00:00+02:00"));
        assert_eq!(
            parsed,
            "2025-01-15T23:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );

        // Garbage and absence fall back to the server clock.
        let before = Utc::now();
        let parsed = parse_upload_timestamp(Some("not-a-timestamp"));
        assert!(parsed >= before);
        let parsed = parse_upload_timestamp(None);
        assert!(parsed >= before);
    }
}
