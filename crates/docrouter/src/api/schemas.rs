use super::{ApiError, Request};
use crate::app::App;
use crate::auth;
use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use models::{Id, Principal};
use std::sync::Arc;
use validator::Validate;

#[derive(Debug, serde::Deserialize, Validate)]
pub struct SchemaConfig {
    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,
    /// A JSON-Schema document (2020-12 dialect), stored verbatim.
    pub response_format: serde_json::Value,
}

#[derive(Debug, serde::Serialize)]
pub struct Schema {
    pub schema_revid: Id,
    pub schema_id: Id,
    pub name: String,
    pub schema_version: i32,
    pub response_format: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub created_by: Id,
}

impl From<docrouter_sql::schemas::Revision> for Schema {
    fn from(row: docrouter_sql::schemas::Revision) -> Self {
        Self {
            schema_revid: row.schema_revid,
            schema_id: row.schema_id,
            name: row.name,
            schema_version: row.schema_version,
            response_format: row.response_format.0,
            created_at: row.created_at,
            created_by: row.created_by,
        }
    }
}

/// The JSON-Schema body within a stored `response_format`: either the
/// nested `json_schema.schema` of a structured-output wrapper, or the
/// value itself.
pub fn schema_body(response_format: &serde_json::Value) -> &serde_json::Value {
    response_format
        .pointer("/json_schema/schema")
        .unwrap_or(response_format)
}

fn require_valid_schema(response_format: &serde_json::Value) -> Result<(), ApiError> {
    jsonschema::validator_for(schema_body(response_format))
        .map_err(|err| ApiError::bad_request(anyhow::anyhow!("invalid JSON Schema: {err}")))?;
    Ok(())
}

pub async fn create(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path(organization_id): Path<Id>,
    Request(body): Request<SchemaConfig>,
) -> Result<Json<Schema>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;
    require_valid_schema(&body.response_format)?;

    let row = docrouter_sql::schemas::create(
        &app.pg_pool,
        app.next_id(),
        app.next_id(),
        organization_id,
        &body.name,
        &body.response_format,
        principal.user_id,
    )
    .await?;

    tracing::info!(schema_id = %row.schema_id, version = row.schema_version, "schema created");
    Ok(Json(row.into()))
}

#[derive(Debug, serde::Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "super::default_limit")]
    pub limit: i64,
    pub name_search: Option<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct ListResponse {
    pub schemas: Vec<Schema>,
    pub total_count: i64,
    pub skip: i64,
}

pub async fn list(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path(organization_id): Path<Id>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;

    let (rows, total_count) = docrouter_sql::schemas::list_latest(
        &app.pg_pool,
        organization_id,
        query.name_search.as_deref(),
        query.skip,
        query.limit,
    )
    .await?;

    Ok(Json(ListResponse {
        schemas: rows.into_iter().map(Into::into).collect(),
        total_count,
        skip: query.skip,
    }))
}

/// Fetch one schema revision by its revision id.
pub async fn fetch(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path((organization_id, schema_revid)): Path<(Id, Id)>,
) -> Result<Json<Schema>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;

    let row = docrouter_sql::schemas::fetch_by_revid(&app.pg_pool, organization_id, schema_revid)
        .await?
        .ok_or_else(|| ApiError::not_found("schema"))?;
    Ok(Json(row.into()))
}

/// Update a schema by its stable logical id.
pub async fn update(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path((organization_id, schema_id)): Path<(Id, Id)>,
    Request(body): Request<SchemaConfig>,
) -> Result<Json<Schema>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;
    require_valid_schema(&body.response_format)?;

    let row = docrouter_sql::schemas::update(
        &app.pg_pool,
        app.next_id(),
        organization_id,
        schema_id,
        &body.name,
        &body.response_format,
        principal.user_id,
    )
    .await?;
    Ok(Json(row.into()))
}

#[derive(Debug, serde::Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Delete a schema (all revisions) by its stable logical id.
pub async fn delete(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path((organization_id, schema_id)): Path<(Id, Id)>,
) -> Result<Json<MessageResponse>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;

    docrouter_sql::schemas::delete(&app.pg_pool, organization_id, schema_id).await?;
    Ok(Json(MessageResponse {
        message: "Schema deleted".to_string(),
    }))
}

#[derive(Debug, serde::Deserialize, Validate)]
pub struct ValidateRequest {
    pub schema_revid: Id,
    pub data: serde_json::Value,
}

#[derive(Debug, serde::Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Validate a candidate extraction against a stored schema revision.
/// Strictness is the schema's own: `additionalProperties: false` rejects
/// extra fields.
pub async fn validate(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path(organization_id): Path<Id>,
    Request(body): Request<ValidateRequest>,
) -> Result<Json<ValidateResponse>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;

    let row =
        docrouter_sql::schemas::fetch_by_revid(&app.pg_pool, organization_id, body.schema_revid)
            .await?
            .ok_or_else(|| ApiError::not_found("schema"))?;

    let validator = jsonschema::validator_for(schema_body(&row.response_format.0))
        .map_err(|err| anyhow::anyhow!("stored schema does not compile: {err}"))?;

    let errors: Vec<String> = validator
        .iter_errors(&body.data)
        .map(|err| err.to_string())
        .collect();

    Ok(Json(ValidateResponse {
        valid: errors.is_empty(),
        errors,
    }))
}

#[cfg(test)]
mod test {
    use super::schema_body;
    use serde_json::json;

    #[test]
    fn test_schema_body_unwraps_structured_output_wrapper() {
        let wrapped = json!({
            "type": "json_schema",
            "json_schema": {
                "name": "invoice",
                "schema": {"type": "object", "properties": {}},
                "strict": true,
            }
        });
        assert_eq!(
            schema_body(&wrapped),
            &json!({"type": "object", "properties": {}})
        );

        let bare = json!({"type": "object", "additionalProperties": false});
        assert_eq!(schema_body(&bare), &bare);
    }

    #[test]
    fn test_strict_schema_rejects_extra_properties() {
        let schema = json!({
            "type": "object",
            "properties": {
                "invoice_number": {"type": "string"},
                "total_amount": {"type": "number"},
            },
            "required": ["invoice_number"],
            "additionalProperties": false,
        });
        let validator = jsonschema::validator_for(&schema).unwrap();

        assert!(validator.is_valid(&json!({"invoice_number": "A-1", "total_amount": 10.0})));
        assert!(!validator.is_valid(&json!({"invoice_number": "A-1", "extra": "nope"})));
        assert!(!validator.is_valid(&json!({"total_amount": 10.0})));
    }
}
