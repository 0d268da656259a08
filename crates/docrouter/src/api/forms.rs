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
pub struct FormConfig {
    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,
    /// The form definition and its extraction mapping:
    /// `{json_formio, json_formio_mapping}`, stored verbatim.
    pub response_format: serde_json::Value,
    #[serde(default)]
    pub tag_ids: Vec<Id>,
}

#[derive(Debug, serde::Serialize)]
pub struct Form {
    pub form_revid: Id,
    pub form_id: Id,
    pub name: String,
    pub form_version: i32,
    pub response_format: serde_json::Value,
    pub tag_ids: Vec<Id>,
    pub created_at: DateTime<Utc>,
    pub created_by: Id,
}

impl From<docrouter_sql::forms::Revision> for Form {
    fn from(row: docrouter_sql::forms::Revision) -> Self {
        Self {
            form_revid: row.form_revid,
            form_id: row.form_id,
            name: row.name,
            form_version: row.form_version,
            response_format: row.response_format.0,
            tag_ids: row.tag_ids,
            created_at: row.created_at,
            created_by: row.created_by,
        }
    }
}

pub async fn create(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path(organization_id): Path<Id>,
    Request(body): Request<FormConfig>,
) -> Result<Json<Form>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;
    super::require_valid_tags(&app, organization_id, &body.tag_ids).await?;

    let row = docrouter_sql::forms::create(
        &app.pg_pool,
        app.next_id(),
        app.next_id(),
        organization_id,
        &body.name,
        &body.response_format,
        &body.tag_ids,
        principal.user_id,
    )
    .await?;
    Ok(Json(row.into()))
}

#[derive(Debug, serde::Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "super::default_limit")]
    pub limit: i64,
    pub tag_ids: Option<String>,
    pub name_search: Option<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct ListResponse {
    pub forms: Vec<Form>,
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

    let tag_ids = query
        .tag_ids
        .as_deref()
        .map(super::parse_tag_ids)
        .transpose()?;

    let (rows, total_count) = docrouter_sql::forms::list_latest(
        &app.pg_pool,
        organization_id,
        query.name_search.as_deref(),
        tag_ids.as_deref(),
        query.skip,
        query.limit,
    )
    .await?;

    Ok(Json(ListResponse {
        forms: rows.into_iter().map(Into::into).collect(),
        total_count,
        skip: query.skip,
    }))
}

/// Fetch one form revision by its revision id.
pub async fn fetch(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path((organization_id, form_revid)): Path<(Id, Id)>,
) -> Result<Json<Form>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;

    let row = docrouter_sql::forms::fetch_by_revid(&app.pg_pool, organization_id, form_revid)
        .await?
        .ok_or_else(|| ApiError::not_found("form"))?;
    Ok(Json(row.into()))
}

/// Update a form by its stable logical id.
pub async fn update(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path((organization_id, form_id)): Path<(Id, Id)>,
    Request(body): Request<FormConfig>,
) -> Result<Json<Form>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;
    super::require_valid_tags(&app, organization_id, &body.tag_ids).await?;

    let row = docrouter_sql::forms::update(
        &app.pg_pool,
        app.next_id(),
        organization_id,
        form_id,
        &body.name,
        &body.response_format,
        &body.tag_ids,
        principal.user_id,
    )
    .await?;
    Ok(Json(row.into()))
}

#[derive(Debug, serde::Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Delete a form (all revisions) by its stable logical id.
pub async fn delete(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path((organization_id, form_id)): Path<(Id, Id)>,
) -> Result<Json<MessageResponse>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;

    docrouter_sql::forms::delete(&app.pg_pool, organization_id, form_id).await?;
    Ok(Json(MessageResponse {
        message: "Form deleted".to_string(),
    }))
}

#[derive(Debug, serde::Deserialize, Validate)]
pub struct SubmitRequest {
    pub form_revid: Id,
    pub submission_data: serde_json::Value,
}

#[derive(Debug, serde::Serialize)]
pub struct Submission {
    pub id: Id,
    pub document_id: Id,
    pub form_revid: Id,
    pub submission_data: serde_json::Value,
    pub submitted_by: Id,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<docrouter_sql::forms::Submission> for Submission {
    fn from(row: docrouter_sql::forms::Submission) -> Self {
        Self {
            id: row.id,
            document_id: row.document_id,
            form_revid: row.form_revid,
            submission_data: row.submission_data.0,
            submitted_by: row.submitted_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Submit a form for a document. An existing submission for the same
/// `(document, form revision)` pair is replaced.
pub async fn submit(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path((organization_id, document_id)): Path<(Id, Id)>,
    Request(body): Request<SubmitRequest>,
) -> Result<Json<Submission>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;

    docrouter_sql::documents::fetch(&app.pg_pool, organization_id, document_id)
        .await?
        .ok_or_else(|| ApiError::not_found("document"))?;
    docrouter_sql::forms::fetch_by_revid(&app.pg_pool, organization_id, body.form_revid)
        .await?
        .ok_or_else(|| ApiError::not_found("form revision"))?;

    let row = docrouter_sql::forms::upsert_submission(
        &app.pg_pool,
        app.next_id(),
        organization_id,
        document_id,
        body.form_revid,
        &body.submission_data,
        principal.user_id,
    )
    .await?;
    Ok(Json(row.into()))
}

#[derive(Debug, serde::Deserialize)]
pub struct SubmissionQuery {
    pub form_revid: Id,
}

pub async fn get_submission(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path((organization_id, document_id)): Path<(Id, Id)>,
    Query(query): Query<SubmissionQuery>,
) -> Result<Json<Submission>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;

    let row = docrouter_sql::forms::fetch_submission(
        &app.pg_pool,
        organization_id,
        document_id,
        query.form_revid,
    )
    .await?
    .ok_or_else(|| ApiError::not_found("form submission"))?;
    Ok(Json(row.into()))
}

pub async fn delete_submission(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path((organization_id, document_id)): Path<(Id, Id)>,
    Query(query): Query<SubmissionQuery>,
) -> Result<Json<MessageResponse>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;

    let deleted = docrouter_sql::forms::delete_submission(
        &app.pg_pool,
        organization_id,
        document_id,
        query.form_revid,
    )
    .await?;
    if !deleted {
        return Err(ApiError::not_found("form submission"));
    }
    Ok(Json(MessageResponse {
        message: "Form submission deleted".to_string(),
    }))
}
