use super::{ApiError, Pagination, Request};
use crate::app::App;
use crate::auth;
use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use models::{Id, Principal};
use std::sync::Arc;
use validator::Validate;

#[derive(Debug, serde::Deserialize, Validate)]
pub struct TagConfig {
    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,
    /// Display color, e.g. `#FF5722`.
    pub color: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct Tag {
    pub id: Id,
    pub name: String,
    pub color: Option<String>,
    pub description: Option<String>,
    pub created_by: Id,
    pub created_at: DateTime<Utc>,
}

impl From<docrouter_sql::tags::Row> for Tag {
    fn from(row: docrouter_sql::tags::Row) -> Self {
        Self {
            id: row.id,
            name: row.name,
            color: row.color,
            description: row.description,
            created_by: row.created_by,
            created_at: row.created_at,
        }
    }
}

pub async fn create(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path(organization_id): Path<Id>,
    Request(body): Request<TagConfig>,
) -> Result<Json<Tag>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;

    let row = docrouter_sql::tags::insert(
        &app.pg_pool,
        app.next_id(),
        organization_id,
        &body.name,
        body.color.as_deref(),
        body.description.as_deref(),
        principal.user_id,
    )
    .await?;
    Ok(Json(row.into()))
}

#[derive(Debug, serde::Serialize)]
pub struct ListResponse {
    pub tags: Vec<Tag>,
    pub total_count: i64,
    pub skip: i64,
}

pub async fn list(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path(organization_id): Path<Id>,
    Query(page): Query<Pagination>,
) -> Result<Json<ListResponse>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;

    let (rows, total_count) =
        docrouter_sql::tags::list(&app.pg_pool, organization_id, page.skip, page.limit).await?;
    Ok(Json(ListResponse {
        tags: rows.into_iter().map(Into::into).collect(),
        total_count,
        skip: page.skip,
    }))
}

pub async fn update(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path((organization_id, tag_id)): Path<(Id, Id)>,
    Request(body): Request<TagConfig>,
) -> Result<Json<Tag>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;

    let row = docrouter_sql::tags::update(
        &app.pg_pool,
        organization_id,
        tag_id,
        Some(&body.name),
        body.color.as_deref(),
        body.description.as_deref(),
    )
    .await?
    .ok_or_else(|| ApiError::not_found("tag"))?;
    Ok(Json(row.into()))
}

#[derive(Debug, serde::Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Delete a tag. Refused while any document, prompt, form, or telemetry
/// record references it; the error names what still refers to it.
pub async fn delete(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path((organization_id, tag_id)): Path<(Id, Id)>,
) -> Result<Json<MessageResponse>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;

    docrouter_sql::tags::fetch(&app.pg_pool, organization_id, tag_id)
        .await?
        .ok_or_else(|| ApiError::not_found("tag"))?;

    let mut referrers = Vec::new();
    let docs = docrouter_sql::documents::count_with_tag(&app.pg_pool, organization_id, tag_id)
        .await?;
    if docs > 0 {
        referrers.push(format!("{docs} document(s)"));
    }
    let prompts =
        docrouter_sql::prompts::count_with_tag(&app.pg_pool, organization_id, tag_id).await?;
    if prompts > 0 {
        referrers.push(format!("{prompts} prompt(s)"));
    }
    let forms = docrouter_sql::forms::count_with_tag(&app.pg_pool, organization_id, tag_id).await?;
    if forms > 0 {
        referrers.push(format!("{forms} form(s)"));
    }
    let telemetry =
        docrouter_sql::telemetry::count_with_tag(&app.pg_pool, organization_id, tag_id).await?;
    if telemetry > 0 {
        referrers.push(format!("{telemetry} telemetry record(s)"));
    }

    if !referrers.is_empty() {
        return Err(ApiError::bad_request(anyhow::anyhow!(
            "tag is still referenced by {}",
            referrers.join(", ")
        )));
    }

    docrouter_sql::tags::delete(&app.pg_pool, organization_id, tag_id).await?;
    Ok(Json(MessageResponse {
        message: "Tag deleted".to_string(),
    }))
}
