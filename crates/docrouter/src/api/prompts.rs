use super::{ApiError, Request};
use crate::app::App;
use crate::auth;
use crate::workers::llm_worker::DEFAULT_PROMPT_CONTENT;
use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use models::{Id, Principal, RevisionKey};
use std::sync::Arc;
use validator::Validate;

#[derive(Debug, serde::Deserialize, Validate)]
pub struct PromptConfig {
    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub schema_id: Option<Id>,
    #[serde(default)]
    pub schema_version: Option<i32>,
    #[serde(default)]
    pub tag_ids: Vec<Id>,
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

/// A prompt as returned by the API. Identifier fields are strings because
/// the implicit default prompt is exposed with the literal `"default"`.
#[derive(Debug, serde::Serialize)]
pub struct Prompt {
    pub prompt_revid: String,
    pub prompt_id: String,
    pub name: String,
    pub prompt_version: i32,
    pub content: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<Id>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<i32>,
    pub tag_ids: Vec<Id>,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<Id>,
}

impl From<docrouter_sql::prompts::Revision> for Prompt {
    fn from(row: docrouter_sql::prompts::Revision) -> Self {
        Self {
            prompt_revid: row.prompt_revid.to_string(),
            prompt_id: row.prompt_id.to_string(),
            name: row.name,
            prompt_version: row.prompt_version,
            content: row.content,
            model: row.model,
            schema_id: row.schema_id,
            schema_version: row.schema_version,
            tag_ids: row.tag_ids,
            created_at: row.created_at,
            created_by: Some(row.created_by),
        }
    }
}

/// The synthetic entry describing the implicit default prompt.
fn default_prompt_entry() -> Prompt {
    Prompt {
        prompt_revid: RevisionKey::DEFAULT_LITERAL.to_string(),
        prompt_id: RevisionKey::DEFAULT_LITERAL.to_string(),
        name: "Default Prompt".to_string(),
        prompt_version: 0,
        content: DEFAULT_PROMPT_CONTENT.to_string(),
        model: default_model(),
        schema_id: None,
        schema_version: None,
        tag_ids: Vec::new(),
        created_at: chrono::DateTime::<Utc>::UNIX_EPOCH,
        created_by: None,
    }
}

/// Resolve and pin a prompt's schema binding: a bare `schema_id` pins the
/// latest schema version at write time; an explicit pair must exist.
async fn validate_and_resolve_schema(
    app: &App,
    organization_id: Id,
    config: &mut PromptConfig,
) -> Result<(), ApiError> {
    let Some(schema_id) = config.schema_id else {
        config.schema_version = None;
        return Ok(());
    };

    match config.schema_version {
        Some(version) => {
            docrouter_sql::schemas::fetch_version(&app.pg_pool, organization_id, schema_id, version)
                .await?
                .ok_or_else(|| {
                    ApiError::new(
                        axum::http::StatusCode::NOT_FOUND,
                        anyhow::anyhow!(
                            "Schema with ID {schema_id} version {version} not found"
                        ),
                    )
                })?;
        }
        None => {
            let latest =
                docrouter_sql::schemas::fetch_latest(&app.pg_pool, organization_id, schema_id)
                    .await?
                    .ok_or_else(|| {
                        ApiError::new(
                            axum::http::StatusCode::NOT_FOUND,
                            anyhow::anyhow!("Schema with ID {schema_id} not found"),
                        )
                    })?;
            config.schema_version = Some(latest.schema_version);
        }
    }
    Ok(())
}

async fn validate_model(app: &App, model: &str) -> Result<(), ApiError> {
    let registry = app.registry().await?;
    if registry.find_model(model).is_none() {
        return Err(ApiError::bad_request(anyhow::anyhow!(
            "Invalid model: {model}"
        )));
    }
    Ok(())
}

pub async fn create(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path(organization_id): Path<Id>,
    Request(mut body): Request<PromptConfig>,
) -> Result<Json<Prompt>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;

    validate_and_resolve_schema(&app, organization_id, &mut body).await?;
    validate_model(&app, &body.model).await?;
    super::require_valid_tags(&app, organization_id, &body.tag_ids).await?;

    let config = docrouter_sql::prompts::Config {
        content: body.content.clone(),
        model: body.model.clone(),
        schema_id: body.schema_id,
        schema_version: body.schema_version,
        tag_ids: body.tag_ids.clone(),
    };
    let row = docrouter_sql::prompts::create(
        &app.pg_pool,
        app.next_id(),
        app.next_id(),
        organization_id,
        &body.name,
        &config,
        principal.user_id,
    )
    .await?;

    tracing::info!(prompt_id = %row.prompt_id, version = row.prompt_version, "prompt created");
    Ok(Json(row.into()))
}

#[derive(Debug, serde::Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "super::default_limit")]
    pub limit: i64,
    /// Restrict to prompts applicable to this document's tags.
    pub document_id: Option<Id>,
    /// Comma-separated tag ids the prompt must all carry.
    pub tag_ids: Option<String>,
    pub name_search: Option<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct ListResponse {
    pub prompts: Vec<Prompt>,
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

    let intersect_tags = match query.document_id {
        Some(document_id) => {
            let doc =
                docrouter_sql::documents::fetch(&app.pg_pool, organization_id, document_id)
                    .await?
                    .ok_or_else(|| ApiError::not_found("document"))?;
            if doc.tag_ids.is_empty() {
                // An untagged document is served by the default prompt alone.
                return Ok(Json(ListResponse {
                    prompts: vec![default_prompt_entry()],
                    total_count: 1,
                    skip: query.skip,
                }));
            }
            Some(doc.tag_ids)
        }
        None => None,
    };

    let filter_tags = query
        .tag_ids
        .as_deref()
        .map(super::parse_tag_ids)
        .transpose()?;

    let (rows, total_count) = docrouter_sql::prompts::list_latest(
        &app.pg_pool,
        organization_id,
        docrouter_sql::prompts::ListFilter {
            name_search: query.name_search.as_deref(),
            tag_ids: filter_tags.as_deref(),
            intersects_tags: intersect_tags.as_deref(),
        },
        query.skip,
        query.limit,
    )
    .await?;

    Ok(Json(ListResponse {
        prompts: rows.into_iter().map(Into::into).collect(),
        total_count,
        skip: query.skip,
    }))
}

/// Fetch one prompt revision by its revision id (or the literal "default").
pub async fn fetch(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path((organization_id, prompt_revid)): Path<(Id, String)>,
) -> Result<Json<Prompt>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;

    if prompt_revid == RevisionKey::DEFAULT_LITERAL {
        return Ok(Json(default_prompt_entry()));
    }
    let revid: Id = prompt_revid
        .parse()
        .map_err(|_| ApiError::bad_request(anyhow::anyhow!("invalid prompt_revid")))?;

    let row = docrouter_sql::prompts::fetch_by_revid(&app.pg_pool, organization_id, revid)
        .await?
        .ok_or_else(|| ApiError::not_found("prompt"))?;
    Ok(Json(row.into()))
}

/// Update a prompt by its stable logical id.
pub async fn update(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path((organization_id, prompt_id)): Path<(Id, Id)>,
    Request(mut body): Request<PromptConfig>,
) -> Result<Json<Prompt>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;

    validate_and_resolve_schema(&app, organization_id, &mut body).await?;
    validate_model(&app, &body.model).await?;
    super::require_valid_tags(&app, organization_id, &body.tag_ids).await?;

    let config = docrouter_sql::prompts::Config {
        content: body.content.clone(),
        model: body.model.clone(),
        schema_id: body.schema_id,
        schema_version: body.schema_version,
        tag_ids: body.tag_ids.clone(),
    };
    let row = docrouter_sql::prompts::update(
        &app.pg_pool,
        app.next_id(),
        organization_id,
        prompt_id,
        &body.name,
        &config,
        principal.user_id,
    )
    .await?;
    Ok(Json(row.into()))
}

#[derive(Debug, serde::Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Delete a prompt (all revisions) by its stable logical id.
pub async fn delete(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path((organization_id, prompt_id)): Path<(Id, Id)>,
) -> Result<Json<MessageResponse>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;

    docrouter_sql::prompts::delete(&app.pg_pool, organization_id, prompt_id).await?;
    Ok(Json(MessageResponse {
        message: "Prompt deleted".to_string(),
    }))
}
