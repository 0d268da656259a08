use crate::app::App;
use crate::auth;
use axum::routing::{get, post};
use std::sync::Arc;

mod account;
mod claude;
mod documents;
mod error;
mod forms;
mod llm_api;
mod ocr_api;
mod payments;
mod prompts;
mod schemas;
mod tags;
mod telemetry;
mod tokens;

pub use error::{ApiError, ApiErrorExt};

/// Request wraps a JSON-deserialized request type T which also implements
/// the validator::Validate trait.
#[derive(Debug, Clone, Copy, Default)]
pub struct Request<T>(pub T);

/// Rejection is an error type of reasons why an API request may fail
/// before reaching its handler.
#[derive(Debug, thiserror::Error)]
pub enum Rejection {
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    JsonError(#[from] axum::extract::rejection::JsonRejection),
}

#[axum::async_trait]
impl<T, S> axum::extract::FromRequest<S> for Request<T>
where
    T: serde::de::DeserializeOwned + validator::Validate,
    S: Send + Sync,
    axum::extract::Json<T>:
        axum::extract::FromRequest<S, Rejection = axum::extract::rejection::JsonRejection>,
{
    type Rejection = ApiError;

    async fn from_request(
        req: axum::extract::Request,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let axum::extract::Json(value) = axum::extract::Json::<T>::from_request(req, state)
            .await
            .map_err(Rejection::from)?;
        value.validate().map_err(Rejection::from)?;
        Ok(Request(value))
    }
}

/// Pagination query parameters shared by every list endpoint. List query
/// structs embed these two fields directly (not via `serde(flatten)`,
/// which the urlencoded deserializer cannot combine with numeric fields).
#[derive(Debug, Clone, Copy, serde::Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

pub(crate) fn default_limit() -> i64 {
    10
}

/// Parse a comma-separated list of tag ids, as carried by `tag_ids=` query
/// parameters.
pub fn parse_tag_ids(raw: &str) -> Result<Vec<models::Id>, ApiError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse().map_err(|_| {
                ApiError::bad_request(anyhow::anyhow!("invalid tag id {s:?}"))
            })
        })
        .collect()
}

/// Validate that every tag id names a tag of the organization, answering
/// 400 with the invalid ids otherwise.
pub async fn require_valid_tags(
    app: &App,
    organization_id: models::Id,
    tag_ids: &[models::Id],
) -> Result<(), ApiError> {
    let invalid = docrouter_sql::tags::find_invalid(&app.pg_pool, organization_id, tag_ids).await?;
    if !invalid.is_empty() {
        let invalid: Vec<String> = invalid.iter().map(|id| id.to_string()).collect();
        return Err(ApiError::bad_request(anyhow::anyhow!(
            "Invalid tag IDs: {}",
            invalid.join(", ")
        )));
    }
    Ok(())
}

/// Build the full `/v0` API router.
pub fn build_router(app: Arc<App>, allow_origin: &[String]) -> anyhow::Result<axum::Router<()>> {
    use anyhow::Context;

    let allow_origin = allow_origin
        .iter()
        .map(|o| o.parse())
        .collect::<Result<Vec<_>, _>>()
        .context("failed to parse allowed origins")?;

    let cors = tower_http::cors::CorsLayer::new()
        .allow_methods(tower_http::cors::AllowMethods::mirror_request())
        .allow_origin(tower_http::cors::AllowOrigin::list(allow_origin))
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ]);

    let org_routes = axum::Router::new()
        .route(
            "/documents",
            post(documents::upload).get(documents::list),
        )
        .route(
            "/documents/:document_id",
            get(documents::fetch)
                .put(documents::update)
                .delete(documents::delete),
        )
        .route("/ocr/download/text/:document_id", get(ocr_api::text))
        .route("/ocr/download/blocks/:document_id", get(ocr_api::blocks))
        .route("/ocr/download/metadata/:document_id", get(ocr_api::metadata))
        .route("/llm/run", post(llm_api::chat))
        .route("/llm/run/:document_id", post(llm_api::run))
        .route(
            "/llm/result/:document_id",
            get(llm_api::get_result)
                .put(llm_api::update_result)
                .delete(llm_api::delete_result),
        )
        .route(
            "/llm/results/:document_id/download",
            get(llm_api::download_results),
        )
        .route("/schemas", post(schemas::create).get(schemas::list))
        .route(
            "/schemas/:id",
            get(schemas::fetch).put(schemas::update).delete(schemas::delete),
        )
        .route("/schemas/validate", post(schemas::validate))
        .route("/prompts", post(prompts::create).get(prompts::list))
        .route(
            "/prompts/:id",
            get(prompts::fetch).put(prompts::update).delete(prompts::delete),
        )
        .route("/tags", post(tags::create).get(tags::list))
        .route(
            "/tags/:tag_id",
            axum::routing::put(tags::update).delete(tags::delete),
        )
        .route("/forms", post(forms::create).get(forms::list))
        .route(
            "/forms/:id",
            get(forms::fetch).put(forms::update).delete(forms::delete),
        )
        .route(
            "/forms/submissions/:document_id",
            post(forms::submit)
                .get(forms::get_submission)
                .delete(forms::delete_submission),
        )
        .route(
            "/telemetry/traces",
            post(telemetry::upload_traces).get(telemetry::list_traces),
        )
        .route(
            "/telemetry/metrics",
            post(telemetry::upload_metrics).get(telemetry::list_metrics),
        )
        .route(
            "/telemetry/logs",
            post(telemetry::upload_logs).get(telemetry::list_logs),
        )
        .route("/payments/usage/range", get(payments::usage_range))
        .route("/claude/logs", get(claude::list_logs))
        .route("/claude/hooks", get(claude::list_hooks))
        .route(
            "/access_tokens",
            post(tokens::create_org_token).get(tokens::list_org_tokens),
        )
        .route("/access_tokens/:token_id", axum::routing::delete(tokens::delete_org_token));

    let router = axum::Router::new()
        .route(
            "/v0/account/llm/providers",
            get(account::list_providers).put(account::set_provider),
        )
        .route("/v0/account/llm/models", get(account::list_models))
        .route("/v0/account/llm/run", post(llm_api::chat_account))
        .route(
            "/v0/account/access_tokens",
            post(tokens::create_account_token).get(tokens::list_account_tokens),
        )
        .route(
            "/v0/account/access_tokens/:token_id",
            axum::routing::delete(tokens::delete_account_token),
        )
        .route("/v0/claude/log", post(claude::ingest_log))
        .route("/v0/claude/hook", post(claude::ingest_hook))
        .nest("/v0/orgs/:organization_id", org_routes)
        .layer(axum::middleware::from_fn_with_state(
            app.clone(),
            auth::authenticate,
        ))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app);

    Ok(router)
}
