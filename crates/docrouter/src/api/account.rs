use super::{ApiError, Request};
use crate::app::App;
use crate::auth;
use axum::extract::State;
use axum::{Extension, Json};
use models::Principal;
use std::sync::Arc;
use validator::Validate;

#[derive(Debug, serde::Serialize)]
pub struct ListProvidersResponse {
    pub providers: Vec<ProviderView>,
}

/// Provider configuration as shown to administrators. The credential is
/// never echoed back; only whether one is set.
#[derive(Debug, serde::Serialize)]
pub struct ProviderView {
    pub name: String,
    pub display_name: String,
    pub litellm_provider: String,
    pub litellm_models_available: Vec<llm::ModelSpec>,
    pub litellm_models_enabled: Vec<String>,
    pub enabled: bool,
    pub token_set: bool,
    pub token_created_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<llm::ProviderConfig> for ProviderView {
    fn from(p: llm::ProviderConfig) -> Self {
        Self {
            name: p.name,
            display_name: p.display_name,
            litellm_provider: p.litellm_provider,
            litellm_models_available: p.litellm_models_available,
            litellm_models_enabled: p.litellm_models_enabled,
            enabled: p.enabled,
            token_set: p.token.is_some(),
            token_created_at: p.token_created_at,
        }
    }
}

pub async fn list_providers(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<ListProvidersResponse>, ApiError> {
    auth::authorize_account_admin(&principal)?;

    let registry = app.registry().await?;
    Ok(Json(ListProvidersResponse {
        providers: registry.providers.into_iter().map(Into::into).collect(),
    }))
}

#[derive(Debug, serde::Deserialize, Validate)]
pub struct SetProviderRequest {
    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,
    pub litellm_models_enabled: Option<Vec<String>>,
    pub enabled: Option<bool>,
    pub token: Option<String>,
}

pub async fn set_provider(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Request(body): Request<SetProviderRequest>,
) -> Result<Json<ProviderView>, ApiError> {
    auth::authorize_account_admin(&principal)?;

    let registry = app.registry().await?;
    let mut provider = registry
        .providers
        .into_iter()
        .find(|p| p.name == body.name)
        .ok_or_else(|| ApiError::not_found("llm provider"))?;

    if let Some(enabled_models) = body.litellm_models_enabled {
        // Every enabled model must exist in the provider's catalog.
        for model in &enabled_models {
            if !provider
                .litellm_models_available
                .iter()
                .any(|spec| &spec.litellm_model == model)
            {
                return Err(ApiError::bad_request(anyhow::anyhow!(
                    "model {model:?} is not available from provider {:?}",
                    provider.name
                )));
            }
        }
        provider.litellm_models_enabled = enabled_models;
    }
    if let Some(enabled) = body.enabled {
        provider.enabled = enabled;
    }
    if let Some(token) = body.token {
        provider.token = Some(token);
        provider.token_created_at = Some(chrono::Utc::now());
    }

    app.save_provider(&provider).await?;
    tracing::info!(provider = %provider.name, enabled = provider.enabled, "llm provider updated");
    Ok(Json(provider.into()))
}

#[derive(Debug, serde::Serialize)]
pub struct ListModelsResponse {
    pub models: Vec<llm::ModelSpec>,
}

/// The union of enabled models across enabled providers: the set accepted
/// by prompt and chat model validation.
pub async fn list_models(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<ListModelsResponse>, ApiError> {
    auth::authorize_account_admin(&principal)?;

    let registry = app.registry().await?;
    Ok(Json(ListModelsResponse {
        models: registry.enabled_models().into_iter().cloned().collect(),
    }))
}
