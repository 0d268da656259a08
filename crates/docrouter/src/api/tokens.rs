use super::{ApiError, Request};
use crate::app::App;
use crate::auth;
use axum::extract::{Path, State};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use models::{Id, Principal};
use rand::RngCore;
use std::sync::Arc;
use validator::Validate;

#[derive(Debug, serde::Deserialize, Validate)]
pub struct CreateTokenRequest {
    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,
    /// Token lifetime in seconds; 0 or omitted means no expiry.
    #[serde(default)]
    pub lifetime: i64,
}

/// Token metadata as listed back to the owner. The secret itself appears
/// only in the creation response.
#[derive(Debug, serde::Serialize)]
pub struct TokenView {
    pub id: Id,
    pub name: String,
    pub organization_id: Option<Id>,
    pub created_at: DateTime<Utc>,
    pub lifetime: i64,
}

impl From<docrouter_sql::access_tokens::Row> for TokenView {
    fn from(row: docrouter_sql::access_tokens::Row) -> Self {
        Self {
            id: row.id,
            name: row.name,
            organization_id: row.organization_id,
            created_at: row.created_at,
            lifetime: row.lifetime_secs,
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct CreatedToken {
    #[serde(flatten)]
    pub view: TokenView,
    /// The plaintext token. Only the digest is stored; save it now.
    pub token: String,
}

fn mint_token() -> String {
    let mut raw = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut raw);
    format!("{}{}", auth::TOKEN_PREFIX, hex::encode(raw))
}

async fn create_token(
    app: &App,
    principal: &Principal,
    organization_id: Option<Id>,
    body: CreateTokenRequest,
) -> Result<Json<CreatedToken>, ApiError> {
    let token = mint_token();
    let row = docrouter_sql::access_tokens::insert(
        &app.pg_pool,
        app.next_id(),
        principal.user_id,
        organization_id,
        &body.name,
        &auth::token_digest(&token),
        body.lifetime.max(0),
    )
    .await?;

    tracing::info!(token_id = %row.id, ?organization_id, "access token created");
    Ok(Json(CreatedToken {
        view: row.into(),
        token,
    }))
}

#[derive(Debug, serde::Serialize)]
pub struct ListResponse {
    pub tokens: Vec<TokenView>,
}

/// Account-level tokens: any authenticated user manages their own.
pub async fn create_account_token(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Request(body): Request<CreateTokenRequest>,
) -> Result<Json<CreatedToken>, ApiError> {
    create_token(&app, &principal, None, body).await
}

pub async fn list_account_tokens(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<ListResponse>, ApiError> {
    let rows =
        docrouter_sql::access_tokens::list_for_user(&app.pg_pool, principal.user_id, None).await?;
    Ok(Json(ListResponse {
        tokens: rows.into_iter().map(Into::into).collect(),
    }))
}

pub async fn delete_account_token(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path(token_id): Path<Id>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted =
        docrouter_sql::access_tokens::delete(&app.pg_pool, principal.user_id, token_id).await?;
    if !deleted {
        return Err(ApiError::not_found("access token"));
    }
    Ok(Json(serde_json::json!({"message": "Token deleted"})))
}

/// Org-scoped tokens: creation and deletion require the org admin role.
pub async fn create_org_token(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path(organization_id): Path<Id>,
    Request(body): Request<CreateTokenRequest>,
) -> Result<Json<CreatedToken>, ApiError> {
    auth::authorize_org_admin(&app, &principal, organization_id).await?;
    create_token(&app, &principal, Some(organization_id), body).await
}

pub async fn list_org_tokens(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path(organization_id): Path<Id>,
) -> Result<Json<ListResponse>, ApiError> {
    auth::authorize_org_admin(&app, &principal, organization_id).await?;
    let rows = docrouter_sql::access_tokens::list_for_user(
        &app.pg_pool,
        principal.user_id,
        Some(organization_id),
    )
    .await?;
    Ok(Json(ListResponse {
        tokens: rows.into_iter().map(Into::into).collect(),
    }))
}

pub async fn delete_org_token(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path((organization_id, token_id)): Path<(Id, Id)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    auth::authorize_org_admin(&app, &principal, organization_id).await?;
    let deleted =
        docrouter_sql::access_tokens::delete(&app.pg_pool, principal.user_id, token_id).await?;
    if !deleted {
        return Err(ApiError::not_found("access token"));
    }
    Ok(Json(serde_json::json!({"message": "Token deleted"})))
}

#[cfg(test)]
mod test {
    use super::mint_token;

    #[test]
    fn test_minted_tokens_are_prefixed_and_distinct() {
        let a = mint_token();
        let b = mint_token();
        assert!(a.starts_with("acc_"));
        assert_eq!(a.len(), 4 + 64);
        assert_ne!(a, b);
    }
}
