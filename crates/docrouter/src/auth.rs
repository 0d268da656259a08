use crate::api::ApiError;
use crate::app::App;
use axum::http::StatusCode;
use models::{Credential, Id, Principal, Role};
use sha2::Digest;
use std::sync::Arc;

/// Prefix of opaque access tokens. Everything else presented as a bearer
/// credential is treated as a JWT.
pub const TOKEN_PREFIX: &str = "acc_";

/// Claims encoded in control-plane JWTs, issued by the external auth flow.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Claims {
    /// Subject: the user id.
    pub sub: Id,
    pub exp: u64,
    #[serde(default)]
    pub aud: Option<String>,
}

/// Hex SHA-256 digest under which an opaque token is stored at rest.
pub fn token_digest(token: &str) -> String {
    hex::encode(sha2::Sha256::digest(token.as_bytes()))
}

/// Resolve a bearer credential to a Principal: an opaque `acc_` token via
/// digest lookup, or a JWT via HS256 verification.
pub async fn resolve_token(app: &App, token: &str) -> Result<Principal, ApiError> {
    let (user_id, credential) = if token.starts_with(TOKEN_PREFIX) {
        let row = docrouter_sql::access_tokens::find_by_digest(&app.pg_pool, &token_digest(token))
            .await?
            .ok_or_else(|| {
                ApiError::new(
                    StatusCode::UNAUTHORIZED,
                    anyhow::anyhow!("unknown or expired access token"),
                )
            })?;
        let credential = match row.organization_id {
            Some(org_id) => Credential::OrgToken(org_id),
            None => Credential::AccountToken,
        };
        (row.user_id, credential)
    } else {
        let decoded =
            jsonwebtoken::decode::<Claims>(token, &app.jwt_secret, &app.jwt_validation).map_err(
                |err| {
                    ApiError::new(
                        StatusCode::UNAUTHORIZED,
                        anyhow::anyhow!("failed to parse authorization token: {err}"),
                    )
                },
            )?;
        (decoded.claims.sub, Credential::Session)
    };

    let user = docrouter_sql::organizations::fetch_user(&app.pg_pool, user_id)
        .await?
        .ok_or_else(|| {
            ApiError::new(
                StatusCode::UNAUTHORIZED,
                anyhow::anyhow!("token subject is not a known user"),
            )
        })?;

    let account_role = user.account_role();
    Ok(Principal {
        user_id: user.id,
        user_name: user.name,
        account_role,
        credential,
    })
}

/// Middleware which authenticates every API request and attaches the
/// resolved Principal as a request extension.
pub async fn authenticate(
    axum::extract::State(app): axum::extract::State<Arc<App>>,
    axum_extra::TypedHeader(bearer): axum_extra::TypedHeader<
        axum_extra::headers::Authorization<axum_extra::headers::authorization::Bearer>,
    >,
    mut req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    match resolve_token(&app, bearer.token()).await {
        Ok(principal) => {
            req.extensions_mut().insert(principal);
            next.run(req).await
        }
        Err(err) => axum::response::IntoResponse::into_response(err),
    }
}

/// The caller's standing within one organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrgAccess {
    pub role: Role,
}

/// Authorize an org-scoped request: the organization must exist, an
/// org-scoped token must be pinned to it, and the user must be a member
/// (account admins pass as org admins).
pub async fn authorize_org(
    app: &App,
    principal: &Principal,
    organization_id: Id,
) -> Result<OrgAccess, ApiError> {
    match principal.credential {
        Credential::OrgToken(pinned) if pinned != organization_id => {
            return Err(ApiError::new(
                StatusCode::FORBIDDEN,
                anyhow::anyhow!("access token is not scoped to this organization"),
            ));
        }
        Credential::AccountToken => {
            return Err(ApiError::new(
                StatusCode::FORBIDDEN,
                anyhow::anyhow!("an account-level token cannot act on organization endpoints"),
            ));
        }
        _ => (),
    }

    let org = docrouter_sql::organizations::fetch(&app.pg_pool, organization_id)
        .await?
        .ok_or_else(|| {
            ApiError::new(StatusCode::NOT_FOUND, anyhow::anyhow!("organization not found"))
        })?;

    if principal.account_role.is_admin() {
        return Ok(OrgAccess { role: Role::Admin });
    }
    match org.member_role(principal.user_id) {
        Some(role) => Ok(OrgAccess { role }),
        None => Err(ApiError::new(
            StatusCode::FORBIDDEN,
            anyhow::anyhow!("user is not a member of this organization"),
        )),
    }
}

/// Authorize an org-scoped admin action.
pub async fn authorize_org_admin(
    app: &App,
    principal: &Principal,
    organization_id: Id,
) -> Result<OrgAccess, ApiError> {
    let access = authorize_org(app, principal, organization_id).await?;
    if !access.role.is_admin() {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            anyhow::anyhow!("this action requires the admin role in the organization"),
        ));
    }
    Ok(access)
}

/// Authorize an account-level admin action. Org-pinned tokens cannot act
/// on account-level endpoints.
pub fn authorize_account_admin(principal: &Principal) -> Result<(), ApiError> {
    if matches!(principal.credential, Credential::OrgToken(_)) {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            anyhow::anyhow!("an organization-scoped token cannot act on account endpoints"),
        ));
    }
    if !principal.account_role.is_admin() {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            anyhow::anyhow!("this action requires the account admin role"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::token_digest;

    #[test]
    fn test_digest_is_stable_hex() {
        let digest = token_digest("acc_example");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(digest, token_digest("acc_example"));
        assert_ne!(digest, token_digest("acc_other"));
    }
}
