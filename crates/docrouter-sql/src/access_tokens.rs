use chrono::{DateTime, Utc};
use models::Id;

/// A row of `access_tokens`. Only the SHA-256 digest of the token is
/// stored; the plaintext is returned to the caller once, at creation.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Row {
    pub id: Id,
    pub user_id: Id,
    pub organization_id: Option<Id>,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub lifetime_secs: i64,
}

pub async fn insert(
    pool: &sqlx::PgPool,
    id: Id,
    user_id: Id,
    organization_id: Option<Id>,
    name: &str,
    token_digest: &str,
    lifetime_secs: i64,
) -> sqlx::Result<Row> {
    sqlx::query_as(
        r#"
        insert into access_tokens (id, user_id, organization_id, name, token_digest, lifetime_secs)
        values ($1, $2, $3, $4, $5, $6)
        returning id, user_id, organization_id, name, created_at, lifetime_secs
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(organization_id)
    .bind(name)
    .bind(token_digest)
    .bind(lifetime_secs)
    .fetch_one(pool)
    .await
}

/// Resolve a presented opaque token by digest, expired tokens excluded.
pub async fn find_by_digest(pool: &sqlx::PgPool, token_digest: &str) -> sqlx::Result<Option<Row>> {
    sqlx::query_as(
        r#"
        select id, user_id, organization_id, name, created_at, lifetime_secs
        from access_tokens
        where token_digest = $1
          and (lifetime_secs <= 0 or created_at + make_interval(secs => lifetime_secs) > now())
        "#,
    )
    .bind(token_digest)
    .fetch_optional(pool)
    .await
}

pub async fn list_for_user(
    pool: &sqlx::PgPool,
    user_id: Id,
    organization_id: Option<Id>,
) -> sqlx::Result<Vec<Row>> {
    sqlx::query_as(
        r#"
        select id, user_id, organization_id, name, created_at, lifetime_secs
        from access_tokens
        where user_id = $1 and organization_id is not distinct from $2
        order by created_at desc
        "#,
    )
    .bind(user_id)
    .bind(organization_id)
    .fetch_all(pool)
    .await
}

pub async fn delete(pool: &sqlx::PgPool, user_id: Id, token_id: Id) -> sqlx::Result<bool> {
    let done = sqlx::query("delete from access_tokens where user_id = $1 and id = $2")
        .bind(user_id)
        .bind(token_id)
        .execute(pool)
        .await?;
    Ok(done.rows_affected() == 1)
}
