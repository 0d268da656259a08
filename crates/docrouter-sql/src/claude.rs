use chrono::{DateTime, Utc};
use models::Id;
use sqlx::types::Json;

/// A row of `claude_logs`: one transcript record of a Claude session.
/// `record_uuid` is the client-side uuid extracted from the record, indexed
/// for the ingest deduplication scan.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LogRow {
    pub id: Id,
    pub organization_id: Id,
    pub hook_data: Json<serde_json::Value>,
    pub transcript_record: Json<serde_json::Value>,
    pub record_uuid: Option<String>,
    pub upload_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HookRow {
    pub id: Id,
    pub organization_id: Id,
    pub hook_data: Json<serde_json::Value>,
    pub hook_timestamp: DateTime<Utc>,
}

/// Does any stored record of this organization carry the given uuid?
pub async fn log_uuid_exists(
    pool: &sqlx::PgPool,
    organization_id: Id,
    record_uuid: &str,
) -> sqlx::Result<bool> {
    let (exists,): (bool,) = sqlx::query_as(
        r#"
        select exists (
            select 1 from claude_logs
            where organization_id = $1 and record_uuid = $2
        )
        "#,
    )
    .bind(organization_id)
    .bind(record_uuid)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

pub async fn insert_log(
    pool: &sqlx::PgPool,
    id: Id,
    organization_id: Id,
    hook_data: &serde_json::Value,
    transcript_record: &serde_json::Value,
    record_uuid: Option<&str>,
    upload_timestamp: DateTime<Utc>,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        insert into claude_logs
            (id, organization_id, hook_data, transcript_record, record_uuid, upload_timestamp)
        values ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(id)
    .bind(organization_id)
    .bind(Json(hook_data))
    .bind(Json(transcript_record))
    .bind(record_uuid)
    .bind(upload_timestamp)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_logs(
    pool: &sqlx::PgPool,
    organization_id: Id,
    session_id: Option<&str>,
    skip: i64,
    limit: i64,
) -> sqlx::Result<(Vec<LogRow>, i64)> {
    let where_clause = r#"
        organization_id = $1
        and ($2::text is null or transcript_record->>'sessionId' = $2
             or transcript_record->>'session_id' = $2)
    "#;

    let rows: Vec<LogRow> = sqlx::query_as(&format!(
        r#"
        select id, organization_id, hook_data, transcript_record, record_uuid, upload_timestamp
        from claude_logs
        where {where_clause}
        order by upload_timestamp desc, id desc
        offset $3 limit $4
        "#
    ))
    .bind(organization_id)
    .bind(session_id)
    .bind(skip.max(0))
    .bind(crate::clamp_limit(limit))
    .fetch_all(pool)
    .await?;

    let (total,): (i64,) = sqlx::query_as(&format!(
        "select count(*) from claude_logs where {where_clause}"
    ))
    .bind(organization_id)
    .bind(session_id)
    .fetch_one(pool)
    .await?;

    Ok((rows, total))
}

pub async fn insert_hook(
    pool: &sqlx::PgPool,
    id: Id,
    organization_id: Id,
    hook_data: &serde_json::Value,
    hook_timestamp: DateTime<Utc>,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        insert into claude_hooks (id, organization_id, hook_data, hook_timestamp)
        values ($1, $2, $3, $4)
        "#,
    )
    .bind(id)
    .bind(organization_id)
    .bind(Json(hook_data))
    .bind(hook_timestamp)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_hooks(
    pool: &sqlx::PgPool,
    organization_id: Id,
    skip: i64,
    limit: i64,
) -> sqlx::Result<(Vec<HookRow>, i64)> {
    let rows: Vec<HookRow> = sqlx::query_as(
        r#"
        select id, organization_id, hook_data, hook_timestamp
        from claude_hooks
        where organization_id = $1
        order by hook_timestamp desc, id desc
        offset $2 limit $3
        "#,
    )
    .bind(organization_id)
    .bind(skip.max(0))
    .bind(crate::clamp_limit(limit))
    .fetch_all(pool)
    .await?;

    let (total,): (i64,) =
        sqlx::query_as("select count(*) from claude_hooks where organization_id = $1")
            .bind(organization_id)
            .fetch_one(pool)
            .await?;

    Ok((rows, total))
}
