use chrono::{DateTime, Utc};
use models::Id;
use sqlx::types::Json;

/// A row of `llm_runs`, unique per `(document_id, prompt_revid)`.
/// `prompt_revid` and `prompt_id` are text because the implicit default
/// prompt stores its result under the literal `"default"`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Row {
    pub document_id: Id,
    pub organization_id: Id,
    pub prompt_revid: String,
    pub prompt_id: String,
    pub prompt_version: i32,
    pub llm_result: Json<serde_json::Value>,
    pub updated_llm_result: Json<serde_json::Value>,
    pub is_edited: bool,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const SELECT_COLUMNS: &str = r#"
    document_id, organization_id, prompt_revid, prompt_id, prompt_version,
    llm_result, updated_llm_result, is_edited, is_verified, created_at, updated_at
"#;

/// Upsert a fresh extraction result. A re-run (force) overwrites the stored
/// result and resets the edit and verification flags.
pub async fn upsert(
    pool: &sqlx::PgPool,
    document_id: Id,
    organization_id: Id,
    prompt_revid: &str,
    prompt_id: &str,
    prompt_version: i32,
    llm_result: &serde_json::Value,
) -> sqlx::Result<Row> {
    sqlx::query_as(&format!(
        r#"
        insert into llm_runs
            (document_id, organization_id, prompt_revid, prompt_id, prompt_version,
             llm_result, updated_llm_result)
        values ($1, $2, $3, $4, $5, $6, $6)
        on conflict (document_id, prompt_revid) do update set
            prompt_id = excluded.prompt_id,
            prompt_version = excluded.prompt_version,
            llm_result = excluded.llm_result,
            updated_llm_result = excluded.updated_llm_result,
            is_edited = false,
            is_verified = false,
            updated_at = now()
        returning {SELECT_COLUMNS}
        "#
    ))
    .bind(document_id)
    .bind(organization_id)
    .bind(prompt_revid)
    .bind(prompt_id)
    .bind(prompt_version)
    .bind(Json(llm_result))
    .fetch_one(pool)
    .await
}

pub async fn fetch(
    pool: &sqlx::PgPool,
    organization_id: Id,
    document_id: Id,
    prompt_revid: &str,
) -> sqlx::Result<Option<Row>> {
    sqlx::query_as(&format!(
        r#"
        select {SELECT_COLUMNS} from llm_runs
        where organization_id = $1 and document_id = $2 and prompt_revid = $3
        "#
    ))
    .bind(organization_id)
    .bind(document_id)
    .bind(prompt_revid)
    .fetch_optional(pool)
    .await
}

/// The most recent result for the prompt owning `prompt_revid`, used when
/// the caller asks for `fallback=true` and the exact revision has no row.
pub async fn fetch_fallback(
    pool: &sqlx::PgPool,
    organization_id: Id,
    document_id: Id,
    prompt_id: &str,
) -> sqlx::Result<Option<Row>> {
    sqlx::query_as(&format!(
        r#"
        select {SELECT_COLUMNS} from llm_runs
        where organization_id = $1 and document_id = $2 and prompt_id = $3
        order by prompt_version desc
        limit 1
        "#
    ))
    .bind(organization_id)
    .bind(document_id)
    .bind(prompt_id)
    .fetch_optional(pool)
    .await
}

/// Record a client edit. `is_edited` reflects whether the edited result
/// still matches the raw extraction.
pub async fn update_edits(
    pool: &sqlx::PgPool,
    organization_id: Id,
    document_id: Id,
    prompt_revid: &str,
    updated_llm_result: &serde_json::Value,
    is_verified: bool,
) -> sqlx::Result<Option<Row>> {
    sqlx::query_as(&format!(
        r#"
        update llm_runs
        set
            updated_llm_result = $4,
            is_edited = (llm_result != $4),
            is_verified = $5,
            updated_at = now()
        where organization_id = $1 and document_id = $2 and prompt_revid = $3
        returning {SELECT_COLUMNS}
        "#
    ))
    .bind(organization_id)
    .bind(document_id)
    .bind(prompt_revid)
    .bind(Json(updated_llm_result))
    .bind(is_verified)
    .fetch_optional(pool)
    .await
}

pub async fn delete(
    pool: &sqlx::PgPool,
    organization_id: Id,
    document_id: Id,
    prompt_revid: &str,
) -> sqlx::Result<bool> {
    let done = sqlx::query(
        r#"
        delete from llm_runs
        where organization_id = $1 and document_id = $2 and prompt_revid = $3
        "#,
    )
    .bind(organization_id)
    .bind(document_id)
    .bind(prompt_revid)
    .execute(pool)
    .await?;
    Ok(done.rows_affected() == 1)
}

/// All results of a document, for the download bundle.
pub async fn list_for_document(
    pool: &sqlx::PgPool,
    organization_id: Id,
    document_id: Id,
) -> sqlx::Result<Vec<Row>> {
    sqlx::query_as(&format!(
        r#"
        select {SELECT_COLUMNS} from llm_runs
        where organization_id = $1 and document_id = $2
        order by created_at
        "#
    ))
    .bind(organization_id)
    .bind(document_id)
    .fetch_all(pool)
    .await
}

/// Purge every result of a document, as part of document deletion.
pub async fn delete_for_document(
    pool: &sqlx::PgPool,
    organization_id: Id,
    document_id: Id,
) -> sqlx::Result<u64> {
    let done = sqlx::query("delete from llm_runs where organization_id = $1 and document_id = $2")
        .bind(organization_id)
        .bind(document_id)
        .execute(pool)
        .await?;
    Ok(done.rows_affected())
}
