use chrono::{DateTime, Utc};
use models::{DocumentState, Id};
use sqlx::types::Json;
use std::collections::BTreeMap;

/// A row of the `docs` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Row {
    pub id: Id,
    pub organization_id: Id,
    pub user_file_name: String,
    pub blob_name: String,
    pub upload_date: DateTime<Utc>,
    pub uploaded_by: Id,
    pub state: DocumentState,
    pub tag_ids: Vec<Id>,
    pub metadata: Json<BTreeMap<String, String>>,
    pub n_pages: Option<i32>,
    pub ocr_date: Option<DateTime<Utc>>,
}

const SELECT_COLUMNS: &str = r#"
    id, organization_id, user_file_name, blob_name, upload_date, uploaded_by,
    state, tag_ids, metadata, n_pages, ocr_date
"#;

pub async fn insert(
    pool: &sqlx::PgPool,
    id: Id,
    organization_id: Id,
    user_file_name: &str,
    blob_name: &str,
    uploaded_by: Id,
    tag_ids: &[Id],
    metadata: &BTreeMap<String, String>,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        insert into docs (id, organization_id, user_file_name, blob_name, uploaded_by, tag_ids, metadata)
        values ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(id)
    .bind(organization_id)
    .bind(user_file_name)
    .bind(blob_name)
    .bind(uploaded_by)
    .bind(tag_ids)
    .bind(Json(metadata))
    .execute(pool)
    .await?;
    Ok(())
}

/// Fetch a document within its organization. Out-of-org ids read as absent.
pub async fn fetch(
    pool: &sqlx::PgPool,
    organization_id: Id,
    document_id: Id,
) -> sqlx::Result<Option<Row>> {
    sqlx::query_as(&format!(
        "select {SELECT_COLUMNS} from docs where organization_id = $1 and id = $2"
    ))
    .bind(organization_id)
    .bind(document_id)
    .fetch_optional(pool)
    .await
}

/// Fetch a document by id alone. Reserved for workers, which receive the
/// document through a queue payload rather than an org-scoped request.
pub async fn fetch_unscoped(pool: &sqlx::PgPool, document_id: Id) -> sqlx::Result<Option<Row>> {
    sqlx::query_as(&format!("select {SELECT_COLUMNS} from docs where id = $1"))
        .bind(document_id)
        .fetch_optional(pool)
        .await
}

pub struct ListFilter<'a> {
    pub tag_ids: Option<&'a [Id]>,
    pub name_search: Option<&'a str>,
    pub metadata_search: Option<&'a BTreeMap<String, String>>,
}

/// List documents of an organization, newest upload first, with the total
/// count of matching rows.
pub async fn list(
    pool: &sqlx::PgPool,
    organization_id: Id,
    filter: ListFilter<'_>,
    skip: i64,
    limit: i64,
) -> sqlx::Result<(Vec<Row>, i64)> {
    let name_pattern = filter.name_search.map(crate::ilike_contains);
    let tag_ids: Option<Vec<Id>> = filter.tag_ids.map(|t| t.to_vec());
    let metadata = filter.metadata_search.map(Json);

    let where_clause = r#"
        organization_id = $1
        and ($2::text[] is null or tag_ids && $2)
        and ($3::text is null or user_file_name ilike $3)
        and ($4::jsonb is null or metadata @> $4)
    "#;

    let rows: Vec<Row> = sqlx::query_as(&format!(
        r#"
        select {SELECT_COLUMNS}
        from docs
        where {where_clause}
        order by upload_date desc, id desc
        offset $5 limit $6
        "#
    ))
    .bind(organization_id)
    .bind(&tag_ids)
    .bind(&name_pattern)
    .bind(&metadata)
    .bind(skip.max(0))
    .bind(crate::clamp_limit(limit))
    .fetch_all(pool)
    .await?;

    let (total_count,): (i64,) =
        sqlx::query_as(&format!("select count(*) from docs where {where_clause}"))
            .bind(organization_id)
            .bind(&tag_ids)
            .bind(&name_pattern)
            .bind(&metadata)
            .fetch_one(pool)
            .await?;

    Ok((rows, total_count))
}

/// Apply a client update. Present fields replace the stored value wholesale;
/// the tag set in particular is replaced, never merged.
pub async fn update(
    pool: &sqlx::PgPool,
    organization_id: Id,
    document_id: Id,
    tag_ids: Option<&[Id]>,
    metadata: Option<&BTreeMap<String, String>>,
    user_file_name: Option<&str>,
) -> sqlx::Result<bool> {
    let tag_ids: Option<Vec<Id>> = tag_ids.map(|t| t.to_vec());
    let done = sqlx::query(
        r#"
        update docs
        set
            tag_ids = coalesce($3, tag_ids),
            metadata = coalesce($4, metadata),
            user_file_name = coalesce($5, user_file_name)
        where organization_id = $1 and id = $2
        "#,
    )
    .bind(organization_id)
    .bind(document_id)
    .bind(&tag_ids)
    .bind(metadata.map(Json))
    .bind(user_file_name)
    .execute(pool)
    .await?;
    Ok(done.rows_affected() == 1)
}

pub async fn update_state(
    pool: &sqlx::PgPool,
    document_id: Id,
    state: DocumentState,
) -> sqlx::Result<()> {
    sqlx::query("update docs set state = $2 where id = $1")
        .bind(document_id)
        .bind(state)
        .execute(pool)
        .await?;
    Ok(())
}

/// Record a worker failure reason under `metadata.error`, where clients
/// polling the document can see it.
pub async fn set_error(pool: &sqlx::PgPool, document_id: Id, error: &str) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        update docs
        set metadata = metadata || jsonb_build_object('error', $2::text)
        where id = $1
        "#,
    )
    .bind(document_id)
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}

/// Persist OCR completion metadata.
pub async fn set_ocr_metadata(
    pool: &sqlx::PgPool,
    document_id: Id,
    n_pages: i32,
    ocr_date: DateTime<Utc>,
) -> sqlx::Result<()> {
    sqlx::query("update docs set n_pages = $2, ocr_date = $3 where id = $1")
        .bind(document_id)
        .bind(n_pages)
        .bind(ocr_date)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete(
    pool: &sqlx::PgPool,
    organization_id: Id,
    document_id: Id,
) -> sqlx::Result<bool> {
    let done = sqlx::query("delete from docs where organization_id = $1 and id = $2")
        .bind(organization_id)
        .bind(document_id)
        .execute(pool)
        .await?;
    Ok(done.rows_affected() == 1)
}

/// Count documents referencing a tag, for delete-time integrity checks.
pub async fn count_with_tag(pool: &sqlx::PgPool, organization_id: Id, tag_id: Id) -> sqlx::Result<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "select count(*) from docs where organization_id = $1 and $2 = any(tag_ids)",
    )
    .bind(organization_id)
    .bind(tag_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}
