use chrono::{DateTime, Utc};
use models::Id;

/// A row of the `tags` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Row {
    pub id: Id,
    pub organization_id: Id,
    pub name: String,
    pub color: Option<String>,
    pub description: Option<String>,
    pub created_by: Id,
    pub created_at: DateTime<Utc>,
}

const SELECT_COLUMNS: &str =
    "id, organization_id, name, color, description, created_by, created_at";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("a tag named {0:?} already exists in this organization")]
    DuplicateName(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub async fn insert(
    pool: &sqlx::PgPool,
    id: Id,
    organization_id: Id,
    name: &str,
    color: Option<&str>,
    description: Option<&str>,
    created_by: Id,
) -> Result<Row, Error> {
    let inserted = sqlx::query_as(&format!(
        r#"
        insert into tags (id, organization_id, name, color, description, created_by)
        values ($1, $2, $3, $4, $5, $6)
        on conflict (organization_id, lower(name)) do nothing
        returning {SELECT_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(organization_id)
    .bind(name)
    .bind(color)
    .bind(description)
    .bind(created_by)
    .fetch_optional(pool)
    .await?;

    inserted.ok_or_else(|| Error::DuplicateName(name.to_string()))
}

pub async fn fetch(
    pool: &sqlx::PgPool,
    organization_id: Id,
    tag_id: Id,
) -> sqlx::Result<Option<Row>> {
    sqlx::query_as(&format!(
        "select {SELECT_COLUMNS} from tags where organization_id = $1 and id = $2"
    ))
    .bind(organization_id)
    .bind(tag_id)
    .fetch_optional(pool)
    .await
}

pub async fn list(
    pool: &sqlx::PgPool,
    organization_id: Id,
    skip: i64,
    limit: i64,
) -> sqlx::Result<(Vec<Row>, i64)> {
    let rows = sqlx::query_as(&format!(
        r#"
        select {SELECT_COLUMNS} from tags
        where organization_id = $1
        order by name
        offset $2 limit $3
        "#
    ))
    .bind(organization_id)
    .bind(skip.max(0))
    .bind(crate::clamp_limit(limit))
    .fetch_all(pool)
    .await?;

    let (total_count,): (i64,) =
        sqlx::query_as("select count(*) from tags where organization_id = $1")
            .bind(organization_id)
            .fetch_one(pool)
            .await?;

    Ok((rows, total_count))
}

pub async fn update(
    pool: &sqlx::PgPool,
    organization_id: Id,
    tag_id: Id,
    name: Option<&str>,
    color: Option<&str>,
    description: Option<&str>,
) -> sqlx::Result<Option<Row>> {
    sqlx::query_as(&format!(
        r#"
        update tags
        set
            name = coalesce($3, name),
            color = coalesce($4, color),
            description = coalesce($5, description)
        where organization_id = $1 and id = $2
        returning {SELECT_COLUMNS}
        "#
    ))
    .bind(organization_id)
    .bind(tag_id)
    .bind(name)
    .bind(color)
    .bind(description)
    .fetch_optional(pool)
    .await
}

pub async fn delete(pool: &sqlx::PgPool, organization_id: Id, tag_id: Id) -> sqlx::Result<bool> {
    let done = sqlx::query("delete from tags where organization_id = $1 and id = $2")
        .bind(organization_id)
        .bind(tag_id)
        .execute(pool)
        .await?;
    Ok(done.rows_affected() == 1)
}

/// Verify that every id in `tag_ids` names a tag of this organization,
/// returning the invalid ids (empty when all are valid).
pub async fn find_invalid(
    pool: &sqlx::PgPool,
    organization_id: Id,
    tag_ids: &[Id],
) -> sqlx::Result<Vec<Id>> {
    if tag_ids.is_empty() {
        return Ok(Vec::new());
    }
    let tag_ids = tag_ids.to_vec();
    let known: Vec<(Id,)> =
        sqlx::query_as("select id from tags where organization_id = $1 and id = any($2)")
            .bind(organization_id)
            .bind(&tag_ids)
            .fetch_all(pool)
            .await?;
    let known: std::collections::BTreeSet<Id> = known.into_iter().map(|(id,)| id).collect();
    Ok(tag_ids
        .into_iter()
        .filter(|id| !known.contains(id))
        .collect())
}
