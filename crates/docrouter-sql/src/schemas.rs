use chrono::{DateTime, Utc};
use models::Id;
use sqlx::types::Json;

/// A schema revision joined with its parent's name. `schema_id` is the
/// stable logical identifier; `schema_revid` names this revision alone.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Revision {
    pub schema_revid: Id,
    pub schema_id: Id,
    pub name: String,
    pub schema_version: i32,
    pub response_format: Json<serde_json::Value>,
    pub organization_id: Id,
    pub created_at: DateTime<Utc>,
    pub created_by: Id,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("schema not found")]
    NotFound,
    #[error("a schema named {0:?} already exists in this organization")]
    DuplicateName(String),
    #[error("schema is referenced by prompts: {}", .0.join(", "))]
    Referenced(Vec<String>),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

const SELECT_REVISION: &str = r#"
    select
        r.schema_revid, r.schema_id, p.name, r.schema_version,
        r.response_format, r.organization_id, r.created_at, r.created_by
    from schema_revisions r
    join schemas p on p.schema_id = r.schema_id
"#;

/// Create a schema revision. A name already present in the organization
/// (case-insensitively) reuses its logical id and increments its version;
/// otherwise a new logical id is allocated at version 1.
pub async fn create(
    pool: &sqlx::PgPool,
    new_schema_id: Id,
    new_revid: Id,
    organization_id: Id,
    name: &str,
    response_format: &serde_json::Value,
    created_by: Id,
) -> Result<Revision, Error> {
    let mut txn = pool.begin().await?;

    let existing: Option<(Id,)> = sqlx::query_as(
        "select schema_id from schemas where organization_id = $1 and lower(name) = lower($2)",
    )
    .bind(organization_id)
    .bind(name)
    .fetch_optional(&mut txn)
    .await?;

    let (schema_id, version) = match existing {
        Some((schema_id,)) => {
            let (version,): (i32,) = sqlx::query_as(
                r#"
                update schemas set schema_version = schema_version + 1
                where schema_id = $1
                returning schema_version
                "#,
            )
            .bind(schema_id)
            .fetch_one(&mut txn)
            .await?;
            (schema_id, version)
        }
        None => {
            sqlx::query(
                "insert into schemas (schema_id, organization_id, name) values ($1, $2, $3)",
            )
            .bind(new_schema_id)
            .bind(organization_id)
            .bind(name)
            .execute(&mut txn)
            .await?;
            (new_schema_id, 1)
        }
    };

    let revision: Revision = insert_revision(
        &mut txn,
        new_revid,
        schema_id,
        version,
        response_format,
        organization_id,
        created_by,
    )
    .await?;

    txn.commit().await?;
    Ok(revision)
}

async fn insert_revision(
    txn: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    revid: Id,
    schema_id: Id,
    version: i32,
    response_format: &serde_json::Value,
    organization_id: Id,
    created_by: Id,
) -> sqlx::Result<Revision> {
    sqlx::query(
        r#"
        insert into schema_revisions
            (schema_revid, schema_id, schema_version, response_format, organization_id, created_by)
        values ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(revid)
    .bind(schema_id)
    .bind(version)
    .bind(Json(response_format))
    .bind(organization_id)
    .bind(created_by)
    .execute(&mut *txn)
    .await?;

    sqlx::query_as(&format!("{SELECT_REVISION} where r.schema_revid = $1"))
        .bind(revid)
        .fetch_one(&mut *txn)
        .await
}

/// Update a schema by logical id. A name-only change (the payload equals
/// the latest revision) renames the parent without allocating a revision;
/// any payload change allocates the next version.
pub async fn update(
    pool: &sqlx::PgPool,
    new_revid: Id,
    organization_id: Id,
    schema_id: Id,
    name: &str,
    response_format: &serde_json::Value,
    created_by: Id,
) -> Result<Revision, Error> {
    let mut txn = pool.begin().await?;

    let parent: Option<(String,)> = sqlx::query_as(
        "select name from schemas where organization_id = $1 and schema_id = $2 for update",
    )
    .bind(organization_id)
    .bind(schema_id)
    .fetch_optional(&mut txn)
    .await?;
    let Some((current_name,)) = parent else {
        return Err(Error::NotFound);
    };

    if !name.eq_ignore_ascii_case(&current_name) {
        let taken: Option<(Id,)> = sqlx::query_as(
            r#"
            select schema_id from schemas
            where organization_id = $1 and lower(name) = lower($2) and schema_id != $3
            "#,
        )
        .bind(organization_id)
        .bind(name)
        .bind(schema_id)
        .fetch_optional(&mut txn)
        .await?;
        if taken.is_some() {
            return Err(Error::DuplicateName(name.to_string()));
        }
    }

    let latest: Revision = sqlx::query_as(&format!(
        "{SELECT_REVISION} where r.schema_id = $1 order by r.schema_version desc limit 1"
    ))
    .bind(schema_id)
    .fetch_one(&mut txn)
    .await?;

    let name_changed = name != current_name;
    let payload_changed = *response_format != latest.response_format.0;

    if name_changed {
        sqlx::query("update schemas set name = $2 where schema_id = $1")
            .bind(schema_id)
            .bind(name)
            .execute(&mut txn)
            .await?;
    }

    let revision = if payload_changed {
        let (version,): (i32,) = sqlx::query_as(
            r#"
            update schemas set schema_version = schema_version + 1
            where schema_id = $1
            returning schema_version
            "#,
        )
        .bind(schema_id)
        .fetch_one(&mut txn)
        .await?;

        insert_revision(
            &mut txn,
            new_revid,
            schema_id,
            version,
            response_format,
            organization_id,
            created_by,
        )
        .await?
    } else {
        // Name-only change: the latest revision is returned unchanged
        // (modulo its displayed name).
        Revision {
            name: name.to_string(),
            ..latest
        }
    };

    txn.commit().await?;
    Ok(revision)
}

pub async fn fetch_by_revid(
    pool: &sqlx::PgPool,
    organization_id: Id,
    schema_revid: Id,
) -> sqlx::Result<Option<Revision>> {
    sqlx::query_as(&format!(
        "{SELECT_REVISION} where r.organization_id = $1 and r.schema_revid = $2"
    ))
    .bind(organization_id)
    .bind(schema_revid)
    .fetch_optional(pool)
    .await
}

pub async fn fetch_latest(
    pool: &sqlx::PgPool,
    organization_id: Id,
    schema_id: Id,
) -> sqlx::Result<Option<Revision>> {
    sqlx::query_as(&format!(
        r#"
        {SELECT_REVISION}
        where r.organization_id = $1 and r.schema_id = $2
        order by r.schema_version desc limit 1
        "#
    ))
    .bind(organization_id)
    .bind(schema_id)
    .fetch_optional(pool)
    .await
}

pub async fn fetch_version(
    pool: &sqlx::PgPool,
    organization_id: Id,
    schema_id: Id,
    version: i32,
) -> sqlx::Result<Option<Revision>> {
    sqlx::query_as(&format!(
        "{SELECT_REVISION} where r.organization_id = $1 and r.schema_id = $2 and r.schema_version = $3"
    ))
    .bind(organization_id)
    .bind(schema_id)
    .bind(version)
    .fetch_optional(pool)
    .await
}

/// List the latest revision of every schema in the organization, newest
/// logical id first.
pub async fn list_latest(
    pool: &sqlx::PgPool,
    organization_id: Id,
    name_search: Option<&str>,
    skip: i64,
    limit: i64,
) -> sqlx::Result<(Vec<Revision>, i64)> {
    let name_pattern = name_search.map(crate::ilike_contains);

    let rows: Vec<Revision> = sqlx::query_as(&format!(
        r#"
        select * from (
            select distinct on (r.schema_id)
                r.schema_revid, r.schema_id, p.name, r.schema_version,
                r.response_format, r.organization_id, r.created_at, r.created_by
            from schema_revisions r
            join schemas p on p.schema_id = r.schema_id
            where p.organization_id = $1
              and ($2::text is null or p.name ilike $2)
            order by r.schema_id, r.schema_version desc
        ) latest
        order by schema_id desc
        offset $3 limit $4
        "#
    ))
    .bind(organization_id)
    .bind(&name_pattern)
    .bind(skip.max(0))
    .bind(crate::clamp_limit(limit))
    .fetch_all(pool)
    .await?;

    let (total_count,): (i64,) = sqlx::query_as(
        r#"
        select count(*) from schemas p
        where p.organization_id = $1
          and ($2::text is null or p.name ilike $2)
        "#,
    )
    .bind(organization_id)
    .bind(&name_pattern)
    .fetch_one(pool)
    .await?;

    Ok((rows, total_count))
}

/// Delete a schema and all of its revisions. Refused while any prompt
/// revision references it; the error names the referring prompts.
pub async fn delete(
    pool: &sqlx::PgPool,
    organization_id: Id,
    schema_id: Id,
) -> Result<(), Error> {
    let referrers: Vec<(String,)> = sqlx::query_as(
        r#"
        select distinct p.name
        from prompt_revisions r
        join prompts p on p.prompt_id = r.prompt_id
        where r.organization_id = $1 and r.schema_id = $2
        order by p.name
        "#,
    )
    .bind(organization_id)
    .bind(schema_id)
    .fetch_all(pool)
    .await?;
    if !referrers.is_empty() {
        return Err(Error::Referenced(
            referrers.into_iter().map(|(name,)| name).collect(),
        ));
    }

    let done = sqlx::query("delete from schemas where organization_id = $1 and schema_id = $2")
        .bind(organization_id)
        .bind(schema_id)
        .execute(pool)
        .await?;
    if done.rows_affected() == 0 {
        return Err(Error::NotFound);
    }
    Ok(())
}
