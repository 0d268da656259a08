use chrono::{DateTime, Utc};
use models::Id;
use sqlx::types::Json;

/// A form revision joined with its parent's name. `response_format` holds
/// the form definition and its extraction mapping
/// (`{json_formio, json_formio_mapping}`), stored verbatim.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Revision {
    pub form_revid: Id,
    pub form_id: Id,
    pub name: String,
    pub form_version: i32,
    pub response_format: Json<serde_json::Value>,
    pub tag_ids: Vec<Id>,
    pub organization_id: Id,
    pub created_at: DateTime<Utc>,
    pub created_by: Id,
}

/// A row of `form_submissions`, unique per
/// `(document_id, form_revid, organization_id)`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Submission {
    pub id: Id,
    pub organization_id: Id,
    pub document_id: Id,
    pub form_revid: Id,
    pub submission_data: Json<serde_json::Value>,
    pub submitted_by: Id,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("form not found")]
    NotFound,
    #[error("a form named {0:?} already exists in this organization")]
    DuplicateName(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

const SELECT_REVISION: &str = r#"
    select
        r.form_revid, r.form_id, p.name, r.form_version, r.response_format,
        r.tag_ids, r.organization_id, r.created_at, r.created_by
    from form_revisions r
    join forms p on p.form_id = r.form_id
"#;

pub async fn create(
    pool: &sqlx::PgPool,
    new_form_id: Id,
    new_revid: Id,
    organization_id: Id,
    name: &str,
    response_format: &serde_json::Value,
    tag_ids: &[Id],
    created_by: Id,
) -> Result<Revision, Error> {
    let mut txn = pool.begin().await?;

    let existing: Option<(Id,)> = sqlx::query_as(
        "select form_id from forms where organization_id = $1 and lower(name) = lower($2)",
    )
    .bind(organization_id)
    .bind(name)
    .fetch_optional(&mut txn)
    .await?;

    let (form_id, version) = match existing {
        Some((form_id,)) => {
            let (version,): (i32,) = sqlx::query_as(
                r#"
                update forms set form_version = form_version + 1
                where form_id = $1
                returning form_version
                "#,
            )
            .bind(form_id)
            .fetch_one(&mut txn)
            .await?;
            (form_id, version)
        }
        None => {
            sqlx::query("insert into forms (form_id, organization_id, name) values ($1, $2, $3)")
                .bind(new_form_id)
                .bind(organization_id)
                .bind(name)
                .execute(&mut txn)
                .await?;
            (new_form_id, 1)
        }
    };

    let revision = insert_revision(
        &mut txn,
        new_revid,
        form_id,
        version,
        response_format,
        tag_ids,
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
    form_id: Id,
    version: i32,
    response_format: &serde_json::Value,
    tag_ids: &[Id],
    organization_id: Id,
    created_by: Id,
) -> sqlx::Result<Revision> {
    sqlx::query(
        r#"
        insert into form_revisions
            (form_revid, form_id, form_version, response_format, tag_ids,
             organization_id, created_by)
        values ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(revid)
    .bind(form_id)
    .bind(version)
    .bind(Json(response_format))
    .bind(tag_ids.to_vec())
    .bind(organization_id)
    .bind(created_by)
    .execute(&mut *txn)
    .await?;

    sqlx::query_as(&format!("{SELECT_REVISION} where r.form_revid = $1"))
        .bind(revid)
        .fetch_one(&mut *txn)
        .await
}

pub async fn update(
    pool: &sqlx::PgPool,
    new_revid: Id,
    organization_id: Id,
    form_id: Id,
    name: &str,
    response_format: &serde_json::Value,
    tag_ids: &[Id],
    created_by: Id,
) -> Result<Revision, Error> {
    let mut txn = pool.begin().await?;

    let parent: Option<(String,)> = sqlx::query_as(
        "select name from forms where organization_id = $1 and form_id = $2 for update",
    )
    .bind(organization_id)
    .bind(form_id)
    .fetch_optional(&mut txn)
    .await?;
    let Some((current_name,)) = parent else {
        return Err(Error::NotFound);
    };

    if !name.eq_ignore_ascii_case(&current_name) {
        let taken: Option<(Id,)> = sqlx::query_as(
            r#"
            select form_id from forms
            where organization_id = $1 and lower(name) = lower($2) and form_id != $3
            "#,
        )
        .bind(organization_id)
        .bind(name)
        .bind(form_id)
        .fetch_optional(&mut txn)
        .await?;
        if taken.is_some() {
            return Err(Error::DuplicateName(name.to_string()));
        }
    }

    let latest: Revision = sqlx::query_as(&format!(
        "{SELECT_REVISION} where r.form_id = $1 order by r.form_version desc limit 1"
    ))
    .bind(form_id)
    .fetch_one(&mut txn)
    .await?;

    let name_changed = name != current_name;
    let payload_changed =
        *response_format != latest.response_format.0 || tag_ids != latest.tag_ids.as_slice();

    if name_changed {
        sqlx::query("update forms set name = $2 where form_id = $1")
            .bind(form_id)
            .bind(name)
            .execute(&mut txn)
            .await?;
    }

    let revision = if payload_changed {
        let (version,): (i32,) = sqlx::query_as(
            r#"
            update forms set form_version = form_version + 1
            where form_id = $1
            returning form_version
            "#,
        )
        .bind(form_id)
        .fetch_one(&mut txn)
        .await?;

        insert_revision(
            &mut txn,
            new_revid,
            form_id,
            version,
            response_format,
            tag_ids,
            organization_id,
            created_by,
        )
        .await?
    } else {
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
    form_revid: Id,
) -> sqlx::Result<Option<Revision>> {
    sqlx::query_as(&format!(
        "{SELECT_REVISION} where r.organization_id = $1 and r.form_revid = $2"
    ))
    .bind(organization_id)
    .bind(form_revid)
    .fetch_optional(pool)
    .await
}

pub async fn list_latest(
    pool: &sqlx::PgPool,
    organization_id: Id,
    name_search: Option<&str>,
    tag_ids: Option<&[Id]>,
    skip: i64,
    limit: i64,
) -> sqlx::Result<(Vec<Revision>, i64)> {
    let name_pattern = name_search.map(crate::ilike_contains);
    let tag_ids: Option<Vec<Id>> = tag_ids.map(|t| t.to_vec());

    let latest_clause = r#"
        select distinct on (r.form_id)
            r.form_revid, r.form_id, p.name, r.form_version, r.response_format,
            r.tag_ids, r.organization_id, r.created_at, r.created_by
        from form_revisions r
        join forms p on p.form_id = r.form_id
        where p.organization_id = $1
          and ($2::text is null or p.name ilike $2)
        order by r.form_id, r.form_version desc
    "#;

    let rows: Vec<Revision> = sqlx::query_as(&format!(
        r#"
        select * from ({latest_clause}) latest
        where ($3::text[] is null or latest.tag_ids && $3)
        order by form_id desc
        offset $4 limit $5
        "#
    ))
    .bind(organization_id)
    .bind(&name_pattern)
    .bind(&tag_ids)
    .bind(skip.max(0))
    .bind(crate::clamp_limit(limit))
    .fetch_all(pool)
    .await?;

    let (total_count,): (i64,) = sqlx::query_as(&format!(
        r#"
        select count(*) from ({latest_clause}) latest
        where ($3::text[] is null or latest.tag_ids && $3)
        "#
    ))
    .bind(organization_id)
    .bind(&name_pattern)
    .bind(&tag_ids)
    .fetch_one(pool)
    .await?;

    Ok((rows, total_count))
}

pub async fn delete(pool: &sqlx::PgPool, organization_id: Id, form_id: Id) -> Result<(), Error> {
    let done = sqlx::query("delete from forms where organization_id = $1 and form_id = $2")
        .bind(organization_id)
        .bind(form_id)
        .execute(pool)
        .await?;
    if done.rows_affected() == 0 {
        return Err(Error::NotFound);
    }
    Ok(())
}

/// Count form revisions referencing a tag, for tag deletion checks.
pub async fn count_with_tag(
    pool: &sqlx::PgPool,
    organization_id: Id,
    tag_id: Id,
) -> sqlx::Result<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "select count(*) from form_revisions where organization_id = $1 and $2 = any(tag_ids)",
    )
    .bind(organization_id)
    .bind(tag_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Upsert a form submission on its `(document, form revision, org)` key.
pub async fn upsert_submission(
    pool: &sqlx::PgPool,
    new_id: Id,
    organization_id: Id,
    document_id: Id,
    form_revid: Id,
    submission_data: &serde_json::Value,
    submitted_by: Id,
) -> sqlx::Result<Submission> {
    sqlx::query_as(
        r#"
        insert into form_submissions
            (id, organization_id, document_id, form_revid, submission_data, submitted_by)
        values ($1, $2, $3, $4, $5, $6)
        on conflict (document_id, form_revid, organization_id) do update set
            submission_data = excluded.submission_data,
            submitted_by = excluded.submitted_by,
            updated_at = now()
        returning
            id, organization_id, document_id, form_revid, submission_data,
            submitted_by, created_at, updated_at
        "#,
    )
    .bind(new_id)
    .bind(organization_id)
    .bind(document_id)
    .bind(form_revid)
    .bind(Json(submission_data))
    .bind(submitted_by)
    .fetch_one(pool)
    .await
}

pub async fn fetch_submission(
    pool: &sqlx::PgPool,
    organization_id: Id,
    document_id: Id,
    form_revid: Id,
) -> sqlx::Result<Option<Submission>> {
    sqlx::query_as(
        r#"
        select
            id, organization_id, document_id, form_revid, submission_data,
            submitted_by, created_at, updated_at
        from form_submissions
        where organization_id = $1 and document_id = $2 and form_revid = $3
        "#,
    )
    .bind(organization_id)
    .bind(document_id)
    .bind(form_revid)
    .fetch_optional(pool)
    .await
}

pub async fn delete_submission(
    pool: &sqlx::PgPool,
    organization_id: Id,
    document_id: Id,
    form_revid: Id,
) -> sqlx::Result<bool> {
    let done = sqlx::query(
        r#"
        delete from form_submissions
        where organization_id = $1 and document_id = $2 and form_revid = $3
        "#,
    )
    .bind(organization_id)
    .bind(document_id)
    .bind(form_revid)
    .execute(pool)
    .await?;
    Ok(done.rows_affected() == 1)
}

/// Purge every submission of a document, as part of document deletion.
pub async fn delete_submissions_for_document(
    pool: &sqlx::PgPool,
    organization_id: Id,
    document_id: Id,
) -> sqlx::Result<u64> {
    let done =
        sqlx::query("delete from form_submissions where organization_id = $1 and document_id = $2")
            .bind(organization_id)
            .bind(document_id)
            .execute(pool)
            .await?;
    Ok(done.rows_affected())
}
