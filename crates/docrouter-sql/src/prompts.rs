use chrono::{DateTime, Utc};
use models::Id;

/// The mutable payload of a prompt, shared by create and update.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub content: String,
    pub model: String,
    pub schema_id: Option<Id>,
    pub schema_version: Option<i32>,
    pub tag_ids: Vec<Id>,
}

/// A prompt revision joined with its parent's name.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Revision {
    pub prompt_revid: Id,
    pub prompt_id: Id,
    pub name: String,
    pub prompt_version: i32,
    pub content: String,
    pub model: String,
    pub schema_id: Option<Id>,
    pub schema_version: Option<i32>,
    pub tag_ids: Vec<Id>,
    pub organization_id: Id,
    pub created_at: DateTime<Utc>,
    pub created_by: Id,
}

impl Revision {
    pub fn config(&self) -> Config {
        Config {
            content: self.content.clone(),
            model: self.model.clone(),
            schema_id: self.schema_id,
            schema_version: self.schema_version,
            tag_ids: self.tag_ids.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("prompt not found")]
    NotFound,
    #[error("a prompt named {0:?} already exists in this organization")]
    DuplicateName(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

const SELECT_REVISION: &str = r#"
    select
        r.prompt_revid, r.prompt_id, p.name, r.prompt_version, r.content,
        r.model, r.schema_id, r.schema_version, r.tag_ids,
        r.organization_id, r.created_at, r.created_by
    from prompt_revisions r
    join prompts p on p.prompt_id = r.prompt_id
"#;

/// Create a prompt revision, reusing the logical id of an existing
/// same-named prompt or allocating a fresh one.
pub async fn create(
    pool: &sqlx::PgPool,
    new_prompt_id: Id,
    new_revid: Id,
    organization_id: Id,
    name: &str,
    config: &Config,
    created_by: Id,
) -> Result<Revision, Error> {
    let mut txn = pool.begin().await?;

    let existing: Option<(Id,)> = sqlx::query_as(
        "select prompt_id from prompts where organization_id = $1 and lower(name) = lower($2)",
    )
    .bind(organization_id)
    .bind(name)
    .fetch_optional(&mut txn)
    .await?;

    let (prompt_id, version) = match existing {
        Some((prompt_id,)) => {
            let (version,): (i32,) = sqlx::query_as(
                r#"
                update prompts set prompt_version = prompt_version + 1
                where prompt_id = $1
                returning prompt_version
                "#,
            )
            .bind(prompt_id)
            .fetch_one(&mut txn)
            .await?;
            (prompt_id, version)
        }
        None => {
            sqlx::query(
                "insert into prompts (prompt_id, organization_id, name) values ($1, $2, $3)",
            )
            .bind(new_prompt_id)
            .bind(organization_id)
            .bind(name)
            .execute(&mut txn)
            .await?;
            (new_prompt_id, 1)
        }
    };

    let revision = insert_revision(
        &mut txn,
        new_revid,
        prompt_id,
        version,
        config,
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
    prompt_id: Id,
    version: i32,
    config: &Config,
    organization_id: Id,
    created_by: Id,
) -> sqlx::Result<Revision> {
    sqlx::query(
        r#"
        insert into prompt_revisions
            (prompt_revid, prompt_id, prompt_version, content, model,
             schema_id, schema_version, tag_ids, organization_id, created_by)
        values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(revid)
    .bind(prompt_id)
    .bind(version)
    .bind(&config.content)
    .bind(&config.model)
    .bind(config.schema_id)
    .bind(config.schema_version)
    .bind(&config.tag_ids)
    .bind(organization_id)
    .bind(created_by)
    .execute(&mut *txn)
    .await?;

    sqlx::query_as(&format!("{SELECT_REVISION} where r.prompt_revid = $1"))
        .bind(revid)
        .fetch_one(&mut *txn)
        .await
}

/// Update a prompt by logical id: rename-only mutates the parent and keeps
/// the latest revision; any config change allocates the next version.
pub async fn update(
    pool: &sqlx::PgPool,
    new_revid: Id,
    organization_id: Id,
    prompt_id: Id,
    name: &str,
    config: &Config,
    created_by: Id,
) -> Result<Revision, Error> {
    let mut txn = pool.begin().await?;

    let parent: Option<(String,)> = sqlx::query_as(
        "select name from prompts where organization_id = $1 and prompt_id = $2 for update",
    )
    .bind(organization_id)
    .bind(prompt_id)
    .fetch_optional(&mut txn)
    .await?;
    let Some((current_name,)) = parent else {
        return Err(Error::NotFound);
    };

    if !name.eq_ignore_ascii_case(&current_name) {
        let taken: Option<(Id,)> = sqlx::query_as(
            r#"
            select prompt_id from prompts
            where organization_id = $1 and lower(name) = lower($2) and prompt_id != $3
            "#,
        )
        .bind(organization_id)
        .bind(name)
        .bind(prompt_id)
        .fetch_optional(&mut txn)
        .await?;
        if taken.is_some() {
            return Err(Error::DuplicateName(name.to_string()));
        }
    }

    let latest: Revision = sqlx::query_as(&format!(
        "{SELECT_REVISION} where r.prompt_id = $1 order by r.prompt_version desc limit 1"
    ))
    .bind(prompt_id)
    .fetch_one(&mut txn)
    .await?;

    let name_changed = name != current_name;
    let config_changed = *config != latest.config();

    if name_changed {
        sqlx::query("update prompts set name = $2 where prompt_id = $1")
            .bind(prompt_id)
            .bind(name)
            .execute(&mut txn)
            .await?;
    }

    let revision = if config_changed {
        let (version,): (i32,) = sqlx::query_as(
            r#"
            update prompts set prompt_version = prompt_version + 1
            where prompt_id = $1
            returning prompt_version
            "#,
        )
        .bind(prompt_id)
        .fetch_one(&mut txn)
        .await?;

        insert_revision(
            &mut txn,
            new_revid,
            prompt_id,
            version,
            config,
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
    prompt_revid: Id,
) -> sqlx::Result<Option<Revision>> {
    sqlx::query_as(&format!(
        "{SELECT_REVISION} where r.organization_id = $1 and r.prompt_revid = $2"
    ))
    .bind(organization_id)
    .bind(prompt_revid)
    .fetch_optional(pool)
    .await
}

pub struct ListFilter<'a> {
    pub name_search: Option<&'a str>,
    /// Require every one of these tags on the latest revision.
    pub tag_ids: Option<&'a [Id]>,
    /// Restrict to prompts whose tags intersect this set (a document's
    /// tags). An empty slice matches nothing.
    pub intersects_tags: Option<&'a [Id]>,
}

/// List the latest revision of every prompt in the organization, newest
/// logical id first.
pub async fn list_latest(
    pool: &sqlx::PgPool,
    organization_id: Id,
    filter: ListFilter<'_>,
    skip: i64,
    limit: i64,
) -> sqlx::Result<(Vec<Revision>, i64)> {
    let name_pattern = filter.name_search.map(crate::ilike_contains);
    let tag_ids: Option<Vec<Id>> = filter.tag_ids.map(|t| t.to_vec());
    let intersects: Option<Vec<Id>> = filter.intersects_tags.map(|t| t.to_vec());

    let latest_clause = r#"
        select distinct on (r.prompt_id)
            r.prompt_revid, r.prompt_id, p.name, r.prompt_version, r.content,
            r.model, r.schema_id, r.schema_version, r.tag_ids,
            r.organization_id, r.created_at, r.created_by
        from prompt_revisions r
        join prompts p on p.prompt_id = r.prompt_id
        where p.organization_id = $1
          and ($2::text is null or p.name ilike $2)
        order by r.prompt_id, r.prompt_version desc
    "#;

    let rows: Vec<Revision> = sqlx::query_as(&format!(
        r#"
        select * from ({latest_clause}) latest
        where ($3::text[] is null or latest.tag_ids @> $3)
          and ($4::text[] is null or latest.tag_ids && $4)
        order by prompt_id desc
        offset $5 limit $6
        "#
    ))
    .bind(organization_id)
    .bind(&name_pattern)
    .bind(&tag_ids)
    .bind(&intersects)
    .bind(skip.max(0))
    .bind(crate::clamp_limit(limit))
    .fetch_all(pool)
    .await?;

    let (total_count,): (i64,) = sqlx::query_as(&format!(
        r#"
        select count(*) from ({latest_clause}) latest
        where ($3::text[] is null or latest.tag_ids @> $3)
          and ($4::text[] is null or latest.tag_ids && $4)
        "#
    ))
    .bind(organization_id)
    .bind(&name_pattern)
    .bind(&tag_ids)
    .bind(&intersects)
    .fetch_one(pool)
    .await?;

    Ok((rows, total_count))
}

/// The latest revisions whose tag sets intersect a document's tags: the
/// fanout set of a `"default"` LLM job. Documents without tags fan out to
/// no concrete prompt.
pub async fn latest_matching_tags(
    pool: &sqlx::PgPool,
    organization_id: Id,
    document_tags: &[Id],
) -> sqlx::Result<Vec<Revision>> {
    if document_tags.is_empty() {
        return Ok(Vec::new());
    }
    let document_tags = document_tags.to_vec();
    sqlx::query_as(
        r#"
        select * from (
            select distinct on (r.prompt_id)
                r.prompt_revid, r.prompt_id, p.name, r.prompt_version, r.content,
                r.model, r.schema_id, r.schema_version, r.tag_ids,
                r.organization_id, r.created_at, r.created_by
            from prompt_revisions r
            join prompts p on p.prompt_id = r.prompt_id
            where p.organization_id = $1
            order by r.prompt_id, r.prompt_version desc
        ) latest
        where latest.tag_ids && $2
        order by prompt_id
        "#,
    )
    .bind(organization_id)
    .bind(&document_tags)
    .fetch_all(pool)
    .await
}

/// Count prompt revisions referencing a tag, for tag deletion checks.
pub async fn count_with_tag(
    pool: &sqlx::PgPool,
    organization_id: Id,
    tag_id: Id,
) -> sqlx::Result<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "select count(*) from prompt_revisions where organization_id = $1 and $2 = any(tag_ids)",
    )
    .bind(organization_id)
    .bind(tag_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Delete a prompt and all of its revisions.
pub async fn delete(pool: &sqlx::PgPool, organization_id: Id, prompt_id: Id) -> Result<(), Error> {
    let done = sqlx::query("delete from prompts where organization_id = $1 and prompt_id = $2")
        .bind(organization_id)
        .bind(prompt_id)
        .execute(pool)
        .await?;
    if done.rows_affected() == 0 {
        return Err(Error::NotFound);
    }
    Ok(())
}
