use sqlx::types::Json;

/// A row of `llm_providers`. The provider configuration (catalog, enabled
/// models, credential) is stored as one JSON document and interpreted by
/// the provider registry at the application layer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Row {
    pub name: String,
    pub config: Json<serde_json::Value>,
}

pub async fn load_all(pool: &sqlx::PgPool) -> sqlx::Result<Vec<Row>> {
    sqlx::query_as("select name, config from llm_providers order by name")
        .fetch_all(pool)
        .await
}

pub async fn upsert(
    pool: &sqlx::PgPool,
    name: &str,
    config: &serde_json::Value,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        insert into llm_providers (name, config)
        values ($1, $2)
        on conflict (name) do update set config = excluded.config, updated_at = now()
        "#,
    )
    .bind(name)
    .bind(Json(config))
    .execute(pool)
    .await?;
    Ok(())
}

/// Seed the provider table from a default catalog if it is empty.
/// Returns whether seeding happened.
pub async fn seed_if_empty(
    pool: &sqlx::PgPool,
    catalog: &[(String, serde_json::Value)],
) -> sqlx::Result<bool> {
    let (count,): (i64,) = sqlx::query_as("select count(*) from llm_providers")
        .fetch_one(pool)
        .await?;
    if count > 0 {
        return Ok(false);
    }
    for (name, config) in catalog {
        upsert(pool, name, config).await?;
    }
    Ok(true)
}
