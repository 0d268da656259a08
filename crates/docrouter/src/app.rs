use anyhow::Context;
use models::{Id, IdGenerator};
use std::sync::Mutex;

/// Tunables of the daemon, sourced from flags and environment in `main`.
#[derive(Clone, Debug)]
pub struct Config {
    /// Lease held on a queued job before it becomes eligible for redelivery.
    pub lease_duration: std::time::Duration,
    /// Idle sleep between queue polls (jittered per worker).
    pub poll_interval: std::time::Duration,
    /// Attempts before a job transitions its document to the failed state.
    pub max_attempts: i32,
    /// Bound on the synchronous `run_llm` wait for a result row.
    pub run_wait: std::time::Duration,
    /// Backoff applied when a job fails its credit pre-check, long enough
    /// for an operator to intervene.
    pub credit_backoff: std::time::Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lease_duration: std::time::Duration::from_secs(300),
            poll_interval: std::time::Duration::from_millis(500),
            max_attempts: 5,
            run_wait: std::time::Duration::from_secs(30),
            credit_backoff: std::time::Duration::from_secs(300),
        }
    }
}

/// App is the shared context injected into API handlers, the OTLP server,
/// and the workers: the database pool, blob store, provider clients, and
/// the id generator. It is constructed once in `main` and torn down when
/// the joined server futures resolve.
pub struct App {
    pub pg_pool: sqlx::PgPool,
    pub blobs: std::sync::Arc<dyn blobs::BlobStore>,
    pub ocr_provider: std::sync::Arc<dyn ocr::OcrProvider>,
    pub llm_client: llm::Client,
    pub id_generator: Mutex<IdGenerator>,
    pub jwt_secret: jsonwebtoken::DecodingKey,
    pub jwt_validation: jsonwebtoken::Validation,
    pub config: Config,
}

impl App {
    pub fn next_id(&self) -> Id {
        self.id_generator
            .lock()
            .expect("id generator mutex is never poisoned")
            .next()
    }

    /// Load the provider registry from `llm_providers`. Loaded per use so
    /// that admin updates take effect without a restart.
    pub async fn registry(&self) -> anyhow::Result<llm::Registry> {
        let rows = docrouter_sql::providers::load_all(&self.pg_pool)
            .await
            .context("loading llm providers")?;
        let providers = rows
            .into_iter()
            .map(|row| {
                serde_json::from_value(row.config.0)
                    .with_context(|| format!("decoding llm provider {:?}", row.name))
            })
            .collect::<anyhow::Result<Vec<llm::ProviderConfig>>>()?;
        Ok(llm::Registry::new(providers))
    }

    /// Persist one provider's configuration.
    pub async fn save_provider(&self, provider: &llm::ProviderConfig) -> anyhow::Result<()> {
        let config = serde_json::to_value(provider).context("encoding llm provider")?;
        docrouter_sql::providers::upsert(&self.pg_pool, &provider.name, &config)
            .await
            .context("saving llm provider")?;
        Ok(())
    }

    /// Seed `llm_providers` from the built-in catalog on first start.
    pub async fn seed_providers(&self) -> anyhow::Result<()> {
        let catalog = llm::default_catalog()
            .into_iter()
            .map(|p| {
                let value = serde_json::to_value(&p)?;
                Ok((p.name, value))
            })
            .collect::<serde_json::Result<Vec<_>>>()
            .context("encoding default provider catalog")?;
        let seeded = docrouter_sql::providers::seed_if_empty(&self.pg_pool, &catalog)
            .await
            .context("seeding llm providers")?;
        if seeded {
            tracing::info!("seeded llm provider catalog");
        }
        Ok(())
    }
}
