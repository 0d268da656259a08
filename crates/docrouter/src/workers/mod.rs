use crate::app::App;
use models::{Id, RevisionKey};
use std::sync::Arc;

pub mod llm_worker;
pub mod ocr_worker;

/// Payload of an `ocr` queue message.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OcrJob {
    pub document_id: Id,
    /// Re-run OCR even when the document already completed it.
    #[serde(default)]
    pub force: bool,
}

/// Payload of an `llm` queue message. `prompt_revid` may be the literal
/// `"default"`, which fans out to tag-matching prompts plus the implicit
/// default prompt.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LlmJob {
    pub document_id: Id,
    pub prompt_revid: RevisionKey,
    #[serde(default)]
    pub force: bool,
}

/// What to do with a leased message after the handler ran.
#[derive(Debug)]
pub enum Outcome {
    Ack,
    Nack(std::time::Duration),
}

/// Run `n_workers` lease loops plus the expired-lease reaper until
/// `shutdown` resolves. Every job error is caught and classified inside
/// the loop; nothing terminates a worker.
pub async fn serve(
    app: Arc<App>,
    n_workers: usize,
    shutdown: impl std::future::Future<Output = ()> + Clone + Send + 'static,
) -> anyhow::Result<()> {
    let mut joined = Vec::new();
    for index in 0..n_workers {
        let worker_id = format!("worker-{index}");
        joined.push(tokio::spawn(worker_loop(
            app.clone(),
            worker_id,
            shutdown.clone(),
        )));
    }
    joined.push(tokio::spawn(reaper_loop(app.clone(), shutdown)));

    for handle in joined {
        handle.await?;
    }
    Ok(())
}

async fn worker_loop(
    app: Arc<App>,
    worker_id: String,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) {
    tokio::pin!(shutdown);
    tracing::info!(%worker_id, "worker started");

    loop {
        let had_job = tokio::select! {
            () = &mut shutdown => {
                tracing::info!(%worker_id, "worker caught signal; exiting");
                return;
            }
            had_job = step(&app, &worker_id) => had_job,
        };

        if !had_job {
            tokio::time::sleep(queue::jittered(app.config.poll_interval)).await;
        }
    }
}

/// Lease and run at most one job, OCR before LLM. Returns whether a job
/// was found.
async fn step(app: &Arc<App>, worker_id: &str) -> bool {
    for queue_name in [queue::Queue::Ocr, queue::Queue::Llm] {
        let leased = match queue::lease(
            &app.pg_pool,
            queue_name,
            worker_id,
            app.config.lease_duration,
        )
        .await
        {
            Ok(Some(leased)) => leased,
            Ok(None) => continue,
            Err(err) => {
                tracing::error!(%worker_id, %queue_name, error = ?err, "queue lease failed");
                continue;
            }
        };

        let msg_id = leased.id;
        let outcome = match queue_name {
            queue::Queue::Ocr => ocr_worker::process(app, &leased).await,
            queue::Queue::Llm => llm_worker::process(app, &leased).await,
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) if leased.attempt + 1 >= app.config.max_attempts => {
                // An unclassified failure that exhausted its attempts is
                // dead-lettered: dropped with a loud log, rather than
                // poisoning the queue forever.
                tracing::error!(%worker_id, %queue_name, msg_id, attempt = leased.attempt, error = ?err, "job dead-lettered");
                Outcome::Ack
            }
            Err(err) => {
                tracing::error!(%worker_id, %queue_name, msg_id, error = ?err, "job failed");
                Outcome::Nack(queue::retry_backoff(leased.attempt))
            }
        };

        let applied = match outcome {
            Outcome::Ack => queue::ack(&app.pg_pool, msg_id).await,
            Outcome::Nack(delay) => queue::nack(&app.pg_pool, msg_id, delay).await,
        };
        if let Err(err) = applied {
            // The lease will expire and the message will be redelivered.
            tracing::error!(%worker_id, msg_id, error = ?err, "failed to settle message");
        }
        return true;
    }
    false
}

/// Periodically restore messages whose lease expired without an ack.
async fn reaper_loop(
    app: Arc<App>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) {
    tokio::pin!(shutdown);
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));

    loop {
        tokio::select! {
            () = &mut shutdown => return,
            _ = interval.tick() => (),
        }
        match queue::reap_expired(&app.pg_pool).await {
            Ok(0) => (),
            Ok(restored) => tracing::info!(restored, "restored expired job leases"),
            Err(err) => tracing::error!(error = ?err, "lease reaper failed"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{LlmJob, OcrJob};
    use models::RevisionKey;

    #[test]
    fn test_job_payload_shapes() {
        let ocr: OcrJob = serde_json::from_str(
            r#"{"document_id": "0102030405060708090a0b0c"}"#,
        )
        .unwrap();
        assert!(!ocr.force);

        let llm: LlmJob = serde_json::from_str(
            r#"{"document_id": "0102030405060708090a0b0c", "prompt_revid": "default"}"#,
        )
        .unwrap();
        assert_eq!(llm.prompt_revid, RevisionKey::Default);

        let json = serde_json::to_value(&llm).unwrap();
        assert_eq!(json["prompt_revid"], "default");
    }
}
