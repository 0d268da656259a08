use serde_json::value::RawValue;
use sqlx::types::Json;

/// Queue names the two work queues of the pipeline.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Queue {
    Ocr,
    Llm,
}

impl Queue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Queue::Ocr => "ocr",
            Queue::Llm => "llm",
        }
    }
}

impl std::fmt::Display for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message leased by a worker. The lease is exclusive until
/// `lease_duration` elapses or the worker acks/nacks, whichever is first.
#[derive(Debug, sqlx::FromRow)]
pub struct Leased {
    pub id: i64,
    pub payload: Json<Box<RawValue>>,
    pub attempt: i32,
}

impl Leased {
    /// Decode the message payload into its concrete job type.
    pub fn decode<M: serde::de::DeserializeOwned>(&self) -> serde_json::Result<M> {
        serde_json::from_str(self.payload.get())
    }
}

/// Durably enqueue a message. Delivery is at-least-once; consumers are
/// responsible for idempotency.
pub async fn enqueue<M: serde::Serialize>(
    pool: &sqlx::PgPool,
    queue: Queue,
    payload: &M,
) -> anyhow::Result<i64> {
    let payload = serde_json::value::to_raw_value(payload)?;

    let (msg_id,): (i64,) = sqlx::query_as(
        r#"
        insert into job_queue (queue, payload)
        values ($1, $2)
        returning id
        "#,
    )
    .bind(queue.as_str())
    .bind(Json(payload))
    .fetch_one(pool)
    .await?;

    tracing::debug!(%queue, msg_id, "enqueued message");
    Ok(msg_id)
}

/// Atomically lease the oldest ready message of `queue`, marking it as held
/// by `worker_id` until the lease expires. Returns None when no message is
/// ready. A message whose previous lease has expired is ready again, which
/// is what makes delivery at-least-once.
pub async fn lease(
    pool: &sqlx::PgPool,
    queue: Queue,
    worker_id: &str,
    lease_duration: std::time::Duration,
) -> sqlx::Result<Option<Leased>> {
    sqlx::query_as(
        r#"
        with picked as (
            select id
            from job_queue
            where
                queue = $1 and
                available_at <= now() and
                (lease_expires_at is null or lease_expires_at <= now())
            order by id
            limit 1
            for update skip locked
        )
        update job_queue
        set leased_by = $2, lease_expires_at = now() + make_interval(secs => $3)
        where id in (select id from picked)
        returning id, payload, attempt
        "#,
    )
    .bind(queue.as_str())
    .bind(worker_id)
    .bind(lease_duration.as_secs_f64())
    .fetch_optional(pool)
    .await
}

/// Acknowledge (delete) a handled message.
pub async fn ack(pool: &sqlx::PgPool, msg_id: i64) -> sqlx::Result<()> {
    sqlx::query("delete from job_queue where id = $1")
        .bind(msg_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Return a message to the ready state after `requeue_after`, incrementing
/// its attempt counter.
pub async fn nack(
    pool: &sqlx::PgPool,
    msg_id: i64,
    requeue_after: std::time::Duration,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        update job_queue
        set
            leased_by = null,
            lease_expires_at = null,
            attempt = attempt + 1,
            available_at = now() + make_interval(secs => $2)
        where id = $1
        "#,
    )
    .bind(msg_id)
    .bind(requeue_after.as_secs_f64())
    .execute(pool)
    .await?;
    Ok(())
}

/// Restore messages whose lease has expired without an ack, making them
/// immediately eligible for redelivery. Returns the number restored.
pub async fn reap_expired(pool: &sqlx::PgPool) -> sqlx::Result<u64> {
    let done = sqlx::query(
        r#"
        update job_queue
        set leased_by = null, lease_expires_at = null
        where lease_expires_at is not null and lease_expires_at <= now()
        "#,
    )
    .execute(pool)
    .await?;
    Ok(done.rows_affected())
}

/// Exponential retry backoff: 1s, 2s, 4s, 8s, then capped at 16s.
pub fn retry_backoff(attempt: i32) -> std::time::Duration {
    let attempt = attempt.clamp(0, 4) as u32;
    std::time::Duration::from_secs(1u64 << attempt)
}

/// Jitter a poll interval by up to ±10%, spreading lease polls across
/// workers so they don't stampede the queue table in lockstep.
pub fn jittered(interval: std::time::Duration) -> std::time::Duration {
    let jitter = 0.9 + rand::random::<f64>() * 0.2; // [0.9, 1.1)
    interval.mul_f64(jitter)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_retry_backoff_schedule() {
        let secs: Vec<u64> = (0..7).map(|n| retry_backoff(n).as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 16, 16]);
        // A negative attempt count (shouldn't happen) still yields a sane delay.
        assert_eq!(retry_backoff(-1).as_secs(), 1);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let interval = std::time::Duration::from_millis(500);
        for _ in 0..100 {
            let j = jittered(interval);
            assert!(j >= std::time::Duration::from_millis(450));
            assert!(j < std::time::Duration::from_millis(551));
        }
    }

    #[test]
    fn test_queue_names() {
        assert_eq!(Queue::Ocr.as_str(), "ocr");
        assert_eq!(Queue::Llm.as_str(), "llm");
    }
}
