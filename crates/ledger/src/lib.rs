use chrono::NaiveDate;
use chrono_tz::Tz;
use models::{Id, Operation};

mod balance;
pub mod cost;
mod usage;

pub use balance::{Balances, Debits};
pub use usage::{bucket_by_day, day_start_utc, DataPoint, UsageReport, UsageRow};

/// Credits granted to every organization on first touch.
pub const DEFAULT_GRANTED_CREDITS: f64 = 100.0;

/// Raised when an organization's stacked balances cannot cover a usage
/// pre-check. Carries what was required and what remains.
#[derive(Debug, Clone, Copy, thiserror::Error, serde::Serialize)]
#[error("required {required} SPUs but only {available} are available")]
pub struct SpuCreditError {
    pub required: f64,
    pub available: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Credit(#[from] SpuCreditError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

#[derive(sqlx::FromRow)]
struct CustomerRow {
    subscription_spu_allowance: f64,
    subscription_spus_used: f64,
    purchased_credits: f64,
    purchased_credits_used: f64,
    granted_credits: f64,
    granted_credits_used: f64,
}

impl From<CustomerRow> for Balances {
    fn from(r: CustomerRow) -> Balances {
        Balances {
            subscription_spu_allowance: r.subscription_spu_allowance,
            subscription_spus_used: r.subscription_spus_used,
            purchased_credits: r.purchased_credits,
            purchased_credits_used: r.purchased_credits_used,
            granted_credits: r.granted_credits,
            granted_credits_used: r.granted_credits_used,
        }
    }
}

const SELECT_BALANCES: &str = r#"
    select
        subscription_spu_allowance,
        subscription_spus_used,
        purchased_credits,
        purchased_credits_used,
        granted_credits,
        granted_credits_used
    from payments_customers
    where org_id = $1
"#;

/// Create the organization's customer row with the default credit grant if
/// it doesn't exist yet.
pub async fn ensure_customer(pool: &sqlx::PgPool, org_id: Id) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        insert into payments_customers (org_id, granted_credits)
        values ($1, $2)
        on conflict (org_id) do nothing
        "#,
    )
    .bind(org_id.to_string())
    .bind(DEFAULT_GRANTED_CREDITS)
    .execute(pool)
    .await?;
    Ok(())
}

/// Fetch the organization's current balances, creating its customer row on
/// first touch.
pub async fn fetch_balances(pool: &sqlx::PgPool, org_id: Id) -> sqlx::Result<Balances> {
    ensure_customer(pool, org_id).await?;
    let row: CustomerRow = sqlx::query_as(SELECT_BALANCES)
        .bind(org_id.to_string())
        .fetch_one(pool)
        .await?;
    Ok(row.into())
}

/// Advisory pre-check: does the organization have at least `required` SPUs
/// across its stacked balances? Non-locking; the actual debit happens after
/// the metered work succeeds, so concurrent usage can still overdraw by a
/// bounded amount.
pub async fn check_spu(pool: &sqlx::PgPool, org_id: Id, required: f64) -> Result<(), Error> {
    let balances = fetch_balances(pool, org_id).await?;
    let available = balances.available();
    if available < required {
        return Err(SpuCreditError {
            required,
            available,
        }
        .into());
    }
    Ok(())
}

/// Record a usage event: append a usage record and debit the balances,
/// subscription quota first, then purchased, then granted.
pub async fn record_spu(
    pool: &sqlx::PgPool,
    org_id: Id,
    spus: f64,
    operation: Operation,
    source: &str,
) -> sqlx::Result<()> {
    ensure_customer(pool, org_id).await?;

    let mut txn = pool.begin().await?;

    let row: CustomerRow = sqlx::query_as(&format!("{SELECT_BALANCES} for update"))
        .bind(org_id.to_string())
        .fetch_one(&mut txn)
        .await?;
    let debits = Balances::from(row).split_debit(spus);

    sqlx::query(
        r#"
        update payments_customers
        set
            subscription_spus_used = subscription_spus_used + $2,
            purchased_credits_used = purchased_credits_used + $3,
            granted_credits_used = granted_credits_used + $4,
            updated_at = now()
        where org_id = $1
        "#,
    )
    .bind(org_id.to_string())
    .bind(debits.subscription)
    .bind(debits.purchased)
    .bind(debits.granted)
    .execute(&mut txn)
    .await?;

    sqlx::query(
        r#"
        insert into payments_usage_records (org_id, spus, operation, source, timestamp)
        values ($1, $2, $3, $4, now())
        "#,
    )
    .bind(org_id.to_string())
    .bind(spus)
    .bind(operation.as_str())
    .bind(source)
    .execute(&mut txn)
    .await?;

    txn.commit().await?;

    tracing::debug!(%org_id, spus, %operation, source, "recorded SPU usage");
    Ok(())
}

#[derive(sqlx::FromRow)]
struct UsageRecordRow {
    timestamp: chrono::DateTime<chrono::Utc>,
    spus: f64,
    operation: String,
}

/// Aggregate an organization's usage records over an inclusive date range,
/// bucketed by calendar day in the given IANA timezone and optionally
/// grouped by operation.
pub async fn usage_range(
    pool: &sqlx::PgPool,
    org_id: Id,
    start: NaiveDate,
    end: NaiveDate,
    per_operation: bool,
    tz: Tz,
) -> anyhow::Result<UsageReport> {
    let range_start = day_start_utc(start, tz);
    let range_end = day_start_utc(end.succ_opt().unwrap_or(end), tz);

    let rows: Vec<UsageRecordRow> = sqlx::query_as(
        r#"
        select timestamp, spus, operation
        from payments_usage_records
        where org_id = $1 and timestamp >= $2 and timestamp < $3
        order by timestamp
        "#,
    )
    .bind(org_id.to_string())
    .bind(range_start)
    .bind(range_end)
    .fetch_all(pool)
    .await?;

    let rows = rows
        .into_iter()
        .map(|r| {
            Ok(UsageRow {
                timestamp: r.timestamp,
                spus: r.spus,
                operation: r.operation.parse()?,
            })
        })
        .collect::<Result<Vec<_>, models::UnknownOperation>>()?;

    Ok(bucket_by_day(&rows, tz, per_operation))
}

#[cfg(test)]
mod test {
    use super::SpuCreditError;

    #[test]
    fn test_credit_error_carries_required_and_available() {
        let err = SpuCreditError {
            required: 51.0,
            available: 50.0,
        };
        assert_eq!(
            err.to_string(),
            "required 51 SPUs but only 50 are available"
        );
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["required"], 51.0);
        assert_eq!(json["available"], 50.0);
    }
}
