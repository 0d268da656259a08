use super::ApiError;
use crate::app::App;
use crate::auth;
use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use chrono::NaiveDate;
use models::{Id, Principal};
use std::sync::Arc;

#[derive(Debug, serde::Deserialize)]
pub struct UsageRangeQuery {
    pub start: NaiveDate,
    pub end: NaiveDate,
    #[serde(default)]
    pub per_operation: bool,
    /// IANA timezone name used for day bucketing; defaults to UTC.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Aggregate the organization's usage records by calendar day over an
/// inclusive date range, optionally broken down per operation.
pub async fn usage_range(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path(organization_id): Path<Id>,
    Query(query): Query<UsageRangeQuery>,
) -> Result<Json<ledger::UsageReport>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;

    if query.end < query.start {
        return Err(ApiError::bad_request(anyhow::anyhow!(
            "end date precedes start date"
        )));
    }

    let tz: chrono_tz::Tz = query.timezone.parse().map_err(|_| {
        ApiError::bad_request(anyhow::anyhow!("unknown timezone {:?}", query.timezone))
    })?;

    let report = ledger::usage_range(
        &app.pg_pool,
        organization_id,
        query.start,
        query.end,
        query.per_operation,
        tz,
    )
    .await?;

    Ok(Json(report))
}
