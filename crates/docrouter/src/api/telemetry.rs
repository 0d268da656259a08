use super::{ApiError, Request};
use crate::app::App;
use crate::auth;
use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use models::{Id, Operation, Principal, Severity};
use std::collections::BTreeMap;
use std::sync::Arc;
use validator::Validate;

#[derive(Debug, serde::Deserialize, serde::Serialize)]
pub struct TraceUpload {
    pub resource_spans: Vec<serde_json::Value>,
    #[serde(default)]
    pub tag_ids: Vec<Id>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, serde::Deserialize, Validate)]
pub struct TracesUploadRequest {
    #[validate(length(min = 1, message = "at least one trace is required"))]
    pub traces: Vec<TraceUpload>,
}

/// Count the spans nested under a trace's resource spans.
pub fn span_count(resource_spans: &[serde_json::Value]) -> i32 {
    resource_spans
        .iter()
        .flat_map(|rs| rs.get("scope_spans").and_then(|v| v.as_array()))
        .flatten()
        .flat_map(|ss| ss.get("spans").and_then(|v| v.as_array()))
        .map(|spans| spans.len() as i32)
        .sum()
}

async fn validate_upload_tags<'a, I>(app: &App, organization_id: Id, tags: I) -> Result<(), ApiError>
where
    I: Iterator<Item = &'a [Id]>,
{
    let mut all: Vec<Id> = tags.flat_map(|t| t.iter().copied()).collect();
    all.sort();
    all.dedup();
    super::require_valid_tags(app, organization_id, &all).await
}

/// Charge one SPU per record before persisting anything.
async fn charge_records(
    app: &App,
    organization_id: Id,
    records: usize,
    operation: Operation,
) -> Result<(), ApiError> {
    let spus = records as f64 * ledger::cost::TELEMETRY_RECORD_SPUS;
    ledger::check_spu(&app.pg_pool, organization_id, spus).await?;
    ledger::record_spu(&app.pg_pool, organization_id, spus, operation, "backend").await?;
    Ok(())
}

pub async fn upload_traces(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path(organization_id): Path<Id>,
    Request(body): Request<TracesUploadRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;
    validate_upload_tags(&app, organization_id, body.traces.iter().map(|t| &t.tag_ids[..]))
        .await?;
    charge_records(&app, organization_id, body.traces.len(), Operation::TelemetryTrace).await?;

    let mut uploaded = Vec::with_capacity(body.traces.len());
    for trace in &body.traces {
        let id = app.next_id();
        let spans = span_count(&trace.resource_spans);
        docrouter_sql::telemetry::insert_trace(
            &app.pg_pool,
            id,
            organization_id,
            &serde_json::Value::Array(trace.resource_spans.clone()),
            spans,
            &principal.user_name,
            &trace.tag_ids,
            &trace.metadata,
        )
        .await?;
        uploaded.push(serde_json::json!({
            "trace_id": id,
            "span_count": spans,
            "tag_ids": trace.tag_ids,
            "metadata": trace.metadata,
        }));
    }

    Ok(Json(serde_json::json!({ "traces": uploaded })))
}

#[derive(Debug, serde::Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "super::default_limit")]
    pub limit: i64,
    pub tag_ids: Option<String>,
    /// ISO-8601 timestamps, interpreted as UTC.
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub severity: Option<String>,
    pub name_search: Option<String>,
}

impl ListQuery {
    fn filter<'a>(&'a self, tag_ids: Option<&'a [Id]>) -> Result<docrouter_sql::telemetry::ListFilter<'a>, ApiError> {
        let severity = self
            .severity
            .as_deref()
            .map(|raw| match raw.to_ascii_uppercase().as_str() {
                "TRACE" => Ok(Severity::Trace),
                "DEBUG" => Ok(Severity::Debug),
                "INFO" => Ok(Severity::Info),
                "WARN" => Ok(Severity::Warn),
                "ERROR" => Ok(Severity::Error),
                "FATAL" => Ok(Severity::Fatal),
                other => Err(ApiError::bad_request(anyhow::anyhow!(
                    "invalid severity {other:?}"
                ))),
            })
            .transpose()?;

        Ok(docrouter_sql::telemetry::ListFilter {
            tag_ids,
            from: self.from,
            to: self.to,
            severity,
            name_search: self.name_search.as_deref(),
        })
    }
}

pub async fn list_traces(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path(organization_id): Path<Id>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;
    let tag_ids = query
        .tag_ids
        .as_deref()
        .map(super::parse_tag_ids)
        .transpose()?;

    let (rows, total) = docrouter_sql::telemetry::list_traces(
        &app.pg_pool,
        organization_id,
        query.filter(tag_ids.as_deref())?,
        query.skip,
        query.limit,
    )
    .await?;

    let traces: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|row| {
            serde_json::json!({
                "trace_id": row.id,
                "span_count": row.span_count,
                "upload_date": row.upload_date,
                "uploaded_by": row.uploaded_by,
                "tag_ids": row.tag_ids,
                "metadata": row.metadata.0,
            })
        })
        .collect();

    Ok(Json(serde_json::json!({
        "traces": traces,
        "total": total,
        "skip": query.skip,
        "limit": query.limit,
    })))
}

#[derive(Debug, serde::Deserialize, serde::Serialize)]
pub struct MetricUpload {
    pub name: String,
    #[serde(default = "default_metric_type")]
    pub metric_type: String,
    pub data_points: Vec<serde_json::Value>,
    #[serde(default)]
    pub tag_ids: Vec<Id>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

fn default_metric_type() -> String {
    "gauge".to_string()
}

#[derive(Debug, serde::Deserialize, Validate)]
pub struct MetricsUploadRequest {
    #[validate(length(min = 1, message = "at least one metric is required"))]
    pub metrics: Vec<MetricUpload>,
}

pub async fn upload_metrics(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path(organization_id): Path<Id>,
    Request(body): Request<MetricsUploadRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;
    validate_upload_tags(&app, organization_id, body.metrics.iter().map(|m| &m.tag_ids[..]))
        .await?;
    charge_records(&app, organization_id, body.metrics.len(), Operation::TelemetryMetric).await?;

    let mut uploaded = Vec::with_capacity(body.metrics.len());
    for metric in &body.metrics {
        let id = app.next_id();
        docrouter_sql::telemetry::insert_metric(
            &app.pg_pool,
            id,
            organization_id,
            &metric.name,
            &metric.metric_type,
            &serde_json::Value::Array(metric.data_points.clone()),
            metric.data_points.len() as i32,
            &principal.user_name,
            &metric.tag_ids,
            &metric.metadata,
        )
        .await?;
        uploaded.push(serde_json::json!({
            "metric_id": id,
            "name": metric.name,
            "data_point_count": metric.data_points.len(),
        }));
    }

    Ok(Json(serde_json::json!({ "metrics": uploaded })))
}

pub async fn list_metrics(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path(organization_id): Path<Id>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;
    let tag_ids = query
        .tag_ids
        .as_deref()
        .map(super::parse_tag_ids)
        .transpose()?;

    let (rows, total) = docrouter_sql::telemetry::list_metrics(
        &app.pg_pool,
        organization_id,
        query.filter(tag_ids.as_deref())?,
        query.skip,
        query.limit,
    )
    .await?;

    let metrics: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|row| {
            serde_json::json!({
                "metric_id": row.id,
                "name": row.name,
                "metric_type": row.metric_type,
                "data_points": row.data_points.0,
                "data_point_count": row.data_point_count,
                "upload_date": row.upload_date,
                "uploaded_by": row.uploaded_by,
                "tag_ids": row.tag_ids,
                "metadata": row.metadata.0,
            })
        })
        .collect();

    Ok(Json(serde_json::json!({
        "metrics": metrics,
        "total": total,
        "skip": query.skip,
        "limit": query.limit,
    })))
}

#[derive(Debug, serde::Deserialize, serde::Serialize)]
pub struct LogUpload {
    pub body: String,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub attributes: serde_json::Value,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub span_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tag_ids: Vec<Id>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, serde::Deserialize, Validate)]
pub struct LogsUploadRequest {
    #[validate(length(min = 1, message = "at least one log is required"))]
    pub logs: Vec<LogUpload>,
}

pub async fn upload_logs(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path(organization_id): Path<Id>,
    Request(body): Request<LogsUploadRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;
    validate_upload_tags(&app, organization_id, body.logs.iter().map(|l| &l.tag_ids[..]))
        .await?;
    charge_records(&app, organization_id, body.logs.len(), Operation::TelemetryLog).await?;

    let mut uploaded = Vec::with_capacity(body.logs.len());
    for log in &body.logs {
        let id = app.next_id();
        let severity = match log.severity.as_deref() {
            Some(raw) => match raw.to_ascii_uppercase().as_str() {
                "TRACE" => Severity::Trace,
                "DEBUG" => Severity::Debug,
                "INFO" => Severity::Info,
                "WARN" => Severity::Warn,
                "ERROR" => Severity::Error,
                "FATAL" => Severity::Fatal,
                _ => Severity::Info,
            },
            None => Severity::Info,
        };
        docrouter_sql::telemetry::insert_log(
            &app.pg_pool,
            id,
            organization_id,
            &log.body,
            severity,
            &log.attributes,
            log.trace_id.as_deref(),
            log.span_id.as_deref(),
            log.timestamp.unwrap_or_else(Utc::now),
            &principal.user_name,
            &log.tag_ids,
            &log.metadata,
        )
        .await?;
        uploaded.push(serde_json::json!({
            "log_id": id,
            "severity": severity,
        }));
    }

    Ok(Json(serde_json::json!({ "logs": uploaded })))
}

pub async fn list_logs(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path(organization_id): Path<Id>,
    Query(query): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;
    let tag_ids = query
        .tag_ids
        .as_deref()
        .map(super::parse_tag_ids)
        .transpose()?;

    let (rows, total) = docrouter_sql::telemetry::list_logs(
        &app.pg_pool,
        organization_id,
        query.filter(tag_ids.as_deref())?,
        query.skip,
        query.limit,
    )
    .await?;

    let logs: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|row| {
            serde_json::json!({
                "log_id": row.id,
                "body": row.body,
                "severity": row.severity,
                "attributes": row.attributes.0,
                "trace_id": row.trace_id,
                "span_id": row.span_id,
                "timestamp": row.timestamp,
                "upload_date": row.upload_date,
                "uploaded_by": row.uploaded_by,
                "tag_ids": row.tag_ids,
                "metadata": row.metadata.0,
            })
        })
        .collect();

    Ok(Json(serde_json::json!({
        "logs": logs,
        "total": total,
        "skip": query.skip,
        "limit": query.limit,
    })))
}

#[cfg(test)]
mod test {
    use super::span_count;
    use serde_json::json;

    #[test]
    fn test_span_count_walks_nested_scopes() {
        let resource_spans = vec![
            json!({
                "scope_spans": [
                    {"spans": [{"name": "a"}, {"name": "b"}]},
                    {"spans": [{"name": "c"}]},
                ]
            }),
            json!({"scope_spans": [{"spans": []}]}),
            json!({"no_scope_spans": true}),
        ];
        assert_eq!(span_count(&resource_spans), 3);
        assert_eq!(span_count(&[]), 0);
    }
}
