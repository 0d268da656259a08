use chrono::{DateTime, Utc};
use models::{Id, Severity};
use sqlx::types::Json;
use std::collections::BTreeMap;

/// A stored trace upload: its resource spans verbatim, plus the span count
/// computed at ingest.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TraceRow {
    pub id: Id,
    pub organization_id: Id,
    pub resource_spans: Json<serde_json::Value>,
    pub span_count: i32,
    pub upload_date: DateTime<Utc>,
    pub uploaded_by: String,
    pub tag_ids: Vec<Id>,
    pub metadata: Json<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MetricRow {
    pub id: Id,
    pub organization_id: Id,
    pub name: String,
    pub metric_type: String,
    pub data_points: Json<serde_json::Value>,
    pub data_point_count: i32,
    pub upload_date: DateTime<Utc>,
    pub uploaded_by: String,
    pub tag_ids: Vec<Id>,
    pub metadata: Json<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LogRow {
    pub id: Id,
    pub organization_id: Id,
    pub body: String,
    pub severity: String,
    pub attributes: Json<serde_json::Value>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub upload_date: DateTime<Utc>,
    pub uploaded_by: String,
    pub tag_ids: Vec<Id>,
    pub metadata: Json<BTreeMap<String, String>>,
}

/// Filters shared by the three list endpoints. Severity only applies to
/// logs; name search only to metrics.
#[derive(Debug, Default)]
pub struct ListFilter<'a> {
    pub tag_ids: Option<&'a [Id]>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub severity: Option<Severity>,
    pub name_search: Option<&'a str>,
}

pub async fn insert_trace(
    pool: &sqlx::PgPool,
    id: Id,
    organization_id: Id,
    resource_spans: &serde_json::Value,
    span_count: i32,
    uploaded_by: &str,
    tag_ids: &[Id],
    metadata: &BTreeMap<String, String>,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        insert into telemetry_traces
            (id, organization_id, resource_spans, span_count, uploaded_by, tag_ids, metadata)
        values ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(id)
    .bind(organization_id)
    .bind(Json(resource_spans))
    .bind(span_count)
    .bind(uploaded_by)
    .bind(tag_ids.to_vec())
    .bind(Json(metadata))
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_traces(
    pool: &sqlx::PgPool,
    organization_id: Id,
    filter: ListFilter<'_>,
    skip: i64,
    limit: i64,
) -> sqlx::Result<(Vec<TraceRow>, i64)> {
    let tag_ids: Option<Vec<Id>> = filter.tag_ids.map(|t| t.to_vec());
    let where_clause = r#"
        organization_id = $1
        and ($2::text[] is null or tag_ids && $2)
        and ($3::timestamptz is null or upload_date >= $3)
        and ($4::timestamptz is null or upload_date <= $4)
    "#;

    let rows: Vec<TraceRow> = sqlx::query_as(&format!(
        r#"
        select id, organization_id, resource_spans, span_count, upload_date,
               uploaded_by, tag_ids, metadata
        from telemetry_traces
        where {where_clause}
        order by upload_date desc, id desc
        offset $5 limit $6
        "#
    ))
    .bind(organization_id)
    .bind(&tag_ids)
    .bind(filter.from)
    .bind(filter.to)
    .bind(skip.max(0))
    .bind(crate::clamp_limit(limit))
    .fetch_all(pool)
    .await?;

    let (total,): (i64,) = sqlx::query_as(&format!(
        "select count(*) from telemetry_traces where {where_clause}"
    ))
    .bind(organization_id)
    .bind(&tag_ids)
    .bind(filter.from)
    .bind(filter.to)
    .fetch_one(pool)
    .await?;

    Ok((rows, total))
}

pub async fn insert_metric(
    pool: &sqlx::PgPool,
    id: Id,
    organization_id: Id,
    name: &str,
    metric_type: &str,
    data_points: &serde_json::Value,
    data_point_count: i32,
    uploaded_by: &str,
    tag_ids: &[Id],
    metadata: &BTreeMap<String, String>,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        insert into telemetry_metrics
            (id, organization_id, name, metric_type, data_points, data_point_count,
             uploaded_by, tag_ids, metadata)
        values ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(id)
    .bind(organization_id)
    .bind(name)
    .bind(metric_type)
    .bind(Json(data_points))
    .bind(data_point_count)
    .bind(uploaded_by)
    .bind(tag_ids.to_vec())
    .bind(Json(metadata))
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_metrics(
    pool: &sqlx::PgPool,
    organization_id: Id,
    filter: ListFilter<'_>,
    skip: i64,
    limit: i64,
) -> sqlx::Result<(Vec<MetricRow>, i64)> {
    let tag_ids: Option<Vec<Id>> = filter.tag_ids.map(|t| t.to_vec());
    let name_pattern = filter.name_search.map(crate::ilike_contains);
    let where_clause = r#"
        organization_id = $1
        and ($2::text[] is null or tag_ids && $2)
        and ($3::timestamptz is null or upload_date >= $3)
        and ($4::timestamptz is null or upload_date <= $4)
        and ($5::text is null or name ilike $5)
    "#;

    let rows: Vec<MetricRow> = sqlx::query_as(&format!(
        r#"
        select id, organization_id, name, metric_type, data_points, data_point_count,
               upload_date, uploaded_by, tag_ids, metadata
        from telemetry_metrics
        where {where_clause}
        order by upload_date desc, id desc
        offset $6 limit $7
        "#
    ))
    .bind(organization_id)
    .bind(&tag_ids)
    .bind(filter.from)
    .bind(filter.to)
    .bind(&name_pattern)
    .bind(skip.max(0))
    .bind(crate::clamp_limit(limit))
    .fetch_all(pool)
    .await?;

    let (total,): (i64,) = sqlx::query_as(&format!(
        "select count(*) from telemetry_metrics where {where_clause}"
    ))
    .bind(organization_id)
    .bind(&tag_ids)
    .bind(filter.from)
    .bind(filter.to)
    .bind(&name_pattern)
    .fetch_one(pool)
    .await?;

    Ok((rows, total))
}

pub async fn insert_log(
    pool: &sqlx::PgPool,
    id: Id,
    organization_id: Id,
    body: &str,
    severity: Severity,
    attributes: &serde_json::Value,
    trace_id: Option<&str>,
    span_id: Option<&str>,
    timestamp: DateTime<Utc>,
    uploaded_by: &str,
    tag_ids: &[Id],
    metadata: &BTreeMap<String, String>,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        insert into telemetry_logs
            (id, organization_id, body, severity, attributes, trace_id, span_id,
             timestamp, uploaded_by, tag_ids, metadata)
        values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(id)
    .bind(organization_id)
    .bind(body)
    .bind(severity.as_str())
    .bind(Json(attributes))
    .bind(trace_id)
    .bind(span_id)
    .bind(timestamp)
    .bind(uploaded_by)
    .bind(tag_ids.to_vec())
    .bind(Json(metadata))
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_logs(
    pool: &sqlx::PgPool,
    organization_id: Id,
    filter: ListFilter<'_>,
    skip: i64,
    limit: i64,
) -> sqlx::Result<(Vec<LogRow>, i64)> {
    let tag_ids: Option<Vec<Id>> = filter.tag_ids.map(|t| t.to_vec());
    let severity = filter.severity.map(|s| s.as_str());
    let where_clause = r#"
        organization_id = $1
        and ($2::text[] is null or tag_ids && $2)
        and ($3::timestamptz is null or timestamp >= $3)
        and ($4::timestamptz is null or timestamp <= $4)
        and ($5::text is null or severity = $5)
    "#;

    let rows: Vec<LogRow> = sqlx::query_as(&format!(
        r#"
        select id, organization_id, body, severity, attributes, trace_id, span_id,
               timestamp, upload_date, uploaded_by, tag_ids, metadata
        from telemetry_logs
        where {where_clause}
        order by timestamp desc, id desc
        offset $6 limit $7
        "#
    ))
    .bind(organization_id)
    .bind(&tag_ids)
    .bind(filter.from)
    .bind(filter.to)
    .bind(severity)
    .bind(skip.max(0))
    .bind(crate::clamp_limit(limit))
    .fetch_all(pool)
    .await?;

    let (total,): (i64,) = sqlx::query_as(&format!(
        "select count(*) from telemetry_logs where {where_clause}"
    ))
    .bind(organization_id)
    .bind(&tag_ids)
    .bind(filter.from)
    .bind(filter.to)
    .bind(severity)
    .fetch_one(pool)
    .await?;

    Ok((rows, total))
}

/// Count telemetry records of any type referencing a tag, for tag deletion
/// checks.
pub async fn count_with_tag(
    pool: &sqlx::PgPool,
    organization_id: Id,
    tag_id: Id,
) -> sqlx::Result<i64> {
    let (count,): (i64,) = sqlx::query_as(
        r#"
        select
            (select count(*) from telemetry_traces
                where organization_id = $1 and $2 = any(tag_ids)) +
            (select count(*) from telemetry_metrics
                where organization_id = $1 and $2 = any(tag_ids)) +
            (select count(*) from telemetry_logs
                where organization_id = $1 and $2 = any(tag_ids))
        "#,
    )
    .bind(organization_id)
    .bind(tag_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}
