//! OTLP/gRPC telemetry ingest: the unmodified
//! `opentelemetry.proto.collector.{trace,metrics,logs}.v1` Export services,
//! routed to the authenticated organization and metered per record.

use crate::app::App;
use crate::auth;
use models::{Credential, Id, Operation, Severity};
use std::sync::Arc;
use tonic::{Request, Response, Status};

use opentelemetry_proto::tonic::collector::logs::v1::{
    logs_service_server::{LogsService, LogsServiceServer},
    ExportLogsServiceRequest, ExportLogsServiceResponse,
};
use opentelemetry_proto::tonic::collector::metrics::v1::{
    metrics_service_server::{MetricsService, MetricsServiceServer},
    ExportMetricsServiceRequest, ExportMetricsServiceResponse,
};
use opentelemetry_proto::tonic::collector::trace::v1::{
    trace_service_server::{TraceService, TraceServiceServer},
    ExportTraceServiceRequest, ExportTraceServiceResponse,
};
use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue, KeyValue};
use opentelemetry_proto::tonic::metrics::v1::metric;

/// Attribution recorded on rows ingested over gRPC.
const UPLOADED_BY: &str = "otlp-grpc";

pub struct OtlpServer {
    app: Arc<App>,
}

impl OtlpServer {
    pub fn new(app: Arc<App>) -> Self {
        Self { app }
    }

    /// Serve the three collector services on `listener` until `shutdown`.
    pub async fn serve(
        app: Arc<App>,
        addr: std::net::SocketAddr,
        shutdown: impl std::future::Future<Output = ()>,
    ) -> anyhow::Result<()> {
        tracing::info!(%addr, "otlp grpc server listening");
        tonic::transport::Server::builder()
            .add_service(TraceServiceServer::new(OtlpServer::new(app.clone())))
            .add_service(MetricsServiceServer::new(OtlpServer::new(app.clone())))
            .add_service(LogsServiceServer::new(OtlpServer::new(app)))
            .serve_with_shutdown(addr, shutdown)
            .await?;
        Ok(())
    }
}

/// Extract the `org-<id>` organization from a request authority such as
/// `org-0102030405060708090a0b0c.telemetry.example.com:4317`.
pub fn org_from_authority(authority: &str) -> Option<Id> {
    let host = authority.split(':').next()?;
    let subdomain = host.split('.').next()?;
    subdomain.strip_prefix("org-")?.parse().ok()
}

/// Resolve the organization of an OTLP request, in order: Bearer token,
/// `organization-id` metadata, `org-<id>` subdomain of the authority.
async fn resolve_org<T>(app: &App, request: &Request<T>) -> Result<Id, Status> {
    let metadata = request.metadata();

    if let Some(authorization) = metadata.get("authorization") {
        let raw = authorization
            .to_str()
            .map_err(|_| Status::unauthenticated("malformed authorization metadata"))?;
        let token = raw
            .strip_prefix("Bearer ")
            .ok_or_else(|| Status::unauthenticated("authorization must be a Bearer token"))?;
        let principal = auth::resolve_token(app, token)
            .await
            .map_err(|err| Status::unauthenticated(format!("{:#}", err.error)))?;
        return match principal.credential {
            Credential::OrgToken(org_id) => Ok(org_id),
            _ => Err(Status::unauthenticated(
                "token is not associated with an organization",
            )),
        };
    }

    if let Some(org_id) = metadata.get("organization-id") {
        let raw = org_id
            .to_str()
            .map_err(|_| Status::unauthenticated("malformed organization-id metadata"))?;
        let org_id: Id = raw
            .parse()
            .map_err(|_| Status::unauthenticated("malformed organization-id metadata"))?;
        return verify_org_exists(app, org_id).await;
    }

    // Fall back to an `org-<id>` subdomain in the request authority, set
    // by per-tenant collector endpoints behind a wildcard DNS record.
    if let Some(authority) = metadata.get("host").and_then(|h| h.to_str().ok()) {
        if let Some(org_id) = org_from_authority(authority) {
            return verify_org_exists(app, org_id).await;
        }
    }

    Err(Status::unauthenticated(
        "no organization could be resolved for this request",
    ))
}

async fn verify_org_exists(app: &App, org_id: Id) -> Result<Id, Status> {
    let org = docrouter_sql::organizations::fetch(&app.pg_pool, org_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "organization lookup failed");
            Status::internal("organization lookup failed")
        })?;
    match org {
        Some(_) => Ok(org_id),
        None => Err(Status::unauthenticated("unknown organization")),
    }
}

/// Charge one SPU per record before persisting, mapping credit exhaustion
/// onto RESOURCE_EXHAUSTED.
async fn charge(app: &App, org_id: Id, records: usize, operation: Operation) -> Result<(), Status> {
    let spus = records as f64 * ledger::cost::TELEMETRY_RECORD_SPUS;
    match ledger::check_spu(&app.pg_pool, org_id, spus).await {
        Ok(()) => (),
        Err(ledger::Error::Credit(err)) => {
            return Err(Status::resource_exhausted(format!(
                "insufficient SPU credits: {err}"
            )))
        }
        Err(ledger::Error::Sqlx(err)) => {
            tracing::error!(error = ?err, "credit check failed");
            return Err(Status::internal("credit check failed"));
        }
    }
    ledger::record_spu(&app.pg_pool, org_id, spus, operation, UPLOADED_BY)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "usage recording failed");
            Status::internal("usage recording failed")
        })
}

fn internal(err: impl std::fmt::Debug, what: &str) -> Status {
    tracing::error!(error = ?err, what, "otlp ingest failed");
    Status::internal(format!("{what} failed"))
}

/// Render an OTLP AnyValue as the flat string stored in the log body.
pub fn any_value_to_string(value: &AnyValue) -> String {
    match &value.value {
        Some(any_value::Value::StringValue(s)) => s.clone(),
        Some(any_value::Value::BoolValue(b)) => b.to_string(),
        Some(any_value::Value::IntValue(i)) => i.to_string(),
        Some(any_value::Value::DoubleValue(d)) => d.to_string(),
        Some(any_value::Value::BytesValue(b)) => base64::encode(b),
        Some(other) => serde_json::to_string(other).unwrap_or_default(),
        None => String::new(),
    }
}

fn attributes_to_json(attributes: &[KeyValue]) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = attributes
        .iter()
        .map(|kv| {
            let value = match &kv.value {
                Some(v) => serde_json::Value::String(any_value_to_string(v)),
                None => serde_json::Value::Null,
            };
            (kv.key.clone(), value)
        })
        .collect();
    serde_json::Value::Object(map)
}

fn nanos_to_datetime(nanos: u64) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp(
        (nanos / 1_000_000_000) as i64,
        (nanos % 1_000_000_000) as u32,
    )
    .unwrap_or_else(chrono::Utc::now)
}

#[tonic::async_trait]
impl TraceService for OtlpServer {
    async fn export(
        &self,
        request: Request<ExportTraceServiceRequest>,
    ) -> Result<Response<ExportTraceServiceResponse>, Status> {
        let org_id = resolve_org(&self.app, &request).await?;
        let request = request.into_inner();

        if request.resource_spans.is_empty() {
            return Ok(Response::new(ExportTraceServiceResponse {
                partial_success: None,
            }));
        }

        let span_count: usize = request
            .resource_spans
            .iter()
            .flat_map(|rs| rs.scope_spans.iter())
            .map(|ss| ss.spans.len())
            .sum();
        // One stored trace row per export request, one SPU per record.
        charge(&self.app, org_id, 1, Operation::TelemetryTrace).await?;

        let resource_spans = serde_json::to_value(&request.resource_spans)
            .map_err(|err| internal(err, "encoding resource spans"))?;

        docrouter_sql::telemetry::insert_trace(
            &self.app.pg_pool,
            self.app.next_id(),
            org_id,
            &resource_spans,
            span_count as i32,
            UPLOADED_BY,
            &[],
            &Default::default(),
        )
        .await
        .map_err(|err| internal(err, "storing trace"))?;

        tracing::debug!(%org_id, span_count, "otlp trace export");
        Ok(Response::new(ExportTraceServiceResponse {
            partial_success: None,
        }))
    }
}

#[tonic::async_trait]
impl MetricsService for OtlpServer {
    async fn export(
        &self,
        request: Request<ExportMetricsServiceRequest>,
    ) -> Result<Response<ExportMetricsServiceResponse>, Status> {
        let org_id = resolve_org(&self.app, &request).await?;
        let request = request.into_inner();

        let metrics: Vec<_> = request
            .resource_metrics
            .iter()
            .flat_map(|rm| rm.scope_metrics.iter())
            .flat_map(|sm| sm.metrics.iter())
            .collect();
        if metrics.is_empty() {
            return Ok(Response::new(ExportMetricsServiceResponse {
                partial_success: None,
            }));
        }
        charge(&self.app, org_id, metrics.len(), Operation::TelemetryMetric).await?;

        for m in metrics {
            let (metric_type, data_points) = match &m.data {
                Some(metric::Data::Gauge(g)) => ("gauge", serde_json::to_value(&g.data_points)),
                Some(metric::Data::Sum(s)) => ("sum", serde_json::to_value(&s.data_points)),
                Some(metric::Data::Histogram(h)) => {
                    ("histogram", serde_json::to_value(&h.data_points))
                }
                Some(metric::Data::ExponentialHistogram(h)) => {
                    ("exponential_histogram", serde_json::to_value(&h.data_points))
                }
                Some(metric::Data::Summary(s)) => ("summary", serde_json::to_value(&s.data_points)),
                None => ("unknown", Ok(serde_json::Value::Array(Vec::new()))),
            };
            let data_points = data_points.map_err(|err| internal(err, "encoding data points"))?;
            let count = data_points.as_array().map(|a| a.len()).unwrap_or(0);

            docrouter_sql::telemetry::insert_metric(
                &self.app.pg_pool,
                self.app.next_id(),
                org_id,
                &m.name,
                metric_type,
                &data_points,
                count as i32,
                UPLOADED_BY,
                &[],
                &Default::default(),
            )
            .await
            .map_err(|err| internal(err, "storing metric"))?;
        }

        Ok(Response::new(ExportMetricsServiceResponse {
            partial_success: None,
        }))
    }
}

#[tonic::async_trait]
impl LogsService for OtlpServer {
    async fn export(
        &self,
        request: Request<ExportLogsServiceRequest>,
    ) -> Result<Response<ExportLogsServiceResponse>, Status> {
        let org_id = resolve_org(&self.app, &request).await?;
        let request = request.into_inner();

        let records: Vec<_> = request
            .resource_logs
            .iter()
            .flat_map(|rl| rl.scope_logs.iter())
            .flat_map(|sl| sl.log_records.iter())
            .collect();
        if records.is_empty() {
            return Ok(Response::new(ExportLogsServiceResponse {
                partial_success: None,
            }));
        }
        charge(&self.app, org_id, records.len(), Operation::TelemetryLog).await?;

        for record in records {
            let body = record
                .body
                .as_ref()
                .map(any_value_to_string)
                .unwrap_or_default();
            let severity = Severity::from_severity_number(record.severity_number);
            let attributes = attributes_to_json(&record.attributes);
            let trace_id = (!record.trace_id.is_empty()).then(|| hex::encode(&record.trace_id));
            let span_id = (!record.span_id.is_empty()).then(|| hex::encode(&record.span_id));
            let timestamp = if record.time_unix_nano > 0 {
                nanos_to_datetime(record.time_unix_nano)
            } else {
                chrono::Utc::now()
            };

            docrouter_sql::telemetry::insert_log(
                &self.app.pg_pool,
                self.app.next_id(),
                org_id,
                &body,
                severity,
                &attributes,
                trace_id.as_deref(),
                span_id.as_deref(),
                timestamp,
                UPLOADED_BY,
                &[],
                &Default::default(),
            )
            .await
            .map_err(|err| internal(err, "storing log record"))?;
        }

        Ok(Response::new(ExportLogsServiceResponse {
            partial_success: None,
        }))
    }
}

#[cfg(test)]
mod test {
    use super::{any_value_to_string, nanos_to_datetime, org_from_authority};
    use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue};

    #[test]
    fn test_org_from_authority() {
        let id = "0102030405060708090a0b0c";
        assert_eq!(
            org_from_authority(&format!("org-{id}.telemetry.example.com:4317")),
            Some(id.parse().unwrap())
        );
        assert_eq!(
            org_from_authority(&format!("org-{id}.example.com")),
            Some(id.parse().unwrap())
        );
        assert_eq!(org_from_authority("telemetry.example.com:4317"), None);
        assert_eq!(org_from_authority("org-nothex.example.com"), None);
        assert_eq!(org_from_authority(""), None);
    }

    #[test]
    fn test_any_value_rendering() {
        let string = AnyValue {
            value: Some(any_value::Value::StringValue("hello".to_string())),
        };
        assert_eq!(any_value_to_string(&string), "hello");

        let int = AnyValue {
            value: Some(any_value::Value::IntValue(42)),
        };
        assert_eq!(any_value_to_string(&int), "42");

        let empty = AnyValue { value: None };
        assert_eq!(any_value_to_string(&empty), "");
    }

    #[test]
    fn test_nanos_to_datetime() {
        let ts = nanos_to_datetime(1_736_982_000_000_000_000);
        assert_eq!(ts.to_rfc3339(), "2025-01-15T23:00:00+00:00");
    }
}
