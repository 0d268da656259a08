use super::{ApiError, Request};
use crate::app::App;
use crate::auth;
use crate::workers::LlmJob;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use models::{Id, Principal, RevisionKey};
use std::sync::Arc;
use validator::Validate;

fn default_revid() -> String {
    RevisionKey::DEFAULT_LITERAL.to_string()
}

#[derive(Debug, serde::Deserialize)]
pub struct RunQuery {
    #[serde(default = "default_revid")]
    pub prompt_revid: String,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, serde::Serialize)]
pub struct LlmResult {
    pub prompt_revid: String,
    pub prompt_id: String,
    pub prompt_version: i32,
    pub document_id: Id,
    pub llm_result: serde_json::Value,
    pub updated_llm_result: serde_json::Value,
    pub is_edited: bool,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<docrouter_sql::results::Row> for LlmResult {
    fn from(row: docrouter_sql::results::Row) -> Self {
        Self {
            prompt_revid: row.prompt_revid,
            prompt_id: row.prompt_id,
            prompt_version: row.prompt_version,
            document_id: row.document_id,
            llm_result: row.llm_result.0,
            updated_llm_result: row.updated_llm_result.0,
            is_edited: row.is_edited,
            is_verified: row.is_verified,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct RunResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<LlmResult>,
}

fn parse_revision_key(raw: &str) -> Result<RevisionKey, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(anyhow::anyhow!("invalid prompt_revid {raw:?}")))
}

/// Trigger (or force re-trigger) an extraction. The call is synchronous but
/// bounded: it enqueues the job and waits up to the configured deadline for
/// the result row, answering 202 with whatever exists on timeout.
pub async fn run(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path((organization_id, document_id)): Path<(Id, Id)>,
    Query(query): Query<RunQuery>,
) -> Result<axum::response::Response, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;

    let doc = docrouter_sql::documents::fetch(&app.pg_pool, organization_id, document_id)
        .await?
        .ok_or_else(|| ApiError::not_found("document"))?;

    // Extraction needs the OCR text artifact; for OCR-requiring inputs that
    // means OCR must have completed.
    if ocr::input_kind(&doc.user_file_name) == ocr::InputKind::Ocr && doc.ocr_date.is_none() {
        return Err(ApiError::not_found("OCR metadata"));
    }

    let revision_key = parse_revision_key(&query.prompt_revid)?;
    if let RevisionKey::Concrete(revid) = revision_key {
        docrouter_sql::prompts::fetch_by_revid(&app.pg_pool, organization_id, revid)
            .await?
            .ok_or_else(|| ApiError::not_found("prompt revision"))?;
    }

    if !query.force {
        let existing = docrouter_sql::results::fetch(
            &app.pg_pool,
            organization_id,
            document_id,
            &query.prompt_revid,
        )
        .await?;
        if let Some(row) = existing {
            return Ok((
                StatusCode::OK,
                Json(RunResponse {
                    status: "success".to_string(),
                    result: Some(row.into()),
                }),
            )
                .into_response());
        }
    }

    // Reject new work up front when the organization is out of credits.
    ledger::check_spu(&app.pg_pool, organization_id, 1.0).await?;

    let started = Utc::now();
    queue::enqueue(
        &app.pg_pool,
        queue::Queue::Llm,
        &LlmJob {
            document_id,
            prompt_revid: revision_key,
            force: query.force,
        },
    )
    .await?;

    // Poll for the result row until the deadline. A forced re-run only
    // accepts rows written after the enqueue, not the stale result.
    let deadline = tokio::time::Instant::now() + app.config.run_wait;
    loop {
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;

        let row = docrouter_sql::results::fetch(
            &app.pg_pool,
            organization_id,
            document_id,
            &query.prompt_revid,
        )
        .await?;
        if let Some(row) = row {
            let stale = query.force && row.updated_at < started;
            if !stale {
                return Ok((
                    StatusCode::OK,
                    Json(RunResponse {
                        status: "success".to_string(),
                        result: Some(row.into()),
                    }),
                )
                    .into_response());
            }
        }

        if tokio::time::Instant::now() >= deadline {
            return Ok((
                StatusCode::ACCEPTED,
                Json(RunResponse {
                    status: "pending".to_string(),
                    result: None,
                }),
            )
                .into_response());
        }
    }
}

#[derive(Debug, serde::Deserialize)]
pub struct GetQuery {
    #[serde(default = "default_revid")]
    pub prompt_revid: String,
    /// Fall back to the most recent available revision of the same prompt.
    #[serde(default)]
    pub fallback: bool,
}

pub async fn get_result(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path((organization_id, document_id)): Path<(Id, Id)>,
    Query(query): Query<GetQuery>,
) -> Result<Json<LlmResult>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;

    docrouter_sql::documents::fetch(&app.pg_pool, organization_id, document_id)
        .await?
        .ok_or_else(|| ApiError::not_found("document"))?;

    let exact = docrouter_sql::results::fetch(
        &app.pg_pool,
        organization_id,
        document_id,
        &query.prompt_revid,
    )
    .await?;
    if let Some(row) = exact {
        return Ok(Json(row.into()));
    }

    if query.fallback {
        if let RevisionKey::Concrete(revid) = parse_revision_key(&query.prompt_revid)? {
            if let Some(revision) =
                docrouter_sql::prompts::fetch_by_revid(&app.pg_pool, organization_id, revid).await?
            {
                let fallback = docrouter_sql::results::fetch_fallback(
                    &app.pg_pool,
                    organization_id,
                    document_id,
                    &revision.prompt_id.to_string(),
                )
                .await?;
                if let Some(row) = fallback {
                    return Ok(Json(row.into()));
                }
            }
        }
    }

    Err(ApiError::new(
        StatusCode::NOT_FOUND,
        anyhow::anyhow!(
            "LLM result not found for document_id: {document_id} prompt_revid: {} fallback: {}",
            query.prompt_revid,
            query.fallback
        ),
    ))
}

#[derive(Debug, serde::Deserialize)]
pub struct RevisionQuery {
    pub prompt_revid: String,
}

#[derive(Debug, serde::Deserialize, Validate)]
pub struct UpdateResultRequest {
    pub updated_llm_result: serde_json::Value,
    #[serde(default)]
    pub is_verified: bool,
}

pub async fn update_result(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path((organization_id, document_id)): Path<(Id, Id)>,
    Query(query): Query<RevisionQuery>,
    Request(body): Request<UpdateResultRequest>,
) -> Result<Json<LlmResult>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;

    docrouter_sql::documents::fetch(&app.pg_pool, organization_id, document_id)
        .await?
        .ok_or_else(|| ApiError::not_found("document"))?;

    let row = docrouter_sql::results::update_edits(
        &app.pg_pool,
        organization_id,
        document_id,
        &query.prompt_revid,
        &body.updated_llm_result,
        body.is_verified,
    )
    .await?
    .ok_or_else(|| ApiError::not_found("LLM result"))?;

    Ok(Json(row.into()))
}

#[derive(Debug, serde::Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub message: String,
}

pub async fn delete_result(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path((organization_id, document_id)): Path<(Id, Id)>,
    Query(query): Query<RevisionQuery>,
) -> Result<Json<StatusResponse>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;

    docrouter_sql::documents::fetch(&app.pg_pool, organization_id, document_id)
        .await?
        .ok_or_else(|| ApiError::not_found("document"))?;

    let deleted = docrouter_sql::results::delete(
        &app.pg_pool,
        organization_id,
        document_id,
        &query.prompt_revid,
    )
    .await?;
    if !deleted {
        return Err(ApiError::not_found("LLM result"));
    }

    Ok(Json(StatusResponse {
        status: "success".to_string(),
        message: "LLM result deleted".to_string(),
    }))
}

/// Download every result of a document as one JSON bundle with prompt
/// metadata inlined.
pub async fn download_results(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path((organization_id, document_id)): Path<(Id, Id)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;

    let doc = docrouter_sql::documents::fetch(&app.pg_pool, organization_id, document_id)
        .await?
        .ok_or_else(|| ApiError::not_found("document"))?;

    let rows =
        docrouter_sql::results::list_for_document(&app.pg_pool, organization_id, document_id)
            .await?;
    if rows.is_empty() {
        return Err(ApiError::not_found("LLM results"));
    }

    let mut results = Vec::with_capacity(rows.len());
    for row in rows {
        let prompt_name = if row.prompt_revid == RevisionKey::DEFAULT_LITERAL {
            "Default Prompt".to_string()
        } else {
            match row.prompt_revid.parse::<Id>() {
                Ok(revid) => {
                    docrouter_sql::prompts::fetch_by_revid(&app.pg_pool, organization_id, revid)
                        .await?
                        .map(|r| r.name)
                        .unwrap_or_else(|| "Unknown".to_string())
                }
                Err(_) => "Unknown".to_string(),
            }
        };
        results.push(serde_json::json!({
            "prompt_revid": row.prompt_revid,
            "prompt_id": row.prompt_id,
            "prompt_version": row.prompt_version,
            "prompt_name": prompt_name,
            "llm_result": row.llm_result.0,
            "updated_llm_result": row.updated_llm_result.0,
            "is_edited": row.is_edited,
            "is_verified": row.is_verified,
            "created_at": row.created_at,
            "updated_at": row.updated_at,
        }));
    }

    Ok(Json(serde_json::json!({
        "document_id": document_id,
        "organization_id": organization_id,
        "document_name": doc.user_file_name,
        "extraction_date": Utc::now(),
        "results": results,
    })))
}

#[derive(Debug, serde::Deserialize, Validate)]
pub struct ChatRequestBody {
    pub model: String,
    #[validate(length(min = 1, message = "at least one message is required"))]
    pub messages: Vec<ChatMessageBody>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, serde::Deserialize, serde::Serialize)]
pub struct ChatMessageBody {
    pub role: llm::ChatRole,
    pub content: String,
}

/// Frame one server-sent event of the streaming chat response.
pub fn sse_frame(payload: &serde_json::Value) -> String {
    format!("data: {payload}\n\n")
}

/// Ad-hoc chat against a configured provider. Admin-only; supports both
/// streaming (`text/event-stream` of `{chunk}` frames with a terminal
/// `{done: true}`) and non-streaming responses.
pub async fn chat(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path(organization_id): Path<Id>,
    Request(body): Request<ChatRequestBody>,
) -> Result<axum::response::Response, ApiError> {
    auth::authorize_org_admin(&app, &principal, organization_id).await?;
    run_chat(&app, body).await
}

/// Account-level variant of the chat surface.
pub async fn chat_account(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Request(body): Request<ChatRequestBody>,
) -> Result<axum::response::Response, ApiError> {
    auth::authorize_account_admin(&principal)?;
    run_chat(&app, body).await
}

async fn run_chat(app: &Arc<App>, body: ChatRequestBody) -> Result<axum::response::Response, ApiError> {
    let registry = app.registry().await?;
    let Some((provider, _spec)) = registry.find_model(&body.model) else {
        return Err(ApiError::bad_request(anyhow::anyhow!(
            "Invalid model: {}",
            body.model
        )));
    };
    let provider = provider.clone();

    let mut request = llm::ChatRequest::new(
        body.model,
        body.messages
            .into_iter()
            .map(|m| llm::ChatMessage {
                role: m.role,
                content: llm::MessageContent::Text(m.content),
            })
            .collect(),
    );
    request.temperature = body.temperature.or(Some(0.7));
    request.max_tokens = body.max_tokens;
    request.top_p = body.top_p;

    if !body.stream {
        let completion = app.llm_client.complete(&provider, &request).await.map_err(|err| {
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                anyhow::Error::from(err).context("LLM chat failed"),
            )
        })?;
        return Ok(Json(serde_json::json!({
            "response": completion.content,
            "usage": {
                "input_tokens": completion.usage.input_tokens,
                "output_tokens": completion.usage.output_tokens,
            },
        }))
        .into_response());
    }

    // Streaming: open the provider stream and forward framed events.
    // Provider failures after the 200 is committed surface as in-stream
    // `{error}` frames.
    let events = match app.llm_client.stream(&provider, &request).await {
        Ok(events) => events,
        Err(err) => {
            let frames = vec![
                sse_frame(&serde_json::json!({"error": format!("{err:#}")})),
                sse_frame(&serde_json::json!({"done": true})),
            ];
            return Ok(stream_response(futures::stream::iter(frames)));
        }
    };

    let frames = tokio_stream::wrappers::ReceiverStream::new(events).map(|event| match event {
        llm::StreamEvent::Chunk(chunk) => sse_frame(&serde_json::json!({ "chunk": chunk })),
        llm::StreamEvent::Done => sse_frame(&serde_json::json!({"done": true})),
        llm::StreamEvent::Error(message) => sse_frame(&serde_json::json!({ "error": message })),
    });
    Ok(stream_response(frames))
}

fn stream_response(
    frames: impl futures::Stream<Item = String> + Send + 'static,
) -> axum::response::Response {
    let body = axum::body::Body::from_stream(
        frames.map(|frame| Ok::<_, std::convert::Infallible>(frame.into_bytes())),
    );
    axum::response::Response::builder()
        .status(StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, "text/event-stream")
        .header(axum::http::header::CACHE_CONTROL, "no-cache")
        .body(body)
        .expect("static response parts are valid")
}

#[cfg(test)]
mod test {
    use super::sse_frame;

    #[test]
    fn test_sse_framing() {
        assert_eq!(
            sse_frame(&serde_json::json!({"chunk": "Hel"})),
            "data: {\"chunk\":\"Hel\"}\n\n"
        );
        assert_eq!(
            sse_frame(&serde_json::json!({"done": true})),
            "data: {\"done\":true}\n\n"
        );
    }
}
