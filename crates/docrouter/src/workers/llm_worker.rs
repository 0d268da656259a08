use super::{LlmJob, Outcome};
use crate::app::App;
use anyhow::Context;
use models::{DocumentState, Id, Operation, RevisionKey};

/// System prompt of the implicit default extraction, applied to every
/// document regardless of tags. Its result is stored under the literal
/// revision key "default".
pub const DEFAULT_PROMPT_CONTENT: &str = "Extract the key information from this document \
     and return it as a flat JSON object of field names to values. \
     Use null for fields that cannot be determined.";

/// Model used by the default prompt: the first enabled model of the
/// registry.
fn default_model(registry: &llm::Registry) -> Option<String> {
    registry
        .enabled_models()
        .first()
        .map(|spec| spec.litellm_model.clone())
}

/// Process one leased LLM job. A `"default"` job runs the implicit default
/// extraction and fans tag-matching prompts out as concrete sub-jobs; a
/// concrete job runs one prompt revision against the document.
#[tracing::instrument(skip(app, leased), fields(msg_id = leased.id))]
pub async fn process(app: &App, leased: &queue::Leased) -> anyhow::Result<Outcome> {
    let job: LlmJob = leased.decode().context("decoding llm job payload")?;
    let document_id = job.document_id;

    let Some(doc) = docrouter_sql::documents::fetch_unscoped(&app.pg_pool, document_id).await?
    else {
        tracing::warn!(%document_id, "llm job for missing document; dropping");
        return Ok(Outcome::Ack);
    };

    // OCR must complete before any LLM revision runs for the document.
    if doc.state == DocumentState::OcrFailed {
        tracing::warn!(%document_id, "document failed ocr; dropping llm job");
        return Ok(Outcome::Ack);
    }
    if !doc.state.at_least(DocumentState::OcrCompleted) {
        return Ok(Outcome::Nack(std::time::Duration::from_secs(2)));
    }

    match job.prompt_revid {
        RevisionKey::Default => run_default_and_fan_out(app, &doc, &job, leased).await,
        RevisionKey::Concrete(revid) => run_concrete(app, &doc, revid, &job, leased).await,
    }
}

async fn run_default_and_fan_out(
    app: &App,
    doc: &docrouter_sql::documents::Row,
    job: &LlmJob,
    leased: &queue::Leased,
) -> anyhow::Result<Outcome> {
    // Fan tag-matching prompts out as concrete sub-jobs first, so they make
    // progress even if the default extraction below hits trouble.
    let matching = docrouter_sql::prompts::latest_matching_tags(
        &app.pg_pool,
        doc.organization_id,
        &doc.tag_ids,
    )
    .await?;
    for revision in &matching {
        queue::enqueue(
            &app.pg_pool,
            queue::Queue::Llm,
            &LlmJob {
                document_id: doc.id,
                prompt_revid: RevisionKey::Concrete(revision.prompt_revid),
                force: job.force,
            },
        )
        .await?;
    }
    tracing::debug!(document_id = %doc.id, fanned_out = matching.len(), "default llm fanout");

    let existing = docrouter_sql::results::fetch(
        &app.pg_pool,
        doc.organization_id,
        doc.id,
        RevisionKey::DEFAULT_LITERAL,
    )
    .await?;
    if existing.is_some() && !job.force {
        return Ok(Outcome::Ack);
    }

    let registry = app.registry().await?;
    let Some(model) = default_model(&registry) else {
        tracing::error!(document_id = %doc.id, "no enabled llm model for default prompt");
        return Ok(Outcome::Ack);
    };

    let extraction = Extraction {
        prompt_revid: RevisionKey::DEFAULT_LITERAL.to_string(),
        prompt_id: RevisionKey::DEFAULT_LITERAL.to_string(),
        prompt_version: 0,
        content: DEFAULT_PROMPT_CONTENT.to_string(),
        model,
        schema: None,
    };
    run_extraction(app, doc, &extraction, &registry, leased).await
}

async fn run_concrete(
    app: &App,
    doc: &docrouter_sql::documents::Row,
    revid: Id,
    job: &LlmJob,
    leased: &queue::Leased,
) -> anyhow::Result<Outcome> {
    let Some(revision) =
        docrouter_sql::prompts::fetch_by_revid(&app.pg_pool, doc.organization_id, revid).await?
    else {
        // The prompt revision was deleted while the job was queued.
        tracing::warn!(document_id = %doc.id, %revid, "llm job for missing prompt; dropping");
        return Ok(Outcome::Ack);
    };

    let existing = docrouter_sql::results::fetch(
        &app.pg_pool,
        doc.organization_id,
        doc.id,
        &revid.to_string(),
    )
    .await?;
    if existing.is_some() && !job.force {
        return Ok(Outcome::Ack);
    }

    let schema = match (revision.schema_id, revision.schema_version) {
        (Some(schema_id), Some(version)) => {
            docrouter_sql::schemas::fetch_version(
                &app.pg_pool,
                doc.organization_id,
                schema_id,
                version,
            )
            .await?
        }
        _ => None,
    };

    let registry = app.registry().await?;
    let extraction = Extraction {
        prompt_revid: revid.to_string(),
        prompt_id: revision.prompt_id.to_string(),
        prompt_version: revision.prompt_version,
        content: revision.content.clone(),
        model: revision.model.clone(),
        schema: schema.map(|s| (s.name, s.response_format.0)),
    };
    run_extraction(app, doc, &extraction, &registry, leased).await
}

struct Extraction {
    prompt_revid: String,
    prompt_id: String,
    prompt_version: i32,
    content: String,
    model: String,
    schema: Option<(String, serde_json::Value)>,
}

async fn run_extraction(
    app: &App,
    doc: &docrouter_sql::documents::Row,
    extraction: &Extraction,
    registry: &llm::Registry,
    leased: &queue::Leased,
) -> anyhow::Result<Outcome> {
    let Some((provider, spec)) = registry.find_model(&extraction.model) else {
        // The model was disabled after the prompt was written. Retrying
        // cannot help until an administrator re-enables it.
        let reason = format!("model {:?} is not enabled", extraction.model);
        tracing::error!(document_id = %doc.id, prompt_revid = %extraction.prompt_revid, reason);
        docrouter_sql::documents::set_error(&app.pg_pool, doc.id, &reason).await?;
        docrouter_sql::documents::update_state(&app.pg_pool, doc.id, DocumentState::LlmFailed)
            .await?;
        return Ok(Outcome::Ack);
    };

    match ledger::check_spu(&app.pg_pool, doc.organization_id, 1.0).await {
        Ok(()) => (),
        Err(ledger::Error::Credit(err)) => {
            tracing::warn!(document_id = %doc.id, %err, "llm blocked on credits");
            docrouter_sql::documents::set_error(
                &app.pg_pool,
                doc.id,
                &format!("Insufficient SPU credits: {err}"),
            )
            .await?;
            return Ok(Outcome::Nack(app.config.credit_backoff));
        }
        Err(ledger::Error::Sqlx(err)) => return Err(err.into()),
    }

    docrouter_sql::documents::update_state(&app.pg_pool, doc.id, DocumentState::LlmProcessing)
        .await?;

    let request = build_request(app, doc, extraction, spec).await?;

    let completion = match app.llm_client.complete(provider, &request).await {
        Ok(completion) => completion,
        Err(err) if err.is_transient() && leased.attempt + 1 < app.config.max_attempts => {
            tracing::warn!(document_id = %doc.id, attempt = leased.attempt, %err, "transient llm failure");
            return Ok(Outcome::Nack(queue::retry_backoff(leased.attempt)));
        }
        Err(err) => {
            tracing::error!(document_id = %doc.id, attempt = leased.attempt, %err, "llm failed");
            docrouter_sql::documents::set_error(&app.pg_pool, doc.id, &format!("{err:#}")).await?;
            docrouter_sql::documents::update_state(&app.pg_pool, doc.id, DocumentState::LlmFailed)
                .await?;
            return Ok(Outcome::Ack);
        }
    };

    // Providers without structured output wrap JSON in prose; fall back to
    // extraction, and failing that keep the raw text.
    let llm_result = llm::parse_json_reply(&completion.content)
        .unwrap_or_else(|| serde_json::json!({ "text": completion.content }));

    docrouter_sql::results::upsert(
        &app.pg_pool,
        doc.id,
        doc.organization_id,
        &extraction.prompt_revid,
        &extraction.prompt_id,
        extraction.prompt_version,
        &llm_result,
    )
    .await?;

    docrouter_sql::documents::update_state(&app.pg_pool, doc.id, DocumentState::LlmCompleted)
        .await?;

    let spus = ledger::cost::llm_spus(
        completion.usage.input_tokens,
        completion.usage.output_tokens,
        spec.input_cost_per_token,
        spec.output_cost_per_token,
    );
    ledger::record_spu(&app.pg_pool, doc.organization_id, spus, Operation::Llm, "worker").await?;

    tracing::info!(
        document_id = %doc.id,
        prompt_revid = %extraction.prompt_revid,
        spus,
        "llm completed"
    );
    Ok(Outcome::Ack)
}

/// Assemble the provider request: system prompt, then the OCR text or, for
/// vision models with rasterized pages, text plus page images.
async fn build_request(
    app: &App,
    doc: &docrouter_sql::documents::Row,
    extraction: &Extraction,
    spec: &llm::ModelSpec,
) -> anyhow::Result<llm::ChatRequest> {
    let text = app
        .blobs
        .get(&blobs::text_name(doc.id))
        .await
        .context("loading ocr text artifact")?;
    let text = String::from_utf8_lossy(&text.bytes).into_owned();

    let user_message = if spec.supports_vision {
        let mut parts = vec![llm::ContentPart::text(text)];
        let pages = doc.n_pages.unwrap_or(0).max(0) as u32;
        for page in 1..=pages {
            match app.blobs.get(&blobs::page_image_name(doc.id, page)).await {
                Ok(image) => parts.push(llm::ContentPart::png(&image.bytes)),
                // Rasterization may have been skipped; text still serves.
                Err(blobs::Error::NotFound(_)) => break,
                Err(err) => return Err(err).context("loading page image artifact"),
            }
        }
        llm::ChatMessage::user_parts(parts)
    } else {
        llm::ChatMessage::user(text)
    };

    let mut request = llm::ChatRequest::new(
        extraction.model.clone(),
        vec![
            llm::ChatMessage::system(extraction.content.clone()),
            user_message,
        ],
    );
    request.temperature = Some(llm::EXTRACTION_TEMPERATURE);
    request.max_tokens = Some(spec.max_output_tokens);

    if let Some((name, schema)) = &extraction.schema {
        if spec.supports_response_schema {
            request.response_format = Some(llm::ResponseFormat::json_schema(
                name.clone(),
                schema.clone(),
            ));
        } else {
            // No structured output: steer with the schema in-prompt and
            // parse the reply leniently.
            request.messages.insert(
                1,
                llm::ChatMessage::user(format!(
                    "Respond with JSON conforming to this JSON Schema:\n{schema}"
                )),
            );
        }
    }

    Ok(request)
}
