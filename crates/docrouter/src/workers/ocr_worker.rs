use super::{LlmJob, OcrJob, Outcome};
use crate::app::App;
use anyhow::Context;
use models::{DocumentState, Operation, RevisionKey};

/// Process one leased OCR job:
/// check state, pre-check credits, call the provider, persist the blocks
/// and text artifacts plus per-page rasters, record usage, and enqueue the
/// default LLM fanout.
#[tracing::instrument(skip(app, leased), fields(msg_id = leased.id))]
pub async fn process(app: &App, leased: &queue::Leased) -> anyhow::Result<Outcome> {
    let job: OcrJob = leased.decode().context("decoding ocr job payload")?;
    let document_id = job.document_id;

    let Some(doc) = docrouter_sql::documents::fetch_unscoped(&app.pg_pool, document_id).await?
    else {
        // The document was deleted while the job was queued.
        tracing::warn!(%document_id, "ocr job for missing document; dropping");
        return Ok(Outcome::Ack);
    };

    if doc.state.at_least(DocumentState::OcrCompleted) && !job.force {
        tracing::debug!(%document_id, state = %doc.state, "ocr already complete");
        return Ok(Outcome::Ack);
    }

    let blob = app.blobs.get(&doc.blob_name).await?;

    // Pre-text formats skip the provider, its rasterization, and its charge.
    if ocr::input_kind(&doc.user_file_name) == ocr::InputKind::PlainText {
        let text = String::from_utf8_lossy(&blob.bytes).into_owned();
        let blocks = ocr::blocks_from_text(&text);
        write_artifacts(app, document_id, &blocks).await?;
        docrouter_sql::documents::set_ocr_metadata(&app.pg_pool, document_id, 1, chrono::Utc::now())
            .await?;
        docrouter_sql::documents::update_state(
            &app.pg_pool,
            document_id,
            DocumentState::OcrCompleted,
        )
        .await?;
        enqueue_default_llm(app, document_id).await?;
        return Ok(Outcome::Ack);
    }

    // Advisory credit pre-check: a page of OCR costs one SPU, so require at
    // least one before calling out.
    match ledger::check_spu(&app.pg_pool, doc.organization_id, ledger::cost::ocr_spus(1)).await {
        Ok(()) => (),
        Err(ledger::Error::Credit(err)) => {
            tracing::warn!(%document_id, %err, "ocr blocked on credits");
            docrouter_sql::documents::set_error(
                &app.pg_pool,
                document_id,
                &format!("Insufficient SPU credits: {err}"),
            )
            .await?;
            return Ok(Outcome::Nack(app.config.credit_backoff));
        }
        Err(ledger::Error::Sqlx(err)) => return Err(err.into()),
    }

    docrouter_sql::documents::update_state(&app.pg_pool, document_id, DocumentState::OcrProcessing)
        .await?;

    let blocks = match app.ocr_provider.analyze(blob.bytes.clone()).await {
        Ok(blocks) => blocks,
        Err(err) if err.is_transient() && leased.attempt + 1 < app.config.max_attempts => {
            tracing::warn!(%document_id, attempt = leased.attempt, %err, "transient ocr failure");
            return Ok(Outcome::Nack(queue::retry_backoff(leased.attempt)));
        }
        Err(err) => {
            tracing::error!(%document_id, attempt = leased.attempt, %err, "ocr failed");
            docrouter_sql::documents::set_error(&app.pg_pool, document_id, &format!("{err:#}"))
                .await?;
            docrouter_sql::documents::update_state(
                &app.pg_pool,
                document_id,
                DocumentState::OcrFailed,
            )
            .await?;
            return Ok(Outcome::Ack);
        }
    };

    // Rasterize pages for later multimodal LLM use. A rasterization failure
    // is not fatal to OCR: text extraction alone still serves most prompts.
    match ocr::rasterize(&blob.bytes).await {
        Ok(pages) => {
            for (index, png) in pages.iter().enumerate() {
                let name = blobs::page_image_name(document_id, index as u32 + 1);
                let mut meta = blobs::BlobMeta::new();
                meta.insert("type".to_string(), "image/png".to_string());
                app.blobs.put(&name, png.clone(), meta).await?;
            }
        }
        Err(err) => {
            tracing::warn!(%document_id, error = ?err, "page rasterization failed");
        }
    }

    let n_pages = ocr::n_pages(&blocks).max(1);
    write_artifacts(app, document_id, &blocks).await?;
    docrouter_sql::documents::set_ocr_metadata(
        &app.pg_pool,
        document_id,
        n_pages as i32,
        chrono::Utc::now(),
    )
    .await?;
    docrouter_sql::documents::update_state(&app.pg_pool, document_id, DocumentState::OcrCompleted)
        .await?;

    ledger::record_spu(
        &app.pg_pool,
        doc.organization_id,
        ledger::cost::ocr_spus(n_pages),
        Operation::Ocr,
        "worker",
    )
    .await?;

    enqueue_default_llm(app, document_id).await?;

    tracing::info!(%document_id, n_pages, "ocr completed");
    Ok(Outcome::Ack)
}

/// Write the blocks JSON, joined text, and per-page text artifacts.
async fn write_artifacts(
    app: &App,
    document_id: models::Id,
    blocks: &[ocr::Block],
) -> anyhow::Result<()> {
    let blocks_json = serde_json::to_vec(blocks).context("encoding ocr blocks")?;
    let mut meta = blobs::BlobMeta::new();
    meta.insert("type".to_string(), "application/json".to_string());
    app.blobs
        .put(
            &blobs::blocks_name(document_id),
            blocks_json.into(),
            meta,
        )
        .await?;

    let text_meta = || {
        let mut meta = blobs::BlobMeta::new();
        meta.insert("type".to_string(), "text/plain".to_string());
        meta
    };

    app.blobs
        .put(
            &blobs::text_name(document_id),
            ocr::joined_text(blocks).into_bytes().into(),
            text_meta(),
        )
        .await?;

    for page in 1..=ocr::n_pages(blocks).max(1) {
        app.blobs
            .put(
                &blobs::page_text_name(document_id, page),
                ocr::page_text(blocks, page).into_bytes().into(),
                text_meta(),
            )
            .await?;
    }
    Ok(())
}

/// OCR completion hands the document to the LLM stage with the "default"
/// revision key, which the LLM worker fans out by tag.
async fn enqueue_default_llm(app: &App, document_id: models::Id) -> anyhow::Result<()> {
    queue::enqueue(
        &app.pg_pool,
        queue::Queue::Llm,
        &LlmJob {
            document_id,
            prompt_revid: RevisionKey::Default,
            force: false,
        },
    )
    .await?;
    Ok(())
}
