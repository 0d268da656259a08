use super::ApiError;
use crate::app::App;
use crate::auth;
use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use models::{Id, Principal};
use std::sync::Arc;

async fn require_document(
    app: &App,
    principal: &Principal,
    organization_id: Id,
    document_id: Id,
) -> Result<docrouter_sql::documents::Row, ApiError> {
    auth::authorize_org(app, principal, organization_id).await?;
    docrouter_sql::documents::fetch(&app.pg_pool, organization_id, document_id)
        .await?
        .ok_or_else(|| ApiError::not_found("document"))
}

#[derive(Debug, serde::Deserialize)]
pub struct TextQuery {
    /// 1-based page number; omitted returns the whole document.
    pub page_num: Option<u32>,
}

pub async fn text(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path((organization_id, document_id)): Path<(Id, Id)>,
    Query(query): Query<TextQuery>,
) -> Result<String, ApiError> {
    let doc = require_document(&app, &principal, organization_id, document_id).await?;

    let name = match query.page_num {
        Some(page) => {
            let n_pages = doc.n_pages.unwrap_or(0);
            if page == 0 || page as i32 > n_pages {
                return Err(ApiError::bad_request(anyhow::anyhow!(
                    "page_num {page} is out of range (document has {n_pages} pages)"
                )));
            }
            blobs::page_text_name(document_id, page)
        }
        None => blobs::text_name(document_id),
    };

    let blob = app
        .blobs
        .get(&name)
        .await
        .map_err(|_| ApiError::not_found("OCR text"))?;
    Ok(String::from_utf8_lossy(&blob.bytes).into_owned())
}

pub async fn blocks(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path((organization_id, document_id)): Path<(Id, Id)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_document(&app, &principal, organization_id, document_id).await?;

    let blob = app
        .blobs
        .get(&blobs::blocks_name(document_id))
        .await
        .map_err(|_| ApiError::not_found("OCR blocks"))?;
    let blocks: serde_json::Value = serde_json::from_slice(&blob.bytes)
        .map_err(|err| anyhow::Error::from(err).context("decoding stored OCR blocks"))?;
    Ok(Json(blocks))
}

#[derive(Debug, serde::Serialize)]
pub struct OcrMetadataResponse {
    pub n_pages: i32,
    pub ocr_date: chrono::DateTime<chrono::Utc>,
}

pub async fn metadata(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path((organization_id, document_id)): Path<(Id, Id)>,
) -> Result<Json<OcrMetadataResponse>, ApiError> {
    let doc = require_document(&app, &principal, organization_id, document_id).await?;

    match (doc.n_pages, doc.ocr_date) {
        (Some(n_pages), Some(ocr_date)) => Ok(Json(OcrMetadataResponse { n_pages, ocr_date })),
        _ => Err(ApiError::not_found("OCR metadata")),
    }
}
