use super::{ApiError, Request};
use crate::app::App;
use crate::auth;
use crate::workers::OcrJob;
use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use models::{DocumentState, Id, Principal};
use std::collections::BTreeMap;
use std::sync::Arc;
use validator::Validate;

#[derive(Debug, serde::Deserialize, Validate)]
pub struct UploadRequest {
    #[validate(length(min = 1, message = "at least one document is required"))]
    pub documents: Vec<DocumentUpload>,
}

#[derive(Debug, serde::Deserialize, serde::Serialize)]
pub struct DocumentUpload {
    pub name: String,
    /// Document bytes as a data URL (`data:<mime>;base64,<data>`) or bare
    /// base64.
    pub content: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub tag_ids: Vec<Id>,
}

#[derive(Debug, serde::Serialize)]
pub struct UploadedDocument {
    pub document_id: Id,
    pub document_name: String,
    pub tag_ids: Vec<Id>,
}

#[derive(Debug, serde::Serialize)]
pub struct UploadResponse {
    pub documents: Vec<UploadedDocument>,
}

/// Decode an uploaded document body: either a full data URL or bare base64.
pub fn decode_content(content: &str) -> Result<Vec<u8>, ApiError> {
    let encoded = match content.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        Some(_) | None => content,
    };
    base64::decode(encoded.trim())
        .map_err(|err| ApiError::bad_request(anyhow::anyhow!("invalid base64 content: {err}")))
}

pub async fn upload(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path(organization_id): Path<Id>,
    Request(body): Request<UploadRequest>,
) -> Result<Json<UploadResponse>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;

    let mut all_tags: Vec<Id> = body.documents.iter().flat_map(|d| d.tag_ids.clone()).collect();
    all_tags.sort();
    all_tags.dedup();
    super::require_valid_tags(&app, organization_id, &all_tags).await?;

    let mut uploaded = Vec::with_capacity(body.documents.len());
    for file in &body.documents {
        let bytes = decode_content(&file.content)?;
        let document_id = app.next_id();
        let ext = ocr::blob_extension(&file.name);
        let blob_name = blobs::original_name(document_id, &ext);

        let mut blob_meta = blobs::BlobMeta::new();
        blob_meta.insert("user_file_name".to_string(), file.name.clone());
        blob_meta.insert("size".to_string(), bytes.len().to_string());
        app.blobs.put(&blob_name, bytes.into(), blob_meta).await?;

        docrouter_sql::documents::insert(
            &app.pg_pool,
            document_id,
            organization_id,
            &file.name,
            &blob_name,
            principal.user_id,
            &file.tag_ids,
            &file.metadata,
        )
        .await?;

        queue::enqueue(
            &app.pg_pool,
            queue::Queue::Ocr,
            &OcrJob {
                document_id,
                force: false,
            },
        )
        .await?;

        tracing::info!(%document_id, %organization_id, name = %file.name, "document uploaded");
        uploaded.push(UploadedDocument {
            document_id,
            document_name: file.name.clone(),
            tag_ids: file.tag_ids.clone(),
        });
    }

    Ok(Json(UploadResponse { documents: uploaded }))
}

#[derive(Debug, serde::Serialize)]
pub struct DocumentMetadata {
    pub id: Id,
    pub user_file_name: String,
    pub upload_date: DateTime<Utc>,
    pub uploaded_by: Id,
    pub state: DocumentState,
    pub tag_ids: Vec<Id>,
    pub metadata: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_pages: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_date: Option<DateTime<Utc>>,
}

impl From<docrouter_sql::documents::Row> for DocumentMetadata {
    fn from(row: docrouter_sql::documents::Row) -> Self {
        Self {
            id: row.id,
            user_file_name: row.user_file_name,
            upload_date: row.upload_date,
            uploaded_by: row.uploaded_by,
            state: row.state,
            tag_ids: row.tag_ids,
            metadata: row.metadata.0,
            n_pages: row.n_pages,
            ocr_date: row.ocr_date,
        }
    }
}

#[derive(Debug, serde::Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "super::default_limit")]
    pub limit: i64,
    /// Comma-separated tag ids; a document matches when it carries any.
    pub tag_ids: Option<String>,
    pub name_search: Option<String>,
    /// JSON object of metadata keys and values the document must contain.
    pub metadata_search: Option<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct ListResponse {
    pub documents: Vec<DocumentMetadata>,
    pub total_count: i64,
    pub skip: i64,
}

pub async fn list(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path(organization_id): Path<Id>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;

    let tag_ids = query
        .tag_ids
        .as_deref()
        .map(super::parse_tag_ids)
        .transpose()?;
    let metadata_search: Option<BTreeMap<String, String>> = query
        .metadata_search
        .as_deref()
        .map(|raw| {
            serde_json::from_str(raw).map_err(|err| {
                ApiError::bad_request(anyhow::anyhow!("invalid metadata_search: {err}"))
            })
        })
        .transpose()?;

    let (rows, total_count) = docrouter_sql::documents::list(
        &app.pg_pool,
        organization_id,
        docrouter_sql::documents::ListFilter {
            tag_ids: tag_ids.as_deref(),
            name_search: query.name_search.as_deref(),
            metadata_search: metadata_search.as_ref(),
        },
        query.skip,
        query.limit,
    )
    .await?;

    Ok(Json(ListResponse {
        documents: rows.into_iter().map(Into::into).collect(),
        total_count,
        skip: query.skip,
    }))
}

#[derive(Debug, serde::Serialize)]
pub struct GetResponse {
    pub metadata: DocumentMetadata,
    /// The original bytes, base64-encoded.
    pub content: String,
}

pub async fn fetch(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path((organization_id, document_id)): Path<(Id, Id)>,
) -> Result<Json<GetResponse>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;

    let row = docrouter_sql::documents::fetch(&app.pg_pool, organization_id, document_id)
        .await?
        .ok_or_else(|| ApiError::not_found("document"))?;

    let blob = app.blobs.get(&row.blob_name).await?;
    Ok(Json(GetResponse {
        metadata: row.into(),
        content: base64::encode(&blob.bytes),
    }))
}

#[derive(Debug, serde::Deserialize, Validate)]
pub struct UpdateRequest {
    pub tag_ids: Option<Vec<Id>>,
    pub metadata: Option<BTreeMap<String, String>>,
    #[validate(length(min = 1, message = "user_file_name cannot be empty"))]
    pub user_file_name: Option<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct MessageResponse {
    pub message: String,
}

pub async fn update(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path((organization_id, document_id)): Path<(Id, Id)>,
    Request(body): Request<UpdateRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;

    if let Some(tag_ids) = &body.tag_ids {
        super::require_valid_tags(&app, organization_id, tag_ids).await?;
    }

    let updated = docrouter_sql::documents::update(
        &app.pg_pool,
        organization_id,
        document_id,
        body.tag_ids.as_deref(),
        body.metadata.as_ref(),
        body.user_file_name.as_deref(),
    )
    .await?;
    if !updated {
        return Err(ApiError::not_found("document"));
    }

    Ok(Json(MessageResponse {
        message: "Document updated".to_string(),
    }))
}

pub async fn delete(
    State(app): State<Arc<App>>,
    Extension(principal): Extension<Principal>,
    Path((organization_id, document_id)): Path<(Id, Id)>,
) -> Result<Json<MessageResponse>, ApiError> {
    auth::authorize_org(&app, &principal, organization_id).await?;

    let row = docrouter_sql::documents::fetch(&app.pg_pool, organization_id, document_id)
        .await?
        .ok_or_else(|| ApiError::not_found("document"))?;

    // Purge the original and every derived artifact, then the dependent
    // rows, then the document itself.
    let artifacts = app
        .blobs
        .list_by_prefix(&format!("{document_id}."))
        .await?;
    for name in artifacts {
        if let Err(err) = app.blobs.delete(&name).await {
            tracing::warn!(%document_id, blob = %name, error = ?err, "failed to delete artifact");
        }
    }

    docrouter_sql::results::delete_for_document(&app.pg_pool, organization_id, document_id).await?;
    docrouter_sql::forms::delete_submissions_for_document(
        &app.pg_pool,
        organization_id,
        document_id,
    )
    .await?;
    docrouter_sql::documents::delete(&app.pg_pool, organization_id, document_id).await?;

    tracing::info!(%document_id, %organization_id, blob = %row.blob_name, "document deleted");
    Ok(Json(MessageResponse {
        message: "Document deleted".to_string(),
    }))
}

#[cfg(test)]
mod test {
    use super::decode_content;

    #[test]
    fn test_decode_data_url_and_bare_base64() {
        let bytes = decode_content("data:application/pdf;base64,JVBERi0xLjQK").unwrap();
        assert_eq!(bytes, b"%PDF-1.4\n");

        let bytes = decode_content("JVBERi0xLjQK").unwrap();
        assert_eq!(bytes, b"%PDF-1.4\n");

        assert!(decode_content("not-base64!!!").is_err());
    }
}
