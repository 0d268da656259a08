use crate::blocks::Block;

/// Provider failures, split by whether a retry could help. Workers nack
/// transient failures with backoff and fail the document on permanent ones.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("transient OCR provider failure: {0}")]
    Transient(#[source] anyhow::Error),
    #[error("permanent OCR provider failure: {0}")]
    Permanent(#[source] anyhow::Error),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

/// OcrProvider turns a document's raw bytes into detected text blocks.
#[async_trait::async_trait]
pub trait OcrProvider: Send + Sync {
    async fn analyze(&self, bytes: bytes::Bytes) -> Result<Vec<Block>, ProviderError>;
}

#[derive(serde::Deserialize)]
struct AnalyzeResponse {
    blocks: Vec<Block>,
}

/// RestProvider posts document bytes to an OCR service and reads back its
/// blocks. The service is expected to answer `{"blocks": [...]}` with the
/// block shape of [`Block`].
pub struct RestProvider {
    endpoint: url::Url,
    api_key: String,
    http: reqwest::Client,
}

impl RestProvider {
    pub fn new(endpoint: url::Url, api_key: String, timeout: std::time::Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("building a reqwest client cannot fail");
        Self {
            endpoint,
            api_key,
            http,
        }
    }
}

#[async_trait::async_trait]
impl OcrProvider for RestProvider {
    async fn analyze(&self, bytes: bytes::Bytes) -> Result<Vec<Block>, ProviderError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .map_err(|err| {
                // Connection and timeout failures are worth retrying.
                ProviderError::Transient(anyhow::Error::from(err).context("posting OCR request"))
            })?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Transient(anyhow::anyhow!(
                "OCR provider responded {status}: {body}"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Permanent(anyhow::anyhow!(
                "OCR provider responded {status}: {body}"
            )));
        }

        let parsed: AnalyzeResponse = response.json().await.map_err(|err| {
            ProviderError::Permanent(
                anyhow::Error::from(err).context("decoding OCR provider response"),
            )
        })?;
        Ok(parsed.blocks)
    }
}
