use crate::chat::{ChatRequest, Completion, TokenUsage};
use crate::registry::ProviderConfig;

/// Provider failures, split by whether a retry could help.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("transient LLM provider failure: {0}")]
    Transient(#[source] anyhow::Error),
    #[error("permanent LLM provider failure: {0}")]
    Permanent(#[source] anyhow::Error),
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LlmError::Transient(_))
    }
}

/// Events of a streamed chat completion.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Chunk(String),
    Done,
    Error(String),
}

const MAX_ATTEMPTS: u32 = 3;

/// Client issues chat completions against any configured provider.
/// Providers speak the OpenAI-compatible completions protocol at
/// `{base_url}/chat/completions`.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
}

#[derive(serde::Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(serde::Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(serde::Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(serde::Deserialize)]
struct WireStreamChunk {
    choices: Vec<WireStreamChoice>,
}

#[derive(serde::Deserialize)]
struct WireStreamChoice {
    delta: WireDelta,
}

#[derive(serde::Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
}

impl Client {
    pub fn new(timeout: std::time::Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("building a reqwest client cannot fail");
        Self { http }
    }

    fn endpoint(provider: &ProviderConfig) -> String {
        format!("{}/chat/completions", provider.base_url.trim_end_matches('/'))
    }

    /// Run a completion with up to three attempts. 429s, 5xx responses, and
    /// timeouts back off exponentially with jitter; other 4xx fail fast.
    pub async fn complete(
        &self,
        provider: &ProviderConfig,
        request: &ChatRequest,
    ) -> Result<Completion, LlmError> {
        let mut attempt = 0u32;
        loop {
            match self.complete_once(provider, request).await {
                Ok(completion) => return Ok(completion),
                Err(err) if err.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                    let delay = retry_delay(attempt);
                    tracing::warn!(
                        provider = %provider.name,
                        model = %request.model,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying LLM completion"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn complete_once(
        &self,
        provider: &ProviderConfig,
        request: &ChatRequest,
    ) -> Result<Completion, LlmError> {
        let response = self
            .http
            .post(Self::endpoint(provider))
            .bearer_auth(provider.token.as_deref().unwrap_or_default())
            .json(request)
            .send()
            .await
            .map_err(|err| {
                LlmError::Transient(anyhow::Error::from(err).context("posting chat completion"))
            })?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Transient(anyhow::anyhow!(
                "provider responded {status}: {body}"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Permanent(anyhow::anyhow!(
                "provider responded {status}: {body}"
            )));
        }

        let parsed: WireResponse = response.json().await.map_err(|err| {
            LlmError::Permanent(anyhow::Error::from(err).context("decoding chat completion"))
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| {
                LlmError::Permanent(anyhow::anyhow!("provider response carried no content"))
            })?;

        Ok(Completion {
            content,
            usage: parsed.usage.unwrap_or_default(),
        })
    }

    /// Run a streaming completion, forwarding content deltas through the
    /// returned channel. The channel terminates with `Done` on a clean end
    /// of stream, or `Error` if the provider stream fails mid-flight.
    /// Dropping the receiver closes the outbound provider stream.
    pub async fn stream(
        &self,
        provider: &ProviderConfig,
        request: &ChatRequest,
    ) -> Result<tokio::sync::mpsc::Receiver<StreamEvent>, LlmError> {
        let mut request = request.clone();
        request.stream = true;

        let response = self
            .http
            .post(Self::endpoint(provider))
            .bearer_auth(provider.token.as_deref().unwrap_or_default())
            .json(&request)
            .send()
            .await
            .map_err(|err| {
                LlmError::Transient(anyhow::Error::from(err).context("opening chat stream"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = anyhow::anyhow!("provider responded {status}: {body}");
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                LlmError::Transient(err)
            } else {
                LlmError::Permanent(err)
            });
        }

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        tokio::spawn(async move {
            use futures::StreamExt;

            let mut body = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(next) = body.next().await {
                let chunk = match next {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        let _ = tx.send(StreamEvent::Error(format!("{err:#}"))).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // Frames are newline-delimited `data: {...}` lines; a frame
                // may span chunk boundaries, so only consume complete lines.
                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);

                    for event in parse_stream_line(&line) {
                        if tx.send(event).await.is_err() {
                            return; // Receiver hung up: stop reading upstream.
                        }
                    }
                }
            }
            let _ = tx.send(StreamEvent::Done).await;
        });

        Ok(rx)
    }
}

/// Parse one SSE line of an OpenAI-compatible stream into zero or more
/// events. `[DONE]` yields `Done`; content deltas yield `Chunk`s.
pub fn parse_stream_line(line: &str) -> Vec<StreamEvent> {
    let Some(data) = line.strip_prefix("data:").map(str::trim) else {
        return Vec::new();
    };
    if data == "[DONE]" {
        return vec![StreamEvent::Done];
    }
    match serde_json::from_str::<WireStreamChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .filter_map(|c| c.delta.content)
            .filter(|c| !c.is_empty())
            .map(StreamEvent::Chunk)
            .collect(),
        Err(_) => Vec::new(), // Keep-alives and unknown frames are skipped.
    }
}

/// Exponential backoff with jitter for provider retries:
/// 500ms * 2^attempt, plus up to 250ms of jitter.
fn retry_delay(attempt: u32) -> std::time::Duration {
    let base = std::time::Duration::from_millis(500) * 2u32.pow(attempt.min(4));
    base + std::time::Duration::from_millis(rand::random::<u64>() % 250)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_stream_lines() {
        assert_eq!(parse_stream_line(""), vec![]);
        assert_eq!(parse_stream_line(": keep-alive"), vec![]);
        assert_eq!(parse_stream_line("data: [DONE]"), vec![StreamEvent::Done]);

        let events = parse_stream_line(
            r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#,
        );
        assert_eq!(events, vec![StreamEvent::Chunk("Hel".to_string())]);

        // Role-only deltas carry no content.
        let events = parse_stream_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#);
        assert_eq!(events, vec![]);
    }

    #[test]
    fn test_retry_delay_grows() {
        for attempt in 0..3 {
            let lo = std::time::Duration::from_millis(500) * 2u32.pow(attempt);
            let hi = lo + std::time::Duration::from_millis(250);
            let delay = retry_delay(attempt);
            assert!(delay >= lo && delay < hi, "attempt {attempt}: {delay:?}");
        }
    }

    #[test]
    fn test_endpoint_join() {
        let mut provider = crate::registry::default_catalog().remove(0);
        provider.base_url = "https://api.openai.com/v1/".to_string();
        assert_eq!(
            Client::endpoint(&provider),
            "https://api.openai.com/v1/chat/completions"
        );
    }
}
