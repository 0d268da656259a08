/// Role of a chat message author.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One part of a multimodal user message, in the OpenAI-compatible wire
/// shape used by every configured provider.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    /// An inline PNG image, carried as a data URL.
    pub fn png(bytes: &[u8]) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: format!("data:image/png;base64,{}", base64::encode(bytes)),
            },
        }
    }
}

/// Message content: plain text, or multimodal parts for models with
/// image input support.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// The textual content, ignoring images. Used for logging and token
    /// estimates.
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: MessageContent::Text(content.into()),
        }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: MessageContent::Text(content.into()),
        }
    }
    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: ChatRole::User,
            content: MessageContent::Parts(parts),
        }
    }
}

/// Constrained-output request: ask the provider for JSON conforming to a
/// schema. Only sent to models that advertise structured-output support.
#[derive(Clone, Debug, serde::Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub type_: &'static str,
    pub json_schema: JsonSchemaFormat,
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct JsonSchemaFormat {
    pub name: String,
    pub schema: serde_json::Value,
    pub strict: bool,
}

impl ResponseFormat {
    pub fn json_schema(name: impl Into<String>, schema: serde_json::Value) -> Self {
        Self {
            type_: "json_schema",
            json_schema: JsonSchemaFormat {
                name: name.into(),
                schema,
                strict: true,
            },
        }
    }
}

/// A chat completion request in the provider wire shape.
#[derive(Clone, Debug, serde::Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

/// Default sampling temperature for extraction runs. Chat callers override.
pub const EXTRACTION_TEMPERATURE: f64 = 0.1;

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
            top_p: None,
            response_format: None,
            stream: false,
        }
    }
}

/// Token counts reported by the provider, feeding the SPU cost function.
#[derive(Clone, Copy, Debug, Default, serde::Deserialize)]
pub struct TokenUsage {
    #[serde(rename = "prompt_tokens", default)]
    pub input_tokens: u64,
    #[serde(rename = "completion_tokens", default)]
    pub output_tokens: u64,
}

/// A completed (non-streaming) chat response.
#[derive(Clone, Debug)]
pub struct Completion {
    pub content: String,
    pub usage: TokenUsage,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let mut request = ChatRequest::new(
            "gpt-4o-mini",
            vec![
                ChatMessage::system("Extract fields."),
                ChatMessage::user_parts(vec![
                    ContentPart::text("page text"),
                    ContentPart::png(b"\x89PNG"),
                ]),
            ],
        );
        request.temperature = Some(EXTRACTION_TEMPERATURE);
        request.response_format = Some(ResponseFormat::json_schema(
            "invoice",
            serde_json::json!({"type": "object"}),
        ));

        insta::assert_json_snapshot!(request, @r###"
        {
          "model": "gpt-4o-mini",
          "messages": [
            {
              "role": "system",
              "content": "Extract fields."
            },
            {
              "role": "user",
              "content": [
                {
                  "type": "text",
                  "text": "page text"
                },
                {
                  "type": "image_url",
                  "image_url": {
                    "url": "data:image/png;base64,iVBORw=="
                  }
                }
              ]
            }
          ],
          "temperature": 0.1,
          "response_format": {
            "type": "json_schema",
            "json_schema": {
              "name": "invoice",
              "schema": {
                "type": "object"
              },
              "strict": true
            }
          }
        }
        "###);
    }

    #[test]
    fn test_stream_false_is_omitted() {
        let request = ChatRequest::new("m", vec![]);
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("stream").is_none());

        let mut streaming = ChatRequest::new("m", vec![]);
        streaming.stream = true;
        let value = serde_json::to_value(&streaming).unwrap();
        assert_eq!(value["stream"], true);
    }

    #[test]
    fn test_content_as_text_skips_images() {
        let message = ChatMessage::user_parts(vec![
            ContentPart::text("alpha"),
            ContentPart::png(b"img"),
            ContentPart::text("beta"),
        ]);
        assert_eq!(message.content.as_text(), "alpha\nbeta");
    }
}
