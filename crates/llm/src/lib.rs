mod chat;
mod client;
mod extract;
mod registry;

pub use chat::{
    ChatMessage, ChatRequest, ChatRole, Completion, ContentPart, ImageUrl, JsonSchemaFormat,
    MessageContent, ResponseFormat, TokenUsage, EXTRACTION_TEMPERATURE,
};
pub use client::{parse_stream_line, Client, LlmError, StreamEvent};
pub use extract::parse_json_reply;
pub use registry::{default_catalog, ModelSpec, ProviderConfig, Registry};
