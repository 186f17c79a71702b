use std::path::Path;

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::ChatError;

// -- Chat messages ----------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// One typed part of a multi-part message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    /// Read an image file and embed it as a base64 `data:` URI.
    pub fn image_from_path(path: &Path) -> Result<Self, ChatError> {
        let bytes = std::fs::read(path).map_err(|e| ChatError::Attachment {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        let mime = mime_for_path(path);
        let encoded = general_purpose::STANDARD.encode(bytes);
        Ok(ContentPart::ImageUrl {
            image_url: ImageUrl { url: format!("data:{mime};base64,{encoded}") },
        })
    }
}

/// MIME type of a `data:` URI, if the string is one.
pub fn data_uri_mime(url: &str) -> Option<&str> {
    let rest = url.strip_prefix("data:")?;
    let end = rest.find([';', ','])?;
    Some(&rest[..end])
}

fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Either a plain string or an ordered list of typed parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// The text that gets rendered for this content. Text parts are joined
    /// with a blank line; image parts contribute nothing.
    pub fn markdown(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        ChatMessage { role: Role::System, content: MessageContent::Text(text.into()) }
    }

    pub fn user(text: impl Into<String>) -> Self {
        ChatMessage { role: Role::User, content: MessageContent::Text(text.into()) }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        ChatMessage { role: Role::Assistant, content: MessageContent::Text(text.into()) }
    }

    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        ChatMessage { role: Role::User, content: MessageContent::Parts(parts) }
    }
}

// -- Request / response wire types ------------------------------------------

#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<&'a ChatMessage>,
    pub stream: bool,
    pub user: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChunkChoice {
    pub delta: ChunkDelta,
}

/// One `data:` payload of the streamed response.
#[derive(Debug, Deserialize)]
pub struct ChatChunk {
    pub choices: Vec<ChunkChoice>,
}

impl ChatChunk {
    /// Content carried by the first choice, if any.
    pub fn content(&self) -> Option<&str> {
        self.choices.first().and_then(|c| c.delta.content.as_deref())
    }
}

#[derive(Debug, Deserialize)]
pub struct ModelEntry {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct ModelList {
    pub data: Vec<ModelEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_role_display() {
        assert_eq!(Role::User.to_string(), "user");
        assert_eq!(Role::Assistant.to_string(), "assistant");
        assert_eq!(Role::System.to_string(), "system");
    }

    #[test]
    fn test_request_serializes_text_message() {
        let msgs = [ChatMessage::user("hello")];
        let req = ChatRequest {
            model: "mymap-ai",
            messages: msgs.iter().collect(),
            stream: true,
            user: "alice",
        };
        let json: serde_json::Value = serde_json::to_value(&req).expect("serialize");
        assert_eq!(json["model"], "mymap-ai");
        assert_eq!(json["stream"], true);
        assert_eq!(json["user"], "alice");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "hello");
    }

    #[test]
    fn test_parts_serialize_with_type_tags() {
        let msg = ChatMessage::user_parts(vec![
            ContentPart::text("look"),
            ContentPart::ImageUrl { image_url: ImageUrl { url: "data:image/png;base64,AA==".into() } },
        ]);
        let json = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][0]["text"], "look");
        assert_eq!(json["content"][1]["type"], "image_url");
        assert_eq!(json["content"][1]["image_url"]["url"], "data:image/png;base64,AA==");
    }

    #[test]
    fn test_chunk_deserializes_content() {
        let json = r#"{"id":"x","choices":[{"index":0,"delta":{"content":"Hi"},"finish_reason":null}]}"#;
        let chunk: ChatChunk = serde_json::from_str(json).expect("deser");
        assert_eq!(chunk.content(), Some("Hi"));
    }

    #[test]
    fn test_chunk_empty_delta_and_empty_choices() {
        let chunk: ChatChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#).expect("deser");
        assert_eq!(chunk.content(), None);
        let chunk: ChatChunk = serde_json::from_str(r#"{"choices":[]}"#).expect("deser");
        assert_eq!(chunk.content(), None);
    }

    #[test]
    fn test_chunk_without_choices_is_rejected() {
        assert!(serde_json::from_str::<ChatChunk>(r#"{"object":"ping"}"#).is_err());
    }

    #[test]
    fn test_markdown_joins_text_parts() {
        let content = MessageContent::Parts(vec![
            ContentPart::text("one"),
            ContentPart::ImageUrl { image_url: ImageUrl { url: "data:image/png;base64,".into() } },
            ContentPart::text("two"),
        ]);
        assert_eq!(content.markdown(), "one\n\ntwo");
    }

    #[test]
    fn test_image_from_path_builds_data_uri() {
        let mut file = tempfile::Builder::new().suffix(".png").tempfile().expect("tempfile");
        file.write_all(b"abc").expect("write");
        let part = ContentPart::image_from_path(file.path()).expect("attach");
        match part {
            ContentPart::ImageUrl { image_url } => {
                assert_eq!(image_url.url, "data:image/png;base64,YWJj");
                assert_eq!(data_uri_mime(&image_url.url), Some("image/png"));
            }
            other => panic!("unexpected part {other:?}"),
        }
    }

    #[test]
    fn test_image_from_missing_path_errors() {
        let err = ContentPart::image_from_path(Path::new("/definitely/not/here.png")).unwrap_err();
        assert!(matches!(err, ChatError::Attachment { .. }));
    }

    #[test]
    fn test_data_uri_mime_rejects_plain_urls() {
        assert_eq!(data_uri_mime("https://example.com/a.png"), None);
    }
}
