use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: MessageContent::Text(text.into()),
        }
    }

    /// User turn with the image part first, as vision endpoints expect.
    /// `image_url` of `None` degrades to plain text.
    pub fn user_with_image(text: impl Into<String>, image_url: Option<String>) -> Self {
        let text = text.into();
        let content = match image_url {
            Some(url) => MessageContent::Parts(vec![
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url },
                },
                ContentPart::Text { text },
            ]),
            None => MessageContent::Text(text),
        };
        Self {
            role: "user".into(),
            content,
        }
    }

    pub fn has_image(&self) -> bool {
        self.content.has_image()
    }

    /// Replaces multi-part content with its joined, trimmed text parts.
    pub fn strip_images(&mut self) {
        if let MessageContent::Parts(_) = &self.content {
            self.content = MessageContent::Text(self.content.text());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } if !text.trim().is_empty() => Some(text.trim()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn has_image(&self) -> bool {
        matches!(self, MessageContent::Parts(parts)
            if parts.iter().any(|p| matches!(p, ContentPart::ImageUrl { .. })))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// A non-streamed completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    /// `stop`, `length`, ... as reported by the endpoint; empty when absent.
    pub finish_reason: String,
}

impl Completion {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finish_reason: "stop".into(),
        }
    }

    pub fn truncated(&self) -> bool {
        self.finish_reason == "length"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_message_serializes_as_parts() {
        let msg = ChatMessage::user_with_image("look", Some("data:image/png;base64,AAAA".into()));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["content"][0]["type"], "image_url");
        assert_eq!(json["content"][1]["text"], "look");
        assert!(msg.has_image());
    }

    #[test]
    fn stripping_keeps_text_only() {
        let mut msg = ChatMessage::user_with_image(" look ", Some("data:x".into()));
        msg.strip_images();
        assert_eq!(msg.content, MessageContent::Text("look".into()));
        assert!(!msg.has_image());
    }

    #[test]
    fn text_message_is_a_plain_string() {
        let json = serde_json::to_value(ChatMessage::system("hi")).unwrap();
        assert_eq!(json["content"], "hi");
    }
}
