use crate::llm::types::ChatMessage;
use crate::perception::screenshot::Screenshot;

/// Bounded conversation sent to a model.
///
/// Only the most recent user message may carry an image: every earlier image
/// is reduced to its text before a new one is appended.
#[derive(Debug, Clone, Default)]
pub struct ConversationContext {
    messages: Vec<ChatMessage>,
}

impl ConversationContext {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::system(system_prompt)],
        }
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.messages.push(ChatMessage::user(text));
    }

    /// Appends a user turn with the screenshot attached, after stripping all
    /// earlier images.
    pub fn push_user_with_image(&mut self, text: impl Into<String>, shot: Option<&Screenshot>) {
        self.strip_images();
        let url = shot.filter(|s| s.has_image()).map(Screenshot::data_url);
        self.messages.push(ChatMessage::user_with_image(text, url));
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.messages.push(ChatMessage::assistant(text));
    }

    pub fn strip_images(&mut self) {
        for msg in &mut self.messages {
            msg.strip_images();
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn image_count(&self) -> usize {
        self.messages.iter().filter(|m| m.has_image()).count()
    }

    /// True once anything beyond the system prompt was appended.
    pub fn has_turns(&self) -> bool {
        self.messages.iter().any(|m| m.role != "system")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::MessageContent;

    #[test]
    fn only_latest_message_keeps_its_image() {
        let shot = Screenshot::blank(100, 200, false);
        let mut ctx = ConversationContext::new("sys");
        ctx.push_user_with_image("first", Some(&shot));
        ctx.push_assistant("ok");
        ctx.push_user_with_image("second", Some(&shot));

        assert_eq!(ctx.image_count(), 1);
        assert!(ctx.messages().last().unwrap().has_image());
        assert_eq!(ctx.messages()[1].content, MessageContent::Text("first".into()));
    }

    #[test]
    fn missing_screenshot_degrades_to_text() {
        let mut ctx = ConversationContext::new("sys");
        ctx.push_user_with_image("goal", None);
        assert_eq!(ctx.image_count(), 0);
        assert!(ctx.has_turns());
        assert_eq!(ctx.len(), 2);
    }
}
