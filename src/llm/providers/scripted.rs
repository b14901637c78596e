use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::{PhoneClawError, PhoneClawResult};
use crate::llm::provider::LlmProvider;
use crate::llm::types::{ChatMessage, Completion};

/// One canned reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(Completion),
    Error(String),
}

impl From<&str> for ScriptedReply {
    fn from(text: &str) -> Self {
        ScriptedReply::Text(Completion::new(text))
    }
}

/// Replays a fixed list of replies in order, repeating the last one once the
/// list runs out. Used by simulation and tests.
pub struct ScriptedProvider {
    model: String,
    replies: Mutex<VecDeque<ScriptedReply>>,
    last: Mutex<Option<ScriptedReply>>,
    reject_images: bool,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedProvider {
    pub fn new<I, R>(replies: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<ScriptedReply>,
    {
        Self {
            model: "scripted".into(),
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            last: Mutex::new(None),
            reject_images: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Fails any request carrying an image, like a text-only endpoint would.
    pub fn rejecting_images(mut self) -> Self {
        self.reject_images = true;
        self
    }

    /// Every message list received so far, including rejected ones.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        lock(&self.requests).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        _max_tokens: u32,
        _temperature: f64,
    ) -> PhoneClawResult<Completion> {
        lock(&self.requests).push(messages.to_vec());

        if self.reject_images && messages.iter().any(ChatMessage::has_image) {
            return Err(PhoneClawError::LlmProvider(
                "400: image input is not supported".into(),
            ));
        }

        let next = lock(&self.replies).pop_front();
        let reply = match next {
            Some(reply) => {
                *lock(&self.last) = Some(reply.clone());
                reply
            }
            None => lock(&self.last)
                .clone()
                .ok_or_else(|| PhoneClawError::LlmProvider("script is empty".into()))?,
        };
        match reply {
            ScriptedReply::Text(completion) => Ok(completion),
            ScriptedReply::Error(message) => Err(PhoneClawError::LlmProvider(message)),
        }
    }
}
