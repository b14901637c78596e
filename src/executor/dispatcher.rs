use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::action::apps::app_package;
use crate::action::coords::point_field;
use crate::action::{Action, ActionKind, ActionResult, FieldValue};
use crate::config::{secs, TimingConfig};
use crate::errors::{PhoneClawError, PhoneClawResult};
use crate::executor::device::{
    ConfirmationHandler, DenyAll, DeviceBackend, LogTakeover, TakeoverHandler,
};
use crate::executor::text_input;

/// Routes decoded actions to the device backend.
///
/// `execute` never fails: missing fields, backend errors and backend panics
/// all come back as a failed, non-finishing [`ActionResult`].
pub struct ActionDispatcher {
    device: Arc<dyn DeviceBackend>,
    confirmation: Arc<dyn ConfirmationHandler>,
    takeover: Arc<dyn TakeoverHandler>,
    timing: TimingConfig,
    cancel: Option<CancellationToken>,
}

impl ActionDispatcher {
    pub fn new(device: Arc<dyn DeviceBackend>, timing: TimingConfig) -> Self {
        Self {
            device,
            confirmation: Arc::new(DenyAll),
            takeover: Arc::new(LogTakeover),
            timing,
            cancel: None,
        }
    }

    pub fn with_confirmation(mut self, handler: Arc<dyn ConfirmationHandler>) -> Self {
        self.confirmation = handler;
        self
    }

    pub fn with_takeover(mut self, handler: Arc<dyn TakeoverHandler>) -> Self {
        self.takeover = handler;
        self
    }

    /// `Wait` returns early once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn device(&self) -> &Arc<dyn DeviceBackend> {
        &self.device
    }

    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    pub async fn execute(&self, action: &Action, width: u32, height: u32) -> ActionResult {
        let name = match action {
            Action::Finish { message } => return ActionResult::finished(Some(message.clone())),
            Action::Do { name, .. } => name,
        };
        let Some(kind) = ActionKind::from_name(name) else {
            tracing::warn!(action = %name, "unknown action");
            return ActionResult::failed(format!("Unknown action: {name}"));
        };

        tracing::debug!(action = kind.name(), width, height, "dispatching");
        let outcome = AssertUnwindSafe(self.dispatch(kind, action, width, height))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(PhoneClawError::Field(e))) => {
                tracing::warn!(action = kind.name(), error = %e, "invalid action fields");
                ActionResult::failed(e.to_string())
            }
            Ok(Err(e)) => {
                tracing::warn!(action = kind.name(), error = %e, "action failed");
                ActionResult::failed(format!("Action failed: {e}"))
            }
            Err(_) => {
                tracing::error!(action = kind.name(), "device backend panicked");
                ActionResult::failed("Action failed: device backend panicked")
            }
        }
    }

    async fn dispatch(
        &self,
        kind: ActionKind,
        action: &Action,
        width: u32,
        height: u32,
    ) -> PhoneClawResult<ActionResult> {
        match kind {
            ActionKind::Launch => self.launch(action).await,
            ActionKind::Tap => self.tap(action, width, height).await,
            ActionKind::DoubleTap => {
                let (x, y) = point_field(action.field("element"), "element", width, height)?;
                self.device.double_tap(x, y).await?;
                Ok(ActionResult::ok())
            }
            ActionKind::LongPress => {
                let (x, y) = point_field(action.field("element"), "element", width, height)?;
                self.device.long_press(x, y).await?;
                Ok(ActionResult::ok())
            }
            ActionKind::Swipe => {
                let (x1, y1) = point_field(action.field("start"), "start", width, height)?;
                let (x2, y2) = point_field(action.field("end"), "end", width, height)?;
                self.device.swipe(x1, y1, x2, y2).await?;
                Ok(ActionResult::ok())
            }
            ActionKind::Type | ActionKind::TypeName => self.type_text(action).await,
            ActionKind::Paste => self.paste(action).await,
            ActionKind::PasteStream => self.paste_stream(action).await,
            ActionKind::Back => {
                self.device.back().await?;
                Ok(ActionResult::ok())
            }
            ActionKind::Home => {
                self.device.home().await?;
                Ok(ActionResult::ok())
            }
            ActionKind::Wait => {
                let duration = text_input::parse_duration(action.field("duration"));
                tracing::debug!(ms = duration.as_millis() as u64, "waiting");
                self.wait(duration).await;
                Ok(ActionResult::ok())
            }
            ActionKind::TakeOver => {
                let message = action
                    .str_field("message")
                    .unwrap_or("User intervention required");
                self.takeover.takeover(message);
                Ok(ActionResult::ok())
            }
            ActionKind::Note | ActionKind::CallApi => Ok(ActionResult::ok()),
            ActionKind::Interact => Ok(ActionResult::ok_with("User interaction required")),
            ActionKind::Delegate => Ok(ActionResult::failed(
                "Delegate is handled by the monitor, not the device",
            )),
        }
    }

    async fn launch(&self, action: &Action) -> PhoneClawResult<ActionResult> {
        let app = action
            .field("app")
            .map(FieldValue::to_text)
            .unwrap_or_default();
        let app = app.trim();
        if app.is_empty() {
            return Ok(ActionResult::failed("No app name specified"));
        }
        tracing::info!(app, package = ?app_package(app), "launching app");
        if self.device.launch(app).await? {
            Ok(ActionResult::ok())
        } else {
            Ok(ActionResult::failed(format!("App not found: {app}")))
        }
    }

    async fn tap(&self, action: &Action, width: u32, height: u32) -> PhoneClawResult<ActionResult> {
        let (x, y) = point_field(action.field("element"), "element", width, height)?;

        if let Some(message) = action.field("message") {
            let message = message.to_text();
            if !self.confirmation.confirm(&message) {
                tracing::info!(message = %message, "sensitive tap cancelled");
                return Ok(ActionResult {
                    success: false,
                    should_finish: true,
                    message: Some("cancelled".into()),
                    requires_confirmation: true,
                });
            }
            self.device.tap(x, y).await?;
            return Ok(ActionResult {
                requires_confirmation: true,
                ..ActionResult::ok()
            });
        }

        self.device.tap(x, y).await?;
        Ok(ActionResult::ok())
    }

    /// Helper-keyboard entry. The prior keyboard is restored even if typing fails.
    async fn type_text(&self, action: &Action) -> PhoneClawResult<ActionResult> {
        let text = action
            .field("text")
            .map(FieldValue::to_text)
            .unwrap_or_default();

        let prior = self.device.switch_to_helper_keyboard().await?;
        self.pause(self.timing.keyboard_switch_delay).await;

        let typed = async {
            self.device.clear_text().await?;
            self.pause(self.timing.text_clear_delay).await;
            self.device.type_text(&text).await?;
            self.pause(self.timing.text_input_delay).await;
            Ok::<(), PhoneClawError>(())
        }
        .await;

        self.device.restore_keyboard(prior).await?;
        self.pause(self.timing.keyboard_restore_delay).await;
        typed?;
        Ok(ActionResult::ok())
    }

    async fn paste(&self, action: &Action) -> PhoneClawResult<ActionResult> {
        let text = action
            .field("text")
            .map(FieldValue::to_text)
            .unwrap_or_default();
        let delay = text_input::paste_delay(action.field("delay"));

        if text_input::clear_first(action.field("clear_first")) {
            self.clear_before_paste().await?;
        }
        self.paste_piece(&text, delay).await?;
        Ok(ActionResult::ok())
    }

    async fn paste_stream(&self, action: &Action) -> PhoneClawResult<ActionResult> {
        let delay = text_input::paste_delay(action.field("delay"));
        let pieces: Vec<String> = match action.field("chunks").and_then(FieldValue::as_list) {
            Some(chunks) if !chunks.is_empty() => chunks
                .iter()
                .filter(|c| !matches!(c, FieldValue::Null))
                .map(FieldValue::to_text)
                .collect(),
            _ => {
                let text = action
                    .field("text")
                    .map(FieldValue::to_text)
                    .unwrap_or_default();
                let max_len = text_input::chunk_len(action.field("max_chunk_len"));
                text_input::split_chunks(&text, max_len)
            }
        };
        tracing::debug!(pieces = pieces.len(), delay_ms = delay.as_millis() as u64, "paste stream");

        if text_input::clear_first(action.field("clear_first")) {
            self.clear_before_paste().await?;
        }
        for piece in pieces.iter().filter(|p| !p.is_empty()) {
            self.paste_piece(piece, delay).await?;
        }
        Ok(ActionResult::ok())
    }

    async fn clear_before_paste(&self) -> PhoneClawResult<()> {
        self.device.clear_text().await?;
        self.pause(
            self.timing
                .text_clear_delay
                .min(text_input::MAX_PASTE_CLEAR_DELAY),
        )
        .await;
        Ok(())
    }

    async fn paste_piece(&self, text: &str, delay: Duration) -> PhoneClawResult<()> {
        self.device.set_clipboard(text).await?;
        sleep_nonzero(delay).await;
        self.device.paste_clipboard().await?;
        sleep_nonzero(delay).await;
        Ok(())
    }

    async fn wait(&self, duration: Duration) {
        let Some(token) = &self.cancel else {
            tokio::time::sleep(duration).await;
            return;
        };
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = token.cancelled() => tracing::info!("wait interrupted by cancellation"),
        }
    }

    async fn pause(&self, seconds: f64) {
        sleep_nonzero(secs(seconds)).await;
    }
}

async fn sleep_nonzero(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}
