use async_trait::async_trait;

use crate::errors::PhoneClawResult;
use crate::perception::screenshot::Screenshot;

/// Input method that was active before the helper keyboard took over.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyboardState(pub String);

/// Concrete device operations. Implementations own transport, retries and timeouts.
#[async_trait]
pub trait DeviceBackend: Send + Sync {
    /// Returns `false` when the app is unknown to the device.
    async fn launch(&self, app: &str) -> PhoneClawResult<bool>;

    async fn tap(&self, x: i32, y: i32) -> PhoneClawResult<()>;

    async fn double_tap(&self, x: i32, y: i32) -> PhoneClawResult<()>;

    async fn long_press(&self, x: i32, y: i32) -> PhoneClawResult<()>;

    async fn swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32) -> PhoneClawResult<()>;

    async fn back(&self) -> PhoneClawResult<()>;

    async fn home(&self) -> PhoneClawResult<()>;

    async fn clear_text(&self) -> PhoneClawResult<()>;

    async fn type_text(&self, text: &str) -> PhoneClawResult<()>;

    async fn set_clipboard(&self, text: &str) -> PhoneClawResult<()>;

    async fn paste_clipboard(&self) -> PhoneClawResult<()>;

    async fn switch_to_helper_keyboard(&self) -> PhoneClawResult<KeyboardState>;

    async fn restore_keyboard(&self, prior: KeyboardState) -> PhoneClawResult<()>;

    async fn get_screenshot(&self) -> PhoneClawResult<Screenshot>;

    async fn get_current_app(&self) -> PhoneClawResult<String>;
}

/// Approves or rejects a sensitive action.
pub trait ConfirmationHandler: Send + Sync {
    fn confirm(&self, message: &str) -> bool;
}

/// Receives requests for manual intervention.
pub trait TakeoverHandler: Send + Sync {
    fn takeover(&self, message: &str);
}

impl<F> ConfirmationHandler for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn confirm(&self, message: &str) -> bool {
        self(message)
    }
}

impl<F> TakeoverHandler for F
where
    F: Fn(&str) + Send + Sync,
{
    fn takeover(&self, message: &str) {
        self(message)
    }
}

/// Rejects every sensitive action. Unattended runs never block on a prompt.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyAll;

impl ConfirmationHandler for DenyAll {
    fn confirm(&self, message: &str) -> bool {
        tracing::warn!(prompt = message, "sensitive action denied");
        false
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogTakeover;

impl TakeoverHandler for LogTakeover {
    fn takeover(&self, message: &str) {
        tracing::warn!(reason = message, "manual takeover requested");
    }
}
