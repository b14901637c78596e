use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::action::apps::app_package;
use crate::errors::{PhoneClawError, PhoneClawResult};
use crate::executor::device::{DeviceBackend, KeyboardState};
use crate::perception::screenshot::{Screenshot, FALLBACK_HEIGHT, FALLBACK_WIDTH};

/// A device call as recorded by [`SimulatedDevice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    Launch(String),
    Tap(i32, i32),
    DoubleTap(i32, i32),
    LongPress(i32, i32),
    Swipe(i32, i32, i32, i32),
    Back,
    Home,
    ClearText,
    TypeText(String),
    SetClipboard(String),
    PasteClipboard,
    SwitchKeyboard,
    RestoreKeyboard(String),
}

/// In-memory device for simulate mode and tests. Records every successful
/// mutating call; reads (screenshot, current app) are not recorded.
pub struct SimulatedDevice {
    width: u32,
    height: u32,
    calls: Mutex<Vec<DeviceCall>>,
    current_app: Mutex<String>,
    failing: Mutex<HashSet<String>>,
}

impl SimulatedDevice {
    pub fn new() -> Self {
        Self::with_screen(FALLBACK_WIDTH, FALLBACK_HEIGHT)
    }

    pub fn with_screen(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            calls: Mutex::new(Vec::new()),
            current_app: Mutex::new("System Home".into()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Makes the named operation (`"tap"`, `"get_screenshot"`, ...) fail from now on.
    pub fn fail_on(&self, operation: &str) {
        lock(&self.failing).insert(operation.to_string());
    }

    pub fn set_current_app(&self, app: &str) {
        *lock(&self.current_app) = app.to_string();
    }

    pub fn current_app(&self) -> String {
        lock(&self.current_app).clone()
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        lock(&self.calls).clone()
    }

    fn check(&self, operation: &str) -> PhoneClawResult<()> {
        if lock(&self.failing).contains(operation) {
            return Err(PhoneClawError::Device(format!("{operation} failed (simulated)")));
        }
        Ok(())
    }

    fn record(&self, operation: &str, call: DeviceCall) -> PhoneClawResult<()> {
        self.check(operation)?;
        tracing::trace!(?call, "simulated device call");
        lock(&self.calls).push(call);
        Ok(())
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl DeviceBackend for SimulatedDevice {
    async fn launch(&self, app: &str) -> PhoneClawResult<bool> {
        self.record("launch", DeviceCall::Launch(app.to_string()))?;
        if app_package(app).is_none() {
            return Ok(false);
        }
        self.set_current_app(app);
        Ok(true)
    }

    async fn tap(&self, x: i32, y: i32) -> PhoneClawResult<()> {
        self.record("tap", DeviceCall::Tap(x, y))
    }

    async fn double_tap(&self, x: i32, y: i32) -> PhoneClawResult<()> {
        self.record("double_tap", DeviceCall::DoubleTap(x, y))
    }

    async fn long_press(&self, x: i32, y: i32) -> PhoneClawResult<()> {
        self.record("long_press", DeviceCall::LongPress(x, y))
    }

    async fn swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32) -> PhoneClawResult<()> {
        self.record("swipe", DeviceCall::Swipe(x1, y1, x2, y2))
    }

    async fn back(&self) -> PhoneClawResult<()> {
        self.record("back", DeviceCall::Back)
    }

    async fn home(&self) -> PhoneClawResult<()> {
        self.record("home", DeviceCall::Home)
    }

    async fn clear_text(&self) -> PhoneClawResult<()> {
        self.record("clear_text", DeviceCall::ClearText)
    }

    async fn type_text(&self, text: &str) -> PhoneClawResult<()> {
        self.record("type_text", DeviceCall::TypeText(text.to_string()))
    }

    async fn set_clipboard(&self, text: &str) -> PhoneClawResult<()> {
        self.record("set_clipboard", DeviceCall::SetClipboard(text.to_string()))
    }

    async fn paste_clipboard(&self) -> PhoneClawResult<()> {
        self.record("paste_clipboard", DeviceCall::PasteClipboard)
    }

    async fn switch_to_helper_keyboard(&self) -> PhoneClawResult<KeyboardState> {
        self.record("switch_to_helper_keyboard", DeviceCall::SwitchKeyboard)?;
        Ok(KeyboardState("com.android.inputmethod.latin/.LatinIME".into()))
    }

    async fn restore_keyboard(&self, prior: KeyboardState) -> PhoneClawResult<()> {
        self.record("restore_keyboard", DeviceCall::RestoreKeyboard(prior.0))
    }

    async fn get_screenshot(&self) -> PhoneClawResult<Screenshot> {
        self.check("get_screenshot")?;
        Ok(Screenshot::blank(self.width, self.height, false))
    }

    async fn get_current_app(&self) -> PhoneClawResult<String> {
        self.check("get_current_app")?;
        Ok(self.current_app())
    }
}
