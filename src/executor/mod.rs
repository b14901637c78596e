pub mod device;
pub mod dispatcher;
pub mod simulated;
pub mod text_input;

pub use device::{ConfirmationHandler, DeviceBackend, KeyboardState, TakeoverHandler};
pub use dispatcher::ActionDispatcher;
pub use simulated::SimulatedDevice;
