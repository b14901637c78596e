pub mod provider;
pub mod providers;
pub mod registry;
pub mod types;

pub use provider::LlmProvider;
pub use registry::{ProviderRegistry, Role, RoleBinding};
pub use types::{ChatMessage, Completion};
