pub mod bus;
pub mod config;
pub mod error;
pub mod history;
pub mod normalize;
pub mod provider;
pub mod registry;
pub mod session;
pub mod summarize;
pub mod task;

pub use bus::{EventBus, Subscription};
pub use config::EngineConfig;
pub use error::MoltError;
pub use provider::{Provider, ProviderCommands};
pub use registry::SessionRegistry;
pub use session::Session;
pub use summarize::summarize_once;
