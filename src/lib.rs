pub mod config;
pub mod error;
pub mod kernel;
pub mod outputs;
pub mod skills;

// Re-export the entry points embedders need
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use kernel::dispatch::{QueryDispatcher, QueryTicket, Response};
pub use kernel::runtime::{Runtime, RuntimeBuilder};
