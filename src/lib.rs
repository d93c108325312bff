pub mod config;
pub mod engine;
pub mod error;
pub mod market;
pub mod models;
pub mod orders;
pub mod portfolio;
pub mod store;

pub use config::EngineConfig;
pub use engine::dispatcher::DispatcherHandle;
pub use engine::ExecutionEngine;
pub use error::{EngineError, EngineResult};
