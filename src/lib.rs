// Collaborator interfaces and shared helpers
pub mod common;
pub mod config;
pub mod storage;

// Reliability subsystems
pub mod integrity;
pub mod monitor;
pub mod queue;
pub mod retry;
pub mod verify;

pub mod engine;

// Public exports
pub use config::EngineConfig;
pub use engine::{EngineError, ReliabilityEngine, ReliabilityEngineBuilder};
pub use queue::{OperationType, SyncRequest, SyncResult};
