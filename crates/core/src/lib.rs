//! Shared building blocks for the experimentation and feature-flag engine:
//! domain types, the error taxonomy, configuration and deterministic bucketing.

pub mod bucketing;
pub mod config;
pub mod error;
pub mod types;

pub use bucketing::Bucketer;
pub use config::AppConfig;
pub use error::{EngineError, EngineResult, EntityKind};
