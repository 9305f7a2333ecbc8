//! Experimentation engine: experiment lifecycle, deterministic variant
//! assignment, conversion tracking and significance analysis.

pub mod analyzer;
pub mod assignment;
pub mod conversion;
pub mod lifecycle;
pub mod repository;
pub mod service;
pub mod stats;

pub use analyzer::{AnalysisSettings, StatisticalAnalyzer};
pub use assignment::AssignmentTracker;
pub use conversion::ConversionRecorder;
pub use lifecycle::ExperimentLifecycle;
pub use repository::{ExperimentRepository, ExperimentSnapshot, InMemoryExperimentRepository};
pub use service::ExperimentService;
