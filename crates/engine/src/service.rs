//! `ExperimentService`, the call surface consumed by the HTTP layer.

use std::sync::Arc;

use experiment_core::bucketing::Bucketer;
use experiment_core::config::AppConfig;
use experiment_core::error::EngineResult;
use experiment_core::types::{
    ConversionEvent, Experiment, ExperimentDefinition, ExperimentResults, ExperimentStatus,
    UserAssignment,
};
use uuid::Uuid;

use crate::analyzer::{AnalysisSettings, StatisticalAnalyzer};
use crate::assignment::AssignmentTracker;
use crate::conversion::ConversionRecorder;
use crate::lifecycle::ExperimentLifecycle;
use crate::repository::{ExperimentRepository, InMemoryExperimentRepository};

pub struct ExperimentService {
    lifecycle: ExperimentLifecycle,
    assignments: AssignmentTracker,
    conversions: ConversionRecorder,
    analyzer: StatisticalAnalyzer,
}

impl ExperimentService {
    /// Service backed by the in-memory repository.
    pub fn new(config: &AppConfig) -> Self {
        Self::with_repository(config, Arc::new(InMemoryExperimentRepository::new()))
    }

    pub fn with_repository(config: &AppConfig, repository: Arc<dyn ExperimentRepository>) -> Self {
        Self {
            lifecycle: ExperimentLifecycle::new(Arc::clone(&repository), &config.experiments),
            assignments: AssignmentTracker::new(
                Arc::clone(&repository),
                Bucketer::new(config.bucketing_seed.clone()),
            ),
            conversions: ConversionRecorder::new(Arc::clone(&repository)),
            analyzer: StatisticalAnalyzer::new(
                repository,
                AnalysisSettings::from(&config.experiments),
            ),
        }
    }

    pub fn create_experiment(&self, definition: ExperimentDefinition) -> EngineResult<Experiment> {
        self.lifecycle.create_experiment(definition)
    }

    pub fn get_experiment(&self, id: &Uuid) -> Option<Experiment> {
        self.lifecycle.get_experiment(id)
    }

    pub fn list_experiments(&self, status: Option<ExperimentStatus>) -> Vec<Experiment> {
        self.lifecycle.list_experiments(status)
    }

    pub fn update_experiment_status(
        &self,
        id: &Uuid,
        status: ExperimentStatus,
    ) -> EngineResult<Experiment> {
        self.lifecycle.update_status(id, status)
    }

    pub fn assign_user_to_variant(&self, user_id: &str, experiment_id: &Uuid) -> EngineResult<Uuid> {
        self.assignments.assign_user_to_variant(user_id, experiment_id)
    }

    pub fn get_user_assignment(&self, user_id: &str, experiment_id: &Uuid) -> Option<UserAssignment> {
        self.assignments.get_user_assignment(user_id, experiment_id)
    }

    pub fn assignment_count(&self, experiment_id: &Uuid) -> usize {
        self.assignments.assignment_count(experiment_id)
    }

    pub fn track_conversion(
        &self,
        user_id: &str,
        experiment_id: &Uuid,
        metric: &str,
        value: Option<f64>,
        metadata: Option<serde_json::Value>,
    ) -> EngineResult<ConversionEvent> {
        self.conversions
            .track_conversion(user_id, experiment_id, metric, value, metadata)
    }

    pub fn events(&self, experiment_id: &Uuid) -> Vec<ConversionEvent> {
        self.conversions.events(experiment_id)
    }

    pub fn analyze_results(&self, experiment_id: &Uuid) -> EngineResult<ExperimentResults> {
        self.analyzer.analyze_results(experiment_id)
    }
}
