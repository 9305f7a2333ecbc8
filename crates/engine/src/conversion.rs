//! Append-only conversion events tied to existing assignments.

use std::sync::Arc;

use chrono::Utc;
use experiment_core::error::{EngineError, EngineResult};
use experiment_core::types::{ConversionEvent, UserAssignment};
use tracing::debug;
use uuid::Uuid;

use crate::repository::ExperimentRepository;

pub struct ConversionRecorder {
    repository: Arc<dyn ExperimentRepository>,
}

impl ConversionRecorder {
    pub fn new(repository: Arc<dyn ExperimentRepository>) -> Self {
        Self { repository }
    }

    /// Record a metric event for an assigned user. The variant comes from the
    /// stored assignment, never from re-bucketing. `value` defaults to 1.
    pub fn track_conversion(
        &self,
        user_id: &str,
        experiment_id: &Uuid,
        metric: &str,
        value: Option<f64>,
        metadata: Option<serde_json::Value>,
    ) -> EngineResult<ConversionEvent> {
        let value = value.unwrap_or(1.0);
        if !value.is_finite() {
            return Err(EngineError::Validation(format!(
                "Conversion value must be finite, got {value}"
            )));
        }

        let build = |assignment: &UserAssignment| ConversionEvent {
            id: Uuid::new_v4(),
            user_id: assignment.user_id.clone(),
            experiment_id: assignment.experiment_id,
            variant_id: assignment.variant_id,
            metric: metric.to_string(),
            value,
            metadata: metadata.clone(),
            timestamp: Utc::now(),
        };
        let event = self.repository.append_event(experiment_id, user_id, &build)?;

        debug!(
            experiment_id = %experiment_id,
            user_id = %user_id,
            variant_id = %event.variant_id,
            metric = %metric,
            value,
            "Conversion tracked"
        );
        Ok(event)
    }

    /// Copy of the experiment's event log in append order.
    pub fn events(&self, experiment_id: &Uuid) -> Vec<ConversionEvent> {
        self.repository.events(experiment_id)
    }
}
