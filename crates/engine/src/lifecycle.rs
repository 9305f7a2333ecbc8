//! Experiment lifecycle: validated creation, lookup, listing and status
//! changes.
//!
//! Status changes are not guarded by a state machine. Any status may be set
//! from any other as long as the experiment exists; `completed` stamps the
//! end date and the first move to `running` stamps the start date.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use experiment_core::config::ExperimentConfig;
use experiment_core::error::{EngineError, EngineResult};
use experiment_core::types::{Experiment, ExperimentDefinition, ExperimentStatus, Variant};
use tracing::{info, warn};
use uuid::Uuid;

use crate::repository::ExperimentRepository;

/// Allowed deviation of the summed variant weights from 100.
pub const WEIGHT_TOLERANCE: f64 = 0.01;

/// Metric recorded when a definition does not name any.
pub const DEFAULT_METRIC: &str = "conversion";

pub struct ExperimentLifecycle {
    repository: Arc<dyn ExperimentRepository>,
    max_variants: usize,
    default_min_sample_size: u64,
}

impl ExperimentLifecycle {
    pub fn new(repository: Arc<dyn ExperimentRepository>, config: &ExperimentConfig) -> Self {
        Self {
            repository,
            max_variants: config.max_variants,
            default_min_sample_size: config.default_min_sample_size,
        }
    }

    pub fn create_experiment(&self, definition: ExperimentDefinition) -> EngineResult<Experiment> {
        if let Err(err) = validate_definition(&definition, self.max_variants) {
            warn!(name = %definition.name, error = %err, "Rejected experiment definition");
            return Err(err);
        }

        let now = Utc::now();
        let status = if definition.auto_start {
            ExperimentStatus::Running
        } else {
            ExperimentStatus::Draft
        };
        let start_date = match (definition.start_date, definition.auto_start) {
            (Some(date), _) => Some(date),
            (None, true) => Some(now),
            (None, false) => None,
        };
        let metrics = if definition.metrics.is_empty() {
            vec![DEFAULT_METRIC.to_string()]
        } else {
            definition.metrics
        };

        let experiment = Experiment {
            id: Uuid::new_v4(),
            name: definition.name,
            description: definition.description,
            variants: definition
                .variants
                .into_iter()
                .map(|v| Variant {
                    id: Uuid::new_v4(),
                    name: v.name,
                    weight: v.weight,
                    config: v.config,
                })
                .collect(),
            status,
            target_segments: definition.target_segments,
            start_date,
            end_date: definition.end_date,
            metrics,
            min_sample_size: definition
                .min_sample_size
                .unwrap_or(self.default_min_sample_size),
            created_at: now,
            updated_at: now,
        };

        self.repository.insert(experiment.clone());
        info!(
            experiment_id = %experiment.id,
            name = %experiment.name,
            variants = experiment.variants.len(),
            status = %experiment.status,
            "Experiment created"
        );
        Ok(experiment)
    }

    pub fn get_experiment(&self, id: &Uuid) -> Option<Experiment> {
        self.repository.get(id)
    }

    /// All experiments ordered by creation time, optionally restricted to one
    /// status.
    pub fn list_experiments(&self, status: Option<ExperimentStatus>) -> Vec<Experiment> {
        let experiments = self.repository.list();
        match status {
            Some(status) => experiments
                .into_iter()
                .filter(|e| e.status == status)
                .collect(),
            None => experiments,
        }
    }

    pub fn update_status(&self, id: &Uuid, status: ExperimentStatus) -> EngineResult<Experiment> {
        let now = Utc::now();
        let mut previous = None;
        let updated = self
            .repository
            .update(id, &mut |experiment| {
                previous = Some(experiment.status);
                experiment.status = status;
                experiment.updated_at = now;
                match status {
                    ExperimentStatus::Completed => experiment.end_date = Some(now),
                    ExperimentStatus::Running if experiment.start_date.is_none() => {
                        experiment.start_date = Some(now)
                    }
                    _ => {}
                }
            })
            .ok_or_else(|| EngineError::experiment_not_found(id))?;

        info!(
            experiment_id = %id,
            from = ?previous,
            to = %status,
            "Experiment status changed"
        );
        Ok(updated)
    }
}

/// Structural checks on a definition: name, variant count, weights and
/// variant names.
pub fn validate_definition(
    definition: &ExperimentDefinition,
    max_variants: usize,
) -> EngineResult<()> {
    if definition.name.trim().is_empty() {
        return Err(EngineError::Validation(
            "Experiment name must not be empty".to_string(),
        ));
    }

    let count = definition.variants.len();
    if count < 2 {
        return Err(EngineError::Validation(format!(
            "Experiment must have at least 2 variants, got {count}"
        )));
    }
    if count > max_variants {
        return Err(EngineError::Validation(format!(
            "Experiment may have at most {max_variants} variants, got {count}"
        )));
    }

    let mut names = HashSet::new();
    for variant in &definition.variants {
        if variant.name.trim().is_empty() {
            return Err(EngineError::Validation(
                "Variant name must not be empty".to_string(),
            ));
        }
        if !names.insert(variant.name.as_str()) {
            return Err(EngineError::Validation(format!(
                "Duplicate variant name: {}",
                variant.name
            )));
        }
        if !variant.weight.is_finite() || !(0.0..=100.0).contains(&variant.weight) {
            return Err(EngineError::Validation(format!(
                "Variant '{}' weight must be between 0 and 100, got {}",
                variant.name, variant.weight
            )));
        }
    }

    let total: f64 = definition.variants.iter().map(|v| v.weight).sum();
    if (total - 100.0).abs() > WEIGHT_TOLERANCE {
        return Err(EngineError::Validation(format!(
            "Variant weights must sum to 100, got {total}"
        )));
    }

    Ok(())
}
