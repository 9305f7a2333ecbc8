//! Assignment of users to experiment variants.

use std::sync::Arc;

use chrono::Utc;
use experiment_core::bucketing::Bucketer;
use experiment_core::error::{EngineError, EngineResult};
use experiment_core::types::{AssignmentMethod, Experiment, UserAssignment, Variant};
use tracing::debug;
use uuid::Uuid;

use crate::repository::ExperimentRepository;

pub struct AssignmentTracker {
    repository: Arc<dyn ExperimentRepository>,
    bucketer: Bucketer,
}

impl AssignmentTracker {
    pub fn new(repository: Arc<dyn ExperimentRepository>, bucketer: Bucketer) -> Self {
        Self {
            repository,
            bucketer,
        }
    }

    /// Place `user_id` into a variant of a running experiment. Repeat calls
    /// return the stored variant, even when racing each other.
    pub fn assign_user_to_variant(&self, user_id: &str, experiment_id: &Uuid) -> EngineResult<Uuid> {
        let choose = |experiment: &Experiment| -> EngineResult<UserAssignment> {
            if !experiment.is_running() {
                return Err(EngineError::NotRunning {
                    experiment_id: experiment.id,
                    status: experiment.status,
                });
            }
            let bucket = self.bucketer.bucket(user_id, &experiment.id.to_string());
            let variant = select_variant(&experiment.variants, bucket).ok_or_else(|| {
                EngineError::Validation(format!("Experiment {} has no variants", experiment.id))
            })?;
            Ok(UserAssignment {
                user_id: user_id.to_string(),
                experiment_id: experiment.id,
                variant_id: variant.id,
                assigned_at: Utc::now(),
                method: AssignmentMethod::Random,
            })
        };

        let (assignment, created) =
            self.repository
                .assign_if_absent(experiment_id, user_id, &choose)?;
        if created {
            debug!(
                experiment_id = %experiment_id,
                user_id = %user_id,
                variant_id = %assignment.variant_id,
                "User assigned to variant"
            );
        }
        Ok(assignment.variant_id)
    }

    pub fn get_user_assignment(&self, user_id: &str, experiment_id: &Uuid) -> Option<UserAssignment> {
        self.repository.get_assignment(user_id, experiment_id)
    }

    pub fn assignment_count(&self, experiment_id: &Uuid) -> usize {
        self.repository.assignment_count(experiment_id)
    }
}

/// Variant whose cumulative weight range contains `bucket`. Weights
/// [50, 30, 20] give ranges [0, 50), [50, 80), [80, 100). Falls back to the
/// last variant when rounding leaves the top of the range uncovered.
pub fn select_variant(variants: &[Variant], bucket: u32) -> Option<&Variant> {
    let point = f64::from(bucket);
    let mut cumulative = 0.0;
    for variant in variants {
        cumulative += variant.weight;
        if point < cumulative {
            return Some(variant);
        }
    }
    variants.last()
}
