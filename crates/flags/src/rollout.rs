//! Rollout percentage, rollback and per-user overrides.

use std::sync::Arc;

use chrono::Utc;
use experiment_core::error::{EngineError, EngineResult};
use experiment_core::types::{FeatureFlag, FlagStatus};
use tracing::{info, warn};
use uuid::Uuid;

use crate::store::FlagRepository;

pub struct RolloutController {
    repository: Arc<dyn FlagRepository>,
}

impl RolloutController {
    pub fn new(repository: Arc<dyn FlagRepository>) -> Self {
        Self { repository }
    }

    /// Set the rollout percentage; status follows it (0 → disabled,
    /// 100 → enabled, otherwise percentage rollout).
    pub fn rollout_feature(&self, flag_id: &Uuid, percentage: f64) -> EngineResult<FeatureFlag> {
        if self.repository.get(flag_id).is_none() {
            return Err(EngineError::flag_not_found(flag_id));
        }
        if let Err(err) = validate_percentage(percentage) {
            warn!(flag_id = %flag_id, percentage, "Rejected rollout percentage");
            return Err(err);
        }

        let flag = self.mutate(flag_id, |flag| {
            flag.rollout_percentage = percentage;
            flag.status = FlagStatus::for_percentage(percentage);
        })?;
        info!(
            flag_key = %flag.key,
            percentage,
            status = %flag.status,
            "Feature rollout updated"
        );
        Ok(flag)
    }

    pub fn rollback_feature(&self, flag_id: &Uuid) -> EngineResult<FeatureFlag> {
        let flag = self.mutate(flag_id, |flag| {
            flag.status = FlagStatus::Disabled;
            flag.rollout_percentage = 0.0;
        })?;
        info!(flag_key = %flag.key, "Feature rolled back");
        Ok(flag)
    }

    pub fn set_user_override(
        &self,
        flag_id: &Uuid,
        user_id: &str,
        enabled: bool,
    ) -> EngineResult<FeatureFlag> {
        let flag = self.mutate(flag_id, |flag| {
            flag.overrides.insert(user_id.to_string(), enabled);
        })?;
        info!(flag_key = %flag.key, user_id = %user_id, enabled, "User override set");
        Ok(flag)
    }

    pub fn remove_user_override(&self, flag_id: &Uuid, user_id: &str) -> EngineResult<FeatureFlag> {
        let flag = self.mutate(flag_id, |flag| {
            flag.overrides.remove(user_id);
        })?;
        info!(flag_key = %flag.key, user_id = %user_id, "User override removed");
        Ok(flag)
    }

    fn mutate(
        &self,
        flag_id: &Uuid,
        mut apply: impl FnMut(&mut FeatureFlag),
    ) -> EngineResult<FeatureFlag> {
        let now = Utc::now();
        self.repository
            .update(flag_id, &mut |flag| {
                apply(flag);
                flag.updated_at = now;
            })
            .ok_or_else(|| EngineError::flag_not_found(flag_id))
    }
}

pub fn validate_percentage(percentage: f64) -> EngineResult<()> {
    if percentage.is_finite() && (0.0..=100.0).contains(&percentage) {
        Ok(())
    } else {
        Err(EngineError::Validation(format!(
            "Rollout percentage must be between 0 and 100, got {percentage}"
        )))
    }
}
