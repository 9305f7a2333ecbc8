//! Feature flag management: creation, lookup, evaluation and rollout control
//! behind one facade.

use std::sync::Arc;

use chrono::Utc;
use experiment_core::bucketing::Bucketer;
use experiment_core::config::AppConfig;
use experiment_core::error::{EngineError, EngineResult};
use experiment_core::types::{FeatureFlag, FlagDefinition, FlagEvaluation, FlagStatus};
use tracing::{info, warn};
use uuid::Uuid;

use crate::evaluator::FlagEvaluator;
use crate::rollout::{validate_percentage, RolloutController};
use crate::segments::{AllUsersMatch, SegmentResolver};
use crate::store::{FlagRepository, InMemoryFlagRepository};

pub struct FeatureFlagManager {
    repository: Arc<dyn FlagRepository>,
    evaluator: FlagEvaluator,
    rollout: RolloutController,
}

impl FeatureFlagManager {
    /// In-memory flags; every user matches every segment.
    pub fn new(config: &AppConfig) -> Self {
        Self::with_collaborators(
            config,
            Arc::new(InMemoryFlagRepository::new()),
            Arc::new(AllUsersMatch),
        )
    }

    pub fn with_collaborators(
        config: &AppConfig,
        repository: Arc<dyn FlagRepository>,
        segments: Arc<dyn SegmentResolver>,
    ) -> Self {
        Self {
            evaluator: FlagEvaluator::new(
                Arc::clone(&repository),
                Bucketer::new(config.bucketing_seed.clone()),
                segments,
                config.flags.overrides_bypass_disabled,
            ),
            rollout: RolloutController::new(Arc::clone(&repository)),
            repository,
        }
    }

    /// Create a new feature flag. Keys are unique.
    pub fn create_flag(&self, definition: FlagDefinition) -> EngineResult<FeatureFlag> {
        if definition.key.trim().is_empty() {
            warn!("Rejected feature flag with blank key");
            return Err(EngineError::Validation(
                "Feature flag key must not be empty".into(),
            ));
        }
        if let Err(err) = validate_percentage(definition.rollout_percentage) {
            warn!(flag_key = %definition.key, "Rejected feature flag definition");
            return Err(err);
        }

        let now = Utc::now();
        let status = definition
            .status
            .unwrap_or_else(|| FlagStatus::for_percentage(definition.rollout_percentage));
        let flag = FeatureFlag {
            id: Uuid::new_v4(),
            name: definition.name.unwrap_or_else(|| definition.key.clone()),
            key: definition.key,
            description: definition.description,
            status,
            rollout_percentage: definition.rollout_percentage,
            default_value: definition.default_value,
            overrides: definition.overrides,
            target_segments: definition.target_segments,
            created_at: now,
            updated_at: now,
        };

        if let Err(err) = self.repository.insert_unique_key(flag.clone()) {
            warn!(flag_key = %flag.key, "Feature flag key already exists");
            return Err(err);
        }
        info!(flag_key = %flag.key, status = %flag.status, "Feature flag created");
        Ok(flag)
    }

    pub fn get_flag(&self, id: &Uuid) -> Option<FeatureFlag> {
        self.repository.get(id)
    }

    pub fn get_flag_by_key(&self, key: &str) -> Option<FeatureFlag> {
        self.repository.get_by_key(key)
    }

    /// All flags, sorted by key.
    pub fn list_flags(&self) -> Vec<FeatureFlag> {
        self.repository.list()
    }

    pub fn delete_flag(&self, id: &Uuid) -> EngineResult<()> {
        if self.repository.delete(id) {
            info!(flag_id = %id, "Feature flag deleted");
            Ok(())
        } else {
            Err(EngineError::flag_not_found(id))
        }
    }

    /// Evaluate whether a feature is enabled for a user.
    pub fn evaluate(&self, key: &str, user_id: &str) -> FlagEvaluation {
        self.evaluator.evaluate(key, user_id)
    }

    pub fn rollout_feature(&self, flag_id: &Uuid, percentage: f64) -> EngineResult<FeatureFlag> {
        self.rollout.rollout_feature(flag_id, percentage)
    }

    pub fn rollback_feature(&self, flag_id: &Uuid) -> EngineResult<FeatureFlag> {
        self.rollout.rollback_feature(flag_id)
    }

    pub fn set_user_override(
        &self,
        flag_id: &Uuid,
        user_id: &str,
        enabled: bool,
    ) -> EngineResult<FeatureFlag> {
        self.rollout.set_user_override(flag_id, user_id, enabled)
    }

    pub fn remove_user_override(&self, flag_id: &Uuid, user_id: &str) -> EngineResult<FeatureFlag> {
        self.rollout.remove_user_override(flag_id, user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use experiment_core::types::EvaluationReason;

    fn manager() -> FeatureFlagManager {
        FeatureFlagManager::new(&AppConfig::default())
    }

    #[test]
    fn test_create_derives_status_and_name() {
        let mgr = manager();
        let off = mgr.create_flag(FlagDefinition::new("off")).unwrap();
        assert_eq!(off.status, FlagStatus::Disabled);
        assert_eq!(off.name, "off");

        let partial = mgr
            .create_flag(FlagDefinition::new("partial").with_rollout_percentage(30.0))
            .unwrap();
        assert_eq!(partial.status, FlagStatus::PercentageRollout);

        let full = mgr
            .create_flag(FlagDefinition::new("full").with_rollout_percentage(100.0))
            .unwrap();
        assert_eq!(full.status, FlagStatus::Enabled);

        let explicit = mgr
            .create_flag(FlagDefinition::new("explicit").with_status(FlagStatus::Enabled))
            .unwrap();
        assert_eq!(explicit.status, FlagStatus::Enabled);
        assert_eq!(explicit.rollout_percentage, 0.0);
    }

    #[test]
    fn test_create_validation() {
        let mgr = manager();
        assert!(matches!(
            mgr.create_flag(FlagDefinition::new("  ")),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            mgr.create_flag(FlagDefinition::new("bad").with_rollout_percentage(120.0)),
            Err(EngineError::Validation(_))
        ));
        mgr.create_flag(FlagDefinition::new("dup")).unwrap();
        assert!(matches!(
            mgr.create_flag(FlagDefinition::new("dup")),
            Err(EngineError::DuplicateKey(_))
        ));
        assert_eq!(mgr.list_flags().len(), 1);
    }

    #[test]
    fn test_lookup_and_delete() {
        let mgr = manager();
        let flag = mgr.create_flag(FlagDefinition::new("dark-mode")).unwrap();
        assert_eq!(mgr.get_flag(&flag.id).map(|f| f.key), Some("dark-mode".into()));
        assert_eq!(mgr.get_flag_by_key("dark-mode").map(|f| f.id), Some(flag.id));

        mgr.delete_flag(&flag.id).unwrap();
        assert!(mgr.get_flag(&flag.id).is_none());
        assert!(matches!(
            mgr.delete_flag(&flag.id),
            Err(EngineError::NotFound { .. })
        ));
        assert_eq!(mgr.evaluate("dark-mode", "u1").reason, EvaluationReason::Default);
    }

    #[test]
    fn test_evaluate_follows_rollout_changes() {
        let mgr = manager();
        let flag = mgr.create_flag(FlagDefinition::new("checkout-v2")).unwrap();
        assert_eq!(mgr.evaluate("checkout-v2", "u1").reason, EvaluationReason::Disabled);

        mgr.rollout_feature(&flag.id, 100.0).unwrap();
        let eval = mgr.evaluate("checkout-v2", "u1");
        assert!(eval.value);
        assert_eq!(eval.reason, EvaluationReason::Default);

        mgr.set_user_override(&flag.id, "u1", false).unwrap();
        assert_eq!(mgr.evaluate("checkout-v2", "u1").reason, EvaluationReason::Override);

        mgr.remove_user_override(&flag.id, "u1").unwrap();
        assert!(mgr.evaluate("checkout-v2", "u1").value);

        mgr.rollback_feature(&flag.id).unwrap();
        assert!(!mgr.evaluate("checkout-v2", "u1").value);
    }

    #[test]
    fn test_bypass_config_reaches_evaluator() {
        let mut config = AppConfig::default();
        config.flags.overrides_bypass_disabled = true;
        let mgr = FeatureFlagManager::new(&config);
        mgr.create_flag(FlagDefinition::new("beta").with_override("tester", true))
            .unwrap();

        let eval = mgr.evaluate("beta", "tester");
        assert!(eval.value);
        assert_eq!(eval.reason, EvaluationReason::Override);
    }
}
