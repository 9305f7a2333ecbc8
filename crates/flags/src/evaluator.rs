//! Flag evaluation with a fixed precedence:
//!
//! 1. unknown key → `false` (default)
//! 2. disabled → the flag's default value (disabled)
//! 3. user override → the override (override)
//! 4. target segments → segment lookup, logged but not gating
//! 5. percentage rollout → `bucket < rollout_percentage` (percentage)
//! 6. enabled → `true` (default)
//!
//! A disabled flag short-circuits before overrides are consulted unless
//! `overrides_bypass_disabled` is set.

use std::sync::Arc;

use experiment_core::bucketing::Bucketer;
use experiment_core::types::{EvaluationReason, FeatureFlag, FlagEvaluation, FlagStatus};
use tracing::debug;

use crate::segments::SegmentResolver;
use crate::store::FlagRepository;

pub struct FlagEvaluator {
    repository: Arc<dyn FlagRepository>,
    bucketer: Bucketer,
    segments: Arc<dyn SegmentResolver>,
    overrides_bypass_disabled: bool,
}

impl FlagEvaluator {
    pub fn new(
        repository: Arc<dyn FlagRepository>,
        bucketer: Bucketer,
        segments: Arc<dyn SegmentResolver>,
        overrides_bypass_disabled: bool,
    ) -> Self {
        Self {
            repository,
            bucketer,
            segments,
            overrides_bypass_disabled,
        }
    }

    pub fn evaluate(&self, key: &str, user_id: &str) -> FlagEvaluation {
        match self.repository.get_by_key(key) {
            Some(flag) => self.evaluate_flag(&flag, user_id),
            None => FlagEvaluation::new(key, false, EvaluationReason::Default),
        }
    }

    /// Evaluate an already-loaded flag.
    pub fn evaluate_flag(&self, flag: &FeatureFlag, user_id: &str) -> FlagEvaluation {
        let disabled = flag.status == FlagStatus::Disabled;
        if disabled && !self.overrides_bypass_disabled {
            return FlagEvaluation::new(&flag.key, flag.default_value, EvaluationReason::Disabled);
        }

        if let Some(value) = flag.overrides.get(user_id) {
            return FlagEvaluation::new(&flag.key, *value, EvaluationReason::Override);
        }

        if !flag.target_segments.is_empty() {
            let member = self.segments.is_member(user_id, &flag.target_segments);
            debug!(
                flag_key = %flag.key,
                user_id = %user_id,
                member,
                "Segment check"
            );
        }

        match flag.status {
            FlagStatus::Disabled => {
                FlagEvaluation::new(&flag.key, flag.default_value, EvaluationReason::Disabled)
            }
            FlagStatus::PercentageRollout => {
                let bucket = self.bucketer.bucket(user_id, &flag.key);
                let enabled = f64::from(bucket) < flag.rollout_percentage;
                FlagEvaluation::new(&flag.key, enabled, EvaluationReason::Percentage)
            }
            FlagStatus::Enabled => FlagEvaluation::new(&flag.key, true, EvaluationReason::Default),
        }
    }
}
