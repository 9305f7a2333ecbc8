//! Feature flags: storage, per-user evaluation, gradual rollout and
//! overrides.

pub mod evaluator;
pub mod rollout;
pub mod segments;
pub mod service;
pub mod store;

pub use evaluator::FlagEvaluator;
pub use rollout::RolloutController;
pub use segments::{AllUsersMatch, SegmentResolver};
pub use service::FeatureFlagManager;
pub use store::{FlagRepository, InMemoryFlagRepository};
