use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use uuid::Uuid;

// ─── Experiments ────────────────────────────────────────────────────────

/// Lifecycle status of an experiment.
///
/// Any status may be set from any other; the engine only checks that the
/// experiment exists. Assignment requires `Running`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    Draft,
    Running,
    Paused,
    Completed,
    Archived,
}

impl ExperimentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Archived => "archived",
        }
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One arm of an experiment. Weights of all variants partition [0, 100) in
/// declaration order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Variant {
    pub id: Uuid,
    pub name: String,
    pub weight: f64,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// A/B/n experiment definition as stored by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Experiment {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub variants: Vec<Variant>,
    pub status: ExperimentStatus,
    pub target_segments: Vec<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub metrics: Vec<String>,
    pub min_sample_size: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Experiment {
    /// The control arm is the first declared variant.
    pub fn control(&self) -> Option<&Variant> {
        self.variants.first()
    }

    pub fn variant(&self, variant_id: &Uuid) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id == *variant_id)
    }

    pub fn is_running(&self) -> bool {
        self.status == ExperimentStatus::Running
    }
}

/// Caller-supplied experiment definition passed to `create_experiment`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub variants: Vec<VariantDefinition>,
    #[serde(default)]
    pub target_segments: Vec<String>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metrics: Vec<String>,
    #[serde(default)]
    pub min_sample_size: Option<u64>,
    #[serde(default)]
    pub auto_start: bool,
}

impl ExperimentDefinition {
    pub fn new(name: impl Into<String>, variants: Vec<VariantDefinition>) -> Self {
        Self {
            name: name.into(),
            description: None,
            variants,
            target_segments: Vec::new(),
            start_date: None,
            end_date: None,
            metrics: Vec::new(),
            min_sample_size: None,
            auto_start: false,
        }
    }

    pub fn auto_start(mut self) -> Self {
        self.auto_start = true;
        self
    }

    pub fn with_min_sample_size(mut self, min_sample_size: u64) -> Self {
        self.min_sample_size = Some(min_sample_size);
        self
    }

    pub fn with_metrics(mut self, metrics: Vec<String>) -> Self {
        self.metrics = metrics;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantDefinition {
    pub name: String,
    pub weight: f64,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl VariantDefinition {
    pub fn new(name: impl Into<String>, weight: f64) -> Self {
        Self {
            name: name.into(),
            weight,
            config: serde_json::Value::Null,
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }
}

// ─── Assignments & conversions ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentMethod {
    /// Placed by the hash bucket of (seed, user, experiment).
    Random,
}

/// Durable binding of a user to a variant within one experiment. Never
/// reassigned or deleted once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserAssignment {
    pub user_id: String,
    pub experiment_id: Uuid,
    pub variant_id: Uuid,
    pub assigned_at: DateTime<Utc>,
    pub method: AssignmentMethod,
}

/// Append-only metric event attributed to the variant of an existing
/// assignment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversionEvent {
    pub id: Uuid,
    pub user_id: String,
    pub experiment_id: Uuid,
    pub variant_id: Uuid,
    pub metric: String,
    pub value: f64,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

// ─── Results ────────────────────────────────────────────────────────────

/// How the z-score of the significance test is turned into a p-value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PValueMethod {
    /// `2 * (1 - Φ(|z|))`.
    #[default]
    TwoTailed,
    /// Standard-normal density at `z`. Kept for dashboards built on the
    /// legacy numbers; it is not a probability.
    DensityApproximation,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariantStats {
    pub variant_id: Uuid,
    pub variant_name: String,
    pub is_control: bool,
    pub sample_size: u64,
    pub conversions: u64,
    pub conversion_rate: f64,
    pub average_value: f64,
    pub standard_deviation: f64,
    pub confidence_interval: ConfidenceInterval,
    /// Event counts keyed by metric name.
    pub metric_counts: BTreeMap<String, u64>,
}

/// Derived on demand from assignments and events; never stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentResults {
    pub experiment_id: Uuid,
    pub experiment_name: String,
    pub status: ExperimentStatus,
    pub total_participants: u64,
    pub min_sample_size: u64,
    pub control_variant_id: Option<Uuid>,
    pub best_variant_id: Option<Uuid>,
    pub variants: Vec<VariantStats>,
    /// Relative improvement of the best variant over control, in percent.
    pub lift: f64,
    pub z_score: f64,
    pub p_value: f64,
    pub p_value_method: PValueMethod,
    pub confidence_level: f64,
    pub is_significant: bool,
    pub recommendations: Vec<String>,
    pub analyzed_at: DateTime<Utc>,
}

impl ExperimentResults {
    pub fn variant(&self, variant_id: &Uuid) -> Option<&VariantStats> {
        self.variants.iter().find(|v| v.variant_id == *variant_id)
    }
}

// ─── Feature flags ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FlagStatus {
    Disabled,
    Enabled,
    PercentageRollout,
}

impl FlagStatus {
    /// Status implied by a rollout percentage: 0 disables, 100 enables, anything
    /// in between is a percentage rollout.
    pub fn for_percentage(percentage: f64) -> Self {
        if percentage <= 0.0 {
            Self::Disabled
        } else if percentage >= 100.0 {
            Self::Enabled
        } else {
            Self::PercentageRollout
        }
    }
}

impl fmt::Display for FlagStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disabled => "disabled",
            Self::Enabled => "enabled",
            Self::PercentageRollout => "percentage_rollout",
        })
    }
}

/// A boolean feature flag with percentage rollout and per-user overrides.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureFlag {
    pub id: Uuid,
    pub key: String,
    pub name: String,
    pub description: Option<String>,
    pub status: FlagStatus,
    pub rollout_percentage: f64,
    pub default_value: bool,
    pub overrides: HashMap<String, bool>,
    pub target_segments: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller-supplied flag definition passed to `create_flag`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagDefinition {
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Derived from `rollout_percentage` when absent.
    #[serde(default)]
    pub status: Option<FlagStatus>,
    #[serde(default)]
    pub rollout_percentage: f64,
    #[serde(default)]
    pub default_value: bool,
    #[serde(default)]
    pub overrides: HashMap<String, bool>,
    #[serde(default)]
    pub target_segments: Vec<String>,
}

impl FlagDefinition {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: None,
            description: None,
            status: None,
            rollout_percentage: 0.0,
            default_value: false,
            overrides: HashMap::new(),
            target_segments: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: FlagStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_rollout_percentage(mut self, percentage: f64) -> Self {
        self.rollout_percentage = percentage;
        self
    }

    pub fn with_default_value(mut self, value: bool) -> Self {
        self.default_value = value;
        self
    }

    pub fn with_override(mut self, user_id: impl Into<String>, value: bool) -> Self {
        self.overrides.insert(user_id.into(), value);
        self
    }

    pub fn with_target_segments(mut self, segments: Vec<String>) -> Self {
        self.target_segments = segments;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationReason {
    Default,
    Disabled,
    Override,
    /// Reserved for segment resolvers that gate evaluation.
    Segment,
    Percentage,
}

/// Ephemeral result of evaluating a flag for one user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlagEvaluation {
    pub flag_key: String,
    pub value: bool,
    pub reason: EvaluationReason,
}

impl FlagEvaluation {
    pub fn new(flag_key: impl Into<String>, value: bool, reason: EvaluationReason) -> Self {
        Self {
            flag_key: flag_key.into(),
            value,
            reason,
        }
    }
}
