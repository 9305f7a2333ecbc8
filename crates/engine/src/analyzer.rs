//! Results analysis over a point-in-time snapshot of assignments and events.
//!
//! Control is the first declared variant. The significance test compares the
//! control against the variant with the highest conversion rate using a
//! pooled two-proportion z-test, and only runs once the experiment has
//! reached its minimum sample size.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use experiment_core::config::ExperimentConfig;
use experiment_core::error::{EngineError, EngineResult};
use experiment_core::types::{ExperimentResults, PValueMethod, VariantStats};
use uuid::Uuid;

use crate::repository::{ExperimentRepository, ExperimentSnapshot};
use crate::stats;

/// Conversion rate under which every variant is considered suspiciously low.
pub const LOW_CONVERSION_RATE: f64 = 0.01;

/// Statistical power assumed when estimating the sample size still needed.
pub const TARGET_POWER: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalysisSettings {
    pub confidence_level: f64,
    pub p_value_method: PValueMethod,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            confidence_level: 0.95,
            p_value_method: PValueMethod::TwoTailed,
        }
    }
}

impl From<&ExperimentConfig> for AnalysisSettings {
    fn from(config: &ExperimentConfig) -> Self {
        Self {
            confidence_level: config.confidence_level,
            p_value_method: config.p_value_method,
        }
    }
}

pub struct StatisticalAnalyzer {
    repository: Arc<dyn ExperimentRepository>,
    settings: AnalysisSettings,
}

impl StatisticalAnalyzer {
    pub fn new(repository: Arc<dyn ExperimentRepository>, settings: AnalysisSettings) -> Self {
        Self {
            repository,
            settings,
        }
    }

    pub fn analyze_results(&self, experiment_id: &Uuid) -> EngineResult<ExperimentResults> {
        let snapshot = self
            .repository
            .snapshot(experiment_id)
            .ok_or_else(|| EngineError::experiment_not_found(experiment_id))?;
        Ok(analyze(&snapshot, &self.settings))
    }
}

#[derive(Default)]
struct VariantTally {
    sample_size: u64,
    values: Vec<f64>,
    metric_counts: BTreeMap<String, u64>,
}

/// Compute results from a snapshot. Never divides by zero: empty variants get
/// zero-valued statistics.
pub fn analyze(snapshot: &ExperimentSnapshot, settings: &AnalysisSettings) -> ExperimentResults {
    let experiment = &snapshot.experiment;

    let mut tallies: HashMap<Uuid, VariantTally> = HashMap::new();
    for assignment in &snapshot.assignments {
        tallies.entry(assignment.variant_id).or_default().sample_size += 1;
    }
    for event in &snapshot.events {
        let tally = tallies.entry(event.variant_id).or_default();
        tally.values.push(event.value);
        *tally.metric_counts.entry(event.metric.clone()).or_insert(0) += 1;
    }

    let variants: Vec<VariantStats> = experiment
        .variants
        .iter()
        .enumerate()
        .map(|(index, variant)| {
            let tally = tallies.remove(&variant.id).unwrap_or_default();
            let conversions = tally.values.len() as u64;
            let conversion_rate = stats::rate(conversions, tally.sample_size);
            let (average_value, standard_deviation) = stats::mean_and_std_dev(&tally.values);
            VariantStats {
                variant_id: variant.id,
                variant_name: variant.name.clone(),
                is_control: index == 0,
                sample_size: tally.sample_size,
                conversions,
                conversion_rate,
                average_value,
                standard_deviation,
                confidence_interval: stats::wald_interval(
                    conversion_rate,
                    tally.sample_size,
                    stats::Z_95,
                ),
                metric_counts: tally.metric_counts,
            }
        })
        .collect();

    let total_participants: u64 = variants.iter().map(|v| v.sample_size).sum();
    let control = variants.first();
    let control_variant_id = control.map(|c| c.variant_id);

    let mut best_variant_id = None;
    let mut lift = 0.0;
    let mut z_score = 0.0;
    let mut p_value = 1.0;

    if total_participants >= experiment.min_sample_size {
        if let (Some(control), Some(best)) = (control, best_performer(&variants)) {
            best_variant_id = Some(best.variant_id);
            lift = if control.conversion_rate > 0.0 {
                (best.conversion_rate - control.conversion_rate) / control.conversion_rate * 100.0
            } else {
                0.0
            };
            z_score = stats::two_proportion_z(
                control.conversions,
                control.sample_size,
                best.conversions,
                best.sample_size,
            );
            p_value = stats::p_value(z_score, settings.p_value_method);
        }
    }
    let is_significant = p_value < 1.0 - settings.confidence_level;

    let recommendations = recommend(&Assessment {
        variants: &variants,
        p_value_method: settings.p_value_method,
        best_variant_id,
        total_participants,
        min_sample_size: experiment.min_sample_size,
        lift,
        p_value,
        is_significant,
        confidence_level: settings.confidence_level,
    });

    ExperimentResults {
        experiment_id: experiment.id,
        experiment_name: experiment.name.clone(),
        status: experiment.status,
        total_participants,
        min_sample_size: experiment.min_sample_size,
        control_variant_id,
        best_variant_id,
        variants,
        lift,
        z_score,
        p_value,
        p_value_method: settings.p_value_method,
        confidence_level: settings.confidence_level,
        is_significant,
        recommendations,
        analyzed_at: Utc::now(),
    }
}

/// Highest conversion rate; ties go to the earlier declared variant.
fn best_performer(variants: &[VariantStats]) -> Option<&VariantStats> {
    variants.iter().fold(None, |best: Option<&VariantStats>, v| match best {
        Some(b) if b.conversion_rate >= v.conversion_rate => Some(b),
        _ => Some(v),
    })
}

struct Assessment<'a> {
    variants: &'a [VariantStats],
    p_value_method: PValueMethod,
    best_variant_id: Option<Uuid>,
    total_participants: u64,
    min_sample_size: u64,
    lift: f64,
    p_value: f64,
    is_significant: bool,
    confidence_level: f64,
}

/// When control is the best performer, the p-value of its lead over the
/// strongest challenger.
fn control_lead<'a>(a: &Assessment<'a>) -> Option<(&'a VariantStats, f64)> {
    let (control, challengers) = a.variants.split_first()?;
    if a.best_variant_id != Some(control.variant_id) {
        return None;
    }
    let challenger = best_performer(challengers)?;
    let z = stats::two_proportion_z(
        challenger.conversions,
        challenger.sample_size,
        control.conversions,
        control.sample_size,
    );
    Some((control, stats::p_value(z, a.p_value_method)))
}

fn recommend(a: &Assessment<'_>) -> Vec<String> {
    let mut out = Vec::new();
    let control = a.variants.first();
    let best = a
        .best_variant_id
        .and_then(|id| a.variants.iter().find(|v| v.variant_id == id));

    if a.total_participants < a.min_sample_size {
        out.push(format!(
            "Need {} more participants to reach the minimum sample size of {}.",
            a.min_sample_size - a.total_participants,
            a.min_sample_size
        ));
    } else if let Some(best) = best.filter(|b| a.is_significant && !b.is_control) {
        out.push(format!(
            "Roll out variant '{}': {:.1}% lift over control (p = {:.4}).",
            best.variant_name, a.lift, a.p_value
        ));
    } else if let Some((control, p)) =
        control_lead(a).filter(|(_, p)| *p < 1.0 - a.confidence_level)
    {
        out.push(format!(
            "Control '{}' outperforms every variant (p = {:.4}); keep the current experience.",
            control.variant_name, p
        ));
    } else {
        out.push(format!(
            "Results are not yet statistically significant (p = {:.4}); keep the experiment running.",
            a.p_value
        ));
        if let (Some(control), Some(best)) = (control, best) {
            let relative_lift = a.lift / 100.0;
            if !best.is_control && relative_lift > 0.0 {
                if let Some(n) = stats::required_sample_size(
                    control.conversion_rate,
                    relative_lift,
                    a.confidence_level,
                    TARGET_POWER,
                ) {
                    out.push(format!(
                        "About {n} participants per variant are needed to confirm a {:.1}% lift.",
                        a.lift
                    ));
                }
            }
        }
    }

    if a.total_participants > 0 {
        for variant in a.variants.iter().filter(|v| v.sample_size == 0) {
            out.push(format!(
                "Variant '{}' has no participants yet.",
                variant.variant_name
            ));
        }
    }

    if a.total_participants >= a.min_sample_size
        && a.total_participants > 0
        && a.variants
            .iter()
            .all(|v| v.conversion_rate < LOW_CONVERSION_RATE)
    {
        out.push(
            "Conversion rates are low (below 1%); review the metric definition.".to_string(),
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use experiment_core::types::{
        AssignmentMethod, ConversionEvent, Experiment, ExperimentStatus, UserAssignment, Variant,
    };

    fn experiment(weights: &[f64], min_sample_size: u64) -> Experiment {
        let now = Utc::now();
        Experiment {
            id: Uuid::new_v4(),
            name: "analysis".to_string(),
            description: None,
            variants: weights
                .iter()
                .enumerate()
                .map(|(i, w)| Variant {
                    id: Uuid::new_v4(),
                    name: ["A", "B", "C"][i].to_string(),
                    weight: *w,
                    config: serde_json::Value::Null,
                })
                .collect(),
            status: ExperimentStatus::Running,
            target_segments: Vec::new(),
            start_date: Some(now),
            end_date: None,
            metrics: vec!["conversion".to_string()],
            min_sample_size,
            created_at: now,
            updated_at: now,
        }
    }

    /// Snapshot with `counts[i] = (assigned, converted)` for variant i.
    fn snapshot(experiment: Experiment, counts: &[(usize, usize)]) -> ExperimentSnapshot {
        let mut assignments = Vec::new();
        let mut events = Vec::new();
        for (variant, (assigned, converted)) in experiment.variants.iter().zip(counts) {
            for i in 0..*assigned {
                let user_id = format!("{}-{i}", variant.name);
                if i < *converted {
                    events.push(ConversionEvent {
                        id: Uuid::new_v4(),
                        user_id: user_id.clone(),
                        experiment_id: experiment.id,
                        variant_id: variant.id,
                        metric: "conversion".to_string(),
                        value: 1.0,
                        metadata: None,
                        timestamp: Utc::now(),
                    });
                }
                assignments.push(UserAssignment {
                    user_id,
                    experiment_id: experiment.id,
                    variant_id: variant.id,
                    assigned_at: Utc::now(),
                    method: AssignmentMethod::Random,
                });
            }
        }
        ExperimentSnapshot {
            experiment,
            assignments,
            events,
        }
    }

    #[test]
    fn test_rates_and_lift() {
        let exp = experiment(&[50.0, 50.0], 100);
        let b_id = exp.variants[1].id;
        let results = analyze(&snapshot(exp, &[(100, 10), (100, 20)]), &AnalysisSettings::default());

        assert_eq!(results.total_participants, 200);
        assert!((results.variants[0].conversion_rate - 0.10).abs() < 1e-12);
        assert!((results.variants[1].conversion_rate - 0.20).abs() < 1e-12);
        assert!((results.lift - 100.0).abs() < 1e-9);
        assert_eq!(results.best_variant_id, Some(b_id));
        assert!(results.variants[0].is_control);
        assert!((results.z_score - 1.9803).abs() < 1e-3);
        assert!((results.p_value - 0.0477).abs() < 1e-3);
        assert!(results.is_significant);
        assert!(results.recommendations[0].starts_with("Roll out variant 'B'"));
    }

    #[test]
    fn test_density_approximation_is_preserved() {
        let exp = experiment(&[50.0, 50.0], 100);
        let settings = AnalysisSettings {
            confidence_level: 0.95,
            p_value_method: PValueMethod::DensityApproximation,
        };
        let results = analyze(&snapshot(exp, &[(100, 10), (100, 20)]), &settings);

        // Density at z = 1.98 is ~0.056, so the same data is not significant.
        assert!((results.p_value - 0.0562).abs() < 1e-3);
        assert!(!results.is_significant);
        assert_eq!(results.p_value_method, PValueMethod::DensityApproximation);
    }

    #[test]
    fn test_zero_participants_are_well_defined() {
        let exp = experiment(&[50.0, 50.0], 0);
        let results = analyze(&snapshot(exp, &[(0, 0), (0, 0)]), &AnalysisSettings::default());

        for v in &results.variants {
            assert_eq!(v.conversion_rate, 0.0);
            assert_eq!(v.average_value, 0.0);
            assert_eq!(v.standard_deviation, 0.0);
            assert_eq!(v.confidence_interval.lower, 0.0);
            assert_eq!(v.confidence_interval.upper, 0.0);
        }
        assert_eq!(results.lift, 0.0);
        assert!(results.p_value.is_finite());
        assert!(!results.is_significant);
    }

    #[test]
    fn test_below_min_sample_size() {
        let exp = experiment(&[50.0, 50.0], 1_000);
        let results = analyze(&snapshot(exp, &[(100, 10), (100, 40)]), &AnalysisSettings::default());

        assert_eq!(results.p_value, 1.0);
        assert!(!results.is_significant);
        assert_eq!(results.best_variant_id, None);
        assert_eq!(
            results.recommendations[0],
            "Need 800 more participants to reach the minimum sample size of 1000."
        );
    }

    #[test]
    fn test_zero_control_rate_gives_zero_lift() {
        let exp = experiment(&[50.0, 50.0], 10);
        let results = analyze(&snapshot(exp, &[(50, 0), (50, 5)]), &AnalysisSettings::default());
        assert_eq!(results.lift, 0.0);
        assert!(results.z_score > 0.0);
    }

    #[test]
    fn test_control_lead_over_every_variant() {
        let exp = experiment(&[40.0, 30.0, 30.0], 10);
        let control_id = exp.variants[0].id;
        let results = analyze(
            &snapshot(exp.clone(), &[(100, 30), (100, 10), (100, 12)]),
            &AnalysisSettings::default(),
        );

        // The headline test compares control with itself.
        assert_eq!(results.best_variant_id, Some(control_id));
        assert!(!results.is_significant);
        assert!(
            results.recommendations[0].starts_with("Control 'A' outperforms every variant"),
            "{:?}",
            results.recommendations
        );

        // A narrow lead is not enough.
        let results = analyze(
            &snapshot(exp, &[(100, 15), (100, 10), (100, 12)]),
            &AnalysisSettings::default(),
        );
        assert!(results.recommendations[0].starts_with("Results are not yet"));
    }

    #[test]
    fn test_control_wins() {
        let exp = experiment(&[50.0, 50.0], 100);
        let control_id = exp.variants[0].id;
        let results = analyze(&snapshot(exp, &[(500, 100), (500, 100)]), &AnalysisSettings::default());

        assert_eq!(results.best_variant_id, Some(control_id));
        assert_eq!(results.lift, 0.0);
        assert!(!results.is_significant);
        assert!(results.recommendations[0].starts_with("Results are not yet"));
        assert_eq!(results.p_value, 1.0);
    }

    #[test]
    fn test_value_statistics_and_metric_counts() {
        let exp = experiment(&[50.0, 50.0], 1);
        let variant_id = exp.variants[0].id;
        let mut snap = snapshot(exp, &[(2, 0), (2, 0)]);
        for (metric, value) in [("revenue", 10.0), ("revenue", 30.0), ("signup", 1.0)] {
            snap.events.push(ConversionEvent {
                id: Uuid::new_v4(),
                user_id: "A-0".to_string(),
                experiment_id: snap.experiment.id,
                variant_id,
                metric: metric.to_string(),
                value,
                metadata: None,
                timestamp: Utc::now(),
            });
        }
        let results = analyze(&snap, &AnalysisSettings::default());
        let a = &results.variants[0];

        assert_eq!(a.conversions, 3);
        assert!((a.average_value - 41.0 / 3.0).abs() < 1e-9);
        assert!(a.standard_deviation > 0.0);
        assert_eq!(a.metric_counts.get("revenue"), Some(&2));
        assert_eq!(a.metric_counts.get("signup"), Some(&1));
        // More events than users still yields finite, clipped statistics.
        assert!(a.confidence_interval.upper <= 1.0);
        assert!(results.p_value.is_finite());
    }

    #[test]
    fn test_recommendations_flag_empty_variants_and_low_rates() {
        let exp = experiment(&[40.0, 30.0, 30.0], 100);
        let results = analyze(
            &snapshot(exp, &[(300, 1), (300, 2), (0, 0)]),
            &AnalysisSettings::default(),
        );

        assert!(results
            .recommendations
            .contains(&"Variant 'C' has no participants yet.".to_string()));
        assert!(results
            .recommendations
            .iter()
            .any(|r| r.starts_with("Conversion rates are low")));
    }

    #[test]
    fn test_recommendations_are_deterministic() {
        let exp = experiment(&[50.0, 50.0], 100);
        let snap = snapshot(exp, &[(200, 20), (200, 24)]);
        let first = analyze(&snap, &AnalysisSettings::default());
        let second = analyze(&snap, &AnalysisSettings::default());
        assert_eq!(first.recommendations, second.recommendations);
        assert!(first
            .recommendations
            .iter()
            .any(|r| r.contains("participants per variant")));
    }
}
