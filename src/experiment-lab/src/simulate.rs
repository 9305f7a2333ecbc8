//! Offline experiment simulation: synthetic users converting at fixed
//! per-variant rates, fed through the real assignment and analysis path.

use anyhow::{ensure, Context};
use experiment_core::config::AppConfig;
use experiment_core::types::{ExperimentDefinition, ExperimentResults};
use experiment_engine::lifecycle::DEFAULT_METRIC;
use experiment_engine::ExperimentService;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

pub struct Simulation {
    pub users: u64,
    /// Conversion probability per variant, in declaration order.
    pub rates: Vec<f64>,
    pub rng_seed: u64,
}

pub fn run(
    config: &AppConfig,
    mut definition: ExperimentDefinition,
    simulation: &Simulation,
) -> anyhow::Result<ExperimentResults> {
    ensure!(
        simulation.rates.len() == definition.variants.len(),
        "expected {} conversion rates, got {}",
        definition.variants.len(),
        simulation.rates.len()
    );
    for rate in &simulation.rates {
        ensure!(
            (0.0..=1.0).contains(rate),
            "conversion rate must be in [0, 1], got {rate}"
        );
    }

    definition.auto_start = true;
    let service = ExperimentService::new(config);
    let experiment = service.create_experiment(definition)?;
    let metric = experiment
        .metrics
        .first()
        .map(String::as_str)
        .unwrap_or(DEFAULT_METRIC);
    let mut rng = StdRng::seed_from_u64(simulation.rng_seed);

    for i in 0..simulation.users {
        let user = format!("user-{i}");
        let variant_id = service.assign_user_to_variant(&user, &experiment.id)?;
        let index = experiment
            .variants
            .iter()
            .position(|v| v.id == variant_id)
            .context("assigned variant is not part of the experiment")?;
        if rng.gen_bool(simulation.rates[index]) {
            service.track_conversion(&user, &experiment.id, metric, None, None)?;
        }
    }

    info!(
        experiment_id = %experiment.id,
        users = simulation.users,
        conversions = service.events(&experiment.id).len(),
        "Simulation finished"
    );
    Ok(service.analyze_results(&experiment.id)?)
}
