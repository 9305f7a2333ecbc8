//! Normal-approximation statistics used by the analyzer.

use experiment_core::types::{ConfidenceInterval, PValueMethod};

/// z critical value for the 95% Wald interval reported per variant.
pub const Z_95: f64 = 1.96;

pub fn normal_pdf(z: f64) -> f64 {
    (-z * z / 2.0).exp() / std::f64::consts::TAU.sqrt()
}

/// Standard normal CDF (Abramowitz & Stegun 26.2.17, |error| < 7.5e-8).
pub fn normal_cdf(z: f64) -> f64 {
    let x = z.abs();
    let t = 1.0 / (1.0 + 0.231_641_9 * x);
    let poly = t
        * (0.319_381_530
            + t * (-0.356_563_782 + t * (1.781_477_937 + t * (-1.821_255_978 + t * 1.330_274_429))));
    let tail = normal_pdf(x) * poly;
    if z >= 0.0 {
        1.0 - tail
    } else {
        tail
    }
}

/// Inverse standard normal CDF (Acklam's rational approximation).
pub fn normal_quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_690e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const P_LOW: f64 = 0.024_25;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    }
}

/// Two-tailed p-value of a z-score, clamped to [0, 1].
pub fn two_tailed_p_value(z: f64) -> f64 {
    // The CDF approximation is off by ~1e-9 at the origin.
    if z == 0.0 {
        return 1.0;
    }
    (2.0 * (1.0 - normal_cdf(z.abs()))).clamp(0.0, 1.0)
}

pub fn p_value(z: f64, method: PValueMethod) -> f64 {
    match method {
        PValueMethod::TwoTailed => two_tailed_p_value(z),
        PValueMethod::DensityApproximation => normal_pdf(z),
    }
}

/// `successes / trials`, or 0 when there are no trials.
pub fn rate(successes: u64, trials: u64) -> f64 {
    if trials == 0 {
        0.0
    } else {
        successes as f64 / trials as f64
    }
}

/// Wald interval `rate ± z·sqrt(rate(1−rate)/n)`, clipped to [0, 1].
pub fn wald_interval(rate: f64, sample_size: u64, z: f64) -> ConfidenceInterval {
    if sample_size == 0 {
        return ConfidenceInterval::default();
    }
    // Rates above 1 (several events per user) would make the variance negative.
    let variance = (rate * (1.0 - rate)).max(0.0);
    let margin = z * (variance / sample_size as f64).sqrt();
    ConfidenceInterval {
        lower: (rate - margin).clamp(0.0, 1.0),
        upper: (rate + margin).clamp(0.0, 1.0),
    }
}

/// Mean and population standard deviation; (0, 0) for an empty slice.
pub fn mean_and_std_dev(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Pooled two-proportion z-score of `b` against `a`. Zero when either side is
/// empty or the pooled variance degenerates.
pub fn two_proportion_z(a_successes: u64, a_trials: u64, b_successes: u64, b_trials: u64) -> f64 {
    if a_trials == 0 || b_trials == 0 {
        return 0.0;
    }
    let pooled = (a_successes + b_successes) as f64 / (a_trials + b_trials) as f64;
    let variance = (pooled * (1.0 - pooled)).max(0.0);
    let se = (variance * (1.0 / a_trials as f64 + 1.0 / b_trials as f64)).sqrt();
    if !se.is_finite() || se <= 0.0 {
        return 0.0;
    }
    let z = (rate(b_successes, b_trials) - rate(a_successes, a_trials)) / se;
    if z.is_finite() {
        z
    } else {
        0.0
    }
}

/// Per-variant sample size needed to detect a relative lift of
/// `minimum_detectable_lift` over `baseline_rate` with a two-sided test.
pub fn required_sample_size(
    baseline_rate: f64,
    minimum_detectable_lift: f64,
    confidence_level: f64,
    power: f64,
) -> Option<u64> {
    if !(baseline_rate > 0.0 && baseline_rate < 1.0) || minimum_detectable_lift <= 0.0 {
        return None;
    }
    if !(confidence_level > 0.0 && confidence_level < 1.0) || !(power > 0.0 && power < 1.0) {
        return None;
    }
    let p1 = baseline_rate;
    let p2 = baseline_rate * (1.0 + minimum_detectable_lift);
    if p2 >= 1.0 {
        return None;
    }
    let z_alpha = normal_quantile(1.0 - (1.0 - confidence_level) / 2.0);
    let z_beta = normal_quantile(power);
    let p_bar = (p1 + p2) / 2.0;
    let numerator = z_alpha * (2.0 * p_bar * (1.0 - p_bar)).sqrt()
        + z_beta * (p1 * (1.0 - p1) + p2 * (1.0 - p2)).sqrt();
    Some((numerator.powi(2) / (p2 - p1).powi(2)).ceil() as u64)
}
