// ─────────────────────────────────────────────────────────────────────
// Swarm-It — Derived Metric Calculator
// ─────────────────────────────────────────────────────────────────────
//! Purity, reliability, plasticity, turbulence, consensus and the
//! modal-health triple, derived from a simplex point plus auxiliary
//! signals carried by the [`FeatureSummary`].
//!
//! The arithmetic lives in small pure functions. Anything that needs an
//! outside signal goes through a pluggable estimator, so a deployment
//! without an out-of-distribution detector wires in an explicit
//! [`ConstantEstimator`] instead of a magic number.

use std::f64::consts::PI;

use rsct_types::{DerivedMetrics, GateConfig, MetricValue, Simplex};

use crate::extractor::FeatureSummary;

/// `omega` when no out-of-distribution estimator is wired.
pub const DEFAULT_OMEGA: f64 = 0.5;
/// `sigma` when no trajectory signal is available.
pub const DEFAULT_SIGMA: f64 = 0.5;
/// `consensus` for single-evaluator callers (trivially coherent).
pub const DEFAULT_CONSENSUS: f64 = 1.0;
/// Any kappa channel that was not exercised.
pub const DEFAULT_KAPPA: f64 = 0.5;

// ─── Pure functions ─────────────────────────────────────────────────

/// Purity `r / (r + n)`, 0 when `r + n == 0`.
pub fn purity(r: f64, n: f64) -> f64 {
    let denom = r + n;
    if !(denom.is_finite() && denom > 0.0) || !r.is_finite() {
        return 0.0;
    }
    (r / denom).clamp(0.0, 1.0)
}

/// `omega * alpha + (1 - omega) * alpha_base`.
///
/// A convex combination, so the result lies between `alpha` and
/// `alpha_base` for any `omega` in [0, 1].
pub fn reliability_weighted_purity(alpha: f64, omega: f64, alpha_base: f64) -> f64 {
    let omega = omega.clamp(0.0, 1.0);
    omega * alpha + (1.0 - omega) * alpha_base
}

/// Plasticity `1 / max(alpha_omega, epsilon)`. At least 1 for inputs in [0, 1].
pub fn plasticity(alpha_omega: f64, epsilon: f64) -> f64 {
    let floor = if alpha_omega.is_nan() {
        epsilon
    } else {
        alpha_omega.max(epsilon)
    };
    1.0 / floor
}

/// `min(kappa_h, kappa_l, kappa_interface)`. NaN counts as 0.
pub fn weakest_link(kappa_h: f64, kappa_l: f64, kappa_interface: f64) -> f64 {
    [kappa_h, kappa_l, kappa_interface]
        .into_iter()
        .map(|k| if k.is_nan() { 0.0 } else { k })
        .fold(1.0_f64, f64::min)
        .clamp(0.0, 1.0)
}

/// Mean resultant length of evaluator scores mapped to phases `pi * score`.
///
/// 1.0 when all evaluators agree, 0.0 for a perfect split between the
/// extremes. `None` without at least one finite score.
pub fn phasor_coherence(scores: &[f64]) -> Option<f64> {
    let phases: Vec<f64> = scores
        .iter()
        .filter(|s| s.is_finite())
        .map(|s| PI * s.clamp(0.0, 1.0))
        .collect();
    if phases.is_empty() {
        return None;
    }
    let k = phases.len() as f64;
    let (re, im) = phases
        .iter()
        .fold((0.0, 0.0), |(re, im), theta| (re + theta.cos(), im + theta.sin()));
    Some(((re / k).powi(2) + (im / k).powi(2)).sqrt().clamp(0.0, 1.0))
}

/// Variances below this are rounding noise from the mean, not turbulence.
const VARIANCE_FLOOR: f64 = 1e-12;

/// Population variance of a [0, 1] signal scaled by 4, its maximum.
///
/// `None` with fewer than two finite samples. A constant signal is
/// exactly 0.
pub fn normalized_variance(samples: &[f64]) -> Option<f64> {
    let xs: Vec<f64> = samples
        .iter()
        .filter(|x| x.is_finite())
        .map(|x| x.clamp(0.0, 1.0))
        .collect();
    if xs.len() < 2 {
        return None;
    }
    let k = xs.len() as f64;
    let mean = xs.iter().sum::<f64>() / k;
    let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / k;
    if var < VARIANCE_FLOOR {
        return Some(0.0);
    }
    Some((4.0 * var).clamp(0.0, 1.0))
}

// ─── Estimators ─────────────────────────────────────────────────────

/// Strategy for one scalar metric (omega, sigma or consensus).
pub trait SignalEstimator: Send + Sync {
    fn name(&self) -> &str;

    fn estimate(&self, features: &FeatureSummary) -> MetricValue;
}

/// Channel compatibility scores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KappaTriple {
    pub h: MetricValue,
    pub l: MetricValue,
    pub interface: MetricValue,
}

/// Strategy for the modal-health triple.
pub trait KappaEstimator: Send + Sync {
    fn name(&self) -> &str;

    fn estimate(&self, features: &FeatureSummary) -> KappaTriple;
}

/// Always reports the same value, flagged as defaulted.
#[derive(Debug, Clone, Copy)]
pub struct ConstantEstimator {
    pub value: f64,
}

impl ConstantEstimator {
    pub fn new(value: f64) -> Self {
        Self { value }
    }
}

impl SignalEstimator for ConstantEstimator {
    fn name(&self) -> &str {
        "constant"
    }

    fn estimate(&self, _features: &FeatureSummary) -> MetricValue {
        MetricValue::defaulted(self.value)
    }
}

/// `omega = exp(-d / scale)` from the summary's distributional distance.
#[derive(Debug, Clone, Copy)]
pub struct DistanceOmegaEstimator {
    pub scale: f64,
}

impl Default for DistanceOmegaEstimator {
    fn default() -> Self {
        Self { scale: 1.0 }
    }
}

impl SignalEstimator for DistanceOmegaEstimator {
    fn name(&self) -> &str {
        "distance_omega"
    }

    fn estimate(&self, features: &FeatureSummary) -> MetricValue {
        features
            .ood_distance
            .filter(|d| d.is_finite() && *d >= 0.0 && self.scale > 0.0)
            .and_then(|d| MetricValue::computed((-d / self.scale).exp()))
            .unwrap_or_else(|| MetricValue::defaulted(DEFAULT_OMEGA))
    }
}

/// Turbulence from the variance of the trajectory signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct VarianceSigmaEstimator;

impl SignalEstimator for VarianceSigmaEstimator {
    fn name(&self) -> &str {
        "variance_sigma"
    }

    fn estimate(&self, features: &FeatureSummary) -> MetricValue {
        normalized_variance(&features.trajectory)
            .and_then(MetricValue::computed)
            .unwrap_or_else(|| MetricValue::defaulted(DEFAULT_SIGMA))
    }
}

/// Agreement across independent evaluator scores.
///
/// Fewer than two evaluators is trivial consensus (1.0, defaulted),
/// so single-evaluator callers never trip Gate 2.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhasorConsensusEstimator;

impl SignalEstimator for PhasorConsensusEstimator {
    fn name(&self) -> &str {
        "phasor_consensus"
    }

    fn estimate(&self, features: &FeatureSummary) -> MetricValue {
        let finite = features
            .evaluator_scores
            .iter()
            .filter(|s| s.is_finite())
            .count();
        if finite < 2 {
            return MetricValue::defaulted(DEFAULT_CONSENSUS);
        }
        phasor_coherence(&features.evaluator_scores)
            .and_then(MetricValue::computed)
            .unwrap_or_else(|| MetricValue::defaulted(DEFAULT_CONSENSUS))
    }
}

/// Per-channel health, with the interface derived from the other two
/// when the summary does not report it.
#[derive(Debug, Clone, Copy)]
pub struct ChannelKappaEstimator {
    pub default: f64,
}

impl Default for ChannelKappaEstimator {
    fn default() -> Self {
        Self {
            default: DEFAULT_KAPPA,
        }
    }
}

impl KappaEstimator for ChannelKappaEstimator {
    fn name(&self) -> &str {
        "channel_kappa"
    }

    fn estimate(&self, features: &FeatureSummary) -> KappaTriple {
        let channels = &features.channels;
        let h = channels.symbolic.and_then(MetricValue::computed);
        let l = channels.signal.and_then(MetricValue::computed);
        let interface = channels
            .interface
            .and_then(MetricValue::computed)
            .or_else(|| match (h, l) {
                (Some(h), Some(l)) => MetricValue::computed(1.0 - (h.value - l.value).abs()),
                _ => None,
            });
        let fallback = || MetricValue::defaulted(self.default);
        KappaTriple {
            h: h.unwrap_or_else(fallback),
            l: l.unwrap_or_else(fallback),
            interface: interface.unwrap_or_else(fallback),
        }
    }
}

// ─── Calculator ─────────────────────────────────────────────────────

/// Composes the pure functions with the wired estimators.
///
/// Holds no mutable state: equal inputs give bit-identical outputs.
pub struct DerivedMetricCalculator {
    alpha_base: f64,
    epsilon: f64,
    omega: Box<dyn SignalEstimator>,
    sigma: Box<dyn SignalEstimator>,
    consensus: Box<dyn SignalEstimator>,
    kappa: Box<dyn KappaEstimator>,
}

impl DerivedMetricCalculator {
    /// Default wiring: constant omega, variance sigma, phasor consensus,
    /// channel kappa.
    pub fn new(config: &GateConfig) -> Self {
        Self {
            alpha_base: config.alpha_base,
            epsilon: config.epsilon,
            omega: Box::new(ConstantEstimator::new(DEFAULT_OMEGA)),
            sigma: Box::new(VarianceSigmaEstimator),
            consensus: Box::new(PhasorConsensusEstimator),
            kappa: Box::new(ChannelKappaEstimator::default()),
        }
    }

    pub fn with_omega(mut self, estimator: impl SignalEstimator + 'static) -> Self {
        self.omega = Box::new(estimator);
        self
    }

    pub fn with_sigma(mut self, estimator: impl SignalEstimator + 'static) -> Self {
        self.sigma = Box::new(estimator);
        self
    }

    pub fn with_consensus(mut self, estimator: impl SignalEstimator + 'static) -> Self {
        self.consensus = Box::new(estimator);
        self
    }

    pub fn with_kappa(mut self, estimator: impl KappaEstimator + 'static) -> Self {
        self.kappa = Box::new(estimator);
        self
    }

    /// Names of the wired estimators: omega, sigma, consensus, kappa.
    pub fn estimator_names(&self) -> [&str; 4] {
        [
            self.omega.name(),
            self.sigma.name(),
            self.consensus.name(),
            self.kappa.name(),
        ]
    }

    pub fn compute(&self, simplex: &Simplex, features: &FeatureSummary) -> DerivedMetrics {
        let omega = checked(self.omega.name(), self.omega.estimate(features), DEFAULT_OMEGA);
        let sigma = checked(self.sigma.name(), self.sigma.estimate(features), DEFAULT_SIGMA);
        let consensus = checked(
            self.consensus.name(),
            self.consensus.estimate(features),
            DEFAULT_CONSENSUS,
        );
        let kappa = self.kappa.estimate(features);
        let kappa_h = checked(self.kappa.name(), kappa.h, DEFAULT_KAPPA);
        let kappa_l = checked(self.kappa.name(), kappa.l, DEFAULT_KAPPA);
        let kappa_interface = checked(self.kappa.name(), kappa.interface, DEFAULT_KAPPA);

        let alpha = purity(simplex.r(), simplex.n());
        let alpha_omega = reliability_weighted_purity(alpha, omega.value, self.alpha_base);

        DerivedMetrics {
            alpha,
            omega,
            alpha_omega,
            tau: plasticity(alpha_omega, self.epsilon),
            kappa_h,
            kappa_l,
            kappa_interface,
            kappa_gate: weakest_link(kappa_h.value, kappa_l.value, kappa_interface.value),
            sigma,
            consensus,
        }
    }

    /// Metrics for a pre-screen short-circuit: the estimators never run
    /// and every estimated field is flagged skipped at its worst-case value.
    pub fn skipped(&self) -> DerivedMetrics {
        let omega = MetricValue::skipped(DEFAULT_OMEGA);
        let zero = MetricValue::skipped(0.0);
        let alpha = 0.0;
        let alpha_omega = reliability_weighted_purity(alpha, omega.value, self.alpha_base);
        DerivedMetrics {
            alpha,
            omega,
            alpha_omega,
            tau: plasticity(alpha_omega, self.epsilon),
            kappa_h: zero,
            kappa_l: zero,
            kappa_interface: zero,
            kappa_gate: 0.0,
            sigma: MetricValue::skipped(1.0),
            consensus: zero,
        }
    }
}

fn checked(estimator: &str, value: MetricValue, default: f64) -> MetricValue {
    if value.value.is_finite() && (0.0..=1.0).contains(&value.value) {
        return value;
    }
    log::warn!(
        "estimator '{estimator}' returned out-of-range value {}, defaulting to {default}",
        value.value
    );
    MetricValue::defaulted(default)
}
