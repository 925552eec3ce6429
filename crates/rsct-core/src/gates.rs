// ─────────────────────────────────────────────────────────────────────
// Swarm-It — Gate Pipeline (Admission State Machine)
// ─────────────────────────────────────────────────────────────────────
//! Ordered four-gate admission check.
//!
//! ```text
//! Gate 1  Integrity      n >= n_threshold                → REJECT
//! Gate 2  Consensus      consensus < c_min               → BLOCK
//! Gate 3  Admissibility  kappa_gate vs kappa_req(sigma)  → RE_ENCODE
//! Gate 4  Grounding      kappa_l < kappa_l_min           → REPAIR
//!         otherwise                                      → EXECUTE
//! ```
//!
//! The order is fixed: an earlier failure always wins over a later one.
//! NaN never passes a gate; each check is phrased so that NaN takes the
//! failing branch.

use rsct_types::{Decision, DerivedMetrics, Gate, GateConfig, GateOutcome, GateThresholds, Simplex};

/// The fields the gates read, lifted out of a simplex and metrics pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateInput {
    pub n: f64,
    pub consensus: f64,
    pub kappa_gate: f64,
    pub kappa_l: f64,
    pub sigma: f64,
}

impl GateInput {
    pub fn from_metrics(simplex: &Simplex, metrics: &DerivedMetrics) -> Self {
        Self {
            n: simplex.n(),
            consensus: metrics.consensus.value,
            kappa_gate: metrics.kappa_gate,
            kappa_l: metrics.kappa_l.value,
            sigma: metrics.sigma.value,
        }
    }
}

/// Stateless evaluator over a fixed threshold set.
#[derive(Debug, Clone, Copy)]
pub struct GatePipeline {
    thresholds: GateThresholds,
}

impl GatePipeline {
    pub fn new(thresholds: GateThresholds) -> Self {
        Self { thresholds }
    }

    pub fn from_config(config: &GateConfig) -> Self {
        Self::new(config.thresholds)
    }

    pub fn thresholds(&self) -> &GateThresholds {
        &self.thresholds
    }

    /// Run the gates in order and return the first decision reached.
    pub fn evaluate(&self, input: &GateInput) -> GateOutcome {
        let t = &self.thresholds;
        // Unknown turbulence is maximal turbulence.
        let sigma = if input.sigma.is_nan() {
            1.0
        } else {
            input.sigma.clamp(0.0, 1.0)
        };
        let kappa_req = t.kappa_required(sigma);

        // Gate 1: Integrity
        if !(input.n < t.n_threshold) {
            let reason = format!("noise {:.4} >= n_threshold {}", input.n, t.n_threshold);
            log::error!("REJECT at gate 1: {reason}");
            return outcome(Decision::Reject, Gate::Integrity, reason, kappa_req);
        }

        // Gate 2: Consensus
        if !(input.consensus >= t.c_min) {
            let reason = format!(
                "consensus {:.4} < c_min {} (evaluators disagree)",
                input.consensus, t.c_min
            );
            log::error!("BLOCK at gate 2: {reason}");
            return outcome(Decision::Block, Gate::Consensus, reason, kappa_req);
        }

        // Gate 3: Admissibility
        let kappa_gate = if input.kappa_gate.is_nan() {
            0.0
        } else {
            input.kappa_gate
        };
        let floor = kappa_req - t.landauer_buffer;
        if kappa_gate < floor {
            let reason = format!(
                "kappa_gate {kappa_gate:.4} < kappa_req {kappa_req:.4} - buffer {} (sigma {sigma:.4})",
                t.landauer_buffer
            );
            log::warn!("RE_ENCODE at gate 3: {reason}");
            return outcome(Decision::ReEncode, Gate::Admissibility, reason, kappa_req);
        }
        if kappa_gate < kappa_req {
            if sigma > t.sigma_threshold {
                let reason = format!(
                    "kappa_gate {kappa_gate:.4} in tolerance band below kappa_req {kappa_req:.4} \
                     with turbulence {sigma:.4} > {}",
                    t.sigma_threshold
                );
                log::warn!("RE_ENCODE at gate 3: {reason}");
                return outcome(Decision::ReEncode, Gate::Admissibility, reason, kappa_req);
            }
            log::info!(
                "gate 3 cautious pass: kappa_gate {kappa_gate:.4} within buffer of kappa_req {kappa_req:.4}, sigma {sigma:.4} calm"
            );
        }

        // Gate 4: Grounding
        if !(input.kappa_l >= t.kappa_l_min) {
            let reason = format!(
                "kappa_l {:.4} < kappa_l_min {} (low-level grounding defect)",
                input.kappa_l, t.kappa_l_min
            );
            log::warn!("REPAIR at gate 4: {reason}");
            return outcome(Decision::Repair, Gate::Grounding, reason, kappa_req);
        }

        outcome(
            Decision::Execute,
            Gate::Passed,
            format!("passed all gates (kappa_gate {kappa_gate:.4} >= kappa_req {kappa_req:.4} band)"),
            kappa_req,
        )
    }

    /// Gate-0 rejection for content the pre-screener blocked.
    pub fn prescreen_reject(&self, flags: &[String]) -> GateOutcome {
        let reason = format!("pre-screen rejected: {}", flags.join(", "));
        log::error!("REJECT at gate 0: {reason}");
        outcome(
            Decision::Reject,
            Gate::PreScreen,
            reason,
            self.thresholds.kappa_required(1.0),
        )
    }
}

fn outcome(decision: Decision, gate: Gate, reason: String, kappa_req: f64) -> GateOutcome {
    GateOutcome {
        decision,
        gate,
        reason,
        kappa_req,
    }
}
