// ─────────────────────────────────────────────────────────────────────
// Swarm-It — RSCT Certification Gate Configuration
// ─────────────────────────────────────────────────────────────────────

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GateError, GateResult};

/// Admission thresholds read by the four gates.
///
/// Snapshotted into every statistics report so an auditor can see which
/// bar a batch of certificates was held to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GateThresholds {
    /// Gate 1: noise at or above this rejects.
    /// Default: 0.5.
    pub n_threshold: f64,

    /// Gate 2: consensus below this blocks.
    /// Default: 0.4.
    pub c_min: f64,

    /// Gate 3: compatibility floor at zero turbulence.
    /// Default: 0.5.
    pub kappa_base: f64,

    /// Gate 3: how fast the floor rises with turbulence.
    /// Default: 0.4.
    pub lambda_coef: f64,

    /// Gate 3: tolerance band below `kappa_req`.
    /// Default: 0.05.
    pub landauer_buffer: f64,

    /// Gate 3: turbulence above this re-encodes inside the tolerance band.
    /// Default: 0.5.
    pub sigma_threshold: f64,

    /// Gate 4: low-level channel health below this needs repair.
    /// Default: 0.3.
    pub kappa_l_min: f64,
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            n_threshold: 0.5,
            c_min: 0.4,
            kappa_base: 0.5,
            lambda_coef: 0.4,
            landauer_buffer: 0.05,
            sigma_threshold: 0.5,
            kappa_l_min: 0.3,
        }
    }
}

impl GateThresholds {
    /// Dynamic Gate 3 threshold: `kappa_base + lambda_coef * sigma`.
    ///
    /// Non-decreasing in `sigma` because `lambda_coef >= 0` is enforced
    /// by [`GateThresholds::validate`].
    #[inline]
    pub fn kappa_required(&self, sigma: f64) -> f64 {
        self.kappa_base + self.lambda_coef * sigma
    }

    pub fn validate(&self) -> GateResult<()> {
        unit_interval("n_threshold", self.n_threshold)?;
        if self.n_threshold == 0.0 {
            return Err(GateError::Config(
                "n_threshold must be > 0 (0 would reject every input)".to_string(),
            ));
        }
        unit_interval("c_min", self.c_min)?;
        unit_interval("kappa_base", self.kappa_base)?;
        non_negative("lambda_coef", self.lambda_coef)?;
        non_negative("landauer_buffer", self.landauer_buffer)?;
        if self.landauer_buffer > self.kappa_base {
            return Err(GateError::Config(format!(
                "landauer_buffer must not exceed kappa_base, got {} > {}",
                self.landauer_buffer, self.kappa_base
            )));
        }
        unit_interval("sigma_threshold", self.sigma_threshold)?;
        unit_interval("kappa_l_min", self.kappa_l_min)?;
        Ok(())
    }
}

/// Process-wide configuration for the certification engine.
///
/// Constructed once, validated, then shared read-only behind an `Arc`.
/// There is no runtime mutation path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GateConfig {
    pub thresholds: GateThresholds,

    /// Prior purity that `alpha_omega` shrinks toward when `omega` is low.
    /// Default: 0.5.
    pub alpha_base: f64,

    /// Floor on `alpha_omega` before inversion into `tau`.
    /// Default: 1e-3 (caps `tau` at 1000).
    pub epsilon: f64,

    /// Issue `REJECT` at gate 0 on a blocking pre-screen hit instead of
    /// running the full metric computation.
    /// Default: true.
    pub prescreen_short_circuit: bool,

    /// Default deadline for feature extraction, if any.
    /// Default: none (extraction runs on the calling thread).
    pub extraction_deadline_ms: Option<u64>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            thresholds: GateThresholds::default(),
            alpha_base: 0.5,
            epsilon: 1e-3,
            prescreen_short_circuit: true,
            extraction_deadline_ms: None,
        }
    }
}

impl GateConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) -> GateResult<()> {
        self.thresholds.validate()?;
        unit_interval("alpha_base", self.alpha_base)?;
        if !(self.epsilon > 0.0 && self.epsilon <= 1.0) {
            return Err(GateError::Config(format!(
                "epsilon must be in (0, 1], got {}",
                self.epsilon
            )));
        }
        if self.extraction_deadline_ms == Some(0) {
            return Err(GateError::Config(
                "extraction_deadline_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Load from JSON string. Missing fields take their defaults.
    pub fn from_json(json: &str) -> GateResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| GateError::Config(format!("JSON parse error: {e}")))
    }

    /// Load from a JSON file and validate it.
    pub fn from_file(path: impl AsRef<Path>) -> GateResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GateError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = Self::from_json(&raw)?;
        config.validate()?;
        Ok(config)
    }
}

fn unit_interval(name: &str, value: f64) -> GateResult<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(GateError::Config(format!(
            "{name} must be in [0, 1], got {value}"
        )));
    }
    Ok(())
}

fn non_negative(name: &str, value: f64) -> GateResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(GateError::Config(format!(
            "{name} must be finite and >= 0, got {value}"
        )));
    }
    Ok(())
}
