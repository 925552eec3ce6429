// ─────────────────────────────────────────────────────────────────────
// Swarm-It — RSCT Certificate Types
// ─────────────────────────────────────────────────────────────────────
//! The certificate value type and the pieces it is assembled from.
//!
//! A [`Certificate`] is sealed exactly once from a [`CertificateDraft`]
//! and exposes read-only accessors afterwards.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GateError;

/// Maximum tolerated `|r + s + n - 1|` for a simplex point.
pub const SIMPLEX_TOLERANCE: f64 = 1e-2;

/// Clamp a value to [lo, hi], mapping NaN to lo and Inf to nearest bound.
#[inline]
pub fn clamp_score(value: f64, lo: f64, hi: f64) -> f64 {
    if value.is_nan() {
        log::warn!("clamp_score: NaN detected, clamping to {lo:.4}");
        return lo;
    }
    if value.is_infinite() {
        let boundary = if value > 0.0 { hi } else { lo };
        log::warn!("clamp_score: Inf detected, clamping to {boundary:.4}");
        return boundary;
    }
    value.clamp(lo, hi)
}

// ─── Decision / Gate ────────────────────────────────────────────────

/// Admission decision. Five distinct outcomes; none are aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    /// Passed every gate.
    Execute,
    /// Gate 4: low-level grounding defect. Fix the content itself.
    Repair,
    /// Gate 3: representation mismatch. Re-derive features, don't just retry.
    ReEncode,
    /// Gate 2: evaluators disagree.
    Block,
    /// Gate 1 or pre-screen: content must not reach deeper analysis.
    Reject,
}

impl Decision {
    pub const ALL: [Decision; 5] = [
        Decision::Execute,
        Decision::Repair,
        Decision::ReEncode,
        Decision::Block,
        Decision::Reject,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Execute => "EXECUTE",
            Decision::Repair => "REPAIR",
            Decision::ReEncode => "RE_ENCODE",
            Decision::Block => "BLOCK",
            Decision::Reject => "REJECT",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decision::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| GateError::Validation(format!("unknown decision: {s}")))
    }
}

/// The stage that produced a decision. Serialized as its integer index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Gate {
    PreScreen = 0,
    Integrity = 1,
    Consensus = 2,
    Admissibility = 3,
    Grounding = 4,
    Passed = 5,
}

impl Gate {
    pub fn index(self) -> u8 {
        self as u8
    }
}

impl From<Gate> for u8 {
    fn from(gate: Gate) -> u8 {
        gate.index()
    }
}

impl TryFrom<u8> for Gate {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Gate::PreScreen,
            1 => Gate::Integrity,
            2 => Gate::Consensus,
            3 => Gate::Admissibility,
            4 => Gate::Grounding,
            5 => Gate::Passed,
            other => return Err(format!("gate index out of range: {other}")),
        })
    }
}

// ─── Provenance ─────────────────────────────────────────────────────

/// Where a metric value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Measured from a real signal.
    Computed,
    /// Signal unavailable; a named default stands in.
    Defaulted,
    /// The calculator never ran (pre-screen short-circuit).
    Skipped,
}

/// A bounded metric together with its provenance flag.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    pub value: f64,
    pub provenance: Provenance,
}

impl MetricValue {
    /// A computed value, clamped to [0, 1]. Non-finite input is not a
    /// measurement and yields `None`.
    pub fn computed(value: f64) -> Option<Self> {
        value.is_finite().then(|| Self {
            value: value.clamp(0.0, 1.0),
            provenance: Provenance::Computed,
        })
    }

    pub fn defaulted(value: f64) -> Self {
        Self {
            value: clamp_score(value, 0.0, 1.0),
            provenance: Provenance::Defaulted,
        }
    }

    pub fn skipped(value: f64) -> Self {
        Self {
            value: clamp_score(value, 0.0, 1.0),
            provenance: Provenance::Skipped,
        }
    }

    /// True for anything that was not measured.
    pub fn is_estimated(&self) -> bool {
        self.provenance != Provenance::Computed
    }
}

// ─── Simplex ────────────────────────────────────────────────────────

/// A point on the R/S/N probability simplex.
///
/// Deserialization goes through the same tolerance check as
/// [`Simplex::try_new`], so a replayed record cannot carry an invalid point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSimplex")]
pub struct Simplex {
    r: f64,
    s: f64,
    n: f64,
}

#[derive(Deserialize)]
struct RawSimplex {
    r: f64,
    s: f64,
    n: f64,
}

impl TryFrom<RawSimplex> for Simplex {
    type Error = String;

    /// Stored values are kept as written once they pass the check.
    fn try_from(raw: RawSimplex) -> Result<Self, Self::Error> {
        let RawSimplex { r, s, n } = raw;
        Simplex::try_new(r, s, n)
            .map(|_| Simplex { r, s, n })
            .ok_or_else(|| format!("({r}, {s}, {n}) is not on the probability simplex"))
    }
}

impl Simplex {
    /// `(0, 0, 1)`: the safe default for content with no usable signal.
    pub const fn pure_noise() -> Self {
        Self {
            r: 0.0,
            s: 0.0,
            n: 1.0,
        }
    }

    /// Build from unnormalized non-negative masses.
    ///
    /// Non-finite or negative masses count as zero; zero total mass is
    /// pure noise. `n` absorbs floating-point drift.
    pub fn from_masses(r: f64, s: f64, n: f64) -> Self {
        let sanitize = |x: f64| if x.is_finite() && x > 0.0 { x } else { 0.0 };
        let (r, s, n) = (sanitize(r), sanitize(s), sanitize(n));
        let total = r + s + n;
        if !(total.is_finite() && total > 0.0) {
            return Self::pure_noise();
        }
        let r = r / total;
        let s = s / total;
        Self {
            r,
            s,
            n: (1.0 - r - s).max(0.0),
        }
    }

    /// Accept an already-normalized point, renormalizing drift within
    /// [`SIMPLEX_TOLERANCE`]. Anything further off is refused.
    pub fn try_new(r: f64, s: f64, n: f64) -> Option<Self> {
        let in_range = |x: f64| x.is_finite() && (0.0..=1.0).contains(&x);
        if !(in_range(r) && in_range(s) && in_range(n)) {
            return None;
        }
        if (r + s + n - 1.0).abs() >= SIMPLEX_TOLERANCE {
            return None;
        }
        Some(Self::from_masses(r, s, n))
    }

    pub fn r(&self) -> f64 {
        self.r
    }

    pub fn s(&self) -> f64 {
        self.s
    }

    pub fn n(&self) -> f64 {
        self.n
    }

    pub fn sum(&self) -> f64 {
        self.r + self.s + self.n
    }
}

// ─── Derived metrics / gate outcome ─────────────────────────────────

/// Everything the calculator derives from a simplex point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    /// Purity `r / (r + n)`.
    pub alpha: f64,
    /// Distributional reliability.
    pub omega: MetricValue,
    /// Reliability-weighted purity.
    pub alpha_omega: f64,
    /// Plasticity `1 / max(alpha_omega, epsilon)`.
    pub tau: f64,
    pub kappa_h: MetricValue,
    pub kappa_l: MetricValue,
    pub kappa_interface: MetricValue,
    /// Weakest-link compatibility.
    pub kappa_gate: f64,
    /// Turbulence.
    pub sigma: MetricValue,
    pub consensus: MetricValue,
}

/// What the gate pipeline concluded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateOutcome {
    pub decision: Decision,
    pub gate: Gate,
    pub reason: String,
    /// Dynamic Gate 3 threshold at this certificate's turbulence.
    pub kappa_req: f64,
}

/// A fully computed but not yet issued certificate.
#[derive(Debug, Clone)]
pub struct CertificateDraft {
    pub simplex: Simplex,
    pub metrics: DerivedMetrics,
    pub pattern_flags: Vec<String>,
    pub outcome: GateOutcome,
    pub content_digest: String,
    pub stage: Option<String>,
}

impl CertificateDraft {
    /// Issue the certificate. After this nothing about it can change.
    pub fn seal(self, id: String, timestamp: u64) -> Certificate {
        Certificate {
            id,
            timestamp,
            stage: self.stage,
            content_digest: self.content_digest,
            simplex: self.simplex,
            metrics: self.metrics,
            pattern_flags: self.pattern_flags,
            decision: self.outcome.decision,
            gate_reached: self.outcome.gate,
            reason: self.outcome.reason,
            kappa_req: self.outcome.kappa_req,
        }
    }
}

// ─── Certificate ────────────────────────────────────────────────────

/// Quality certificate and admission decision for one piece of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    id: String,
    /// Issuance time, unix milliseconds.
    timestamp: u64,
    stage: Option<String>,
    content_digest: String,
    simplex: Simplex,
    metrics: DerivedMetrics,
    pattern_flags: Vec<String>,
    decision: Decision,
    gate_reached: Gate,
    reason: String,
    kappa_req: f64,
}

impl Certificate {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn stage(&self) -> Option<&str> {
        self.stage.as_deref()
    }

    pub fn content_digest(&self) -> &str {
        &self.content_digest
    }

    pub fn simplex(&self) -> Simplex {
        self.simplex
    }

    pub fn r(&self) -> f64 {
        self.simplex.r()
    }

    pub fn s(&self) -> f64 {
        self.simplex.s()
    }

    pub fn n(&self) -> f64 {
        self.simplex.n()
    }

    pub fn metrics(&self) -> &DerivedMetrics {
        &self.metrics
    }

    pub fn alpha(&self) -> f64 {
        self.metrics.alpha
    }

    pub fn omega(&self) -> MetricValue {
        self.metrics.omega
    }

    pub fn alpha_omega(&self) -> f64 {
        self.metrics.alpha_omega
    }

    pub fn tau(&self) -> f64 {
        self.metrics.tau
    }

    pub fn kappa_h(&self) -> MetricValue {
        self.metrics.kappa_h
    }

    pub fn kappa_l(&self) -> MetricValue {
        self.metrics.kappa_l
    }

    pub fn kappa_interface(&self) -> MetricValue {
        self.metrics.kappa_interface
    }

    pub fn kappa_gate(&self) -> f64 {
        self.metrics.kappa_gate
    }

    pub fn sigma(&self) -> MetricValue {
        self.metrics.sigma
    }

    pub fn consensus(&self) -> MetricValue {
        self.metrics.consensus
    }

    pub fn kappa_req(&self) -> f64 {
        self.kappa_req
    }

    pub fn pattern_flags(&self) -> &[String] {
        &self.pattern_flags
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.pattern_flags.iter().any(|f| f == flag)
    }

    pub fn decision(&self) -> Decision {
        self.decision
    }

    pub fn gate_reached(&self) -> Gate {
        self.gate_reached
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Whether the caller may act on the content as-is.
    pub fn allowed(&self) -> bool {
        self.decision == Decision::Execute
    }
}
