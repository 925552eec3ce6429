// ─────────────────────────────────────────────────────────────────────
// Swarm-It — RSCT Certification Gate Types
// (C) 1998-2026 Miroslav Sotek. All rights reserved.
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
#![deny(unsafe_code)]
//! Type definitions, configuration, and error hierarchy for the RSCT
//! certification gate: the certificate value type, the R/S/N simplex,
//! provenance-tagged metrics, the five admission decisions, and the
//! immutable threshold configuration.

pub mod certificate;
pub mod config;
pub mod error;

pub use certificate::{
    clamp_score, Certificate, CertificateDraft, Decision, DerivedMetrics, Gate, GateOutcome,
    MetricValue, Provenance, Simplex, SIMPLEX_TOLERANCE,
};
pub use config::{GateConfig, GateThresholds};
pub use error::{GateError, GateResult};
