// ─────────────────────────────────────────────────────────────────────
// Swarm-It — RSCT Certification Gate Error Hierarchy
// ─────────────────────────────────────────────────────────────────────

use thiserror::Error;

/// Root error type for certification gate failures.
///
/// Only infrastructure and configuration problems are errors. Poor
/// content quality always resolves to a decision (possibly `REJECT`)
/// and never surfaces here.
#[derive(Error, Debug)]
pub enum GateError {
    /// Out-of-range or unparseable configuration. Raised at construction.
    #[error("config error: {0}")]
    Config(String),

    /// The feature pipeline could not produce a summary for the content.
    #[error("feature extraction failed: {0}")]
    ExtractionFailed(String),

    /// A dependency exceeded the caller-supplied deadline.
    #[error("computation failed: exceeded {deadline_ms}ms deadline")]
    Timeout { deadline_ms: u64 },

    /// The certification worker died before producing a result.
    #[error("computation failed: {0}")]
    ComputationFailed(String),

    /// The audit log could not durably record a certificate.
    #[error("audit log error: {0}")]
    Audit(String),

    /// A batch export could not be serialized.
    #[error("export error: {0}")]
    Export(String),

    /// Invalid caller argument (unknown export format, bad filter).
    #[error("validation error: {0}")]
    Validation(String),
}

pub type GateResult<T> = Result<T, GateError>;
