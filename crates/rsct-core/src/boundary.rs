// ─────────────────────────────────────────────────────────────────────
// Swarm-It — Trust Boundary Policy
// ─────────────────────────────────────────────────────────────────────
//! Which content gets certified at all.
//!
//! Only externally sourced text crosses the boundary. Operational text
//! the pipeline writes itself (progress summaries, log lines, reports)
//! reads like instructions to the pre-screener and would be rejected,
//! so it is never submitted.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kinds of text the surrounding pipeline generates itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InternalKind {
    ProgressSummary,
    LogLine,
    Report,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentOrigin {
    /// Third-party text, e.g. a fetched paper abstract. `source` names
    /// where it came from.
    External { source: String },
    /// Text the pipeline synthesized.
    Internal { kind: InternalKind },
}

impl ContentOrigin {
    pub fn external(source: impl Into<String>) -> Self {
        ContentOrigin::External {
            source: source.into(),
        }
    }

    pub fn internal(kind: InternalKind) -> Self {
        ContentOrigin::Internal { kind }
    }

    pub fn is_external(&self) -> bool {
        matches!(self, ContentOrigin::External { .. })
    }
}

impl fmt::Display for ContentOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentOrigin::External { source } => write!(f, "external:{source}"),
            ContentOrigin::Internal { kind } => write!(f, "internal:{kind:?}"),
        }
    }
}

/// Caller-side policy. The engine certifies whatever it is given; this
/// is what call sites consult before giving it anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustBoundary;

impl TrustBoundary {
    pub fn new() -> Self {
        Self
    }

    pub fn requires_certification(&self, origin: &ContentOrigin) -> bool {
        let required = origin.is_external();
        if !required {
            log::debug!("trust boundary: {origin} stays inside, not certified");
        }
        required
    }
}
