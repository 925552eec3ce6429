// ─────────────────────────────────────────────────────────────────────
// Swarm-It — RSCT Certification Gate Core Engine
// (C) 1998-2026 Miroslav Sotek. All rights reserved.
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
#![deny(unsafe_code)]
//! Certification gate for externally sourced content: simplex
//! decomposition, attack pre-screen, derived metrics, the four-gate
//! admission pipeline, and the certificate audit log.
//!
//! # Safety Invariants
//!
//! 1. **Gate order is fixed**: Integrity, Consensus, Admissibility,
//!    Grounding. A REJECT at gate 1 preempts every later decision even
//!    when later gates would also fail.
//!
//! 2. **Bad input resolves to a decision, never an error**: empty or
//!    malformed content decomposes to pure noise `(0, 0, 1)` and is
//!    rejected by gate 1. NaN in any gate input takes the failing branch.
//!
//! 3. **Dependency failures are never decisions**: an unavailable or
//!    panicking extractor, a missed deadline, or a failed audit append
//!    surface as `GateError` and leave no record behind.
//!
//! 4. **Exactly one record per certificate**: a certificate is returned
//!    only after the audit log accepted it. The log assigns ids and
//!    timestamps, so ids are unique and timestamps never go backwards
//!    within one log, across every engine that writes to it.

pub mod audit;
pub mod boundary;
pub mod engine;
pub mod extractor;
pub mod gates;
pub mod metrics;
pub mod prescreen;
pub mod simplex;

pub use audit::{
    certificate_id, export_records, AuditFilter, AuditLog, ExportFormat, JsonlAuditLog, LogStatistics,
    MemoryAuditLog, RecordId, TimeWindow,
};
pub use boundary::{ContentOrigin, InternalKind, TrustBoundary};
pub use engine::{content_digest, CertificationEngine, CertificationRequest, EngineStatistics};
pub use extractor::{
    ChannelHealth, ExternalExtractor, FeatureExtractor, FeatureSummary, LexicalExtractor,
};
pub use gates::{GateInput, GatePipeline};
pub use metrics::{
    ChannelKappaEstimator, ConstantEstimator, DerivedMetricCalculator, DistanceOmegaEstimator,
    KappaEstimator, KappaTriple, PhasorConsensusEstimator, SignalEstimator,
    VarianceSigmaEstimator,
};
pub use prescreen::{
    GibberishMatcher, InjectionMatcher, MentionMatcher, PatternHit, PatternMatcher, PreScreener,
    RolePlayMatcher, ScreenReport, SemanticMatcher, Severity,
};
pub use simplex::SimplexDecomposer;
