// ─────────────────────────────────────────────────────────────────────
// Swarm-It — Simplex Decomposer
// ─────────────────────────────────────────────────────────────────────
//! R/S/N decomposition of content quality signal.
//!
//! Output always lies on the probability simplex. Content with no
//! usable signal decomposes to pure noise `(0, 0, 1)`, which Gate 1
//! rejects without any special-case path.

use rsct_types::Simplex;

use crate::extractor::FeatureSummary;

#[derive(Debug, Clone, Copy, Default)]
pub struct SimplexDecomposer;

impl SimplexDecomposer {
    pub fn new() -> Self {
        Self
    }

    /// Decompose `content` given its feature summary.
    pub fn decompose(&self, content: &str, features: &FeatureSummary) -> Simplex {
        if content.trim().is_empty() {
            log::debug!("empty content, decomposing to pure noise");
            return Simplex::pure_noise();
        }
        let point = Simplex::from_masses(features.relevance, features.support, features.noise);
        if point == Simplex::pure_noise()
            && !(features.noise.is_finite() && features.noise > 0.0)
        {
            log::warn!(
                "feature summary carried no usable mass (r={}, s={}, n={}), defaulting to pure noise",
                features.relevance,
                features.support,
                features.noise
            );
        }
        point
    }
}
