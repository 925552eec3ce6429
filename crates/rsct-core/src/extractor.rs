// ─────────────────────────────────────────────────────────────────────
// Swarm-It — Feature Extraction Interface
// ─────────────────────────────────────────────────────────────────────
//! Feature summary type, extractor trait, and a deterministic lexical
//! fallback extractor.
//!
//! In production an embedding service sits behind [`FeatureExtractor`]
//! (wrapped with [`ExternalExtractor`]). The [`LexicalExtractor`]
//! needs no model and is fully deterministic, which makes it the
//! extractor of choice for tests and offline runs.

use serde::{Deserialize, Serialize};

use rsct_types::GateResult;

/// Dimension of the hashed bag-of-words embedding.
pub const EMBEDDING_DIM: usize = 64;

/// Concepts that mark content as relevant to representation/solver
/// compatibility research.
pub const DEFAULT_CONCEPTS: &[&str] = &[
    "representation",
    "solver",
    "compatibility",
    "kappa",
    "noise",
    "spurious",
    "relevance",
    "decomposition",
    "simplex",
    "certification",
    "multi-agent",
    "swarm",
    "hallucination",
    "alignment",
    "safety",
    "constraint",
];

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "is", "it", "of",
    "on", "or", "that", "the", "this", "to", "was", "we", "with",
];

/// Per-channel health signals. `None` means the channel was not exercised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelHealth {
    /// High-level / symbolic processing.
    pub symbolic: Option<f64>,
    /// Low-level / signal processing.
    pub signal: Option<f64>,
    /// Cross-channel alignment.
    pub interface: Option<f64>,
}

/// Opaque feature representation of one piece of content.
///
/// Everything here is produced outside the engine; the engine only
/// reads it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSummary {
    /// Raw (unnormalized) relevant-signal mass.
    pub relevance: f64,
    /// Raw supporting/superfluous mass.
    pub support: f64,
    /// Raw noise mass.
    pub noise: f64,
    pub embedding: Vec<f64>,
    /// Distance from the training distribution, if an estimator exists.
    pub ood_distance: Option<f64>,
    /// Ordered signal over the representation (e.g. per-chunk scores).
    pub trajectory: Vec<f64>,
    pub channels: ChannelHealth,
    /// Scores from independent evaluators of the same content.
    pub evaluator_scores: Vec<f64>,
}

impl FeatureSummary {
    pub fn from_masses(relevance: f64, support: f64, noise: f64) -> Self {
        Self {
            relevance,
            support,
            noise,
            ..Default::default()
        }
    }

    pub fn with_channels(mut self, symbolic: f64, signal: f64, interface: Option<f64>) -> Self {
        self.channels = ChannelHealth {
            symbolic: Some(symbolic),
            signal: Some(signal),
            interface,
        };
        self
    }

    pub fn with_trajectory(mut self, trajectory: Vec<f64>) -> Self {
        self.trajectory = trajectory;
        self
    }

    pub fn with_evaluators(mut self, scores: Vec<f64>) -> Self {
        self.evaluator_scores = scores;
        self
    }

    pub fn with_ood_distance(mut self, distance: f64) -> Self {
        self.ood_distance = Some(distance);
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f64>) -> Self {
        self.embedding = embedding;
        self
    }
}

/// Trait for feature extraction backends.
pub trait FeatureExtractor: Send + Sync {
    /// Produce a feature summary, or `ExtractionFailed` when the
    /// backend is unavailable. Never return a made-up summary.
    fn extract(&self, content: &str) -> GateResult<FeatureSummary>;
}

/// Extractor that calls a function pointer.
///
/// Used to bridge an embedding service client into the engine.
type ExtractFn = Box<dyn Fn(&str) -> GateResult<FeatureSummary> + Send + Sync>;

pub struct ExternalExtractor {
    extract_fn: ExtractFn,
}

impl ExternalExtractor {
    pub fn new(
        extract_fn: impl Fn(&str) -> GateResult<FeatureSummary> + Send + Sync + 'static,
    ) -> Self {
        Self {
            extract_fn: Box::new(extract_fn),
        }
    }
}

impl FeatureExtractor for ExternalExtractor {
    fn extract(&self, content: &str) -> GateResult<FeatureSummary> {
        (self.extract_fn)(content)
    }
}

/// Deterministic lexical extractor (no model required).
///
/// Tokens matching the concept vocabulary count as relevant, ordinary
/// words as support, malformed tokens as noise.
pub struct LexicalExtractor {
    concepts: Vec<String>,
}

impl Default for LexicalExtractor {
    fn default() -> Self {
        Self::with_concepts(DEFAULT_CONCEPTS.iter().copied())
    }
}

impl LexicalExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concepts<'a>(concepts: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            concepts: concepts.into_iter().map(str::to_lowercase).collect(),
        }
    }

    fn is_relevant(&self, token: &str) -> bool {
        self.concepts.iter().any(|c| token.starts_with(c.as_str()))
    }
}

impl FeatureExtractor for LexicalExtractor {
    fn extract(&self, content: &str) -> GateResult<FeatureSummary> {
        let mut relevant = 0usize;
        let mut support = 0usize;
        let mut malformed = 0usize;

        for raw in content.split_whitespace() {
            let token = normalize_token(raw);
            if token.is_empty() || is_malformed(&token) {
                malformed += 1;
            } else if self.is_relevant(&token) {
                relevant += 1;
            } else {
                support += 1;
            }
        }

        let total = relevant + support + malformed;
        let symbolic = if total == 0 {
            None
        } else {
            Some(1.0 - malformed as f64 / total as f64)
        };

        Ok(FeatureSummary {
            relevance: relevant as f64,
            support: support as f64,
            noise: malformed as f64,
            embedding: hashed_embedding(content),
            ood_distance: None,
            trajectory: sentence_noise_profile(content),
            channels: ChannelHealth {
                symbolic,
                signal: (total > 0).then(|| structural_health(content)),
                interface: None,
            },
            evaluator_scores: Vec::new(),
        })
    }
}

fn normalize_token(raw: &str) -> String {
    raw.trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}

/// Keyboard mashing, control bytes, decoding debris, absurd lengths.
fn is_malformed(token: &str) -> bool {
    if token.chars().count() > 30 {
        return true;
    }
    if token
        .chars()
        .any(|c| c == '\u{FFFD}' || (c.is_control() && !c.is_whitespace()))
    {
        return true;
    }
    let letters: Vec<char> = token.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() >= 4 && !letters.iter().any(|c| "aeiouy".contains(*c)) && token.is_ascii() {
        return true;
    }
    has_run(token, 4)
}

fn has_run(token: &str, len: usize) -> bool {
    let mut run = 0usize;
    let mut prev = None;
    for c in token.chars() {
        if Some(c) == prev {
            run += 1;
            if run >= len {
                return true;
            }
        } else {
            run = 1;
            prev = Some(c);
        }
    }
    false
}

/// Structural well-formedness in [0, 1]: balanced delimiters, no
/// control bytes, no replacement characters.
fn structural_health(content: &str) -> f64 {
    let mut penalty = 0.0;
    for (open, close) in [('(', ')'), ('[', ']'), ('{', '}')] {
        let opens = content.chars().filter(|&c| c == open).count() as i64;
        let closes = content.chars().filter(|&c| c == close).count() as i64;
        penalty += 0.15 * (opens - closes).unsigned_abs() as f64;
    }
    if content.chars().filter(|&c| c == '"').count() % 2 == 1 {
        penalty += 0.1;
    }
    penalty += 0.25
        * content
            .chars()
            .filter(|c| c.is_control() && !c.is_whitespace())
            .count() as f64;
    penalty += 0.2 * content.chars().filter(|&c| c == '\u{FFFD}').count() as f64;
    (1.0 - penalty).clamp(0.0, 1.0)
}

/// Per-sentence malformed-token fraction.
fn sentence_noise_profile(content: &str) -> Vec<f64> {
    content
        .split(['.', '!', '?', '\n'])
        .filter_map(|sentence| {
            let tokens: Vec<String> = sentence.split_whitespace().map(normalize_token).collect();
            if tokens.is_empty() {
                return None;
            }
            let bad = tokens
                .iter()
                .filter(|t| t.is_empty() || is_malformed(t))
                .count();
            Some(bad as f64 / tokens.len() as f64)
        })
        .collect()
}

/// Signed feature-hashing embedding of the stop-word-filtered tokens,
/// L2-normalized. Empty when nothing survives filtering or the hashed
/// counts cancel out.
pub fn hashed_embedding(text: &str) -> Vec<f64> {
    let mut v = vec![0.0; EMBEDDING_DIM];
    let mut any = false;
    for raw in text.split_whitespace() {
        let token = normalize_token(raw);
        if token.is_empty() || STOP_WORDS.contains(&token.as_str()) {
            continue;
        }
        let h = fnv1a(token.as_bytes());
        let slot = (h % EMBEDDING_DIM as u64) as usize;
        let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
        v[slot] += sign;
        any = true;
    }
    if !any {
        return Vec::new();
    }
    let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
    // Opposite-signed tokens in one slot can cancel to the zero vector.
    if norm == 0.0 {
        return Vec::new();
    }
    v.iter_mut().for_each(|x| *x /= norm);
    v
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        h ^= u64::from(*b);
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    h
}
