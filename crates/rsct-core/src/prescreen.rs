// ─────────────────────────────────────────────────────────────────────
// Swarm-It — Pattern Pre-Screener
// ─────────────────────────────────────────────────────────────────────
//! Cheap deterministic attack detection that runs before the derived
//! metric computation.
//!
//! The ruleset is a list of [`PatternMatcher`]s and is meant to grow.
//! Built-in matchers cover:
//! - instruction-override phrasing (`injection`)
//! - role-play and system-prompt mimicry (`extraction`)
//! - low-entropy / repetitive / vowel-less token runs (`gibberish`)
//! - embedding-level variants of the first two (`semantic:*`)
//! - technical mentions of attack terms (`mention:*`, warning only)
//!
//! Matchers marked as fallback (the semantic one) only run when the
//! lexical rules found nothing to block.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::extractor::{hashed_embedding, FeatureSummary};

/// How a hit affects the certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Recorded and logged; the simplex is left alone.
    Warn,
    /// Forces pure noise and, with short-circuit enabled, a gate-0 REJECT.
    Block,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternHit {
    pub flag: String,
    pub severity: Severity,
    pub detail: String,
}

impl PatternHit {
    pub fn block(flag: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            flag: flag.into(),
            severity: Severity::Block,
            detail: detail.into(),
        }
    }

    pub fn warn(flag: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            flag: flag.into(),
            severity: Severity::Warn,
            detail: detail.into(),
        }
    }
}

/// Trait for pre-screen rules.
pub trait PatternMatcher: Send + Sync {
    fn name(&self) -> &str;

    fn scan(&self, content: &str, features: &FeatureSummary) -> Vec<PatternHit>;

    /// Fallback matchers are skipped once a blocking hit exists.
    fn fallback(&self) -> bool {
        false
    }
}

/// Everything the screener found for one piece of content.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScreenReport {
    pub hits: Vec<PatternHit>,
}

impl ScreenReport {
    pub fn blocked(&self) -> bool {
        self.hits.iter().any(|h| h.severity == Severity::Block)
    }

    /// Distinct flags in first-seen order.
    pub fn flags(&self) -> Vec<String> {
        let mut flags: Vec<String> = Vec::with_capacity(self.hits.len());
        for hit in &self.hits {
            if !flags.contains(&hit.flag) {
                flags.push(hit.flag.clone());
            }
        }
        flags
    }
}

/// Ordered, extensible collection of matchers.
pub struct PreScreener {
    matchers: Vec<Box<dyn PatternMatcher>>,
}

impl Default for PreScreener {
    fn default() -> Self {
        Self::empty()
            .with_matcher(InjectionMatcher::default())
            .with_matcher(RolePlayMatcher::default())
            .with_matcher(GibberishMatcher::default())
            .with_matcher(MentionMatcher::default())
            .with_matcher(SemanticMatcher::default())
    }
}

impl PreScreener {
    pub fn new() -> Self {
        Self::default()
    }

    /// A screener with no rules at all.
    pub fn empty() -> Self {
        Self {
            matchers: Vec::new(),
        }
    }

    pub fn with_matcher(mut self, matcher: impl PatternMatcher + 'static) -> Self {
        self.matchers.push(Box::new(matcher));
        self
    }

    pub fn matcher_names(&self) -> Vec<&str> {
        self.matchers.iter().map(|m| m.name()).collect()
    }

    pub fn screen(&self, content: &str, features: &FeatureSummary) -> ScreenReport {
        let mut report = ScreenReport::default();
        for matcher in &self.matchers {
            if matcher.fallback() && report.blocked() {
                continue;
            }
            for hit in matcher.scan(content, features) {
                match hit.severity {
                    Severity::Block => log::warn!(
                        "pre-screen [{}] blocking hit '{}': {}",
                        matcher.name(),
                        hit.flag,
                        hit.detail
                    ),
                    Severity::Warn => log::warn!(
                        "pre-screen [{}] possible false positive '{}': {}",
                        matcher.name(),
                        hit.flag,
                        hit.detail
                    ),
                }
                report.hits.push(hit);
            }
        }
        report
    }
}

fn words(content: &str) -> Vec<String> {
    content
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric() && c != '-')
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

fn normalized(content: &str) -> String {
    words(content).join(" ")
}

// ─── Instruction override ───────────────────────────────────────────

/// Flags a control verb followed closely by an instruction noun,
/// e.g. "ignore all previous instructions", "reveal your system prompt".
pub struct InjectionMatcher {
    override_verbs: Vec<&'static str>,
    disclosure_verbs: Vec<&'static str>,
    targets: Vec<&'static str>,
    qualifiers: Vec<&'static str>,
    window: usize,
}

impl Default for InjectionMatcher {
    fn default() -> Self {
        Self {
            override_verbs: vec!["ignore", "disregard", "forget", "override", "bypass", "skip"],
            disclosure_verbs: vec!["reveal", "print", "show", "output", "repeat", "leak", "dump"],
            targets: vec![
                "instructions",
                "instruction",
                "rules",
                "prompt",
                "prompts",
                "directives",
                "guidelines",
            ],
            qualifiers: vec![
                "previous", "prior", "above", "earlier", "all", "your", "system", "initial",
                "hidden", "original",
            ],
            window: 3,
        }
    }
}

impl InjectionMatcher {
    fn scan_verbs(&self, tokens: &[String], verbs: &[&str]) -> Option<String> {
        for (i, token) in tokens.iter().enumerate() {
            if !verbs.contains(&token.as_str()) {
                continue;
            }
            let end = (i + 1 + self.window).min(tokens.len());
            let window = &tokens[i + 1..end];
            let has_target = window.iter().any(|w| self.targets.contains(&w.as_str()));
            let has_qualifier = window.iter().any(|w| self.qualifiers.contains(&w.as_str()));
            if has_target && has_qualifier {
                return Some(format!("'{} {}'", token, window.join(" ")));
            }
        }
        None
    }
}

impl PatternMatcher for InjectionMatcher {
    fn name(&self) -> &str {
        "injection"
    }

    fn scan(&self, content: &str, _features: &FeatureSummary) -> Vec<PatternHit> {
        let tokens = words(content);
        self.scan_verbs(&tokens, &self.override_verbs)
            .or_else(|| self.scan_verbs(&tokens, &self.disclosure_verbs))
            .map(|detail| vec![PatternHit::block("injection", detail)])
            .unwrap_or_default()
    }
}

// ─── Role-play / system-prompt mimicry ──────────────────────────────

pub struct RolePlayMatcher {
    phrases: Vec<&'static str>,
    markers: Vec<&'static str>,
}

impl Default for RolePlayMatcher {
    fn default() -> Self {
        Self {
            phrases: vec![
                "you are now",
                "from now on you are",
                "pretend to be",
                "pretend you are",
                "roleplay as",
                "role-play as",
                "act as if you have no",
                "developer mode",
                "do anything now",
                "jailbroken mode",
                "without any restrictions",
            ],
            markers: vec!["<|im_start|>", "<|system|>", "<<sys>>", "[inst]", "[system]"],
        }
    }
}

impl PatternMatcher for RolePlayMatcher {
    fn name(&self) -> &str {
        "role_play"
    }

    fn scan(&self, content: &str, _features: &FeatureSummary) -> Vec<PatternHit> {
        let text = normalized(content);
        if let Some(p) = self.phrases.iter().find(|p| text.contains(*p)) {
            return vec![PatternHit::block("extraction", format!("role-play phrase '{p}'"))];
        }
        let lower = content.to_lowercase();
        if let Some(m) = self.markers.iter().find(|m| lower.contains(*m)) {
            return vec![PatternHit::block("extraction", format!("chat template marker '{m}'"))];
        }
        let header = lower.lines().map(str::trim_start).find(|line| {
            line.starts_with("system:") || line.starts_with("### system")
        });
        match header {
            Some(line) => vec![PatternHit::block(
                "extraction",
                format!("system-role header '{}'", line.chars().take(24).collect::<String>()),
            )],
            None => Vec::new(),
        }
    }
}

// ─── Gibberish ──────────────────────────────────────────────────────

/// Low-information token sequences.
pub struct GibberishMatcher {
    /// Minimum non-whitespace characters before entropy is judged.
    pub min_chars: usize,
    /// Bits per character below which content is gibberish.
    pub entropy_floor: f64,
    /// Minimum tokens before repetition is judged.
    pub min_tokens: usize,
    /// Distinct/total token ratio below which content is gibberish.
    pub min_unique_ratio: f64,
    /// Fraction of long ASCII words without vowels above which content is gibberish.
    pub max_vowelless_ratio: f64,
}

impl Default for GibberishMatcher {
    fn default() -> Self {
        Self {
            min_chars: 16,
            entropy_floor: 2.5,
            min_tokens: 8,
            min_unique_ratio: 0.25,
            max_vowelless_ratio: 0.5,
        }
    }
}

/// Shannon entropy in bits per character, whitespace excluded.
pub fn char_entropy(content: &str) -> f64 {
    let mut counts: HashMap<char, usize> = HashMap::new();
    let mut total = 0usize;
    for c in content.chars().filter(|c| !c.is_whitespace()) {
        *counts.entry(c.to_ascii_lowercase()).or_insert(0) += 1;
        total += 1;
    }
    if total == 0 {
        return 0.0;
    }
    counts
        .values()
        .map(|&k| {
            let p = k as f64 / total as f64;
            -p * p.log2()
        })
        .sum()
}

impl PatternMatcher for GibberishMatcher {
    fn name(&self) -> &str {
        "gibberish"
    }

    fn scan(&self, content: &str, _features: &FeatureSummary) -> Vec<PatternHit> {
        let chars = content.chars().filter(|c| !c.is_whitespace()).count();
        if chars >= self.min_chars {
            let h = char_entropy(content);
            if h < self.entropy_floor {
                return vec![PatternHit::block(
                    "gibberish",
                    format!("character entropy {h:.2} bits < {}", self.entropy_floor),
                )];
            }
        }

        let tokens = words(content);
        if tokens.len() >= self.min_tokens {
            let mut distinct: Vec<&str> = tokens.iter().map(String::as_str).collect();
            distinct.sort_unstable();
            distinct.dedup();
            let ratio = distinct.len() as f64 / tokens.len() as f64;
            if ratio < self.min_unique_ratio {
                return vec![PatternHit::block(
                    "gibberish",
                    format!("distinct token ratio {ratio:.2} < {}", self.min_unique_ratio),
                )];
            }
        }

        let long: Vec<&String> = tokens
            .iter()
            .filter(|t| t.is_ascii() && t.chars().filter(|c| c.is_ascii_alphabetic()).count() >= 4)
            .collect();
        if long.len() >= 5 {
            let vowelless = long
                .iter()
                .filter(|t| !t.chars().any(|c| "aeiouy".contains(c)))
                .count();
            let ratio = vowelless as f64 / long.len() as f64;
            if ratio > self.max_vowelless_ratio {
                return vec![PatternHit::block(
                    "gibberish",
                    format!("vowel-less word ratio {ratio:.2} > {}", self.max_vowelless_ratio),
                )];
            }
        }
        Vec::new()
    }
}

// ─── Mentions ───────────────────────────────────────────────────────

/// Attack vocabulary used as subject matter rather than as an attack.
/// Research abstracts about jailbreaks trip this; it only warns.
pub struct MentionMatcher {
    terms: Vec<&'static str>,
}

impl Default for MentionMatcher {
    fn default() -> Self {
        Self {
            terms: vec![
                "jailbreak",
                "prompt injection",
                "adversarial prompt",
                "red teaming",
                "red-teaming",
            ],
        }
    }
}

impl PatternMatcher for MentionMatcher {
    fn name(&self) -> &str {
        "mention"
    }

    fn scan(&self, content: &str, _features: &FeatureSummary) -> Vec<PatternHit> {
        let text = normalized(content);
        self.terms
            .iter()
            .filter(|t| text.contains(*t))
            .map(|t| {
                PatternHit::warn(
                    format!("mention:{}", t.replace(' ', "-")),
                    format!("technical mention of '{t}'"),
                )
            })
            .collect()
    }
}

// ─── Semantic variants ──────────────────────────────────────────────

/// Cosine similarity between the content embedding and attack exemplars.
///
/// Exemplars are embedded with the same hashing scheme the lexical
/// extractor uses, so this only fires for summaries whose embedding
/// lives in that space (same dimension).
pub struct SemanticMatcher {
    exemplars: Vec<(String, Vec<f64>)>,
    threshold: f64,
}

impl Default for SemanticMatcher {
    fn default() -> Self {
        Self::empty(0.6)
            .with_exemplar(
                "semantic:injection",
                "ignore disregard forget override bypass previous prior above earlier \
                 instructions rules directives guidelines",
            )
            .with_exemplar(
                "semantic:extraction",
                "pretend roleplay persona unrestricted developer mode jailbroken reveal \
                 hidden system prompt confidential configuration",
            )
    }
}

impl SemanticMatcher {
    pub fn empty(threshold: f64) -> Self {
        Self {
            exemplars: Vec::new(),
            threshold,
        }
    }

    pub fn with_exemplar(mut self, flag: impl Into<String>, text: &str) -> Self {
        self.exemplars.push((flag.into(), hashed_embedding(text)));
        self
    }

    pub fn with_centroid(mut self, flag: impl Into<String>, centroid: Vec<f64>) -> Self {
        self.exemplars.push((flag.into(), centroid));
        self
    }
}

/// Cosine similarity; 0.0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 || !dot.is_finite() {
        return 0.0;
    }
    dot / (na * nb)
}

impl PatternMatcher for SemanticMatcher {
    fn name(&self) -> &str {
        "semantic"
    }

    fn fallback(&self) -> bool {
        true
    }

    fn scan(&self, _content: &str, features: &FeatureSummary) -> Vec<PatternHit> {
        self.exemplars
            .iter()
            .filter_map(|(flag, centroid)| {
                let sim = cosine_similarity(&features.embedding, centroid);
                (sim >= self.threshold).then(|| {
                    PatternHit::block(
                        flag.clone(),
                        format!("embedding similarity {sim:.3} >= {}", self.threshold),
                    )
                })
            })
            .collect()
    }
}
