//! Similarity retrieval over the reasoning bank with answer-leak protection.
//!
//! Candidates are ranked by cosine similarity against the query embedding. A
//! wider candidate pool (`top_k * candidate_multiplier`) is drawn first so that
//! filtering near-duplicates and leaked answers still leaves `top_k` hits.

use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::memory::MemoryItem;

/// Words that mark a number as a result rather than an intermediate quantity.
const RESULT_KEYWORDS: &[&str] = &[
    "answer", "result", "total", "equals", "final", "=", "is", "solution", "outcome",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeakMode {
    /// Any whole-token occurrence of the expected number is a leak.
    #[default]
    Strict,
    /// Only occurrences near a result keyword count.
    Contextual,
}

impl fmt::Display for LeakMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict => write!(f, "strict"),
            Self::Contextual => write!(f, "contextual"),
        }
    }
}

impl std::str::FromStr for LeakMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "contextual" => Ok(Self::Contextual),
            _ => Err(format!("invalid leak mode: {s}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub candidate_multiplier: usize,
    pub leak_mode: LeakMode,
    /// Characters inspected on each side of a number in contextual mode.
    pub leak_window: usize,
    /// Similarity above which a memory is treated as distilled from the query itself.
    pub duplicate_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 2,
            candidate_multiplier: 3,
            leak_mode: LeakMode::Strict,
            leak_window: 50,
            duplicate_threshold: 0.90,
        }
    }
}

/// One retrieval hit.
#[derive(Debug, Clone, Copy)]
pub struct Retrieved<'a> {
    pub memory: &'a MemoryItem,
    pub score: f32,
}

pub struct Retriever {
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(config: RetrievalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Rank `memories` against `query_embedding`, drop near-duplicates and
    /// leaked answers, and return at most `top_k` hits.
    pub fn retrieve<'a>(
        &self,
        query_embedding: &[f32],
        memories: &'a [MemoryItem],
        expected_value: Option<&str>,
    ) -> Vec<Retrieved<'a>> {
        let mut scored: Vec<Retrieved<'a>> = memories
            .iter()
            .filter_map(|m| {
                m.embedding.as_ref().map(|e| Retrieved {
                    memory: m,
                    score: cosine_similarity(query_embedding, e),
                })
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        scored.truncate(self.config.top_k * self.config.candidate_multiplier.max(1));

        let expected = expected_value.filter(|v| !v.trim().is_empty());
        let mut results = Vec::with_capacity(self.config.top_k);
        for hit in scored {
            if results.len() == self.config.top_k {
                break;
            }
            if hit.score > self.config.duplicate_threshold {
                debug!(title = %hit.memory.title, score = hit.score, "skipping near-duplicate memory");
                continue;
            }
            if let Some(v) = expected {
                if has_answer_leak(hit.memory, v, self.config.leak_mode, self.config.leak_window) {
                    debug!(title = %hit.memory.title, "skipping memory that leaks the answer");
                    continue;
                }
            }
            results.push(hit);
        }
        results
    }
}

/// Cosine similarity; 0.0 for empty, mismatched or zero-norm vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

fn expected_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d+\.?\d*\b").expect("valid regex"))
}

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+(?:\.\d+)?").expect("valid regex"))
}

fn grouped_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{1,3}(?:,\d{3})+").expect("valid regex"))
}

fn strip_thousands(text: &str) -> String {
    grouped_re()
        .replace_all(text, |caps: &regex::Captures| caps[0].replace(',', ""))
        .into_owned()
}

/// Does `memory` reveal `expected_value`?
pub fn has_answer_leak(
    memory: &MemoryItem,
    expected_value: &str,
    mode: LeakMode,
    window: usize,
) -> bool {
    let expected = strip_thousands(expected_value);
    let targets: Vec<f64> = expected_number_re()
        .find_iter(&expected)
        .filter_map(|m| m.as_str().trim_end_matches('.').parse::<f64>().ok())
        .collect();
    if targets.is_empty() {
        return false;
    }

    let raw = format!("{} {} {}", memory.title, memory.description, memory.content).to_lowercase();
    // "12,500" may be one number or the list "12, 500"; either reading can leak.
    let grouped = strip_thousands(&raw);
    let leaked = [grouped.as_str(), raw.as_str()]
        .into_iter()
        .any(|text| mentions_target(text, &targets, mode, window));
    leaked
}

fn mentions_target(text: &str, targets: &[f64], mode: LeakMode, window: usize) -> bool {
    for token in token_re().find_iter(text) {
        let Ok(value) = token.as_str().parse::<f64>() else {
            continue;
        };
        if !targets.contains(&value) {
            continue;
        }
        match mode {
            LeakMode::Strict => return true,
            LeakMode::Contextual => {
                let context = window_around(text, token.start(), window);
                if RESULT_KEYWORDS.iter().any(|kw| context.contains(kw)) {
                    return true;
                }
            }
        }
    }
    false
}

fn window_around(text: &str, pos: usize, window: usize) -> &str {
    let mut start = pos.saturating_sub(window);
    while !text.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (pos + window).min(text.len());
    while !text.is_char_boundary(end) {
        end += 1;
    }
    &text[start..end]
}

/// Render hits as the hint block appended to the solver's system prompt.
pub fn format_for_prompt(retrieved: &[Retrieved<'_>]) -> String {
    if retrieved.is_empty() {
        return String::new();
    }

    let mut out = String::from("## Past Strategy Hints:\n\n");
    out.push_str(
        "**Important**: These are STRATEGY hints only. Do NOT copy any numbers from them.\n\n",
    );
    for (idx, hit) in retrieved.iter().enumerate() {
        out.push_str(&format!("### Strategy {} ({}):\n", idx + 1, hit.memory.kind()));
        out.push_str(&format!("**{}**\n", hit.memory.title));
        out.push_str(&format!("{}\n\n", hit.memory.content));
    }
    out
}
