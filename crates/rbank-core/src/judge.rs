//! Answer checking for GSM8K and MATH style problems.
//!
//! Predicted and gold answers arrive in several shapes: `\boxed{42}` (MATH),
//! `... #### 42` (GSM8K gold), `ANSWER: 42` (our solver format), bare
//! fractions, or free text ending in a number. Both sides are reduced to a
//! [`Number`] when possible and compared numerically, otherwise compared as
//! normalised text.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Tolerance used when at least one side is fractional.
const FLOAT_TOLERANCE: f64 = 0.01;

/// Whole values beyond this magnitude stay floats.
const MAX_EXACT_INT: f64 = 9.0e15;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn from_f64(v: f64) -> Option<Self> {
        if !v.is_finite() {
            return None;
        }
        if v.fract() == 0.0 && v.abs() < MAX_EXACT_INT {
            Some(Self::Int(v as i64))
        } else {
            Some(Self::Float(v))
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }

    pub fn matches(self, other: Number) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a == b,
            (a, b) => (a.as_f64() - b.as_f64()).abs() < FLOAT_TOLERANCE,
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}

/// Outcome of judging one answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub success: bool,
    pub predicted: String,
    pub predicted_number: Option<Number>,
    pub expected: String,
    pub expected_number: Option<Number>,
    pub reasoning: String,
}

fn boxed_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\\boxed\{([^}]+)\}").expect("valid regex"))
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Comma-grouped thousands, or a plain run of digits, optional decimals.
    RE.get_or_init(|| {
        Regex::new(r"[-+]?(?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d+)?").expect("valid regex")
    })
}

/// Judge `predicted` against `expected`.
///
/// An empty side is never correct: a missing reply or a missing reference
/// cannot be confirmed.
pub fn is_correct(predicted: &str, expected: &str) -> bool {
    match (extract_number(predicted), extract_number(expected)) {
        (Some(p), Some(e)) => p.matches(e),
        _ => {
            let predicted = normalize_text(predicted);
            let expected = normalize_text(expected);
            !predicted.is_empty() && !expected.is_empty() && predicted == expected
        }
    }
}

/// Judge and keep the parsed numbers for the result record.
pub fn evaluate(predicted: &str, expected: &str) -> Evaluation {
    let predicted_number = extract_number(predicted);
    let expected_number = extract_number(expected);
    Evaluation {
        success: is_correct(predicted, expected),
        predicted: predicted.to_string(),
        predicted_number,
        expected: expected.to_string(),
        expected_number,
        reasoning: format!(
            "Predicted: {}, Expected: {}",
            fmt_opt(predicted_number),
            fmt_opt(expected_number)
        ),
    }
}

fn fmt_opt(n: Option<Number>) -> String {
    n.map(|n| n.to_string()).unwrap_or_else(|| "none".into())
}

/// Pull the answer number out of free-form or formatted text.
pub fn extract_number(text: &str) -> Option<Number> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if text.contains("\\boxed") {
        if let Some(caps) = boxed_re().captures(text) {
            return clean_number(&caps[1]);
        }
    }

    if let Some(idx) = text.rfind("####") {
        return clean_number(text[idx + 4..].trim());
    }

    let upper = text.to_uppercase();
    if let Some(idx) = upper.rfind("ANSWER:") {
        return clean_number(upper[idx + "ANSWER:".len()..].trim());
    }

    if text.split('/').count() == 2 {
        return clean_number(text);
    }

    number_re()
        .find_iter(text)
        .last()
        .and_then(|m| clean_number(m.as_str()))
}

/// Strip formatting and parse a number, resolving simple fractions.
pub fn clean_number(text: &str) -> Option<Number> {
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, '\\' | '$' | ',' | '%'))
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }

    if let Some((num, den)) = cleaned.split_once('/') {
        if !den.contains('/') {
            if let (Ok(n), Ok(d)) = (num.trim().parse::<f64>(), den.trim().parse::<f64>()) {
                if d != 0.0 {
                    return Number::from_f64(n / d);
                }
            }
        }
    }

    cleaned.parse::<f64>().ok().and_then(Number::from_f64)
}

/// Lower-case, strip LaTeX punctuation and collapse whitespace.
pub fn normalize_text(text: &str) -> String {
    let stripped: String = text
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '\\' | '$' | '{' | '}'))
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}
