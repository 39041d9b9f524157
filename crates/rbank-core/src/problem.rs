use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{RbankError, RbankResult};

/// One dataset record (GSM8K or MATH, already flattened by the download step).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    pub question: String,
    /// Full worked solution from the dataset.
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub expected_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl Problem {
    pub fn expected(&self) -> &str {
        self.expected_value.as_deref().unwrap_or("")
    }
}

pub fn load_problems(path: &Path) -> RbankResult<Vec<Problem>> {
    if !path.exists() {
        return Err(RbankError::NotFound(format!(
            "problem file {}",
            path.display()
        )));
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| RbankError::Storage(format!("cannot read {}: {e}", path.display())))?;
    parse_problems(&raw)
}

/// Parse a problem array, dropping records that carry no usable expected value.
pub fn parse_problems(raw: &str) -> RbankResult<Vec<Problem>> {
    let all: Vec<Problem> = serde_json::from_str(raw)?;
    let total = all.len();
    let problems: Vec<Problem> = all
        .into_iter()
        .filter(|p| !p.expected().trim().is_empty())
        .collect();
    if problems.len() < total {
        warn!(
            dropped = total - problems.len(),
            "skipping problems without an expected value"
        );
    }
    Ok(problems)
}
