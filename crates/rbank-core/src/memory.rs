use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A reusable problem-solving strategy distilled from one model trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub title: String,
    pub description: String,
    pub content: String,
    pub source_problem_id: String,
    pub success: bool,
    #[serde(with = "iso_timestamp")]
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl MemoryItem {
    pub fn new(
        title: String,
        description: String,
        content: String,
        source_problem_id: String,
        success: bool,
    ) -> Self {
        Self {
            title,
            description,
            content,
            source_problem_id,
            success,
            created_at: Utc::now(),
            embedding: None,
        }
    }

    /// Text fed to the embedding model for this item.
    pub fn embedding_text(&self) -> String {
        format!("{}. {}", self.title, self.description)
    }

    pub fn kind(&self) -> MemoryKind {
        if self.success {
            MemoryKind::Strategy
        } else {
            MemoryKind::Lesson
        }
    }
}

/// Whether an item came from a solved problem or a failed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKind {
    Strategy,
    Lesson,
}

impl MemoryKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Strategy => "Success Strategy",
            Self::Lesson => "Lesson from Failure",
        }
    }

    pub fn marker(self) -> &'static str {
        match self {
            Self::Strategy => "✓",
            Self::Lesson => "✗",
        }
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.marker(), self.label())
    }
}

#[derive(Debug, Clone, Default)]
pub struct BankStats {
    pub total_items: usize,
    pub from_successes: usize,
    pub from_failures: usize,
    pub embedded: usize,
    pub source_problems: usize,
    pub oldest_item: Option<DateTime<Utc>>,
    pub newest_item: Option<DateTime<Utc>>,
}

/// Timestamps are written as RFC 3339 in UTC. Banks written by older tooling
/// carry naive ISO-8601 stamps without an offset; those are read as UTC.
mod iso_timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_timestamp(&raw)
            .ok_or_else(|| de::Error::custom(format!("invalid ISO-8601 timestamp: {raw}")))
    }

    pub(super) fn parse_naive(raw: &str) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|n| n.and_utc())
    }
}

/// Parse an RFC 3339 or naive ISO-8601 timestamp.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| iso_timestamp::parse_naive(raw))
}
