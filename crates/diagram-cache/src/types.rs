//! Cache types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of diagram a record was rendered as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagramType {
    Class,
    Sequence,
}

impl fmt::Display for DiagramType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagramType::Class => write!(f, "class"),
            DiagramType::Sequence => write!(f, "sequence"),
        }
    }
}

/// One cached diagram and its access statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    pub diagram_type: DiagramType,
    pub expression: String,
    pub created: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub access_count: u64,
    /// Storage slot holding the rendered bytes, stable for the record's lifetime
    pub slot: usize,
}

impl CacheRecord {
    /// Create a freshly admitted record
    pub fn new(diagram_type: DiagramType, expression: &str, slot: usize, now: DateTime<Utc>) -> Self {
        Self {
            diagram_type,
            expression: expression.to_string(),
            created: now,
            last_access: now,
            access_count: 1,
            slot,
        }
    }

    pub fn matches(&self, diagram_type: DiagramType, expression: &str) -> bool {
        self.diagram_type == diagram_type && self.expression == expression
    }

    /// Record a hit
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_access = now.max(self.created);
        self.access_count += 1;
    }
}

impl fmt::Display for CacheRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{}, {}, {}, {}, {}}}",
            self.diagram_type,
            ellipsis(&self.expression, 10),
            self.created,
            self.last_access,
            self.access_count
        )
    }
}

/// Shorten `s` to at most `max_chars` characters, appending "..." when cut
pub fn ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// Statistics about the cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Read-only view of a record together with its rank at snapshot time
#[derive(Debug, Clone, Serialize)]
pub struct RecordSnapshot {
    pub record: CacheRecord,
    pub rank: f64,
}

/// Result of a successful fetch
#[derive(Debug, Clone)]
pub struct Fetched {
    pub data: Vec<u8>,
    /// True when the bytes came from the cache without rendering
    pub hit: bool,
}
