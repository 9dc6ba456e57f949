//! Core data models used throughout Memory Engine.
//!
//! These types represent the files, chunks, search options, and status
//! reports that flow through the ingestion and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};

/// Free-form JSON metadata attached to files, chunks, and results.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Tolerance used when checking that search weights sum to 1.0.
pub const WEIGHT_TOLERANCE: f64 = 0.001;

/// A file (or raw-text ingest) tracked by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    /// Filesystem path, or a synthetic `text_<id>` for raw-text ingests.
    pub path: String,
    /// SHA-256 hex digest of the decoded content.
    pub hash: String,
    /// Size of the decoded content in bytes.
    pub size: u64,
    /// Modification time in seconds since the Unix epoch.
    pub mtime: f64,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A contiguous slice of a file's content; the unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub file_id: String,
    /// Exactly `content[start_char..end_char]` of the owning file.
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Byte offset of the chunk start in the original content.
    pub start_char: usize,
    /// Byte offset one past the chunk end.
    pub end_char: usize,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

/// Retrieval mode for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Vector,
    Keyword,
    #[default]
    Hybrid,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Vector => "vector",
            SearchMode::Keyword => "keyword",
            SearchMode::Hybrid => "hybrid",
        }
    }
}

impl std::str::FromStr for SearchMode {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "vector" | "semantic" => Ok(SearchMode::Vector),
            "keyword" => Ok(SearchMode::Keyword),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => Err(MemoryError::Validation(format!(
                "unknown search mode '{}': use vector, keyword, or hybrid",
                other
            ))),
        }
    }
}

/// Per-query search options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    pub mode: SearchMode,
    pub max_results: usize,
    pub min_score: f64,
    pub vector_weight: Option<f64>,
    pub keyword_weight: Option<f64>,
    /// Restrict results to files with these extensions (e.g. `".md"`).
    pub file_types: Option<Vec<String>>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            mode: SearchMode::Hybrid,
            max_results: 10,
            min_score: 0.3,
            vector_weight: None,
            keyword_weight: None,
            file_types: None,
        }
    }
}

impl SearchOptions {
    pub const MAX_RESULTS_LIMIT: usize = 100;

    /// Check ranges and, when both weights are given, that they sum to 1.0.
    pub fn validate(&self) -> Result<()> {
        if self.max_results == 0 || self.max_results > Self::MAX_RESULTS_LIMIT {
            return Err(MemoryError::Validation(format!(
                "max_results must be in 1..={}, got {}",
                Self::MAX_RESULTS_LIMIT,
                self.max_results
            )));
        }
        check_unit_interval("min_score", self.min_score)?;
        if let Some(w) = self.vector_weight {
            check_unit_interval("vector_weight", w)?;
        }
        if let Some(w) = self.keyword_weight {
            check_unit_interval("keyword_weight", w)?;
        }
        if let (Some(v), Some(k)) = (self.vector_weight, self.keyword_weight) {
            validate_weights(v, k)?;
        }
        Ok(())
    }

    /// Resolve the effective `(vector, keyword)` weights.
    ///
    /// A single supplied weight implies its complement.
    pub fn weights(&self, default_vector: f64, default_keyword: f64) -> (f64, f64) {
        match (self.vector_weight, self.keyword_weight) {
            (Some(v), Some(k)) => (v, k),
            (Some(v), None) => (v, 1.0 - v),
            (None, Some(k)) => (1.0 - k, k),
            (None, None) => (default_vector, default_keyword),
        }
    }
}

pub(crate) fn check_unit_interval(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(MemoryError::Validation(format!(
            "{} must be in [0.0, 1.0], got {}",
            name, value
        )));
    }
    Ok(())
}

/// Validate a vector/keyword weight pair.
pub fn validate_weights(vector_weight: f64, keyword_weight: f64) -> Result<()> {
    check_unit_interval("vector_weight", vector_weight)?;
    check_unit_interval("keyword_weight", keyword_weight)?;
    if (vector_weight + keyword_weight - 1.0).abs() > WEIGHT_TOLERANCE {
        return Err(MemoryError::Validation(format!(
            "vector_weight + keyword_weight must equal 1.0, got {} + {} = {}",
            vector_weight,
            keyword_weight,
            vector_weight + keyword_weight
        )));
    }
    Ok(())
}

/// A ranked passage returned from a query. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub file_id: String,
    pub file_path: String,
    pub chunk_id: String,
    pub text: String,
    pub excerpt: String,
    /// Relevance score in `[0.0, 1.0]`.
    pub score: f64,
    pub start_char: usize,
    pub end_char: usize,
    pub metadata: Metadata,
}

/// Outcome of a sync or directory ingest.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncStats {
    pub files_processed: usize,
    pub files_added: usize,
    pub files_updated: usize,
    pub files_deleted: usize,
    pub chunks_created: usize,
    pub embeddings_generated: usize,
    pub processing_time_ms: f64,
    /// Per-file failures, formatted as `"<path>: <error>"`.
    pub errors: Vec<String>,
}

/// Storage-level counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StorageStats {
    pub total_files: usize,
    pub total_chunks: usize,
    pub total_embeddings: usize,
    pub cache_size: usize,
    pub storage_size_mb: f64,
    pub has_vector_index: bool,
}

/// Health and bookkeeping for one registered embedding provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub model: String,
    pub available: bool,
    pub dimensions: usize,
    pub max_tokens: usize,
    pub supports_batching: bool,
    pub failures: u32,
    pub is_primary: bool,
    pub is_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Snapshot returned by the manager's status call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryStatus {
    pub backend: String,
    pub storage_path: Option<String>,
    pub total_files: usize,
    pub total_chunks: usize,
    pub total_embeddings: usize,
    pub storage_size_mb: f64,
    pub embedding_providers: Vec<ProviderStatus>,
    pub cache_size: usize,
    pub last_sync: Option<DateTime<Utc>>,
    pub is_healthy: bool,
}

impl MemoryStatus {
    /// Status reported before `initialize()` or after `close()`.
    pub fn not_initialized() -> Self {
        Self {
            backend: "not_initialized".to_string(),
            storage_path: None,
            total_files: 0,
            total_chunks: 0,
            total_embeddings: 0,
            storage_size_mb: 0.0,
            embedding_providers: Vec::new(),
            cache_size: 0,
            last_sync: None,
            is_healthy: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_are_valid() {
        assert!(SearchOptions::default().validate().is_ok());
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let opts = SearchOptions {
            vector_weight: Some(0.6),
            keyword_weight: Some(0.3),
            ..Default::default()
        };
        assert!(matches!(opts.validate(), Err(MemoryError::Validation(_))));
    }

    #[test]
    fn test_weights_within_tolerance() {
        assert!(validate_weights(0.7, 0.3).is_ok());
        assert!(validate_weights(0.7005, 0.3).is_ok());
        assert!(validate_weights(0.71, 0.3).is_err());
    }

    #[test]
    fn test_min_score_out_of_range() {
        let opts = SearchOptions {
            min_score: 1.5,
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_max_results_bounds() {
        let zero = SearchOptions {
            max_results: 0,
            ..Default::default()
        };
        let too_many = SearchOptions {
            max_results: 101,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
        assert!(too_many.validate().is_err());
    }

    #[test]
    fn test_single_weight_implies_complement() {
        let opts = SearchOptions {
            vector_weight: Some(0.4),
            ..Default::default()
        };
        let (v, k) = opts.weights(0.7, 0.3);
        assert!((v - 0.4).abs() < 1e-9);
        assert!((k - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("hybrid".parse::<SearchMode>().unwrap(), SearchMode::Hybrid);
        assert_eq!("semantic".parse::<SearchMode>().unwrap(), SearchMode::Vector);
        assert!("fuzzy".parse::<SearchMode>().is_err());
    }
}
