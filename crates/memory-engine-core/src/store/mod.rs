//! Storage abstraction for Memory Engine.
//!
//! The [`Store`] trait defines every persistence operation the ingestion,
//! embedding, and search pipeline needs, enabling pluggable backends
//! (embedded SQLite in the app crate, [`InMemoryStore`] here).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Invariants
//!
//! - A chunk may only be written for a file that already exists; violating
//!   writes fail with [`MemoryError::StorageConsistency`](crate::MemoryError::StorageConsistency).
//! - Deleting a file removes its chunks and every derived index row in one
//!   atomic step.
//! - Search scores are clamped to `[0.0, 1.0]`.

pub mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ChunkRecord, FileRecord, StorageStats};

/// A chunk returned from keyword or vector search with its backend score.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkMatch {
    pub chunk: ChunkRecord,
    /// Backend relevance in `[0.0, 1.0]`.
    pub score: f64,
}

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`commit_ingestion`](Store::commit_ingestion) | Upsert a file and replace its chunks atomically |
/// | [`delete_file`](Store::delete_file) | Remove a file, its chunks, and index rows |
/// | [`vector_search`](Store::vector_search) | Similarity search over chunk vectors |
/// | [`keyword_search`](Store::keyword_search) | Lexical search over chunk text |
/// | [`get_cached_embedding`](Store::get_cached_embedding) | Embedding cache lookup |
#[async_trait]
pub trait Store: Send + Sync {
    /// Short backend identifier (`"sqlite"`, `"memory"`).
    fn backend_name(&self) -> &str;

    /// Insert a new file record. Returns its id.
    async fn add_file(&self, file: &FileRecord) -> Result<String>;

    async fn get_file(&self, file_id: &str) -> Result<Option<FileRecord>>;

    async fn get_file_by_path(&self, path: &str) -> Result<Option<FileRecord>>;

    /// All files, ordered by path.
    async fn list_files(&self) -> Result<Vec<FileRecord>>;

    /// Overwrite an existing file record. `NotFound` if the id is unknown.
    async fn update_file(&self, file: &FileRecord) -> Result<()>;

    /// Delete a file with its chunks and index rows. Returns whether the
    /// file existed.
    async fn delete_file(&self, file_id: &str) -> Result<bool>;

    /// Insert one chunk. `StorageConsistency` if its file does not exist.
    async fn add_chunk(&self, chunk: &ChunkRecord) -> Result<String>;

    async fn get_chunk(&self, chunk_id: &str) -> Result<Option<ChunkRecord>>;

    /// Chunks of a file, ordered by `start_char`.
    async fn get_chunks_by_file(&self, file_id: &str) -> Result<Vec<ChunkRecord>>;

    async fn update_chunk_embedding(&self, chunk_id: &str, embedding: &[f32]) -> Result<()>;

    /// Returns the number of chunks removed.
    async fn delete_chunks_by_file(&self, file_id: &str) -> Result<usize>;

    /// Insert or update `file` and replace all of its chunks, as one atomic
    /// unit: either everything is visible afterwards or nothing changed.
    async fn commit_ingestion(&self, file: &FileRecord, chunks: &[ChunkRecord]) -> Result<()>;

    /// Top `limit` chunks by vector similarity with score ≥ `min_score`.
    async fn vector_search(
        &self,
        query: &[f32],
        limit: usize,
        min_score: f64,
    ) -> Result<Vec<ChunkMatch>>;

    /// Top `limit` chunks by lexical relevance with score ≥ `min_score`.
    async fn keyword_search(
        &self,
        query: &str,
        limit: usize,
        min_score: f64,
    ) -> Result<Vec<ChunkMatch>>;

    async fn get_cached_embedding(
        &self,
        text_hash: &str,
        provider: &str,
        model: &str,
    ) -> Result<Option<Vec<f32>>>;

    async fn cache_embedding(
        &self,
        text_hash: &str,
        provider: &str,
        model: &str,
        embedding: &[f32],
    ) -> Result<()>;

    async fn stats(&self) -> Result<StorageStats>;

    /// `true` when the backend answers a trivial query.
    async fn health_check(&self) -> bool;

    /// Release resources. Further calls may fail.
    async fn close(&self) -> Result<()>;
}

/// Lower-cased word runs of at least two characters.
///
/// Shared by the keyword backends and the keyword re-ranker so both agree
/// on what a query term is.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for word in query
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| w.chars().count() >= 2)
    {
        let word = word.to_lowercase();
        if !terms.contains(&word) {
            terms.push(word);
        }
    }
    terms
}

/// Sort matches by score descending, breaking ties by file id and offset.
pub fn rank_matches(matches: &mut [ChunkMatch]) {
    matches.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.chunk.file_id.cmp(&b.chunk.file_id))
            .then_with(|| a.chunk.start_char.cmp(&b.chunk.start_char))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_terms_dedupes_and_filters() {
        assert_eq!(
            query_terms("Python, python & a language!"),
            vec!["python".to_string(), "language".to_string()]
        );
    }

    #[test]
    fn test_query_terms_keeps_underscores() {
        assert_eq!(query_terms("snake_case x"), vec!["snake_case".to_string()]);
    }
}
