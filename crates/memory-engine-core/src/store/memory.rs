//! In-memory [`Store`] implementation for tests and ephemeral use.
//!
//! Uses `HashMap`s behind `std::sync::RwLock`. Vector search is brute-force
//! cosine similarity; keyword search scores a chunk by the fraction of
//! query terms it contains.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{MemoryError, Result};
use crate::models::{ChunkRecord, FileRecord, StorageStats};

use super::{query_terms, rank_matches, ChunkMatch, Store};

type CacheKey = (String, String, String);

#[derive(Default)]
struct Tables {
    files: HashMap<String, FileRecord>,
    chunks: HashMap<String, ChunkRecord>,
}

/// In-memory store. All state is lost on drop.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    cache: RwLock<HashMap<CacheKey, Vec<f32>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn missing_file(file_id: &str) -> MemoryError {
    MemoryError::StorageConsistency(format!("chunk references unknown file {}", file_id))
}

#[async_trait]
impl Store for InMemoryStore {
    fn backend_name(&self) -> &str {
        "memory"
    }

    async fn add_file(&self, file: &FileRecord) -> Result<String> {
        let mut tables = self.write();
        if tables.files.values().any(|f| f.path == file.path) {
            return Err(MemoryError::StorageConsistency(format!(
                "a file with path {} already exists",
                file.path
            )));
        }
        tables.files.insert(file.id.clone(), file.clone());
        Ok(file.id.clone())
    }

    async fn get_file(&self, file_id: &str) -> Result<Option<FileRecord>> {
        Ok(self.read().files.get(file_id).cloned())
    }

    async fn get_file_by_path(&self, path: &str) -> Result<Option<FileRecord>> {
        Ok(self.read().files.values().find(|f| f.path == path).cloned())
    }

    async fn list_files(&self) -> Result<Vec<FileRecord>> {
        let mut files: Vec<FileRecord> = self.read().files.values().cloned().collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    async fn update_file(&self, file: &FileRecord) -> Result<()> {
        let mut tables = self.write();
        match tables.files.get_mut(&file.id) {
            Some(existing) => {
                *existing = file.clone();
                Ok(())
            }
            None => Err(MemoryError::NotFound(format!("file {}", file.id))),
        }
    }

    async fn delete_file(&self, file_id: &str) -> Result<bool> {
        let mut tables = self.write();
        let existed = tables.files.remove(file_id).is_some();
        tables.chunks.retain(|_, c| c.file_id != file_id);
        Ok(existed)
    }

    async fn add_chunk(&self, chunk: &ChunkRecord) -> Result<String> {
        let mut tables = self.write();
        if !tables.files.contains_key(&chunk.file_id) {
            return Err(missing_file(&chunk.file_id));
        }
        tables.chunks.insert(chunk.id.clone(), chunk.clone());
        Ok(chunk.id.clone())
    }

    async fn get_chunk(&self, chunk_id: &str) -> Result<Option<ChunkRecord>> {
        Ok(self.read().chunks.get(chunk_id).cloned())
    }

    async fn get_chunks_by_file(&self, file_id: &str) -> Result<Vec<ChunkRecord>> {
        let mut chunks: Vec<ChunkRecord> = self
            .read()
            .chunks
            .values()
            .filter(|c| c.file_id == file_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| (c.start_char, c.end_char));
        Ok(chunks)
    }

    async fn update_chunk_embedding(&self, chunk_id: &str, embedding: &[f32]) -> Result<()> {
        let mut tables = self.write();
        match tables.chunks.get_mut(chunk_id) {
            Some(chunk) => {
                chunk.embedding = Some(embedding.to_vec());
                Ok(())
            }
            None => Err(MemoryError::NotFound(format!("chunk {}", chunk_id))),
        }
    }

    async fn delete_chunks_by_file(&self, file_id: &str) -> Result<usize> {
        let mut tables = self.write();
        let before = tables.chunks.len();
        tables.chunks.retain(|_, c| c.file_id != file_id);
        Ok(before - tables.chunks.len())
    }

    async fn commit_ingestion(&self, file: &FileRecord, chunks: &[ChunkRecord]) -> Result<()> {
        if let Some(bad) = chunks.iter().find(|c| c.file_id != file.id) {
            return Err(missing_file(&bad.file_id));
        }
        // Single write guard: readers see the old state or the new one.
        let mut tables = self.write();
        if tables
            .files
            .values()
            .any(|f| f.path == file.path && f.id != file.id)
        {
            return Err(MemoryError::StorageConsistency(format!(
                "path {} is owned by another file",
                file.path
            )));
        }
        tables.files.insert(file.id.clone(), file.clone());
        tables.chunks.retain(|_, c| c.file_id != file.id);
        for chunk in chunks {
            tables.chunks.insert(chunk.id.clone(), chunk.clone());
        }
        Ok(())
    }

    async fn vector_search(
        &self,
        query: &[f32],
        limit: usize,
        min_score: f64,
    ) -> Result<Vec<ChunkMatch>> {
        let tables = self.read();
        let mut matches: Vec<ChunkMatch> = tables
            .chunks
            .values()
            .filter_map(|c| {
                let embedding = c.embedding.as_deref()?;
                let score = (cosine_similarity(query, embedding) as f64).clamp(0.0, 1.0);
                (score >= min_score && score > 0.0).then(|| ChunkMatch {
                    chunk: c.clone(),
                    score,
                })
            })
            .collect();
        rank_matches(&mut matches);
        matches.truncate(limit);
        Ok(matches)
    }

    async fn keyword_search(
        &self,
        query: &str,
        limit: usize,
        min_score: f64,
    ) -> Result<Vec<ChunkMatch>> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let tables = self.read();
        let mut matches: Vec<ChunkMatch> = tables
            .chunks
            .values()
            .filter_map(|c| {
                let lower = c.text.to_lowercase();
                let present = terms.iter().filter(|t| lower.contains(t.as_str())).count();
                let score = present as f64 / terms.len() as f64;
                (present > 0 && score >= min_score).then(|| ChunkMatch {
                    chunk: c.clone(),
                    score,
                })
            })
            .collect();
        rank_matches(&mut matches);
        matches.truncate(limit);
        Ok(matches)
    }

    async fn get_cached_embedding(
        &self,
        text_hash: &str,
        provider: &str,
        model: &str,
    ) -> Result<Option<Vec<f32>>> {
        let key = (text_hash.to_string(), provider.to_string(), model.to_string());
        Ok(self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned())
    }

    async fn cache_embedding(
        &self,
        text_hash: &str,
        provider: &str,
        model: &str,
        embedding: &[f32],
    ) -> Result<()> {
        let key = (text_hash.to_string(), provider.to_string(), model.to_string());
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, embedding.to_vec());
        Ok(())
    }

    async fn stats(&self) -> Result<StorageStats> {
        let tables = self.read();
        let cache_size = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        Ok(StorageStats {
            total_files: tables.files.len(),
            total_chunks: tables.chunks.len(),
            total_embeddings: tables
                .chunks
                .values()
                .filter(|c| c.embedding.is_some())
                .count(),
            cache_size,
            storage_size_mb: 0.0,
            has_vector_index: false,
        })
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
