//! Vector, keyword, and hybrid retrieval over a [`Store`].
//!
//! All ranking runs through the [`Store`] trait and the
//! [`EmbeddingManager`], with no database or runtime dependencies.
//!
//! # Keyword re-ranking
//!
//! Storage returns up to `2 × max_results` lexical matches. Each is
//! re-scored as
//!
//! ```text
//! 0.40 × base + 0.15 × exact_phrase + 0.20 × tf
//!     + 0.15 × coverage + 0.05 × position + 0.05 × length
//! ```
//!
//! where `exact_phrase` is 2.0 when the whole query occurs verbatim, `tf`
//! sums whole-token occurrence counts over the chunk's token count,
//! `coverage` is the fraction of query terms present, `position` averages
//! an early-first-occurrence bonus over all query terms, and `length`
//! mildly prefers short chunks. The result is
//! clamped to `[0, 1]`.
//!
//! # Hybrid merge
//!
//! 1. Run vector and keyword searches concurrently with `3 × max_results`
//!    candidates and `min_score` relaxed to `max(0.1, min_score − 0.2)`.
//! 2. Merge on `(file_id, start_char)`.
//! 3. `combined = v × wv + k × wk`, boosted by 1.1 when both modes found
//!    the chunk, capped at 1.0.
//! 4. Filter by the caller's `min_score`, sort by score (desc), file id,
//!    start offset, truncate.
//!
//! If one side fails the other side's results are returned (vector is
//! preferred); only when both fail does the error surface.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use crate::embedding_manager::EmbeddingManager;
use crate::error::{MemoryError, Result};
use crate::models::{validate_weights, ChunkRecord, Metadata, SearchMode, SearchOptions, SearchResult};
use crate::store::{query_terms, Store};

/// Target excerpt length in bytes.
const EXCERPT_LEN: usize = 200;
/// Bytes of context kept before the best term occurrence.
const EXCERPT_LEAD: usize = EXCERPT_LEN / 3;
const LENGTH_NORM: f64 = 5000.0;
const BOTH_MODES_BOOST: f64 = 1.1;
const EXACT_PHRASE_BONUS: f64 = 2.0;
/// Chunks of the source file concatenated into a "more like this" query.
const SIMILAR_QUERY_CHUNKS: usize = 3;
const SIMILAR_QUERY_MAX_BYTES: usize = 2000;

struct Candidate {
    chunk: ChunkRecord,
    score: f64,
    excerpt: String,
    metadata: Metadata,
}

/// Semantic search: embed the query and rank chunks by vector similarity.
#[derive(Clone)]
pub struct VectorSearch {
    store: Arc<dyn Store>,
    embeddings: Arc<EmbeddingManager>,
}

impl VectorSearch {
    pub fn new(store: Arc<dyn Store>, embeddings: Arc<EmbeddingManager>) -> Self {
        Self { store, embeddings }
    }

    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        options.validate()?;
        self.run(
            query,
            options.max_results,
            options.min_score,
            options.file_types.as_deref(),
        )
        .await
    }

    async fn run(
        &self,
        query: &str,
        limit: usize,
        min_score: f64,
        file_types: Option<&[String]>,
    ) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let query_vec = self.embeddings.embed_single(query).await?;
        self.run_with_vector(&query_vec, limit, min_score, file_types, None)
            .await
    }

    async fn run_with_vector(
        &self,
        query_vec: &[f32],
        limit: usize,
        min_score: f64,
        file_types: Option<&[String]>,
        exclude_file: Option<&str>,
    ) -> Result<Vec<SearchResult>> {
        // Over-fetch when results will be filtered after retrieval.
        let fetch = if file_types.is_some() || exclude_file.is_some() {
            limit * 3
        } else {
            limit
        };
        let matches = self.store.vector_search(query_vec, fetch, min_score).await?;

        let candidates = matches
            .into_iter()
            .filter(|m| exclude_file != Some(m.chunk.file_id.as_str()))
            .map(|m| {
                let mut metadata = m.chunk.metadata.clone();
                metadata.insert("search_type".to_string(), json!("vector"));
                metadata.insert("vector_score".to_string(), json!(m.score));
                Candidate {
                    excerpt: leading_excerpt(&m.chunk.text),
                    score: m.score,
                    metadata,
                    chunk: m.chunk,
                }
            })
            .collect();

        let mut results = attach_files(self.store.as_ref(), candidates, file_types).await?;
        sort_results(&mut results);
        results.truncate(limit);
        Ok(results)
    }
}

/// Lexical search with phrase, frequency, coverage, and position re-ranking.
#[derive(Clone)]
pub struct KeywordSearch {
    store: Arc<dyn Store>,
}

impl KeywordSearch {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        options.validate()?;
        self.run(
            query,
            options.max_results,
            options.min_score,
            options.file_types.as_deref(),
        )
        .await
    }

    async fn run(
        &self,
        query: &str,
        limit: usize,
        min_score: f64,
        file_types: Option<&[String]>,
    ) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let matches = self.store.keyword_search(query, limit * 2, 0.0).await?;
        let terms = query_terms(query);
        let phrase = query.trim().to_lowercase();

        let candidates = matches
            .into_iter()
            .filter_map(|m| {
                let score = rerank_score(&m.chunk.text, m.score, &terms, &phrase);
                if score < min_score {
                    return None;
                }
                let mut metadata = m.chunk.metadata.clone();
                metadata.insert("search_type".to_string(), json!("keyword"));
                metadata.insert("keyword_score".to_string(), json!(score));
                metadata.insert("base_score".to_string(), json!(m.score));
                Some(Candidate {
                    excerpt: keyword_excerpt(&m.chunk.text, &terms),
                    score,
                    metadata,
                    chunk: m.chunk,
                })
            })
            .collect();

        let mut results = attach_files(self.store.as_ref(), candidates, file_types).await?;
        sort_results(&mut results);
        results.truncate(limit);
        Ok(results)
    }
}

/// Weighted blend of [`VectorSearch`] and [`KeywordSearch`].
#[derive(Clone)]
pub struct HybridSearch {
    vector: VectorSearch,
    keyword: KeywordSearch,
    vector_weight: f64,
    keyword_weight: f64,
}

impl HybridSearch {
    /// # Errors
    ///
    /// [`MemoryError::Validation`] when the default weights are out of range
    /// or do not sum to 1.0.
    pub fn new(
        store: Arc<dyn Store>,
        embeddings: Arc<EmbeddingManager>,
        vector_weight: f64,
        keyword_weight: f64,
    ) -> Result<Self> {
        validate_weights(vector_weight, keyword_weight)?;
        Ok(Self {
            vector: VectorSearch::new(store.clone(), embeddings),
            keyword: KeywordSearch::new(store),
            vector_weight,
            keyword_weight,
        })
    }

    pub fn vector(&self) -> &VectorSearch {
        &self.vector
    }

    pub fn keyword(&self) -> &KeywordSearch {
        &self.keyword
    }

    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        options.validate()?;
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let (vw, kw) = options.weights(self.vector_weight, self.keyword_weight);
        validate_weights(vw, kw)?;

        let candidates = options.max_results * 3;
        let relaxed = (options.min_score - 0.2).max(0.1);
        let file_types = options.file_types.as_deref();

        let (vector, keyword) = futures::join!(
            self.vector.run(query, candidates, relaxed, file_types),
            self.keyword.run(query, candidates, relaxed, file_types)
        );

        match (vector, keyword) {
            (Ok(v), Ok(k)) => {
                debug!(vector = v.len(), keyword = k.len(), "merging hybrid candidates");
                Ok(merge_results(v, k, vw, kw, options))
            }
            (Ok(v), Err(e)) => {
                warn!(error = %e, "keyword search failed, degrading hybrid search to vector");
                Ok(finish(v, options))
            }
            (Err(e), Ok(k)) => {
                warn!(error = %e, "vector search failed, degrading hybrid search to keyword");
                Ok(finish(k, options))
            }
            (Err(ve), Err(ke)) => {
                warn!(vector_error = %ve, keyword_error = %ke, "hybrid search failed in both modes");
                Err(ve)
            }
        }
    }
}

/// Mode dispatcher plus "more like this" search.
#[derive(Clone)]
pub struct SearchEngine {
    store: Arc<dyn Store>,
    embeddings: Arc<EmbeddingManager>,
    hybrid: HybridSearch,
}

impl SearchEngine {
    pub fn new(
        store: Arc<dyn Store>,
        embeddings: Arc<EmbeddingManager>,
        vector_weight: f64,
        keyword_weight: f64,
    ) -> Result<Self> {
        let hybrid = HybridSearch::new(store.clone(), embeddings.clone(), vector_weight, keyword_weight)?;
        Ok(Self {
            store,
            embeddings,
            hybrid,
        })
    }

    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        match options.mode {
            SearchMode::Vector => self.hybrid.vector().search(query, options).await,
            SearchMode::Keyword => self.hybrid.keyword().search(query, options).await,
            SearchMode::Hybrid => self.hybrid.search(query, options).await,
        }
    }

    /// Chunks from other files that resemble the opening of `file_id`.
    pub async fn search_similar(
        &self,
        file_id: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        options.validate()?;
        if self.store.get_file(file_id).await?.is_none() {
            return Err(MemoryError::NotFound(format!("file {}", file_id)));
        }
        let chunks = self.store.get_chunks_by_file(file_id).await?;
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let joined = chunks
            .iter()
            .take(SIMILAR_QUERY_CHUNKS)
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let query = &joined[..floor_char_boundary(&joined, SIMILAR_QUERY_MAX_BYTES)];
        let query_vec = self.embeddings.embed_single(query).await?;

        self.hybrid
            .vector()
            .run_with_vector(
                &query_vec,
                options.max_results,
                options.min_score,
                options.file_types.as_deref(),
                Some(file_id),
            )
            .await
    }
}

/// Resolve file paths, apply the extension filter, and build results.
async fn attach_files(
    store: &dyn Store,
    candidates: Vec<Candidate>,
    file_types: Option<&[String]>,
) -> Result<Vec<SearchResult>> {
    let mut paths: HashMap<String, Option<String>> = HashMap::new();
    let mut results = Vec::with_capacity(candidates.len());

    for c in candidates {
        if !paths.contains_key(&c.chunk.file_id) {
            let path = store.get_file(&c.chunk.file_id).await?.map(|f| f.path);
            if path.is_none() {
                warn!(file_id = %c.chunk.file_id, "search hit references a missing file");
            }
            paths.insert(c.chunk.file_id.clone(), path);
        }
        let Some(path) = paths.get(&c.chunk.file_id).cloned().flatten() else {
            continue;
        };
        if let Some(types) = file_types {
            if !matches_file_type(&path, types) {
                continue;
            }
        }
        results.push(SearchResult {
            file_id: c.chunk.file_id,
            file_path: path,
            chunk_id: c.chunk.id,
            text: c.chunk.text,
            excerpt: c.excerpt,
            score: c.score.clamp(0.0, 1.0),
            start_char: c.chunk.start_char,
            end_char: c.chunk.end_char,
            metadata: c.metadata,
        });
    }
    Ok(results)
}

fn matches_file_type(path: &str, types: &[String]) -> bool {
    let Some(ext) = Path::new(path).extension().and_then(|e| e.to_str()) else {
        return false;
    };
    types
        .iter()
        .any(|t| t.trim_start_matches('.').eq_ignore_ascii_case(ext))
}

fn sort_results(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.file_id.cmp(&b.file_id))
            .then_with(|| a.start_char.cmp(&b.start_char))
    });
}

fn finish(mut results: Vec<SearchResult>, options: &SearchOptions) -> Vec<SearchResult> {
    results.retain(|r| r.score >= options.min_score);
    sort_results(&mut results);
    results.truncate(options.max_results);
    results
}

struct Merged {
    result: SearchResult,
    vector_score: f64,
    keyword_score: f64,
    in_vector: bool,
    in_keyword: bool,
}

fn merge_results(
    vector: Vec<SearchResult>,
    keyword: Vec<SearchResult>,
    vector_weight: f64,
    keyword_weight: f64,
    options: &SearchOptions,
) -> Vec<SearchResult> {
    let mut merged: HashMap<(String, usize), Merged> = HashMap::new();

    for r in vector {
        let key = (r.file_id.clone(), r.start_char);
        merged.insert(
            key,
            Merged {
                vector_score: r.score,
                keyword_score: 0.0,
                in_vector: true,
                in_keyword: false,
                result: r,
            },
        );
    }

    for r in keyword {
        let key = (r.file_id.clone(), r.start_char);
        match merged.get_mut(&key) {
            Some(m) => {
                m.keyword_score = r.score;
                m.in_keyword = true;
                if r.excerpt.contains("...") {
                    m.result.excerpt = r.excerpt;
                }
            }
            None => {
                merged.insert(
                    key,
                    Merged {
                        vector_score: 0.0,
                        keyword_score: r.score,
                        in_vector: false,
                        in_keyword: true,
                        result: r,
                    },
                );
            }
        }
    }

    let mut results: Vec<SearchResult> = merged
        .into_values()
        .map(|m| {
            let both = m.in_vector && m.in_keyword;
            let mut combined = m.vector_score * vector_weight + m.keyword_score * keyword_weight;
            if both {
                combined *= BOTH_MODES_BOOST;
            }
            let combined = combined.clamp(0.0, 1.0);

            let mut result = m.result;
            let meta = &mut result.metadata;
            meta.insert("search_type".to_string(), json!("hybrid"));
            meta.insert("vector_score".to_string(), json!(m.vector_score));
            meta.insert("keyword_score".to_string(), json!(m.keyword_score));
            meta.insert("combined_score".to_string(), json!(combined));
            meta.insert("vector_weight".to_string(), json!(vector_weight));
            meta.insert("keyword_weight".to_string(), json!(keyword_weight));
            meta.insert("appears_in_both".to_string(), json!(both));
            result.score = combined;
            result
        })
        .collect();

    results.retain(|r| r.score >= options.min_score);
    sort_results(&mut results);
    results.truncate(options.max_results);
    results
}

/// Re-score a lexical match. See the module docs for the formula.
pub fn rerank_score(text: &str, base: f64, terms: &[String], phrase: &str) -> f64 {
    if terms.is_empty() {
        return base.clamp(0.0, 1.0);
    }
    let lower = text.to_lowercase();
    let len = lower.len().max(1) as f64;
    let tokens = word_tokens(&lower);
    let total_tokens = tokens.len().max(1) as f64;

    let exact = if !phrase.is_empty() && lower.contains(phrase) {
        EXACT_PHRASE_BONUS
    } else {
        0.0
    };

    let mut tf = 0.0;
    let mut present = 0usize;
    let mut position = 0.0;
    for term in terms {
        let mut hits = tokens.iter().filter(|(_, t)| *t == term.as_str());
        let Some((first, _)) = hits.next() else {
            continue;
        };
        present += 1;
        tf += (1 + hits.count()) as f64 / total_tokens;
        position += (1.0 - *first as f64 / len).max(0.0);
    }
    let coverage = present as f64 / terms.len() as f64;
    let position = position / terms.len() as f64;
    let length = (1.0 - text.len() as f64 / LENGTH_NORM).max(0.1);

    (0.4 * base + 0.15 * exact + 0.2 * tf + 0.15 * coverage + 0.05 * position + 0.05 * length)
        .clamp(0.0, 1.0)
}

/// Word tokens with their byte offsets, split the same way as query terms.
fn word_tokens(text: &str) -> Vec<(usize, &str)> {
    let mut tokens = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        let is_word = c.is_alphanumeric() || c == '_';
        match (is_word, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                tokens.push((s, &text[s..i]));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        tokens.push((s, &text[s..]));
    }
    tokens
}

/// Excerpt of about [`EXCERPT_LEN`] bytes around the most telling term.
///
/// The best occurrence maximises `len(term) / (position + 1)`, favouring
/// long terms that appear early.
pub fn keyword_excerpt(text: &str, terms: &[String]) -> String {
    if text.len() <= EXCERPT_LEN {
        return text.to_string();
    }
    let lower = text.to_lowercase();
    // Byte positions in `lower` only map onto `text` when case folding kept
    // every length.
    let best = if lower.len() == text.len() {
        terms
            .iter()
            .filter_map(|t| {
                lower
                    .find(t.as_str())
                    .map(|p| (t.len() as f64 / (p + 1) as f64, p))
            })
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, p)| p)
            .filter(|&p| text.is_char_boundary(p))
    } else {
        None
    };
    let Some(pos) = best else {
        return leading_excerpt(text);
    };

    let mut start = floor_char_boundary(text, pos.saturating_sub(EXCERPT_LEAD));
    if start > 0 {
        if let Some((i, c)) = text[start..pos]
            .char_indices()
            .find(|(_, c)| c.is_whitespace())
        {
            start += i + c.len_utf8();
        }
    }
    let mut end = floor_char_boundary(text, (start + EXCERPT_LEN).min(text.len()));
    if end < text.len() {
        if let Some(ws) = text[start..end].rfind(char::is_whitespace) {
            if start + ws > pos {
                end = start + ws;
            }
        }
    }

    let mut out = String::with_capacity(end - start + 6);
    if start > 0 {
        out.push_str("...");
    }
    out.push_str(text[start..end].trim());
    if end < text.len() {
        out.push_str("...");
    }
    out
}

/// The first [`EXCERPT_LEN`] bytes, cut at whitespace when possible.
fn leading_excerpt(text: &str) -> String {
    if text.len() <= EXCERPT_LEN {
        return text.to_string();
    }
    let mut end = floor_char_boundary(text, EXCERPT_LEN);
    if let Some(ws) = text[..end].rfind(char::is_whitespace) {
        if ws > 0 {
            end = ws;
        }
    }
    format!("{}...", text[..end].trim_end())
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{normalize_l2, EmbeddingProvider};
    use crate::models::FileRecord;
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use chrono::Utc;

    const DIMS: usize = 64;

    /// Deterministic bag-of-words embedding: one hashed bucket per term.
    struct BagOfWords {
        fail: bool,
    }

    fn bucket(term: &str) -> usize {
        let mut h: u64 = 0xcbf29ce484222325;
        for b in term.bytes() {
            h ^= b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        (h % DIMS as u64) as usize
    }

    fn bag(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; DIMS];
        for t in query_terms(text) {
            v[bucket(&t)] += 1.0;
        }
        normalize_l2(&mut v);
        v
    }

    #[async_trait]
    impl EmbeddingProvider for BagOfWords {
        fn name(&self) -> &str {
            "bow"
        }
        fn model(&self) -> &str {
            "bow-64"
        }
        fn dimensions(&self) -> usize {
            DIMS
        }
        fn max_tokens(&self) -> usize {
            8192
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if self.fail {
                return Err(MemoryError::provider("bow", "offline"));
            }
            Ok(texts.iter().map(|t| bag(t)).collect())
        }
        async fn is_available(&self) -> bool {
            !self.fail
        }
    }

    async fn seed(store: &InMemoryStore, id: &str, path: &str, texts: &[&str]) {
        let file = FileRecord {
            id: id.to_string(),
            path: path.to_string(),
            hash: id.to_string(),
            size: 0,
            mtime: 0.0,
            metadata: Metadata::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let mut offset = 0;
        let chunks: Vec<ChunkRecord> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let c = ChunkRecord {
                    id: format!("{}-{}", id, i),
                    file_id: id.to_string(),
                    text: t.to_string(),
                    embedding: Some(bag(t)),
                    start_char: offset,
                    end_char: offset + t.len(),
                    metadata: Metadata::new(),
                    created_at: Utc::now(),
                };
                offset += t.len() + 2;
                c
            })
            .collect();
        store.commit_ingestion(&file, &chunks).await.unwrap();
    }

    async fn engine(fail: bool) -> (Arc<InMemoryStore>, SearchEngine) {
        let store = Arc::new(InMemoryStore::new());
        seed(&store, "py", "/docs/python.md", &["Python is a high-level programming language."]).await;
        seed(&store, "ml", "/docs/ml.txt", &["Machine learning uses labeled data."]).await;
        let provider: Arc<dyn EmbeddingProvider> = Arc::new(BagOfWords { fail });
        let embeddings = Arc::new(EmbeddingManager::new(vec![provider], "bow", None, None).unwrap());
        let engine = SearchEngine::new(store.clone(), embeddings, 0.7, 0.3).unwrap();
        (store, engine)
    }

    fn opts(mode: SearchMode) -> SearchOptions {
        SearchOptions {
            mode,
            min_score: 0.0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_hybrid_ranks_python_first() {
        let (_, engine) = engine(false).await;
        let results = engine
            .search("Python language", &opts(SearchMode::Hybrid))
            .await
            .unwrap();
        assert!(!results.is_empty());
        assert!(results[0].text.starts_with("Python"));
        assert_eq!(results[0].metadata["search_type"], "hybrid");
        assert_eq!(results[0].metadata["appears_in_both"], true);
        if let Some(ml) = results.iter().position(|r| r.file_id == "ml") {
            assert!(ml > 0);
        }
    }

    #[tokio::test]
    async fn test_hybrid_is_deterministic() {
        let (store, engine) = engine(false).await;
        seed(&store, "py2", "/docs/more.md", &["Python language tooling", "language of Python"]).await;
        let a = engine.search("Python language", &opts(SearchMode::Hybrid)).await.unwrap();
        let b = engine.search("Python language", &opts(SearchMode::Hybrid)).await.unwrap();
        assert_eq!(a, b);
        for w in a.windows(2) {
            assert!(w[0].score >= w[1].score);
        }
    }

    #[tokio::test]
    async fn test_invalid_weights_rejected() {
        let (_, engine) = engine(false).await;
        let options = SearchOptions {
            vector_weight: Some(0.6),
            keyword_weight: Some(0.3),
            ..Default::default()
        };
        let err = engine.search("Python", &options).await.unwrap_err();
        assert!(matches!(err, MemoryError::Validation(_)));
    }

    #[tokio::test]
    async fn test_hybrid_degrades_to_keyword() {
        let (_, engine) = engine(true).await;
        let results = engine
            .search("Python language", &opts(SearchMode::Hybrid))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].metadata["search_type"], "keyword");
    }

    #[tokio::test]
    async fn test_vector_mode_surfaces_provider_error() {
        let (_, engine) = engine(true).await;
        let err = engine
            .search("Python", &opts(SearchMode::Vector))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn test_file_type_filter() {
        let (_, engine) = engine(false).await;
        let options = SearchOptions {
            file_types: Some(vec!["txt".to_string()]),
            ..opts(SearchMode::Keyword)
        };
        let results = engine.search("machine learning", &options).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results.iter().all(|r| r.file_path.ends_with(".txt")));

        let none = engine.search("python", &options).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_search_similar_excludes_source_file() {
        let (store, engine) = engine(false).await;
        seed(&store, "py2", "/docs/py2.md", &["Python is a programming language too."]).await;
        let results = engine.search_similar("py", &opts(SearchMode::Vector)).await.unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.file_id != "py"));
        assert_eq!(results[0].file_id, "py2");

        let missing = engine.search_similar("nope", &opts(SearchMode::Vector)).await;
        assert!(matches!(missing, Err(MemoryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_empty_query_returns_nothing() {
        let (_, engine) = engine(false).await;
        assert!(engine.search("   ", &opts(SearchMode::Hybrid)).await.unwrap().is_empty());
    }

    #[test]
    fn test_rerank_prefers_exact_phrase() {
        let terms = query_terms("machine learning");
        let with_phrase = rerank_score("machine learning is fun", 0.5, &terms, "machine learning");
        let scattered = rerank_score("learning about a machine", 0.5, &terms, "machine learning");
        assert!(with_phrase > scattered);
        assert!((0.0..=1.0).contains(&with_phrase));
    }

    #[test]
    fn test_rerank_counts_whole_tokens_only() {
        let terms = vec!["py".to_string()];
        let inside_word = rerank_score("python python python", 0.5, &terms, "py");
        let whole_token = rerank_score("py python python", 0.5, &terms, "py");
        assert!(whole_token > inside_word);
        assert_eq!(word_tokens("py, python!"), vec![(0, "py"), (4, "python")]);
    }

    #[test]
    fn test_rerank_position_averages_over_all_terms() {
        let terms = query_terms("alpha zulu");
        let base = 0.5;
        let one = rerank_score("alpha", base, &terms, "alpha zulu");
        // alpha at offset 0: coverage 0.5, tf 1.0, position 1.0 / 2.
        let length = (1.0 - 5.0 / LENGTH_NORM).max(0.1);
        let expected = 0.4 * base + 0.2 * 1.0 + 0.15 * 0.5 + 0.05 * 0.5 + 0.05 * length;
        assert!((one - expected).abs() < 1e-9, "{} vs {}", one, expected);
    }

    #[test]
    fn test_rerank_without_terms_keeps_base() {
        assert_eq!(rerank_score("a b c", 0.42, &[], "a"), 0.42);
    }

    #[test]
    fn test_keyword_excerpt_centres_on_term() {
        let filler = "lorem ipsum dolor sit amet ".repeat(20);
        let text = format!("{}the rustacean appears here {}", filler, filler);
        let terms = query_terms("rustacean");
        let excerpt = keyword_excerpt(&text, &terms);
        assert!(excerpt.starts_with("..."));
        assert!(excerpt.ends_with("..."));
        assert!(excerpt.contains("rustacean"));
        assert!(excerpt.len() <= EXCERPT_LEN + 6);
    }

    #[test]
    fn test_short_text_excerpt_is_whole() {
        let terms = query_terms("short");
        assert_eq!(keyword_excerpt("short text", &terms), "short text");
    }

    #[test]
    fn test_leading_excerpt_cuts_at_whitespace() {
        let text = "word ".repeat(100);
        let excerpt = leading_excerpt(&text);
        assert!(excerpt.ends_with("word..."));
        assert!(excerpt.len() <= EXCERPT_LEN + 3);
    }
}
