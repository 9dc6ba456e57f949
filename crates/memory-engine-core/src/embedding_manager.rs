//! Embedding orchestration: provider failover, failure bookkeeping, and the
//! embedding cache.
//!
//! The [`EmbeddingManager`] owns every registered [`EmbeddingProvider`] and
//! routes each batch through a fallback chain:
//!
//! 1. the primary provider,
//! 2. the configured fallback, if it differs from the primary,
//! 3. every other registered provider, in registration order.
//!
//! Providers that are unhealthy or have failed [`MAX_FAILURES`] times are
//! skipped until [`EmbeddingManager::reset_failures`] is called. When a
//! cache store is attached, texts already embedded under the primary
//! provider's `(name, model)` are served from it and only the misses are
//! sent down the chain.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::chunk::content_hash;
use crate::embedding::EmbeddingProvider;
use crate::error::{MemoryError, Result};
use crate::models::ProviderStatus;
use crate::store::Store;

/// Failures after which a provider is taken out of the chain.
pub const MAX_FAILURES: u32 = 2;

#[derive(Debug, Clone)]
struct ProviderState {
    failures: u32,
    healthy: bool,
    last_error: Option<String>,
}

impl Default for ProviderState {
    fn default() -> Self {
        Self {
            failures: 0,
            healthy: true,
            last_error: None,
        }
    }
}

/// Routes embedding requests across providers with caching and failover.
pub struct EmbeddingManager {
    providers: Vec<Arc<dyn EmbeddingProvider>>,
    primary: String,
    fallback: Option<String>,
    cache: Option<Arc<dyn Store>>,
    state: Mutex<HashMap<String, ProviderState>>,
}

impl EmbeddingManager {
    /// # Errors
    ///
    /// [`MemoryError::Validation`] when `providers` is empty, names repeat, or
    /// `primary` / `fallback` is not a registered provider name.
    pub fn new(
        providers: Vec<Arc<dyn EmbeddingProvider>>,
        primary: &str,
        fallback: Option<&str>,
        cache: Option<Arc<dyn Store>>,
    ) -> Result<Self> {
        if providers.is_empty() {
            return Err(MemoryError::Validation(
                "at least one embedding provider is required".to_string(),
            ));
        }
        let mut state = HashMap::new();
        for p in &providers {
            if state
                .insert(p.name().to_string(), ProviderState::default())
                .is_some()
            {
                return Err(MemoryError::Validation(format!(
                    "embedding provider '{}' registered twice",
                    p.name()
                )));
            }
        }
        for name in std::iter::once(primary).chain(fallback) {
            if !state.contains_key(name) {
                return Err(MemoryError::Validation(format!(
                    "embedding provider '{}' is not configured",
                    name
                )));
            }
        }
        Ok(Self {
            providers,
            primary: primary.to_string(),
            fallback: fallback.map(str::to_string),
            cache,
            state: Mutex::new(state),
        })
    }

    fn state(&self) -> MutexGuard<'_, HashMap<String, ProviderState>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn provider(&self, name: &str) -> Option<&Arc<dyn EmbeddingProvider>> {
        self.providers.iter().find(|p| p.name() == name)
    }

    pub fn primary(&self) -> &Arc<dyn EmbeddingProvider> {
        // `new` guarantees the primary is registered.
        self.provider(&self.primary).unwrap_or(&self.providers[0])
    }

    /// Vector length produced by the primary provider.
    pub fn dimensions(&self) -> usize {
        self.primary().dimensions()
    }

    /// Probe every provider and record whether it is ready.
    pub async fn initialize(&self) {
        for p in &self.providers {
            let ok = p.is_available().await;
            if ok {
                info!(provider = %p.name(), model = %p.model(), "embedding provider ready");
            } else {
                warn!(provider = %p.name(), "embedding provider not available");
            }
            self.state()
                .entry(p.name().to_string())
                .or_default()
                .healthy = ok;
        }
    }

    /// Registered, last known healthy, and under the failure threshold.
    pub fn is_available(&self, name: &str) -> bool {
        self.state()
            .get(name)
            .is_some_and(|s| s.healthy && s.failures < MAX_FAILURES)
    }

    /// Provider names in the order a request tries them.
    pub fn fallback_chain(&self) -> Vec<String> {
        let mut chain = vec![self.primary.clone()];
        if let Some(fb) = &self.fallback {
            if *fb != self.primary {
                chain.push(fb.clone());
            }
        }
        for p in &self.providers {
            if !chain.iter().any(|n| n == p.name()) {
                chain.push(p.name().to_string());
            }
        }
        chain
    }

    fn record_failure(&self, name: &str, error: &MemoryError) {
        let mut state = self.state();
        let entry = state.entry(name.to_string()).or_default();
        entry.failures += 1;
        entry.last_error = Some(error.to_string());
        if entry.failures >= MAX_FAILURES {
            warn!(provider = %name, failures = entry.failures, "embedding provider disabled after repeated failures");
        }
    }

    fn record_success(&self, name: &str) {
        if let Some(entry) = self.state().get_mut(name) {
            entry.failures = 0;
            entry.last_error = None;
        }
    }

    /// Embed `texts`, returning one vector per input in input order.
    ///
    /// # Errors
    ///
    /// [`MemoryError::ProviderUnavailable`] when every provider in the chain
    /// failed or was skipped.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut out: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let hashes: Vec<String> = texts.iter().map(|t| content_hash(t)).collect();

        if let Some(cache) = &self.cache {
            let primary = self.primary();
            for (slot, hash) in out.iter_mut().zip(&hashes) {
                match cache
                    .get_cached_embedding(hash, primary.name(), primary.model())
                    .await
                {
                    Ok(hit) => *slot = hit,
                    Err(e) => warn!(error = %e, "embedding cache lookup failed"),
                }
            }
        }

        let misses: Vec<usize> = (0..texts.len()).filter(|&i| out[i].is_none()).collect();
        if misses.is_empty() {
            debug!(count = texts.len(), "all embeddings served from cache");
        } else {
            let batch: Vec<String> = misses.iter().map(|&i| texts[i].clone()).collect();
            let (producer, vectors) = self.embed_with_fallback(&batch).await?;

            if let Some(cache) = &self.cache {
                for (&i, v) in misses.iter().zip(&vectors) {
                    if let Err(e) = cache
                        .cache_embedding(&hashes[i], producer.name(), producer.model(), v)
                        .await
                    {
                        warn!(error = %e, "failed to cache embedding");
                    }
                }
            }
            for (i, v) in misses.into_iter().zip(vectors) {
                out[i] = Some(v);
            }
        }

        Ok(out.into_iter().flatten().collect())
    }

    pub async fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| MemoryError::ProviderUnavailable("empty embedding response".to_string()))
    }

    async fn embed_with_fallback(
        &self,
        texts: &[String],
    ) -> Result<(Arc<dyn EmbeddingProvider>, Vec<Vec<f32>>)> {
        let mut last_error: Option<String> = None;

        for name in self.fallback_chain() {
            if !self.is_available(&name) {
                debug!(provider = %name, "skipping unavailable embedding provider");
                continue;
            }
            let Some(provider) = self.provider(&name).cloned() else {
                continue;
            };

            match provider.embed(texts).await {
                Ok(vectors) if vectors.len() == texts.len() => {
                    self.record_success(&name);
                    if name != self.primary {
                        info!(provider = %name, count = texts.len(), "embedded with fallback provider");
                    }
                    return Ok((provider, vectors));
                }
                Ok(vectors) => {
                    let err = MemoryError::provider(
                        &name,
                        format!("returned {} vectors for {} texts", vectors.len(), texts.len()),
                    );
                    warn!(provider = %name, error = %err, "embedding provider failed");
                    self.record_failure(&name, &err);
                    last_error = Some(err.to_string());
                }
                Err(err) => {
                    warn!(provider = %name, error = %err, "embedding provider failed");
                    self.record_failure(&name, &err);
                    last_error = Some(err.to_string());
                }
            }
        }

        Err(MemoryError::ProviderUnavailable(
            last_error.unwrap_or_else(|| "all embedding providers are disabled".to_string()),
        ))
    }

    /// Clear failure counters (for one provider or all) and re-probe them.
    pub async fn reset_failures(&self, name: Option<&str>) {
        let targets: Vec<Arc<dyn EmbeddingProvider>> = self
            .providers
            .iter()
            .filter(|p| name.map_or(true, |n| n == p.name()))
            .cloned()
            .collect();
        for p in targets {
            let healthy = p.is_available().await;
            let mut state = self.state();
            let entry = state.entry(p.name().to_string()).or_default();
            entry.failures = 0;
            entry.last_error = None;
            entry.healthy = healthy;
            info!(provider = %p.name(), healthy, "embedding provider failures reset");
        }
    }

    pub fn failures(&self, name: &str) -> u32 {
        self.state().get(name).map(|s| s.failures).unwrap_or(0)
    }

    pub fn provider_status(&self) -> Vec<ProviderStatus> {
        let state = self.state();
        self.providers
            .iter()
            .map(|p| {
                let s = state.get(p.name()).cloned().unwrap_or_default();
                ProviderStatus {
                    name: p.name().to_string(),
                    model: p.model().to_string(),
                    available: s.healthy && s.failures < MAX_FAILURES,
                    dimensions: p.dimensions(),
                    max_tokens: p.max_tokens(),
                    supports_batching: p.supports_batching(),
                    failures: s.failures,
                    is_primary: p.name() == self.primary,
                    is_fallback: self.fallback.as_deref() == Some(p.name()),
                    error: s.last_error,
                }
            })
            .collect()
    }
}
