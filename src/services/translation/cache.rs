use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::trace;
use xxhash_rust::xxh3::xxh3_64;

use crate::core::errors::TranslationResult;
use crate::services::translation::TranslationGateway;
use crate::utils::Metrics;

/// In-memory LRU in front of any [`TranslationGateway`].
///
/// Keys are xxHash3 digests of the target language and source text. Only
/// successful translations are stored.
pub struct CachedGateway {
    inner: Arc<dyn TranslationGateway>,
    cache: Mutex<LruCache<u64, String>>,
    metrics: Option<Metrics>,
}

impl CachedGateway {
    pub fn new(
        inner: Arc<dyn TranslationGateway>,
        capacity: NonZeroUsize,
        metrics: Option<Metrics>,
    ) -> Self {
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
            metrics,
        }
    }

    /// Wrap `inner` unless `capacity` is zero
    pub fn wrap(
        inner: Arc<dyn TranslationGateway>,
        capacity: usize,
        metrics: Option<Metrics>,
    ) -> Arc<dyn TranslationGateway> {
        match NonZeroUsize::new(capacity) {
            Some(capacity) => Arc::new(Self::new(inner, capacity, metrics)),
            None => inner,
        }
    }

    pub fn generate_key(target_language: &str, text: &str) -> u64 {
        let mut hash_input = Vec::with_capacity(target_language.len() + text.len() + 1);
        hash_input.extend_from_slice(target_language.as_bytes());
        hash_input.push(0);
        hash_input.extend_from_slice(text.as_bytes());
        xxh3_64(&hash_input)
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }
}

#[async_trait]
impl TranslationGateway for CachedGateway {
    fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }

    fn target_language(&self) -> &str {
        self.inner.target_language()
    }

    async fn translate(&self, text: &str) -> TranslationResult<String> {
        let key = Self::generate_key(self.inner.target_language(), text);

        let hit = self.cache.lock().get(&key).cloned();
        if let Some(translated) = hit {
            trace!("Translation cache hit ({:016x})", key);
            if let Some(m) = &self.metrics {
                m.record_cache_hit();
            }
            return Ok(translated);
        }

        if let Some(m) = &self.metrics {
            m.record_cache_miss();
        }

        let translated = self.inner.translate(text).await?;
        self.cache.lock().put(key, translated.clone());
        Ok(translated)
    }
}
