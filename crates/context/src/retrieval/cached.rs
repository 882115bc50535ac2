//! Response cache in front of a semantic index

use super::{IndexHit, SemanticIndex};
use async_trait::async_trait;
use proposalforge_common::cache::{content_key, CacheConfig, TtlCache};
use proposalforge_common::Result;
use std::time::Duration;

/// Wraps an index and memoizes its responses for a fixed TTL.
///
/// Keys are the content hash of the full request, so identical queries from
/// concurrent pipelines share an entry. Errors are never cached.
pub struct CachedIndex<I> {
    inner: I,
    cache: TtlCache,
}

impl<I: SemanticIndex> CachedIndex<I> {
    pub fn new(inner: I, ttl: Duration) -> Self {
        let cache = TtlCache::new(CacheConfig {
            ttl,
            name: format!("index:{}", inner.name()),
            ..CacheConfig::default()
        });
        Self { inner, cache }
    }

    pub fn inner(&self) -> &I {
        &self.inner
    }
}

#[async_trait]
impl<I: SemanticIndex> SemanticIndex for CachedIndex<I> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn search(
        &self,
        query: &str,
        k: usize,
        fetch_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<IndexHit>> {
        let key = content_key(&[
            self.inner.name(),
            query,
            &k.to_string(),
            &fetch_k.to_string(),
            &score_threshold.to_string(),
        ]);

        if let Some(hits) = self.cache.get::<Vec<IndexHit>>(&key).await {
            return Ok(hits);
        }

        let hits = self.inner.search(query, k, fetch_k, score_threshold).await?;
        self.cache.set(&key, &hits).await;
        Ok(hits)
    }
}
