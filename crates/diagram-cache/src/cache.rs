//! Fetch-or-render protocol on top of the slot store

use crate::error::Result;
use crate::renderer::Renderer;
use crate::store::{Lookup, SlotStore};
use crate::types::{ellipsis, CacheStats, DiagramType, Fetched, RecordSnapshot};
use crate::write_back::{WriteBack, DEFAULT_WRITE_BACK_QUEUE};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// A diagram cache in front of a [`Renderer`].
///
/// Lookups return as soon as the bytes are available; the matching
/// admit/update is queued for a background worker, so a following fetch may
/// briefly still see the previous state. When the queue is full the update is
/// dropped. Concurrent misses for one key each render the diagram.
pub struct DiagramCache {
    store: Arc<SlotStore>,
    renderer: Arc<dyn Renderer>,
    write_back: WriteBack,
}

impl DiagramCache {
    /// Create the cache and spawn its write-back worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(store: SlotStore, renderer: Arc<dyn Renderer>) -> Self {
        Self::with_queue_limit(store, renderer, DEFAULT_WRITE_BACK_QUEUE)
    }

    /// Like [`new`](Self::new), with at most `queue_limit` pending write-backs
    pub fn with_queue_limit(
        store: SlotStore,
        renderer: Arc<dyn Renderer>,
        queue_limit: usize,
    ) -> Self {
        let store = Arc::new(store);
        let write_back = WriteBack::spawn(store.clone(), queue_limit);
        Self {
            store,
            renderer,
            write_back,
        }
    }

    /// Get the rendered diagram, from the cache when possible.
    ///
    /// Renderer failures are returned unchanged and leave the cache untouched
    /// apart from the miss counter.
    pub async fn fetch(&self, diagram_type: DiagramType, expression: &str) -> Result<Fetched> {
        let fetched = match self.store.lookup(diagram_type, expression).await {
            Lookup::Hit { data, slot } => {
                let queued = self.write_back.touch(diagram_type, expression, slot);
                log_dropped(queued);
                Fetched { data, hit: true }
            }
            Lookup::Miss => {
                debug!(%diagram_type, expression = %ellipsis(expression, 10), "Rendering diagram");
                let data = self.renderer.render(diagram_type, expression).await?;
                let queued = self.write_back.admit(diagram_type, expression, data.clone());
                log_dropped(queued);
                Fetched { data, hit: false }
            }
        };

        Ok(fetched)
    }

    /// Wait for all queued admits/updates to be applied
    pub async fn flush(&self) -> Result<()> {
        self.write_back.flush().await
    }

    /// Drain pending admits/updates and stop the write-back worker
    pub async fn shutdown(&self) {
        self.write_back.shutdown().await
    }

    pub fn store(&self) -> &SlotStore {
        &self.store
    }

    pub async fn load(&self, path: &Path) -> Result<usize> {
        self.store.load(path).await
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        self.store.save(path).await
    }

    pub async fn size(&self) -> usize {
        self.store.size().await
    }

    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }

    pub async fn stats(&self) -> CacheStats {
        self.store.stats().await
    }

    pub async fn snapshot(&self, now: DateTime<Utc>) -> Vec<RecordSnapshot> {
        self.store.snapshot(now).await
    }
}

fn log_dropped(queued: Result<()>) {
    if let Err(e) = queued {
        warn!(error = %e, "Not caching diagram");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CacheError, GenerationError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Renders `<type>:<expression>` and counts invocations
    #[derive(Default)]
    struct CountingRenderer {
        calls: AtomicUsize,
    }

    impl CountingRenderer {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Renderer for CountingRenderer {
        async fn render(
            &self,
            diagram_type: DiagramType,
            expression: &str,
        ) -> std::result::Result<Vec<u8>, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{}:{}", diagram_type, expression).into_bytes())
        }
    }

    struct FailingRenderer;

    #[async_trait]
    impl Renderer for FailingRenderer {
        async fn render(
            &self,
            _diagram_type: DiagramType,
            _expression: &str,
        ) -> std::result::Result<Vec<u8>, GenerationError> {
            Err(GenerationError::new("suml exited with status 1"))
        }
    }

    async fn test_cache(dir: &Path, capacity: usize) -> (DiagramCache, Arc<CountingRenderer>) {
        let store = SlotStore::new(dir.to_path_buf(), "index", capacity);
        store.init().await.unwrap();
        let renderer = Arc::new(CountingRenderer::default());
        (DiagramCache::new(store, renderer.clone()), renderer)
    }

    async fn expressions(cache: &DiagramCache) -> Vec<String> {
        cache
            .snapshot(Utc::now())
            .await
            .into_iter()
            .map(|s| s.record.expression)
            .collect()
    }

    #[tokio::test]
    async fn test_repeated_fetch_hits_without_rendering() {
        let dir = tempdir().unwrap();
        let (cache, renderer) = test_cache(dir.path(), 4).await;

        let first = cache.fetch(DiagramType::Class, "[A]").await.unwrap();
        assert!(!first.hit);
        assert_eq!(first.data, b"class:[A]");
        cache.flush().await.unwrap();

        let second = cache.fetch(DiagramType::Class, "[A]").await.unwrap();
        assert!(second.hit);
        assert_eq!(second.data, first.data);
        cache.flush().await.unwrap();

        assert_eq!(renderer.calls(), 1);
        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);

        let snapshot = cache.snapshot(Utc::now()).await;
        assert_eq!(snapshot[0].record.access_count, 2);
    }

    #[tokio::test]
    async fn test_capacity_two_evicts_less_used_record() {
        let dir = tempdir().unwrap();
        let (cache, renderer) = test_cache(dir.path(), 2).await;

        cache.fetch(DiagramType::Class, "[A]").await.unwrap();
        cache.flush().await.unwrap();
        assert_eq!(cache.size().await, 1);

        cache.fetch(DiagramType::Class, "[B]").await.unwrap();
        cache.flush().await.unwrap();
        assert_eq!(cache.size().await, 2);

        assert!(cache.fetch(DiagramType::Class, "[A]").await.unwrap().hit);
        cache.flush().await.unwrap();
        assert_eq!(cache.size().await, 2);

        cache.fetch(DiagramType::Class, "[C]").await.unwrap();
        cache.flush().await.unwrap();

        assert_eq!(cache.size().await, 2);
        assert_eq!(expressions(&cache).await, vec!["[A]", "[C]"]);
        assert_eq!(renderer.calls(), 3);
    }

    #[tokio::test]
    async fn test_capacity_one_replaces_unconditionally() {
        let dir = tempdir().unwrap();
        let (cache, renderer) = test_cache(dir.path(), 1).await;

        cache.fetch(DiagramType::Sequence, "[A]").await.unwrap();
        cache.flush().await.unwrap();
        cache.fetch(DiagramType::Sequence, "[B]").await.unwrap();
        cache.flush().await.unwrap();
        assert_eq!(expressions(&cache).await, vec!["[B]"]);

        let again = cache.fetch(DiagramType::Sequence, "[A]").await.unwrap();
        assert!(!again.hit);
        assert_eq!(again.data, b"sequence:[A]");
        assert_eq!(renderer.calls(), 3);
    }

    #[tokio::test]
    async fn test_generation_failure_leaves_cache_untouched() {
        let dir = tempdir().unwrap();
        let store = SlotStore::new(dir.path().to_path_buf(), "index", 4);
        store.init().await.unwrap();
        let cache = DiagramCache::new(store, Arc::new(FailingRenderer));

        let err = cache.fetch(DiagramType::Class, "[A]").await.unwrap_err();
        assert!(matches!(err, CacheError::Generation(_)));
        cache.flush().await.unwrap();

        let stats = cache.stats().await;
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
        assert!(!cache.store().index_path().exists());
    }

    #[tokio::test]
    async fn test_concurrent_misses_admit_one_record() {
        let dir = tempdir().unwrap();
        let (cache, renderer) = test_cache(dir.path(), 4).await;
        let cache = Arc::new(cache);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.fetch(DiagramType::Class, "[Shared]").await.unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().data, b"class:[Shared]");
        }
        cache.flush().await.unwrap();

        assert!(renderer.calls() >= 1);
        assert_eq!(cache.size().await, 1);
        let stats = cache.stats().await;
        assert_eq!(stats.hits + stats.misses, 8);
    }

    #[tokio::test]
    async fn test_index_survives_restart() {
        let dir = tempdir().unwrap();
        {
            let (cache, _) = test_cache(dir.path(), 4).await;
            cache.fetch(DiagramType::Class, "[A]").await.unwrap();
            cache.fetch(DiagramType::Sequence, "[B]").await.unwrap();
            cache.shutdown().await;
        }

        let (cache, renderer) = test_cache(dir.path(), 4).await;
        let index = cache.store().index_path().to_path_buf();
        assert_eq!(cache.load(&index).await.unwrap(), 2);

        let fetched = cache.fetch(DiagramType::Sequence, "[B]").await.unwrap();
        assert!(fetched.hit);
        assert_eq!(fetched.data, b"sequence:[B]");
        assert_eq!(renderer.calls(), 0);
    }

    #[tokio::test]
    async fn test_full_write_back_queue_still_serves() {
        let dir = tempdir().unwrap();
        let store = SlotStore::new(dir.path().to_path_buf(), "index", 4);
        store.init().await.unwrap();
        let renderer = Arc::new(CountingRenderer::default());
        let cache = DiagramCache::with_queue_limit(store, renderer.clone(), 1);

        // neither fetch yields, so the worker has not drained the first admit
        let first = cache.fetch(DiagramType::Class, "[A]").await.unwrap();
        let second = cache.fetch(DiagramType::Class, "[B]").await.unwrap();
        assert_eq!(first.data, b"class:[A]");
        assert_eq!(second.data, b"class:[B]");

        cache.flush().await.unwrap();
        assert_eq!(expressions(&cache).await, vec!["[A]"]);
        assert_eq!(cache.stats().await.misses, 2);
    }

    #[tokio::test]
    async fn test_flush_after_shutdown_fails() {
        let dir = tempdir().unwrap();
        let (cache, _) = test_cache(dir.path(), 4).await;

        cache.shutdown().await;
        cache.shutdown().await;

        assert!(matches!(
            cache.flush().await,
            Err(CacheError::WriteBackClosed)
        ));
        // fetching still works, it just is no longer cached
        let fetched = cache.fetch(DiagramType::Class, "[A]").await.unwrap();
        assert!(!fetched.hit);
    }
}
