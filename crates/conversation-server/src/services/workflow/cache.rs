use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::models::chat::SessionId;

use super::graph::{CompiledWorkflow, WorkflowDefinition};

/// One compiled workflow per live session, built on first use.
///
/// Build-on-miss goes through the DashMap entry API, which holds the shard
/// write lock while compiling, so concurrent first access builds exactly once.
pub struct WorkflowCache {
    definition: Arc<WorkflowDefinition>,
    compiled: DashMap<SessionId, Arc<CompiledWorkflow>>,
    builds: AtomicUsize,
}

impl WorkflowCache {
    pub fn new(definition: Arc<WorkflowDefinition>) -> Self {
        info!("Initializing workflow cache with DashMap");
        Self {
            definition,
            compiled: DashMap::new(),
            builds: AtomicUsize::new(0),
        }
    }

    pub fn get_or_create(&self, session_id: &str) -> Arc<CompiledWorkflow> {
        if let Some(hit) = self.compiled.get(session_id) {
            debug!("Workflow cache hit for session {}", session_id);
            return hit.value().clone();
        }

        self.compiled
            .entry(session_id.to_string())
            .or_insert_with(|| {
                self.builds.fetch_add(1, Ordering::Relaxed);
                debug!("Compiled workflow for session {}", session_id);
                Arc::new(self.definition.compile(session_id.to_string()))
            })
            .value()
            .clone()
    }

    /// No-op when absent
    pub fn evict(&self, session_id: &str) -> bool {
        let removed = self.compiled.remove(session_id).is_some();
        if removed {
            debug!("Evicted compiled workflow for session {}", session_id);
        }
        removed
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.compiled.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }

    /// Total compilations since startup
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::test_definition;
    use crate::services::testing::ScriptedProvider;

    #[test]
    fn test_cache_basic_operations() {
        let cache = WorkflowCache::new(test_definition(Arc::new(ScriptedProvider::echo())));

        let first = cache.get_or_create("s1");
        let again = cache.get_or_create("s1");
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.build_count(), 1);
        assert_eq!(first.session_id(), "s1");

        assert!(cache.evict("s1"));
        assert!(!cache.evict("s1"));
        assert!(cache.is_empty());

        // Rebuilt after eviction
        let rebuilt = cache.get_or_create("s1");
        assert!(!Arc::ptr_eq(&first, &rebuilt));
        assert_eq!(cache.build_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_access_builds_once() {
        let cache = Arc::new(WorkflowCache::new(test_definition(Arc::new(
            ScriptedProvider::echo(),
        ))));

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_or_create("shared") })
            })
            .collect();

        let results = futures::future::join_all(handles).await;
        let first = results[0].as_ref().unwrap().clone();
        for r in &results {
            assert!(Arc::ptr_eq(&first, r.as_ref().unwrap()));
        }
        assert_eq!(cache.build_count(), 1);
    }
}
