//! Subtree Summary Cache
//!
//! Caches `HierarchyView` results (node + descendants + count) so dashboards
//! that repeatedly render the same group structure do not rescan the store.
//!
//! # Partitioning
//!
//! Entries are partitioned by the id of the tree root they belong to. A
//! mutation invalidates only the partitions of the roots it touched: a move
//! across trees invalidates the old and the new root, nothing else. Other
//! trees keep their entries, so a busy tree never causes a global stampede.
//!
//! # Stale Fills
//!
//! Each partition carries a generation counter that every invalidation bumps.
//! A reader captures the generation before it reads from the store and the
//! fill is discarded if the generation moved in the meantime, so a view built
//! from pre-move data can never be cached after the move invalidated it.

use crate::models::HierarchyView;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct RootPartition {
    generation: u64,
    views: HashMap<String, HierarchyView>,
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub partitions: usize,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Root-partitioned cache of hierarchy views
#[derive(Debug)]
pub struct HierarchyCache {
    partitions: RwLock<HashMap<String, RootPartition>>,
    capacity_per_root: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl HierarchyCache {
    pub fn new(capacity_per_root: usize) -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
            capacity_per_root: capacity_per_root.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cached view of `node_id` in the tree rooted at `root_id`
    pub async fn get(&self, root_id: &str, node_id: &str) -> Option<HierarchyView> {
        let partitions = self.partitions.read().await;
        let hit = partitions
            .get(root_id)
            .and_then(|p| p.views.get(node_id))
            .cloned();

        if hit.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    /// Current generation of a root's partition (0 if never touched)
    pub async fn generation(&self, root_id: &str) -> u64 {
        self.partitions
            .read()
            .await
            .get(root_id)
            .map_or(0, |p| p.generation)
    }

    /// Store `view` unless its partition was invalidated after `generation`
    /// was read. Returns whether the view was cached.
    pub async fn insert_if_current(&self, view: HierarchyView, generation: u64) -> bool {
        let root_id = view.node.root_id().to_string();
        let mut partitions = self.partitions.write().await;
        let partition = partitions.entry(root_id).or_default();

        if partition.generation != generation {
            tracing::debug!(
                "HierarchyCache: discarding stale fill for {}",
                view.node.id()
            );
            return false;
        }

        // Partition full: start over rather than track recency per entry
        if partition.views.len() >= self.capacity_per_root
            && !partition.views.contains_key(view.node.id())
        {
            partition.views.clear();
        }
        partition.views.insert(view.node.id().to_string(), view);
        true
    }

    /// Drop every entry of one tree and bump its generation
    pub async fn invalidate_root(&self, root_id: &str) {
        let mut partitions = self.partitions.write().await;
        let partition = partitions.entry(root_id.to_string()).or_default();
        partition.generation += 1;
        partition.views.clear();
    }

    /// Invalidate several trees under one lock acquisition
    pub async fn invalidate_roots<'a>(&self, root_ids: impl IntoIterator<Item = &'a str>) {
        let mut partitions = self.partitions.write().await;
        for root_id in root_ids {
            let partition = partitions.entry(root_id.to_string()).or_default();
            partition.generation += 1;
            partition.views.clear();
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let partitions = self.partitions.read().await;
        CacheStats {
            partitions: partitions.values().filter(|p| !p.views.is_empty()).count(),
            entries: partitions.values().map(|p| p.views.len()).sum(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
