//! Hierarchy Service - Organization Tree Operations
//!
//! Owns every structural rule of the three-level organization tree. The
//! service is the only code path that writes `path`, `parent_id` or
//! `org_type`; stores just persist what it plans.
//!
//! # Optimistic Concurrency
//!
//! Each mutation follows the same shape:
//!
//! 1. Read a snapshot (target node, parent, subtree) from the store
//! 2. Validate the request against the snapshot
//! 3. Submit one [`HierarchyTransaction`] whose guards pin the snapshot
//! 4. On commit: invalidate cached views of the touched trees, then publish
//!    a [`HierarchyEvent`]
//!
//! If another request committed a conflicting change between (1) and (3),
//! the store rejects the transaction and the caller gets
//! [`HierarchyServiceError::Conflict`]. Nothing is retried here.

use crate::db::{
    Guard, HierarchyEvent, HierarchyStore, HierarchyTransaction, PathRewrite, WriteOp,
};
use crate::models::{
    is_valid_segment, CreateOrgParams, HierarchyView, NodePath, OrgAttributes, OrgNode, MAX_DEPTH,
};
use crate::services::error::HierarchyServiceError;
use crate::services::hierarchy_cache::{CacheStats, HierarchyCache};
use crate::services::query_engine::QueryEngine;
use crate::services::reference_data::ReferenceLookup;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Tunables for `HierarchyService`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HierarchyConfig {
    /// Cache `get_hierarchy` results per tree root
    pub cache_enabled: bool,
    /// Views kept per tree root before the partition is reset
    pub cache_capacity_per_root: usize,
    /// Broadcast buffer; slow subscribers lag past this many events
    pub event_channel_capacity: usize,
    /// Copy the parent's industry onto children created without one
    pub inherit_industry: bool,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_capacity_per_root: 256,
            event_channel_capacity: 128,
            inherit_industry: true,
        }
    }
}

impl HierarchyConfig {
    /// Parse from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Organization hierarchy manager
///
/// Cheap to clone; clones share the store, cache and event channel.
///
/// # Examples
///
/// ```rust,no_run
/// use orgtree_core::db::MemoryStore;
/// use orgtree_core::models::{CreateOrgParams, OrgAttributes, OrgType};
/// use orgtree_core::services::HierarchyService;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), orgtree_core::services::HierarchyServiceError> {
/// let service = HierarchyService::new(Arc::new(MemoryStore::new()));
///
/// let acme = service
///     .create_node(CreateOrgParams::root(OrgAttributes::named("Acme Holdings")))
///     .await?;
/// let retail = service
///     .create_node(CreateOrgParams::child_of(acme.id(), OrgAttributes::named("Acme Retail")))
///     .await?;
///
/// assert_eq!(retail.org_type(), OrgType::Subsidiary);
/// assert_eq!(service.get_descendants(acme.id()).await?.len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct HierarchyService {
    store: Arc<dyn HierarchyStore>,
    queries: QueryEngine,
    cache: Option<Arc<HierarchyCache>>,
    references: Option<Arc<dyn ReferenceLookup>>,
    event_tx: broadcast::Sender<HierarchyEvent>,
    config: HierarchyConfig,
}

impl HierarchyService {
    /// Create a service with the default configuration
    pub fn new(store: Arc<dyn HierarchyStore>) -> Self {
        Self::with_config(store, HierarchyConfig::default())
    }

    pub fn with_config(store: Arc<dyn HierarchyStore>, config: HierarchyConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));
        let cache = config
            .cache_enabled
            .then(|| Arc::new(HierarchyCache::new(config.cache_capacity_per_root)));

        Self {
            queries: QueryEngine::new(store.clone()),
            store,
            cache,
            references: None,
            event_tx,
            config,
        }
    }

    /// Resolve inherited industries against a reference catalogue
    pub fn with_reference_lookup(mut self, references: Arc<dyn ReferenceLookup>) -> Self {
        self.references = Some(references);
        self
    }

    pub fn config(&self) -> &HierarchyConfig {
        &self.config
    }

    /// Subscribe to hierarchy events
    ///
    /// Events are sent only after the corresponding transaction committed.
    pub fn subscribe_to_events(&self) -> broadcast::Receiver<HierarchyEvent> {
        self.event_tx.subscribe()
    }

    /// Hierarchy events as a `Stream` (lagged receivers yield an error item)
    pub fn event_stream(&self) -> BroadcastStream<HierarchyEvent> {
        BroadcastStream::new(self.event_tx.subscribe())
    }

    /// `None` when caching is disabled
    pub async fn cache_stats(&self) -> Option<CacheStats> {
        match &self.cache {
            Some(cache) => Some(cache.stats().await),
            None => None,
        }
    }

    fn emit_event(&self, event: HierarchyEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    async fn invalidate_roots(&self, roots: &[&str]) {
        if let Some(cache) = &self.cache {
            cache.invalidate_roots(roots.iter().copied()).await;
        }
    }

    async fn require_node(&self, id: &str) -> Result<OrgNode, HierarchyServiceError> {
        self.store
            .get_node(id)
            .await?
            .ok_or_else(|| HierarchyServiceError::not_found(id))
    }

    /// Create an organization
    ///
    /// Without a parent the node becomes a new Parent (root). Under a parent
    /// it receives the next level's type and the parent's path plus its own
    /// id. Branches cannot have children.
    ///
    /// # Errors
    ///
    /// - `NotFound` if `parent_id` does not exist
    /// - `InvalidOperation` if the parent is a Branch, or the supplied id is
    ///   malformed or already taken
    /// - `Conflict` if the parent changed or the id was taken concurrently
    pub async fn create_node(
        &self,
        params: CreateOrgParams,
    ) -> Result<OrgNode, HierarchyServiceError> {
        let CreateOrgParams {
            id,
            parent_id,
            attributes,
        } = params;

        let id = match id {
            Some(id) => {
                if !is_valid_segment(&id) {
                    return Err(HierarchyServiceError::invalid_operation(format!(
                        "'{}' is not a valid organization id",
                        id
                    )));
                }
                if self.store.get_node(&id).await?.is_some() {
                    return Err(HierarchyServiceError::invalid_operation(format!(
                        "organization '{}' already exists",
                        id
                    )));
                }
                id
            }
            None => uuid::Uuid::new_v4().to_string(),
        };

        let now = Utc::now();
        let mut tx = HierarchyTransaction::new("create_node").guard(Guard::ExpectAbsent {
            id: id.clone(),
        });

        let node = match parent_id {
            None => OrgNode::new_root(id, attributes, now)?,
            Some(parent_id) => {
                let parent = self.require_node(&parent_id).await?;
                if !parent.org_type().can_have_children() {
                    return Err(HierarchyServiceError::invalid_operation(format!(
                        "cannot nest below branch level ('{}' is a branch)",
                        parent.id()
                    )));
                }
                let attributes = self.inherit_attributes(&parent, attributes).await;
                tx = tx.guard(Guard::version(&parent));
                OrgNode::new_child(id, &parent, attributes, now)?
            }
        };

        self.store
            .commit(tx.write(WriteOp::Insert(node.clone())))
            .await?;

        tracing::info!(
            "Created {} organization {} at {}",
            node.org_type(),
            node.id(),
            node.path()
        );

        self.invalidate_roots(&[node.root_id()]).await;
        self.emit_event(HierarchyEvent::NodeCreated { node: node.clone() });
        Ok(node)
    }

    /// Apply inheritable attributes from the parent
    ///
    /// The parent's industry is copied when the child has none and, if a
    /// catalogue is configured, the industry still resolves to an active
    /// entry. Lookup failures skip inheritance instead of failing the create.
    async fn inherit_attributes(
        &self,
        parent: &OrgNode,
        mut attributes: OrgAttributes,
    ) -> OrgAttributes {
        if !self.config.inherit_industry || attributes.industry_id.is_some() {
            return attributes;
        }
        let Some(industry_id) = parent.attributes.industry_id.as_deref() else {
            return attributes;
        };

        let inherit = match &self.references {
            None => true,
            Some(references) => match references.industry(industry_id).await {
                Ok(Some(industry)) if industry.active => true,
                Ok(_) => {
                    tracing::debug!(
                        "Not inheriting industry {} from {}: unknown or inactive",
                        industry_id,
                        parent.id()
                    );
                    false
                }
                Err(e) => {
                    tracing::warn!(
                        "Industry lookup for {} failed, skipping inheritance: {}",
                        industry_id,
                        e
                    );
                    false
                }
            },
        };

        if inherit {
            attributes.industry_id = Some(industry_id.to_string());
        }
        attributes
    }

    /// Re-parent an organization, carrying its whole subtree
    ///
    /// `new_parent_id = None` promotes the node to a Parent (root). The node
    /// and every descendant get their paths rewritten in one transaction;
    /// types are re-derived from the new depths. Moving to the current parent
    /// returns the node unchanged.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the node or the new parent does not exist
    /// - `InvalidOperation` if a Parent is moved under another node, the
    ///   target is a Branch, the target is inside the node's own subtree, or
    ///   the subtree would end up deeper than three levels
    /// - `Conflict` if the node, the new parent or any descendant changed
    ///   after it was read
    pub async fn move_node(
        &self,
        node_id: &str,
        new_parent_id: Option<&str>,
    ) -> Result<OrgNode, HierarchyServiceError> {
        let node = self.require_node(node_id).await?;

        if node.parent_id() == new_parent_id {
            tracing::debug!("move_node: {} already under {:?}", node_id, new_parent_id);
            return Ok(node);
        }

        let new_parent = match new_parent_id {
            Some(parent_id) => Some(self.require_node(parent_id).await?),
            None => None,
        };

        let new_path = match &new_parent {
            Some(parent) => {
                if node.is_root() {
                    return Err(HierarchyServiceError::invalid_operation(format!(
                        "parent organization '{}' cannot be moved under another node",
                        node_id
                    )));
                }
                if !parent.org_type().can_have_children() {
                    return Err(HierarchyServiceError::invalid_operation(format!(
                        "cannot move '{}' below branch '{}'",
                        node_id,
                        parent.id()
                    )));
                }
                if node.path().is_ancestor_or_self(parent.path()) {
                    return Err(HierarchyServiceError::invalid_operation(format!(
                        "cannot move '{}' into its own subtree",
                        node_id
                    )));
                }
                parent.path().append(node.id())?
            }
            None => NodePath::root(node.id())?,
        };

        let descendants = self.queries.descendants(&node).await?;

        let subtree_height = descendants
            .iter()
            .map(|d| d.depth() - node.depth())
            .max()
            .unwrap_or(0);
        if new_path.depth() + subtree_height > MAX_DEPTH {
            return Err(HierarchyServiceError::invalid_operation(format!(
                "moving '{}' would place its subtree below branch level",
                node_id
            )));
        }

        let old_path = node.path().clone();
        let rewritten = descendants
            .iter()
            .map(|d| -> Result<PathRewrite, HierarchyServiceError> {
                Ok(PathRewrite {
                    id: d.id().to_string(),
                    old_path: d.path().clone(),
                    new_path: d.path().replace_prefix(&old_path, &new_path)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let now = Utc::now();
        let mut moved = node.clone();
        moved.relocate(new_path.clone(), now)?;

        // Pin the snapshot: the node, its new parent and every descendant.
        // The rewrite is always submitted so a child created under the node
        // after planning is caught by the row-count check.
        let tx = HierarchyTransaction::new("move_node")
            .guard(Guard::version(&node))
            .guards(new_parent.iter().map(Guard::version))
            .guards(descendants.iter().map(Guard::version))
            .write(WriteOp::Update(moved.clone()))
            .write(WriteOp::RewritePrefix {
                old_prefix: old_path.clone(),
                new_prefix: new_path.clone(),
                expected_rows: descendants.len(),
                modified_at: now,
            });

        let receipt = self.store.commit(tx).await?;

        tracing::info!(
            "Moved {} from {} to {} ({} rows written)",
            node_id,
            old_path,
            new_path,
            receipt.rows_written
        );

        self.invalidate_roots(&[old_path.root_id(), new_path.root_id()])
            .await;
        self.emit_event(HierarchyEvent::NodeMoved {
            node: moved.clone(),
            old_path,
            rewritten,
        });
        Ok(moved)
    }

    /// Delete a childless organization
    ///
    /// # Errors
    ///
    /// - `NotFound` if the node does not exist
    /// - `InvalidOperation` if it still has direct children
    /// - `Conflict` if it changed or gained a child after it was read
    pub async fn delete_node(&self, node_id: &str) -> Result<bool, HierarchyServiceError> {
        let node = self.require_node(node_id).await?;

        let children = self.queries.count_direct_children(node_id).await?;
        if children > 0 {
            return Err(HierarchyServiceError::invalid_operation(format!(
                "cannot delete '{}': it has {} direct children",
                node_id, children
            )));
        }

        let tx = HierarchyTransaction::new("delete_node")
            .guard(Guard::version(&node))
            .guard(Guard::ExpectNoChildren {
                id: node_id.to_string(),
            })
            .write(WriteOp::Delete {
                id: node_id.to_string(),
            });
        self.store.commit(tx).await?;

        tracing::info!("Deleted organization {} at {}", node_id, node.path());

        self.invalidate_roots(&[node.root_id()]).await;
        self.emit_event(HierarchyEvent::NodeDeleted {
            id: node_id.to_string(),
            path: node.path().clone(),
        });
        Ok(true)
    }

    /// Replace an organization's descriptive attributes
    ///
    /// Structural fields are never touched.
    pub async fn update_attributes(
        &self,
        node_id: &str,
        attributes: OrgAttributes,
    ) -> Result<OrgNode, HierarchyServiceError> {
        let node = self.require_node(node_id).await?;

        let mut updated = node.clone();
        updated.replace_attributes(attributes, Utc::now());

        let tx = HierarchyTransaction::new("update_attributes")
            .guard(Guard::version(&node))
            .write(WriteOp::Update(updated.clone()));
        self.store.commit(tx).await?;

        tracing::debug!("Updated attributes of {} (v{})", node_id, updated.version());

        self.invalidate_roots(&[updated.root_id()]).await;
        self.emit_event(HierarchyEvent::AttributesUpdated {
            node: updated.clone(),
        });
        Ok(updated)
    }

    pub async fn get_node(&self, node_id: &str) -> Result<Option<OrgNode>, HierarchyServiceError> {
        Ok(self.store.get_node(node_id).await?)
    }

    /// Direct children, ordered by path
    pub async fn get_children(
        &self,
        node_id: &str,
    ) -> Result<Vec<OrgNode>, HierarchyServiceError> {
        let node = self.require_node(node_id).await?;
        Ok(self.queries.children(&node).await?)
    }

    pub async fn count_direct_children(
        &self,
        node_id: &str,
    ) -> Result<usize, HierarchyServiceError> {
        self.require_node(node_id).await?;
        Ok(self.queries.count_direct_children(node_id).await?)
    }

    /// Every strict descendant, shallowest first
    pub async fn get_descendants(
        &self,
        node_id: &str,
    ) -> Result<Vec<OrgNode>, HierarchyServiceError> {
        let node = self.require_node(node_id).await?;
        Ok(self.queries.descendants(&node).await?)
    }

    /// Every strict ancestor, nearest first
    pub async fn get_ancestors(
        &self,
        node_id: &str,
    ) -> Result<Vec<OrgNode>, HierarchyServiceError> {
        let node = self.require_node(node_id).await?;
        Ok(self.queries.ancestors(&node).await?)
    }

    /// The node with its whole subtree
    ///
    /// Served from the per-root cache when enabled.
    pub async fn get_hierarchy(
        &self,
        node_id: &str,
    ) -> Result<HierarchyView, HierarchyServiceError> {
        let node = self.require_node(node_id).await?;

        let Some(cache) = &self.cache else {
            let descendants = self.queries.descendants(&node).await?;
            return Ok(HierarchyView::new(node, descendants));
        };

        let root_id = node.root_id().to_string();
        if let Some(view) = cache.get(&root_id, node_id).await {
            return Ok(view);
        }

        // Capture the generation first, then read fresh: a mutation landing
        // after this point makes the fill stale and it is dropped.
        let generation = cache.generation(&root_id).await;
        let node = self.require_node(node_id).await?;
        let descendants = self.queries.descendants(&node).await?;
        let view = HierarchyView::new(node, descendants);

        if view.node.root_id() == root_id {
            cache.insert_if_current(view.clone(), generation).await;
        }
        Ok(view)
    }
}

#[cfg(test)]
#[path = "hierarchy_service_test.rs"]
mod hierarchy_service_test;
