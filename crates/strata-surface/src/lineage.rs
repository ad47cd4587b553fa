//! Lineage graph accessor
//!
//! Facts form a forest per tenant: `uploaded` files are roots, parsed and
//! embedded files hang below the file they were derived from. Each fact is
//! stored as its own state entry, so a link touches two entries.
//!
//! # Consistency
//!
//! - Writes to one fact are serialized by a per-(tenant, file) async lock.
//!   A link takes both locks in key order. Lock entries live only while
//!   someone holds or waits on them.
//! - Every write is a compare-and-write on [`LineageFact::version`], executed
//!   by the backend as one conditional write, so surfaces sharing a backend
//!   see [`LineageError::VersionConflict`] instead of losing an update.
//! - If the parent write of a link fails after the child write succeeded,
//!   the child is restored.
//! - Anything left asymmetric by a crash between the two writes is repaired
//!   by [`LineageGraph::reconcile`].

use crate::error::LineageError;
use crate::surface::StateSurface;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use strata_core::{FileType, LineageChain, LineageFact, Metadata, StateKind};
use strata_store::{LineageExpirySink, StoreError, StoreResult};
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockTable = DashMap<(String, String), Arc<Mutex<()>>>;

/// Held lock on one fact; evicts its table entry once nobody else wants it
struct FactGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    table: &'a LockTable,
    key: (String, String),
}

impl Drop for FactGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.table
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Relationship used when neither the caller nor the file type names one
pub const DEFAULT_RELATIONSHIP: &str = "derived_from";

/// Lineage result type
pub type LineageResult<T> = Result<T, LineageError>;

/// Outcome of a [`LineageGraph::reconcile`] pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub facts_scanned: usize,
    /// Repairs applied, one line each
    pub repaired: Vec<String>,
    /// Inconsistencies left for an operator
    pub conflicts: Vec<String>,
}

impl ReconcileReport {
    #[inline]
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.repaired.is_empty() && self.conflicts.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Repair {
    AddChild {
        parent: String,
        child: String,
        relationship: String,
    },
    SetParent {
        child: String,
        parent: String,
    },
}

/// Read and write access to lineage facts
pub struct LineageGraph {
    surface: Arc<StateSurface>,
    locks: LockTable,
}

impl LineageGraph {
    #[must_use]
    pub fn new(surface: Arc<StateSurface>) -> Self {
        Self {
            surface,
            locks: DashMap::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn surface(&self) -> &Arc<StateSurface> {
        &self.surface
    }

    // ------------------------------------------------------------------
    // Storage primitives
    // ------------------------------------------------------------------

    async fn lock(&self, tenant_id: &str, file_id: &str) -> FactGuard<'_> {
        let key = (tenant_id.to_string(), file_id.to_string());
        let lock = self.locks.entry(key.clone()).or_default().value().clone();
        FactGuard {
            guard: Some(lock.lock_owned().await),
            table: &self.locks,
            key,
        }
    }

    async fn lock_pair(&self, tenant_id: &str, a: &str, b: &str) -> (FactGuard<'_>, FactGuard<'_>) {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        let first = self.lock(tenant_id, first).await;
        let second = self.lock(tenant_id, second).await;
        (first, second)
    }

    /// Stored fact, if any
    ///
    /// # Errors
    /// Returns [`LineageError::Storage`] for a malformed id or corrupt entry.
    pub async fn get_fact(&self, file_id: &str, tenant_id: &str) -> LineageResult<Option<LineageFact>> {
        Ok(self.surface.get_record(tenant_id, file_id).await?)
    }

    async fn require(&self, file_id: &str, tenant_id: &str) -> LineageResult<LineageFact> {
        self.get_fact(file_id, tenant_id)
            .await?
            .ok_or_else(|| LineageError::NotFound {
                file_id: file_id.to_string(),
                tenant_id: tenant_id.to_string(),
            })
    }

    /// Write `fact` if the stored version still equals `fact.version`
    ///
    /// The caller holds the fact's lock, so a mismatch means a writer on
    /// another surface got there first.
    async fn compare_and_write(&self, mut fact: LineageFact) -> LineageResult<LineageFact> {
        let expected = fact.version;
        fact.touch();
        let written = self
            .surface
            .set_record_if_version(&fact.tenant_id, &fact.file_id, fact.clone(), expected)
            .await?;
        if written {
            return Ok(fact);
        }

        let found = self
            .get_fact(&fact.file_id, &fact.tenant_id)
            .await?
            .map_or(0, |current| current.version);
        Err(LineageError::VersionConflict {
            file_id: fact.file_id,
            expected,
            found,
        })
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Record a file's lineage
    ///
    /// Recording the same `(file_type, parent)` again returns the stored
    /// fact. With a parent, the fact is linked to it using the file type's
    /// default relationship.
    ///
    /// # Errors
    /// - [`LineageError::InvalidParent`]: an uploaded file with a parent
    /// - [`LineageError::SelfLink`]: a file naming itself as parent
    /// - [`LineageError::NotFound`]: the parent has no fact
    /// - [`LineageError::AlreadyRecorded`]: a different fact exists
    pub async fn record_lineage(
        &self,
        file_id: &str,
        file_type: FileType,
        ui_name: &str,
        tenant_id: &str,
        parent_file_id: Option<&str>,
        metadata: Metadata,
    ) -> LineageResult<LineageFact> {
        if file_type == FileType::Uploaded && parent_file_id.is_some() {
            return Err(LineageError::InvalidParent {
                file_id: file_id.to_string(),
                reason: "uploaded files are lineage roots".to_string(),
            });
        }
        if parent_file_id == Some(file_id) {
            return Err(LineageError::SelfLink(file_id.to_string()));
        }

        {
            let _guard = self.lock(tenant_id, file_id).await;
            match self.get_fact(file_id, tenant_id).await? {
                Some(existing)
                    if existing.file_type == file_type
                        && existing.parent_file_id.as_deref() == parent_file_id =>
                {
                    tracing::debug!("Lineage for {} already recorded", file_id);
                    return Ok(existing);
                }
                // an earlier call stopped before linking; finish the link below
                Some(existing)
                    if existing.file_type == file_type
                        && existing.parent_file_id.is_none()
                        && parent_file_id.is_some() => {}
                Some(_) => return Err(LineageError::AlreadyRecorded(file_id.to_string())),
                None => {
                    if let Some(parent) = parent_file_id {
                        self.require(parent, tenant_id).await?;
                    }
                    let fact = LineageFact::new(file_id, tenant_id, file_type, ui_name, None, metadata);
                    let fact = self.compare_and_write(fact).await?;
                    tracing::info!("Recorded lineage for {} ({})", file_id, file_type);
                    if parent_file_id.is_none() {
                        return Ok(fact);
                    }
                }
            }
        }

        if let Some(parent) = parent_file_id {
            let relationship = file_type
                .default_relationship()
                .unwrap_or(DEFAULT_RELATIONSHIP);
            self.link(parent, file_id, relationship, tenant_id).await?;
        }
        self.require(file_id, tenant_id).await
    }

    /// Link `child` below `parent`
    ///
    /// Re-linking an existing pair is a no-op; an empty `relationship_type`
    /// uses the child's default relationship.
    ///
    /// # Errors
    /// - [`LineageError::SelfLink`]: parent and child are the same file
    /// - [`LineageError::NotFound`]: either fact is missing
    /// - [`LineageError::InvalidParent`]: the child is an uploaded file
    /// - [`LineageError::ParentConflict`]: the child has another parent
    /// - [`LineageError::CycleDetected`]: the child is an ancestor of the parent
    /// - [`LineageError::VersionConflict`]: a concurrent writer got there first
    pub async fn link(
        &self,
        parent_file_id: &str,
        child_file_id: &str,
        relationship_type: &str,
        tenant_id: &str,
    ) -> LineageResult<()> {
        if parent_file_id == child_file_id {
            return Err(LineageError::SelfLink(child_file_id.to_string()));
        }

        let _guards = self.lock_pair(tenant_id, parent_file_id, child_file_id).await;
        let mut parent = self.require(parent_file_id, tenant_id).await?;
        let child = self.require(child_file_id, tenant_id).await?;

        if child.file_type == FileType::Uploaded {
            return Err(LineageError::InvalidParent {
                file_id: child_file_id.to_string(),
                reason: "uploaded files are lineage roots".to_string(),
            });
        }
        if let Some(existing) = child.parent_file_id.as_deref() {
            if existing != parent_file_id {
                return Err(LineageError::ParentConflict {
                    child: child_file_id.to_string(),
                    existing: existing.to_string(),
                    requested: parent_file_id.to_string(),
                });
            }
        }

        let relationship = if relationship_type.is_empty() {
            child
                .file_type
                .default_relationship()
                .unwrap_or(DEFAULT_RELATIONSHIP)
        } else {
            relationship_type
        };

        let child_linked = child.parent_file_id.as_deref() == Some(parent_file_id);
        if !child_linked {
            self.ensure_acyclic(parent_file_id, child_file_id, tenant_id)
                .await?;
        }

        let child_before = child.clone();
        let written_child = if child_linked {
            None
        } else {
            let mut updated = child;
            updated.parent_file_id = Some(parent_file_id.to_string());
            Some(self.compare_and_write(updated).await?)
        };

        if parent.add_child(child_file_id, relationship) {
            if let Err(err) = self.compare_and_write(parent).await {
                if let Some(written) = written_child {
                    self.restore(child_before, written.version).await;
                }
                return Err(err);
            }
        } else if written_child.is_none() {
            tracing::debug!("{} already linked to {}", child_file_id, parent_file_id);
            return Ok(());
        }

        tracing::info!(
            "Linked {} -> {} ({}) for tenant {}",
            parent_file_id,
            child_file_id,
            relationship,
            tenant_id
        );
        Ok(())
    }

    /// Undo a child write whose partner parent write failed
    async fn restore(&self, mut before: LineageFact, written_version: u64) {
        let file_id = before.file_id.clone();
        before.version = written_version;
        match self.compare_and_write(before).await {
            Ok(_) => tracing::warn!("Restored {} after failed parent write", file_id),
            Err(err) => tracing::error!(
                "Could not restore {} after failed parent write, reconcile required: {}",
                file_id,
                err
            ),
        }
    }

    async fn ensure_acyclic(&self, parent_file_id: &str, child_file_id: &str, tenant_id: &str) -> LineageResult<()> {
        let mut path = vec![child_file_id.to_string(), parent_file_id.to_string()];
        for ancestor in self.ancestors(parent_file_id, tenant_id).await? {
            path.push(ancestor.clone());
            if ancestor == child_file_id {
                return Err(LineageError::CycleDetected { path });
            }
        }
        Ok(())
    }

    /// Stamp `source_expired_at` on one fact, keeping the earliest stamp
    ///
    /// Returns whether the fact changed.
    ///
    /// # Errors
    /// Returns [`LineageError::NotFound`] if the fact is missing.
    pub async fn stamp_source_expired(
        &self,
        file_id: &str,
        tenant_id: &str,
        at: DateTime<Utc>,
    ) -> LineageResult<bool> {
        let _guard = self.lock(tenant_id, file_id).await;
        let mut fact = self.require(file_id, tenant_id).await?;
        if !fact.stamp_source_expired(at) {
            return Ok(false);
        }
        self.compare_and_write(fact).await?;
        Ok(true)
    }

    /// Stamp a source file and everything derived from it
    ///
    /// Returns the number of facts changed.
    ///
    /// # Errors
    /// Returns [`LineageError::NotFound`] if the source fact is missing.
    pub async fn expire_source(
        &self,
        file_id: &str,
        tenant_id: &str,
        at: DateTime<Utc>,
    ) -> LineageResult<usize> {
        let mut changed = usize::from(self.stamp_source_expired(file_id, tenant_id, at).await?);
        for descendant in self.descendants(file_id, tenant_id).await? {
            match self.stamp_source_expired(&descendant, tenant_id, at).await {
                Ok(stamped) => changed += usize::from(stamped),
                Err(err) if err.is_not_found() => {
                    tracing::warn!("Descendant {} of {} has no lineage fact", descendant, file_id);
                }
                Err(err) => return Err(err),
            }
        }
        if changed > 0 {
            tracing::info!("Stamped source expiry on {} lineage facts under {}", changed, file_id);
        }
        Ok(changed)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// # Errors
    /// Returns [`LineageError::Storage`] for a malformed id or corrupt entry.
    pub async fn get_chain(&self, file_id: &str, tenant_id: &str) -> LineageResult<Option<LineageChain>> {
        Ok(self
            .get_fact(file_id, tenant_id)
            .await?
            .map(|fact| fact.chain()))
    }

    /// Parent, grandparent, ... up to the root
    ///
    /// # Errors
    /// - [`LineageError::NotFound`]: the starting fact is missing
    /// - [`LineageError::CycleDetected`]: stored parent pointers loop
    pub async fn ancestors(&self, file_id: &str, tenant_id: &str) -> LineageResult<Vec<String>> {
        let start = self.require(file_id, tenant_id).await?;
        let mut visited = HashSet::from([file_id.to_string()]);
        let mut chain = Vec::new();
        let mut next = start.parent_file_id;

        while let Some(parent) = next {
            chain.push(parent.clone());
            if !visited.insert(parent.clone()) {
                let mut path = vec![file_id.to_string()];
                path.extend(chain);
                return Err(LineageError::CycleDetected { path });
            }
            next = match self.get_fact(&parent, tenant_id).await? {
                Some(fact) => fact.parent_file_id,
                None => {
                    tracing::warn!("Ancestor {} of {} has no lineage fact", parent, file_id);
                    None
                }
            };
        }
        Ok(chain)
    }

    /// Every file derived from `file_id`, breadth first
    ///
    /// # Errors
    /// Returns [`LineageError::NotFound`] if the starting fact is missing.
    pub async fn descendants(&self, file_id: &str, tenant_id: &str) -> LineageResult<Vec<String>> {
        let start = self.require(file_id, tenant_id).await?;
        let mut visited = HashSet::from([file_id.to_string()]);
        let mut queue: VecDeque<String> = start.child_file_ids.into_iter().collect();
        let mut found = Vec::new();

        while let Some(id) = queue.pop_front() {
            if !visited.insert(id.clone()) {
                continue;
            }
            if let Some(fact) = self.get_fact(&id, tenant_id).await? {
                queue.extend(fact.child_file_ids);
            }
            found.push(id);
        }
        Ok(found)
    }

    // ------------------------------------------------------------------
    // Repair
    // ------------------------------------------------------------------

    /// Restore parent/child symmetry across a tenant's facts
    ///
    /// Repairs a child whose parent does not list it, and a listed child
    /// with no parent pointer. Anything else (missing facts, children
    /// claimed by two parents, repairs that would form a cycle) is reported
    /// as a conflict and left untouched.
    ///
    /// # Errors
    /// Returns [`LineageError::Storage`] if facts cannot be read or written.
    pub async fn reconcile(&self, tenant_id: &str) -> LineageResult<ReconcileReport> {
        let ids = self
            .surface
            .list_ids(StateKind::Lineage, tenant_id, usize::MAX)
            .await?;
        let mut facts = BTreeMap::new();
        for id in ids {
            if let Some(fact) = self.get_fact(&id, tenant_id).await? {
                facts.insert(id, fact);
            }
        }

        let mut report = ReconcileReport {
            facts_scanned: facts.len(),
            ..ReconcileReport::default()
        };
        let repairs = plan_repairs(&facts, &mut report.conflicts);

        for repair in repairs {
            match self.apply_repair(&repair, tenant_id).await {
                Ok(Some(line)) => report.repaired.push(line),
                Ok(None) => {}
                Err(err) => report.conflicts.push(format!("{repair:?}: {err}")),
            }
        }

        if report.is_clean() {
            tracing::debug!("Lineage for {} is consistent ({} facts)", tenant_id, report.facts_scanned);
        } else {
            tracing::warn!(
                tenant_id,
                repaired = report.repaired.len(),
                conflicts = report.conflicts.len(),
                "Lineage reconcile finished"
            );
        }
        Ok(report)
    }

    async fn apply_repair(&self, repair: &Repair, tenant_id: &str) -> LineageResult<Option<String>> {
        match repair {
            Repair::AddChild {
                parent,
                child,
                relationship,
            } => {
                let _guard = self.lock(tenant_id, parent).await;
                let mut fact = self.require(parent, tenant_id).await?;
                if !fact.add_child(child, relationship) {
                    return Ok(None);
                }
                self.compare_and_write(fact).await?;
                Ok(Some(format!("{parent}: added missing child {child}")))
            }
            Repair::SetParent { child, parent } => {
                let _guard = self.lock(tenant_id, child).await;
                let mut fact = self.require(child, tenant_id).await?;
                if fact.parent_file_id.is_some() {
                    return Ok(None);
                }
                fact.parent_file_id = Some(parent.clone());
                self.compare_and_write(fact).await?;
                Ok(Some(format!("{child}: restored parent {parent}")))
            }
        }
    }
}

fn plan_repairs(facts: &BTreeMap<String, LineageFact>, conflicts: &mut Vec<String>) -> Vec<Repair> {
    let mut repairs = Vec::new();

    for (id, fact) in facts {
        if let Some(parent_id) = &fact.parent_file_id {
            match facts.get(parent_id) {
                None => conflicts.push(format!("{id}: parent {parent_id} has no fact")),
                Some(parent) if !parent.child_file_ids.contains(id) => {
                    let relationship = fact
                        .file_type
                        .default_relationship()
                        .unwrap_or(DEFAULT_RELATIONSHIP);
                    repairs.push(Repair::AddChild {
                        parent: parent_id.clone(),
                        child: id.clone(),
                        relationship: relationship.to_string(),
                    });
                }
                Some(_) => {}
            }
        }

        for child_id in &fact.child_file_ids {
            match facts.get(child_id).map(|child| (child, child.parent_file_id.as_deref())) {
                None => conflicts.push(format!("{id}: child {child_id} has no fact")),
                Some((_, Some(owner))) if owner != id.as_str() => conflicts.push(format!(
                    "{child_id}: listed by {id} but parent is {owner}"
                )),
                Some((child, None)) => {
                    if child.file_type == FileType::Uploaded {
                        conflicts.push(format!("{id}: lists uploaded file {child_id} as child"));
                    } else if is_ancestor_in(facts, child_id, id) {
                        conflicts.push(format!("{id}: adopting {child_id} would form a cycle"));
                    } else {
                        repairs.push(Repair::SetParent {
                            child: child_id.clone(),
                            parent: id.clone(),
                        });
                    }
                }
                Some(_) => {}
            }
        }
    }
    repairs
}

/// Whether `candidate` is `start` or one of its ancestors in `facts`
fn is_ancestor_in(facts: &BTreeMap<String, LineageFact>, candidate: &str, start: &str) -> bool {
    let mut visited = HashSet::new();
    let mut current = Some(start);
    while let Some(id) = current {
        if id == candidate {
            return true;
        }
        if !visited.insert(id) {
            return false;
        }
        current = facts.get(id).and_then(|f| f.parent_file_id.as_deref());
    }
    false
}

impl std::fmt::Debug for LineageGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineageGraph")
            .field("surface", &self.surface)
            .field("locks", &self.locks.len())
            .finish()
    }
}

#[async_trait]
impl LineageExpirySink for LineageGraph {
    async fn stamp_source_expired(
        &self,
        file_id: &str,
        tenant_id: &str,
        expired_at: DateTime<Utc>,
    ) -> StoreResult<usize> {
        match self.expire_source(file_id, tenant_id, expired_at).await {
            Ok(changed) => Ok(changed),
            Err(err) if err.is_not_found() => {
                tracing::debug!("No lineage fact for expired source {}", file_id);
                Ok(0)
            }
            Err(err @ LineageError::VersionConflict { .. }) => Err(StoreError::Conflict(err.to_string())),
            Err(err) => Err(StoreError::Backend(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SurfaceConfig;
    use pretty_assertions::assert_eq;

    fn graph() -> LineageGraph {
        LineageGraph::new(Arc::new(StateSurface::new(SurfaceConfig::memory_only())))
    }

    async fn uploaded(graph: &LineageGraph, id: &str) -> LineageFact {
        graph
            .record_lineage(id, FileType::Uploaded, id, "acme", None, Metadata::new())
            .await
            .unwrap()
    }

    async fn derived(graph: &LineageGraph, id: &str, file_type: FileType, parent: &str) {
        graph
            .record_lineage(id, file_type, id, "acme", Some(parent), Metadata::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn record_and_read_chain() {
        let graph = graph();
        let fact = uploaded(&graph, "a").await;
        assert_eq!(fact.version, 1);

        let chain = graph.get_chain("a", "acme").await.unwrap().unwrap();
        assert_eq!(chain.file_type, FileType::Uploaded);
        assert_eq!(chain.parent_file_id, None);
        assert!(graph.get_chain("a", "other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn record_with_parent_links_both_sides() {
        let graph = graph();
        uploaded(&graph, "a").await;
        derived(&graph, "b", FileType::Parsed, "a").await;

        let parent = graph.get_chain("a", "acme").await.unwrap().unwrap();
        assert_eq!(parent.child_file_ids, vec!["b".to_string()]);
        assert_eq!(parent.relationships["b"], "parsed_from");
        let child = graph.get_chain("b", "acme").await.unwrap().unwrap();
        assert_eq!(child.parent_file_id.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn duplicate_record_is_idempotent_or_rejected() {
        let graph = graph();
        uploaded(&graph, "a").await;
        uploaded(&graph, "a2").await;
        derived(&graph, "b", FileType::Parsed, "a").await;

        let again = graph
            .record_lineage("b", FileType::Parsed, "b", "acme", Some("a"), Metadata::new())
            .await
            .unwrap();
        assert_eq!(again.parent_file_id.as_deref(), Some("a"));

        let err = graph
            .record_lineage("b", FileType::Embedded, "b", "acme", Some("a"), Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LineageError::AlreadyRecorded(_)));

        let err = graph
            .record_lineage("b", FileType::Parsed, "b", "acme", Some("a2"), Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LineageError::AlreadyRecorded(_)));
    }

    #[tokio::test]
    async fn record_rejects_invalid_parents() {
        let graph = graph();
        uploaded(&graph, "a").await;

        let err = graph
            .record_lineage("x", FileType::Uploaded, "x", "acme", Some("a"), Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LineageError::InvalidParent { .. }));

        let err = graph
            .record_lineage("x", FileType::Parsed, "x", "acme", Some("x"), Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LineageError::SelfLink(_)));

        let err = graph
            .record_lineage("x", FileType::Parsed, "x", "acme", Some("ghost"), Metadata::new())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(graph.get_fact("x", "acme").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn explicit_link_is_symmetric_and_idempotent() {
        let graph = graph();
        uploaded(&graph, "a").await;
        graph
            .record_lineage("b", FileType::Parsed, "b", "acme", None, Metadata::new())
            .await
            .unwrap();

        graph.link("a", "b", "parsed_from", "acme").await.unwrap();
        let version = graph.get_fact("a", "acme").await.unwrap().unwrap().version;
        graph.link("a", "b", "parsed_from", "acme").await.unwrap();

        let parent = graph.get_fact("a", "acme").await.unwrap().unwrap();
        assert_eq!(parent.version, version);
        assert_eq!(parent.child_file_ids.len(), 1);
        let child = graph.get_chain("b", "acme").await.unwrap().unwrap();
        assert_eq!(child.parent_file_id.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn link_rejections() {
        let graph = graph();
        uploaded(&graph, "a").await;
        uploaded(&graph, "z").await;
        derived(&graph, "b", FileType::Parsed, "a").await;
        derived(&graph, "c", FileType::Embedded, "b").await;

        assert!(matches!(
            graph.link("a", "a", "x", "acme").await.unwrap_err(),
            LineageError::SelfLink(_)
        ));
        assert!(graph.link("a", "ghost", "x", "acme").await.unwrap_err().is_not_found());
        assert!(matches!(
            graph.link("a", "z", "x", "acme").await.unwrap_err(),
            LineageError::InvalidParent { .. }
        ));
        assert!(matches!(
            graph.link("z", "b", "x", "acme").await.unwrap_err(),
            LineageError::ParentConflict { .. }
        ));
    }

    #[tokio::test]
    async fn cycle_rejected() {
        let graph = graph();
        uploaded(&graph, "root").await;
        graph
            .record_lineage("p", FileType::Parsed, "p", "acme", None, Metadata::new())
            .await
            .unwrap();
        derived(&graph, "e", FileType::Embedded, "p").await;

        let err = graph.link("e", "p", "derived_from", "acme").await.unwrap_err();
        match err {
            LineageError::CycleDetected { path } => {
                assert_eq!(path.first().map(String::as_str), Some("p"));
                assert_eq!(path.last().map(String::as_str), Some("p"));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
        assert!(graph.get_chain("p", "acme").await.unwrap().unwrap().parent_file_id.is_none());
    }

    #[tokio::test]
    async fn empty_relationship_uses_default() {
        let graph = graph();
        uploaded(&graph, "a").await;
        graph
            .record_lineage("e", FileType::Embedded, "e", "acme", None, Metadata::new())
            .await
            .unwrap();
        graph.link("a", "e", "", "acme").await.unwrap();
        let chain = graph.get_chain("a", "acme").await.unwrap().unwrap();
        assert_eq!(chain.relationships["e"], "embedded_from");
    }

    #[tokio::test]
    async fn ancestors_and_descendants() {
        let graph = graph();
        uploaded(&graph, "a").await;
        derived(&graph, "b", FileType::Parsed, "a").await;
        derived(&graph, "c", FileType::Embedded, "b").await;
        derived(&graph, "d", FileType::Embedded, "b").await;

        assert_eq!(graph.ancestors("c", "acme").await.unwrap(), vec!["b", "a"]);
        assert!(graph.ancestors("a", "acme").await.unwrap().is_empty());
        assert_eq!(graph.descendants("a", "acme").await.unwrap(), vec!["b", "c", "d"]);
        assert!(graph.descendants("ghost", "acme").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn ancestors_detect_stored_loop() {
        let graph = graph();
        let surface = graph.surface().clone();
        for (id, parent) in [("x", "y"), ("y", "x")] {
            let fact = LineageFact::new(
                id,
                "acme",
                FileType::Parsed,
                id,
                Some(parent.to_string()),
                Metadata::new(),
            );
            surface.set_record("acme", id, fact, None).await.unwrap();
        }
        let err = graph.ancestors("x", "acme").await.unwrap_err();
        assert!(matches!(err, LineageError::CycleDetected { .. }));
    }

    #[tokio::test]
    async fn stamping_keeps_earliest() {
        let graph = graph();
        uploaded(&graph, "a").await;
        let first = Utc::now();

        assert!(graph.stamp_source_expired("a", "acme", first).await.unwrap());
        assert!(!graph
            .stamp_source_expired("a", "acme", first + chrono::Duration::hours(1))
            .await
            .unwrap());
        let chain = graph.get_chain("a", "acme").await.unwrap().unwrap();
        assert_eq!(chain.source_expired_at, Some(first));
    }

    #[tokio::test]
    async fn expire_source_covers_descendants() {
        let graph = graph();
        uploaded(&graph, "a").await;
        derived(&graph, "b", FileType::Parsed, "a").await;
        derived(&graph, "c", FileType::Embedded, "b").await;

        let at = Utc::now();
        assert_eq!(graph.expire_source("a", "acme", at).await.unwrap(), 3);
        assert_eq!(graph.expire_source("a", "acme", at).await.unwrap(), 0);

        let sink: &dyn LineageExpirySink = &graph;
        assert_eq!(sink.stamp_source_expired("ghost", "acme", at).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reconcile_repairs_asymmetry() {
        let graph = graph();
        let surface = graph.surface().clone();
        uploaded(&graph, "a").await;
        uploaded(&graph, "p").await;

        // child points at a parent that does not list it
        let orphan = LineageFact::new(
            "b",
            "acme",
            FileType::Parsed,
            "b",
            Some("a".to_string()),
            Metadata::new(),
        );
        surface.set_record("acme", "b", orphan, None).await.unwrap();

        // parent lists a child whose parent pointer is empty
        let loose = LineageFact::new("c", "acme", FileType::Embedded, "c", None, Metadata::new());
        surface.set_record("acme", "c", loose, None).await.unwrap();
        let mut p = graph.get_fact("p", "acme").await.unwrap().unwrap();
        p.add_child("c", "embedded_from");
        surface.set_record("acme", "p", p, None).await.unwrap();

        let report = graph.reconcile("acme").await.unwrap();
        assert_eq!(report.facts_scanned, 4);
        assert_eq!(report.repaired.len(), 2);
        assert!(report.conflicts.is_empty());

        let a = graph.get_chain("a", "acme").await.unwrap().unwrap();
        assert_eq!(a.child_file_ids, vec!["b".to_string()]);
        let c = graph.get_chain("c", "acme").await.unwrap().unwrap();
        assert_eq!(c.parent_file_id.as_deref(), Some("p"));

        assert!(graph.reconcile("acme").await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn reconcile_reports_unrepairable() {
        let graph = graph();
        let surface = graph.surface().clone();
        let dangling = LineageFact::new(
            "b",
            "acme",
            FileType::Parsed,
            "b",
            Some("missing".to_string()),
            Metadata::new(),
        );
        surface.set_record("acme", "b", dangling, None).await.unwrap();

        let report = graph.reconcile("acme").await.unwrap();
        assert!(report.repaired.is_empty());
        assert_eq!(report.conflicts.len(), 1);
        assert!(report.conflicts[0].contains("missing"));
    }

    #[tokio::test]
    async fn concurrent_links_to_one_parent_keep_every_child() {
        let graph = Arc::new(graph());
        uploaded(&graph, "a").await;
        for i in 0..8 {
            graph
                .record_lineage(&format!("b{i}"), FileType::Parsed, "b", "acme", None, Metadata::new())
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for i in 0..8 {
            let graph = graph.clone();
            handles.push(tokio::spawn(async move {
                graph.link("a", &format!("b{i}"), "parsed_from", "acme").await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let parent = graph.get_fact("a", "acme").await.unwrap().unwrap();
        assert_eq!(parent.child_file_ids.len(), 8);
        assert!(graph.reconcile("acme").await.unwrap().is_clean());
    }

    #[tokio::test]
    async fn lock_table_drains_after_writes() {
        let graph = Arc::new(graph());
        for i in 0..100 {
            uploaded(&graph, &format!("u{i}")).await;
        }
        derived(&graph, "p", FileType::Parsed, "u0").await;
        graph.stamp_source_expired("u0", "acme", Utc::now()).await.unwrap();
        assert_eq!(graph.locks.len(), 0);

        let mut handles = Vec::new();
        for i in 1..20 {
            let graph = graph.clone();
            handles.push(tokio::spawn(async move {
                graph.expire_source(&format!("u{i}"), "acme", Utc::now()).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(graph.locks.len(), 0);
    }

    #[tokio::test]
    async fn stale_version_is_rejected() {
        let graph = graph();
        let fact = uploaded(&graph, "a").await;
        let mut stale = fact.clone();
        stale.version -= 1;

        let err = graph.compare_and_write(stale).await.unwrap_err();
        assert!(matches!(
            err,
            LineageError::VersionConflict { expected: 0, found: 1, .. }
        ));
        assert_eq!(graph.get_fact("a", "acme").await.unwrap().unwrap().version, 1);
    }
}
