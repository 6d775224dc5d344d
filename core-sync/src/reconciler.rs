//! # Entity Reconciler
//!
//! Streaming add/update/remove reconciliation of one parent's children.
//!
//! ## Overview
//!
//! A reconciler is scoped to one [`ParentScope`]: a single parent entity
//! (an artist's albums, a directory's entries) or the whole library for a
//! top-level page. It:
//!
//! 1. snapshots the ids currently attached to the parent,
//! 2. applies each remote record as it arrives (look up by id globally,
//!    create or update, attach to the parent and to referenced parents),
//! 3. removes `snapshot - seen` once the stream ends, using the class's
//!    [`RemovalAction`].
//!
//! Memory is bounded by the children of one parent. Records without an id
//! (or without a mandatory name) are counted as malformed and skipped.
//!
//! ## Usage
//!
//! ```ignore
//! let mut ctx = StoreContext::new(store.clone());
//! let scope = ParentScope::Entity(EntityRef::new(EntityKind::Album, "al1"));
//! let records = server.fetch_page(PageRequest::all(EntityKind::Song, scope.clone())).await?;
//! let stats = EntityReconciler::new(EntityKind::Song, scope, epoch)
//!     .run(&mut ctx, records)
//!     .await?;
//! ctx.commit().await?;
//! ```

use bridge_traits::{EntityKind, EntityRef, ParentScope, RecordStream, RemoteRecord};
use core_library::{EpochId, LibraryEntity, StoreContext};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::descriptor::{EntityDescriptor, RemovalAction};
use crate::error::{Result, SyncError};

/// Counters of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileStats {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub malformed: usize,
}

impl ReconcileStats {
    pub fn merge(&mut self, other: ReconcileStats) {
        self.added += other.added;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.removed += other.removed;
        self.malformed += other.malformed;
    }

    pub fn has_changes(&self) -> bool {
        self.added + self.updated + self.removed > 0
    }
}

/// How a single record was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Added,
    Updated,
    Unchanged,
    Malformed,
}

pub struct EntityReconciler {
    descriptor: EntityDescriptor,
    scope: ParentScope,
    epoch: EpochId,
    remove_missing: bool,
    snapshot: Option<BTreeSet<String>>,
    seen: BTreeSet<String>,
    stats: ReconcileStats,
}

impl EntityReconciler {
    /// Parent-scoped reconcilers remove missing children; library-scoped ones
    /// do not unless [`with_removal`](Self::with_removal) enables it.
    pub fn new(kind: EntityKind, scope: ParentScope, epoch: EpochId) -> Self {
        let remove_missing = matches!(scope, ParentScope::Entity(_));
        Self {
            descriptor: EntityDescriptor::for_kind(kind),
            scope,
            epoch,
            remove_missing,
            snapshot: None,
            seen: BTreeSet::new(),
            stats: ReconcileStats::default(),
        }
    }

    pub fn with_removal(mut self, enabled: bool) -> Self {
        self.remove_missing = enabled;
        self
    }

    pub fn kind(&self) -> EntityKind {
        self.descriptor.kind
    }

    pub fn stats(&self) -> ReconcileStats {
        self.stats
    }

    /// Reconcile a complete record stream and apply removals.
    pub async fn run(mut self, ctx: &mut StoreContext, mut records: RecordStream) -> Result<ReconcileStats> {
        self.begin(ctx).await?;
        while let Some(record) = records.next().await {
            let record = record?;
            self.apply(ctx, &record).await?;
        }
        self.finish(ctx).await
    }

    /// Take the pre-fetch snapshot of the scope's children.
    pub async fn begin(&mut self, ctx: &mut StoreContext) -> Result<()> {
        let kind = self.kind();
        let snapshot = match &self.scope {
            ParentScope::Entity(parent) => {
                let parent_entity = ctx
                    .find_by_id(parent.kind, &parent.id)
                    .await?
                    .ok_or_else(|| SyncError::EntityNotFound(parent.to_string()))?;
                parent_entity.child_ids(kind).map(str::to_string).collect()
            }
            ParentScope::Library if self.remove_missing => ctx
                .entities(kind)
                .await?
                .into_iter()
                .map(|entity| entity.id)
                .collect(),
            ParentScope::Library => BTreeSet::new(),
        };
        self.snapshot = Some(snapshot);
        Ok(())
    }

    /// Apply one record: create or update the entity and link it to its
    /// parents.
    pub async fn apply(&mut self, ctx: &mut StoreContext, record: &RemoteRecord) -> Result<RecordOutcome> {
        let kind = self.kind();
        let Some(id) = record.remote_id() else {
            warn!(kind = %kind, scope = %self.scope, "Skipping record without id");
            self.stats.malformed += 1;
            return Ok(RecordOutcome::Malformed);
        };
        let name = match self.descriptor.name_of(record) {
            Some(name) => name.to_string(),
            None if self.descriptor.name_required => {
                warn!(kind = %kind, id, "Skipping record without name");
                self.stats.malformed += 1;
                return Ok(RecordOutcome::Malformed);
            }
            None => id.to_string(),
        };

        // Global lookup: an entity listed under a new parent is moved, never
        // duplicated.
        let existing = ctx.find_by_id(kind, id).await?;
        let mut entity = match &existing {
            Some(entity) => entity.clone(),
            None => ctx.create(kind, id).await?,
        };
        self.descriptor.apply_fields(&mut entity, &name, record);
        entity.epoch = Some(self.epoch);

        if let ParentScope::Entity(parent) = &self.scope {
            link(ctx, &mut entity, parent.kind, &parent.id).await?;
        }
        for (parent_kind, parent_id) in &record.references {
            let is_scope_parent =
                matches!(&self.scope, ParentScope::Entity(parent) if parent.kind == *parent_kind);
            if parent_id.is_empty() || is_scope_parent {
                continue;
            }
            if !link(ctx, &mut entity, *parent_kind, parent_id).await? {
                debug!(kind = %kind, id, parent = %EntityRef::new(*parent_kind, parent_id.as_str()), "Referenced parent not in library");
            }
        }

        let outcome = match existing {
            None => RecordOutcome::Added,
            Some(before) if same_content(&before, &entity) => RecordOutcome::Unchanged,
            Some(_) => RecordOutcome::Updated,
        };
        match outcome {
            RecordOutcome::Added => self.stats.added += 1,
            RecordOutcome::Updated => self.stats.updated += 1,
            _ => self.stats.unchanged += 1,
        }

        self.seen.insert(id.to_string());
        ctx.stage(entity).await?;
        Ok(outcome)
    }

    /// Remove every snapshot entry the stream did not mention.
    pub async fn finish(&mut self, ctx: &mut StoreContext) -> Result<ReconcileStats> {
        let Some(snapshot) = self.snapshot.take() else {
            return Ok(self.stats);
        };
        if !self.remove_missing {
            return Ok(self.stats);
        }

        let kind = self.kind();
        for id in snapshot.difference(&self.seen) {
            let removed = match (&self.scope, self.descriptor.removal) {
                (ParentScope::Entity(parent), RemovalAction::Detach) => {
                    unlink(ctx, parent, kind, id).await?
                }
                _ => ctx.delete(kind, id).await?,
            };
            if removed {
                debug!(kind = %kind, id = %id, scope = %self.scope, "Removed entity missing from remote");
                self.stats.removed += 1;
            }
        }
        Ok(self.stats)
    }
}

/// Delete entities of `kind` last touched by an epoch older than `epoch`.
pub async fn prune_stale(ctx: &mut StoreContext, kind: EntityKind, epoch: EpochId) -> Result<usize> {
    let stale: Vec<String> = ctx
        .entities(kind)
        .await?
        .into_iter()
        .filter(|entity| entity.epoch.map_or(true, |touched| touched < epoch))
        .map(|entity| entity.id)
        .collect();

    let mut pruned = 0;
    for id in &stale {
        if ctx.delete(kind, id).await? {
            pruned += 1;
        }
    }
    if pruned > 0 {
        info!(kind = %kind, epoch = %epoch, pruned, "Pruned stale entities");
    }
    Ok(pruned)
}

fn same_content(before: &LibraryEntity, after: &LibraryEntity) -> bool {
    before.name == after.name
        && before.attributes == after.attributes
        && before.parents == after.parents
        && before.is_cached == after.is_cached
}

/// Make `child` a child of the given parent, moving it away from a previous
/// parent of the same class. Returns `false` when the parent is unknown.
async fn link(
    ctx: &mut StoreContext,
    child: &mut LibraryEntity,
    parent_kind: EntityKind,
    parent_id: &str,
) -> Result<bool> {
    if parent_kind == child.kind && parent_id == child.id {
        return Ok(false);
    }
    let Some(mut parent) = ctx.find_by_id(parent_kind, parent_id).await? else {
        return Ok(false);
    };
    let child_ref = child.entity_ref();

    if let Some(previous) = child.parent(parent_kind).map(str::to_string) {
        if previous != parent_id {
            debug!(child = %child_ref, from = %previous, to = parent_id, "Re-parenting entity");
            if let Some(mut old_parent) = ctx.find_by_id(parent_kind, &previous).await? {
                if old_parent.detach_child(&child_ref) {
                    ctx.stage(old_parent).await?;
                }
            }
        }
    }

    if parent.attach_child(&child_ref) {
        ctx.stage(parent).await?;
    }
    child.parents.insert(parent_kind, parent_id.to_string());
    Ok(true)
}

async fn unlink(ctx: &mut StoreContext, parent: &EntityRef, kind: EntityKind, id: &str) -> Result<bool> {
    let child_ref = EntityRef::new(kind, id);
    let mut detached = false;

    if let Some(mut parent_entity) = ctx.find_by_id(parent.kind, &parent.id).await? {
        if parent_entity.detach_child(&child_ref) {
            ctx.stage(parent_entity).await?;
            detached = true;
        }
    }
    if let Some(mut child) = ctx.find_by_id(kind, id).await? {
        if child.parent(parent.kind) == Some(parent.id.as_str()) {
            child.parents.remove(&parent.kind);
            ctx.stage(child).await?;
        }
    }
    Ok(detached)
}
