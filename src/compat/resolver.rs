//! Hierarchy resolver.
//!
//! Finds the nearest container, starting at a given one and moving towards
//! the root, whose slot owns a record. The walk holds at most one slot lock at
//! a time, and hands the last one back inside a [`ResolvedPersonality`] guard
//! so the caller cannot forget to release it.

use crate::compat::record::PersonalityRecord;
use crate::compat::registry::PersonalityRegistry;
use crate::config::types::{NodeId, Result};
use crate::jail::arena::SlotGuard;
use crate::jail::ContainerNode;
use std::sync::Arc;

/// Effective personality of a container, with the owner's slot locked
pub struct ResolvedPersonality {
    owner: Arc<ContainerNode>,
    guard: SlotGuard,
}

impl ResolvedPersonality {
    /// Container whose record this is
    pub fn owner(&self) -> NodeId {
        self.owner.id()
    }

    pub(crate) fn owner_node(&self) -> &Arc<ContainerNode> {
        &self.owner
    }

    pub fn record(&self) -> &PersonalityRecord {
        match self.guard.record() {
            Some(record) => record,
            None => unreachable!("resolved slot emptied while locked"),
        }
    }

    pub(crate) fn record_mut(&mut self) -> &mut PersonalityRecord {
        match self.guard.record_mut() {
            Some(record) => record,
            None => unreachable!("resolved slot emptied while locked"),
        }
    }

    /// Keep the lock, forget that the record might belong to an ancestor
    pub(crate) fn into_parts(self) -> (Arc<ContainerNode>, SlotGuard) {
        (self.owner, self.guard)
    }
}

impl std::fmt::Debug for ResolvedPersonality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedPersonality")
            .field("owner", &self.owner.id())
            .field("record", self.record())
            .finish()
    }
}

impl PersonalityRegistry {
    /// Walk from `start` to the nearest container that owns a record.
    ///
    /// While unregistered every container resolves to the root.
    pub fn resolve(&self, start: &Arc<ContainerNode>) -> ResolvedPersonality {
        self.metrics.resolutions.inc();

        let mut current = if self.is_registered() {
            Arc::clone(start)
        } else {
            Arc::clone(self.arena.root())
        };

        loop {
            self.metrics.resolve_steps.inc();
            let guard = current.lock_slot();
            if guard.is_owned() {
                return ResolvedPersonality {
                    owner: current,
                    guard,
                };
            }
            drop(guard);

            // Only the root lacks a parent, and the root slot is never empty
            current = match current.parent() {
                Some(parent) => Arc::clone(parent),
                None => Arc::clone(self.arena.root()),
            };
        }
    }

    /// Resolve by id
    pub fn resolve_id(&self, id: NodeId) -> Result<ResolvedPersonality> {
        let node = self.arena.get(id)?;
        Ok(self.resolve(&node))
    }

    /// Run `f` against the effective record of `id` while its owner is locked
    pub fn with_effective<R>(
        &self,
        id: NodeId,
        f: impl FnOnce(NodeId, &PersonalityRecord) -> R,
    ) -> Result<R> {
        let resolved = self.resolve_id(id)?;
        Ok(f(resolved.owner(), resolved.record()))
    }

    /// Copy of the effective record of `id`
    pub fn effective(&self, id: NodeId) -> Result<PersonalityRecord> {
        self.with_effective(id, |_, record| record.clone())
    }
}
