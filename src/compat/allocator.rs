//! Lazy allocator.
//!
//! A container gets private storage the first time it diverges from its
//! parent. The record is allocated with no lock held, then the hierarchy is
//! resolved again: whoever installs first wins and every other speculative
//! record is dropped on the spot.
//!
//! Lock order is always ancestor before descendant. The resolver never holds
//! two locks, so the two cannot deadlock.

use crate::compat::record::{PersonalityRecord, Slot};
use crate::compat::registry::PersonalityRegistry;
use crate::config::types::{NodeId, PersonalityError, Result};
use crate::jail::arena::SlotGuard;
use crate::jail::ContainerNode;
use log::debug;
use std::ops::Deref;
use std::sync::Arc;

/// A container's own record, with its slot locked
pub struct OwnedPersonality {
    node: Arc<ContainerNode>,
    guard: SlotGuard,
}

impl OwnedPersonality {
    pub fn node(&self) -> NodeId {
        self.node.id()
    }

    pub(crate) fn record_mut(&mut self) -> &mut PersonalityRecord {
        match self.guard.record_mut() {
            Some(record) => record,
            None => unreachable!("owned slot emptied while locked"),
        }
    }
}

impl Deref for OwnedPersonality {
    type Target = PersonalityRecord;

    fn deref(&self) -> &PersonalityRecord {
        match self.guard.record() {
            Some(record) => record,
            None => unreachable!("owned slot emptied while locked"),
        }
    }
}

impl std::fmt::Debug for OwnedPersonality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedPersonality")
            .field("node", &self.node.id())
            .field("record", &**self)
            .finish()
    }
}

impl PersonalityRegistry {
    /// Make sure `id` owns a private record and return it locked.
    ///
    /// A fresh record starts as a copy of the container's effective record.
    /// Safe to call from any number of threads at once: exactly one record
    /// ends up installed.
    pub fn allocate(&self, id: NodeId) -> Result<OwnedPersonality> {
        self.require_registered()?;
        let node = self.arena.get(id)?;
        self.allocate_node(&node)
    }

    pub(crate) fn allocate_node(&self, node: &Arc<ContainerNode>) -> Result<OwnedPersonality> {
        // Step 1: already owned?
        let resolved = self.resolve(node);
        if resolved.owner() == node.id() {
            let (node, guard) = resolved.into_parts();
            return Ok(OwnedPersonality { node, guard });
        }
        drop(resolved);

        // Step 2: allocate with nothing locked
        let mut fresh = Box::new(PersonalityRecord::blank());
        self.metrics.records_allocated.inc();

        // Step 3: someone may have beaten us to it
        let resolved = self.resolve(node);
        if resolved.owner() == node.id() {
            self.discard(node.id(), fresh);
            let (node, guard) = resolved.into_parts();
            return Ok(OwnedPersonality { node, guard });
        }

        // Step 4: lock the node under its ancestor and install if still empty
        let mut guard = node.lock_slot();
        if node.is_removed() {
            self.discard(node.id(), fresh);
            return Err(PersonalityError::UnknownNode(node.id()));
        }
        if !self.is_registered() {
            self.discard(node.id(), fresh);
            return Err(PersonalityError::NotRegistered);
        }
        if guard.is_owned() {
            self.discard(node.id(), fresh);
        } else {
            let reservation = match self.reserve_record() {
                Ok(reservation) => reservation,
                Err(e) => {
                    self.metrics.allocation_failures.inc();
                    self.discard(node.id(), fresh);
                    return Err(e);
                }
            };
            fresh.copy_from(resolved.record());
            *guard = Slot::Owned(fresh);
            reservation.commit();
            self.metrics.records_installed.inc();
            debug!(
                "Installed private personality on {} (copied from {})",
                node.id(),
                resolved.owner_node().id()
            );
        }
        drop(resolved);

        Ok(OwnedPersonality {
            node: Arc::clone(node),
            guard,
        })
    }

    fn discard(&self, id: NodeId, fresh: Box<PersonalityRecord>) {
        drop(fresh);
        self.metrics.records_discarded.inc();
        debug!("Discarded speculative personality for {}", id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::config::RegistryConfig;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn allocation_copies_the_effective_record() {
        let registry = PersonalityRegistry::with_defaults().unwrap();
        let web = registry.create_node(NodeId::ROOT, "web").unwrap();

        let owned = registry.allocate(web).unwrap();
        assert_eq!(owned.node(), web);
        assert_eq!(owned.osname(), "Linux");
        assert_eq!(owned.osrel(), 2_006_016);
        drop(owned);

        assert!(registry.owns_record(web).unwrap());
        assert_eq!(registry.live_records(), 1);
    }

    #[test]
    fn allocation_is_idempotent() {
        let registry = PersonalityRegistry::with_defaults().unwrap();
        let web = registry.create_node(NodeId::ROOT, "web").unwrap();

        drop(registry.allocate(web).unwrap());
        drop(registry.allocate(web).unwrap());

        let metrics = registry.metrics();
        assert_eq!(metrics.records_allocated.get(), 1);
        assert_eq!(metrics.records_installed.get(), 1);
        assert_eq!(registry.live_records(), 1);
    }

    #[test]
    fn root_allocation_is_a_no_op() {
        let registry = PersonalityRegistry::with_defaults().unwrap();
        let owned = registry.allocate(NodeId::ROOT).unwrap();
        assert_eq!(owned.node(), NodeId::ROOT);
        drop(owned);
        assert_eq!(registry.metrics().records_allocated.get(), 0);
        assert_eq!(registry.live_records(), 0);
    }

    #[test]
    fn exhausted_capacity_leaves_the_node_inheriting() {
        let config = RegistryConfig {
            max_records: Some(0),
            ..RegistryConfig::default()
        };
        let registry = PersonalityRegistry::new(&config).unwrap();
        let web = registry.create_node(NodeId::ROOT, "web").unwrap();

        let err = registry.allocate(web).unwrap_err();
        assert!(matches!(err, PersonalityError::ResourceExhausted { limit: 0 }));
        assert!(!registry.owns_record(web).unwrap());
        assert_eq!(registry.metrics().unaccounted_records(), 0);
        assert_eq!(registry.metrics().allocation_failures.get(), 1);
    }

    #[test]
    fn concurrent_allocation_installs_one_record() {
        let registry = Arc::new(PersonalityRegistry::with_defaults().unwrap());
        let mid = registry.create_node(NodeId::ROOT, "mid").unwrap();
        let leaf = registry.create_node(mid, "leaf").unwrap();

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    registry.allocate(leaf).map(|owned| owned.node())
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap().unwrap(), leaf);
        }

        let metrics = registry.metrics();
        assert_eq!(metrics.records_installed.get(), 1);
        assert_eq!(metrics.unaccounted_records(), 0);
        assert_eq!(registry.live_records(), 1);
        assert!(!registry.owns_record(mid).unwrap());
    }

    #[test]
    fn allocation_requires_registration() {
        let config = RegistryConfig {
            register_on_start: false,
            ..RegistryConfig::default()
        };
        let registry = PersonalityRegistry::new(&config).unwrap();
        let web = registry.create_node(NodeId::ROOT, "web").unwrap();
        assert!(matches!(
            registry.allocate(web),
            Err(PersonalityError::NotRegistered)
        ));
    }
}
