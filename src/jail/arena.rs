/// Container arena: every live jail keyed by a stable id.
///
/// The map sits behind a coarse RW lock. Lookups share it; inserting,
/// removing and registry-wide sweeps take it exclusively. Ancestor walks do
/// not touch it at all, since every node keeps a handle to its parent.
use crate::compat::record::{PersonalityRecord, Slot};
use crate::config::types::{NodeId, PersonalityError, Result};
use log::debug;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex, RwLock, RwLockWriteGuard};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Owned lock on a container's personality slot
pub(crate) type SlotGuard = ArcMutexGuard<RawMutex, Slot>;

pub(crate) type NodeMap = BTreeMap<NodeId, Arc<ContainerNode>>;

/// One confinement scope
#[derive(Debug)]
pub struct ContainerNode {
    id: NodeId,
    name: String,
    parent: Option<Arc<ContainerNode>>,
    slot: Arc<Mutex<Slot>>,
    removed: AtomicBool,
}

impl ContainerNode {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&Arc<ContainerNode>> {
        self.parent.as_ref()
    }

    pub fn parent_id(&self) -> Option<NodeId> {
        self.parent.as_ref().map(|p| p.id)
    }

    /// Number of ancestors between this node and the root
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.parent.as_ref();
        while let Some(node) = current {
            depth += 1;
            current = node.parent.as_ref();
        }
        depth
    }

    pub(crate) fn lock_slot(&self) -> SlotGuard {
        self.slot.lock_arc()
    }

    /// Only meaningful while holding the slot lock
    pub(crate) fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_removed(&self, _held: &SlotGuard) {
        self.removed.store(true, Ordering::Release);
    }
}

/// Arena of container nodes
#[derive(Debug)]
pub struct ContainerArena {
    nodes: RwLock<NodeMap>,
    next_id: AtomicU64,
    root: Arc<ContainerNode>,
}

impl ContainerArena {
    /// New arena holding only the root, which owns `root_record`
    pub fn new(root_record: PersonalityRecord) -> Self {
        let root = Arc::new(ContainerNode {
            id: NodeId::ROOT,
            name: "0".to_string(),
            parent: None,
            slot: Arc::new(Mutex::new(Slot::Owned(Box::new(root_record)))),
            removed: AtomicBool::new(false),
        });

        let mut nodes = BTreeMap::new();
        nodes.insert(NodeId::ROOT, Arc::clone(&root));

        Self {
            nodes: RwLock::new(nodes),
            next_id: AtomicU64::new(1),
            root,
        }
    }

    pub fn root(&self) -> &Arc<ContainerNode> {
        &self.root
    }

    pub fn get(&self, id: NodeId) -> Result<Arc<ContainerNode>> {
        self.nodes
            .read()
            .get(&id)
            .cloned()
            .ok_or(PersonalityError::UnknownNode(id))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.read().contains_key(&id)
    }

    /// First live node carrying `name`
    pub fn find_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .read()
            .values()
            .find(|node| node.name == name)
            .map(|node| node.id)
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        // The root is never removed
        false
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.nodes.read().keys().copied().collect()
    }

    pub fn children_of(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .read()
            .values()
            .filter(|node| node.parent_id() == Some(id))
            .map(|node| node.id)
            .collect()
    }

    /// Insert a new node under `parent` with an empty slot
    pub fn insert(&self, parent: NodeId, name: &str) -> Result<Arc<ContainerNode>> {
        let mut nodes = self.nodes.write();
        let parent_node = nodes
            .get(&parent)
            .cloned()
            .ok_or(PersonalityError::UnknownNode(parent))?;

        let id = NodeId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let node = Arc::new(ContainerNode {
            id,
            name: name.to_string(),
            parent: Some(parent_node),
            slot: Arc::new(Mutex::new(Slot::Empty)),
            removed: AtomicBool::new(false),
        });
        nodes.insert(id, Arc::clone(&node));

        debug!("Inserted container {} ({}) under {}", id, name, parent);
        Ok(node)
    }

    /// Unlink a childless, non-root node. The caller frees its slot.
    pub fn remove(&self, id: NodeId) -> Result<Arc<ContainerNode>> {
        if id.is_root() {
            return Err(PersonalityError::RootImmutable("destroyed"));
        }

        let mut nodes = self.nodes.write();
        if !nodes.contains_key(&id) {
            return Err(PersonalityError::UnknownNode(id));
        }
        if nodes.values().any(|node| node.parent_id() == Some(id)) {
            return Err(PersonalityError::HasChildren(id));
        }

        let node = nodes
            .remove(&id)
            .ok_or(PersonalityError::UnknownNode(id))?;
        debug!("Removed container {} ({})", id, node.name);
        Ok(node)
    }

    /// Exclusive hold on the node set, for registry-wide sweeps
    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, NodeMap> {
        self.nodes.write()
    }
}
