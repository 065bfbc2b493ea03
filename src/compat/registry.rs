/// Personality registry service
///
/// Owns the container arena, the per-container personality slots and the
/// debug toggle map. The container lifecycle manager drives it through
/// [`create_node`](PersonalityRegistry::create_node) and
/// [`destroy_node`](PersonalityRegistry::destroy_node); jail configuration goes
/// through the transaction interface in [`transaction`](crate::compat::transaction).
use crate::compat::debug::DebugMap;
use crate::config::config::RegistryConfig;
use crate::config::types::{NodeId, PersonalityError, Result};
use crate::config::validator::{root_record, validate_config};
use crate::jail::{ContainerArena, ContainerNode};
use crate::observability::metrics::RegistryMetrics;
use log::{info, warn};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// Global registry instance
static GLOBAL_REGISTRY: OnceLock<PersonalityRegistry> = OnceLock::new();

pub struct PersonalityRegistry {
    pub(crate) arena: ContainerArena,
    registered: AtomicBool,
    /// Private records installed or being installed on non-root containers
    live_records: AtomicUsize,
    max_records: Option<usize>,
    pub(crate) metrics: Arc<RegistryMetrics>,
    debug: DebugMap,
}

/// Capacity claimed for one private record; handed back on drop unless the
/// record got installed
pub(crate) struct RecordReservation<'a> {
    live: &'a AtomicUsize,
    committed: bool,
}

impl RecordReservation<'_> {
    pub(crate) fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for RecordReservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.live.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl PersonalityRegistry {
    /// Build a registry from a validated config
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let report = validate_config(config)?;
        for warning in &report.warnings {
            warn!("Registry config: {}", warning);
        }
        let root = root_record(config)?;

        let registry = Self {
            arena: ContainerArena::new(root),
            registered: AtomicBool::new(false),
            live_records: AtomicUsize::new(0),
            max_records: config.max_records,
            metrics: Arc::new(RegistryMetrics::new()),
            debug: DebugMap::new(config.debug_map_size),
        };

        if config.register_on_start {
            registry.register();
        }

        info!(
            "Initialized personality registry (root: {} {}, registered: {})",
            config.root.osname,
            config.root.osrelease,
            registry.is_registered()
        );
        Ok(registry)
    }

    /// Registry with the built-in root personality, registered
    pub fn with_defaults() -> Result<Self> {
        Self::new(&RegistryConfig::default())
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    /// Attach the personality slot to every container.
    ///
    /// Containers that already exist get a private copy of their effective
    /// record, ancestors first. Runs with the node set held exclusively.
    pub fn register(&self) {
        let nodes = self.arena.write();
        if self.registered.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut seeded = 0usize;
        // Ids grow monotonically, so parents are visited before their children
        for node in nodes.values().filter(|node| !node.id().is_root()) {
            match self.allocate_node(node) {
                Ok(_) => seeded += 1,
                Err(e) => warn!("Could not seed personality for {}: {}", node.id(), e),
            }
        }
        self.metrics.sweeps.inc();
        info!("Personality registry registered ({} containers seeded)", seeded);
    }

    /// Detach the personality slot: free every private record. Lookups fall
    /// back to the root afterwards.
    pub fn deregister(&self) {
        let nodes = self.arena.write();
        if !self.registered.swap(false, Ordering::SeqCst) {
            return;
        }

        let mut freed = 0usize;
        for node in nodes.values().filter(|node| !node.id().is_root()) {
            let mut slot = node.lock_slot();
            if slot.take().is_some() {
                self.release_record();
                freed += 1;
            }
        }
        self.metrics.sweeps.inc();
        info!("Personality registry deregistered ({} records freed)", freed);
    }

    /// Container creation hook: the new node inherits until configured
    pub fn create_node(&self, parent: NodeId, name: &str) -> Result<NodeId> {
        Ok(self.arena.insert(parent, name)?.id())
    }

    /// Container destruction hook: unlink the node and free its record
    pub fn destroy_node(&self, id: NodeId) -> Result<()> {
        let node = self.arena.remove(id)?;
        let mut slot = node.lock_slot();
        node.mark_removed(&slot);
        if slot.take().is_some() {
            self.release_record();
        }
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> Result<Arc<ContainerNode>> {
        self.arena.get(id)
    }

    pub fn root(&self) -> &Arc<ContainerNode> {
        self.arena.root()
    }

    pub fn arena(&self) -> &ContainerArena {
        &self.arena
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.arena.find_by_name(name)
    }

    /// Whether the container holds a private record right now
    pub fn owns_record(&self, id: NodeId) -> Result<bool> {
        Ok(self.arena.get(id)?.lock_slot().is_owned())
    }

    /// Private records held by non-root containers
    pub fn live_records(&self) -> usize {
        self.live_records.load(Ordering::Acquire)
    }

    pub fn max_records(&self) -> Option<usize> {
        self.max_records
    }

    pub fn metrics(&self) -> &Arc<RegistryMetrics> {
        &self.metrics
    }

    pub fn debug_map(&self) -> &DebugMap {
        &self.debug
    }

    pub(crate) fn require_registered(&self) -> Result<()> {
        if self.is_registered() {
            Ok(())
        } else {
            Err(PersonalityError::NotRegistered)
        }
    }

    /// Claim room for one more private record
    pub(crate) fn reserve_record(&self) -> Result<RecordReservation<'_>> {
        match self.max_records {
            None => {
                self.live_records.fetch_add(1, Ordering::AcqRel);
            }
            Some(limit) => {
                self.live_records
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                        (live < limit).then_some(live + 1)
                    })
                    .map_err(|_| PersonalityError::ResourceExhausted { limit })?;
            }
        }
        Ok(RecordReservation {
            live: &self.live_records,
            committed: false,
        })
    }

    /// Account for a private record that was removed from its slot
    pub(crate) fn release_record(&self) {
        self.live_records.fetch_sub(1, Ordering::AcqRel);
        self.metrics.records_freed.inc();
    }
}

// ============================================================================
// PUBLIC API - process-wide registry
// ============================================================================

/// Initialize the global registry
pub fn init_registry(config: &RegistryConfig) -> Result<&'static PersonalityRegistry> {
    let registry = PersonalityRegistry::new(config)?;
    GLOBAL_REGISTRY
        .set(registry)
        .map_err(|_| PersonalityError::AlreadyInitialized)?;

    info!("Global personality registry initialized successfully");
    global_registry()
}

/// The global registry, once [`init_registry`] has run
pub fn global_registry() -> Result<&'static PersonalityRegistry> {
    GLOBAL_REGISTRY.get().ok_or(PersonalityError::NotInitialized)
}
