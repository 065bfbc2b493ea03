//! jailcompat: guest-ABI personality registry for jail hierarchies
//!
//! Each jail either inherits the emulated-OS identity (name, release string,
//! numeric release, ABI version) of its parent or holds a private override.
//! Overrides are allocated lazily and race-free.
//!
//! # Architecture
//!
//! ## Personality Registry ([`compat`])
//! - [`compat::version`]: `major.minor.patch` to numeric release
//! - [`compat::record`]: Personality record and per-jail slot
//! - [`compat::resolver`]: Nearest-owner lookup, one lock at a time
//! - [`compat::allocator`]: Double-checked lazy allocation
//! - [`compat::transaction`]: check / create / get / set
//! - [`compat::sysctl`]: Effective-record accessors
//! - [`compat::debug`]: Per-operation debug toggles
//! - [`compat::registry`]: Registry service and process-wide instance
//!
//! ## Jail Hierarchy ([`jail`])
//! - [`jail::arena`]: Container nodes keyed by stable ids
//!
//! ## Observability ([`observability`])
//! - [`observability::metrics`]: Counters and Prometheus export
//!
//! ## Configuration ([`config`])
//! - [`config::config`]: JSON configuration loading
//! - [`config::validator`]: Registry config validation
//! - [`config::types`]: Shared types and the error enum
//!
//! ## Testing Infrastructure ([`testing`])
//! - [`testing::race_proof`]: Allocation race proof
//!
//! # Locking
//!
//! 1. **One lock per jail** - a jail's slot is guarded by its own mutex
//! 2. **Walks hold one lock** - the resolver releases before moving up
//! 3. **Ancestor before descendant** - the only time two locks are held
//! 4. **No allocation under a lock** - records are built first, installed after

// Personality Registry
pub mod compat;

// Jail Hierarchy
pub mod jail;

// Observability
pub mod observability;

// Configuration
pub mod config;

// Testing Infrastructure
pub mod testing;

// CLI entrypoint
pub mod cli;

// Re-export commonly used types for convenience
pub use compat::{
    global_registry, init_registry, PersonalityOptions, PersonalityRecord, PersonalityRegistry,
};
pub use config::types::*;
