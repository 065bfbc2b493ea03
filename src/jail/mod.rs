//! Container hierarchy
//!
//! The arena of jails the personality registry hangs its slots on.

pub mod arena;

pub use arena::{ContainerArena, ContainerNode};
