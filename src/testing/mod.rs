//! Testing infrastructure
//!
//! Contention harness for the lazy allocator.

pub mod race_proof;

pub use race_proof::*;
