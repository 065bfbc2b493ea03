//! Guest-ABI personality registry
//!
//! Every container either owns a private personality record or follows the
//! nearest ancestor that does. The root always owns one.
//!
//! - `version`: release string parsing
//! - `record`: the record and the per-container slot
//! - `resolver`: nearest-owner lookup under a lock guard
//! - `allocator`: race-free lazy installation of private records
//! - `transaction`: check / create / get / set
//! - `sysctl`: accessors over the effective record
//! - `debug`: per-operation trace toggles
//! - `registry`: the service tying it together

pub mod allocator;
pub mod debug;
pub mod record;
pub mod registry;
pub mod resolver;
pub mod sysctl;
pub mod transaction;
pub mod version;

pub use allocator::OwnedPersonality;
pub use debug::{DebugCommand, DebugMap, DebugTarget};
pub use record::{check_utsname, PersonalityRecord, Slot};
pub use registry::{global_registry, init_registry, PersonalityRegistry};
pub use resolver::ResolvedPersonality;
pub use transaction::{check, CheckedOptions, PersonalityOptions};
pub use version::parse_osrel;
