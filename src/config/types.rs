/// Core types and structures for the personality registry
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size of a utsname field, terminator included
pub const MAX_UTSNAME: usize = 65;

/// Longest osname/osrelease value that still leaves room for the terminator
pub const MAX_UTSNAME_LEN: usize = MAX_UTSNAME - 1;

/// Smallest acceptable numeric release (major version 1)
pub const MIN_OSREL: u32 = 1_000_000;

/// Default number of operation ids covered by the debug map
pub const DEFAULT_DEBUG_MAP_SIZE: usize = 337;

/// Longest accepted debug command, terminator included
pub const MAX_DEBUG_STR: usize = 16;

/// Raw value of the `linux` parameter asking for a private record
pub const JAIL_SYS_NEW: i32 = 1;

/// Raw value of the `linux` parameter asking to follow the parent
pub const JAIL_SYS_INHERIT: i32 = 2;

/// Stable identifier of a container in the arena. Never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub(crate) u64);

impl NodeId {
    /// The root container
    pub const ROOT: NodeId = NodeId(0);

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "jail#{}", self.0)
    }
}

/// Whether a container keeps its own personality or follows its ancestors
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum JailSysMode {
    #[serde(rename = "new")]
    New,
    #[serde(rename = "inherit")]
    Inherit,
}

impl JailSysMode {
    pub fn as_raw(self) -> i32 {
        match self {
            JailSysMode::New => JAIL_SYS_NEW,
            JailSysMode::Inherit => JAIL_SYS_INHERIT,
        }
    }
}

impl TryFrom<i32> for JailSysMode {
    type Error = PersonalityError;

    fn try_from(raw: i32) -> Result<Self> {
        match raw {
            JAIL_SYS_NEW => Ok(JailSysMode::New),
            JAIL_SYS_INHERIT => Ok(JailSysMode::Inherit),
            other => Err(PersonalityError::InvalidMode(other.to_string())),
        }
    }
}

impl std::fmt::Display for JailSysMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JailSysMode::New => write!(f, "new"),
            JailSysMode::Inherit => write!(f, "inherit"),
        }
    }
}

/// What `get` reports for a container.
///
/// Inheriting containers report empty strings and zeros rather than the values
/// they actually observe; use the effective accessors for those.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersonalitySnapshot {
    pub mode: JailSysMode,
    pub osname: String,
    pub osrelease: String,
    pub osrel: u32,
    pub oss_version: i32,
}

impl PersonalitySnapshot {
    pub(crate) fn inherited() -> Self {
        Self {
            mode: JailSysMode::Inherit,
            osname: String::new(),
            osrelease: String::new(),
            osrel: 0,
            oss_version: 0,
        }
    }
}

/// Custom error types for the personality registry
#[derive(Error, Debug)]
pub enum PersonalityError {
    #[error("{field} format error: {value:?}")]
    Format { field: &'static str, value: String },

    #[error("{field} too long ({len} bytes, limit {limit})")]
    TooLong {
        field: &'static str,
        len: usize,
        limit: usize,
    },

    #[error("{field} contains an embedded NUL byte")]
    EmbeddedNul { field: &'static str },

    #[error("Invalid mode value: {0}")]
    InvalidMode(String),

    #[error("Debug id {id} out of range (0..{limit})")]
    OutOfRange { id: i64, limit: usize },

    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("Invalid value for {field}: {value:?}")]
    InvalidValue { field: &'static str, value: String },

    #[error("Unknown container {0}")]
    UnknownNode(NodeId),

    #[error("Container {0} still has children")]
    HasChildren(NodeId),

    #[error("The root container cannot be {0}")]
    RootImmutable(&'static str),

    #[error("Personality record limit reached ({limit})")]
    ResourceExhausted { limit: usize },

    #[error("Personality registry is not registered")]
    NotRegistered,

    #[error("Personality registry not initialized")]
    NotInitialized,

    #[error("Personality registry already initialized")]
    AlreadyInitialized,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PersonalityError {
    /// errno a kernel-side caller would see for this failure
    pub fn errno(&self) -> i32 {
        match self {
            PersonalityError::Format { .. }
            | PersonalityError::EmbeddedNul { .. }
            | PersonalityError::InvalidMode(_)
            | PersonalityError::OutOfRange { .. }
            | PersonalityError::InvalidValue { .. }
            | PersonalityError::RootImmutable(_)
            | PersonalityError::Config(_) => libc::EINVAL,
            PersonalityError::TooLong { .. } => libc::ENAMETOOLONG,
            PersonalityError::UnknownParameter(_) | PersonalityError::UnknownNode(_) => {
                libc::ENOENT
            }
            PersonalityError::HasChildren(_) => libc::EBUSY,
            PersonalityError::ResourceExhausted { .. } => libc::ENOMEM,
            PersonalityError::NotRegistered
            | PersonalityError::NotInitialized
            | PersonalityError::AlreadyInitialized => libc::ENXIO,
            PersonalityError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

/// Convert registry errors to process exit codes
impl From<&PersonalityError> for i32 {
    fn from(err: &PersonalityError) -> i32 {
        match err {
            PersonalityError::Format { .. }
            | PersonalityError::TooLong { .. }
            | PersonalityError::EmbeddedNul { .. }
            | PersonalityError::InvalidMode(_)
            | PersonalityError::OutOfRange { .. }
            | PersonalityError::UnknownParameter(_)
            | PersonalityError::InvalidValue { .. } => 64, // Usage error
            PersonalityError::Config(_) => 78,             // Config error
            PersonalityError::Io(_) => 74,                 // IO error
            PersonalityError::ResourceExhausted { .. } => 75, // Temporary failure
            _ => 1,
        }
    }
}

/// Result type alias for registry operations
pub type Result<T> = std::result::Result<T, PersonalityError>;
