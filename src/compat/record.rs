//! The personality record and its per-container slot.

use crate::config::types::{PersonalityError, Result, MAX_UTSNAME, MAX_UTSNAME_LEN};
use serde::{Deserialize, Serialize};

/// Emulated OS identity observed by guest processes in a container
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalityRecord {
    osname: String,
    osrelease: String,
    osrel: u32,
    oss_version: i32,
}

impl PersonalityRecord {
    /// Values must already be validated with [`check_utsname`] and
    /// [`parse_osrel`](crate::compat::version::parse_osrel).
    pub(crate) fn new(osname: &str, osrelease: &str, osrel: u32, oss_version: i32) -> Self {
        Self {
            osname: osname.to_string(),
            osrelease: osrelease.to_string(),
            osrel,
            oss_version,
        }
    }

    /// Storage for a record that is about to be filled from an ancestor
    pub(crate) fn blank() -> Self {
        Self {
            osname: String::with_capacity(MAX_UTSNAME),
            osrelease: String::with_capacity(MAX_UTSNAME),
            osrel: 0,
            oss_version: 0,
        }
    }

    pub fn osname(&self) -> &str {
        &self.osname
    }

    pub fn osrelease(&self) -> &str {
        &self.osrelease
    }

    /// Numeric form of [`osrelease`](Self::osrelease)
    pub fn osrel(&self) -> u32 {
        self.osrel
    }

    pub fn oss_version(&self) -> i32 {
        self.oss_version
    }

    /// Field-by-field copy that reuses this record's buffers
    pub(crate) fn copy_from(&mut self, other: &PersonalityRecord) {
        self.osname.clone_from(&other.osname);
        self.osrelease.clone_from(&other.osrelease);
        self.osrel = other.osrel;
        self.oss_version = other.oss_version;
    }

    pub(crate) fn set_osname(&mut self, osname: &str) {
        self.osname.clear();
        self.osname.push_str(osname);
    }

    /// The string and its numeric form always change together
    pub(crate) fn set_osrelease(&mut self, osrelease: &str, osrel: u32) {
        self.osrelease.clear();
        self.osrelease.push_str(osrelease);
        self.osrel = osrel;
    }

    pub(crate) fn set_oss_version(&mut self, oss_version: i32) {
        self.oss_version = oss_version;
    }
}

/// Personality slot of a container
#[derive(Debug)]
pub enum Slot {
    /// Follow the nearest ancestor that owns a record
    Empty,
    Owned(Box<PersonalityRecord>),
}

impl Slot {
    pub fn is_owned(&self) -> bool {
        matches!(self, Slot::Owned(_))
    }

    pub fn record(&self) -> Option<&PersonalityRecord> {
        match self {
            Slot::Owned(record) => Some(record),
            Slot::Empty => None,
        }
    }

    pub fn record_mut(&mut self) -> Option<&mut PersonalityRecord> {
        match self {
            Slot::Owned(record) => Some(record),
            Slot::Empty => None,
        }
    }

    /// Drop back to inheriting, handing back whatever was owned
    pub fn take(&mut self) -> Option<Box<PersonalityRecord>> {
        match std::mem::replace(self, Slot::Empty) {
            Slot::Owned(record) => Some(record),
            Slot::Empty => None,
        }
    }
}

/// Bound check for utsname-style strings.
///
/// The value plus its terminator must fit in [`MAX_UTSNAME`] bytes, and it may
/// not carry an embedded NUL.
pub fn check_utsname(field: &'static str, value: &str) -> Result<()> {
    if value.as_bytes().contains(&0) {
        return Err(PersonalityError::EmbeddedNul { field });
    }
    if value.len() > MAX_UTSNAME_LEN {
        return Err(PersonalityError::TooLong {
            field,
            len: value.len(),
            limit: MAX_UTSNAME_LEN,
        });
    }
    Ok(())
}
