//! Effective-record accessors.
//!
//! These read and write whatever record a container currently observes. A
//! write on an inheriting container lands on the ancestor it inherits from,
//! the same way an emulated `uname` tunable behaves inside a jail that never
//! configured its own personality.

use crate::compat::record::check_utsname;
use crate::compat::registry::PersonalityRegistry;
use crate::compat::transaction::{PARAM_OSNAME, PARAM_OSRELEASE};
use crate::compat::version::parse_osrel;
use crate::config::types::{NodeId, Result};
use log::debug;

impl PersonalityRegistry {
    pub fn osname(&self, id: NodeId) -> Result<String> {
        self.with_effective(id, |_, record| record.osname().to_string())
    }

    pub fn set_osname(&self, id: NodeId, osname: &str) -> Result<()> {
        check_utsname(PARAM_OSNAME, osname)?;
        let mut resolved = self.resolve_id(id)?;
        resolved.record_mut().set_osname(osname);
        debug!("osname of {} set to {:?}", resolved.owner(), osname);
        Ok(())
    }

    pub fn osrelease(&self, id: NodeId) -> Result<String> {
        self.with_effective(id, |_, record| record.osrelease().to_string())
    }

    /// The numeric release follows the string in the same critical section
    pub fn set_osrelease(&self, id: NodeId, osrelease: &str) -> Result<()> {
        check_utsname(PARAM_OSRELEASE, osrelease)?;
        let osrel = parse_osrel(osrelease)?;
        let mut resolved = self.resolve_id(id)?;
        resolved.record_mut().set_osrelease(osrelease, osrel);
        debug!("osrelease of {} set to {:?}", resolved.owner(), osrelease);
        Ok(())
    }

    pub fn oss_version(&self, id: NodeId) -> Result<i32> {
        self.with_effective(id, |_, record| record.oss_version())
    }

    pub fn set_oss_version(&self, id: NodeId, oss_version: i32) -> Result<()> {
        let mut resolved = self.resolve_id(id)?;
        resolved.record_mut().set_oss_version(oss_version);
        Ok(())
    }

    /// Numeric release a guest process in `id` observes
    pub fn kernver(&self, id: NodeId) -> Result<u32> {
        self.with_effective(id, |_, record| record.osrel())
    }
}
