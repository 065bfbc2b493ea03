//! Configuration transaction interface.
//!
//! Container setup code drives a node's personality through four phases:
//!
//! - `check`: validate a proposed option set, never mutating anything
//! - `create`: seed a freshly created node
//! - `get`: report what the node owns
//! - `set`: apply a validated option set
//!
//! `set` validates everything before it touches the node, and any allocation
//! happens before the first field is written, so a failing `set` leaves the
//! node exactly as it was.

use crate::compat::record::check_utsname;
use crate::compat::registry::PersonalityRegistry;
use crate::compat::version::parse_osrel;
use crate::config::types::{
    JailSysMode, NodeId, PersonalityError, PersonalitySnapshot, Result, JAIL_SYS_INHERIT,
    JAIL_SYS_NEW,
};
use crate::jail::ContainerNode;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Parameter carrying the mode
pub const PARAM_MODE: &str = "linux";
pub const PARAM_OSNAME: &str = "linux.osname";
pub const PARAM_OSRELEASE: &str = "linux.osrelease";
pub const PARAM_OSS_VERSION: &str = "linux.oss_version";

/// Proposed personality change, as handed over by container setup code.
///
/// The mode stays raw so that out-of-range values can reach `check`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalityOptions {
    #[serde(default)]
    pub mode: Option<i32>,
    #[serde(default)]
    pub osname: Option<String>,
    #[serde(default)]
    pub osrelease: Option<String>,
    #[serde(default)]
    pub oss_version: Option<i32>,
}

impl PersonalityOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: JailSysMode) -> Self {
        self.mode = Some(mode.as_raw());
        self
    }

    pub fn with_raw_mode(mut self, mode: i32) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_osname(mut self, osname: impl Into<String>) -> Self {
        self.osname = Some(osname.into());
        self
    }

    pub fn with_osrelease(mut self, osrelease: impl Into<String>) -> Self {
        self.osrelease = Some(osrelease.into());
        self
    }

    pub fn with_oss_version(mut self, oss_version: i32) -> Self {
        self.oss_version = Some(oss_version);
        self
    }

    /// No mode and no field
    pub fn is_empty(&self) -> bool {
        self.mode.is_none() && !self.has_fields()
    }

    fn has_fields(&self) -> bool {
        self.osname.is_some() || self.osrelease.is_some() || self.oss_version.is_some()
    }

    /// Build an option set from `key=value` jail parameters.
    ///
    /// Recognized keys are `linux`, `linux.osname`, `linux.osrelease` and
    /// `linux.oss_version`. A later occurrence of a key overrides an earlier one.
    pub fn from_params<I, S>(params: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = Self::new();
        for param in params {
            let param = param.as_ref();
            let (key, value) = param
                .split_once('=')
                .ok_or_else(|| PersonalityError::InvalidValue {
                    field: "parameter",
                    value: param.to_string(),
                })?;

            match key.trim() {
                PARAM_MODE => options.mode = Some(parse_mode(value.trim())?),
                PARAM_OSNAME => options.osname = Some(value.to_string()),
                PARAM_OSRELEASE => options.osrelease = Some(value.to_string()),
                PARAM_OSS_VERSION => {
                    options.oss_version = Some(parse_oss_version(value.trim())?)
                }
                other => return Err(PersonalityError::UnknownParameter(other.to_string())),
            }
        }
        Ok(options)
    }
}

fn parse_mode(value: &str) -> Result<i32> {
    match value {
        "new" => Ok(JAIL_SYS_NEW),
        "inherit" => Ok(JAIL_SYS_INHERIT),
        raw => raw
            .parse::<i32>()
            .map_err(|_| PersonalityError::InvalidMode(raw.to_string())),
    }
}

fn parse_oss_version(value: &str) -> Result<i32> {
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16).ok().map(|v| v as i32),
        None => value.parse::<i32>().ok(),
    };
    parsed.ok_or_else(|| PersonalityError::InvalidValue {
        field: PARAM_OSS_VERSION,
        value: value.to_string(),
    })
}

/// An option set that passed validation
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckedOptions {
    pub mode: Option<JailSysMode>,
    pub osname: Option<String>,
    /// Release string with its numeric form
    pub osrelease: Option<(String, u32)>,
    pub oss_version: Option<i32>,
}

impl CheckedOptions {
    /// Mode `set` will act on. Any field forces NEW; `None` means no change.
    pub fn effective_mode(&self) -> Option<JailSysMode> {
        if self.osname.is_some() || self.osrelease.is_some() || self.oss_version.is_some() {
            Some(JailSysMode::New)
        } else {
            self.mode
        }
    }
}

/// Validate an option set without touching any container
pub fn check(options: &PersonalityOptions) -> Result<CheckedOptions> {
    let mode = options.mode.map(JailSysMode::try_from).transpose()?;

    if let Some(osname) = &options.osname {
        check_utsname(PARAM_OSNAME, osname)?;
    }

    let osrelease = match &options.osrelease {
        Some(release) => {
            check_utsname(PARAM_OSRELEASE, release)?;
            Some((release.clone(), parse_osrel(release)?))
        }
        None => None,
    };

    Ok(CheckedOptions {
        mode,
        osname: options.osname.clone(),
        osrelease,
        oss_version: options.oss_version,
    })
}

impl PersonalityRegistry {
    /// Dry run of [`set`](Self::set)
    pub fn check(&self, options: &PersonalityOptions) -> Result<CheckedOptions> {
        check(options)
    }

    /// Seed a freshly created container.
    ///
    /// Unless the options ask to inherit, the container gets a private copy
    /// of its parent's effective record, so later changes to the parent no
    /// longer show through.
    pub fn create(&self, id: NodeId, options: &PersonalityOptions) -> Result<()> {
        let checked = check(options)?;
        self.require_registered()?;
        let node = self.arena.get(id)?;
        self.create_checked(&node, &checked)
    }

    fn create_checked(&self, node: &Arc<ContainerNode>, checked: &CheckedOptions) -> Result<()> {
        if checked.mode == Some(JailSysMode::Inherit) {
            return Ok(());
        }
        self.allocate_node(node).map(|_| ())
    }

    /// What the container owns. Inheriting containers report empty values.
    pub fn get(&self, id: NodeId) -> Result<PersonalitySnapshot> {
        self.require_registered()?;
        let node = self.arena.get(id)?;
        let resolved = self.resolve(&node);
        if resolved.owner() != id {
            return Ok(PersonalitySnapshot::inherited());
        }

        let record = resolved.record();
        Ok(PersonalitySnapshot {
            mode: JailSysMode::New,
            osname: record.osname().to_string(),
            osrelease: record.osrelease().to_string(),
            osrel: record.osrel(),
            oss_version: record.oss_version(),
        })
    }

    /// Validate and apply an option set.
    ///
    /// INHERIT drops the private record. NEW allocates one if needed and
    /// overwrites only the fields that are present.
    pub fn set(&self, id: NodeId, options: &PersonalityOptions) -> Result<()> {
        let checked = match check(options) {
            Ok(checked) => checked,
            Err(e) => {
                self.metrics.set_rejected.inc();
                return Err(e);
            }
        };
        self.require_registered()?;
        let node = self.arena.get(id)?;
        self.set_checked(&node, &checked)
    }

    fn set_checked(&self, node: &Arc<ContainerNode>, checked: &CheckedOptions) -> Result<()> {
        match checked.effective_mode() {
            None => Ok(()),
            Some(JailSysMode::Inherit) => {
                if node.id().is_root() {
                    warn!("Ignoring inherit request on the root container");
                    return Ok(());
                }
                let mut slot = node.lock_slot();
                if slot.take().is_some() {
                    self.release_record();
                    self.metrics.inherit_resets.inc();
                    debug!("{} now inherits its personality", node.id());
                }
                Ok(())
            }
            Some(JailSysMode::New) => {
                let mut owned = match self.allocate_node(node) {
                    Ok(owned) => owned,
                    Err(e) => {
                        self.metrics.set_rejected.inc();
                        return Err(e);
                    }
                };

                let record = owned.record_mut();
                if let Some(osname) = &checked.osname {
                    record.set_osname(osname);
                }
                if let Some((osrelease, osrel)) = &checked.osrelease {
                    record.set_osrelease(osrelease, *osrel);
                }
                if let Some(oss_version) = checked.oss_version {
                    record.set_oss_version(oss_version);
                }
                self.metrics.set_applied.inc();
                Ok(())
            }
        }
    }

    /// Create a child container and configure its personality in one go.
    ///
    /// The node is removed again if any step after insertion fails.
    pub fn create_container(
        &self,
        parent: NodeId,
        name: &str,
        options: &PersonalityOptions,
    ) -> Result<NodeId> {
        let checked = check(options)?;

        if !self.is_registered() {
            if !options.is_empty() {
                return Err(PersonalityError::NotRegistered);
            }
            return self.create_node(parent, name);
        }

        let node = self.arena.insert(parent, name)?;
        let outcome = self
            .create_checked(&node, &checked)
            .and_then(|()| self.set_checked(&node, &checked));

        if let Err(e) = outcome {
            if let Err(cleanup) = self.destroy_node(node.id()) {
                warn!("Could not remove half-created {}: {}", node.id(), cleanup);
            }
            return Err(e);
        }

        info!("Created container {} ({}) under {}", name, node.id(), parent);
        Ok(node.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::config::RegistryConfig;
    use crate::config::types::MAX_UTSNAME_LEN;

    fn registry() -> PersonalityRegistry {
        PersonalityRegistry::with_defaults().unwrap()
    }

    #[test]
    fn release_sets_numeric_form() {
        let registry = registry();
        let web = registry.create_node(NodeId::ROOT, "web").unwrap();
        registry
            .set(
                web,
                &PersonalityOptions::new()
                    .with_mode(JailSysMode::New)
                    .with_osrelease("2.6.16"),
            )
            .unwrap();

        let snap = registry.get(web).unwrap();
        assert_eq!(snap.mode, JailSysMode::New);
        assert_eq!(snap.osrel, 2_006_016);
    }

    #[test]
    fn malformed_release_leaves_state_unchanged() {
        let registry = registry();
        let web = registry.create_node(NodeId::ROOT, "web").unwrap();

        // Inheriting node stays inheriting
        let err = registry
            .set(web, &PersonalityOptions::new().with_osrelease("2.6"))
            .unwrap_err();
        assert!(matches!(err, PersonalityError::Format { .. }));
        assert!(!registry.owns_record(web).unwrap());

        // Owned node keeps its values
        registry
            .set(web, &PersonalityOptions::new().with_osrelease("3.10.0"))
            .unwrap();
        let err = registry
            .set(
                web,
                &PersonalityOptions::new()
                    .with_osname("Other")
                    .with_osrelease("2.6"),
            )
            .unwrap_err();
        assert!(matches!(err, PersonalityError::Format { .. }));

        let snap = registry.get(web).unwrap();
        assert_eq!(snap.osname, "Linux");
        assert_eq!(snap.osrelease, "3.10.0");
        assert_eq!(registry.metrics().set_rejected.get(), 2);
    }

    #[test]
    fn inherit_discards_and_reports_zeroes() {
        let registry = registry();
        let web = registry.create_node(NodeId::ROOT, "web").unwrap();
        registry
            .set(web, &PersonalityOptions::new().with_osname("Penguin"))
            .unwrap();
        assert_eq!(registry.live_records(), 1);

        registry
            .set(web, &PersonalityOptions::new().with_mode(JailSysMode::Inherit))
            .unwrap();

        // Inheriting containers report zeroes, not the inherited values
        assert_eq!(registry.get(web).unwrap(), PersonalitySnapshot::inherited());
        assert_eq!(registry.resolve_id(web).unwrap().owner(), NodeId::ROOT);
        assert_eq!(registry.live_records(), 0);
        assert_eq!(registry.metrics().inherit_resets.get(), 1);
    }

    #[test]
    fn fields_force_new_over_inherit() {
        let registry = registry();
        let web = registry.create_node(NodeId::ROOT, "web").unwrap();
        registry
            .set(
                web,
                &PersonalityOptions::new()
                    .with_mode(JailSysMode::Inherit)
                    .with_oss_version(0x020400),
            )
            .unwrap();

        let snap = registry.get(web).unwrap();
        assert_eq!(snap.mode, JailSysMode::New);
        assert_eq!(snap.oss_version, 0x020400);
    }

    #[test]
    fn root_cannot_inherit() {
        let registry = registry();
        registry
            .set(
                NodeId::ROOT,
                &PersonalityOptions::new().with_mode(JailSysMode::Inherit),
            )
            .unwrap();
        assert_eq!(registry.get(NodeId::ROOT).unwrap().mode, JailSysMode::New);
    }

    #[test]
    fn child_of_overridden_parent_sees_parent_release() {
        let registry = registry();
        let parent = registry.create_node(NodeId::ROOT, "parent").unwrap();
        registry
            .set(parent, &PersonalityOptions::new().with_osrelease("3.10.0"))
            .unwrap();
        let child = registry.create_node(parent, "child").unwrap();

        assert_eq!(registry.kernver(child).unwrap(), 3_010_000);
        assert_eq!(registry.get(child).unwrap().mode, JailSysMode::Inherit);
    }

    #[test]
    fn set_then_get_round_trips() {
        let registry = registry();
        let web = registry.create_node(NodeId::ROOT, "web").unwrap();
        registry
            .set(
                web,
                &PersonalityOptions::new()
                    .with_osname("Penguin")
                    .with_osrelease("4.4.0")
                    .with_oss_version(0x030600),
            )
            .unwrap();

        let snap = registry.get(web).unwrap();
        assert_eq!(
            snap,
            PersonalitySnapshot {
                mode: JailSysMode::New,
                osname: "Penguin".to_string(),
                osrelease: "4.4.0".to_string(),
                osrel: 4_004_000,
                oss_version: 0x030600,
            }
        );
    }

    #[test]
    fn name_length_bound() {
        let registry = registry();
        let web = registry.create_node(NodeId::ROOT, "web").unwrap();

        let at_bound = "n".repeat(MAX_UTSNAME_LEN);
        registry
            .set(web, &PersonalityOptions::new().with_osname(at_bound.clone()))
            .unwrap();
        assert_eq!(registry.get(web).unwrap().osname, at_bound);

        let over = "n".repeat(MAX_UTSNAME_LEN + 1);
        assert!(matches!(
            registry.set(web, &PersonalityOptions::new().with_osname(over)),
            Err(PersonalityError::TooLong { .. })
        ));
        assert_eq!(registry.get(web).unwrap().osname, at_bound);
    }

    #[test]
    fn exhausted_capacity_during_set_leaves_node_inheriting() {
        let config = RegistryConfig {
            max_records: Some(1),
            ..RegistryConfig::default()
        };
        let registry = PersonalityRegistry::new(&config).unwrap();
        let a = registry.create_node(NodeId::ROOT, "a").unwrap();
        let b = registry.create_node(NodeId::ROOT, "b").unwrap();

        registry
            .set(a, &PersonalityOptions::new().with_osname("A"))
            .unwrap();
        let err = registry
            .set(b, &PersonalityOptions::new().with_osname("B"))
            .unwrap_err();

        assert!(matches!(err, PersonalityError::ResourceExhausted { limit: 1 }));
        assert_eq!(registry.get(b).unwrap().mode, JailSysMode::Inherit);
        assert_eq!(registry.osname(b).unwrap(), "Linux");
    }

    #[test]
    fn invalid_mode_is_rejected_by_check() {
        let registry = registry();
        let options = PersonalityOptions::new().with_raw_mode(3);
        assert!(matches!(
            registry.check(&options),
            Err(PersonalityError::InvalidMode(_))
        ));
    }

    #[test]
    fn check_works_while_unregistered() {
        let config = RegistryConfig {
            register_on_start: false,
            ..RegistryConfig::default()
        };
        let registry = PersonalityRegistry::new(&config).unwrap();
        let checked = registry
            .check(&PersonalityOptions::new().with_osrelease("5.15.0"))
            .unwrap();
        assert_eq!(checked.osrelease, Some(("5.15.0".to_string(), 5_015_000)));
        assert_eq!(checked.effective_mode(), Some(JailSysMode::New));
    }

    #[test]
    fn create_copies_parent_unless_inheriting() {
        let registry = registry();
        let parent = registry.create_node(NodeId::ROOT, "parent").unwrap();
        registry
            .set(parent, &PersonalityOptions::new().with_osrelease("3.10.0"))
            .unwrap();

        let copied = registry.create_node(parent, "copied").unwrap();
        registry.create(copied, &PersonalityOptions::new()).unwrap();
        let following = registry.create_node(parent, "following").unwrap();
        registry
            .create(
                following,
                &PersonalityOptions::new().with_mode(JailSysMode::Inherit),
            )
            .unwrap();

        registry
            .set(parent, &PersonalityOptions::new().with_osrelease("4.19.0"))
            .unwrap();

        assert_eq!(registry.kernver(copied).unwrap(), 3_010_000);
        assert_eq!(registry.kernver(following).unwrap(), 4_019_000);
    }

    #[test]
    fn create_container_rolls_back_on_failure() {
        let config = RegistryConfig {
            max_records: Some(0),
            ..RegistryConfig::default()
        };
        let registry = PersonalityRegistry::new(&config).unwrap();

        let err = registry
            .create_container(NodeId::ROOT, "web", &PersonalityOptions::new())
            .unwrap_err();
        assert!(matches!(err, PersonalityError::ResourceExhausted { .. }));
        assert!(registry.find("web").is_none());
        assert_eq!(registry.arena().len(), 1);
    }

    #[test]
    fn create_container_applies_options() {
        let registry = registry();
        let options = PersonalityOptions::from_params([
            "linux=new",
            "linux.osname=Penguin",
            "linux.osrelease=5.10.0",
        ])
        .unwrap();
        let web = registry
            .create_container(NodeId::ROOT, "web", &options)
            .unwrap();

        let snap = registry.get(web).unwrap();
        assert_eq!(snap.osname, "Penguin");
        assert_eq!(snap.osrel, 5_010_000);
    }

    #[test]
    fn create_container_unregistered_rejects_options() {
        let config = RegistryConfig {
            register_on_start: false,
            ..RegistryConfig::default()
        };
        let registry = PersonalityRegistry::new(&config).unwrap();

        let plain = registry
            .create_container(NodeId::ROOT, "plain", &PersonalityOptions::new())
            .unwrap();
        assert!(!registry.owns_record(plain).unwrap());

        assert!(matches!(
            registry.create_container(
                NodeId::ROOT,
                "tuned",
                &PersonalityOptions::new().with_osname("X")
            ),
            Err(PersonalityError::NotRegistered)
        ));
    }

    #[test]
    fn params_parse_every_key() {
        let options = PersonalityOptions::from_params([
            "linux=inherit",
            "linux.osname=Linux",
            "linux.osrelease=2.6.32",
            "linux.oss_version=0x030600",
        ])
        .unwrap();
        assert_eq!(options.mode, Some(JAIL_SYS_INHERIT));
        assert_eq!(options.osname.as_deref(), Some("Linux"));
        assert_eq!(options.osrelease.as_deref(), Some("2.6.32"));
        assert_eq!(options.oss_version, Some(0x030600));

        let numeric = PersonalityOptions::from_params(["linux=1", "linux.oss_version=42"]).unwrap();
        assert_eq!(numeric.mode, Some(JAIL_SYS_NEW));
        assert_eq!(numeric.oss_version, Some(42));
    }

    #[test]
    fn params_reject_bad_input() {
        assert!(matches!(
            PersonalityOptions::from_params(["linux.kernel=1"]),
            Err(PersonalityError::UnknownParameter(_))
        ));
        assert!(matches!(
            PersonalityOptions::from_params(["linux.osname"]),
            Err(PersonalityError::InvalidValue { .. })
        ));
        assert!(matches!(
            PersonalityOptions::from_params(["linux=sometimes"]),
            Err(PersonalityError::InvalidMode(_))
        ));
        assert!(matches!(
            PersonalityOptions::from_params(["linux.oss_version=0xzz"]),
            Err(PersonalityError::InvalidValue { .. })
        ));
    }
}
