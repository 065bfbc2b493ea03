// Config Validation
// Strict mode validates the registry config at startup and fails fast with actionable errors

use crate::compat::record::{check_utsname, PersonalityRecord};
use crate::compat::version::parse_osrel;
use crate::config::config::RegistryConfig;
use crate::config::types::{PersonalityError, Result};

/// Validation result with detailed errors
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Validate config at startup
pub fn validate_config(config: &RegistryConfig) -> Result<ValidationResult> {
    let mut result = ValidationResult::new();

    validate_root(config, &mut result);
    validate_limits(config, &mut result);

    if config.strict_mode && !result.is_valid() {
        let error_msg = format!(
            "Config validation failed in strict mode:\n{}",
            result.errors.join("\n")
        );
        return Err(PersonalityError::Config(error_msg));
    }

    Ok(result)
}

/// Build the root record from a config, validating it on the way
pub fn root_record(config: &RegistryConfig) -> Result<PersonalityRecord> {
    let root = &config.root;
    check_utsname("root.osname", &root.osname)?;
    check_utsname("root.osrelease", &root.osrelease)?;
    let osrel = parse_osrel(&root.osrelease)?;
    Ok(PersonalityRecord::new(
        &root.osname,
        &root.osrelease,
        osrel,
        root.oss_version,
    ))
}

fn validate_root(config: &RegistryConfig, result: &mut ValidationResult) {
    if let Err(e) = root_record(config) {
        result.add_error(format!("root personality is invalid: {}", e));
    }
    if config.root.osname.is_empty() {
        result.add_warning("root.osname is empty".to_string());
    }
}

fn validate_limits(config: &RegistryConfig, result: &mut ValidationResult) {
    if config.debug_map_size == 0 {
        result.add_error("debug_map_size cannot be zero".to_string());
    }
    if config.debug_map_size > 4096 {
        result.add_warning(format!(
            "debug_map_size {} is far above any known syscall table",
            config.debug_map_size
        ));
    }
    if config.max_records == Some(0) {
        result.add_warning(
            "max_records is 0: no container will be able to hold its own personality"
                .to_string(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_default_config() {
        let config = RegistryConfig::default();
        let result = validate_config(&config).unwrap();
        assert!(result.is_valid());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_bad_root_release_rejected_in_strict_mode() {
        let mut config = RegistryConfig::default();
        config.root.osrelease = "2.6".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_bad_root_release_reported_in_permissive_mode() {
        let mut config = RegistryConfig::default();
        config.root.osrelease = "0.9.1".to_string();
        config.strict_mode = false;

        let result = validate_config(&config).unwrap();
        assert!(!result.is_valid());
        assert!(result
            .errors
            .iter()
            .any(|e| e.contains("root personality is invalid")));
    }

    #[test]
    fn test_zero_debug_map_size() {
        let mut config = RegistryConfig::default();
        config.debug_map_size = 0;
        config.strict_mode = false;

        let result = validate_config(&config).unwrap();
        assert!(result
            .errors
            .iter()
            .any(|e| e.contains("debug_map_size cannot be zero")));
    }

    #[test]
    fn test_zero_capacity_is_only_a_warning() {
        let mut config = RegistryConfig::default();
        config.max_records = Some(0);

        let result = validate_config(&config).unwrap();
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_root_record_from_config() {
        let mut config = RegistryConfig::default();
        config.root.osrelease = "3.10.0".to_string();

        let record = root_record(&config).unwrap();
        assert_eq!(record.osrel(), 3_010_000);
        assert_eq!(record.osname(), "Linux");
    }
}
