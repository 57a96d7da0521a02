//! Synthesis Configuration
//!
//! The configuration source hands over a flat key-value map:
//!
//! | Key | Meaning |
//! |-----|---------|
//! | `prefix` | Name prefix for every resource |
//! | `account_id` | 12-digit AWS account id |
//! | `region` | AWS region, e.g. `us-east-1` |
//! | `tag:<Key>` | Compliance tag applied to taggable resources |
//! | `param:<Name>` | Override for a catalog parameter |

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::naming::NamingPolicy;

const TAG_KEY_PREFIX: &str = "tag:";
const PARAM_KEY_PREFIX: &str = "param:";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required key: {0}")]
    MissingKey(&'static str),

    #[error("unknown configuration key: {0}")]
    UnknownKey(String),

    #[error("prefix {0:?} must be 1-32 lowercase letters, digits or '-', starting with a letter")]
    InvalidPrefix(String),

    #[error("account_id {0:?} must be exactly 12 digits")]
    InvalidAccountId(String),

    #[error("region {0:?} is not a valid AWS region name")]
    InvalidRegion(String),

    #[error("empty key after {0:?}")]
    EmptyKey(&'static str),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisConfig {
    pub prefix: String,
    pub account_id: String,
    pub region: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub overrides: BTreeMap<String, String>,
}

/// Reads a flat JSON object of string values without interpreting it.
pub fn read_flat(path: &Path) -> Result<BTreeMap<String, String>, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn is_match(pattern: &str, value: &str) -> bool {
    Regex::new(pattern).map_or(false, |re| re.is_match(value))
}

impl SynthesisConfig {
    pub fn new(
        prefix: impl Into<String>,
        account_id: impl Into<String>,
        region: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            prefix: prefix.into(),
            account_id: account_id.into(),
            region: region.into(),
            tags: BTreeMap::new(),
            overrides: BTreeMap::new(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_override(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(name.into(), value.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn from_flat(map: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let required = |key: &'static str| {
            map.get(key)
                .cloned()
                .ok_or(ConfigError::MissingKey(key))
        };
        let mut config = Self {
            prefix: required("prefix")?,
            account_id: required("account_id")?,
            region: required("region")?,
            tags: BTreeMap::new(),
            overrides: BTreeMap::new(),
        };

        for (key, value) in map {
            if let Some(tag) = key.strip_prefix(TAG_KEY_PREFIX) {
                if tag.is_empty() {
                    return Err(ConfigError::EmptyKey(TAG_KEY_PREFIX));
                }
                config.tags.insert(tag.to_string(), value.clone());
            } else if let Some(param) = key.strip_prefix(PARAM_KEY_PREFIX) {
                if param.is_empty() {
                    return Err(ConfigError::EmptyKey(PARAM_KEY_PREFIX));
                }
                config.overrides.insert(param.to_string(), value.clone());
            } else if !matches!(key.as_str(), "prefix" | "account_id" | "region") {
                return Err(ConfigError::UnknownKey(key.clone()));
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Loads a flat JSON object of string values.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_flat(&read_flat(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_match(r"^[a-z][a-z0-9-]{0,31}$", &self.prefix) {
            return Err(ConfigError::InvalidPrefix(self.prefix.clone()));
        }
        if self.account_id.len() != 12 || !self.account_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(ConfigError::InvalidAccountId(self.account_id.clone()));
        }
        if !is_match(r"^[a-z]{2}(-gov|-iso[a-z]*)?-[a-z]+-\d$", &self.region) {
            return Err(ConfigError::InvalidRegion(self.region.clone()));
        }
        Ok(())
    }

    pub fn naming_policy(&self) -> NamingPolicy {
        NamingPolicy::new(&self.prefix, &self.account_id, &self.region).with_tags(self.tags.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn flat(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_flat_map_splits_tags_and_params() {
        let config = SynthesisConfig::from_flat(&flat(&[
            ("prefix", "workload"),
            ("account_id", "123456789012"),
            ("region", "eu-west-1"),
            ("tag:DataClassification", "confidential"),
            ("param:VpcCidr", "10.1.0.0/16"),
        ]))
        .unwrap();
        assert_eq!(config.tags["DataClassification"], "confidential");
        assert_eq!(config.overrides["VpcCidr"], "10.1.0.0/16");
    }

    #[test]
    fn test_missing_and_unknown_keys() {
        let err = SynthesisConfig::from_flat(&flat(&[("prefix", "workload")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey("account_id")));

        let err = SynthesisConfig::from_flat(&flat(&[
            ("prefix", "workload"),
            ("account_id", "123456789012"),
            ("region", "us-east-1"),
            ("stage", "prod"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKey(k) if k == "stage"));
    }

    #[test]
    fn test_field_validation() {
        assert!(SynthesisConfig::new("Workload", "123456789012", "us-east-1").is_err());
        assert!(SynthesisConfig::new("workload", "12345", "us-east-1").is_err());
        assert!(SynthesisConfig::new("workload", "123456789012", "mars-1").is_err());
        assert!(SynthesisConfig::new("workload", "123456789012", "us-gov-west-1").is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"prefix": "audit", "account_id": "000000000001", "region": "us-west-2"}}"#
        )
        .unwrap();
        let config = SynthesisConfig::load(file.path()).unwrap();
        assert_eq!(config.prefix, "audit");
        assert_eq!(config.account_id, "000000000001");
    }
}
