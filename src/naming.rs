//! Naming & Tagging Policy
//!
//! Names are `prefix-qualifier...-suffix`, optionally followed by account id
//! and region for resources whose names must be globally unique.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::SynthesisError;
use crate::fragments::{Fragment, FragmentId, ResourceType};

pub const NAME_DELIMITER: &str = "-";
pub const NAME_TAG: &str = "Name";

/// Derived name and final tag set of one fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Naming {
    pub name: String,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct NamingPolicy {
    prefix: String,
    account_id: String,
    region: String,
    compliance_tags: BTreeMap<String, String>,
}

impl NamingPolicy {
    pub fn new(
        prefix: impl Into<String>,
        account_id: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            account_id: account_id.into(),
            region: region.into(),
            compliance_tags: BTreeMap::new(),
        }
    }

    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.compliance_tags = tags;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn derive_name(&self, fragment: &Fragment) -> String {
        let spec = fragment.name_spec();
        let mut segments: Vec<&str> = vec![self.prefix.as_str()];
        segments.extend(spec.qualifiers.iter().map(String::as_str));
        if let Some(suffix) = &spec.suffix {
            segments.push(suffix);
        }
        if spec.account_scoped {
            segments.push(&self.account_id);
            segments.push(&self.region);
        }

        let name = segments
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(NAME_DELIMITER);

        // S3 rejects upper-case bucket names.
        if fragment.resource_type.is(ResourceType::S3_BUCKET) {
            name.to_lowercase()
        } else {
            name
        }
    }

    /// Fragment tags win; policy tags only fill keys that are still free.
    pub fn tags_for(&self, fragment: &Fragment, name: &str) -> BTreeMap<String, String> {
        if !fragment.resource_type.is_taggable() {
            return BTreeMap::new();
        }
        let mut tags = fragment.tags.clone();
        tags.entry(NAME_TAG.to_string())
            .or_insert_with(|| name.to_string());
        for (key, value) in &self.compliance_tags {
            tags.entry(key.clone()).or_insert_with(|| value.clone());
        }
        tags
    }

    /// Names and tags every fragment, rejecting duplicate names.
    pub fn assign<'a, I>(&self, fragments: I) -> Result<BTreeMap<FragmentId, Naming>, SynthesisError>
    where
        I: IntoIterator<Item = &'a Fragment>,
    {
        let mut owners: BTreeMap<String, &str> = BTreeMap::new();
        let mut assigned = BTreeMap::new();

        for fragment in fragments {
            let name = self.derive_name(fragment);
            if let Some(first) = owners.insert(name.clone(), &fragment.id) {
                return Err(SynthesisError::NameCollision {
                    name,
                    first: first.to_string(),
                    second: fragment.id.clone(),
                });
            }
            let tags = self.tags_for(fragment, &name);
            debug!(fragment = %fragment.id, %name, tags = tags.len(), "assigned name");
            assigned.insert(fragment.id.clone(), Naming { name, tags });
        }

        Ok(assigned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> NamingPolicy {
        NamingPolicy::new("workload", "123456789012", "us-east-1")
    }

    #[test]
    fn test_name_joins_prefix_qualifiers_suffix() {
        let f = Fragment::new("PublicSubnet1", ResourceType::SUBNET)
            .named(["PublicSubnet1"])
            .with_suffix("subnet");
        assert_eq!(policy().derive_name(&f), "workload-PublicSubnet1-subnet");
    }

    #[test]
    fn test_account_scoped_bucket_lowercased() {
        let f = Fragment::new("LogBucket", ResourceType::S3_BUCKET)
            .named(["Logs"])
            .account_scoped();
        assert_eq!(
            policy().derive_name(&f),
            "workload-logs-123456789012-us-east-1"
        );
    }

    #[test]
    fn test_collision_then_fixed_by_qualifier() {
        let a = Fragment::new("A", ResourceType::SUBNET).named(["Subnet"]);
        let b = Fragment::new("B", ResourceType::SUBNET).named(["Subnet"]);
        let err = policy().assign([&a, &b]).unwrap_err();
        assert!(matches!(
            err,
            SynthesisError::NameCollision { ref first, ref second, .. } if first == "A" && second == "B"
        ));

        let b = b.named(["Subnet2"]);
        assert!(policy().assign([&a, &b]).is_ok());
    }

    #[test]
    fn test_fragment_tags_not_overwritten() {
        let mut extra = BTreeMap::new();
        extra.insert("DataClass".to_string(), "internal".to_string());
        extra.insert("Owner".to_string(), "platform".to_string());
        let policy = policy().with_tags(extra);

        let f = Fragment::new("Vpc", ResourceType::VPC).with_tag("Owner", "network-team");
        let tags = policy.tags_for(&f, "workload-Vpc");
        assert_eq!(tags["Name"], "workload-Vpc");
        assert_eq!(tags["Owner"], "network-team");
        assert_eq!(tags["DataClass"], "internal");
    }

    #[test]
    fn test_untaggable_gets_no_tags() {
        let f = Fragment::new("DefaultRoute", ResourceType::ROUTE);
        assert!(policy().tags_for(&f, "workload-DefaultRoute").is_empty());
    }
}
