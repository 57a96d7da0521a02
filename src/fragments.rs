//! Fragment Catalog - Reusable Infrastructure Units
//!
//! Fragments are immutable once registered. The pipeline takes ownership of
//! the catalog, so a synthesis run only ever sees a read-only snapshot.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::error::SynthesisError;
use crate::params::Parameter;

pub type FragmentId = String;

/// CloudFormation resource type, e.g. `AWS::S3::Bucket`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceType(pub String);

impl ResourceType {
    pub const VPC: &'static str = "AWS::EC2::VPC";
    pub const INTERNET_GATEWAY: &'static str = "AWS::EC2::InternetGateway";
    pub const GATEWAY_ATTACHMENT: &'static str = "AWS::EC2::VPCGatewayAttachment";
    pub const SUBNET: &'static str = "AWS::EC2::Subnet";
    pub const ROUTE_TABLE: &'static str = "AWS::EC2::RouteTable";
    pub const ROUTE: &'static str = "AWS::EC2::Route";
    pub const ROUTE_TABLE_ASSOCIATION: &'static str = "AWS::EC2::SubnetRouteTableAssociation";
    pub const EIP: &'static str = "AWS::EC2::EIP";
    pub const NAT_GATEWAY: &'static str = "AWS::EC2::NatGateway";
    pub const FLOW_LOG: &'static str = "AWS::EC2::FlowLog";
    pub const LOG_GROUP: &'static str = "AWS::Logs::LogGroup";
    pub const IAM_ROLE: &'static str = "AWS::IAM::Role";
    pub const S3_BUCKET: &'static str = "AWS::S3::Bucket";
    pub const BUCKET_POLICY: &'static str = "AWS::S3::BucketPolicy";
    pub const SQS_QUEUE: &'static str = "AWS::SQS::Queue";
    pub const QUEUE_POLICY: &'static str = "AWS::SQS::QueuePolicy";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is(&self, name: &str) -> bool {
        self.0 == name
    }

    /// Whether the resource accepts a `Tags` property.
    pub fn is_taggable(&self) -> bool {
        const UNTAGGABLE: &[&str] = &[
            ResourceType::GATEWAY_ATTACHMENT,
            ResourceType::ROUTE,
            ResourceType::ROUTE_TABLE_ASSOCIATION,
            ResourceType::BUCKET_POLICY,
            ResourceType::QUEUE_POLICY,
        ];
        !self.0.starts_with("Custom::") && !UNTAGGABLE.contains(&self.0.as_str())
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub value: PropertyValue,
}

impl Property {
    pub fn new(name: impl Into<String>, value: PropertyValue) -> Self {
        Self { name: name.into(), value }
    }
}

/// A property value before parameters and references are resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyValue {
    Literal(serde_json::Value),
    /// Value of a catalog parameter.
    Param(String),
    /// Logical reference to another fragment. Adds a dependency edge.
    Ref(FragmentId),
    /// Attribute of another fragment. Adds a dependency edge.
    GetAtt { fragment: FragmentId, attribute: String },
    /// Derived name of another fragment. Known before deployment, so no edge.
    NameOf(FragmentId),
    /// Picks a branch on whether the parameter resolves to `"true"`.
    If {
        param: String,
        then: Box<PropertyValue>,
        #[serde(rename = "else")]
        otherwise: Box<PropertyValue>,
    },
    Join {
        delimiter: String,
        parts: Vec<PropertyValue>,
    },
    List(Vec<PropertyValue>),
    Map(Vec<Property>),
}

impl PropertyValue {
    pub fn literal(value: impl Into<serde_json::Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn param(name: impl Into<String>) -> Self {
        Self::Param(name.into())
    }

    pub fn reference(id: impl Into<String>) -> Self {
        Self::Ref(id.into())
    }

    pub fn get_att(id: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::GetAtt {
            fragment: id.into(),
            attribute: attribute.into(),
        }
    }

    pub fn name_of(id: impl Into<String>) -> Self {
        Self::NameOf(id.into())
    }

    pub fn when(param: impl Into<String>, then: PropertyValue, otherwise: PropertyValue) -> Self {
        Self::If {
            param: param.into(),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    pub fn join(delimiter: impl Into<String>, parts: Vec<PropertyValue>) -> Self {
        Self::Join {
            delimiter: delimiter.into(),
            parts,
        }
    }

    pub fn map<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, PropertyValue)>,
        K: Into<String>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| Property::new(k, v))
                .collect(),
        )
    }

    /// Fragments this value depends on at deploy time.
    pub fn collect_references<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Self::Ref(id) | Self::GetAtt { fragment: id, .. } => {
                out.insert(id);
            }
            Self::If { then, otherwise, .. } => {
                then.collect_references(out);
                otherwise.collect_references(out);
            }
            Self::Join { parts: items, .. } | Self::List(items) => {
                items.iter().for_each(|v| v.collect_references(out));
            }
            Self::Map(entries) => {
                entries.iter().for_each(|p| p.value.collect_references(out));
            }
            Self::Literal(_) | Self::Param(_) | Self::NameOf(_) => {}
        }
    }

    /// Fragments whose derived name this value embeds.
    pub fn collect_name_refs<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Self::NameOf(id) => {
                out.insert(id);
            }
            Self::If { then, otherwise, .. } => {
                then.collect_name_refs(out);
                otherwise.collect_name_refs(out);
            }
            Self::Join { parts: items, .. } | Self::List(items) => {
                items.iter().for_each(|v| v.collect_name_refs(out));
            }
            Self::Map(entries) => {
                entries.iter().for_each(|p| p.value.collect_name_refs(out));
            }
            _ => {}
        }
    }

    /// Looks up a key of a `Map` value.
    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        match self {
            Self::Map(entries) => entries.iter().find(|p| p.name == key).map(|p| &p.value),
            _ => None,
        }
    }
}

/// How a fragment's resource name is derived.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameSpec {
    #[serde(default)]
    pub qualifiers: Vec<String>,
    #[serde(default)]
    pub suffix: Option<String>,
    /// Append account id and region, for globally unique names.
    #[serde(default)]
    pub account_scoped: bool,
}

/// Suppressed control declared alongside the fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionAnnotation {
    pub control: String,
    pub justification: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fragment {
    pub id: FragmentId,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    #[serde(default)]
    pub properties: Vec<Property>,
    #[serde(default)]
    pub depends_on: BTreeSet<FragmentId>,
    #[serde(default)]
    pub naming: Option<NameSpec>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub satisfies: BTreeSet<String>,
    #[serde(default)]
    pub exceptions: Vec<ExceptionAnnotation>,
}

impl Fragment {
    pub fn new(id: impl Into<String>, resource_type: &str) -> Self {
        Self {
            id: id.into(),
            resource_type: ResourceType::new(resource_type),
            properties: vec![],
            depends_on: BTreeSet::new(),
            naming: None,
            tags: BTreeMap::new(),
            satisfies: BTreeSet::new(),
            exceptions: vec![],
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.push(Property::new(name, value));
        self
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.insert(id.into());
        self
    }

    pub fn named<I, S>(mut self, qualifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let spec = self.naming.get_or_insert_with(NameSpec::default);
        spec.qualifiers = qualifiers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.naming.get_or_insert_with(NameSpec::default).suffix = Some(suffix.into());
        self
    }

    pub fn account_scoped(mut self) -> Self {
        self.naming.get_or_insert_with(NameSpec::default).account_scoped = true;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn satisfies(mut self, control: impl Into<String>) -> Self {
        self.satisfies.insert(control.into());
        self
    }

    pub fn with_exception(
        mut self,
        control: impl Into<String>,
        justification: impl Into<String>,
    ) -> Self {
        self.exceptions.push(ExceptionAnnotation {
            control: control.into(),
            justification: justification.into(),
        });
        self
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
    }

    /// Fragments referenced through `Ref` or `GetAtt` in any property.
    pub fn references(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        for p in &self.properties {
            p.value.collect_references(&mut out);
        }
        out
    }

    /// Fragments whose derived name is embedded through `NameOf`.
    pub fn name_references(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        for p in &self.properties {
            p.value.collect_name_refs(&mut out);
        }
        out
    }

    /// Declared dependencies plus referenced fragments.
    pub fn dependencies(&self) -> BTreeSet<&str> {
        let mut deps = self.references();
        deps.extend(self.depends_on.iter().map(String::as_str));
        deps
    }

    /// Name qualifiers, defaulting to the fragment id.
    pub fn name_spec(&self) -> NameSpec {
        match &self.naming {
            Some(spec) if !spec.qualifiers.is_empty() || spec.suffix.is_some() => spec.clone(),
            Some(spec) => NameSpec {
                qualifiers: vec![self.id.clone()],
                ..spec.clone()
            },
            None => NameSpec {
                qualifiers: vec![self.id.clone()],
                ..NameSpec::default()
            },
        }
    }
}

/// Catalog-level named value exported for downstream stacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Output {
    pub name: String,
    pub value: PropertyValue,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub export: bool,
}

impl Output {
    pub fn new(name: impl Into<String>, value: PropertyValue) -> Self {
        Self {
            name: name.into(),
            value,
            description: None,
            export: false,
        }
    }

    pub fn exported(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self.export = true;
        self
    }
}

/// On-disk catalog file layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogFile {
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_engine_min_version")]
    pub engine_min_version: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub fragments: Vec<Fragment>,
    #[serde(default)]
    pub outputs: Vec<Output>,
}

fn default_engine_min_version() -> String {
    crate::MIN_CATALOG_ENGINE_VERSION.to_string()
}

/// Fragment catalog, keyed and iterated by identifier.
#[derive(Debug, Clone)]
pub struct FragmentCatalog {
    description: String,
    engine_min_version: semver::Version,
    fragments: BTreeMap<FragmentId, Fragment>,
    parameters: BTreeMap<String, Parameter>,
    outputs: BTreeMap<String, Output>,
}

impl FragmentCatalog {
    pub fn new() -> Self {
        Self {
            description: String::new(),
            engine_min_version: semver::Version::new(1, 0, 0),
            fragments: BTreeMap::new(),
            parameters: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Reads every `*.json` catalog file in `dir`, in file-name order.
    pub fn load_from_dir(dir: &Path) -> Result<Self, SynthesisError> {
        let mut paths: Vec<_> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().map_or(false, |e| e == "json"))
            .collect();
        paths.sort();

        let mut catalog = Self::new();
        for path in paths {
            let content = fs::read_to_string(&path)?;
            let file: CatalogFile = serde_json::from_str(&content).map_err(|e| {
                SynthesisError::InvalidCatalog(format!("{}: {}", path.display(), e))
            })?;
            debug!(path = %path.display(), fragments = file.fragments.len(), "loaded catalog file");
            catalog.merge(file)?;
        }
        Ok(catalog)
    }

    /// Adds the contents of a catalog file.
    ///
    /// Either the whole file is merged or the catalog is left untouched.
    pub fn merge(&mut self, file: CatalogFile) -> Result<(), SynthesisError> {
        let required = semver::Version::parse(&file.engine_min_version).map_err(|e| {
            SynthesisError::InvalidCatalog(format!(
                "engineMinVersion {:?}: {}",
                file.engine_min_version, e
            ))
        })?;

        let mut staged = self.clone();
        if required > staged.engine_min_version {
            staged.engine_min_version = required;
        }
        if staged.description.is_empty() {
            staged.description = file.description;
        }
        for parameter in file.parameters {
            staged.add_parameter(parameter)?;
        }
        for fragment in file.fragments {
            staged.register(fragment)?;
        }
        for output in file.outputs {
            staged.add_output(output)?;
        }

        *self = staged;
        Ok(())
    }

    pub fn register(&mut self, fragment: Fragment) -> Result<(), SynthesisError> {
        if self.fragments.contains_key(&fragment.id) {
            return Err(SynthesisError::DuplicateFragment(fragment.id));
        }
        debug!(fragment = %fragment.id, resource_type = %fragment.resource_type, "registered fragment");
        self.fragments.insert(fragment.id.clone(), fragment);
        Ok(())
    }

    pub fn add_parameter(&mut self, parameter: Parameter) -> Result<(), SynthesisError> {
        if self.parameters.contains_key(&parameter.name) {
            return Err(SynthesisError::InvalidCatalog(format!(
                "duplicate parameter {}",
                parameter.name
            )));
        }
        self.parameters.insert(parameter.name.clone(), parameter);
        Ok(())
    }

    pub fn add_output(&mut self, output: Output) -> Result<(), SynthesisError> {
        if self.outputs.contains_key(&output.name) {
            return Err(SynthesisError::InvalidCatalog(format!(
                "duplicate output {}",
                output.name
            )));
        }
        self.outputs.insert(output.name.clone(), output);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<&Fragment, SynthesisError> {
        self.fragments
            .get(id)
            .ok_or_else(|| SynthesisError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.fragments.contains_key(id)
    }

    /// Fragments in identifier order.
    pub fn list(&self) -> Vec<&Fragment> {
        self.fragments.values().collect()
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.values()
    }

    pub fn outputs(&self) -> impl Iterator<Item = &Output> {
        self.outputs.values()
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn engine_min_version(&self) -> &semver::Version {
        &self.engine_min_version
    }
}

impl Default for FragmentCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_duplicate_rejected() {
        let mut catalog = FragmentCatalog::new();
        catalog.register(Fragment::new("Vpc", ResourceType::VPC)).unwrap();
        let err = catalog
            .register(Fragment::new("Vpc", ResourceType::VPC))
            .unwrap_err();
        assert!(matches!(err, SynthesisError::DuplicateFragment(id) if id == "Vpc"));
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let catalog = FragmentCatalog::new();
        assert!(matches!(catalog.get("Nope"), Err(SynthesisError::NotFound(_))));
    }

    #[test]
    fn test_references_become_dependencies() {
        let subnet = Fragment::new("PublicSubnet1", ResourceType::SUBNET)
            .with_property("VpcId", PropertyValue::reference("Vpc"))
            .with_property(
                "Nested",
                PropertyValue::map([("Arn", PropertyValue::get_att("LogBucket", "Arn"))]),
            )
            .with_property("Name", PropertyValue::name_of("Other"))
            .depends_on("Gateway");

        let deps: Vec<_> = subnet.dependencies().into_iter().collect();
        assert_eq!(deps, vec!["Gateway", "LogBucket", "Vpc"]);
    }

    #[test]
    fn test_untaggable_types() {
        assert!(ResourceType::new(ResourceType::VPC).is_taggable());
        assert!(!ResourceType::new(ResourceType::ROUTE).is_taggable());
        assert!(!ResourceType::new("Custom::AccountPublicAccessBlock").is_taggable());
    }

    #[test]
    fn test_name_spec_defaults_to_id() {
        let f = Fragment::new("LogQueue", ResourceType::SQS_QUEUE);
        assert_eq!(f.name_spec().qualifiers, vec!["LogQueue".to_string()]);

        let f = f.with_suffix("queue");
        assert!(f.name_spec().qualifiers.is_empty());
    }

    #[test]
    fn test_catalog_file_parses() {
        let json = r#"{
            "description": "net",
            "parameters": [{"name": "VpcCidr", "kind": "string", "default": "10.0.0.0/16"}],
            "fragments": [
                {"id": "Vpc", "type": "AWS::EC2::VPC",
                 "properties": [{"name": "CidrBlock", "value": {"param": "VpcCidr"}}]}
            ],
            "outputs": [{"name": "VpcId", "value": {"ref": "Vpc"}, "export": true}]
        }"#;
        let file: CatalogFile = serde_json::from_str(json).unwrap();
        let mut catalog = FragmentCatalog::new();
        catalog.merge(file).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(
            catalog.get("Vpc").unwrap().property("CidrBlock"),
            Some(&PropertyValue::param("VpcCidr"))
        );
        assert_eq!(catalog.outputs().count(), 1);
    }

    #[test]
    fn test_failed_merge_leaves_catalog_untouched() {
        let mut catalog = FragmentCatalog::new();
        catalog.register(Fragment::new("Vpc", ResourceType::VPC)).unwrap();

        let file: CatalogFile = serde_json::from_str(
            r#"{
                "engineMinVersion": "1.0.0",
                "parameters": [{"name": "SubnetCidr", "kind": "string", "default": "10.0.1.0/24"}],
                "fragments": [
                    {"id": "Subnet", "type": "AWS::EC2::Subnet"},
                    {"id": "Vpc", "type": "AWS::EC2::VPC"}
                ]
            }"#,
        )
        .unwrap();
        let err = catalog.merge(file).unwrap_err();
        assert!(matches!(err, SynthesisError::DuplicateFragment(id) if id == "Vpc"));

        assert_eq!(catalog.len(), 1);
        assert!(!catalog.contains("Subnet"));
        assert_eq!(catalog.parameters().count(), 0);
    }
}
