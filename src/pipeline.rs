//! Synthesis Pipeline - Single Entry Point
//!
//! CRITICAL: synthesize MUST run compliance validation. No bypass.
//!
//! A run either returns a complete document or an error; nothing partial is
//! ever handed back.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::compliance::{ComplianceTracker, RenderedFragment, ValidationReport};
use crate::config::SynthesisConfig;
use crate::error::SynthesisError;
use crate::fragments::{Fragment, FragmentCatalog, PropertyValue};
use crate::hashing::compute_document_hash;
use crate::naming::Naming;
use crate::params::{resolve_parameters, ResolvedParameter};
use crate::resolver::resolve_order;
use crate::ENGINE_VERSION;

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static VALIDATION_CALL_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_validation_call_count() -> u32 {
    VALIDATION_CALL_COUNT.load(Ordering::SeqCst)
}

#[cfg(feature = "test-hooks")]
pub fn reset_validation_call_count() {
    VALIDATION_CALL_COUNT.store(0, Ordering::SeqCst);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedResource {
    pub logical_id: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    pub properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedOutput {
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedDocument {
    pub engine_version: String,
    pub description: String,
    pub document_hash: String,
    pub parameters: BTreeMap<String, ResolvedParameter>,
    pub resources: Vec<ResolvedResource>,
    pub outputs: BTreeMap<String, ResolvedOutput>,
}

impl ResolvedDocument {
    pub fn resource(&self, logical_id: &str) -> Option<&ResolvedResource> {
        self.resources.iter().find(|r| r.logical_id == logical_id)
    }

    pub fn position(&self, logical_id: &str) -> Option<usize> {
        self.resources.iter().position(|r| r.logical_id == logical_id)
    }

    pub fn logical_ids(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.logical_id.as_str()).collect()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Turns unresolved property values into final JSON for one run.
struct Renderer<'a> {
    parameters: &'a BTreeMap<String, ResolvedParameter>,
    names: &'a BTreeMap<String, Naming>,
}

impl Renderer<'_> {
    fn parameter(&self, owner: &str, name: &str) -> Result<&ResolvedParameter, SynthesisError> {
        self.parameters.get(name).ok_or_else(|| {
            SynthesisError::InvalidCatalog(format!("{} references undeclared parameter {}", owner, name))
        })
    }

    fn render(&self, owner: &str, value: &PropertyValue) -> Result<Value, SynthesisError> {
        Ok(match value {
            PropertyValue::Literal(v) => v.clone(),
            PropertyValue::Param(name) => self.parameter(owner, name)?.to_json(),
            PropertyValue::Ref(id) => json!({ "Ref": id }),
            PropertyValue::GetAtt { fragment, attribute } => {
                json!({ "Fn::GetAtt": [fragment, attribute] })
            }
            PropertyValue::NameOf(id) => {
                let naming = self.names.get(id).ok_or_else(|| SynthesisError::UnresolvedDependency {
                    fragment: owner.to_string(),
                    dependency: id.clone(),
                })?;
                Value::String(naming.name.clone())
            }
            PropertyValue::If { param, then, otherwise } => {
                if self.parameter(owner, param)?.is_true() {
                    self.render(owner, then)?
                } else {
                    self.render(owner, otherwise)?
                }
            }
            PropertyValue::Join { delimiter, parts } => {
                let rendered = parts
                    .iter()
                    .map(|p| self.render(owner, p))
                    .collect::<Result<Vec<_>, _>>()?;
                let strings: Option<Vec<&str>> = rendered.iter().map(Value::as_str).collect();
                match strings {
                    Some(s) => Value::String(s.join(delimiter.as_str())),
                    None => json!({ "Fn::Join": [delimiter, rendered] }),
                }
            }
            PropertyValue::List(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.render(owner, v))
                    .collect::<Result<_, _>>()?,
            ),
            PropertyValue::Map(entries) => {
                let mut map = Map::new();
                for entry in entries {
                    map.insert(entry.name.clone(), self.render(owner, &entry.value)?);
                }
                Value::Object(map)
            }
        })
    }

    fn render_properties(&self, fragment: &Fragment) -> Result<Map<String, Value>, SynthesisError> {
        let mut properties = Map::new();
        for property in &fragment.properties {
            if properties.contains_key(&property.name) {
                return Err(SynthesisError::InvalidCatalog(format!(
                    "{} declares property {} twice",
                    fragment.id, property.name
                )));
            }
            properties.insert(
                property.name.clone(),
                self.render(&fragment.id, &property.value)?,
            );
        }
        Ok(properties)
    }
}

/// Everything a run derives before compliance is checked.
struct Prepared<'a> {
    parameters: BTreeMap<String, ResolvedParameter>,
    names: BTreeMap<String, Naming>,
    rendered: Vec<RenderedFragment<'a>>,
}

/// The synthesis pipeline - single entry point for building documents
pub struct SynthesisPipeline {
    catalog: FragmentCatalog,
    tracker: ComplianceTracker,
}

impl SynthesisPipeline {
    pub fn new(catalog: FragmentCatalog) -> Self {
        Self::with_tracker(catalog, ComplianceTracker::new())
    }

    pub fn with_tracker(catalog: FragmentCatalog, tracker: ComplianceTracker) -> Self {
        Self { catalog, tracker }
    }

    pub fn catalog(&self) -> &FragmentCatalog {
        &self.catalog
    }

    /// List all fragments in identifier order
    pub fn list_fragments(&self) -> Vec<&Fragment> {
        self.catalog.list()
    }

    /// Record a compliance exception against a catalog fragment
    pub fn record_exception(
        &mut self,
        fragment_id: &str,
        control_id: &str,
        justification: &str,
    ) -> Result<(), SynthesisError> {
        self.tracker
            .record(&self.catalog, fragment_id, control_id, justification)
    }

    /// Dependency order of the whole catalog
    pub fn resolve_order(&self) -> Result<Vec<&Fragment>, SynthesisError> {
        resolve_order(self.catalog.list())
    }

    /// Full compliance report for one configuration, including unmitigated
    /// controls.
    ///
    /// Unlike `synthesize`, this does not stop at the first error, so the
    /// caller can forward every finding.
    pub fn validation_report(&self, config: &SynthesisConfig) -> Result<ValidationReport, SynthesisError> {
        let prepared = self.prepare(config)?;
        Ok(self.tracker.assess(&prepared.rendered))
    }

    /// Synthesize a document
    ///
    /// CRITICAL: This ALWAYS validates compliance. No bypass possible.
    pub fn synthesize(&self, config: &SynthesisConfig) -> Result<ResolvedDocument, SynthesisError> {
        info!(
            prefix = %config.prefix,
            account_id = %config.account_id,
            region = %config.region,
            fragments = self.catalog.len(),
            "starting synthesis"
        );

        let Prepared {
            parameters,
            names,
            rendered,
        } = self.prepare(config)?;

        // MANDATORY: compliance validation runs on every synthesis, against
        // the properties exactly as they will be emitted.
        #[cfg(feature = "test-hooks")]
        VALIDATION_CALL_COUNT.fetch_add(1, Ordering::SeqCst);
        let report = self.tracker.validate(&rendered)?;
        debug!(findings = report.findings.len(), "compliance validated");

        let mut resources = Vec::with_capacity(rendered.len());
        for item in rendered {
            resources.push(self.assemble(item, &names)?);
        }

        let renderer = Renderer {
            parameters: &parameters,
            names: &names,
        };
        let mut outputs = BTreeMap::new();
        for output in self.catalog.outputs() {
            let owner = format!("Outputs.{}", output.name);
            let mut referenced = Default::default();
            output.value.collect_references(&mut referenced);
            output.value.collect_name_refs(&mut referenced);
            if let Some(missing) = referenced.into_iter().find(|id| !self.catalog.contains(id)) {
                return Err(SynthesisError::UnresolvedDependency {
                    fragment: owner,
                    dependency: missing.to_string(),
                });
            }
            outputs.insert(
                output.name.clone(),
                ResolvedOutput {
                    value: renderer.render(&owner, &output.value)?,
                    description: output.description.clone(),
                    export_name: output
                        .export
                        .then(|| format!("{}-{}", config.prefix, output.name)),
                },
            );
        }

        let mut document = ResolvedDocument {
            engine_version: ENGINE_VERSION.to_string(),
            description: self.catalog.description().to_string(),
            document_hash: String::new(), // Computed after
            parameters,
            resources,
            outputs,
        };
        document.document_hash = compute_document_hash(&document)?;

        info!(
            resources = document.resources.len(),
            outputs = document.outputs.len(),
            hash = %document.document_hash,
            "synthesis complete"
        );
        Ok(document)
    }

    /// Parameters, order, names and rendered properties for one run.
    fn prepare(&self, config: &SynthesisConfig) -> Result<Prepared<'_>, SynthesisError> {
        self.check_engine_version()?;

        let parameters = resolve_parameters(self.catalog.parameters(), &config.overrides)?;
        debug!(count = parameters.len(), "resolved parameters");

        let order = self.resolve_order()?;
        let names = config.naming_policy().assign(order.iter().copied())?;

        let renderer = Renderer {
            parameters: &parameters,
            names: &names,
        };
        let mut rendered = Vec::with_capacity(order.len());
        for fragment in order {
            let properties = renderer.render_properties(fragment)?;
            rendered.push(RenderedFragment::new(fragment, properties));
        }

        Ok(Prepared {
            parameters,
            names,
            rendered,
        })
    }

    /// Adds tags and compliance metadata to a rendered fragment.
    fn assemble(
        &self,
        rendered: RenderedFragment<'_>,
        names: &BTreeMap<String, Naming>,
    ) -> Result<ResolvedResource, SynthesisError> {
        let RenderedFragment {
            fragment,
            mut properties,
        } = rendered;
        let naming = names
            .get(&fragment.id)
            .ok_or_else(|| SynthesisError::NotFound(fragment.id.clone()))?;

        if !naming.tags.is_empty() {
            if properties.contains_key("Tags") {
                return Err(SynthesisError::InvalidCatalog(format!(
                    "{} sets Tags directly; use fragment tags instead",
                    fragment.id
                )));
            }
            let tags: Vec<Value> = naming
                .tags
                .iter()
                .map(|(k, v)| json!({ "Key": k, "Value": v }))
                .collect();
            properties.insert("Tags".to_string(), Value::Array(tags));
        }

        let exceptions = self.tracker.exceptions_for(fragment);
        let metadata = (!exceptions.is_empty()).then(|| {
            let entries: Vec<Value> = exceptions
                .iter()
                .map(|e| json!({ "control": e.control_id, "justification": e.justification }))
                .collect();
            json!({ "compliance": { "exceptions": entries } })
        });

        Ok(ResolvedResource {
            logical_id: fragment.id.clone(),
            resource_type: fragment.resource_type.to_string(),
            name: naming.name.clone(),
            depends_on: fragment.dependencies().into_iter().map(String::from).collect(),
            properties,
            metadata,
        })
    }

    fn check_engine_version(&self) -> Result<(), SynthesisError> {
        let engine_ver = semver::Version::parse(ENGINE_VERSION)
            .map_err(|_| SynthesisError::InvalidCatalog("Invalid engine version".into()))?;
        let required = self.catalog.engine_min_version();

        if &engine_ver < required {
            return Err(SynthesisError::EngineVersionMismatch {
                required: required.to_string(),
                current: ENGINE_VERSION.to_string(),
            });
        }

        Ok(())
    }
}

impl Default for SynthesisPipeline {
    fn default() -> Self {
        Self::new(FragmentCatalog::default())
    }
}
