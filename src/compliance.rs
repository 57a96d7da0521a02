//! Compliance Controls & Exceptions
//!
//! Rules decide whether a fragment satisfies a control. They look at the
//! properties as rendered for the run, after parameters and conditions are
//! applied. A control that is neither satisfied nor covered by a justified
//! exception blocks synthesis.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::error::SynthesisError;
use crate::fragments::{Fragment, FragmentCatalog, FragmentId, ResourceType};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// A suppressed control with the reason it is acceptable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceException {
    pub fragment_id: FragmentId,
    pub control_id: String,
    pub justification: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub control_id: String,
    pub fragment_id: String,
    pub message: String,
}

/// Findings for one document, in resolved fragment order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub findings: Vec<Finding>,
}

impl ValidationReport {
    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(|f| f.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Finding> {
        self.by_severity(Severity::Error)
    }

    pub fn by_severity(&self, severity: Severity) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.severity == severity)
    }

    fn push(
        &mut self,
        severity: Severity,
        control_id: &str,
        fragment_id: &str,
        message: impl Into<String>,
    ) {
        self.findings.push(Finding {
            severity,
            control_id: control_id.to_string(),
            fragment_id: fragment_id.to_string(),
            message: message.into(),
        });
    }
}

/// A fragment together with its properties rendered for one run.
#[derive(Debug, Clone)]
pub struct RenderedFragment<'a> {
    pub fragment: &'a Fragment,
    pub properties: Map<String, Value>,
}

impl<'a> RenderedFragment<'a> {
    pub fn new(fragment: &'a Fragment, properties: Map<String, Value>) -> Self {
        Self { fragment, properties }
    }

    pub fn id(&self) -> &str {
        &self.fragment.id
    }

    pub fn resource_type(&self) -> &ResourceType {
        &self.fragment.resource_type
    }

    /// A property rendered to `null` counts as absent.
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name).filter(|v| !v.is_null())
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.property(name).map_or(false, is_true)
    }

    /// Whether the named property points at `target` through `Ref` or `Fn::GetAtt`.
    pub fn property_refers_to(&self, name: &str, target: &str) -> bool {
        self.property(name).map_or(false, |v| refers_to(v, target))
    }
}

/// `true` as a JSON boolean or as the string a parameter renders to.
fn is_true(value: &Value) -> bool {
    matches!(value, Value::Bool(true)) || value.as_str() == Some("true")
}

fn refers_to(value: &Value, target: &str) -> bool {
    match value {
        Value::Object(map) => {
            let by_ref = map.get("Ref").and_then(Value::as_str) == Some(target);
            let by_att = map
                .get("Fn::GetAtt")
                .and_then(|v| v.get(0))
                .and_then(Value::as_str)
                == Some(target);
            by_ref || by_att || map.values().any(|v| refers_to(v, target))
        }
        Value::Array(items) => items.iter().any(|v| refers_to(v, target)),
        _ => false,
    }
}

/// A control some resource types must satisfy.
pub trait ControlRule: Send + Sync {
    fn id(&self) -> &'static str;

    /// Scanner and framework codes that name the same control.
    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    fn applies_to(&self, resource_type: &ResourceType) -> bool;

    /// `document` is every rendered fragment in the run, for cross-fragment checks.
    fn is_satisfied(&self, resource: &RenderedFragment<'_>, document: &[RenderedFragment<'_>]) -> bool;

    fn matches(&self, control: &str) -> bool {
        control == self.id() || self.aliases().iter().any(|a| *a == control)
    }
}

// --- Concrete Rules ---

pub struct EncryptionAtRestRule;

impl ControlRule for EncryptionAtRestRule {
    fn id(&self) -> &'static str {
        "encryption"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["SC-28", "SQS.1"]
    }

    fn applies_to(&self, t: &ResourceType) -> bool {
        t.is(ResourceType::S3_BUCKET) || t.is(ResourceType::SQS_QUEUE) || t.is(ResourceType::LOG_GROUP)
    }

    fn is_satisfied(&self, resource: &RenderedFragment<'_>, _document: &[RenderedFragment<'_>]) -> bool {
        let t = resource.resource_type();
        if t.is(ResourceType::S3_BUCKET) {
            resource.property("BucketEncryption").is_some()
        } else if t.is(ResourceType::SQS_QUEUE) {
            resource.property("KmsMasterKeyId").is_some() || resource.is_enabled("SqsManagedSseEnabled")
        } else {
            resource.property("KmsKeyId").is_some()
        }
    }
}

pub struct AccessLoggingRule;

impl ControlRule for AccessLoggingRule {
    fn id(&self) -> &'static str {
        "access-logging"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["S3.9", "W35"]
    }

    fn applies_to(&self, t: &ResourceType) -> bool {
        t.is(ResourceType::S3_BUCKET)
    }

    fn is_satisfied(&self, resource: &RenderedFragment<'_>, _document: &[RenderedFragment<'_>]) -> bool {
        resource.property("LoggingConfiguration").is_some()
    }
}

pub struct PublicAccessBlockRule;

impl ControlRule for PublicAccessBlockRule {
    fn id(&self) -> &'static str {
        "public-access-block"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["S3.8"]
    }

    fn applies_to(&self, t: &ResourceType) -> bool {
        t.is(ResourceType::S3_BUCKET)
    }

    fn is_satisfied(&self, resource: &RenderedFragment<'_>, _document: &[RenderedFragment<'_>]) -> bool {
        const FLAGS: [&str; 4] = [
            "BlockPublicAcls",
            "BlockPublicPolicy",
            "IgnorePublicAcls",
            "RestrictPublicBuckets",
        ];
        resource
            .property("PublicAccessBlockConfiguration")
            .map_or(false, |cfg| FLAGS.iter().all(|flag| cfg.get(flag).map_or(false, is_true)))
    }
}

/// Source queues need a redrive policy; a queue that is itself some other
/// queue's dead-letter target is exempt.
pub struct DeadLetterQueueRule;

impl ControlRule for DeadLetterQueueRule {
    fn id(&self) -> &'static str {
        "dead-letter-queue"
    }

    fn applies_to(&self, t: &ResourceType) -> bool {
        t.is(ResourceType::SQS_QUEUE)
    }

    fn is_satisfied(&self, resource: &RenderedFragment<'_>, document: &[RenderedFragment<'_>]) -> bool {
        resource.property("RedrivePolicy").is_some()
            || document.iter().any(|other| {
                other.id() != resource.id()
                    && other.resource_type().is(ResourceType::SQS_QUEUE)
                    && other.property_refers_to("RedrivePolicy", resource.id())
            })
    }
}

pub struct FlowLogsRule;

impl ControlRule for FlowLogsRule {
    fn id(&self) -> &'static str {
        "flow-logs"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["EC2.6"]
    }

    fn applies_to(&self, t: &ResourceType) -> bool {
        t.is(ResourceType::VPC)
    }

    fn is_satisfied(&self, resource: &RenderedFragment<'_>, document: &[RenderedFragment<'_>]) -> bool {
        document.iter().any(|other| {
            other.resource_type().is(ResourceType::FLOW_LOG)
                && other.property_refers_to("ResourceId", resource.id())
        })
    }
}

pub struct LogRetentionRule;

impl ControlRule for LogRetentionRule {
    fn id(&self) -> &'static str {
        "log-retention"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["AU-11"]
    }

    fn applies_to(&self, t: &ResourceType) -> bool {
        t.is(ResourceType::LOG_GROUP)
    }

    fn is_satisfied(&self, resource: &RenderedFragment<'_>, _document: &[RenderedFragment<'_>]) -> bool {
        resource.property("RetentionInDays").is_some()
    }
}

pub fn default_rules() -> Vec<Box<dyn ControlRule>> {
    vec![
        Box::new(EncryptionAtRestRule),
        Box::new(AccessLoggingRule),
        Box::new(PublicAccessBlockRule),
        Box::new(DeadLetterQueueRule),
        Box::new(FlowLogsRule),
        Box::new(LogRetentionRule),
    ]
}

/// Recorded exceptions plus the control rules they are checked against.
pub struct ComplianceTracker {
    recorded: BTreeMap<FragmentId, Vec<ComplianceException>>,
    rules: Vec<Box<dyn ControlRule>>,
}

impl ComplianceTracker {
    pub fn new() -> Self {
        Self::with_rules(default_rules())
    }

    pub fn with_rules(rules: Vec<Box<dyn ControlRule>>) -> Self {
        Self {
            recorded: BTreeMap::new(),
            rules,
        }
    }

    pub fn rules(&self) -> impl Iterator<Item = &dyn ControlRule> {
        self.rules.iter().map(|r| r.as_ref())
    }

    pub fn record(
        &mut self,
        catalog: &FragmentCatalog,
        fragment_id: &str,
        control_id: &str,
        justification: &str,
    ) -> Result<(), SynthesisError> {
        if !catalog.contains(fragment_id) {
            return Err(SynthesisError::UnknownFragment {
                fragment: fragment_id.to_string(),
                control: control_id.to_string(),
            });
        }
        if justification.trim().is_empty() {
            return Err(SynthesisError::EmptyJustification {
                fragment: fragment_id.to_string(),
                control: control_id.to_string(),
            });
        }
        debug!(fragment = fragment_id, control = control_id, "recorded exception");
        self.recorded
            .entry(fragment_id.to_string())
            .or_default()
            .push(ComplianceException {
                fragment_id: fragment_id.to_string(),
                control_id: control_id.to_string(),
                justification: justification.trim().to_string(),
            });
        Ok(())
    }

    /// Annotations declared on the fragment followed by recorded exceptions.
    pub fn exceptions_for(&self, fragment: &Fragment) -> Vec<ComplianceException> {
        let declared = fragment.exceptions.iter().map(|a| ComplianceException {
            fragment_id: fragment.id.clone(),
            control_id: a.control.clone(),
            justification: a.justification.trim().to_string(),
        });
        let recorded = self.recorded.get(&fragment.id).into_iter().flatten().cloned();
        declared.chain(recorded).collect()
    }

    /// Runs every rule without failing; the report lists all findings.
    pub fn assess(&self, document: &[RenderedFragment<'_>]) -> ValidationReport {
        let mut report = ValidationReport::default();

        for resource in document {
            let fragment = resource.fragment;
            let exceptions = self.exceptions_for(fragment);
            let applicable: Vec<&dyn ControlRule> = self
                .rules()
                .filter(|r| r.applies_to(&fragment.resource_type))
                .collect();

            for rule in &applicable {
                let satisfied = fragment.satisfies.iter().any(|c| rule.matches(c))
                    || rule.is_satisfied(resource, document);
                let exception = exceptions.iter().find(|e| rule.matches(&e.control_id));

                match (satisfied, exception) {
                    (true, Some(e)) => report.push(
                        Severity::Warning,
                        rule.id(),
                        &fragment.id,
                        format!("exception {} is redundant: control is satisfied", e.control_id),
                    ),
                    (true, None) => {}
                    (false, Some(e)) => report.push(
                        Severity::Info,
                        rule.id(),
                        &fragment.id,
                        format!("excepted: {}", e.justification),
                    ),
                    (false, None) => report.push(
                        Severity::Error,
                        rule.id(),
                        &fragment.id,
                        format!(
                            "{} requires control {} with no recorded exception",
                            fragment.resource_type,
                            rule.id()
                        ),
                    ),
                }
            }

            for e in &exceptions {
                if !applicable.iter().any(|r| r.matches(&e.control_id)) {
                    report.push(
                        Severity::Warning,
                        &e.control_id,
                        &fragment.id,
                        format!(
                            "control {} is not checked for {}; exception is advisory",
                            e.control_id, fragment.resource_type
                        ),
                    );
                }
            }
        }

        report
    }

    /// Fails on the first blank annotation or unmitigated control.
    pub fn validate(&self, document: &[RenderedFragment<'_>]) -> Result<ValidationReport, SynthesisError> {
        for RenderedFragment { fragment, .. } in document {
            if let Some(blank) = fragment
                .exceptions
                .iter()
                .find(|a| a.justification.trim().is_empty())
            {
                return Err(SynthesisError::EmptyJustification {
                    fragment: fragment.id.clone(),
                    control: blank.control.clone(),
                });
            }
        }

        let report = self.assess(document);
        for finding in report.by_severity(Severity::Warning) {
            warn!(
                fragment = %finding.fragment_id,
                control = %finding.control_id,
                "{}",
                finding.message
            );
        }
        if let Some(first) = report.errors().next() {
            return Err(SynthesisError::UnmitigatedControl {
                control: first.control_id.clone(),
                fragment: first.fragment_id.clone(),
            });
        }
        Ok(report)
    }
}

impl Default for ComplianceTracker {
    fn default() -> Self {
        Self::new()
    }
}
