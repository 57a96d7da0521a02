//! Catalog Parameters
//!
//! Every parameter is resolved to a string and checked against its predicate
//! before any fragment is touched.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::SynthesisError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Number,
    Enum,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub name: String,
    pub kind: ParamKind,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default: Option<String>,
    /// Must match the whole value.
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub allowed_values: Vec<String>,
    #[serde(default)]
    pub min_value: Option<f64>,
    #[serde(default)]
    pub max_value: Option<f64>,
}

impl Parameter {
    fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
            default: None,
            pattern: None,
            allowed_values: vec![],
            min_value: None,
            max_value: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::String)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Number)
    }

    pub fn enumeration<I, S>(name: impl Into<String>, allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut p = Self::new(name, ParamKind::Enum);
        p.allowed_values = allowed.into_iter().map(Into::into).collect();
        p
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min_value = Some(min);
        self.max_value = Some(max);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn reject(&self, value: &str, reason: impl Into<String>) -> SynthesisError {
        SynthesisError::ParameterValidation {
            parameter: self.name.clone(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Checks `value` against the kind, allowed values, range and pattern.
    pub fn validate(&self, value: &str) -> Result<(), SynthesisError> {
        match self.kind {
            ParamKind::Number => {
                let n: f64 = value
                    .trim()
                    .parse()
                    .map_err(|_| self.reject(value, "not a number"))?;
                if !n.is_finite() {
                    return Err(self.reject(value, "not a finite number"));
                }
                if let Some(min) = self.min_value {
                    if n < min {
                        return Err(self.reject(value, format!("below minimum {}", min)));
                    }
                }
                if let Some(max) = self.max_value {
                    if n > max {
                        return Err(self.reject(value, format!("above maximum {}", max)));
                    }
                }
            }
            ParamKind::Enum if self.allowed_values.is_empty() => {
                return Err(SynthesisError::InvalidCatalog(format!(
                    "enum parameter {} has no allowed values",
                    self.name
                )));
            }
            ParamKind::Enum | ParamKind::String => {}
        }

        if !self.allowed_values.is_empty() && !self.allowed_values.iter().any(|v| v == value) {
            return Err(self.reject(
                value,
                format!("not one of [{}]", self.allowed_values.join(", ")),
            ));
        }

        if let Some(pattern) = &self.pattern {
            let re = Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
                SynthesisError::InvalidCatalog(format!("parameter {} pattern: {}", self.name, e))
            })?;
            if !re.is_match(value) {
                return Err(self.reject(value, format!("does not match pattern {}", pattern)));
            }
        }

        Ok(())
    }
}

/// Where a resolved parameter value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueSource {
    Default,
    Override,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedParameter {
    pub kind: ParamKind,
    pub value: String,
    pub source: ValueSource,
}

impl ResolvedParameter {
    /// Numbers render as JSON numbers, everything else as strings.
    pub fn to_json(&self) -> serde_json::Value {
        if self.kind == ParamKind::Number {
            let trimmed = self.value.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                return serde_json::Value::from(i);
            }
            if let Some(n) = trimmed
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
            {
                return serde_json::Value::Number(n);
            }
        }
        serde_json::Value::String(self.value.clone())
    }

    /// Only the exact string `true` selects the `then` branch.
    pub fn is_true(&self) -> bool {
        self.value == "true"
    }
}

/// Resolves every declared parameter against the overrides.
///
/// Overrides naming an undeclared parameter are rejected.
pub fn resolve_parameters<'a>(
    declared: impl IntoIterator<Item = &'a Parameter>,
    overrides: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, ResolvedParameter>, SynthesisError> {
    let declared: BTreeMap<&str, &Parameter> =
        declared.into_iter().map(|p| (p.name.as_str(), p)).collect();

    if let Some((name, value)) = overrides
        .iter()
        .find(|(name, _)| !declared.contains_key(name.as_str()))
    {
        return Err(SynthesisError::ParameterValidation {
            parameter: name.clone(),
            value: value.clone(),
            reason: "unknown parameter".to_string(),
        });
    }

    let mut resolved = BTreeMap::new();
    for (name, parameter) in declared {
        let (value, source) = match (overrides.get(name), &parameter.default) {
            (Some(v), _) => (v.clone(), ValueSource::Override),
            (None, Some(d)) => (d.clone(), ValueSource::Default),
            (None, None) => return Err(parameter.reject("", "no value supplied")),
        };
        parameter.validate(&value)?;
        resolved.insert(
            name.to_string(),
            ResolvedParameter {
                kind: parameter.kind,
                value,
                source,
            },
        );
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cidr() -> Parameter {
        Parameter::string("VpcCidr")
            .with_default("10.0.0.0/16")
            .with_pattern(r"(\d{1,3}\.){3}\d{1,3}/\d{1,2}")
    }

    #[test]
    fn test_default_used_without_override() {
        let resolved = resolve_parameters([&cidr()], &BTreeMap::new()).unwrap();
        let p = &resolved["VpcCidr"];
        assert_eq!(p.value, "10.0.0.0/16");
        assert_eq!(p.source, ValueSource::Default);
    }

    #[test]
    fn test_pattern_must_match_whole_value() {
        let overrides = BTreeMap::from([("VpcCidr".to_string(), "10.0.0.0/16 x".to_string())]);
        let err = resolve_parameters([&cidr()], &overrides).unwrap_err();
        assert!(matches!(err, SynthesisError::ParameterValidation { parameter, .. } if parameter == "VpcCidr"));
    }

    #[test]
    fn test_number_range() {
        let p = Parameter::number("LogRetentionDays").with_range(1.0, 3653.0);
        assert!(p.validate("365").is_ok());
        assert!(p.validate("0").is_err());
        assert!(p.validate("many").is_err());
    }

    #[test]
    fn test_enum_allowed_values() {
        let p = Parameter::enumeration("MapPublicIpOnLaunch", ["true", "false"]);
        assert!(p.validate("false").is_ok());
        assert!(p.validate("yes").is_err());
    }

    #[test]
    fn test_missing_value_rejected() {
        let p = Parameter::string("BucketSuffix");
        let err = resolve_parameters([&p], &BTreeMap::new()).unwrap_err();
        assert!(err.to_string().contains("no value supplied"));
    }

    #[test]
    fn test_unknown_override_rejected() {
        let overrides = BTreeMap::from([("Bogus".to_string(), "1".to_string())]);
        let err = resolve_parameters([&cidr()], &overrides).unwrap_err();
        assert!(err.to_string().contains("unknown parameter"));
    }

    #[test]
    fn test_number_renders_as_json_number() {
        let p = ResolvedParameter {
            kind: ParamKind::Number,
            value: "14".into(),
            source: ValueSource::Override,
        };
        assert_eq!(p.to_json(), serde_json::json!(14));
    }

    #[test]
    fn test_toggle_is_case_sensitive() {
        let toggle = |value: &str| ResolvedParameter {
            kind: ParamKind::String,
            value: value.into(),
            source: ValueSource::Override,
        };
        assert!(toggle("true").is_true());
        assert!(!toggle("TRUE").is_true());
        assert!(!toggle("True").is_true());
        assert!(!toggle("false").is_true());
    }
}
