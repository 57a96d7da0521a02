//! Synthesis errors
//!
//! Every failure aborts the run. None of these are retryable: they point at
//! a defect in the catalog or the configuration.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("Duplicate fragment: {0}")]
    DuplicateFragment(String),

    #[error("Fragment not found: {0}")]
    NotFound(String),

    #[error("Cyclic dependency: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    #[error("Fragment {fragment} depends on unknown fragment {dependency}")]
    UnresolvedDependency { fragment: String, dependency: String },

    #[error("Name collision: {name} derived for both {first} and {second}")]
    NameCollision {
        name: String,
        first: String,
        second: String,
    },

    #[error("Empty justification for exception {control} on {fragment}")]
    EmptyJustification { fragment: String, control: String },

    #[error("Exception {control} recorded for unknown fragment {fragment}")]
    UnknownFragment { fragment: String, control: String },

    #[error("Unmitigated control {control} on fragment {fragment}")]
    UnmitigatedControl { control: String, fragment: String },

    #[error("Parameter {parameter} rejected value {value:?}: {reason}")]
    ParameterValidation {
        parameter: String,
        value: String,
        reason: String,
    },

    #[error("Catalog requires engine >= {required}, current is {current}")]
    EngineVersionMismatch { required: String, current: String },

    #[error("Invalid catalog: {0}")]
    InvalidCatalog(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SynthesisError {
    /// Fragment the failure points at, when there is one.
    pub fn fragment_id(&self) -> Option<&str> {
        match self {
            Self::DuplicateFragment(id) | Self::NotFound(id) => Some(id),
            Self::CyclicDependency(cycle) => cycle.first().map(String::as_str),
            Self::UnresolvedDependency { fragment, .. }
            | Self::EmptyJustification { fragment, .. }
            | Self::UnknownFragment { fragment, .. }
            | Self::UnmitigatedControl { fragment, .. } => Some(fragment),
            Self::NameCollision { second, .. } => Some(second),
            _ => None,
        }
    }

    /// Control the failure points at, when there is one.
    pub fn control_id(&self) -> Option<&str> {
        match self {
            Self::EmptyJustification { control, .. }
            | Self::UnknownFragment { control, .. }
            | Self::UnmitigatedControl { control, .. } => Some(control),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_members() {
        let err = SynthesisError::CyclicDependency(vec!["A".into(), "B".into()]);
        assert_eq!(err.to_string(), "Cyclic dependency: A -> B");
        assert_eq!(err.fragment_id(), Some("A"));
    }

    #[test]
    fn test_unmitigated_context() {
        let err = SynthesisError::UnmitigatedControl {
            control: "access-logging".into(),
            fragment: "S3Bucket".into(),
        };
        assert_eq!(err.fragment_id(), Some("S3Bucket"));
        assert_eq!(err.control_id(), Some("access-logging"));
    }
}
