//! Landing Zone Core - Compliance-Checked Infrastructure Synthesis
//!
//! # Guarantees
//! 1. Dependencies Come First
//! 2. Names Are Unique
//! 3. Every Required Control Is Satisfied Or Justified
//! 4. Deterministic Output
//! 5. All Or Nothing

pub mod compliance;
pub mod config;
pub mod error;
pub mod fragments;
pub mod hashing;
pub mod landing_zone;
pub mod naming;
pub mod params;
pub mod pipeline;
pub mod resolver;

pub use compliance::{
    ComplianceException, ComplianceTracker, ControlRule, Finding, RenderedFragment, Severity, ValidationReport,
};
pub use config::{ConfigError, SynthesisConfig};
pub use error::SynthesisError;
pub use fragments::{Fragment, FragmentCatalog, FragmentId, Output, PropertyValue, ResourceType};
pub use hashing::{canonical_json, compute_document_hash, compute_run_key};
pub use naming::NamingPolicy;
pub use params::{Parameter, ParamKind};
pub use pipeline::{ResolvedDocument, ResolvedOutput, ResolvedResource, SynthesisPipeline};
pub use resolver::resolve_order;

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const MIN_CATALOG_ENGINE_VERSION: &str = "1.0.0";
