//! Catalog: encrypted persistence and the registry façade.
//!
//! The store owns persisted state exclusively; the registry is a
//! read-through/write-through façade holding a cached projection. All
//! mutations flow through the verification engine, serialised per model.

mod audit;
mod crypto;
mod registry;
mod schema;
mod store;
mod types;

pub use audit::{AuditLog, AuditRecord};
pub use crypto::Crypto;
pub use registry::ModelRegistry;
pub use schema::SCHEMA_VERSION;
pub use store::{CatalogStore, DiscoveryDiff, OrderBy, QueryFilter};
pub use types::{
    classifications_from_text, classifications_to_text, feature_bits, new_id, AxisScores,
    Classification, DiscoveryMode, DurableBinding, Issue, IssueSubject, JobRecord, LimitSnapshot,
    ModelRecord, OverlapPolicy, PricingSample, ProviderRecord, RunTrigger, ScoreSnapshot,
    Severity, TargetSelector, VerificationRun,
};
