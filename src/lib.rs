//! # verifier-core
//!
//! Verifies, benchmarks, scores and tracks the coding usability of LLMs
//! exposed through OpenAI-compatible and native HTTP APIs.
//!
//! ## Core Components
//!
//! - **Adapter**: vendor wire formats behind one probe surface
//! - **Probe**: named capability tests with deterministic evaluators
//! - **Engine**: the per-target verification state machine
//! - **Catalog**: encrypted persistence and the registry façade
//! - **Events**: typed change events with bounded fan-out
//! - **Governor**: per-provider rate limiting and back-off
//! - **Scheduler**: persisted recurring verification jobs
//!
//! ## Example
//!
//! ```rust,ignore
//! use verifier_core::config::VerifierConfig;
//! use verifier_core::driver::Driver;
//!
//! let config = VerifierConfig::from_path("verifier.toml")?;
//! let driver = Driver::build(config, &secret)?;
//! let exit_code = driver.run_once().await?;
//! ```

pub mod adapter;
pub mod catalog;
pub mod config;
pub mod driver;
pub mod engine;
pub mod enrich;
pub mod error;
pub mod events;
pub mod export;
pub mod governor;
pub mod probe;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testutil;

// Re-exports for convenience
pub use adapter::{
    AdapterKind, ChatOptions, ChatOutcome, ChatTurn, DeclaredCaps, ListedModel, ProviderAdapter,
    ProviderEndpoint, RateLimitHints,
};
pub use catalog::{
    AuditLog, CatalogStore, Classification, Issue, ModelRecord, ModelRegistry, ProviderRecord,
    QueryFilter, RunTrigger, ScoreSnapshot, TargetSelector, VerificationRun,
};
pub use engine::{
    AbortReason, CancelToken, EngineConfig, ProviderVerification, RunOutcome, VerificationEngine,
};
pub use error::{AdapterError, Error, Result};
pub use events::{Event, EventBus, EventFilter, EventKind};
pub use governor::{ProviderLimits, RateGovernor};
pub use probe::{Probe, ProbeOutcome, ProbeReport, ProbeSuite, SUITE_VERSION};
pub use scheduler::Scheduler;
