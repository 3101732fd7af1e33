//! # Streamform Core
//!
//! Reconciliation and policy engine for declarative Kafka topology.
//!
//! Domains declare topics grouped by visibility, the principals allowed to
//! consume them, per-topic configuration and schemas. The engine validates
//! the declaration, derives the access-control entries it implies, diffs
//! everything against the live cluster and schema registry, and applies the
//! difference behind dry-run and deletion gates. It can also restore
//! declarations from observed state.
//!
//! ## Naming
//!
//! | Resource | Name |
//! |----------|------|
//! | Domain prefix | `<domain>.` |
//! | Visibility prefix | `<domain>.<public\|protected\|private>.` |
//! | Topic | `<domain>.<visibility>.<name>` |
//! | Subject | `<topic>-key`, `<topic>-value` |
//! | Consumer group prefix | `<principal name>.` unless declared |
//!
//! ## Run phases
//!
//! ```text
//! Loaded ──► Validated ──► Diffed ──► Applying ──► Done
//!    │            │
//!    └────────────┴──► Failed (violations)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use streamform_core::{DeployOptions, EngineConfig, Orchestrator};
//!
//! let orchestrator = Orchestrator::new(cluster, registry, store, EngineConfig::default())?;
//! let report = orchestrator
//!     .deploy(Path::new("topology"), &DeployOptions::new().dry_run(true))
//!     .await?;
//! println!("{}", report);
//! ```
//!
//! Collaborators are reached through the [`ports`] traits; [`memory`] has
//! in-process implementations used by the tests.

/// Serde through `FromStr`/`Display` for enums with wire names
macro_rules! string_enum_serde {
    ($ty:ty) => {
        impl TryFrom<String> for $ty {
            type Error = String;

            fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$ty> for String {
            fn from(value: $ty) -> Self {
                value.to_string()
            }
        }
    };
}
pub(crate) use string_enum_serde;

pub mod acl;
pub mod config;
pub mod domain;
pub mod error;
pub mod memory;
pub mod observed;
pub mod orchestrator;
pub mod ports;
pub mod reconcile;
pub mod report;
pub mod restore;
pub mod schema;
pub mod topic_config;
pub mod validation;

pub use acl::{AccessEntry, AccessFilter, Operation, PatternType, Permission, ResourceType};
pub use config::{DeployOptions, EngineConfig};
pub use domain::{
    Consumer, DeclaredTopology, Domain, Topic, TopologyUnit, Visibility, VisibilityType,
};
pub use error::{Result, StoreError, StreamformError, TransportError};
pub use observed::{ObservedConsumerGroup, ObservedTopic};
pub use orchestrator::{Orchestrator, OrchestratorMetrics};
pub use ports::{ClusterAdmin, SchemaRegistryPort, TopologyStore};
pub use report::{OperationKind, Outcome, RunReport, RunState};
pub use schema::{CompatibilityMode, Schema, SchemaFormat};
pub use validation::{RuleId, ValidationConfig, Validator, Violation};
