//! Sandbox module - invocation builder and supervisor
//!
//! This module turns a [`RunSpec`] into a run of the isolation runtime:
//! - Limit translation shared with the classifier
//! - Runtime argument rendering
//! - Isolate box initialization and guaranteed cleanup
//! - Supervision under an outer timeout
//! - Parsing of the runtime's meta reports
//!
//! The sandbox module does NOT decide verdicts; that is the classifier's job.

pub mod config;
pub mod invocation;
pub mod isolate_box;
pub mod limits;
pub mod meta;
pub mod spec;
pub mod supervisor;

// Re-exports for convenience
pub use config::{get_config, init_config, SandboxConfig};
pub use invocation::Invocation;
pub use isolate_box::IsolateBox;
pub use limits::{EffectiveLimits, MemoryLimits, TimeLimits};
pub use meta::{ExecutionMetadata, MetaError, SandboxStatus};
pub use spec::{RunSpec, RunSpecBuilder};
pub use supervisor::Supervisor;
