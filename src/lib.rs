//! Sandboxed execution of untrusted programs for an online judge.
//!
//! [`Supervisor::execute`] runs one program inside an isolate box and returns
//! exactly one [`Verdict`]; [`classifier::classify`] holds the decision rules.

pub mod classifier;
pub mod core;
pub mod sandbox;

pub use crate::core::{SandboxError, Verdict, VerdictStatus};
pub use crate::sandbox::{RunSpec, RunSpecBuilder, SandboxConfig, Supervisor};
