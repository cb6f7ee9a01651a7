pub mod error;
pub mod verdict;

pub use error::SandboxError;
pub use verdict::{Verdict, VerdictStatus};
