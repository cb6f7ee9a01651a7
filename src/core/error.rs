//! Infrastructure errors raised while preparing, running or reading back a sandboxed run.
//!
//! None of these reach the judge caller directly: the supervisor converts every
//! one of them into a `SANDBOX_ERROR` verdict.

use thiserror::Error;

use crate::sandbox::meta::MetaError;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("no command specified for execution")]
    EmptyCommand,

    #[error("invalid limit: {0}")]
    InvalidLimit(String),

    #[error("invalid file name `{0}`: must be a plain name inside the working directory")]
    InvalidFileName(String),

    #[error("file name `{name}` is already used for {used_for}")]
    FileNameConflict { name: String, used_for: &'static str },

    #[error("invalid sandbox configuration: {0}")]
    InvalidConfig(String),

    #[error("sandbox runtime `{0}` not found")]
    RuntimeNotFound(String),

    #[error("failed to launch sandbox runtime `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to initialize sandbox box {box_id}: {message}")]
    BoxInit { box_id: u32, message: String },

    #[error("sandbox runtime did not finish within the {0:.3}s supervisory timeout")]
    SupervisorTimeout(f64),

    #[error("result files do not exist")]
    ResultFilesMissing,

    #[error("failed to parse metadata: {0}")]
    Meta(#[from] MetaError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    /// Map a spawn failure of the runtime binary to the matching variant
    pub fn spawn(program: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            SandboxError::RuntimeNotFound(program.to_string())
        } else {
            SandboxError::Spawn {
                program: program.to_string(),
                source,
            }
        }
    }
}
