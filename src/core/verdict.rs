use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::SandboxError;

/// Final status of a sandboxed run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictStatus {
    Success,
    ProgramError,
    ProgramNotFound,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    SandboxError,
}

impl fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VerdictStatus::Success => "SUCCESS",
            VerdictStatus::ProgramError => "PROGRAM_ERROR",
            VerdictStatus::ProgramNotFound => "PROGRAM_NOT_FOUND",
            VerdictStatus::TimeLimitExceeded => "TIME_LIMIT_EXCEEDED",
            VerdictStatus::MemoryLimitExceeded => "MEMORY_LIMIT_EXCEEDED",
            VerdictStatus::SandboxError => "SANDBOX_ERROR",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of one sandboxed run, as reported to the judge
///
/// `time` is in seconds and `memory` in KB. A negative value in either
/// means "at or beyond the relevant limit"; the magnitude is the limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<i64>,
}

impl Verdict {
    pub fn new(status: VerdictStatus) -> Self {
        Self {
            status,
            reason: None,
            exit_code: None,
            time: None,
            memory: None,
        }
    }

    /// Infrastructure failure carrying a diagnostic reason
    pub fn sandbox_error(reason: impl Into<String>) -> Self {
        Self::new(VerdictStatus::SandboxError).with_reason(reason)
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_optional_reason(mut self, reason: Option<impl Into<String>>) -> Self {
        self.reason = reason.map(Into::into);
        self
    }

    pub fn with_exit_code(mut self, exit_code: Option<i32>) -> Self {
        self.exit_code = exit_code;
        self
    }

    pub fn with_time(mut self, time: f64) -> Self {
        self.time = Some(time);
        self
    }

    pub fn with_memory(mut self, memory: i64) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == VerdictStatus::Success
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{} {}", self.status, reason),
            None => write!(f, "{}", self.status),
        }
    }
}

impl From<SandboxError> for Verdict {
    fn from(err: SandboxError) -> Self {
        Verdict::sandbox_error(err.to_string())
    }
}
