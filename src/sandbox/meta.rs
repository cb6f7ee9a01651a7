//! Isolate meta file parser
//!
//! Parses the `key:value` report written by the isolation runtime, plus the
//! optional secondary report carrying `io-time`.

use std::io::ErrorKind;
use std::path::Path;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, trace};

use crate::core::SandboxError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetaError {
    #[error("malformed line {line}: {content:?}")]
    MalformedLine { line: usize, content: String },

    #[error("invalid value for `{key}`: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("unknown sandbox status `{0}`")]
    UnknownStatus(String),
}

/// Raw execution status from the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SandboxStatus {
    /// Program ran to completion (any exit code)
    #[default]
    Ok,
    /// Killed by the runtime's own timer
    TimeLimit,
    /// Killed by signal
    Signaled,
    /// Internal error in the runtime
    SandboxError,
}

impl SandboxStatus {
    fn from_code(code: &str) -> Result<Self, MetaError> {
        match code {
            "" | "OK" | "RE" => Ok(SandboxStatus::Ok),
            "TO" | "TIME_LIMIT" => Ok(SandboxStatus::TimeLimit),
            "SG" | "SIGNALED" => Ok(SandboxStatus::Signaled),
            "XX" | "SANDBOX_ERROR" => Ok(SandboxStatus::SandboxError),
            other => Err(MetaError::UnknownStatus(other.to_string())),
        }
    }
}

/// Parsed runtime report
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecutionMetadata {
    /// CPU time in seconds
    pub time: f64,
    /// Wall clock time in seconds
    pub wall_time: f64,
    /// Peak memory in KB (largest of cg-mem / max-rss)
    pub memory_peak_kb: u64,
    /// Exit code, absent when the process died by signal
    pub exit_code: Option<i32>,
    /// Terminating signal number
    pub exit_signal: Option<i32>,
    pub status: SandboxStatus,
    /// Human-readable status message from the runtime
    pub message: Option<String>,
    /// Seconds the runtime attributes to blocking I/O
    pub io_time: f64,
    /// The runtime killed the program
    pub killed: bool,
    /// The cgroup OOM killer fired
    pub oom_killed: bool,
}

impl ExecutionMetadata {
    /// Parse the primary report
    pub fn parse(content: &str) -> Result<Self, MetaError> {
        let mut meta = ExecutionMetadata::default();
        for (key, value) in entries(content) {
            meta.apply(key?, value)?;
        }
        Ok(meta)
    }

    /// Merge the secondary report; only `io-time` is read from it
    pub fn merge_secondary(&mut self, content: &str) -> Result<(), MetaError> {
        for (key, value) in entries(content) {
            let key = key?;
            if key == "io-time" {
                self.io_time = parse_number(key, value)?;
            } else {
                trace!("Ignoring key {} in secondary metadata", key);
            }
        }
        Ok(())
    }

    /// Read the primary report and, if given, the secondary one
    ///
    /// A missing primary report is `ResultFilesMissing`; a missing secondary
    /// report leaves `io_time` at zero.
    pub async fn load(primary: &Path, secondary: Option<&Path>) -> Result<Self, SandboxError> {
        let content = match fs::read_to_string(primary).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SandboxError::ResultFilesMissing)
            }
            Err(e) => return Err(e.into()),
        };
        let mut meta = Self::parse(&content)?;

        if let Some(path) = secondary {
            match fs::read_to_string(path).await {
                Ok(content) => meta.merge_secondary(&content)?,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!("No secondary metadata at {:?}, io-time = 0", path);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(meta)
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<(), MetaError> {
        match key {
            "time" => self.time = parse_number(key, value)?,
            "time-wall" => self.wall_time = parse_number(key, value)?,
            "cg-mem" | "max-rss" | "memory-peak" => {
                let memory: u64 = parse_number(key, value)?;
                self.memory_peak_kb = self.memory_peak_kb.max(memory);
            }
            "exitcode" | "exit-code" => self.exit_code = Some(parse_number(key, value)?),
            "exitsig" => self.exit_signal = Some(parse_number(key, value)?),
            "status" | "sandbox-status" => self.status = SandboxStatus::from_code(value)?,
            "message" => self.message = Some(value.to_string()),
            "io-time" => self.io_time = parse_number(key, value)?,
            "killed" => self.killed = parse_flag(key, value)?,
            "cg-oom-killed" => self.oom_killed = parse_flag(key, value)?,
            _ => trace!("Ignoring metadata key {}", key),
        }
        Ok(())
    }
}

/// Split a report into `(key, value)` pairs, skipping blank lines
fn entries(content: &str) -> impl Iterator<Item = (Result<&str, MetaError>, &str)> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| match line.split_once(':') {
            Some((key, value)) if !key.trim().is_empty() => (Ok(key.trim()), value.trim()),
            _ => (
                Err(MetaError::MalformedLine {
                    line: idx + 1,
                    content: line.to_string(),
                }),
                "",
            ),
        })
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, MetaError> {
    value.parse().map_err(|_| MetaError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_flag(key: &str, value: &str) -> Result<bool, MetaError> {
    match value {
        "" | "1" => Ok(true),
        "0" => Ok(false),
        _ => Err(MetaError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_meta_success() {
        let content = "time:0.015\ntime-wall:0.020\ncg-mem:1024\nexitcode:0\n";
        let meta = ExecutionMetadata::parse(content).unwrap();

        assert_eq!(meta.time, 0.015);
        assert_eq!(meta.wall_time, 0.020);
        assert_eq!(meta.memory_peak_kb, 1024);
        assert_eq!(meta.exit_code, Some(0));
        assert_eq!(meta.status, SandboxStatus::Ok);
        assert_eq!(meta.io_time, 0.0);
    }

    #[test]
    fn test_parse_meta_tle() {
        let content = "time:1.000\ntime-wall:1.104\nkilled:1\nstatus:TO\nmessage:Time limit exceeded (wall clock)\n";
        let meta = ExecutionMetadata::parse(content).unwrap();

        assert_eq!(meta.time, 1.0);
        assert_eq!(meta.status, SandboxStatus::TimeLimit);
        assert!(meta.killed);
        assert_eq!(
            meta.message.as_deref(),
            Some("Time limit exceeded (wall clock)")
        );
    }

    #[test]
    fn test_parse_meta_signal() {
        let content = "status:SG\nexitsig:11\nmessage:Caught fatal signal 11\n";
        let meta = ExecutionMetadata::parse(content).unwrap();

        assert_eq!(meta.status, SandboxStatus::Signaled);
        assert_eq!(meta.exit_signal, Some(11));
        assert_eq!(meta.exit_code, None);
    }

    #[test]
    fn test_runtime_error_status_is_ok_with_exit_code() {
        let meta = ExecutionMetadata::parse("status:RE\nexitcode:3\n").unwrap();
        assert_eq!(meta.status, SandboxStatus::Ok);
        assert_eq!(meta.exit_code, Some(3));
    }

    #[test]
    fn test_memory_takes_largest_report() {
        let meta = ExecutionMetadata::parse("max-rss:2048\ncg-mem:4096\n").unwrap();
        assert_eq!(meta.memory_peak_kb, 4096);
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let content = "csw-voluntary:3\ncsw-forced:1\ncg-enabled:1\ntime:0.1\n";
        let meta = ExecutionMetadata::parse(content).unwrap();
        assert_eq!(meta.time, 0.1);
    }

    #[test]
    fn test_malformed_line_is_rejected() {
        let err = ExecutionMetadata::parse("time:0.1\ngarbage\n").unwrap_err();
        assert_eq!(
            err,
            MetaError::MalformedLine {
                line: 2,
                content: "garbage".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = ExecutionMetadata::parse("time:fast\n").unwrap_err();
        assert!(matches!(err, MetaError::InvalidValue { ref key, .. } if key == "time"));
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let err = ExecutionMetadata::parse("status:ZZ\n").unwrap_err();
        assert_eq!(err, MetaError::UnknownStatus("ZZ".to_string()));
    }

    #[test]
    fn test_empty_report_uses_defaults() {
        let meta = ExecutionMetadata::parse("").unwrap();
        assert_eq!(meta, ExecutionMetadata::default());
    }

    #[test]
    fn test_merge_secondary_io_time() {
        let mut meta = ExecutionMetadata::parse("time:1.2\n").unwrap();
        meta.merge_secondary("io-time:0.4\n").unwrap();
        assert_eq!(meta.io_time, 0.4);
    }

    #[tokio::test]
    async fn test_load_missing_primary() {
        let dir = tempfile::tempdir().unwrap();
        let err = ExecutionMetadata::load(&dir.path().join("metadata0"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::ResultFilesMissing));
    }

    #[tokio::test]
    async fn test_load_missing_secondary_defaults_io_time() {
        let dir = tempfile::tempdir().unwrap();
        let primary = dir.path().join("metadata0");
        std::fs::write(&primary, "time:0.5\nexitcode:0\n").unwrap();

        let meta = ExecutionMetadata::load(&primary, Some(&dir.path().join("extra_metadata")))
            .await
            .unwrap();
        assert_eq!(meta.time, 0.5);
        assert_eq!(meta.io_time, 0.0);
    }
}
