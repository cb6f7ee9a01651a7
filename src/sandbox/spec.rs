//! Run specification
//!
//! Everything needed to run one program once: where, what, and under which limits.
//! Built through [`RunSpecBuilder`] and immutable afterwards.

use std::path::{Component, Path, PathBuf};

use super::invocation::{metadata_file_name, EXTRA_METADATA_FILE};
use crate::core::SandboxError;

pub const DEFAULT_CPU_TIME_LIMIT_SECS: f64 = 5.0;
/// Smallest CPU limit the runtime can express (millisecond resolution)
pub const MIN_TIME_LIMIT_SECS: f64 = 0.001;
/// Upper bound for every time setting of a single run
pub const MAX_TIME_LIMIT_SECS: f64 = 86_400.0;
pub const DEFAULT_WALL_CLOCK_GRACE_SECS: f64 = 1.0;
pub const DEFAULT_EXTRA_MEMORY_MARGIN_MB: u32 = 5;
pub const DEFAULT_PROCESS_LIMIT: u32 = 1;

/// Validated specification of one sandboxed run
#[derive(Debug, Clone, PartialEq)]
pub struct RunSpec {
    working_dir: PathBuf,
    command: Vec<String>,
    cpu_time_limit_secs: f64,
    io_time_allowance_secs: f64,
    wall_clock_grace_secs: f64,
    memory_limit_mb: Option<u32>,
    extra_memory_margin_mb: u32,
    process_limit: u32,
    box_id: u32,
    stdin_name: String,
    stdout_name: String,
    stderr_name: String,
    trusted: bool,
    capture_error: bool,
    cleanup_after: bool,
}

impl RunSpec {
    /// Start building a spec for `command` run inside `working_dir`
    pub fn builder(
        working_dir: impl Into<PathBuf>,
        command: impl IntoIterator<Item = impl Into<String>>,
    ) -> RunSpecBuilder {
        RunSpecBuilder::new(working_dir).with_command(command)
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn cpu_time_limit_secs(&self) -> f64 {
        self.cpu_time_limit_secs
    }

    pub fn io_time_allowance_secs(&self) -> f64 {
        self.io_time_allowance_secs
    }

    pub fn wall_clock_grace_secs(&self) -> f64 {
        self.wall_clock_grace_secs
    }

    pub fn memory_limit_mb(&self) -> Option<u32> {
        self.memory_limit_mb
    }

    pub fn extra_memory_margin_mb(&self) -> u32 {
        self.extra_memory_margin_mb
    }

    pub fn process_limit(&self) -> u32 {
        self.process_limit
    }

    pub fn box_id(&self) -> u32 {
        self.box_id
    }

    pub fn stdin_name(&self) -> &str {
        &self.stdin_name
    }

    pub fn stdout_name(&self) -> &str {
        &self.stdout_name
    }

    pub fn stderr_name(&self) -> &str {
        &self.stderr_name
    }

    pub fn trusted(&self) -> bool {
        self.trusted
    }

    pub fn capture_error(&self) -> bool {
        self.capture_error
    }

    pub fn cleanup_after(&self) -> bool {
        self.cleanup_after
    }

    /// Check every invariant of the spec
    pub fn validate(&self) -> Result<(), SandboxError> {
        if self.command.is_empty() {
            return Err(SandboxError::EmptyCommand);
        }
        if !(MIN_TIME_LIMIT_SECS..=MAX_TIME_LIMIT_SECS).contains(&self.cpu_time_limit_secs) {
            return Err(SandboxError::InvalidLimit(format!(
                "CPU time limit must be between {} and {} seconds, got {}",
                MIN_TIME_LIMIT_SECS, MAX_TIME_LIMIT_SECS, self.cpu_time_limit_secs
            )));
        }
        check_time_setting("I/O time allowance", self.io_time_allowance_secs)?;
        check_time_setting("wall clock grace", self.wall_clock_grace_secs)?;
        if self.memory_limit_mb == Some(0) {
            return Err(SandboxError::InvalidLimit(
                "memory limit must be positive".to_string(),
            ));
        }
        if self.process_limit == 0 {
            return Err(SandboxError::InvalidLimit(
                "process limit must be at least 1".to_string(),
            ));
        }
        for name in [&self.stdin_name, &self.stdout_name, &self.stderr_name] {
            check_file_name(name)?;
        }
        self.check_file_names_distinct()
    }

    /// Redirections must not share a file with each other or with the
    /// runtime's reports, which are removed before every run.
    fn check_file_names_distinct(&self) -> Result<(), SandboxError> {
        let metadata = metadata_file_name(self.box_id);
        let mut taken: Vec<(&str, &'static str)> = vec![
            (metadata.as_str(), "the runtime report"),
            (EXTRA_METADATA_FILE, "the I/O time report"),
        ];

        for (name, used_for) in [
            (self.stdin_name.as_str(), "standard input"),
            (self.stdout_name.as_str(), "standard output"),
            (self.stderr_name.as_str(), "standard error"),
        ] {
            if let Some((_, owner)) = taken.iter().find(|(existing, _)| *existing == name) {
                return Err(SandboxError::FileNameConflict {
                    name: name.to_string(),
                    used_for: *owner,
                });
            }
            taken.push((name, used_for));
        }
        Ok(())
    }
}

fn check_time_setting(what: &str, value: f64) -> Result<(), SandboxError> {
    if !(0.0..=MAX_TIME_LIMIT_SECS).contains(&value) {
        return Err(SandboxError::InvalidLimit(format!(
            "{} must be between 0 and {} seconds, got {}",
            what, MAX_TIME_LIMIT_SECS, value
        )));
    }
    Ok(())
}

/// A file name must be exactly one normal path component
fn check_file_name(name: &str) -> Result<(), SandboxError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(SandboxError::InvalidFileName(name.to_string())),
    }
}

/// Builder for [`RunSpec`]
#[derive(Debug, Clone)]
pub struct RunSpecBuilder {
    spec: RunSpec,
}

impl RunSpecBuilder {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            spec: RunSpec {
                working_dir: working_dir.into(),
                command: Vec::new(),
                cpu_time_limit_secs: DEFAULT_CPU_TIME_LIMIT_SECS,
                io_time_allowance_secs: 0.0,
                wall_clock_grace_secs: DEFAULT_WALL_CLOCK_GRACE_SECS,
                memory_limit_mb: None,
                extra_memory_margin_mb: DEFAULT_EXTRA_MEMORY_MARGIN_MB,
                process_limit: DEFAULT_PROCESS_LIMIT,
                box_id: 0,
                stdin_name: "input".to_string(),
                stdout_name: "output".to_string(),
                stderr_name: "error".to_string(),
                trusted: false,
                capture_error: true,
                cleanup_after: false,
            },
        }
    }

    pub fn with_command(mut self, command: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.spec.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Split a single command string on whitespace
    pub fn with_command_line(self, command_line: &str) -> Self {
        self.with_command(command_line.split_whitespace())
    }

    pub fn with_cpu_time_limit(mut self, secs: f64) -> Self {
        self.spec.cpu_time_limit_secs = secs;
        self
    }

    pub fn with_io_time_allowance(mut self, secs: f64) -> Self {
        self.spec.io_time_allowance_secs = secs;
        self
    }

    pub fn with_wall_clock_grace(mut self, secs: f64) -> Self {
        self.spec.wall_clock_grace_secs = secs;
        self
    }

    pub fn with_memory_limit(mut self, memory_mb: Option<u32>) -> Self {
        self.spec.memory_limit_mb = memory_mb;
        self
    }

    pub fn with_extra_memory_margin(mut self, margin_mb: u32) -> Self {
        self.spec.extra_memory_margin_mb = margin_mb;
        self
    }

    pub fn with_process_limit(mut self, processes: u32) -> Self {
        self.spec.process_limit = processes;
        self
    }

    pub fn with_box_id(mut self, box_id: u32) -> Self {
        self.spec.box_id = box_id;
        self
    }

    pub fn with_stdin(mut self, name: impl Into<String>) -> Self {
        self.spec.stdin_name = name.into();
        self
    }

    pub fn with_stdout(mut self, name: impl Into<String>) -> Self {
        self.spec.stdout_name = name.into();
        self
    }

    pub fn with_stderr(mut self, name: impl Into<String>) -> Self {
        self.spec.stderr_name = name.into();
        self
    }

    pub fn with_trusted(mut self, trusted: bool) -> Self {
        self.spec.trusted = trusted;
        self
    }

    pub fn with_capture_error(mut self, capture: bool) -> Self {
        self.spec.capture_error = capture;
        self
    }

    pub fn with_cleanup_after(mut self, cleanup: bool) -> Self {
        self.spec.cleanup_after = cleanup;
        self
    }

    /// Validate and freeze the spec; a relative working directory is
    /// resolved against the current directory.
    pub fn build(mut self) -> Result<RunSpec, SandboxError> {
        if self.spec.working_dir.is_relative() {
            self.spec.working_dir = std::env::current_dir()?.join(&self.spec.working_dir);
        }
        self.spec.validate()?;
        Ok(self.spec)
    }
}
