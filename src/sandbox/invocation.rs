//! Concrete runtime invocation for one run
//!
//! Renders a [`RunSpec`] into the isolate-compatible argument list. The working
//! directory is bind-mounted at [`SHARED_DIR`] and used as the program's cwd.

use std::fmt;
use std::path::PathBuf;

use super::config::SandboxConfig;
use super::limits::EffectiveLimits;
use super::spec::RunSpec;
use crate::core::SandboxError;

/// Mount point of the working directory inside the box
pub const SHARED_DIR: &str = "/shared";

/// Secondary report carrying `io-time`
pub const EXTRA_METADATA_FILE: &str = "extra_metadata";

/// Primary report name for a box
pub fn metadata_file_name(box_id: u32) -> String {
    format!("metadata{}", box_id)
}

#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub limits: EffectiveLimits,
    /// Primary report written by the runtime
    pub metadata_path: PathBuf,
    /// Secondary report, only consulted when an I/O allowance is configured
    pub extra_metadata_path: Option<PathBuf>,
    pub stdout_path: PathBuf,
    pub error_path: PathBuf,
}

impl Invocation {
    pub fn build(spec: &RunSpec, config: &SandboxConfig) -> Result<Self, SandboxError> {
        let limits = EffectiveLimits::from_spec(spec, config)?;
        let dir = spec.working_dir();
        let metadata_path = dir.join(metadata_file_name(spec.box_id()));
        let extra_metadata_path =
            (spec.io_time_allowance_secs() > 0.0).then(|| dir.join(EXTRA_METADATA_FILE));

        let mut args: Vec<String> = config.runtime_prefix_args().to_vec();
        args.push(format!("--box-id={}", spec.box_id()));
        if config.use_cgroups {
            args.push("--cg".to_string());
        }
        args.extend([
            format!("--meta={}", metadata_path.display()),
            format!("--time={}", secs(limits.time.cpu_cap())),
            format!("--wall-time={}", secs(limits.time.wall_cap())),
            format!("--extra-time={}", secs(limits.time.extra_time_grace())),
        ]);
        if let Some(memory) = limits.memory {
            if config.use_cgroups {
                args.push(format!("--cg-mem={}", memory.cap_kb()));
            } else {
                args.push(format!("--mem={}", memory.cap_kb()));
            }
        }
        args.extend([
            format!("--processes={}", limits.processes),
            format!("--dir={}={}:rw", SHARED_DIR, dir.display()),
            format!("--chdir={}", SHARED_DIR),
            format!("--stdin={}/{}", SHARED_DIR, spec.stdin_name()),
            format!("--stdout={}/{}", SHARED_DIR, spec.stdout_name()),
            format!("--stderr={}/{}", SHARED_DIR, spec.stderr_name()),
        ]);
        if spec.trusted() {
            args.push("--full-env".to_string());
        } else {
            args.push(format!("--env=PATH={}", config.sandbox_path));
        }
        args.push("--run".to_string());
        args.push("--".to_string());
        args.extend(spec.command().iter().cloned());

        Ok(Self {
            program: config.runtime_program().to_string(),
            args,
            limits,
            metadata_path,
            extra_metadata_path,
            stdout_path: dir.join(spec.stdout_name()),
            error_path: dir.join(spec.stderr_name()),
        })
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " {:?}", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Seconds with millisecond precision
fn secs(value: f64) -> String {
    format!("{:.3}", value)
}
