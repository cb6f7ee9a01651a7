//! Run supervisor
//!
//! Prepares the working directory, acquires the box, runs the runtime under an
//! outer timeout, releases the box and hands the reports to the classifier.
//! Every failure along the way becomes a `SANDBOX_ERROR` verdict.

use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Stdio;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use super::config::{get_config, SandboxConfig};
use super::invocation::{metadata_file_name, Invocation, EXTRA_METADATA_FILE};
use super::isolate_box::IsolateBox;
use super::meta::ExecutionMetadata;
use super::spec::RunSpec;
use crate::classifier::classify;
use crate::core::{SandboxError, Verdict, VerdictStatus};

/// Working directory mode for trusted runs (compilers create arbitrary files)
const TRUSTED_DIR_MODE: u32 = 0o777;
/// Working directory mode for untrusted runs
const UNTRUSTED_DIR_MODE: u32 = 0o755;
/// Mode of the pre-created output files of untrusted runs
const UNTRUSTED_OUTPUT_MODE: u32 = 0o666;

/// Exit code of the runtime when the command could not be found
const EXIT_NOT_FOUND: i32 = 127;

pub struct Supervisor {
    config: SandboxConfig,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(get_config().clone())
    }
}

impl Supervisor {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Run `spec` to completion and return its verdict
    pub async fn execute(&self, spec: RunSpec) -> Verdict {
        if let Err(e) = spec.validate() {
            warn!("Rejected run spec: {}", e);
            return e.into();
        }

        let verdict = match self.run(&spec).await {
            Ok(verdict) => verdict,
            Err(e) => {
                error!("Sandbox run in box {} failed: {}", spec.box_id(), e);
                e.into()
            }
        };

        if spec.cleanup_after() {
            remove_working_dir(spec.working_dir()).await;
        }

        info!(
            "Box {} finished: {} (time: {:?}, memory: {:?})",
            spec.box_id(),
            verdict.status,
            verdict.time,
            verdict.memory
        );
        verdict
    }

    async fn run(&self, spec: &RunSpec) -> Result<Verdict, SandboxError> {
        self.config
            .validate()
            .map_err(|e| SandboxError::InvalidConfig(e.to_string()))?;
        let invocation = Invocation::build(spec, &self.config)?;
        prepare_working_dir(spec).await?;

        let isolate_box = IsolateBox::acquire(&self.config, spec.box_id()).await?;
        let exit_code = supervise(&invocation).await;
        isolate_box.release().await;

        if exit_code? == Some(EXIT_NOT_FOUND) {
            return Ok(Verdict::new(VerdictStatus::ProgramNotFound).with_reason("program not found"));
        }

        let meta = ExecutionMetadata::load(
            &invocation.metadata_path,
            invocation.extra_metadata_path.as_deref(),
        )
        .await?;
        let error_text = if spec.capture_error() {
            read_error_text(&invocation.error_path).await
        } else {
            None
        };

        Ok(classify(
            &meta,
            error_text.as_deref(),
            invocation.limits.time,
            invocation.limits.memory,
        ))
    }
}

/// Run the runtime child under the outer timeout, returning its exit code
async fn supervise(invocation: &Invocation) -> Result<Option<i32>, SandboxError> {
    debug!("Running sandbox: {}", invocation);

    let child = Command::new(&invocation.program)
        .args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SandboxError::spawn(&invocation.program, e))?;

    let outer_timeout = invocation.limits.outer_timeout;
    let output = match tokio::time::timeout(outer_timeout, child.wait_with_output()).await {
        Ok(output) => output?,
        Err(_) => {
            // The child is killed when its future is dropped
            warn!(
                "Sandbox runtime exceeded supervisory timeout of {:?}",
                outer_timeout
            );
            return Err(SandboxError::SupervisorTimeout(outer_timeout.as_secs_f64()));
        }
    };

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        debug!("Sandbox runtime stderr: {}", stderr.trim());
    }
    debug!("Sandbox runtime exited with {}", output.status);

    Ok(output.status.code())
}

/// Create the working directory with permissions matching the trust level
/// and drop reports left by an earlier run in the same directory.
async fn prepare_working_dir(spec: &RunSpec) -> Result<(), SandboxError> {
    let dir = spec.working_dir();
    fs::create_dir_all(dir).await?;

    if spec.trusted() {
        fs::set_permissions(dir, std::fs::Permissions::from_mode(TRUSTED_DIR_MODE)).await?;
    } else {
        fs::set_permissions(dir, std::fs::Permissions::from_mode(UNTRUSTED_DIR_MODE)).await?;
        for name in [spec.stdout_name(), spec.stderr_name()] {
            let path = dir.join(name);
            fs::write(&path, b"").await?;
            fs::set_permissions(&path, std::fs::Permissions::from_mode(UNTRUSTED_OUTPUT_MODE))
                .await?;
        }
    }

    for name in [metadata_file_name(spec.box_id()), EXTRA_METADATA_FILE.to_string()] {
        match fs::remove_file(dir.join(&name)).await {
            Ok(()) => debug!("Removed stale {} in {:?}", name, dir),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}

/// Captured stderr of the program; absent or empty files yield `None`
async fn read_error_text(path: &Path) -> Option<String> {
    match fs::read(path).await {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes).trim().to_string();
            (!text.is_empty()).then_some(text)
        }
        Err(e) => {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to read error file {:?}: {}", path, e);
            }
            None
        }
    }
}

async fn remove_working_dir(dir: &Path) {
    match fs::remove_dir_all(dir).await {
        Ok(()) => debug!("Removed working directory {:?}", dir),
        Err(e) => warn!("Failed to remove working directory {:?}: {}", dir, e),
    }
}
