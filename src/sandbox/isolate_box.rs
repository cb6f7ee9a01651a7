//! Isolate box management
//!
//! Acquires a box before a run and releases it afterwards. Release happens
//! explicitly through [`IsolateBox::release`]; a box dropped without being
//! released (panic, cancelled future) is cleaned up synchronously in `Drop`.

use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use super::config::SandboxConfig;
use crate::core::SandboxError;

/// Guard over one initialized box
pub struct IsolateBox {
    box_id: u32,
    program: String,
    prefix_args: Vec<String>,
    use_cgroups: bool,
    released: bool,
}

impl IsolateBox {
    /// Reset any stale box with the same id, then initialize it
    pub async fn acquire(config: &SandboxConfig, box_id: u32) -> Result<Self, SandboxError> {
        let mut isolate_box = Self {
            box_id,
            program: config.runtime_program().to_string(),
            prefix_args: config.runtime_prefix_args().to_vec(),
            use_cgroups: config.use_cgroups,
            released: false,
        };

        // A crashed earlier run may have left the box behind
        match isolate_box.command("--cleanup").output().await {
            Ok(output) if !output.status.success() => debug!(
                "Stale cleanup of box {} exited with {}",
                box_id, output.status
            ),
            Ok(_) => {}
            Err(e) => {
                isolate_box.released = true;
                return Err(SandboxError::spawn(&isolate_box.program, e));
            }
        }

        let output = match isolate_box.command("--init").output().await {
            Ok(output) => output,
            Err(e) => {
                isolate_box.released = true;
                return Err(SandboxError::spawn(&isolate_box.program, e));
            }
        };
        if !output.status.success() {
            isolate_box.released = true;
            return Err(SandboxError::BoxInit {
                box_id,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        info!(
            "Initialized isolate box {} at {} (cgroups: {})",
            box_id,
            String::from_utf8_lossy(&output.stdout).trim(),
            isolate_box.use_cgroups
        );
        Ok(isolate_box)
    }

    pub fn box_id(&self) -> u32 {
        self.box_id
    }

    /// Destroy the box. Failures are logged, never returned.
    pub async fn release(mut self) {
        self.released = true;
        match self.command("--cleanup").output().await {
            Ok(output) if output.status.success() => {
                info!("Cleaned up isolate box {}", self.box_id)
            }
            Ok(output) => error!(
                "Failed to clean up isolate box {}: {}",
                self.box_id,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Err(e) => error!("Failed to clean up isolate box {}: {}", self.box_id, e),
        }
    }

    fn command(&self, action: &str) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.prefix_args)
            .args(self.box_args())
            .arg(action)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }

    fn box_args(&self) -> Vec<String> {
        let mut args = vec![format!("--box-id={}", self.box_id)];
        if self.use_cgroups {
            args.push("--cg".to_string());
        }
        args
    }
}

impl Drop for IsolateBox {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        warn!("Isolate box {} dropped without release, cleaning up", self.box_id);
        // Blocks the current worker briefly. The box must be free before the
        // id can be reused, and a spawned task may never run if the runtime
        // is shutting down.
        let out = std::process::Command::new(&self.program)
            .args(&self.prefix_args)
            .args(self.box_args())
            .arg("--cleanup")
            .stdin(Stdio::null())
            .output();

        if out.is_ok_and(|c| c.status.success()) {
            info!("Cleaned up isolate box {}", self.box_id);
        } else {
            error!("Failed to clean up isolate box {}", self.box_id);
        }
    }
}
