//! Test-suite runner adapter.
//!
//! A failing, missing, or timed-out test command is a reportable validation
//! outcome, never an error: the repair loop decides what happens next.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, bail};
use tracing::{debug, instrument, warn};

use crate::core::types::ValidationResult;
use crate::io::process::run_command_with_timeout;

/// Abstraction over test-suite execution.
pub trait ValidationRunner {
    fn run(&self) -> Result<ValidationResult>;
}

/// Runs the configured test command in the project root.
pub struct CommandValidationRunner {
    workdir: PathBuf,
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandValidationRunner {
    pub fn new(
        workdir: impl Into<PathBuf>,
        command: Vec<String>,
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> Self {
        Self {
            workdir: workdir.into(),
            command,
            timeout,
            output_limit_bytes,
        }
    }
}

impl ValidationRunner for CommandValidationRunner {
    #[instrument(skip_all, fields(command = %self.command.join(" ")))]
    fn run(&self) -> Result<ValidationResult> {
        let Some((program, args)) = self.command.split_first() else {
            bail!("validation command is empty");
        };
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.workdir);

        let output = match run_command_with_timeout(cmd, self.timeout, self.output_limit_bytes) {
            Ok(output) => output,
            Err(err) => {
                let not_found = err
                    .root_cause()
                    .downcast_ref::<std::io::Error>()
                    .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound);
                if not_found {
                    warn!(command = %self.command[0], "validation command not installed");
                    return Ok(ValidationResult {
                        passed: false,
                        log: format!(
                            "validation command '{}' is not installed",
                            self.command[0]
                        ),
                    });
                }
                return Err(err);
            }
        };

        let mut log = String::new();
        log.push_str("=== stdout ===\n");
        log.push_str(&String::from_utf8_lossy(&output.stdout));
        log.push_str(&output.stdout_truncated_notice());
        log.push_str("\n=== stderr ===\n");
        log.push_str(&String::from_utf8_lossy(&output.stderr));
        log.push_str(&output.stderr_truncated_notice());

        if output.timed_out {
            log.push_str(&format!(
                "\n[validation timed out after {}s]\n",
                self.timeout.as_secs()
            ));
            return Ok(ValidationResult { passed: false, log });
        }

        let passed = output.status.success();
        debug!(passed, "validation finished");
        Ok(ValidationResult { passed, log })
    }
}
