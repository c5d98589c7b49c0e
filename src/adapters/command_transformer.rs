//! # Command Transformer
//!
//! Transformation adapter that runs an external command per job. The command
//! is a program plus arguments in which `{input}`, `{output}` and
//! `{instruction}` are substituted:
//!
//! ```toml
//! [transform]
//! command = ["enhance-image", "--prompt", "{instruction}", "{input}", "{output}"]
//! ```
//!
//! A non-zero exit is a transient failure (the service may be busy); a program
//! that cannot be found is permanent. The child is killed when an attempt is
//! abandoned (timeout or cancellation), and a partial output file is removed.

use std::io::ErrorKind;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use super::local_storage::{io_error, LocalFsStorage, StagedFile};
use crate::error::StepError;
use crate::models::{ArtifactHandle, JobDescriptor, StepKind};

/// Bytes of stderr kept in a failure message
const STDERR_TAIL: usize = 512;

#[derive(Debug, Clone)]
pub struct CommandTransformer {
    command: Vec<String>,
    output_extension: String,
}

impl CommandTransformer {
    pub fn new(command: Vec<String>, output_extension: impl Into<String>) -> Self {
        Self {
            command,
            output_extension: output_extension.into(),
        }
    }

    /// Substitute placeholders into the configured command line
    pub fn render(&self, input: &str, output: &str, instruction: &str) -> Vec<String> {
        self.command
            .iter()
            .map(|arg| {
                arg.replace("{input}", input)
                    .replace("{output}", output)
                    .replace("{instruction}", instruction)
            })
            .collect()
    }

    pub async fn transform(
        &self,
        staging: &LocalFsStorage,
        job: &JobDescriptor,
        input: &ArtifactHandle,
        instruction: &str,
    ) -> Result<ArtifactHandle, StepError> {
        let output_path = staging
            .staging_file("transform-", &self.output_extension)
            .await?;
        let output = StagedFile::new(output_path);
        let output_str = output.path().to_string_lossy().into_owned();

        let argv = self.render(input.location(), &output_str, instruction);
        let Some((program, args)) = argv.split_first() else {
            return Err(StepError::permanent("transform command is empty"));
        };

        debug!(job_id = %job.id, program = %program, "🎨 Running transform command");

        let result = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        let finished = match result {
            Ok(finished) => finished,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StepError::permanent(format!(
                    "transform program '{program}' not found"
                )));
            }
            Err(e) => return Err(io_error("spawn transform command", e)),
        };

        if !finished.status.success() {
            let stderr = String::from_utf8_lossy(&finished.stderr);
            let tail_start = stderr.len().saturating_sub(STDERR_TAIL);
            let tail = stderr.get(tail_start..).unwrap_or(&stderr).trim();
            return Err(StepError::transient(format!(
                "transform command exited with {}: {}",
                finished.status, tail
            )));
        }

        Ok(ArtifactHandle::new(StepKind::Transform, output.keep()))
    }
}
