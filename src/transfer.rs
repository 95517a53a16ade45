//! Transfer collaborator: copies one remote object to a local path.
//!
//! The service only ever sees a success bit. `CommandTransfer` shells out to
//! an external tool (wget by default) and maps its exit status to that bit.

use std::process::{Command, Stdio};

pub const SOURCE_PLACEHOLDER: &str = "{source}";
pub const DESTINATION_PLACEHOLDER: &str = "{destination}";

pub trait Transfer: Send + Sync {
    /// Copy `source` to `destination`. Blocks until the copy has finished.
    fn transfer(&self, source: &str, destination: &str) -> bool;
}

/// Runs an external program per transfer.
///
/// `args` is a template: every occurrence of `{source}` and `{destination}`
/// inside an argument is replaced before the program is spawned.
#[derive(Debug, Clone)]
pub struct CommandTransfer {
    program: String,
    args: Vec<String>,
}

impl CommandTransfer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// `wget <source> -O <destination>`
    pub fn wget() -> Self {
        Self::new(
            "wget",
            vec![
                SOURCE_PLACEHOLDER.to_string(),
                "-O".to_string(),
                DESTINATION_PLACEHOLDER.to_string(),
            ],
        )
    }

    /// Build from a `[program, arg...]` template.
    pub fn from_template(template: &[String]) -> Option<Self> {
        let (program, args) = template.split_first()?;
        if program.trim().is_empty() {
            return None;
        }
        Some(Self::new(program.clone(), args.to_vec()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn render_args(&self, source: &str, destination: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace(SOURCE_PLACEHOLDER, source)
                    .replace(DESTINATION_PLACEHOLDER, destination)
            })
            .collect()
    }
}

impl Default for CommandTransfer {
    fn default() -> Self {
        Self::wget()
    }
}

impl Transfer for CommandTransfer {
    fn transfer(&self, source: &str, destination: &str) -> bool {
        let args = self.render_args(source, destination);
        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output();

        match output {
            Ok(output) if output.status.success() => true,
            Ok(output) => {
                tracing::debug!(
                    program = %self.program,
                    status = ?output.status.code(),
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "transfer failed"
                );
                false
            }
            Err(err) => {
                tracing::warn!(program = %self.program, error = %err, "cannot spawn transfer");
                false
            }
        }
    }
}
