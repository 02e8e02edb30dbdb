//! Subprocess runner shared by the tool wrappers.

use std::path::Path;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Captured output of a successful tool run.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("failed to start `{program}`: {source}. Is it installed?")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("`{program}` I/O error: {source}")]
    Io {
        program: String,
        source: std::io::Error,
    },

    #[error("`{program}` exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
}

impl ToolError {
    /// The tool's stderr, when it ran and failed.
    pub fn stderr(&self) -> &str {
        match self {
            Self::Failed { stderr, .. } => stderr,
            _ => "",
        }
    }
}

/// Run `program` to completion, optionally feeding `stdin`.
///
/// The child is killed if the returned future is dropped, so wrapping the
/// call in `tokio::time::timeout` also stops the process.
pub async fn run_tool(
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
    stdin: Option<&str>,
) -> Result<ToolOutput, ToolError> {
    debug!(program, ?args, "running tool");

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|source| ToolError::Spawn {
        program: program.to_string(),
        source,
    })?;

    if let Some(input) = stdin {
        if let Some(mut pipe) = child.stdin.take() {
            pipe.write_all(input.as_bytes())
                .await
                .map_err(|source| ToolError::Io {
                    program: program.to_string(),
                    source,
                })?;
            // Close stdin so the tool sees EOF
            drop(pipe);
        }
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|source| ToolError::Io {
            program: program.to_string(),
            source,
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        return Err(ToolError::Failed {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: tail(&stderr, 2000),
        });
    }

    Ok(ToolOutput { stdout, stderr })
}

/// Keep the last `max` bytes of tool output, on a char boundary.
fn tail(s: &str, max: usize) -> String {
    let s = s.trim();
    if s.len() <= max {
        return s.to_string();
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].to_string()
}
