//! Process boundary for the external package tools.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use std::process::Stdio;
use tokio::process::Command;

/// Captured result of one external command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Best diagnostic text: stderr, else stdout.
    pub fn diagnostics(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run `program` with `args` to completion. `Err` only when it could not be started.
    async fn run(&self, program: &str, args: &[String]) -> Result<ToolOutput>;
}

pub struct ProcessRunner;

#[async_trait]
impl ToolRunner for ProcessRunner {
    #[tracing::instrument(skip(self))]
    async fn run(&self, program: &str, args: &[String]) -> Result<ToolOutput> {
        debug!("Running {} {}", program, args.join(" "));
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("Failed to run '{}'", program))?;

        Ok(ToolOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostics_prefers_stderr() {
        let out = ToolOutput {
            success: false,
            stdout: "progress\n".into(),
            stderr: "  error: not found\n".into(),
        };
        assert_eq!(out.diagnostics(), "error: not found");

        let out = ToolOutput {
            success: false,
            stdout: "only stdout\n".into(),
            stderr: "   ".into(),
        };
        assert_eq!(out.diagnostics(), "only stdout");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_runner_captures_output() {
        let runner = ProcessRunner;
        let args = vec!["-c".to_string(), "echo out; echo err >&2; exit 3".to_string()];
        let out = runner.run("sh", &args).await.unwrap();
        assert!(!out.success);
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_process_runner_missing_program_is_error() {
        let runner = ProcessRunner;
        let err = runner
            .run("pkglink-definitely-not-a-program", &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("pkglink-definitely-not-a-program"));
    }
}
