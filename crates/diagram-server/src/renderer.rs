//! Diagram rendering through the external `suml` command

use async_trait::async_trait;
use diagram_cache::{DiagramType, GenerationError, Renderer};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Renders scruffy PNG diagrams by piping the expression into `suml`
pub struct SumlRenderer {
    program: String,
    timeout: Option<Duration>,
}

impl SumlRenderer {
    pub fn new(program: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    fn args(diagram_type: DiagramType) -> Vec<&'static str> {
        let mut args = vec!["--png", "--scruffy"];
        if diagram_type == DiagramType::Sequence {
            args.push("--sequence");
        }
        args
    }

    async fn run(&self, diagram_type: DiagramType, expression: &str) -> Result<Vec<u8>, GenerationError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(Self::args(diagram_type))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(program = %self.program, %diagram_type, "Spawning renderer");

        let mut child = cmd.spawn().map_err(|e| {
            GenerationError::new(format!("failed to spawn {}: {}", self.program, e))
        })?;

        // Write the expression, then close stdin to signal EOF.
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(expression.as_bytes()).await {
                // the renderer may exit before reading everything; its status decides
                warn!(program = %self.program, error = %e, "Failed to write renderer stdin");
            }
            drop(stdin);
        }

        let output = child.wait_with_output().await.map_err(|e| {
            GenerationError::new(format!("failed to wait for {}: {}", self.program, e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GenerationError::new(format!(
                "{} failed ({}): {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        debug!(size = output.stdout.len(), "Renderer finished");
        Ok(output.stdout)
    }
}

#[async_trait]
impl Renderer for SumlRenderer {
    async fn render(
        &self,
        diagram_type: DiagramType,
        expression: &str,
    ) -> Result<Vec<u8>, GenerationError> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.run(diagram_type, expression))
                .await
                .map_err(|_| {
                    GenerationError::new(format!(
                        "{} timed out after {}s",
                        self.program,
                        limit.as_secs()
                    ))
                })?,
            None => self.run(diagram_type, expression).await,
        }
    }
}
