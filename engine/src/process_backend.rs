//! The external-process backend: the thin spawning shim the `ralph-backend`
//! crate's argument-templating helpers anticipate. Runs `<command> <args>`
//! with the sandbox as the working directory and combines stdout/stderr
//! into one text blob the orchestrator scans for rate-limit phrases,
//! grounded on the teacher's `BashTool::execute` process-spawning idiom.

use std::collections::BTreeMap;
use std::time::Instant;

use async_trait::async_trait;
use ralph_backend::{build_args, BackendError, TemplateVars};
use ralph_control::BackendConfig;
use ralph_types::{BackendResult, Request};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

pub struct ProcessBackend {
    name: String,
    command: String,
    args: Vec<String>,
    options: BTreeMap<String, String>,
}

impl ProcessBackend {
    pub fn new(name: impl Into<String>, config: &BackendConfig) -> Option<Self> {
        let command = config.command.clone()?;
        Some(ProcessBackend {
            name: name.into(),
            command,
            args: config.args.clone(),
            options: config.options.clone(),
        })
    }
}

#[async_trait]
impl ralph_backend::Backend for ProcessBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        cancel: CancellationToken,
        request: Request,
    ) -> Result<BackendResult, BackendError> {
        let vars = TemplateVars {
            prompt: &request.prompt,
            model: &request.model,
            sandbox: &request.sandbox_path,
            iteration: request.iteration,
            session_id: &request.session_id,
        };
        let args = build_args(&self.args, &vars, &self.options);

        let mut command = Command::new(&self.command);
        command
            .args(&args)
            .current_dir(&request.sandbox_path)
            .kill_on_drop(true);

        let started = Instant::now();
        let output = tokio::select! {
            result = command.output() => result.map_err(|source| BackendError::Io {
                backend: self.name.clone(),
                source,
            })?,
            _ = cancel.cancelled() => return Err(BackendError::Cancelled),
        };
        let duration = started.elapsed();

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }

        let error = if output.status.success() {
            None
        } else {
            Some(format!(
                "exit status {}",
                output.status.code().map(|c| c.to_string()).unwrap_or_else(|| "unknown".into())
            ))
        };

        Ok(BackendResult {
            backend: self.name.clone(),
            model: request.model,
            duration,
            tokens_in: 0,
            tokens_out: 0,
            cost: 0.0,
            cost_estimate: 0.0,
            files_changed: Vec::new(),
            tests_passed: None,
            tests_failed: None,
            output: combined,
            error,
        })
    }

    fn available(&self) -> bool {
        true
    }
}
