use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;

use crate::error::{ProviderError, ProviderResult};

/// Locate a required tool on the `PATH`.
pub fn require_tool(name: &str) -> ProviderResult<PathBuf> {
    which::which(name).map_err(|e| {
        log::debug!("Lookup of '{name}' failed: {e}");
        ProviderError::ToolMissing(name.to_string())
    })
}

/// An external program plus the arguments and environment every invocation shares.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    base_args: Vec<String>,
    envs: Vec<(String, String)>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Arguments appended after the per-call arguments, e.g. `--output json`.
    pub fn with_base_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    fn display(&self, args: &[&str]) -> String {
        let program = self
            .program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.display().to_string());
        // Only the first few arguments, later ones can be large documents.
        let shown = args.iter().take(3).copied().collect::<Vec<_>>().join(" ");
        format!("{program} {shown}")
    }

    /// Run the program and return its stdout, mapping a non-zero exit to a [ProviderError].
    pub async fn output(&self, args: &[&str], stdin: Option<&[u8]>) -> ProviderResult<String> {
        let display = self.display(args);
        log::trace!("Running {display}");

        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(args)
            .args(&self.base_args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProviderError::ToolMissing(self.program.display().to_string())
            } else {
                ProviderError::Io(e)
            }
        })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input).await?;
            pipe.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(ProviderError::from_failure(
                display,
                output.status.to_string(),
                stderr,
            ));
        }

        Ok(stdout)
    }

    /// Run the program and parse stdout as JSON. Empty output parses as `null`.
    pub async fn json(&self, args: &[&str]) -> ProviderResult<serde_json::Value> {
        let stdout = self.output(args, None).await?;
        if stdout.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&stdout).map_err(|e| ProviderError::InvalidResponse {
            command: self.display(args),
            reason: e.to_string(),
        })
    }
}

/// Read a string at a JSON pointer, failing with the command that produced the document.
pub(crate) fn pointer_str(
    value: &serde_json::Value,
    pointer: &str,
    command: &str,
) -> ProviderResult<String> {
    value
        .pointer(pointer)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| ProviderError::InvalidResponse {
            command: command.to_string(),
            reason: format!("missing string at {pointer}"),
        })
}

/// Collect every string at `field` from the objects in the array at `pointer`.
pub(crate) fn pointer_strings(value: &serde_json::Value, pointer: &str, field: &str) -> Vec<String> {
    value
        .pointer(pointer)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get(field).and_then(|v| v.as_str()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
