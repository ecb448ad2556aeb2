use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use phi_agent::{Tool, ToolError, ToolResult};
use phi_llm::ContentPart;
use serde_json::{Map, Value, json};
use tracing::debug;
use uuid::Uuid;

use super::args::{default_cwd, float_arg, required_string, schema};
use super::truncate::{format_size, truncate_tail};
use super::{DEFAULT_MAX_BYTES, DEFAULT_MAX_LINES};

pub struct BashTool {
    cwd: PathBuf,
    timeout: Option<Duration>,
}

impl BashTool {
    pub fn new(cwd: impl Into<PathBuf>, timeout: Option<Duration>) -> Self {
        Self {
            cwd: default_cwd(cwd.into()),
            timeout,
        }
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a bash command in the working directory and return stdout/stderr."
    }

    fn parameters(&self) -> Map<String, Value> {
        schema(json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Bash command to execute",
                },
                "timeout": {
                    "type": "number",
                    "description": "Timeout in seconds (optional, no default timeout)",
                },
            },
            "required": ["command"],
        }))
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        args: &Map<String, Value>,
    ) -> Result<ToolResult, ToolError> {
        let command_text = required_string(args, "command")?;

        let timeout = float_arg(args, "timeout")
            .filter(|seconds| *seconds > 0.0)
            .map(Duration::from_secs_f64)
            .or(self.timeout);

        debug!(command = %command_text, cwd = %self.cwd.display(), "running bash command");
        let mut command = tokio::process::Command::new("bash");
        command
            .arg("-lc")
            .arg(&command_text)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match timeout {
            Some(limit) => match tokio::time::timeout(limit, command.output()).await {
                Ok(output) => output?,
                Err(_elapsed) => {
                    return Err(ToolError::Execution(format!(
                        "Command timed out after {:.1} seconds",
                        limit.as_secs_f64()
                    )));
                }
            },
            None => command.output().await?,
        };

        let mut full_output = String::from_utf8_lossy(&output.stdout).into_owned();
        full_output.push_str(&String::from_utf8_lossy(&output.stderr));
        let full_output = full_output.replace("\r\n", "\n").replace('\r', "\n");

        let truncation = truncate_tail(&full_output, DEFAULT_MAX_LINES, DEFAULT_MAX_BYTES);
        let mut output_text = truncation.content.clone();
        if output_text.trim().is_empty() {
            output_text = "(no output)".to_string();
        }

        let mut full_output_path = String::new();
        if truncation.truncated {
            full_output_path = std::env::temp_dir()
                .join(format!("phi-bash-{}.log", Uuid::new_v4()))
                .display()
                .to_string();
            let _ = std::fs::write(&full_output_path, &full_output);

            let start_line = truncation.total_lines - truncation.output_lines + 1;
            let end_line = truncation.total_lines;
            if truncation.last_line_partial {
                let last_line_size =
                    format_size(full_output.split('\n').next_back().unwrap_or_default().len());
                output_text.push_str(&format!(
                    "\n\n[Showing last {} of line {end_line} (line is {last_line_size}). Full output: {full_output_path}]",
                    format_size(truncation.output_bytes),
                ));
            } else if truncation.truncated_by == "lines" {
                output_text.push_str(&format!(
                    "\n\n[Showing lines {start_line}-{end_line} of {}. Full output: {full_output_path}]",
                    truncation.total_lines,
                ));
            } else {
                output_text.push_str(&format!(
                    "\n\n[Showing lines {start_line}-{end_line} of {} ({} limit). Full output: {full_output_path}]",
                    truncation.total_lines,
                    format_size(DEFAULT_MAX_BYTES),
                ));
            }
        }

        let mut details = Map::new();
        details.insert("command".to_string(), Value::String(command_text.clone()));
        details.insert(
            "cwd".to_string(),
            Value::String(self.cwd.display().to_string()),
        );
        details.insert(
            "truncation".to_string(),
            if truncation.truncated {
                truncation.details()
            } else {
                Value::Null
            },
        );
        details.insert(
            "fullOutputPath".to_string(),
            Value::String(full_output_path),
        );

        let exit_code = output.status.code().unwrap_or(0);
        if exit_code != 0 {
            return Err(ToolError::Execution(format!(
                "{output_text}\n\nCommand exited with code {exit_code}"
            )));
        }

        Ok(ToolResult {
            content: vec![ContentPart::text(output_text)],
            details,
        })
    }
}
