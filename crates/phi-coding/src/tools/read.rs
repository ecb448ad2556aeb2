use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use phi_agent::{Tool, ToolError, ToolResult};
use phi_llm::ContentPart;
use serde_json::{Map, Value, json};

use super::args::{default_cwd, int_arg, required_string, resolve_safe_path, schema};
use super::truncate::{format_size, truncate_head};
use super::{DEFAULT_MAX_BYTES, DEFAULT_MAX_LINES};

pub struct ReadFileTool {
    cwd: PathBuf,
}

impl ReadFileTool {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: default_cwd(cwd.into()),
        }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read"
    }

    fn description(&self) -> &str {
        "Read a file path relative to the working directory."
    }

    fn parameters(&self) -> Map<String, Value> {
        schema(json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Relative file path"},
                "offset": {
                    "type": "integer",
                    "description": "Line number to start reading from (1-indexed)",
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to read",
                },
                "max_bytes": {
                    "type": "integer",
                    "description": "Optional maximum bytes to return",
                },
            },
            "required": ["path"],
        }))
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        args: &Map<String, Value>,
    ) -> Result<ToolResult, ToolError> {
        let path = required_string(args, "path")?;
        let target = resolve_safe_path(&self.cwd, &path)?;

        if let Some(mime_type) = detect_image_mime_type(&target) {
            let data = tokio::fs::read(&target).await?;
            let mut details = Map::new();
            details.insert("path".to_string(), Value::String(path.clone()));
            details.insert("mimeType".to_string(), Value::String(mime_type.to_string()));
            details.insert(
                "image".to_string(),
                json!({
                    "type": "image",
                    "mimeType": mime_type,
                    "data": STANDARD.encode(&data),
                }),
            );
            return Ok(ToolResult {
                content: vec![ContentPart::text(format!("Read image file [{mime_type}]"))],
                details,
            });
        }

        let data = tokio::fs::read(&target).await?;
        let text = String::from_utf8_lossy(&data)
            .replace("\r\n", "\n")
            .replace('\r', "\n");

        let max_bytes = int_arg(args, "max_bytes")
            .filter(|value| *value > 0)
            .map(|value| value as usize)
            .unwrap_or(DEFAULT_MAX_BYTES);
        let offset = int_arg(args, "offset")
            .filter(|value| *value > 0)
            .map(|value| value as usize)
            .unwrap_or(1);
        let limit = int_arg(args, "limit")
            .filter(|value| *value > 0)
            .map(|value| value as usize)
            .unwrap_or(0);

        let all_lines: Vec<&str> = text.split('\n').collect();
        let total_file_lines = all_lines.len();
        let start_line = offset.max(1);
        if start_line > total_file_lines {
            return Err(ToolError::Execution(format!(
                "offset {offset} is beyond end of file ({total_file_lines} lines total)"
            )));
        }

        let start_index = start_line - 1;
        let mut selected = &all_lines[start_index..];
        let mut user_limited_lines = 0usize;
        if limit > 0 {
            let end_index = (start_index + limit).min(all_lines.len());
            selected = &all_lines[start_index..end_index];
            user_limited_lines = end_index - start_index;
        }
        let selected_content = selected.join("\n");

        let truncation = truncate_head(&selected_content, DEFAULT_MAX_LINES, max_bytes);
        let mut output = truncation.content.clone();
        let mut details = Map::new();
        details.insert("path".to_string(), Value::String(path.clone()));

        if truncation.first_line_exceeds_limit {
            output = format!(
                "[Line {start_line} is {}, exceeds {} limit. Use bash: sed -n '{start_line}p' {path} | head -c {max_bytes}]",
                format_size(all_lines[start_index].len()),
                format_size(max_bytes),
            );
            details.insert("truncation".to_string(), truncation.details());
        } else if truncation.truncated {
            let end_line = start_line + truncation.output_lines - 1;
            let next_offset = end_line + 1;
            if truncation.truncated_by == "lines" {
                output.push_str(&format!(
                    "\n\n[Showing lines {start_line}-{end_line} of {total_file_lines}. Use offset={next_offset} to continue.]"
                ));
            } else {
                output.push_str(&format!(
                    "\n\n[Showing lines {start_line}-{end_line} of {total_file_lines} ({} limit). Use offset={next_offset} to continue.]",
                    format_size(max_bytes),
                ));
            }
            details.insert("truncation".to_string(), truncation.details());
        } else if user_limited_lines > 0 && start_index + user_limited_lines < all_lines.len() {
            let remaining = all_lines.len() - (start_index + user_limited_lines);
            let next_offset = start_line + user_limited_lines;
            output.push_str(&format!(
                "\n\n[{remaining} more lines in file. Use offset={next_offset} to continue.]"
            ));
        }

        if output.trim().is_empty() {
            output = "(empty file)".to_string();
        }

        Ok(ToolResult {
            content: vec![ContentPart::text(output)],
            details,
        })
    }
}

fn detect_image_mime_type(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_args(path: &str) -> Map<String, Value> {
        schema(json!({"path": path}))
    }

    fn first_text(result: &ToolResult) -> String {
        result.content[0]
            .as_text()
            .expect("text content")
            .to_string()
    }

    #[tokio::test]
    async fn reads_whole_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\nthree").expect("seed");
        let tool = ReadFileTool::new(dir.path());

        let result = tool.execute("c1", &read_args("a.txt")).await.expect("read");
        assert_eq!(first_text(&result), "one\ntwo\nthree");
    }

    #[tokio::test]
    async fn normalizes_crlf_line_endings() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), "one\r\ntwo\rthree").expect("seed");
        let tool = ReadFileTool::new(dir.path());

        let result = tool.execute("c1", &read_args("a.txt")).await.expect("read");
        assert_eq!(first_text(&result), "one\ntwo\nthree");
    }

    #[tokio::test]
    async fn offset_and_limit_window_the_file_with_a_continuation_hint() {
        let dir = tempfile::tempdir().expect("tempdir");
        let content = (1..=9).map(|n| n.to_string()).collect::<Vec<_>>().join("\n");
        std::fs::write(dir.path().join("a.txt"), content).expect("seed");
        let tool = ReadFileTool::new(dir.path());

        let result = tool
            .execute("c1", &schema(json!({"path": "a.txt", "offset": 3, "limit": 2})))
            .await
            .expect("read");
        let text = first_text(&result);
        assert!(text.starts_with("3\n4"));
        assert!(text.contains("[5 more lines in file. Use offset=5 to continue.]"));
    }

    #[tokio::test]
    async fn offsets_beyond_the_end_are_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), "only\nlines").expect("seed");
        let tool = ReadFileTool::new(dir.path());

        let error = tool
            .execute("c1", &schema(json!({"path": "a.txt", "offset": 10})))
            .await
            .err()
            .expect("offset should fail");
        assert!(error.to_string().contains("beyond end of file"));
    }

    #[tokio::test]
    async fn byte_capped_reads_carry_a_truncation_hint() {
        let dir = tempfile::tempdir().expect("tempdir");
        let content = (1..=50)
            .map(|n| format!("line-{n:03}"))
            .collect::<Vec<_>>()
            .join("\n");
        std::fs::write(dir.path().join("a.txt"), content).expect("seed");
        let tool = ReadFileTool::new(dir.path());

        let result = tool
            .execute("c1", &schema(json!({"path": "a.txt", "max_bytes": 40})))
            .await
            .expect("read");
        let text = first_text(&result);
        assert!(text.contains("Use offset="));
        assert!(result.details.get("truncation").is_some());
    }

    #[tokio::test]
    async fn empty_files_read_as_a_placeholder() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), "").expect("seed");
        let tool = ReadFileTool::new(dir.path());

        let result = tool.execute("c1", &read_args("a.txt")).await.expect("read");
        assert_eq!(first_text(&result), "(empty file)");
    }

    #[tokio::test]
    async fn image_files_return_base64_details() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("pic.png"), [0x89, 0x50, 0x4e, 0x47]).expect("seed");
        let tool = ReadFileTool::new(dir.path());

        let result = tool.execute("c1", &read_args("pic.png")).await.expect("read");
        assert_eq!(first_text(&result), "Read image file [image/png]");
        assert_eq!(result.details["mimeType"], "image/png");
        assert_eq!(result.details["image"]["data"], STANDARD.encode([0x89u8, 0x50, 0x4e, 0x47]));
    }
}
