use std::path::PathBuf;

use async_trait::async_trait;
use phi_agent::{Tool, ToolError, ToolResult};
use phi_llm::ContentPart;
use serde_json::{Map, Value, json};

use super::args::{default_cwd, required_string, resolve_safe_path, schema, string_arg};

pub struct EditTool {
    cwd: PathBuf,
}

impl EditTool {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: default_cwd(cwd.into()),
        }
    }
}

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "Edit a file by replacing exact oldText with newText."
    }

    fn parameters(&self) -> Map<String, Value> {
        schema(json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Relative file path"},
                "oldText": {
                    "type": "string",
                    "description": "Exact text to replace",
                },
                "newText": {
                    "type": "string",
                    "description": "Replacement text",
                },
            },
            "required": ["path", "oldText", "newText"],
        }))
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        args: &Map<String, Value>,
    ) -> Result<ToolResult, ToolError> {
        let path = required_string(args, "path")?;
        let old_text =
            string_arg(args, "oldText").ok_or_else(|| ToolError::MissingArgument("oldText".to_string()))?;
        let new_text =
            string_arg(args, "newText").ok_or_else(|| ToolError::MissingArgument("newText".to_string()))?;

        let target = resolve_safe_path(&self.cwd, &path)?;
        let content = tokio::fs::read_to_string(&target).await?;

        let match_count = content.matches(&old_text).count();
        if match_count == 0 {
            return Err(ToolError::Execution(format!(
                "could not find exact text in {path}"
            )));
        }
        if match_count > 1 {
            return Err(ToolError::Execution(format!(
                "oldText occurs multiple times in {path}; provide unique context"
            )));
        }

        let updated = content.replacen(&old_text, &new_text, 1);
        if updated == content {
            return Err(ToolError::Execution("no changes applied".to_string()));
        }
        tokio::fs::write(&target, updated.as_bytes()).await?;

        let (diff, first_changed_line) = generate_diff(&content, &updated);
        let mut details = Map::new();
        details.insert("path".to_string(), Value::String(path.clone()));
        details.insert("diff".to_string(), Value::String(diff));
        details.insert("firstChangedLine".to_string(), Value::from(first_changed_line));
        details.insert("usedFuzzyMatch".to_string(), Value::Bool(false));

        Ok(ToolResult {
            content: vec![ContentPart::text(format!(
                "Edited {path}: replaced {} chars with {} chars",
                old_text.len(),
                new_text.len()
            ))],
            details,
        })
    }
}

/// Numbered removed/added line listing plus the first line that differs.
fn generate_diff(old_content: &str, new_content: &str) -> (String, usize) {
    if old_content == new_content {
        return (String::new(), 0);
    }

    let old_lines: Vec<&str> = old_content.split('\n').collect();
    let new_lines: Vec<&str> = new_content.split('\n').collect();
    let min_len = old_lines.len().min(new_lines.len());

    let mut first_changed_line = min_len + 1;
    for index in 0..min_len {
        if old_lines[index] != new_lines[index] {
            first_changed_line = index + 1;
            break;
        }
    }

    let mut out = String::new();
    for (index, line) in old_lines.iter().enumerate() {
        out.push_str(&format!("-{} {line}\n", index + 1));
    }
    for (index, line) in new_lines.iter().enumerate() {
        out.push_str(&format!("+{} {line}\n", index + 1));
    }
    (out.trim_end_matches('\n').to_string(), first_changed_line)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edit_args(path: &str, old: &str, new: &str) -> Map<String, Value> {
        schema(json!({"path": path, "oldText": old, "newText": new}))
    }

    #[tokio::test]
    async fn replaces_a_unique_match() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), "fn main() {\n    old();\n}").expect("seed");
        let tool = EditTool::new(dir.path());

        let result = tool
            .execute("c1", &edit_args("a.txt", "old()", "new()"))
            .await
            .expect("edit should succeed");

        let updated = std::fs::read_to_string(dir.path().join("a.txt")).expect("read back");
        assert_eq!(updated, "fn main() {\n    new();\n}");
        assert_eq!(result.details["firstChangedLine"], Value::from(2));
        assert!(
            result.details["diff"]
                .as_str()
                .expect("diff string")
                .contains("+2     new();")
        );
    }

    #[tokio::test]
    async fn missing_text_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), "content").expect("seed");
        let tool = EditTool::new(dir.path());

        let error = tool
            .execute("c1", &edit_args("a.txt", "absent", "x"))
            .await
            .err()
            .expect("edit should fail");
        assert!(error.to_string().contains("could not find exact text"));
    }

    #[tokio::test]
    async fn ambiguous_matches_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), "dup dup").expect("seed");
        let tool = EditTool::new(dir.path());

        let error = tool
            .execute("c1", &edit_args("a.txt", "dup", "x"))
            .await
            .err()
            .expect("edit should fail");
        assert!(error.to_string().contains("occurs multiple times"));
    }

    #[tokio::test]
    async fn identical_replacement_reports_no_changes() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), "same").expect("seed");
        let tool = EditTool::new(dir.path());

        let error = tool
            .execute("c1", &edit_args("a.txt", "same", "same"))
            .await
            .err()
            .expect("edit should fail");
        assert!(error.to_string().contains("no changes applied"));
    }
}
