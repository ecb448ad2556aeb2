use std::path::PathBuf;

use async_trait::async_trait;
use phi_agent::{Tool, ToolError, ToolResult};
use phi_llm::ContentPart;
use serde_json::{Map, Value, json};

use super::args::{default_cwd, required_string, resolve_safe_path, schema, string_arg};

pub struct WriteFileTool {
    cwd: PathBuf,
}

impl WriteFileTool {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: default_cwd(cwd.into()),
        }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write"
    }

    fn description(&self) -> &str {
        "Write content to a file. Creates the file if it doesn't exist, overwrites if it does, \
         and creates parent directories automatically."
    }

    fn parameters(&self) -> Map<String, Value> {
        schema(json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to write (relative or absolute within the working directory)",
                },
                "content": {
                    "type": "string",
                    "description": "File content to write",
                },
            },
            "required": ["path", "content"],
        }))
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        args: &Map<String, Value>,
    ) -> Result<ToolResult, ToolError> {
        let path = required_string(args, "path")?;
        let content =
            string_arg(args, "content").ok_or_else(|| ToolError::MissingArgument("content".to_string()))?;

        let target = resolve_safe_path(&self.cwd, &path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, content.as_bytes()).await?;

        let mut details = Map::new();
        details.insert("path".to_string(), Value::String(path.clone()));
        details.insert("size".to_string(), Value::from(content.len()));
        Ok(ToolResult {
            content: vec![ContentPart::text(format!(
                "Successfully wrote {} bytes to {}",
                content.len(),
                path
            ))],
            details,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(path: &str, content: &str) -> Map<String, Value> {
        schema(json!({"path": path, "content": content}))
    }

    #[tokio::test]
    async fn writes_files_and_creates_parent_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tool = WriteFileTool::new(dir.path());

        let result = tool
            .execute("call_1", &args("nested/dir/a.txt", "hello"))
            .await
            .expect("write should succeed");

        let written =
            std::fs::read_to_string(dir.path().join("nested/dir/a.txt")).expect("file exists");
        assert_eq!(written, "hello");
        assert_eq!(
            result.content[0],
            ContentPart::text("Successfully wrote 5 bytes to nested/dir/a.txt")
        );
        assert_eq!(result.details["size"], Value::from(5));
    }

    #[tokio::test]
    async fn overwrites_existing_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tool = WriteFileTool::new(dir.path());
        tool.execute("c1", &args("a.txt", "first"))
            .await
            .expect("first write");
        tool.execute("c2", &args("a.txt", "second"))
            .await
            .expect("second write");
        let written = std::fs::read_to_string(dir.path().join("a.txt")).expect("file exists");
        assert_eq!(written, "second");
    }

    #[tokio::test]
    async fn rejects_missing_arguments_and_escaping_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tool = WriteFileTool::new(dir.path());

        let error = tool
            .execute("c1", &schema(json!({"content": "x"})))
            .await
            .err()
            .expect("missing path should fail");
        assert!(matches!(error, ToolError::MissingArgument(_)));

        let error = tool
            .execute("c1", &args("../escape.txt", "x"))
            .await
            .err()
            .expect("escape should fail");
        assert!(matches!(error, ToolError::PathEscape(_)));
    }
}
