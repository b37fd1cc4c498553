use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use super::{resolve_in_project, Tool, ToolContext, ToolPermission, ToolResult};

pub struct WriteTool;

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories as needed. \
         Overwrites the file if it exists."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file, inside the project directory"
                },
                "content": {
                    "type": "string",
                    "description": "The full file content"
                }
            },
            "required": ["file_path", "content"]
        })
    }

    fn permission(&self) -> ToolPermission {
        ToolPermission::RequiresWrite
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let file_path = args
            .get("file_path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing required parameter: file_path"))?;
        let content = args
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing required parameter: content"))?;

        let path = match resolve_in_project(file_path, ctx) {
            Ok(p) => p,
            Err(reason) => return Ok(ToolResult::error(reason, format!("write: {file_path}"))),
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;

        Ok(ToolResult {
            output: format!("Wrote {} bytes to {}", content.len(), path.display()),
            title: format!("write: {file_path}"),
            is_error: false,
            metadata: json!({ "bytes": content.len() }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_context;

    #[tokio::test]
    async fn writes_and_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let result = WriteTool
            .execute(
                json!({ "file_path": "src/nested/out.txt", "content": "payload" }),
                &ctx,
            )
            .await
            .unwrap();
        assert!(!result.is_error);
        let written = std::fs::read_to_string(dir.path().join("src/nested/out.txt")).unwrap();
        assert_eq!(written, "payload");
    }

    #[tokio::test]
    async fn rejects_escape_via_dotdot() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let result = WriteTool
            .execute(
                json!({ "file_path": "../escape.txt", "content": "x" }),
                &ctx,
            )
            .await
            .unwrap();
        assert!(result.is_error);
    }
}
