use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use super::{resolve_in_project, Tool, ToolContext, ToolPermission, ToolResult};

pub struct EditTool;

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "Perform a string replacement in a file. The old_string must appear exactly once in the file. \
         Preserves original indentation and formatting."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file, inside the project directory"
                },
                "old_string": {
                    "type": "string",
                    "description": "The exact string to find (must be unique in the file)"
                },
                "new_string": {
                    "type": "string",
                    "description": "The replacement string"
                }
            },
            "required": ["file_path", "old_string", "new_string"]
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
        let old_string = args
            .get("old_string")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing required parameter: old_string"))?;
        let new_string = args
            .get("new_string")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing required parameter: new_string"))?;

        let path = match resolve_in_project(file_path, ctx) {
            Ok(p) => p,
            Err(reason) => return Ok(ToolResult::error(reason, format!("edit: {file_path}"))),
        };

        if !path.exists() {
            return Ok(ToolResult::error(
                format!("File not found: {}", path.display()),
                format!("edit: {file_path}"),
            ));
        }

        let content = tokio::fs::read_to_string(&path).await?;
        let count = content.matches(old_string).count();

        if count == 0 {
            return Ok(ToolResult::error(
                "old_string not found in file",
                format!("edit: {file_path}"),
            ));
        }

        if count > 1 {
            return Ok(ToolResult::error(
                format!(
                    "old_string found {count} times -- it must appear exactly once. \
                     Include more surrounding context to make it unique."
                ),
                format!("edit: {file_path}"),
            ));
        }

        let new_content = content.replacen(old_string, new_string, 1);
        tokio::fs::write(&path, &new_content).await?;

        Ok(ToolResult {
            output: format!("Applied edit to {}", path.display()),
            title: format!("edit: {file_path}"),
            is_error: false,
            metadata: json!({ "applied": true }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_context;

    #[tokio::test]
    async fn applies_unique_replacement() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn old() {}\n").unwrap();
        let ctx = test_context(dir.path());
        let result = EditTool
            .execute(
                json!({ "file_path": "a.rs", "old_string": "old", "new_string": "new" }),
                &ctx,
            )
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.rs")).unwrap(),
            "fn new() {}\n"
        );
    }

    #[tokio::test]
    async fn ambiguous_match_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "x x\n").unwrap();
        let ctx = test_context(dir.path());
        let result = EditTool
            .execute(
                json!({ "file_path": "a.rs", "old_string": "x", "new_string": "y" }),
                &ctx,
            )
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.output.contains("2 times"));
    }
}
