use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use super::{resolve_in_project, Tool, ToolContext, ToolResult};

pub struct ListDirTool;

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the entries of a directory. Directories are suffixed with '/'."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list (default: working directory)"
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let base = match args.get("path").and_then(|v| v.as_str()) {
            Some(p) => match resolve_in_project(p, ctx) {
                Ok(resolved) => resolved,
                Err(reason) => return Ok(ToolResult::error(reason, "list_dir")),
            },
            None => ctx.cwd.clone(),
        };

        if !base.is_dir() {
            return Ok(ToolResult::error(
                format!("Not a directory: {}", base.display()),
                format!("list_dir: {}", base.display()),
            ));
        }

        let mut entries: Vec<String> = std::fs::read_dir(&base)?
            .filter_map(|e| e.ok())
            .map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                if e.path().is_dir() {
                    format!("{name}/")
                } else {
                    name
                }
            })
            .collect();
        entries.sort();

        let count = entries.len();
        Ok(ToolResult {
            output: if entries.is_empty() {
                "(empty directory)".to_string()
            } else {
                entries.join("\n")
            },
            title: format!("list_dir: {}", base.display()),
            is_error: false,
            metadata: json!({ "count": count }),
        })
    }
}
