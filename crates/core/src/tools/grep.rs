use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;

use super::{resolve_in_project, Tool, ToolContext, ToolResult};

const MAX_MATCHES: usize = 500;
const SKIP_DIRS: &[&str] = &[".git", "node_modules", "target", "dist", ".venv"];

pub struct GrepTool;

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents with a regular expression. Returns matching \
         lines as path:line:text, up to 500 matches."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression to search for"
                },
                "path": {
                    "type": "string",
                    "description": "File or directory to search (default: working directory)"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let pattern = args
            .get("pattern")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("Missing required parameter: pattern"))?;

        let re = match regex::Regex::new(pattern) {
            Ok(re) => re,
            Err(e) => {
                return Ok(ToolResult::error(
                    format!("Invalid regex: {e}"),
                    format!("grep: {pattern}"),
                ))
            }
        };

        let base = match args.get("path").and_then(|v| v.as_str()) {
            Some(p) => match resolve_in_project(p, ctx) {
                Ok(resolved) => resolved,
                Err(reason) => return Ok(ToolResult::error(reason, format!("grep: {pattern}"))),
            },
            None => ctx.cwd.clone(),
        };

        let mut matches = Vec::new();
        search(&base, &re, &mut matches);

        let count = matches.len();
        let output = if matches.is_empty() {
            "No matches found".to_string()
        } else {
            matches.join("\n")
        };

        Ok(ToolResult {
            output,
            title: format!("grep: {pattern}"),
            is_error: false,
            metadata: json!({ "count": count }),
        })
    }
}

fn search(path: &Path, re: &regex::Regex, matches: &mut Vec<String>) {
    if matches.len() >= MAX_MATCHES {
        return;
    }
    if path.is_file() {
        search_file(path, re, matches);
        return;
    }
    let Ok(entries) = std::fs::read_dir(path) else {
        return;
    };
    let mut children: Vec<_> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    children.sort();
    for child in children {
        if matches.len() >= MAX_MATCHES {
            return;
        }
        if child.is_dir() {
            let name = child.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if SKIP_DIRS.contains(&name) || name.starts_with('.') {
                continue;
            }
            search(&child, re, matches);
        } else {
            search_file(&child, re, matches);
        }
    }
}

fn search_file(path: &Path, re: &regex::Regex, matches: &mut Vec<String>) {
    let Ok(raw) = std::fs::read(path) else {
        return;
    };
    if raw[..raw.len().min(512)].contains(&0) {
        return;
    }
    let content = String::from_utf8_lossy(&raw);
    for (i, line) in content.lines().enumerate() {
        if matches.len() >= MAX_MATCHES {
            return;
        }
        if re.is_match(line) {
            matches.push(format!("{}:{}:{}", path.display(), i + 1, line));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_context;

    #[tokio::test]
    async fn finds_matching_lines() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn alpha() {}\nfn beta() {}\n").unwrap();
        let ctx = test_context(dir.path());
        let result = GrepTool
            .execute(json!({ "pattern": "fn beta" }), &ctx)
            .await
            .unwrap();
        assert!(result.output.contains("a.rs:2:"));
    }

    #[tokio::test]
    async fn invalid_regex_is_an_error_result() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let result = GrepTool
            .execute(json!({ "pattern": "[unclosed" }), &ctx)
            .await
            .unwrap();
        assert!(result.is_error);
    }
}
