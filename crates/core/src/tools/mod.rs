pub mod bash;
pub mod edit;
pub mod filesystem;
pub mod glob;
pub mod grep;
pub mod read;
pub mod web;
pub mod write;

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::events::SessionEvent;
use crate::security::SecurityProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolPermission {
    ReadOnly,
    RequiresWrite,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    fn permission(&self) -> ToolPermission {
        ToolPermission::ReadOnly
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult>;
}

pub struct ToolResult {
    pub output: String,
    pub title: String,
    pub is_error: bool,
    pub metadata: Value,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            title: title.into(),
            is_error: false,
            metadata: Value::Null,
        }
    }

    pub fn error(output: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            title: title.into(),
            is_error: true,
            metadata: Value::Null,
        }
    }
}

/// The serializable half of a tool context. This is what crosses the
/// worker boundary; the cancel signal and event channel are attached on
/// the far side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolContextSpec {
    pub cwd: PathBuf,
    pub project_dir: PathBuf,
    pub spec_dir: PathBuf,
    pub security: SecurityProfile,
}

impl ToolContextSpec {
    pub fn new(project_dir: PathBuf, spec_dir: PathBuf, security: SecurityProfile) -> Self {
        Self {
            cwd: project_dir.clone(),
            project_dir,
            spec_dir,
            security,
        }
    }

    /// The working directory must sit inside the project directory.
    pub fn validate(&self) -> Result<()> {
        if !normalize(&self.cwd).starts_with(normalize(&self.project_dir)) {
            anyhow::bail!(
                "cwd {} is outside the project directory {}",
                self.cwd.display(),
                self.project_dir.display()
            );
        }
        Ok(())
    }

    pub fn into_runtime(
        self,
        cancel: CancellationToken,
        event_tx: Option<broadcast::Sender<SessionEvent>>,
    ) -> ToolContext {
        ToolContext {
            cwd: self.cwd,
            project_dir: self.project_dir,
            spec_dir: self.spec_dir,
            security: self.security,
            cancel,
            event_tx,
        }
    }
}

#[derive(Clone)]
pub struct ToolContext {
    pub cwd: PathBuf,
    pub project_dir: PathBuf,
    pub spec_dir: PathBuf,
    pub security: SecurityProfile,
    pub cancel: CancellationToken,
    pub event_tx: Option<broadcast::Sender<SessionEvent>>,
}

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Tool definitions restricted to the given names (role capability
    /// filtering). Unknown names are skipped.
    pub fn definitions_filtered(
        &self,
        allowed_names: &[String],
    ) -> Vec<cadre_provider::ToolDefinition> {
        let mut defs: Vec<_> = self
            .tools
            .values()
            .filter(|t| allowed_names.iter().any(|n| n == t.name()))
            .map(|t| cadre_provider::ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub async fn execute(&self, name: &str, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        let tool = self
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("Unknown tool: {name}"))?;
        tool.execute(args, ctx).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(bash::BashTool));
    registry.register(Arc::new(read::ReadTool));
    registry.register(Arc::new(write::WriteTool));
    registry.register(Arc::new(edit::EditTool));
    registry.register(Arc::new(glob::GlobTool));
    registry.register(Arc::new(grep::GrepTool));
    registry.register(Arc::new(filesystem::ListDirTool));
    registry.register(Arc::new(web::WebFetchTool::new()));
    registry
}

/// Lexically normalize a path, collapsing `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a
/// UTF-8 character.
pub(crate) fn truncate_str(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    &s[..cut]
}

/// Resolve a tool path argument against the working directory and reject
/// anything that escapes the project directory.
pub(crate) fn resolve_in_project(raw: &str, ctx: &ToolContext) -> std::result::Result<PathBuf, String> {
    let p = Path::new(raw);
    let absolute = if p.is_absolute() {
        p.to_path_buf()
    } else {
        ctx.cwd.join(p)
    };
    let normalized = normalize(&absolute);
    if normalized.starts_with(normalize(&ctx.project_dir)) {
        Ok(normalized)
    } else {
        Err(format!(
            "Path {} is outside the project directory",
            absolute.display()
        ))
    }
}

#[cfg(test)]
pub(crate) fn test_context(project_dir: &Path) -> ToolContext {
    ToolContextSpec::new(
        project_dir.to_path_buf(),
        project_dir.join("spec"),
        SecurityProfile::with_stack(vec!["cargo".to_string()]),
    )
    .into_runtime(CancellationToken::new(), None)
}
