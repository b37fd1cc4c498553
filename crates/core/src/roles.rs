use serde::{Deserialize, Serialize};

pub use cadre_provider::ThinkingLevel;

/// Coarse pipeline stage a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Spec,
    Planning,
    Coding,
    Qa,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Spec => write!(f, "spec"),
            Phase::Planning => write!(f, "planning"),
            Phase::Coding => write!(f, "coding"),
            Phase::Qa => write!(f, "qa"),
        }
    }
}

/// The closed set of agent identities. Each selects a capability profile
/// and a default thinking budget from the table below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    SpecGatherer,
    SpecWriter,
    SpecCritic,
    SpecDiscovery,
    SpecContext,
    SpecResearcher,
    SpecValidation,
    Planner,
    Coder,
    QaReviewer,
    QaFixer,
    Insights,
    MergeResolver,
    PrReviewer,
    PrSecurity,
    PrPerformance,
    PrTests,
    PrSynthesizer,
    IssueAnalyzer,
    CommitWriter,
    DocWriter,
    TestPlanner,
    Refactorer,
    Debugger,
    Summarizer,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::SpecGatherer => "spec_gatherer",
            AgentRole::SpecWriter => "spec_writer",
            AgentRole::SpecCritic => "spec_critic",
            AgentRole::SpecDiscovery => "spec_discovery",
            AgentRole::SpecContext => "spec_context",
            AgentRole::SpecResearcher => "spec_researcher",
            AgentRole::SpecValidation => "spec_validation",
            AgentRole::Planner => "planner",
            AgentRole::Coder => "coder",
            AgentRole::QaReviewer => "qa_reviewer",
            AgentRole::QaFixer => "qa_fixer",
            AgentRole::Insights => "insights",
            AgentRole::MergeResolver => "merge_resolver",
            AgentRole::PrReviewer => "pr_reviewer",
            AgentRole::PrSecurity => "pr_security",
            AgentRole::PrPerformance => "pr_performance",
            AgentRole::PrTests => "pr_tests",
            AgentRole::PrSynthesizer => "pr_synthesizer",
            AgentRole::IssueAnalyzer => "issue_analyzer",
            AgentRole::CommitWriter => "commit_writer",
            AgentRole::DocWriter => "doc_writer",
            AgentRole::TestPlanner => "test_planner",
            AgentRole::Refactorer => "refactorer",
            AgentRole::Debugger => "debugger",
            AgentRole::Summarizer => "summarizer",
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Static capability profile for a role: built-in tools, required external
/// capabilities, and the default thinking level.
#[derive(Debug, Clone)]
pub struct RoleCapabilities {
    pub tools: &'static [&'static str],
    pub external: &'static [&'static str],
    pub thinking: ThinkingLevel,
}

const READ_TOOLS: &[&str] = &["read", "glob", "grep", "list_dir"];
const SPEC_TOOLS: &[&str] = &["read", "glob", "grep", "list_dir", "write"];
const WRITE_TOOLS: &[&str] = &["bash", "read", "write", "edit", "glob", "grep", "list_dir"];
const CODER_TOOLS: &[&str] = &[
    "bash", "read", "write", "edit", "glob", "grep", "list_dir", "web_fetch",
];
const NO_TOOLS: &[&str] = &[];

/// The single source of truth for role → capability mapping. No other
/// component hard-codes role tool sets.
pub fn capabilities(role: AgentRole) -> RoleCapabilities {
    use AgentRole::*;
    use ThinkingLevel::*;
    let (tools, external, thinking): (&[&str], &[&str], ThinkingLevel) = match role {
        SpecDiscovery => (READ_TOOLS, NO_TOOLS, Medium),
        SpecGatherer => (SPEC_TOOLS, NO_TOOLS, Medium),
        SpecContext => (SPEC_TOOLS, NO_TOOLS, Medium),
        SpecResearcher => (
            &["read", "glob", "grep", "list_dir", "write", "web_fetch"],
            NO_TOOLS,
            Medium,
        ),
        SpecWriter => (
            &["read", "glob", "grep", "list_dir", "write", "edit"],
            NO_TOOLS,
            High,
        ),
        SpecCritic => (READ_TOOLS, NO_TOOLS, High),
        SpecValidation => (READ_TOOLS, NO_TOOLS, Medium),
        Planner => (SPEC_TOOLS, NO_TOOLS, High),
        Coder => (CODER_TOOLS, &["browser"], High),
        QaReviewer => (
            &["bash", "read", "glob", "grep", "list_dir"],
            &["browser"],
            High,
        ),
        QaFixer => (WRITE_TOOLS, NO_TOOLS, High),
        Insights => (READ_TOOLS, NO_TOOLS, Low),
        MergeResolver => (NO_TOOLS, NO_TOOLS, Medium),
        PrReviewer => (READ_TOOLS, NO_TOOLS, High),
        PrSecurity => (READ_TOOLS, NO_TOOLS, High),
        PrPerformance => (READ_TOOLS, NO_TOOLS, Medium),
        PrTests => (READ_TOOLS, NO_TOOLS, Medium),
        PrSynthesizer => (NO_TOOLS, NO_TOOLS, Low),
        IssueAnalyzer => (READ_TOOLS, NO_TOOLS, Medium),
        CommitWriter => (READ_TOOLS, NO_TOOLS, Low),
        DocWriter => (
            &["read", "glob", "grep", "list_dir", "write", "edit"],
            NO_TOOLS,
            Medium,
        ),
        TestPlanner => (SPEC_TOOLS, NO_TOOLS, Medium),
        Refactorer => (WRITE_TOOLS, NO_TOOLS, High),
        Debugger => (WRITE_TOOLS, NO_TOOLS, High),
        Summarizer => (NO_TOOLS, NO_TOOLS, Low),
    };
    RoleCapabilities {
        tools,
        external,
        thinking,
    }
}

/// Detected project type, supplied by the caller. Cadre does not detect
/// this itself; detection heuristics live outside the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectKind {
    Electron,
    Web,
    Other,
}

/// Runtime adjustments layered over the static table.
#[derive(Debug, Clone, Default)]
pub struct CapabilityOverrides {
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

/// Resolve the final tool name list for a role. The abstract `browser`
/// capability is rewritten per project kind; when neither rewrite applies
/// the capability is dropped with a warning.
pub fn resolve_tools(
    role: AgentRole,
    overrides: &CapabilityOverrides,
    project_kind: ProjectKind,
) -> Vec<String> {
    let caps = capabilities(role);
    let mut names: Vec<String> = caps.tools.iter().map(|s| s.to_string()).collect();

    for external in caps.external {
        match *external {
            "browser" => match project_kind {
                ProjectKind::Electron => names.push("electron".to_string()),
                ProjectKind::Web => names.push("puppeteer".to_string()),
                ProjectKind::Other => {
                    tracing::warn!(
                        role = role.as_str(),
                        "browser capability dropped: no matching project kind"
                    );
                }
            },
            other => names.push(other.to_string()),
        }
    }

    for add in &overrides.add {
        if !names.iter().any(|n| n == add) {
            names.push(add.clone());
        }
    }
    names.retain(|n| !overrides.remove.iter().any(|r| r == n));
    names
}

pub fn default_thinking(role: AgentRole) -> ThinkingLevel {
    capabilities(role).thinking
}
