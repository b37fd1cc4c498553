use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub build: BuildSettings,
    #[serde(default)]
    pub qa: QaSettings,
    #[serde(default)]
    pub fanout: FanoutSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default)]
    pub retry: RetrySettings,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            retry: RetrySettings::default(),
        }
    }
}

fn default_max_steps() -> u32 {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSettings {
    /// Attempts per subtask before it is parked on the stuck list.
    #[serde(default = "default_max_subtask_retries")]
    pub max_subtask_retries: u32,
    /// Retries per orchestrator phase (planning, spec phases).
    #[serde(default = "default_max_phase_retries")]
    pub max_phase_retries: u32,
    /// Pause between subtask iterations.
    #[serde(default = "default_auto_continue_delay_ms")]
    pub auto_continue_delay_ms: u64,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            max_subtask_retries: default_max_subtask_retries(),
            max_phase_retries: default_max_phase_retries(),
            auto_continue_delay_ms: default_auto_continue_delay_ms(),
        }
    }
}

fn default_max_subtask_retries() -> u32 {
    3
}

fn default_max_phase_retries() -> u32 {
    2
}

fn default_auto_continue_delay_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaSettings {
    #[serde(default = "default_max_qa_iterations")]
    pub max_iterations: u32,
    /// An issue seen this many times across iterations triggers escalation.
    #[serde(default = "default_recurring_threshold")]
    pub recurring_threshold: u32,
    /// Jaccard word overlap at or above which two issues are the same.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

impl Default for QaSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_qa_iterations(),
            recurring_threshold: default_recurring_threshold(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

fn default_max_qa_iterations() -> u32 {
    50
}

fn default_recurring_threshold() -> u32 {
    3
}

fn default_similarity_threshold() -> f64 {
    0.8
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutSettings {
    /// Concurrency bound for batch paths (parallel specialist sessions).
    #[serde(default = "default_fanout_limit")]
    pub max_concurrency: usize,
}

impl Default for FanoutSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_fanout_limit(),
        }
    }
}

fn default_fanout_limit() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetrySettings {
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        self.initial_backoff_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
            .min(self.max_backoff_ms)
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    30000
}

#[derive(Debug, Clone)]
pub struct ProviderDef {
    pub id: &'static str,
    pub name: &'static str,
    pub env_var: &'static str,
    pub base_url_env: Option<&'static str>,
    pub default_base_url: &'static str,
}

pub const BUILT_IN_PROVIDERS: &[ProviderDef] = &[
    ProviderDef { id: "anthropic", name: "Anthropic", env_var: "ANTHROPIC_API_KEY",
                  base_url_env: Some("ANTHROPIC_BASE_URL"),
                  default_base_url: "https://api.anthropic.com/v1" },
    ProviderDef { id: "openai", name: "OpenAI", env_var: "OPENAI_API_KEY",
                  base_url_env: Some("OPENAI_BASE_URL"),
                  default_base_url: "https://api.openai.com/v1" },
    ProviderDef { id: "google", name: "Google Gemini", env_var: "GOOGLE_GENERATIVE_AI_API_KEY",
                  base_url_env: None,
                  default_base_url: "https://generativelanguage.googleapis.com/v1beta" },
    ProviderDef { id: "azure", name: "Azure OpenAI", env_var: "AZURE_OPENAI_API_KEY",
                  base_url_env: Some("AZURE_OPENAI_ENDPOINT"),
                  default_base_url: "" },
    ProviderDef { id: "mistral", name: "Mistral", env_var: "MISTRAL_API_KEY",
                  base_url_env: None,
                  default_base_url: "https://api.mistral.ai/v1" },
    ProviderDef { id: "groq", name: "Groq", env_var: "GROQ_API_KEY",
                  base_url_env: None,
                  default_base_url: "https://api.groq.com/openai/v1" },
    ProviderDef { id: "xai", name: "xAI", env_var: "XAI_API_KEY",
                  base_url_env: None,
                  default_base_url: "https://api.x.ai/v1" },
];

pub fn find_provider_def(id: &str) -> Option<&'static ProviderDef> {
    BUILT_IN_PROVIDERS.iter().find(|p| p.id == id)
}

/// Git base branch for integration paths. `DEFAULT_BRANCH` wins over the
/// built-in fallback; task metadata (if any) is resolved by the caller.
pub fn default_branch() -> String {
    std::env::var("DEFAULT_BRANCH").unwrap_or_else(|_| "main".to_string())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub entries: std::collections::HashMap<String, ProviderEntry>,
}

impl ProviderConfig {
    pub fn entry(&self, id: &str) -> Option<&ProviderEntry> {
        self.entries.get(id)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderEntry {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cadre")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy_constants() {
        let config = Config::default();
        assert_eq!(config.qa.max_iterations, 50);
        assert_eq!(config.qa.recurring_threshold, 3);
        assert!((config.qa.similarity_threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.build.max_phase_retries, 2);
        assert_eq!(config.build.max_subtask_retries, 3);
        assert_eq!(config.fanout.max_concurrency, 3);
    }

    #[test]
    fn round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.qa.max_iterations = 10;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.qa.max_iterations, 10);
        assert_eq!(loaded.build.max_phase_retries, 2);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Config::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(loaded.agent.max_steps, 100);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let retry = RetrySettings::default();
        assert_eq!(retry.backoff_ms(1), 1000);
        assert_eq!(retry.backoff_ms(2), 2000);
        assert_eq!(retry.backoff_ms(3), 4000);
        assert_eq!(retry.backoff_ms(30), 30000);
    }

    #[test]
    fn provider_defs_cover_spec_env_vars() {
        for id in ["anthropic", "openai", "google", "azure", "mistral", "groq", "xai"] {
            assert!(find_provider_def(id).is_some(), "missing provider def: {id}");
        }
        assert_eq!(
            find_provider_def("google").unwrap().env_var,
            "GOOGLE_GENERATIVE_AI_API_KEY"
        );
    }
}
