//! Hierarchical configuration, loaded from a YAML file with
//! environment-variable overrides layered on top.
//!
//! Every section mirrors the core's configuration surface one-to-one:
//! `queue`, `orchestrator`, `agents.<agent-type>`, and `llm`. Defaults are
//! supplied via `serde(default)` so a near-empty file (or none at all)
//! still produces a usable configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BmError, BmResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub path: PathBuf,
    pub stale_lease_seconds: u64,
    pub cleanup_age_hours: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            path: default_queue_path(),
            // No explicit value is given in the source design; ten times
            // the default polling interval is the suggested default.
            stale_lease_seconds: 10 * (default_polling_interval_ms() / 1000).max(1),
            cleanup_age_hours: 24 * 7,
        }
    }
}

fn default_queue_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("bmlibrarian")
        .join("queue.db")
}

fn default_polling_interval_ms() -> u64 {
    250
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_workers: usize,
    pub polling_interval_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            polling_interval_ms: default_polling_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryAgentConfig {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
}

impl Default for QueryAgentConfig {
    fn default() -> Self {
        Self {
            model: "medgemma".to_string(),
            temperature: 0.2,
            top_p: 0.9,
            max_tokens: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringAgentConfig {
    pub model: String,
    pub temperature: f32,
    pub default_threshold: f32,
}

impl Default for ScoringAgentConfig {
    fn default() -> Self {
        Self {
            model: "medgemma".to_string(),
            temperature: 0.0,
            default_threshold: 2.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CitationAgentConfig {
    pub model: String,
    pub min_relevance: f32,
}

impl Default for CitationAgentConfig {
    fn default() -> Self {
        Self {
            model: "medgemma".to_string(),
            min_relevance: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportingAgentConfig {
    pub model: String,
    pub min_citations: usize,
}

impl Default for ReportingAgentConfig {
    fn default() -> Self {
        Self {
            model: "medgemma".to_string(),
            min_citations: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterfactualAgentConfig {
    pub model: String,
}

impl Default for CounterfactualAgentConfig {
    fn default() -> Self {
        Self {
            model: "medgemma".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerdictAgentConfig {
    pub model: String,
    pub min_rationale_length: usize,
}

impl Default for VerdictAgentConfig {
    fn default() -> Self {
        Self {
            model: "medgemma".to_string(),
            min_rationale_length: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AgentsConfig {
    pub query_agent: QueryAgentConfig,
    pub scoring_agent: ScoringAgentConfig,
    pub citation_agent: CitationAgentConfig,
    pub reporting_agent: ReportingAgentConfig,
    pub counterfactual_agent: CounterfactualAgentConfig,
    pub verdict_agent: VerdictAgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub default_provider: String,
    pub default_model: String,
    pub fallback_model: Option<String>,
    pub per_call_timeout_seconds: u64,
    /// Cost per 1,000 tokens, keyed by model name; looked up by
    /// longest-prefix match so versioned model names resolve to a base
    /// model's price.
    pub cost_table: HashMap<String, f64>,
    /// Base URL for the local model server provider.
    pub local_base_url: String,
    pub openai_api_key_env: String,
    pub anthropic_api_key_env: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_provider: "local".to_string(),
            default_model: "medgemma".to_string(),
            fallback_model: None,
            per_call_timeout_seconds: 120,
            cost_table: HashMap::new(),
            local_base_url: "http://localhost:11434".to_string(),
            openai_api_key_env: "OPENAI_API_KEY".to_string(),
            anthropic_api_key_env: "ANTHROPIC_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub queue: QueueConfig,
    pub orchestrator: OrchestratorConfig,
    pub agents: AgentsConfig,
    pub llm: LlmConfig,
}

impl Config {
    /// Load configuration from a YAML file, then apply environment
    /// overrides. A missing file is not an error: defaults are used.
    pub fn load(path: Option<&Path>) -> BmResult<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let text = std::fs::read_to_string(p).map_err(bmlibrarian_store::StoreError::Io)?;
                serde_yaml::from_str(&text)
                    .map_err(|e| BmError::validation(format!("invalid config at {}: {e}", p.display())))?
            }
            _ => Config::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Overrides recognised via `BML_<SECTION>_<FIELD>` environment
    /// variables, e.g. `BML_ORCHESTRATOR_MAX_WORKERS=8`.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("BML_QUEUE_PATH") {
            self.queue.path = PathBuf::from(v);
        }
        if let Some(v) = env_u64("BML_QUEUE_STALE_LEASE_SECONDS") {
            self.queue.stale_lease_seconds = v;
        }
        if let Some(v) = env_u64("BML_QUEUE_CLEANUP_AGE_HOURS") {
            self.queue.cleanup_age_hours = v;
        }
        if let Some(v) = env_usize("BML_ORCHESTRATOR_MAX_WORKERS") {
            self.orchestrator.max_workers = v;
        }
        if let Some(v) = env_u64("BML_ORCHESTRATOR_POLLING_INTERVAL_MS") {
            self.orchestrator.polling_interval_ms = v;
        }
        if let Ok(v) = std::env::var("BML_LLM_DEFAULT_PROVIDER") {
            self.llm.default_provider = v;
        }
        if let Ok(v) = std::env::var("BML_LLM_DEFAULT_MODEL") {
            self.llm.default_model = v;
        }
        if let Ok(v) = std::env::var("BML_LLM_FALLBACK_MODEL") {
            self.llm.fallback_model = Some(v);
        }
        if let Some(v) = env_u64("BML_LLM_PER_CALL_TIMEOUT_SECONDS") {
            self.llm.per_call_timeout_seconds = v;
        }
        if let Ok(v) = std::env::var("BML_LLM_LOCAL_BASE_URL") {
            self.llm.local_base_url = v;
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let config = Config::default();
        assert_eq!(config.orchestrator.max_workers, 4);
        assert_eq!(config.queue.stale_lease_seconds, 2500);
        assert_eq!(config.agents.reporting_agent.min_citations, 1);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/bmlibrarian.yaml"))).unwrap();
        assert_eq!(config.llm.default_provider, "local");
    }

    #[test]
    #[serial_test::serial]
    fn env_override_wins_over_default() {
        std::env::set_var("BML_ORCHESTRATOR_MAX_WORKERS", "9");
        let config = Config::load(None).unwrap();
        assert_eq!(config.orchestrator.max_workers, 9);
        std::env::remove_var("BML_ORCHESTRATOR_MAX_WORKERS");
    }

    #[test]
    fn parses_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "orchestrator:\n  max_workers: 2\nllm:\n  default_model: gpt-4o-mini\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.orchestrator.max_workers, 2);
        assert_eq!(config.llm.default_model, "gpt-4o-mini");
    }
}
