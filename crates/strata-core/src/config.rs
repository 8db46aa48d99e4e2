use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};

/// Upper bound accepted for `graph.max_repair_attempts`.
pub const MAX_REPAIR_ATTEMPTS_LIMIT: u32 = 10;

/// Top-level strata configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

fn default_provider() -> String { "ollama".to_string() }
fn default_max_tokens() -> u32 { 1024 }
fn default_temperature() -> f32 { 0.0 }

/// Retry configuration for LLM requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Graph execution limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Repair budget per run. The only loop-termination guarantee.
    #[serde(default = "default_max_repair_attempts")]
    pub max_repair_attempts: u32,
    /// Wall-clock limit for one run, in seconds.
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,
    /// Maximum runs in flight during batch mode.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_repair_attempts: default_max_repair_attempts(),
            run_timeout_secs: default_run_timeout(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_max_repair_attempts() -> u32 { 2 }
fn default_run_timeout() -> u64 { 120 }
fn default_concurrency() -> usize { 4 }

/// Which router implementation classifies questions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouterKind {
    #[default]
    Keyword,
    Llm,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub kind: RouterKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_docs_dir")]
    pub docs_dir: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            docs_dir: default_docs_dir(),
            top_k: default_top_k(),
        }
    }
}

fn default_docs_dir() -> String { "docs".to_string() }
fn default_top_k() -> usize { 3 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Create lowercase compatibility views over the Northwind tables.
    #[serde(default = "default_compat_views")]
    pub compat_views: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            compat_views: default_compat_views(),
        }
    }
}

fn default_db_path() -> String { "data/northwind.sqlite".to_string() }
fn default_compat_views() -> bool { true }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| StrataError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| StrataError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the graph cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.graph.max_repair_attempts > MAX_REPAIR_ATTEMPTS_LIMIT {
            return Err(StrataError::Config(format!(
                "graph.max_repair_attempts must be at most {}, got {}",
                MAX_REPAIR_ATTEMPTS_LIMIT, self.graph.max_repair_attempts
            )));
        }
        if self.graph.concurrency == 0 {
            return Err(StrataError::Config(
                "graph.concurrency must be at least 1".into(),
            ));
        }
        if self.graph.run_timeout_secs == 0 {
            return Err(StrataError::Config(
                "graph.run_timeout_secs must be at least 1".into(),
            ));
        }
        if self.retrieval.top_k == 0 {
            return Err(StrataError::Config(
                "retrieval.top_k must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Resolve a configured path relative to the config file's directory.
    pub fn resolve_path(&self, base: &Path, configured: &str) -> PathBuf {
        let expanded = match configured.strip_prefix("~/") {
            Some(rest) => match dirs_home() {
                Some(home) => home.join(rest),
                None => PathBuf::from(configured),
            },
            None => PathBuf::from(configured),
        };
        if expanded.is_absolute() {
            expanded
        } else {
            base.join(expanded)
        }
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_STRATA_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_STRATA_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_STRATA_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_STRATA_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_STRATA_VAR}\"");
    }

    #[test]
    fn test_defaults_from_minimal_toml() {
        let toml_str = r#"
[model]
model_id = "phi3.5:3.8b-mini-instruct-q4_K_M"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.model.provider, "ollama");
        assert_eq!(config.graph.max_repair_attempts, 2);
        assert_eq!(config.graph.run_timeout_secs, 120);
        assert_eq!(config.graph.concurrency, 4);
        assert_eq!(config.router.kind, RouterKind::Keyword);
        assert_eq!(config.retrieval.top_k, 3);
        assert!(config.database.compat_views);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let toml_str = r#"
[model]
model_id = "m"

[graph]
concurrency = 0
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert!(matches!(config.validate(), Err(StrataError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_oversized_budget() {
        let toml_str = r#"
[model]
model_id = "m"

[graph]
max_repair_attempts = 50
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_path_relative_to_base() {
        let config: AppConfig = toml::from_str("[model]\nmodel_id = \"m\"").unwrap();
        let base = Path::new("/srv/strata");
        assert_eq!(
            config.resolve_path(base, "data/northwind.sqlite"),
            PathBuf::from("/srv/strata/data/northwind.sqlite")
        );
        assert_eq!(
            config.resolve_path(base, "/abs/docs"),
            PathBuf::from("/abs/docs")
        );
    }
}
