//! Runtime configuration (spec.md §6's environment variable table).
//!
//! Grounded in `original_source/apps/api/olympus_api/settings.py`'s
//! env-override-with-typed-defaults loading, translated into the
//! teacher's `csa-config` idiom: a typed `Config::from_env()` constructor
//! returning an owned struct, not a process-wide cached singleton — per
//! spec.md §9's "Global mutable state" redesign note, every caller gets
//! its own `Config` rather than reaching for a `OnceLock`.

use std::path::PathBuf;

use thiserror::Error;

pub const APP_NAME: &str = "agentrt";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}' ({reason})")]
    InvalidValue { var: &'static str, value: String, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum LlmBackend {
    Ollama,
    LlamaCpp,
    Stub,
}

impl LlmBackend {
    fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw {
            "ollama" => Ok(LlmBackend::Ollama),
            "llamacpp" => Ok(LlmBackend::LlamaCpp),
            "stub" => Ok(LlmBackend::Stub),
            other => Err(ConfigError::InvalidValue {
                var: "LLM_BACKEND",
                value: other.to_string(),
                reason: "expected one of: ollama, llamacpp, stub".to_string(),
            }),
        }
    }
}

/// Process-wide runtime configuration, loaded once from the environment
/// and then passed by value/reference to whatever needs it.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub sandbox_root: PathBuf,
    pub require_consent: bool,
    pub auto_consent: bool,
    pub exec_concurrency: usize,
    pub db_path: PathBuf,
    pub llm_backend: LlmBackend,
    pub model_allowlist: Vec<String>,
    pub daily_usd_budget: Option<f64>,
    pub daily_token_budget: Option<u64>,
    pub llm_cache_ttl_ms: u64,
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// sensible local-first defaults (an XDG-style `agentrt` data
    /// directory for the sandbox root and the store file) when unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_source(|key| std::env::var(key).ok())
    }

    /// Testable variant that takes an arbitrary lookup function instead of
    /// reading the real process environment.
    pub fn from_env_source(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let default_data_dir = directories::ProjectDirs::from("", "", APP_NAME)
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("./data"));

        let sandbox_root = lookup("SANDBOX_ROOT").map(PathBuf::from).unwrap_or_else(|| default_data_dir.join("workspace"));
        let db_path = lookup("DB_PATH").map(PathBuf::from).unwrap_or_else(|| default_data_dir.join("agentrt.db"));

        let require_consent = parse_bool(&lookup, "REQUIRE_CONSENT", true)?;
        let auto_consent = parse_bool(&lookup, "AUTO_CONSENT", false)?;

        let exec_concurrency = match lookup("EXEC_CONCURRENCY") {
            Some(raw) => raw.parse::<usize>().map_err(|_| ConfigError::InvalidValue {
                var: "EXEC_CONCURRENCY",
                value: raw.clone(),
                reason: "expected a positive integer".to_string(),
            })?,
            None => 2,
        };
        if exec_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                var: "EXEC_CONCURRENCY",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let llm_backend = match lookup("LLM_BACKEND") {
            Some(raw) => LlmBackend::parse(&raw)?,
            None => LlmBackend::Ollama,
        };

        let model_allowlist = lookup("MODEL_ALLOWLIST")
            .map(|raw| raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect())
            .unwrap_or_default();

        let daily_usd_budget = lookup("DAILY_USD_BUDGET")
            .map(|raw| {
                raw.parse::<f64>().map_err(|_| ConfigError::InvalidValue {
                    var: "DAILY_USD_BUDGET",
                    value: raw.clone(),
                    reason: "expected a floating-point number".to_string(),
                })
            })
            .transpose()?;

        let daily_token_budget = lookup("DAILY_TOKEN_BUDGET")
            .map(|raw| {
                raw.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                    var: "DAILY_TOKEN_BUDGET",
                    value: raw.clone(),
                    reason: "expected a non-negative integer".to_string(),
                })
            })
            .transpose()?;

        let llm_cache_ttl_ms = match lookup("LLM_CACHE_TTL_MS") {
            Some(raw) => raw.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                var: "LLM_CACHE_TTL_MS",
                value: raw.clone(),
                reason: "expected a non-negative integer".to_string(),
            })?,
            None => 30 * 60 * 1000,
        };

        Ok(Config {
            sandbox_root,
            require_consent,
            auto_consent,
            exec_concurrency,
            db_path,
            llm_backend,
            model_allowlist,
            daily_usd_budget,
            daily_token_budget,
            llm_cache_ttl_ms,
        })
    }
}

fn parse_bool(lookup: &impl Fn(&str) -> Option<String>, var: &'static str, default: bool) -> Result<bool, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                var,
                value: raw,
                reason: "expected a boolean (true/false/1/0)".to_string(),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_set() {
        let config = Config::from_env_source(env_from(&[])).unwrap();
        assert!(config.require_consent);
        assert!(!config.auto_consent);
        assert_eq!(config.exec_concurrency, 2);
        assert_eq!(config.llm_backend, LlmBackend::Ollama);
        assert!(config.model_allowlist.is_empty());
        assert_eq!(config.daily_usd_budget, None);
        assert_eq!(config.llm_cache_ttl_ms, 30 * 60 * 1000);
    }

    #[test]
    fn overrides_are_honored() {
        let config = Config::from_env_source(env_from(&[
            ("SANDBOX_ROOT", "/tmp/sbx"),
            ("DB_PATH", "/tmp/db.sqlite"),
            ("REQUIRE_CONSENT", "false"),
            ("AUTO_CONSENT", "true"),
            ("EXEC_CONCURRENCY", "8"),
            ("LLM_BACKEND", "stub"),
            ("MODEL_ALLOWLIST", "llama3, mistral"),
            ("DAILY_USD_BUDGET", "2.5"),
            ("DAILY_TOKEN_BUDGET", "100000"),
            ("LLM_CACHE_TTL_MS", "1000"),
        ]))
        .unwrap();

        assert_eq!(config.sandbox_root, PathBuf::from("/tmp/sbx"));
        assert_eq!(config.db_path, PathBuf::from("/tmp/db.sqlite"));
        assert!(!config.require_consent);
        assert!(config.auto_consent);
        assert_eq!(config.exec_concurrency, 8);
        assert_eq!(config.llm_backend, LlmBackend::Stub);
        assert_eq!(config.model_allowlist, vec!["llama3".to_string(), "mistral".to_string()]);
        assert_eq!(config.daily_usd_budget, Some(2.5));
        assert_eq!(config.daily_token_budget, Some(100_000));
        assert_eq!(config.llm_cache_ttl_ms, 1000);
    }

    #[test]
    fn rejects_zero_concurrency() {
        let err = Config::from_env_source(env_from(&[("EXEC_CONCURRENCY", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var: "EXEC_CONCURRENCY", .. }));
    }

    #[test]
    fn rejects_unknown_llm_backend() {
        let err = Config::from_env_source(env_from(&[("LLM_BACKEND", "bogus")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var: "LLM_BACKEND", .. }));
    }

    #[test]
    fn rejects_non_boolean_require_consent() {
        let err = Config::from_env_source(env_from(&[("REQUIRE_CONSENT", "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var: "REQUIRE_CONSENT", .. }));
    }
}
