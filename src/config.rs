use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};

pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";
pub const DEFAULT_LLM_BASE_URL: &str = "https://api.groq.com/openai/v1";

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub port: u16,
    pub llm: LlmConfig,
    pub directory_timeout: Duration,
    pub scoring_timeout: Duration,
    pub persist_timeout: Duration,
    pub seed_file: Option<PathBuf>,
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        // We use ~/.chatlens/chatlens.db unless told otherwise
        let db_path = match get("CHATLENS_DB_PATH") {
            Some(path) => PathBuf::from(path),
            None => {
                let home_dir = get("HOME").unwrap_or_else(|| ".".into());
                PathBuf::from(home_dir).join(".chatlens").join("chatlens.db")
            }
        };

        let port = match get("CHATLENS_PORT") {
            Some(port) => port
                .parse()
                .with_context(|| format!("Invalid CHATLENS_PORT: {}", port))?,
            None => 3000,
        };

        let secs = |key: &str, default: u64| -> Result<Duration> {
            match get(key) {
                Some(v) => v
                    .parse()
                    .map(Duration::from_secs)
                    .with_context(|| format!("Invalid {}: {}", key, v)),
                None => Ok(Duration::from_secs(default)),
            }
        };

        Ok(Self {
            db_path,
            port,
            llm: LlmConfig {
                base_url: get("GROQ_BASE_URL").unwrap_or_else(|| DEFAULT_LLM_BASE_URL.into()),
                api_key: get("GROQ_API_KEY").or_else(|| get("NEXT_GROQ_API_KEY")),
                model: get("GROQ_MODEL").unwrap_or_else(|| DEFAULT_MODEL.into()),
            },
            directory_timeout: secs("CHATLENS_DIRECTORY_TIMEOUT_SECS", 5)?,
            scoring_timeout: secs("CHATLENS_SCORING_TIMEOUT_SECS", 60)?,
            persist_timeout: secs("CHATLENS_PERSIST_TIMEOUT_SECS", 10)?,
            seed_file: get("CHATLENS_SEED_FILE").map(PathBuf::from),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[("HOME", "/home/ada")]).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/home/ada/.chatlens/chatlens.db"));
        assert_eq!(config.port, 3000);
        assert_eq!(config.llm.model, DEFAULT_MODEL);
        assert_eq!(config.llm.api_key, None);
        assert_eq!(config.directory_timeout, Duration::from_secs(5));
        assert_eq!(config.scoring_timeout, Duration::from_secs(60));
        assert_eq!(config.persist_timeout, Duration::from_secs(10));
        assert_eq!(config.seed_file, None);
    }

    #[test]
    fn legacy_api_key_name_is_accepted() {
        let config = load(&[("NEXT_GROQ_API_KEY", "legacy")]).unwrap();
        assert_eq!(config.llm.api_key.as_deref(), Some("legacy"));

        let config = load(&[
            ("NEXT_GROQ_API_KEY", "legacy"),
            ("GROQ_API_KEY", "current"),
        ])
        .unwrap();
        assert_eq!(config.llm.api_key.as_deref(), Some("current"));
    }

    #[test]
    fn invalid_numbers_are_errors() {
        assert!(load(&[("CHATLENS_PORT", "eighty")]).is_err());
        assert!(load(&[("CHATLENS_SCORING_TIMEOUT_SECS", "-1")]).is_err());
    }
}
