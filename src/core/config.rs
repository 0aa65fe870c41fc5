//! Runtime configuration from environment variables
//!
//! The binary loads a `.env` file from the working directory first, so these
//! can live there too.
//!
//! | Variable | Default |
//! |---|---|
//! | `HF_API_KEY` | unset (offline generator) |
//! | `ARENA_MODEL` | `meta-llama/Llama-3.3-70B-Instruct` |
//! | `ARENA_ENDPOINT` | Hugging Face router chat completions |
//! | `ARENA_MAX_TOKENS` | 500 |
//! | `ARENA_TIMEOUT_SECS` | 60 |
//! | `ARENA_PERSONAS` | unset (built-in personas) |
//! | `ARENA_ADDR` | `127.0.0.1:8000` |

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::GENERATION_TIMEOUT_SECS;

pub const DEFAULT_MODEL: &str = "meta-llama/Llama-3.3-70B-Instruct";
pub const DEFAULT_ENDPOINT: &str = "https://router.huggingface.co/v1/chat/completions";
pub const DEFAULT_MAX_TOKENS: u32 = 500;
pub const DEFAULT_ADDR: &str = "127.0.0.1:8000";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Arena settings
#[derive(Debug, Clone)]
pub struct ArenaConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
    pub max_tokens: u32,
    pub generation_timeout: Duration,
    pub personas_path: Option<PathBuf>,
    pub addr: String,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            generation_timeout: Duration::from_secs(GENERATION_TIMEOUT_SECS),
            personas_path: None,
            addr: DEFAULT_ADDR.to_string(),
        }
    }
}

impl ArenaConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load through an arbitrary lookup (tests pass a map)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            api_key: non_empty("HF_API_KEY"),
            model: non_empty("ARENA_MODEL").unwrap_or(defaults.model),
            endpoint: non_empty("ARENA_ENDPOINT").unwrap_or(defaults.endpoint),
            max_tokens: parse_var("ARENA_MAX_TOKENS", non_empty("ARENA_MAX_TOKENS"))?
                .unwrap_or(defaults.max_tokens),
            generation_timeout: parse_var::<u64>("ARENA_TIMEOUT_SECS", non_empty("ARENA_TIMEOUT_SECS"))?
                .map(Duration::from_secs)
                .unwrap_or(defaults.generation_timeout),
            personas_path: non_empty("ARENA_PERSONAS").map(PathBuf::from),
            addr: non_empty("ARENA_ADDR").unwrap_or(defaults.addr),
        })
    }
}

fn parse_var<T: std::str::FromStr>(var: &'static str, value: Option<String>) -> Result<Option<T>, ConfigError> {
    match value {
        None => Ok(None),
        Some(v) => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value: v }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ArenaConfig::from_lookup(lookup(&[])).unwrap();
        assert!(config.api_key.is_none());
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(config.generation_timeout, Duration::from_secs(GENERATION_TIMEOUT_SECS));
    }

    #[test]
    fn test_overrides() {
        let config = ArenaConfig::from_lookup(lookup(&[
            ("HF_API_KEY", "hf_123"),
            ("ARENA_MAX_TOKENS", "256"),
            ("ARENA_TIMEOUT_SECS", "5"),
            ("ARENA_PERSONAS", "personas.json"),
        ]))
        .unwrap();
        assert_eq!(config.api_key.as_deref(), Some("hf_123"));
        assert_eq!(config.max_tokens, 256);
        assert_eq!(config.generation_timeout, Duration::from_secs(5));
        assert_eq!(config.personas_path, Some(PathBuf::from("personas.json")));
    }

    #[test]
    fn test_blank_key_is_unset() {
        let config = ArenaConfig::from_lookup(lookup(&[("HF_API_KEY", "  ")])).unwrap();
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_dotenv_file_values() {
        let file = "# local secrets\nHF_API_KEY=hf_from_file\nARENA_MODEL=\"org/model\"\n";
        let map: HashMap<String, String> = dotenvy::from_read_iter(file.as_bytes())
            .collect::<Result<_, _>>()
            .unwrap();
        let config = ArenaConfig::from_lookup(|key| map.get(key).cloned()).unwrap();
        assert_eq!(config.api_key.as_deref(), Some("hf_from_file"));
        assert_eq!(config.model, "org/model");
    }

    #[test]
    fn test_invalid_number() {
        let err = ArenaConfig::from_lookup(lookup(&[("ARENA_MAX_TOKENS", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "ARENA_MAX_TOKENS", .. }));
    }
}
