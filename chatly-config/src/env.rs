// Environment variable loading

use crate::{ConfigError, Result};
use std::collections::HashMap;
use std::env;

/// Collects prefixed environment variables.
///
/// `CHATLY_BIND_ADDR` is returned as `bind_addr` when the prefix is `CHATLY`.
pub struct EnvLoader {
    prefix: String,
}

impl EnvLoader {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load every variable carrying the prefix from the process environment.
    pub fn load(&self) -> HashMap<String, String> {
        self.load_from(env::vars())
    }

    /// Load from an explicit set of variables.
    pub fn load_from<I>(&self, vars: I) -> HashMap<String, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let marker = format!("{}_", self.prefix);
        vars.into_iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(&marker)
                    .map(|rest| (rest.to_lowercase(), value))
            })
            .collect()
    }

    /// Load a specific environment variable
    pub fn load_var(&self, key: &str) -> Result<String> {
        let full_key = format!("{}_{}", self.prefix, key.to_uppercase());
        env::var(&full_key).map_err(ConfigError::EnvError)
    }

    /// Load with default value
    pub fn load_var_or(&self, key: &str, default: &str) -> String {
        self.load_var(key).unwrap_or_else(|_| default.to_string())
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new(crate::ENV_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // std::env::set_var is unsafe, so these tests feed variables explicitly.

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_prefix_is_stripped_and_lowercased() {
        let loader = EnvLoader::new("CHATLY");
        let loaded = loader.load_from(vars(&[
            ("CHATLY_BIND_ADDR", "127.0.0.1:5000"),
            ("CHATLY_HISTORY_LIMIT", "20"),
            ("PATH", "/usr/bin"),
            ("CHATLYX_OTHER", "ignored"),
        ]));

        assert_eq!(loaded.len(), 2);
        assert_eq!(
            loaded.get("bind_addr").map(String::as_str),
            Some("127.0.0.1:5000")
        );
        assert_eq!(loaded.get("history_limit").map(String::as_str), Some("20"));
    }

    #[test]
    fn test_env_loader_with_default() {
        let loader = EnvLoader::default();
        let value = loader.load_var_or("NONEXISTENT_VAR_12345", "default");

        assert_eq!(value, "default");
    }

    #[test]
    fn test_env_loader_missing_var() {
        let loader = EnvLoader::new("CHATLY_TEST");
        assert!(loader.load_var("MISSING_VAR_67890").is_err());
    }
}
