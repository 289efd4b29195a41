use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Runtime settings, read from `SCOUT_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub worker_limit: usize,
    pub tick_interval: Duration,
    pub agent_timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub deprecated_tokens: Vec<String>,
    pub allowed_frequencies: Vec<String>,
    pub max_page_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            worker_limit: 4,
            tick_interval: Duration::from_secs(3600),
            agent_timeout: Duration::from_secs(60),
            max_retries: 2,
            backoff_base: Duration::from_millis(500),
            deprecated_tokens: vec!["adzuna".to_string()],
            allowed_frequencies: vec![crate::models::WEEKLY.to_string()],
            max_page_size: 100,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a config from any variable source, falling back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let vars = Vars(lookup);

        let db_path = vars
            .get("SCOUT_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        Ok(Self {
            db_path,
            worker_limit: vars.parse("SCOUT_WORKERS", defaults.worker_limit)?.max(1),
            tick_interval: Duration::from_secs(
                vars.parse("SCOUT_TICK_SECS", defaults.tick_interval.as_secs())?,
            ),
            agent_timeout: Duration::from_secs(
                vars.parse("SCOUT_AGENT_TIMEOUT_SECS", defaults.agent_timeout.as_secs())?,
            ),
            max_retries: vars.parse("SCOUT_MAX_RETRIES", defaults.max_retries)?,
            backoff_base: Duration::from_millis(
                vars.parse("SCOUT_BACKOFF_MS", defaults.backoff_base.as_millis() as u64)?,
            ),
            deprecated_tokens: vars
                .list("SCOUT_DEPRECATED_TOKENS")
                .unwrap_or(defaults.deprecated_tokens),
            allowed_frequencies: vars
                .list("SCOUT_ALLOWED_FREQUENCIES")
                .unwrap_or(defaults.allowed_frequencies),
            max_page_size: vars.parse("SCOUT_MAX_PAGE_SIZE", defaults.max_page_size)?,
        })
    }
}

fn default_db_path() -> PathBuf {
    // XDG data directory, or the working directory as a fallback
    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "scout") {
        proj_dirs.data_dir().join("scout.db")
    } else {
        PathBuf::from("scout.db")
    }
}

struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name)
    }

    fn parse<T>(&self, name: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.get(name) {
            Some(raw) if !raw.trim().is_empty() => raw
                .trim()
                .parse::<T>()
                .with_context(|| format!("Invalid value for {}: '{}'", name, raw)),
            _ => Ok(default),
        }
    }

    fn list(&self, name: &str) -> Option<Vec<String>> {
        let raw = self.get(name)?;
        let items: Vec<String> = raw
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        if items.is_empty() { None } else { Some(items) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.worker_limit, 4);
        assert_eq!(config.deprecated_tokens, vec!["adzuna"]);
        assert_eq!(config.allowed_frequencies, vec!["weekly"]);
        assert_eq!(config.max_page_size, 100);
    }

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_variable_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("SCOUT_WORKERS", "9"),
            ("SCOUT_DEPRECATED_TOKENS", "Adzuna, legacy_feed ,"),
            ("SCOUT_DB_PATH", "/tmp/scout-test.db"),
        ]))
        .unwrap();
        assert_eq!(config.worker_limit, 9);
        assert_eq!(config.deprecated_tokens, vec!["adzuna", "legacy_feed"]);
        assert_eq!(config.db_path, PathBuf::from("/tmp/scout-test.db"));
        assert_eq!(config.max_page_size, 100);
    }

    #[test]
    fn test_blank_values_keep_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("SCOUT_WORKERS", "0"),
            ("SCOUT_TICK_SECS", "  "),
            ("SCOUT_ALLOWED_FREQUENCIES", " , "),
        ]))
        .unwrap();
        assert_eq!(config.worker_limit, 1);
        assert_eq!(config.tick_interval, Duration::from_secs(3600));
        assert_eq!(config.allowed_frequencies, vec!["weekly"]);
    }

    #[test]
    fn test_invalid_value_names_variable() {
        let err = Config::from_lookup(lookup(&[("SCOUT_MAX_PAGE_SIZE", "lots")])).unwrap_err();
        assert!(err.to_string().contains("SCOUT_MAX_PAGE_SIZE"));
    }
}
