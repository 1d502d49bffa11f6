use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder { Asc, Desc }

impl SortOrder {
    pub fn is_ascending(self) -> bool { matches!(self, SortOrder::Asc) }
}

/// Session configuration. Every field has a default so a partial document (or no
/// environment at all) yields a usable configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HuntConfig {
    /// Output name for unassigned statements and operand for commands that omit one.
    pub default_variable: String,
    pub default_sort_order: SortOrder,
    pub cache_ttl_secs: u64,
    pub cache_max_entries: usize,
    pub connector_timeout_ms: u64,
    pub max_parallel_connectors: usize,
    pub analytics_timeout_ms: u64,
    /// Relative windows (`LAST n UNIT`) are anchored to now rounded up to this many seconds.
    pub window_granularity_secs: u64,
    /// Attributes consulted when filtering entities by a time window.
    pub time_attributes: Vec<String>,
    pub store_root: PathBuf,
    pub halt_on_error: bool,
    pub show_execution_summary: bool,
}

impl Default for HuntConfig {
    fn default() -> Self {
        Self {
            default_variable: "_".to_string(),
            default_sort_order: SortOrder::Desc,
            cache_ttl_secs: 300,
            cache_max_entries: 1024,
            connector_timeout_ms: 30_000,
            max_parallel_connectors: 8,
            analytics_timeout_ms: 60_000,
            window_granularity_secs: 60,
            time_attributes: vec!["first_observed".into(), "last_observed".into(), "timestamp".into()],
            store_root: PathBuf::from("./huntflow-data"),
            halt_on_error: false,
            show_execution_summary: true,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    env::var(key).ok().map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

impl HuntConfig {
    /// Build a configuration from `HUNTFLOW_*` environment variables over the defaults.
    /// Unparseable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = env::var("HUNTFLOW_DEFAULT_VARIABLE") { if !v.trim().is_empty() { cfg.default_variable = v.trim().to_string(); } }
        if let Ok(v) = env::var("HUNTFLOW_DEFAULT_SORT_ORDER") {
            match v.trim().to_ascii_uppercase().as_str() {
                "ASC" => cfg.default_sort_order = SortOrder::Asc,
                "DESC" => cfg.default_sort_order = SortOrder::Desc,
                _ => {}
            }
        }
        if let Some(v) = env_parse("HUNTFLOW_CACHE_TTL_SECS") { cfg.cache_ttl_secs = v; }
        if let Some(v) = env_parse("HUNTFLOW_CACHE_MAX_ENTRIES") { cfg.cache_max_entries = v; }
        if let Some(v) = env_parse("HUNTFLOW_CONNECTOR_TIMEOUT_MS") { cfg.connector_timeout_ms = v; }
        if let Some(v) = env_parse::<usize>("HUNTFLOW_MAX_PARALLEL_CONNECTORS") { cfg.max_parallel_connectors = v.max(1); }
        if let Some(v) = env_parse("HUNTFLOW_ANALYTICS_TIMEOUT_MS") { cfg.analytics_timeout_ms = v; }
        if let Some(v) = env_parse::<u64>("HUNTFLOW_WINDOW_GRANULARITY_SECS") { cfg.window_granularity_secs = v.max(1); }
        if let Ok(v) = env::var("HUNTFLOW_TIME_ATTRIBUTES") {
            let attrs: Vec<String> = v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
            if !attrs.is_empty() { cfg.time_attributes = attrs; }
        }
        if let Ok(v) = env::var("HUNTFLOW_STORE_ROOT") { if !v.trim().is_empty() { cfg.store_root = PathBuf::from(v.trim()); } }
        if let Some(v) = env_bool("HUNTFLOW_HALT_ON_ERROR") { cfg.halt_on_error = v; }
        if let Some(v) = env_bool("HUNTFLOW_SHOW_EXECUTION_SUMMARY") { cfg.show_execution_summary = v; }
        cfg
    }

    pub fn cache_ttl(&self) -> Duration { Duration::from_secs(self.cache_ttl_secs) }
    pub fn connector_timeout(&self) -> Duration { Duration::from_millis(self.connector_timeout_ms) }
    pub fn analytics_timeout(&self) -> Duration { Duration::from_millis(self.analytics_timeout_ms) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let c = HuntConfig::default();
        assert_eq!(c.default_variable, "_");
        assert_eq!(c.default_sort_order, SortOrder::Desc);
        assert_eq!(c.cache_ttl(), Duration::from_secs(300));
        assert!(c.max_parallel_connectors >= 1);
        assert!(!c.halt_on_error);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let c: HuntConfig = serde_json::from_str(r#"{"cache_ttl_secs": 5, "default_sort_order": "asc"}"#).unwrap();
        assert_eq!(c.cache_ttl_secs, 5);
        assert_eq!(c.default_sort_order, SortOrder::Asc);
        assert_eq!(c.connector_timeout_ms, 30_000);
    }
}
