//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`HotReloadSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `HOTRELOAD_*` environment overrides
//! 4. [`HotReloadSettings::validate`]
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};
use std::str::FromStr;

use hotreload_core::logging::LogFormat;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::HotReloadSettings;

/// Env var naming an explicit settings file.
pub const SETTINGS_PATH_ENV: &str = "HOTRELOAD_SETTINGS";

/// Resolve the settings file: `$HOTRELOAD_SETTINGS`, else `~/.axiom/hotreload.json`.
pub fn settings_path() -> PathBuf {
    if let Some(explicit) = std::env::var(SETTINGS_PATH_ENV).ok().filter(|v| !v.is_empty()) {
        return PathBuf::from(explicit);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".axiom").join("hotreload.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<HotReloadSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with process env var overrides.
///
/// A missing file yields defaults. Invalid JSON or a combination rejected by
/// [`HotReloadSettings::validate`] is an error.
pub fn load_settings_from_path(path: &Path) -> Result<HotReloadSettings> {
    load_with_env(path, |key| std::env::var(key).ok())
}

/// Same as [`load_settings_from_path`] but reads overrides through `lookup`.
pub fn load_with_env<F>(path: &Path, lookup: F) -> Result<HotReloadSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = serde_json::to_value(HotReloadSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: HotReloadSettings = serde_json::from_value(merged)?;
    apply_env_overrides_from(&mut settings, lookup);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut HotReloadSettings) {
    apply_env_overrides_from(settings, |key| std::env::var(key).ok());
}

/// Apply overrides read through `lookup`.
///
/// Empty values are ignored. Values that fail to parse or fall outside their
/// range are logged and ignored, leaving the file/default value in place.
pub fn apply_env_overrides_from<F>(settings: &mut HotReloadSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };
    let server = &mut settings.server;

    if let Some(v) = env.string("HOTRELOAD_SERVICE_NAME") {
        server.service_name = v;
    }
    if let Some(v) = env.string("HOTRELOAD_HOST") {
        server.host = v;
    }
    if let Some(v) = env.ranged::<u16>("HOTRELOAD_PORT", 0, u16::MAX) {
        server.port = v;
    }
    if let Some(v) = env.ranged::<usize>("HOTRELOAD_MAX_CLIENTS", 1, 10_000) {
        server.max_clients = v;
    }
    if let Some(v) = env.ranged::<u64>("HOTRELOAD_HEARTBEAT_INTERVAL_MS", 10, 600_000) {
        server.heartbeat_interval_ms = v;
    }
    if let Some(v) = env.ranged::<u64>("HOTRELOAD_HEARTBEAT_TIMEOUT_MS", 10, 3_600_000) {
        server.heartbeat_timeout_ms = v;
    }
    if let Some(v) = env.ranged::<usize>("HOTRELOAD_MAX_MESSAGE_SIZE", 1024, 1 << 30) {
        server.max_message_size = v;
    }
    if let Some(v) = env.ranged::<u64>("HOTRELOAD_THROTTLE_DELAY_MS", 0, 10_000) {
        server.throttle_delay_ms = v;
    }
    if let Some(v) = env.ranged::<u32>("HOTRELOAD_RETRY_ATTEMPTS", 0, 20) {
        server.retry_attempts = v;
    }
    if let Some(v) = env.ranged::<u64>("HOTRELOAD_RETRY_DELAY_MS", 0, 60_000) {
        server.retry_delay_ms = v;
    }

    if let Some(v) = env.string("HOTRELOAD_WATCH_PATHS") {
        settings.watcher.paths = parse_list(&v);
    }
    if let Some(v) = env.ranged::<u64>("HOTRELOAD_DEBOUNCE_MS", 0, 60_000) {
        settings.watcher.debounce_ms = v;
    }

    if let Some(v) = env.string("HOTRELOAD_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.string("HOTRELOAD_LOG_FORMAT") {
        match LogFormat::parse(&v) {
            Some(format) => settings.logging.format = format,
            None => warn!(key = "HOTRELOAD_LOG_FORMAT", value = %v, "invalid log format, ignoring"),
        }
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a number and accept it only within `[min, max]`.
pub fn parse_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Split a comma-separated list, dropping blanks.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn ranged<T>(&self, name: &str, min: T, max: T) -> Option<T>
    where
        T: FromStr + PartialOrd,
    {
        let val = self.string(name)?;
        let result = parse_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid numeric env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::SettingsError;
    use assert_matches::assert_matches;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8080, "host": "localhost"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "localhost");
    }

    #[test]
    fn merge_array_replaces() {
        let target = serde_json::json!({"extensions": ["swift", "kt"]});
        let source = serde_json::json!({"extensions": ["dart"]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["extensions"], serde_json::json!(["dart"]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_adds_new_keys_and_replaces_shapes() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42, "b": "new"});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 42);
        assert_eq!(merged["b"], "new");
    }

    // ── load ────────────────────────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_with_env(Path::new("/nonexistent/hotreload.json"), no_env).unwrap();
        assert_eq!(settings, HotReloadSettings::default());
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hotreload.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 9090, "maxClients": 5}, "watcher": {"extensions": ["dart"]}}"#,
        )
        .unwrap();

        let settings = load_with_env(&path, no_env).unwrap();
        assert_eq!(settings.server.port, 9090);
        assert_eq!(settings.server.max_clients, 5);
        assert_eq!(settings.server.heartbeat_interval_ms, 30_000);
        assert_eq!(settings.watcher.extensions, vec!["dart".to_string()]);
        assert_eq!(settings.watcher.debounce_ms, 500);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hotreload.json");
        std::fs::write(&path, "not valid json").unwrap();

        assert_matches!(load_with_env(&path, no_env), Err(SettingsError::Json(_)));
    }

    #[test]
    fn load_rejects_invalid_combination() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hotreload.json");
        std::fs::write(
            &path,
            r#"{"server": {"heartbeatIntervalMs": 5000, "heartbeatTimeoutMs": 1000}}"#,
        )
        .unwrap();

        assert_matches!(load_with_env(&path, no_env), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn env_overrides_beat_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hotreload.json");
        std::fs::write(&path, r#"{"server": {"port": 9090}}"#).unwrap();

        let env = env_of(&[
            ("HOTRELOAD_PORT", "7000"),
            ("HOTRELOAD_WATCH_PATHS", "./ios, ./android,,"),
            ("HOTRELOAD_LOG_FORMAT", "json"),
        ]);
        let settings = load_with_env(&path, env).unwrap();
        assert_eq!(settings.server.port, 7000);
        assert_eq!(settings.watcher.paths, vec!["./ios".to_string(), "./android".to_string()]);
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut settings = HotReloadSettings::default();
        let env = env_of(&[
            ("HOTRELOAD_PORT", "not-a-port"),
            ("HOTRELOAD_MAX_CLIENTS", "0"),
            ("HOTRELOAD_LOG_FORMAT", "yaml"),
            ("HOTRELOAD_HOST", ""),
        ]);
        apply_env_overrides_from(&mut settings, env);
        assert_eq!(settings, HotReloadSettings::default());
    }

    #[test]
    fn env_overrides_every_numeric_key() {
        let mut settings = HotReloadSettings::default();
        let env = env_of(&[
            ("HOTRELOAD_MAX_CLIENTS", "3"),
            ("HOTRELOAD_HEARTBEAT_INTERVAL_MS", "100"),
            ("HOTRELOAD_HEARTBEAT_TIMEOUT_MS", "250"),
            ("HOTRELOAD_MAX_MESSAGE_SIZE", "4096"),
            ("HOTRELOAD_THROTTLE_DELAY_MS", "0"),
            ("HOTRELOAD_RETRY_ATTEMPTS", "1"),
            ("HOTRELOAD_RETRY_DELAY_MS", "20"),
            ("HOTRELOAD_DEBOUNCE_MS", "50"),
        ]);
        apply_env_overrides_from(&mut settings, env);
        let s = &settings.server;
        assert_eq!(s.max_clients, 3);
        assert_eq!(s.heartbeat_interval_ms, 100);
        assert_eq!(s.heartbeat_timeout_ms, 250);
        assert_eq!(s.max_message_size, 4096);
        assert_eq!(s.throttle_delay_ms, 0);
        assert_eq!(s.retry_attempts, 1);
        assert_eq!(s.retry_delay_ms, 20);
        assert_eq!(settings.watcher.debounce_ms, 50);
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for val in ["true", "1", "yes", "ON"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in ["false", "0", "No", "off"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_range_bounds() {
        assert_eq!(parse_range::<u16>("9090", 1, 65535), Some(9090));
        assert_eq!(parse_range::<u16>("0", 1, 65535), None);
        assert_eq!(parse_range::<u16>("99999", 1, 65535), None);
        assert_eq!(parse_range::<u64>("500", 1000, 600_000), None);
        assert_eq!(parse_range::<usize>("abc", 1, 10), None);
    }

    #[test]
    fn parse_list_trims_and_drops_blanks() {
        assert_eq!(parse_list(" a ,b,, "), vec!["a".to_string(), "b".to_string()]);
        assert!(parse_list("").is_empty());
    }
}
