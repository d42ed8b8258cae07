//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`CourierSettings::default()`]
//! 2. If `~/.courier/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `COURIER_*` environment variable overrides (highest priority)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{CourierSettings, DropPolicy, courier_home};

/// Path to the settings file (`~/.courier/settings.json`).
pub fn settings_path() -> PathBuf {
    courier_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<CourierSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<CourierSettings> {
    let defaults = serde_json::to_value(CourierSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: CourierSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, |name| std::env::var(name).ok());
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key (source wins), arrays and primitives are replaced,
/// and nulls in `source` are skipped.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `COURIER_*` overrides read through `lookup`.
///
/// Invalid values are logged and ignored.
pub fn apply_overrides<F>(settings: &mut CourierSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(v) = read("COURIER_SUBAGENTS_DIR") {
        settings.subagents.dir = v;
    }
    if let Some(v) = read("COURIER_ARCHIVE_AFTER_MINUTES") {
        match parse_u64_range(&v, 0, 525_600) {
            Some(n) => settings.subagents.archive_after_minutes = n,
            None => warn!(key = "COURIER_ARCHIVE_AFTER_MINUTES", value = %v, "invalid env var, ignoring"),
        }
    }
    if let Some(v) = read("COURIER_SWEEP_INTERVAL_MS") {
        match parse_u64_range(&v, 100, 86_400_000) {
            Some(n) => settings.subagents.sweep_interval_ms = n,
            None => warn!(key = "COURIER_SWEEP_INTERVAL_MS", value = %v, "invalid env var, ignoring"),
        }
    }
    if let Some(v) = read("COURIER_ANNOUNCE_DEBOUNCE_MS") {
        match parse_u64_range(&v, 0, 600_000) {
            Some(n) => settings.announce.debounce_ms = n,
            None => warn!(key = "COURIER_ANNOUNCE_DEBOUNCE_MS", value = %v, "invalid env var, ignoring"),
        }
    }
    if let Some(v) = read("COURIER_ANNOUNCE_CAP") {
        match parse_usize_range(&v, 1, 10_000) {
            Some(n) => settings.announce.cap = n,
            None => warn!(key = "COURIER_ANNOUNCE_CAP", value = %v, "invalid env var, ignoring"),
        }
    }
    if let Some(v) = read("COURIER_ANNOUNCE_DROP_POLICY") {
        match DropPolicy::parse(&v) {
            Some(p) => settings.announce.drop_policy = p,
            None => warn!(key = "COURIER_ANNOUNCE_DROP_POLICY", value = %v, "invalid env var, ignoring"),
        }
    }
    if let Some(v) = read("COURIER_LOG_LEVEL") {
        settings.logging.level = v.trim().to_lowercase();
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use crate::types::AnnounceMode;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn merge_nested_objects() {
        let target = serde_json::json!({"a": {"x": 1, "y": 2}});
        let source = serde_json::json!({"a": {"y": 3}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"]["x"], 1);
        assert_eq!(merged["a"]["y"], 3);
    }

    #[test]
    fn merge_skips_null() {
        let target = serde_json::json!({"a": 1});
        let source = serde_json::json!({"a": null});
        assert_eq!(deep_merge(target, source)["a"], 1);
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_settings_from_path(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.announce, CourierSettings::default().announce);
    }

    #[test]
    fn load_partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"announce": {"mode": "collect", "debounceMs": 250}, "subagents": {"dir": "/srv/runs"}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.announce.mode, AnnounceMode::Collect);
        assert_eq!(settings.announce.debounce_ms, 250);
        assert_eq!(settings.announce.cap, 20);
        assert_eq!(settings.subagents.dir, "/srv/runs");
    }

    #[test]
    fn load_invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(load_settings_from_path(&path), Err(SettingsError::Json(_))));
    }

    #[test]
    fn overrides_apply_valid_values() {
        let mut s = CourierSettings::default();
        apply_overrides(
            &mut s,
            lookup_from(&[
                ("COURIER_SUBAGENTS_DIR", "/data/subagents"),
                ("COURIER_ANNOUNCE_CAP", "5"),
                ("COURIER_ANNOUNCE_DROP_POLICY", "new"),
                ("COURIER_ANNOUNCE_DEBOUNCE_MS", "0"),
                ("COURIER_LOG_LEVEL", "DEBUG"),
            ]),
        );
        assert_eq!(s.subagents.dir, "/data/subagents");
        assert_eq!(s.announce.cap, 5);
        assert_eq!(s.announce.drop_policy, DropPolicy::New);
        assert_eq!(s.announce.debounce_ms, 0);
        assert_eq!(s.logging.level, "debug");
    }

    #[test]
    fn overrides_ignore_invalid_values() {
        let mut s = CourierSettings::default();
        apply_overrides(
            &mut s,
            lookup_from(&[
                ("COURIER_ANNOUNCE_CAP", "0"),
                ("COURIER_SWEEP_INTERVAL_MS", "fast"),
                ("COURIER_ANNOUNCE_DROP_POLICY", "whatever"),
                ("COURIER_SUBAGENTS_DIR", "   "),
            ]),
        );
        assert_eq!(s, CourierSettings::default());
    }

    #[test]
    fn range_parsing() {
        assert_eq!(parse_u64_range("10", 1, 100), Some(10));
        assert_eq!(parse_u64_range("0", 1, 100), None);
        assert_eq!(parse_usize_range(" 7 ", 1, 10), Some(7));
        assert_eq!(parse_usize_range("-1", 0, 10), None);
    }
}
