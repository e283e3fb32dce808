//! Settings file loading.
//!
//! The file is a layer over [`WireSettings::default()`]: nested objects such
//! as a socket's `namespaces` map merge key by key, while directive lists and
//! the `sockets` list are taken from the file as written. A `null` in the file
//! leaves the default in place. `NSPWIRE_*` environment variables are applied
//! last.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::WireSettings;

/// `~/.nspwire/settings.json`.
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".nspwire").join("settings.json")
}

pub fn load_settings() -> Result<WireSettings> {
    load_settings_from_path(&settings_path())
}

/// Load `path` over the defaults. A missing file yields defaults; invalid
/// JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<WireSettings> {
    let mut merged = serde_json::to_value(WireSettings::default())?;
    if path.exists() {
        let layer: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        merge_layer(&mut merged, layer);
        debug!(?path, "settings file applied");
    } else {
        debug!(?path, "no settings file, using defaults");
    }

    let mut settings: WireSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Apply `layer` onto `base` in place. Only object-to-object pairs recurse;
/// anything else in `layer` replaces the base value, except `null`.
pub fn merge_layer(base: &mut Value, layer: Value) {
    match (base, layer) {
        (Value::Object(base), Value::Object(layer)) => {
            for (key, value) in layer.into_iter().filter(|(_, v)| !v.is_null()) {
                match base.get_mut(&key) {
                    Some(slot) => merge_layer(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}

/// `NSPWIRE_WARNINGS`, `NSPWIRE_EMIT_TIMEOUT_MS` and `NSPWIRE_ORIGIN`.
/// Unparseable values are logged and ignored.
pub fn apply_env_overrides(settings: &mut WireSettings) {
    if let Some(on) = env_value("NSPWIRE_WARNINGS", parse_switch) {
        settings.warnings = on;
    }
    if let Some(ms) = env_value("NSPWIRE_EMIT_TIMEOUT_MS", parse_timeout_ms) {
        settings.emit_timeout_ms = Some(ms);
    }
    if let Some(origin) = env_value("NSPWIRE_ORIGIN", |v| Some(v.to_owned())) {
        settings.origin = origin;
    }
}

/// On/off switch, e.g. `NSPWIRE_WARNINGS=off`.
pub fn parse_switch(val: &str) -> Option<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

/// Emit timeout in milliseconds: at least 1ms, at most one hour.
pub fn parse_timeout_ms(val: &str) -> Option<u64> {
    val.trim()
        .parse::<u64>()
        .ok()
        .filter(|ms| (1..=3_600_000).contains(ms))
}

fn env_value<T>(name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
    let raw = std::env::var(name).ok().filter(|v| !v.is_empty())?;
    let parsed = parse(&raw);
    if parsed.is_none() {
        warn!(key = name, value = %raw, "ignoring unparseable environment override");
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use serde_json::json;

    #[test]
    fn store_wiring_merges_per_group() {
        let mut base = json!({"vuex": {"actions": [], "mutations": ["SET_MESSAGE"]}});
        merge_layer(&mut base, json!({"vuex": {"actions": ["chatMessage --> FORMAT_MESSAGE"]}}));
        assert_eq!(base["vuex"]["actions"], json!(["chatMessage --> FORMAT_MESSAGE"]));
        assert_eq!(base["vuex"]["mutations"], json!(["SET_MESSAGE"]));
    }

    #[test]
    fn directive_lists_are_replaced_whole() {
        let mut base = json!({"emitters": ["getMessage --> message", "echo"]});
        merge_layer(&mut base, json!({"emitters": ["getMessage2 --> message2Rxd"]}));
        assert_eq!(base["emitters"], json!(["getMessage2 --> message2Rxd"]));
    }

    #[test]
    fn null_keeps_the_default() {
        let mut base = json!({"origin": "http://localhost:3000", "warnings": true});
        merge_layer(&mut base, json!({"origin": null, "warnings": false}));
        assert_eq!(base["origin"], "http://localhost:3000");
        assert_eq!(base["warnings"], json!(false));
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_settings_from_path(Path::new("/nonexistent/settings.json")).unwrap();
        assert!(settings.sockets.is_empty());
        assert!(settings.warnings);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"sockets": [{"name": "home", "url": "http://localhost:3000"}], "warnings": false}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.sockets.len(), 1);
        assert_eq!(settings.sockets[0].name, "home");
        assert!(!settings.warnings);
        assert_eq!(settings.origin, WireSettings::default().origin);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_settings_from_path(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    #[test]
    fn warnings_switch_values() {
        assert_eq!(parse_switch(" Off "), Some(false));
        assert_eq!(parse_switch("1"), Some(true));
        assert_eq!(parse_switch("quiet"), None);
    }

    #[test]
    fn emit_timeout_bounds() {
        assert_eq!(parse_timeout_ms("500"), Some(500));
        assert_eq!(parse_timeout_ms("0"), None);
        assert_eq!(parse_timeout_ms("3600001"), None);
        assert_eq!(parse_timeout_ms("soon"), None);
    }
}
