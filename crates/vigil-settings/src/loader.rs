//! Reading settings: compiled defaults, then the JSON file, then `VIGIL_*`
//! environment variables, then validation.
//!
//! The file is layered onto the defaults as raw JSON before deserializing,
//! so a file only needs the keys it changes. Nested objects merge key by
//! key; arrays and scalars replace; `null` leaves the default in place.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::VigilSettings;

/// `~/.vigil/settings.json`, or `./.vigil/settings.json` without `HOME`.
pub fn settings_path() -> PathBuf {
    std::env::var_os("HOME")
        .map_or_else(|| PathBuf::from("."), PathBuf::from)
        .join(".vigil")
        .join("settings.json")
}

/// Load from [`settings_path`].
pub fn load_settings() -> Result<VigilSettings> {
    load_settings_from_path(&settings_path())
}

/// Load from `path`, apply the process environment and validate.
///
/// A missing file means defaults; an unreadable or malformed one is an error.
pub fn load_settings_from_path(path: &Path) -> Result<VigilSettings> {
    let mut settings = read_file_layer(path)?;
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings.validate()?;
    Ok(settings)
}

fn read_file_layer(path: &Path) -> Result<VigilSettings> {
    let mut doc = serde_json::to_value(VigilSettings::default())?;
    match std::fs::read_to_string(path) {
        Ok(text) => {
            debug!(path = %path.display(), "layering settings file");
            merge_layer(&mut doc, serde_json::from_str(&text)?);
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no settings file, using defaults");
        }
        Err(source) => {
            return Err(SettingsError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    }
    Ok(serde_json::from_value(doc)?)
}

/// Layer `overlay` onto `base` in place.
pub fn merge_layer(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge_layer(slot, value),
                    None if value.is_null() => {}
                    None => {
                        let _ = base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

type Apply = fn(&mut VigilSettings, &str) -> std::result::Result<(), String>;

/// Recognised variables and how each one lands in the settings.
const ENV_OVERRIDES: &[(&str, Apply)] = &[
    ("VIGIL_HOST", |s, v| non_empty(v).map(|v| s.server.host = v)),
    ("VIGIL_PORT", |s, v| in_range(v, 0..=u16::MAX).map(|v| s.server.port = v)),
    ("VIGIL_NAME", |s, v| non_empty(v).map(|v| s.server.name = v)),
    ("VIGIL_SESSION_ID", |s, v| non_empty(v).map(|v| s.server.session_id = Some(v))),
    ("VIGIL_MESSAGE_BACKLOG", |s, v| {
        in_range(v, 1..=1_000_000).map(|v| s.server.message_backlog = v)
    }),
    ("VIGIL_SHUTDOWN_GRACE_MS", |s, v| {
        in_range(v, 0..=600_000).map(|v| s.server.shutdown_grace_ms = v)
    }),
    ("VIGIL_LOG_LEVEL", |s, v| non_empty(v).map(|v| s.logging.level = v)),
    ("VIGIL_LOG_JSON", |s, v| flag(v).map(|v| s.logging.json = v)),
];

/// Apply every `VIGIL_*` variable `lookup` knows about.
///
/// A value that does not parse is logged and skipped; the file or default
/// value stays.
pub fn apply_env_overrides(settings: &mut VigilSettings, lookup: impl Fn(&str) -> Option<String>) {
    for (key, apply) in ENV_OVERRIDES {
        let Some(raw) = lookup(key) else { continue };
        if let Err(reason) = apply(settings, raw.trim()) {
            warn!(key, value = %raw, %reason, "ignoring environment override");
        }
    }
}

fn non_empty(raw: &str) -> std::result::Result<String, String> {
    if raw.is_empty() {
        Err("empty".into())
    } else {
        Ok(raw.to_owned())
    }
}

fn in_range<T>(raw: &str, range: RangeInclusive<T>) -> std::result::Result<T, String>
where
    T: FromStr + PartialOrd + std::fmt::Display,
{
    let n: T = raw.parse().map_err(|_| format!("not a number in {}..={}", range.start(), range.end()))?;
    if range.contains(&n) {
        Ok(n)
    } else {
        Err(format!("outside {}..={}", range.start(), range.end()))
    }
}

fn flag(raw: &str) -> std::result::Result<bool, String> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err("expected true/false".into()),
    }
}
