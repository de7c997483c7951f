//! # Configuration Resolver
//!
//! Produce la `Config` immutabile a partire da tre layer JSON con priorità stretta:
//! call-time > utente > default.
//!
//! ## Regole di merge:
//! - Gli oggetti vengono uniti ricorsivamente (unione delle chiavi)
//! - Gli scalari in conflitto prendono il valore del layer a priorità più alta
//! - Gli array vengono sostituiti interamente, mai concatenati
//!
//! ## Validazione (prima che parta qualsiasi task):
//! - Presenza delle quattro sezioni di formato, di `processing` (con `maxThreads`,
//!   `minFileSizeKB`, `maxDimensions`) e di `output`: la chiave mancante viene nominata nell'errore
//! - `quality` fuori da 0-100 rifiutata qui, non al momento del dispatch
//!
//! Il layer di default viene copiato prima del merge: chiamate ripetute non condividono stato.

use crate::config::Config;
use crate::error::ConfigError;
use serde_json::{Map, Value};
use tracing::debug;

/// Keys that must be present (and non-null) in the merged tree
const REQUIRED_KEYS: &[&str] = &[
    "defaultSettings",
    "defaultSettings.jpeg",
    "defaultSettings.png",
    "defaultSettings.webp",
    "defaultSettings.avif",
    "processing",
    "processing.maxThreads",
    "processing.minFileSizeKB",
    "processing.maxDimensions",
    "processing.maxDimensions.width",
    "processing.maxDimensions.height",
    "output",
];

const FORMAT_KEYS: &[&str] = &["jpeg", "png", "webp", "avif"];

/// Recursively merge `overlay` on top of `base`.
///
/// - Objects are merged key-by-key (overlay keys override base keys).
/// - Non-object values in overlay replace base values entirely (arrays included).
/// - Keys in base that are not in overlay are preserved.
pub fn merge_json(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_val) => merge_json(base_val, overlay_val),
                    None => overlay_val,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

/// Merge the three layers, validate, and produce the sealed configuration
pub fn resolve(
    defaults: &Value,
    user_overrides: Option<&Value>,
    call_overrides: Option<&Value>,
) -> Result<Config, ConfigError> {
    let mut merged = defaults.clone();

    for layer in [user_overrides, call_overrides].into_iter().flatten() {
        merged = merge_json(merged, layer.clone());
    }

    check_required_keys(&merged)?;
    check_quality_bounds(&merged)?;

    let config: Config = serde_json::from_value(merged)?;
    config.validate()?;

    debug!(
        "Resolved configuration (user layer: {}, call layer: {})",
        user_overrides.is_some(),
        call_overrides.is_some()
    );
    Ok(config)
}

fn lookup<'a>(tree: &'a Value, dotted: &str) -> Option<&'a Value> {
    dotted
        .split('.')
        .try_fold(tree, |node, key| node.get(key))
        .filter(|value| !value.is_null())
}

fn check_required_keys(tree: &Value) -> Result<(), ConfigError> {
    match REQUIRED_KEYS.iter().find(|key| lookup(tree, key).is_none()) {
        Some(missing) => Err(ConfigError::MissingKey((*missing).to_string())),
        None => Ok(()),
    }
}

fn check_quality_bounds(tree: &Value) -> Result<(), ConfigError> {
    for format in FORMAT_KEYS {
        let key = format!("defaultSettings.{}.quality", format);
        let Some(value) = lookup(tree, &key) else {
            continue;
        };

        match value.as_i64() {
            Some(quality) if (0..=100).contains(&quality) => {}
            Some(quality) => {
                return Err(ConfigError::invalid(
                    key,
                    format!("must be between 0 and 100 (got {})", quality),
                ))
            }
            None => return Err(ConfigError::invalid(key, format!("must be an integer (got {})", value))),
        }
    }
    Ok(())
}

/// Build a call-time layer from `key.path=value` pairs
///
/// Values are parsed as JSON when possible (`95`, `true`, `[1,2]`),
/// otherwise kept as strings.
pub fn overrides_from_pairs<S: AsRef<str>>(pairs: &[S]) -> Result<Value, ConfigError> {
    let mut root = Value::Object(Map::new());

    for pair in pairs {
        let pair = pair.as_ref();
        let (path, raw) = pair
            .split_once('=')
            .ok_or_else(|| ConfigError::invalid(pair, "expected key.path=value"))?;
        let path = path.trim();
        if path.is_empty() || path.split('.').any(str::is_empty) {
            return Err(ConfigError::invalid(pair, "empty key segment"));
        }

        let value = serde_json::from_str(raw.trim())
            .unwrap_or_else(|_| Value::String(raw.trim().to_string()));

        let layer = path
            .rsplit('.')
            .fold(value, |inner, key| {
                let mut map = Map::new();
                map.insert(key.to_string(), inner);
                Value::Object(map)
            });
        root = merge_json(root, layer);
    }

    Ok(root)
}
