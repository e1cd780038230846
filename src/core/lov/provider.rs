use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Externally sourced list-of-values provider bound to a text field.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LovProvider {
    Api(ApiProvider),
    Googlesheet(SheetProvider),
}

/// HTTP JSON provider: GET the url, select the items array by dot path,
/// then select per-item key/label values by dot path.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiProvider {
    pub url: String,
    /// Dot path from the response root to the items array; empty means the
    /// root itself is the array.
    #[serde(default)]
    pub items: String,
    pub key: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
}

/// Spreadsheet provider: batched reads of a key range and a label range
/// producing parallel columns, flattened by the declared orientation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetProvider {
    pub spreadsheet_id: String,
    pub key_range: String,
    pub label_range: String,
    #[serde(default)]
    pub orientation: SheetOrientation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
}

/// Whether range values run along rows or down columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SheetOrientation {
    Rows,
    #[default]
    Columns,
}

impl LovProvider {
    pub fn kind_name(&self) -> &'static str {
        match self {
            LovProvider::Api(_) => "api",
            LovProvider::Googlesheet(_) => "googlesheet",
        }
    }

    /// Cache freshness window per provider kind.
    pub fn cache_ttl(&self) -> Duration {
        match self {
            LovProvider::Api(_) => Duration::minutes(30),
            LovProvider::Googlesheet(_) => Duration::minutes(120),
        }
    }

    /// Explicit cache key when given; otherwise a deterministic hash of the
    /// full provider definition, so structurally identical providers share
    /// one cache document.
    pub fn cache_key(&self) -> String {
        let explicit = match self {
            LovProvider::Api(api) => api.cache_key.as_deref(),
            LovProvider::Googlesheet(sheet) => sheet.cache_key.as_deref(),
        };
        if let Some(key) = explicit {
            return key.to_string();
        }
        let value = serde_json::to_value(self).expect("provider definition serializes");
        let mut hasher = Sha256::new();
        hash_canonical(&value, &mut hasher);
        hex::encode(hasher.finalize())
    }
}

/// Feed a JSON value into the hasher with object keys in sorted order, so
/// the derived cache key does not depend on serialization order.
fn hash_canonical(value: &Value, hasher: &mut Sha256) {
    match value {
        Value::Null => hasher.update(b"n"),
        Value::Bool(flag) => hasher.update(if *flag { b"t" } else { b"f" }),
        Value::Number(number) => {
            hasher.update(b"#");
            hasher.update(number.to_string().as_bytes());
        }
        Value::String(text) => {
            hasher.update(b"s");
            hasher.update(text.as_bytes());
            hasher.update([0_u8]);
        }
        Value::Array(items) => {
            hasher.update(b"[");
            for item in items {
                hash_canonical(item, hasher);
            }
            hasher.update(b"]");
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            hasher.update(b"{");
            for key in keys {
                hasher.update(key.as_bytes());
                hasher.update([0_u8]);
                hash_canonical(&map[key], hasher);
            }
            hasher.update(b"}");
        }
    }
}
