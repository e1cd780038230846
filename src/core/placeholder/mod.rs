#![allow(clippy::result_large_err)] // Resolver APIs return AppError so failed tokens keep their diagnostic context.

use crate::core::approvals;
use crate::core::entities::CardEntry;
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Nested template structures are user-configurable; anything deeper than
/// this is treated as hostile input rather than traversed.
const MAX_RESOLVE_DEPTH: usize = 64;

/// Token grammar: sigil (`$` card field, `#` fieldData, `@` approval author),
/// a dot, the key, and an optional trailing `?` marking the token optional.
/// Anything that does not match the full grammar is left verbatim.
fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"([$#@])\.([a-zA-Z0-9_-]+)(\?)?").expect("token pattern"))
}

/// Placeholder resolver bound to a single card's context.
pub struct CardContext<'a> {
    card: &'a CardEntry,
}

/// Bind a resolver to the given card.
pub fn with_context(card: &CardEntry) -> CardContext<'_> {
    CardContext { card }
}

impl<'a> CardContext<'a> {
    /// Resolve every placeholder token in `text`, left to right in a single
    /// pass. Required tokens that resolve to nothing raise an error naming
    /// the exact token; optional tokens (`?` suffix) resolve to the empty
    /// string.
    pub fn resolve(&self, text: &str) -> Result<String, AppError> {
        let pattern = token_pattern();
        let mut output = String::with_capacity(text.len());
        let mut cursor = 0;
        for captures in pattern.captures_iter(text) {
            let matched = captures.get(0).expect("match group");
            output.push_str(&text[cursor..matched.start()]);
            cursor = matched.end();

            let sigil = &captures[1];
            let key = &captures[2];
            let optional = captures.get(3).is_some();
            match self.lookup(sigil, key) {
                Some(value) => output.push_str(&value),
                None if optional => {}
                None => {
                    return Err(AppError::new(
                        ErrorCategory::ValidationError,
                        format!("{}.{} is required but has no value", sigil, key),
                    )
                    .with_code("CF-PH-001"));
                }
            }
        }
        output.push_str(&text[cursor..]);
        Ok(output)
    }

    /// Recursive variant: walk an arbitrary nested structure and resolve
    /// every string leaf, preserving non-string values and shape.
    pub fn resolve_value(&self, value: &Value) -> Result<Value, AppError> {
        self.resolve_value_at(value, 0)
    }

    fn resolve_value_at(&self, value: &Value, depth: usize) -> Result<Value, AppError> {
        if depth > MAX_RESOLVE_DEPTH {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                "placeholder resolution exceeded maximum nesting depth",
            )
            .with_code("CF-PH-002"));
        }
        match value {
            Value::String(text) => Ok(Value::String(self.resolve(text)?)),
            Value::Array(items) => {
                let mut resolved = Vec::with_capacity(items.len());
                for item in items {
                    resolved.push(self.resolve_value_at(item, depth + 1)?);
                }
                Ok(Value::Array(resolved))
            }
            Value::Object(map) => {
                let mut resolved = serde_json::Map::with_capacity(map.len());
                for (key, item) in map {
                    resolved.insert(key.clone(), self.resolve_value_at(item, depth + 1)?);
                }
                Ok(Value::Object(resolved))
            }
            other => Ok(other.clone()),
        }
    }

    fn lookup(&self, sigil: &str, key: &str) -> Option<String> {
        let value = match sigil {
            "$" => self.card.top_level_field(key),
            "#" => self.card.field_data.get(key).cloned(),
            "@" => {
                // Latest active token wins; negative tokens still surface
                // their author.
                return approvals::latest_token(self.card, key)
                    .map(|token| token.author.clone());
            }
            _ => None,
        };
        value.and_then(|value| stringify(&value))
    }
}

fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        composite => serde_json::to_string(composite).ok(),
    }
}
