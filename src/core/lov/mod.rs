#![allow(clippy::result_large_err)] // LOV failures carry provider identity for diagnostics.

pub mod provider;
pub mod validator;

pub use provider::{ApiProvider, LovProvider, SheetOrientation, SheetProvider};
pub use validator::LovValidator;

use crate::core::entities::{CachedLovData, LovEntry};
use crate::core::error::AppError;
use crate::core::sheets::{RangeGrid, RangeReader};
use crate::core::store::{DocumentStore, LOV_COLLECTION};
use crate::core::types::ErrorCategory;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Read-through cache over the LOV providers. Owned by the process context
/// and injected where needed; there is no module-level singleton. Staleness
/// is checked lazily on read against the cached `expired_at`.
pub struct LovCache {
    store: Arc<dyn DocumentStore>,
    http: reqwest::Client,
    sheets: Arc<dyn RangeReader>,
}

impl LovCache {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        http: reqwest::Client,
        sheets: Arc<dyn RangeReader>,
    ) -> Self {
        Self {
            store,
            http,
            sheets,
        }
    }

    /// Return the provider's entries, consulting the cache document unless
    /// `ignore_cache` forces a refetch. Any fetch overwrites the cache with
    /// a fresh expiration.
    pub async fn list(
        &self,
        provider: &LovProvider,
        ignore_cache: bool,
    ) -> Result<Vec<LovEntry>, AppError> {
        let cache_key = provider.cache_key();
        if !ignore_cache {
            if let Some(cached) = self.read_cache(&cache_key).await? {
                if cached.expired_at > Utc::now() {
                    debug!(cache_key = %cache_key, "LOV cache hit");
                    return Ok(cached.values);
                }
            }
        }

        let values = self.fetch(provider).await?;
        let now = Utc::now();
        let document = CachedLovData {
            kind: provider.kind_name().to_string(),
            cache_key: cache_key.clone(),
            values: values.clone(),
            expired_at: now + provider.cache_ttl(),
            updated_at: now,
        };
        self.store
            .set(
                LOV_COLLECTION,
                &cache_key,
                serde_json::to_value(&document)?,
                false,
            )
            .await?;
        info!(cache_key = %cache_key, entries = values.len(), "LOV cache refreshed");
        Ok(values)
    }

    async fn read_cache(&self, cache_key: &str) -> Result<Option<CachedLovData>, AppError> {
        let value = self.store.get(LOV_COLLECTION, cache_key).await?;
        match value {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn fetch(&self, provider: &LovProvider) -> Result<Vec<LovEntry>, AppError> {
        match provider {
            LovProvider::Api(api) => self.fetch_api(api).await,
            LovProvider::Googlesheet(sheet) => self.fetch_sheet(sheet).await,
        }
    }

    async fn fetch_api(&self, api: &ApiProvider) -> Result<Vec<LovEntry>, AppError> {
        let response = self.http.get(&api.url).send().await.map_err(|err| {
            AppError::new(
                ErrorCategory::HttpError,
                format!("LOV request to {} failed: {}", api.url, err),
            )
            .with_code("CF-LOV-HTTP")
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::new(
                ErrorCategory::HttpError,
                format!("LOV request to {} returned {}", api.url, status),
            )
            .with_code("CF-LOV-HTTP"));
        }
        let payload: Value = response.json().await.map_err(|err| {
            AppError::new(
                ErrorCategory::SerializationError,
                format!("LOV response from {} is not JSON: {}", api.url, err),
            )
        })?;

        let items = select_path(&payload, &api.items).ok_or_else(|| {
            AppError::new(
                ErrorCategory::ValidationError,
                format!("LOV selector '{}' matched nothing in {}", api.items, api.url),
            )
        })?;
        let items = items.as_array().ok_or_else(|| {
            AppError::new(
                ErrorCategory::ValidationError,
                format!("LOV selector '{}' did not select an array", api.items),
            )
        })?;

        let mut entries = Vec::with_capacity(items.len());
        for item in items {
            let key = select_path(item, &api.key).and_then(scalar_string);
            let label = select_path(item, &api.label).and_then(scalar_string);
            match (key, label) {
                (Some(key), Some(label)) => entries.push(LovEntry {
                    key,
                    label,
                    meta: None,
                }),
                _ => debug!(url = %api.url, "skipping LOV item without key or label"),
            }
        }
        Ok(entries)
    }

    async fn fetch_sheet(&self, sheet: &SheetProvider) -> Result<Vec<LovEntry>, AppError> {
        let ranges = vec![sheet.key_range.clone(), sheet.label_range.clone()];
        let grids = self
            .sheets
            .read_ranges(&sheet.spreadsheet_id, &ranges)
            .await?;
        let [keys_grid, labels_grid]: [RangeGrid; 2] = grids.try_into().map_err(|_| {
            AppError::new(
                ErrorCategory::InternalError,
                "range reader returned an unexpected number of grids",
            )
        })?;
        let keys = flatten(keys_grid, sheet.orientation);
        let labels = flatten(labels_grid, sheet.orientation);
        if keys.len() != labels.len() {
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                format!(
                    "LOV ranges of spreadsheet {} are not parallel: {} keys vs {} labels",
                    sheet.spreadsheet_id,
                    keys.len(),
                    labels.len()
                ),
            ));
        }
        Ok(keys
            .into_iter()
            .zip(labels)
            .filter(|(key, _)| !key.trim().is_empty())
            .map(|(key, label)| LovEntry {
                key,
                label,
                meta: None,
            })
            .collect())
    }
}

/// Flatten a range grid into a single list following the declared
/// orientation: `rows` walks the first row across, `columns` walks the
/// first cell of each row down.
fn flatten(grid: RangeGrid, orientation: SheetOrientation) -> Vec<String> {
    match orientation {
        SheetOrientation::Rows => grid.into_iter().next().unwrap_or_default(),
        SheetOrientation::Columns => grid
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .collect(),
    }
}

/// Walk a dot path into a JSON value. The empty path selects the value
/// itself.
fn select_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}
