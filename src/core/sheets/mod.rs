use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use async_trait::async_trait;
use std::collections::HashMap;

/// Grid of cells as returned for one named range.
pub type RangeGrid = Vec<Vec<String>>;

/// Spreadsheet seam for the `googlesheet` LOV provider: a batched read of
/// named ranges returning one grid per range, in request order.
#[async_trait]
pub trait RangeReader: Send + Sync + 'static {
    async fn read_ranges(
        &self,
        spreadsheet_id: &str,
        ranges: &[String],
    ) -> Result<Vec<RangeGrid>, AppError>;
}

/// Fixture-backed reader for tests and the local serve mode. Unknown
/// spreadsheets or ranges are errors so misconfiguration is loud.
#[derive(Default)]
pub struct StaticRangeReader {
    grids: HashMap<(String, String), RangeGrid>,
}

impl StaticRangeReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_range<S: Into<String>, R: Into<String>>(
        mut self,
        spreadsheet_id: S,
        range: R,
        grid: RangeGrid,
    ) -> Self {
        self.grids.insert((spreadsheet_id.into(), range.into()), grid);
        self
    }
}

#[async_trait]
impl RangeReader for StaticRangeReader {
    async fn read_ranges(
        &self,
        spreadsheet_id: &str,
        ranges: &[String],
    ) -> Result<Vec<RangeGrid>, AppError> {
        let mut grids = Vec::with_capacity(ranges.len());
        for range in ranges {
            let grid = self
                .grids
                .get(&(spreadsheet_id.to_string(), range.clone()))
                .ok_or_else(|| {
                    AppError::new(
                        ErrorCategory::ConfigurationError,
                        format!("no data for spreadsheet {} range {}", spreadsheet_id, range),
                    )
                })?;
            grids.push(grid.clone());
        }
        Ok(grids)
    }
}
