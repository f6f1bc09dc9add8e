use async_trait::async_trait;

use super::{OutdoorTemperatureSource, OutdoorTemperatureTable, RetrieveDataError};

/// Serves a table that is already known, or a fixed failure.
pub struct FixedTemperatures {
    result: Result<OutdoorTemperatureTable, String>,
}

impl FixedTemperatures {
    pub fn new(table: OutdoorTemperatureTable) -> Self {
        Self { result: Ok(table) }
    }

    #[cfg(test)]
    pub fn failing(reason: &str) -> Self {
        Self {
            result: Err(reason.to_owned()),
        }
    }
}

#[async_trait]
impl OutdoorTemperatureSource for FixedTemperatures {
    async fn fetch_hourly(&self) -> Result<OutdoorTemperatureTable, RetrieveDataError> {
        self.result.clone().map_err(RetrieveDataError::Other)
    }
}
