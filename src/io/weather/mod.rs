use std::fmt::{Display, Formatter};

use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};

pub mod dummy;
pub mod open_meteo;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OutdoorTemperatureSample {
    hour: u32,
    temperature: f64,
}

impl OutdoorTemperatureSample {
    pub fn new(hour: u32, temperature: f64) -> Self {
        Self { hour, temperature }
    }
}

/// Outdoor temperature for each hour of the reference day. Hours without a sample read as 0C.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutdoorTemperatureTable {
    samples: Vec<OutdoorTemperatureSample>,
}

impl OutdoorTemperatureTable {
    pub fn new(samples: Vec<OutdoorTemperatureSample>) -> Self {
        Self { samples }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// One sample per hour starting at midnight.
    #[cfg(test)]
    pub fn from_hourly(temperatures: &[f64]) -> Self {
        Self::new(
            temperatures
                .iter()
                .enumerate()
                .map(|(hour, temperature)| OutdoorTemperatureSample::new(hour as u32, *temperature))
                .collect(),
        )
    }

    pub fn temperature_at(&self, hour: u32) -> f64 {
        self.samples
            .iter()
            .find(|sample| sample.hour == hour)
            .map(|sample| sample.temperature)
            .unwrap_or(0.0)
    }

    pub fn get_samples(&self) -> &[OutdoorTemperatureSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[derive(Debug)]
pub enum RetrieveDataError {
    Network(reqwest::Error),
    Json(serde_json::Error),
    Other(String),
}

impl Display for RetrieveDataError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self {
            RetrieveDataError::Network(e) => write!(f, "Network Error: {}", e),
            RetrieveDataError::Json(e) => write!(f, "Deserialization Error: {}", e),
            RetrieveDataError::Other(e) => write!(f, "Unknown Error: {}", e),
        }
    }
}

impl std::error::Error for RetrieveDataError {}

impl From<reqwest::Error> for RetrieveDataError {
    fn from(err: reqwest::Error) -> Self {
        RetrieveDataError::Network(err)
    }
}

#[async_trait]
pub trait OutdoorTemperatureSource: Send + Sync {
    async fn fetch_hourly(&self) -> Result<OutdoorTemperatureTable, RetrieveDataError>;
}

/// Fetch once at startup. A failure leaves an empty table rather than stopping the process.
pub async fn load_outdoor_temperatures(source: &dyn OutdoorTemperatureSource) -> OutdoorTemperatureTable {
    match source.fetch_hourly().await {
        Ok(table) if table.is_empty() => {
            warn!("No outdoor temperatures returned, assuming 0C all day");
            table
        }
        Ok(table) => {
            info!("Loaded {} hourly outdoor temperatures", table.len());
            table
        }
        Err(err) => {
            warn!("Failed to fetch outdoor temperatures, assuming 0C all day: {}", err);
            OutdoorTemperatureTable::empty()
        }
    }
}
