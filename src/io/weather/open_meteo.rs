use async_trait::async_trait;
use chrono::{NaiveDateTime, Timelike};
use log::debug;
use reqwest::Client;
use serde::Deserialize;

use crate::config::WeatherConfig;
use super::{OutdoorTemperatureSample, OutdoorTemperatureSource, OutdoorTemperatureTable, RetrieveDataError};

const ARCHIVE_URL: &str = "https://archive-api.open-meteo.com/v1/archive";
const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// Replays one historical day from the Open-Meteo archive.
pub struct OpenMeteoArchive {
    client: Client,
    config: WeatherConfig,
}

impl OpenMeteoArchive {
    pub fn new(config: WeatherConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    async fn get_data_raw(&self) -> Result<String, reqwest::Error> {
        let date = self.config.get_date().format("%Y-%m-%d").to_string();
        let query = [
            ("latitude", self.config.get_latitude().to_string()),
            ("longitude", self.config.get_longitude().to_string()),
            ("timezone", self.config.get_timezone().to_owned()),
            ("hourly", "temperature_2m".to_owned()),
            ("start_date", date.clone()),
            ("end_date", date),
        ];

        self.client
            .get(ARCHIVE_URL)
            .query(&query)
            .timeout(*self.config.get_timeout())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }
}

#[async_trait]
impl OutdoorTemperatureSource for OpenMeteoArchive {
    async fn fetch_hourly(&self) -> Result<OutdoorTemperatureTable, RetrieveDataError> {
        let raw = self.get_data_raw().await?;
        debug!("Open-Meteo returned {} bytes", raw.len());
        parse_archive(&raw)
    }
}

#[derive(Deserialize)]
struct ArchiveResponse {
    hourly: HourlyData,
}

#[derive(Deserialize)]
struct HourlyData {
    time: Vec<String>,
    temperature_2m: Vec<Option<f64>>,
}

/// Hours the archive has no reading for are left out, so they read as 0C.
pub fn parse_archive(json: &str) -> Result<OutdoorTemperatureTable, RetrieveDataError> {
    let response: ArchiveResponse = serde_json::from_str(json).map_err(RetrieveDataError::Json)?;
    let hourly = response.hourly;

    if hourly.time.len() != hourly.temperature_2m.len() {
        return Err(RetrieveDataError::Other(format!(
            "{} timestamps but {} temperatures",
            hourly.time.len(),
            hourly.temperature_2m.len()
        )));
    }

    let mut samples = Vec::with_capacity(hourly.time.len());
    for (time, temperature) in hourly.time.iter().zip(hourly.temperature_2m) {
        let time = NaiveDateTime::parse_from_str(time, TIME_FORMAT)
            .map_err(|err| RetrieveDataError::Other(format!("Bad timestamp {:?}: {}", time, err)))?;
        if let Some(temperature) = temperature {
            samples.push(OutdoorTemperatureSample::new(time.hour(), temperature));
        }
    }
    Ok(OutdoorTemperatureTable::new(samples))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_archive_day() {
        let json = std::fs::read_to_string("test/open_meteo_archive.json").expect("Failed to read fixture");
        let table = parse_archive(&json).unwrap();

        assert_eq!(table.len(), 23);
        assert_eq!(table.temperature_at(0), 3.1);
        assert_eq!(table.temperature_at(14), 7.9);
        // null in the fixture
        assert_eq!(table.temperature_at(5), 0.0);
    }

    #[test]
    fn mismatched_lengths() {
        let json = r#"{"hourly": {"time": ["2024-11-28T00:00", "2024-11-28T01:00"], "temperature_2m": [1.0]}}"#;
        assert!(matches!(parse_archive(json), Err(RetrieveDataError::Other(_))));
    }

    #[test]
    fn bad_timestamp() {
        let json = r#"{"hourly": {"time": ["yesterday"], "temperature_2m": [1.0]}}"#;
        assert!(matches!(parse_archive(json), Err(RetrieveDataError::Other(_))));
    }

    #[test]
    fn not_json() {
        assert!(matches!(parse_archive("<html>"), Err(RetrieveDataError::Json(_))));
    }
}
