use chrono::NaiveDate;
use log::warn;
use serde::Deserialize;
use serde_with::serde_as;
use serde_with::DurationSeconds;
use std::fs;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::brain::schedule::{HeatingSchedule, ScheduleError, ScheduleSegment};
use crate::brain::state::SystemMode;

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    server: ServerConfig,
    weather: WeatherConfig,
    model: ModelConfig,
    control: ControlConfig,
    /// Replaces the built in schedule when present.
    heating_schedule: Option<Vec<ScheduleSegment>>,
}

impl Config {
    pub fn get_server(&self) -> &ServerConfig {
        &self.server
    }

    pub fn get_weather(&self) -> &WeatherConfig {
        &self.weather
    }

    pub fn get_model(&self) -> &ModelConfig {
        &self.model
    }

    pub fn get_control_config(&self) -> &ControlConfig {
        &self.control
    }

    pub fn build_heating_schedule(&self) -> Result<HeatingSchedule, ScheduleError> {
        match &self.heating_schedule {
            None => Ok(HeatingSchedule::default()),
            Some(segments) => HeatingSchedule::new(segments.clone()),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    bind_address: IpAddr,
    port: u16,
    /// Origin of the browser front end allowed to call the API.
    allowed_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: Ipv4Addr::UNSPECIFIED.into(),
            port: 3000,
            allowed_origin: "http://localhost:3001".to_owned(),
        }
    }
}

impl ServerConfig {
    pub fn get_bind_address(&self) -> &IpAddr {
        &self.bind_address
    }

    pub fn get_port(&self) -> u16 {
        self.port
    }

    pub fn get_allowed_origin(&self) -> &str {
        &self.allowed_origin
    }
}

#[serde_as]
#[derive(Deserialize, Clone, Debug)]
#[serde(default, deny_unknown_fields)]
pub struct WeatherConfig {
    /// When false, no request is made and every hour reads as 0C.
    enabled: bool,
    latitude: f64,
    longitude: f64,
    timezone: String,
    /// The reference day whose hourly temperatures are replayed.
    date: NaiveDate,
    /// How long to wait for the archive before giving up.
    #[serde_as(as = "DurationSeconds")]
    timeout_secs: Duration,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            latitude: 52.4143,
            longitude: -1.7809,
            timezone: "Europe/London".to_owned(),
            date: NaiveDate::from_ymd_opt(2024, 11, 28).unwrap_or_default(),
            timeout_secs: Duration::from_secs(10),
        }
    }
}

impl WeatherConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn get_latitude(&self) -> f64 {
        self.latitude
    }

    pub fn get_longitude(&self) -> f64 {
        self.longitude
    }

    pub fn get_timezone(&self) -> &str {
        &self.timezone
    }

    pub fn get_date(&self) -> &NaiveDate {
        &self.date
    }

    pub fn get_timeout(&self) -> &Duration {
        &self.timeout_secs
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    /// JSON with an `intercept` and a `coef` list.
    params_file: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            params_file: PathBuf::from("model/model_params.json"),
        }
    }
}

impl ModelConfig {
    pub fn get_params_file(&self) -> &Path {
        &self.params_file
    }
}

#[serde_as]
#[derive(Deserialize, Clone, Debug)]
#[serde(default, deny_unknown_fields)]
pub struct ControlConfig {
    /// How often to check whether the hour has changed.
    #[serde_as(as = "DurationSeconds")]
    tick_interval_secs: Duration,
    /// How long a manual setpoint is advertised as held for.
    #[serde_as(as = "DurationSeconds")]
    hold_secs: Duration,
    initial_mode: SystemMode,
    /// Indoor temperature reported by the thermostat until something else writes it.
    initial_indoor_temperature: f64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: Duration::from_secs(60),
            hold_secs: Duration::from_secs(30 * 60),
            initial_mode: SystemMode::Off,
            initial_indoor_temperature: 20.0,
        }
    }
}

impl ControlConfig {
    pub fn get_tick_interval(&self) -> &Duration {
        &self.tick_interval_secs
    }

    pub fn get_hold_duration(&self) -> &Duration {
        &self.hold_secs
    }

    pub fn get_initial_mode(&self) -> SystemMode {
        self.initial_mode
    }

    pub fn get_initial_indoor_temperature(&self) -> f64 {
        self.initial_indoor_temperature
    }
}

/// A missing file means defaults, a broken one is an error.
pub fn read_config(path: &Path) -> Result<Config, String> {
    let config = match fs::read_to_string(path) {
        Ok(config) => config,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            warn!("No config file at {}, using defaults", path.display());
            return Ok(Config::default());
        }
        Err(err) => return Err(format!("Failed to read config file {}: {}", path.display(), err)),
    };
    toml::from_str(&config).map_err(|err| format!("Error reading config file {}: {}", path.display(), err))
}
