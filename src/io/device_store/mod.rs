use std::fmt::{Display, Formatter};

use async_trait::async_trait;
use log::warn;
use serde_json::Value;
use strum_macros::Display;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

pub mod memory;

/// Attribute names, as the device model spells them.
pub mod attributes {
    pub const SYSTEM_MODE: &str = "systemMode";
    pub const LOCAL_TEMPERATURE: &str = "localTemperature";
    pub const OUTDOOR_TEMPERATURE: &str = "outdoorTemperature";
    pub const OCCUPIED_HEATING_SETPOINT: &str = "occupiedHeatingSetpoint";
    pub const MIN_HEAT_SETPOINT_LIMIT: &str = "minHeatSetpointLimit";
    pub const MAX_HEAT_SETPOINT_LIMIT: &str = "maxHeatSetpointLimit";
    pub const PI_HEATING_DEMAND: &str = "piHeatingDemand";
    pub const THERMOSTAT_RUNNING_STATE: &str = "thermostatRunningState";
    pub const SETPOINT_CHANGE_SOURCE: &str = "setpointChangeSource";
    pub const SETPOINT_CHANGE_AMOUNT: &str = "setpointChangeAmount";
    pub const SETPOINT_CHANGE_SOURCE_TIMESTAMP: &str = "setpointChangeSourceTimestamp";
    pub const TEMPERATURE_SETPOINT_HOLD: &str = "temperatureSetpointHold";
    pub const TEMPERATURE_SETPOINT_HOLD_DURATION: &str = "temperatureSetpointHoldDuration";

    pub const MEASURED_VALUE: &str = "measuredValue";
    pub const ACTIVE_POWER: &str = "activePower";

    pub const ABS_MIN_POWER: &str = "absMinPower";
    pub const ABS_MAX_POWER: &str = "absMaxPower";
    pub const FORECAST: &str = "forecast";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Endpoint {
    HeatPump,
    Thermostat,
    FlowTemperatureSensor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Cluster {
    Thermostat,
    ElectricalPowerMeasurement,
    FlowMeasurement,
    TemperatureMeasurement,
    DeviceEnergyManagement,
}

/// Who performed a write. Every change notification carries it, so the
/// controller can tell its own writes apart from everyone else's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum WriteSource {
    Controller,
    External,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeChange {
    pub endpoint: Endpoint,
    pub cluster: Cluster,
    pub name: String,
    pub value: Value,
    pub previous: Option<Value>,
    pub source: WriteSource,
}

/// Several attributes of one cluster, written together.
pub type PartialState = Vec<(&'static str, Value)>;

#[derive(Debug, PartialEq)]
pub enum StoreError {
    UnknownAttribute { endpoint: Endpoint, cluster: Cluster, name: String },
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::UnknownAttribute { endpoint, cluster, name } => write!(f, "Unknown attribute {}/{}/{}", endpoint, cluster, name),
        }
    }
}

impl std::error::Error for StoreError {}

/// The device-state store hosting the thermostat and heat pump attributes.
#[async_trait]
pub trait DeviceStateStore: Send + Sync {
    async fn read_attribute(&self, endpoint: Endpoint, cluster: Cluster, name: &str) -> Option<Value>;

    /// Applies all of `state` or none of it.
    async fn write_attributes(&self, endpoint: Endpoint, cluster: Cluster, state: PartialState, source: WriteSource) -> Result<(), StoreError>;

    /// Changes to one attribute, including the ones caused by the subscriber itself.
    fn subscribe(&self, endpoint: Endpoint, cluster: Cluster, name: &str) -> AttributeSubscription;
}

pub struct AttributeSubscription {
    endpoint: Endpoint,
    cluster: Cluster,
    name: String,
    receiver: broadcast::Receiver<AttributeChange>,
}

impl AttributeSubscription {
    pub fn new(endpoint: Endpoint, cluster: Cluster, name: &str, receiver: broadcast::Receiver<AttributeChange>) -> Self {
        Self {
            endpoint,
            cluster,
            name: name.to_owned(),
            receiver,
        }
    }

    fn matches(&self, change: &AttributeChange) -> bool {
        change.endpoint == self.endpoint && change.cluster == self.cluster && change.name == self.name
    }

    /// Waits for the next change. None once the store is gone.
    pub async fn next(&mut self) -> Option<AttributeChange> {
        loop {
            match self.receiver.recv().await {
                Ok(change) if self.matches(&change) => return Some(change),
                Ok(_) => continue,
                Err(RecvError::Lagged(missed)) => {
                    warn!("Subscription to {}/{}/{} missed {} changes", self.endpoint, self.cluster, self.name, missed);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    #[cfg(test)]
    pub fn try_next(&mut self) -> Option<AttributeChange> {
        while let Ok(change) = self.receiver.try_recv() {
            if self.matches(&change) {
                return Some(change);
            }
        }
        None
    }
}

/// 0.01 degC units to degC.
pub fn from_centi_celsius(value: &Value) -> Option<f64> {
    value.as_f64().map(|centi| centi / 100.0)
}

pub fn to_centi_celsius(celsius: f64) -> Value {
    Value::from((celsius * 100.0).round() as i64)
}
