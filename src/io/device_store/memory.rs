use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use log::{debug, trace};
use serde_json::Value;
use tokio::sync::broadcast;

use super::attributes::*;
use super::{to_centi_celsius, AttributeChange, AttributeSubscription, Cluster, DeviceStateStore, Endpoint, PartialState, StoreError, WriteSource};

pub const MIN_HEAT_SETPOINT_LIMIT_C: f64 = 7.0;
pub const MAX_HEAT_SETPOINT_LIMIT_C: f64 = 30.0;

/// 250W, in mW
const ABS_MIN_POWER_MW: i64 = 250_000;
/// 5kW, in mW
const ABS_MAX_POWER_MW: i64 = 5_000_000;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

type AttributeKey = (Endpoint, Cluster, String);

/// Keeps attribute state in memory. Only attributes it was seeded with can be written.
pub struct InMemoryDeviceStore {
    attributes: Mutex<HashMap<AttributeKey, Value>>,
    changes: broadcast::Sender<AttributeChange>,
}

impl InMemoryDeviceStore {
    pub fn new(seed: Vec<(Endpoint, Cluster, &'static str, Value)>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let attributes = seed
            .into_iter()
            .map(|(endpoint, cluster, name, value)| ((endpoint, cluster, name.to_owned()), value))
            .collect();
        Self {
            attributes: Mutex::new(attributes),
            changes,
        }
    }

    /// A heating-only thermostat and a heat pump with energy forecasting.
    pub fn heat_pump(indoor_temperature: f64, system_mode: u8) -> Self {
        let thermostat = |name, value| (Endpoint::Thermostat, Cluster::Thermostat, name, value);
        let heat_pump = |cluster, name, value| (Endpoint::HeatPump, cluster, name, value);

        Self::new(vec![
            thermostat(SYSTEM_MODE, Value::from(system_mode)),
            thermostat(LOCAL_TEMPERATURE, to_centi_celsius(indoor_temperature)),
            thermostat(OUTDOOR_TEMPERATURE, Value::Null),
            thermostat(OCCUPIED_HEATING_SETPOINT, to_centi_celsius(20.0)),
            thermostat(MIN_HEAT_SETPOINT_LIMIT, to_centi_celsius(MIN_HEAT_SETPOINT_LIMIT_C)),
            thermostat(MAX_HEAT_SETPOINT_LIMIT, to_centi_celsius(MAX_HEAT_SETPOINT_LIMIT_C)),
            thermostat(PI_HEATING_DEMAND, Value::from(0)),
            thermostat(THERMOSTAT_RUNNING_STATE, Value::from(0)),
            thermostat(SETPOINT_CHANGE_SOURCE, Value::Null),
            thermostat(SETPOINT_CHANGE_AMOUNT, Value::Null),
            thermostat(SETPOINT_CHANGE_SOURCE_TIMESTAMP, Value::from(0)),
            thermostat(TEMPERATURE_SETPOINT_HOLD, Value::from(0)),
            thermostat(TEMPERATURE_SETPOINT_HOLD_DURATION, Value::Null),
            (Endpoint::FlowTemperatureSensor, Cluster::TemperatureMeasurement, MEASURED_VALUE, Value::Null),
            heat_pump(Cluster::ElectricalPowerMeasurement, ACTIVE_POWER, Value::Null),
            heat_pump(Cluster::FlowMeasurement, MEASURED_VALUE, Value::Null),
            heat_pump(Cluster::DeviceEnergyManagement, ABS_MIN_POWER, Value::from(ABS_MIN_POWER_MW)),
            heat_pump(Cluster::DeviceEnergyManagement, ABS_MAX_POWER, Value::from(ABS_MAX_POWER_MW)),
            heat_pump(Cluster::DeviceEnergyManagement, FORECAST, Value::Null),
        ])
    }
}

#[async_trait]
impl DeviceStateStore for InMemoryDeviceStore {
    async fn read_attribute(&self, endpoint: Endpoint, cluster: Cluster, name: &str) -> Option<Value> {
        self.attributes.lock().unwrap().get(&(endpoint, cluster, name.to_owned())).cloned()
    }

    async fn write_attributes(&self, endpoint: Endpoint, cluster: Cluster, state: PartialState, source: WriteSource) -> Result<(), StoreError> {
        let changes = {
            let mut attributes = self.attributes.lock().unwrap();

            if let Some((name, _)) = state.iter().find(|(name, _)| !attributes.contains_key(&(endpoint, cluster, name.to_string()))) {
                return Err(StoreError::UnknownAttribute {
                    endpoint,
                    cluster,
                    name: name.to_string(),
                });
            }

            let mut changes = Vec::new();
            for (name, value) in state {
                let previous = attributes.insert((endpoint, cluster, name.to_owned()), value.clone());
                if previous.as_ref() != Some(&value) {
                    changes.push(AttributeChange {
                        endpoint,
                        cluster,
                        name: name.to_owned(),
                        value,
                        previous,
                        source,
                    });
                }
            }
            changes
        };

        for change in changes {
            trace!("{}/{}/{} = {} ({})", change.endpoint, change.cluster, change.name, change.value, change.source);
            if self.changes.send(change).is_err() {
                debug!("No subscribers for attribute changes");
            }
        }
        Ok(())
    }

    fn subscribe(&self, endpoint: Endpoint, cluster: Cluster, name: &str) -> AttributeSubscription {
        AttributeSubscription::new(endpoint, cluster, name, self.changes.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> InMemoryDeviceStore {
        InMemoryDeviceStore::heat_pump(20.0, 0)
    }

    #[tokio::test]
    async fn seeded_with_defaults() {
        let store = store();
        assert_eq!(
            store.read_attribute(Endpoint::Thermostat, Cluster::Thermostat, LOCAL_TEMPERATURE).await,
            Some(Value::from(2000))
        );
        assert_eq!(
            store.read_attribute(Endpoint::HeatPump, Cluster::DeviceEnergyManagement, ABS_MAX_POWER).await,
            Some(Value::from(5_000_000))
        );
        assert_eq!(store.read_attribute(Endpoint::HeatPump, Cluster::Thermostat, SYSTEM_MODE).await, None);
    }

    #[tokio::test]
    async fn write_notifies_with_source() {
        let store = store();
        let mut subscription = store.subscribe(Endpoint::Thermostat, Cluster::Thermostat, OCCUPIED_HEATING_SETPOINT);

        store
            .write_attributes(Endpoint::Thermostat, Cluster::Thermostat, vec![(OCCUPIED_HEATING_SETPOINT, Value::from(2150))], WriteSource::External)
            .await
            .unwrap();

        let change = subscription.next().await.unwrap();
        assert_eq!(change.value, Value::from(2150));
        assert_eq!(change.previous, Some(Value::from(2000)));
        assert_eq!(change.source, WriteSource::External);
    }

    #[tokio::test]
    async fn unchanged_values_do_not_notify() {
        let store = store();
        let mut subscription = store.subscribe(Endpoint::Thermostat, Cluster::Thermostat, OCCUPIED_HEATING_SETPOINT);

        store
            .write_attributes(Endpoint::Thermostat, Cluster::Thermostat, vec![(OCCUPIED_HEATING_SETPOINT, Value::from(2000))], WriteSource::External)
            .await
            .unwrap();

        assert_eq!(subscription.try_next(), None);
    }

    #[tokio::test]
    async fn subscription_filters_other_attributes() {
        let store = store();
        let mut subscription = store.subscribe(Endpoint::Thermostat, Cluster::Thermostat, SYSTEM_MODE);

        store
            .write_attributes(Endpoint::Thermostat, Cluster::Thermostat, vec![(PI_HEATING_DEMAND, Value::from(40)), (SYSTEM_MODE, Value::from(4))], WriteSource::Controller)
            .await
            .unwrap();

        let change = subscription.try_next().unwrap();
        assert_eq!(change.name, SYSTEM_MODE);
        assert_eq!(change.source, WriteSource::Controller);
        assert_eq!(subscription.try_next(), None);
    }

    #[tokio::test]
    async fn unknown_attribute_rejects_whole_write() {
        let store = store();
        let result = store
            .write_attributes(Endpoint::Thermostat, Cluster::Thermostat, vec![(PI_HEATING_DEMAND, Value::from(40)), ("madeUp", Value::from(1))], WriteSource::Controller)
            .await;

        assert!(matches!(result, Err(StoreError::UnknownAttribute { .. })));
        assert_eq!(
            store.read_attribute(Endpoint::Thermostat, Cluster::Thermostat, PI_HEATING_DEMAND).await,
            Some(Value::from(0))
        );
    }
}
