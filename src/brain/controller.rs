use std::sync::Arc;

use chrono::{DateTime, Duration, Timelike, Utc};
use log::{debug, info, trace, warn};
use serde::Serialize;
use serde_json::Value;

use crate::brain::events::ControlEvent;
use crate::brain::forecast::generate_forecast;
use crate::brain::schedule::HeatingSchedule;
use crate::brain::state::{ControlState, HourTransition, SystemMode};
use crate::brain::thermal::{derive, ThermalOutput};
use crate::brain::ControlFailure;
use crate::control_fail;
use crate::io::device_store::attributes::*;
use crate::io::device_store::{from_centi_celsius, to_centi_celsius, Cluster, DeviceStateStore, Endpoint, PartialState, WriteSource};
use crate::io::notify::{NotificationBus, SystemUpdate};
use crate::io::weather::OutdoorTemperatureTable;
use crate::math::model::LinearModel;
use crate::time_util::matter_epoch::matter_epoch_of;
use crate::time_util::mytime::{start_of_local_day, TimeProvider};

pub const DEFAULT_HOLD_MINUTES: i64 = 30;

/// Snapshot served to the HTTP status endpoint.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ControlStatus {
    pub status: &'static str,
    pub system_mode: u8,
    pub current_hour: u32,
    pub target_temperature: f64,
    pub flow_temperature: f64,
    pub outdoor_temperature: f64,
    pub power: i64,
    pub active_heating_schedule_index: usize,
    pub hold_active: bool,
    pub hold_expiry: Option<DateTime<Utc>>,
}

/// The single owner of the control state. Everything that can change the state
/// arrives as a [ControlEvent] and is handled one at a time.
pub struct Controller<T: TimeProvider> {
    state: ControlState,
    schedule: HeatingSchedule,
    outdoor_temperatures: OutdoorTemperatureTable,
    model: LinearModel,
    store: Arc<dyn DeviceStateStore>,
    notifications: NotificationBus,
    time_provider: T,
    hold_duration: Duration,
    last_output: Option<ThermalOutput>,
}

impl<T: TimeProvider> Controller<T> {
    pub fn new(
        schedule: HeatingSchedule,
        outdoor_temperatures: OutdoorTemperatureTable,
        model: LinearModel,
        store: Arc<dyn DeviceStateStore>,
        notifications: NotificationBus,
        time_provider: T,
    ) -> Result<Self, ControlFailure> {
        let boot_hour = time_provider.get_local_time().hour();
        let state = ControlState::from_schedule(&schedule, boot_hour, SystemMode::Off)?;
        info!("Starting at hour {} with setpoint {:.1}", boot_hour, state.get_setpoint());

        Ok(Self {
            state,
            schedule,
            outdoor_temperatures,
            model,
            store,
            notifications,
            time_provider,
            hold_duration: Duration::minutes(DEFAULT_HOLD_MINUTES),
            last_output: None,
        })
    }

    pub fn with_initial_mode(mut self, system_mode: SystemMode) -> Self {
        self.state.set_system_mode(system_mode);
        self
    }

    pub fn with_hold_duration(mut self, hold_duration: std::time::Duration) -> Result<Self, ControlFailure> {
        self.hold_duration = Duration::from_std(hold_duration)
            .map_err(|err| control_fail!(format!("Hold duration {:?} out of range: {}", hold_duration, err)))?;
        Ok(self)
    }

    #[cfg(test)]
    pub fn get_state(&self) -> &ControlState {
        &self.state
    }

    /// Publish the boot setpoint and mode, then run the loop once.
    pub async fn start(&mut self) -> Result<(), ControlFailure> {
        let initial = vec![
            (OCCUPIED_HEATING_SETPOINT, to_centi_celsius(self.state.get_setpoint())),
            (SYSTEM_MODE, Value::from(self.state.get_system_mode().attribute_value())),
        ];
        self.write(Endpoint::Thermostat, Cluster::Thermostat, initial).await;
        self.update_system().await
    }

    pub async fn handle(&mut self, event: ControlEvent) -> Result<(), ControlFailure> {
        match event {
            ControlEvent::Tick => self.on_tick().await,
            ControlEvent::SetpointChanged { celsius, source } => self.on_setpoint_changed(celsius, source).await,
            ControlEvent::ModeChanged { mode, source } => self.on_mode_changed(mode, source).await,
            ControlEvent::Reset => self.reset().await,
            ControlEvent::Status(reply) => {
                if reply.send(self.status()).is_err() {
                    debug!("Status requester went away");
                }
                Ok(())
            }
        }
    }

    async fn on_tick(&mut self) -> Result<(), ControlFailure> {
        let hour = self.time_provider.get_local_time().hour();
        self.follow_hour(hour).await
    }

    /// Re-read the wall clock and recompute, whether or not the hour moved.
    async fn reset(&mut self) -> Result<(), ControlFailure> {
        let hour = self.time_provider.get_local_time().hour();
        info!("Reset at hour {}", hour);
        match self.state.advance_to_hour(hour, &self.schedule, self.time_provider.get_utc_time())? {
            HourTransition::SegmentChanged { .. } => self.write_setpoint_change().await,
            HourTransition::Unchanged | HourTransition::SameSegment => {}
        }
        self.update_system().await
    }

    async fn follow_hour(&mut self, hour: u32) -> Result<(), ControlFailure> {
        match self.state.advance_to_hour(hour, &self.schedule, self.time_provider.get_utc_time())? {
            HourTransition::Unchanged => {
                trace!("Still hour {}", hour);
                Ok(())
            }
            // The setpoint stays, but the outdoor temperature has moved on.
            HourTransition::SameSegment => self.update_system().await,
            HourTransition::SegmentChanged { .. } => {
                self.write_setpoint_change().await;
                self.update_system().await
            }
        }
    }

    async fn on_setpoint_changed(&mut self, celsius: f64, source: WriteSource) -> Result<(), ControlFailure> {
        if source == WriteSource::Controller {
            trace!("Ignoring our own setpoint write of {:.2}", celsius);
            return Ok(());
        }
        self.state.apply_manual_setpoint(celsius, self.time_provider.get_utc_time(), self.hold_duration);
        self.write_setpoint_change().await;
        self.update_system().await
    }

    async fn on_mode_changed(&mut self, mode: SystemMode, source: WriteSource) -> Result<(), ControlFailure> {
        if source == WriteSource::Controller {
            trace!("Ignoring our own mode write of {}", mode);
            return Ok(());
        }
        if self.state.set_system_mode(mode) {
            info!("System mode now {}", mode);
        }
        self.update_system().await
    }

    /// Setpoint and change metadata, as the thermostat reports them.
    async fn write_setpoint_change(&self) {
        let mut state: PartialState = vec![(OCCUPIED_HEATING_SETPOINT, to_centi_celsius(self.state.get_setpoint()))];

        if let Some(change) = self.state.get_last_change() {
            state.push((SETPOINT_CHANGE_SOURCE, Value::from(change.get_source().attribute_value())));
            state.push((SETPOINT_CHANGE_AMOUNT, to_centi_celsius(change.get_amount())));
            state.push((SETPOINT_CHANGE_SOURCE_TIMESTAMP, Value::from(matter_epoch_of(change.get_timestamp()))));
        }

        let hold = match self.state.get_hold_expiry() {
            Some(_) => (Value::from(1), Value::from(self.hold_duration.num_minutes())),
            None => (Value::from(0), Value::Null),
        };
        state.push((TEMPERATURE_SETPOINT_HOLD, hold.0));
        state.push((TEMPERATURE_SETPOINT_HOLD_DURATION, hold.1));

        self.write(Endpoint::Thermostat, Cluster::Thermostat, state).await;
    }

    /// Recompute everything derived from the current state and publish it.
    pub async fn update_system(&mut self) -> Result<(), ControlFailure> {
        let hour = self.state.get_current_hour();
        let setpoint = self.state.get_setpoint();
        let system_mode = self.state.get_system_mode();
        let outdoor = self.outdoor_temperatures.temperature_at(hour);
        let indoor = self
            .store
            .read_attribute(Endpoint::Thermostat, Cluster::Thermostat, LOCAL_TEMPERATURE)
            .await
            .as_ref()
            .and_then(from_centi_celsius);

        let output = derive(setpoint, outdoor, indoor, system_mode, &self.model);
        debug!(
            "Hour {}: setpoint {:.2}, outdoor {:.1}, indoor {:?} -> flow {:.2}C at {:.4}L/s, {}mW, demand {}%",
            hour, setpoint, outdoor, indoor, output.flow_temperature, output.flow_rate, output.power, output.heating_demand
        );

        self.write(
            Endpoint::FlowTemperatureSensor,
            Cluster::TemperatureMeasurement,
            vec![(MEASURED_VALUE, to_centi_celsius(output.flow_temperature))],
        )
        .await;
        self.write(Endpoint::HeatPump, Cluster::ElectricalPowerMeasurement, vec![(ACTIVE_POWER, Value::from(output.power))])
            .await;
        self.write(Endpoint::HeatPump, Cluster::FlowMeasurement, vec![(MEASURED_VALUE, Value::from(output.measured_flow))])
            .await;
        self.write(
            Endpoint::Thermostat,
            Cluster::Thermostat,
            vec![
                (PI_HEATING_DEMAND, Value::from(output.heating_demand)),
                (THERMOSTAT_RUNNING_STATE, Value::from(u8::from(output.heating_active))),
                (OUTDOOR_TEMPERATURE, to_centi_celsius(outdoor)),
            ],
        )
        .await;

        self.update_forecast().await;

        self.notifications.publish(SystemUpdate {
            system_mode: system_mode.attribute_value(),
            current_hour: hour,
            target_temperature: setpoint,
            flow_temperature: output.flow_temperature,
            power: output.power,
            active_schedule_index: self.state.get_active_schedule_index(),
        });
        self.last_output = Some(output);
        Ok(())
    }

    async fn update_forecast(&self) {
        let day_start = start_of_local_day(&self.time_provider.get_local_time());
        let forecast = generate_forecast(
            self.state.get_system_mode(),
            self.state.get_current_hour(),
            &self.schedule,
            &self.outdoor_temperatures,
            &self.model,
            day_start,
        );

        let value = match &forecast {
            None => {
                debug!("Heating is off, clearing the forecast");
                Value::Null
            }
            Some(forecast) => match serde_json::to_value(forecast) {
                Ok(value) => {
                    debug!("Forecast has {} slots", forecast.get_slots().len());
                    value
                }
                Err(err) => {
                    warn!("Failed to serialize forecast, clearing it: {}", err);
                    Value::Null
                }
            },
        };
        self.write(Endpoint::HeatPump, Cluster::DeviceEnergyManagement, vec![(FORECAST, value)]).await;
    }

    /// A failed write only costs this pass its output.
    async fn write(&self, endpoint: Endpoint, cluster: Cluster, state: PartialState) {
        if let Err(err) = self.store.write_attributes(endpoint, cluster, state, WriteSource::Controller).await {
            warn!("Failed to write {}/{}: {}", endpoint, cluster, err);
        }
    }

    pub fn status(&self) -> ControlStatus {
        let outdoor_temperature = self.outdoor_temperatures.temperature_at(self.state.get_current_hour());
        let (flow_temperature, power) = match &self.last_output {
            Some(output) => (output.flow_temperature, output.power),
            None => (0.0, 0),
        };
        ControlStatus {
            status: "Running",
            system_mode: self.state.get_system_mode().attribute_value(),
            current_hour: self.state.get_current_hour(),
            target_temperature: self.state.get_setpoint(),
            flow_temperature,
            outdoor_temperature,
            power,
            active_heating_schedule_index: self.state.get_active_schedule_index(),
            hold_active: self.state.is_hold_active(),
            hold_expiry: self.state.get_hold_expiry(),
        }
    }
}
