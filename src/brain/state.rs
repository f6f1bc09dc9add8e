use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::brain::schedule::HeatingSchedule;
use crate::brain::ControlFailure;
use crate::control_fail;

/// Operating mode of the thermostat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SystemMode {
    Off,
    Heat,
}

impl SystemMode {
    /// Value of the thermostat `systemMode` attribute.
    pub fn attribute_value(&self) -> u8 {
        match self {
            SystemMode::Off => 0,
            SystemMode::Heat => 4,
        }
    }

    pub fn from_attribute_value(value: i64) -> Option<Self> {
        match value {
            0 => Some(SystemMode::Off),
            4 => Some(SystemMode::Heat),
            _ => None,
        }
    }
}

/// Who caused the latest setpoint change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
pub enum SetpointSource {
    Manual,
    Schedule,
}

impl SetpointSource {
    /// Value of the thermostat `setpointChangeSource` attribute.
    pub fn attribute_value(&self) -> u8 {
        match self {
            SetpointSource::Manual => 0,
            SetpointSource::Schedule => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetpointChange {
    source: SetpointSource,
    amount: f64,
    timestamp: DateTime<Utc>,
}

impl SetpointChange {
    pub fn get_source(&self) -> SetpointSource {
        self.source
    }

    /// Degrees Celsius, new minus old.
    pub fn get_amount(&self) -> f64 {
        self.amount
    }

    pub fn get_timestamp(&self) -> &DateTime<Utc> {
        &self.timestamp
    }
}

/// Where the authoritative setpoint currently comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum OverrideState {
    Scheduled,
    /// A manual setpoint. The expiry is surfaced but not enforced: the hold ends
    /// at the next schedule segment change.
    ManualHold { expiry: DateTime<Utc> },
}

#[derive(Debug, PartialEq)]
pub enum HourTransition {
    /// Still the same hour.
    Unchanged,
    /// A new hour within the active segment.
    SameSegment,
    /// A new segment took over and its target replaced the setpoint.
    SegmentChanged { target_temperature: f64 },
}

/// Everything the control loop recomputes from.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlState {
    current_hour: u32,
    active_schedule_index: usize,
    system_mode: SystemMode,
    setpoint: f64,
    previous_setpoint: f64,
    override_state: OverrideState,
    last_change: Option<SetpointChange>,
}

impl ControlState {
    /// Start following whatever segment is in force at the boot hour.
    pub fn from_schedule(schedule: &HeatingSchedule, hour: u32, system_mode: SystemMode) -> Result<Self, ControlFailure> {
        let (index, segment) = schedule
            .segment_for_hour(hour)
            .ok_or_else(|| control_fail!(format!("No schedule segment for boot hour {}", hour)))?;

        Ok(Self {
            current_hour: hour,
            active_schedule_index: index,
            system_mode,
            setpoint: segment.get_target_temperature(),
            previous_setpoint: segment.get_target_temperature(),
            override_state: OverrideState::Scheduled,
            last_change: None,
        })
    }

    pub fn get_current_hour(&self) -> u32 {
        self.current_hour
    }

    pub fn get_active_schedule_index(&self) -> usize {
        self.active_schedule_index
    }

    pub fn get_system_mode(&self) -> SystemMode {
        self.system_mode
    }

    pub fn get_setpoint(&self) -> f64 {
        self.setpoint
    }

    pub fn is_hold_active(&self) -> bool {
        matches!(self.override_state, OverrideState::ManualHold { .. })
    }

    pub fn get_hold_expiry(&self) -> Option<DateTime<Utc>> {
        match self.override_state {
            OverrideState::Scheduled => None,
            OverrideState::ManualHold { expiry } => Some(expiry),
        }
    }

    pub fn get_last_change(&self) -> Option<&SetpointChange> {
        self.last_change.as_ref()
    }

    /// Move to the given wall-clock hour. Only a change of schedule segment touches the setpoint.
    pub fn advance_to_hour(&mut self, hour: u32, schedule: &HeatingSchedule, now: DateTime<Utc>) -> Result<HourTransition, ControlFailure> {
        if hour == self.current_hour {
            return Ok(HourTransition::Unchanged);
        }

        let (index, segment) = schedule
            .segment_for_hour(hour)
            .ok_or_else(|| control_fail!(format!("No schedule segment for hour {}", hour)))?;
        self.current_hour = hour;

        if index == self.active_schedule_index {
            debug!("Hour {} is still within schedule segment {}", hour, index);
            return Ok(HourTransition::SameSegment);
        }

        let target_temperature = segment.get_target_temperature();
        info!("Schedule segment {} ({}) now active, setpoint {:.1} -> {:.1}", index, segment, self.setpoint, target_temperature);
        if let OverrideState::ManualHold { expiry } = self.override_state {
            info!("Ending manual hold (expiry was {})", expiry);
        }

        self.last_change = Some(SetpointChange {
            source: SetpointSource::Schedule,
            amount: target_temperature - self.setpoint,
            timestamp: now,
        });
        self.active_schedule_index = index;
        self.setpoint = target_temperature;
        self.previous_setpoint = target_temperature;
        self.override_state = OverrideState::Scheduled;

        Ok(HourTransition::SegmentChanged { target_temperature })
    }

    /// Someone other than the controller changed the setpoint: hold it.
    pub fn apply_manual_setpoint(&mut self, setpoint: f64, now: DateTime<Utc>, hold_duration: Duration) -> &SetpointChange {
        let amount = setpoint - self.previous_setpoint;
        let expiry = now + hold_duration;
        info!("Manual setpoint {:.2} ({:+.2}), holding until {}", setpoint, amount, expiry);

        self.previous_setpoint = setpoint;
        self.setpoint = setpoint;
        self.override_state = OverrideState::ManualHold { expiry };
        self.last_change.insert(SetpointChange {
            source: SetpointSource::Manual,
            amount,
            timestamp: now,
        })
    }

    /// Returns whether the mode actually changed. The hold is left alone.
    pub fn set_system_mode(&mut self, system_mode: SystemMode) -> bool {
        let changed = self.system_mode != system_mode;
        self.system_mode = system_mode;
        changed
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use chrono::TimeZone;

    use super::*;
    use crate::brain::schedule::ScheduleSegment;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 11, 28, 12, 0, 0).unwrap()
    }

    fn state_at(hour: u32) -> ControlState {
        ControlState::from_schedule(&HeatingSchedule::default(), hour, SystemMode::Heat).unwrap()
    }

    #[test]
    fn boots_from_matching_segment() {
        let state = state_at(5);
        assert_eq!(state.get_active_schedule_index(), 0);
        assert_eq!(state.get_setpoint(), 16.0);
        assert!(!state.is_hold_active());
        assert_eq!(state.get_hold_expiry(), None);
    }

    #[test]
    fn manual_setpoint_starts_hold() {
        let mut state = state_at(10);
        let change = state.apply_manual_setpoint(22.5, now(), Duration::minutes(30)).clone();
        assert_eq!(change.get_source(), SetpointSource::Manual);
        assert_eq!(change.get_amount(), 1.5);
        assert_eq!(change.get_timestamp(), &now());
        assert!(state.is_hold_active());
        assert_eq!(state.get_hold_expiry(), Some(now() + Duration::seconds(1800)));
        assert_eq!(state.get_setpoint(), 22.5);

        // The next change is relative to the held value.
        let change = state.apply_manual_setpoint(20.0, now(), Duration::minutes(30));
        assert_eq!(change.get_amount(), -2.5);
    }

    #[test]
    fn same_hour_is_unchanged() {
        let mut state = state_at(10);
        let before = state.clone();
        assert_eq!(state.advance_to_hour(10, &HeatingSchedule::default(), now()).unwrap(), HourTransition::Unchanged);
        assert_eq!(state, before);
    }

    #[test]
    fn same_segment_keeps_hold_and_setpoint() {
        let mut state = state_at(10);
        state.apply_manual_setpoint(23.0, now(), Duration::minutes(30));
        let transition = state.advance_to_hour(11, &HeatingSchedule::default(), now()).unwrap();
        assert_eq!(transition, HourTransition::SameSegment);
        assert_eq!(state.get_current_hour(), 11);
        assert_eq!(state.get_setpoint(), 23.0);
        assert!(state.is_hold_active());
        assert_eq!(state.get_last_change().unwrap().get_source(), SetpointSource::Manual);
    }

    #[test]
    fn segment_change_ends_hold() {
        let mut state = state_at(21);
        state.apply_manual_setpoint(23.0, now(), Duration::minutes(30));
        let transition = state.advance_to_hour(22, &HeatingSchedule::default(), now()).unwrap();
        assert_eq!(transition, HourTransition::SegmentChanged { target_temperature: 16.0 });
        assert_eq!(state.get_active_schedule_index(), 2);
        assert_eq!(state.get_setpoint(), 16.0);
        assert_eq!(state.override_state, OverrideState::Scheduled);
        let change = state.get_last_change().unwrap();
        assert_eq!(change.get_source(), SetpointSource::Schedule);
        assert_eq!(change.get_amount(), -7.0);
    }

    #[test]
    fn unknown_hour_fails() {
        let schedule = HeatingSchedule::default();
        let mut state = state_at(10);
        assert!(state.advance_to_hour(30, &schedule, now()).is_err());
        assert_eq!(state.get_current_hour(), 10);

        let partial = HeatingSchedule::new(vec![ScheduleSegment::new(0, 23, 18.0)]).unwrap();
        assert!(ControlState::from_schedule(&partial, 24, SystemMode::Off).is_err());
    }

    #[test]
    fn mode_change_leaves_hold() {
        let mut state = state_at(10);
        state.apply_manual_setpoint(23.0, now(), Duration::minutes(30));
        assert!(state.set_system_mode(SystemMode::Off));
        assert!(!state.set_system_mode(SystemMode::Off));
        assert!(state.is_hold_active());
    }

    #[test]
    fn mode_attribute_values() {
        assert_eq!(SystemMode::from_attribute_value(4), Some(SystemMode::Heat));
        assert_eq!(SystemMode::from_attribute_value(0), Some(SystemMode::Off));
        assert_eq!(SystemMode::from_attribute_value(3), None);
        assert_eq!(SystemMode::from_str("HEAT").unwrap(), SystemMode::Heat);
        assert_eq!(SystemMode::Off.to_string(), "off");
    }
}
