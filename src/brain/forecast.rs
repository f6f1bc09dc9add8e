use itertools::{Itertools, MinMaxResult};
use serde::{Serialize, Serializer};

use crate::brain::schedule::{HeatingSchedule, DEFAULT_TARGET_TEMPERATURE, HOURS_PER_DAY};
use crate::brain::state::SystemMode;
use crate::brain::thermal::{estimate_flow, predict_power, FlowConstants};
use crate::io::weather::OutdoorTemperatureTable;
use crate::math::model::Model;
use crate::time_util::matter_epoch::to_matter_epoch_seconds;

pub const FORECAST_ID: u32 = 1;
const SECONDS_PER_HOUR: u32 = 60 * 60;
const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// A run of consecutive hours under the same schedule segment. Powers in mW, energy in mWh.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ForecastSlot {
    min_duration: u32,
    max_duration: u32,
    default_duration: u32,
    elapsed_slot_time: u32,
    remaining_slot_time: u32,
    nominal_power: f64,
    min_power: i64,
    max_power: i64,
    nominal_energy: f64,
}

impl ForecastSlot {
    fn from_hourly_powers(powers: &[i64]) -> Option<Self> {
        let (min_power, max_power) = match powers.iter().minmax() {
            MinMaxResult::NoElements => return None,
            MinMaxResult::OneElement(power) => (*power, *power),
            MinMaxResult::MinMax(min, max) => (*min, *max),
        };
        let hours = powers.len();
        let nominal_power = powers.iter().sum::<i64>() as f64 / hours as f64;
        let duration = hours as u32 * SECONDS_PER_HOUR;

        Some(Self {
            min_duration: duration,
            max_duration: duration,
            default_duration: duration,
            elapsed_slot_time: 0,
            remaining_slot_time: duration,
            nominal_power,
            min_power,
            max_power,
            nominal_energy: nominal_power * hours as f64,
        })
    }
}

/// Power forecast for the rest of the local day. Times are held as unix seconds and
/// written out in the Matter epoch.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Forecast {
    forecast_id: u32,
    active_slot_number: u32,
    #[serde(rename = "startTime", serialize_with = "as_matter_epoch")]
    start_epoch: i64,
    #[serde(rename = "endTime", serialize_with = "as_matter_epoch")]
    end_epoch: i64,
    is_pausable: bool,
    slots: Vec<ForecastSlot>,
    forecast_update_reason: u8,
}

impl Forecast {
    pub fn get_slots(&self) -> &[ForecastSlot] {
        &self.slots
    }
}

fn as_matter_epoch<S: Serializer>(unix_seconds: &i64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_i64(to_matter_epoch_seconds(*unix_seconds))
}

/// One slot per run of hours sharing a schedule segment, from `current_hour` to the end of
/// the day. Nothing is forecast while the heating is off.
pub fn generate_forecast(
    system_mode: SystemMode,
    current_hour: u32,
    schedule: &HeatingSchedule,
    outdoor_temperatures: &OutdoorTemperatureTable,
    model: &dyn Model,
    day_start_epoch: i64,
) -> Option<Forecast> {
    if system_mode == SystemMode::Off {
        return None;
    }

    let hourly = (current_hour..HOURS_PER_DAY).map(|hour| {
        let segment = schedule.segment_for_hour(hour);
        let target = segment.map_or(DEFAULT_TARGET_TEMPERATURE, |(_, segment)| segment.get_target_temperature());
        let outdoor = outdoor_temperatures.temperature_at(hour);
        let estimate = estimate_flow(target, outdoor, &FlowConstants::FORECAST);
        let power = predict_power(model, &estimate, outdoor).floor() as i64;
        (segment.map(|(index, _)| index), power)
    });

    let mut slots = Vec::new();
    for (_, run) in &hourly.group_by(|(index, _)| *index) {
        let powers: Vec<i64> = run.map(|(_, power)| power).collect();
        slots.extend(ForecastSlot::from_hourly_powers(&powers));
    }

    Some(Forecast {
        forecast_id: FORECAST_ID,
        active_slot_number: 0,
        start_epoch: day_start_epoch,
        end_epoch: day_start_epoch + SECONDS_PER_DAY - 1,
        is_pausable: false,
        slots,
        forecast_update_reason: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::schedule::ScheduleSegment;
    use crate::math::model::LinearModel;
    use crate::time_util::matter_epoch::MATTER_EPOCH_OFFSET_SECS;

    const DAY_START: i64 = 1_732_752_000;

    fn two_segments() -> HeatingSchedule {
        HeatingSchedule::new(vec![ScheduleSegment::new(0, 6, 16.0), ScheduleSegment::new(7, 23, 21.0)]).unwrap()
    }

    fn durations(forecast: &Forecast) -> Vec<u32> {
        forecast.slots.iter().map(|slot| slot.default_duration).collect()
    }

    #[test]
    fn one_slot_per_segment_run() {
        let forecast = generate_forecast(SystemMode::Heat, 5, &two_segments(), &OutdoorTemperatureTable::empty(), &LinearModel::zero(), DAY_START).unwrap();
        assert_eq!(durations(&forecast), vec![2 * 3600, 17 * 3600]);
    }

    #[test]
    fn default_schedule_from_early_morning() {
        let forecast = generate_forecast(SystemMode::Heat, 5, &HeatingSchedule::default(), &OutdoorTemperatureTable::empty(), &LinearModel::zero(), DAY_START).unwrap();
        assert_eq!(durations(&forecast), vec![2 * 3600, 15 * 3600, 2 * 3600]);
    }

    #[test]
    fn last_hour_of_day() {
        let forecast = generate_forecast(SystemMode::Heat, 23, &HeatingSchedule::default(), &OutdoorTemperatureTable::empty(), &LinearModel::zero(), DAY_START).unwrap();
        assert_eq!(durations(&forecast), vec![3600]);
    }

    #[test]
    fn nothing_while_off() {
        assert_eq!(
            generate_forecast(SystemMode::Off, 5, &HeatingSchedule::default(), &OutdoorTemperatureTable::empty(), &LinearModel::zero(), DAY_START),
            None
        );
    }

    #[test]
    fn slot_power_statistics() {
        // Power follows the outdoor temperature alone: 1kW per degree.
        let model = LinearModel::new(0.0, vec![0.0, 0.0, 1.0]);
        let mut hourly = vec![0.0; 24];
        hourly[5] = 1.0;
        hourly[6] = 3.0;
        let table = OutdoorTemperatureTable::from_hourly(&hourly);

        let forecast = generate_forecast(SystemMode::Heat, 5, &two_segments(), &table, &model, DAY_START).unwrap();
        let slot = &forecast.slots[0];
        assert_eq!(slot.min_power, 1000);
        assert_eq!(slot.max_power, 3000);
        assert_eq!(slot.nominal_power, 2000.0);
        assert_eq!(slot.nominal_energy, 4000.0);
        assert_eq!(forecast.slots[1].max_power, 0);
    }

    #[test]
    fn nominal_power_is_the_exact_mean() {
        let model = LinearModel::new(0.0, vec![0.0, 0.0, 1.0]);
        let mut hourly = vec![0.0; 24];
        hourly[5] = 1.0;
        hourly[6] = 2.0;
        let table = OutdoorTemperatureTable::from_hourly(&hourly);

        let forecast = generate_forecast(SystemMode::Heat, 5, &two_segments(), &table, &model, DAY_START).unwrap();
        assert_eq!(forecast.slots[0].nominal_power, 1500.0);
        assert_eq!(forecast.slots[0].nominal_energy, 3000.0);
    }

    #[test]
    fn covers_the_whole_day() {
        let forecast = generate_forecast(SystemMode::Heat, 0, &HeatingSchedule::default(), &OutdoorTemperatureTable::empty(), &LinearModel::zero(), DAY_START).unwrap();
        assert_eq!(forecast.start_epoch, DAY_START);
        assert_eq!(forecast.end_epoch, DAY_START + 86399);
        assert_eq!(durations(&forecast).iter().sum::<u32>(), 24 * 3600);
    }

    #[test]
    fn serializes_in_matter_epoch() {
        let forecast = generate_forecast(SystemMode::Heat, 23, &HeatingSchedule::default(), &OutdoorTemperatureTable::empty(), &LinearModel::new(1.5, vec![]), DAY_START).unwrap();
        let json = serde_json::to_value(&forecast).unwrap();

        assert_eq!(json["forecastId"], 1);
        assert_eq!(json["activeSlotNumber"], 0);
        assert_eq!(json["startTime"], DAY_START - MATTER_EPOCH_OFFSET_SECS);
        assert_eq!(json["endTime"], DAY_START + 86399 - MATTER_EPOCH_OFFSET_SECS);
        assert_eq!(json["isPausable"], false);
        assert_eq!(json["forecastUpdateReason"], 0);
        assert_eq!(
            json["slots"][0],
            serde_json::json!({
                "minDuration": 3600,
                "maxDuration": 3600,
                "defaultDuration": 3600,
                "elapsedSlotTime": 0,
                "remainingSlotTime": 3600,
                "nominalPower": 1500.0,
                "minPower": 1500,
                "maxPower": 1500,
                "nominalEnergy": 1500.0,
            })
        );
    }
}
