//! Weather-compensated flow estimate and the derived outputs of the heat pump.

use crate::brain::state::SystemMode;
use crate::math::model::Model;

pub const WEATHER_CURVE_OFFSET: f64 = 35.0;
pub const WEATHER_CURVE_SLOPE: f64 = 0.5;
/// Flow-return temperature difference the heat pump runs at.
pub const FLOW_RETURN_DELTA_T: f64 = 5.0;
/// Indoor temperature shortfall that asks for full heating demand.
pub const MAX_DELTA_FOR_FULL_DEMAND: f64 = 5.0;
/// Largest value the flow measurement can report, in 0.1 L/min.
pub const MAX_MEASURED_FLOW: u16 = 65533;

/// The live loop and the forecast disagree on these; both are kept as is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowConstants {
    heat_factor: f64,
    specific_heat: f64,
    absolute_outdoor: bool,
}

impl FlowConstants {
    /// Specific heat in J/kg.K.
    pub const LIVE: FlowConstants = FlowConstants {
        heat_factor: 300.0,
        specific_heat: 4200.0,
        absolute_outdoor: true,
    };

    /// Specific heat in kJ/kg.K.
    pub const FORECAST: FlowConstants = FlowConstants {
        heat_factor: 200.0,
        specific_heat: 4.186,
        absolute_outdoor: false,
    };
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowEstimate {
    /// Degrees Celsius
    pub flow_temperature: f64,
    /// Litres per second
    pub flow_rate: f64,
}

pub fn estimate_flow(setpoint: f64, outdoor_temperature: f64, constants: &FlowConstants) -> FlowEstimate {
    let heat_required = (setpoint - outdoor_temperature) * constants.heat_factor;

    let curve = outdoor_temperature * WEATHER_CURVE_SLOPE;
    let curve = if constants.absolute_outdoor { curve.abs() } else { curve };

    FlowEstimate {
        flow_temperature: curve + WEATHER_CURVE_OFFSET,
        flow_rate: heat_required / (constants.specific_heat * FLOW_RETURN_DELTA_T),
    }
}

/// Electrical power in mW.
pub fn predict_power(model: &dyn Model, estimate: &FlowEstimate, outdoor_temperature: f64) -> f64 {
    model.predict(&[estimate.flow_temperature, estimate.flow_rate, outdoor_temperature]) * 1000.0
}

/// Percentage of heating the indoor shortfall asks for. Zero without an indoor reading.
pub fn heating_demand(setpoint: f64, indoor_temperature: Option<f64>) -> u8 {
    match indoor_temperature {
        None => 0,
        Some(indoor) => {
            let demand = ((setpoint - indoor) / MAX_DELTA_FOR_FULL_DEMAND * 100.0).round();
            demand.clamp(0.0, 100.0) as u8
        }
    }
}

/// Flow in 0.1 L/min, or zero while not heating.
pub fn measured_flow(flow_rate: f64, heating_active: bool) -> u16 {
    if !heating_active {
        return 0;
    }
    (flow_rate * 60.0 * 10.0).round().clamp(0.0, f64::from(MAX_MEASURED_FLOW)) as u16
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThermalOutput {
    pub flow_temperature: f64,
    pub flow_rate: f64,
    /// mW, rounded down
    pub power: i64,
    pub heating_demand: u8,
    pub heating_active: bool,
    pub measured_flow: u16,
}

/// Everything the live loop reports for one setpoint/outdoor/indoor combination.
pub fn derive(setpoint: f64, outdoor_temperature: f64, indoor_temperature: Option<f64>, mode: SystemMode, model: &dyn Model) -> ThermalOutput {
    let estimate = estimate_flow(setpoint, outdoor_temperature, &FlowConstants::LIVE);
    let heating_demand = heating_demand(setpoint, indoor_temperature);
    let heating_active = mode == SystemMode::Heat && heating_demand > 0;

    let power = predict_power(model, &estimate, outdoor_temperature);
    let power = match mode {
        SystemMode::Heat => power,
        SystemMode::Off => power * f64::from(heating_demand) / 100.0,
    };

    ThermalOutput {
        flow_temperature: estimate.flow_temperature,
        flow_rate: estimate.flow_rate,
        power: power.floor() as i64,
        heating_demand,
        heating_active,
        measured_flow: measured_flow(estimate.flow_rate, heating_active),
    }
}
