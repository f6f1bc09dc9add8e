use std::fmt::{Display, Formatter};
use std::fs;
use std::path::Path;

use serde::Deserialize;

pub trait Model {
    fn predict(&self, features: &[f64]) -> f64;
}

/// Multiple linear regression, trained offline.
/// Features are (flow temperature, flow rate, outdoor temperature) and the output is in kW.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct LinearModel {
    #[serde(default)]
    intercept: f64,
    #[serde(default, alias = "coef")]
    coefficients: Vec<f64>,
}

impl LinearModel {
    pub fn new(intercept: f64, coefficients: Vec<f64>) -> Self {
        Self {
            intercept,
            coefficients,
        }
    }

    /// Predicts nothing but zero.
    pub fn zero() -> Self {
        Self::new(0.0, vec![])
    }
}

impl Model for LinearModel {
    fn predict(&self, features: &[f64]) -> f64 {
        // Features without a coefficient contribute nothing.
        self.intercept
            + features
                .iter()
                .zip(self.coefficients.iter())
                .map(|(feature, coefficient)| feature * coefficient)
                .sum::<f64>()
    }
}

impl Display for LinearModel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}", self.intercept)?;
        for (i, coefficient) in self.coefficients.iter().enumerate() {
            write!(f, " + {:.4}*x{}", coefficient, i)?;
        }
        Ok(())
    }
}

/// Why the model parameters could not be used.
#[derive(Debug)]
pub struct DegradedModel {
    reason: String,
}

impl DegradedModel {
    fn new(reason: String) -> Self {
        Self { reason }
    }

    /// The model to run with instead: always predicts zero.
    pub fn into_fallback(self) -> LinearModel {
        LinearModel::zero()
    }
}

impl Display for DegradedModel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Degraded to zero model: {}", self.reason)
    }
}

pub fn parse_model(json: &str) -> Result<LinearModel, DegradedModel> {
    let model: LinearModel = serde_json::from_str(json)
        .map_err(|err| DegradedModel::new(format!("Invalid model parameters: {}", err)))?;

    if !model.intercept.is_finite() || model.coefficients.iter().any(|c| !c.is_finite()) {
        return Err(DegradedModel::new(format!("Non-finite model parameters: {}", model)));
    }
    Ok(model)
}

pub fn load_model(path: &Path) -> Result<LinearModel, DegradedModel> {
    let json = fs::read_to_string(path).map_err(|err| {
        DegradedModel::new(format!("Failed to read {}: {}", path.display(), err))
    })?;
    parse_model(&json)
}
