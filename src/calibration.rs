//! Polynomial correction of raw measurements.

use core::fmt;

use strum::EnumCount;
use thiserror::Error;

use crate::device::Quantity;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("A calibration polynomial needs at least one coefficient")]
    Empty,
    #[error("Calibration coefficient {index} is not finite: {value}")]
    NotFinite { index: usize, value: f64 },
}

/// Polynomial with coefficients ordered from the highest power down to the constant term.
///
/// `[2.0, 0.5]` maps `x` to `2x + 0.5`.
#[derive(Debug, Clone, PartialEq)]
pub struct Polynomial {
    coefficients: Vec<f64>,
}

impl Polynomial {
    pub fn new(coefficients: impl Into<Vec<f64>>) -> Result<Self, CalibrationError> {
        let coefficients = coefficients.into();
        if coefficients.is_empty() {
            return Err(CalibrationError::Empty);
        }
        if let Some((index, value)) = coefficients
            .iter()
            .enumerate()
            .find(|(_, value)| !value.is_finite())
        {
            return Err(CalibrationError::NotFinite {
                index,
                value: *value,
            });
        }
        Ok(Self { coefficients })
    }

    /// Maps every value onto itself.
    pub fn identity() -> Self {
        Self::linear(1.0, 0.0)
    }

    pub fn linear(gain: f64, offset: f64) -> Self {
        Self {
            coefficients: vec![gain, offset],
        }
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn evaluate(&self, x: f64) -> f64 {
        // Horner's scheme
        self.coefficients
            .iter()
            .fold(0.0, |acc, coefficient| acc * x + coefficient)
    }
}

impl Default for Polynomial {
    fn default() -> Self {
        Self::identity()
    }
}

impl fmt::Display for Polynomial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let degree = self.coefficients.len() - 1;
        for (i, coefficient) in self.coefficients.iter().enumerate() {
            if i > 0 {
                f.write_str(" + ")?;
            }
            match degree - i {
                0 => write!(f, "{coefficient}")?,
                1 => write!(f, "{coefficient}x")?,
                power => write!(f, "{coefficient}x^{power}")?,
            }
        }
        Ok(())
    }
}

/// One optional polynomial per measured quantity. Quantities without one are passed through.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Calibrations {
    polynomials: [Option<Polynomial>; Quantity::COUNT],
}

impl Calibrations {
    pub fn set(&mut self, quantity: Quantity, polynomial: Polynomial) {
        self.polynomials[quantity as usize] = Some(polynomial);
    }

    pub fn with(mut self, quantity: Quantity, polynomial: Polynomial) -> Self {
        self.set(quantity, polynomial);
        self
    }

    pub fn get(&self, quantity: Quantity) -> Option<&Polynomial> {
        self.polynomials[quantity as usize].as_ref()
    }

    pub fn remove(&mut self, quantity: Quantity) -> Option<Polynomial> {
        self.polynomials[quantity as usize].take()
    }

    /// Correct a raw reading of `quantity`.
    pub fn apply(&self, quantity: Quantity, raw: f64) -> f64 {
        self.get(quantity)
            .map_or(raw, |polynomial| polynomial.evaluate(raw))
    }
}
