//! K-type Thermocouple Conversion
//!
//! Converts multimeter millivolt readings into Celsius using the NIST ITS-90
//! type-K reference function, with cold-junction compensation:
//! - Forward: °C → mV (reference polynomials)
//! - Inverse: mV → °C (bisection over the forward function)
//! - Classification against the instrument's usable span (−200 °C … 1372 °C)

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lowest temperature reported as a valid reading
pub const MIN_VALID_C: f64 = -200.0;

/// Highest temperature of the type-K reference function
pub const MAX_VALID_C: f64 = 1372.0;

/// Lowest temperature of the type-K reference function
const MIN_REFERENCE_C: f64 = -270.0;

/// Bisection iterations; 64 halvings of the 1642 °C span is far below f64 resolution
const BISECTION_STEPS: usize = 64;

/// ITS-90 type-K coefficients, −270 °C to 0 °C
const NEGATIVE_COEFFS: [f64; 11] = [
    0.0,
    0.394501280250E-01,
    0.236223735980E-04,
    -0.328589067840E-06,
    -0.499048287770E-08,
    -0.675090591730E-10,
    -0.574103274280E-12,
    -0.310888728940E-14,
    -0.104516093650E-16,
    -0.198892668780E-19,
    -0.163226974860E-22,
];

/// ITS-90 type-K coefficients, 0 °C to 1372 °C
const POSITIVE_COEFFS: [f64; 10] = [
    -0.176004136860E-01,
    0.389212049750E-01,
    0.185587700320E-04,
    -0.994575928740E-07,
    0.318409457190E-09,
    -0.560728448890E-12,
    0.560750590590E-15,
    -0.320207200030E-18,
    0.971511471520E-22,
    -0.121047212750E-25,
];

/// Exponential correction term for the positive range: a0 * exp(a1 * (t - a2)^2)
const EXP_A0: f64 = 0.118597600000E+00;
const EXP_A1: f64 = -0.118343200000E-03;
const EXP_A2: f64 = 0.126968600000E+03;

/// Classification of a converted temperature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureStatus {
    /// Inside the thermocouple's usable span
    Valid,
    /// Below −200 °C
    Underrange,
    /// Above 1372 °C
    Overrange,
    /// No usable number (non-finite input)
    Invalid,
}

/// A Celsius value tagged with its validity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Temperature {
    /// Temperature in degrees Celsius
    pub celsius: f64,
    /// Validity classification
    pub status: TemperatureStatus,
}

impl Temperature {
    /// Create a `Valid` temperature
    pub fn valid(celsius: f64) -> Self {
        Self {
            celsius,
            status: TemperatureStatus::Valid,
        }
    }

    /// Create an `Invalid` temperature (NaN value)
    pub fn invalid() -> Self {
        Self {
            celsius: f64::NAN,
            status: TemperatureStatus::Invalid,
        }
    }

    /// True when the status is `Valid` and the value is finite
    pub fn is_valid(&self) -> bool {
        self.status == TemperatureStatus::Valid && self.celsius.is_finite()
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            TemperatureStatus::Valid => write!(f, "{:.1}", self.celsius),
            TemperatureStatus::Underrange => f.write_str("UNDER"),
            TemperatureStatus::Overrange => f.write_str("OVER"),
            TemperatureStatus::Invalid => f.write_str("----"),
        }
    }
}

fn polynomial(coeffs: &[f64], t: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, c| acc * t + c)
}

/// Type-K reference EMF in millivolts for a junction at `celsius`
/// (cold junction at 0 °C)
///
/// Inputs outside −270 °C … 1372 °C are evaluated on the nearest polynomial
/// and are only meaningful for range checks.
pub fn celsius_to_millivolts(celsius: f64) -> f64 {
    if celsius < 0.0 {
        polynomial(&NEGATIVE_COEFFS, celsius)
    } else {
        let d = celsius - EXP_A2;
        polynomial(&POSITIVE_COEFFS, celsius) + EXP_A0 * (EXP_A1 * d * d).exp()
    }
}

/// Temperature whose reference EMF equals `millivolts` (cold junction at 0 °C)
///
/// The reference function is strictly increasing, so a fixed-step bisection
/// is monotonic in its input. Results are clamped to −270 °C … 1372 °C.
pub fn millivolts_to_celsius(millivolts: f64) -> f64 {
    let mut lo = MIN_REFERENCE_C;
    let mut hi = MAX_VALID_C;
    for _ in 0..BISECTION_STEPS {
        let mid = 0.5 * (lo + hi);
        if celsius_to_millivolts(mid) > millivolts {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    0.5 * (lo + hi)
}

/// Convert a thermocouple reading to a compensated, classified temperature
///
/// # Arguments
/// * `millivolts` - Thermocouple EMF measured at the instrument terminals
/// * `cold_junction_c` - Temperature of the reference (cold) junction
///
/// # Returns
/// The hot-junction temperature. Non-finite inputs give `Invalid`; EMFs
/// beyond the reference function's −200 °C / 1372 °C points give
/// `Underrange` / `Overrange` (the value is still the clamped estimate).
pub fn convert(millivolts: f64, cold_junction_c: f64) -> Temperature {
    if !millivolts.is_finite() || !cold_junction_c.is_finite() {
        return Temperature::invalid();
    }

    let total = millivolts + celsius_to_millivolts(cold_junction_c);
    let celsius = millivolts_to_celsius(total);

    let status = if total < celsius_to_millivolts(MIN_VALID_C) {
        TemperatureStatus::Underrange
    } else if total > celsius_to_millivolts(MAX_VALID_C) {
        TemperatureStatus::Overrange
    } else {
        TemperatureStatus::Valid
    };

    Temperature { celsius, status }
}
