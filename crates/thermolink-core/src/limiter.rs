//! Delta limiter
//!
//! Rejects single-sample glitches (a desynced prompt parsed as a voltage, a
//! loose probe) by replacing implausible jumps with a bounded step away from
//! the last accepted reading. The replacement magnitude is randomized in
//! whole steps so a run of corrections does not draw a flat line.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::CalibrationContext;
use crate::thermocouple::Temperature;

/// Limit `candidate` to within `threshold` of `reference`
///
/// # Arguments
/// * `reference` - Last accepted temperature
/// * `candidate` - Newly converted temperature
/// * `threshold` - Largest accepted jump in °C
/// * `step` - Granularity of the synthesized replacement in °C
/// * `rng` - Randomness source for the replacement magnitude
///
/// # Returns
/// `candidate` unchanged when either value is not a valid finite reading or
/// the jump is within `threshold`. Otherwise a value on the candidate's side
/// of `reference`, offset by a random multiple of `step` in
/// `[step, threshold]` (never more than `threshold`).
pub fn limit<R: Rng>(
    reference: Temperature,
    candidate: Temperature,
    threshold: f64,
    step: f64,
    rng: &mut R,
) -> Temperature {
    if !reference.is_valid() || !candidate.is_valid() {
        return candidate;
    }

    let delta = (reference.celsius - candidate.celsius).abs();
    if delta <= threshold {
        return candidate;
    }

    let steps = if step > 0.0 {
        ((threshold / step).round() as u32).max(1)
    } else {
        1
    };
    let multiple = rng.gen_range(1..=steps) as f64;
    let offset = (multiple * step.max(0.0)).min(threshold);

    let celsius = if candidate.celsius >= reference.celsius {
        reference.celsius + offset
    } else {
        reference.celsius - offset
    };

    Temperature {
        celsius,
        status: candidate.status,
    }
}

/// Limiter settings bundled with their randomness source
pub struct DeltaLimiter {
    enabled: bool,
    threshold: f64,
    step: f64,
    rng: StdRng,
}

impl DeltaLimiter {
    /// Create a limiter from calibration settings
    ///
    /// Uses the configured seed when present, otherwise OS entropy.
    pub fn new(calibration: &CalibrationContext) -> Self {
        let rng = match calibration.limiter.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            enabled: calibration.limiter.enabled,
            threshold: calibration.limiter.threshold_c,
            step: calibration.limiter.step_c,
            rng,
        }
    }

    /// Create a limiter with a fixed seed (deterministic output)
    pub fn seeded(threshold: f64, step: f64, seed: u64) -> Self {
        Self {
            enabled: true,
            threshold,
            step,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Whether limiting is active
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Accepted jump in °C
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Apply the limiter against an optional reference
    ///
    /// With no reference yet (first reading) or limiting disabled the
    /// candidate is returned unchanged.
    pub fn apply(&mut self, reference: Option<Temperature>, candidate: Temperature) -> Temperature {
        match reference {
            Some(reference) if self.enabled => {
                limit(reference, candidate, self.threshold, self.step, &mut self.rng)
            }
            _ => candidate,
        }
    }
}
