//! Pulse calibration
//!
//! Metering nodes report raw pulses. Four per-node constants returned by the
//! calibration request correct them for the non-linearity of the measurement.

use plugwise_core::constants::PULSES_PER_KW_SECOND;
use serde::{Deserialize, Serialize};

/// Results closer to zero than this are calibration noise
const NOISE_FLOOR: f64 = 0.001;
const SECOND_IN_NANOSECONDS: f64 = 1_000_000_000.0;

/// Calibration constants of one metering node
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Calibration {
    pub gain_a: f64,
    pub gain_b: f64,
    pub off_noise: f64,
    pub off_tot: f64,
}

impl Calibration {
    pub fn new(gain_a: f64, gain_b: f64, off_noise: f64, off_tot: f64) -> Self {
        Self {
            gain_a,
            gain_b,
            off_noise,
            off_tot,
        }
    }

    /// Average power in watts of `pulses` counted over `seconds`
    pub fn power_watts(&self, pulses: f64, seconds: f64) -> f64 {
        pulses_to_kws(pulses, self, seconds) * 1000.0
    }
}

/// Convert a pulse count measured over `seconds` to calibrated energy
///
/// The sign of `pulses` is ignored; the caller knows the direction.
///
/// # Arguments
///
/// * `pulses` - Raw pulse count
/// * `calibration` - Constants of the measuring node
/// * `seconds` - Duration the pulses were counted over
pub fn pulses_to_kws(pulses: f64, calibration: &Calibration, seconds: f64) -> f64 {
    if pulses == 0.0 || seconds <= 0.0 {
        return 0.0;
    }
    let rate = pulses.abs() / seconds + calibration.off_noise;
    let corrected =
        seconds * ((rate * rate * calibration.gain_b)
            + (rate * calibration.gain_a)
            + calibration.off_tot);
    let value = corrected / PULSES_PER_KW_SECOND / seconds;
    if value.abs() < NOISE_FLOOR { 0.0 } else { value }
}

/// Correct a live pulse count for the node's measurement time offset
///
/// A count of -1 is a rounding artefact of a nearly idle node and reads as zero.
///
/// # Arguments
///
/// * `pulses` - Pulse count from a power usage response
/// * `nanosecond_offset` - Deviation of the measurement window from one second
pub fn correct_pulses(pulses: i64, nanosecond_offset: i64) -> f64 {
    match pulses {
        -1 | 0 => 0.0,
        _ if nanosecond_offset == 0 => pulses as f64,
        _ => {
            pulses as f64 * (SECOND_IN_NANOSECONDS + nanosecond_offset as f64)
                / SECOND_IN_NANOSECONDS
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear() -> Calibration {
        Calibration::new(1.0, 0.0, 0.0, 0.0)
    }

    #[test]
    fn test_zero_calibration_and_pulses_is_zero() {
        let zero = Calibration::default();
        assert_eq!(pulses_to_kws(0.0, &zero, 1.0), 0.0);
        assert_eq!(pulses_to_kws(0.0, &zero, 3600.0), 0.0);
        assert_eq!(pulses_to_kws(0.0, &linear(), 8.0), 0.0);
    }

    #[test]
    fn test_linear_calibration() {
        // 4689.385193 pulses in one second with unit gain is ten kilowatt seconds
        let value = pulses_to_kws(4689.385193, &linear(), 1.0);
        assert!((value - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_sign_is_ignored() {
        let cal = Calibration::new(0.98, 0.0001, 0.5, 0.01);
        assert_eq!(pulses_to_kws(-1234.0, &cal, 8.0), pulses_to_kws(1234.0, &cal, 8.0));
    }

    #[test]
    fn test_noise_is_clamped() {
        // one pulse per hour is far below the noise floor
        assert_eq!(pulses_to_kws(1.0, &linear(), 3600.0), 0.0);
        let offset_only = Calibration::new(0.0, 0.0, 0.0, 0.2);
        assert_eq!(pulses_to_kws(5.0, &offset_only, 1.0), 0.0);
    }

    #[test]
    fn test_power_in_watts() {
        let watts = linear().power_watts(PULSES_PER_KW_SECOND * 8.0, 8.0);
        assert!((watts - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn test_correct_pulses() {
        assert_eq!(correct_pulses(-1, 500), 0.0);
        assert_eq!(correct_pulses(0, 500), 0.0);
        assert_eq!(correct_pulses(100, 0), 100.0);
        assert_eq!(correct_pulses(100, 500_000_000), 150.0);
        assert_eq!(correct_pulses(-40, 0), -40.0);
    }
}
