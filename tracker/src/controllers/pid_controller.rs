//! Two-axis PID controller with a quadratic proportional term.
//!
//! # Operation
//! 1. Create the controller with gains and a setpoint (normally the frame center)
//! 2. Call `velocity()` once per frame with the measured object position
//! 3. Call `reset()` on tracking start, stop and reacquisition
//!
//! # Units
//! - Input: object position in pixels
//! - Output: stage velocity in controller units, truncated toward zero

use serde::{Deserialize, Serialize};

/// Error at which the proportional term equals `Kp * 50`.
const ERROR_SCALE: f64 = 50.0;

/// Per-axis gains.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: 10.0,
            ki: 0.0,
            kd: 0.0,
        }
    }
}

/// Single-axis loop
#[derive(Debug, Clone)]
struct AxisPid {
    gains: PidGains,
    setpoint: f64,
    /// Error from the previous call
    error: f64,
    /// Exponential moving average of the error
    integral: f64,
}

impl AxisPid {
    fn new(gains: PidGains, setpoint: f64) -> Self {
        Self {
            gains,
            setpoint,
            error: 0.0,
            integral: 0.0,
        }
    }

    fn reset(&mut self) {
        self.error = 0.0;
        self.integral = 0.0;
    }

    /// A missing or NaN measurement counts as sitting on the setpoint's origin,
    /// i.e. the error is the setpoint itself.
    fn update(&mut self, measurement: Option<f64>) -> f64 {
        let error = match measurement {
            Some(m) if !m.is_nan() => self.setpoint - m,
            _ => self.setpoint,
        };

        self.integral = 0.1 * error + 0.9 * self.integral;
        let derivative = error - self.error;
        self.error = error;

        let proportional = error.signum() * (error / ERROR_SCALE).powi(2) * ERROR_SCALE;

        self.gains.kp * proportional + self.gains.ki * self.integral + self.gains.kd * derivative
    }
}

/// Independent Y and X loops.
///
/// Axis contract: [`PidController::velocity`] returns `(vy, vx)` where `vy`
/// is negated relative to the raw loop output. Image rows grow downward while
/// the stage Y axis grows upward, so the negation maps image error to stage
/// motion. Callers that want the raw loop output use [`PidController::raw_velocity`].
#[derive(Debug, Clone)]
pub struct PidController {
    y: AxisPid,
    x: AxisPid,
}

impl PidController {
    /// `setpoint` is `(y, x)` in pixels.
    pub fn new(y_gains: PidGains, x_gains: PidGains, setpoint: (f64, f64)) -> Self {
        Self {
            y: AxisPid::new(y_gains, setpoint.0),
            x: AxisPid::new(x_gains, setpoint.1),
        }
    }

    pub fn setpoint(&self) -> (f64, f64) {
        (self.y.setpoint, self.x.setpoint)
    }

    /// Move the setpoint without touching error or integral memory.
    pub fn set_setpoint(&mut self, setpoint: (f64, f64)) {
        self.y.setpoint = setpoint.0;
        self.x.setpoint = setpoint.1;
    }

    /// Zero error and integral memory on both axes.
    pub fn reset(&mut self) {
        self.y.reset();
        self.x.reset();
    }

    /// Raw loop outputs `(Vy, Vx)` before sign mapping and truncation.
    pub fn raw_velocity(&mut self, y: Option<f64>, x: Option<f64>) -> (f64, f64) {
        (self.y.update(y), self.x.update(x))
    }

    /// Stage velocities `(-Vy, Vx)`, each truncated toward zero.
    pub fn velocity(&mut self, y: Option<f64>, x: Option<f64>) -> (i32, i32) {
        let (vy, vx) = self.raw_velocity(y, x);
        ((-vy) as i32, vx as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn p_only() -> PidController {
        PidController::new(PidGains::default(), PidGains::default(), (256.0, 256.0))
    }

    #[test]
    fn test_quadratic_proportional_term() {
        let mut pid = p_only();
        // error = 256 - 306 = -50 -> 10 * -1 * 1 * 50
        let (_, vx) = pid.raw_velocity(Some(256.0), Some(306.0));
        assert_relative_eq!(vx, -500.0);
    }

    #[test]
    fn test_reproducible_from_reset() {
        let mut pid = p_only();
        let first = pid.velocity(Some(306.0), Some(306.0));
        pid.velocity(Some(10.0), Some(400.0));
        pid.reset();
        assert_eq!(pid.velocity(Some(306.0), Some(306.0)), first);
        assert_eq!(first, (500, -500));
    }

    #[test]
    fn test_soft_near_setpoint() {
        let mut pid = p_only();
        // error 5 -> 10 * (0.1)^2 * 50 = 5
        let (_, vx) = pid.raw_velocity(None, Some(251.0));
        assert_relative_eq!(vx, 5.0, epsilon = 1e-9);
        // error 100 -> 10 * 4 * 50 = 2000
        let (_, vx) = pid.raw_velocity(None, Some(156.0));
        assert_relative_eq!(vx, 2000.0, epsilon = 1e-9);
    }

    #[test]
    fn test_setpoint_move_keeps_integral() {
        let gains = PidGains {
            kp: 0.0,
            ki: 1.0,
            kd: 0.0,
        };
        let mut pid = PidController::new(gains, gains, (100.0, 100.0));
        pid.raw_velocity(Some(80.0), Some(80.0));
        pid.set_setpoint((50.0, 50.0));
        assert_eq!(pid.setpoint(), (50.0, 50.0));
        // 0.1 * (50 - 50) + 0.9 * 2.0
        let (vy, vx) = pid.raw_velocity(Some(50.0), Some(50.0));
        assert_relative_eq!(vy, 1.8, epsilon = 1e-12);
        assert_relative_eq!(vx, 1.8, epsilon = 1e-12);
    }

    #[test]
    fn test_missing_measurement_uses_setpoint_as_error() {
        let mut pid = PidController::new(
            PidGains {
                kp: 0.0,
                ki: 1.0,
                kd: 0.0,
            },
            PidGains {
                kp: 0.0,
                ki: 1.0,
                kd: 0.0,
            },
            (100.0, 100.0),
        );
        let (vy, vx) = pid.raw_velocity(None, Some(f64::NAN));
        assert_relative_eq!(vy, 10.0);
        assert_relative_eq!(vx, 10.0);
        assert!(vx.is_finite());
    }

    #[test]
    fn test_integral_is_bounded_average() {
        let gains = PidGains {
            kp: 0.0,
            ki: 1.0,
            kd: 0.0,
        };
        let mut pid = PidController::new(gains, gains, (0.0, 0.0));
        let mut last = 0.0;
        for _ in 0..500 {
            last = pid.raw_velocity(Some(-20.0), Some(-20.0)).1;
        }
        // Converges to the error itself instead of growing without bound
        assert_relative_eq!(last, 20.0, epsilon = 1e-6);
    }

    #[test]
    fn test_derivative_uses_previous_error() {
        let gains = PidGains {
            kp: 0.0,
            ki: 0.0,
            kd: 1.0,
        };
        let mut pid = PidController::new(gains, gains, (0.0, 0.0));
        assert_relative_eq!(pid.raw_velocity(None, Some(-10.0)).1, 10.0);
        assert_relative_eq!(pid.raw_velocity(None, Some(-15.0)).1, 5.0);
        assert_relative_eq!(pid.raw_velocity(None, Some(-15.0)).1, 0.0);
    }

    #[test]
    fn test_truncates_toward_zero() {
        let mut pid = p_only();
        // error 7 -> 10 * 0.0196 * 50 = 9.8
        let (vy, vx) = pid.velocity(Some(249.0), Some(249.0));
        assert_eq!(vx, 9);
        assert_eq!(vy, -9);
    }
}
