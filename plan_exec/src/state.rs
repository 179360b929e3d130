//! # Vehicle State
//!
//! A time-stamped kinematic state of the vehicle in the local planning frame.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use util::maths::{get_ang_dist_2pi, mod_2pi};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Maximum distance between two co-located states.
pub const CO_LOCATION_TOLERANCE_M: f64 = 0.1;

/// Maximum heading difference between two co-located states.
pub const CO_LOCATION_TOLERANCE_RAD: f64 = 0.05;

/// Maximum time difference between two co-located states.
pub const CO_LOCATION_TOLERANCE_S: f64 = 0.01;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Position, heading, speed and time of the vehicle.
///
/// Heading is the angle to the +ve x axis of the planning frame, counter-clockwise, in radians.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct State {
    pub x_m: f64,
    pub y_m: f64,
    pub heading_rad: f64,
    pub speed_ms: f64,
    pub time_s: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl State {
    pub fn new(x_m: f64, y_m: f64, heading_rad: f64, speed_ms: f64, time_s: f64) -> Self {
        Self {
            x_m,
            y_m,
            heading_rad,
            speed_ms,
            time_s,
        }
    }

    pub fn position_m(&self) -> Vector2<f64> {
        Vector2::new(self.x_m, self.y_m)
    }

    /// Extrapolate the state forward by `dt_s` assuming constant velocity.
    pub fn push(&self, dt_s: f64) -> Self {
        let dist_m = self.speed_ms * dt_s;
        Self {
            x_m: self.x_m + dist_m * self.heading_rad.cos(),
            y_m: self.y_m + dist_m * self.heading_rad.sin(),
            time_s: self.time_s + dt_s,
            ..*self
        }
    }

    pub fn distance_to(&self, other: &State) -> f64 {
        (other.position_m() - self.position_m()).norm()
    }

    /// Heading from this state's position towards the other's.
    pub fn heading_to(&self, other: &State) -> f64 {
        mod_2pi((other.y_m - self.y_m).atan2(other.x_m - self.x_m))
    }

    /// Unsigned smallest angle between the two headings.
    pub fn heading_difference(&self, other: &State) -> f64 {
        get_ang_dist_2pi(mod_2pi(self.heading_rad), mod_2pi(other.heading_rad)).abs()
    }

    /// Returns true if both states describe the same vehicle configuration at the same time,
    /// within tolerance.
    pub fn is_co_located(&self, other: &State) -> bool {
        self.distance_to(other) <= CO_LOCATION_TOLERANCE_M
            && self.heading_difference(other) <= CO_LOCATION_TOLERANCE_RAD
            && (self.time_s - other.time_s).abs() <= CO_LOCATION_TOLERANCE_S
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({:.2}, {:.2}) head {:.3} rad, {:.2} m/s @ {:.3} s",
            self.x_m, self.y_m, self.heading_rad, self.speed_ms, self.time_s
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn test_push() {
        let s = State::new(1.0, 2.0, FRAC_PI_2, 2.0, 10.0).push(1.5);

        assert_relative_eq!(s.x_m, 1.0, epsilon = 1e-9);
        assert_relative_eq!(s.y_m, 5.0, epsilon = 1e-9);
        assert_relative_eq!(s.time_s, 11.5);
        assert_eq!(s.speed_ms, 2.0);
    }

    #[test]
    fn test_co_location() {
        let a = State::new(0.0, 0.0, 0.01, 2.0, 5.0);

        assert!(a.is_co_located(&State::new(0.05, 0.0, 2.0 * PI, 1.0, 5.0)));
        assert!(!a.is_co_located(&State::new(1.0, 0.0, 0.0, 2.0, 5.0)));
        assert!(!a.is_co_located(&State::new(0.0, 0.0, PI, 2.0, 5.0)));
        assert!(!a.is_co_located(&State::new(0.0, 0.0, 0.0, 2.0, 6.0)));
    }

    #[test]
    fn test_heading_to() {
        let a = State::new(0.0, 0.0, 0.0, 0.0, 0.0);
        let b = State::new(0.0, -3.0, 0.0, 0.0, 0.0);

        assert_relative_eq!(a.heading_to(&b), 1.5 * PI, epsilon = 1e-12);
    }
}
