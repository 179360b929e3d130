//! # Path Segment
//!
//! A single Dubins curve travelled at a constant speed from a given start time.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use super::{
    dubins::{Configuration, DubinsError, DubinsPath},
    PlanError,
};
use crate::state::State;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A time-parameterised Dubins curve.
///
/// The segment covers the half-open time interval `[start_time_s, end_time_s())`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathSegment {
    pub curve: DubinsPath,

    /// Travel speed along the whole curve
    pub speed_ms: f64,

    pub start_time_s: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl PathSegment {
    /// Build the shortest segment from `from` to the configuration `(x, y, heading)` of `to`,
    /// starting at `from`'s timestamp.
    pub fn between(
        from: &State,
        to: &State,
        turning_radius_m: f64,
        speed_ms: f64,
    ) -> Result<Self, PlanError> {
        if !(speed_ms > 0.0) {
            return Err(PlanError::InvalidSpeed(speed_ms));
        }

        let curve = DubinsPath::shortest(
            Configuration::new(from.x_m, from.y_m, from.heading_rad),
            Configuration::new(to.x_m, to.y_m, to.heading_rad),
            turning_radius_m,
        )?;

        Ok(Self {
            curve,
            speed_ms,
            start_time_s: from.time_s,
        })
    }

    /// Copy of this segment retimed to start at the given time.
    pub fn with_start_time(&self, start_time_s: f64) -> Self {
        Self {
            start_time_s,
            ..*self
        }
    }

    pub fn length_m(&self) -> f64 {
        self.curve.length_m()
    }

    pub fn duration_s(&self) -> f64 {
        self.length_m() / self.speed_ms
    }

    pub fn end_time_s(&self) -> f64 {
        self.start_time_s + self.duration_s()
    }

    /// Returns true if `time_s` lies in `[start, end)`.
    pub fn contains_time(&self, time_s: f64) -> bool {
        time_s >= self.start_time_s && time_s < self.end_time_s()
    }

    /// Sample the state at the given time.
    ///
    /// The end time is accepted here even though it is not part of the interval, so that the
    /// final state of a plan can be queried.
    pub fn sample(&self, time_s: f64) -> Result<State, PlanError> {
        let end_time_s = self.end_time_s();
        if !(time_s >= self.start_time_s && time_s <= end_time_s) {
            return Err(PlanError::OutOfBounds {
                time_s,
                start_s: self.start_time_s,
                end_s: end_time_s,
            });
        }

        let dist_m = (time_s - self.start_time_s) * self.speed_ms;
        let q = self.curve.sample(dist_m.min(self.length_m()))?;

        Ok(State::new(q.x_m, q.y_m, q.yaw_rad, self.speed_ms, time_s))
    }

    pub fn start_state(&self) -> State {
        let q = self.curve.start;
        State::new(q.x_m, q.y_m, q.yaw_rad, self.speed_ms, self.start_time_s)
    }

    pub fn end_state(&self) -> State {
        let q = self.curve.end();
        State::new(q.x_m, q.y_m, q.yaw_rad, self.speed_ms, self.end_time_s())
    }

    /// Sample states along the segment every `step_s` seconds, always including the end state.
    pub fn sample_every(&self, step_s: f64) -> Vec<State> {
        let mut states = Vec::new();
        let end_time_s = self.end_time_s();

        if step_s > 0.0 {
            let mut t = self.start_time_s;
            while t < end_time_s {
                if let Ok(s) = self.sample(t) {
                    states.push(s);
                }
                t += step_s;
            }
        }

        states.push(self.end_state());
        states
    }
}

impl From<DubinsError> for PlanError {
    fn from(e: DubinsError) -> Self {
        PlanError::Dubins(e)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_straight_segment_timing() {
        let from = State::new(0.0, 0.0, 0.0, 2.0, 10.0);
        let to = State::new(8.0, 0.0, 0.0, 2.0, 0.0);
        let seg = PathSegment::between(&from, &to, 4.0, 2.0).unwrap();

        assert_relative_eq!(seg.duration_s(), 4.0, epsilon = 1e-9);
        assert_relative_eq!(seg.end_time_s(), 14.0, epsilon = 1e-9);
        assert!(seg.contains_time(10.0));
        assert!(!seg.contains_time(14.0));

        let s = seg.sample(11.0).unwrap();
        assert_relative_eq!(s.x_m, 2.0, epsilon = 1e-9);
        assert_relative_eq!(s.time_s, 11.0);

        assert!(seg.sample(9.0).is_err());
        assert!(seg.sample(14.5).is_err());
    }

    #[test]
    fn test_sample_every() {
        let from = State::new(0.0, 0.0, 0.0, 1.0, 0.0);
        let to = State::new(3.0, 0.0, 0.0, 1.0, 0.0);
        let seg = PathSegment::between(&from, &to, 1.0, 1.0).unwrap();

        let states = seg.sample_every(1.0);
        assert_eq!(states.len(), 4);
        assert_relative_eq!(states[3].x_m, 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_bad_speed() {
        let s = State::default();
        assert!(matches!(
            PathSegment::between(&s, &s, 1.0, 0.0),
            Err(PlanError::InvalidSpeed(_))
        ));
    }
}
