//! # Plan
//!
//! A plan is an ordered sequence of [`PathSegment`]s which are contiguous in time. The plan spans
//! the half-open interval `[first.start, last.end)`.
//!
//! Plans only grow at the end (through [`Plan::append_segment`] and [`Plan::append`]) and shrink
//! from the front (through [`Plan::change_into_suffix`]).

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod dubins;
mod segment;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::state::State;
pub use dubins::DubinsError;
pub use segment::PathSegment;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Time between consecutive samples produced by [`Plan::half_second_samples`].
pub const HALF_SECOND_SAMPLE_PERIOD_S: f64 = 0.5;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    segments: Vec<PathSegment>,

    /// Set if the plan passed too close to an obstacle while it was being built. Only used for
    /// reporting.
    pub dangerous: bool,
}

/// Iterator over the states of a plan, one every half second from the start time up to (but not
/// including) the end time.
#[derive(Debug, Clone)]
pub struct HalfSecondSamples<'p> {
    plan: &'p Plan,
    index: usize,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("The plan is empty")]
    EmptyPlan,

    #[error("Time {time_s} s is outside the span [{start_s}, {end_s})")]
    OutOfBounds { time_s: f64, start_s: f64, end_s: f64 },

    #[error("Segment speed must be positive, got {0} m/s")]
    InvalidSpeed(f64),

    #[error("Could not build a Dubins curve: {0}")]
    Dubins(DubinsError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_segments(segments: Vec<PathSegment>) -> Self {
        Self {
            segments,
            dangerous: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn append_segment(&mut self, segment: PathSegment) {
        self.segments.push(segment);
    }

    /// Append all segments of another plan. The other plan's danger flag is carried over.
    pub fn append(&mut self, other: &Plan) {
        self.segments.extend_from_slice(&other.segments);
        self.dangerous |= other.dangerous;
    }

    pub fn start_time_s(&self) -> Result<f64, PlanError> {
        self.segments
            .first()
            .map(|s| s.start_time_s)
            .ok_or(PlanError::EmptyPlan)
    }

    pub fn end_time_s(&self) -> Result<f64, PlanError> {
        self.segments
            .last()
            .map(|s| s.end_time_s())
            .ok_or(PlanError::EmptyPlan)
    }

    pub fn total_time_s(&self) -> f64 {
        match (self.start_time_s(), self.end_time_s()) {
            (Ok(s), Ok(e)) => e - s,
            _ => 0.0,
        }
    }

    pub fn length_m(&self) -> f64 {
        self.segments.iter().map(|s| s.length_m()).sum()
    }

    pub fn contains_time(&self, time_s: f64) -> bool {
        match (self.start_time_s(), self.end_time_s()) {
            (Ok(s), Ok(e)) => time_s >= s && time_s < e,
            _ => false,
        }
    }

    /// Sample the plan at the given time.
    pub fn sample(&self, time_s: f64) -> Result<State, PlanError> {
        let start_s = self.start_time_s()?;
        let end_s = self.end_time_s()?;

        match self.segments.iter().find(|s| s.contains_time(time_s)) {
            Some(seg) => seg.sample(time_s),
            None => Err(PlanError::OutOfBounds {
                time_s,
                start_s,
                end_s,
            }),
        }
    }

    /// The final state of the plan, which lies at the (excluded) end time.
    pub fn end_state(&self) -> Result<State, PlanError> {
        self.segments
            .last()
            .map(|s| s.end_state())
            .ok_or(PlanError::EmptyPlan)
    }

    /// Drop all segments from the front of the plan which end before the cutoff time.
    pub fn change_into_suffix(&mut self, cutoff_s: f64) -> Result<(), PlanError> {
        if self.is_empty() {
            return Err(PlanError::EmptyPlan);
        }

        let keep_from = self
            .segments
            .iter()
            .position(|s| s.end_time_s() >= cutoff_s)
            .unwrap_or(self.segments.len());
        self.segments.drain(..keep_from);

        Ok(())
    }

    pub fn half_second_samples(&self) -> HalfSecondSamples<'_> {
        HalfSecondSamples {
            plan: self,
            index: 0,
        }
    }
}

impl<'p> Iterator for HalfSecondSamples<'p> {
    type Item = State;

    fn next(&mut self) -> Option<Self::Item> {
        let start_s = self.plan.start_time_s().ok()?;
        let end_s = self.plan.end_time_s().ok()?;

        // Multiply rather than accumulate so the sample times don't drift
        let time_s = start_s + self.index as f64 * HALF_SECOND_SAMPLE_PERIOD_S;
        if time_s >= end_s {
            return None;
        }

        self.index += 1;
        self.plan.sample(time_s).ok()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    /// Build a plan of straight segments along the x axis, each 2 m long at 1 m/s.
    fn straight_plan(n: usize) -> Plan {
        let mut plan = Plan::new();
        let mut from = State::new(0.0, 0.0, 0.0, 1.0, 0.0);

        for _ in 0..n {
            let to = from.push(2.0);
            let seg = PathSegment::between(&from, &to, 1.0, 1.0).unwrap();
            from = seg.end_state();
            plan.append_segment(seg);
        }

        plan
    }

    #[test]
    fn test_sample_within_span() {
        let plan = straight_plan(3);

        assert_relative_eq!(plan.start_time_s().unwrap(), 0.0);
        assert_relative_eq!(plan.end_time_s().unwrap(), 6.0, epsilon = 1e-9);
        assert_relative_eq!(plan.length_m(), 6.0, epsilon = 1e-9);

        for &t in [0.0, 1.9, 2.0, 3.3, 5.99].iter() {
            assert!(plan.contains_time(t));

            let matching = plan
                .segments()
                .iter()
                .filter(|s| s.contains_time(t))
                .count();
            assert_eq!(matching, 1);

            let s = plan.sample(t).unwrap();
            assert_relative_eq!(s.x_m, t, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_bounds_errors() {
        let plan = straight_plan(2);

        assert!(!plan.contains_time(-0.1));
        assert!(!plan.contains_time(4.0));
        assert!(matches!(
            plan.sample(-0.1),
            Err(PlanError::OutOfBounds { .. })
        ));
        assert!(matches!(
            plan.sample(4.0 + 1e-6),
            Err(PlanError::OutOfBounds { .. })
        ));

        let mut empty = Plan::new();
        assert!(!empty.contains_time(0.0));
        assert!(matches!(empty.sample(0.0), Err(PlanError::EmptyPlan)));
        assert!(matches!(empty.start_time_s(), Err(PlanError::EmptyPlan)));
        assert!(matches!(
            empty.change_into_suffix(1.0),
            Err(PlanError::EmptyPlan)
        ));
    }

    #[test]
    fn test_suffix_idempotent() {
        let mut once = straight_plan(4);
        once.change_into_suffix(4.5).unwrap();
        assert_eq!(once.segments().len(), 2);
        assert_relative_eq!(once.start_time_s().unwrap(), 4.0, epsilon = 1e-9);

        let mut twice = once.clone();
        twice.change_into_suffix(4.5).unwrap();
        assert_eq!(once, twice);

        // Cutting past the end leaves nothing
        let mut all = straight_plan(2);
        all.change_into_suffix(100.0).unwrap();
        assert!(all.is_empty());
    }

    #[test]
    fn test_half_second_samples() {
        let plan = straight_plan(1);

        let samples: Vec<State> = plan.half_second_samples().collect();
        assert_eq!(samples.len(), 4);
        assert_relative_eq!(samples[3].time_s, 1.5, epsilon = 1e-9);

        // Restartable from a clone
        let iter = plan.half_second_samples();
        assert_eq!(iter.clone().count(), iter.count());

        assert_eq!(Plan::new().half_second_samples().count(), 0);
    }

    #[test]
    fn test_append_plan() {
        let mut a = straight_plan(1);
        let mut b = Plan::new();
        let from = a.end_state().unwrap();
        b.append_segment(PathSegment::between(&from, &from.push(1.0), 1.0, 1.0).unwrap());
        b.dangerous = true;

        a.append(&b);
        assert_eq!(a.segments().len(), 2);
        assert!(a.dangerous);
        assert_relative_eq!(a.total_time_s(), 3.0, epsilon = 1e-9);
    }
}
