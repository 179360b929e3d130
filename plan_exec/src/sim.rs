//! # Simulated Controller
//!
//! A [`TrajectoryPublisher`] standing in for the trajectory tracking controller. It adopts every
//! published plan one planning period after it is received and follows it perfectly, so the
//! vehicle's state at any time is just the adopted plan sampled at that time.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, info, trace};
use serde::Serialize;

use crate::{
    executive::{PublishError, TrajectoryPublisher},
    plan::Plan,
    planner::Stats,
    ribbon::RibbonManager,
    state::State,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct SimController {
    inner: Mutex<SimState>,
}

#[derive(Debug, Default)]
struct SimState {
    /// Plan being followed
    plan: Plan,

    /// Where the vehicle was when the plan ran out, if it has
    last_state: Option<State>,

    cycles: usize,
    done: bool,
    task_stats: Option<TaskStats>,
}

/// Statistics for a whole mission.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TaskStats {
    pub wall_clock_s: f64,
    pub collision_penalty: f64,
    pub weighted_total_penalty: f64,
    pub uncovered_length_m: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimController {
    pub fn new() -> Self {
        Self::default()
    }

    /// State of the simulated vehicle now, or `None` if no plan has been adopted yet.
    pub fn vehicle_state(&self) -> Option<State> {
        let now_s = self.get_time();
        let mut inner = self.lock();

        if inner.plan.contains_time(now_s) {
            return inner.plan.sample(now_s).ok();
        }

        // Past the end of the plan the vehicle holds its final position
        if let Ok(end) = inner.plan.end_state() {
            if now_s >= end.time_s {
                inner.last_state = Some(State { speed_ms: 0.0, ..end });
            }
        }

        inner.last_state.map(|s| State { time_s: now_s, ..s })
    }

    /// Returns true once the executive has reported every ribbon covered.
    pub fn is_done(&self) -> bool {
        self.lock().done
    }

    pub fn task_stats(&self) -> Option<TaskStats> {
        self.lock().task_stats
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TrajectoryPublisher for SimController {
    fn publish_plan(&self, plan: &Plan, planning_time_ideal_s: f64) -> Result<State, PublishError> {
        let adopt_s = self.get_time() + planning_time_ideal_s;

        if !plan.contains_time(adopt_s) {
            return Err(PublishError::Rejected(format!(
                "plan doesn't cover the adoption time {:.3} s",
                adopt_s
            )));
        }

        let start = plan.sample(adopt_s)?;
        let mut inner = self.lock();
        inner.plan = plan.clone();
        inner.last_state = None;

        trace!("Adopting plan from {}", start);
        Ok(start)
    }

    fn publish_stats(
        &self,
        stats: &Stats,
        collision_penalty: f64,
        _extra: f64,
        plan_achievable: bool,
    ) {
        let mut inner = self.lock();
        inner.cycles += 1;

        debug!(
            "Cycle {}: {} segments, complete {}, cost {:.2}, collision penalty {:.2}, achievable {}",
            inner.cycles,
            stats.plan.segments().len(),
            stats.complete,
            stats.cost,
            collision_penalty,
            plan_achievable
        );
    }

    fn publish_task_level_stats(
        &self,
        wall_clock_s: f64,
        collision_penalty: f64,
        weighted_total_penalty: f64,
        uncovered_length_m: f64,
    ) {
        let stats = TaskStats {
            wall_clock_s,
            collision_penalty,
            weighted_total_penalty,
            uncovered_length_m,
        };

        self.lock().task_stats = Some(stats);
        util::session::save_with_timestamp("task_stats.json", stats);
    }

    fn display_trajectory(&self, samples: Vec<State>, _is_plan: bool, dangerous: bool) {
        if dangerous {
            info!("Displaying a dangerous trajectory of {} samples", samples.len());
        }
    }

    fn display_ribbons(&self, ribbons: &RibbonManager) {
        trace!(
            "{} ribbons left, {:.2} m uncovered",
            ribbons.ribbons().len(),
            ribbons.total_uncovered_length_m()
        );
    }

    fn display_map(&self, path: &str) {
        if path.is_empty() {
            info!("Displaying no map");
        } else {
            info!("Displaying map {}", path);
        }
    }

    fn get_time(&self) -> f64 {
        util::time::now_unix_seconds()
    }

    fn all_done(&self) {
        info!("Controller notified that every ribbon is covered");
        self.lock().done = true;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::plan::PathSegment;

    #[test]
    fn test_adopts_plan_in_the_future() {
        let sim = SimController::new();
        assert!(sim.vehicle_state().is_none());

        let now = sim.get_time();
        let from = State::new(0.0, 0.0, 0.0, 1.0, now);
        let to = State::new(100.0, 0.0, 0.0, 1.0, 0.0);
        let plan = Plan::from_segments(vec![PathSegment::between(&from, &to, 5.0, 1.0).unwrap()]);

        let start = sim.publish_plan(&plan, 1.0).unwrap();
        assert!(start.time_s >= now + 1.0);
        assert!(start.x_m > 0.99);
        assert!(plan.sample(start.time_s).unwrap().is_co_located(&start));

        let s = sim.vehicle_state().unwrap();
        assert!(s.x_m < start.x_m);

        // A plan which is over before it can be adopted is rejected
        let short = Plan::from_segments(vec![PathSegment::between(
            &from,
            &State::new(0.5, 0.0, 0.0, 1.0, 0.0),
            5.0,
            1.0,
        )
        .unwrap()]);
        assert!(matches!(
            sim.publish_plan(&short, 1.0),
            Err(PublishError::Rejected(_))
        ));
    }
}
