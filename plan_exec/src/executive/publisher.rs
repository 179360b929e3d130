//! Interface to the trajectory consumer
//!
//! The executive hands finished plans, statistics and display data to a [`TrajectoryPublisher`].
//! Only plan publication can fail: the consumer may not be able to adopt a plan, in which case the
//! executive discards it and replans on the next cycle.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use crate::{
    plan::{Plan, PlanError},
    planner::Stats,
    ribbon::RibbonManager,
    state::State,
};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

pub trait TrajectoryPublisher: Send + Sync {
    /// Send a plan to the controller, which starts tracking it `planning_time_ideal_s` from now.
    ///
    /// Returns the state the controller will actually start tracking from.
    fn publish_plan(&self, plan: &Plan, planning_time_ideal_s: f64) -> Result<State, PublishError>;

    /// Per cycle statistics.
    fn publish_stats(
        &self,
        stats: &Stats,
        collision_penalty: f64,
        extra: f64,
        plan_achievable: bool,
    );

    /// Statistics for the whole mission, published when the planning loop exits.
    fn publish_task_level_stats(
        &self,
        wall_clock_s: f64,
        collision_penalty: f64,
        weighted_total_penalty: f64,
        uncovered_length_m: f64,
    );

    fn display_trajectory(&self, samples: Vec<State>, is_plan: bool, dangerous: bool);

    fn display_ribbons(&self, ribbons: &RibbonManager);

    /// Show the map at the given path, or no map if the path is empty.
    fn display_map(&self, path: &str);

    /// Current time in seconds, the clock every plan is timed against.
    fn get_time(&self) -> f64;

    /// Every ribbon has been covered.
    fn all_done(&self);
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("The controller rejected the plan: {0}")]
    Rejected(String),

    #[error("The controller is unavailable")]
    Unavailable,

    #[error("Plan error: {0}")]
    Plan(PlanError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl From<PlanError> for PublishError {
    fn from(e: PlanError) -> Self {
        PublishError::Plan(e)
    }
}
