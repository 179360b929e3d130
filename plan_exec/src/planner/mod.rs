//! # Planners
//!
//! Planner strategies turn a coverage problem into a [`Plan`]. Every strategy implements the
//! [`Planner`] trait, and a fresh instance is built for every planning cycle through
//! [`PlannerChoice::build`], so nothing persists between cycles except the previous plan which the
//! executive passes back in.
//!
//! Strategies never fail because no plan exists. If nothing feasible is found within the time
//! budget they return an empty plan, and the executive treats that as a failed cycle.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod a_star;
mod bit_star;
pub mod config;
mod edge;
mod potential_field;
mod vertex;
pub mod visualizer;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::{
    obstacles::ObstacleSnapshot,
    plan::{Plan, PlanError},
    ribbon::RibbonManager,
    state::State,
};
pub use a_star::AStarPlanner;
pub use bit_star::BitStarPlanner;
pub use config::{Clock, CostParams, PlannerConfig, PlannerParams, PotentialFieldParams};
pub use potential_field::PotentialFieldPlanner;
pub use visualizer::Visualizer;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

pub trait Planner: Send {
    /// Plan coverage of the ribbons starting from `start`.
    ///
    /// Implementations must not take much longer than `time_remaining_s` to return, checking their
    /// own elapsed time and returning their best result so far.
    fn plan(
        &self,
        ribbons: &RibbonManager,
        start: &State,
        config: &PlannerConfig,
        previous: &Plan,
        time_remaining_s: f64,
        obstacles: &ObstacleSnapshot,
    ) -> Result<Stats, PlannerError>;

    fn name(&self) -> &'static str;
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Which strategy the executive runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannerChoice {
    BitStar,
    AStar,
    PotentialField,
}

#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("Plan error: {0}")]
    Plan(PlanError),

    #[error("Invalid planner configuration: {0}")]
    InvalidConfig(String),
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Result of one planning invocation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Stats {
    pub plan: Plan,

    /// True if the plan covers every ribbon
    pub complete: bool,

    /// Number of random samples drawn
    pub samples: usize,

    /// Number of vertices (or search nodes) created
    pub vertices: usize,

    /// Number of vertex expansions
    pub iterations: usize,

    /// Cost of the plan, time plus collision penalty
    pub cost: f64,

    /// Collision penalty part of the cost
    pub collision_penalty: f64,

    /// Wall clock time spent planning
    pub planning_time_s: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl PlannerChoice {
    /// Build a fresh planner instance.
    pub fn build(&self) -> Box<dyn Planner> {
        match self {
            PlannerChoice::BitStar => Box::new(BitStarPlanner::new()),
            PlannerChoice::AStar => Box::new(AStarPlanner::new()),
            PlannerChoice::PotentialField => Box::new(PotentialFieldPlanner::new()),
        }
    }

    /// Map the integer identifier used by the configuration interface onto a strategy.
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(PlannerChoice::BitStar),
            1 => Some(PlannerChoice::AStar),
            2 => Some(PlannerChoice::PotentialField),
            _ => None,
        }
    }
}

impl Default for PlannerChoice {
    fn default() -> Self {
        PlannerChoice::BitStar
    }
}

impl From<PlanError> for PlannerError {
    fn from(e: PlanError) -> Self {
        PlannerError::Plan(e)
    }
}

/// Check the parts of the configuration every strategy relies on.
fn validate(config: &PlannerConfig) -> Result<(), PlannerError> {
    let positive = [
        ("turning radius", config.turning_radius_m),
        ("coverage turning radius", config.coverage_turning_radius_m),
        ("max speed", config.max_speed_ms),
        ("slow speed", config.slow_speed_ms),
        (
            "collision checking increment",
            config.collision_checking_increment_s,
        ),
    ];

    for (name, value) in positive.iter() {
        if !(*value > 0.0 && value.is_finite()) {
            return Err(PlannerError::InvalidConfig(format!(
                "{} must be positive, got {}",
                name, value
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_validate() {
        let mut config = PlannerConfig::from_params(&PlannerParams::default(), Arc::new(|| 0.0));
        assert!(validate(&config).is_ok());

        config.max_speed_ms = 0.0;
        assert!(matches!(
            validate(&config),
            Err(PlannerError::InvalidConfig(_))
        ));

        config.max_speed_ms = 2.0;
        config.slow_speed_ms = -1.0;
        assert!(matches!(
            validate(&config),
            Err(PlannerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_choice_ids() {
        assert_eq!(PlannerChoice::from_id(1), Some(PlannerChoice::AStar));
        assert_eq!(PlannerChoice::from_id(3), None);
        assert_eq!(PlannerChoice::PotentialField.build().name(), "potential_field");
    }
}
