//! # Planner Configuration
//!
//! [`PlannerParams`] holds the start-up values loaded from `planner.toml`. The executive turns these
//! into a [`PlannerConfig`], which it owns and mutates (through `set_configuration`, the radius
//! shrink and the time horizon back-off), and hands a reference to every planner invocation.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{visualizer::Visualizer, PlannerChoice};
use crate::{
    map::{EmptyMap, Map},
    obstacles::TimeUncertainty,
};

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

/// Source of the current time in seconds.
pub type Clock = Arc<dyn Fn() -> f64 + Send + Sync>;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters loaded from `planner.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerParams {
    pub turning_radius_m: f64,
    pub coverage_turning_radius_m: f64,
    pub max_speed_ms: f64,

    /// Speed used when yielding to dynamic obstacles
    pub slow_speed_ms: f64,

    /// Swath width of every ribbon
    pub ribbon_width_m: f64,

    /// Number of nearest samples each vertex is connected to
    pub branching_factor: usize,

    /// Ribbon ordering heuristic, see `Heuristic::from_id`
    pub heuristic_id: u32,

    pub time_horizon_s: f64,

    /// Floor for the time horizon when it is reduced after repeated failures
    pub time_minimum_s: f64,

    /// Time between collision checks along a segment
    pub collision_checking_increment_s: f64,

    /// Number of samples in the first batch of the sampling planner
    pub initial_samples: usize,

    /// Smooth sampling planner output by shortcutting
    pub use_brown_paths: bool,

    /// Score plans against the Gaussian obstacle model rather than the binary one
    pub use_gaussian_obstacles: bool,
    pub ignore_dynamic_obstacles: bool,

    pub planner: PlannerChoice,

    #[serde(default)]
    pub costs: CostParams,

    #[serde(default)]
    pub potential_field: PotentialFieldParams,

    /// Seed for the sampling planner, random if not given
    #[serde(default)]
    pub random_seed: Option<u64>,
}

/// Weights used when costing plans.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostParams {
    /// Multiplier applied to the obstacle score integrated along an edge
    pub dynamic_obstacle_cost_factor: f64,

    /// Power of the time since observation in the Gaussian uncertainty growth
    pub dynamic_obstacle_time_stdev_power: f64,

    /// Factor of the time since observation in the Gaussian uncertainty growth
    pub dynamic_obstacle_time_stdev_factor: f64,

    /// Weight of the collision penalty in the reported stats
    pub collision_penalty_factor: f64,

    /// Weight of elapsed time in both edge costs and the reported stats
    pub time_penalty_factor: f64,

    /// Obstacle score at or above which a plan is flagged as dangerous
    pub dangerous_score_threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PotentialFieldParams {
    pub lookahead_steps: usize,
    pub step_duration_s: f64,

    /// Static obstacles further away than this exert no force
    pub static_ignore_distance_m: f64,
}

/// Configuration consulted by every planner invocation.
#[derive(Clone)]
pub struct PlannerConfig {
    pub turning_radius_m: f64,
    pub coverage_turning_radius_m: f64,
    pub max_speed_ms: f64,
    pub slow_speed_ms: f64,
    pub time_horizon_s: f64,
    pub time_minimum_s: f64,
    pub branching_factor: usize,
    pub collision_checking_increment_s: f64,
    pub initial_samples: usize,
    pub use_brown_paths: bool,

    /// Active static map
    pub map: Arc<dyn Map>,

    pub now: Clock,

    pub visualizer: Option<Visualizer>,

    pub costs: CostParams,
    pub potential_field: PotentialFieldParams,
    pub random_seed: Option<u64>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for CostParams {
    fn default() -> Self {
        Self {
            dynamic_obstacle_cost_factor: 100000.0,
            dynamic_obstacle_time_stdev_power: 1.0,
            dynamic_obstacle_time_stdev_factor: 1.0,
            collision_penalty_factor: 600.0,
            time_penalty_factor: 1.0,
            dangerous_score_threshold: 1e-3,
        }
    }
}

impl Default for PotentialFieldParams {
    fn default() -> Self {
        Self {
            lookahead_steps: 10,
            step_duration_s: 1.0,
            static_ignore_distance_m: 7.5,
        }
    }
}

impl Default for PlannerParams {
    fn default() -> Self {
        Self {
            turning_radius_m: 8.0,
            coverage_turning_radius_m: 16.0,
            max_speed_ms: 2.5,
            slow_speed_ms: 0.5,
            ribbon_width_m: 2.0,
            branching_factor: 6,
            heuristic_id: 1,
            time_horizon_s: 30.0,
            time_minimum_s: 5.0,
            collision_checking_increment_s: 0.1,
            initial_samples: 100,
            use_brown_paths: false,
            use_gaussian_obstacles: false,
            ignore_dynamic_obstacles: false,
            planner: PlannerChoice::BitStar,
            costs: CostParams::default(),
            potential_field: PotentialFieldParams::default(),
            random_seed: None,
        }
    }
}

impl PlannerConfig {
    pub fn from_params(params: &PlannerParams, now: Clock) -> Self {
        Self {
            turning_radius_m: params.turning_radius_m,
            coverage_turning_radius_m: params.coverage_turning_radius_m,
            max_speed_ms: params.max_speed_ms,
            slow_speed_ms: params.slow_speed_ms,
            time_horizon_s: params.time_horizon_s,
            time_minimum_s: params.time_minimum_s,
            branching_factor: params.branching_factor,
            collision_checking_increment_s: params.collision_checking_increment_s,
            initial_samples: params.initial_samples,
            use_brown_paths: params.use_brown_paths,
            map: Arc::new(EmptyMap),
            now,
            visualizer: None,
            costs: params.costs,
            potential_field: params.potential_field,
            random_seed: params.random_seed,
        }
    }

    pub fn now_s(&self) -> f64 {
        (self.now)()
    }

    pub fn time_uncertainty(&self) -> TimeUncertainty {
        TimeUncertainty {
            stdev_factor: self.costs.dynamic_obstacle_time_stdev_factor,
            stdev_power: self.costs.dynamic_obstacle_time_stdev_power,
        }
    }
}

impl std::fmt::Debug for PlannerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlannerConfig")
            .field("turning_radius_m", &self.turning_radius_m)
            .field("coverage_turning_radius_m", &self.coverage_turning_radius_m)
            .field("max_speed_ms", &self.max_speed_ms)
            .field("slow_speed_ms", &self.slow_speed_ms)
            .field("time_horizon_s", &self.time_horizon_s)
            .field("time_minimum_s", &self.time_minimum_s)
            .field("branching_factor", &self.branching_factor)
            .field(
                "collision_checking_increment_s",
                &self.collision_checking_increment_s,
            )
            .field("initial_samples", &self.initial_samples)
            .field("use_brown_paths", &self.use_brown_paths)
            .field("map", &self.map)
            .field("visualizer", &self.visualizer)
            .field("costs", &self.costs)
            .field("potential_field", &self.potential_field)
            .field("random_seed", &self.random_seed)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_params_from_toml() {
        let params: PlannerParams = util::params::from_str(
            r#"
            turning_radius_m = 5.0
            coverage_turning_radius_m = 10.0
            max_speed_ms = 2.0
            slow_speed_ms = 0.5
            ribbon_width_m = 2.0
            branching_factor = 4
            heuristic_id = 0
            time_horizon_s = 20.0
            time_minimum_s = 4.0
            collision_checking_increment_s = 0.2
            initial_samples = 50
            use_brown_paths = true
            use_gaussian_obstacles = true
            ignore_dynamic_obstacles = false
            planner = "a_star"

            [costs]
            collision_penalty_factor = 10.0
            "#,
        )
        .unwrap();

        assert_eq!(params.planner, PlannerChoice::AStar);
        assert_eq!(params.costs.collision_penalty_factor, 10.0);
        assert_eq!(params.costs.dynamic_obstacle_cost_factor, 100000.0);
        assert_eq!(params.potential_field.lookahead_steps, 10);

        let config = PlannerConfig::from_params(&params, Arc::new(|| 12.5));
        assert_eq!(config.now_s(), 12.5);
        assert!(!config.map.is_blocked(0.0, 0.0));
    }
}
