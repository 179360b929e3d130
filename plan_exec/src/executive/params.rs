//! Parameters for the executive

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters loaded from `executive.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecParams {
    /// Target period of one planning cycle, which is also the lead time given to the controller
    pub planning_time_ideal_s: f64,

    /// Part of each cycle reserved for everything other than the planner call
    pub planning_time_overhead_s: f64,

    /// Pass the unexpired part of the previous plan to the planner
    pub reuse_plan: bool,

    /// Shrink the turning radii a little every cycle while the controller keeps up
    pub radius_shrink_enabled: bool,
    pub radius_shrink_amount_m: f64,

    /// Radii are never shrunk below this
    pub radius_shrink_floor_m: f64,

    /// How long `terminate` waits for the planning loop to exit
    pub shutdown_timeout_s: f64,

    /// How long `start_planner` waits for a cancelled loop to finish
    pub startup_timeout_s: f64,

    /// Odometry updates with a faster heading rate than this don't count towards coverage
    pub coverage_heading_rate_max_rads: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for ExecParams {
    fn default() -> Self {
        Self {
            planning_time_ideal_s: 1.0,
            planning_time_overhead_s: 0.2,
            reuse_plan: true,
            radius_shrink_enabled: false,
            radius_shrink_amount_m: 0.1,
            radius_shrink_floor_m: 1.0,
            shutdown_timeout_s: 2.0,
            startup_timeout_s: 2.0,
            coverage_heading_rate_max_rads: 0.5,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let params: ExecParams = util::params::from_str(
            "planning_time_ideal_s = 0.5\nradius_shrink_enabled = true\n",
        )
        .unwrap();

        assert_eq!(params.planning_time_ideal_s, 0.5);
        assert!(params.radius_shrink_enabled);
        assert_eq!(params.shutdown_timeout_s, 2.0);
    }
}
