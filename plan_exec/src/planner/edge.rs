//! Edge evaluation shared by the strategies
//!
//! Every candidate segment is collision checked at the configured time increment: a sample on a
//! blocked map cell rejects the segment, and dynamic obstacle scores are integrated over time into a
//! collision penalty.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use super::PlannerConfig;
use crate::{
    obstacles::ObstacleSnapshot,
    plan::{Plan, PathSegment},
    ribbon::RibbonManager,
    state::State,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A collision checked segment.
#[derive(Debug, Clone, Copy)]
pub(super) struct Edge {
    pub segment: PathSegment,

    /// Integrated, weighted obstacle score along the segment
    pub collision_penalty: f64,

    /// Weighted duration plus the collision penalty
    pub cost: f64,

    /// Set if any sample scored at or above the danger threshold
    pub dangerous: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Edge {
    /// Collision check the segment, returning `None` if it crosses a blocked part of the map.
    ///
    /// If `ribbons` is given they are covered at every checked state.
    pub fn evaluate(
        segment: PathSegment,
        config: &PlannerConfig,
        obstacles: &ObstacleSnapshot,
        mut ribbons: Option<&mut RibbonManager>,
    ) -> Option<Self> {
        let step_s = config.collision_checking_increment_s;
        let uncertainty = config.time_uncertainty();

        let mut collision_penalty = 0.0;
        let mut dangerous = false;

        for state in segment.sample_every(step_s) {
            if config.map.is_blocked(state.x_m, state.y_m) {
                return None;
            }

            let score =
                obstacles.planning_score(state.x_m, state.y_m, state.time_s, true, &uncertainty);
            collision_penalty += score * config.costs.dynamic_obstacle_cost_factor * step_s;
            dangerous |= score >= config.costs.dangerous_score_threshold;

            if let Some(r) = ribbons.as_mut() {
                r.cover(state.x_m, state.y_m, true);
            }
        }

        Some(Self {
            segment,
            collision_penalty,
            cost: segment.duration_s() * config.costs.time_penalty_factor + collision_penalty,
            dangerous,
        })
    }

    /// Build and check the shortest segment between two states.
    pub fn between(
        from: &State,
        to: &State,
        radius_m: f64,
        config: &PlannerConfig,
        obstacles: &ObstacleSnapshot,
        ribbons: Option<&mut RibbonManager>,
    ) -> Option<Self> {
        let segment = PathSegment::between(from, to, radius_m, config.max_speed_ms).ok()?;
        Self::evaluate(segment, config, obstacles, ribbons)
    }
}

/// Total cost of a plan, and whether any of it is dangerous, or `None` if it crosses a blocked
/// part of the map. `ribbons` is covered along the plan.
pub(super) fn plan_cost(
    plan: &Plan,
    config: &PlannerConfig,
    obstacles: &ObstacleSnapshot,
    ribbons: &mut RibbonManager,
) -> Option<(f64, f64, bool)> {
    let mut cost = 0.0;
    let mut penalty = 0.0;
    let mut dangerous = false;

    for seg in plan.segments() {
        let edge = Edge::evaluate(*seg, config, obstacles, Some(ribbons))?;
        cost += edge.cost;
        penalty += edge.collision_penalty;
        dangerous |= edge.dangerous;
    }

    Some((cost, penalty, dangerous))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{map::GridWorldMap, planner::PlannerParams};
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn config() -> PlannerConfig {
        PlannerConfig::from_params(&PlannerParams::default(), Arc::new(|| 0.0))
    }

    #[test]
    fn test_free_edge_costs_time() {
        let config = config();
        let from = State::new(0.0, 0.0, 0.0, 2.5, 0.0);
        let to = State::new(10.0, 0.0, 0.0, 2.5, 0.0);

        let mut ribbons = RibbonManager::default();
        ribbons.add(0.0, 0.0, 10.0, 0.0);

        let edge = Edge::between(
            &from,
            &to,
            8.0,
            &config,
            &ObstacleSnapshot::default(),
            Some(&mut ribbons),
        )
        .unwrap();

        assert_relative_eq!(edge.cost, 4.0, epsilon = 1e-9);
        assert_eq!(edge.collision_penalty, 0.0);
        assert!(!edge.dangerous);
        assert!(ribbons.done());
    }

    #[test]
    fn test_blocked_and_dangerous() {
        let mut config = config();
        let from = State::new(0.0, 0.5, 0.0, 2.5, 0.0);
        let to = State::new(10.0, 0.5, 0.0, 2.5, 0.0);

        let mut obstacles = ObstacleSnapshot::default();
        obstacles
            .binary
            .update(1, &State::new(5.0, 0.5, 0.0, 0.0, 0.0), 2.0, 2.0);

        let edge = Edge::between(&from, &to, 8.0, &config, &obstacles, None).unwrap();
        assert!(edge.dangerous);
        assert!(edge.collision_penalty > 0.0);

        config.map = Arc::new(GridWorldMap::parse("1\n__#__\n").unwrap());
        assert!(Edge::between(&from, &to, 8.0, &config, &obstacles, None).is_none());
    }
}
