//! # Potential Field Planner
//!
//! Reactive fallback strategy with no search. At each lookahead step the vehicle is pulled toward
//! the next ribbon in the tour and pushed away from dynamic obstacles and blocked map cells. The
//! heading of the resultant force, limited by the turning radius, fixes the next short segment.
//! Steps where the dynamic obstacles push harder than the ribbon pulls are taken at the slow
//! speed.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::Instant;

use log::{trace, warn};
use nalgebra::Vector2;

use super::{
    edge::{plan_cost, Edge},
    validate,
    visualizer::PlannerRecord,
    Planner, PlannerConfig, PlannerError, Stats,
};
use crate::{
    obstacles::{ObstacleModelKind, ObstacleSnapshot},
    plan::{PathSegment, Plan},
    ribbon::RibbonManager,
    state::State,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Below this distance the ribbon attraction saturates.
const RIBBON_SATURATION_DISTANCE_M: f64 = 0.5;

/// Repulsion from an obstacle the vehicle is touching.
const CONTACT_REPULSION: f64 = 1000.0;

/// Length scale of the decay of dynamic obstacle repulsion.
const DYNAMIC_DECAY_M: f64 = 13.0;

/// Length scale of the decay of static obstacle repulsion.
const STATIC_DECAY_M: f64 = 15.0;

/// Most map samples taken along each axis of the static repulsion window.
const MAX_STATIC_SAMPLES_PER_AXIS: usize = 64;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct PotentialFieldPlanner;

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl PotentialFieldPlanner {
    pub fn new() -> Self {
        Self
    }
}

impl Planner for PotentialFieldPlanner {
    fn plan(
        &self,
        ribbons: &RibbonManager,
        start: &State,
        config: &PlannerConfig,
        _previous: &Plan,
        time_remaining_s: f64,
        obstacles: &ObstacleSnapshot,
    ) -> Result<Stats, PlannerError> {
        validate(config)?;
        let wall_start = Instant::now();

        let mut covered = ribbons.clone();
        let mut plan = Plan::new();
        let mut current = *start;

        let params = &config.potential_field;

        for step in 0..params.lookahead_steps {
            if covered.done() || wall_start.elapsed().as_secs_f64() >= time_remaining_s {
                break;
            }

            let attraction = ribbon_force(&covered, &current);
            let repulsion = dynamic_force(obstacles, &current);
            let force = attraction
                + repulsion
                + static_force(config, &current, &wall_start, time_remaining_s);

            current.speed_ms = if repulsion.norm() > attraction.norm() {
                config.slow_speed_ms
            } else {
                config.max_speed_ms
            };
            let step_m = current.speed_ms * params.step_duration_s;
            let max_turn_rad = step_m / config.turning_radius_m;

            let heading_change = if force.norm() > 0.0 {
                util::maths::get_ang_dist_2pi(current.heading_rad, force.y.atan2(force.x))
                    .clamp(-max_turn_rad, max_turn_rad)
            } else {
                0.0
            };

            let next = arc_end(&current, heading_change, step_m, params.step_duration_s);
            let edge = match PathSegment::between(
                &current,
                &next,
                config.turning_radius_m,
                current.speed_ms,
            )
            .ok()
            .and_then(|seg| Edge::evaluate(seg, config, obstacles, Some(&mut covered)))
            {
                Some(e) => e,
                None => {
                    trace!("Potential field step {} is blocked", step);
                    break;
                }
            };

            plan.append_segment(edge.segment);
            current = edge.segment.end_state();
        }

        let mut stats = Stats {
            complete: covered.done(),
            iterations: plan.segments().len(),
            ..Stats::default()
        };

        let mut scored = ribbons.clone();
        if let Some((cost, penalty, dangerous)) = plan_cost(&plan, config, obstacles, &mut scored) {
            stats.cost = cost;
            stats.collision_penalty = penalty;
            plan.dangerous = dangerous;
        }
        stats.plan = plan;
        stats.planning_time_s = wall_start.elapsed().as_secs_f64();

        if let Some(vis) = &config.visualizer {
            let mut record =
                PlannerRecord::new("potential_field", config.now_s(), start, &stats.plan);
            record.complete = stats.complete;
            if let Err(e) = vis.record(&record) {
                warn!("Could not record planner visualisation: {}", e);
            }
        }

        Ok(stats)
    }

    fn name(&self) -> &'static str {
        "potential_field"
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn ribbon_magnitude(distance_m: f64) -> f64 {
    if distance_m <= RIBBON_SATURATION_DISTANCE_M {
        20.0
    } else {
        10.0 / distance_m
    }
}

fn dynamic_magnitude(clearance_m: f64, area_m2: f64) -> f64 {
    if clearance_m <= 0.0 {
        CONTACT_REPULSION
    } else {
        (-clearance_m / DYNAMIC_DECAY_M).exp() * area_m2 / 10.0
    }
}

fn static_magnitude(distance_m: f64, ignore_m: f64) -> f64 {
    if distance_m > ignore_m {
        0.0
    } else {
        (-distance_m / STATIC_DECAY_M).exp()
    }
}

/// Force of the given magnitude pointing from `from` to `to`.
fn directed(magnitude: f64, from: &Vector2<f64>, to: &Vector2<f64>) -> Vector2<f64> {
    let d = to - from;
    let n = d.norm();
    if n > 0.0 {
        d * (magnitude / n)
    } else {
        Vector2::zeros()
    }
}

/// Attraction to the first ribbon of the tour: its end if the vehicle is already on it, otherwise
/// its start.
fn ribbon_force(ribbons: &RibbonManager, state: &State) -> Vector2<f64> {
    let first = match ribbons.tour(state).into_iter().next() {
        Some(r) => r,
        None => return Vector2::zeros(),
    };

    let position = state.position_m();
    let (along_m, perp_m) = first.project(&position);
    let on_ribbon =
        perp_m <= ribbons.width_m() / 2.0 && along_m >= 0.0 && along_m <= first.length_m();

    let target = if on_ribbon { first.end_m } else { first.start_m };
    directed(
        ribbon_magnitude((target - position).norm()),
        &position,
        &target,
    )
}

/// Repulsion from the active dynamic obstacle model at the state's time.
fn dynamic_force(obstacles: &ObstacleSnapshot, state: &State) -> Vector2<f64> {
    if obstacles.ignore {
        return Vector2::zeros();
    }

    let position = state.position_m();
    let mut force = Vector2::zeros();

    match obstacles.kind {
        ObstacleModelKind::Binary => {
            for (_, o) in obstacles.binary.iter() {
                let centre = o.centre_at(state.time_s);
                let magnitude = dynamic_magnitude(
                    o.clearance_m(state.x_m, state.y_m, state.time_s),
                    o.area_m2(),
                );
                force += directed(magnitude, &centre, &position);
            }
        }
        ObstacleModelKind::Gaussian => {
            // The one sigma ellipse stands in for the footprint
            for (_, o) in obstacles.gaussian.iter() {
                let projected = o.project(state.time_s);
                let area_m2 = std::f64::consts::PI * projected.covariance.determinant().max(0.0).sqrt();
                let magnitude =
                    dynamic_magnitude((projected.mean_m - position).norm(), area_m2);
                force += directed(magnitude, &projected.mean_m, &position);
            }
        }
    }

    force
}

/// Repulsion from blocked map cells within the ignore distance.
///
/// Only the part of the window which overlaps the map's blocked extent is sampled, at the map's
/// resolution or coarser so that a step never takes more than
/// `MAX_STATIC_SAMPLES_PER_AXIS`² samples. The scan stops early once the time budget is spent.
fn static_force(
    config: &PlannerConfig,
    state: &State,
    wall_start: &Instant,
    time_remaining_s: f64,
) -> Vector2<f64> {
    let mut force = Vector2::zeros();

    let (lo, hi) = match config.map.blocked_extent_m() {
        Some(e) => e,
        None => return force,
    };

    let ignore_m = config.potential_field.static_ignore_distance_m;
    let position = state.position_m();
    let min = Vector2::new(
        (position.x - ignore_m).max(lo.x),
        (position.y - ignore_m).max(lo.y),
    );
    let max = Vector2::new(
        (position.x + ignore_m).min(hi.x),
        (position.y + ignore_m).min(hi.y),
    );
    if min.x >= max.x || min.y >= max.y {
        return force;
    }

    let spacing_m = config
        .map
        .resolution_m()
        .max(2.0 * ignore_m / MAX_STATIC_SAMPLES_PER_AXIS as f64);
    let num_x = ((max.x - min.x) / spacing_m).ceil().max(1.0) as usize;
    let num_y = ((max.y - min.y) / spacing_m).ceil().max(1.0) as usize;
    let step = Vector2::new((max.x - min.x) / num_x as f64, (max.y - min.y) / num_y as f64);

    for i in 0..num_x {
        if wall_start.elapsed().as_secs_f64() >= time_remaining_s {
            trace!("Time budget spent during the static repulsion scan");
            break;
        }

        for j in 0..num_y {
            let cell = Vector2::new(
                min.x + (i as f64 + 0.5) * step.x,
                min.y + (j as f64 + 0.5) * step.y,
            );
            if !config.map.is_blocked(cell.x, cell.y) {
                continue;
            }
            let magnitude = static_magnitude((cell - position).norm(), ignore_m);
            force += directed(magnitude, &cell, &position);
        }
    }

    force
}

/// State reached by turning through `heading_change_rad` at a constant rate over an arc of
/// `length_m`.
fn arc_end(state: &State, heading_change_rad: f64, length_m: f64, duration_s: f64) -> State {
    let heading = state.heading_rad;
    let new_heading = heading + heading_change_rad;

    let (x, y) = if heading_change_rad.abs() < 1e-9 {
        (
            state.x_m + length_m * heading.cos(),
            state.y_m + length_m * heading.sin(),
        )
    } else {
        let radius_m = length_m / heading_change_rad;
        (
            state.x_m + radius_m * (new_heading.sin() - heading.sin()),
            state.y_m - radius_m * (new_heading.cos() - heading.cos()),
        )
    };

    State::new(
        x,
        y,
        util::maths::mod_2pi(new_heading),
        state.speed_ms,
        state.time_s + duration_s,
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{map::GridWorldMap, planner::PlannerParams};
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn config() -> PlannerConfig {
        let params = PlannerParams {
            max_speed_ms: 2.0,
            turning_radius_m: 8.0,
            ..PlannerParams::default()
        };
        PlannerConfig::from_params(&params, Arc::new(|| 0.0))
    }

    #[test]
    fn test_heads_for_ribbon() {
        let config = config();
        let mut ribbons = RibbonManager::default();
        ribbons.add(5.0, 0.0, 40.0, 0.0);

        let stats = PotentialFieldPlanner::new()
            .plan(
                &ribbons,
                &State::new(0.0, 0.0, 0.0, 2.0, 3.0),
                &config,
                &Plan::new(),
                1.0,
                &ObstacleSnapshot::default(),
            )
            .unwrap();

        assert_eq!(stats.plan.segments().len(), 10);
        assert_relative_eq!(stats.plan.start_time_s().unwrap(), 3.0);
        let end = stats.plan.end_state().unwrap();
        assert_relative_eq!(end.x_m, 20.0, epsilon = 1e-6);
        assert_relative_eq!(end.y_m, 0.0, epsilon = 1e-6);
        assert!(!stats.complete);
    }

    #[test]
    fn test_turns_away_from_obstacle() {
        let config = config();
        let mut ribbons = RibbonManager::default();
        ribbons.add(50.0, 0.0, 70.0, 0.0);

        let mut obstacles = ObstacleSnapshot::default();
        obstacles
            .binary
            .update(1, &State::new(0.0, 3.0, 0.0, 0.0, 0.0), 2.0, 2.0);

        let stats = PotentialFieldPlanner::new()
            .plan(
                &ribbons,
                &State::new(0.0, 0.0, 0.0, 2.0, 0.0),
                &config,
                &Plan::new(),
                1.0,
                &obstacles,
            )
            .unwrap();

        let first = stats.plan.segments()[0].end_state();
        assert!(first.y_m < 0.0);
    }

    #[test]
    fn test_slows_when_obstacle_outweighs_ribbon() {
        let config = config();
        let mut ribbons = RibbonManager::default();
        ribbons.add(50.0, 0.0, 70.0, 0.0);

        // Stationary obstacle just ahead and to the left
        let mut obstacles = ObstacleSnapshot::default();
        obstacles
            .binary
            .update(1, &State::new(4.0, 2.0, 0.0, 0.0, 0.0), 2.0, 2.0);

        let stats = PotentialFieldPlanner::new()
            .plan(
                &ribbons,
                &State::new(0.0, 0.0, 0.0, 2.0, 0.0),
                &config,
                &Plan::new(),
                1.0,
                &obstacles,
            )
            .unwrap();

        let first = stats.plan.segments()[0];
        assert_relative_eq!(first.speed_ms, config.slow_speed_ms);
        assert_relative_eq!(first.length_m(), config.slow_speed_ms, epsilon = 1e-6);

        // Without the obstacle the same step is taken at full speed
        let open = PotentialFieldPlanner::new()
            .plan(
                &ribbons,
                &State::new(0.0, 0.0, 0.0, 2.0, 0.0),
                &config,
                &Plan::new(),
                1.0,
                &ObstacleSnapshot::default(),
            )
            .unwrap();
        assert_relative_eq!(open.plan.segments()[0].speed_ms, config.max_speed_ms);
    }

    #[test]
    fn test_blocked_start_gives_empty_plan() {
        let mut config = config();
        config.map = Arc::new(GridWorldMap::parse("1\n###\n###\n###\n").unwrap());
        let mut ribbons = RibbonManager::default();
        ribbons.add(10.0, 0.0, 20.0, 0.0);

        let stats = PotentialFieldPlanner::new()
            .plan(
                &ribbons,
                &State::new(1.5, 1.5, 0.0, 2.0, 0.0),
                &config,
                &Plan::new(),
                1.0,
                &ObstacleSnapshot::default(),
            )
            .unwrap();

        assert!(stats.plan.is_empty());
    }

    #[test]
    fn test_wall_deflects_first_step() {
        let mut ribbons = RibbonManager::default();
        ribbons.add(10.0, 0.0, 40.0, 0.0);
        let start = State::new(0.0, 0.0, 0.0, 2.0, 0.0);

        let first_step = |config: &PlannerConfig| {
            PotentialFieldPlanner::new()
                .plan(
                    &ribbons,
                    &start,
                    config,
                    &Plan::new(),
                    1.0,
                    &ObstacleSnapshot::default(),
                )
                .unwrap()
                .plan
                .segments()[0]
                .end_state()
        };

        let open = first_step(&config());
        assert_relative_eq!(open.y_m, 0.0, epsilon = 1e-9);

        // A wall along y = 2 to 3 beside the straight run to the ribbon
        let mut walled = config();
        walled.map = Arc::new(
            GridWorldMap::parse("1\n####################\n__________\n__________\n").unwrap(),
        );
        let deflected = first_step(&walled);
        assert!(deflected.y_m < -0.1);
        assert!(!walled.map.is_blocked(deflected.x_m, deflected.y_m));
    }

    #[test]
    fn test_fine_map_stays_within_budget() {
        let mut config = config();
        let mut text = String::from("0.001\n");
        text.push_str(&"#".repeat(3000));
        text.push('\n');
        text.push('#');
        text.push('\n');
        config.map = Arc::new(GridWorldMap::parse(&text).unwrap());

        let mut ribbons = RibbonManager::default();
        ribbons.add(5.0, 0.0, 40.0, 0.0);

        let budget_s = 0.1;
        let wall_start = Instant::now();
        let stats = PotentialFieldPlanner::new()
            .plan(
                &ribbons,
                &State::new(1.0, 1.0, 0.0, 2.0, 0.0),
                &config,
                &Plan::new(),
                budget_s,
                &ObstacleSnapshot::default(),
            )
            .unwrap();

        assert!(wall_start.elapsed().as_secs_f64() < 5.0 * budget_s);
        assert!(!stats.plan.is_empty());
    }

    #[test]
    fn test_arc_end() {
        let s = State::new(0.0, 0.0, 0.0, 1.0, 0.0);
        let quarter = std::f64::consts::FRAC_PI_2;
        let end = arc_end(&s, quarter, 10.0 * quarter, 1.0);

        assert_relative_eq!(end.x_m, 10.0, epsilon = 1e-9);
        assert_relative_eq!(end.y_m, 10.0, epsilon = 1e-9);
        assert_relative_eq!(end.heading_rad, quarter, epsilon = 1e-9);
        assert_relative_eq!(end.time_s, 1.0);
    }
}
