//! The planning loop, run on the executive's planner thread.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, TryLockError},
    time::Duration,
};

use log::{debug, error, info, trace, warn};

use super::{ExecError, PlannerState, Settings, Shared, StateEvent};
use crate::{
    obstacles::{DynamicObstacles, ObstacleModelKind, ObstacleSnapshot},
    plan::Plan,
    planner::{PlannerChoice, PlannerConfig, Stats},
    ribbon::RibbonManager,
    state::State,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of consecutive failed cycles after which the time horizon is halved.
const MAX_CONSECUTIVE_FAILURES: u32 = 2;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// State carried between cycles of one run of the loop.
struct LoopState {
    /// State the controller reported it will start tracking from, if the last plan was accepted
    start_state: Option<State>,

    /// Result of the last planning call, including the plan being executed
    stats: Stats,

    last_plan_achievable: bool,
    consecutive_failures: u32,

    /// Total amount the turning radii are currently shrunk by
    radius_shrink_m: f64,

    /// Unweighted sum of the obstacle scores at the vehicle's position
    cumulative_collision_penalty: f64,
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Run planning cycles until the ribbons are covered, the planner is cancelled or an unrecoverable
/// error occurs, then publish the mission statistics and set the planner inactive.
pub(super) fn plan_loop(shared: Arc<Shared>) -> Result<(), ExecError> {
    let trial_start_s = shared.publisher.get_time();
    info!("Planning loop started");

    let mut ls = LoopState {
        start_state: None,
        stats: Stats::default(),
        last_plan_achievable: false,
        consecutive_failures: 0,
        radius_shrink_m: 0.0,
        cumulative_collision_penalty: 0.0,
    };

    let result = run_cycles(&shared, &mut ls);

    if let Err(ref e) = result {
        error!("Planning loop stopped by an unrecoverable error: {}", e);
        shared.cancel();
    }

    publish_task_stats(&shared, trial_start_s, ls.cumulative_collision_penalty);

    shared.set_state(StateEvent::LoopExited);
    info!("Planner inactive");

    result
}

fn run_cycles(shared: &Shared, ls: &mut LoopState) -> Result<(), ExecError> {
    loop {
        let cycle_start_s = shared.publisher.get_time();
        let settings = *shared.settings.read()?;
        let budget_s = settings.planning_time_ideal_s - shared.params.planning_time_overhead_s;

        if shared.is_cancelled()? {
            break;
        }

        {
            let ribbons = shared.ribbons.read()?;
            if ribbons.done() {
                info!("Finished covering ribbons");
                shared.publisher.all_done();
                break;
            }
            shared.publisher.display_ribbons(&ribbons);
        }

        // Fall back on extrapolating the last odometry if the controller gave us nothing
        let last_state = shared.odometry.read()?.state;
        let start = match ls.start_state {
            Some(s) => s,
            None => last_state.push(cycle_start_s + budget_s - last_state.time_s),
        };

        adopt_pending_map(shared, &start)?;

        if !shared.params.reuse_plan {
            ls.stats.plan = Plan::new();
        }
        if !ls.stats.plan.is_empty() {
            ls.stats.plan.change_into_suffix(start.time_s)?;
        }

        if shared.params.radius_shrink_enabled {
            shrink_radius(shared, ls)?;
        }

        // Diagnostic only, the planner never sees this
        let collision_penalty = if settings.use_gaussian_obstacles {
            shared
                .gaussian_obstacles
                .read()?
                .collision_exists_at(&last_state, false)
        } else {
            shared
                .binary_obstacles
                .read()?
                .collision_exists_at(&last_state, false)
        };
        ls.cumulative_collision_penalty += collision_penalty;

        let mut ribbons = shared.ribbons.read()?.clone();
        ribbons.cover_between(last_state.x_m, last_state.y_m, start.x_m, start.y_m, false);
        let obstacles = snapshot_obstacles(shared, &settings)?;
        let config = shared.config.read()?.clone();

        if settings.planner == PlannerChoice::BitStar && !ls.stats.plan.is_empty() {
            debug!("Sampling planner already has a plan, skipping planning this cycle");
        } else {
            let remaining_s = budget_s - (shared.publisher.get_time() - cycle_start_s);
            match run_planner(
                settings.planner,
                &ribbons,
                &start,
                &config,
                &ls.stats.plan,
                remaining_s,
                &obstacles,
            ) {
                Ok(s) => ls.stats = s,
                Err(e) if e.is_recoverable() => {
                    warn!("Error while planning, discarding this cycle's plan: {}", e);
                    ls.stats.plan = Plan::new();
                }
                Err(e) => {
                    shared.cancel();
                    return Err(e);
                }
            }
        }

        shared.publisher.publish_stats(
            &ls.stats,
            collision_penalty * config.costs.collision_penalty_factor,
            0.0,
            ls.last_plan_achievable,
        );

        let elapsed_s = shared.publisher.get_time() - cycle_start_s;
        let sleep_s = budget_s - elapsed_s;
        if sleep_s >= 0.0 {
            sleep_unless_cancelled(shared, sleep_s)?;
        } else {
            warn!("Planning cycle missed its deadline by {:.3} s", -sleep_s);
        }

        shared.publisher.display_trajectory(
            ls.stats.plan.half_second_samples().collect(),
            true,
            ls.stats.plan.dangerous,
        );

        if ls.stats.plan.is_empty() {
            info!("Planner returned an empty plan");
            ls.start_state = None;
            ls.consecutive_failures += 1;

            let mut config = shared.config.write()?;
            if degrade_horizon(&mut config, &mut ls.consecutive_failures) {
                info!(
                    "Failed {} times in a row, time horizon reduced to {:.2} s",
                    MAX_CONSECUTIVE_FAILURES + 1,
                    config.time_horizon_s
                );
            }
            continue;
        }

        ls.consecutive_failures = 0;

        if !publish_and_verify(shared, ls, settings.planning_time_ideal_s)? {
            break;
        }
    }

    Ok(())
}

/// Send the current plan to the controller and check it can follow it, discarding the plan if it
/// can't. Returns false if the loop should exit.
fn publish_and_verify(
    shared: &Shared,
    ls: &mut LoopState,
    planning_time_ideal_s: f64,
) -> Result<bool, ExecError> {
    let reported = match shared
        .publisher
        .publish_plan(&ls.stats.plan, planning_time_ideal_s)
    {
        Ok(s) => s,
        Err(e) => {
            warn!("Couldn't publish the plan, discarding it: {}", e);
            ls.stats.plan = Plan::new();
            ls.start_state = None;
            ls.last_plan_achievable = false;
            revert_radius_shrink(shared, ls)?;
            return Ok(true);
        }
    };
    ls.start_state = Some(reported);

    // A cancelled controller may not report a usable start
    if !ls.stats.plan.contains_time(reported.time_s) && shared.is_cancelled()? {
        return Ok(false);
    }

    match ls.stats.plan.sample(reported.time_s) {
        Ok(expected) if expected.is_co_located(&reported) => {
            ls.last_plan_achievable = true;
        }
        _ => {
            info!("Controller can't follow the plan from {}, discarding it", reported);
            ls.stats.plan = Plan::new();
            ls.last_plan_achievable = false;
            revert_radius_shrink(shared, ls)?;
        }
    }

    Ok(true)
}

/// Call the chosen strategy, containing any panic inside it.
fn run_planner(
    choice: PlannerChoice,
    ribbons: &RibbonManager,
    start: &State,
    config: &PlannerConfig,
    previous: &Plan,
    time_remaining_s: f64,
    obstacles: &ObstacleSnapshot,
) -> Result<Stats, ExecError> {
    let planner = choice.build();
    trace!(
        "Running {} from {} with {:.3} s",
        planner.name(),
        start,
        time_remaining_s
    );

    let result = catch_unwind(AssertUnwindSafe(|| {
        planner.plan(ribbons, start, config, previous, time_remaining_s, obstacles)
    }));

    match result {
        Ok(r) => Ok(r?),
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".into());
            Err(ExecError::PlannerPanic(msg))
        }
    }
}

/// Adopt a newly loaded map if one is waiting and the map slot isn't busy.
fn adopt_pending_map(shared: &Shared, start: &State) -> Result<(), ExecError> {
    let mut pending = match shared.pending_map.try_lock() {
        Ok(p) => p,
        Err(TryLockError::WouldBlock) => return Ok(()),
        Err(TryLockError::Poisoned(_)) => return Err(ExecError::PoisonError),
    };

    let mut config = shared.config.write()?;
    if let Some(map) = pending.take() {
        debug!("Adopted new map");
        config.map = map;
    }

    if config.map.is_blocked(start.x_m, start.y_m) {
        warn!("We've run aground according to the most recent map, at {}", start);
    }

    Ok(())
}

/// Copy both obstacle models out for the planner. The settings are the only place the active
/// model is chosen.
fn snapshot_obstacles(shared: &Shared, settings: &Settings) -> Result<ObstacleSnapshot, ExecError> {
    Ok(ObstacleSnapshot {
        binary: shared.binary_obstacles.read()?.clone(),
        gaussian: shared.gaussian_obstacles.read()?.clone(),
        kind: if settings.use_gaussian_obstacles {
            ObstacleModelKind::Gaussian
        } else {
            ObstacleModelKind::Binary
        },
        ignore: settings.ignore_dynamic_obstacles,
    })
}

/// Shrink both turning radii by the configured amount, never going below the floor.
fn shrink_radius(shared: &Shared, ls: &mut LoopState) -> Result<(), ExecError> {
    let params = &shared.params;
    let mut config = shared.config.write()?;

    let headroom_m = config
        .turning_radius_m
        .min(config.coverage_turning_radius_m)
        - params.radius_shrink_floor_m;
    let amount_m = params.radius_shrink_amount_m.min(headroom_m).max(0.0);

    config.turning_radius_m -= amount_m;
    config.coverage_turning_radius_m -= amount_m;
    ls.radius_shrink_m += amount_m;

    Ok(())
}

fn revert_radius_shrink(shared: &Shared, ls: &mut LoopState) -> Result<(), ExecError> {
    if ls.radius_shrink_m == 0.0 {
        return Ok(());
    }

    let mut config = shared.config.write()?;
    config.turning_radius_m += ls.radius_shrink_m;
    config.coverage_turning_radius_m += ls.radius_shrink_m;
    debug!("Reverted turning radius shrink of {:.2} m", ls.radius_shrink_m);
    ls.radius_shrink_m = 0.0;

    Ok(())
}

/// Halve the time horizon after too many consecutive failures, without going below the minimum.
/// Returns true if the horizon was changed, in which case the failure count is reset.
pub(super) fn degrade_horizon(config: &mut PlannerConfig, failures: &mut u32) -> bool {
    if *failures <= MAX_CONSECUTIVE_FAILURES {
        return false;
    }

    *failures = 0;
    let old_s = config.time_horizon_s;
    config.time_horizon_s = (old_s / 2.0).max(config.time_minimum_s);

    config.time_horizon_s != old_s
}

/// Sleep for the given time, waking early if the planner is cancelled.
fn sleep_unless_cancelled(shared: &Shared, sleep_s: f64) -> Result<(), ExecError> {
    let state = shared.planner_state.lock()?;
    let _ = shared.state_changed.wait_timeout_while(
        state,
        Duration::from_secs_f64(sleep_s),
        |s| *s == PlannerState::Running,
    )?;
    Ok(())
}

fn publish_task_stats(shared: &Shared, trial_start_s: f64, cumulative_collision_penalty: f64) {
    let wall_clock_s = shared.publisher.get_time() - trial_start_s;

    let (collision_factor, time_factor) = match shared.config.read() {
        Ok(c) => (
            c.costs.collision_penalty_factor,
            c.costs.time_penalty_factor,
        ),
        Err(_) => {
            error!("Config lock is poisoned, task level stats not published");
            return;
        }
    };
    let uncovered_m = match shared.ribbons.read() {
        Ok(r) => r.total_uncovered_length_m(),
        Err(_) => {
            error!("Ribbon lock is poisoned, task level stats not published");
            return;
        }
    };

    let collision_penalty = cumulative_collision_penalty * collision_factor;
    let time_penalty = wall_clock_s * time_factor;

    info!(
        "Mission took {:.2} s, collision penalty {:.2}, {:.2} m left uncovered",
        wall_clock_s, collision_penalty, uncovered_m
    );

    shared.publisher.publish_task_level_stats(
        wall_clock_s,
        collision_penalty,
        time_penalty + collision_penalty,
        uncovered_m,
    );
}
