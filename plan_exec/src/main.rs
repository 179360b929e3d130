//! Coverage planner executable entry point.
//!
//! Runs a whole coverage mission against the simulated controller:
//!
//!     - Load the executive, planner and mission parameters
//!     - Build the executive and give it the mission's ribbons, obstacles and map
//!     - Start the planning loop
//!     - Main loop:
//!         - Feed the simulated vehicle's state back to the executive as odometry
//!         - Stop when every ribbon is covered or the mission time limit is reached
//!
//! Parameters are read from `$ASV_PLANNER_ROOT/params`.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod mission;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Report};
use log::{info, warn};
use std::{sync::Arc, thread, time::Duration};

// Internal
use mission::MissionParams;
use plan_lib::{
    executive::{ExecParams, Executive, PlannerState, TrajectoryPublisher},
    planner::PlannerParams,
    sim::SimController,
};
use util::{
    host,
    logger::{logger_init, LevelFilter},
    maths::lin_map,
    session::{self, Session},
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Period between odometry updates sent to the executive.
const ODOMETRY_PERIOD_S: f64 = 0.1;

/// Number of odometry updates between progress reports.
const PROGRESS_REPORT_CYCLES: u64 = 50;

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    color_eyre::install()?;

    // ---- EARLY INITIALISATION ----

    let session = Session::new("plan_exec", "sessions").wrap_err("Failed to create the session")?;

    logger_init(LevelFilter::Info, &session).wrap_err("Failed to initialise logging")?;

    info!("ASV Coverage Planner\n");
    info!(
        "Running on: {:#?}",
        host::get_uname().wrap_err("Failed to get host information")?
    );
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let exec_params: ExecParams =
        util::params::load("executive.toml").wrap_err("Could not load executive params")?;
    let planner_params: PlannerParams =
        util::params::load("planner.toml").wrap_err("Could not load planner params")?;
    let mission: MissionParams =
        util::params::load("mission.toml").wrap_err("Could not load mission params")?;

    info!("Parameters loaded, using the {:?} planner", planner_params.planner);

    // Keep a record of what this session ran with
    session.save("params/executive.json", exec_params.clone());
    session.save("params/planner.json", planner_params.clone());

    // ---- INITIALISE EXECUTIVE ----

    let sim = Arc::new(SimController::new());
    let exec = Executive::new(exec_params, &planner_params, sim.clone());

    if mission.visualize_planner {
        exec.set_planner_visualization(true, session.session_root.join("planner_vis.jsonl"))
            .wrap_err("Could not open the planner visualisation file")?;
    }

    let now_s = sim.get_time();
    let start = mission.start.state_at(now_s);
    exec.update_covered(
        start.x_m,
        start.y_m,
        start.speed_ms,
        start.heading_rad,
        start.time_s,
    )?;

    for r in mission.ribbons.iter() {
        exec.add_ribbon(r[0], r[1], r[2], r[3])?;
    }

    for o in mission.obstacles.iter() {
        exec.update_dynamic_obstacle(o.id, &o.state_at(now_s), o.width_m, o.length_m)?;
    }

    if !mission.map_file.is_empty() {
        let mut map_path = host::get_sw_root().wrap_err("Could not find the software root")?;
        map_path.push("params");
        map_path.push(&mission.map_file);

        // Waiting for the load means the first cycle already plans around the map
        if let Some(h) = exec.refresh_map(
            &map_path.to_string_lossy(),
            mission.latitude_deg,
            mission.longitude_deg,
        ) {
            if h.join().is_err() {
                warn!("Map loading thread panicked, continuing without a map");
            }
        }
    }

    let total_length_m = exec.uncovered_length_m()?;
    info!(
        "Covering {} ribbons, {:.2} m in total",
        mission.ribbons.len(),
        total_length_m
    );

    // ---- MAIN LOOP ----

    exec.start_planner().wrap_err("Could not start the planner")?;

    let mission_start_s = session::get_elapsed_seconds();
    let mut cycle: u64 = 0;

    loop {
        thread::sleep(Duration::from_secs_f64(ODOMETRY_PERIOD_S));
        cycle += 1;

        if let Some(s) = sim.vehicle_state() {
            exec.update_covered(s.x_m, s.y_m, s.speed_ms, s.heading_rad, s.time_s)?;
        }

        if exec.planner_state()? == PlannerState::Inactive {
            info!("Planning loop has exited");
            break;
        }

        if session::get_elapsed_seconds() - mission_start_s > mission.time_limit_s {
            warn!(
                "Mission time limit of {} s reached, stopping the planner",
                mission.time_limit_s
            );
            break;
        }

        if cycle % PROGRESS_REPORT_CYCLES == 0 && total_length_m > 0.0 {
            let uncovered_m = exec.uncovered_length_m()?;
            info!(
                "{:.1} % covered, {:.2} m left",
                lin_map((total_length_m, 0.0), (0.0, 100.0), uncovered_m),
                uncovered_m
            );
        }
    }

    // ---- SHUTDOWN ----

    exec.terminate().wrap_err("Planning loop ended with an error")?;

    match sim.task_stats() {
        Some(stats) => info!("Mission stats: {:#?}", stats),
        None => warn!("No mission stats were published"),
    }

    if sim.is_done() {
        info!("Every ribbon covered");
    } else {
        warn!(
            "Mission ended with {:.2} m uncovered",
            exec.uncovered_length_m()?
        );
    }

    session.exit();

    Ok(())
}
