//! # Executive
//!
//! Owns the replanning loop and everything it shares with the outside world. The loop runs on its
//! own thread, planning, publishing and sleeping once per cycle, while callers on other threads add
//! ribbons, report odometry and obstacles, change the configuration and load maps.
//!
//! Each shared resource sits behind its own lock, and the loop copies what it needs out from
//! behind the locks before calling a planner, so planning never holds a lock.
//!
//! The planner state machine has three states:
//!
//! ```text
//!  Inactive --start--> Running --cancel--> Cancelled --loop exits--> Inactive
//! ```

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod params;
pub mod publisher;
mod worker;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    path::Path,
    sync::{Arc, Condvar, Mutex, PoisonError, RwLock},
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{error, info, warn};
use nalgebra::Matrix2;

use crate::{
    map::{load_map, EmptyMap, GeoOrigin, Map},
    obstacles::{BinaryObstacles, GaussianObstacles},
    plan::PlanError,
    planner::{
        visualizer::VisualizerError, PlannerChoice, PlannerConfig, PlannerError, PlannerParams,
        Visualizer,
    },
    ribbon::{Heuristic, RibbonManager, DEFAULT_K},
    state::State,
};
pub use params::ExecParams;
pub use publisher::{PublishError, TrajectoryPublisher};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannerState {
    Inactive,
    Running,
    Cancelled,
}

/// Events which move the planner state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StateEvent {
    Start,
    Cancel,
    LoopExited,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("Planner error: {0}")]
    Planner(PlannerError),

    #[error("Plan error: {0}")]
    Plan(PlanError),

    #[error("Couldn't publish to the controller: {0}")]
    Publish(PublishError),

    #[error("Couldn't open the planner visualisation: {0}")]
    Visualizer(VisualizerError),

    #[error("A planner panicked: {0}")]
    PlannerPanic(String),

    #[error("Sync primitive is poisoned")]
    PoisonError,

    #[error("The previous planning loop is still cancelling after {0} s")]
    StillCancelling(f64),

    #[error("Couldn't spawn the planning thread: {0}")]
    SpawnError(std::io::Error),

    #[error("The planning thread panicked")]
    ThreadPanic,
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The planning executive.
///
/// All methods take `&self`, so the executive can be shared between threads in an `Arc`. Dropping
/// it terminates the planning loop.
pub struct Executive {
    shared: Arc<Shared>,

    loop_jh: Mutex<Option<JoinHandle<Result<(), ExecError>>>>,
}

/// Data shared between the executive's callers and the planning loop.
struct Shared {
    params: ExecParams,
    publisher: Arc<dyn TrajectoryPublisher>,

    planner_state: Mutex<PlannerState>,
    state_changed: Condvar,

    config: RwLock<PlannerConfig>,
    settings: RwLock<Settings>,

    ribbons: RwLock<RibbonManager>,
    binary_obstacles: RwLock<BinaryObstacles>,
    gaussian_obstacles: RwLock<GaussianObstacles>,

    /// Map waiting to be adopted by the planning loop. Accessed with `try_lock` from the loop so
    /// map loading never stalls a cycle.
    pending_map: Mutex<Option<Arc<dyn Map>>>,

    odometry: RwLock<Odometry>,
}

/// Options which are read at the start of every cycle.
#[derive(Debug, Clone, Copy)]
struct Settings {
    planning_time_ideal_s: f64,
    planner: PlannerChoice,
    use_gaussian_obstacles: bool,
    ignore_dynamic_obstacles: bool,
}

/// Most recent vehicle state reported through `update_covered`.
#[derive(Debug, Clone, Copy, Default)]
struct Odometry {
    state: State,
    updated: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl PlannerState {
    fn on(self, event: StateEvent) -> Self {
        match (self, event) {
            (PlannerState::Inactive, StateEvent::Start) => PlannerState::Running,
            (PlannerState::Running, StateEvent::Cancel) => PlannerState::Cancelled,
            (_, StateEvent::LoopExited) => PlannerState::Inactive,
            (s, _) => s,
        }
    }
}

impl ExecError {
    /// Recoverable errors discard the current cycle's plan, anything else stops the loop.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ExecError::Planner(_) | ExecError::Plan(_) | ExecError::Publish(_)
        )
    }
}

impl Executive {
    /// Create a new executive publishing to the given consumer. The planning loop isn't started
    /// until [`Executive::start_planner`] is called.
    pub fn new(
        params: ExecParams,
        planner_params: &PlannerParams,
        publisher: Arc<dyn TrajectoryPublisher>,
    ) -> Self {
        let clock_publisher = publisher.clone();
        let config =
            PlannerConfig::from_params(planner_params, Arc::new(move || clock_publisher.get_time()));

        let mut ribbons = RibbonManager::new(
            Heuristic::from_id(planner_params.heuristic_id).unwrap_or_default(),
            planner_params.turning_radius_m,
            DEFAULT_K,
        );
        ribbons.set_width(planner_params.ribbon_width_m);

        let settings = Settings {
            planning_time_ideal_s: params.planning_time_ideal_s,
            planner: planner_params.planner,
            use_gaussian_obstacles: planner_params.use_gaussian_obstacles,
            ignore_dynamic_obstacles: planner_params.ignore_dynamic_obstacles,
        };

        let shared = Arc::new(Shared {
            params,
            publisher,
            planner_state: Mutex::new(PlannerState::Inactive),
            state_changed: Condvar::new(),
            config: RwLock::new(config),
            settings: RwLock::new(settings),
            ribbons: RwLock::new(ribbons),
            binary_obstacles: RwLock::new(BinaryObstacles::new()),
            gaussian_obstacles: RwLock::new(GaussianObstacles::new()),
            pending_map: Mutex::new(None),
            odometry: RwLock::new(Odometry::default()),
        });

        Self {
            shared,
            loop_jh: Mutex::new(None),
        }
    }

    /// Start the planning loop on its own thread. Does nothing if the loop is already running.
    ///
    /// If a previous loop has been cancelled but hasn't exited yet this waits up to the start-up
    /// timeout for it to do so.
    pub fn start_planner(&self) -> Result<(), ExecError> {
        let timeout = Duration::from_secs_f64(self.shared.params.startup_timeout_s);

        {
            let state = self.shared.planner_state.lock()?;
            if *state == PlannerState::Running {
                return Ok(());
            }

            let (mut state, _) = self
                .shared
                .state_changed
                .wait_timeout_while(state, timeout, |s| *s == PlannerState::Cancelled)?;

            if *state == PlannerState::Cancelled {
                error!("Planner start timed out, the previous loop is still cancelling");
                return Err(ExecError::StillCancelling(
                    self.shared.params.startup_timeout_s,
                ));
            }

            *state = state.on(StateEvent::Start);
        }

        let mut jh = self.loop_jh.lock()?;

        // The previous loop has set itself inactive, so this won't block for long
        if let Some(old) = jh.take() {
            match old.join() {
                Ok(Err(e)) => warn!("Previous planning loop ended with an error: {}", e),
                Err(_) => warn!("Previous planning loop panicked"),
                Ok(Ok(())) => (),
            }
        }

        let shared = self.shared.clone();
        match thread::Builder::new()
            .name("executive::planner".into())
            .spawn(move || worker::plan_loop(shared))
        {
            Ok(h) => {
                *jh = Some(h);
                info!("Planner started");
                Ok(())
            }
            Err(e) => {
                self.shared.set_state(StateEvent::LoopExited);
                Err(ExecError::SpawnError(e))
            }
        }
    }

    /// Ask the planning loop to stop. Does nothing unless the loop is running.
    pub fn cancel_planner(&self) {
        self.shared.cancel();
    }

    /// Cancel the planner and wait up to the shutdown timeout for the loop to exit.
    ///
    /// If the loop exits in time its result is returned, which is how unrecoverable errors raised
    /// inside the loop reach the owner of the executive.
    pub fn terminate(&self) -> Result<(), ExecError> {
        self.cancel_planner();

        let timeout = Duration::from_secs_f64(self.shared.params.shutdown_timeout_s);
        let state = self.shared.planner_state.lock()?;
        let (state, _) = self
            .shared
            .state_changed
            .wait_timeout_while(state, timeout, |s| *s != PlannerState::Inactive)?;

        if *state != PlannerState::Inactive {
            warn!(
                "Planning loop didn't exit within {} s",
                self.shared.params.shutdown_timeout_s
            );
            return Ok(());
        }
        drop(state);

        match self.loop_jh.lock()?.take() {
            Some(h) => h.join().map_err(|_| ExecError::ThreadPanic)?,
            None => Ok(()),
        }
    }

    pub fn planner_state(&self) -> Result<PlannerState, ExecError> {
        Ok(*self.shared.planner_state.lock()?)
    }

    /// Block until the planner is inactive or the timeout expires, returning true if it is
    /// inactive.
    pub fn wait_until_inactive(&self, timeout_s: f64) -> Result<bool, ExecError> {
        let state = self.shared.planner_state.lock()?;
        let (state, _) = self.shared.state_changed.wait_timeout_while(
            state,
            Duration::from_secs_f64(timeout_s),
            |s| *s != PlannerState::Inactive,
        )?;
        Ok(*state == PlannerState::Inactive)
    }

    /// Record the vehicle's latest state and mark coverage at its position.
    ///
    /// Coverage isn't marked if the heading changed faster than the configured rate since the last
    /// update, as a turning vehicle doesn't sweep a usable swath.
    pub fn update_covered(
        &self,
        x_m: f64,
        y_m: f64,
        speed_ms: f64,
        heading_rad: f64,
        time_s: f64,
    ) -> Result<(), ExecError> {
        let state = State::new(x_m, y_m, heading_rad, speed_ms, time_s);
        let mut odom = self.shared.odometry.write()?;

        let turning_too_fast = if odom.updated {
            let dt_s = time_s - odom.state.time_s;
            let rate = odom.state.heading_difference(&state) / dt_s;
            dt_s > 0.0 && rate > self.shared.params.coverage_heading_rate_max_rads
        } else {
            false
        };

        if !turning_too_fast {
            self.shared.ribbons.write()?.cover(x_m, y_m, false);
        }

        *odom = Odometry {
            state,
            updated: true,
        };

        Ok(())
    }

    /// Replace the planner configuration.
    ///
    /// An unknown heuristic ID is ignored, leaving the current heuristic in place.
    pub fn set_configuration(&self, params: &PlannerParams) -> Result<(), ExecError> {
        {
            let mut config = self.shared.config.write()?;
            config.turning_radius_m = params.turning_radius_m;
            config.coverage_turning_radius_m = params.coverage_turning_radius_m;
            config.max_speed_ms = params.max_speed_ms;
            config.slow_speed_ms = params.slow_speed_ms;
            config.branching_factor = params.branching_factor;
            config.time_horizon_s = params.time_horizon_s;
            config.time_minimum_s = params.time_minimum_s;
            config.collision_checking_increment_s = params.collision_checking_increment_s;
            config.initial_samples = params.initial_samples;
            config.use_brown_paths = params.use_brown_paths;
            config.costs = params.costs;
            config.potential_field = params.potential_field;
            config.random_seed = params.random_seed;
        }

        {
            let mut ribbons = self.shared.ribbons.write()?;
            ribbons.set_width(params.ribbon_width_m);
            ribbons.set_turning_radius(params.turning_radius_m);
            match Heuristic::from_id(params.heuristic_id) {
                Some(h) => ribbons.set_heuristic(h),
                None => warn!("Unknown heuristic {}. Ignoring.", params.heuristic_id),
            }
        }

        let mut settings = self.shared.settings.write()?;
        settings.planner = params.planner;
        settings.use_gaussian_obstacles = params.use_gaussian_obstacles;
        settings.ignore_dynamic_obstacles = params.ignore_dynamic_obstacles;

        Ok(())
    }

    pub fn add_ribbon(&self, x1_m: f64, y1_m: f64, x2_m: f64, y2_m: f64) -> Result<(), ExecError> {
        self.shared.ribbons.write()?.add(x1_m, y1_m, x2_m, y2_m);
        info!(
            "Added ribbon ({:.2}, {:.2}) - ({:.2}, {:.2})",
            x1_m, y1_m, x2_m, y2_m
        );
        Ok(())
    }

    /// Remove every ribbon, resetting the heuristic to the default k-ribbon one.
    pub fn clear_ribbons(&self) -> Result<(), ExecError> {
        let turning_radius_m = self.shared.config.read()?.turning_radius_m;
        let mut ribbons = self.shared.ribbons.write()?;

        let width_m = ribbons.width_m();
        *ribbons = RibbonManager::new(
            Heuristic::TspPointRobotNoSplitKRibbons,
            turning_radius_m,
            DEFAULT_K,
        );
        ribbons.set_width(width_m);

        info!("Ribbons cleared");
        Ok(())
    }

    /// Total length of ribbon still to cover.
    pub fn uncovered_length_m(&self) -> Result<f64, ExecError> {
        Ok(self.shared.ribbons.read()?.total_uncovered_length_m())
    }

    /// Insert or update an obstacle in both obstacle models.
    pub fn update_dynamic_obstacle(
        &self,
        id: u32,
        obstacle: &State,
        width_m: f64,
        length_m: f64,
    ) -> Result<(), ExecError> {
        self.shared
            .binary_obstacles
            .write()?
            .update(id, obstacle, width_m, length_m);
        self.shared.gaussian_obstacles.write()?.update(id, obstacle);
        Ok(())
    }

    /// Update an obstacle in the Gaussian model with a reported position covariance.
    pub fn update_dynamic_obstacle_covariance(
        &self,
        id: u32,
        obstacle: &State,
        covariance: Matrix2<f64>,
    ) -> Result<(), ExecError> {
        self.shared
            .gaussian_obstacles
            .write()?
            .update_with_covariance(id, obstacle, covariance);
        Ok(())
    }

    /// Stop tracking an obstacle, returning true if either model knew about it.
    pub fn forget_dynamic_obstacle(&self, id: u32) -> Result<bool, ExecError> {
        let binary = self.shared.binary_obstacles.write()?.forget(id);
        let gaussian = self.shared.gaussian_obstacles.write()?.forget(id);
        Ok(binary || gaussian)
    }

    /// Hand a ready made map to the planning loop, which adopts it at the start of a cycle.
    pub fn set_map(&self, map: Arc<dyn Map>) -> Result<(), ExecError> {
        *self.shared.pending_map.lock()? = Some(map);
        Ok(())
    }

    /// Load a map from a file on a background thread.
    ///
    /// Load errors are logged and leave the map unchanged, they are never returned. The handle of
    /// the loading thread is returned if it could be started, but there is no need to join it.
    pub fn refresh_map(
        &self,
        path: &str,
        latitude_deg: f64,
        longitude_deg: f64,
    ) -> Option<JoinHandle<()>> {
        let shared = self.shared.clone();
        let path = path.to_string();
        let origin = GeoOrigin {
            latitude_deg,
            longitude_deg,
        };

        match thread::Builder::new()
            .name("executive::map_loader".into())
            .spawn(move || shared.load_map(&path, origin))
        {
            Ok(h) => Some(h),
            Err(e) => {
                error!("Couldn't start the map loading thread: {}", e);
                None
            }
        }
    }

    /// Set the ideal planning cycle period.
    pub fn set_planning_time(&self, planning_time_s: f64) -> Result<(), ExecError> {
        self.shared.settings.write()?.planning_time_ideal_s = planning_time_s;
        Ok(())
    }

    /// Enable or disable writing a record of every planner invocation to the given file.
    pub fn set_planner_visualization<P: AsRef<Path>>(
        &self,
        enabled: bool,
        path: P,
    ) -> Result<(), ExecError> {
        let visualizer = if enabled {
            Some(Visualizer::create(path)?)
        } else {
            None
        };
        self.shared.config.write()?.visualizer = visualizer;
        Ok(())
    }

    /// Copy of the current planner configuration.
    pub fn planner_config(&self) -> Result<PlannerConfig, ExecError> {
        Ok(self.shared.config.read()?.clone())
    }
}

impl Drop for Executive {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            error!("Planning loop ended with an error: {}", e);
        }
    }
}

impl Shared {
    fn set_state(&self, event: StateEvent) {
        let mut state = self
            .planner_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *state = state.on(event);
        self.state_changed.notify_all();
    }

    fn cancel(&self) {
        let mut state = self
            .planner_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *state == PlannerState::Running {
            *state = state.on(StateEvent::Cancel);
            info!("Planner cancelled");
        }
        self.state_changed.notify_all();
    }

    fn is_cancelled(&self) -> Result<bool, ExecError> {
        Ok(*self.planner_state.lock()? == PlannerState::Cancelled)
    }

    /// Body of the map loading thread.
    fn load_map(&self, path: &str, origin: GeoOrigin) {
        let mut pending = match self.pending_map.lock() {
            Ok(p) => p,
            Err(_) => {
                error!("Map slot lock is poisoned, map was not updated");
                return;
            }
        };

        if path.is_empty() {
            *pending = Some(Arc::new(EmptyMap));
            info!("Map cleared, using an empty map");
            self.publisher.display_map("");
            return;
        }

        let exists = Path::new(path).exists();

        match load_map(path, origin) {
            Ok(map) => {
                *pending = Some(map);
                self.publisher.display_map(if exists { path } else { "" });
            }
            Err(e) => {
                warn!(
                    "Couldn't load the map at {}: {}. Map was not updated, set an empty path to \
                     clear the map",
                    path, e
                );
                *pending = None;
            }
        }
    }
}

impl<T> From<PoisonError<T>> for ExecError {
    fn from(_: PoisonError<T>) -> Self {
        ExecError::PoisonError
    }
}

impl From<PlannerError> for ExecError {
    fn from(e: PlannerError) -> Self {
        ExecError::Planner(e)
    }
}

impl From<PlanError> for ExecError {
    fn from(e: PlanError) -> Self {
        ExecError::Plan(e)
    }
}

impl From<PublishError> for ExecError {
    fn from(e: PublishError) -> Self {
        ExecError::Publish(e)
    }
}

impl From<VisualizerError> for ExecError {
    fn from(e: VisualizerError) -> Self {
        ExecError::Visualizer(e)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{map::GridWorldMap, plan::Plan, planner::Stats};
    use approx::assert_relative_eq;
    use std::time::Instant;

    /// How the test controller answers a published plan.
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub(super) enum Response {
        /// Start tracking from the plan's first state
        Follow,

        Reject,

        /// Start from the plan's first state moved sideways by this many meters
        Offset(f64),
    }

    #[derive(Debug, Default)]
    pub(super) struct Recording {
        pub all_done: usize,
        pub stats: usize,
        pub plans: usize,
        pub achievable: Vec<bool>,
        pub task_stats: Vec<(f64, f64, f64, f64)>,
        pub maps: Vec<String>,
    }

    #[derive(Debug, Default)]
    pub(super) struct RecordingPublisher {
        pub response: Response,
        pub rec: Mutex<Recording>,
    }

    impl Default for Response {
        fn default() -> Self {
            Response::Follow
        }
    }

    impl RecordingPublisher {
        pub fn answering(response: Response) -> Self {
            Self {
                response,
                ..Self::default()
            }
        }
    }

    impl TrajectoryPublisher for RecordingPublisher {
        fn publish_plan(&self, plan: &Plan, _: f64) -> Result<State, PublishError> {
            self.rec.lock().unwrap().plans += 1;
            let start = plan.sample(plan.start_time_s()?)?;

            match self.response {
                Response::Follow => Ok(start),
                Response::Reject => Err(PublishError::Rejected("busy".into())),
                Response::Offset(d) => Ok(State::new(
                    start.x_m,
                    start.y_m + d,
                    start.heading_rad,
                    start.speed_ms,
                    start.time_s,
                )),
            }
        }

        fn publish_stats(&self, _: &Stats, _: f64, _: f64, plan_achievable: bool) {
            let mut rec = self.rec.lock().unwrap();
            rec.stats += 1;
            rec.achievable.push(plan_achievable);
        }

        fn publish_task_level_stats(&self, wall: f64, collision: f64, total: f64, uncovered: f64) {
            self.rec
                .lock()
                .unwrap()
                .task_stats
                .push((wall, collision, total, uncovered));
        }

        fn display_trajectory(&self, _: Vec<State>, _: bool, _: bool) {}

        fn display_ribbons(&self, _: &RibbonManager) {}

        fn display_map(&self, path: &str) {
            self.rec.lock().unwrap().maps.push(path.to_string());
        }

        fn get_time(&self) -> f64 {
            util::time::now_unix_seconds()
        }

        fn all_done(&self) {
            self.rec.lock().unwrap().all_done += 1;
        }
    }

    pub(super) fn exec_params() -> ExecParams {
        ExecParams {
            planning_time_ideal_s: 0.2,
            planning_time_overhead_s: 0.05,
            ..ExecParams::default()
        }
    }

    pub(super) fn planner_params(planner: PlannerChoice) -> PlannerParams {
        PlannerParams {
            planner,
            max_speed_ms: 2.0,
            turning_radius_m: 4.0,
            coverage_turning_radius_m: 8.0,
            random_seed: Some(3),
            initial_samples: 20,
            ..PlannerParams::default()
        }
    }

    pub(super) fn executive_with(
        params: ExecParams,
        planner: PlannerChoice,
        response: Response,
    ) -> (Executive, Arc<RecordingPublisher>) {
        let publisher = Arc::new(RecordingPublisher::answering(response));
        let exec = Executive::new(params, &planner_params(planner), publisher.clone());
        (exec, publisher)
    }

    fn executive(planner: PlannerChoice) -> (Executive, Arc<RecordingPublisher>) {
        executive_with(exec_params(), planner, Response::Follow)
    }

    /// Run a shrinking executive on a long ribbon against the given controller for a second,
    /// returning the smallest turning radius seen.
    fn run_against(response: Response) -> (Executive, Arc<RecordingPublisher>, f64) {
        let params = ExecParams {
            radius_shrink_enabled: true,
            ..exec_params()
        };
        let (exec, publisher) = executive_with(params, PlannerChoice::PotentialField, response);
        exec.update_covered(0.0, 0.0, 2.0, 0.0, util::time::now_unix_seconds())
            .unwrap();
        exec.add_ribbon(0.0, 0.0, 1000.0, 0.0).unwrap();

        exec.start_planner().unwrap();

        let mut min_radius_m = f64::INFINITY;
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(1) {
            min_radius_m = min_radius_m.min(exec.planner_config().unwrap().turning_radius_m);
            thread::sleep(Duration::from_millis(5));
        }

        (exec, publisher, min_radius_m)
    }

    #[test]
    fn test_no_ribbons_finishes_immediately() {
        let (exec, publisher) = executive(PlannerChoice::BitStar);

        exec.start_planner().unwrap();
        assert!(exec.wait_until_inactive(2.0).unwrap());
        exec.terminate().unwrap();

        let rec = publisher.rec.lock().unwrap();
        assert_eq!(rec.all_done, 1);
        assert_eq!(rec.stats, 0);
        assert_eq!(rec.plans, 0);
        assert_eq!(rec.task_stats.len(), 1);
        assert_eq!(rec.task_stats[0].3, 0.0);
    }

    #[test]
    fn test_cancel_and_restart() {
        let (exec, publisher) = executive(PlannerChoice::PotentialField);
        exec.update_covered(0.0, 0.0, 2.0, 0.0, util::time::now_unix_seconds())
            .unwrap();
        exec.add_ribbon(0.0, 0.0, 1000.0, 0.0).unwrap();

        exec.start_planner().unwrap();
        assert_eq!(exec.planner_state().unwrap(), PlannerState::Running);

        // Starting again while running does nothing
        exec.start_planner().unwrap();
        thread::sleep(Duration::from_millis(500));

        exec.cancel_planner();
        assert_eq!(exec.planner_state().unwrap(), PlannerState::Cancelled);
        assert!(exec.wait_until_inactive(2.0).unwrap());

        {
            let rec = publisher.rec.lock().unwrap();
            assert!(rec.stats > 0);
            assert!(rec.plans > 0);
            assert_eq!(rec.all_done, 0);
            assert_eq!(rec.task_stats.len(), 1);
        }

        exec.start_planner().unwrap();
        assert_eq!(exec.planner_state().unwrap(), PlannerState::Running);
        exec.terminate().unwrap();
        assert_eq!(exec.planner_state().unwrap(), PlannerState::Inactive);
        assert_eq!(publisher.rec.lock().unwrap().task_stats.len(), 2);
    }

    #[test]
    fn test_rejected_plans_keep_loop_running() {
        let (exec, publisher, min_radius_m) = run_against(Response::Reject);

        assert_eq!(exec.planner_state().unwrap(), PlannerState::Running);
        let stats_before = {
            let rec = publisher.rec.lock().unwrap();
            assert!(rec.plans >= 3);
            assert!(rec.achievable.iter().all(|a| !a));
            rec.stats
        };

        // Each rejection undoes that cycle's shrink
        let shrink_m = ExecParams::default().radius_shrink_amount_m;
        assert!(min_radius_m >= 4.0 - shrink_m - 1e-9);

        thread::sleep(Duration::from_millis(300));
        assert!(publisher.rec.lock().unwrap().stats > stats_before);
        assert_eq!(exec.planner_state().unwrap(), PlannerState::Running);

        exec.terminate().unwrap();
    }

    #[test]
    fn test_unfollowable_plans_restore_radius() {
        let (exec, publisher, min_radius_m) = run_against(Response::Offset(0.5));

        assert_eq!(exec.planner_state().unwrap(), PlannerState::Running);
        {
            let rec = publisher.rec.lock().unwrap();
            assert!(rec.plans >= 3);
            assert!(rec.achievable.iter().all(|a| !a));
        }

        let shrink_m = ExecParams::default().radius_shrink_amount_m;
        assert!(min_radius_m >= 4.0 - shrink_m - 1e-9);

        exec.terminate().unwrap();
    }

    #[test]
    fn test_followed_plans_keep_shrinking() {
        let (exec, publisher, min_radius_m) = run_against(Response::Follow);

        assert!(publisher.rec.lock().unwrap().achievable.iter().any(|a| *a));
        assert!(min_radius_m < 4.0 - 2.0 * ExecParams::default().radius_shrink_amount_m);

        exec.terminate().unwrap();
    }

    #[test]
    fn test_failures_reduce_time_horizon() {
        let (exec, _publisher) = executive(PlannerChoice::AStar);
        exec.set_map(Arc::new(
            GridWorldMap::parse("1\n#####\n#####\n#####\n#####\n#####\n").unwrap(),
        ))
        .unwrap();
        exec.update_covered(2.5, 2.5, 0.0, 0.0, util::time::now_unix_seconds())
            .unwrap();
        exec.add_ribbon(20.0, 0.0, 40.0, 0.0).unwrap();

        exec.start_planner().unwrap();

        let horizon = || exec.planner_config().unwrap().time_horizon_s;
        let wait_for = |pred: &dyn Fn(f64) -> bool| {
            let start = Instant::now();
            while start.elapsed() < Duration::from_secs(5) {
                let h = horizon();
                if pred(h) {
                    return Some(h);
                }
                thread::sleep(Duration::from_millis(10));
            }
            None
        };

        // Halved once after three failures
        assert_eq!(wait_for(&|h| h < 30.0), Some(15.0));

        // Then floored at the minimum
        assert_eq!(wait_for(&|h| h <= 5.0), Some(5.0));
        thread::sleep(Duration::from_millis(600));
        assert_eq!(horizon(), 5.0);

        exec.terminate().unwrap();
    }

    #[test]
    fn test_update_covered_ignores_fast_turns() {
        let (exec, _publisher) = executive(PlannerChoice::BitStar);
        exec.add_ribbon(0.0, 0.0, 10.0, 0.0).unwrap();

        exec.update_covered(1.0, 0.0, 1.0, 0.0, 0.0).unwrap();
        assert_relative_eq!(exec.uncovered_length_m().unwrap(), 8.0, epsilon = 1e-9);

        // Turned a whole radian in a second
        exec.update_covered(5.0, 0.0, 1.0, 1.0, 1.0).unwrap();
        assert_relative_eq!(exec.uncovered_length_m().unwrap(), 8.0, epsilon = 1e-9);

        exec.update_covered(8.0, 0.0, 1.0, 1.1, 2.0).unwrap();
        assert!(exec.uncovered_length_m().unwrap() < 7.0);
    }

    #[test]
    fn test_configuration_and_ribbons() {
        let (exec, _publisher) = executive(PlannerChoice::BitStar);

        let mut params = planner_params(PlannerChoice::AStar);
        params.heuristic_id = 99;
        params.ribbon_width_m = 4.0;
        params.turning_radius_m = 6.0;
        exec.set_configuration(&params).unwrap();

        let config = exec.planner_config().unwrap();
        assert_eq!(config.turning_radius_m, 6.0);
        {
            let ribbons = exec.shared.ribbons.read().unwrap();
            assert_eq!(ribbons.width_m(), 4.0);
            assert_eq!(ribbons.heuristic(), Heuristic::TspPointRobotNoSplitKRibbons);
        }
        assert_eq!(exec.shared.settings.read().unwrap().planner, PlannerChoice::AStar);

        exec.add_ribbon(0.0, 0.0, 10.0, 0.0).unwrap();
        exec.clear_ribbons().unwrap();
        assert_eq!(exec.uncovered_length_m().unwrap(), 0.0);
        assert_eq!(exec.shared.ribbons.read().unwrap().width_m(), 4.0);
    }

    #[test]
    fn test_obstacles_update_both_models() {
        let (exec, _publisher) = executive(PlannerChoice::BitStar);
        let obs = State::new(10.0, 0.0, 0.0, 1.0, 0.0);

        exec.update_dynamic_obstacle(7, &obs, 2.0, 4.0).unwrap();
        assert_eq!(exec.shared.binary_obstacles.read().unwrap().len(), 1);
        assert_eq!(exec.shared.gaussian_obstacles.read().unwrap().len(), 1);

        exec.update_dynamic_obstacle_covariance(7, &obs, Matrix2::identity())
            .unwrap();
        assert_eq!(
            exec.shared.gaussian_obstacles.read().unwrap().get(7).unwrap().covariance,
            Matrix2::identity()
        );

        assert!(exec.forget_dynamic_obstacle(7).unwrap());
        assert!(!exec.forget_dynamic_obstacle(7).unwrap());
    }

    #[test]
    fn test_refresh_map() {
        let (exec, publisher) = executive(PlannerChoice::BitStar);

        let path = std::env::temp_dir().join("plan_exec_refresh_map_test.map");
        std::fs::write(&path, "1\n_#_\n").unwrap();
        let path_str = path.to_string_lossy().to_string();

        exec.refresh_map(&path_str, 0.0, 0.0).unwrap().join().unwrap();
        exec.refresh_map("/no/such/file.map", 0.0, 0.0)
            .unwrap()
            .join()
            .unwrap();
        exec.refresh_map("", 0.0, 0.0).unwrap().join().unwrap();

        assert_eq!(
            publisher.rec.lock().unwrap().maps,
            vec![path_str, String::new(), String::new()]
        );
        assert!(exec.shared.pending_map.lock().unwrap().is_some());

        // Unsupported formats leave the map alone
        exec.refresh_map("/no/such/file.tif", 0.0, 0.0)
            .unwrap()
            .join()
            .unwrap();
        let tif = std::env::temp_dir().join("plan_exec_refresh_map_test.tif");
        std::fs::write(&tif, "not a map").unwrap();
        exec.refresh_map(&tif.to_string_lossy(), 0.0, 0.0)
            .unwrap()
            .join()
            .unwrap();
        assert!(exec.shared.pending_map.lock().unwrap().is_none());
        assert_eq!(publisher.rec.lock().unwrap().maps.len(), 4);

        std::fs::remove_file(path).ok();
        std::fs::remove_file(tif).ok();
    }

    #[test]
    fn test_state_machine() {
        use PlannerState::*;

        assert_eq!(Inactive.on(StateEvent::Start), Running);
        assert_eq!(Inactive.on(StateEvent::Cancel), Inactive);
        assert_eq!(Running.on(StateEvent::Cancel), Cancelled);
        assert_eq!(Cancelled.on(StateEvent::Start), Cancelled);
        assert_eq!(Cancelled.on(StateEvent::LoopExited), Inactive);
    }
}
