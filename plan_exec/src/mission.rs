//! Mission description loaded from `mission.toml`

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

use plan_lib::state::State;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct MissionParams {
    /// Where the vehicle starts, the time is ignored
    pub start: StartParams,

    /// Ribbons as `[x1, y1, x2, y2]`
    pub ribbons: Vec<[f64; 4]>,

    #[serde(default)]
    pub obstacles: Vec<ObstacleParams>,

    /// Map file relative to the params directory, no map if empty
    #[serde(default)]
    pub map_file: String,

    #[serde(default)]
    pub latitude_deg: f64,

    #[serde(default)]
    pub longitude_deg: f64,

    /// The mission is abandoned after this long
    pub time_limit_s: f64,

    /// Write a record of every planner invocation into the session directory
    #[serde(default)]
    pub visualize_planner: bool,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct StartParams {
    pub x_m: f64,
    pub y_m: f64,
    pub heading_rad: f64,
    pub speed_ms: f64,
}

/// A moving obstacle, observed at the start of the mission.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ObstacleParams {
    pub id: u32,
    pub x_m: f64,
    pub y_m: f64,
    pub heading_rad: f64,
    pub speed_ms: f64,
    pub width_m: f64,
    pub length_m: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl StartParams {
    pub fn state_at(&self, time_s: f64) -> State {
        State::new(self.x_m, self.y_m, self.heading_rad, self.speed_ms, time_s)
    }
}

impl ObstacleParams {
    pub fn state_at(&self, time_s: f64) -> State {
        State::new(self.x_m, self.y_m, self.heading_rad, self.speed_ms, time_s)
    }
}
