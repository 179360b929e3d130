//! # Coverage planning library
//!
//! Motion planning for an autonomous surface vehicle covering a set of survey lines ("ribbons")
//! while avoiding a static map and moving obstacles.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Executive - the replanning loop and its planner state machine
pub mod executive;

/// Static maps of blocked and free space
pub mod map;

/// Dynamic obstacle models
pub mod obstacles;

/// Timed Dubins trajectories
pub mod plan;

/// Planner strategies
pub mod planner;

/// Ribbons to be covered and the heuristics estimating the work left
pub mod ribbon;

/// Simulated trajectory controller
pub mod sim;

/// Vehicle state
pub mod state;
