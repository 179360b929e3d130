//! # Dynamic Obstacles
//!
//! Models of moving obstacles (other vessels) used to score the risk of a collision at a given
//! point and time. Two models are provided:
//!
//! - [`BinaryObstacles`]: each obstacle is a rectangle advected at constant velocity, scoring one
//!   inside the rectangle and zero outside.
//! - [`GaussianObstacles`]: each obstacle is a 2D normal distribution whose mean is advected at
//!   constant velocity, scoring the density at the query point.
//!
//! Scores are weights which increase with the chance of a collision, not probabilities.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod binary;
mod gaussian;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::state::State;
pub use binary::{BinaryObstacle, BinaryObstacles};
pub use gaussian::{GaussianObstacle, GaussianObstacles, TimeUncertainty};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Something which can score the risk of a collision with dynamic obstacles.
pub trait DynamicObstacles {
    /// Score the chance of a collision at the point at the given time. `strict` controls whether
    /// touching an obstacle's boundary counts.
    fn collision_exists(&self, x_m: f64, y_m: f64, time_s: f64, strict: bool) -> f64;

    fn collision_exists_at(&self, state: &State, strict: bool) -> f64 {
        self.collision_exists(state.x_m, state.y_m, state.time_s, strict)
    }
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Which obstacle model the planners score against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObstacleModelKind {
    Binary,
    Gaussian,
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// An owned copy of both obstacle models, taken before planning so that planners never hold the
/// obstacle locks.
#[derive(Debug, Clone, Default)]
pub struct ObstacleSnapshot {
    pub binary: BinaryObstacles,
    pub gaussian: GaussianObstacles,
    pub kind: ObstacleModelKind,

    /// If set every query scores zero
    pub ignore: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for ObstacleModelKind {
    fn default() -> Self {
        ObstacleModelKind::Binary
    }
}

impl ObstacleSnapshot {
    /// Score a point for planning, widening the Gaussian model the further the query time is from
    /// each obstacle's last observation.
    pub fn planning_score(
        &self,
        x_m: f64,
        y_m: f64,
        time_s: f64,
        strict: bool,
        uncertainty: &TimeUncertainty,
    ) -> f64 {
        if self.ignore {
            return 0.0;
        }

        match self.kind {
            ObstacleModelKind::Binary => self.binary.collision_exists(x_m, y_m, time_s, strict),
            ObstacleModelKind::Gaussian => {
                self.gaussian
                    .widened_collision_exists(x_m, y_m, time_s, uncertainty)
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ignore || (self.binary.is_empty() && self.gaussian.is_empty())
    }
}

impl DynamicObstacles for ObstacleSnapshot {
    fn collision_exists(&self, x_m: f64, y_m: f64, time_s: f64, strict: bool) -> f64 {
        if self.ignore {
            return 0.0;
        }

        match self.kind {
            ObstacleModelKind::Binary => self.binary.collision_exists(x_m, y_m, time_s, strict),
            ObstacleModelKind::Gaussian => {
                self.gaussian.collision_exists(x_m, y_m, time_s, strict)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_snapshot_delegates() {
        let mut snap = ObstacleSnapshot::default();
        let obs = State::new(10.0, 0.0, 0.0, 0.0, 0.0);
        snap.binary.update(1, &obs, 4.0, 8.0);
        snap.gaussian.update(1, &obs);

        assert_eq!(snap.collision_exists(10.0, 0.0, 0.0, true), 1.0);

        snap.kind = ObstacleModelKind::Gaussian;
        let g = snap.collision_exists(10.0, 0.0, 0.0, true);
        assert!(g > 0.0 && g < 1.0);

        snap.ignore = true;
        assert_eq!(snap.collision_exists(10.0, 0.0, 0.0, true), 0.0);
        assert_eq!(
            snap.planning_score(10.0, 0.0, 0.0, true, &TimeUncertainty::default()),
            0.0
        );
        assert!(snap.is_empty());
    }
}
