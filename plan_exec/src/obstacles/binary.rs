//! Rectangular obstacles advected at constant velocity

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::HashMap;

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use super::DynamicObstacles;
use crate::state::State;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A rectangular obstacle, `length_m` along its heading and `width_m` across it, centred on its
/// position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BinaryObstacle {
    /// Last observed state
    pub state: State,
    pub width_m: f64,
    pub length_m: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BinaryObstacles {
    obstacles: HashMap<u32, BinaryObstacle>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl BinaryObstacle {
    /// Centre of the obstacle at the given time.
    pub fn centre_at(&self, time_s: f64) -> Vector2<f64> {
        self.state.push(time_s - self.state.time_s).position_m()
    }

    /// Express a point in the obstacle's frame at the given time, as (along, across) offsets from
    /// its centre.
    fn to_obstacle_frame(&self, x_m: f64, y_m: f64, time_s: f64) -> (f64, f64) {
        let rel = Vector2::new(x_m, y_m) - self.centre_at(time_s);
        let (s, c) = self.state.heading_rad.sin_cos();
        (rel.x * c + rel.y * s, -rel.x * s + rel.y * c)
    }

    /// Returns true if the point lies within the rectangle at the given time. With `strict` the
    /// boundary counts as inside.
    pub fn contains(&self, x_m: f64, y_m: f64, time_s: f64, strict: bool) -> bool {
        let (along, across) = self.to_obstacle_frame(x_m, y_m, time_s);
        let half_l = self.length_m / 2.0;
        let half_w = self.width_m / 2.0;

        if strict {
            along.abs() <= half_l && across.abs() <= half_w
        } else {
            along.abs() < half_l && across.abs() < half_w
        }
    }

    /// Distance from the point to the rectangle at the given time, zero inside it.
    pub fn clearance_m(&self, x_m: f64, y_m: f64, time_s: f64) -> f64 {
        let (along, across) = self.to_obstacle_frame(x_m, y_m, time_s);
        let dx = (along.abs() - self.length_m / 2.0).max(0.0);
        let dy = (across.abs() - self.width_m / 2.0).max(0.0);
        (dx * dx + dy * dy).sqrt()
    }

    pub fn area_m2(&self) -> f64 {
        self.width_m * self.length_m
    }
}

impl BinaryObstacles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the obstacle with the given ID.
    pub fn update(&mut self, id: u32, state: &State, width_m: f64, length_m: f64) {
        self.obstacles.insert(
            id,
            BinaryObstacle {
                state: *state,
                width_m,
                length_m,
            },
        );
    }

    /// Remove the obstacle, returning true if it was tracked.
    pub fn forget(&mut self, id: u32) -> bool {
        self.obstacles.remove(&id).is_some()
    }

    pub fn get(&self, id: u32) -> Option<&BinaryObstacle> {
        self.obstacles.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u32, &BinaryObstacle)> {
        self.obstacles.iter()
    }

    pub fn len(&self) -> usize {
        self.obstacles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.obstacles.is_empty()
    }
}

impl DynamicObstacles for BinaryObstacles {
    fn collision_exists(&self, x_m: f64, y_m: f64, time_s: f64, strict: bool) -> f64 {
        if self
            .obstacles
            .values()
            .any(|o| o.contains(x_m, y_m, time_s, strict))
        {
            1.0
        } else {
            0.0
        }
    }
}
