//! Gaussian obstacles
//!
//! Each obstacle is a 2D normal distribution over its position. The mean is advected at the
//! obstacle's last observed velocity to the query time and the density at the query point is used
//! as the score. The density is not normalised into a probability of collision.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::HashMap;

use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};

use super::DynamicObstacles;
use crate::state::State;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaussianObstacle {
    /// Last observed state
    pub state: State,
    pub mean_m: Vector2<f64>,
    pub covariance: Matrix2<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GaussianObstacles {
    obstacles: HashMap<u32, GaussianObstacle>,
}

/// Growth of an obstacle's position uncertainty with the time since it was last observed.
///
/// The standard deviation is scaled by `1 + stdev_factor * |dt|^stdev_power`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeUncertainty {
    pub stdev_factor: f64,
    pub stdev_power: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for TimeUncertainty {
    fn default() -> Self {
        Self {
            stdev_factor: 1.0,
            stdev_power: 1.0,
        }
    }
}

impl TimeUncertainty {
    fn stdev_scale(&self, dt_s: f64) -> f64 {
        1.0 + self.stdev_factor * dt_s.abs().powf(self.stdev_power)
    }
}

impl GaussianObstacle {
    /// Covariance given to obstacles whose uncertainty isn't reported.
    pub fn default_covariance() -> Matrix2<f64> {
        Matrix2::new(30.0, 10.0, 10.0, 30.0)
    }

    pub fn new(state: &State, covariance: Matrix2<f64>) -> Self {
        Self {
            state: *state,
            mean_m: state.position_m(),
            covariance,
        }
    }

    /// Copy of the obstacle with its mean advected to the given time.
    pub fn project(&self, time_s: f64) -> Self {
        let state = self.state.push(time_s - self.state.time_s);
        Self {
            state,
            mean_m: state.position_m(),
            covariance: self.covariance,
        }
    }

    /// Density of the distribution at the point.
    pub fn pdf(&self, point_m: &Vector2<f64>) -> f64 {
        pdf_with(&self.mean_m, &self.covariance, point_m)
    }
}

impl GaussianObstacles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the obstacle with the given ID. A previously reported covariance is
    /// kept, otherwise the default is used.
    pub fn update(&mut self, id: u32, state: &State) {
        let covariance = self
            .obstacles
            .get(&id)
            .map(|o| o.covariance)
            .unwrap_or_else(GaussianObstacle::default_covariance);
        self.obstacles
            .insert(id, GaussianObstacle::new(state, covariance));
    }

    pub fn update_with_covariance(&mut self, id: u32, state: &State, covariance: Matrix2<f64>) {
        self.obstacles
            .insert(id, GaussianObstacle::new(state, covariance));
    }

    /// Remove the obstacle, returning true if it was tracked.
    pub fn forget(&mut self, id: u32) -> bool {
        self.obstacles.remove(&id).is_some()
    }

    pub fn get(&self, id: u32) -> Option<&GaussianObstacle> {
        self.obstacles.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u32, &GaussianObstacle)> {
        self.obstacles.iter()
    }

    pub fn len(&self) -> usize {
        self.obstacles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.obstacles.is_empty()
    }

    /// Sum of densities with each covariance inflated by the time since the obstacle was last
    /// observed.
    pub fn widened_collision_exists(
        &self,
        x_m: f64,
        y_m: f64,
        time_s: f64,
        uncertainty: &TimeUncertainty,
    ) -> f64 {
        let point_m = Vector2::new(x_m, y_m);

        self.obstacles
            .values()
            .map(|o| {
                let scale = uncertainty.stdev_scale(time_s - o.state.time_s);
                let projected = o.project(time_s);
                pdf_with(
                    &projected.mean_m,
                    &(projected.covariance * (scale * scale)),
                    &point_m,
                )
            })
            .sum()
    }
}

impl DynamicObstacles for GaussianObstacles {
    fn collision_exists(&self, x_m: f64, y_m: f64, time_s: f64, _strict: bool) -> f64 {
        let point_m = Vector2::new(x_m, y_m);
        self.obstacles
            .values()
            .map(|o| o.project(time_s).pdf(&point_m))
            .sum()
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Bivariate normal density. A singular covariance has no density and scores zero.
fn pdf_with(mean_m: &Vector2<f64>, covariance: &Matrix2<f64>, point_m: &Vector2<f64>) -> f64 {
    let det = covariance.determinant();
    let inv = match covariance.try_inverse() {
        Some(i) if det > 0.0 => i,
        _ => return 0.0,
    };

    let diff = point_m - mean_m;
    let quad_form = diff.dot(&(inv * diff));
    let norm = 1.0 / (std::f64::consts::TAU * det.sqrt());

    norm * (-0.5 * quad_form).exp()
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_max_at_mean() {
        let mut obs = GaussianObstacles::new();
        obs.update(7, &State::new(0.0, 0.0, 0.0, 2.0, 0.0));

        // Mean is at (10, 0) after 5 s
        let at_mean = obs.collision_exists(10.0, 0.0, 5.0, false);
        assert_relative_eq!(
            at_mean,
            1.0 / (std::f64::consts::TAU * 800f64.sqrt()),
            epsilon = 1e-12
        );

        for &(dx, dy) in [(1.0, 0.0), (0.0, -1.0), (3.0, 3.0), (-0.1, 0.2), (-3.0, 3.0)].iter() {
            assert!(obs.collision_exists(10.0 + dx, dy, 5.0, false) < at_mean);
        }
    }

    #[test]
    fn test_covariance_kept_on_update() {
        let mut obs = GaussianObstacles::new();
        let cov = Matrix2::new(4.0, 0.0, 0.0, 9.0);
        obs.update_with_covariance(1, &State::default(), cov);
        obs.update(1, &State::new(5.0, 5.0, 0.0, 0.0, 1.0));

        let o = obs.get(1).unwrap();
        assert_eq!(o.covariance, cov);
        assert_eq!(o.mean_m, Vector2::new(5.0, 5.0));

        assert!(obs.forget(1));
        assert_eq!(obs.len(), 0);
    }

    #[test]
    fn test_widening_spreads_density() {
        let mut obs = GaussianObstacles::new();
        obs.update(1, &State::default());
        let u = TimeUncertainty::default();

        // No time since observation means no widening
        assert_relative_eq!(
            obs.widened_collision_exists(0.0, 0.0, 0.0, &u),
            obs.collision_exists(0.0, 0.0, 0.0, false)
        );

        // Later queries are flatter: lower at the mean, higher far away
        assert!(
            obs.widened_collision_exists(0.0, 0.0, 3.0, &u)
                < obs.collision_exists(0.0, 0.0, 3.0, false)
        );
        assert!(
            obs.widened_collision_exists(40.0, 0.0, 3.0, &u)
                > obs.collision_exists(40.0, 0.0, 3.0, false)
        );
    }

    #[test]
    fn test_singular_covariance() {
        let mut obs = GaussianObstacles::new();
        obs.update_with_covariance(1, &State::default(), Matrix2::zeros());
        assert_eq!(obs.collision_exists(0.0, 0.0, 0.0, true), 0.0);
    }
}
