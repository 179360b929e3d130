//! # Ribbon Manager
//!
//! Tracks which parts of the assigned coverage swaths ("ribbons") are still uncovered. Each ribbon
//! is a directed line segment, and all ribbons share the same swath width.
//!
//! Covering a point removes a piece of swath-width length from every ribbon whose centreline passes
//! close enough to the point, splitting the ribbon if the point lies in its interior. Any leftover
//! piece shorter than [`MIN_RIBBON_LENGTH_M`] is dropped, so a manager with no ribbons left is
//! exactly a manager with no uncovered length left.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod heuristic;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, warn};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::state::State;
pub use heuristic::{Heuristic, TourLeg};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Ribbons, or pieces of ribbons, shorter than this are considered covered.
pub const MIN_RIBBON_LENGTH_M: f64 = 0.5;

/// Allowance for round-off when deciding if a point projects onto a ribbon.
const PROJECTION_TOLERANCE_M: f64 = 1e-6;

/// Default swath width.
pub const DEFAULT_RIBBON_WIDTH_M: f64 = 2.0;

/// Default number of ribbons considered by the k-ribbon heuristics.
pub const DEFAULT_K: usize = 2;

/// Default turning radius used by the Dubins heuristics.
pub const DEFAULT_TURNING_RADIUS_M: f64 = 8.0;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// An uncovered coverage swath, as its centreline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ribbon {
    pub start_m: Vector2<f64>,
    pub end_m: Vector2<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RibbonManager {
    ribbons: Vec<Ribbon>,

    /// Swath width shared by every ribbon
    width_m: f64,

    heuristic: Heuristic,

    /// Turning radius used when estimating transitions with Dubins curves
    turning_radius_m: f64,

    /// Number of ribbons considered by the k-ribbon heuristics
    k: usize,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Ribbon {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            start_m: Vector2::new(x1, y1),
            end_m: Vector2::new(x2, y2),
        }
    }

    pub fn length_m(&self) -> f64 {
        (self.end_m - self.start_m).norm()
    }

    /// Heading of the ribbon from its start to its end.
    pub fn heading_rad(&self) -> f64 {
        let d = self.end_m - self.start_m;
        util::maths::mod_2pi(d.y.atan2(d.x))
    }

    /// The same ribbon travelled in the opposite direction.
    pub fn reversed(&self) -> Self {
        Self {
            start_m: self.end_m,
            end_m: self.start_m,
        }
    }

    /// State at the start of the ribbon facing along it.
    pub fn start_state(&self, speed_ms: f64, time_s: f64) -> State {
        State::new(
            self.start_m.x,
            self.start_m.y,
            self.heading_rad(),
            speed_ms,
            time_s,
        )
    }

    /// State at the end of the ribbon facing along it.
    pub fn end_state(&self, speed_ms: f64, time_s: f64) -> State {
        State::new(
            self.end_m.x,
            self.end_m.y,
            self.heading_rad(),
            speed_ms,
            time_s,
        )
    }

    /// Project a point onto the ribbon's centreline, giving the distance along the ribbon from its
    /// start and the perpendicular distance from the line.
    pub fn project(&self, point_m: &Vector2<f64>) -> (f64, f64) {
        let length_m = self.length_m();
        let rel = point_m - self.start_m;

        if length_m == 0.0 {
            return (0.0, rel.norm());
        }

        let dir = (self.end_m - self.start_m) / length_m;
        let along_m = rel.dot(&dir);
        let perp_m = (rel.x * dir.y - rel.y * dir.x).abs();

        (along_m, perp_m)
    }

    /// Shortest distance from the point to either end of the ribbon.
    pub fn min_endpoint_distance_m(&self, point_m: &Vector2<f64>) -> f64 {
        (self.start_m - point_m)
            .norm()
            .min((self.end_m - point_m).norm())
    }

    /// Point at the given distance along the ribbon.
    fn point_at(&self, along_m: f64) -> Vector2<f64> {
        let length_m = self.length_m();
        if length_m == 0.0 {
            return self.start_m;
        }
        self.start_m + (self.end_m - self.start_m) * (along_m / length_m)
    }

    /// Remove the interval `[from, to]` (in distance along the ribbon) and return whatever pieces
    /// are long enough to keep.
    fn remove_interval(&self, from_m: f64, to_m: f64) -> Vec<Ribbon> {
        let length_m = self.length_m();
        let mut pieces = Vec::with_capacity(2);

        if from_m > 0.0 {
            let end = from_m.min(length_m);
            if end >= MIN_RIBBON_LENGTH_M {
                pieces.push(Ribbon {
                    start_m: self.start_m,
                    end_m: self.point_at(end),
                });
            }
        }

        if to_m < length_m {
            let start = to_m.max(0.0);
            if length_m - start >= MIN_RIBBON_LENGTH_M {
                pieces.push(Ribbon {
                    start_m: self.point_at(start),
                    end_m: self.end_m,
                });
            }
        }

        pieces
    }
}

impl Default for RibbonManager {
    fn default() -> Self {
        Self {
            ribbons: Vec::new(),
            width_m: DEFAULT_RIBBON_WIDTH_M,
            heuristic: Heuristic::default(),
            turning_radius_m: DEFAULT_TURNING_RADIUS_M,
            k: DEFAULT_K,
        }
    }
}

impl RibbonManager {
    pub fn new(heuristic: Heuristic, turning_radius_m: f64, k: usize) -> Self {
        Self {
            heuristic,
            turning_radius_m,
            k,
            ..Self::default()
        }
    }

    /// Add a new ribbon. Ribbons too short to ever be uncovered are ignored.
    pub fn add(&mut self, x1: f64, y1: f64, x2: f64, y2: f64) {
        let ribbon = Ribbon::new(x1, y1, x2, y2);
        if ribbon.length_m() < MIN_RIBBON_LENGTH_M {
            warn!(
                "Ignoring ribbon ({}, {}) - ({}, {}) as it is shorter than {} m",
                x1, y1, x2, y2, MIN_RIBBON_LENGTH_M
            );
            return;
        }
        self.ribbons.push(ribbon);
    }

    /// Remove all ribbons, keeping the heuristic settings.
    pub fn clear(&mut self) {
        self.ribbons.clear();
    }

    pub fn ribbons(&self) -> &[Ribbon] {
        &self.ribbons
    }

    pub fn width_m(&self) -> f64 {
        self.width_m
    }

    pub fn set_width(&mut self, width_m: f64) {
        self.width_m = width_m;
    }

    pub fn heuristic(&self) -> Heuristic {
        self.heuristic
    }

    pub fn set_heuristic(&mut self, heuristic: Heuristic) {
        self.heuristic = heuristic;
    }

    pub fn set_turning_radius(&mut self, turning_radius_m: f64) {
        self.turning_radius_m = turning_radius_m;
    }

    pub fn done(&self) -> bool {
        self.ribbons.is_empty()
    }

    pub fn total_uncovered_length_m(&self) -> f64 {
        self.ribbons.iter().map(|r| r.length_m()).sum()
    }

    /// Mark coverage contributed by passing through the point `(x, y)`.
    ///
    /// A ribbon is covered at the point if the point projects onto the ribbon and lies within half
    /// a swath width of its centreline (`strict`), or within a full swath width (not `strict`).
    pub fn cover(&mut self, x: f64, y: f64, strict: bool) {
        let point_m = Vector2::new(x, y);
        let half_width_m = self.width_m / 2.0;
        let max_perp_m = if strict { half_width_m } else { self.width_m };

        let mut remaining = Vec::with_capacity(self.ribbons.len());
        for ribbon in self.ribbons.drain(..) {
            let (along_m, perp_m) = ribbon.project(&point_m);

            if perp_m <= max_perp_m
                && along_m >= -PROJECTION_TOLERANCE_M
                && along_m <= ribbon.length_m() + PROJECTION_TOLERANCE_M
            {
                remaining.extend(
                    ribbon.remove_interval(along_m - half_width_m, along_m + half_width_m),
                );
            } else {
                remaining.push(ribbon);
            }
        }
        self.ribbons = remaining;
    }

    /// Mark coverage along the straight line between two points.
    pub fn cover_between(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, strict: bool) {
        let from = Vector2::new(x1, y1);
        let to = Vector2::new(x2, y2);
        let dist_m = (to - from).norm();

        // Step at most half a swath so consecutive covered intervals overlap
        let max_step_m = (self.width_m / 2.0).max(1e-3);
        let steps = (dist_m / max_step_m).ceil().max(1.0) as usize;

        for i in 0..=steps {
            let p = from + (to - from) * (i as f64 / steps as f64);
            self.cover(p.x, p.y, strict);
        }
    }

    /// Estimate the distance left to travel before every ribbon is covered, starting from the
    /// given state, according to the selected heuristic.
    pub fn approximate_distance_until_done(&self, state: &State) -> f64 {
        if self.done() {
            return 0.0;
        }

        let radius = if self.heuristic.uses_dubins() {
            Some(self.turning_radius_m)
        } else {
            None
        };

        match self.heuristic {
            Heuristic::MaxDistance => heuristic::max_distance(&self.ribbons, state),
            h if h.limits_to_k() => {
                let (near, far) = heuristic::split_nearest(&self.ribbons, state, self.k);
                let far_len: f64 = far.iter().map(|r| r.length_m()).sum();
                heuristic::best_tour(&near, state, radius).0 + far_len
            }
            _ => heuristic::best_tour(&self.ribbons, state, radius).0,
        }
    }

    /// The order, and direction, in which to cover every ribbon when starting from the given
    /// state. The returned ribbons are oriented in the direction they should be travelled.
    pub fn tour(&self, state: &State) -> Vec<Ribbon> {
        let radius = if self.heuristic.uses_dubins() {
            Some(self.turning_radius_m)
        } else {
            None
        };

        let (_, legs) = heuristic::best_tour(&self.ribbons, state, radius);
        let tour: Vec<Ribbon> = legs.iter().map(|l| l.oriented(&self.ribbons)).collect();

        debug!("Ribbon tour from {}: {} legs", state, tour.len());
        tour
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_short_ribbons_ignored() {
        let mut rm = RibbonManager::default();
        rm.add(0.0, 0.0, 0.1, 0.1);
        assert!(rm.done());
        assert_eq!(rm.total_uncovered_length_m(), 0.0);
    }

    #[test]
    fn test_cover_splits() {
        let mut rm = RibbonManager::default();
        rm.add(0.0, 0.0, 10.0, 0.0);

        rm.cover(5.0, 0.5, true);
        assert_eq!(rm.ribbons().len(), 2);
        assert_relative_eq!(rm.total_uncovered_length_m(), 8.0, epsilon = 1e-9);

        // Too far off the centreline for a strict cover, but fine for a non-strict one
        let before = rm.total_uncovered_length_m();
        rm.cover(1.0, 1.5, true);
        assert_relative_eq!(rm.total_uncovered_length_m(), before);
        rm.cover(1.0, 1.5, false);
        assert!(rm.total_uncovered_length_m() < before);
    }

    #[test]
    fn test_cover_monotonic_and_done() {
        let mut rm = RibbonManager::default();
        rm.add(0.0, 0.0, 20.0, 0.0);
        rm.add(0.0, 10.0, 0.0, 30.0);

        let mut last = rm.total_uncovered_length_m();
        assert_relative_eq!(last, 40.0, epsilon = 1e-9);

        let mut x = 0.0;
        while x <= 20.0 {
            rm.cover(x, 0.0, true);
            let now = rm.total_uncovered_length_m();
            assert!(now <= last);
            assert_eq!(rm.done(), now == 0.0);
            last = now;
            x += 0.7;
        }

        rm.cover_between(0.0, 10.0, 0.0, 30.0, true);
        assert!(rm.done());
        assert_eq!(rm.total_uncovered_length_m(), 0.0);
    }

    #[test]
    fn test_point_off_the_end_does_nothing() {
        let mut rm = RibbonManager::default();
        rm.add(0.0, 0.0, 10.0, 0.0);
        rm.cover(-0.5, 0.0, true);
        rm.cover(10.5, 0.0, true);
        assert_relative_eq!(rm.total_uncovered_length_m(), 10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_tour_orients_ribbons() {
        let mut rm = RibbonManager::default();
        rm.set_heuristic(Heuristic::TspPointRobotNoSplitAllRibbons);
        rm.add(10.0, 0.0, 0.0, 0.0);

        // Starting at the origin the ribbon is best covered in reverse
        let tour = rm.tour(&State::new(0.0, 0.0, 0.0, 1.0, 0.0));
        assert_eq!(tour.len(), 1);
        assert_relative_eq!(tour[0].start_m.x, 0.0);
        assert_relative_eq!(tour[0].end_m.x, 10.0);
    }
}
