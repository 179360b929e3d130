//! Coverage ordering heuristics
//!
//! The heuristics estimate the distance left to cover every ribbon by solving a small travelling
//! salesman problem over the ribbons, without splitting any ribbon. Transitions between ribbons
//! are either straight lines (point robot) or Dubins curves.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::Ribbon;
use crate::{
    plan::dubins::{Configuration, DubinsPath},
    state::State,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Above this many ribbons the tour is built greedily instead of searched exhaustively.
const EXACT_TOUR_LIMIT: usize = 5;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Heuristic used to order ribbons and estimate the remaining distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Heuristic {
    TspPointRobotNoSplitAllRibbons,
    TspPointRobotNoSplitKRibbons,
    MaxDistance,
    TspDubinsNoSplitAllRibbons,
    TspDubinsNoSplitKRibbons,
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// One leg of a tour: which ribbon to cover, and whether to travel it end to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TourLeg {
    pub index: usize,
    pub reversed: bool,
}

struct TourSearch<'r> {
    ribbons: &'r [Ribbon],
    radius_m: Option<f64>,
    best_cost_m: f64,
    best: Vec<TourLeg>,
    current: Vec<TourLeg>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for Heuristic {
    fn default() -> Self {
        Heuristic::TspPointRobotNoSplitKRibbons
    }
}

impl Heuristic {
    /// Map the integer identifier used by the configuration interface onto a heuristic.
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(Heuristic::TspPointRobotNoSplitAllRibbons),
            1 => Some(Heuristic::TspPointRobotNoSplitKRibbons),
            2 => Some(Heuristic::MaxDistance),
            3 => Some(Heuristic::TspDubinsNoSplitAllRibbons),
            4 => Some(Heuristic::TspDubinsNoSplitKRibbons),
            _ => None,
        }
    }

    pub fn uses_dubins(&self) -> bool {
        matches!(
            self,
            Heuristic::TspDubinsNoSplitAllRibbons | Heuristic::TspDubinsNoSplitKRibbons
        )
    }

    pub fn limits_to_k(&self) -> bool {
        matches!(
            self,
            Heuristic::TspPointRobotNoSplitKRibbons | Heuristic::TspDubinsNoSplitKRibbons
        )
    }
}

impl TourLeg {
    /// The ribbon of this leg, oriented in its direction of travel.
    pub fn oriented(&self, ribbons: &[Ribbon]) -> Ribbon {
        let r = ribbons[self.index];
        if self.reversed {
            r.reversed()
        } else {
            r
        }
    }
}

impl<'r> TourSearch<'r> {
    fn search(&mut self, at: &State, visited: u32, cost_m: f64, remaining_m: f64) {
        // Every ribbon still has to be driven, so the remaining length bounds the cost from below
        if cost_m + remaining_m >= self.best_cost_m {
            return;
        }

        if self.current.len() == self.ribbons.len() {
            self.best_cost_m = cost_m;
            self.best = self.current.clone();
            return;
        }

        for index in 0..self.ribbons.len() {
            if visited & (1 << index) != 0 {
                continue;
            }

            for &reversed in [false, true].iter() {
                let leg = TourLeg { index, reversed };
                let ribbon = leg.oriented(self.ribbons);
                let leg_m = transition_m(at, &ribbon, self.radius_m) + ribbon.length_m();

                self.current.push(leg);
                self.search(
                    &ribbon.end_state(0.0, 0.0),
                    visited | (1 << index),
                    cost_m + leg_m,
                    remaining_m - ribbon.length_m(),
                );
                self.current.pop();
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Distance from a state to the start of a ribbon, arriving along the ribbon when using Dubins
/// transitions.
fn transition_m(from: &State, ribbon: &Ribbon, radius_m: Option<f64>) -> f64 {
    let straight_m = (ribbon.start_m - from.position_m()).norm();

    match radius_m {
        Some(r) => DubinsPath::shortest(
            Configuration::new(from.x_m, from.y_m, from.heading_rad),
            Configuration::new(ribbon.start_m.x, ribbon.start_m.y, ribbon.heading_rad()),
            r,
        )
        .map(|p| p.length_m())
        .unwrap_or(straight_m),
        None => straight_m,
    }
}

/// Find the cheapest order and direction to cover all ribbons from the given state.
///
/// Returns the tour's total length, including the length of the ribbons themselves.
pub(super) fn best_tour(
    ribbons: &[Ribbon],
    from: &State,
    radius_m: Option<f64>,
) -> (f64, Vec<TourLeg>) {
    if ribbons.is_empty() {
        return (0.0, Vec::new());
    }

    if ribbons.len() > EXACT_TOUR_LIMIT {
        return greedy_tour(ribbons, from, radius_m);
    }

    let mut search = TourSearch {
        ribbons,
        radius_m,
        best_cost_m: f64::INFINITY,
        best: Vec::new(),
        current: Vec::with_capacity(ribbons.len()),
    };
    let total_m = ribbons.iter().map(|r| r.length_m()).sum();
    search.search(from, 0, 0.0, total_m);

    (search.best_cost_m, search.best)
}

/// Build a tour by always driving to the ribbon end which is cheapest to reach next.
fn greedy_tour(ribbons: &[Ribbon], from: &State, radius_m: Option<f64>) -> (f64, Vec<TourLeg>) {
    let mut visited = vec![false; ribbons.len()];
    let mut at = *from;
    let mut cost_m = 0.0;
    let mut legs = Vec::with_capacity(ribbons.len());

    for _ in 0..ribbons.len() {
        let mut best: Option<(f64, TourLeg)> = None;

        for (index, _) in ribbons.iter().enumerate().filter(|(i, _)| !visited[*i]) {
            for &reversed in [false, true].iter() {
                let leg = TourLeg { index, reversed };
                let t = transition_m(&at, &leg.oriented(ribbons), radius_m);
                if best.map_or(true, |(c, _)| t < c) {
                    best = Some((t, leg));
                }
            }
        }

        if let Some((t, leg)) = best {
            let ribbon = leg.oriented(ribbons);
            visited[leg.index] = true;
            cost_m += t + ribbon.length_m();
            at = ribbon.end_state(0.0, 0.0);
            legs.push(leg);
        }
    }

    (cost_m, legs)
}

/// The largest distance needed to cover any single ribbon, measured to its nearest end.
pub(super) fn max_distance(ribbons: &[Ribbon], from: &State) -> f64 {
    let p = from.position_m();
    ribbons
        .iter()
        .map(|r| r.min_endpoint_distance_m(&p) + r.length_m())
        .fold(0.0, f64::max)
}

/// Split the ribbons into the `k` nearest to the state and the rest.
pub(super) fn split_nearest(
    ribbons: &[Ribbon],
    from: &State,
    k: usize,
) -> (Vec<Ribbon>, Vec<Ribbon>) {
    let p = from.position_m();
    let mut sorted: Vec<(f64, Ribbon)> = ribbons
        .iter()
        .map(|r| (r.min_endpoint_distance_m(&p), *r))
        .collect();
    sorted.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

    let mut near: Vec<Ribbon> = sorted.into_iter().map(|(_, r)| r).collect();
    let far = near.split_off(k.min(near.len()));

    (near, far)
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn origin() -> State {
        State::new(0.0, 0.0, 0.0, 1.0, 0.0)
    }

    #[test]
    fn test_heuristic_ids() {
        assert_eq!(Heuristic::from_id(2), Some(Heuristic::MaxDistance));
        assert_eq!(
            Heuristic::from_id(4),
            Some(Heuristic::TspDubinsNoSplitKRibbons)
        );
        assert_eq!(Heuristic::from_id(5), None);
    }

    #[test]
    fn test_best_tour_point_robot() {
        // Two parallel ribbons, best lawnmowered: up the first, across, back down the second
        let ribbons = [
            Ribbon::new(0.0, 10.0, 20.0, 10.0),
            Ribbon::new(0.0, 0.0, 20.0, 0.0),
        ];

        let (cost, legs) = best_tour(&ribbons, &origin(), None);
        assert_relative_eq!(cost, 50.0, epsilon = 1e-9);
        assert_eq!(
            legs,
            vec![
                TourLeg {
                    index: 1,
                    reversed: false
                },
                TourLeg {
                    index: 0,
                    reversed: true
                }
            ]
        );
    }

    #[test]
    fn test_greedy_visits_everything() {
        let ribbons: Vec<Ribbon> = (0..8)
            .map(|i| Ribbon::new(0.0, i as f64 * 5.0, 10.0, i as f64 * 5.0))
            .collect();

        let (cost, legs) = best_tour(&ribbons, &origin(), None);
        assert_eq!(legs.len(), 8);
        assert!(cost >= 80.0);
    }

    #[test]
    fn test_max_distance_and_split() {
        let ribbons = [
            Ribbon::new(3.0, 0.0, 5.0, 0.0),
            Ribbon::new(0.0, 30.0, 0.0, 40.0),
            Ribbon::new(0.0, 10.0, 0.0, 11.0),
        ];

        assert_relative_eq!(max_distance(&ribbons, &origin()), 40.0, epsilon = 1e-9);

        let (near, far) = split_nearest(&ribbons, &origin(), 2);
        assert_eq!(near, vec![ribbons[0], ribbons[2]]);
        assert_eq!(far, vec![ribbons[1]]);
    }
}
