//! # Graph Search Planner
//!
//! Best first search over a graph whose nodes are the start state and the ribbon endpoints. Each
//! edge of the graph is a macro edge: a Dubins transit at the travel turning radius to one end of an
//! uncovered ribbon, followed by a pass along that ribbon to its other end. A node records which
//! ribbons have been passed, so the search is over orderings and directions of the ribbons.
//!
//! The heuristic is the straight line distance to the nearest endpoint of an unpassed ribbon plus
//! the length of every unpassed ribbon, converted to time, which never overestimates the remaining
//! cost.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    collections::{BinaryHeap, HashSet},
    time::Instant,
};

use log::{debug, warn};

use super::{
    edge::{plan_cost, Edge},
    validate,
    vertex::{trace_plan, QueueEntry, Vertex},
    visualizer::{PlannerRecord, TreeEdge},
    Planner, PlannerConfig, PlannerError, Stats,
};
use crate::{
    obstacles::ObstacleSnapshot,
    plan::{PathSegment, Plan},
    ribbon::{Ribbon, RibbonManager},
    state::State,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// The passed ribbons of a node are stored as a bit mask, so only this many are searched over.
const MAX_RIBBONS: usize = 64;

/// Upper bound on the number of search nodes.
const MAX_NODES: usize = 50000;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct AStarPlanner;

/// Ribbon last passed by a node, and the direction it was passed in.
type LastLeg = Option<(usize, bool)>;

struct Search<'a> {
    config: &'a PlannerConfig,
    obstacles: &'a ObstacleSnapshot,
    start: State,

    /// Ribbons the graph is built on, fixed for the whole search
    targets: Vec<Ribbon>,

    /// Search nodes. Transit nodes, which end at the start of a pass, are stored but never queued.
    nodes: Vec<Vertex>,
    masks: Vec<u64>,
    last: Vec<LastLeg>,

    heap: BinaryHeap<QueueEntry>,
    closed: HashSet<(u64, LastLeg)>,

    /// Best expanded node which passed at least one ribbon, used on time out
    best_partial: Option<usize>,

    iterations: usize,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl AStarPlanner {
    pub fn new() -> Self {
        Self
    }
}

impl Planner for AStarPlanner {
    fn plan(
        &self,
        ribbons: &RibbonManager,
        start: &State,
        config: &PlannerConfig,
        _previous: &Plan,
        time_remaining_s: f64,
        obstacles: &ObstacleSnapshot,
    ) -> Result<Stats, PlannerError> {
        validate(config)?;
        let wall_start = Instant::now();

        if ribbons.done() {
            return Ok(Stats {
                complete: true,
                ..Stats::default()
            });
        }

        let mut search = Search::new(ribbons, start, config, obstacles);
        let mut goal = None;

        while wall_start.elapsed().as_secs_f64() < time_remaining_s {
            let entry = match search.heap.pop() {
                Some(e) => e,
                None => break,
            };
            let index = entry.index;

            if !search.closed.insert((search.masks[index], search.last[index])) {
                continue;
            }

            if search.is_goal(index) {
                goal = Some(index);
                break;
            }

            if search.last[index].is_some() {
                search.consider_partial(index);
            }

            if search.nodes.len() < MAX_NODES {
                search.expand(index);
            }
        }

        let complete = goal.map_or(false, |g| search.nodes[g].ribbons.done());
        let mut stats = Stats {
            complete,
            vertices: search.nodes.len(),
            iterations: search.iterations,
            ..Stats::default()
        };

        match goal.or(search.best_partial) {
            Some(index) => {
                let mut plan = trace_plan(&search.nodes, index);
                let mut covered = ribbons.clone();
                if let Some((cost, penalty, dangerous)) =
                    plan_cost(&plan, config, obstacles, &mut covered)
                {
                    stats.cost = cost;
                    stats.collision_penalty = penalty;
                    plan.dangerous = dangerous;
                }
                stats.plan = plan;
            }
            None => debug!(
                "Graph search found no plan after {} expansions",
                search.iterations
            ),
        }

        stats.planning_time_s = wall_start.elapsed().as_secs_f64();
        search.visualize(&stats);

        Ok(stats)
    }

    fn name(&self) -> &'static str {
        "a_star"
    }
}

impl<'a> Search<'a> {
    fn new(
        ribbons: &RibbonManager,
        start: &State,
        config: &'a PlannerConfig,
        obstacles: &'a ObstacleSnapshot,
    ) -> Self {
        // Search over the ribbons nearest in tour order if there are too many for the mask
        let mut targets: Vec<Ribbon> = ribbons.ribbons().to_vec();
        if targets.len() > MAX_RIBBONS {
            warn!(
                "Graph search is limited to {} ribbons, {} given",
                MAX_RIBBONS,
                targets.len()
            );
            targets = ribbons.tour(start);
            targets.truncate(MAX_RIBBONS);
        }

        let mut search = Self {
            config,
            obstacles,
            start: *start,
            targets,
            nodes: Vec::new(),
            masks: Vec::new(),
            last: Vec::new(),
            heap: BinaryHeap::new(),
            closed: HashSet::new(),
            best_partial: None,
            iterations: 0,
        };

        let h = search.heuristic(0, start);
        search.push(Vertex::root(*start, ribbons.clone(), h), 0, None, true);
        search
    }

    fn full_mask(&self) -> u64 {
        if self.targets.len() >= MAX_RIBBONS {
            u64::MAX
        } else {
            (1u64 << self.targets.len()) - 1
        }
    }

    /// Lower bound on the weighted time to pass every ribbon not in `mask`.
    fn heuristic(&self, mask: u64, state: &State) -> f64 {
        let position = state.position_m();
        let mut nearest_m = f64::INFINITY;
        let mut remaining_m = 0.0;

        for (i, r) in self.targets.iter().enumerate() {
            if mask & (1 << i) != 0 {
                continue;
            }
            nearest_m = nearest_m.min(r.min_endpoint_distance_m(&position));
            remaining_m += r.length_m();
        }

        if !nearest_m.is_finite() {
            return 0.0;
        }

        (nearest_m + remaining_m) / self.config.max_speed_ms * self.config.costs.time_penalty_factor
    }

    fn push(&mut self, node: Vertex, mask: u64, last: LastLeg, queue: bool) -> usize {
        let index = self.nodes.len();
        if queue {
            match QueueEntry::new(&node, index) {
                Some(e) => self.heap.push(e),
                None => warn!("Search node {} has a NaN cost, it won't be expanded", index),
            }
        }
        self.nodes.push(node);
        self.masks.push(mask);
        self.last.push(last);
        index
    }

    fn is_goal(&self, index: usize) -> bool {
        let node = &self.nodes[index];
        self.masks[index] == self.full_mask()
            || node.ribbons.done()
            || node.state.time_s - self.start.time_s >= self.config.time_horizon_s
    }

    fn consider_partial(&mut self, index: usize) {
        let better = match self.best_partial {
            Some(b) => self.nodes[index].heuristic < self.nodes[b].heuristic,
            None => true,
        };
        if better {
            self.best_partial = Some(index);
        }
    }

    fn expand(&mut self, index: usize) {
        self.iterations += 1;

        for i in 0..self.targets.len() {
            if self.masks[index] & (1 << i) != 0 {
                continue;
            }
            for &reversed in [false, true].iter() {
                self.pass(index, i, reversed);
            }
        }
    }

    /// Add the macro edge from `from` which passes ribbon `ribbon` in the given direction.
    fn pass(&mut self, from: usize, ribbon: usize, reversed: bool) -> Option<usize> {
        let oriented = if reversed {
            self.targets[ribbon].reversed()
        } else {
            self.targets[ribbon]
        };
        let speed = self.config.max_speed_ms;
        let mask = self.masks[from] | (1 << ribbon);

        // Transit to the start of the pass, unless we are already there
        let mut parent = from;
        let entry = oriented.start_state(speed, self.nodes[from].state.time_s);
        if !self.nodes[from].state.is_co_located(&entry) {
            let mut ribbons = self.nodes[from].ribbons.clone();
            let edge = Edge::between(
                &self.nodes[from].state,
                &entry,
                self.config.turning_radius_m,
                self.config,
                self.obstacles,
                Some(&mut ribbons),
            )?;
            let transit = Vertex::child(from, &self.nodes[from], edge, ribbons, 0.0);
            parent = self.push(transit, self.masks[from], self.last[from], false);
        }

        // Drive along the ribbon
        let p = &self.nodes[parent];
        let end = oriented.end_state(speed, 0.0);
        let segment = PathSegment::between(
            &p.state,
            &end,
            self.config.coverage_turning_radius_m,
            speed,
        )
        .ok()?;
        let mut ribbons = p.ribbons.clone();
        let edge = Edge::evaluate(segment, self.config, self.obstacles, Some(&mut ribbons))?;

        let end_state = edge.segment.end_state();
        let h = self.heuristic(mask, &end_state);
        let node = Vertex::child(parent, &self.nodes[parent], edge, ribbons, h);
        Some(self.push(node, mask, Some((ribbon, reversed)), true))
    }

    fn visualize(&self, stats: &Stats) {
        let vis = match &self.config.visualizer {
            Some(v) => v,
            None => return,
        };

        let mut record =
            PlannerRecord::new("a_star", self.config.now_s(), &self.start, &stats.plan);
        record.num_vertices = self.nodes.len();
        record.complete = stats.complete;
        record.edges = self
            .nodes
            .iter()
            .filter_map(|n| {
                let p = &self.nodes[n.parent?];
                Some(TreeEdge {
                    from: (p.state.x_m, p.state.y_m),
                    to: (n.state.x_m, n.state.y_m),
                })
            })
            .collect();

        if let Err(e) = vis.record(&record) {
            warn!("Could not record planner visualisation: {}", e);
        }
    }
}
