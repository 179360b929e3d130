//! # Anytime Sampling Planner
//!
//! Grows a tree of kinematically feasible Dubins edges rooted at the start state, in batches of
//! random samples, expanding vertices best first on estimated total cost (cost to come plus the
//! ribbon heuristic's estimate of the time to finish). Every vertex is also connected to the ends of
//! the ribbons it has left to cover, so the tree can follow ribbons exactly.
//!
//! The search stops as soon as a vertex which has covered every ribbon is popped, or when the time
//! budget runs out. On time out the best vertex which reached the time horizon is used instead, and
//! if there is none an empty plan is returned.
//!
//! The previous plan, if there is one, is added to the tree before sampling begins so the planner
//! always has that solution available.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{cmp::Ordering, collections::BinaryHeap, time::Instant};

use log::{debug, trace, warn};
use nalgebra::Vector2;
use rand::{rngs::StdRng, Rng, SeedableRng};

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
    ribbon::RibbonManager,
    state::State,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Upper bound on the size of the tree.
const MAX_VERTICES: usize = 20000;

/// Distance by which the sampling region extends beyond the ribbons and the start.
const SAMPLE_MARGIN_M: f64 = 20.0;

/// Rejection sampling gives up after this many attempts per requested sample.
const SAMPLE_ATTEMPTS_PER_SAMPLE: usize = 10;

/// Targets closer than this to a vertex are not connected.
const MIN_EDGE_LENGTH_M: f64 = 1e-3;

/// Maximum number of tree edges written to the visualiser.
const MAX_VISUALISED_EDGES: usize = 5000;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct BitStarPlanner;

/// State of a single search.
struct Search<'a> {
    config: &'a PlannerConfig,
    obstacles: &'a ObstacleSnapshot,
    start: State,

    vertices: Vec<Vertex>,
    queue: BinaryHeap<QueueEntry>,
    samples: Vec<State>,
    rng: StdRng,

    sample_min_m: Vector2<f64>,
    sample_max_m: Vector2<f64>,

    /// Vertex which covers every ribbon
    complete: Option<usize>,

    /// Lowest estimated total cost vertex which reached the time horizon
    best_horizon: Option<usize>,

    iterations: usize,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl BitStarPlanner {
    pub fn new() -> Self {
        Self
    }
}

impl Planner for BitStarPlanner {
    fn plan(
        &self,
        ribbons: &RibbonManager,
        start: &State,
        config: &PlannerConfig,
        previous: &Plan,
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
        search.warm_start(previous);
        search.add_batch(config.initial_samples);

        while wall_start.elapsed().as_secs_f64() < time_remaining_s {
            let entry = match search.queue.pop() {
                Some(e) => e,
                None => {
                    if search.vertices.len() >= MAX_VERTICES || config.initial_samples == 0 {
                        break;
                    }
                    search.add_batch(config.initial_samples);
                    if search.requeue() == 0 {
                        break;
                    }
                    continue;
                }
            };

            if search.is_complete(entry.index) {
                search.complete = Some(entry.index);
                break;
            }

            if search.reached_horizon(entry.index) {
                search.consider_horizon(entry.index);
                continue;
            }

            if search.vertices.len() < MAX_VERTICES {
                search.expand(entry.index);
            }
        }

        let result = search.complete.or(search.best_horizon);
        let mut stats = Stats {
            complete: search.complete.is_some(),
            samples: search.samples.len(),
            vertices: search.vertices.len(),
            iterations: search.iterations,
            ..Stats::default()
        };

        if let Some(index) = result {
            let mut plan = trace_plan(&search.vertices, index);
            if config.use_brown_paths {
                plan = search.smooth(plan, ribbons);
            }

            let mut covered = ribbons.clone();
            if let Some((cost, penalty, dangerous)) =
                plan_cost(&plan, config, obstacles, &mut covered)
            {
                stats.cost = cost;
                stats.collision_penalty = penalty;
                plan.dangerous = dangerous;
            }
            stats.plan = plan;
        } else {
            debug!(
                "No plan found after {} iterations with {} vertices",
                search.iterations,
                search.vertices.len()
            );
        }

        stats.planning_time_s = wall_start.elapsed().as_secs_f64();
        search.visualize(&stats);

        Ok(stats)
    }

    fn name(&self) -> &'static str {
        "bit_star"
    }
}

impl<'a> Search<'a> {
    fn new(
        ribbons: &RibbonManager,
        start: &State,
        config: &'a PlannerConfig,
        obstacles: &'a ObstacleSnapshot,
    ) -> Self {
        let rng = match config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        // Sample around everything the vehicle might need to reach
        let mut min = start.position_m();
        let mut max = start.position_m();
        for r in ribbons.ribbons() {
            for p in [r.start_m, r.end_m].iter() {
                min = min.inf(p);
                max = max.sup(p);
            }
        }
        let margin = SAMPLE_MARGIN_M.max(2.0 * config.turning_radius_m);
        let margin_v = Vector2::new(margin, margin);

        let mut search = Self {
            config,
            obstacles,
            start: *start,
            vertices: Vec::new(),
            queue: BinaryHeap::new(),
            samples: Vec::new(),
            rng,
            sample_min_m: min - margin_v,
            sample_max_m: max + margin_v,
            complete: None,
            best_horizon: None,
            iterations: 0,
        };

        let h = search.heuristic(ribbons, start);
        search.push_vertex(Vertex::root(*start, ribbons.clone(), h));
        search
    }

    /// Estimated time to finish covering, weighted as edge costs are.
    fn heuristic(&self, ribbons: &RibbonManager, state: &State) -> f64 {
        ribbons.approximate_distance_until_done(state) / self.config.max_speed_ms
            * self.config.costs.time_penalty_factor
    }

    fn push_vertex(&mut self, vertex: Vertex) -> usize {
        let index = self.vertices.len();
        match QueueEntry::new(&vertex, index) {
            Some(entry) => self.queue.push(entry),
            None => warn!("Vertex {} has a NaN cost, it won't be expanded", index),
        }
        self.vertices.push(vertex);
        index
    }

    fn is_complete(&self, index: usize) -> bool {
        self.vertices[index].ribbons.done()
    }

    fn reached_horizon(&self, index: usize) -> bool {
        self.vertices[index].state.time_s - self.start.time_s >= self.config.time_horizon_s
    }

    fn consider_horizon(&mut self, index: usize) {
        let total = self.vertices[index].total();
        let better = match self.best_horizon {
            Some(b) => total < self.vertices[b].total(),
            None => true,
        };
        if better {
            self.best_horizon = Some(index);
        }
    }

    /// Connect `from` to `to`, adding the child vertex if the edge is collision free.
    fn connect(&mut self, from: usize, to: &State, radius_m: f64) -> Option<usize> {
        let parent = &self.vertices[from];
        if parent.state.distance_to(to) < MIN_EDGE_LENGTH_M {
            return None;
        }

        let mut ribbons = parent.ribbons.clone();
        let edge = Edge::between(
            &parent.state,
            to,
            radius_m,
            self.config,
            self.obstacles,
            Some(&mut ribbons),
        )?;

        let h = self.heuristic(&ribbons, &edge.segment.end_state());
        let child = Vertex::child(from, &self.vertices[from], edge, ribbons, h);
        Some(self.push_vertex(child))
    }

    /// Add a chain of vertices following the previous plan.
    fn warm_start(&mut self, previous: &Plan) {
        let mut parent = 0;

        for seg in previous.segments() {
            if seg.end_time_s() <= self.start.time_s {
                continue;
            }

            let next = if parent == 0 {
                // Rejoin the previous plan from wherever we are starting
                self.connect(0, &seg.end_state(), self.config.turning_radius_m)
            } else {
                let retimed = seg.with_start_time(self.vertices[parent].state.time_s);
                self.add_edge(parent, retimed)
            };

            match next {
                Some(i) => parent = i,
                None => break,
            }
        }

        if parent != 0 {
            trace!(
                "Warm started with {} vertices from the previous plan",
                self.vertices.len() - 1
            );
        }
    }

    /// Add an already built segment as an edge from `from`.
    fn add_edge(&mut self, from: usize, segment: PathSegment) -> Option<usize> {
        let mut ribbons = self.vertices[from].ribbons.clone();
        let edge = Edge::evaluate(segment, self.config, self.obstacles, Some(&mut ribbons))?;
        let h = self.heuristic(&ribbons, &edge.segment.end_state());
        let child = Vertex::child(from, &self.vertices[from], edge, ribbons, h);
        Some(self.push_vertex(child))
    }

    /// Draw a batch of random samples in free space.
    fn add_batch(&mut self, count: usize) {
        let mut added = 0;
        let mut attempts = 0;

        while added < count && attempts < count * SAMPLE_ATTEMPTS_PER_SAMPLE {
            attempts += 1;

            let x = self.rng.gen_range(self.sample_min_m.x..self.sample_max_m.x);
            let y = self.rng.gen_range(self.sample_min_m.y..self.sample_max_m.y);
            if self.config.map.is_blocked(x, y) {
                continue;
            }
            let heading = self.rng.gen_range(0.0..std::f64::consts::TAU);

            self.samples
                .push(State::new(x, y, heading, self.config.max_speed_ms, 0.0));
            added += 1;
        }

        trace!("Added batch of {} samples", added);
    }

    /// Put every vertex which can still be expanded back into the queue. Returns the number of
    /// requeued vertices.
    fn requeue(&mut self) -> usize {
        let mut count = 0;
        for index in 0..self.vertices.len() {
            let v = &self.vertices[index];
            if v.samples_seen >= self.samples.len()
                || v.ribbons.done()
                || self.reached_horizon(index)
            {
                continue;
            }
            if let Some(entry) = QueueEntry::new(v, index) {
                self.queue.push(entry);
                count += 1;
            }
        }
        count
    }

    fn expand(&mut self, index: usize) {
        self.iterations += 1;

        let mut targets: Vec<(State, f64)> = Vec::new();
        let vertex = &self.vertices[index];

        // Ribbon ends: approach a ribbon at the travel radius, drive along it at the coverage radius
        if !vertex.expanded {
            for r in vertex.ribbons.ribbons() {
                for oriented in [*r, r.reversed()].iter() {
                    targets.push((
                        oriented.start_state(self.config.max_speed_ms, 0.0),
                        self.config.turning_radius_m,
                    ));
                    targets.push((
                        oriented.end_state(self.config.max_speed_ms, 0.0),
                        self.config.coverage_turning_radius_m,
                    ));
                }
            }
        }

        // Nearest new samples
        let mut nearest: Vec<(f64, usize)> = self.samples[vertex.samples_seen..]
            .iter()
            .enumerate()
            .map(|(i, s)| (vertex.state.distance_to(s), i + vertex.samples_seen))
            .filter(|(d, _)| *d >= MIN_EDGE_LENGTH_M)
            .collect();
        nearest.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
        targets.extend(
            nearest
                .iter()
                .take(self.config.branching_factor)
                .map(|(_, i)| (self.samples[*i], self.config.turning_radius_m)),
        );

        let num_samples = self.samples.len();
        let v = &mut self.vertices[index];
        v.expanded = true;
        v.samples_seen = num_samples;

        for (target, radius_m) in targets {
            if self.vertices.len() >= MAX_VERTICES {
                break;
            }
            self.connect(index, &target, radius_m);
        }
    }

    /// Shortcut pairs of consecutive segments with a single segment wherever that is cheaper and
    /// covers no less.
    fn smooth(&self, plan: Plan, ribbons: &RibbonManager) -> Plan {
        let evaluate = |p: &Plan| {
            let mut covered = ribbons.clone();
            plan_cost(p, self.config, self.obstacles, &mut covered)
                .map(|(cost, _, _)| (cost, covered.total_uncovered_length_m()))
        };

        let (mut best_cost, mut best_uncovered) = match evaluate(&plan) {
            Some(c) => c,
            None => return plan,
        };
        let mut segments = plan.segments().to_vec();

        let mut i = 0;
        while i + 1 < segments.len() {
            let from = segments[i].start_state();
            let to = segments[i + 1].end_state();

            let shortcut = match PathSegment::between(
                &from,
                &to,
                self.config.turning_radius_m,
                self.config.max_speed_ms,
            ) {
                Ok(s) => s,
                Err(_) => {
                    i += 1;
                    continue;
                }
            };

            let mut candidate = segments[..i].to_vec();
            candidate.push(shortcut);
            candidate.extend_from_slice(&segments[i + 2..]);
            let candidate = retime(candidate);
            let candidate_plan = Plan::from_segments(candidate.clone());

            match evaluate(&candidate_plan) {
                Some((cost, uncovered)) if cost < best_cost && uncovered <= best_uncovered + 1e-9 => {
                    best_cost = cost;
                    best_uncovered = uncovered;
                    segments = candidate;
                }
                _ => i += 1,
            }
        }

        Plan::from_segments(segments)
    }

    fn visualize(&self, stats: &Stats) {
        let vis = match &self.config.visualizer {
            Some(v) => v,
            None => return,
        };

        let mut record =
            PlannerRecord::new("bit_star", self.config.now_s(), &self.start, &stats.plan);
        record.num_vertices = self.vertices.len();
        record.complete = stats.complete;
        record.edges = self
            .vertices
            .iter()
            .filter_map(|v| {
                let p = &self.vertices[v.parent?];
                Some(TreeEdge {
                    from: (p.state.x_m, p.state.y_m),
                    to: (v.state.x_m, v.state.y_m),
                })
            })
            .take(MAX_VISUALISED_EDGES)
            .collect();

        if let Err(e) = vis.record(&record) {
            warn!("Could not record planner visualisation: {}", e);
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Make the segments contiguous in time, keeping the first segment's start time.
fn retime(mut segments: Vec<PathSegment>) -> Vec<PathSegment> {
    for i in 1..segments.len() {
        let t = segments[i - 1].end_time_s();
        segments[i] = segments[i].with_start_time(t);
    }
    segments
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{map::GridWorldMap, planner::PlannerParams};
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn config() -> PlannerConfig {
        let params = PlannerParams {
            max_speed_ms: 2.0,
            turning_radius_m: 4.0,
            coverage_turning_radius_m: 8.0,
            random_seed: Some(7),
            initial_samples: 50,
            ..PlannerParams::default()
        };
        PlannerConfig::from_params(&params, Arc::new(|| 0.0))
    }

    #[test]
    fn test_straight_ribbon() {
        let config = config();
        let mut ribbons = RibbonManager::default();
        ribbons.add(0.0, 0.0, 20.0, 0.0);
        let start = State::new(0.0, 0.0, 0.0, 2.0, 100.0);

        let stats = BitStarPlanner::new()
            .plan(
                &ribbons,
                &start,
                &config,
                &Plan::new(),
                5.0,
                &ObstacleSnapshot::default(),
            )
            .unwrap();

        assert!(stats.complete);
        assert!(!stats.plan.is_empty());
        assert_relative_eq!(stats.plan.length_m(), 20.0, epsilon = 0.5);
        assert_relative_eq!(stats.plan.start_time_s().unwrap(), 100.0);

        // Driving the plan covers the ribbon
        let mut covered = ribbons.clone();
        for s in stats.plan.half_second_samples() {
            covered.cover(s.x_m, s.y_m, false);
        }
        let end = stats.plan.end_state().unwrap();
        covered.cover(end.x_m, end.y_m, false);
        assert!(covered.done());
    }

    #[test]
    fn test_blocked_start_gives_empty_plan() {
        let mut config = config();
        config.map = Arc::new(GridWorldMap::parse("1\n###\n###\n###\n").unwrap());

        let mut ribbons = RibbonManager::default();
        ribbons.add(10.0, 0.0, 20.0, 0.0);

        let stats = BitStarPlanner::new()
            .plan(
                &ribbons,
                &State::new(1.5, 1.5, 0.0, 2.0, 0.0),
                &config,
                &Plan::new(),
                0.2,
                &ObstacleSnapshot::default(),
            )
            .unwrap();

        assert!(stats.plan.is_empty());
        assert!(!stats.complete);
    }

    #[test]
    fn test_warm_start_reuses_previous_plan() {
        let config = config();
        let mut ribbons = RibbonManager::default();
        ribbons.add(0.0, 0.0, 20.0, 0.0);
        let start = State::new(0.0, 0.0, 0.0, 2.0, 0.0);

        let previous = BitStarPlanner::new()
            .plan(
                &ribbons,
                &start,
                &config,
                &Plan::new(),
                5.0,
                &ObstacleSnapshot::default(),
            )
            .unwrap()
            .plan;

        // Half way along, with the first half covered
        let mid = previous.sample(5.0).unwrap();
        ribbons.cover_between(0.0, 0.0, mid.x_m, mid.y_m, false);

        let stats = BitStarPlanner::new()
            .plan(
                &ribbons,
                &mid,
                &config,
                &previous,
                5.0,
                &ObstacleSnapshot::default(),
            )
            .unwrap();

        assert!(stats.complete);
        let end = stats.plan.end_state().unwrap();
        assert_relative_eq!(end.x_m, 20.0, epsilon = 0.5);
        assert_relative_eq!(end.y_m, 0.0, epsilon = 0.5);
    }

    #[test]
    fn test_prefers_clear_approach() {
        let config = config();

        // Ribbon running north-south, the vehicle starts south of its middle so approaching the
        // southern end first would be quickest
        let mut ribbons = RibbonManager::default();
        ribbons.add(20.0, -10.0, 20.0, 10.0);

        // A large stationary obstacle covering the southern approach
        let mut obstacles = ObstacleSnapshot::default();
        obstacles
            .binary
            .update(9, &State::new(10.0, -9.0, 0.0, 0.0, 0.0), 10.0, 8.0);

        let stats = BitStarPlanner::new()
            .plan(
                &ribbons,
                &State::new(0.0, -3.0, 0.0, 2.0, 0.0),
                &config,
                &Plan::new(),
                5.0,
                &obstacles,
            )
            .unwrap();

        assert!(stats.complete);
        assert_eq!(stats.collision_penalty, 0.0);
        assert!(!stats.plan.dangerous);
    }

    #[test]
    fn test_retime() {
        let a = State::new(0.0, 0.0, 0.0, 1.0, 0.0);
        let s1 = PathSegment::between(&a, &a.push(2.0), 1.0, 1.0).unwrap();
        let s2 = s1.with_start_time(50.0);

        let segs = retime(vec![s1, s2]);
        assert_relative_eq!(segs[1].start_time_s, 2.0, epsilon = 1e-9);
    }
}
