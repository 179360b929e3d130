//! Search tree vertices
//!
//! Vertices live in an arena (a `Vec`) for the duration of one planning invocation, and refer to
//! their parent by index.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::cmp::Ordering;

use ordered_float::NotNan;

use super::edge::Edge;
use crate::{plan::Plan, ribbon::RibbonManager, state::State};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub(super) struct Vertex {
    pub state: State,

    /// Index of the parent vertex, `None` for the root
    pub parent: Option<usize>,

    /// Edge from the parent to this vertex
    pub edge: Option<Edge>,

    /// Cost to come from the root
    pub cost: f64,

    /// Estimated cost to go
    pub heuristic: f64,

    /// Coverage state on arrival at this vertex
    pub ribbons: RibbonManager,

    /// Number of samples this vertex has already been connected against
    pub samples_seen: usize,

    /// Set once the vertex has been connected to the ribbon ends
    pub expanded: bool,
}

/// Entry in the vertex queue, ordered so that a `BinaryHeap` pops the lowest estimated total cost
/// first, then the lowest cost to come, then the earliest created vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct QueueEntry {
    pub total: NotNan<f64>,
    pub cost: NotNan<f64>,
    pub index: usize,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Vertex {
    pub fn root(state: State, ribbons: RibbonManager, heuristic: f64) -> Self {
        Self {
            state,
            parent: None,
            edge: None,
            cost: 0.0,
            heuristic,
            ribbons,
            samples_seen: 0,
            expanded: false,
        }
    }

    /// Build the vertex at the end of an edge from the parent.
    pub fn child(
        parent_index: usize,
        parent: &Vertex,
        edge: Edge,
        ribbons: RibbonManager,
        heuristic: f64,
    ) -> Self {
        Self {
            state: edge.segment.end_state(),
            parent: Some(parent_index),
            edge: Some(edge),
            cost: parent.cost + edge.cost,
            heuristic,
            ribbons,
            samples_seen: 0,
            expanded: false,
        }
    }

    pub fn total(&self) -> f64 {
        self.cost + self.heuristic
    }
}

impl QueueEntry {
    /// Build the entry for a vertex, or `None` if its costs are not numbers.
    pub fn new(vertex: &Vertex, index: usize) -> Option<Self> {
        Some(Self {
            total: NotNan::new(vertex.total()).ok()?,
            cost: NotNan::new(vertex.cost).ok()?,
            index,
        })
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Flipped so the max-heap pops the smallest entry
        other
            .total
            .cmp(&self.total)
            .then_with(|| other.cost.cmp(&self.cost))
            .then_with(|| other.index.cmp(&self.index))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Trace the plan from the root to the vertex at `index`.
pub(super) fn trace_plan(vertices: &[Vertex], index: usize) -> Plan {
    let mut edges = Vec::new();
    let mut current = Some(index);

    while let Some(i) = current {
        let v = &vertices[i];
        if let Some(e) = v.edge {
            edges.push(e);
        }
        current = v.parent;
    }

    edges.reverse();

    let mut plan = Plan::from_segments(edges.iter().map(|e| e.segment).collect());
    plan.dangerous = edges.iter().any(|e| e.dangerous);
    plan
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::BinaryHeap;

    fn entry(total: f64, cost: f64, index: usize) -> QueueEntry {
        QueueEntry {
            total: NotNan::new(total).unwrap(),
            cost: NotNan::new(cost).unwrap(),
            index,
        }
    }

    #[test]
    fn test_queue_order() {
        let mut heap = BinaryHeap::new();
        heap.push(entry(5.0, 1.0, 0));
        heap.push(entry(3.0, 2.0, 3));
        heap.push(entry(3.0, 2.0, 1));
        heap.push(entry(3.0, 0.5, 2));

        let order: Vec<usize> = std::iter::from_fn(|| heap.pop().map(|e| e.index)).collect();
        assert_eq!(order, vec![2, 1, 3, 0]);
    }
}
