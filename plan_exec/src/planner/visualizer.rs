//! # Planner Visualiser
//!
//! Appends one JSON record per planning invocation to a file, so that search trees and plans can
//! be inspected offline.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use serde::Serialize;

use crate::{plan::Plan, state::State};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Shared handle to a JSON-lines visualisation file.
#[derive(Clone)]
pub struct Visualizer {
    path: PathBuf,
    writer: Arc<Mutex<BufWriter<File>>>,
}

/// A tree edge, as its start and end positions.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TreeEdge {
    pub from: (f64, f64),
    pub to: (f64, f64),
}

/// Everything recorded about one planning invocation.
#[derive(Debug, Clone, Serialize)]
pub struct PlannerRecord {
    pub planner: &'static str,
    pub time_s: f64,
    pub start: State,
    pub num_vertices: usize,
    pub complete: bool,
    pub edges: Vec<TreeEdge>,
    pub plan: Vec<State>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum VisualizerError {
    #[error("Could not open the visualisation file: {0}")]
    Open(std::io::Error),

    #[error("Could not write to the visualisation file: {0}")]
    Write(std::io::Error),

    #[error("Could not serialise the visualisation record: {0}")]
    Serialize(serde_json::Error),

    #[error("The visualisation file lock is poisoned")]
    LockPoisoned,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Visualizer {
    /// Open (truncating) the file at the given path.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, VisualizerError> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())
            .map_err(VisualizerError::Open)?;

        Ok(Self {
            path: path.as_ref().to_path_buf(),
            writer: Arc::new(Mutex::new(BufWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record as a single line.
    pub fn record(&self, record: &PlannerRecord) -> Result<(), VisualizerError> {
        let line = serde_json::to_string(record).map_err(VisualizerError::Serialize)?;

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| VisualizerError::LockPoisoned)?;
        writeln!(writer, "{}", line).map_err(VisualizerError::Write)?;
        writer.flush().map_err(VisualizerError::Write)
    }
}

impl std::fmt::Debug for Visualizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Visualizer")
            .field("path", &self.path)
            .finish()
    }
}

impl PlannerRecord {
    pub fn new(planner: &'static str, time_s: f64, start: &State, plan: &Plan) -> Self {
        Self {
            planner,
            time_s,
            start: *start,
            num_vertices: 0,
            complete: false,
            edges: Vec::new(),
            plan: plan.half_second_samples().collect(),
        }
    }
}
