//! # Map
//!
//! Static obstacle maps. The planners only need to know whether a point is blocked, so every map
//! is consumed through the [`Map`] trait.
//!
//! Maps are loaded by [`load_map`], which chooses a map type from the file path:
//!
//! - An empty path gives an [`EmptyMap`].
//! - A path which doesn't exist gives an [`EmptyMap`].
//! - A `.map` file is parsed as a [`GridWorldMap`].
//! - Anything else is unsupported.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod grid_world;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{path::Path, sync::Arc};

use log::{info, warn};
use nalgebra::Vector2;

pub use grid_world::GridWorldMap;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

pub trait Map: std::fmt::Debug + Send + Sync {
    /// Returns true if the point is blocked by a static obstacle.
    fn is_blocked(&self, x_m: f64, y_m: f64) -> bool;

    /// Size of the smallest feature the map can represent.
    fn resolution_m(&self) -> f64 {
        1.0
    }

    /// Lower and upper corners of a box containing every blocked point, or `None` if nothing is
    /// blocked.
    fn blocked_extent_m(&self) -> Option<(Vector2<f64>, Vector2<f64>)>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A map with nothing in it.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyMap;

/// Geographic position of the map's origin.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GeoOrigin {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("Could not read the map file: {0}")]
    Io(std::io::Error),

    #[error("Map file format is not supported: {0}")]
    UnsupportedFormat(String),

    #[error("Could not parse the map file at line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Map for EmptyMap {
    fn is_blocked(&self, _x_m: f64, _y_m: f64) -> bool {
        false
    }

    fn blocked_extent_m(&self) -> Option<(Vector2<f64>, Vector2<f64>)> {
        None
    }
}

impl From<std::io::Error> for MapError {
    fn from(e: std::io::Error) -> Self {
        MapError::Io(e)
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Load the map at the given path.
///
/// The origin places the map's local frame on the globe. Grid world maps are already in the local
/// frame so it is only recorded in the log.
pub fn load_map<P: AsRef<Path>>(path: P, origin: GeoOrigin) -> Result<Arc<dyn Map>, MapError> {
    let path = path.as_ref();

    if path.as_os_str().is_empty() {
        info!("No map path given, using an empty map");
        return Ok(Arc::new(EmptyMap));
    }

    if !path.exists() {
        warn!(
            "Map file {:?} does not exist, using an empty map",
            path
        );
        return Ok(Arc::new(EmptyMap));
    }

    match path.extension().and_then(|e| e.to_str()) {
        Some("map") => {
            let map = GridWorldMap::from_file(path)?;
            info!(
                "Loaded grid world map {:?} ({} m cells) with origin ({:.6}, {:.6})",
                path,
                map.resolution_m(),
                origin.latitude_deg,
                origin.longitude_deg
            );
            Ok(Arc::new(map))
        }
        _ => Err(MapError::UnsupportedFormat(path.display().to_string())),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_empty_and_missing_paths() {
        let map = load_map("", GeoOrigin::default()).unwrap();
        assert!(!map.is_blocked(0.0, 0.0));
        assert!(map.blocked_extent_m().is_none());

        let map = load_map("/definitely/not/a/real/file.map", GeoOrigin::default()).unwrap();
        assert!(!map.is_blocked(0.0, 0.0));
    }

    #[test]
    fn test_unsupported_format() {
        let path = std::env::temp_dir().join("plan_exec_map_test_unsupported.tif");
        std::fs::write(&path, "not a map").unwrap();

        assert!(matches!(
            load_map(&path, GeoOrigin::default()),
            Err(MapError::UnsupportedFormat(_))
        ));

        std::fs::remove_file(&path).ok();
    }
}
