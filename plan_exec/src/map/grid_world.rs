//! Grid world text maps
//!
//! The first line of the file is the cell size in meters. Each following line is one row of cells,
//! with `#` marking a blocked cell and `_` or `.` marking a free cell. The last row of the file is
//! at y = 0, so the file reads like a picture of the map. Cell `(i, j)` covers
//! `[i * res, (i + 1) * res) x [j * res, (j + 1) * res)`.
//!
//! Points outside the grid are free.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{fs, path::Path};

use nalgebra::Vector2;

use super::{Map, MapError};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct GridWorldMap {
    resolution_m: f64,

    /// Blocked flags, indexed by row (from y = 0 upwards) then column
    blocked: Vec<Vec<bool>>,

    /// Blocked cells span rows `extent[0]..=extent[1]` and columns `extent[2]..=extent[3]`
    extent: Option<[usize; 4]>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl GridWorldMap {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, MapError> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, MapError> {
        let mut lines = text.lines();

        let resolution_m: f64 = lines
            .next()
            .ok_or(MapError::Parse {
                line: 1,
                reason: "missing cell size".into(),
            })?
            .trim()
            .parse()
            .map_err(|e| MapError::Parse {
                line: 1,
                reason: format!("invalid cell size: {}", e),
            })?;

        if !(resolution_m > 0.0) {
            return Err(MapError::Parse {
                line: 1,
                reason: format!("cell size must be positive, got {}", resolution_m),
            });
        }

        let mut blocked = Vec::new();
        for (i, line) in lines.enumerate() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }

            let row = line
                .chars()
                .map(|c| match c {
                    '#' => Ok(true),
                    '_' | '.' => Ok(false),
                    other => Err(MapError::Parse {
                        line: i + 2,
                        reason: format!("unexpected cell character {:?}", other),
                    }),
                })
                .collect::<Result<Vec<bool>, MapError>>()?;
            blocked.push(row);
        }

        // The file lists the top row first
        blocked.reverse();

        let mut extent: Option<[usize; 4]> = None;
        for (row, cells) in blocked.iter().enumerate() {
            for (col, _) in cells.iter().enumerate().filter(|(_, b)| **b) {
                extent = Some(match extent {
                    Some([r0, r1, c0, c1]) => [r0.min(row), r1.max(row), c0.min(col), c1.max(col)],
                    None => [row, row, col, col],
                });
            }
        }

        Ok(Self {
            resolution_m,
            blocked,
            extent,
        })
    }

    pub fn num_rows(&self) -> usize {
        self.blocked.len()
    }
}

impl Map for GridWorldMap {
    fn is_blocked(&self, x_m: f64, y_m: f64) -> bool {
        if x_m < 0.0 || y_m < 0.0 {
            return false;
        }

        let col = (x_m / self.resolution_m).floor() as usize;
        let row = (y_m / self.resolution_m).floor() as usize;

        self.blocked
            .get(row)
            .and_then(|r| r.get(col))
            .copied()
            .unwrap_or(false)
    }

    fn resolution_m(&self) -> f64 {
        self.resolution_m
    }

    fn blocked_extent_m(&self) -> Option<(Vector2<f64>, Vector2<f64>)> {
        self.extent.map(|[r0, r1, c0, c1]| {
            (
                Vector2::new(c0 as f64, r0 as f64) * self.resolution_m,
                Vector2::new((c1 + 1) as f64, (r1 + 1) as f64) * self.resolution_m,
            )
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const MAP: &str = "2.5\n#__\n_#.\n";

    #[test]
    fn test_parse_and_query() {
        let map = GridWorldMap::parse(MAP).unwrap();

        assert_eq!(map.resolution_m(), 2.5);
        assert_eq!(map.num_rows(), 2);

        // Bottom row is "_#."
        assert!(!map.is_blocked(1.0, 1.0));
        assert!(map.is_blocked(3.0, 1.0));
        assert!(!map.is_blocked(6.0, 1.0));

        // Top row is "#__"
        assert!(map.is_blocked(0.1, 4.9));
        assert!(!map.is_blocked(3.0, 4.9));

        // Outside the grid
        assert!(!map.is_blocked(-1.0, 1.0));
        assert!(!map.is_blocked(1.0, 100.0));
    }

    #[test]
    fn test_blocked_extent() {
        let (lo, hi) = GridWorldMap::parse(MAP).unwrap().blocked_extent_m().unwrap();
        assert_eq!(lo, Vector2::new(0.0, 0.0));
        assert_eq!(hi, Vector2::new(5.0, 5.0));

        let (lo, hi) = GridWorldMap::parse("1\n____\n__#_\n____\n")
            .unwrap()
            .blocked_extent_m()
            .unwrap();
        assert_eq!(lo, Vector2::new(2.0, 1.0));
        assert_eq!(hi, Vector2::new(3.0, 2.0));

        assert!(GridWorldMap::parse("1\n___\n").unwrap().blocked_extent_m().is_none());
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            GridWorldMap::parse(""),
            Err(MapError::Parse { line: 1, .. })
        ));
        assert!(matches!(
            GridWorldMap::parse("-1\n#"),
            Err(MapError::Parse { line: 1, .. })
        ));
        assert!(matches!(
            GridWorldMap::parse("1\n#x#"),
            Err(MapError::Parse { line: 2, .. })
        ));
    }
}
