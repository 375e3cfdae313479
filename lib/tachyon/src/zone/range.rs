use crate::zone::grid::{ZoneGrid, ZoneKey};
use quark::logging;

/// Inclusive box of cell coordinates an object currently intersects.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct CellBox {
    pub min: [i64; 3],
    pub max: [i64; 3],
}

impl CellBox {
    #[inline]
    pub fn new(min: [i64; 3], max: [i64; 3]) -> CellBox {
        CellBox { min, max }
    }

    #[inline]
    pub fn contains(&self, x: i64, y: i64, z: i64) -> bool {
        x >= self.min[0]
            && x <= self.max[0]
            && y >= self.min[1]
            && y <= self.max[1]
            && z >= self.min[2]
            && z <= self.max[2]
    }

    #[inline]
    pub fn cells_per_axis(&self) -> [i64; 3] {
        [
            self.max[0] - self.min[0] + 1,
            self.max[1] - self.min[1] + 1,
            self.max[2] - self.min[2] + 1,
        ]
    }

    /// Every cell key inside the box.
    pub fn keys(&self, grid: &ZoneGrid) -> Vec<ZoneKey> {
        let mut keys = Vec::new();

        for x in self.min[0]..=self.max[0] {
            for y in self.min[1]..=self.max[1] {
                for z in self.min[2]..=self.max[2] {
                    keys.push(grid.key(x, y, z));
                }
            }
        }

        keys
    }
}

/// Tracks the box of cells an object intersects. The `Oct` variant is the
/// compact legacy layout limited to two cells per axis; `Dynamic` supports
/// any extent and subsumes it.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ZoneRange {
    Oct(Option<CellBox>),
    Dynamic(Option<CellBox>),
}

impl ZoneRange {
    #[inline]
    pub fn oct() -> ZoneRange {
        ZoneRange::Oct(None)
    }

    #[inline]
    pub fn dynamic() -> ZoneRange {
        ZoneRange::Dynamic(None)
    }

    #[inline]
    pub fn bounds(&self) -> Option<CellBox> {
        match self {
            ZoneRange::Oct(bounds) | ZoneRange::Dynamic(bounds) => *bounds,
        }
    }

    /// Replaces the tracked box, returning the previous one when the range
    /// actually changed (`None` means no change). The Oct variant clamps
    /// extents beyond two cells per axis and logs the violation.
    pub fn set(&mut self, mut next: CellBox, log: &logging::Logger) -> Option<Option<CellBox>> {
        if let ZoneRange::Oct(_) = self {
            let cells = next.cells_per_axis();
            if cells.iter().any(|&c| c > 2) {
                logging::error!(log, "object extent exceeds compact range limit";
                                "context" => "zone_range",
                                "cells_x" => cells[0],
                                "cells_y" => cells[1],
                                "cells_z" => cells[2]);

                for axis in 0..3 {
                    next.max[axis] = next.max[axis].min(next.min[axis] + 1);
                }
            }
        }

        let previous = self.bounds();
        if previous == Some(next) {
            return None;
        }

        match self {
            ZoneRange::Oct(bounds) | ZoneRange::Dynamic(bounds) => *bounds = Some(next),
        }

        Some(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_enumerates_box() {
        let grid = ZoneGrid::uniform(32);
        let keys = CellBox::new([0, 0, 0], [1, 0, 1]).keys(&grid);

        assert_eq!(keys.len(), 4);
        assert!(keys.contains(&grid.key(1, 0, 1)));
    }

    #[test]
    fn test_dynamic_accepts_any_extent() {
        let log = quark::logging::discard();
        let mut range = ZoneRange::dynamic();

        range.set(CellBox::new([0, 0, 0], [5, 5, 5]), &log);

        assert_eq!(range.bounds().unwrap().cells_per_axis(), [6, 6, 6]);
    }

    #[test]
    fn test_oct_clamps_oversized_extent() {
        let log = quark::logging::discard();
        let mut range = ZoneRange::oct();

        range.set(CellBox::new([0, 0, 0], [4, 1, 0]), &log);

        assert_eq!(range.bounds().unwrap().max, [1, 1, 0]);
    }

    #[test]
    fn test_set_reports_change() {
        let log = quark::logging::discard();
        let mut range = ZoneRange::dynamic();
        let first = CellBox::new([0, 0, 0], [1, 1, 1]);

        assert_eq!(range.set(first, &log), Some(None));
        assert_eq!(range.set(first, &log), None);

        let second = CellBox::new([1, 0, 0], [2, 1, 1]);
        assert_eq!(range.set(second, &log), Some(Some(first)));
    }
}
