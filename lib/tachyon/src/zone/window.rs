use crate::zone::grid::{ZoneGrid, ZoneKey};
use hashbrown::HashMap;

/// The box of zones a single client is interested in: a (2r+1)^3 window of
/// cells around a center, each assigned a small dense zone id starting at
/// 1 (0 is the wire-level removal sentinel). Ids are stable while the
/// center stands still but change meaning when the window moves.
#[derive(Debug)]
pub struct LocalZoneIndex {
    grid: ZoneGrid,
    radius: i64,
    center: ZoneKey,
    keys: Vec<ZoneKey>,
    ids: HashMap<ZoneKey, u32>,
}

impl LocalZoneIndex {
    pub fn new(grid: ZoneGrid, radius: i64, center: ZoneKey) -> LocalZoneIndex {
        if radius < 0 {
            panic!("Window radius must be non-negative, got {}", radius);
        }

        let mut index = LocalZoneIndex {
            grid,
            radius,
            center,
            keys: Vec::new(),
            ids: HashMap::new(),
        };
        index.rebuild();
        index
    }

    #[inline]
    pub fn center(&self) -> ZoneKey {
        self.center
    }

    #[inline]
    pub fn keys(&self) -> &[ZoneKey] {
        &self.keys
    }

    /// Dense id of a window cell, 1-based. `None` for cells outside the
    /// window.
    #[inline]
    pub fn zone_id(&self, key: &ZoneKey) -> Option<u32> {
        self.ids.get(key).copied()
    }

    /// The cell a dense id currently refers to.
    #[inline]
    pub fn key_of(&self, zone_id: u32) -> Option<ZoneKey> {
        if zone_id == 0 {
            return None;
        }

        self.keys.get(zone_id as usize - 1).copied()
    }

    #[inline]
    pub fn contains(&self, key: &ZoneKey) -> bool {
        self.ids.contains_key(key)
    }

    /// Moves the window. Returns the symmetric difference of the old and
    /// new windows as (exited, entered); both empty when the center is
    /// unchanged.
    pub fn set_center(&mut self, center: ZoneKey) -> (Vec<ZoneKey>, Vec<ZoneKey>) {
        if center == self.center {
            return (Vec::new(), Vec::new());
        }

        let old_keys = std::mem::replace(&mut self.keys, Vec::new());
        let old_ids = std::mem::replace(&mut self.ids, HashMap::new());

        self.center = center;
        self.rebuild();

        let exited = old_keys
            .iter()
            .filter(|key| !self.ids.contains_key(*key))
            .copied()
            .collect();
        let entered = self
            .keys
            .iter()
            .filter(|key| !old_ids.contains_key(*key))
            .copied()
            .collect();

        (exited, entered)
    }

    fn rebuild(&mut self) {
        let r = self.radius;

        for x in -r..=r {
            for y in -r..=r {
                for z in -r..=r {
                    let key = self.grid.key(self.center.x + x, self.center.y + y, self.center.z + z);
                    self.keys.push(key);
                    self.ids.insert(key, self.keys.len() as u32);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> LocalZoneIndex {
        let grid = ZoneGrid::uniform(32);
        let center = grid.key(0, 0, 0);
        LocalZoneIndex::new(grid, 1, center)
    }

    #[test]
    fn test_window_shape() {
        let index = window();

        assert_eq!(index.keys().len(), 27);
        assert!(index.contains(&ZoneGrid::uniform(32).key(1, 1, 1)));
        assert!(!index.contains(&ZoneGrid::uniform(32).key(2, 0, 0)));
    }

    #[test]
    fn test_ids_dense_from_one() {
        let index = window();
        let mut seen: Vec<u32> = index.keys().iter().map(|k| index.zone_id(k).unwrap()).collect();
        seen.sort_unstable();

        assert_eq!(seen, (1..=27).collect::<Vec<u32>>());
        assert_eq!(index.zone_id(&ZoneGrid::uniform(32).key(9, 9, 9)), None);
    }

    #[test]
    fn test_id_key_roundtrip() {
        let index = window();

        for key in index.keys() {
            let id = index.zone_id(key).unwrap();
            assert_eq!(index.key_of(id), Some(*key));
        }

        assert_eq!(index.key_of(0), None);
        assert_eq!(index.key_of(28), None);
    }

    #[test]
    fn test_recenter_symmetric_difference() {
        let grid = ZoneGrid::uniform(32);
        let mut index = window();

        let (exited, entered) = index.set_center(grid.key(1, 0, 0));

        assert_eq!(exited.len(), 9);
        assert_eq!(entered.len(), 9);
        assert!(exited.iter().all(|k| k.x == -1));
        assert!(entered.iter().all(|k| k.x == 2));
    }

    #[test]
    fn test_recenter_same_center_is_noop() {
        let grid = ZoneGrid::uniform(32);
        let mut index = window();

        let (exited, entered) = index.set_center(grid.key(0, 0, 0));

        assert!(exited.is_empty());
        assert!(entered.is_empty());
    }

    #[test]
    fn test_ids_change_meaning_on_recenter() {
        let grid = ZoneGrid::uniform(32);
        let mut index = window();
        let first = index.key_of(1).unwrap();

        index.set_center(grid.key(5, 5, 5));
        let second = index.key_of(1).unwrap();

        assert_ne!(first, second);
        assert_eq!(second, grid.key(4, 4, 4));
    }
}
