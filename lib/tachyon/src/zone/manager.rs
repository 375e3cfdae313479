//! Cross-cell frame lifecycle. The game thread drives `begin_update` /
//! `update_entity` / `end_update`; the collector thread calls
//! `purge_state`. The composition seam serializes the two with a single
//! mutex (the history write lock of the concurrency model).

use crate::math::{Aabb, Quat, Vec3};
use crate::settings::ZoneSettings;
use crate::stats::ReplicationStats;
use crate::zone::grid::{ZoneGrid, ZoneKey};
use crate::zone::history::{StateBlock, Zone};
use crate::zone::range::{CellBox, ZoneRange};
use hashbrown::{HashMap, HashSet};
use indexmap::IndexMap;
use quark::{logging, EntityId};
use std::sync::Arc;

/// All zone blocks belonging to one purged frame time.
#[derive(Debug, Clone, PartialEq)]
pub struct StateFrame {
    pub time: u64,
    pub blocks: Vec<StateBlock>,
}

impl StateFrame {
    #[inline]
    pub fn new(time: u64) -> StateFrame {
        StateFrame {
            time,
            blocks: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct TrackedObject {
    range: ZoneRange,
    parent: Option<EntityId>,
    position: Vec3,
    rotation: Quat,
}

pub struct ZoneManager {
    grid: ZoneGrid,
    history_backlog: usize,
    dynamic_ranges: bool,
    collect_history: bool,

    zones: IndexMap<ZoneKey, Zone>,
    objects: HashMap<EntityId, TrackedObject>,

    update_time: u64,
    in_frame: bool,
    no_update: HashSet<EntityId>,
    pending_removal: Vec<EntityId>,

    /// Times of committed frames awaiting purge, oldest first.
    history_times: Vec<u64>,

    stats: Arc<ReplicationStats>,
    log: logging::Logger,
}

impl ZoneManager {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        grid: ZoneGrid,
        settings: &ZoneSettings,
        stats: Arc<ReplicationStats>,
        log: L,
    ) -> ZoneManager {
        ZoneManager {
            grid,
            history_backlog: settings.history_backlog,
            dynamic_ranges: settings.dynamic_ranges,
            collect_history: false,
            zones: IndexMap::new(),
            objects: HashMap::new(),
            update_time: 0,
            in_frame: false,
            no_update: HashSet::new(),
            pending_removal: Vec::new(),
            history_times: Vec::new(),
            stats,
            log: logging::child(log),
        }
    }

    #[inline]
    pub fn grid(&self) -> ZoneGrid {
        self.grid
    }

    /// Enabled by the collector on startup, disabled on shutdown. While
    /// disabled, frames are discarded at `end_update`.
    #[inline]
    pub fn set_collect_history(&mut self, enabled: bool) {
        self.collect_history = enabled;
    }

    #[inline]
    pub fn collect_history(&self) -> bool {
        self.collect_history
    }

    #[inline]
    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    /// Opens the frame at time `t`: seeds the no-update set, opens every
    /// live zone's block, then applies removals deferred from outside the
    /// frame.
    pub fn begin_update(&mut self, time: u64) {
        if self.in_frame {
            panic!("begin_update inside an open frame");
        }

        self.in_frame = true;
        self.update_time = time;

        self.no_update.clear();
        self.no_update.extend(self.objects.keys().copied());
        for id in &self.pending_removal {
            self.no_update.remove(id);
        }

        for zone in self.zones.values_mut() {
            zone.begin_update(time);
        }

        let deferred: Vec<EntityId> = self.pending_removal.drain(..).collect();
        for id in deferred {
            self.apply_removal(id);
        }
    }

    /// Records a pose for `id`, reclassifying it across zones when its
    /// world-space bounds moved into a different cell box.
    pub fn update_entity(
        &mut self,
        id: EntityId,
        parent: Option<EntityId>,
        position: Vec3,
        rotation: Quat,
        bounds: Aabb,
    ) {
        if !self.in_frame {
            panic!("update_entity outside an open frame");
        }

        let next = self.cell_box(bounds);
        let dynamic = self.dynamic_ranges;
        let entry = self.objects.entry(id).or_insert_with(|| TrackedObject {
            range: if dynamic {
                ZoneRange::dynamic()
            } else {
                ZoneRange::oct()
            },
            parent,
            position,
            rotation,
        });

        entry.parent = parent;
        entry.position = position;
        entry.rotation = rotation;

        if let Some(previous) = entry.range.set(next, &self.log) {
            let current = entry.range.bounds().expect("Range was just set");
            self.reclassify(id, previous, current);
        }

        let current = self.objects[&id]
            .range
            .bounds()
            .expect("Tracked object must have a range");
        for key in current.keys(&self.grid) {
            self.zones
                .get_mut(&key)
                .expect("Intersected zone must be live")
                .update(parent, id, position, rotation);
        }

        self.no_update.remove(&id);
    }

    /// Flags a discontinuity for `id` in every cell it intersects, so
    /// receivers skip interpolating across the jump.
    pub fn warp_entity(&mut self, id: EntityId) {
        if !self.in_frame {
            panic!("warp_entity outside an open frame");
        }

        let (bounds, parent) = match self.objects.get(&id) {
            Some(object) => match object.range.bounds() {
                Some(bounds) => (bounds, object.parent),
                None => return,
            },
            None => return,
        };

        for key in bounds.keys(&self.grid) {
            if let Some(zone) = self.zones.get_mut(&key) {
                zone.add_warp(parent, id);
            }
        }
    }

    /// Removes `id` from tracking. Inside a frame the removal is applied
    /// immediately; outside it is deferred to the next `begin_update`.
    pub fn remove_entity(&mut self, id: EntityId) {
        if self.in_frame {
            self.apply_removal(id);
        } else {
            self.pending_removal.push(id);
        }
    }

    /// Closes the frame: replays held poses for silent objects, records
    /// the frame time, commits every zone, and evicts dead zones.
    pub fn end_update(&mut self) {
        if !self.in_frame {
            panic!("end_update outside an open frame");
        }
        self.in_frame = false;

        if !self.collect_history {
            return;
        }

        // Heartbeat: silent objects re-emit their last pose into the same
        // cells so receivers observe the frame.
        let silent: Vec<EntityId> = self.no_update.drain().collect();
        for id in silent {
            let (bounds, parent, position, rotation) = match self.objects.get(&id) {
                Some(object) => match object.range.bounds() {
                    Some(bounds) => (bounds, object.parent, object.position, object.rotation),
                    None => continue,
                },
                None => continue,
            };

            for key in bounds.keys(&self.grid) {
                if let Some(zone) = self.zones.get_mut(&key) {
                    zone.update(parent, id, position, rotation);
                }
            }
        }

        if self.history_times.len() + 1 >= self.history_backlog {
            logging::warn!(self.log, "history backlog full, dropping frame";
                           "context" => "end_update",
                           "time" => self.update_time,
                           "backlog" => self.history_backlog);
            ReplicationStats::bump(&self.stats.frames_dropped);
            return;
        }

        self.history_times.push(self.update_time);

        let stats = &self.stats;
        let log = &self.log;
        self.zones.retain(|key, zone| {
            let idle = zone.commit_update();

            if idle && !zone.has_children() {
                logging::debug!(log, "evicting idle zone";
                                "context" => "end_update",
                                "zone" => %key);
                ReplicationStats::bump(&stats.zones_evicted);
                return false;
            }

            true
        });
    }

    /// Drains all committed history into per-frame batches, oldest first.
    /// Zones with sparse history merge into whichever frames match their
    /// block times.
    pub fn purge_state(&mut self) -> Vec<StateFrame> {
        let times: Vec<u64> = self.history_times.drain(..).collect();
        let mut frames: Vec<StateFrame> = times.iter().map(|&t| StateFrame::new(t)).collect();

        for zone in self.zones.values_mut() {
            let mut cursor = 0;

            for block in zone.purge_history() {
                if block.is_empty() {
                    continue;
                }

                while cursor < frames.len() && frames[cursor].time != block.time {
                    cursor += 1;
                }

                match frames.get_mut(cursor) {
                    Some(frame) => frame.blocks.push(block),
                    None => {
                        logging::warn!(self.log, "orphaned history block";
                                       "context" => "purge_state",
                                       "time" => block.time,
                                       "zone" => %block.zone);
                        break;
                    }
                }
            }
        }

        frames
    }

    fn cell_box(&self, bounds: Aabb) -> CellBox {
        let min = [
            ZoneGrid::world_to_zone(bounds.min.x, self.grid.cell[0]),
            ZoneGrid::world_to_zone(bounds.min.y, self.grid.cell[1]),
            ZoneGrid::world_to_zone(bounds.min.z, self.grid.cell[2]),
        ];
        let max = [
            ZoneGrid::world_to_zone(bounds.max.x, self.grid.cell[0]),
            ZoneGrid::world_to_zone(bounds.max.y, self.grid.cell[1]),
            ZoneGrid::world_to_zone(bounds.max.z, self.grid.cell[2]),
        ];

        CellBox::new(min, max)
    }

    /// Emits enter events for cells newly intersected and leave events for
    /// cells left behind.
    fn reclassify(&mut self, id: EntityId, previous: Option<CellBox>, current: CellBox) {
        for key in current.keys(&self.grid) {
            let inside_before = previous
                .map(|range| range.contains(key.x, key.y, key.z))
                .unwrap_or(false);

            if !inside_before {
                self.enter_zone(id, key);
            }
        }

        if let Some(previous) = previous {
            for key in previous.keys(&self.grid) {
                if !current.contains(key.x, key.y, key.z) {
                    if let Some(zone) = self.zones.get_mut(&key) {
                        zone.remove_child(id);
                    }
                }
            }
        }
    }

    fn enter_zone(&mut self, id: EntityId, key: ZoneKey) {
        let time = self.update_time;
        let backlog = self.history_backlog;
        let stats = self.stats.clone();

        let zone = self.zones.entry(key).or_insert_with(|| {
            ReplicationStats::bump(&stats.zones_created);
            let mut zone = Zone::new(key, backlog);
            // Mid-frame creation: the zone must observe the open frame
            // before any state lands in it.
            zone.begin_update(time);
            zone
        });

        zone.add_child(id);
    }

    fn apply_removal(&mut self, id: EntityId) {
        self.no_update.remove(&id);

        let object = match self.objects.remove(&id) {
            Some(object) => object,
            None => return,
        };

        if let Some(bounds) = object.range.bounds() {
            for key in bounds.keys(&self.grid) {
                if let Some(zone) = self.zones.get_mut(&key) {
                    zone.remove_child(id);
                }
            }
        }
    }
}
