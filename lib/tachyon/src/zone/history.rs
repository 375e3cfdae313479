use crate::math::{Quat, Vec3};
use crate::zone::grid::ZoneKey;
use hashbrown::HashSet;
use quark::EntityId;

/// One object pose update recorded in a zone at a single frame time.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct StateEntry {
    pub parent: Option<EntityId>,
    pub entity: EntityId,
    pub position: Vec3,
    pub rotation: Quat,
}

/// A position discontinuity marker. Receivers use these to skip
/// interpolation across the jump.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct WarpEntry {
    pub parent: Option<EntityId>,
    pub entity: EntityId,
}

/// Everything that happened in one zone at one frame time. The lists stay
/// unallocated until the first event of their kind.
#[derive(Debug, Clone, PartialEq)]
pub struct StateBlock {
    pub zone: ZoneKey,
    pub time: u64,
    pub updates: Option<Vec<StateEntry>>,
    pub removes: Option<Vec<EntityId>>,
    pub warps: Option<Vec<WarpEntry>>,
}

impl StateBlock {
    #[inline]
    pub fn new(zone: ZoneKey, time: u64) -> StateBlock {
        StateBlock {
            zone,
            time,
            updates: None,
            removes: None,
            warps: None,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.updates.is_none() && self.removes.is_none() && self.warps.is_none()
    }

    #[inline]
    pub fn add_update(&mut self, parent: Option<EntityId>, entity: EntityId, position: Vec3, rotation: Quat) {
        self.updates.get_or_insert_with(Vec::new).push(StateEntry {
            parent,
            entity,
            position,
            rotation,
        });
    }

    #[inline]
    pub fn add_remove(&mut self, entity: EntityId) {
        self.removes.get_or_insert_with(Vec::new).push(entity);
    }

    #[inline]
    pub fn add_warp(&mut self, parent: Option<EntityId>, entity: EntityId) {
        self.warps.get_or_insert_with(Vec::new).push(WarpEntry { parent, entity });
    }
}

/// Per-cell mutable state: the resident children, the currently open
/// block, and a bounded ring of committed blocks awaiting purge.
#[derive(Debug)]
pub struct Zone {
    key: ZoneKey,
    children: HashSet<EntityId>,
    current: Option<StateBlock>,
    history: Vec<StateBlock>,
    backlog: usize,
}

impl Zone {
    #[inline]
    pub fn new(key: ZoneKey, backlog: usize) -> Zone {
        if backlog == 0 {
            panic!("History backlog must be nonzero");
        }

        Zone {
            key,
            children: HashSet::new(),
            current: None,
            history: Vec::new(),
            backlog,
        }
    }

    #[inline]
    pub fn key(&self) -> ZoneKey {
        self.key
    }

    #[inline]
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Opens a fresh block for frame time `t`. Any uncommitted block is
    /// discarded, which is how dropped frames are absorbed.
    #[inline]
    pub fn begin_update(&mut self, time: u64) {
        self.current = Some(StateBlock::new(self.key, time));
    }

    #[inline]
    fn open_block(&mut self) -> &mut StateBlock {
        self.current
            .as_mut()
            .expect("Zone received state outside an open frame")
    }

    #[inline]
    pub fn update(&mut self, parent: Option<EntityId>, entity: EntityId, position: Vec3, rotation: Quat) {
        self.open_block().add_update(parent, entity, position, rotation);
    }

    #[inline]
    pub fn remove_entity(&mut self, entity: EntityId) {
        self.open_block().add_remove(entity);
    }

    #[inline]
    pub fn add_warp(&mut self, parent: Option<EntityId>, entity: EntityId) {
        self.open_block().add_warp(parent, entity);
    }

    #[inline]
    pub fn add_child(&mut self, entity: EntityId) {
        self.children.insert(entity);
    }

    /// Drops the entity from the resident set and records a remove event
    /// in the open block.
    #[inline]
    pub fn remove_child(&mut self, entity: EntityId) {
        self.children.remove(&entity);
        self.open_block().add_remove(entity);
    }

    /// Commits the open block into the history ring. Returns true when the
    /// zone is idle (no pending state and no history), in which case the
    /// block is discarded and the zone is eligible for eviction upstream.
    pub fn commit_update(&mut self) -> bool {
        let block = match self.current.take() {
            Some(block) => block,
            None => return self.history.is_empty(),
        };

        if block.is_empty() && self.history.is_empty() {
            return true;
        }

        if self.history.len() == self.backlog {
            self.history.remove(0);
        }
        self.history.push(block);

        false
    }

    /// Snapshots and clears the committed history.
    #[inline]
    pub fn purge_history(&mut self) -> Vec<StateBlock> {
        std::mem::replace(&mut self.history, Vec::new())
    }
}
