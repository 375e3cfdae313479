//! Per-participant object table. Each endpoint of a connection holds its
//! own `SharedObjectSpace`; the space owns its objects outright and is the
//! only dispatcher of update/removal notifications.

use crate::stats::ReplicationStats;
use crate::wire::frame::FrameState;
use crate::wire::object::ObjectState;
use crate::zone::grid::ZoneKey;
use hashbrown::{HashMap, HashSet};
use parking_lot::RwLock;
use quark::{logging, NetworkId};
use std::sync::Arc;

/// One replicated object as seen by one connection endpoint: the latest
/// applied state, the last mutually confirmed baseline, and the zone slot.
#[derive(Debug)]
pub struct SharedObject {
    current: ObjectState,
    baseline: Option<ObjectState>,
    /// Frame time of the last applied state.
    version: u64,
    baseline_version: u64,
    zone: Option<ZoneKey>,
    removal_notified: bool,
}

impl SharedObject {
    #[inline]
    pub fn new(network_id: NetworkId) -> SharedObject {
        SharedObject {
            current: ObjectState::new(network_id),
            baseline: None,
            version: 0,
            baseline_version: 0,
            zone: None,
            removal_notified: false,
        }
    }

    #[inline]
    pub fn network_id(&self) -> NetworkId {
        self.current.network_id
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[inline]
    pub fn current(&self) -> &ObjectState {
        &self.current
    }

    #[inline]
    pub fn baseline(&self) -> Option<&ObjectState> {
        self.baseline.as_ref()
    }

    #[inline]
    pub fn zone(&self) -> Option<ZoneKey> {
        self.zone
    }

    #[inline]
    pub fn set_zone(&mut self, zone: Option<ZoneKey>) {
        self.zone = zone;
    }

    #[inline]
    pub fn real_id(&self) -> Option<u64> {
        self.current.real_id
    }

    /// Server side: absorbs an observed pose. Only advances when `time`
    /// is beyond the current version.
    #[allow(clippy::too_many_arguments)]
    pub fn update_state(
        &mut self,
        time: u64,
        zone: ZoneKey,
        zone_id: u32,
        real_id: u64,
        parent_id: Option<u64>,
        position: u64,
        rotation: u64,
    ) -> bool {
        if time <= self.version {
            return false;
        }

        self.version = time;
        self.zone = Some(zone);
        self.current.zone_id = Some(zone_id);
        self.current.real_id = Some(real_id);
        self.current.parent_id = parent_id;
        self.current.position = Some(position);
        self.current.rotation = Some(rotation);
        self.removal_notified = false;

        true
    }

    /// Stamps the removal sentinel on the current view.
    #[inline]
    pub fn mark_removed(&mut self, time: u64) {
        if time > self.version {
            self.version = time;
        }

        self.current.mark_removed();
        self.zone = None;
    }

    #[inline]
    pub fn is_removed(&self) -> bool {
        self.current.is_removed()
    }

    /// Removal is mutual knowledge only once both the current view and the
    /// baseline carry the sentinel; the object must not be discarded
    /// before that.
    #[inline]
    pub fn is_fully_removed(&self) -> bool {
        self.current.is_removed()
            && self
                .baseline
                .as_ref()
                .map(|baseline| baseline.is_removed())
                .unwrap_or(false)
    }

    /// The outbound delta against the baseline; a full snapshot when no
    /// baseline has been confirmed yet.
    pub fn delta(&self) -> ObjectState {
        match &self.baseline {
            Some(baseline) => self.current.delta_from(baseline),
            None => self.current.clone(),
        }
    }

    /// Promotes `state` into the baseline. The first confirmed state is
    /// cloned wholesale; later confirmations merge if their sequence has
    /// not been superseded.
    pub fn update_baseline(
        &mut self,
        seq: u64,
        state: &ObjectState,
        stats: &ReplicationStats,
        log: &logging::Logger,
    ) {
        match &mut self.baseline {
            None => {
                let mut baseline = state.clone();

                if baseline.real_id.is_none() {
                    // Seen under severe ack lag: the first confirmed state
                    // was already a delta. Fall back to what we know now.
                    logging::warn!(log, "initial baseline missing real id";
                                   "context" => "update_baseline",
                                   "network_id" => baseline.network_id);
                    ReplicationStats::bump(&stats.baseline_real_id_fallback);
                    baseline.real_id = self.current.real_id;
                }

                self.baseline = Some(baseline);
                self.baseline_version = seq;
            }
            Some(baseline) => {
                if seq >= self.baseline_version {
                    baseline.apply_delta(state);
                    self.baseline_version = seq;
                }
            }
        }

        ReplicationStats::bump(&stats.baselines_promoted);
    }

    /// Client side: merges an inbound delta. Stale sequences are skipped;
    /// otherwise the current view is reset to the baseline before the
    /// delta lands on top.
    pub fn apply_network_state(&mut self, seq: u64, state: &ObjectState) -> bool {
        if self.version > seq {
            return false;
        }

        if let Some(baseline) = &self.baseline {
            self.current = baseline.clone();
        }
        self.current.apply_delta(state);
        self.version = seq;

        true
    }

    /// True exactly once per removal transition; resets when the object
    /// comes back.
    fn take_removal_notification(&mut self) -> bool {
        if self.current.is_removed() {
            if self.removal_notified {
                return false;
            }
            self.removal_notified = true;
            return true;
        }

        self.removal_notified = false;
        false
    }
}

/// Receives object lifecycle events from a space. Dispatch happens from
/// the space, never from the objects themselves.
pub trait ObjectObserver: Send {
    fn object_updated(&mut self, state: &ObjectState);
    fn object_removed(&mut self, state: &ObjectState);
}

/// Double-buffered set of network ids active on a connection. One writer
/// mutates the shadow set; `commit` publishes an immutable snapshot that
/// any number of readers can take without blocking the writer.
#[derive(Debug, Default)]
pub struct ActiveIds {
    shadow: HashSet<NetworkId>,
    committed: RwLock<Arc<HashSet<NetworkId>>>,
}

impl ActiveIds {
    #[inline]
    pub fn new() -> ActiveIds {
        ActiveIds::default()
    }

    #[inline]
    pub fn clear(&mut self) {
        self.shadow.clear();
    }

    #[inline]
    pub fn insert(&mut self, id: NetworkId) {
        self.shadow.insert(id);
    }

    #[inline]
    pub fn remove(&mut self, id: NetworkId) {
        self.shadow.remove(&id);
    }

    /// Publishes the shadow set as the visible snapshot.
    #[inline]
    pub fn commit(&mut self) {
        let snapshot = Arc::new(self.shadow.clone());
        *self.committed.write() = snapshot;
    }

    /// The last committed snapshot. Uncommitted shadow mutations are
    /// never visible here.
    #[inline]
    pub fn snapshot(&self) -> Arc<HashSet<NetworkId>> {
        self.committed.read().clone()
    }
}

/// Object table of one connection endpoint, keyed by network id.
pub struct SharedObjectSpace {
    objects: HashMap<NetworkId, SharedObject>,
    active: ActiveIds,
    observers: Vec<Box<dyn ObjectObserver>>,
    frame_time: u64,
    stats: Arc<ReplicationStats>,
    log: logging::Logger,
}

impl SharedObjectSpace {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        stats: Arc<ReplicationStats>,
        log: L,
    ) -> SharedObjectSpace {
        SharedObjectSpace {
            objects: HashMap::new(),
            active: ActiveIds::new(),
            observers: Vec::new(),
            frame_time: 0,
            stats,
            log: logging::child(log),
        }
    }

    #[inline]
    pub fn add_observer(&mut self, observer: Box<dyn ObjectObserver>) {
        self.observers.push(observer);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[inline]
    pub fn get(&self, id: NetworkId) -> Option<&SharedObject> {
        self.objects.get(&id)
    }

    #[inline]
    pub fn get_mut(&mut self, id: NetworkId) -> Option<&mut SharedObject> {
        self.objects.get_mut(&id)
    }

    #[inline]
    pub fn get_or_create(&mut self, id: NetworkId) -> &mut SharedObject {
        self.objects.entry(id).or_insert_with(|| SharedObject::new(id))
    }

    #[inline]
    pub fn remove(&mut self, id: NetworkId) -> Option<SharedObject> {
        self.active.remove(id);
        self.objects.remove(&id)
    }

    #[inline]
    pub fn ids(&self) -> Vec<NetworkId> {
        self.objects.keys().copied().collect()
    }

    #[inline]
    pub fn active_mut(&mut self) -> &mut ActiveIds {
        &mut self.active
    }

    #[inline]
    pub fn active_snapshot(&self) -> Arc<HashSet<NetworkId>> {
        self.active.snapshot()
    }

    #[inline]
    pub fn begin_frame(&mut self, time: u64) {
        self.frame_time = time;
    }

    #[inline]
    pub fn end_frame(&mut self) {}

    /// Promotes every state of the supplied frames into its object's
    /// baseline. Called when the double-ACK confirms the peer holds them.
    pub fn update_baseline(&mut self, frames: &[FrameState]) {
        for frame in frames {
            for state in &frame.states {
                match self.objects.get_mut(&state.network_id) {
                    Some(object) => {
                        object.update_baseline(frame.time, state, &self.stats, &self.log)
                    }
                    None => {
                        // Normal around evictions: the retained sent state
                        // can outlive the object it described.
                        logging::debug!(self.log, "baseline for unknown object";
                                        "context" => "update_baseline",
                                        "network_id" => state.network_id);
                        ReplicationStats::bump(&self.stats.unknown_network_id);
                    }
                }
            }
        }
    }

    /// Fires updated/removed notifications for one object, respecting the
    /// exactly-once removal transition.
    pub fn notify(&mut self, id: NetworkId) {
        let object = match self.objects.get_mut(&id) {
            Some(object) => object,
            None => return,
        };

        if object.take_removal_notification() {
            let state = object.current.clone();
            ReplicationStats::bump(&self.stats.objects_removed);
            for observer in &mut self.observers {
                observer.object_removed(&state);
            }
        } else if !object.is_removed() {
            let state = object.current.clone();
            for observer in &mut self.observers {
                observer.object_updated(&state);
            }
        }
    }
}
