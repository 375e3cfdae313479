use hashbrown::HashMap;
use quark::{EntityId, NetworkId};

/// Bidirectional map between opaque 64-bit application ids and the dense
/// 16-bit network id space of one connection. Id 0 is reserved as the
/// wire-level "no state" sentinel. Allocation wraps around and skips ids
/// still bound to live objects; retirement frees a slot for reuse.
#[derive(Debug)]
pub struct IdIndex {
    next: NetworkId,
    forward: HashMap<EntityId, NetworkId>,
    back: HashMap<NetworkId, EntityId>,
}

impl IdIndex {
    #[inline]
    pub fn new() -> IdIndex {
        IdIndex {
            next: 1,
            forward: HashMap::new(),
            back: HashMap::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    /// Network id already bound to `entity`, if any.
    #[inline]
    pub fn get(&self, entity: EntityId) -> Option<NetworkId> {
        self.forward.get(&entity).copied()
    }

    /// Entity bound to `network_id`, if any.
    #[inline]
    pub fn entity_of(&self, network_id: NetworkId) -> Option<EntityId> {
        self.back.get(&network_id).copied()
    }

    /// Returns the binding for `entity`, allocating the next free network
    /// id on first sight. Panics when all 65535 ids are live; a window
    /// holding that many objects has long since exceeded the protocol's
    /// design envelope.
    pub fn get_or_alloc(&mut self, entity: EntityId) -> NetworkId {
        if let Some(id) = self.forward.get(&entity) {
            return *id;
        }

        if self.back.len() == usize::from(NetworkId::max_value()) {
            panic!("Network id space exhausted");
        }

        let mut candidate = self.next;
        while candidate == 0 || self.back.contains_key(&candidate) {
            candidate = candidate.wrapping_add(1);
        }

        self.next = candidate.wrapping_add(1);
        self.forward.insert(entity, candidate);
        self.back.insert(candidate, entity);

        candidate
    }

    /// Releases a binding. Safe to call for ids that were never allocated.
    pub fn retire(&mut self, network_id: NetworkId) -> Option<EntityId> {
        let entity = self.back.remove(&network_id)?;
        self.forward.remove(&entity);
        Some(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_starts_at_one() {
        let mut index = IdIndex::new();

        assert_eq!(index.get_or_alloc(1000), 1);
        assert_eq!(index.get_or_alloc(2000), 2);
        assert_eq!(index.get_or_alloc(1000), 1);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_bidirectional_lookup() {
        let mut index = IdIndex::new();
        let id = index.get_or_alloc(4242);

        assert_eq!(index.get(4242), Some(id));
        assert_eq!(index.entity_of(id), Some(4242));
        assert_eq!(index.get(1), None);
        assert_eq!(index.entity_of(999), None);
    }

    #[test]
    fn test_retire_frees_slot() {
        let mut index = IdIndex::new();
        let id = index.get_or_alloc(1000);

        assert_eq!(index.retire(id), Some(1000));
        assert_eq!(index.get(1000), None);
        assert_eq!(index.retire(id), None);
    }

    #[test]
    fn test_wraparound_skips_live_ids() {
        let mut index = IdIndex::new();
        index.next = NetworkId::max_value();

        let last = index.get_or_alloc(1);
        assert_eq!(last, NetworkId::max_value());

        // The counter wraps past the 0 sentinel and the live id 1... but
        // id 1 is free here, so the next allocation takes it.
        let wrapped = index.get_or_alloc(2);
        assert_eq!(wrapped, 1);

        // With 1 and 65535 live, the following allocation lands on 2.
        assert_eq!(index.get_or_alloc(3), 2);
    }

    #[test]
    fn test_wraparound_skips_bound_id() {
        let mut index = IdIndex::new();
        let first = index.get_or_alloc(1);
        assert_eq!(first, 1);

        index.next = NetworkId::max_value();
        assert_eq!(index.get_or_alloc(2), NetworkId::max_value());

        // Wraps over 0 and over the still-live id 1.
        assert_eq!(index.get_or_alloc(3), 2);
    }
}
