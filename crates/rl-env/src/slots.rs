//! Slot allocation: EngineId ↔ dense per-turn slot
//!
//! Slots are a pure function of the sorted set of the controlled player's
//! EngineIds: ascending id → ascending slot. Tables are rebuilt from scratch
//! every observation cycle and never patched incrementally.

use std::collections::HashMap;

use civgym_engine::{EngineId, Observation};
use tracing::debug;

/// Maximum number of unit slots
pub const MAX_UNITS: usize = 256;

/// Maximum number of city slots
pub const MAX_CITIES: usize = 64;

/// Dense index into a fixed-shape tensor row
pub type Slot = usize;

/// Exact-inverse mapping between slots and EngineIds for one entity kind.
///
/// Ids beyond `capacity` (in ascending order) are left unslotted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotMap {
    capacity: usize,
    ids: Vec<EngineId>,
    slots: HashMap<EngineId, Slot>,
}

impl SlotMap {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ids: Vec::with_capacity(capacity),
            slots: HashMap::with_capacity(capacity),
        }
    }

    /// Replace the mapping with one built from `ids`.
    ///
    /// Returns how many ids did not fit.
    pub fn rebuild(&mut self, ids: impl IntoIterator<Item = EngineId>) -> usize {
        let mut sorted: Vec<EngineId> = ids.into_iter().collect();
        sorted.sort_unstable();
        sorted.dedup();
        let dropped = sorted.len().saturating_sub(self.capacity);
        sorted.truncate(self.capacity);

        self.slots.clear();
        self.slots
            .extend(sorted.iter().enumerate().map(|(slot, &id)| (id, slot)));
        self.ids = sorted;
        dropped
    }

    pub fn slot_of(&self, id: EngineId) -> Option<Slot> {
        self.slots.get(&id).copied()
    }

    pub fn id_at(&self, slot: Slot) -> Option<EngineId> {
        self.ids.get(slot).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// (slot, id) pairs in ascending slot order
    pub fn iter(&self) -> impl Iterator<Item = (Slot, EngineId)> + '_ {
        self.ids.iter().copied().enumerate()
    }
}

/// Unit and city slot maps for the controlled player
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotTables {
    pub units: SlotMap,
    pub cities: SlotMap,
}

impl Default for SlotTables {
    fn default() -> Self {
        Self::new(MAX_UNITS, MAX_CITIES)
    }
}

impl SlotTables {
    pub fn new(max_units: usize, max_cities: usize) -> Self {
        Self {
            units: SlotMap::with_capacity(max_units),
            cities: SlotMap::with_capacity(max_cities),
        }
    }

    /// Recompute both maps from a fresh observation snapshot.
    pub fn rebuild(&mut self, obs: &Observation) {
        let me = obs.controlled_player;
        let dropped_units = self
            .units
            .rebuild(obs.units.iter().filter(|u| u.owner == me).map(|u| u.id));
        let dropped_cities = self
            .cities
            .rebuild(obs.cities.iter().filter(|c| c.owner == me).map(|c| c.id));
        if dropped_units > 0 || dropped_cities > 0 {
            debug!(
                dropped_units,
                dropped_cities, "slot capacity exhausted, highest ids left unslotted"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use civgym_engine::{CityObs, UnitObs};
    use proptest::prelude::*;

    fn unit(id: EngineId, owner: u8) -> UnitObs {
        UnitObs {
            id,
            type_id: 0,
            owner,
            tile: 0,
            hp: 10,
            max_hp: 10,
            moves_left: 3,
            veteran_level: 0,
            fortified: false,
        }
    }

    fn city(id: EngineId, owner: u8) -> CityObs {
        CityObs {
            id,
            owner,
            tile: 0,
            size: 1,
            food_stock: 0,
            shield_stock: 0,
            production: None,
            turns_to_complete: 0,
        }
    }

    #[test]
    fn test_slots_follow_ascending_ids() {
        let mut map = SlotMap::with_capacity(8);
        map.rebuild([42, 7, 19]);
        assert_eq!(map.slot_of(7), Some(0));
        assert_eq!(map.slot_of(19), Some(1));
        assert_eq!(map.slot_of(42), Some(2));
        assert_eq!(map.id_at(2), Some(42));
        assert_eq!(map.id_at(3), None);
        assert_eq!(map.slot_of(8), None);
    }

    #[test]
    fn test_rebuild_replaces_previous_mapping() {
        let mut map = SlotMap::with_capacity(8);
        map.rebuild([1, 2, 3]);
        map.rebuild([2, 3]);
        // unit 1 died: 2 and 3 shift down, nothing stale remains
        assert_eq!(map.len(), 2);
        assert_eq!(map.slot_of(1), None);
        assert_eq!(map.slot_of(2), Some(0));
        assert_eq!(map.slot_of(3), Some(1));
    }

    #[test]
    fn test_empty_set_yields_empty_map() {
        let mut map = SlotMap::with_capacity(4);
        map.rebuild([5]);
        assert_eq!(map.rebuild(std::iter::empty()), 0);
        assert!(map.is_empty());
    }

    #[test]
    fn test_capacity_drops_highest_ids() {
        let mut map = SlotMap::with_capacity(2);
        let dropped = map.rebuild([30, 10, 20]);
        assert_eq!(dropped, 1);
        assert_eq!(map.iter().collect::<Vec<_>>(), vec![(0, 10), (1, 20)]);
        assert_eq!(map.slot_of(30), None);
    }

    #[test]
    fn test_tables_only_cover_controlled_player() {
        let obs = Observation {
            controlled_player: 1,
            units: vec![unit(5, 0), unit(9, 1), unit(3, 1), unit(4, 2)],
            cities: vec![city(50, 1), city(40, 0)],
            ..Default::default()
        };
        let mut tables = SlotTables::default();
        tables.rebuild(&obs);

        assert_eq!(tables.units.iter().collect::<Vec<_>>(), vec![(0, 3), (1, 9)]);
        assert_eq!(tables.cities.iter().collect::<Vec<_>>(), vec![(0, 50)]);
        assert_eq!(tables.units.capacity(), MAX_UNITS);
        assert_eq!(tables.cities.capacity(), MAX_CITIES);
    }

    proptest! {
        #[test]
        fn prop_mappings_are_exact_inverses(
            ids in proptest::collection::vec(0u32..10_000, 0..300),
        ) {
            let mut map = SlotMap::with_capacity(MAX_UNITS);
            map.rebuild(ids.iter().copied());

            let mut unique = ids.clone();
            unique.sort_unstable();
            unique.dedup();
            prop_assert_eq!(map.len(), unique.len().min(MAX_UNITS));

            for (slot, id) in map.iter() {
                prop_assert_eq!(map.slot_of(id), Some(slot));
            }
            for &id in &unique {
                if let Some(slot) = map.slot_of(id) {
                    prop_assert_eq!(map.id_at(slot), Some(id));
                }
            }
        }

        #[test]
        fn prop_assignment_ignores_input_order(
            mut ids in proptest::collection::vec(0u32..1_000, 0..100),
        ) {
            let mut a = SlotMap::with_capacity(64);
            a.rebuild(ids.iter().copied());
            ids.reverse();
            let mut b = SlotMap::with_capacity(64);
            b.rebuild(ids.iter().copied());
            prop_assert_eq!(a, b);
        }
    }
}
