//! Legal-action enumeration
//!
//! Walks the engine's valid-actions summary and the current slot tables to
//! produce the per-turn action space: a bounded, ordered list of
//! `(action_type, actor_slot, target, sub_target)` tuples plus a parallel
//! validity mask. The same engine state always enumerates to the same list.

use civgym_engine::{
    ActionType, CityActions, UnitActions, ValidActions, NUM_DIRECTIONS, PRODUCTION_KIND_BUILDING,
    PRODUCTION_KIND_UNIT,
};
use ndarray::{Array1, Array2};
use tracing::debug;

use crate::{Slot, SlotMap, SlotTables};

/// Default capacity of the per-turn legal-action list
pub const MAX_LEGAL_ACTIONS: usize = 1024;

/// Columns of the exported legal-action array
pub const LEGAL_ACTION_FIELDS: usize = 4;

/// Sub-target carried by tile-improvement actions
pub const NO_SUB_TARGET: i32 = -1;

/// One entry of the per-turn action space
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LegalAction {
    pub action_type: ActionType,
    /// Unit or city slot; 0 for actions without an actor
    pub actor_slot: Slot,
    pub target: i32,
    pub sub_target: i32,
}

impl LegalAction {
    fn unit(action_type: ActionType, slot: Slot, target: i32, sub_target: i32) -> Self {
        Self {
            action_type,
            actor_slot: slot,
            target,
            sub_target,
        }
    }

    fn global(action_type: ActionType, target: i32) -> Self {
        Self {
            action_type,
            actor_slot: 0,
            target,
            sub_target: 0,
        }
    }

    /// `[type, actor_slot, target, sub_target]`
    pub fn as_row(&self) -> [i32; LEGAL_ACTION_FIELDS] {
        [
            self.action_type.index() as i32,
            self.actor_slot as i32,
            self.target,
            self.sub_target,
        ]
    }
}

/// Fixed-capacity ordered list of legal actions.
///
/// Never grows past its capacity; pushes beyond it are counted and dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LegalActionList {
    capacity: usize,
    actions: Vec<LegalAction>,
    dropped: usize,
}

impl LegalActionList {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            actions: Vec::with_capacity(capacity),
            dropped: 0,
        }
    }

    /// Enumerate the action space for one turn.
    ///
    /// Order: END_TURN, then units by ascending slot (moves by direction,
    /// attacks, fortify, build city, road, irrigation, mine, disband), then
    /// cities by ascending slot (units, buildings, buy), then research in
    /// engine order. Actors without a slot are skipped.
    pub fn enumerate(valid: &ValidActions, slots: &SlotTables, capacity: usize) -> Self {
        let mut list = Self::with_capacity(capacity);

        if valid.can_end_turn {
            list.push(LegalAction::global(ActionType::EndTurn, 0));
        }

        for (slot, ua) in by_slot(valid.unit_actions.as_slice(), &slots.units, |ua| ua.unit_id) {
            list.push_unit_actions(slot, ua);
        }

        for (slot, ca) in by_slot(valid.city_actions.as_slice(), &slots.cities, |ca| ca.city_id) {
            list.push_city_actions(slot, ca);
        }

        for &tech in &valid.researchable_techs {
            list.push(LegalAction::global(ActionType::ResearchSet, tech as i32));
        }

        if list.dropped > 0 {
            debug!(
                capacity,
                dropped = list.dropped,
                "legal-action list truncated at capacity"
            );
        }
        list
    }

    fn push_unit_actions(&mut self, slot: Slot, ua: &UnitActions) {
        for d in 0..NUM_DIRECTIONS {
            if ua.can_move[d] {
                self.push(LegalAction::unit(ActionType::UnitMove, slot, 0, d as i32));
            }
        }
        for &tile in &ua.attackable_tiles {
            self.push(LegalAction::unit(ActionType::UnitAttack, slot, tile as i32, 0));
        }
        let flags = [
            (ua.can_fortify, ActionType::UnitFortify, 0),
            (ua.can_build_city, ActionType::UnitBuildCity, 0),
            (ua.can_build_road, ActionType::UnitBuildRoad, NO_SUB_TARGET),
            (ua.can_build_irrigation, ActionType::UnitBuildIrrigation, NO_SUB_TARGET),
            (ua.can_build_mine, ActionType::UnitBuildMine, NO_SUB_TARGET),
            (ua.can_disband, ActionType::UnitDisband, 0),
        ];
        for (allowed, action_type, sub_target) in flags {
            if allowed {
                self.push(LegalAction::unit(action_type, slot, 0, sub_target));
            }
        }
    }

    fn push_city_actions(&mut self, slot: Slot, ca: &CityActions) {
        for &unit_type in &ca.buildable_units {
            self.push(LegalAction::unit(
                ActionType::CityBuild,
                slot,
                unit_type as i32,
                PRODUCTION_KIND_UNIT,
            ));
        }
        for &building in &ca.buildable_buildings {
            self.push(LegalAction::unit(
                ActionType::CityBuild,
                slot,
                building as i32,
                PRODUCTION_KIND_BUILDING,
            ));
        }
        if ca.can_buy {
            self.push(LegalAction::unit(ActionType::CityBuy, slot, 0, 0));
        }
    }

    /// Append an action; returns false once the list is full.
    pub fn push(&mut self, action: LegalAction) -> bool {
        if self.actions.len() >= self.capacity {
            self.dropped += 1;
            return false;
        }
        self.actions.push(action);
        true
    }

    /// Number of populated entries (`num_legal_actions`)
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Candidates discarded because the list was full
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn get(&self, index: usize) -> Option<&LegalAction> {
        self.actions.get(index)
    }

    pub fn as_slice(&self) -> &[LegalAction] {
        &self.actions
    }

    /// Validity mask of length `capacity`: ones over the populated prefix.
    pub fn mask(&self) -> Array1<f32> {
        Array1::from_shape_fn(self.capacity, |i| if i < self.len() { 1.0 } else { 0.0 })
    }

    /// `capacity × 4` array of `[type, actor_slot, target, sub_target]` rows,
    /// zero-padded past `len()`.
    pub fn to_array(&self) -> Array2<i32> {
        let mut out = Array2::zeros((self.capacity, LEGAL_ACTION_FIELDS));
        for (mut row, action) in out.rows_mut().into_iter().zip(&self.actions) {
            for (cell, value) in row.iter_mut().zip(action.as_row()) {
                *cell = value;
            }
        }
        out
    }
}

/// Resolve actors to slots and order them by slot, skipping unslotted ones.
fn by_slot<'a, T>(
    actions: &'a [T],
    slots: &SlotMap,
    actor_id: impl Fn(&T) -> civgym_engine::EngineId,
) -> Vec<(Slot, &'a T)> {
    let mut resolved: Vec<(Slot, &T)> = actions
        .iter()
        .filter_map(|a| match slots.slot_of(actor_id(a)) {
            Some(slot) => Some((slot, a)),
            None => {
                debug!(actor_id = actor_id(a), "actor has no slot, actions skipped");
                None
            }
        })
        .collect();
    resolved.sort_by_key(|(slot, _)| *slot);
    resolved
}
