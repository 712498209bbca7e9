//! Action decoding: ActionId → engine Command
//!
//! A discrete index is only meaningful against the legal-action list and slot
//! tables of the turn it was chosen in. Anything that cannot be resolved
//! decodes to a zero-field NOOP, which the engine treats as a no-op.

use civgym_engine::Command;

use super::{ActionId, LegalAction, LegalActionList, SlotTables};

/// Decodes discrete action indices into engine commands
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ActionDecoder;

impl ActionDecoder {
    /// Decode `id` using this turn's enumerated list and slot tables.
    ///
    /// - `id >= list.len()` → NOOP
    /// - unit/city action whose slot no longer resolves → NOOP
    /// - END_TURN / RESEARCH_SET → actor id 0
    pub fn decode(id: ActionId, list: &LegalActionList, slots: &SlotTables) -> Command {
        match list.get(id as usize) {
            Some(action) => Self::resolve(action, slots).unwrap_or(Command::noop()),
            None => Command::noop(),
        }
    }

    fn resolve(action: &LegalAction, slots: &SlotTables) -> Option<Command> {
        let ty = action.action_type;
        let actor_id = if ty.is_unit_action() {
            slots.units.id_at(action.actor_slot)?
        } else if ty.is_city_action() {
            slots.cities.id_at(action.actor_slot)?
        } else {
            0
        };
        Some(Command {
            action_type: ty,
            actor_id,
            target: action.target,
            sub_target: action.sub_target,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use civgym_engine::{ActionType, CityActions, UnitActions, ValidActions};

    fn setup() -> (LegalActionList, SlotTables) {
        let mut slots = SlotTables::default();
        slots.units.rebuild([104, 101]);
        slots.cities.rebuild([110]);

        let mut move_north = UnitActions {
            unit_id: 104,
            ..Default::default()
        };
        move_north.can_move[1] = true;
        let valid = ValidActions {
            unit_actions: vec![move_north],
            city_actions: vec![CityActions {
                city_id: 110,
                buildable_buildings: vec![3],
                ..Default::default()
            }],
            researchable_techs: vec![2],
            can_end_turn: true,
        };
        let list = LegalActionList::enumerate(&valid, &slots, 16);
        (list, slots)
    }

    #[test]
    fn test_decode_recovers_engine_ids() {
        let (list, slots) = setup();
        assert_eq!(list.len(), 4);

        let end_turn = ActionDecoder::decode(0, &list, &slots);
        assert_eq!(end_turn.action_type, ActionType::EndTurn);
        assert_eq!(end_turn.actor_id, 0);

        let mv = ActionDecoder::decode(1, &list, &slots);
        assert_eq!(
            mv,
            Command {
                action_type: ActionType::UnitMove,
                actor_id: 104,
                target: 0,
                sub_target: 1,
            }
        );

        let build = ActionDecoder::decode(2, &list, &slots);
        assert_eq!(build.action_type, ActionType::CityBuild);
        assert_eq!(build.actor_id, 110);
        assert_eq!((build.target, build.sub_target), (3, 1));

        let research = ActionDecoder::decode(3, &list, &slots);
        assert_eq!(research.action_type, ActionType::ResearchSet);
        assert_eq!((research.actor_id, research.target), (0, 2));
    }

    #[test]
    fn test_out_of_range_is_noop() {
        let (list, slots) = setup();
        for id in [4, 15, 16, 1000, ActionId::MAX] {
            let cmd = ActionDecoder::decode(id, &list, &slots);
            assert!(cmd.is_noop());
            assert_eq!(cmd, Command::noop());
        }
    }

    #[test]
    fn test_vanished_slot_is_noop() {
        let (list, mut slots) = setup();
        // unit 104 held slot 1; only 101 remains
        slots.units.rebuild([101]);
        assert!(ActionDecoder::decode(1, &list, &slots).is_noop());
        // non-unit actions are unaffected
        assert_eq!(
            ActionDecoder::decode(0, &list, &slots).action_type,
            ActionType::EndTurn
        );
    }

    #[test]
    fn test_in_range_never_noop_for_fresh_tables() {
        let (list, slots) = setup();
        for id in 0..list.len() as ActionId {
            assert!(!ActionDecoder::decode(id, &list, &slots).is_noop());
        }
    }
}
