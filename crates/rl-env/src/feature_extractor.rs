//! Feature extraction: engine Observation → fixed-shape tensors
//!
//! Converts one observation snapshot plus the turn's slot tables into a bundle
//! of fixed-shape arrays. Shapes never depend on how many units, cities or
//! players currently exist; unused rows are zero and masked out.

use civgym_engine::{Observation, EXTRA_IRRIGATION, EXTRA_MINE, EXTRA_ROAD, MAX_PLAYERS};
use ndarray::{Array1, Array2, Array3, ArrayViewMut1};

use super::{SlotTables, MAX_CITIES, MAX_UNITS};

/// Length of the global feature vector
pub const GLOBAL_FEATURES: usize = 10;

/// Number of map channels
pub const MAP_CHANNELS: usize = 9;

/// Features per unit row
pub const UNIT_FEATURES: usize = 10;

/// Features per city row
pub const CITY_FEATURES: usize = 10;

/// Features per player row
pub const PLAYER_FEATURES: usize = 12;

/// Map channel layout
pub const CH_VISIBILITY: usize = 0;
pub const CH_TERRAIN: usize = 1;
pub const CH_ROAD: usize = 2;
pub const CH_IRRIGATION: usize = 3;
pub const CH_MINE: usize = 4;
pub const CH_OWNED_SELF: usize = 5;
pub const CH_OWNED_ENEMY: usize = 6;
pub const CH_CITY: usize = 7;
pub const CH_UNIT: usize = 8;

pub const VISIBLE: u8 = 255;
pub const EXPLORED: u8 = 128;
const PRESENT: u8 = 255;

/// Fixed-shape observation bundle
#[derive(Clone, Debug, PartialEq)]
pub struct ObservationTensors {
    /// `[GLOBAL_FEATURES]`
    pub global: Array1<f32>,
    /// `[MAP_CHANNELS, height, width]`
    pub map: Array3<u8>,
    /// `[MAX_UNITS, UNIT_FEATURES]`, row = unit slot
    pub units: Array2<f32>,
    pub unit_mask: Array1<f32>,
    /// `[MAX_CITIES, CITY_FEATURES]`, row = city slot
    pub cities: Array2<f32>,
    pub city_mask: Array1<f32>,
    /// `[MAX_PLAYERS, PLAYER_FEATURES]`, row = engine player index
    pub players: Array2<f32>,
    pub player_mask: Array1<f32>,
}

impl ObservationTensors {
    /// All-zero bundle for a `height × width` map
    pub fn zeros(height: usize, width: usize) -> Self {
        Self {
            global: Array1::zeros(GLOBAL_FEATURES),
            map: Array3::zeros((MAP_CHANNELS, height, width)),
            units: Array2::zeros((MAX_UNITS, UNIT_FEATURES)),
            unit_mask: Array1::zeros(MAX_UNITS),
            cities: Array2::zeros((MAX_CITIES, CITY_FEATURES)),
            city_mask: Array1::zeros(MAX_CITIES),
            players: Array2::zeros((MAX_PLAYERS, PLAYER_FEATURES)),
            player_mask: Array1::zeros(MAX_PLAYERS),
        }
    }
}

/// Converts an observation snapshot into fixed-shape tensors.
pub trait FeatureExtractor: Clone {
    /// `(height, width)` of the map grid this extractor emits
    fn map_shape(&self) -> (usize, usize);

    /// Encode `obs` using this turn's slot tables.
    ///
    /// Requirements:
    /// - Deterministic given (obs, slots).
    /// - Output shapes depend only on `map_shape()`.
    /// - No side effects or internal randomness.
    fn encode(&self, obs: &Observation, slots: &SlotTables) -> ObservationTensors;
}

/// Basic feature extractor implementation
///
/// Tiles outside the configured grid are dropped; a smaller engine map leaves
/// the remainder of the grid zero (never explored).
#[derive(Clone, Debug)]
pub struct BasicFeatureExtractor {
    map_width: usize,
    map_height: usize,
}

impl BasicFeatureExtractor {
    pub fn new(map_width: u32, map_height: u32) -> Self {
        Self {
            map_width: map_width as usize,
            map_height: map_height as usize,
        }
    }

    fn encode_global(obs: &Observation, out: &mut Array1<f32>) {
        let winner = match (obs.game_over, obs.winner) {
            (true, Some(w)) => w as f32,
            _ => -1.0,
        };
        let values = [
            obs.turn as f32,
            obs.controlled_player as f32,
            obs.players.len() as f32,
            obs.map_width as f32,
            obs.map_height as f32,
            if obs.game_over { 1.0 } else { 0.0 },
            obs.year as f32,
            obs.phase as f32,
            obs.current_player as f32,
            winner,
        ];
        write_row(out.view_mut(), values);
    }

    fn encode_map(&self, obs: &Observation, map: &mut Array3<u8>) {
        if obs.map_width == 0 {
            return;
        }
        let me = obs.controlled_player;
        for (i, tile) in obs.tiles.iter().enumerate() {
            let x = i % obs.map_width as usize;
            let y = i / obs.map_width as usize;
            if x >= self.map_width || y >= self.map_height {
                continue;
            }

            if tile.visible {
                map[[CH_VISIBILITY, y, x]] = VISIBLE;
            } else if tile.explored {
                map[[CH_VISIBILITY, y, x]] = EXPLORED;
            }

            // never-explored tiles carry nothing beyond channel 0
            if !tile.explored {
                continue;
            }
            map[[CH_TERRAIN, y, x]] = tile.terrain;
            for (extra, channel) in [
                (EXTRA_ROAD, CH_ROAD),
                (EXTRA_IRRIGATION, CH_IRRIGATION),
                (EXTRA_MINE, CH_MINE),
            ] {
                if tile.extras & extra != 0 {
                    map[[channel, y, x]] = PRESENT;
                }
            }
            match tile.owner {
                Some(owner) if owner == me => map[[CH_OWNED_SELF, y, x]] = PRESENT,
                Some(_) => map[[CH_OWNED_ENEMY, y, x]] = PRESENT,
                None => {}
            }
            if tile.has_city {
                map[[CH_CITY, y, x]] = PRESENT;
            }
            if tile.has_unit {
                map[[CH_UNIT, y, x]] = PRESENT;
            }
        }
    }

    fn encode_units(obs: &Observation, slots: &SlotTables, out: &mut ObservationTensors) {
        let (w, h) = dims(obs);
        for u in &obs.units {
            let Some(slot) = slots.units.slot_of(u.id).filter(|&s| s < MAX_UNITS) else {
                continue;
            };
            let (x, y) = obs.tile_coords(u.tile);
            let hp = if u.max_hp > 0 {
                u.hp as f32 / u.max_hp as f32
            } else {
                0.0
            };
            write_row(
                out.units.row_mut(slot),
                [
                    x as f32 / w,
                    y as f32 / h,
                    hp,
                    u.moves_left as f32 / 10.0,
                    u.veteran_level as f32,
                    u.type_id as f32,
                    owner_relative(u.owner, obs.controlled_player),
                    if u.fortified { 1.0 } else { 0.0 },
                    // activity: not reported by the engine
                    0.0,
                    u.id as f32,
                ],
            );
            out.unit_mask[slot] = 1.0;
        }
    }

    fn encode_cities(obs: &Observation, slots: &SlotTables, out: &mut ObservationTensors) {
        let (w, h) = dims(obs);
        for c in &obs.cities {
            let Some(slot) = slots.cities.slot_of(c.id).filter(|&s| s < MAX_CITIES) else {
                continue;
            };
            let (x, y) = obs.tile_coords(c.tile);
            let (producing, is_unit) = match c.production {
                Some(p) => (p.id() as f32, if p.is_unit() { 1.0 } else { 0.0 }),
                None => (-1.0, 0.0),
            };
            write_row(
                out.cities.row_mut(slot),
                [
                    x as f32 / w,
                    y as f32 / h,
                    c.size as f32 / 30.0,
                    c.food_stock as f32 / 100.0,
                    c.shield_stock as f32 / 100.0,
                    producing,
                    is_unit,
                    c.turns_to_complete as f32 / 50.0,
                    owner_relative(c.owner, obs.controlled_player),
                    c.id as f32,
                ],
            );
            out.city_mask[slot] = 1.0;
        }
    }

    fn encode_players(obs: &Observation, out: &mut ObservationTensors) {
        for p in &obs.players {
            let row = p.index as usize;
            if row >= MAX_PLAYERS {
                continue;
            }
            let alive = if p.is_alive { 1.0 } else { 0.0 };
            write_row(
                out.players.row_mut(row),
                [
                    p.gold as f32 / 1000.0,
                    p.tax_rate as f32 / 100.0,
                    p.science_rate as f32 / 100.0,
                    p.luxury_rate as f32 / 100.0,
                    p.research_bulbs as f32 / 100.0,
                    p.num_cities as f32 / 20.0,
                    p.num_units as f32 / 50.0,
                    p.score as f32 / 1000.0,
                    alive,
                    if p.is_ai { 1.0 } else { 0.0 },
                    p.researching.map_or(-1.0, |t| t as f32),
                    p.index as f32,
                ],
            );
            out.player_mask[row] = alive;
        }
    }
}

impl FeatureExtractor for BasicFeatureExtractor {
    fn map_shape(&self) -> (usize, usize) {
        (self.map_height, self.map_width)
    }

    fn encode(&self, obs: &Observation, slots: &SlotTables) -> ObservationTensors {
        let mut out = ObservationTensors::zeros(self.map_height, self.map_width);
        Self::encode_global(obs, &mut out.global);
        self.encode_map(obs, &mut out.map);
        Self::encode_units(obs, slots, &mut out);
        Self::encode_cities(obs, slots, &mut out);
        Self::encode_players(obs, &mut out);
        out
    }
}

fn dims(obs: &Observation) -> (f32, f32) {
    (obs.map_width.max(1) as f32, obs.map_height.max(1) as f32)
}

/// 0 for the controlled player, 1 otherwise
fn owner_relative(owner: u8, controlled: u8) -> f32 {
    if owner == controlled {
        0.0
    } else {
        1.0
    }
}

fn write_row<const N: usize>(mut dst: ArrayViewMut1<f32>, values: [f32; N]) {
    debug_assert_eq!(dst.len(), N);
    for (cell, value) in dst.iter_mut().zip(values) {
        *cell = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use civgym_engine::{CityObs, PlayerObs, Production, TileObs, UnitObs};

    fn player(index: u8, alive: bool) -> PlayerObs {
        PlayerObs {
            index,
            is_alive: alive,
            is_ai: index != 0,
            gold: 500,
            tax_rate: 40,
            science_rate: 60,
            luxury_rate: 0,
            researching: None,
            research_bulbs: 25,
            num_cities: 2,
            num_units: 5,
            score: 100,
        }
    }

    /// 4×3 map, top-left visible, next tile explored, rest unknown
    fn snapshot() -> Observation {
        let mut tiles = vec![
            TileObs {
                terrain: 3,
                ..Default::default()
            };
            12
        ];
        tiles[0] = TileObs {
            terrain: 2,
            owner: Some(0),
            has_city: true,
            has_unit: true,
            visible: true,
            explored: true,
            extras: EXTRA_ROAD | EXTRA_MINE,
        };
        tiles[1] = TileObs {
            terrain: 1,
            owner: Some(1),
            visible: false,
            explored: true,
            extras: EXTRA_IRRIGATION,
            ..Default::default()
        };
        Observation {
            map_width: 4,
            map_height: 3,
            turn: 7,
            year: -3700,
            controlled_player: 0,
            tiles,
            units: vec![
                UnitObs {
                    id: 120,
                    type_id: 2,
                    owner: 0,
                    tile: 5,
                    hp: 5,
                    max_hp: 10,
                    moves_left: 3,
                    veteran_level: 1,
                    fortified: true,
                },
                UnitObs {
                    id: 110,
                    type_id: 0,
                    owner: 0,
                    tile: 0,
                    hp: 20,
                    max_hp: 0,
                    moves_left: 0,
                    veteran_level: 0,
                    fortified: false,
                },
                UnitObs {
                    id: 130,
                    type_id: 2,
                    owner: 1,
                    tile: 1,
                    hp: 10,
                    max_hp: 10,
                    moves_left: 3,
                    veteran_level: 0,
                    fortified: false,
                },
            ],
            cities: vec![CityObs {
                id: 140,
                owner: 0,
                tile: 0,
                size: 3,
                food_stock: 12,
                shield_stock: 8,
                production: Some(Production::Building(2)),
                turns_to_complete: 10,
            }],
            players: vec![player(0, true), player(1, false)],
            ..Default::default()
        }
    }

    fn encode(obs: &Observation) -> ObservationTensors {
        let mut slots = SlotTables::default();
        slots.rebuild(obs);
        BasicFeatureExtractor::new(4, 3).encode(obs, &slots)
    }

    #[test]
    fn test_shapes_are_fixed() {
        let t = encode(&snapshot());
        assert_eq!(t.global.len(), GLOBAL_FEATURES);
        assert_eq!(t.map.shape(), &[MAP_CHANNELS, 3, 4]);
        assert_eq!(t.units.shape(), &[MAX_UNITS, UNIT_FEATURES]);
        assert_eq!(t.cities.shape(), &[MAX_CITIES, CITY_FEATURES]);
        assert_eq!(t.players.shape(), &[MAX_PLAYERS, PLAYER_FEATURES]);

        let empty = encode(&Observation::default());
        assert_eq!(empty.map.shape(), t.map.shape());
        assert_eq!(empty.unit_mask.sum(), 0.0);
    }

    #[test]
    fn test_global_features() {
        let mut obs = snapshot();
        let t = encode(&obs);
        assert_eq!(
            t.global.to_vec(),
            vec![7.0, 0.0, 2.0, 4.0, 3.0, 0.0, -3700.0, 0.0, 0.0, -1.0]
        );

        // winner only reported once the game is over
        obs.winner = Some(1);
        assert_eq!(encode(&obs).global[9], -1.0);
        obs.game_over = true;
        let t = encode(&obs);
        assert_eq!(t.global[5], 1.0);
        assert_eq!(t.global[9], 1.0);
    }

    #[test]
    fn test_map_channels() {
        let t = encode(&snapshot());
        let m = &t.map;
        assert_eq!(m[[CH_VISIBILITY, 0, 0]], VISIBLE);
        assert_eq!(m[[CH_VISIBILITY, 0, 1]], EXPLORED);
        assert_eq!(m[[CH_TERRAIN, 0, 0]], 2);
        assert_eq!(m[[CH_ROAD, 0, 0]], 255);
        assert_eq!(m[[CH_IRRIGATION, 0, 0]], 0);
        assert_eq!(m[[CH_MINE, 0, 0]], 255);
        assert_eq!(m[[CH_OWNED_SELF, 0, 0]], 255);
        assert_eq!(m[[CH_CITY, 0, 0]], 255);
        assert_eq!(m[[CH_UNIT, 0, 0]], 255);
        assert_eq!(m[[CH_IRRIGATION, 0, 1]], 255);
        assert_eq!(m[[CH_OWNED_ENEMY, 0, 1]], 255);
        assert_eq!(m[[CH_OWNED_SELF, 0, 1]], 0);
    }

    #[test]
    fn test_unexplored_tiles_do_not_leak() {
        let t = encode(&snapshot());
        for y in 0..3 {
            for x in 0..4 {
                let vis = t.map[[CH_VISIBILITY, y, x]];
                assert!([0, EXPLORED, VISIBLE].contains(&vis));
                if vis == 0 {
                    // raw terrain is 3 here, but must not show through
                    for ch in 1..MAP_CHANNELS {
                        assert_eq!(t.map[[ch, y, x]], 0);
                    }
                }
            }
        }
    }

    #[test]
    fn test_unit_rows_by_slot() {
        let t = encode(&snapshot());
        // own ids 110, 120 → slots 0, 1; enemy 130 unslotted
        assert_eq!(t.unit_mask.sum(), 2.0);
        assert_eq!(t.unit_mask[2], 0.0);

        let settlers = t.units.row(0);
        assert_eq!(settlers[2], 0.0); // max_hp 0
        assert_eq!(settlers[9], 110.0);

        let warriors = t.units.row(1).to_vec();
        assert_eq!(
            warriors,
            vec![0.25, 1.0 / 3.0, 0.5, 0.3, 1.0, 2.0, 0.0, 1.0, 0.0, 120.0]
        );
        assert!(t.units.row(2).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_city_rows_by_slot() {
        let t = encode(&snapshot());
        assert_eq!(t.city_mask.sum(), 1.0);
        assert_eq!(
            t.cities.row(0).to_vec(),
            vec![0.0, 0.0, 0.1, 0.12, 0.08, 2.0, 0.0, 0.2, 0.0, 140.0]
        );
    }

    #[test]
    fn test_player_rows_by_index() {
        let t = encode(&snapshot());
        assert_eq!(t.player_mask.to_vec()[..2], [1.0, 0.0]);
        assert_eq!(
            t.players.row(0).to_vec(),
            vec![0.5, 0.4, 0.6, 0.0, 0.25, 0.1, 0.1, 0.1, 1.0, 0.0, -1.0, 0.0]
        );
        assert_eq!(t.players[[1, 8]], 0.0);
        assert_eq!(t.players[[1, 9]], 1.0);
        assert_eq!(t.players[[1, 11]], 1.0);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let obs = snapshot();
        assert_eq!(encode(&obs), encode(&obs));
    }

    #[test]
    fn test_tiles_outside_grid_dropped() {
        let obs = snapshot();
        let mut slots = SlotTables::default();
        slots.rebuild(&obs);
        let t = BasicFeatureExtractor::new(1, 1).encode(&obs, &slots);
        assert_eq!(t.map.shape(), &[MAP_CHANNELS, 1, 1]);
        assert_eq!(t.map[[CH_VISIBILITY, 0, 0]], VISIBLE);
    }
}
