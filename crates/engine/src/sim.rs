//! Deterministic reference simulation
//!
//! A small seeded 4X game implementing `EngineFacade`: terrain generation, fog
//! of war, units that move/fight/found cities/improve tiles, cities that grow
//! and produce, a tiny tech tree, passive AI opponents and turn-limit or
//! domination game end. Rules are deliberately simple; what matters is that
//! every facade query and command behaves like a real engine would.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::{
    step_tile, ActionType, BuildingId, CityActions, CityObs, Command, EngineError, EngineFacade,
    EngineId, GameConfig, GameLock, Observation, PlayerIdx, PlayerObs, Production, StepOutcome,
    TechId, TileIdx, TileObs, UnitActions, UnitObs, UnitTypeId, ValidActions, EXTRA_IRRIGATION,
    EXTRA_MINE, EXTRA_ROAD, MAX_ATTACK_TARGETS, MAX_PLAYERS, NUM_DIRECTIONS,
    PRODUCTION_KIND_BUILDING, PRODUCTION_KIND_UNIT, TERRAIN_DESERT, TERRAIN_FOREST,
    TERRAIN_GRASSLAND, TERRAIN_HILLS, TERRAIN_OCEAN, TERRAIN_PLAINS,
};

// =============================================================================
// Section 1: Rules tables
// =============================================================================

pub const UNIT_SETTLERS: UnitTypeId = 0;
pub const UNIT_WORKERS: UnitTypeId = 1;
pub const UNIT_WARRIORS: UnitTypeId = 2;
pub const UNIT_HORSEMEN: UnitTypeId = 3;
pub const NUM_UNIT_TYPES: usize = 4;

pub const BUILDING_BARRACKS: BuildingId = 0;
pub const BUILDING_GRANARY: BuildingId = 1;
pub const BUILDING_LIBRARY: BuildingId = 2;
pub const BUILDING_MARKETPLACE: BuildingId = 3;
pub const NUM_BUILDINGS: usize = 4;

pub const NUM_TECHS: usize = 6;

/// Move fragments per whole move
const SINGLE_MOVE: u16 = 3;
const VISION_RADIUS: u32 = 2;
const MIN_CITY_DISTANCE: u32 = 2;
const START_YEAR: i32 = -4000;
const YEAR_STEP: i32 = 50;
const FIRST_TURN: u32 = 1;
const TECH_COST: i32 = 30;
const STARTING_GOLD: i32 = 50;
const MAX_VETERAN: u8 = 3;
const CONTROLLED: PlayerIdx = 0;

struct UnitRules {
    name: &'static str,
    hp: u16,
    moves: u16,
    attack: u32,
    defense: u32,
    cost: i32,
}

const UNIT_RULES: [UnitRules; NUM_UNIT_TYPES] = [
    UnitRules {
        name: "Settlers",
        hp: 20,
        moves: 1,
        attack: 0,
        defense: 1,
        cost: 30,
    },
    UnitRules {
        name: "Workers",
        hp: 10,
        moves: 1,
        attack: 0,
        defense: 1,
        cost: 20,
    },
    UnitRules {
        name: "Warriors",
        hp: 10,
        moves: 1,
        attack: 1,
        defense: 1,
        cost: 10,
    },
    UnitRules {
        name: "Horsemen",
        hp: 10,
        moves: 2,
        attack: 2,
        defense: 1,
        cost: 20,
    },
];

const BUILDING_RULES: [(&str, i32); NUM_BUILDINGS] = [
    ("Barracks", 30),
    ("Granary", 40),
    ("Library", 60),
    ("Marketplace", 60),
];

const TECH_RULES: [(&str, &[TechId]); NUM_TECHS] = [
    ("Alphabet", &[]),
    ("Bronze Working", &[]),
    ("Ceremonial Burial", &[]),
    ("Writing", &[0]),
    ("Currency", &[1]),
    ("Monarchy", &[2, 3]),
];

pub fn unit_type_name(id: UnitTypeId) -> Option<&'static str> {
    UNIT_RULES.get(id as usize).map(|r| r.name)
}

pub fn building_name(id: BuildingId) -> Option<&'static str> {
    BUILDING_RULES.get(id as usize).map(|(name, _)| *name)
}

pub fn tech_name(id: TechId) -> Option<&'static str> {
    TECH_RULES.get(id as usize).map(|(name, _)| *name)
}

fn unit_rules(type_id: UnitTypeId) -> &'static UnitRules {
    &UNIT_RULES[type_id as usize]
}

fn production_cost(production: Production) -> i32 {
    match production {
        Production::Unit(id) => unit_rules(id).cost,
        Production::Building(id) => BUILDING_RULES[id as usize].1,
    }
}

fn buy_cost(remaining: i32) -> i32 {
    2 * remaining + remaining * remaining / 20
}

fn is_worker(type_id: UnitTypeId) -> bool {
    type_id == UNIT_SETTLERS || type_id == UNIT_WORKERS
}

// =============================================================================
// Section 2: Simulation state
// =============================================================================

#[derive(Clone, Debug)]
struct SimUnit {
    id: EngineId,
    type_id: UnitTypeId,
    owner: PlayerIdx,
    tile: TileIdx,
    hp: u16,
    moves_left: u16,
    veteran: u8,
    fortified: bool,
}

#[derive(Clone, Debug)]
struct SimCity {
    id: EngineId,
    owner: PlayerIdx,
    tile: TileIdx,
    size: u16,
    food_stock: i32,
    shield_stock: i32,
    production: Option<Production>,
    buildings: Vec<BuildingId>,
    founded_turn: u32,
    did_buy: bool,
}

impl SimCity {
    fn has_building(&self, id: BuildingId) -> bool {
        self.buildings.contains(&id)
    }

    fn shield_surplus(&self) -> i32 {
        1 + self.size as i32
    }

    fn growth_threshold(&self) -> i32 {
        (self.size as i32 + 1) * 10
    }
}

#[derive(Clone, Debug)]
struct SimPlayer {
    index: PlayerIdx,
    is_ai: bool,
    alive: bool,
    gold: i32,
    tax_rate: u8,
    science_rate: u8,
    luxury_rate: u8,
    researching: Option<TechId>,
    bulbs: i32,
    known_techs: [bool; NUM_TECHS],
}

#[derive(Clone, Debug)]
struct SimGame {
    config: GameConfig,
    rng: StdRng,
    width: u32,
    height: u32,
    terrain: Vec<u8>,
    extras: Vec<u8>,
    visible: Vec<bool>,
    explored: Vec<bool>,
    units: Vec<SimUnit>,
    cities: Vec<SimCity>,
    players: Vec<SimPlayer>,
    turn: u32,
    year: i32,
    next_id: EngineId,
    game_over: bool,
    winner: Option<PlayerIdx>,
}

fn distance(width: u32, a: TileIdx, b: TileIdx) -> u32 {
    let (ax, ay) = (a % width, a / width);
    let (bx, by) = (b % width, b / width);
    ax.abs_diff(bx).max(ay.abs_diff(by))
}

impl SimGame {
    fn new(config: &GameConfig) -> Result<Self, EngineError> {
        let num_players = config.num_ai_players as usize + 1;
        if config.map_width == 0 || config.map_height == 0 {
            return Err(EngineError::InvalidConfig(format!(
                "map size {}x{} must be non-empty",
                config.map_width, config.map_height
            )));
        }
        if num_players > MAX_PLAYERS {
            return Err(EngineError::InvalidConfig(format!(
                "{num_players} players exceeds the maximum of {MAX_PLAYERS}"
            )));
        }
        let num_tiles = config.map_width as usize * config.map_height as usize;
        if num_tiles < num_players {
            return Err(EngineError::InvalidConfig(format!(
                "{num_tiles} tiles cannot hold {num_players} starting positions"
            )));
        }

        let mut rng = if config.seed == 0 {
            StdRng::from_os_rng()
        } else {
            StdRng::seed_from_u64(config.seed)
        };

        let mut terrain: Vec<u8> = (0..num_tiles)
            .map(|_| match rng.random_range(0..100u32) {
                0..=29 => TERRAIN_OCEAN,
                30..=49 => TERRAIN_GRASSLAND,
                50..=69 => TERRAIN_PLAINS,
                70..=79 => TERRAIN_HILLS,
                80..=89 => TERRAIN_FOREST,
                _ => TERRAIN_DESERT,
            })
            .collect();

        // Spread start positions out where the map allows it
        let mut candidates: Vec<TileIdx> = (0..num_tiles as TileIdx).collect();
        candidates.shuffle(&mut rng);
        let mut starts: Vec<TileIdx> = Vec::with_capacity(num_players);
        for &tile in &candidates {
            if starts.len() == num_players {
                break;
            }
            if terrain[tile as usize] != TERRAIN_OCEAN
                && starts.iter().all(|&s| distance(config.map_width, s, tile) >= 3)
            {
                starts.push(tile);
            }
        }
        for &tile in &candidates {
            if starts.len() == num_players {
                break;
            }
            if !starts.contains(&tile) {
                starts.push(tile);
            }
        }

        let mut game = SimGame {
            config: config.clone(),
            rng,
            width: config.map_width,
            height: config.map_height,
            terrain: Vec::new(),
            extras: vec![0; num_tiles],
            visible: vec![false; num_tiles],
            explored: vec![false; num_tiles],
            units: Vec::new(),
            cities: Vec::new(),
            players: Vec::with_capacity(num_players),
            turn: FIRST_TURN,
            year: START_YEAR,
            next_id: 101,
            game_over: false,
            winner: None,
        };

        for (p, &start) in starts.iter().enumerate() {
            terrain[start as usize] = TERRAIN_GRASSLAND;
            let index = p as PlayerIdx;
            game.players.push(SimPlayer {
                index,
                is_ai: index != CONTROLLED,
                alive: true,
                gold: STARTING_GOLD,
                tax_rate: 40,
                science_rate: 60,
                luxury_rate: 0,
                researching: None,
                bulbs: 0,
                known_techs: [false; NUM_TECHS],
            });
            game.spawn_unit(index, UNIT_SETTLERS, start);
            game.spawn_unit(index, UNIT_WARRIORS, start);
        }
        game.terrain = terrain;
        game.settle();
        Ok(game)
    }

    fn alloc_id(&mut self) -> EngineId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn spawn_unit(&mut self, owner: PlayerIdx, type_id: UnitTypeId, tile: TileIdx) -> EngineId {
        let id = self.alloc_id();
        let rules = unit_rules(type_id);
        self.units.push(SimUnit {
            id,
            type_id,
            owner,
            tile,
            hp: rules.hp,
            moves_left: rules.moves * SINGLE_MOVE,
            veteran: 0,
            fortified: false,
        });
        id
    }

    fn tiles_within(&self, center: TileIdx, radius: u32) -> Vec<TileIdx> {
        let (cx, cy) = (center % self.width, center / self.width);
        let x0 = cx.saturating_sub(radius);
        let y0 = cy.saturating_sub(radius);
        let x1 = (cx + radius).min(self.width - 1);
        let y1 = (cy + radius).min(self.height - 1);
        let mut out = Vec::new();
        for y in y0..=y1 {
            for x in x0..=x1 {
                out.push(y * self.width + x);
            }
        }
        out
    }

    fn update_vision(&mut self) {
        if !self.config.fog_of_war {
            self.visible.fill(true);
            self.explored.fill(true);
            return;
        }
        self.visible.fill(false);
        let sources: Vec<TileIdx> = self
            .units
            .iter()
            .filter(|u| u.owner == CONTROLLED)
            .map(|u| u.tile)
            .chain(
                self.cities
                    .iter()
                    .filter(|c| c.owner == CONTROLLED)
                    .map(|c| c.tile),
            )
            .collect();
        for src in sources {
            for t in self.tiles_within(src, VISION_RADIUS) {
                self.visible[t as usize] = true;
                self.explored[t as usize] = true;
            }
        }
    }

    fn tile_owner(&self, tile: TileIdx) -> Option<PlayerIdx> {
        self.cities
            .iter()
            .find(|c| distance(self.width, c.tile, tile) <= 1)
            .map(|c| c.owner)
    }

    fn city_at(&self, tile: TileIdx) -> Option<&SimCity> {
        self.cities.iter().find(|c| c.tile == tile)
    }

    fn has_enemy_unit(&self, tile: TileIdx, me: PlayerIdx) -> bool {
        self.units.iter().any(|u| u.tile == tile && u.owner != me)
    }

    fn has_enemy_city(&self, tile: TileIdx, me: PlayerIdx) -> bool {
        self.city_at(tile).is_some_and(|c| c.owner != me)
    }

    fn unit_pos(&self, id: EngineId, owner: PlayerIdx) -> Option<usize> {
        self.units.iter().position(|u| u.id == id && u.owner == owner)
    }

    fn city_pos(&self, id: EngineId, owner: PlayerIdx) -> Option<usize> {
        self.cities.iter().position(|c| c.id == id && c.owner == owner)
    }

    fn score(&self, player: PlayerIdx) -> i32 {
        let citizens: i32 = self
            .cities
            .iter()
            .filter(|c| c.owner == player)
            .map(|c| c.size as i32)
            .sum();
        let num_cities = self.cities.iter().filter(|c| c.owner == player).count() as i32;
        let techs = self.players[player as usize]
            .known_techs
            .iter()
            .filter(|&&k| k)
            .count() as i32;
        2 * citizens + 5 * num_cities + 2 * techs
    }

    // -------------------------------------------------------------------------
    // Capability checks shared by valid_actions() and submit()
    // -------------------------------------------------------------------------

    fn can_move(&self, unit: &SimUnit, dir: usize) -> Option<TileIdx> {
        if unit.moves_left == 0 {
            return None;
        }
        let dest = step_tile(self.width, self.height, unit.tile, dir)?;
        if self.terrain[dest as usize] == TERRAIN_OCEAN
            || self.has_enemy_unit(dest, unit.owner)
            || self.has_enemy_city(dest, unit.owner)
        {
            return None;
        }
        Some(dest)
    }

    fn attackable_tiles(&self, unit: &SimUnit) -> Vec<TileIdx> {
        if unit.moves_left == 0 || unit_rules(unit.type_id).attack == 0 {
            return Vec::new();
        }
        (0..NUM_DIRECTIONS)
            .filter_map(|d| step_tile(self.width, self.height, unit.tile, d))
            .filter(|&t| self.has_enemy_unit(t, unit.owner))
            .take(MAX_ATTACK_TARGETS)
            .collect()
    }

    fn can_fortify(&self, unit: &SimUnit) -> bool {
        unit_rules(unit.type_id).attack > 0 && !unit.fortified
    }

    fn can_build_city(&self, unit: &SimUnit) -> bool {
        unit.type_id == UNIT_SETTLERS
            && unit.moves_left > 0
            && self.terrain[unit.tile as usize] != TERRAIN_OCEAN
            && self
                .cities
                .iter()
                .all(|c| distance(self.width, c.tile, unit.tile) > MIN_CITY_DISTANCE)
    }

    fn can_build_extra(&self, unit: &SimUnit, extra: u8) -> bool {
        if !is_worker(unit.type_id) {
            return false;
        }
        let tile = unit.tile as usize;
        let extras = self.extras[tile];
        let terrain = self.terrain[tile];
        match extra {
            EXTRA_ROAD => extras & EXTRA_ROAD == 0 && self.city_at(unit.tile).is_none(),
            EXTRA_IRRIGATION => {
                matches!(terrain, TERRAIN_GRASSLAND | TERRAIN_PLAINS | TERRAIN_DESERT)
                    && extras & (EXTRA_IRRIGATION | EXTRA_MINE) == 0
            }
            EXTRA_MINE => terrain == TERRAIN_HILLS && extras & (EXTRA_IRRIGATION | EXTRA_MINE) == 0,
            _ => false,
        }
    }

    fn can_build_unit(&self, city: &SimCity, type_id: UnitTypeId) -> bool {
        (type_id as usize) < NUM_UNIT_TYPES && (type_id != UNIT_SETTLERS || city.size >= 2)
    }

    fn can_build_building(&self, city: &SimCity, id: BuildingId) -> bool {
        (id as usize) < NUM_BUILDINGS && !city.has_building(id)
    }

    fn can_buy(&self, city: &SimCity) -> bool {
        let Some(production) = city.production else {
            return false;
        };
        let remaining = production_cost(production) - city.shield_stock;
        city.founded_turn != self.turn
            && !city.did_buy
            && remaining > 0
            && self.players[city.owner as usize].gold >= buy_cost(remaining)
    }

    fn researchable(&self, player: PlayerIdx) -> Vec<TechId> {
        let known = &self.players[player as usize].known_techs;
        TECH_RULES
            .iter()
            .enumerate()
            .filter(|(t, (_, prereqs))| {
                !known[*t] && prereqs.iter().all(|&p| known[p as usize])
            })
            .map(|(t, _)| t as TechId)
            .collect()
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    fn observation(&self) -> Observation {
        let tiles = (0..self.terrain.len())
            .map(|t| TileObs {
                terrain: self.terrain[t],
                owner: self.tile_owner(t as TileIdx),
                has_city: self.city_at(t as TileIdx).is_some(),
                has_unit: self.visible[t] && self.units.iter().any(|u| u.tile as usize == t),
                visible: self.visible[t],
                explored: self.explored[t],
                extras: self.extras[t],
            })
            .collect();

        let mut units = Vec::new();
        let mut cities = Vec::new();
        for p in &self.players {
            for u in self.units.iter().filter(|u| u.owner == p.index) {
                if u.owner == CONTROLLED || self.visible[u.tile as usize] {
                    units.push(UnitObs {
                        id: u.id,
                        type_id: u.type_id,
                        owner: u.owner,
                        tile: u.tile,
                        hp: u.hp,
                        max_hp: unit_rules(u.type_id).hp,
                        moves_left: u.moves_left,
                        veteran_level: u.veteran,
                        fortified: u.fortified,
                    });
                }
            }
            for c in self.cities.iter().filter(|c| c.owner == p.index) {
                if c.owner == CONTROLLED || self.explored[c.tile as usize] {
                    let turns_to_complete = c.production.map_or(0, |prod| {
                        let remaining = (production_cost(prod) - c.shield_stock).max(0);
                        let surplus = c.shield_surplus();
                        ((remaining + surplus - 1) / surplus) as u32
                    });
                    cities.push(CityObs {
                        id: c.id,
                        owner: c.owner,
                        tile: c.tile,
                        size: c.size,
                        food_stock: c.food_stock,
                        shield_stock: c.shield_stock,
                        production: c.production,
                        turns_to_complete,
                    });
                }
            }
        }

        let players = self
            .players
            .iter()
            .map(|p| PlayerObs {
                index: p.index,
                is_alive: p.alive,
                is_ai: p.is_ai,
                gold: p.gold,
                tax_rate: p.tax_rate,
                science_rate: p.science_rate,
                luxury_rate: p.luxury_rate,
                researching: p.researching,
                research_bulbs: p.bulbs,
                num_cities: self.cities.iter().filter(|c| c.owner == p.index).count() as u32,
                num_units: self.units.iter().filter(|u| u.owner == p.index).count() as u32,
                score: self.score(p.index),
            })
            .collect();

        Observation {
            map_width: self.width,
            map_height: self.height,
            turn: self.turn,
            year: self.year,
            phase: 0,
            current_player: CONTROLLED,
            controlled_player: CONTROLLED,
            tiles,
            units,
            cities,
            players,
            game_over: self.game_over,
            winner: self.winner,
        }
    }

    fn valid_actions(&self) -> ValidActions {
        if self.game_over {
            return ValidActions::default();
        }

        let unit_actions = self
            .units
            .iter()
            .filter(|u| u.owner == CONTROLLED)
            .map(|u| {
                let mut can_move = [false; NUM_DIRECTIONS];
                for (d, slot) in can_move.iter_mut().enumerate() {
                    *slot = self.can_move(u, d).is_some();
                }
                UnitActions {
                    unit_id: u.id,
                    can_move,
                    attackable_tiles: self.attackable_tiles(u),
                    can_fortify: self.can_fortify(u),
                    can_build_city: self.can_build_city(u),
                    can_build_road: self.can_build_extra(u, EXTRA_ROAD),
                    can_build_irrigation: self.can_build_extra(u, EXTRA_IRRIGATION),
                    can_build_mine: self.can_build_extra(u, EXTRA_MINE),
                    can_disband: true,
                }
            })
            .collect();

        let city_actions = self
            .cities
            .iter()
            .filter(|c| c.owner == CONTROLLED)
            .map(|c| CityActions {
                city_id: c.id,
                buildable_units: (0..NUM_UNIT_TYPES as UnitTypeId)
                    .filter(|&t| self.can_build_unit(c, t))
                    .collect(),
                buildable_buildings: (0..NUM_BUILDINGS as BuildingId)
                    .filter(|&b| self.can_build_building(c, b))
                    .collect(),
                can_buy: self.can_buy(c),
            })
            .collect();

        ValidActions {
            unit_actions,
            city_actions,
            researchable_techs: self.researchable(CONTROLLED),
            can_end_turn: true,
        }
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    fn submit(&mut self, cmd: &Command) -> StepOutcome {
        if self.game_over {
            return StepOutcome {
                done: true,
                info: "game over".to_string(),
                ..Default::default()
            };
        }

        let applied = match cmd.action_type {
            ActionType::EndTurn => return self.end_turn(),
            ActionType::Noop => true,
            ty if ty.is_unit_action() => self.apply_unit_command(cmd),
            ty if ty.is_city_action() => self.apply_city_command(cmd),
            ActionType::ResearchSet => {
                let tech = cmd.target;
                let ok = tech >= 0 && self.researchable(CONTROLLED).contains(&(tech as TechId));
                if ok {
                    self.players[CONTROLLED as usize].researching = Some(tech as TechId);
                }
                ok
            }
            _ => false,
        };

        let mut outcome = StepOutcome::default();
        if !applied {
            debug!(?cmd, "command not applicable, ignored");
            outcome.info = format!("ignored {:?}", cmd.action_type);
        }
        self.settle();
        self.finish(outcome)
    }

    fn apply_unit_command(&mut self, cmd: &Command) -> bool {
        let Some(pos) = self.unit_pos(cmd.actor_id, CONTROLLED) else {
            return false;
        };
        let unit = self.units[pos].clone();
        match cmd.action_type {
            ActionType::UnitMove => {
                let Ok(dir) = usize::try_from(cmd.sub_target) else {
                    return false;
                };
                let Some(dest) = self.can_move(&unit, dir) else {
                    return false;
                };
                let u = &mut self.units[pos];
                u.tile = dest;
                u.moves_left = u.moves_left.saturating_sub(SINGLE_MOVE);
                u.fortified = false;
                true
            }
            ActionType::UnitAttack => {
                let Ok(target) = TileIdx::try_from(cmd.target) else {
                    return false;
                };
                if !self.attackable_tiles(&unit).contains(&target) {
                    return false;
                }
                self.resolve_combat(unit.id, target);
                true
            }
            ActionType::UnitFortify => {
                if !self.can_fortify(&unit) {
                    return false;
                }
                self.units[pos].fortified = true;
                true
            }
            ActionType::UnitBuildCity => {
                if !self.can_build_city(&unit) {
                    return false;
                }
                self.found_city(pos);
                true
            }
            ActionType::UnitBuildRoad => self.build_extra(pos, &unit, EXTRA_ROAD),
            ActionType::UnitBuildIrrigation => self.build_extra(pos, &unit, EXTRA_IRRIGATION),
            ActionType::UnitBuildMine => self.build_extra(pos, &unit, EXTRA_MINE),
            ActionType::UnitDisband => {
                self.units.remove(pos);
                true
            }
            _ => false,
        }
    }

    fn apply_city_command(&mut self, cmd: &Command) -> bool {
        let Some(pos) = self.city_pos(cmd.actor_id, CONTROLLED) else {
            return false;
        };
        match cmd.action_type {
            ActionType::CityBuild => {
                let Ok(id) = u16::try_from(cmd.target) else {
                    return false;
                };
                let city = &self.cities[pos];
                let production = match cmd.sub_target {
                    PRODUCTION_KIND_UNIT if self.can_build_unit(city, id) => Production::Unit(id),
                    PRODUCTION_KIND_BUILDING if self.can_build_building(city, id) => {
                        Production::Building(id)
                    }
                    _ => return false,
                };
                self.cities[pos].production = Some(production);
                true
            }
            ActionType::CityBuy => {
                if !self.can_buy(&self.cities[pos]) {
                    return false;
                }
                let Some(production) = self.cities[pos].production else {
                    return false;
                };
                let cost = production_cost(production);
                let price = buy_cost(cost - self.cities[pos].shield_stock);
                let owner = self.cities[pos].owner as usize;
                self.players[owner].gold -= price;
                let city = &mut self.cities[pos];
                city.shield_stock = cost;
                city.did_buy = true;
                true
            }
            _ => false,
        }
    }

    fn build_extra(&mut self, pos: usize, unit: &SimUnit, extra: u8) -> bool {
        if !self.can_build_extra(unit, extra) {
            return false;
        }
        self.extras[unit.tile as usize] |= extra;
        self.units[pos].moves_left = 0;
        true
    }

    fn found_city(&mut self, unit_pos: usize) {
        let settler = self.units.remove(unit_pos);
        let id = self.alloc_id();
        self.cities.push(SimCity {
            id,
            owner: settler.owner,
            tile: settler.tile,
            size: 1,
            food_stock: 0,
            shield_stock: 0,
            production: Some(Production::Unit(UNIT_WARRIORS)),
            buildings: Vec::new(),
            founded_turn: self.turn,
            did_buy: false,
        });
    }

    fn resolve_combat(&mut self, attacker_id: EngineId, target: TileIdx) {
        let Some(a_pos) = self.units.iter().position(|u| u.id == attacker_id) else {
            return;
        };
        let attacker = self.units[a_pos].clone();
        let Some(d_pos) = self
            .units
            .iter()
            .position(|u| u.tile == target && u.owner != attacker.owner)
        else {
            return;
        };
        let defender = self.units[d_pos].clone();

        let attack = unit_rules(attacker.type_id).attack * (10 + 5 * attacker.veteran as u32);
        let mut defense = unit_rules(defender.type_id).defense * (10 + 5 * defender.veteran as u32);
        if defender.fortified {
            defense = defense * 3 / 2;
        }
        let attacker_wins = self.rng.random_range(0..attack + defense) < attack;

        if attacker_wins {
            self.units.retain(|u| u.id != defender.id);
            if let Some(u) = self.units.iter_mut().find(|u| u.id == attacker.id) {
                u.moves_left = 0;
                u.hp = u.hp.saturating_sub(unit_rules(u.type_id).hp / 4).max(1);
                u.veteran = (u.veteran + 1).min(MAX_VETERAN);
            }
        } else {
            self.units.retain(|u| u.id != attacker.id);
            if let Some(u) = self.units.iter_mut().find(|u| u.id == defender.id) {
                u.hp = u.hp.saturating_sub(unit_rules(u.type_id).hp / 4).max(1);
            }
        }
    }

    fn end_turn(&mut self) -> StepOutcome {
        self.run_ai_phase();
        self.process_end_phase();
        self.turn += 1;
        self.year += YEAR_STEP;
        for u in &mut self.units {
            u.moves_left = unit_rules(u.type_id).moves * SINGLE_MOVE;
        }
        self.settle();
        self.finish(StepOutcome::default())
    }

    fn run_ai_phase(&mut self) {
        let ai_units: Vec<EngineId> = self
            .units
            .iter()
            .filter(|u| self.players[u.owner as usize].is_ai)
            .map(|u| u.id)
            .collect();
        for id in ai_units {
            let Some(pos) = self.units.iter().position(|u| u.id == id) else {
                continue;
            };
            let unit = self.units[pos].clone();
            if self.can_build_city(&unit) {
                self.found_city(pos);
            } else if self.can_fortify(&unit) {
                self.units[pos].fortified = true;
            }
        }

        for p in 0..self.players.len() {
            let player = &self.players[p];
            if player.is_ai && player.alive && player.researching.is_none() {
                let next = self.researchable(p as PlayerIdx).first().copied();
                self.players[p].researching = next;
            }
        }
        for c in &mut self.cities {
            if self.players[c.owner as usize].is_ai && c.production.is_none() {
                c.production = Some(Production::Unit(UNIT_WARRIORS));
            }
        }
    }

    fn process_end_phase(&mut self) {
        let mut completed: Vec<(PlayerIdx, UnitTypeId, TileIdx)> = Vec::new();
        for c in &mut self.cities {
            c.food_stock += 2 + c.size as i32 / 2;
            if c.food_stock >= c.growth_threshold() {
                let threshold = c.growth_threshold();
                c.size += 1;
                c.food_stock = if c.has_building(BUILDING_GRANARY) {
                    threshold / 2
                } else {
                    0
                };
            }

            c.shield_stock += c.shield_surplus();
            if let Some(production) = c.production {
                let cost = production_cost(production);
                if c.shield_stock >= cost {
                    match production {
                        Production::Unit(type_id) => {
                            if type_id == UNIT_SETTLERS && c.size < 2 {
                                // wait for the city to grow
                            } else {
                                if type_id == UNIT_SETTLERS {
                                    c.size -= 1;
                                }
                                c.shield_stock -= cost;
                                completed.push((c.owner, type_id, c.tile));
                            }
                        }
                        Production::Building(id) => {
                            c.shield_stock -= cost;
                            c.buildings.push(id);
                            c.production = Some(Production::Unit(UNIT_WARRIORS));
                        }
                    }
                }
            }
            c.did_buy = false;
        }
        for (owner, type_id, tile) in completed {
            let id = self.spawn_unit(owner, type_id, tile);
            if type_id == UNIT_WARRIORS || type_id == UNIT_HORSEMEN {
                let barracks = self
                    .cities
                    .iter()
                    .any(|c| c.tile == tile && c.has_building(BUILDING_BARRACKS));
                if barracks {
                    if let Some(u) = self.units.iter_mut().find(|u| u.id == id) {
                        u.veteran = 1;
                    }
                }
            }
        }

        for p in 0..self.players.len() {
            if !self.players[p].alive {
                continue;
            }
            let owned: Vec<&SimCity> = self
                .cities
                .iter()
                .filter(|c| c.owner as usize == p)
                .collect();
            let trade: i32 = owned.iter().map(|c| c.size as i32 + 1).sum();
            let libraries = owned
                .iter()
                .filter(|c| c.has_building(BUILDING_LIBRARY))
                .count() as i32;
            let markets = owned
                .iter()
                .filter(|c| c.has_building(BUILDING_MARKETPLACE))
                .count() as i32;

            let player = &mut self.players[p];
            player.gold += trade * player.tax_rate as i32 / 100 + markets;
            if let Some(tech) = player.researching {
                player.bulbs += trade * player.science_rate as i32 / 100 + 1 + libraries;
                if player.bulbs >= TECH_COST {
                    player.bulbs -= TECH_COST;
                    player.known_techs[tech as usize] = true;
                    player.researching = None;
                }
            }
        }

        for u in &mut self.units {
            let max_hp = unit_rules(u.type_id).hp;
            if u.fortified || self.cities.iter().any(|c| c.tile == u.tile && c.owner == u.owner) {
                u.hp = (u.hp + (max_hp / 10).max(1)).min(max_hp);
            }
        }
    }

    /// Refresh derived state after any change: liveness, vision, game end.
    fn settle(&mut self) {
        for p in &mut self.players {
            let has_units = self.units.iter().any(|u| u.owner == p.index);
            let has_cities = self.cities.iter().any(|c| c.owner == p.index);
            p.alive = p.alive && (has_units || has_cities);
        }
        self.update_vision();
        if !self.game_over {
            self.check_game_over();
        }
    }

    fn check_game_over(&mut self) {
        let alive: Vec<PlayerIdx> = self
            .players
            .iter()
            .filter(|p| p.alive)
            .map(|p| p.index)
            .collect();

        if alive.is_empty() {
            self.game_over = true;
            self.winner = None;
        } else if self.players.len() > 1 && alive.len() == 1 {
            self.game_over = true;
            self.winner = Some(alive[0]);
        } else if self.turn >= self.config.end_turn {
            let mut best: Option<(PlayerIdx, i32)> = None;
            for &p in &alive {
                let score = self.score(p);
                if best.is_none_or(|(_, s)| score > s) {
                    best = Some((p, score));
                }
            }
            self.game_over = true;
            self.winner = best.map(|(p, _)| p);
        }
    }

    fn finish(&self, mut outcome: StepOutcome) -> StepOutcome {
        if self.game_over {
            outcome.done = true;
            outcome.reward = match self.winner {
                Some(CONTROLLED) => 1.0,
                Some(_) => -1.0,
                None => 0.0,
            };
        }
        outcome
    }
}

// =============================================================================
// Section 3: Facade implementation
// =============================================================================

/// In-process reference engine.
///
/// Each instance owns its game, so by default each gets its own `GameLock`;
/// use `with_lock` to make several instances contend for one lock the way
/// handles onto a process-global engine would.
#[derive(Debug, Default)]
pub struct SimEngine {
    lock: GameLock,
    game: Option<SimGame>,
}

impl SimEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lock(lock: GameLock) -> Self {
        Self { lock, game: None }
    }

    fn game(&self) -> Result<&SimGame, EngineError> {
        self.game.as_ref().ok_or(EngineError::NoGame)
    }

    fn game_mut(&mut self) -> Result<&mut SimGame, EngineError> {
        self.game.as_mut().ok_or(EngineError::NoGame)
    }

    /// Place a unit directly, bypassing production (scenario editing).
    pub fn edit_spawn_unit(
        &mut self,
        owner: PlayerIdx,
        type_id: UnitTypeId,
        tile: TileIdx,
    ) -> Result<EngineId, EngineError> {
        let game = self.game_mut()?;
        if owner as usize >= game.players.len()
            || type_id as usize >= NUM_UNIT_TYPES
            || tile as usize >= game.terrain.len()
        {
            return Err(EngineError::Backend(format!(
                "cannot place unit type {type_id} for player {owner} on tile {tile}"
            )));
        }
        let id = game.spawn_unit(owner, type_id, tile);
        game.settle();
        Ok(id)
    }

    /// Destroy a unit outside the controlled player's command (scenario editing).
    pub fn edit_remove_unit(&mut self, id: EngineId) -> Result<bool, EngineError> {
        let game = self.game_mut()?;
        let before = game.units.len();
        game.units.retain(|u| u.id != id);
        let removed = game.units.len() != before;
        game.settle();
        Ok(removed)
    }
}

impl EngineFacade for SimEngine {
    fn lock(&self) -> &GameLock {
        &self.lock
    }

    fn new_game(&mut self, config: &GameConfig) -> Result<(), EngineError> {
        self.game = None;
        self.game = Some(SimGame::new(config)?);
        Ok(())
    }

    fn observation(&self) -> Result<Observation, EngineError> {
        Ok(self.game()?.observation())
    }

    fn valid_actions(&self) -> Result<ValidActions, EngineError> {
        Ok(self.game()?.valid_actions())
    }

    fn submit(&mut self, command: &Command) -> Result<StepOutcome, EngineError> {
        Ok(self.game_mut()?.submit(command))
    }

    fn end_game(&mut self) {
        self.game = None;
    }
}
