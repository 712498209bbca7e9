//! civgym engine facade
//!
//! Plain-data model of what a 4X strategy engine exposes each turn (observation,
//! valid actions, step outcome) plus the narrow query/command trait the RL layer
//! consumes. A deterministic in-process simulation (`SimEngine`) implements the
//! trait for tests and benchmarks.

mod lock;
mod sim;

pub use lock::{GameLease, GameLock};
pub use sim::{
    building_name, tech_name, unit_type_name, SimEngine, BUILDING_BARRACKS, BUILDING_GRANARY,
    BUILDING_LIBRARY, BUILDING_MARKETPLACE, NUM_BUILDINGS, NUM_TECHS, NUM_UNIT_TYPES,
    UNIT_HORSEMEN, UNIT_SETTLERS, UNIT_WARRIORS, UNIT_WORKERS,
};

use thiserror::Error;

// =============================================================================
// Section 1: Basic types and constants
// =============================================================================

/// Engine-assigned identifier of a unit or city. Opaque; never reused predictably.
pub type EngineId = u32;

/// Engine player index
pub type PlayerIdx = u8;

/// Row-major tile index: `y * map_width + x`
pub type TileIdx = u32;

pub type UnitTypeId = u16;
pub type BuildingId = u16;
pub type TechId = u16;

/// Upper bound on players in one game
pub const MAX_PLAYERS: usize = 8;

/// Number of movement directions (direction8)
pub const NUM_DIRECTIONS: usize = 8;

/// At most this many attack targets are reported per unit
pub const MAX_ATTACK_TARGETS: usize = 8;

/// (dx, dy) per direction: NW, N, NE, W, E, SW, S, SE
pub const DIRECTION_OFFSETS: [(i32, i32); NUM_DIRECTIONS] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Tile extras bitfield
pub const EXTRA_ROAD: u8 = 0x01;
pub const EXTRA_IRRIGATION: u8 = 0x02;
pub const EXTRA_MINE: u8 = 0x04;

/// Terrain ids
pub const TERRAIN_OCEAN: u8 = 0;
pub const TERRAIN_GRASSLAND: u8 = 1;
pub const TERRAIN_PLAINS: u8 = 2;
pub const TERRAIN_HILLS: u8 = 3;
pub const TERRAIN_FOREST: u8 = 4;
pub const TERRAIN_DESERT: u8 = 5;

/// Step one tile in `dir` on a non-wrapping `width` x `height` map.
///
/// Returns `None` off the map edge, for an unknown direction, or on an
/// empty map.
pub fn step_tile(width: u32, height: u32, tile: TileIdx, dir: usize) -> Option<TileIdx> {
    if width == 0 || height == 0 {
        return None;
    }
    let (dx, dy) = *DIRECTION_OFFSETS.get(dir)?;
    let x = (tile % width) as i64 + dx as i64;
    let y = (tile / width) as i64 + dy as i64;
    if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
        return None;
    }
    Some(y as u32 * width + x as u32)
}

// =============================================================================
// Section 2: Game configuration
// =============================================================================

/// Parameters for starting a new game
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameConfig {
    /// Ruleset name, e.g. "civ2civ3"
    pub ruleset: String,
    pub map_width: u32,
    pub map_height: u32,
    pub num_ai_players: u8,
    /// AI difficulty 0..=10
    pub ai_skill_level: u8,
    /// Random seed (0 means engine-chosen)
    pub seed: u64,
    pub fog_of_war: bool,
    /// The game ends on reaching this turn
    pub end_turn: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            ruleset: "civ2civ3".to_string(),
            map_width: 40,
            map_height: 40,
            num_ai_players: 2,
            ai_skill_level: 3,
            seed: 0,
            fog_of_war: true,
            end_turn: 5000,
        }
    }
}

// =============================================================================
// Section 3: Observation snapshot
// =============================================================================

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TileObs {
    pub terrain: u8,
    pub owner: Option<PlayerIdx>,
    pub has_city: bool,
    pub has_unit: bool,
    /// Currently in sight of the controlled player
    pub visible: bool,
    /// Seen at least once by the controlled player
    pub explored: bool,
    /// Bitmask of EXTRA_* flags
    pub extras: u8,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UnitObs {
    pub id: EngineId,
    pub type_id: UnitTypeId,
    pub owner: PlayerIdx,
    pub tile: TileIdx,
    pub hp: u16,
    pub max_hp: u16,
    /// Movement points remaining, in move fragments
    pub moves_left: u16,
    pub veteran_level: u8,
    pub fortified: bool,
}

/// What a city is currently producing
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Production {
    Unit(UnitTypeId),
    Building(BuildingId),
}

impl Production {
    pub fn id(self) -> u16 {
        match self {
            Production::Unit(id) | Production::Building(id) => id,
        }
    }

    pub fn is_unit(self) -> bool {
        matches!(self, Production::Unit(_))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CityObs {
    pub id: EngineId,
    pub owner: PlayerIdx,
    pub tile: TileIdx,
    pub size: u16,
    pub food_stock: i32,
    pub shield_stock: i32,
    pub production: Option<Production>,
    pub turns_to_complete: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PlayerObs {
    pub index: PlayerIdx,
    pub is_alive: bool,
    pub is_ai: bool,
    pub gold: i32,
    pub tax_rate: u8,
    pub science_rate: u8,
    pub luxury_rate: u8,
    pub researching: Option<TechId>,
    pub research_bulbs: i32,
    pub num_cities: u32,
    pub num_units: u32,
    pub score: i32,
}

/// One turn's full read of the game from the controlled player's perspective
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Observation {
    pub map_width: u32,
    pub map_height: u32,
    pub turn: u32,
    pub year: i32,
    pub phase: u32,
    /// Index of the player whose phase it is
    pub current_player: PlayerIdx,
    /// Index of the player the agent controls
    pub controlled_player: PlayerIdx,
    /// `map_width * map_height` tiles, row-major
    pub tiles: Vec<TileObs>,
    /// Units visible to the controlled player, in engine iteration order
    pub units: Vec<UnitObs>,
    /// Cities known to the controlled player, in engine iteration order
    pub cities: Vec<CityObs>,
    pub players: Vec<PlayerObs>,
    pub game_over: bool,
    pub winner: Option<PlayerIdx>,
}

impl Observation {
    /// (x, y) of a tile index
    pub fn tile_coords(&self, tile: TileIdx) -> (u32, u32) {
        if self.map_width == 0 {
            return (0, 0);
        }
        (tile % self.map_width, tile / self.map_width)
    }

    /// Look up a player by engine index
    pub fn player(&self, index: PlayerIdx) -> Option<&PlayerObs> {
        self.players.iter().find(|p| p.index == index)
    }
}

// =============================================================================
// Section 4: Valid-action summary
// =============================================================================

/// Capabilities of one unit owned by the controlled player
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnitActions {
    pub unit_id: EngineId,
    /// Non-combat move possible in each direction
    pub can_move: [bool; NUM_DIRECTIONS],
    /// Tiles holding attackable enemies, at most MAX_ATTACK_TARGETS
    pub attackable_tiles: Vec<TileIdx>,
    pub can_fortify: bool,
    pub can_build_city: bool,
    pub can_build_road: bool,
    pub can_build_irrigation: bool,
    pub can_build_mine: bool,
    pub can_disband: bool,
}

/// Production options of one city owned by the controlled player
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CityActions {
    pub city_id: EngineId,
    pub buildable_units: Vec<UnitTypeId>,
    pub buildable_buildings: Vec<BuildingId>,
    pub can_buy: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidActions {
    pub unit_actions: Vec<UnitActions>,
    pub city_actions: Vec<CityActions>,
    /// Techs whose prerequisites are known, in engine order
    pub researchable_techs: Vec<TechId>,
    pub can_end_turn: bool,
}

// =============================================================================
// Section 5: Commands and step results
// =============================================================================

/// Action kinds accepted by the engine (order fixed for serialization)
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ActionType {
    UnitMove = 0,
    UnitAttack = 1,
    UnitFortify = 2,
    UnitBuildCity = 3,
    UnitBuildRoad = 4,
    UnitBuildIrrigation = 5,
    UnitBuildMine = 6,
    UnitDisband = 7,
    CityBuild = 8,
    CityBuy = 9,
    ResearchSet = 10,
    EndTurn = 11,
    Noop = 12,
}

pub const NUM_ACTION_TYPES: usize = 13;

impl ActionType {
    /// Convert from u8 index to ActionType
    pub fn from_index(idx: u8) -> Option<ActionType> {
        use ActionType::*;
        Some(match idx {
            0 => UnitMove,
            1 => UnitAttack,
            2 => UnitFortify,
            3 => UnitBuildCity,
            4 => UnitBuildRoad,
            5 => UnitBuildIrrigation,
            6 => UnitBuildMine,
            7 => UnitDisband,
            8 => CityBuild,
            9 => CityBuy,
            10 => ResearchSet,
            11 => EndTurn,
            12 => Noop,
            _ => return None,
        })
    }

    pub fn index(self) -> u8 {
        self as u8
    }

    /// Actor is a unit
    pub fn is_unit_action(self) -> bool {
        (self as u8) <= ActionType::UnitDisband as u8
    }

    /// Actor is a city
    pub fn is_city_action(self) -> bool {
        matches!(self, ActionType::CityBuild | ActionType::CityBuy)
    }
}

impl TryFrom<u8> for ActionType {
    type Error = EngineError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        ActionType::from_index(value).ok_or(EngineError::UnknownActionType(value))
    }
}

/// Production-kind discriminator carried in `sub_target` of CITY_BUILD
pub const PRODUCTION_KIND_UNIT: i32 = 0;
pub const PRODUCTION_KIND_BUILDING: i32 = 1;

/// Engine-level command: one per `submit` call
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Command {
    pub action_type: ActionType,
    /// Unit or city EngineId; 0 for actions without an actor
    pub actor_id: EngineId,
    /// Target tile, item or tech id
    pub target: i32,
    /// Direction or production kind
    pub sub_target: i32,
}

impl Command {
    pub const fn noop() -> Self {
        Command {
            action_type: ActionType::Noop,
            actor_id: 0,
            target: 0,
            sub_target: 0,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.action_type == ActionType::Noop
    }
}

impl Default for Command {
    fn default() -> Self {
        Command::noop()
    }
}

/// Result of submitting one command
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepOutcome {
    pub reward: f32,
    pub done: bool,
    pub truncated: bool,
    pub info: String,
}

// =============================================================================
// Section 6: Facade trait
// =============================================================================

/// Engine-level failures. These are fatal for the episode.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("invalid game configuration: {0}")]
    InvalidConfig(String),
    #[error("no game is running")]
    NoGame,
    #[error("another game is already active in this process")]
    AlreadyActive,
    #[error("unknown action type {0}")]
    UnknownActionType(u8),
    #[error("engine backend failure: {0}")]
    Backend(String),
}

/// Narrow query/command interface to a running game.
///
/// Implementations backed by process-global state must hand out the same
/// `GameLock` from every instance so that only one game is active at a time.
pub trait EngineFacade {
    /// Lock guarding the engine's single live game
    fn lock(&self) -> &GameLock;

    /// Start a new game, discarding any running one
    fn new_game(&mut self, config: &GameConfig) -> Result<(), EngineError>;

    /// Snapshot of the current game
    fn observation(&self) -> Result<Observation, EngineError>;

    /// Currently legal actions of the controlled player
    fn valid_actions(&self) -> Result<ValidActions, EngineError>;

    /// Execute exactly one command
    fn submit(&mut self, command: &Command) -> Result<StepOutcome, EngineError>;

    /// Tear down the running game, if any
    fn end_game(&mut self);
}
