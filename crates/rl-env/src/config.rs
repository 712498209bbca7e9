//! Environment configuration.
//!
//! Every field has a default, so an empty YAML document is a valid config.

use std::path::Path;

use civgym_engine::{GameConfig, MAX_PLAYERS};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// How the per-step reward is derived
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardScheme {
    /// Engine reward when nonzero, otherwise the shaped heuristic.
    #[default]
    EngineOrHeuristic,
    /// Engine reward only (sparse: nonzero at game end).
    EngineOnly,
    /// Shaped heuristic only.
    Heuristic,
}

/// Environment configuration parameters
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct EnvConfig {
    /// Engine ruleset name.
    #[serde(default = "default_ruleset")]
    pub ruleset: String,
    #[serde(default = "default_map_size")]
    pub map_width: u32,
    #[serde(default = "default_map_size")]
    pub map_height: u32,
    #[serde(default = "default_num_ai_players")]
    pub num_ai_players: u8,
    #[serde(default = "default_ai_skill_level")]
    pub ai_skill_level: u8,
    /// Fixed seed for every reset that does not pass one. `None` lets the
    /// engine pick.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_true")]
    pub fog_of_war: bool,
    /// Capacity of the per-turn legal-action list.
    #[serde(default = "default_max_legal_actions")]
    pub max_legal_actions: usize,
    /// Turn at which the engine ends the game on score.
    #[serde(default = "default_end_turn")]
    pub end_turn: u32,
    #[serde(default)]
    pub reward_scheme: RewardScheme,
}

fn default_ruleset() -> String {
    "civ2civ3".to_string()
}

fn default_map_size() -> u32 {
    40
}

fn default_num_ai_players() -> u8 {
    2
}

fn default_ai_skill_level() -> u8 {
    3
}

fn default_true() -> bool {
    true
}

fn default_max_legal_actions() -> usize {
    crate::MAX_LEGAL_ACTIONS
}

fn default_end_turn() -> u32 {
    5000
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            ruleset: default_ruleset(),
            map_width: default_map_size(),
            map_height: default_map_size(),
            num_ai_players: default_num_ai_players(),
            ai_skill_level: default_ai_skill_level(),
            seed: None,
            fog_of_war: true,
            max_legal_actions: default_max_legal_actions(),
            end_turn: default_end_turn(),
            reward_scheme: RewardScheme::default(),
        }
    }
}

impl EnvConfig {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: EnvConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.map_width == 0 || self.map_height == 0 {
            return Err(ConfigError::Invalid(format!(
                "map size {}x{} must be non-empty",
                self.map_width, self.map_height
            )));
        }
        if self.max_legal_actions == 0 {
            return Err(ConfigError::Invalid(
                "max_legal_actions must be at least 1".to_string(),
            ));
        }
        if self.num_ai_players as usize + 1 > MAX_PLAYERS {
            return Err(ConfigError::Invalid(format!(
                "{} AI players plus the agent exceeds {MAX_PLAYERS} players",
                self.num_ai_players
            )));
        }
        Ok(())
    }

    /// Engine-level game parameters for one episode.
    ///
    /// Seed 0 asks the engine for a random seed.
    pub fn game_config(&self, seed: Option<u64>) -> GameConfig {
        GameConfig {
            ruleset: self.ruleset.clone(),
            map_width: self.map_width,
            map_height: self.map_height,
            num_ai_players: self.num_ai_players,
            ai_skill_level: self.ai_skill_level,
            seed: seed.or(self.seed).unwrap_or(0),
            fog_of_war: self.fog_of_war,
            end_turn: self.end_turn,
        }
    }
}
