//! Reward shaping

use civgym_engine::Observation;

use super::{Reward, RewardScheme};

const ALIVE_BONUS: Reward = 0.001;
const PER_UNIT: Reward = 0.001;
const PER_CITY: Reward = 0.01;
const PER_SCORE_POINT: Reward = 0.0001;
const WIN_BONUS: Reward = 1.0;
const LOSS_PENALTY: Reward = -0.5;
const DEAD_PENALTY: Reward = -1.0;

/// Dense heuristic reward for the controlled player.
///
/// -1 if the player is missing or dead. Otherwise a small bonus for staying
/// alive, units, cities and score; at game end +1 if no living rival has a
/// higher score, else -0.5.
pub fn heuristic_reward(obs: &Observation) -> Reward {
    let Some(me) = obs.player(obs.controlled_player).filter(|p| p.is_alive) else {
        return DEAD_PENALTY;
    };

    let mut reward = ALIVE_BONUS
        + PER_UNIT * me.num_units as Reward
        + PER_CITY * me.num_cities as Reward
        + PER_SCORE_POINT * me.score as Reward;

    if obs.game_over {
        let best_rival = obs
            .players
            .iter()
            .filter(|p| p.is_alive && p.index != me.index)
            .map(|p| p.score)
            .max();
        reward += match best_rival {
            Some(rival) if rival > me.score => LOSS_PENALTY,
            _ => WIN_BONUS,
        };
    }
    reward
}

/// Combine the engine's step reward with the heuristic per `scheme`.
pub fn step_reward(scheme: RewardScheme, engine_reward: Reward, obs: &Observation) -> Reward {
    match scheme {
        RewardScheme::EngineOnly => engine_reward,
        RewardScheme::Heuristic => heuristic_reward(obs),
        RewardScheme::EngineOrHeuristic => {
            if engine_reward != 0.0 {
                engine_reward
            } else {
                heuristic_reward(obs)
            }
        }
    }
}
