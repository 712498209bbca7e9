//! RL Environment trait and CivEnv implementation

use civgym_engine::{Command, EngineError, EngineFacade, GameLease, Observation, SimEngine};
use rand::Rng;
use tracing::{debug, info, warn};

use super::{
    step_reward, ActionDecoder, ActionId, Agent, AgentInput, BasicFeatureExtractor, ConfigError,
    EnvConfig, EnvError, EnvStep, FeatureExtractor, LegalActionList, ObservationTensors, Reward,
    SlotTables, StepInfo,
};

/// Generic environment interface for RL
pub trait Environment {
    /// Type used to represent observations
    type ObservationType;

    /// Type used to represent actions
    type ActionType;

    /// Type used to represent rewards
    type RewardType;

    /// Start a fresh episode (new game).
    ///
    /// Returns the first EnvStep, representing the initial state prior
    /// to any actions.
    fn reset(
        &mut self,
        seed: Option<u64>,
    ) -> Result<EnvStep<Self::ObservationType, Self::RewardType>, EnvError>;

    /// Apply one action for the controlled player and return the resulting
    /// EnvStep.
    fn step(
        &mut self,
        action: Self::ActionType,
    ) -> Result<EnvStep<Self::ObservationType, Self::RewardType>, EnvError>;

    /// End the running game and release its resources.
    fn close(&mut self);
}

/// Freeciv-style 4X environment over an engine facade.
///
/// Holds the engine's `GameLease` from the first successful reset until
/// `close()` or drop, so only one environment per lock can be live.
pub struct CivEnv<E: EngineFacade, F: FeatureExtractor> {
    engine: E,
    config: EnvConfig,
    features: F,
    slots: SlotTables,
    legal: LegalActionList,
    lease: Option<GameLease>,
    last_observation: Option<Observation>,
    started: bool,
    done: bool,
}

impl CivEnv<SimEngine, BasicFeatureExtractor> {
    /// Environment over the in-process reference engine
    pub fn simulated(config: EnvConfig) -> Result<Self, ConfigError> {
        let features = BasicFeatureExtractor::new(config.map_width, config.map_height);
        Self::new(SimEngine::new(), config, features)
    }
}

impl<E: EngineFacade, F: FeatureExtractor> CivEnv<E, F> {
    /// Create a new environment.
    ///
    /// No game exists until reset() is called.
    pub fn new(engine: E, config: EnvConfig, features: F) -> Result<Self, ConfigError> {
        config.validate()?;
        let legal = LegalActionList::with_capacity(config.max_legal_actions);
        Ok(Self {
            engine,
            config,
            features,
            slots: SlotTables::default(),
            legal,
            lease: None,
            last_observation: None,
            started: false,
            done: true,
        })
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Direct engine access, e.g. for scenario editing between steps.
    ///
    /// Slot tables and the legal-action list are refreshed on the next step.
    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn slots(&self) -> &SlotTables {
        &self.slots
    }

    pub fn legal_actions(&self) -> &LegalActionList {
        &self.legal
    }

    /// Latest engine snapshot, if an episode has started
    pub fn last_observation(&self) -> Option<&Observation> {
        self.last_observation.as_ref()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Decode an index against the current turn's tables without submitting it.
    pub fn decode_action(&self, action: ActionId) -> Command {
        ActionDecoder::decode(action, &self.legal, &self.slots)
    }

    /// Mark the episode dead and surface an engine failure.
    fn fail(&mut self, err: EngineError) -> EnvError {
        warn!(%err, "engine failure, episode terminated");
        self.done = true;
        EnvError::Engine(err)
    }

    /// Query the engine and rebuild slots, legal actions and tensors.
    fn refresh(&mut self, terminated: bool) -> Result<ObservationTensors, EnvError> {
        let obs = self.engine.observation().map_err(|e| self.fail(e))?;
        self.slots.rebuild(&obs);

        self.legal = if terminated || obs.game_over {
            LegalActionList::with_capacity(self.config.max_legal_actions)
        } else {
            let valid = self.engine.valid_actions().map_err(|e| self.fail(e))?;
            LegalActionList::enumerate(&valid, &self.slots, self.config.max_legal_actions)
        };

        let tensors = self.features.encode(&obs, &self.slots);
        self.last_observation = Some(obs);
        Ok(tensors)
    }

    fn step_info(&self, command: Option<Command>, engine_info: String) -> StepInfo {
        StepInfo {
            turn: self.last_observation.as_ref().map_or(0, |o| o.turn),
            action_mask: self.legal.mask(),
            legal_actions: self.legal.to_array(),
            num_legal_actions: self.legal.len(),
            command,
            engine_info,
        }
    }
}

impl<E: EngineFacade, F: FeatureExtractor> Environment for CivEnv<E, F> {
    type ObservationType = ObservationTensors;
    type ActionType = ActionId;
    type RewardType = Reward;

    fn reset(&mut self, seed: Option<u64>) -> Result<EnvStep, EnvError> {
        // 1. Claim the engine (re-resets keep the lease we already hold)
        if self.lease.is_none() {
            self.lease = Some(self.engine.lock().try_acquire()?);
        }

        // 2. Fresh game
        let game_config = self.config.game_config(seed);
        if let Err(err) = self.engine.new_game(&game_config) {
            self.lease = None;
            self.started = false;
            return Err(self.fail(err));
        }
        self.started = true;
        self.done = false;

        // 3. Slots, legal actions, tensors
        let observation = self.refresh(false)?;

        if let Some(obs) = &self.last_observation {
            info!(
                seed = game_config.seed,
                map_width = obs.map_width,
                map_height = obs.map_height,
                units = self.slots.units.len(),
                cities = self.slots.cities.len(),
                num_legal_actions = self.legal.len(),
                "episode reset"
            );
        }

        Ok(EnvStep {
            observation,
            reward: 0.0,
            terminated: false,
            truncated: false,
            info: self.step_info(None, String::new()),
        })
    }

    fn step(&mut self, action: ActionId) -> Result<EnvStep, EnvError> {
        // 1. Episode must be live
        if !self.started {
            return Err(EnvError::NotStarted);
        }
        if self.done {
            return Err(EnvError::EpisodeDone);
        }

        // 2. Decode against this turn's tables and submit
        let command = self.decode_action(action);
        let outcome = self.engine.submit(&command).map_err(|e| self.fail(e))?;

        // 3. New turn-local state
        let observation = self.refresh(outcome.done)?;
        let (turn, game_over) = self
            .last_observation
            .as_ref()
            .map_or((0, false), |o| (o.turn, o.game_over));

        // 4. Reward and episode flags
        let terminated = outcome.done || game_over;
        let truncated = outcome.truncated;
        let reward = match &self.last_observation {
            Some(obs) => step_reward(self.config.reward_scheme, outcome.reward, obs),
            None => outcome.reward,
        };
        self.done = terminated || truncated;

        debug!(
            turn,
            action,
            ?command,
            reward,
            terminated,
            num_legal_actions = self.legal.len(),
            "step"
        );

        Ok(EnvStep {
            observation,
            reward,
            terminated,
            truncated,
            info: self.step_info(Some(command), outcome.info),
        })
    }

    fn close(&mut self) {
        if self.started {
            self.engine.end_game();
        }
        self.lease = None;
        self.started = false;
        self.done = true;
    }
}

impl<E: EngineFacade, F: FeatureExtractor> Drop for CivEnv<E, F> {
    fn drop(&mut self) {
        if self.lease.is_some() {
            self.close();
        }
    }
}

/// Outcome of one rolled-out episode
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EpisodeSummary {
    pub steps: usize,
    pub total_reward: Reward,
    pub final_turn: u32,
    pub terminated: bool,
    /// Engine truncation or the step limit was hit
    pub truncated: bool,
}

/// Roll out one episode with `agent`, stopping after `max_steps` steps.
pub fn run_episode<E: EngineFacade, F: FeatureExtractor, A: Agent>(
    env: &mut CivEnv<E, F>,
    agent: &mut A,
    seed: Option<u64>,
    max_steps: usize,
    rng: &mut impl Rng,
) -> Result<EpisodeSummary, EnvError> {
    // 1. Reset environment
    let mut step = env.reset(seed)?;
    let mut summary = EpisodeSummary {
        final_turn: step.info.turn,
        ..Default::default()
    };

    // 2. Play until the episode ends or the budget runs out
    while !step.is_done() {
        if summary.steps >= max_steps {
            summary.truncated = true;
            break;
        }
        let input = AgentInput {
            observation: &step.observation,
            action_mask: &step.info.action_mask,
            num_legal_actions: step.info.num_legal_actions,
        };
        let action = agent.select_action(&input, rng);
        step = env.step(action)?;

        summary.steps += 1;
        summary.total_reward += step.reward;
        summary.final_turn = step.info.turn;
        summary.terminated = step.terminated;
        summary.truncated |= step.truncated;
    }

    debug!(?summary, "episode finished");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RandomAgent, RewardScheme};
    use civgym_engine::{ActionType, GameConfig, GameLock, StepOutcome, ValidActions, UNIT_SETTLERS};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn config() -> EnvConfig {
        EnvConfig {
            map_width: 16,
            map_height: 12,
            end_turn: 8,
            ..Default::default()
        }
    }

    fn env() -> CivEnv<SimEngine, BasicFeatureExtractor> {
        CivEnv::simulated(config()).unwrap()
    }

    // =========================================================================
    // Scenarios
    // =========================================================================

    #[test]
    fn test_fresh_game() {
        let mut env = env();
        let step = env.reset(Some(42)).unwrap();

        let obs = env.last_observation().unwrap();
        let own_units = obs.units.iter().filter(|u| u.owner == obs.controlled_player).count();
        assert_eq!(step.observation.unit_mask.sum(), own_units as f32);
        assert_eq!(own_units, 2);

        assert!(step.info.num_legal_actions >= 1);
        assert_eq!(step.info.action_mask[0], 1.0);
        assert_eq!(step.info.legal_actions.row(0).to_vec(), vec![11, 0, 0, 0]);
        assert_eq!(step.info.action_mask.sum(), step.info.num_legal_actions as f32);
        assert_eq!(step.info.action_mask.len(), 1024);
        assert_eq!(step.reward, 0.0);
        assert!(!step.is_done());
        assert_eq!(step.info.turn, 1);
    }

    #[test]
    fn test_repeated_end_turn_advances_one_turn_each() {
        let mut env = env();
        let mut prev = env.reset(Some(7)).unwrap().info.turn;

        let mut steps = 0;
        loop {
            assert_eq!(env.decode_action(0).action_type, ActionType::EndTurn);
            let step = env.step(0).unwrap();
            assert_eq!(step.info.turn, prev + 1);
            assert_eq!(step.observation.global[0], step.info.turn as f32);
            prev = step.info.turn;
            steps += 1;
            if step.terminated {
                assert_eq!(step.info.num_legal_actions, 0);
                break;
            }
            assert!(steps < 100, "game never ended");
        }
        assert_eq!(prev, 8);
        assert_eq!(env.step(0).unwrap_err(), EnvError::EpisodeDone);
    }

    #[test]
    fn test_capacity_below_legal_count_truncates() {
        let mut env = CivEnv::simulated(EnvConfig {
            max_legal_actions: 3,
            ..config()
        })
        .unwrap();
        let step = env.reset(Some(42)).unwrap();
        assert_eq!(step.info.num_legal_actions, 3);
        assert_eq!(step.info.action_mask.len(), 3);
        assert_eq!(step.info.legal_actions.shape(), &[3, 4]);
        assert!(env.legal_actions().dropped() > 0);
    }

    #[test]
    fn test_dead_unit_leaves_no_stale_slot() {
        let mut env = env();
        env.reset(Some(42)).unwrap();
        let (first, second) = {
            let units = &env.slots().units;
            (units.id_at(0).unwrap(), units.id_at(1).unwrap())
        };

        assert!(env.engine_mut().edit_remove_unit(first).unwrap());
        // out-of-range index: NOOP, just refreshes state
        let step = env.step(u32::MAX).unwrap();
        assert_eq!(step.info.command, Some(Command::noop()));

        let units = &env.slots().units;
        assert_eq!(units.len(), 1);
        assert_eq!(units.slot_of(first), None);
        assert_eq!(units.slot_of(second), Some(0));
        assert_eq!(step.observation.unit_mask.sum(), 1.0);
        assert_eq!(step.observation.units[[0, 9]], second as f32);

        // no legal action references the vacated slot
        assert!(env
            .legal_actions()
            .as_slice()
            .iter()
            .filter(|a| a.action_type.is_unit_action())
            .all(|a| a.actor_slot == 0));
    }

    #[test]
    fn test_every_enumerated_action_round_trips() {
        let mut env = env();
        env.reset(Some(3)).unwrap();
        for (i, action) in env.legal_actions().as_slice().iter().enumerate() {
            let cmd = env.decode_action(i as ActionId);
            assert_eq!(cmd.action_type, action.action_type);
            assert_eq!(cmd.target, action.target);
            assert_eq!(cmd.sub_target, action.sub_target);
            let expected = if action.action_type.is_unit_action() {
                env.slots().units.id_at(action.actor_slot).unwrap()
            } else if action.action_type.is_city_action() {
                env.slots().cities.id_at(action.actor_slot).unwrap()
            } else {
                0
            };
            assert_eq!(cmd.actor_id, expected);
        }
    }

    #[test]
    fn test_build_city_through_env() {
        let mut env = env();
        env.reset(Some(42)).unwrap();
        let settler = env
            .last_observation()
            .unwrap()
            .units
            .iter()
            .find(|u| u.type_id == UNIT_SETTLERS && u.owner == 0)
            .unwrap()
            .id;
        let index = (0..env.legal_actions().len() as ActionId)
            .find(|&i| {
                let cmd = env.decode_action(i);
                cmd.action_type == ActionType::UnitBuildCity && cmd.actor_id == settler
            })
            .unwrap();

        let step = env.step(index).unwrap();
        assert_eq!(step.observation.city_mask.sum(), 1.0);
        assert_eq!(env.slots().cities.len(), 1);
        // city actions now enumerated
        assert!(env
            .legal_actions()
            .as_slice()
            .iter()
            .any(|a| a.action_type == ActionType::CityBuild));
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    #[test]
    fn test_step_before_reset() {
        let mut env = env();
        assert_eq!(env.step(0).unwrap_err(), EnvError::NotStarted);
    }

    #[test]
    fn test_single_active_game_per_lock() {
        let lock = GameLock::new();
        let features = BasicFeatureExtractor::new(16, 12);
        let mut a = CivEnv::new(SimEngine::with_lock(lock.clone()), config(), features.clone())
            .unwrap();
        let mut b = CivEnv::new(SimEngine::with_lock(lock.clone()), config(), features).unwrap();

        a.reset(Some(1)).unwrap();
        // re-reset keeps the lease
        a.reset(Some(2)).unwrap();
        assert_eq!(
            b.reset(Some(1)).unwrap_err(),
            EnvError::Engine(EngineError::AlreadyActive)
        );

        a.close();
        assert!(!lock.is_active());
        b.reset(Some(1)).unwrap();
        drop(b);
        assert!(!lock.is_active());
    }

    #[test]
    fn test_engine_failure_is_fatal() {
        let lock = GameLock::new();
        let config = EnvConfig {
            map_width: 2,
            map_height: 2,
            num_ai_players: 7,
            ..Default::default()
        };
        let mut env = CivEnv::new(
            SimEngine::with_lock(lock.clone()),
            config,
            BasicFeatureExtractor::new(2, 2),
        )
        .unwrap();
        let err = env.reset(Some(1)).unwrap_err();
        assert!(matches!(err, EnvError::Engine(EngineError::InvalidConfig(_))));
        assert!(!lock.is_active());
        assert_eq!(env.step(0).unwrap_err(), EnvError::NotStarted);
    }

    /// Sim engine whose queries can be made to fail on demand.
    struct FlakyEngine {
        inner: SimEngine,
        fail_submit: bool,
        fail_observation: bool,
    }

    impl FlakyEngine {
        fn new() -> Self {
            Self {
                inner: SimEngine::new(),
                fail_submit: false,
                fail_observation: false,
            }
        }
    }

    impl EngineFacade for FlakyEngine {
        fn lock(&self) -> &GameLock {
            self.inner.lock()
        }

        fn new_game(&mut self, config: &GameConfig) -> Result<(), EngineError> {
            self.inner.new_game(config)
        }

        fn observation(&self) -> Result<Observation, EngineError> {
            if self.fail_observation {
                return Err(EngineError::Backend("observation lost".into()));
            }
            self.inner.observation()
        }

        fn valid_actions(&self) -> Result<ValidActions, EngineError> {
            self.inner.valid_actions()
        }

        fn submit(&mut self, command: &Command) -> Result<StepOutcome, EngineError> {
            if self.fail_submit {
                return Err(EngineError::Backend("submit rejected".into()));
            }
            self.inner.submit(command)
        }

        fn end_game(&mut self) {
            self.inner.end_game()
        }
    }

    fn flaky_env() -> CivEnv<FlakyEngine, BasicFeatureExtractor> {
        CivEnv::new(FlakyEngine::new(), config(), BasicFeatureExtractor::new(16, 12)).unwrap()
    }

    #[test]
    fn test_submit_failure_ends_episode() {
        let mut env = flaky_env();
        env.reset(Some(3)).unwrap();
        env.step(0).unwrap();

        env.engine_mut().fail_submit = true;
        let err = env.step(0).unwrap_err();
        assert_eq!(err, EnvError::Engine(EngineError::Backend("submit rejected".into())));
        assert!(env.is_done());
        assert_eq!(env.step(0).unwrap_err(), EnvError::EpisodeDone);

        // a new episode recovers once the engine does
        env.engine_mut().fail_submit = false;
        env.reset(Some(3)).unwrap();
        assert!(!env.is_done());
        assert!(env.step(0).is_ok());
    }

    #[test]
    fn test_observation_failure_ends_episode() {
        let mut env = flaky_env();
        env.reset(Some(4)).unwrap();

        env.engine_mut().fail_observation = true;
        let err = env.step(0).unwrap_err();
        assert!(matches!(err, EnvError::Engine(EngineError::Backend(_))));
        assert!(env.is_done());
        assert_eq!(env.step(0).unwrap_err(), EnvError::EpisodeDone);

        let lock = env.engine().lock().clone();
        assert!(lock.is_active());
        env.close();
        assert!(!lock.is_active());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = CivEnv::simulated(EnvConfig {
            max_legal_actions: 0,
            ..config()
        });
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_same_seed_same_episode_start() {
        let a = env().reset(Some(99)).unwrap();
        let b = env().reset(Some(99)).unwrap();
        assert_eq!(a, b);
    }

    // =========================================================================
    // Rewards and rollouts
    // =========================================================================

    #[test]
    fn test_engine_only_rewards_are_terminal() {
        let mut env = CivEnv::simulated(EnvConfig {
            reward_scheme: RewardScheme::EngineOnly,
            end_turn: 3,
            ..config()
        })
        .unwrap();
        env.reset(Some(5)).unwrap();
        let first = env.step(0).unwrap();
        assert!(!first.terminated);
        assert_eq!(first.reward, 0.0);
        let last = env.step(0).unwrap();
        assert!(last.terminated);
        assert!(last.reward == 1.0 || last.reward == -1.0);
    }

    #[test]
    fn test_run_episode_with_random_agent() {
        let mut env = env();
        let mut agent = RandomAgent::new();
        let mut rng = StdRng::seed_from_u64(42);
        let summary = run_episode(&mut env, &mut agent, Some(11), 2_000, &mut rng).unwrap();

        assert!(summary.steps > 0);
        assert!(summary.steps <= 2_000);
        assert!(summary.terminated || summary.truncated);
        assert!(summary.final_turn >= 1);
    }

    #[test]
    fn test_run_episode_step_limit() {
        let mut env = env();
        let mut agent = RandomAgent::new();
        let mut rng = StdRng::seed_from_u64(42);
        let summary = run_episode(&mut env, &mut agent, Some(11), 0, &mut rng).unwrap();
        assert_eq!(summary.steps, 0);
        assert!(summary.truncated);
        assert!(!summary.terminated);
    }
}
