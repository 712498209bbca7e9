//! civgym: fixed-shape RL adapter for a 4X strategy engine
//!
//! Turns a live game with a changing set of units, cities and legal actions
//! into fixed-size observation tensors and a bounded discrete action space.
//!
//! This crate re-exports the engine and rl-env crates for convenience.

pub use civgym_engine::*;
pub use civgym_rl_env as rl_env;
