//! RL adapter for civgym
//!
//! This crate provides:
//! - Slot allocation (EngineId ↔ stable per-turn slot)
//! - Legal-action enumeration (bounded list + validity mask)
//! - Action decoding (ActionId → engine Command)
//! - Feature extraction (Observation → fixed-shape tensors)
//! - Environment trait and CivEnv implementation
//! - Agent trait and RandomAgent

mod action_decoder;
mod agent;
mod config;
mod environment;
mod error;
mod feature_extractor;
mod legal_actions;
mod reward;
mod slots;
mod types;

pub use action_decoder::*;
pub use agent::*;
pub use config::*;
pub use environment::*;
pub use error::*;
pub use feature_extractor::*;
pub use legal_actions::*;
pub use reward::*;
pub use slots::*;
pub use types::*;
