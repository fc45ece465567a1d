//! 2048 environments for reinforcement learning: the move lookup table, single-game simulators,
//! reward shaping and the batched [`EnvManager`] interface.

pub use core_2048;

pub mod config;
pub mod driver;
pub mod error;
pub mod logic;
pub mod manager;
pub mod moves;
pub mod policy;
pub mod reward;
pub mod simulator;
pub mod table;
pub mod transition;

/// Identifies one game instance within a manager. Doubles as the worker id on the wire.
pub type EnvId = u16;

pub use config::{EnvConfig, SpawnConfig};
pub use error::{EnvError, SimError};
pub use manager::{EnvManager, LocalEnvManager};
pub use moves::{Action, Move, MoveMask, TERMINAL_BIT};
pub use reward::RewardConfig;
pub use simulator::{SimState, Simulator};
pub use table::LookupTable;
pub use transition::{Observation, Transition};
