//! Out-of-process 2048 environments: a POSIX shared memory channel between one consumer and a
//! worker process per game instance, and the [`EnvManager`](env_2048::EnvManager) built on it.

pub mod channel;
pub mod config;
pub mod error;
pub mod manager;
pub mod message;
pub mod region;
mod semaphore;
pub mod supervisor;
pub mod worker;

pub use channel::{ActionState, Batch, ConsumerChannel, Received, WorkerChannel};
pub use config::ChannelConfig;
pub use error::ChannelError;
pub use manager::ShmEnvManager;
pub use region::ShmRegion;
pub use supervisor::WorkerPool;
pub use worker::{Worker, WorkerStats};
