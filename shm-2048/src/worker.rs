use std::{sync::Arc, thread, time::Duration};

use env_2048::{
    simulator::instance_rng, Action, EnvConfig, LookupTable, Move, SimError, Simulator,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::{channel::WorkerChannel, error::ChannelError, message::ResultMessage};

/// Counters reported when a worker exits cleanly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub moves: u64,
    pub resets: u64,
    pub rejected: u64,
}

/// Runs one game instance on the worker end of the channel.
pub struct Worker {
    channel: WorkerChannel,
    simulator: Simulator,
    action_timeout: Duration,
    jitter: Option<(Duration, ChaCha8Rng)>,
}

impl Worker {
    pub fn new(
        channel: WorkerChannel,
        env: &EnvConfig,
        table: Arc<LookupTable>,
        action_timeout: Duration,
    ) -> Result<Self, ChannelError> {
        let id = channel.id();
        let simulator = Simulator::new(id, table, instance_rng(id, env.seed), env.spawn, env.reward)?;

        Ok(Self {
            channel,
            simulator,
            action_timeout,
            jitter: None,
        })
    }

    /// Sleeps up to `max` before answering each action, simulating a slow or busy worker.
    pub fn with_jitter(mut self, max: Duration, seed: u64) -> Self {
        self.jitter = Some((max, ChaCha8Rng::seed_from_u64(seed)));
        self
    }

    pub fn id(&self) -> u16 {
        self.channel.id()
    }

    /// Serves actions until the consumer shuts the channel down.
    ///
    /// A worker replacing a dead one resumes from the last published state instead of starting a
    /// new game, so the consumer never sees a gap.
    pub fn run(&mut self) -> Result<WorkerStats, ChannelError> {
        let id = self.id();
        let mut stats = WorkerStats::default();

        let mut seq = match self.channel.last_published()? {
            Some((seq, message)) => {
                info!(id, seq, "resuming from published state");
                self.simulator.restore(message.board);
                seq
            }
            None => {
                self.channel
                    .publish(1, &ResultMessage::from_simulator(&self.simulator, 0.0))?;
                debug!(id, "published initial state");
                1
            }
        };

        loop {
            let action = match self.channel.wait_action(seq, self.action_timeout) {
                Ok(action) => action,
                Err(ChannelError::Shutdown) => {
                    info!(id, ?stats, "shutting down");
                    return Ok(stats);
                }
                Err(err) => return Err(err),
            };

            self.delay();

            let reward = match action {
                Action::Reset => {
                    self.simulator.reset()?;
                    stats.resets += 1;
                    0.0
                }
                Action::Move(mv) => self.apply(mv, &mut stats)?,
            };

            seq += 1;
            self.channel
                .publish(seq, &ResultMessage::from_simulator(&self.simulator, reward))?;
        }
    }

    fn apply(&mut self, mv: Move, stats: &mut WorkerStats) -> Result<f64, ChannelError> {
        let id = self.id();

        match self.simulator.make_move(mv) {
            Ok(reward) => {
                stats.moves += 1;
                Ok(reward)
            }
            Err(SimError::IllegalOperation { .. }) => {
                debug!(id, "move sent to a finished game, starting a new one");
                self.simulator.reset()?;
                stats.resets += 1;
                Ok(0.0)
            }
            Err(err @ SimError::InvalidMove { .. }) => {
                // The consumer keeps waiting for an answer, so report the unchanged state.
                warn!(id, %err, "rejected move");
                stats.rejected += 1;
                Ok(0.0)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn delay(&mut self) {
        if let Some((max, rng)) = &mut self.jitter {
            let nanos = rng.gen_range(0..=max.as_nanos() as u64);
            thread::sleep(Duration::from_nanos(nanos));
        }
    }
}
