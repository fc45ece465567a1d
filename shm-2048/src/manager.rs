use std::time::Instant;

use env_2048::{
    core_2048::unpack_board,
    manager::{route_action, Dispatch},
    Action, EnvError, EnvId, EnvManager, MoveMask, Observation, SimError, Transition,
};
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::{
    channel::{Batch, ConsumerChannel, Received},
    config::ChannelConfig,
    error::ChannelError,
    message::ResultMessage,
};

/// The [`EnvManager`] for instances running in worker processes behind a [`ConsumerChannel`].
#[derive(Debug)]
pub struct ShmEnvManager {
    channel: ConsumerChannel,
    config: ChannelConfig,
    auto_reset: bool,
    /// Latest result per id, the prior state of its next transition.
    latest: Vec<Option<ResultMessage>>,
    last_progress: Instant,
    /// A slot failure seen by a poll that also delivered transitions, reported by the next poll.
    deferred: Option<EnvError>,
}

impl ShmEnvManager {
    pub fn new(channel: ConsumerChannel, config: ChannelConfig, auto_reset: bool) -> Self {
        let slot_count = channel.slot_count();

        Self {
            channel,
            config,
            auto_reset,
            latest: vec![None; slot_count],
            last_progress: Instant::now(),
            deferred: None,
        }
    }

    pub fn channel(&self) -> &ConsumerChannel {
        &self.channel
    }

    /// Waits for the first result of every id and returns them as the starting states.
    pub fn get_initial_states(&mut self) -> Result<FxHashMap<EnvId, Observation>, EnvError> {
        self.check_failed()?;

        let ids: Vec<EnvId> = (0..self.num_envs())
            .map(|index| index as EnvId)
            .filter(|&id| !self.channel.has_reported(id))
            .collect();

        let mut states = self.collect_one_per_id(&ids)?;

        for (id, message) in self.latest.iter().enumerate() {
            if let Some(message) = message {
                states.entry(id as EnvId).or_insert_with(|| observation(message));
            }
        }

        Ok(states)
    }

    /// Shuts the workers down. Also happens when the manager is dropped.
    pub fn shutdown(&self) -> Result<(), EnvError> {
        Ok(self.channel.shutdown()?)
    }

    fn record(&mut self, received: &Received) -> Option<Transition> {
        let message = received.message;
        let slot = &mut self.latest[usize::from(message.id)];
        let prior = slot.replace(message);

        // The very first result of an id is its initial state, not a transition.
        let prior = prior?;
        let action = match received.answers {
            Some(Action::Move(mv)) => Some(mv),
            Some(Action::Reset) | None => None,
        };
        let prior_board = if action.is_some() {
            prior.board
        } else {
            message.board
        };

        Some(Transition {
            id: message.id,
            action,
            prior_state: unpack_board(prior_board),
            next_state: unpack_board(message.board),
            moves: message.moves,
            reward: message.reward,
            terminal: message.terminated,
        })
    }

    /// Records every received result and turns the batch's slot failures into one error.
    fn absorb(&mut self, batch: Batch) -> (Vec<Transition>, Option<EnvError>) {
        if !batch.is_empty() {
            self.last_progress = Instant::now();
        }

        let transitions = batch
            .received
            .iter()
            .filter_map(|received| self.record(received))
            .collect();

        (transitions, failure(batch.failures))
    }

    fn check_failed(&self) -> Result<(), EnvError> {
        let failed = self.channel.failed_ids();

        if failed.is_empty() {
            return Ok(());
        }

        Err(EnvError::Protocol(format!("out of service: {failed:?}")))
    }

    fn check_overdue(&self) -> Result<(), ChannelError> {
        let timeout = self.config.response_timeout();
        let overdue = self.channel.overdue(timeout);

        if overdue.is_empty() {
            return Ok(());
        }

        warn!(?overdue, ?timeout, "workers stopped responding");

        Err(ChannelError::Timeout {
            ids: overdue,
            waited: timeout,
        })
    }

    fn check_timeout(&self, waiting: Vec<EnvId>) -> Result<(), ChannelError> {
        let waited = self.last_progress.elapsed();

        if waited >= self.config.response_timeout() && !waiting.is_empty() {
            warn!(?waiting, ?waited, "workers stopped responding");
            return Err(ChannelError::Timeout {
                ids: waiting,
                waited,
            });
        }

        Ok(())
    }

    /// Blocks until every id in `ids` has produced one new result.
    fn collect_one_per_id(
        &mut self,
        ids: &[EnvId],
    ) -> Result<FxHashMap<EnvId, Observation>, EnvError> {
        let mut states = FxHashMap::default();
        self.last_progress = Instant::now();

        while states.len() < ids.len() {
            let batch = self.channel.poll_batch();

            if batch.is_empty() {
                let missing = ids
                    .iter()
                    .copied()
                    .filter(|id| !states.contains_key(id))
                    .collect();
                self.check_timeout(missing)?;
                self.channel.wait_for_results(self.config.poll_interval())?;
                continue;
            }

            self.last_progress = Instant::now();

            let mut unexpected = None;
            for received in &batch.received {
                let id = received.message.id;
                self.record(received);

                if !ids.contains(&id) {
                    unexpected.get_or_insert_with(|| {
                        format!("id {id} reported while waiting for {ids:?}")
                    });
                } else if states.insert(id, observation(&received.message)).is_some() {
                    unexpected
                        .get_or_insert_with(|| format!("id {id} reported twice for one request"));
                }
            }

            if let Some(err) = failure(batch.failures) {
                return Err(err);
            }

            if let Some(message) = unexpected {
                return Err(EnvError::Protocol(message));
            }
        }

        Ok(states)
    }

    fn check_action(&self, id: EnvId, action: Action) -> Result<Dispatch, EnvError> {
        let latest = self
            .latest
            .get(usize::from(id))
            .ok_or(EnvError::UnknownEnv(id))?;

        if let Some(reason) = self.channel.failure(id) {
            return Err(EnvError::Protocol(format!(
                "id {id} is out of service: {reason}"
            )));
        }

        if !self.channel.is_ready(id) {
            return Err(if self.channel.has_reported(id) {
                EnvError::DuplicateAction(id)
            } else {
                EnvError::Protocol(format!("id {id} has not reported a state yet"))
            });
        }

        let moves = latest
            .as_ref()
            .map_or(MoveMask::TERMINAL, |message| message.moves);
        let dispatch = route_action(moves, action, self.auto_reset);

        if let Dispatch::Apply(mv) = dispatch {
            if !moves.contains(mv) {
                return Err(SimError::InvalidMove { id, mv, moves }.into());
            }
        }

        Ok(dispatch)
    }
}

/// Folds the slot failures of one batch into a single error.
fn failure(failures: Vec<(EnvId, ChannelError)>) -> Option<EnvError> {
    match failures.len() {
        0 => None,
        1 => failures.into_iter().next().map(|(_, err)| err.into()),
        _ => Some(EnvError::Protocol(
            failures
                .iter()
                .map(|(_, err)| err.to_string())
                .collect::<Vec<_>>()
                .join("; "),
        )),
    }
}

fn observation(message: &ResultMessage) -> Observation {
    Observation {
        id: message.id,
        board: message.board,
        moves: message.moves,
    }
}

impl EnvManager for ShmEnvManager {
    fn num_envs(&self) -> usize {
        self.channel.slot_count()
    }

    fn reset_all(&mut self) -> Result<FxHashMap<EnvId, Observation>, EnvError> {
        let ids: Vec<EnvId> = (0..self.num_envs()).map(|index| index as EnvId).collect();
        let start = Instant::now();
        self.last_progress = start;
        self.deferred = None;
        self.check_failed()?;

        // Every id must have reported and none may still owe an answer before the broadcast.
        loop {
            let batch = self.channel.poll_batch();
            if let (_, Some(err)) = self.absorb(batch) {
                return Err(err);
            }

            let waiting: Vec<EnvId> = ids
                .iter()
                .copied()
                .filter(|&id| !self.channel.is_ready(id))
                .collect();

            if waiting.is_empty() {
                break;
            }

            self.check_timeout(waiting)?;
            self.channel.wait_for_results(self.config.poll_interval())?;
        }

        debug!(elapsed = ?start.elapsed(), "channel drained, broadcasting reset");

        for &id in &ids {
            self.channel.put_response(id, Action::Reset)?;
        }

        let states = self.collect_one_per_id(&ids)?;

        info!(num_envs = states.len(), elapsed = ?start.elapsed(), "reset all workers");

        Ok(states)
    }

    fn poll(&mut self) -> Result<Vec<Transition>, EnvError> {
        if let Some(err) = self.deferred.take() {
            return Err(err);
        }

        let mut batch = self.channel.poll_batch();

        if batch.is_empty() && self.channel.pending_count() > 0 {
            self.channel.wait_for_results(self.config.poll_interval())?;
            batch = self.channel.poll_batch();
        }

        if batch.is_empty() {
            self.check_overdue()?;
        }

        match self.absorb(batch) {
            (transitions, None) => Ok(transitions),
            (transitions, Some(err)) if transitions.is_empty() => Err(err),
            (transitions, Some(err)) => {
                self.deferred = Some(err);
                Ok(transitions)
            }
        }
    }

    fn write_actions(&mut self, actions: &FxHashMap<EnvId, Action>) -> Result<(), EnvError> {
        let mut batch = actions
            .iter()
            .map(|(&id, &action)| Ok((id, self.check_action(id, action)?)))
            .collect::<Result<Vec<_>, EnvError>>()?;
        batch.sort_unstable_by_key(|&(id, _)| id);

        for (id, dispatch) in batch {
            let action = match dispatch {
                Dispatch::Apply(mv) => Action::Move(mv),
                Dispatch::Reset => Action::Reset,
                Dispatch::Skip => continue,
            };

            self.channel.put_response(id, action)?;
        }

        Ok(())
    }

    fn in_flight(&self) -> usize {
        self.channel.pending_count()
    }
}
