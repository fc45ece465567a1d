use std::{
    sync::atomic::Ordering,
    thread,
    time::{Duration, Instant},
};

use env_2048::{Action, EnvId};
use tracing::{debug, trace, warn};

use crate::{
    error::ChannelError,
    message::{ActionMessage, ResultMessage},
    region::{ShmRegion, Slot},
};

/// Consumer-side view of the action exchange with one id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionState {
    /// Nothing has been sent since the channel was opened.
    Unset,
    /// Sent and not yet answered by a result.
    Pending(Action),
    /// The latest result answers this action.
    Answered(Action),
}

/// A result taken off the channel, along with the action it answers, if any.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Received {
    pub message: ResultMessage,
    pub answers: Option<Action>,
}

/// Everything [`ConsumerChannel::poll_batch`] took off the channel in one pass.
#[derive(Debug, Default)]
pub struct Batch {
    pub received: Vec<Received>,
    /// Ids whose slot broke the protocol during this pass. They are skipped from then on.
    pub failures: Vec<(EnvId, ChannelError)>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.received.is_empty() && self.failures.is_empty()
    }
}

#[derive(Debug)]
struct IdState {
    /// Sequence number of the latest result consumed.
    seen: u64,
    action: ActionState,
    sent_at: Option<Instant>,
    /// Set once the slot breaks the protocol.
    failed: Option<String>,
}

impl IdState {
    fn is_pending(&self) -> bool {
        self.failed.is_none() && matches!(self.action, ActionState::Pending(_))
    }
}

/// The consumer end: owns the region, reads results from every slot and answers them.
#[derive(Debug)]
pub struct ConsumerChannel {
    region: ShmRegion,
    ids: Vec<IdState>,
    cursor: usize,
}

impl ConsumerChannel {
    pub fn create(name: &str, slot_count: usize) -> Result<Self, ChannelError> {
        let region = ShmRegion::create(name, slot_count)?;
        let ids = (0..slot_count)
            .map(|_| IdState {
                seen: 0,
                action: ActionState::Unset,
                sent_at: None,
                failed: None,
            })
            .collect();

        Ok(Self {
            region,
            ids,
            cursor: 0,
        })
    }

    pub fn name(&self) -> &str {
        self.region.name()
    }

    pub fn slot_count(&self) -> usize {
        self.ids.len()
    }

    pub fn action_state(&self, id: EnvId) -> Option<ActionState> {
        self.ids.get(usize::from(id)).map(|state| state.action)
    }

    /// Whether `id` has reported and is not waiting on an action.
    pub fn is_ready(&self, id: EnvId) -> bool {
        self.ids.get(usize::from(id)).map_or(false, |state| {
            state.failed.is_none()
                && state.seen > 0
                && !matches!(state.action, ActionState::Pending(_))
        })
    }

    pub fn has_reported(&self, id: EnvId) -> bool {
        self.ids
            .get(usize::from(id))
            .map_or(false, |state| state.seen > 0)
    }

    /// Why `id` was taken out of service, if it was.
    pub fn failure(&self, id: EnvId) -> Option<&str> {
        self.ids.get(usize::from(id))?.failed.as_deref()
    }

    /// Ids that broke the protocol, with the reason.
    pub fn failed_ids(&self) -> Vec<(EnvId, &str)> {
        self.ids
            .iter()
            .enumerate()
            .filter_map(|(index, state)| Some((index as EnvId, state.failed.as_deref()?)))
            .collect()
    }

    pub fn pending_ids(&self) -> Vec<EnvId> {
        self.ids
            .iter()
            .enumerate()
            .filter(|(_, state)| state.is_pending())
            .map(|(index, _)| index as EnvId)
            .collect()
    }

    /// Ids whose pending action has gone unanswered for at least `timeout`.
    pub fn overdue(&self, timeout: Duration) -> Vec<EnvId> {
        self.ids
            .iter()
            .enumerate()
            .filter(|(_, state)| {
                state.is_pending() && state.sent_at.map_or(false, |at| at.elapsed() >= timeout)
            })
            .map(|(index, _)| index as EnvId)
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.ids.iter().filter(|state| state.is_pending()).count()
    }

    /// Every result published since the last call, in id order. Never blocks.
    ///
    /// A slot that breaks the protocol is reported in [`Batch::failures`] without holding back
    /// the results of the other slots.
    pub fn poll_batch(&mut self) -> Batch {
        self.region.header().results_ready.drain();

        let mut batch = Batch::default();
        for index in 0..self.ids.len() {
            match self.take(index) {
                Ok(Some(received)) => batch.received.push(received),
                Ok(None) => {}
                Err(err) => batch.failures.push((index as EnvId, err)),
            }
        }

        batch
    }

    /// At most one result, scanning round-robin from where the previous call stopped.
    ///
    /// A protocol error names one slot; the next call carries on past it.
    pub fn pop_one(&mut self) -> Result<Option<Received>, ChannelError> {
        let count = self.ids.len();

        for offset in 0..count {
            let index = (self.cursor + offset) % count;
            let taken = self.take(index);

            if !matches!(taken, Ok(None)) {
                self.cursor = (index + 1) % count;
                return taken;
            }
        }

        Ok(None)
    }

    /// Blocks until a worker signals a new result or `timeout` elapses.
    pub fn wait_for_results(&self, timeout: Duration) -> Result<bool, ChannelError> {
        self.region.header().results_ready.wait_timeout(timeout)
    }

    /// Answers the latest result of `id`.
    pub fn put_response(&mut self, id: EnvId, action: Action) -> Result<(), ChannelError> {
        let index = usize::from(id);
        let slot = self.region.slot(id).ok_or(ChannelError::UnknownEnv(id))?;
        let state = &mut self.ids[index];

        if let Some(reason) = &state.failed {
            return Err(ChannelError::Protocol(format!(
                "id {id} is out of service: {reason}"
            )));
        }

        if let ActionState::Pending(_) = state.action {
            return Err(ChannelError::DuplicateAction(id));
        }

        if state.seen == 0 {
            return Err(ChannelError::Protocol(format!(
                "id {id} has not reported a state to answer"
            )));
        }

        slot.write_action(state.seen, ActionMessage { id, action }.encode());
        slot.action_ready.post()?;
        state.action = ActionState::Pending(action);
        state.sent_at = Some(Instant::now());

        trace!(id, ?action, seq = state.seen, "sent action");

        Ok(())
    }

    /// Waits until workers have attached `count` times in total.
    pub fn wait_attached(&self, count: usize, timeout: Duration) -> Result<(), ChannelError> {
        let start = Instant::now();

        while (self.region.attach_count() as usize) < count {
            if start.elapsed() >= timeout {
                return Err(ChannelError::Timeout {
                    ids: Vec::new(),
                    waited: timeout,
                });
            }

            thread::sleep(Duration::from_millis(5));
        }

        Ok(())
    }

    /// Tells every worker to exit and wakes the ones blocked on an action.
    pub fn shutdown(&self) -> Result<(), ChannelError> {
        self.region.header().shutdown.store(1, Ordering::Release);

        for slot in self.region.slots() {
            slot.action_ready.post()?;
        }

        debug!(name = self.name(), "signalled shutdown");

        Ok(())
    }

    /// Takes the next result of slot `index`, marking the slot failed if it breaks the protocol.
    fn take(&mut self, index: usize) -> Result<Option<Received>, ChannelError> {
        if self.ids[index].failed.is_some() {
            return Ok(None);
        }

        let taken = self.take_checked(index);

        if let Err(ChannelError::Protocol(reason)) = &taken {
            warn!(id = index, %reason, "taking slot out of service");
            self.ids[index].failed = Some(reason.clone());
        }

        taken
    }

    fn take_checked(&mut self, index: usize) -> Result<Option<Received>, ChannelError> {
        let id = index as EnvId;
        let slot = self.region.slot(id).ok_or(ChannelError::UnknownEnv(id))?;
        let state = &mut self.ids[index];
        let seq = slot.result_seq();

        if seq == state.seen {
            return Ok(None);
        }

        if seq < state.seen || seq > state.seen + 1 {
            return Err(ChannelError::Protocol(format!(
                "id {id}: result sequence jumped from {} to {seq}",
                state.seen
            )));
        }

        let answers = match state.action {
            ActionState::Pending(action) => Some(action),
            _ if state.seen == 0 => None,
            _ => {
                return Err(ChannelError::Protocol(format!(
                    "id {id}: unsolicited result {seq}"
                )))
            }
        };

        let message = ResultMessage::decode(&slot.read_result(seq))?;
        if message.id != id {
            return Err(ChannelError::Protocol(format!(
                "slot {id} carries a result for id {}",
                message.id
            )));
        }

        state.seen = seq;
        if let Some(action) = answers {
            state.action = ActionState::Answered(action);
        }

        Ok(Some(Received { message, answers }))
    }
}

impl Drop for ConsumerChannel {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            debug!(%err, "failed to signal shutdown");
        }
    }
}

/// One worker's end of the channel.
#[derive(Debug)]
pub struct WorkerChannel {
    region: ShmRegion,
    id: EnvId,
}

impl WorkerChannel {
    pub fn attach(name: &str, id: EnvId) -> Result<Self, ChannelError> {
        let region = ShmRegion::open(name)?;

        if region.slot(id).is_none() {
            return Err(ChannelError::UnknownEnv(id));
        }

        region.header().attached.fetch_add(1, Ordering::AcqRel);

        Ok(Self { region, id })
    }

    pub const fn id(&self) -> EnvId {
        self.id
    }

    pub fn is_shutdown(&self) -> bool {
        self.region.is_shutdown()
    }

    fn slot(&self) -> Result<&Slot, ChannelError> {
        self.region
            .slot(self.id)
            .ok_or(ChannelError::UnknownEnv(self.id))
    }

    /// The latest result published on this slot, by this worker or a previous one.
    pub fn last_published(&self) -> Result<Option<(u64, ResultMessage)>, ChannelError> {
        let slot = self.slot()?;
        let seq = slot.result_seq();

        if seq == 0 {
            return Ok(None);
        }

        Ok(Some((seq, ResultMessage::decode(&slot.read_result(seq))?)))
    }

    /// Publishes result `seq`, which must follow the answered result `seq - 1`.
    pub fn publish(&self, seq: u64, message: &ResultMessage) -> Result<(), ChannelError> {
        let slot = self.slot()?;

        if seq != slot.result_seq() + 1 || slot.action_seq() + 1 != seq {
            return Err(ChannelError::Protocol(format!(
                "id {}: cannot publish result {seq} after result {} answered up to {}",
                self.id,
                slot.result_seq(),
                slot.action_seq()
            )));
        }

        slot.write_result(seq, message.encode());
        self.region.header().results_ready.post()
    }

    /// Waits for the consumer's answer to result `seq`.
    pub fn wait_action(&self, seq: u64, timeout: Duration) -> Result<Action, ChannelError> {
        let slot = self.slot()?;
        let start = Instant::now();

        loop {
            if self.is_shutdown() {
                return Err(ChannelError::Shutdown);
            }

            if slot.action_seq() == seq {
                let message = ActionMessage::decode(&slot.read_action())?;
                if message.id != self.id {
                    return Err(ChannelError::Protocol(format!(
                        "slot {} carries an action for id {}",
                        self.id, message.id
                    )));
                }

                return Ok(message.action);
            }

            let Some(remaining) = timeout.checked_sub(start.elapsed()) else {
                return Err(ChannelError::Timeout {
                    ids: vec![self.id],
                    waited: timeout,
                });
            };

            slot.action_ready.wait_timeout(remaining)?;
        }
    }
}
