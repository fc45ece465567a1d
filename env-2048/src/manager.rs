use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use crate::{
    config::EnvConfig,
    error::{EnvError, SimError},
    moves::{Action, Move, MoveMask},
    simulator::{instance_rng, Simulator},
    table::LookupTable,
    transition::{Observation, Transition},
    EnvId,
};

/// Batched access to a fixed set of game instances, whether they run in-process or in workers.
///
/// Each instance takes at most one action at a time: after an action is written, the matching
/// [`Transition`] has to come back through [`EnvManager::poll`] before the id accepts another.
pub trait EnvManager {
    fn num_envs(&self) -> usize;

    /// Starts a fresh game on every instance and returns their initial states.
    fn reset_all(&mut self) -> Result<FxHashMap<EnvId, Observation>, EnvError>;

    /// Transitions produced since the previous poll. May be a partial batch.
    fn poll(&mut self) -> Result<Vec<Transition>, EnvError>;

    fn write_actions(&mut self, actions: &FxHashMap<EnvId, Action>) -> Result<(), EnvError>;

    /// Number of ids with an action written whose transition has not been polled yet.
    fn in_flight(&self) -> usize;
}

/// What an instance does with an incoming action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    Apply(Move),
    Reset,
    /// A move sent to a finished game without auto reset.
    Skip,
}

pub fn route_action(moves: MoveMask, action: Action, auto_reset: bool) -> Dispatch {
    match action {
        Action::Reset => Dispatch::Reset,
        Action::Move(_) if moves.is_terminal() && auto_reset => Dispatch::Reset,
        Action::Move(_) if moves.is_terminal() => Dispatch::Skip,
        Action::Move(mv) => Dispatch::Apply(mv),
    }
}

/// All instances in this process, stepped synchronously in id order.
pub struct LocalEnvManager {
    simulators: Vec<Simulator>,
    auto_reset: bool,
    /// Ids whose latest transition has not been handed out by `poll`.
    unpolled: FxHashSet<EnvId>,
}

impl LocalEnvManager {
    pub fn new(config: &EnvConfig) -> Result<Self, EnvError> {
        Self::with_table(config, Arc::new(LookupTable::build()))
    }

    pub fn with_table(config: &EnvConfig, table: Arc<LookupTable>) -> Result<Self, EnvError> {
        config.validate()?;

        let simulators = (0..config.num_envs)
            .map(|index| {
                let id = index as EnvId;

                Simulator::new(
                    id,
                    Arc::clone(&table),
                    instance_rng(id, config.seed),
                    config.spawn,
                    config.reward,
                )
            })
            .collect::<Result<Vec<_>, SimError>>()?;

        debug!(
            num_envs = config.num_envs,
            seed = ?config.seed,
            auto_reset = config.auto_reset,
            "created local environments"
        );

        Ok(Self {
            simulators,
            auto_reset: config.auto_reset,
            unpolled: FxHashSet::default(),
        })
    }

    /// Latest transition of every instance, in id order, without consuming anything.
    pub fn poll_results(&self) -> Vec<Transition> {
        self.simulators.iter().map(Simulator::experience).collect()
    }

    pub fn simulators(&self) -> &[Simulator] {
        &self.simulators
    }

    fn simulator(&self, id: EnvId) -> Result<&Simulator, EnvError> {
        self.simulators
            .get(usize::from(id))
            .ok_or(EnvError::UnknownEnv(id))
    }

    fn check_action(&self, id: EnvId, action: Action) -> Result<Dispatch, EnvError> {
        let simulator = self.simulator(id)?;

        if self.unpolled.contains(&id) {
            return Err(EnvError::DuplicateAction(id));
        }

        let dispatch = route_action(simulator.moves(), action, self.auto_reset);

        if let Dispatch::Apply(mv) = dispatch {
            if !simulator.moves().contains(mv) {
                return Err(SimError::InvalidMove {
                    id,
                    mv,
                    moves: simulator.moves(),
                }
                .into());
            }
        }

        Ok(dispatch)
    }
}

impl EnvManager for LocalEnvManager {
    fn num_envs(&self) -> usize {
        self.simulators.len()
    }

    fn reset_all(&mut self) -> Result<FxHashMap<EnvId, Observation>, EnvError> {
        self.unpolled.clear();

        self.simulators
            .iter_mut()
            .map(|simulator| {
                simulator.reset()?;
                Ok((simulator.id(), simulator.observation()))
            })
            .collect()
    }

    fn poll(&mut self) -> Result<Vec<Transition>, EnvError> {
        let mut ids: Vec<EnvId> = self.unpolled.drain().collect();
        ids.sort_unstable();

        Ok(ids
            .into_iter()
            .map(|id| self.simulators[usize::from(id)].experience())
            .collect())
    }

    fn write_actions(&mut self, actions: &FxHashMap<EnvId, Action>) -> Result<(), EnvError> {
        // Validate the whole batch before touching any instance.
        let mut batch = actions
            .iter()
            .map(|(&id, &action)| Ok((id, self.check_action(id, action)?)))
            .collect::<Result<Vec<_>, EnvError>>()?;
        batch.sort_unstable_by_key(|&(id, _)| id);

        for (id, dispatch) in batch {
            let simulator = &mut self.simulators[usize::from(id)];

            match dispatch {
                Dispatch::Apply(mv) => {
                    simulator.make_move(mv)?;
                }
                Dispatch::Reset => simulator.reset()?,
                Dispatch::Skip => {
                    trace!(id, "skipping move for a finished game");
                    continue;
                }
            }

            self.unpolled.insert(id);
        }

        Ok(())
    }

    fn in_flight(&self) -> usize {
        self.unpolled.len()
    }
}
