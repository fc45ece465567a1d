use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    error::EnvError,
    manager::EnvManager,
    policy::Policy,
    transition::{Observation, Transition},
    EnvId,
};

/// Totals for one [`drive`] run.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub transitions: u64,
    pub games_finished: u64,
    pub total_reward: f64,
    pub best_tile: u8,
    pub elapsed: Duration,
}

impl RunStats {
    pub fn transitions_per_second(&self) -> f64 {
        let seconds = self.elapsed.as_secs_f64();

        if seconds > 0.0 {
            self.transitions as f64 / seconds
        } else {
            0.0
        }
    }

    fn record(&mut self, transition: &Transition) {
        self.transitions += 1;
        self.total_reward += transition.reward;
        self.best_tile = self
            .best_tile
            .max(transition.next_state.iter().copied().max().unwrap_or(0));

        if transition.terminal {
            self.games_finished += 1;
        }
    }
}

/// The consumer loop: reset every instance, then alternate between writing one action per ready
/// instance and polling the results, until `max_transitions` results have been collected.
///
/// Every transition is handed to `on_transition` in the order it was polled.
pub fn drive<M, P, F>(
    manager: &mut M,
    policy: &mut P,
    max_transitions: u64,
    mut on_transition: F,
) -> Result<RunStats, EnvError>
where
    M: EnvManager + ?Sized,
    P: Policy + ?Sized,
    F: FnMut(&Transition) -> Result<(), EnvError>,
{
    let start = Instant::now();
    let mut stats = RunStats::default();
    let mut ready: FxHashMap<EnvId, Observation> = manager.reset_all()?;

    debug!(num_envs = manager.num_envs(), max_transitions, "starting run");

    while stats.transitions < max_transitions {
        let actions: FxHashMap<_, _> = ready
            .drain()
            .map(|(id, observation)| (id, policy.next_action(&observation)))
            .collect();

        if actions.is_empty() && manager.in_flight() == 0 {
            break;
        }

        manager.write_actions(&actions)?;

        for transition in manager.poll()? {
            if stats.transitions == max_transitions {
                break;
            }

            stats.record(&transition);
            on_transition(&transition)?;
            ready.insert(transition.id, transition.observation());
        }
    }

    stats.elapsed = start.elapsed();

    info!(
        transitions = stats.transitions,
        games_finished = stats.games_finished,
        best_tile = 1u32 << stats.best_tile,
        per_second = stats.transitions_per_second(),
        "run finished"
    );

    Ok(stats)
}
