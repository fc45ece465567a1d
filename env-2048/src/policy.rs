use rand::{seq::IteratorRandom, Rng};

use crate::{moves::Action, transition::Observation};

/// Chooses the next action for an instance from what it last reported.
pub trait Policy {
    fn next_action(&mut self, observation: &Observation) -> Action;
}

/// Plays a uniformly random legal move, and asks for a new game once none is left.
pub struct RandomPolicy<R> {
    rng: R,
}

impl<R> Policy for RandomPolicy<R>
where
    R: Rng,
{
    fn next_action(&mut self, observation: &Observation) -> Action {
        observation
            .moves
            .iter()
            .choose(&mut self.rng)
            .map_or(Action::Reset, Action::Move)
    }
}

impl<R> RandomPolicy<R>
where
    R: Rng,
{
    pub const fn new(rng: R) -> Self {
        Self { rng }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::moves::{Move, MoveMask};

    #[test]
    fn picks_only_legal_moves() {
        let mut policy = RandomPolicy::new(ChaCha8Rng::seed_from_u64(0));
        let observation = Observation {
            id: 0,
            board: 0,
            moves: MoveMask::from_moves(Move::Up.bit() | Move::Right.bit()),
        };

        for _ in 0..100 {
            let action = policy.next_action(&observation);
            assert!(matches!(action, Action::Move(Move::Up | Move::Right)));
        }
    }

    #[test]
    fn resets_finished_games() {
        let mut policy = RandomPolicy::new(ChaCha8Rng::seed_from_u64(0));
        let observation = Observation {
            id: 3,
            board: 0x1212_2121_1212_2121,
            moves: MoveMask::TERMINAL,
        };

        assert_eq!(policy.next_action(&observation), Action::Reset);
    }
}
