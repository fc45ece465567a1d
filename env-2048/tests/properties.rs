//! Property-based invariants for boards, moves and simulators.

use std::sync::{Arc, OnceLock};

use env_2048::{
    core_2048::{count_tiles, mirror_board, pack_board, transpose_board, unpack_board},
    logic::{apply_move, valid_moves},
    simulator::instance_rng,
    LookupTable, Move, RewardConfig, SimError, SimState, Simulator, SpawnConfig,
};
use proptest::prelude::*;

const MAX_STEPS: usize = 5_000;

fn table() -> Arc<LookupTable> {
    static TABLE: OnceLock<Arc<LookupTable>> = OnceLock::new();

    Arc::clone(TABLE.get_or_init(|| Arc::new(LookupTable::build())))
}

fn simulator(seed: u64) -> Simulator {
    Simulator::new(
        0,
        table(),
        instance_rng(0, Some(seed)),
        SpawnConfig::default(),
        RewardConfig::default(),
    )
    .unwrap()
}

fn any_move() -> impl Strategy<Value = Move> {
    prop::sample::select(Move::ALL.to_vec())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2000))]

    #[test]
    fn pack_inverts_unpack(board in any::<u64>()) {
        prop_assert_eq!(pack_board(&unpack_board(board)), board);
    }

    #[test]
    fn transforms_are_involutions(board in any::<u64>()) {
        prop_assert_eq!(mirror_board(mirror_board(board)), board);
        prop_assert_eq!(transpose_board(transpose_board(board)), board);
    }

    #[test]
    fn mask_matches_board_changes(board in any::<u64>()) {
        let table = table();
        let mask = valid_moves(board);

        for mv in Move::ALL {
            let (moved, _) = apply_move(&table, board, mv);
            prop_assert_eq!(mask.contains(mv), moved != board, "{:?} on {:#018x}", mv, board);
        }

        let stuck = Move::ALL.iter().all(|&mv| apply_move(&table, board, mv).0 == board);
        prop_assert_eq!(mask.is_terminal(), stuck);
    }

    #[test]
    fn illegal_moves_change_nothing(board in any::<u64>(), mv in any_move()) {
        let table = table();
        let (moved, score) = apply_move(&table, board, mv);
        let (again, second_score) = apply_move(&table, moved, mv);

        prop_assert!(count_tiles(moved) <= count_tiles(board));
        prop_assert!(count_tiles(again) <= count_tiles(moved));

        if !valid_moves(moved).contains(mv) {
            prop_assert_eq!(again, moved);
            prop_assert_eq!(second_score, 0);
        }

        if moved == board {
            prop_assert_eq!(score, 0);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_games_keep_their_invariants(seed in any::<u64>(), choices in prop::collection::vec(any::<u8>(), 64)) {
        let table = table();
        let mut sim = simulator(seed);
        let mut steps = 0;

        while sim.state() == SimState::Active && steps < MAX_STEPS {
            let legal: Vec<_> = sim.moves().iter().collect();
            prop_assert!(!legal.is_empty());

            let mv = legal[usize::from(choices[steps % choices.len()]) % legal.len()];
            let before = sim.board();
            let score = sim.score();
            let (shifted, gained) = apply_move(&table, before, mv);

            let reward = sim.make_move(mv).unwrap();
            steps += 1;

            prop_assert!(reward.is_finite());
            prop_assert_eq!(sim.score(), score + gained);
            prop_assert!(sim.score() >= score);
            prop_assert_eq!(count_tiles(sim.board()), count_tiles(shifted) + 1);
            prop_assert_eq!(sim.prev_board(), before);
            prop_assert_eq!(sim.moves().is_terminal(), sim.is_terminated());

            let legal = sim.moves();
            for illegal in Move::ALL.into_iter().filter(|&mv| !legal.contains(mv)) {
                let board = sim.board();
                let score = sim.score();

                prop_assert!(sim.make_move(illegal).is_err());
                prop_assert_eq!(sim.board(), board);
                prop_assert_eq!(sim.score(), score);
            }
        }

        if sim.is_terminated() {
            prop_assert!(
                matches!(sim.make_move(Move::Left), Err(SimError::IllegalOperation { .. })),
                "expected IllegalOperation"
            );
        }
    }
}
