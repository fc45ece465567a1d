use std::fmt;

use core_2048::row::{self, ROW_COUNT};
use tracing::debug;

/// Per-row results of a left move, precomputed for all 65536 rows.
///
/// Built once and shared read-only (usually behind an `Arc`) by every simulator.
pub struct LookupTable {
    shifted_row: Box<[u16]>,
    score_delta: Box<[u32]>,
    monotonicity: Box<[f32]>,
}

impl LookupTable {
    pub fn build() -> Self {
        let (shifted_row, score_delta): (Vec<_>, Vec<_>) =
            (0..=u16::MAX).map(row::shift_row_left).unzip();

        let monotonicity: Vec<f32> = (0..=u16::MAX)
            .map(|row| if row::is_monotonic(row) { 1.0 } else { 0.0 })
            .collect();

        debug!(rows = ROW_COUNT, "built move lookup table");

        Self {
            shifted_row: shifted_row.into_boxed_slice(),
            score_delta: score_delta.into_boxed_slice(),
            monotonicity: monotonicity.into_boxed_slice(),
        }
    }

    #[inline]
    pub fn shift(&self, row: u16) -> u16 {
        self.shifted_row[usize::from(row)]
    }

    #[inline]
    pub fn score(&self, row: u16) -> u32 {
        self.score_delta[usize::from(row)]
    }

    #[inline]
    pub fn monotonicity(&self, row: u16) -> f32 {
        self.monotonicity[usize::from(row)]
    }

    /// Moves every row of the board left, returning the new board and the points gained.
    pub fn shift_board_left(&self, board: u64) -> (u64, u32) {
        (0..4)
            .map(|i| (board >> (i * 16)) as u16)
            .enumerate()
            .fold((0, 0), |(new_board, score), (i, row)| {
                (
                    new_board | (u64::from(self.shift(row)) << (i * 16)),
                    score + self.score(row),
                )
            })
    }

    /// Sum of the row monotonicity over all four rows and all four columns.
    pub fn board_monotonicity(&self, board: u64) -> f32 {
        let columns = core_2048::transpose_board(board);

        core_2048::board_rows(board)
            .into_iter()
            .chain(core_2048::board_rows(columns))
            .map(|line| self.monotonicity(line))
            .sum()
    }
}

impl fmt::Debug for LookupTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LookupTable")
            .field("rows", &self.shifted_row.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use core_2048::board_from_rows;

    use super::*;

    /// Straightforward slide: drop empties, merge equal neighbours pairwise, pad with empties.
    fn slide_reference(row: u16) -> (u16, u32) {
        let tiles: Vec<u8> = row::row_cells(row).into_iter().filter(|&c| c != 0).collect();
        let mut merged = Vec::with_capacity(4);
        let mut score = 0;
        let mut i = 0;

        while i < tiles.len() {
            if i + 1 < tiles.len() && tiles[i] == tiles[i + 1] && tiles[i] < 15 {
                merged.push(tiles[i] + 1);
                score += 1 << (tiles[i] + 1);
                i += 2;
            } else {
                merged.push(tiles[i]);
                i += 1;
            }
        }

        merged.resize(4, 0);

        (row::pack_row([merged[0], merged[1], merged[2], merged[3]]), score)
    }

    #[test]
    fn table_matches_reference_slide_for_every_row() {
        let table = LookupTable::build();

        for row in 0..=u16::MAX {
            assert_eq!(
                (table.shift(row), table.score(row)),
                slide_reference(row),
                "row {row:#06x}"
            );
        }
    }

    #[test]
    fn merging_pair_stays_monotonic() {
        let table = LookupTable::build();

        assert_eq!(table.shift(0x1100), 0x2000);
        assert_eq!(table.score(0x1100), 4);
        assert_eq!(table.monotonicity(0x1100), 1.0);
        assert_eq!(table.monotonicity(0x2000), 1.0);
        assert_eq!(table.monotonicity(0x1210), 0.0);
    }

    #[test]
    fn shifts_whole_board() {
        let table = LookupTable::build();
        let board = board_from_rows([0x1100, 0x0220, 0x1234, 0x0003]);

        let (shifted, score) = table.shift_board_left(board);

        assert_eq!(shifted, board_from_rows([0x2000, 0x3000, 0x1234, 0x3000]));
        assert_eq!(score, 4 + 8);
    }

    #[test]
    fn empty_board_is_fully_monotonic() {
        let table = LookupTable::build();

        assert_eq!(table.board_monotonicity(0), 8.0);
        // Row 0 is [1, 2, 1, 0] and column 1 is [2, 0, 0, 0].
        assert_eq!(table.board_monotonicity(board_from_rows([0x1210, 0, 0, 0])), 7.0);
    }
}
