//! Bit-level representation of a 2048 board.
//!
//! A board is a `u64` holding sixteen 4-bit cells. Each cell stores the log2 exponent of its tile
//! (0 for an empty cell). Row 0 occupies the most significant 16 bits and, within a row, the
//! leftmost cell occupies the most significant nibble, so cell `i = 4 * row + col` lives at bit
//! offset `60 - 4 * i`.

pub mod row;

pub const CELL_COUNT: usize = 16;

/// Largest exponent a cell can hold.
pub const MAX_EXPONENT: u8 = 15;

/// Corner cell indices in row-major order.
pub const CORNER_CELLS: [usize; 4] = [0, 3, 12, 15];

pub const fn cell_shift(index: usize) -> u32 {
    60 - 4 * index as u32
}

pub const fn get_cell(board: u64, index: usize) -> u8 {
    ((board >> cell_shift(index)) & 0xf) as u8
}

pub const fn set_cell(board: u64, index: usize, cell: u8) -> u64 {
    let shift = cell_shift(index);

    (board & !(0xf << shift)) | (((cell & 0xf) as u64) << shift)
}

/// Reverses the cells of every row, so a right move becomes a left move.
pub const fn mirror_board(board: u64) -> u64 {
    let board = ((board << 4) & 0xf0f0_f0f0_f0f0_f0f0) | ((board >> 4) & 0x0f0f_0f0f_0f0f_0f0f);
    ((board << 8) & 0xff00_ff00_ff00_ff00) | ((board >> 8) & 0x00ff_00ff_00ff_00ff)
}

/// Swaps rows and columns, so an up move becomes a left move. Its own inverse.
pub const fn transpose_board(board: u64) -> u64 {
    // Swap the off-diagonal nibbles inside each 2x2 block, then swap the off-diagonal 2x2 blocks.
    let keep = board & 0xf0f0_0f0f_f0f0_0f0f;
    let upper = board & 0x0000_f0f0_0000_f0f0;
    let lower = board & 0x0f0f_0000_0f0f_0000;
    let board = keep | (upper << 12) | (lower >> 12);

    let keep = board & 0xff00_ff00_00ff_00ff;
    let upper = board & 0x0000_0000_ff00_ff00;
    let lower = board & 0x00ff_00ff_0000_0000;

    keep | (upper << 24) | (lower >> 24)
}

pub const fn board_rows(board: u64) -> [u16; 4] {
    [
        (board >> 48) as u16,
        (board >> 32) as u16,
        (board >> 16) as u16,
        board as u16,
    ]
}

pub const fn board_from_rows(rows: [u16; 4]) -> u64 {
    ((rows[0] as u64) << 48) | ((rows[1] as u64) << 32) | ((rows[2] as u64) << 16) | rows[3] as u64
}

/// Expands a board into one exponent per cell, row-major.
pub fn unpack_board(board: u64) -> [u8; CELL_COUNT] {
    let mut cells = [0; CELL_COUNT];

    for (i, cell) in cells.iter_mut().enumerate() {
        *cell = get_cell(board, i);
    }

    cells
}

/// Inverse of [`unpack_board`]. Only the low nibble of each cell is kept.
pub fn pack_board(cells: &[u8; CELL_COUNT]) -> u64 {
    cells
        .iter()
        .enumerate()
        .fold(0, |board, (i, &cell)| set_cell(board, i, cell))
}

/// Sets the lowest bit of every empty nibble.
pub const fn mark_empty_cells(board: u64) -> u64 {
    let table = board | (board >> 1);
    let table = table | (table >> 2);

    !table & 0x1111_1111_1111_1111
}

pub const fn count_empty_cells(board: u64) -> u32 {
    mark_empty_cells(board).count_ones()
}

pub const fn count_tiles(board: u64) -> u32 {
    CELL_COUNT as u32 - count_empty_cells(board)
}

pub fn max_cell(board: u64) -> u8 {
    (0..CELL_COUNT)
        .map(|i| get_cell(board, i))
        .max()
        .unwrap_or(0)
}

/// Returns true if a tile with the largest exponent on the board sits in a corner.
pub fn max_cell_in_corner(board: u64) -> bool {
    let max = max_cell(board);

    max != 0 && CORNER_CELLS.iter().any(|&i| get_cell(board, i) == max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_board() -> u64 {
        let mut cells = [0; CELL_COUNT];
        for (i, cell) in cells.iter_mut().enumerate() {
            *cell = i as u8;
        }
        pack_board(&cells)
    }

    #[test]
    fn rows_are_packed_high_to_low() {
        let board = board_from_rows([0x1100, 0x0000, 0x0000, 0x0002]);

        assert_eq!(board, 0x1100_0000_0000_0002);
        assert_eq!(board_rows(board), [0x1100, 0, 0, 2]);
        assert_eq!(get_cell(board, 0), 1);
        assert_eq!(get_cell(board, 1), 1);
        assert_eq!(get_cell(board, 15), 2);
    }

    #[test]
    fn transpose_swaps_rows_and_columns() {
        let board = numbered_board();
        let transposed = unpack_board(transpose_board(board));

        for row in 0..4 {
            for col in 0..4 {
                assert_eq!(transposed[4 * row + col] as usize, 4 * col + row);
            }
        }

        assert_eq!(transpose_board(transpose_board(board)), board);
    }

    #[test]
    fn mirror_reverses_each_row() {
        let board = board_from_rows([0x1234, 0x8421, 0x0f00, 0x0000]);

        assert_eq!(board_rows(mirror_board(board)), [0x4321, 0x1248, 0x00f0, 0x0000]);
        assert_eq!(mirror_board(mirror_board(board)), board);
    }

    #[test]
    fn pack_inverts_unpack() {
        let board = numbered_board();

        assert_eq!(pack_board(&unpack_board(board)), board);
        assert_eq!(unpack_board(0), [0; CELL_COUNT]);
    }

    #[test]
    fn counts_empty_cells_and_tiles() {
        let board = board_from_rows([0x1100, 0x0000, 0x0000, 0x0002]);

        assert_eq!(count_empty_cells(board), 13);
        assert_eq!(count_tiles(board), 3);
        assert_eq!(count_empty_cells(0), 16);
    }

    #[test]
    fn detects_max_tile_in_corner() {
        assert!(max_cell_in_corner(board_from_rows([0x3100, 0, 0, 0])));
        assert!(!max_cell_in_corner(board_from_rows([0x1300, 0, 0, 0])));
        assert!(max_cell_in_corner(board_from_rows([0x0300, 0, 0, 0x0003])));
        assert!(!max_cell_in_corner(0));
    }
}
