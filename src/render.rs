use std::{
    io::{self, Write},
    mem::MaybeUninit,
    os::fd::{AsRawFd, RawFd},
};

use core_2048::{board_rows, row::row_cells};

const SQUARE_HEIGHT: usize = 3;
const TOP_ROW: &[u8] = "┏━━━━━━━┳━━━━━━━┳━━━━━━━┳━━━━━━━┓\n".as_bytes();
const SEPARATOR_ROW: &[u8] = "┣━━━━━━━╋━━━━━━━╋━━━━━━━╋━━━━━━━┫\n".as_bytes();
const BOTTOM_ROW: &[u8] = "┗━━━━━━━┻━━━━━━━┻━━━━━━━┻━━━━━━━┛\n".as_bytes();
const EMPTY_ROW: &[u8] = "┃       ┃       ┃       ┃       ┃\n".as_bytes();
const EMPTY_CELL: &[u8] = "┃       ".as_bytes();
const COLOUR_TABLE: [u8; 7] = [90, 33, 31, 32, 33, 36, 35];

/// Lines from the score line to the line below the board.
const BOARD_LINES: usize = SQUARE_HEIGHT * 4 + 6;

fn cell_colour(cell: u8) -> Option<u8> {
    cell.checked_sub(1)
        .map(|i| COLOUR_TABLE[i as usize % COLOUR_TABLE.len()])
}

fn draw_padding_line(out: &mut impl Write, cells: [u8; 4]) -> io::Result<()> {
    for cell in cells {
        if let Some(colour) = cell_colour(cell) {
            write!(out, "┃\x1b[{}m       \x1b[m", colour + 10)?;
        } else {
            out.write_all(EMPTY_CELL)?;
        }
    }

    Ok(())
}

fn draw_board_row(out: &mut impl Write, row: u16) -> io::Result<()> {
    let cells = row_cells(row);

    for _ in 0..(SQUARE_HEIGHT - 1) / 2 {
        draw_padding_line(out, cells)?;
    }

    out.write_all(b"\x1b[E")?;

    for cell in cells {
        if let Some(colour) = cell_colour(cell) {
            let num = 1u32 << cell;

            write!(out, "┃\x1b[7m\x1b[{colour}m{num:^7}\x1b[m")?;
        } else {
            out.write_all(EMPTY_CELL)?;
        }
    }

    out.write_all(b"\x1b[E")?;

    for _ in 0..(SQUARE_HEIGHT - 1).div_ceil(2) {
        draw_padding_line(out, cells)?;
    }

    Ok(())
}

/// Draws the frame and the tiles of `board` below the current cursor position.
pub fn draw_board(out: &mut impl Write, board: u64, score: u32) -> io::Result<()> {
    write!(out, "\nScore: {score}\n")?;
    out.write_all(TOP_ROW)?;

    for i in 0..4 {
        if i != 0 {
            out.write_all(SEPARATOR_ROW)?;
        }

        for _ in 0..SQUARE_HEIGHT {
            out.write_all(EMPTY_ROW)?;
        }
    }

    out.write_all(BOTTOM_ROW)?;

    redraw_board(out, 0, board, score, score)
}

/// Repaints the score and the rows that differ, assuming the cursor sits just below the board.
pub fn redraw_board(
    out: &mut impl Write,
    old_board: u64,
    new_board: u64,
    old_score: u32,
    new_score: u32,
) -> io::Result<()> {
    let mut current_line = if new_score != old_score {
        write!(out, "\x1b[{BOARD_LINES}FScore: {new_score}")?;

        BOARD_LINES
    } else {
        0
    };

    let old_rows = board_rows(old_board);
    let new_rows = board_rows(new_board);

    // Row 0 is drawn at the top, furthest from the cursor.
    for row in (0..4).filter(|&i| old_rows[i] != new_rows[i]) {
        let final_row_to_end = (SQUARE_HEIGHT - 1).div_ceil(2) + 2;
        let between_rows = SQUARE_HEIGHT + 1;
        let target_line = final_row_to_end + between_rows * (3 - row) + 1;

        if target_line > current_line {
            write!(out, "\x1b[{}F", target_line - current_line)?;
        } else {
            write!(out, "\x1b[{}E", current_line - target_line)?;
        }

        draw_board_row(out, new_rows[row])?;
        current_line = target_line - 2;
    }

    if current_line != 0 {
        write!(out, "\x1b[{current_line}E")?;
    }

    out.flush()
}

/// Puts the terminal into unbuffered, no-echo mode until dropped.
pub struct RawTerminal {
    fd: RawFd,
    saved: libc::termios,
}

impl RawTerminal {
    pub fn enable(fd: &impl AsRawFd) -> io::Result<Self> {
        let fd = fd.as_raw_fd();
        let mut termios = MaybeUninit::uninit();

        // SAFETY: tcgetattr fully initialises `termios` when it returns 0.
        let saved = unsafe {
            if libc::tcgetattr(fd, termios.as_mut_ptr()) != 0 {
                return Err(io::Error::last_os_error());
            }

            termios.assume_init()
        };

        let mut raw = saved;
        raw.c_lflag &= !(libc::ECHO | libc::ICANON);

        // SAFETY: `raw` is a valid termios copied from the one tcgetattr returned.
        if unsafe { libc::tcsetattr(fd, libc::TCSADRAIN, &raw) } != 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self { fd, saved })
    }
}

impl Drop for RawTerminal {
    fn drop(&mut self) {
        // SAFETY: restores the settings read in `enable` on the same descriptor.
        unsafe {
            libc::tcsetattr(self.fd, libc::TCSADRAIN, &self.saved);
        }
    }
}

#[cfg(test)]
mod tests {
    use core_2048::board_from_rows;

    use super::*;

    fn render(board: u64, score: u32) -> String {
        let mut out = Vec::new();
        draw_board(&mut out, board, score).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn draws_score_and_tiles() {
        let text = render(board_from_rows([0x1b00, 0, 0, 0x000f]), 1234);

        assert!(text.contains("Score: 1234"));
        assert!(text.contains("   2   "));
        assert!(text.contains(" 2048  "));
        assert!(text.contains(" 32768 "));
        assert!(text.ends_with("\x1b[2E"));
    }

    #[test]
    fn redraw_touches_only_changed_rows() {
        let before = board_from_rows([0x1000, 0, 0, 0]);
        let after = board_from_rows([0x1000, 0, 0, 0x0002]);
        let mut out = Vec::new();

        redraw_board(&mut out, before, after, 8, 8).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(!text.contains("Score"));
        assert_eq!(text.matches("\x1b[7m").count(), 1);
        assert!(text.contains("   4   "));
    }

    #[test]
    fn unchanged_board_draws_nothing() {
        let board = board_from_rows([0x1234, 0, 0, 0]);
        let mut out = Vec::new();

        redraw_board(&mut out, board, board, 4, 4).unwrap();

        assert!(out.is_empty());
    }
}
