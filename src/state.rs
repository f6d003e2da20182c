//! `StateBlock`: board cells and player records, laid out as a fixed header
//! immediately followed by a row-major `width * height` board inside one
//! shared-memory region (spec §3, §9 "deep struct + flexible array").
//!
//! Readers never store their own copy of the layout: width/height live in
//! the header, so the board slice is always computed from it.

use crate::direction::Direction;

pub const MAX_PLAYERS: usize = 9;
pub const MAX_NAME_LEN: usize = 15;

/// A signed board cell: positive is an unclaimed reward, non-positive is
/// claimed by player `-(value) - 1`.
pub type Cell = i32;

/// Fixed-size per-player record (spec §3).
#[repr(C)]
#[derive(Clone, Copy)]
pub struct PlayerRecord {
    name: [u8; MAX_NAME_LEN + 1],
    pub score: i64,
    pub valid_moves: u32,
    pub invalid_moves: u32,
    pub x: i32,
    pub y: i32,
    pub pid: i32,
    pub blocked: bool,
}

impl PlayerRecord {
    fn empty() -> Self {
        PlayerRecord {
            name: [0; MAX_NAME_LEN + 1],
            score: 0,
            valid_moves: 0,
            invalid_moves: 0,
            x: 0,
            y: 0,
            pid: 0,
            blocked: false,
        }
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = [0; MAX_NAME_LEN + 1];
        let bytes = name.as_bytes();
        let n = bytes.len().min(MAX_NAME_LEN);
        self.name[..n].copy_from_slice(&bytes[..n]);
    }

    pub fn name(&self) -> &str {
        let nul = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        std::str::from_utf8(&self.name[..nul]).unwrap_or("?")
    }
}

/// Owner index recoverable from a claimed cell value alone, per spec §3.
pub fn owner_of(cell: Cell) -> Option<usize> {
    if cell > 0 {
        None
    } else {
        Some((-(cell as i64) - 1) as usize)
    }
}

pub fn claimed_value(player_index: usize) -> Cell {
    -((player_index as i64 + 1) as Cell)
}

/// Fixed-size header placed at the base of the `/game_state` shared region.
/// The board (`width * height` [`Cell`]s) follows immediately after.
#[repr(C)]
pub struct StateHeader {
    pub width: u32,
    pub height: u32,
    pub player_count: u32,
    pub game_over: bool,
    pub players: [PlayerRecord; MAX_PLAYERS],
}

impl StateHeader {
    pub fn board_len(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Total byte size of the region needed for a `width x height` board,
/// per spec §6: `sizeof(header) + width * height * sizeof(Cell)`.
pub fn state_region_size(width: u32, height: u32) -> usize {
    std::mem::size_of::<StateHeader>() + (width as usize) * (height as usize) * std::mem::size_of::<Cell>()
}

/// Typed view over a `/game_state` shared-memory mapping: a header followed
/// by a contiguous board slice, both borrowed from the same raw mapping.
pub struct StateView {
    ptr: *mut u8,
}

impl StateView {
    /// # Safety
    /// `ptr` must point to a mapping at least [`state_region_size`] bytes
    /// for the header's current `width`/`height` once initialized, and must
    /// remain valid for as long as the returned view is used.
    pub unsafe fn from_raw(ptr: *mut u8) -> Self {
        StateView { ptr }
    }

    pub fn header(&self) -> &StateHeader {
        unsafe { &*(self.ptr as *const StateHeader) }
    }

    pub fn header_mut(&mut self) -> &mut StateHeader {
        unsafe { &mut *(self.ptr as *mut StateHeader) }
    }

    fn board_ptr(&self) -> *mut Cell {
        unsafe { self.ptr.add(std::mem::size_of::<StateHeader>()) as *mut Cell }
    }

    pub fn board(&self) -> &[Cell] {
        let len = self.header().board_len();
        unsafe { std::slice::from_raw_parts(self.board_ptr(), len) }
    }

    pub fn board_mut(&mut self) -> &mut [Cell] {
        let len = self.header().board_len();
        unsafe { std::slice::from_raw_parts_mut(self.board_ptr(), len) }
    }

    /// Initialise a freshly created region: zero the header, set
    /// dimensions/roster, and seed the board with uniform `1..=9` rewards.
    pub fn init(&mut self, width: u32, height: u32, player_count: u32, seed: u64) {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);

        {
            let header = self.header_mut();
            header.width = width;
            header.height = height;
            header.player_count = player_count;
            header.game_over = false;
            for p in header.players.iter_mut() {
                *p = PlayerRecord::empty();
            }
        }

        for cell in self.board_mut().iter_mut() {
            *cell = rng.gen_range(1..=9);
        }
    }

    pub fn index(&self, x: i32, y: i32) -> Option<usize> {
        let header = self.header();
        if x < 0 || y < 0 || x as u32 >= header.width || y as u32 >= header.height {
            None
        } else {
            Some(y as usize * header.width as usize + x as usize)
        }
    }

    /// Target coordinate for a move from `(x, y)` in `dir`, only if in
    /// bounds (spec §4.3's first validation step).
    pub fn target_of(&self, x: i32, y: i32, dir: Direction) -> Option<(i32, i32, usize)> {
        let (dx, dy) = dir.delta();
        let (tx, ty) = (x + dx, y + dy);
        self.index(tx, ty).map(|idx| (tx, ty, idx))
    }

    /// Place player `i` at `(x, y)` as its initial head, claiming the cell
    /// and crediting its pre-claim reward to the player's score (spec §8
    /// scenario 1: a lone player on a 1x1 board wins with a score equal to
    /// that single cell's initial reward despite making zero moves -- the
    /// initial placement consumes the cell the same way an accepted move
    /// would, it just doesn't count toward `valid_moves`).
    pub fn place_initial(&mut self, i: usize, x: i32, y: i32) {
        let idx = self.index(x, y).expect("initial placement must be in bounds");
        let reward = self.board()[idx].max(0);
        let claimed = claimed_value(i);
        self.board_mut()[idx] = claimed;
        let header = self.header_mut();
        header.players[i].x = x;
        header.players[i].y = y;
        header.players[i].score += reward as i64;
    }
}

/// A consistent, off-lock copy of the state, taken by a player or viewer
/// under the readers' protocol (spec §4.4 step 2, §4.5).
#[derive(Clone)]
pub struct Snapshot {
    pub width: u32,
    pub height: u32,
    pub player_count: u32,
    pub game_over: bool,
    pub board: Vec<Cell>,
    pub players: Vec<PlayerRecordSnapshot>,
}

#[derive(Clone)]
pub struct PlayerRecordSnapshot {
    pub name: String,
    pub score: i64,
    pub valid_moves: u32,
    pub invalid_moves: u32,
    pub x: i32,
    pub y: i32,
    pub pid: i32,
    pub blocked: bool,
}

impl Snapshot {
    pub fn capture(view: &StateView) -> Self {
        let header = view.header();
        let player_count = header.player_count as usize;
        let players = header.players[..player_count]
            .iter()
            .map(|p| PlayerRecordSnapshot {
                name: p.name().to_string(),
                score: p.score,
                valid_moves: p.valid_moves,
                invalid_moves: p.invalid_moves,
                x: p.x,
                y: p.y,
                pid: p.pid,
                blocked: p.blocked,
            })
            .collect();
        Snapshot {
            width: header.width,
            height: header.height,
            player_count: header.player_count,
            game_over: header.game_over,
            board: view.board().to_vec(),
            players,
        }
    }

    pub fn index(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x as u32 >= self.width || y as u32 >= self.height {
            None
        } else {
            Some(y as usize * self.width as usize + x as usize)
        }
    }

    pub fn cell_at(&self, x: i32, y: i32) -> Option<Cell> {
        self.index(x, y).map(|idx| self.board[idx])
    }

    /// Whether `dir` from `my_index`'s head lands on an in-bounds, positive
    /// (unclaimed) cell -- what [`crate::policy`] implementations must find.
    pub fn is_legal(&self, my_index: usize, dir: Direction) -> bool {
        let me = &self.players[my_index];
        let (dx, dy) = dir.delta();
        self.cell_at(me.x + dx, me.y + dy).is_some_and(|c| c > 0)
    }

    /// True if no non-blocked player has any in-bounds move onto a positive
    /// cell -- termination condition 1 (spec §4.3).
    pub fn no_player_has_a_legal_move(&self) -> bool {
        (0..self.players.len()).all(|i| {
            let p = &self.players[i];
            p.blocked || Direction::ALL.iter().all(|&d| !self.is_legal(i, d))
        })
    }

    pub fn all_blocked(&self) -> bool {
        self.players.iter().all(|p| p.blocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_round_trips_through_claimed_value() {
        for i in 0..MAX_PLAYERS {
            let cell = claimed_value(i);
            assert!(cell <= 0);
            assert_eq!(owner_of(cell), Some(i));
        }
    }

    #[test]
    fn positive_cells_have_no_owner() {
        assert_eq!(owner_of(1), None);
        assert_eq!(owner_of(9), None);
    }

    #[test]
    fn region_size_accounts_for_header_and_board() {
        let size = state_region_size(3, 3);
        assert_eq!(size, std::mem::size_of::<StateHeader>() + 9 * 4);
    }
}
