//! `Viewer`: a read-only observer that renders the board and scoreboard on
//! every master→view handshake signal until the game ends (spec §4.5).

use std::io::Write;

use crate::error::CoreError;
use crate::logger::Logger;
use crate::shm::SharedRegion;
use crate::state::{owner_of, Snapshot, StateView};
use crate::sync::SyncBlock;
use crate::{STATE_SHM_NAME, SYNC_SHM_NAME};

pub struct Viewer {
    state_region: SharedRegion,
    sync_region: SharedRegion,
    state: StateView,
    sync: *const SyncBlock,
    log: Logger,
}

impl Viewer {
    /// Opens both regions read-only from the viewer's point of view: it
    /// never claims cells or touches player records, only the reader side
    /// of the protocol and the handshake semaphores (spec §4.5 step 1).
    pub fn open(width: u32, height: u32, log: Logger) -> Result<Self, CoreError> {
        let state_size = crate::state::state_region_size(width, height);
        let state_region = SharedRegion::open(STATE_SHM_NAME, state_size, false)?;
        let sync_region =
            SharedRegion::open(SYNC_SHM_NAME, crate::sync::sync_region_size(), false)?;

        let state = unsafe { StateView::from_raw(state_region.data()) };
        let sync = sync_region.data() as *const SyncBlock;

        Ok(Viewer {
            state_region,
            sync_region,
            state,
            sync,
            log,
        })
    }

    fn sync(&self) -> &'static SyncBlock {
        unsafe { &*self.sync }
    }

    /// Blocks on `master_to_view`, renders the current snapshot, signals
    /// `view_to_master`, and repeats until `game_over` (spec §4.5 steps
    /// 2-5).
    ///
    /// The viewer never joins the readers' protocol: the handshake pair
    /// itself is its synchronization. The arbiter holds the writer lock
    /// for the whole round trip between posting `master_to_view` and
    /// receiving `view_to_master` (spec §9 open question, resolved), so
    /// the board is guaranteed quiescent here without a separate lock.
    pub fn run(&mut self) -> Result<(), CoreError> {
        loop {
            self.sync().master_to_view.wait_retrying()?;

            let snapshot = Snapshot::capture(&self.state);

            render(&snapshot);

            self.sync().view_to_master.post()?;

            if snapshot.game_over {
                self.log.info("game over, viewer exiting");
                return Ok(());
            }
        }
    }

    pub fn close(self) -> Result<(), CoreError> {
        self.state_region.close()?;
        self.sync_region.close()?;
        Ok(())
    }
}

/// Plain-text render of the board and a scoreboard sorted by descending
/// score (spec §4.5 step 3), written to stdout.
fn render(snapshot: &Snapshot) {
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "\x1B[2J\x1B[H");

    for y in 0..snapshot.height as i32 {
        let mut line = String::with_capacity(snapshot.width as usize * 2);
        for x in 0..snapshot.width as i32 {
            let cell = snapshot.cell_at(x, y).unwrap_or(0);
            let glyph = match owner_of(cell) {
                Some(owner) => char::from(b'A' + (owner as u8 % 26)),
                None => char::from(b'0' + (cell.clamp(0, 9) as u8)),
            };
            line.push(glyph);
            line.push(' ');
        }
        let _ = writeln!(out, "{line}");
    }

    let mut ranked: Vec<(usize, &crate::state::PlayerRecordSnapshot)> =
        snapshot.players.iter().enumerate().collect();
    ranked.sort_by(|a, b| b.1.score.cmp(&a.1.score));

    let _ = writeln!(out, "---");
    for (index, p) in ranked {
        let status = if p.blocked { " (blocked)" } else { "" };
        let _ = writeln!(
            out,
            "player {index} ({}): score={} valid={} invalid={}{status}",
            p.name, p.score, p.valid_moves, p.invalid_moves
        );
    }
    let _ = out.flush();
}
