//! The Arbiter: the single writer, the event-driven scheduler, and the
//! only process that destroys the shared regions (spec §2, §4.3).

use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use nix::sys::stat::Mode;
use nix::unistd::Pid;

use crate::config::MasterArgs;
use crate::direction::Direction;
use crate::error::CoreError;
use crate::logger::Logger;
use crate::proc::{self, ChildProcess, ExitSummary, PlayerPipes};
use crate::shm::SharedRegion;
use crate::state::{self, StateView, MAX_PLAYERS};
use crate::sync::{SyncBlock, WriterGuard};
use crate::{STATE_SHM_NAME, SYNC_SHM_NAME};

/// The nine canonical start positions: corners, mid-edges, then centre
/// (spec §4.3 step 1). Verified against spec §8's worked examples (e.g. a
/// second player on a 3x3 board starts at `(w-1, 0)`).
fn start_position(slot: usize, width: u32, height: u32) -> (i32, i32) {
    let (w, h) = (width as i32, height as i32);
    let (mx, my) = (w / 2, h / 2);
    match slot {
        0 => (0, 0),
        1 => (w - 1, 0),
        2 => (0, h - 1),
        3 => (w - 1, h - 1),
        4 => (mx, 0),
        5 => (mx, h - 1),
        6 => (0, my),
        7 => (w - 1, my),
        8 => (mx, my),
        _ => unreachable!("at most MAX_PLAYERS slots"),
    }
}

enum MasterEvent<'a> {
    Listening { width: u32, height: u32, players: usize },
    ViewerSpawned { pid: Pid },
    PlayerSpawned { index: usize, pid: Pid, path: &'a Path },
    InvalidByte { index: usize, byte: u8 },
    InvalidMove { index: usize, dir: Direction },
    ValidMove { index: usize, dir: Direction, reward: i32 },
    PlayerBlocked { index: usize },
    GameOver { reason: &'static str },
}

impl fmt::Display for MasterEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MasterEvent::Listening { width, height, players } => {
                write!(f, "board {width}x{height}, {players} player(s) registered")
            }
            MasterEvent::ViewerSpawned { pid } => write!(f, "viewer spawned (pid {pid})"),
            MasterEvent::PlayerSpawned { index, pid, path } => {
                write!(f, "player {index} spawned (pid {pid}, {})", path.display())
            }
            MasterEvent::InvalidByte { index, byte } => {
                write!(f, "player {index} sent invalid byte {byte}")
            }
            MasterEvent::InvalidMove { index, dir } => {
                write!(f, "player {index} attempted illegal move {dir}")
            }
            MasterEvent::ValidMove { index, dir, reward } => {
                write!(f, "player {index} moved {dir} for +{reward}")
            }
            MasterEvent::PlayerBlocked { index } => write!(f, "player {index} blocked (EOF)"),
            MasterEvent::GameOver { reason } => write!(f, "game over: {reason}"),
        }
    }
}

struct PlayerProc {
    pid: Pid,
    path: std::path::PathBuf,
}

pub struct Arbiter {
    args: MasterArgs,
    log: Logger,
    state_region: SharedRegion,
    sync_region: SharedRegion,
    state: StateView,
    sync: *const SyncBlock,
    pipes: PlayerPipes,
    players: Vec<PlayerProc>,
    viewer: Option<Pid>,
    has_viewer: bool,
    last_valid_move: Instant,
}

impl Arbiter {
    pub fn start(args: MasterArgs, log: Logger) -> Result<Self, CoreError> {
        args.validate()?;
        let (roster, dropped) = args.roster();
        if dropped > 0 {
            log.warn(format!(
                "{dropped} extra player path(s) dropped, only {MAX_PLAYERS} slots exist"
            ));
        }

        let seed = args.seed.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0)
        });

        let mode = Mode::S_IRUSR | Mode::S_IWUSR;
        let state_region = SharedRegion::create(
            STATE_SHM_NAME,
            state::state_region_size(args.width, args.height),
            mode,
            false,
            0,
        )?;
        let sync_region =
            SharedRegion::create(SYNC_SHM_NAME, crate::sync::sync_region_size(), mode, false, 0)?;

        unsafe {
            SyncBlock::init_in_place(sync_region.data() as *mut SyncBlock)?;
        }
        let sync = sync_region.data() as *const SyncBlock;

        let mut state = unsafe { StateView::from_raw(state_region.data()) };
        state.init(args.width, args.height, roster.len() as u32, seed);

        for (i, _) in roster.iter().enumerate() {
            let (x, y) = start_position(i, args.width, args.height);
            state.place_initial(i, x, y);
        }

        log.info(MasterEvent::Listening {
            width: args.width,
            height: args.height,
            players: roster.len(),
        });

        let mut arbiter = Arbiter {
            args,
            log,
            state_region,
            sync_region,
            state,
            sync,
            pipes: PlayerPipes::new(Vec::new()),
            players: Vec::new(),
            viewer: None,
            has_viewer: false,
            last_valid_move: Instant::now(),
        };

        if let Err(e) = arbiter.finish_setup(&roster) {
            arbiter.shutdown_best_effort();
            return Err(e);
        }

        Ok(arbiter)
    }

    /// The fallible tail of setup (spawning children, issuing the first
    /// turn tokens), split out so [`Arbiter::start`] can run the cleanup
    /// path on any failure here (spec §7: "setup errors ... abort
    /// immediately after running the cleanup path").
    fn finish_setup(&mut self, roster: &[std::path::PathBuf]) -> Result<(), CoreError> {
        if let Some(viewer_path) = self.args.viewer.clone() {
            let pid = proc::spawn_viewer(&viewer_path, self.args.width, self.args.height)?;
            self.log.info(MasterEvent::ViewerSpawned { pid });
            self.viewer = Some(pid);
            self.has_viewer = true;
            self.view_handshake_blocking()?;
        }

        let mut read_fds = Vec::with_capacity(roster.len());
        for (i, path) in roster.iter().enumerate() {
            let ChildProcess { pid, read_fd } =
                proc::spawn_player(path, self.args.width, self.args.height)?;
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("player{i}"));
            let header = self.state.header_mut();
            header.players[i].pid = pid.as_raw();
            header.players[i].set_name(&name);
            self.log.info(MasterEvent::PlayerSpawned { index: i, pid, path });
            self.players.push(PlayerProc {
                pid,
                path: path.clone(),
            });
            read_fds.push(read_fd);
        }
        self.pipes = PlayerPipes::new(read_fds);

        for i in 0..self.players.len() {
            self.sync().turn_token[i].post()?;
        }

        Ok(())
    }

    /// The lifetime here is tied to the shared mapping (valid for the
    /// whole run, not to `&self`), so holding a [`WriterGuard`] borrowed
    /// from this never collides with unrelated `&mut self` field access
    /// elsewhere in the arbiter.
    fn sync(&self) -> &'static SyncBlock {
        unsafe { &*self.sync }
    }

    fn view_handshake_blocking(&self) -> Result<(), CoreError> {
        self.sync().master_to_view.post()?;
        self.sync().view_to_master.wait_retrying()
    }

    fn view_handshake_bounded(&self, timeout: Duration) -> Result<(), CoreError> {
        self.sync().master_to_view.post()?;
        self.sync().view_to_master.wait_timeout(timeout)?;
        Ok(())
    }

    fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Runs the event-driven scheduler to completion and returns the
    /// winner index, or `None` for a tie (spec §4.3).
    pub fn run(&mut self) -> Result<Option<usize>, CoreError> {
        let delay = Duration::from_millis(self.args.delay_ms);
        let timeout = Duration::from_secs(self.args.timeout_sec);

        loop {
            let ready = self.pipes.wait_readable(delay)?;

            for index in ready {
                self.handle_pipe_event(index, delay)?;
            }

            if let Some(reason) = self.check_termination(timeout) {
                self.log.info(MasterEvent::GameOver { reason: reason.label() });
                return self.finish(reason);
            }
        }
    }

    fn handle_pipe_event(&mut self, index: usize, delay: Duration) -> Result<(), CoreError> {
        let byte = match self.pipes.read_one_byte(index)? {
            Some(b) => b,
            None => {
                self.pipes.mark_blocked(index);
                let guard = WriterGuard::enter(self.sync())?;
                self.state.header_mut().players[index].blocked = true;
                drop(guard);
                self.log.info(MasterEvent::PlayerBlocked { index });
                return Ok(());
            }
        };

        // The writer lock stays held across the move mutation, the view
        // handshake, and the pacing sleep (spec §9 open question,
        // resolved: intentional back-pressure) -- the viewer is not a
        // reader-protocol participant, it trusts the handshake itself as
        // its synchronization and reads raw while the arbiter guarantees
        // quiescence for the duration of the round trip.
        let guard = WriterGuard::enter(self.sync())?;
        let outcome = self.apply_move_locked(index, byte);

        if self.has_viewer {
            self.view_handshake_blocking()?;
        }
        std::thread::sleep(delay);
        drop(guard);

        if !self.state.header().players[index].blocked {
            self.sync().turn_token[index].post()?;
        }

        match outcome {
            MoveOutcome::Valid(dir, reward) => {
                self.log.verbose(MasterEvent::ValidMove { index, dir, reward });
            }
            MoveOutcome::InvalidDirection(dir) => {
                self.log.verbose(MasterEvent::InvalidMove { index, dir });
            }
            MoveOutcome::InvalidByte => {
                self.log.verbose(MasterEvent::InvalidByte { index, byte });
            }
        }
        Ok(())
    }

    /// Applies one player's byte to the board. Caller must already hold the
    /// writer lock (spec §4.3's move-validation sequence); this function
    /// never acquires or releases it, so the caller controls exactly how
    /// long the exclusive window lasts (see [`Arbiter::handle_pipe_event`]).
    fn apply_move_locked(&mut self, index: usize, byte: u8) -> MoveOutcome {
        if self.state.header().game_over {
            return MoveOutcome::InvalidByte;
        }

        let Some(dir) = Direction::from_byte(byte) else {
            self.state.header_mut().players[index].invalid_moves += 1;
            return MoveOutcome::InvalidByte;
        };

        let (x, y) = {
            let p = &self.state.header().players[index];
            (p.x, p.y)
        };

        let target = self.state.target_of(x, y, dir);
        let target = match target {
            Some((_, _, idx)) if self.state.board()[idx] > 0 => Some((idx, self.state.board()[idx])),
            _ => None,
        };

        match target {
            None => {
                self.state.header_mut().players[index].invalid_moves += 1;
                MoveOutcome::InvalidDirection(dir)
            }
            Some((idx, reward)) => {
                let (tx, ty, _) = self.state.target_of(x, y, dir).unwrap();
                self.state.board_mut()[idx] = state::claimed_value(index);
                let header = self.state.header_mut();
                let p = &mut header.players[index];
                p.score += reward as i64;
                p.x = tx;
                p.y = ty;
                p.valid_moves += 1;
                self.last_valid_move = Instant::now();
                MoveOutcome::Valid(dir, reward)
            }
        }
    }

    fn check_termination(&mut self, timeout: Duration) -> Option<TerminationReason> {
        let guard = WriterGuard::enter(self.sync()).ok()?;
        let snapshot = state::Snapshot::capture(&self.state);
        let reason = if snapshot.no_player_has_a_legal_move() {
            Some(TerminationReason::NoLegalMoves)
        } else if self.last_valid_move.elapsed() >= timeout {
            Some(TerminationReason::IdleTimeout)
        } else if snapshot.all_blocked() {
            Some(TerminationReason::AllBlocked)
        } else {
            None
        };
        if reason.is_some() {
            self.state.header_mut().game_over = true;
        }
        drop(guard);
        reason
    }

    fn finish(&mut self, _reason: TerminationReason) -> Result<Option<usize>, CoreError> {
        if self.has_viewer {
            // Bounded: a dead viewer must never hang the arbiter's exit
            // (spec §9 open question, resolved).
            let _ = self.view_handshake_bounded(Duration::from_millis(self.args.delay_ms.max(200)));
        }

        for player in &self.players {
            if let Ok(summary) = proc::reap(player.pid) {
                self.report_player(player, summary);
            }
        }
        if let Some(pid) = self.viewer {
            let _ = proc::reap(pid);
        }

        let winner = self.compute_winner();
        self.print_result(winner);
        Ok(winner)
    }

    fn report_player(&self, player: &PlayerProc, summary: ExitSummary) {
        println!("{} ({}): {summary}", player.path.display(), player.pid);
    }

    fn compute_winner(&self) -> Option<usize> {
        let header = self.state.header();
        let n = self.player_count();
        if n == 0 {
            return None;
        }
        let mut best = 0usize;
        for i in 1..n {
            let a = &header.players[i];
            let b = &header.players[best];
            let better = (a.score, std::cmp::Reverse(a.valid_moves), std::cmp::Reverse(a.invalid_moves))
                > (b.score, std::cmp::Reverse(b.valid_moves), std::cmp::Reverse(b.invalid_moves));
            if better {
                best = i;
            }
        }
        let is_tie = (0..n).any(|i| {
            i != best
                && header.players[i].score == header.players[best].score
                && header.players[i].valid_moves == header.players[best].valid_moves
                && header.players[i].invalid_moves == header.players[best].invalid_moves
        });
        if is_tie {
            None
        } else {
            Some(best)
        }
    }

    fn print_result(&self, winner: Option<usize>) {
        let header = self.state.header();
        for i in 0..self.player_count() {
            let p = &header.players[i];
            println!(
                "player {i} ({}): score={} valid={} invalid={}",
                p.name(), p.score, p.valid_moves, p.invalid_moves
            );
        }
        match winner {
            Some(i) => println!("winner: player {i}"),
            None => println!("tie"),
        }
    }
}

impl Arbiter {
    /// Destroy both named regions (semaphore teardown, unmap, unlink) --
    /// the arbiter is the sole owner and the only process allowed to do
    /// this (spec §3 "Lifecycle").
    pub fn shutdown(self) -> Result<(), CoreError> {
        unsafe {
            self.sync().destroy_in_place();
        }
        self.state_region.destroy()?;
        self.sync_region.destroy()?;
        Ok(())
    }

    /// Best-effort cleanup used on a setup failure; errors are logged, not
    /// propagated, since we are already unwinding to report an earlier
    /// error.
    fn shutdown_best_effort(self) {
        let log_target = STATE_SHM_NAME;
        if let Err(e) = self.shutdown() {
            eprintln!("warning: cleanup after setup failure ({log_target}) incomplete: {e}");
        }
    }
}

#[derive(Clone, Copy)]
enum TerminationReason {
    NoLegalMoves,
    IdleTimeout,
    AllBlocked,
}

impl TerminationReason {
    fn label(self) -> &'static str {
        match self {
            TerminationReason::NoLegalMoves => "no non-blocked player has a legal move",
            TerminationReason::IdleTimeout => "idle timeout",
            TerminationReason::AllBlocked => "all players blocked",
        }
    }
}

enum MoveOutcome {
    Valid(Direction, i32),
    InvalidDirection(Direction),
    InvalidByte,
}
