//! `PlayerRuntime`: slot discovery, snapshot-under-readers-lock, policy
//! invocation, single-byte emission under the writer lock used purely as
//! an ordering device (spec §4.4). Policy-independent: every reference
//! policy plugs into the same choreography.

use std::io::Write;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::CoreError;
use crate::logger::Logger;
use crate::policy::Policy;
use crate::shm::SharedRegion;
use crate::state::{Snapshot, StateView};
use crate::sync::{ReaderGuard, SyncBlock, WriterGuard};
use crate::{STATE_SHM_NAME, SYNC_SHM_NAME};

const SLOT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);
const SLOT_DISCOVERY_POLL: Duration = Duration::from_millis(10);

pub enum TurnOutcome {
    Emitted(crate::direction::Direction),
    GameOver,
    Blocked,
    BrokenPipe,
}

pub struct PlayerRuntime<P: Policy> {
    my_index: usize,
    state_region: SharedRegion,
    sync_region: SharedRegion,
    state: StateView,
    sync: *const SyncBlock,
    rng: StdRng,
    policy: P,
    log: Logger,
}

impl<P: Policy> PlayerRuntime<P> {
    /// Opens both regions (state read-only, sync read-write: players never
    /// mutate the board themselves, only the synchronization primitives),
    /// discovers their slot by PID, and seeds the RNG (spec §4.4 steps 1-3).
    pub fn discover(width: u32, height: u32, policy: P, log: Logger) -> Result<Self, CoreError> {
        let state_size = crate::state::state_region_size(width, height);
        let state_region = SharedRegion::open(STATE_SHM_NAME, state_size, false)?;
        let sync_region =
            SharedRegion::open(SYNC_SHM_NAME, crate::sync::sync_region_size(), false)?;

        let state = unsafe { StateView::from_raw(state_region.data()) };
        let sync = sync_region.data() as *const SyncBlock;

        let my_pid = std::process::id() as i32;
        let started = Instant::now();
        let my_index = loop {
            // The PID field is only written by the arbiter during startup,
            // before any reader protocol traffic exists, so scanning it
            // without entering the readers' protocol is sound here even
            // though the spec flags this as formally unsynchronised in
            // some source variants (spec §9 open question) -- this
            // implementation enters the readers' protocol anyway, since
            // it is already used everywhere else and costs nothing extra.
            let found = {
                let guard = ReaderGuard::enter(unsafe { &*sync })?;
                let header = state.header();
                let idx = (0..header.player_count as usize).find(|&i| header.players[i].pid == my_pid);
                drop(guard);
                idx
            };
            if let Some(idx) = found {
                break idx;
            }
            let game_over = {
                let guard = ReaderGuard::enter(unsafe { &*sync })?;
                let over = state.header().game_over;
                drop(guard);
                over
            };
            if game_over || started.elapsed() >= SLOT_DISCOVERY_TIMEOUT {
                return Err(CoreError::ResourceUnavailable(
                    "could not locate own player slot before timeout".into(),
                ));
            }
            std::thread::sleep(SLOT_DISCOVERY_POLL);
        };

        let seed = (my_pid as u64)
            ^ SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0);
        let rng = StdRng::seed_from_u64(seed);

        log.info(format!("discovered slot {my_index} (pid {my_pid})"));

        Ok(PlayerRuntime {
            my_index,
            state_region,
            sync_region,
            state,
            sync,
            rng,
            policy,
            log,
        })
    }

    fn sync(&self) -> &'static SyncBlock {
        unsafe { &*self.sync }
    }

    /// Runs turns until the game ends, this player is blocked, or stdout
    /// breaks (spec §4.6 Player PerTurn state machine).
    pub fn run(&mut self) -> Result<(), CoreError> {
        loop {
            if self.state.header().game_over {
                self.log.verbose("game over, exiting");
                return Ok(());
            }
            match self.take_turn()? {
                TurnOutcome::Emitted(dir) => {
                    self.log.trace(format!("emitted {dir}"));
                }
                TurnOutcome::GameOver | TurnOutcome::Blocked => return Ok(()),
                TurnOutcome::BrokenPipe => {
                    self.log.info("stdout closed (EPIPE), exiting");
                    return Ok(());
                }
            }
        }
    }

    fn take_turn(&mut self) -> Result<TurnOutcome, CoreError> {
        self.sync().turn_token[self.my_index].wait_retrying()?;

        loop {
            if self.state.header().game_over {
                return Ok(TurnOutcome::GameOver);
            }

            let snapshot = {
                let guard = ReaderGuard::enter(self.sync())?;
                let snap = Snapshot::capture(&self.state);
                drop(guard);
                snap
            };

            if snapshot.players[self.my_index].blocked {
                return Ok(TurnOutcome::Blocked);
            }

            let dir = self.policy.select(&snapshot, self.my_index, &mut self.rng);

            let guard = WriterGuard::enter(self.sync())?;
            let still_fresh = {
                let me = &self.state.header().players[self.my_index];
                !me.blocked && me.x == snapshot.players[self.my_index].x && me.y == snapshot.players[self.my_index].y
            };
            if !still_fresh {
                // Snapshot went stale between capture and the ordering
                // barrier; re-snapshot without consuming another turn
                // token, since the arbiter only issues one after consuming
                // a byte we have not sent yet (spec §9 open question,
                // resolved: retry in place rather than re-wait on the
                // token, which would deadlock).
                drop(guard);
                continue;
            }

            match self.emit(dir.to_byte()) {
                Ok(()) => {
                    drop(guard);
                    return Ok(TurnOutcome::Emitted(dir));
                }
                Err(e) if is_broken_pipe(&e) => {
                    drop(guard);
                    return Ok(TurnOutcome::BrokenPipe);
                }
                Err(e) => {
                    drop(guard);
                    return Err(e);
                }
            }
        }
    }

    fn emit(&self, byte: u8) -> Result<(), CoreError> {
        std::io::stdout()
            .write_all(&[byte])
            .and_then(|_| std::io::stdout().flush())
            .map_err(CoreError::IoFailure)
    }

    /// Players never own region lifetime; they only unmap on exit (spec
    /// §3 "Lifecycle": "children only unmap").
    pub fn close(self) -> Result<(), CoreError> {
        self.state_region.close()?;
        self.sync_region.close()?;
        Ok(())
    }
}

fn is_broken_pipe(e: &CoreError) -> bool {
    matches!(e, CoreError::IoFailure(io) if io.kind() == std::io::ErrorKind::BrokenPipe)
}
