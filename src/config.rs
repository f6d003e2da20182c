//! CLI surfaces for all three binaries, in the teacher's `clap::Parser`
//! derive style (see `bin/server.rs`'s `Args`): short+long flags, explicit
//! defaults, a `long_about` describing the protocol.

use std::path::PathBuf;

use clap::Parser;

use crate::error::CoreError;
use crate::state::MAX_PLAYERS;

/// The arbiter: hosts the board, spawns players and an optional viewer,
/// and referees every move.
#[derive(Parser, Debug)]
#[command(
    name = "master",
    version,
    about = "ChompChamps arena arbiter",
    long_about = "Hosts a W x H reward board, spawns up to nine player processes \
                  and an optional viewer, and referees moves read from each \
                  player's stdout pipe."
)]
pub struct MasterArgs {
    /// Board width
    #[arg(short = 'w', long, default_value_t = 10)]
    pub width: u32,

    /// Board height
    #[arg(short = 'h', long, default_value_t = 10)]
    pub height: u32,

    /// Delay between scheduler ticks, in milliseconds (also the select()
    /// bound and the pacing sleep between an accepted move and the next
    /// turn token)
    #[arg(short = 'd', long, default_value_t = 200)]
    pub delay_ms: u64,

    /// Idle timeout in seconds: if no move is accepted for this long, the
    /// game ends
    #[arg(short = 't', long, default_value_t = 10)]
    pub timeout_sec: u64,

    /// RNG seed for the initial board; defaults to wall-clock time
    #[arg(short = 's', long)]
    pub seed: Option<u64>,

    /// Path to an optional viewer executable
    #[arg(short = 'v', long)]
    pub viewer: Option<PathBuf>,

    /// Path to a player executable (repeatable, 1..=9 times)
    #[arg(short = 'p', long = "player")]
    pub players: Vec<PathBuf>,

    /// Additional player executables, appended positionally until the
    /// roster reaches nine
    pub extra_players: Vec<PathBuf>,

    /// Increase output verbosity (-v verbose, -vv debug, -vvv trace)
    #[arg(short = 'V', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl MasterArgs {
    /// Full player roster: `-p` entries followed by positional extras,
    /// truncated to [`MAX_PLAYERS`] with a warning left for the caller to
    /// log (spec §6: "appended ... until nine players are registered").
    pub fn roster(&self) -> (Vec<PathBuf>, usize) {
        let mut all: Vec<PathBuf> = self.players.iter().cloned().collect();
        all.extend(self.extra_players.iter().cloned());
        let dropped = all.len().saturating_sub(MAX_PLAYERS);
        all.truncate(MAX_PLAYERS);
        (all, dropped)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.width == 0 || self.height == 0 {
            return Err(CoreError::InvalidArgument(
                "width and height must be positive".into(),
            ));
        }
        let requested = self.players.len() + self.extra_players.len();
        if requested > MAX_PLAYERS {
            return Err(CoreError::InvalidArgument(format!(
                "at most {MAX_PLAYERS} players are supported, got {requested}"
            )));
        }
        let (roster, _) = self.roster();
        if roster.is_empty() {
            return Err(CoreError::InvalidArgument(
                "at least one player must be registered".into(),
            ));
        }
        Ok(())
    }
}

/// A player process. The arbiter always invokes it with exactly two
/// positional arguments: decimal width and height (spec §6).
#[derive(Parser, Debug)]
#[command(
    name = "player",
    version,
    about = "ChompChamps reference player",
    long_about = "Discovers its slot by scanning PlayerRecord::pid, takes \
                  board snapshots under the readers' protocol, and emits one \
                  raw direction byte per turn."
)]
pub struct PlayerArgs {
    pub width: u32,
    pub height: u32,
}

/// The optional spectator process.
#[derive(Parser, Debug)]
#[command(
    name = "viewer",
    version,
    about = "ChompChamps spectator",
    long_about = "Redraws the board and scoreboard on every arbiter-to-view \
                  handshake until the game ends."
)]
pub struct ViewerArgs {
    pub width: u32,
    pub height: u32,

    /// Increase output verbosity (-v verbose, -vv debug, -vvv trace)
    #[arg(short = 'V', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// `PLAYER_TIME_MS` env var (spec §6): per-move decision budget for
/// time-budgeted policies, read by player binaries only.
pub fn player_time_ms() -> u64 {
    std::env::var("PLAYER_TIME_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(120)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roster_truncates_and_reports_drop() {
        let mut args = MasterArgs {
            width: 10,
            height: 10,
            delay_ms: 200,
            timeout_sec: 10,
            seed: None,
            viewer: None,
            players: (0..6).map(|i| PathBuf::from(format!("p{i}"))).collect(),
            extra_players: (0..6).map(|i| PathBuf::from(format!("q{i}"))).collect(),
            verbose: 0,
        };
        let (roster, dropped) = args.roster();
        assert_eq!(roster.len(), MAX_PLAYERS);
        assert_eq!(dropped, 3);
        args.players.clear();
        args.extra_players.clear();
        assert!(args.validate().is_err());
    }

    #[test]
    fn validate_rejects_ten_players() {
        let args = MasterArgs {
            width: 10,
            height: 10,
            delay_ms: 200,
            timeout_sec: 10,
            seed: None,
            viewer: None,
            players: (0..9).map(|i| PathBuf::from(format!("p{i}"))).collect(),
            extra_players: vec![PathBuf::from("p9")],
            verbose: 0,
        };
        assert!(args.validate().is_err());
    }

    #[test]
    fn validate_accepts_exactly_nine_players() {
        let args = MasterArgs {
            width: 10,
            height: 10,
            delay_ms: 200,
            timeout_sec: 10,
            seed: None,
            viewer: None,
            players: (0..9).map(|i| PathBuf::from(format!("p{i}"))).collect(),
            extra_players: Vec::new(),
            verbose: 0,
        };
        assert!(args.validate().is_ok());
    }
}
