//! The one reference policy shipped with the crate: greedy-with-liberties,
//! matching the corpus's description of the light policy used to model
//! opponents inside the out-of-scope Monte-Carlo variants (spec §4.4):
//! "a light greedy+random policy preferring reward + liberties".

use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::direction::Direction;
use crate::policy::Policy;
use crate::state::Snapshot;

#[derive(Default)]
pub struct Greedy;

impl Greedy {
    /// Number of unclaimed neighbours around `(x, y)` -- the tie-break
    /// "liberties" count.
    fn liberties(snapshot: &Snapshot, x: i32, y: i32) -> usize {
        Direction::ALL
            .iter()
            .filter(|&&d| {
                let (dx, dy) = d.delta();
                snapshot.cell_at(x + dx, y + dy).is_some_and(|c| c > 0)
            })
            .count()
    }
}

impl Policy for Greedy {
    fn select(&mut self, snapshot: &Snapshot, my_index: usize, rng: &mut StdRng) -> Direction {
        let me = &snapshot.players[my_index];

        let mut candidates: Vec<(Direction, i32, usize)> = Direction::ALL
            .iter()
            .filter_map(|&d| {
                let (dx, dy) = d.delta();
                let (tx, ty) = (me.x + dx, me.y + dy);
                snapshot
                    .cell_at(tx, ty)
                    .filter(|&c| c > 0)
                    .map(|reward| (d, reward, Self::liberties(snapshot, tx, ty)))
            })
            .collect();

        if candidates.is_empty() {
            // No legal move exists; any byte is counted invalid by the
            // arbiter regardless of which one we pick (spec §4.4 step 3).
            return Direction::Up;
        }

        candidates.sort_by(|a, b| b.1.cmp(&a.1).then(b.2.cmp(&a.2)));
        let best_reward = candidates[0].1;
        let best_liberties = candidates[0].2;
        let top: Vec<Direction> = candidates
            .iter()
            .filter(|c| c.1 == best_reward && c.2 == best_liberties)
            .map(|c| c.0)
            .collect();

        *top.choose(rng).expect("top is non-empty")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::PlayerRecordSnapshot;
    use rand::SeedableRng;

    fn snapshot_3x3() -> Snapshot {
        // Player 0 sits at (1,1), all 8 neighbours are unclaimed rewards.
        let board = vec![1, 2, 1, 2, -1, 2, 1, 2, 1];
        Snapshot {
            width: 3,
            height: 3,
            player_count: 1,
            game_over: false,
            board,
            players: vec![PlayerRecordSnapshot {
                name: "p0".to_string(),
                score: 0,
                valid_moves: 0,
                invalid_moves: 0,
                x: 1,
                y: 1,
                pid: 1,
                blocked: false,
            }],
        }
    }

    #[test]
    fn prefers_highest_reward_neighbour() {
        let snapshot = snapshot_3x3();
        let mut rng = StdRng::seed_from_u64(1);
        let mut policy = Greedy;
        let dir = policy.select(&snapshot, 0, &mut rng);
        let (dx, dy) = dir.delta();
        let chosen_reward = snapshot.cell_at(1 + dx, 1 + dy).unwrap();
        assert_eq!(chosen_reward, 2);
    }

    #[test]
    fn falls_back_when_no_move_is_legal() {
        let mut snapshot = snapshot_3x3();
        for c in snapshot.board.iter_mut() {
            if *c > 0 {
                *c = -1;
            }
        }
        let mut rng = StdRng::seed_from_u64(1);
        let mut policy = Greedy;
        // Must not panic even with zero legal candidates.
        let _ = policy.select(&snapshot, 0, &mut rng);
    }
}
