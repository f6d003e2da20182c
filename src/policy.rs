//! The advisory move-selection interface (spec §4.4): `select(snapshot,
//! my_index, rng) -> Direction`. Move-selection heuristics beyond one
//! reference policy are explicitly out of scope (spec §1); this module
//! exists so [`crate::player::PlayerRuntime`] has something pluggable to
//! call and so the corpus's IPC choreography has an end-to-end example.

use rand::rngs::StdRng;

use crate::direction::Direction;
use crate::state::Snapshot;

pub mod greedy;

/// A pluggable move-selection policy. Implementations must return a
/// direction for which the snapshot's target cell is positive and
/// in-bounds when one exists; if none exists they may return any
/// placeholder -- the arbiter will count it as invalid regardless (spec
/// §4.4 step 3).
pub trait Policy {
    fn select(&mut self, snapshot: &Snapshot, my_index: usize, rng: &mut StdRng) -> Direction;
}
