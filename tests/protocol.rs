//! Integration tests exercising the shared-memory protocol end to end
//! within a single process: region create/open, reader/writer exclusion,
//! and move validation against a real `StateView`.

use nix::sys::stat::Mode;

use chompchamps::direction::Direction;
use chompchamps::shm::SharedRegion;
use chompchamps::state::{self, StateView};
use chompchamps::sync::{ReaderGuard, SyncBlock, WriterGuard};

fn region_names(tag: &str) -> (String, String) {
    let pid = std::process::id();
    (
        format!("/chompchamps_it_state_{tag}_{pid}"),
        format!("/chompchamps_it_sync_{tag}_{pid}"),
    )
}

#[test]
fn full_setup_init_and_teardown_round_trips() {
    let (state_name, sync_name) = region_names("setup");
    let mode = Mode::S_IRUSR | Mode::S_IWUSR;

    let state_region =
        SharedRegion::create(&state_name, state::state_region_size(4, 4), mode, false, 0)
            .expect("create state region");
    let sync_region =
        SharedRegion::create(&sync_name, chompchamps::sync::sync_region_size(), mode, false, 0)
            .expect("create sync region");

    unsafe {
        SyncBlock::init_in_place(sync_region.data() as *mut SyncBlock).expect("init sync block");
    }

    let mut state = unsafe { StateView::from_raw(state_region.data()) };
    state.init(4, 4, 2, 42);
    state.place_initial(0, 0, 0);
    state.place_initial(1, 3, 3);

    assert_eq!(state.header().width, 4);
    assert_eq!(state.header().player_count, 2);
    assert_eq!(state.board()[state.index(0, 0).unwrap()], state::claimed_value(0));
    assert_eq!(state.board()[state.index(3, 3).unwrap()], state::claimed_value(1));

    let sync = unsafe { &*(sync_region.data() as *const SyncBlock) };
    {
        let _guard = WriterGuard::enter(sync).expect("writer enter");
    }

    unsafe {
        sync.destroy_in_place();
    }
    state_region.destroy().expect("destroy state region");
    sync_region.destroy().expect("destroy sync region");
}

#[test]
fn readers_run_concurrently_and_exclude_the_writer() {
    let (state_name, sync_name) = region_names("rw");
    let mode = Mode::S_IRUSR | Mode::S_IWUSR;

    let state_region =
        SharedRegion::create(&state_name, state::state_region_size(2, 2), mode, false, 0)
            .expect("create state region");
    let sync_region =
        SharedRegion::create(&sync_name, chompchamps::sync::sync_region_size(), mode, false, 0)
            .expect("create sync region");
    unsafe {
        SyncBlock::init_in_place(sync_region.data() as *mut SyncBlock).expect("init sync block");
    }
    let sync = unsafe { &*(sync_region.data() as *const SyncBlock) };

    let r1 = ReaderGuard::enter(sync).expect("reader 1");
    let r2 = ReaderGuard::enter(sync).expect("reader 2");
    assert_eq!(sync.reader_count(), 2);
    drop(r1);
    drop(r2);
    assert_eq!(sync.reader_count(), 0);

    {
        let _w = WriterGuard::enter(sync).expect("writer enter");
        assert_eq!(sync.reader_count(), 0);
    }

    unsafe {
        sync.destroy_in_place();
    }
    state_region.destroy().expect("destroy state region");
    sync_region.destroy().expect("destroy sync region");
}

#[test]
fn move_onto_positive_cell_claims_it_and_updates_score() {
    let (state_name, _sync_name) = region_names("move");
    let mode = Mode::S_IRUSR | Mode::S_IWUSR;

    let state_region =
        SharedRegion::create(&state_name, state::state_region_size(3, 3), mode, false, 0)
            .expect("create state region");
    let mut state = unsafe { StateView::from_raw(state_region.data()) };
    state.init(3, 3, 1, 7);
    state.place_initial(0, 1, 1);
    let initial_score = state.header().players[0].score;
    assert!(initial_score > 0, "initial placement must credit the consumed cell's reward");

    let reward = state.board()[state.index(1, 0).unwrap()];
    assert!(reward > 0, "fixture expects an unclaimed north neighbour");

    let (tx, ty, idx) = state.target_of(1, 1, Direction::Up).expect("in bounds");
    assert_eq!((tx, ty), (1, 0));
    state.board_mut()[idx] = state::claimed_value(0);
    state.header_mut().players[0].score += reward as i64;
    state.header_mut().players[0].x = tx;
    state.header_mut().players[0].y = ty;

    assert_eq!(state.header().players[0].score, initial_score + reward as i64);
    assert_eq!(state::owner_of(state.board()[idx]), Some(0));

    state_region.destroy().expect("destroy state region");
}
