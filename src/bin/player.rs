//! Thin CLI entry point for the reference player binary. Invoked by the
//! arbiter with exactly two positional arguments, decimal width and height
//! (spec §6); all diagnostics go to stderr so stdout stays pure protocol
//! bytes.

use anyhow::Context;
use clap::Parser;

use chompchamps::config::{player_time_ms, PlayerArgs};
use chompchamps::logger::Logger;
use chompchamps::player::PlayerRuntime;
use chompchamps::policy::greedy::Greedy;

fn main() -> anyhow::Result<()> {
    let args = PlayerArgs::parse();
    let log = Logger::new(0);

    log.debug(format!("per-move budget: {}ms", player_time_ms()));

    let mut runtime = PlayerRuntime::discover(args.width, args.height, Greedy, log)
        .context("discovering player slot")?;
    runtime.run().context("player turn loop failed")?;
    runtime.close().context("closing shared regions")?;
    Ok(())
}
