//! Thin CLI entry point for the optional spectator binary.

use anyhow::Context;
use clap::Parser;

use chompchamps::config::ViewerArgs;
use chompchamps::logger::Logger;
use chompchamps::viewer::Viewer;

fn main() -> anyhow::Result<()> {
    let args = ViewerArgs::parse();
    let log = Logger::new(args.verbose);

    let mut viewer = Viewer::open(args.width, args.height, log).context("opening shared regions")?;
    viewer.run().context("viewer render loop failed")?;
    viewer.close().context("closing shared regions")?;
    Ok(())
}
