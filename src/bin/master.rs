//! Thin CLI entry point for the arbiter binary.

use anyhow::Context;
use clap::Parser;

use chompchamps::arbiter::Arbiter;
use chompchamps::config::MasterArgs;
use chompchamps::logger::Logger;

fn main() -> anyhow::Result<()> {
    let args = MasterArgs::parse();
    let log = Logger::new(args.verbose);

    let mut arbiter = Arbiter::start(args, log).context("starting arbiter")?;
    let result = arbiter.run();

    match result {
        Ok(_winner) => {
            arbiter.shutdown().context("tearing down shared regions")?;
            Ok(())
        }
        Err(e) => {
            let _ = arbiter.shutdown();
            Err(e).context("arbiter run loop failed")
        }
    }
}
