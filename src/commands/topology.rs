// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use clap::Args;

use crate::{
    commands::{build_offline, Cli, Handle, HandledResult},
    placement,
};

#[derive(Args, Debug, Clone)]
pub struct TopologyArgs {
    /// Only print the pool's copyset count.
    #[arg(long)]
    copysets: bool,
}

pub fn topology(cli: &Cli, args: &TopologyArgs) -> HandledResult<()> {
    let (_, dcs) = build_offline(cli)?;
    let topology =
        placement::plan(&dcs).handle_err(|e| eprintln!("Could not plan placement: {e}"))?;

    if args.copysets {
        println!("{}", topology.copysets());
    } else {
        println!(
            "{}",
            topology
                .to_json()
                .handle_err(|e| eprintln!("Could not serialize placement: {e}"))?
        );
    }
    Ok(())
}
