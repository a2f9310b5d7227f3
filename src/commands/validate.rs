// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use clap::Args;

use crate::{
    commands::{build_offline, Cli, HandledResult},
    deploy::DeployConfig,
};

#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    /// Also print every resolved config item.
    #[arg(short, long)]
    verbose: bool,
}

pub fn validate(cli: &Cli, args: &ValidateArgs) -> HandledResult<()> {
    let (spec, dcs) = build_offline(cli)?;

    let common = spec.common();
    println!(
        "{} cluster {}/{}: {} nodes, {} instances",
        spec.kind(),
        common.namespace,
        common.name,
        common.nodes.len(),
        dcs.len()
    );
    for dc in &dcs {
        print_summary(dc, args.verbose);
    }
    Ok(())
}

fn print_summary(dc: &DeployConfig, verbose: bool) {
    let ports: Vec<String> = dc
        .ports()
        .iter()
        .map(|(name, port)| format!("{name}={port}"))
        .collect();
    println!(
        "  {} on {} ({}) ports [{}] data {} log {}",
        dc.id(),
        dc.host(),
        dc.host_ip(),
        ports.join(", "),
        dc.data_dir(),
        dc.log_dir()
    );
    if verbose {
        for (key, value) in dc.config() {
            println!("    {key} = {value}");
        }
    }
}
