// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use clap::Args;

use crate::commands::{build_offline, handled_error, Cli, Handle, HandledResult};

#[derive(Args, Debug, Clone)]
pub struct RenderArgs {
    /// Instance id, as printed by `validate`.
    #[arg(long)]
    id: String,

    /// Config template file for the instance's role.
    #[arg(long)]
    template: String,
}

pub fn render(cli: &Cli, args: &RenderArgs) -> HandledResult<()> {
    let (_, dcs) = build_offline(cli)?;
    let Some(dc) = dcs.iter().find(|dc| dc.id() == args.id) else {
        eprintln!("No instance with id '{}'", args.id);
        return handled_error();
    };

    let template = std::fs::read_to_string(&args.template)
        .handle_err(|e| eprintln!("Could not read template '{}': {e}", args.template))?;
    let text = dc
        .render(&template)
        .handle_err(|e| eprintln!("Could not render '{}': {e}", args.template))?;

    print!("{text}");
    Ok(())
}
