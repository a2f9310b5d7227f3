// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use clap::Args;

use crate::commands::{cluster_key, Cli, Handle, HandledResult};

#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    #[arg(long)]
    name: String,

    #[arg(long)]
    namespace: Option<String>,
}

/// Marks the cluster for deletion; the operator tears it down on its next pass.
pub fn delete(cli: &Cli, args: &DeleteArgs) -> HandledResult<()> {
    let key = cluster_key(&args.namespace, &args.name);
    cli.store()
        .request_deletion(&key)
        .handle_err(|e| eprintln!("Could not request deletion of {key}: {e}"))?;
    println!("Deletion of {key} requested.");
    Ok(())
}
