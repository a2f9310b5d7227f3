// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use clap::Args;

use crate::{
    cluster::ConditionStatus,
    commands::{cluster_key, handled_error, Cli, Handle, HandledResult},
    state::PersistedResource,
};

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long)]
    name: String,

    #[arg(long)]
    namespace: Option<String>,
}

pub fn status(cli: &Cli, args: &StatusArgs) -> HandledResult<()> {
    let key = cluster_key(&args.namespace, &args.name);
    let persisted = cli
        .store()
        .read(&key)
        .handle_err(|e| eprintln!("Could not read status of {key}: {e}"))?;
    let Some(persisted) = persisted else {
        eprintln!("Cluster {key} has never been reconciled.");
        return handled_error();
    };

    print_status(&key.to_string(), &persisted);
    Ok(())
}

fn print_status(key: &str, persisted: &PersistedResource) {
    let status = &persisted.status;
    let phase = match status.phase.to_string() {
        p if p.is_empty() => "<unseen>".to_string(),
        p => p,
    };
    print!("{key}: {phase}");
    if persisted.metadata.deletion_requested {
        print!(" (deletion requested)");
    }
    println!();

    for c in &status.conditions {
        let mark = match c.status {
            ConditionStatus::True => "+",
            ConditionStatus::False => "-",
            ConditionStatus::Unknown => "?",
        };
        println!(
            "  {mark} {:?}: {} {} [{}]",
            c.kind,
            c.reason,
            c.message,
            c.last_transition_time.format("%Y-%m-%d %H:%M:%S")
        );
    }

    for m in &status.last_mod_context_set {
        print!("  pending {}: [", m.role);
        for (i, (key, value)) in m.changes.iter().enumerate() {
            if i > 0 {
                print!(", ");
            }
            match value {
                Some(value) => print!("{key}: {value}"),
                None => print!("{key}: <removed>"),
            }
        }
        println!("]");
    }
}
