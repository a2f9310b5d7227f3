// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use clap::Parser;

use curveop_lib::commands::{self, Cli};

/// The curveop binary runs admin commands like "validate", "topology", "status", etc.
fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("CURVEOP_LOG", "warn"))
        .init();

    let args = Cli::parse();

    if commands::main(&args).is_err() {
        std::process::exit(1);
    }
}
