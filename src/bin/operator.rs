// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use clap::Parser;

use curveop_lib::manager;

/// The curveop_operator binary runs the reconcile daemon.
fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("CURVEOP_LOG", "warn"))
        .init();

    let args = manager::Cli::parse();

    if manager::main(args).is_err() {
        std::process::exit(1);
    }
}
