// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

pub mod delete;
pub mod render;
pub mod status;
pub mod topology;
pub mod validate;

use {
    delete::DeleteArgs, render::RenderArgs, status::StatusArgs, topology::TopologyArgs,
    validate::ValidateArgs,
};

use clap::{Parser, Subcommand};

use crate::{
    cluster::{ClusterKey, ClusterSpec},
    config::Config,
    deploy::{Builder, DeployConfig},
    item::Registry,
    substrate::NodeInventory,
};

/// A `HandledError` represents an error that has already been handled. When you call a function
/// that returns a `HandledError` or `HandledResult`, you don't need to do anything with that error,
/// other than just be aware that it happened, and return it on to your caller.
///
/// `main()` has a special responsibility: since its "caller" is, in a certain sense, the operating
/// system, `main()` must return a nonzero exit status when it gets a `HandledError`.
///
/// The primary way to construct a `HandledError` is with the `handle_err()` function, which turns a
/// generic error into a `HandledError`, and also runs some caller-provided code to handle the
/// error. That provided code would normally do something like report the error to stderr.
#[derive(Debug, PartialEq)]
pub struct HandledError {}

pub type HandledResult<T> = std::result::Result<T, HandledError>;

pub fn handled_error<T>() -> HandledResult<T> {
    HandledResult::Err(HandledError {})
}

pub trait Handle<T, F> {
    fn handle_err(self, handler: F) -> HandledResult<T>;
}

impl<T, E, F: FnOnce(E)> Handle<T, F> for std::result::Result<T, E> {
    /// Handle an error by running the provided `handler` code, giving it the error.
    ///
    /// Then, return a `HandledResult`, so that transitive callers of this function know that they
    /// do not need to do anything further to handle the error.
    fn handle_err(self, handler: F) -> HandledResult<T> {
        self.map_err(|e| {
            handler(e);
            HandledError {}
        })
    }
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Cluster descriptor file.
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Operator state directory.
    #[arg(long, global = true)]
    pub state_dir: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    fn state_dir(&self) -> String {
        self.state_dir.clone().unwrap_or_else(crate::default_state_dir)
    }

    fn store(&self) -> crate::state::ClusterStore {
        crate::state::ClusterStore::new(std::path::Path::new(&self.state_dir()).join("clusters"))
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build every instance of a cluster and print a summary.
    Validate(ValidateArgs),
    /// Print the placement document of a cluster.
    Topology(TopologyArgs),
    /// Render a role config template for one instance.
    Render(RenderArgs),
    /// Show a cluster's phase, conditions and pending changes.
    Status(StatusArgs),
    /// Request deletion of a cluster.
    Delete(DeleteArgs),
}

/// Parse the descriptor named by `--config`.
fn load_config(cli: &Cli) -> HandledResult<Config> {
    let Some(path) = &cli.config else {
        eprintln!("Must specify config file using --config.");
        return handled_error();
    };
    Config::from_file(path).handle_err(|e| eprintln!("Could not read config '{path}': {e}"))
}

/// Build every deploy config of the cluster in `--config`, using the addresses written in the
/// descriptor as the node inventory.
fn build_offline(cli: &Cli) -> HandledResult<(ClusterSpec, Vec<DeployConfig>)> {
    let conf = load_config(cli)?;
    let spec =
        ClusterSpec::from_config(&conf).handle_err(|e| eprintln!("Invalid cluster: {e}"))?;
    let registry = Registry::standard().handle_err(|e| eprintln!("{e}"))?;
    let inventory = NodeInventory::from_config(&conf);
    let dcs = Builder::new(&registry, &inventory)
        .build(spec.descriptor())
        .handle_err(|e| eprintln!("Could not build cluster '{}': {e}", conf.name))?;
    Ok((spec, dcs))
}

fn cluster_key(namespace: &Option<String>, name: &str) -> ClusterKey {
    ClusterKey {
        namespace: namespace.clone().unwrap_or_else(|| "curve".to_string()),
        name: name.to_string(),
    }
}

pub fn main(cli: &Cli) -> HandledResult<()> {
    match &cli.command {
        Commands::Validate(args) => validate::validate(cli, args),
        Commands::Topology(args) => topology::topology(cli, args),
        Commands::Render(args) => render::render(cli, args),
        Commands::Status(args) => status::status(cli, args),
        Commands::Delete(args) => delete::delete(cli, args),
    }
}
