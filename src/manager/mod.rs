// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    clap::Parser,
    log::{debug, error, info, warn},
};

use crate::{
    cluster::{ClusterKey, ClusterPhase, ClusterSpec, FINALIZER},
    commands::{Handle, HandledResult},
    error::Result,
    item::Registry,
    reconcile::{Action, Options, Reconciler},
    state::{ClusterStore, Event, Journal, Record},
    substrate::{LocalSubstrate, Poll, Substrate},
};

/// Zero-delay requeues are followed in the same pass up to this many times, so a new cluster goes
/// from unseen to running without waiting for the next scan.
const MAX_STEPS: usize = 8;

#[derive(Parser, Debug, Clone, Default)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Directory of cluster descriptor files (*.toml).
    #[arg(long)]
    pub cluster_dir: Option<String>,

    /// Directory for cluster status, the event journal and local substrate objects.
    #[arg(long)]
    pub state_dir: Option<String>,

    /// Seconds between scans of the cluster directory.
    #[arg(long)]
    pub interval: Option<u64>,

    /// Seconds to wait for a service or pool job before giving up on a pass.
    #[arg(long, default_value_t = 300)]
    pub ready_timeout: u64,

    /// Scan and reconcile once, then exit.
    #[arg(long)]
    pub once: bool,
}

impl Cli {
    pub fn cluster_dir(&self) -> String {
        self.cluster_dir
            .clone()
            .unwrap_or_else(crate::default_cluster_dir)
    }

    pub fn state_dir(&self) -> String {
        self.state_dir.clone().unwrap_or_else(crate::default_state_dir)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval.unwrap_or_else(crate::default_interval))
    }

    fn options(&self) -> Options {
        let interval = Duration::from_secs(3);
        let attempts = (self.ready_timeout / interval.as_secs()).max(1) as u32;
        Options {
            ready: Poll::new(interval, attempts),
            requeue_after: self.interval(),
            ..Options::default()
        }
    }
}

/// State shared by every reconcile task of the daemon.
pub struct MgrContext {
    pub args: Cli,
    pub registry: Registry,
    pub substrate: Arc<dyn Substrate>,
    pub store: ClusterStore,
    pub journal: Journal,
    options: Options,
    /// One lock per cluster key; holding it means a pass for that key is in flight.
    locks: Mutex<HashMap<ClusterKey, Arc<tokio::sync::Mutex<()>>>>,
    /// The last phase each cluster was seen in.
    phases: Mutex<HashMap<ClusterKey, ClusterPhase>>,
}

impl MgrContext {
    /// A context backed by the local substrate under the state directory.
    pub fn new(args: Cli) -> Result<Self> {
        let root = Path::new(&args.state_dir()).join("substrate");
        Self::with_substrate(args, Arc::new(LocalSubstrate::new(root)))
    }

    pub fn with_substrate(args: Cli, substrate: Arc<dyn Substrate>) -> Result<Self> {
        let state_dir = PathBuf::from(args.state_dir());
        Ok(MgrContext {
            registry: Registry::standard()?,
            substrate,
            store: ClusterStore::new(state_dir.join("clusters")),
            journal: Journal::open(state_dir.join("curveop.journal"))?,
            options: args.options(),
            locks: Mutex::new(HashMap::new()),
            phases: Mutex::new(HashMap::new()),
            args,
        })
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    fn lock_for(&self, key: &ClusterKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    /// The phase `key` was in at the end of its last pass.
    pub fn last_phase(&self, key: &ClusterKey) -> Option<ClusterPhase> {
        let phases = self.phases.lock().unwrap_or_else(|e| e.into_inner());
        phases.get(key).copied()
    }

    fn remember_phase(&self, key: &ClusterKey, phase: ClusterPhase) {
        let mut phases = self.phases.lock().unwrap_or_else(|e| e.into_inner());
        phases.insert(key.clone(), phase);
    }

    /// Drop everything kept for a cluster that needs no further passes.
    fn forget(&self, key: &ClusterKey) {
        self.phases
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        self.locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    fn journal(&self, event: Event, key: &ClusterKey, comment: Option<String>) {
        if let Err(e) = self.journal.write_record(&Record::new(event, key, comment)) {
            error!("could not write journal record for {key}: {e}");
        }
    }
}

/// Reconcile one cluster, following zero-delay requeues. Returns `None` without doing anything
/// if a pass for the same cluster is already in flight.
pub async fn reconcile_cluster(ctx: &MgrContext, spec: ClusterSpec) -> Result<Option<Action>> {
    let key = ClusterKey {
        namespace: spec.common().namespace.clone(),
        name: spec.common().name.clone(),
    };
    let lock = ctx.lock_for(&key);
    let Ok(_guard) = lock.try_lock_owned() else {
        debug!("{key}: a pass is already in flight");
        return Ok(None);
    };

    let mut cluster = ctx.store.load(spec)?;

    let reconciler = Reconciler::new(ctx.substrate.as_ref(), &ctx.registry, ctx.options);
    for _ in 0..MAX_STEPS {
        // Pick up a deletion requested while this pass was running.
        if !cluster.metadata.deletion_requested && ctx.store.deletion_requested(&key)? {
            cluster.metadata.deletion_requested = true;
        }
        let before = cluster.status.phase;
        let finalized = !cluster.metadata.finalizers.iter().any(|f| f == FINALIZER);

        let result = reconciler.reconcile(&mut cluster).await;
        ctx.store.save(&cluster)?;

        let after = cluster.status.phase;
        if after != before {
            ctx.journal(Event::Phase(after), &key, Some(format!("from '{before}'")));
        }
        ctx.remember_phase(&key, after);

        match result {
            Err(e) => {
                ctx.journal(Event::Failed, &key, Some(e.to_string()));
                return Err(e);
            }
            Ok(Action::Done) => {
                if !finalized {
                    ctx.journal(Event::Deleted, &key, None);
                }
                ctx.forget(&key);
                return Ok(Some(Action::Done));
            }
            Ok(Action::Requeue(after)) if after.is_zero() => continue,
            Ok(action) => return Ok(Some(action)),
        }
    }
    Ok(Some(Action::Requeue(Duration::ZERO)))
}

/// Every descriptor file in `dir`, in file name order.
pub fn scan_cluster_dir(dir: &str) -> Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    paths.sort();
    Ok(paths)
}

/// One scan: reconcile every cluster in the cluster directory, each on its own task.
pub async fn reconcile_all(ctx: &Arc<MgrContext>) -> Result<()> {
    let dir = ctx.args.cluster_dir();
    let mut handles = Vec::new();
    for path in scan_cluster_dir(&dir)? {
        let spec = match path.to_str().map(ClusterSpec::from_file) {
            Some(Ok(spec)) => spec,
            Some(Err(e)) => {
                warn!("skipping cluster descriptor {}: {e}", path.display());
                continue;
            }
            None => continue,
        };
        let ctx = Arc::clone(ctx);
        handles.push(tokio::spawn(async move {
            let name = spec.common().name.clone();
            (name, reconcile_cluster(&ctx, spec).await)
        }));
    }

    for handle in futures::future::join_all(handles).await {
        match handle {
            Ok((name, Ok(Some(action)))) => debug!("{name}: {action:?}"),
            Ok((_, Ok(None))) => {}
            Ok((name, Err(e))) => warn!("{name}: {e}"),
            Err(e) => error!("reconcile task panicked: {e}"),
        }
    }
    Ok(())
}

async fn manager_main(ctx: Arc<MgrContext>) -> Result<()> {
    info!(
        "watching {} every {:?}",
        ctx.args.cluster_dir(),
        ctx.args.interval()
    );
    loop {
        reconcile_all(&ctx).await?;
        if ctx.args.once {
            return Ok(());
        }
        tokio::time::sleep(ctx.args.interval()).await;
    }
}

/// Operator daemon -
///
/// Every interval, reads each cluster descriptor in the cluster directory, restores the cluster's
/// persisted status and drives it one or more steps through its lifecycle.
pub fn main(args: Cli) -> HandledResult<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .handle_err(|e| eprintln!("Could not launch operator runtime: {e}"))?;

    let ctx = Arc::new(
        MgrContext::new(args).handle_err(|e| eprintln!("Could not set up operator: {e}"))?,
    );

    rt.block_on(manager_main(ctx))
        .handle_err(|e| eprintln!("Operator stopped: {e}"))
}
