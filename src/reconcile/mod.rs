// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! The cluster lifecycle state machine.
//!
//! One call to `Reconciler::reconcile` is one pass: it looks at the cluster's current phase, does
//! the work of that phase, and advances the phase if the work succeeded. A failed pass leaves
//! the phase where it was and records a `Failed` condition; the caller re-queues it.
//!
//! ```text
//! "" -> Creating -> Running -> { Updating | Upgrading | Scaling } -> Running
//!                     any phase, once deletion is requested -> Deleting
//! ```

pub mod cleanup;
pub mod drift;
pub mod service;

use std::time::Duration;

use log::{debug, info, warn};

use crate::{
    cluster::{ClusterPhase, ConditionStatus, ConditionType, CurveCluster, Role, FINALIZER},
    error::Result,
    item::Registry,
    substrate::{apply_config, Poll, Substrate},
};

use drift::{Baseline, Drift};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Bounds the wait for services to become ready and for pool jobs to complete.
    pub ready: Poll,
    /// Bounds the wait for cleanup jobs.
    pub cleanup: Poll,
    /// How long a settled cluster waits before it is looked at again.
    pub requeue_after: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            ready: Poll::new(Duration::from_secs(3), 100),
            cleanup: Poll::new(Duration::from_secs(1), 60),
            requeue_after: Duration::from_secs(30),
        }
    }
}

/// What the caller should do after a successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Run another pass after the given delay. A zero delay means the cluster is mid-transition.
    Requeue(Duration),
    /// The resource is gone; stop reconciling it.
    Done,
}

pub struct Reconciler<'a> {
    substrate: &'a dyn Substrate,
    registry: &'a Registry,
    options: Options,
}

impl<'a> Reconciler<'a> {
    pub fn new(substrate: &'a dyn Substrate, registry: &'a Registry, options: Options) -> Self {
        Reconciler {
            substrate,
            registry,
            options,
        }
    }

    /// Run one pass over `cluster`, updating its status in place.
    pub async fn reconcile(&self, cluster: &mut CurveCluster) -> Result<Action> {
        let result = self.step(cluster).await;
        match &result {
            Ok(_) => {
                if cluster.status.condition(ConditionType::Failed).is_some() {
                    cluster.status.set_condition(
                        ConditionType::Failed,
                        ConditionStatus::False,
                        "Reconciled",
                        "",
                    );
                }
            }
            Err(e) => {
                warn!(
                    "{}: pass failed in phase '{}': {e}",
                    cluster.key(),
                    cluster.status.phase
                );
                cluster.status.set_condition(
                    ConditionType::Failed,
                    ConditionStatus::True,
                    e.reason(),
                    &e.to_string(),
                );
            }
        }
        result
    }

    async fn step(&self, cluster: &mut CurveCluster) -> Result<Action> {
        if cluster.metadata.deletion_requested && cluster.status.phase != ClusterPhase::Deleting {
            transition(cluster, ClusterPhase::Deleting);
        }

        match cluster.status.phase {
            ClusterPhase::Unseen => self.begin(cluster).await,
            ClusterPhase::Creating => self.create(cluster).await,
            ClusterPhase::Running => self.observe(cluster).await,
            ClusterPhase::Updating => self.update(cluster).await,
            ClusterPhase::Upgrading => self.upgrade(cluster).await,
            ClusterPhase::Scaling => self.scale(cluster).await,
            ClusterPhase::Deleting => self.delete(cluster).await,
        }
    }

    async fn save_baseline(&self, cluster: &CurveCluster, baseline: &Baseline) -> Result<()> {
        let artifact = baseline.to_artifact(cluster.namespace(), cluster.name())?;
        apply_config(self.substrate, &artifact).await
    }

    async fn load_baseline(&self, cluster: &CurveCluster) -> Result<Baseline> {
        let artifact = self
            .substrate
            .get_config(cluster.namespace(), &Baseline::artifact_name(cluster.name()))
            .await?;
        Baseline::from_artifact(&artifact)
    }

    /// The stored baseline, or one taken from the live spec if none was ever stored.
    async fn baseline_or_current(&self, cluster: &CurveCluster) -> Result<Baseline> {
        match self.load_baseline(cluster).await {
            Ok(baseline) => Ok(baseline),
            Err(e) if e.is_not_found() => Ok(Baseline::from_spec(&cluster.spec)),
            Err(e) => Err(e),
        }
    }

    async fn begin(&self, cluster: &mut CurveCluster) -> Result<Action> {
        self.save_baseline(cluster, &Baseline::from_spec(&cluster.spec))
            .await?;
        transition(cluster, ClusterPhase::Creating);
        Ok(Action::Requeue(Duration::ZERO))
    }

    async fn create(&self, cluster: &mut CurveCluster) -> Result<Action> {
        let roles: Vec<Role> = cluster.spec.roles().iter().map(|r| r.role).collect();
        let rollout = self.prepare(&cluster.spec, &roles).await?;
        self.start_all(cluster, &rollout).await?;
        transition(cluster, ClusterPhase::Running);
        Ok(Action::Requeue(self.options.requeue_after))
    }

    async fn observe(&self, cluster: &mut CurveCluster) -> Result<Action> {
        let baseline = self.load_baseline(cluster).await?;
        match baseline.detect(&cluster.spec)? {
            Drift::None => {
                debug!("{}: no drift", cluster.key());
                Ok(Action::Requeue(self.options.requeue_after))
            }
            Drift::Upgrade { from, to } => {
                info!("{}: image changed from {from} to {to}", cluster.key());
                cluster.status.last_mod_context_set.clear();
                transition(cluster, ClusterPhase::Upgrading);
                Ok(Action::Requeue(Duration::ZERO))
            }
            Drift::Scale { added, removed } => {
                info!(
                    "{}: nodes added {:?}, removed {:?}",
                    cluster.key(),
                    added,
                    removed
                );
                transition(cluster, ClusterPhase::Scaling);
                Ok(Action::Requeue(Duration::ZERO))
            }
            Drift::Update(mods) => {
                for m in &mods {
                    info!(
                        "{}: {} changed keys for {}",
                        cluster.key(),
                        m.changes.len(),
                        m.role
                    );
                }
                cluster.status.last_mod_context_set = mods;
                transition(cluster, ClusterPhase::Updating);
                Ok(Action::Requeue(Duration::ZERO))
            }
        }
    }

    async fn update(&self, cluster: &mut CurveCluster) -> Result<Action> {
        let roles: Vec<Role> = cluster
            .status
            .last_mod_context_set
            .iter()
            .map(|m| m.role)
            .collect();
        for role in &roles {
            if cluster.spec.descriptor().role(*role).is_none() {
                info!(
                    "{}: role {role} was removed from the descriptor, removing its instances",
                    cluster.key()
                );
            }
        }

        let previous = self.baseline_or_current(cluster).await?;
        let rollout = self.prepare(&cluster.spec, &roles).await?;
        self.refresh_topology(cluster, &rollout).await?;
        self.roll(cluster, &rollout, &roles).await?;
        self.prune(cluster, rollout.surplus(&previous.footprints, &roles))
            .await?;

        let baseline = Baseline::from_spec(&cluster.spec).carry_footprints(&previous);
        self.save_baseline(cluster, &baseline).await?;
        cluster.status.last_mod_context_set.clear();
        transition(cluster, ClusterPhase::Running);
        Ok(Action::Requeue(self.options.requeue_after))
    }

    async fn upgrade(&self, cluster: &mut CurveCluster) -> Result<Action> {
        let roles: Vec<Role> = cluster.spec.roles().iter().map(|r| r.role).collect();
        let previous = self.baseline_or_current(cluster).await?;
        let rollout = self.prepare(&cluster.spec, &roles).await?;
        self.refresh_topology(cluster, &rollout).await?;
        self.roll(cluster, &rollout, &roles).await?;
        // Parameter changes ride along with an upgrade, including roles that were dropped.
        let deployed: Vec<Role> = previous.footprints.iter().map(|fp| fp.role).collect();
        self.prune(cluster, rollout.surplus(&previous.footprints, &deployed))
            .await?;

        let baseline = Baseline::from_spec(&cluster.spec).carry_footprints(&previous);
        self.save_baseline(cluster, &baseline).await?;
        transition(cluster, ClusterPhase::Running);
        Ok(Action::Requeue(self.options.requeue_after))
    }

    /// Node changes are recorded but not acted on: no instances are added or removed.
    async fn scale(&self, cluster: &mut CurveCluster) -> Result<Action> {
        warn!(
            "{}: scaling is not supported, node changes are recorded without redeploying",
            cluster.key()
        );
        // Footprints stay as they are: nothing was deployed to or removed from any node.
        let mut baseline = self.baseline_or_current(cluster).await?;
        baseline.nodes = cluster.spec.node_names();
        self.save_baseline(cluster, &baseline).await?;
        transition(cluster, ClusterPhase::Running);
        Ok(Action::Requeue(Duration::ZERO))
    }

    async fn delete(&self, cluster: &mut CurveCluster) -> Result<Action> {
        if !cluster.metadata.finalizers.iter().any(|f| f == FINALIZER) {
            debug!("{}: already finalized", cluster.key());
            return Ok(Action::Done);
        }
        self.cleanup(cluster).await?;
        cluster.remove_finalizer();
        info!("{}: deleted", cluster.key());
        Ok(Action::Done)
    }
}

/// Move to `phase` and record it in the conditions.
fn transition(cluster: &mut CurveCluster, phase: ClusterPhase) {
    let from = cluster.status.phase;
    info!("{}: phase '{from}' -> '{phase}'", cluster.key());
    cluster.status.phase = phase;

    let status = &mut cluster.status;
    match phase {
        ClusterPhase::Running => {
            status.set_condition(
                ConditionType::Progressing,
                ConditionStatus::False,
                "Settled",
                "",
            );
            status.set_condition(
                ConditionType::Ready,
                ConditionStatus::True,
                "ClusterRunning",
                "every role is running",
            );
        }
        ClusterPhase::Deleting => {
            status.set_condition(
                ConditionType::Ready,
                ConditionStatus::False,
                "Deleting",
                "deletion requested",
            );
        }
        other => {
            status.set_condition(
                ConditionType::Progressing,
                ConditionStatus::True,
                &other.to_string(),
                &format!("phase changed from '{from}'"),
            );
        }
    }
}
