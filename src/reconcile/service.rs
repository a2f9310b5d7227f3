// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Rendering every instance's config and starting or rolling its service.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info};

use crate::{
    cluster::{ClusterSpec, CurveCluster, Role, StorageKind},
    deploy::{Builder, DeployConfig},
    error::{Error, Result},
    placement::{self, Topology},
    substrate::{
        self, apply_config, ignore_already_exists, ignore_not_found, ConfigArtifact, JobSpec,
        ServiceSpec,
    },
};

use super::{cleanup::Footprint, Reconciler};

const TOPOLOGY_KEY: &str = "topology.json";

pub fn topology_artifact(cluster: &str) -> String {
    format!("{cluster}-topology")
}

/// The service running instance `id`.
pub fn service_name(id: &str) -> String {
    format!("curve-{id}")
}

/// The config artifact holding instance `id`'s rendered config.
pub fn config_artifact(id: &str) -> String {
    format!("curve-{id}-conf")
}

/// The one-shot jobs that register the placement document with the metadata service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolJob {
    /// Block clusters, before chunkservers start.
    PhysicalPool,
    /// Block clusters, after chunkservers are ready.
    LogicalPool,
    /// File clusters, before metaservers start.
    Topology,
}

impl PoolJob {
    pub const ALL: [PoolJob; 3] = [PoolJob::PhysicalPool, PoolJob::LogicalPool, PoolJob::Topology];

    pub fn name(&self, cluster: &str) -> String {
        match self {
            PoolJob::PhysicalPool => format!("{cluster}-provision-physical-pool"),
            PoolJob::LogicalPool => format!("{cluster}-provision-logical-pool"),
            PoolJob::Topology => format!("{cluster}-create-topology"),
        }
    }

    fn command(&self) -> Vec<String> {
        let args: &[&str] = match self {
            PoolJob::PhysicalPool => &[
                "curvebs-tool",
                "-op=create_physicalpool",
                "-cluster_map=/curvebs/tools/conf/topology.json",
            ],
            PoolJob::LogicalPool => &[
                "curvebs-tool",
                "-op=create_logicalpool",
                "-cluster_map=/curvebs/tools/conf/topology.json",
            ],
            PoolJob::Topology => &[
                "curvefs-tool",
                "create-topology",
                "-cluster_map=/curvefs/tools/conf/topology.json",
            ],
        };
        args.iter().map(|a| a.to_string()).collect()
    }

    /// The job that runs right before `role` starts.
    fn before(kind: StorageKind, role: Role) -> Option<PoolJob> {
        match (kind, role) {
            (StorageKind::Block, Role::ChunkServer) => Some(PoolJob::PhysicalPool),
            (StorageKind::File, Role::MetaServer) => Some(PoolJob::Topology),
            _ => None,
        }
    }

    /// The job that runs once every instance of `role` is ready.
    fn after(kind: StorageKind, role: Role) -> Option<PoolJob> {
        match (kind, role) {
            (StorageKind::Block, Role::ChunkServer) => Some(PoolJob::LogicalPool),
            _ => None,
        }
    }
}

/// Everything one pass deploys, computed before any object is touched.
pub(crate) struct Rollout {
    pub dcs: Vec<DeployConfig>,
    pub topology: Topology,
    /// deploy config id -> rendered config text, for the roles the rollout was prepared for
    pub rendered: BTreeMap<String, String>,
}

impl Rollout {
    fn of_role(&self, role: Role) -> impl Iterator<Item = &DeployConfig> {
        self.dcs.iter().filter(move |dc| dc.role() == role)
    }

    /// Instances of `roles` that were deployed before but are no longer built.
    pub fn surplus<'f>(
        &self,
        deployed: &'f [Footprint],
        roles: &[Role],
    ) -> impl Iterator<Item = &'f Footprint> {
        let built: BTreeSet<String> = self.dcs.iter().map(|dc| dc.id().to_string()).collect();
        let roles = roles.to_vec();
        deployed
            .iter()
            .filter(move |fp| roles.contains(&fp.role) && !built.contains(&fp.id))
    }
}

fn service_spec(namespace: &str, dc: &DeployConfig) -> ServiceSpec {
    let config_path = dc.config_path();
    ServiceSpec {
        namespace: namespace.to_string(),
        name: service_name(dc.id()),
        role: dc.role(),
        host: dc.host().to_string(),
        image: dc.image(),
        args: vec![format!("--role={}", dc.role()), format!("--conf={config_path}")],
        config_artifact: config_artifact(dc.id()),
        config_path,
        ports: dc.ports(),
        host_dirs: vec![dc.data_dir(), dc.log_dir()],
        replicas: 1,
    }
}

impl Reconciler<'_> {
    /// Build and plan the whole cluster and render the configs of `roles`. Fails before anything
    /// is created if any instance cannot be built or any of those templates does not render.
    pub(crate) async fn prepare(&self, spec: &ClusterSpec, roles: &[Role]) -> Result<Rollout> {
        let namespace = &spec.common().namespace;
        let inventory = self.substrate.nodes().await?;
        let dcs = Builder::new(self.registry, &inventory).build(spec.descriptor())?;
        let topology = placement::plan(&dcs)?;

        let mut templates = BTreeMap::new();
        for role_spec in spec.roles() {
            let role = role_spec.role;
            if !roles.contains(&role) {
                continue;
            }
            let artifact = self
                .substrate
                .get_config(namespace, &substrate::template_artifact(role))
                .await?;
            templates.insert(role, artifact.value(&substrate::template_key(role))?.to_string());
        }

        let mut rendered = BTreeMap::new();
        for dc in &dcs {
            if let Some(template) = templates.get(&dc.role()) {
                rendered.insert(dc.id().to_string(), dc.render(template)?);
            }
        }

        debug!(
            "prepared {} instances and {} placement servers for {}",
            dcs.len(),
            topology.servers.len(),
            spec.common().name
        );
        Ok(Rollout {
            dcs,
            topology,
            rendered,
        })
    }

    async fn write_config(
        &self,
        namespace: &str,
        rollout: &Rollout,
        dc: &DeployConfig,
    ) -> Result<()> {
        let text = rollout.rendered.get(dc.id()).cloned().ok_or_else(|| {
            Error::InvalidSpec(format!("instance {} was not rendered", dc.id()))
        })?;
        let key = format!("{}.conf", dc.role());
        apply_config(
            self.substrate,
            &ConfigArtifact::new(namespace, &config_artifact(dc.id()), &key, text),
        )
        .await
    }

    fn topology_config(&self, cluster: &CurveCluster, rollout: &Rollout) -> Result<ConfigArtifact> {
        Ok(ConfigArtifact::new(
            cluster.namespace(),
            &topology_artifact(cluster.name()),
            TOPOLOGY_KEY,
            rollout.topology.to_json()?,
        ))
    }

    /// Rewrite the placement document if the storage instances it lists have changed.
    pub(crate) async fn refresh_topology(
        &self,
        cluster: &CurveCluster,
        rollout: &Rollout,
    ) -> Result<()> {
        let artifact = self.topology_config(cluster, rollout)?;
        let current = match self
            .substrate
            .get_config(&artifact.namespace, &artifact.name)
            .await
        {
            Ok(current) => Some(current),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        if current.is_some_and(|c| c.data == artifact.data) {
            debug!("{}: placement unchanged", cluster.key());
            return Ok(());
        }
        info!(
            "{}: rewriting placement, {} servers",
            cluster.key(),
            rollout.topology.servers.len()
        );
        apply_config(self.substrate, &artifact).await
    }

    /// Delete the service and config of every instance in `surplus`.
    pub(crate) async fn prune<'f>(
        &self,
        cluster: &CurveCluster,
        surplus: impl Iterator<Item = &'f Footprint>,
    ) -> Result<()> {
        let namespace = cluster.namespace();
        for fp in surplus {
            info!("{}: removing instance {}", cluster.key(), fp.id);
            ignore_not_found(
                self.substrate
                    .delete_service(namespace, &service_name(&fp.id))
                    .await,
            )?;
            ignore_not_found(
                self.substrate
                    .delete_config(namespace, &config_artifact(&fp.id))
                    .await,
            )?;
        }
        Ok(())
    }

    async fn run_job(&self, cluster: &CurveCluster, job: PoolJob) -> Result<()> {
        let spec = JobSpec {
            namespace: cluster.namespace().to_string(),
            name: job.name(cluster.name()),
            host: None,
            image: cluster.spec.common().image.clone(),
            command: job.command(),
            config_artifact: Some(topology_artifact(cluster.name())),
            host_dirs: vec![],
        };
        info!("running job {}/{}", spec.namespace, spec.name);
        ignore_already_exists(self.substrate.create_job(&spec).await)?;
        substrate::wait_job_complete(
            self.substrate,
            &spec.namespace,
            &spec.name,
            self.options.ready,
        )
        .await
    }

    /// Start every role in build order, registering pools around the storage role.
    pub(crate) async fn start_all(&self, cluster: &CurveCluster, rollout: &Rollout) -> Result<()> {
        let namespace = cluster.namespace();
        let kind = cluster.spec.kind();

        apply_config(self.substrate, &self.topology_config(cluster, rollout)?).await?;

        for role_spec in cluster.spec.roles() {
            let role = role_spec.role;
            if let Some(job) = PoolJob::before(kind, role) {
                self.run_job(cluster, job).await?;
            }

            for dc in rollout.of_role(role) {
                self.write_config(namespace, rollout, dc).await?;
                ignore_already_exists(
                    self.substrate
                        .create_service(&service_spec(namespace, dc))
                        .await,
                )?;
            }
            for dc in rollout.of_role(role) {
                substrate::wait_service_ready(
                    self.substrate,
                    namespace,
                    &service_name(dc.id()),
                    self.options.ready,
                )
                .await?;
            }
            info!("{}: all {role} instances are ready", cluster.key());

            if let Some(job) = PoolJob::after(kind, role) {
                self.run_job(cluster, job).await?;
            }
        }
        Ok(())
    }

    /// Roll the services of `roles` one instance at a time. An instance without a service yet
    /// gets one created.
    pub(crate) async fn roll(
        &self,
        cluster: &CurveCluster,
        rollout: &Rollout,
        roles: &[Role],
    ) -> Result<()> {
        let namespace = cluster.namespace();
        for role_spec in cluster.spec.roles() {
            let role = role_spec.role;
            if !roles.contains(&role) {
                continue;
            }
            for dc in rollout.of_role(role) {
                self.write_config(namespace, rollout, dc).await?;
                let spec = service_spec(namespace, dc);
                match self.substrate.update_service(&spec).await {
                    Err(e) if e.is_not_found() => self.substrate.create_service(&spec).await?,
                    other => other?,
                }
                substrate::wait_service_ready(
                    self.substrate,
                    namespace,
                    &spec.name,
                    self.options.ready,
                )
                .await?;
            }
            info!("{}: rolled every {role} instance", cluster.key());
        }
        Ok(())
    }
}
