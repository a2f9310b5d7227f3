// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Fixtures and an in-memory workload substrate for tests.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;

use crate::{
    cluster::Role,
    config::{Config, Node, RoleConfig, S3Config},
    error::{Error, Result},
    substrate::{
        template_artifact, template_key, ConfigArtifact, JobSpec, JobState, NodeInventory,
        ServiceSpec, ServiceState, Substrate,
    },
};

/// Given a relative `path` in the test directory, prepend the full path to the test directory.
pub fn test_path(path: &str) -> String {
    std::env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string()) + "/tests/" + path
}

fn nodes(n: usize) -> Vec<Node> {
    (1..=n)
        .map(|i| Node {
            hostname: format!("node{i}"),
            ip: Some(format!("10.0.0.{i}")),
            standalone: false,
        })
        .collect()
}

/// A block cluster `curve/bs1` on `n` nodes, with snapshotclone enabled.
pub fn bs_config(n: usize) -> Config {
    Config {
        kind: "curvebs".to_string(),
        namespace: "curve".to_string(),
        name: "bs1".to_string(),
        image: "opencurvedocker/curvebs:v1.2".to_string(),
        data_dir: "/data".to_string(),
        log_dir: "/logs".to_string(),
        copysets: None,
        nodes: nodes(n),
        etcd: Some(RoleConfig::default()),
        mds: Some(RoleConfig::default()),
        chunkserver: Some(RoleConfig::default()),
        snapshotclone: Some(RoleConfig::default()),
        metaserver: None,
        s3: None,
    }
}

/// A file cluster `curve/fs1` on `n` nodes.
pub fn fs_config(n: usize) -> Config {
    Config {
        kind: "curvefs".to_string(),
        namespace: "curve".to_string(),
        name: "fs1".to_string(),
        image: "opencurvedocker/curvefs:v2.4".to_string(),
        data_dir: "/data".to_string(),
        log_dir: "/logs".to_string(),
        copysets: None,
        nodes: nodes(n),
        etcd: Some(RoleConfig::default()),
        mds: Some(RoleConfig::default()),
        chunkserver: None,
        snapshotclone: None,
        metaserver: Some(RoleConfig::default()),
        s3: Some(S3Config {
            ak: Some("ak".to_string()),
            sk: Some("sk".to_string()),
            endpoint: Some("http://s3.local".to_string()),
            bucket_name: Some("curve".to_string()),
        }),
    }
}

/// A small config template that exercises item overrides and local and cluster variables.
pub fn template(role: Role) -> String {
    format!(
        "# {role} on ${{service_host}}\n\
         listen.ip=\n\
         listen.port=\n\
         {role}.data.dir=${{data_dir}}\n\
         {role}.log.dir=${{log_dir}}\n\
         etcd.endpoint=${{cluster_etcd_addr}}\n\
         mds.addr=${{cluster_mds_addr}}\n"
    )
}

#[derive(Debug, Default)]
struct Inner {
    nodes: NodeInventory,
    configs: BTreeMap<(String, String), ConfigArtifact>,
    services: BTreeMap<(String, String), ServiceSpec>,
    jobs: BTreeMap<(String, String), JobSpec>,
    ops: Vec<String>,
    failures: BTreeMap<String, usize>,
    never_ready: BTreeSet<String>,
    stuck_jobs: BTreeSet<String>,
}

/// A substrate that keeps every object in memory and logs every call as `"<op> <ns>/<name>"`.
///
/// Services are ready as soon as they exist and jobs succeed as soon as they are created, unless
/// told otherwise with `never_ready` or `stick_job`. `fail_next` makes the next calls of an
/// operation fail.
#[derive(Debug, Default)]
pub struct MemorySubstrate {
    inner: Mutex<Inner>,
}

fn key(namespace: &str, name: &str) -> (String, String) {
    (namespace.to_string(), name.to_string())
}

fn not_found(kind: &'static str, namespace: &str, name: &str) -> Error {
    Error::NotFound {
        kind,
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

fn already_exists(kind: &'static str, namespace: &str, name: &str) -> Error {
    Error::AlreadyExists {
        kind,
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

impl MemorySubstrate {
    pub fn new() -> Self {
        Self::default()
    }

    /// A substrate holding the config template of every role in `namespace`.
    pub fn with_templates(namespace: &str) -> Self {
        let substrate = Self::new();
        {
            let mut inner = substrate.lock();
            for role in [
                Role::Etcd,
                Role::Mds,
                Role::ChunkServer,
                Role::SnapshotClone,
                Role::MetaServer,
            ] {
                let artifact = ConfigArtifact::new(
                    namespace,
                    &template_artifact(role),
                    &template_key(role),
                    template(role),
                );
                inner.configs.insert(key(namespace, &artifact.name), artifact);
            }
        }
        substrate
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    /// Record a call, failing it if a failure was injected for `op`.
    fn call(inner: &mut Inner, op: &str, namespace: &str, name: &str) -> Result<()> {
        inner.ops.push(format!("{op} {namespace}/{name}"));
        if let Some(remaining) = inner.failures.get_mut(op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::Substrate(format!("injected failure in {op}")));
            }
        }
        Ok(())
    }

    pub fn set_nodes(&self, nodes: NodeInventory) {
        self.lock().nodes = nodes;
    }

    pub fn fail_next(&self, op: &str, times: usize) {
        self.lock().failures.insert(op.to_string(), times);
    }

    pub fn never_ready(&self, service: &str) {
        self.lock().never_ready.insert(service.to_string());
    }

    pub fn stick_job(&self, job: &str) {
        self.lock().stuck_jobs.insert(job.to_string());
    }

    pub fn unstick_jobs(&self) {
        self.lock().stuck_jobs.clear();
    }

    pub fn ops(&self) -> Vec<String> {
        self.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.lock().ops.clear();
    }

    pub fn config(&self, namespace: &str, name: &str) -> Option<ConfigArtifact> {
        self.lock().configs.get(&key(namespace, name)).cloned()
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<ServiceSpec> {
        self.lock().services.get(&key(namespace, name)).cloned()
    }

    pub fn services(&self) -> Vec<ServiceSpec> {
        self.lock().services.values().cloned().collect()
    }

    pub fn jobs(&self) -> Vec<JobSpec> {
        self.lock().jobs.values().cloned().collect()
    }

    /// Names of every config artifact that is not a role template.
    pub fn config_names(&self) -> Vec<String> {
        let templates: Vec<String> = [
            Role::Etcd,
            Role::Mds,
            Role::ChunkServer,
            Role::SnapshotClone,
            Role::MetaServer,
        ]
        .into_iter()
        .map(template_artifact)
        .collect();
        self.lock()
            .configs
            .keys()
            .map(|(_, name)| name.clone())
            .filter(|name| !templates.contains(name))
            .collect()
    }
}

#[async_trait]
impl Substrate for MemorySubstrate {
    async fn nodes(&self) -> Result<NodeInventory> {
        let mut inner = self.lock();
        Self::call(&mut inner, "nodes", "", "")?;
        Ok(inner.nodes.clone())
    }

    async fn create_config(&self, artifact: &ConfigArtifact) -> Result<()> {
        let mut inner = self.lock();
        Self::call(&mut inner, "create_config", &artifact.namespace, &artifact.name)?;
        let k = key(&artifact.namespace, &artifact.name);
        if inner.configs.contains_key(&k) {
            return Err(already_exists("config", &artifact.namespace, &artifact.name));
        }
        inner.configs.insert(k, artifact.clone());
        Ok(())
    }

    async fn get_config(&self, namespace: &str, name: &str) -> Result<ConfigArtifact> {
        let mut inner = self.lock();
        Self::call(&mut inner, "get_config", namespace, name)?;
        inner
            .configs
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| not_found("config", namespace, name))
    }

    async fn update_config(&self, artifact: &ConfigArtifact) -> Result<()> {
        let mut inner = self.lock();
        Self::call(&mut inner, "update_config", &artifact.namespace, &artifact.name)?;
        match inner.configs.get_mut(&key(&artifact.namespace, &artifact.name)) {
            Some(existing) => {
                *existing = artifact.clone();
                Ok(())
            }
            None => Err(not_found("config", &artifact.namespace, &artifact.name)),
        }
    }

    async fn delete_config(&self, namespace: &str, name: &str) -> Result<()> {
        let mut inner = self.lock();
        Self::call(&mut inner, "delete_config", namespace, name)?;
        inner
            .configs
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| not_found("config", namespace, name))
    }

    async fn create_service(&self, spec: &ServiceSpec) -> Result<()> {
        let mut inner = self.lock();
        Self::call(&mut inner, "create_service", &spec.namespace, &spec.name)?;
        let k = key(&spec.namespace, &spec.name);
        if inner.services.contains_key(&k) {
            return Err(already_exists("service", &spec.namespace, &spec.name));
        }
        inner.services.insert(k, spec.clone());
        Ok(())
    }

    async fn update_service(&self, spec: &ServiceSpec) -> Result<()> {
        let mut inner = self.lock();
        Self::call(&mut inner, "update_service", &spec.namespace, &spec.name)?;
        match inner.services.get_mut(&key(&spec.namespace, &spec.name)) {
            Some(existing) => {
                *existing = spec.clone();
                Ok(())
            }
            None => Err(not_found("service", &spec.namespace, &spec.name)),
        }
    }

    async fn service_state(&self, namespace: &str, name: &str) -> Result<ServiceState> {
        let mut inner = self.lock();
        Self::call(&mut inner, "service_state", namespace, name)?;
        let spec = inner
            .services
            .get(&key(namespace, name))
            .ok_or_else(|| not_found("service", namespace, name))?;
        let ready = if inner.never_ready.contains(name) {
            0
        } else {
            spec.replicas
        };
        Ok(ServiceState {
            desired: spec.replicas,
            ready,
        })
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        let mut inner = self.lock();
        Self::call(&mut inner, "delete_service", namespace, name)?;
        inner
            .services
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| not_found("service", namespace, name))
    }

    async fn create_job(&self, spec: &JobSpec) -> Result<()> {
        let mut inner = self.lock();
        Self::call(&mut inner, "create_job", &spec.namespace, &spec.name)?;
        let k = key(&spec.namespace, &spec.name);
        if inner.jobs.contains_key(&k) {
            return Err(already_exists("job", &spec.namespace, &spec.name));
        }
        inner.jobs.insert(k, spec.clone());
        Ok(())
    }

    async fn job_state(&self, namespace: &str, name: &str) -> Result<JobState> {
        let mut inner = self.lock();
        Self::call(&mut inner, "job_state", namespace, name)?;
        if !inner.jobs.contains_key(&key(namespace, name)) {
            return Err(not_found("job", namespace, name));
        }
        if inner.stuck_jobs.contains(name) {
            Ok(JobState::Running)
        } else {
            Ok(JobState::Succeeded)
        }
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()> {
        let mut inner = self.lock();
        Self::call(&mut inner, "delete_job", namespace, name)?;
        inner
            .jobs
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| not_found("job", namespace, name))
    }
}
