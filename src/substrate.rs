// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! The workload substrate: the platform that stores config artifacts and runs replicated
//! services and one-shot jobs on cluster nodes.
//!
//! The reconciler only talks to the substrate through the `Substrate` trait. `LocalSubstrate`
//! keeps every object as a JSON file under a directory, which is what the operator daemon uses;
//! tests use the in-memory implementation in `test_env`.

use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use {
    async_trait::async_trait,
    log::debug,
    serde::{de::DeserializeOwned, Deserialize, Serialize},
};

use crate::{
    cluster::Role,
    config::Config,
    error::{Error, Result},
};

/// What the node inventory knows about one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub ip: String,
    pub ready: bool,
    pub schedulable: bool,
}

fn yes() -> bool {
    true
}

/// hostname -> internal address, readiness and schedulability.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeInventory {
    nodes: BTreeMap<String, NodeInfo>,
}

impl NodeInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, hostname: &str, ip: &str, ready: bool, schedulable: bool) {
        self.nodes.insert(
            hostname.to_string(),
            NodeInfo {
                ip: ip.to_string(),
                ready,
                schedulable,
            },
        );
    }

    /// An inventory built from the addresses written in a descriptor file. Nodes without an
    /// address are left out.
    pub fn from_config(conf: &Config) -> Self {
        let mut inventory = Self::new();
        for node in &conf.nodes {
            if let Some(ip) = &node.ip {
                inventory.insert(&node.hostname, ip, true, true);
            }
        }
        inventory
    }

    pub fn get(&self, hostname: &str) -> Option<&NodeInfo> {
        self.nodes.get(hostname)
    }

    pub fn is_usable(&self, hostname: &str) -> bool {
        self.get(hostname)
            .map(|n| n.ready && n.schedulable)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// A named set of files, mounted into services and jobs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ConfigArtifact {
    pub namespace: String,
    pub name: String,
    pub data: BTreeMap<String, String>,
}

impl ConfigArtifact {
    pub fn new(namespace: &str, name: &str, key: &str, value: String) -> Self {
        ConfigArtifact {
            namespace: namespace.to_string(),
            name: name.to_string(),
            data: BTreeMap::from([(key.to_string(), value)]),
        }
    }

    pub fn value(&self, key: &str) -> Result<&str> {
        self.data
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| Error::NotFound {
                kind: "config key",
                namespace: self.namespace.clone(),
                name: format!("{}[{key}]", self.name),
            })
    }
}

/// A replicated daemon pinned to one host.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub namespace: String,
    pub name: String,
    pub role: Role,
    pub host: String,
    pub image: String,
    pub args: Vec<String>,
    pub config_artifact: String,
    /// Where the config artifact is mounted inside the service.
    pub config_path: String,
    pub ports: BTreeMap<String, u16>,
    pub host_dirs: Vec<String>,
    pub replicas: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceState {
    pub desired: u32,
    pub ready: u32,
}

impl ServiceState {
    pub fn is_ready(&self) -> bool {
        self.ready >= self.desired
    }
}

/// A command that runs to completion once, optionally pinned to one host.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub namespace: String,
    pub name: String,
    pub host: Option<String>,
    pub image: String,
    pub command: Vec<String>,
    pub config_artifact: Option<String>,
    pub host_dirs: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Succeeded,
    Failed,
}

/// Create, read, update and delete of named, namespaced objects on the workload platform.
///
/// `create_*` fails with `Error::AlreadyExists` when the object exists, every other operation
/// fails with `Error::NotFound` when it does not.
#[async_trait]
pub trait Substrate: Send + Sync {
    async fn nodes(&self) -> Result<NodeInventory>;

    async fn create_config(&self, artifact: &ConfigArtifact) -> Result<()>;
    async fn get_config(&self, namespace: &str, name: &str) -> Result<ConfigArtifact>;
    async fn update_config(&self, artifact: &ConfigArtifact) -> Result<()>;
    async fn delete_config(&self, namespace: &str, name: &str) -> Result<()>;

    async fn create_service(&self, spec: &ServiceSpec) -> Result<()>;
    async fn update_service(&self, spec: &ServiceSpec) -> Result<()>;
    async fn service_state(&self, namespace: &str, name: &str) -> Result<ServiceState>;
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()>;

    async fn create_job(&self, spec: &JobSpec) -> Result<()>;
    async fn job_state(&self, namespace: &str, name: &str) -> Result<JobState>;
    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Treat "already exists" as success.
pub fn ignore_already_exists(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_already_exists() => {
            debug!("{e}, keeping it");
            Ok(())
        }
        other => other,
    }
}

/// Treat "not found" as success. Used on delete paths so they can be re-run.
pub fn ignore_not_found(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => {
            debug!("{e}, nothing to delete");
            Ok(())
        }
        other => other,
    }
}

/// Create a config artifact, or replace its contents if it already exists.
pub async fn apply_config(substrate: &dyn Substrate, artifact: &ConfigArtifact) -> Result<()> {
    match substrate.create_config(artifact).await {
        Err(e) if e.is_already_exists() => substrate.update_config(artifact).await,
        other => other,
    }
}

/// The bounds of a wait loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poll {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Poll {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Poll {
            interval,
            max_attempts,
        }
    }

    /// The longest a wait with these bounds can take.
    pub fn limit(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

impl Default for Poll {
    fn default() -> Self {
        Poll::new(Duration::from_secs(3), 100)
    }
}

/// Wait until every replica of a service is ready.
pub async fn wait_service_ready(
    substrate: &dyn Substrate,
    namespace: &str,
    name: &str,
    poll: Poll,
) -> Result<()> {
    for attempt in 0..poll.max_attempts {
        if substrate.service_state(namespace, name).await?.is_ready() {
            return Ok(());
        }
        debug!("service {namespace}/{name} not ready after attempt {}", attempt + 1);
        tokio::time::sleep(poll.interval).await;
    }
    Err(Error::Timeout {
        what: format!("service {namespace}/{name} to become ready"),
        waited: poll.limit(),
    })
}

/// Wait until a job succeeds. A failed job is an error.
pub async fn wait_job_complete(
    substrate: &dyn Substrate,
    namespace: &str,
    name: &str,
    poll: Poll,
) -> Result<()> {
    for attempt in 0..poll.max_attempts {
        match substrate.job_state(namespace, name).await? {
            JobState::Succeeded => return Ok(()),
            JobState::Failed => {
                return Err(Error::Substrate(format!("job {namespace}/{name} failed")))
            }
            JobState::Running => {
                debug!("job {namespace}/{name} still running after attempt {}", attempt + 1)
            }
        }
        tokio::time::sleep(poll.interval).await;
    }
    Err(Error::Timeout {
        what: format!("job {namespace}/{name} to complete"),
        waited: poll.limit(),
    })
}

/// The config artifact holding a role's config template.
pub fn template_artifact(role: Role) -> String {
    format!("curve-{role}-conf")
}

pub fn template_key(role: Role) -> String {
    format!("{role}.conf")
}

#[derive(Deserialize, Debug, Default)]
struct NodesFile {
    #[serde(default)]
    node: Vec<NodesFileEntry>,
}

#[derive(Deserialize, Debug)]
struct NodesFileEntry {
    hostname: String,
    ip: String,
    #[serde(default = "yes")]
    ready: bool,
    #[serde(default = "yes")]
    schedulable: bool,
}

/// A substrate that records every object as a JSON file under `root`:
///
/// ```text
/// root/nodes.toml                      node inventory ([[node]] hostname, ip, ready, schedulable)
/// root/templates/<role>.conf           role config templates
/// root/<namespace>/<kind>/<name>.json  config artifacts, services and jobs
/// ```
///
/// Nothing is actually run: services report every replica ready and jobs report success as soon
/// as they are created.
#[derive(Debug, Clone)]
pub struct LocalSubstrate {
    root: PathBuf,
}

impl LocalSubstrate {
    pub fn new(root: impl AsRef<Path>) -> Self {
        LocalSubstrate {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn path(&self, kind: &str, namespace: &str, name: &str) -> PathBuf {
        self.root
            .join(namespace)
            .join(kind)
            .join(format!("{name}.json"))
    }

    fn create<T: Serialize>(
        &self,
        kind: &'static str,
        namespace: &str,
        name: &str,
        obj: &T,
    ) -> Result<()> {
        let path = self.path(kind, namespace, name);
        if path.exists() {
            return Err(Error::AlreadyExists {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        debug!("creating {kind} {namespace}/{name}");
        std::fs::write(&path, serde_json::to_vec_pretty(obj)?)?;
        Ok(())
    }

    fn read<T: DeserializeOwned>(
        &self,
        kind: &'static str,
        namespace: &str,
        name: &str,
    ) -> Result<T> {
        let path = self.path(kind, namespace, name);
        let contents = std::fs::read(&path).map_err(|e| not_found(e, kind, namespace, name))?;
        Ok(serde_json::from_slice(&contents)?)
    }

    fn update<T: Serialize>(
        &self,
        kind: &'static str,
        namespace: &str,
        name: &str,
        obj: &T,
    ) -> Result<()> {
        let path = self.path(kind, namespace, name);
        if !path.exists() {
            return Err(Error::NotFound {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }
        debug!("updating {kind} {namespace}/{name}");
        std::fs::write(&path, serde_json::to_vec_pretty(obj)?)?;
        Ok(())
    }

    fn delete(&self, kind: &'static str, namespace: &str, name: &str) -> Result<()> {
        debug!("deleting {kind} {namespace}/{name}");
        std::fs::remove_file(self.path(kind, namespace, name))
            .map_err(|e| not_found(e, kind, namespace, name))
    }

    /// Fall back to `templates/<role>.conf` for the role template artifacts.
    fn template(&self, namespace: &str, name: &str) -> Option<ConfigArtifact> {
        let role: Role = name.strip_prefix("curve-")?.strip_suffix("-conf")?.parse().ok()?;
        let path = self.root.join("templates").join(template_key(role));
        let text = std::fs::read_to_string(path).ok()?;
        Some(ConfigArtifact::new(namespace, name, &template_key(role), text))
    }
}

fn not_found(e: io::Error, kind: &'static str, namespace: &str, name: &str) -> Error {
    if e.kind() == io::ErrorKind::NotFound {
        Error::NotFound {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    } else {
        Error::Io(e)
    }
}

const CONFIG: &str = "config";
const SERVICE: &str = "service";
const JOB: &str = "job";

#[async_trait]
impl Substrate for LocalSubstrate {
    async fn nodes(&self) -> Result<NodeInventory> {
        let path = self.root.join("nodes.toml");
        let file: NodesFile = match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => NodesFile::default(),
            Err(e) => return Err(e.into()),
        };
        let mut inventory = NodeInventory::new();
        for entry in file.node {
            inventory.insert(&entry.hostname, &entry.ip, entry.ready, entry.schedulable);
        }
        Ok(inventory)
    }

    async fn create_config(&self, artifact: &ConfigArtifact) -> Result<()> {
        self.create(CONFIG, &artifact.namespace, &artifact.name, artifact)
    }

    async fn get_config(&self, namespace: &str, name: &str) -> Result<ConfigArtifact> {
        match self.read(CONFIG, namespace, name) {
            Err(e) if e.is_not_found() => self.template(namespace, name).ok_or(e),
            other => other,
        }
    }

    async fn update_config(&self, artifact: &ConfigArtifact) -> Result<()> {
        self.update(CONFIG, &artifact.namespace, &artifact.name, artifact)
    }

    async fn delete_config(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete(CONFIG, namespace, name)
    }

    async fn create_service(&self, spec: &ServiceSpec) -> Result<()> {
        self.create(SERVICE, &spec.namespace, &spec.name, spec)
    }

    async fn update_service(&self, spec: &ServiceSpec) -> Result<()> {
        self.update(SERVICE, &spec.namespace, &spec.name, spec)
    }

    async fn service_state(&self, namespace: &str, name: &str) -> Result<ServiceState> {
        let spec: ServiceSpec = self.read(SERVICE, namespace, name)?;
        Ok(ServiceState {
            desired: spec.replicas,
            ready: spec.replicas,
        })
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete(SERVICE, namespace, name)
    }

    async fn create_job(&self, spec: &JobSpec) -> Result<()> {
        self.create(JOB, &spec.namespace, &spec.name, spec)
    }

    async fn job_state(&self, namespace: &str, name: &str) -> Result<JobState> {
        let _: JobSpec = self.read(JOB, namespace, name)?;
        Ok(JobState::Succeeded)
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete(JOB, namespace, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_substrate_objects() {
        let dir = tempfile::tempdir().unwrap();
        let substrate = LocalSubstrate::new(dir.path());
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let artifact = ConfigArtifact::new("curve", "a", "k", "v1".to_string());
            substrate.create_config(&artifact).await.unwrap();
            assert!(substrate
                .create_config(&artifact)
                .await
                .unwrap_err()
                .is_already_exists());

            let mut changed = artifact.clone();
            changed.data.insert("k".to_string(), "v2".to_string());
            apply_config(&substrate, &changed).await.unwrap();
            let read = substrate.get_config("curve", "a").await.unwrap();
            assert_eq!(read.value("k").unwrap(), "v2");

            substrate.delete_config("curve", "a").await.unwrap();
            let err = substrate.delete_config("curve", "a").await.unwrap_err();
            assert!(err.is_not_found());
            ignore_not_found(Err(err)).unwrap();
        });
    }

    #[test]
    fn local_substrate_templates_and_nodes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("templates")).unwrap();
        std::fs::write(dir.path().join("templates/mds.conf"), "a=1\n").unwrap();
        std::fs::write(
            dir.path().join("nodes.toml"),
            "[[node]]\nhostname = \"n1\"\nip = \"10.0.0.1\"\n\n\
             [[node]]\nhostname = \"n2\"\nip = \"10.0.0.2\"\nready = false\n",
        )
        .unwrap();

        let substrate = LocalSubstrate::new(dir.path());
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let template = substrate
                .get_config("curve", &template_artifact(Role::Mds))
                .await
                .unwrap();
            assert_eq!(template.value("mds.conf").unwrap(), "a=1\n");
            assert!(substrate
                .get_config("curve", &template_artifact(Role::Etcd))
                .await
                .unwrap_err()
                .is_not_found());

            let nodes = substrate.nodes().await.unwrap();
            assert_eq!(nodes.len(), 2);
            assert!(nodes.is_usable("n1"));
            assert!(!nodes.is_usable("n2"));
            assert!(!nodes.is_usable("n3"));
        });
    }
}
