// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::{collections::BTreeMap, collections::HashSet, fmt, str::FromStr};

use {
    chrono::{DateTime, Utc},
    log::warn,
    serde::{Deserialize, Serialize},
};

use crate::config::{Config, Node, RoleConfig, S3Config};
use crate::error::{Error, Result};

/// The finalizer that keeps a cluster resource around until its data has been cleaned up.
pub const FINALIZER: &str = "curve.opencurve.io/cleanup";

/// The two storage variants built from the same engine.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    #[serde(rename = "curvebs")]
    Block,
    #[serde(rename = "curvefs")]
    File,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Block => "curvebs",
            StorageKind::File => "curvefs",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A functional daemon kind. The declaration order is the order roles are built and started in.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Etcd,
    Mds,
    ChunkServer,
    SnapshotClone,
    MetaServer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Etcd => "etcd",
            Role::Mds => "mds",
            Role::ChunkServer => "chunkserver",
            Role::SnapshotClone => "snapshotclone",
            Role::MetaServer => "metaserver",
        }
    }

    /// Quorum roles run exactly one instance on each of the first three nodes.
    pub fn is_quorum(&self) -> bool {
        matches!(self, Role::Etcd | Role::Mds | Role::SnapshotClone)
    }

    /// Storage-serving roles run on every node and take part in placement.
    pub fn is_storage(&self) -> bool {
        matches!(self, Role::ChunkServer | Role::MetaServer)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "etcd" => Role::Etcd,
            "mds" => Role::Mds,
            "chunkserver" => Role::ChunkServer,
            "snapshotclone" => Role::SnapshotClone,
            "metaserver" => Role::MetaServer,
            other => return Err(Error::InvalidSpec(format!("unknown role '{other}'"))),
        })
    }
}

/// The validated settings of one role.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleSpec {
    pub role: Role,
    pub port: Option<u16>,
    pub client_port: Option<u16>,
    pub dummy_port: Option<u16>,
    pub proxy_port: Option<u16>,
    pub external_port: Option<u16>,
    /// Instances per host. Always 1 for quorum roles.
    pub instances: u32,
    pub data_dir: Option<String>,
    pub log_dir: Option<String>,
    pub copysets: Option<u64>,
    pub config: BTreeMap<String, toml::Value>,
}

impl RoleSpec {
    fn from_config(role: Role, conf: &RoleConfig) -> Result<Self> {
        let mut instances = conf.instances.unwrap_or(1);
        if instances == 0 {
            return Err(Error::InvalidSpec(format!(
                "role {role} must run at least one instance per host"
            )));
        }
        if role.is_quorum() && instances != 1 {
            warn!(
                "role {role} always runs one instance per host, ignoring instances = {instances}"
            );
            instances = 1;
        }

        Ok(RoleSpec {
            role,
            port: conf.port,
            client_port: conf.client_port,
            dummy_port: conf.dummy_port,
            proxy_port: conf.proxy_port,
            external_port: conf.external_port,
            instances,
            data_dir: conf.data_dir.clone(),
            log_dir: conf.log_dir.clone(),
            copysets: conf.copysets,
            config: conf.config.clone(),
        })
    }

    /// The role's parameters flattened to strings. This is the shape persisted in the baseline
    /// and compared against on every pass to detect drift.
    pub fn parameters(&self) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        let ports = [
            ("listen.port", self.port),
            ("listen.client_port", self.client_port),
            ("listen.dummy_port", self.dummy_port),
            ("listen.proxy_port", self.proxy_port),
            ("listen.external_port", self.external_port),
        ];
        for (key, port) in ports {
            if let Some(port) = port {
                params.insert(key.to_string(), port.to_string());
            }
        }
        params.insert("instances".to_string(), self.instances.to_string());
        if let Some(dir) = &self.data_dir {
            params.insert("data_dir".to_string(), dir.clone());
        }
        if let Some(dir) = &self.log_dir {
            params.insert("log_dir".to_string(), dir.clone());
        }
        if let Some(copysets) = self.copysets {
            params.insert("copysets".to_string(), copysets.to_string());
        }
        for (key, value) in &self.config {
            let value = match value {
                toml::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            params.insert(key.clone(), value);
        }
        params
    }
}

/// Settings shared by both storage variants.
#[derive(Debug, Clone, PartialEq)]
pub struct CommonSpec {
    pub namespace: String,
    pub name: String,
    pub image: String,
    pub data_dir: String,
    pub log_dir: String,
    pub copysets: u64,
    pub nodes: Vec<Node>,
    pub s3: S3Config,
}

/// What the deploy-config builder needs to know about a cluster, independent of its variant.
pub trait ClusterDescriptor: Send + Sync {
    fn kind(&self) -> StorageKind;

    fn common(&self) -> &CommonSpec;

    /// The enabled roles in build order.
    fn roles(&self) -> Vec<&RoleSpec>;

    /// The storage-serving role of this variant.
    fn storage_role(&self) -> Role;

    fn role(&self, role: Role) -> Option<&RoleSpec> {
        self.roles().into_iter().find(|spec| spec.role == role)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockCluster {
    pub common: CommonSpec,
    pub etcd: RoleSpec,
    pub mds: RoleSpec,
    pub chunkserver: RoleSpec,
    pub snapshotclone: Option<RoleSpec>,
}

impl ClusterDescriptor for BlockCluster {
    fn kind(&self) -> StorageKind {
        StorageKind::Block
    }

    fn common(&self) -> &CommonSpec {
        &self.common
    }

    fn roles(&self) -> Vec<&RoleSpec> {
        let mut roles = vec![&self.etcd, &self.mds, &self.chunkserver];
        if let Some(snapshotclone) = &self.snapshotclone {
            roles.push(snapshotclone);
        }
        roles
    }

    fn storage_role(&self) -> Role {
        Role::ChunkServer
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileCluster {
    pub common: CommonSpec,
    pub etcd: RoleSpec,
    pub mds: RoleSpec,
    pub metaserver: RoleSpec,
}

impl ClusterDescriptor for FileCluster {
    fn kind(&self) -> StorageKind {
        StorageKind::File
    }

    fn common(&self) -> &CommonSpec {
        &self.common
    }

    fn roles(&self) -> Vec<&RoleSpec> {
        vec![&self.etcd, &self.mds, &self.metaserver]
    }

    fn storage_role(&self) -> Role {
        Role::MetaServer
    }
}

/// A cluster descriptor, dispatched on the explicit kind discriminator of the descriptor file.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterSpec {
    Block(BlockCluster),
    File(FileCluster),
}

impl ClusterSpec {
    /// Validate a parsed descriptor file and convert it into the variant named by its `kind`.
    pub fn from_config(conf: &Config) -> Result<Self> {
        if conf.nodes.is_empty() {
            return Err(Error::InvalidSpec("at least one node is required".to_string()));
        }
        let mut seen = HashSet::new();
        for node in &conf.nodes {
            if !seen.insert(node.hostname.as_str()) {
                return Err(Error::InvalidSpec(format!(
                    "node '{}' is declared more than once",
                    node.hostname
                )));
            }
        }

        let common = CommonSpec {
            namespace: conf.namespace.clone(),
            name: conf.name.clone(),
            image: conf.image.clone(),
            data_dir: conf.data_dir.clone(),
            log_dir: conf.log_dir.clone(),
            copysets: conf.copysets.unwrap_or(100),
            nodes: conf.nodes.clone(),
            s3: conf.s3.clone().unwrap_or_default(),
        };

        let role = |role: Role, conf: &Option<RoleConfig>| -> Result<RoleSpec> {
            RoleSpec::from_config(role, conf.as_ref().unwrap_or(&RoleConfig::default()))
        };

        match conf.kind.as_str() {
            "curvebs" => {
                if conf.metaserver.is_some() {
                    warn!("ignoring [metaserver] in curvebs cluster '{}'", conf.name);
                }
                let snapshotclone = match &conf.snapshotclone {
                    Some(sc) if sc.enable.unwrap_or(true) => {
                        Some(RoleSpec::from_config(Role::SnapshotClone, sc)?)
                    }
                    _ => None,
                };
                Ok(ClusterSpec::Block(BlockCluster {
                    common,
                    etcd: role(Role::Etcd, &conf.etcd)?,
                    mds: role(Role::Mds, &conf.mds)?,
                    chunkserver: role(Role::ChunkServer, &conf.chunkserver)?,
                    snapshotclone,
                }))
            }
            "curvefs" => {
                if conf.chunkserver.is_some() || conf.snapshotclone.is_some() {
                    warn!(
                        "ignoring block-only roles in curvefs cluster '{}'",
                        conf.name
                    );
                }
                Ok(ClusterSpec::File(FileCluster {
                    common,
                    etcd: role(Role::Etcd, &conf.etcd)?,
                    mds: role(Role::Mds, &conf.mds)?,
                    metaserver: role(Role::MetaServer, &conf.metaserver)?,
                }))
            }
            other => Err(Error::InvalidSpec(format!(
                "unknown cluster kind '{other}', expected curvebs or curvefs"
            ))),
        }
    }

    pub fn from_file(path: &str) -> Result<Self> {
        Self::from_config(&Config::from_file(path)?)
    }

    pub fn descriptor(&self) -> &dyn ClusterDescriptor {
        match self {
            ClusterSpec::Block(block) => block,
            ClusterSpec::File(file) => file,
        }
    }

    pub fn kind(&self) -> StorageKind {
        self.descriptor().kind()
    }

    pub fn common(&self) -> &CommonSpec {
        self.descriptor().common()
    }

    pub fn roles(&self) -> Vec<&RoleSpec> {
        self.descriptor().roles()
    }

    pub fn node_names(&self) -> Vec<String> {
        self.common()
            .nodes
            .iter()
            .map(|n| n.hostname.clone())
            .collect()
    }

    /// role -> {key: value} for every enabled role.
    pub fn role_parameters(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        self.roles()
            .into_iter()
            .map(|spec| (spec.role.as_str().to_string(), spec.parameters()))
            .collect()
    }
}

/// Identity of a cluster resource. At most one reconcile pass is in flight per key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusterKey {
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ObjectMeta {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub deletion_requested: bool,
    #[serde(default)]
    pub finalizers: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClusterPhase {
    /// The resource has never been reconciled.
    #[default]
    #[serde(rename = "")]
    Unseen,
    Creating,
    Running,
    Updating,
    Upgrading,
    Scaling,
    Deleting,
}

impl fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ClusterPhase::Unseen => "",
                ClusterPhase::Creating => "Creating",
                ClusterPhase::Running => "Running",
                ClusterPhase::Updating => "Updating",
                ClusterPhase::Upgrading => "Upgrading",
                ClusterPhase::Scaling => "Scaling",
                ClusterPhase::Deleting => "Deleting",
            }
        )
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionType {
    Progressing,
    Ready,
    Failed,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: ConditionType,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

/// A pending configuration delta for one role: changed key -> new value, where `None` means the
/// key was removed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ModContext {
    pub role: Role,
    pub changes: BTreeMap<String, Option<String>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ClusterStatus {
    pub phase: ClusterPhase,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(rename = "lastModContextSet", default)]
    pub last_mod_context_set: Vec<ModContext>,
}

impl ClusterStatus {
    /// Set a condition, keeping the list ordered by first appearance. The transition time only
    /// moves when the condition's status actually changes.
    pub fn set_condition(
        &mut self,
        kind: ConditionType,
        status: ConditionStatus,
        reason: &str,
        message: &str,
    ) {
        let now = Utc::now();
        match self.conditions.iter_mut().find(|c| c.kind == kind) {
            Some(existing) => {
                if existing.status != status {
                    existing.last_transition_time = now;
                }
                existing.status = status;
                existing.reason = reason.to_string();
                existing.message = message.to_string();
            }
            None => self.conditions.push(Condition {
                kind,
                status,
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: now,
            }),
        }
    }

    pub fn condition(&self, kind: ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.kind == kind)
    }
}

/// CurveCluster is the resource the reconciler drives: the declared spec plus the metadata and
/// status that persist across passes.
#[derive(Debug, Clone)]
pub struct CurveCluster {
    pub metadata: ObjectMeta,
    pub spec: ClusterSpec,
    pub status: ClusterStatus,
}

impl CurveCluster {
    /// Create a resource that has never been reconciled.
    pub fn new(spec: ClusterSpec) -> Self {
        let common = spec.common();
        CurveCluster {
            metadata: ObjectMeta {
                namespace: common.namespace.clone(),
                name: common.name.clone(),
                deletion_requested: false,
                finalizers: vec![FINALIZER.to_string()],
            },
            spec,
            status: ClusterStatus::default(),
        }
    }

    pub fn key(&self) -> ClusterKey {
        ClusterKey {
            namespace: self.metadata.namespace.clone(),
            name: self.metadata.name.clone(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn remove_finalizer(&mut self) {
        self.metadata.finalizers.retain(|f| f != FINALIZER);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_env::bs_config;

    #[test]
    fn kind_dispatch() {
        let mut conf = bs_config(3);
        let spec = ClusterSpec::from_config(&conf).unwrap();
        assert_eq!(spec.kind(), StorageKind::Block);
        assert_eq!(
            spec.roles().iter().map(|r| r.role).collect::<Vec<_>>(),
            vec![Role::Etcd, Role::Mds, Role::ChunkServer, Role::SnapshotClone]
        );

        conf.kind = "curvefs".to_string();
        let spec = ClusterSpec::from_config(&conf).unwrap();
        assert_eq!(spec.descriptor().storage_role(), Role::MetaServer);

        conf.kind = "ceph".to_string();
        assert!(matches!(
            ClusterSpec::from_config(&conf),
            Err(Error::InvalidSpec(_))
        ));
    }

    #[test]
    fn duplicate_nodes_rejected() {
        let mut conf = bs_config(2);
        conf.nodes[1].hostname = conf.nodes[0].hostname.clone();
        assert!(matches!(
            ClusterSpec::from_config(&conf),
            Err(Error::InvalidSpec(_))
        ));
    }

    #[test]
    fn condition_transition_time_moves_on_status_change_only() {
        let mut status = ClusterStatus::default();
        status.set_condition(ConditionType::Ready, ConditionStatus::False, "A", "a");
        let first = status.condition(ConditionType::Ready).unwrap().last_transition_time;

        status.set_condition(ConditionType::Ready, ConditionStatus::False, "B", "b");
        let same = status.condition(ConditionType::Ready).unwrap();
        assert_eq!(same.last_transition_time, first);
        assert_eq!(same.reason, "B");
        assert_eq!(status.conditions.len(), 1);

        status.set_condition(ConditionType::Failed, ConditionStatus::True, "C", "c");
        assert_eq!(status.conditions[1].kind, ConditionType::Failed);
    }

    #[test]
    fn phase_serializes_unseen_as_empty() {
        let json = serde_json::to_string(&ClusterPhase::Unseen).unwrap();
        assert_eq!(json, "\"\"");
        let phase: ClusterPhase = serde_json::from_str("\"Upgrading\"").unwrap();
        assert_eq!(phase, ClusterPhase::Upgrading);
    }
}
