// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Expansion of a cluster descriptor into one DeployConfig per (role, host, instance).

use std::collections::BTreeMap;

use log::{debug, warn};

use crate::{
    cluster::{ClusterDescriptor, Role, RoleSpec, StorageKind},
    config::Node,
    error::{Error, Result},
    item::{self, ConfigValue, Registry},
    substrate::NodeInventory,
    variable::Variables,
};

/// Quorum roles are only ever built on this many nodes.
pub const QUORUM_SIZE: usize = 3;

/// One deployable daemon instance. Built fresh on every pass and never modified afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct DeployConfig {
    kind: StorageKind,
    role: Role,
    id: String,
    parent_id: String,
    host: String,
    host_ip: String,
    host_sequence: usize,
    instances: u32,
    instance_sequence: u32,
    standalone: bool,
    config: BTreeMap<String, ConfigValue>,
    service_config: BTreeMap<String, ConfigValue>,
    variables: Variables,
}

/// `role_host_hostSeq_instanceSeq`
pub fn format_id(role: Role, host: &str, host_sequence: usize, instance_sequence: u32) -> String {
    format!("{role}_{host}_{host_sequence}_{instance_sequence}")
}

impl DeployConfig {
    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parent_id(&self) -> &str {
        &self.parent_id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn host_ip(&self) -> &str {
        &self.host_ip
    }

    pub fn host_sequence(&self) -> usize {
        self.host_sequence
    }

    /// Instances of this role on this host.
    pub fn instances(&self) -> u32 {
        self.instances
    }

    pub fn instance_sequence(&self) -> u32 {
        self.instance_sequence
    }

    pub fn standalone(&self) -> bool {
        self.standalone
    }

    pub fn config(&self) -> &BTreeMap<String, ConfigValue> {
        &self.config
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.config.get(key)
    }

    /// The subset of `config` that is written to the daemon's config file.
    pub fn service_config(&self) -> &BTreeMap<String, ConfigValue> {
        &self.service_config
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    fn get_str(&self, key: &str) -> String {
        self.get(key).map(|v| v.to_string()).unwrap_or_default()
    }

    fn get_port(&self, key: &str) -> u16 {
        self.get(key)
            .and_then(|v| v.as_int())
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(0)
    }

    pub fn prefix(&self) -> String {
        self.get_str(item::PREFIX)
    }

    pub fn image(&self) -> String {
        self.get_str(item::CONTAINER_IMAGE)
    }

    pub fn data_dir(&self) -> String {
        self.get_str(item::DATA_DIR)
    }

    pub fn log_dir(&self) -> String {
        self.get_str(item::LOG_DIR)
    }

    pub fn listen_port(&self) -> u16 {
        self.get_port(item::LISTEN_PORT)
    }

    pub fn listen_external_port(&self) -> u16 {
        self.get_port(item::LISTEN_EXTERNAL_PORT)
    }

    /// The resolved listen address.
    pub fn listen_ip(&self) -> Result<&str> {
        self.variables.get("service_addr")
    }

    pub fn listen_external_ip(&self) -> Result<&str> {
        self.variables.get("service_external_addr")
    }

    pub fn enable_external_server(&self) -> bool {
        self.get(item::ENABLE_EXTERNAL_SERVER)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn copysets(&self) -> u64 {
        self.get(item::COPYSETS)
            .and_then(|v| v.as_int())
            .and_then(|c| u64::try_from(c).ok())
            .unwrap_or(0)
    }

    /// Named ports this instance listens on.
    pub fn ports(&self) -> BTreeMap<String, u16> {
        let names = [
            ("listen", item::LISTEN_PORT),
            ("client", item::LISTEN_CLIENT_PORT),
            ("dummy", item::LISTEN_DUMMY_PORT),
            ("proxy", item::LISTEN_PROXY_PORT),
        ];
        names
            .iter()
            .filter(|(_, key)| self.config.contains_key(*key))
            .map(|(name, key)| (name.to_string(), self.get_port(key)))
            .collect()
    }

    /// The fixed path the daemon reads its config file from.
    pub fn config_path(&self) -> String {
        format!("{}/conf/{}.conf", self.prefix(), self.role)
    }

    /// Render a role's config template for this instance.
    ///
    /// Every `key=value` line whose key is one of this instance's service config items gets the
    /// item's value, then `${name}` references in the line are substituted. Comments, blank lines
    /// and lines without a key are only substituted.
    pub fn render(&self, template: &str) -> Result<String> {
        let mut out = String::with_capacity(template.len());
        for line in template.lines() {
            let trimmed = line.trim_start();
            let rendered = match line.split_once('=') {
                Some((key, value)) if !trimmed.starts_with('#') && !key.trim().is_empty() => {
                    let value = match self.service_config.get(key.trim()) {
                        Some(v) => v.to_string(),
                        None => value.to_string(),
                    };
                    format!("{key}={}", self.variables.render(&value)?)
                }
                _ => self.variables.render(line)?,
            };
            out.push_str(&rendered);
            out.push('\n');
        }
        Ok(out)
    }
}

/// A deploy config before its variables are attached.
struct Draft {
    dc: DeployConfig,
}

impl Draft {
    fn new(kind: StorageKind, role: Role, host: &ResolvedNode, instances: u32, seq: u32) -> Self {
        Draft {
            dc: DeployConfig {
                kind,
                role,
                id: format_id(role, &host.hostname, host.sequence, seq),
                parent_id: format_id(role, &host.hostname, host.sequence, 0),
                host: host.hostname.clone(),
                host_ip: host.ip.clone(),
                host_sequence: host.sequence,
                instances,
                instance_sequence: seq,
                standalone: host.standalone,
                config: BTreeMap::new(),
                service_config: BTreeMap::new(),
                variables: Variables::new(),
            },
        }
    }

    /// Register the variables that only depend on this instance and resolve them.
    fn local_variables(&self) -> Result<Variables> {
        let dc = &self.dc;
        let mut vars = Variables::new();
        vars.register("service_id", &dc.id)?;
        vars.register("service_role", dc.role.as_str())?;
        vars.register("service_host", &dc.host)?;
        vars.register("service_host_ip", &dc.host_ip)?;
        vars.register("service_host_sequence", &dc.host_sequence.to_string())?;
        vars.register(
            "service_instance_sequence",
            &dc.instance_sequence.to_string(),
        )?;
        vars.register(
            "format_instance_sequence",
            &format!("{:02}", dc.instance_sequence),
        )?;

        let from_items = [
            ("prefix", item::PREFIX),
            ("service_addr", item::LISTEN_IP),
            ("service_port", item::LISTEN_PORT),
            ("service_client_port", item::LISTEN_CLIENT_PORT),
            ("service_dummy_port", item::LISTEN_DUMMY_PORT),
            ("service_proxy_port", item::LISTEN_PROXY_PORT),
            ("service_external_addr", item::LISTEN_EXTERNAL_IP),
            ("service_external_port", item::LISTEN_EXTERNAL_PORT),
            ("data_dir", item::DATA_DIR),
            ("log_dir", item::LOG_DIR),
        ];
        for (name, key) in from_items {
            if let Some(value) = dc.config.get(key) {
                vars.register(name, &value.to_string())?;
            }
        }

        vars.build()?;
        Ok(vars)
    }
}

#[derive(Debug, Clone)]
struct ResolvedNode {
    hostname: String,
    ip: String,
    sequence: usize,
    standalone: bool,
    usable: bool,
}

/// Builds deploy configs from a cluster descriptor, a config item registry, and the node
/// inventory.
pub struct Builder<'a> {
    registry: &'a Registry,
    inventory: &'a NodeInventory,
}

impl<'a> Builder<'a> {
    pub fn new(registry: &'a Registry, inventory: &'a NodeInventory) -> Self {
        Builder {
            registry,
            inventory,
        }
    }

    /// Build every deploy config of the cluster, ordered role-major, then by declared host
    /// order, then by instance sequence. Any error aborts the whole build.
    pub fn build(&self, spec: &dyn ClusterDescriptor) -> Result<Vec<DeployConfig>> {
        let nodes = self.resolve_nodes(&spec.common().nodes)?;

        let quorum: Vec<&ResolvedNode> = nodes
            .iter()
            .take(QUORUM_SIZE)
            .filter(|n| n.usable)
            .collect();
        if quorum.is_empty() {
            return Err(Error::NoQuorumNodes);
        }
        if quorum.len() < QUORUM_SIZE.min(nodes.len()) {
            warn!(
                "only {} of the first {} nodes can host quorum roles",
                quorum.len(),
                QUORUM_SIZE.min(nodes.len())
            );
        }

        let mut drafts = Vec::new();
        for role_spec in spec.roles() {
            let hosts: Vec<&ResolvedNode> = if role_spec.role.is_quorum() {
                quorum.clone()
            } else {
                nodes.iter().collect()
            };
            for host in hosts {
                for seq in 0..role_spec.instances {
                    let mut draft =
                        Draft::new(spec.kind(), role_spec.role, host, role_spec.instances, seq);
                    self.merge(&mut draft, spec, role_spec)?;
                    drafts.push(draft);
                }
            }
        }

        let locals = drafts
            .iter()
            .map(Draft::local_variables)
            .collect::<Result<Vec<_>>>()?;
        let cluster_vars = cluster_variables(&drafts, &locals)?;

        let mut dcs = Vec::with_capacity(drafts.len());
        for (draft, mut vars) in drafts.into_iter().zip(locals) {
            for (name, value) in &cluster_vars {
                vars.register(name, value)?;
            }
            vars.build()?;
            let mut dc = draft.dc;
            dc.variables = vars;
            dcs.push(dc);
        }

        debug!("built {} deploy configs", dcs.len());
        Ok(dcs)
    }

    fn resolve_nodes(&self, nodes: &[Node]) -> Result<Vec<ResolvedNode>> {
        nodes
            .iter()
            .enumerate()
            .map(|(sequence, node)| {
                let info = self.inventory.get(&node.hostname);
                let ip = match (&node.ip, info) {
                    (Some(ip), _) => ip.clone(),
                    (None, Some(info)) => info.ip.clone(),
                    (None, None) => return Err(Error::NodeNotFound(node.hostname.clone())),
                };
                Ok(ResolvedNode {
                    hostname: node.hostname.clone(),
                    ip,
                    sequence,
                    standalone: node.standalone,
                    // A node the inventory does not know about but that carries an explicit
                    // address is taken at its word.
                    usable: info.is_none() || self.inventory.is_usable(&node.hostname),
                })
            })
            .collect()
    }

    /// Merge global settings, role settings, role overrides and item defaults into the draft's
    /// config map.
    fn merge(
        &self,
        draft: &mut Draft,
        spec: &dyn ClusterDescriptor,
        role_spec: &RoleSpec,
    ) -> Result<()> {
        let role = role_spec.role;
        let seq = draft.dc.instance_sequence;
        let common = spec.common();
        let role_dir = format!("{}{}", role, seq);

        let mut explicit: BTreeMap<String, ConfigValue> = BTreeMap::new();
        explicit.insert(
            item::CONTAINER_IMAGE.to_string(),
            ConfigValue::Str(common.image.clone()),
        );
        let data_dir = role_spec.data_dir.as_deref().unwrap_or(&common.data_dir);
        let log_dir = role_spec.log_dir.as_deref().unwrap_or(&common.log_dir);
        explicit.insert(
            item::DATA_DIR.to_string(),
            ConfigValue::Str(join_dir(data_dir, &role_dir)),
        );
        explicit.insert(
            item::LOG_DIR.to_string(),
            ConfigValue::Str(join_dir(log_dir, &role_dir)),
        );
        if role.is_storage() {
            let copysets = role_spec.copysets.unwrap_or(common.copysets);
            explicit.insert(item::COPYSETS.to_string(), ConfigValue::Int(copysets as i64));
        }
        let s3 = [
            (item::S3_AK, &common.s3.ak),
            (item::S3_SK, &common.s3.sk),
            (item::S3_ENDPOINT, &common.s3.endpoint),
            (item::S3_BUCKET_NAME, &common.s3.bucket_name),
        ];
        for (key, value) in s3 {
            if let Some(value) = value {
                explicit.insert(key.to_string(), ConfigValue::Str(value.clone()));
            }
        }
        let ports = [
            (item::LISTEN_PORT, role_spec.port),
            (item::LISTEN_CLIENT_PORT, role_spec.client_port),
            (item::LISTEN_DUMMY_PORT, role_spec.dummy_port),
            (item::LISTEN_PROXY_PORT, role_spec.proxy_port),
            (item::LISTEN_EXTERNAL_PORT, role_spec.external_port),
        ];
        for (key, port) in ports {
            if let Some(port) = port {
                explicit.insert(key.to_string(), ConfigValue::Int(i64::from(port)));
            }
        }
        for (key, value) in &role_spec.config {
            explicit.insert(key.clone(), ConfigValue::from_toml(role, key, value)?);
        }

        // Registered items first, in registration order, so derived defaults can see the items
        // registered before them.
        for registered in self.registry.items() {
            let key = registered.key.as_str();
            let (value, offset) = match explicit.remove(key) {
                Some(value) => (value, item::PORT_ITEMS.contains(&key)),
                None => match registered.default_for(&draft.dc) {
                    Some(value) => (
                        value,
                        item::PORT_ITEMS.contains(&key) && key != item::LISTEN_EXTERNAL_PORT,
                    ),
                    None => continue,
                },
            };
            let mut value = registered.requirement.check(key, value)?;
            if offset {
                value = offset_port(key, value, seq)?;
            }
            if !registered.excluded {
                draft.dc.service_config.insert(key.to_string(), value.clone());
            }
            draft.dc.config.insert(key.to_string(), value);
        }

        // Whatever is left is free-form daemon configuration.
        for (key, value) in explicit {
            draft.dc.service_config.insert(key.clone(), value.clone());
            draft.dc.config.insert(key, value);
        }

        Ok(())
    }
}

fn join_dir(base: &str, leaf: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), leaf)
}

fn offset_port(key: &str, value: ConfigValue, seq: u32) -> Result<ConfigValue> {
    let port = value.as_int().unwrap_or(0) + i64::from(seq);
    if port > i64::from(u16::MAX) {
        return Err(Error::InvalidValue {
            key: key.to_string(),
            value: port.to_string(),
            requirement: "a port number".to_string(),
        });
    }
    Ok(ConfigValue::Int(port))
}

/// Cluster-wide variables and the role whose deploy configs they aggregate.
const CLUSTER_VARIABLES: [(&str, Role); 10] = [
    ("cluster_etcd_http_addr", Role::Etcd),
    ("cluster_etcd_addr", Role::Etcd),
    ("cluster_mds_addr", Role::Mds),
    ("cluster_mds_dummy_addr", Role::Mds),
    ("cluster_mds_dummy_port", Role::Mds),
    ("cluster_chunkserver_addr", Role::ChunkServer),
    ("cluster_snapshotclone_addr", Role::SnapshotClone),
    ("cluster_snapshotclone_proxy_addr", Role::SnapshotClone),
    ("cluster_snapshotclone_dummy_port", Role::SnapshotClone),
    ("cluster_metaserver_addr", Role::MetaServer),
];

/// One deploy config's entry in the cluster variable `name`.
fn cluster_entry(name: &str, dc: &DeployConfig, vars: &Variables) -> Result<String> {
    let addr = |port: &str| -> Result<String> {
        Ok(format!("{}:{}", vars.get("service_addr")?, vars.get(port)?))
    };
    match name {
        "cluster_etcd_http_addr" => Ok(format!(
            "etcd{}{}=http://{}",
            dc.host_sequence,
            dc.instance_sequence,
            addr("service_port")?
        )),
        "cluster_etcd_addr" => addr("service_client_port"),
        "cluster_mds_dummy_addr" => addr("service_dummy_port"),
        "cluster_snapshotclone_proxy_addr" => addr("service_proxy_port"),
        "cluster_mds_dummy_port" | "cluster_snapshotclone_dummy_port" => {
            Ok(vars.get("service_dummy_port")?.to_string())
        }
        _ => addr("service_port"),
    }
}

/// Comma-joined, build-ordered aggregates over every deploy config of a role. Roles the cluster
/// does not run contribute no variable.
fn cluster_variables(drafts: &[Draft], locals: &[Variables]) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for (name, role) in CLUSTER_VARIABLES {
        let values = drafts
            .iter()
            .zip(locals)
            .filter(|(draft, _)| draft.dc.role == role)
            .map(|(draft, vars)| cluster_entry(name, &draft.dc, vars))
            .collect::<Result<Vec<_>>>()?;
        if !values.is_empty() {
            out.push((name.to_string(), values.join(",")));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cluster::ClusterSpec,
        item::{DefaultRule, Requirement},
        test_env::{bs_config, fs_config},
    };

    fn build(conf: &crate::config::Config) -> Result<Vec<DeployConfig>> {
        let registry = Registry::standard().unwrap();
        let inventory = NodeInventory::from_config(conf);
        let spec = ClusterSpec::from_config(conf).unwrap();
        Builder::new(&registry, &inventory).build(spec.descriptor())
    }

    #[test]
    fn quorum_roles_restricted_to_three_nodes() {
        let dcs = build(&bs_config(5)).unwrap();
        for role in [Role::Etcd, Role::Mds, Role::SnapshotClone] {
            let hosts: Vec<&str> = dcs
                .iter()
                .filter(|dc| dc.role() == role)
                .map(|dc| dc.host())
                .collect();
            assert_eq!(hosts, vec!["node1", "node2", "node3"]);
        }
        assert_eq!(
            dcs.iter().filter(|dc| dc.role() == Role::ChunkServer).count(),
            5
        );
    }

    #[test]
    fn ordering_and_ids() {
        let mut conf = bs_config(2);
        conf.chunkserver.as_mut().unwrap().instances = Some(2);
        let dcs = build(&conf).unwrap();
        let ids: Vec<&str> = dcs.iter().map(|dc| dc.id()).collect();
        assert_eq!(
            ids,
            vec![
                "etcd_node1_0_0",
                "etcd_node2_1_0",
                "mds_node1_0_0",
                "mds_node2_1_0",
                "chunkserver_node1_0_0",
                "chunkserver_node1_0_1",
                "chunkserver_node2_1_0",
                "chunkserver_node2_1_1",
                "snapshotclone_node1_0_0",
                "snapshotclone_node2_1_0",
            ]
        );
        for dc in &dcs {
            assert!(ids.contains(&dc.parent_id()));
            assert!(dc.parent_id().ends_with("_0"));
        }
    }

    #[test]
    fn colocated_ports_are_disjoint() {
        let mut conf = bs_config(1);
        let cs = conf.chunkserver.as_mut().unwrap();
        cs.instances = Some(4);
        cs.port = Some(18200);
        let dcs = build(&conf).unwrap();
        let ports: Vec<u16> = dcs
            .iter()
            .filter(|dc| dc.role() == Role::ChunkServer)
            .map(|dc| dc.listen_port())
            .collect();
        assert_eq!(ports, vec![18200, 18201, 18202, 18203]);
        let external: Vec<u16> = dcs
            .iter()
            .filter(|dc| dc.role() == Role::ChunkServer)
            .map(|dc| dc.listen_external_port())
            .collect();
        assert_eq!(external, ports);
    }

    #[test]
    fn role_defaults() {
        let dcs = build(&bs_config(1)).unwrap();
        let etcd = &dcs[0];
        assert_eq!(etcd.listen_port(), 2380);
        assert_eq!(etcd.ports().get("client"), Some(&2379));
        assert_eq!(etcd.prefix(), "/curvebs/etcd");
        assert_eq!(etcd.listen_ip().unwrap(), "10.0.0.1");
        assert_eq!(etcd.listen_external_ip().unwrap(), "10.0.0.1");
        assert_eq!(etcd.copysets(), 0);
        let cs = dcs.iter().find(|dc| dc.role() == Role::ChunkServer).unwrap();
        assert_eq!(cs.listen_port(), 8200);
        assert_eq!(cs.copysets(), 100);
        assert!(!cs.service_config().contains_key(item::COPYSETS));
        assert!(cs.service_config().contains_key(item::LISTEN_PORT));
    }

    #[test]
    fn directories_are_suffixed() {
        let mut conf = bs_config(1);
        let cs = conf.chunkserver.as_mut().unwrap();
        cs.instances = Some(2);
        cs.data_dir = Some("/disk/".to_string());
        let dcs = build(&conf).unwrap();
        let cs: Vec<&DeployConfig> = dcs
            .iter()
            .filter(|dc| dc.role() == Role::ChunkServer)
            .collect();
        assert_eq!(cs[0].data_dir(), "/disk/chunkserver0");
        assert_eq!(cs[1].data_dir(), "/disk/chunkserver1");
        assert_eq!(cs[1].log_dir(), "/logs/chunkserver1");
        assert_eq!(dcs[0].data_dir(), "/data/etcd0");
    }

    #[test]
    fn unsupported_value_aborts_build() {
        let mut conf = bs_config(3);
        conf.mds
            .as_mut()
            .unwrap()
            .config
            .insert("mds.ratio".to_string(), toml::Value::Float(0.5));
        assert!(matches!(
            build(&conf),
            Err(Error::UnsupportedValueType { key, .. }) if key == "mds.ratio"
        ));
    }

    #[test]
    fn no_quorum_nodes() {
        let conf = bs_config(3);
        let registry = Registry::standard().unwrap();
        let mut inventory = NodeInventory::new();
        for node in &conf.nodes {
            inventory.insert(&node.hostname, node.ip.as_deref().unwrap_or(""), false, true);
        }
        let mut conf = conf.clone();
        for node in conf.nodes.iter_mut() {
            node.ip = None;
        }
        let spec = ClusterSpec::from_config(&conf).unwrap();
        assert!(matches!(
            Builder::new(&registry, &inventory).build(spec.descriptor()),
            Err(Error::NoQuorumNodes)
        ));
    }

    #[test]
    fn unknown_node() {
        let mut conf = bs_config(3);
        conf.nodes[2].ip = None;
        assert!(matches!(build(&conf), Err(Error::NodeNotFound(n)) if n == "node3"));
    }

    #[test]
    fn deterministic() {
        let conf = bs_config(4);
        assert_eq!(build(&conf).unwrap(), build(&conf).unwrap());
    }

    #[test]
    fn cluster_variables_are_aggregated_in_build_order() {
        let dcs = build(&bs_config(4)).unwrap();
        let vars = dcs[0].variables();
        assert_eq!(
            vars.get("cluster_etcd_http_addr").unwrap(),
            "etcd00=http://10.0.0.1:2380,etcd10=http://10.0.0.2:2380,etcd20=http://10.0.0.3:2380"
        );
        assert_eq!(
            vars.get("cluster_mds_addr").unwrap(),
            "10.0.0.1:6700,10.0.0.2:6700,10.0.0.3:6700"
        );
        assert_eq!(
            vars.get("cluster_chunkserver_addr").unwrap(),
            "10.0.0.1:8200,10.0.0.2:8200,10.0.0.3:8200,10.0.0.4:8200"
        );
        assert!(!vars.contains("cluster_metaserver_addr"));

        let dcs = build(&fs_config(3)).unwrap();
        assert!(dcs[0].variables().contains("cluster_metaserver_addr"));
        assert!(!dcs[0].variables().contains("cluster_chunkserver_addr"));
    }

    #[test]
    fn render_overrides_and_substitutes() {
        let mut conf = bs_config(3);
        conf.mds.as_mut().unwrap().config.insert(
            "mds.etcd.timeout".to_string(),
            toml::Value::Integer(7),
        );
        let dcs = build(&conf).unwrap();
        let mds = dcs.iter().find(|dc| dc.role() == Role::Mds).unwrap();
        let template = "# ${service_role} config\n\
                        mds.listen.addr=${service_addr}:${service_port}\n\
                        mds.etcd.endpoint=${cluster_etcd_addr}\n\
                        mds.etcd.timeout=1\n\
                        listen.port=1\n";
        let text = mds.render(template).unwrap();
        assert_eq!(
            text,
            "# mds config\n\
             mds.listen.addr=10.0.0.1:6700\n\
             mds.etcd.endpoint=10.0.0.1:2379,10.0.0.2:2379,10.0.0.3:2379\n\
             mds.etcd.timeout=7\n\
             listen.port=6700\n"
        );

        assert!(matches!(
            mds.render("a=${nope}\n"),
            Err(Error::UndefinedVariable(n)) if n == "nope"
        ));
    }

    #[test]
    fn alternate_registry() {
        let mut builder = Registry::builder();
        builder
            .register(
                item::LISTEN_IP,
                Requirement::Str,
                false,
                DefaultRule::Const(ConfigValue::Str("${service_host}".to_string())),
            )
            .unwrap()
            .register(
                item::LISTEN_PORT,
                Requirement::PositiveInt,
                false,
                DefaultRule::Const(ConfigValue::Int(9000)),
            )
            .unwrap()
            .register(
                item::LISTEN_CLIENT_PORT,
                Requirement::PositiveInt,
                false,
                DefaultRule::Const(ConfigValue::Int(9100)),
            )
            .unwrap()
            .register(
                item::LISTEN_DUMMY_PORT,
                Requirement::PositiveInt,
                false,
                DefaultRule::Const(ConfigValue::Int(9200)),
            )
            .unwrap()
            .register(
                item::LISTEN_PROXY_PORT,
                Requirement::PositiveInt,
                false,
                DefaultRule::Const(ConfigValue::Int(9300)),
            )
            .unwrap();
        let registry = builder.build();
        let conf = bs_config(1);
        let inventory = NodeInventory::from_config(&conf);
        let spec = ClusterSpec::from_config(&conf).unwrap();
        let dcs = Builder::new(&registry, &inventory)
            .build(spec.descriptor())
            .unwrap();
        assert_eq!(dcs[0].listen_ip().unwrap(), "node1");
        assert_eq!(dcs[0].listen_port(), 9000);
    }
}
