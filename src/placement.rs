// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! The placement document: which zone and pool every storage-serving instance belongs to, and
//! how many copysets the pool gets.

use serde::{Deserialize, Serialize};

use crate::{
    cluster::{Role, StorageKind},
    deploy::DeployConfig,
    error::{Error, Result},
};

pub const ZONE_COUNT: usize = 3;
pub const REPLICAS: u64 = 3;
pub const POOL_NAME: &str = "pool1";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Server {
    pub name: String,
    pub internalip: String,
    pub internalport: u16,
    pub externalip: String,
    pub externalport: u16,
    pub zone: String,
    /// Set for block clusters.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub physicalpool: Option<String>,
    /// Set for file clusters.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pool: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LogicalPool {
    pub name: String,
    pub replicasnum: u64,
    pub zonenum: u64,
    pub copysetnum: u64,
    #[serde(rename = "type")]
    pub kind: u32,
    pub scatterwidth: u32,
    pub physicalpool: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Pool {
    pub name: String,
    pub replicasnum: u64,
    pub zonenum: u64,
    pub copysetnum: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub servers: Vec<Server>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub logicalpools: Option<Vec<LogicalPool>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pools: Option<Vec<Pool>>,
    pub npools: u32,
}

impl Topology {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// The pool's copyset budget.
    pub fn copysets(&self) -> u64 {
        match (&self.logicalpools, &self.pools) {
            (Some(pools), _) => pools.iter().map(|p| p.copysetnum).sum(),
            (None, Some(pools)) => pools.iter().map(|p| p.copysetnum).sum(),
            (None, None) => 0,
        }
    }
}

/// Copysets of the pool: the summed per-instance budget spread over the replicas, never less
/// than one.
pub fn pool_copysets(budgets: impl IntoIterator<Item = u64>) -> u64 {
    (budgets.into_iter().sum::<u64>() / REPLICAS).max(1)
}

/// Plan the placement document from a pass's deploy configs. Only storage-serving instances are
/// placed; the input order does not matter.
pub fn plan(dcs: &[DeployConfig]) -> Result<Topology> {
    let mut storage: Vec<&DeployConfig> = dcs.iter().filter(|dc| dc.role().is_storage()).collect();
    if storage.is_empty() {
        return Err(Error::InvalidSpec(
            "cluster has no storage-serving instances to place".to_string(),
        ));
    }
    storage.sort_by_key(|dc| (dc.role(), dc.host_sequence(), dc.instance_sequence()));

    let kind = storage[0].kind();
    let mut servers = Vec::with_capacity(storage.len());
    let mut zone = 0;
    let mut last_host: Option<(Role, usize)> = None;

    for dc in &storage {
        let host = (dc.role(), dc.host_sequence());
        if last_host != Some(host) {
            zone = zone % ZONE_COUNT + 1;
            last_host = Some(host);
        }

        let internalip = dc.listen_ip()?.to_string();
        let (mut internalport, mut externalport) = (dc.listen_port(), dc.listen_external_port());
        let externalip = if dc.enable_external_server() {
            dc.listen_external_ip()?.to_string()
        } else {
            externalport = internalport;
            internalip.clone()
        };
        if dc.instances() > 1 && !dc.standalone() {
            internalport = 0;
            externalport = 0;
        }

        let (physicalpool, pool) = match kind {
            StorageKind::Block => (Some(POOL_NAME.to_string()), None),
            StorageKind::File => (None, Some(POOL_NAME.to_string())),
        };
        servers.push(Server {
            name: format!("{}_{}_{}", dc.host(), dc.role(), dc.instance_sequence()),
            internalip,
            internalport,
            externalip,
            externalport,
            zone: format!("zone{zone}"),
            physicalpool,
            pool,
        });
    }

    let copysetnum = pool_copysets(storage.iter().map(|dc| dc.copysets()));
    let (logicalpools, pools) = match kind {
        StorageKind::Block => (
            Some(vec![LogicalPool {
                name: POOL_NAME.to_string(),
                replicasnum: REPLICAS,
                zonenum: ZONE_COUNT as u64,
                copysetnum,
                kind: 0,
                scatterwidth: 0,
                physicalpool: POOL_NAME.to_string(),
            }]),
            None,
        ),
        StorageKind::File => (
            None,
            Some(vec![Pool {
                name: POOL_NAME.to_string(),
                replicasnum: REPLICAS,
                zonenum: ZONE_COUNT as u64,
                copysetnum,
            }]),
        ),
    };

    Ok(Topology {
        servers,
        logicalpools,
        pools,
        npools: 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cluster::ClusterSpec,
        config::Config,
        deploy::Builder,
        item::Registry,
        substrate::NodeInventory,
        test_env::{bs_config, fs_config},
    };

    fn plan_for(conf: &Config) -> Topology {
        let registry = Registry::standard().unwrap();
        let inventory = NodeInventory::from_config(conf);
        let spec = ClusterSpec::from_config(conf).unwrap();
        let dcs = Builder::new(&registry, &inventory)
            .build(spec.descriptor())
            .unwrap();
        plan(&dcs).unwrap()
    }

    #[test]
    fn zones_round_robin_over_hosts() {
        let topology = plan_for(&bs_config(7));
        let zones: Vec<&str> = topology.servers.iter().map(|s| s.zone.as_str()).collect();
        assert_eq!(
            zones,
            vec!["zone1", "zone2", "zone3", "zone1", "zone2", "zone3", "zone1"]
        );
    }

    #[test]
    fn colocated_instances_share_zone_and_lose_ports() {
        let mut conf = bs_config(2);
        conf.chunkserver.as_mut().unwrap().instances = Some(2);
        let topology = plan_for(&conf);
        let servers: Vec<(&str, u16, &str)> = topology
            .servers
            .iter()
            .map(|s| (s.zone.as_str(), s.internalport, s.name.as_str()))
            .collect();
        assert_eq!(
            servers,
            vec![
                ("zone1", 0, "node1_chunkserver_0"),
                ("zone1", 0, "node1_chunkserver_1"),
                ("zone2", 0, "node2_chunkserver_0"),
                ("zone2", 0, "node2_chunkserver_1"),
            ]
        );
        assert!(topology.servers.iter().all(|s| s.externalport == 0));

        conf.nodes[0].standalone = true;
        let topology = plan_for(&conf);
        assert_eq!(topology.servers[0].internalport, 8200);
        assert_eq!(topology.servers[1].internalport, 8201);
        assert_eq!(topology.servers[2].internalport, 0);
    }

    #[test]
    fn copyset_math() {
        let topology = plan_for(&bs_config(3));
        assert_eq!(topology.copysets(), 100);
        let topology = plan_for(&bs_config(1));
        assert_eq!(topology.copysets(), 33);
        assert_eq!(pool_copysets([1]), 1);
        assert_eq!(pool_copysets([100, 100, 100]), 100);
        assert_eq!(pool_copysets([]), 1);
    }

    #[test]
    fn block_and_file_documents() {
        let bs = plan_for(&bs_config(3));
        assert_eq!(bs.npools, 1);
        assert_eq!(bs.servers[0].physicalpool.as_deref(), Some("pool1"));
        assert!(bs.pools.is_none());
        let json = bs.to_json().unwrap();
        assert!(json.contains("\"logicalpools\""));
        assert!(json.contains("\"type\": 0"));
        assert!(!json.contains("\"pools\""));

        let fs = plan_for(&fs_config(3));
        assert_eq!(fs.servers[0].pool.as_deref(), Some("pool1"));
        assert!(fs.logicalpools.is_none());
        assert_eq!(fs.servers[0].internalport, 6800);
        assert_eq!(Topology::from_json(&fs.to_json().unwrap()).unwrap(), fs);
    }

    #[test]
    fn byte_stable() {
        let conf = bs_config(5);
        assert_eq!(
            plan_for(&conf).to_json().unwrap(),
            plan_for(&conf).to_json().unwrap()
        );
    }
}
