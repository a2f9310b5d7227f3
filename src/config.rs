// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Config, along with its children Node, RoleConfig, and S3Config, is the model for a Curve
/// cluster as written in a cluster descriptor file. The descriptor is deserialized into a Config
/// object and then converted into a `cluster::ClusterSpec`, which is what the rest of the crate
/// works with.
///
/// The file model is intentionally loose (almost everything is optional) so that validation
/// errors can be reported with context instead of as raw deserialization failures.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    /// Either "curvebs" or "curvefs".
    pub kind: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
    pub image: String,
    pub data_dir: String,
    pub log_dir: String,
    pub copysets: Option<u64>,
    pub nodes: Vec<Node>,
    pub etcd: Option<RoleConfig>,
    pub mds: Option<RoleConfig>,
    pub chunkserver: Option<RoleConfig>,
    pub snapshotclone: Option<RoleConfig>,
    pub metaserver: Option<RoleConfig>,
    pub s3: Option<S3Config>,
}

fn default_namespace() -> String {
    "curve".to_string()
}

impl Config {
    /// Read and parse a cluster descriptor from `path`.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Node {
    pub hostname: String,
    /// Overrides the address reported by the node inventory.
    pub ip: Option<String>,
    /// A standalone host gives every co-located instance its own address, so the placement
    /// document keeps their ports.
    #[serde(default)]
    pub standalone: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RoleConfig {
    pub port: Option<u16>,
    pub client_port: Option<u16>,
    pub dummy_port: Option<u16>,
    pub proxy_port: Option<u16>,
    pub external_port: Option<u16>,
    pub instances: Option<u32>,
    pub data_dir: Option<String>,
    pub log_dir: Option<String>,
    pub copysets: Option<u64>,
    /// Only meaningful for snapshotclone, which is optional in a block cluster.
    pub enable: Option<bool>,
    #[serde(default)]
    pub config: BTreeMap<String, toml::Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct S3Config {
    pub ak: Option<String>,
    pub sk: Option<String>,
    pub endpoint: Option<String>,
    pub bucket_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal() {
        let config: Config = toml::from_str(
            r#"
            kind = "curvebs"
            name = "c1"
            image = "opencurvedocker/curvebs:v1.2"
            data_dir = "/curvebs/data"
            log_dir = "/curvebs/log"
            nodes = [{ hostname = "node1", ip = "10.0.0.1" }]

            [chunkserver]
            instances = 2
            [chunkserver.config]
            "chunkfilepool.enable_get_chunk_from_pool" = true
            "#,
        )
        .unwrap();

        assert_eq!(config.namespace, "curve");
        assert!(!config.nodes[0].standalone);
        let cs = config.chunkserver.unwrap();
        assert_eq!(cs.instances, Some(2));
        assert_eq!(
            cs.config.get("chunkfilepool.enable_get_chunk_from_pool"),
            Some(&toml::Value::Boolean(true))
        );
    }
}
