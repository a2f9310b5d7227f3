// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! The registry of tunable config items.
//!
//! An item declares a key, the kind of value it accepts, whether it is left out of the rendered
//! service config, and how its default is computed. Defaults are computed when a deploy config
//! is built, because several of them depend on the role of that deploy config.

use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};

use crate::{
    cluster::Role,
    deploy::DeployConfig,
    error::{Error, Result},
};

/// A resolved config value. Only strings, integers and booleans are representable.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl ConfigValue {
    /// Convert a value from a descriptor file. Floats, arrays, tables and datetimes are rejected.
    pub fn from_toml(role: Role, key: &str, value: &toml::Value) -> Result<Self> {
        match value {
            toml::Value::String(s) => Ok(ConfigValue::Str(s.clone())),
            toml::Value::Integer(i) => Ok(ConfigValue::Int(*i)),
            toml::Value::Boolean(b) => Ok(ConfigValue::Bool(*b)),
            other => Err(Error::UnsupportedValueType {
                role: role.to_string(),
                key: key.to_string(),
                found: other.type_str().to_string(),
            }),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(i) => Some(*i),
            ConfigValue::Str(s) => s.trim().parse().ok(),
            ConfigValue::Bool(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            ConfigValue::Str(s) => s.trim().parse().ok(),
            ConfigValue::Int(_) => None,
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(b) => write!(f, "{b}"),
            ConfigValue::Int(i) => write!(f, "{i}"),
            ConfigValue::Str(s) => write!(f, "{s}"),
        }
    }
}

/// The kind of value an item accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Any,
    Int,
    Str,
    Bool,
    PositiveInt,
}

impl Requirement {
    /// Check `value` against this requirement, normalizing strings that spell out an integer or
    /// a boolean into the typed value.
    pub fn check(&self, key: &str, value: ConfigValue) -> Result<ConfigValue> {
        let invalid = |value: &ConfigValue| Error::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            requirement: self.to_string(),
        };

        match self {
            Requirement::Any => Ok(value),
            Requirement::Str => match value {
                ConfigValue::Str(_) => Ok(value),
                other => Err(invalid(&other)),
            },
            Requirement::Int => match value.as_int() {
                Some(i) => Ok(ConfigValue::Int(i)),
                None => Err(invalid(&value)),
            },
            Requirement::PositiveInt => match value.as_int() {
                Some(i) if i > 0 => Ok(ConfigValue::Int(i)),
                _ => Err(invalid(&value)),
            },
            Requirement::Bool => match value.as_bool() {
                Some(b) => Ok(ConfigValue::Bool(b)),
                None => Err(invalid(&value)),
            },
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Requirement::Any => "any value",
                Requirement::Int => "an integer",
                Requirement::Str => "a string",
                Requirement::Bool => "a boolean",
                Requirement::PositiveInt => "a positive integer",
            }
        )
    }
}

/// Computes a default from the deploy config being built. Must be pure.
pub type DefaultFn = fn(&DeployConfig) -> Option<ConfigValue>;

#[derive(Clone)]
pub enum DefaultRule {
    None,
    Const(ConfigValue),
    Derive(DefaultFn),
}

impl fmt::Debug for DefaultRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultRule::None => write!(f, "None"),
            DefaultRule::Const(v) => write!(f, "Const({v:?})"),
            DefaultRule::Derive(_) => write!(f, "Derive(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigItem {
    pub key: String,
    pub requirement: Requirement,
    /// Excluded items steer deployment (directories, image, copysets) but are never written to
    /// the daemon's config file.
    pub excluded: bool,
    pub default: DefaultRule,
}

impl ConfigItem {
    pub fn default_for(&self, dc: &DeployConfig) -> Option<ConfigValue> {
        match &self.default {
            DefaultRule::None => None,
            DefaultRule::Const(v) => Some(v.clone()),
            DefaultRule::Derive(rule) => rule(dc),
        }
    }
}

/// An immutable set of config items. Build one with `Registry::builder()` or use
/// `Registry::standard()`.
#[derive(Debug, Clone)]
pub struct Registry {
    items: Vec<ConfigItem>,
    index: HashMap<String, usize>,
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    items: Vec<ConfigItem>,
    index: HashMap<String, usize>,
}

impl RegistryBuilder {
    pub fn register(
        &mut self,
        key: &str,
        requirement: Requirement,
        excluded: bool,
        default: DefaultRule,
    ) -> Result<&mut Self> {
        if self.index.contains_key(key) {
            return Err(Error::DuplicateItem(key.to_string()));
        }
        self.index.insert(key.to_string(), self.items.len());
        self.items.push(ConfigItem {
            key: key.to_string(),
            requirement,
            excluded,
            default,
        });
        Ok(self)
    }

    pub fn build(self) -> Registry {
        Registry {
            items: self.items,
            index: self.index,
        }
    }
}

pub const PREFIX: &str = "prefix";
pub const CONTAINER_IMAGE: &str = "container_image";
pub const DATA_DIR: &str = "data_dir";
pub const LOG_DIR: &str = "log_dir";
pub const COPYSETS: &str = "copysets";
pub const ENABLE_EXTERNAL_SERVER: &str = "enable_external_server";
pub const LISTEN_IP: &str = "listen.ip";
pub const LISTEN_PORT: &str = "listen.port";
pub const LISTEN_CLIENT_PORT: &str = "listen.client_port";
pub const LISTEN_DUMMY_PORT: &str = "listen.dummy_port";
pub const LISTEN_PROXY_PORT: &str = "listen.proxy_port";
pub const LISTEN_EXTERNAL_IP: &str = "listen.external_ip";
pub const LISTEN_EXTERNAL_PORT: &str = "listen.external_port";
pub const S3_AK: &str = "s3.ak";
pub const S3_SK: &str = "s3.sk";
pub const S3_ENDPOINT: &str = "s3.endpoint";
pub const S3_BUCKET_NAME: &str = "s3.bucket_name";

/// Port items that are offset by the instance sequence.
pub const PORT_ITEMS: [&str; 5] = [
    LISTEN_PORT,
    LISTEN_CLIENT_PORT,
    LISTEN_DUMMY_PORT,
    LISTEN_PROXY_PORT,
    LISTEN_EXTERNAL_PORT,
];

fn default_prefix(dc: &DeployConfig) -> Option<ConfigValue> {
    Some(ConfigValue::Str(format!("/{}/{}", dc.kind(), dc.role())))
}

fn default_listen_port(dc: &DeployConfig) -> Option<ConfigValue> {
    let port = match dc.role() {
        Role::Etcd => 2380,
        Role::Mds => 6700,
        Role::ChunkServer => 8200,
        Role::SnapshotClone => 5555,
        Role::MetaServer => 6800,
    };
    Some(ConfigValue::Int(port))
}

fn default_client_port(dc: &DeployConfig) -> Option<ConfigValue> {
    match dc.role() {
        Role::Etcd => Some(ConfigValue::Int(2379)),
        _ => None,
    }
}

fn default_dummy_port(dc: &DeployConfig) -> Option<ConfigValue> {
    match dc.role() {
        Role::Mds => Some(ConfigValue::Int(7700)),
        Role::SnapshotClone => Some(ConfigValue::Int(8081)),
        _ => None,
    }
}

fn default_proxy_port(dc: &DeployConfig) -> Option<ConfigValue> {
    match dc.role() {
        Role::SnapshotClone => Some(ConfigValue::Int(8080)),
        _ => None,
    }
}

/// The external port follows the (already offset) listen port.
fn default_external_port(dc: &DeployConfig) -> Option<ConfigValue> {
    dc.get(LISTEN_PORT).cloned()
}

fn default_copysets(dc: &DeployConfig) -> Option<ConfigValue> {
    if dc.role().is_storage() {
        Some(ConfigValue::Int(100))
    } else {
        None
    }
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// The item set every cluster is built with.
    pub fn standard() -> Result<Self> {
        use DefaultRule::{Const, Derive};
        use Requirement::*;

        let mut builder = Self::builder();
        builder
            .register(PREFIX, Str, true, Derive(default_prefix))?
            .register(CONTAINER_IMAGE, Str, true, DefaultRule::None)?
            .register(DATA_DIR, Str, true, DefaultRule::None)?
            .register(LOG_DIR, Str, true, DefaultRule::None)?
            .register(COPYSETS, PositiveInt, true, Derive(default_copysets))?
            .register(
                ENABLE_EXTERNAL_SERVER,
                Bool,
                true,
                Const(ConfigValue::Bool(false)),
            )?
            .register(
                LISTEN_IP,
                Str,
                false,
                Const(ConfigValue::Str("${service_host_ip}".to_string())),
            )?
            .register(LISTEN_PORT, PositiveInt, false, Derive(default_listen_port))?
            .register(
                LISTEN_CLIENT_PORT,
                PositiveInt,
                false,
                Derive(default_client_port),
            )?
            .register(
                LISTEN_DUMMY_PORT,
                PositiveInt,
                false,
                Derive(default_dummy_port),
            )?
            .register(
                LISTEN_PROXY_PORT,
                PositiveInt,
                false,
                Derive(default_proxy_port),
            )?
            .register(
                LISTEN_EXTERNAL_IP,
                Str,
                false,
                Const(ConfigValue::Str("${service_addr}".to_string())),
            )?
            .register(
                LISTEN_EXTERNAL_PORT,
                PositiveInt,
                false,
                Derive(default_external_port),
            )?
            .register(S3_AK, Str, false, DefaultRule::None)?
            .register(S3_SK, Str, false, DefaultRule::None)?
            .register(S3_ENDPOINT, Str, false, DefaultRule::None)?
            .register(S3_BUCKET_NAME, Str, false, DefaultRule::None)?;

        Ok(builder.build())
    }

    pub fn lookup(&self, key: &str) -> Result<&ConfigItem> {
        self.index
            .get(key)
            .map(|i| &self.items[*i])
            .ok_or_else(|| Error::ItemNotFound(key.to_string()))
    }

    /// Items in registration order.
    pub fn items(&self) -> impl Iterator<Item = &ConfigItem> {
        self.items.iter()
    }

    pub fn is_excluded(&self, key: &str) -> bool {
        self.lookup(key).map(|item| item.excluded).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_key_fails_fast() {
        let mut builder = Registry::builder();
        builder
            .register("a", Requirement::Any, false, DefaultRule::None)
            .unwrap();
        let err = builder
            .register("a", Requirement::Int, true, DefaultRule::None)
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateItem(key) if key == "a"));
    }

    #[test]
    fn lookup() {
        let registry = Registry::standard().unwrap();
        assert!(registry.lookup(LISTEN_PORT).is_ok());
        assert!(registry.is_excluded(DATA_DIR));
        assert!(!registry.is_excluded(LISTEN_IP));
        assert!(matches!(
            registry.lookup("no.such.item"),
            Err(Error::ItemNotFound(_))
        ));
    }

    #[test]
    fn requirement_normalizes() {
        assert_eq!(
            Requirement::PositiveInt
                .check("k", ConfigValue::Str("42".to_string()))
                .unwrap(),
            ConfigValue::Int(42)
        );
        assert!(Requirement::PositiveInt
            .check("k", ConfigValue::Int(0))
            .is_err());
        assert_eq!(
            Requirement::Bool
                .check("k", ConfigValue::Str("true".to_string()))
                .unwrap(),
            ConfigValue::Bool(true)
        );
        assert!(Requirement::Str.check("k", ConfigValue::Int(1)).is_err());
    }

    #[test]
    fn unsupported_toml_types() {
        assert!(ConfigValue::from_toml(Role::Mds, "k", &toml::Value::Float(1.5)).is_err());
        assert!(
            ConfigValue::from_toml(Role::Mds, "k", &toml::Value::Array(vec![])).is_err()
        );
        assert_eq!(
            ConfigValue::from_toml(Role::Mds, "k", &toml::Value::Integer(3)).unwrap(),
            ConfigValue::Int(3)
        );
    }
}
