// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{
    cluster::{ClusterSpec, ModContext, Role},
    error::Result,
    substrate::ConfigArtifact,
};

use super::cleanup::{self, Footprint};

const BASELINE_KEY: &str = "baseline.json";

/// The spec parameters a cluster was last deployed with.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Baseline {
    pub image: String,
    pub nodes: Vec<String>,
    /// role -> {key: value}
    pub roles: BTreeMap<String, BTreeMap<String, String>>,
    /// Every instance ever deployed for the cluster, sorted by id. Entries are never dropped, so
    /// cleanup reaches instances that are no longer in the descriptor.
    #[serde(default)]
    pub footprints: Vec<Footprint>,
}

/// How a live spec differs from its baseline. Only the most significant difference is reported:
/// an image change wins over a node change, which wins over parameter changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drift {
    None,
    Upgrade { from: String, to: String },
    Scale { added: Vec<String>, removed: Vec<String> },
    Update(Vec<ModContext>),
}

impl Baseline {
    pub fn from_spec(spec: &ClusterSpec) -> Self {
        Baseline {
            image: spec.common().image.clone(),
            nodes: spec.node_names(),
            roles: spec.role_parameters(),
            footprints: cleanup::footprints(spec.descriptor()),
        }
        .sorted()
    }

    /// Keep every footprint recorded in `previous` alongside this baseline's own.
    pub fn carry_footprints(mut self, previous: &Baseline) -> Self {
        self.footprints.extend(previous.footprints.iter().cloned());
        self.sorted()
    }

    fn sorted(mut self) -> Self {
        self.footprints.sort();
        self.footprints.dedup();
        self
    }

    pub fn artifact_name(cluster: &str) -> String {
        format!("{cluster}-baseline")
    }

    pub fn to_artifact(&self, namespace: &str, cluster: &str) -> Result<ConfigArtifact> {
        Ok(ConfigArtifact::new(
            namespace,
            &Self::artifact_name(cluster),
            BASELINE_KEY,
            serde_json::to_string_pretty(self)?,
        ))
    }

    pub fn from_artifact(artifact: &ConfigArtifact) -> Result<Self> {
        Ok(serde_json::from_str(artifact.value(BASELINE_KEY)?)?)
    }

    pub fn detect(&self, spec: &ClusterSpec) -> Result<Drift> {
        let image = &spec.common().image;
        if *image != self.image {
            return Ok(Drift::Upgrade {
                from: self.image.clone(),
                to: image.clone(),
            });
        }

        let nodes = spec.node_names();
        if nodes != self.nodes {
            let added = nodes
                .iter()
                .filter(|n| !self.nodes.contains(n))
                .cloned()
                .collect();
            let removed = self
                .nodes
                .iter()
                .filter(|n| !nodes.contains(n))
                .cloned()
                .collect();
            return Ok(Drift::Scale { added, removed });
        }

        let mods = diff_roles(&self.roles, &spec.role_parameters())?;
        if mods.is_empty() {
            Ok(Drift::None)
        } else {
            Ok(Drift::Update(mods))
        }
    }
}

/// One ModContext per role with at least one added, changed or removed key, in build order.
fn diff_roles(
    old: &BTreeMap<String, BTreeMap<String, String>>,
    new: &BTreeMap<String, BTreeMap<String, String>>,
) -> Result<Vec<ModContext>> {
    let empty = BTreeMap::new();
    let names: BTreeSet<&String> = old.keys().chain(new.keys()).collect();

    let mut mods = Vec::new();
    for name in names {
        let before = old.get(name).unwrap_or(&empty);
        let after = new.get(name).unwrap_or(&empty);
        let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();

        let changes: BTreeMap<String, Option<String>> = keys
            .into_iter()
            .filter(|key| before.get(*key) != after.get(*key))
            .map(|key| (key.clone(), after.get(key).cloned()))
            .collect();
        if !changes.is_empty() {
            mods.push(ModContext {
                role: name.parse::<Role>()?,
                changes,
            });
        }
    }
    mods.sort_by_key(|m| m.role);
    Ok(mods)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_env::bs_config;

    fn spec(conf: &crate::config::Config) -> ClusterSpec {
        ClusterSpec::from_config(conf).unwrap()
    }

    #[test]
    fn no_drift() {
        let conf = bs_config(3);
        let baseline = Baseline::from_spec(&spec(&conf));
        assert_eq!(baseline.detect(&spec(&conf)).unwrap(), Drift::None);
    }

    #[test]
    fn image_wins_over_everything() {
        let conf = bs_config(3);
        let baseline = Baseline::from_spec(&spec(&conf));

        let mut changed = conf.clone();
        changed.image = "opencurvedocker/curvebs:v1.3".to_string();
        changed.nodes.pop();
        changed.mds.as_mut().unwrap().port = Some(16700);
        assert!(matches!(
            baseline.detect(&spec(&changed)).unwrap(),
            Drift::Upgrade { to, .. } if to == "opencurvedocker/curvebs:v1.3"
        ));
    }

    #[test]
    fn node_change_is_scale() {
        let conf = bs_config(3);
        let baseline = Baseline::from_spec(&spec(&conf));
        let changed = bs_config(4);
        assert_eq!(
            baseline.detect(&spec(&changed)).unwrap(),
            Drift::Scale {
                added: vec!["node4".to_string()],
                removed: vec![],
            }
        );
    }

    #[test]
    fn parameter_changes_per_role() {
        let conf = bs_config(3);
        let baseline = Baseline::from_spec(&spec(&conf));

        let mut changed = conf.clone();
        changed.mds.as_mut().unwrap().port = Some(16700);
        changed
            .chunkserver
            .as_mut()
            .unwrap()
            .config
            .insert("chunkserver.walfilepool.enable".to_string(), toml::Value::Boolean(true));
        changed.snapshotclone = None;

        let Drift::Update(mods) = baseline.detect(&spec(&changed)).unwrap() else {
            panic!("expected an update");
        };
        let roles: Vec<Role> = mods.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::Mds, Role::ChunkServer, Role::SnapshotClone]);
        assert_eq!(
            mods[0].changes.get("listen.port"),
            Some(&Some("16700".to_string()))
        );
        assert_eq!(
            mods[1].changes.get("chunkserver.walfilepool.enable"),
            Some(&Some("true".to_string()))
        );
        assert!(mods[2].changes.values().all(Option::is_none));
    }

    #[test]
    fn footprints_are_carried_over() {
        let before = Baseline::from_spec(&spec(&bs_config(4)));
        let after = Baseline::from_spec(&spec(&bs_config(3))).carry_footprints(&before);
        assert_eq!(after.nodes.len(), 3);
        assert_eq!(after.footprints, before.footprints);
        assert!(after
            .footprints
            .iter()
            .any(|fp| fp.id == "chunkserver_node4_3_0"));

        // Baselines written before footprints were recorded still load.
        let artifact = ConfigArtifact::new(
            "curve",
            "c1-baseline",
            BASELINE_KEY,
            r#"{"image": "i", "nodes": ["n1"], "roles": {}}"#.to_string(),
        );
        assert!(Baseline::from_artifact(&artifact)
            .unwrap()
            .footprints
            .is_empty());
    }

    #[test]
    fn artifact_round_trip() {
        let baseline = Baseline::from_spec(&spec(&bs_config(3)));
        let artifact = baseline.to_artifact("curve", "c1").unwrap();
        assert_eq!(artifact.name, "c1-baseline");
        assert_eq!(Baseline::from_artifact(&artifact).unwrap(), baseline);
    }
}
