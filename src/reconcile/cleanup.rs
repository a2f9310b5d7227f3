// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::collections::{BTreeMap, BTreeSet};

use {
    log::{debug, info},
    serde::{Deserialize, Serialize},
};

use crate::{
    cluster::{ClusterDescriptor, CurveCluster, Role},
    deploy::{format_id, QUORUM_SIZE},
    error::Result,
    substrate::{self, ignore_already_exists, ignore_not_found, JobSpec},
};

use super::{
    drift::Baseline,
    service::{config_artifact, service_name, topology_artifact, PoolJob},
    Reconciler,
};

/// One daemon instance as far as cleanup is concerned.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Footprint {
    pub id: String,
    pub role: Role,
    pub host: String,
    pub dirs: [String; 2],
}

/// Every instance the descriptor places, worked out without the node inventory so that a cluster
/// can still be torn down after its nodes have gone away.
pub fn footprints(spec: &dyn ClusterDescriptor) -> Vec<Footprint> {
    let common = spec.common();
    let mut out = Vec::new();
    for role_spec in spec.roles() {
        let role = role_spec.role;
        let hosts = if role.is_quorum() {
            &common.nodes[..QUORUM_SIZE.min(common.nodes.len())]
        } else {
            &common.nodes[..]
        };
        let data_dir = role_spec.data_dir.as_deref().unwrap_or(&common.data_dir);
        let log_dir = role_spec.log_dir.as_deref().unwrap_or(&common.log_dir);
        for (sequence, node) in hosts.iter().enumerate() {
            for seq in 0..role_spec.instances {
                let leaf = format!("{role}{seq}");
                out.push(Footprint {
                    id: format_id(role, &node.hostname, sequence, seq),
                    role,
                    host: node.hostname.clone(),
                    dirs: [
                        format!("{}/{leaf}", data_dir.trim_end_matches('/')),
                        format!("{}/{leaf}", log_dir.trim_end_matches('/')),
                    ],
                });
            }
        }
    }
    out
}

pub fn cleanup_job_name(cluster: &str, host: &str) -> String {
    format!("{cluster}-cleanup-{host}")
}

impl Reconciler<'_> {
    /// Remove every object the cluster owns and wipe its directories on every host. Objects that
    /// are already gone are skipped, so this can be re-run after a partial failure.
    ///
    /// Instances are taken from the descriptor and from every footprint recorded in the baseline,
    /// so instances left behind by earlier node or instance count changes are removed as well.
    pub(crate) async fn cleanup(&self, cluster: &CurveCluster) -> Result<()> {
        let namespace = cluster.namespace();
        let name = cluster.name();
        let mut footprints: BTreeSet<Footprint> =
            footprints(cluster.spec.descriptor()).into_iter().collect();
        match self.load_baseline(cluster).await {
            Ok(baseline) => footprints.extend(baseline.footprints),
            Err(e) if e.is_not_found() => debug!("{}: no baseline recorded", cluster.key()),
            Err(e) => return Err(e),
        }

        let ids: BTreeSet<&str> = footprints.iter().map(|fp| fp.id.as_str()).collect();
        for id in ids {
            ignore_not_found(
                self.substrate
                    .delete_service(namespace, &service_name(id))
                    .await,
            )?;
            ignore_not_found(
                self.substrate
                    .delete_config(namespace, &config_artifact(id))
                    .await,
            )?;
        }
        for job in PoolJob::ALL {
            ignore_not_found(self.substrate.delete_job(namespace, &job.name(name)).await)?;
        }
        ignore_not_found(
            self.substrate
                .delete_config(namespace, &topology_artifact(name))
                .await,
        )?;

        let mut dirs: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for fp in &footprints {
            dirs.entry(&fp.host)
                .or_default()
                .extend(fp.dirs.iter().map(String::as_str));
        }

        let image = &cluster.spec.common().image;
        for (host, dirs) in &dirs {
            let dirs: Vec<String> = dirs.iter().map(|d| d.to_string()).collect();
            let mut command = vec!["rm".to_string(), "-rf".to_string()];
            command.extend(dirs.iter().cloned());
            let job = JobSpec {
                namespace: namespace.to_string(),
                name: cleanup_job_name(name, host),
                host: Some(host.to_string()),
                image: image.clone(),
                command,
                config_artifact: None,
                host_dirs: dirs,
            };
            debug!("wiping {} directories on {host}", job.host_dirs.len());
            ignore_already_exists(self.substrate.create_job(&job).await)?;
        }
        for host in dirs.keys() {
            substrate::wait_job_complete(
                self.substrate,
                namespace,
                &cleanup_job_name(name, host),
                self.options.cleanup,
            )
            .await?;
        }
        for host in dirs.keys() {
            ignore_not_found(
                self.substrate
                    .delete_job(namespace, &cleanup_job_name(name, host))
                    .await,
            )?;
        }

        ignore_not_found(
            self.substrate
                .delete_config(namespace, &Baseline::artifact_name(name))
                .await,
        )?;
        info!("{}: cleaned up {} hosts", cluster.key(), dirs.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cluster::ClusterSpec, test_env::bs_config};

    #[test]
    fn footprints_follow_placement_rules() {
        let mut conf = bs_config(4);
        conf.chunkserver.as_mut().unwrap().instances = Some(2);
        let spec = ClusterSpec::from_config(&conf).unwrap();
        let fps = footprints(spec.descriptor());

        // 3 etcd, 3 mds, 8 chunkserver, 3 snapshotclone
        assert_eq!(fps.len(), 17);
        assert!(fps.iter().any(|fp| fp.id == "chunkserver_node4_3_1"
            && fp.role == Role::ChunkServer
            && fp.dirs[0] == "/data/chunkserver1"
            && fp.dirs[1] == "/logs/chunkserver1"));
        assert!(!fps.iter().any(|fp| fp.id.starts_with("etcd_node4")));
    }
}
