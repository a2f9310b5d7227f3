// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use tokio::runtime::Runtime;

    use curveop_lib::{
        cluster::{ClusterKey, ClusterPhase},
        manager::{reconcile_all, scan_cluster_dir, Cli, MgrContext},
        reconcile::Options,
        state::Event,
        substrate::Poll,
        test_env::*,
    };

    struct Harness {
        _cluster_dir: tempfile::TempDir,
        _state_dir: tempfile::TempDir,
        substrate: Arc<MemorySubstrate>,
        ctx: Arc<MgrContext>,
    }

    fn harness(descriptors: &[&str]) -> Harness {
        let cluster_dir = tempfile::tempdir().unwrap();
        let state_dir = tempfile::tempdir().unwrap();
        for name in descriptors {
            std::fs::copy(test_path(name), cluster_dir.path().join(name)).unwrap();
        }
        std::fs::write(cluster_dir.path().join("README"), "not a descriptor").unwrap();

        let args = Cli {
            cluster_dir: Some(cluster_dir.path().to_string_lossy().to_string()),
            state_dir: Some(state_dir.path().to_string_lossy().to_string()),
            interval: Some(30),
            ready_timeout: 3,
            once: true,
        };
        let substrate = Arc::new(MemorySubstrate::with_templates("curve"));
        let ctx = MgrContext::with_substrate(args, substrate.clone())
            .unwrap()
            .with_options(Options {
                ready: Poll::new(Duration::from_millis(1), 3),
                cleanup: Poll::new(Duration::from_millis(1), 3),
                requeue_after: Duration::from_secs(30),
            });
        Harness {
            _cluster_dir: cluster_dir,
            _state_dir: state_dir,
            substrate,
            ctx: Arc::new(ctx),
        }
    }

    fn key(name: &str) -> ClusterKey {
        ClusterKey {
            namespace: "curve".to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn scan_skips_other_files() {
        let h = harness(&["curvefs.toml", "curvebs.toml"]);
        let paths = scan_cluster_dir(&h.ctx.args.cluster_dir()).unwrap();
        let names: Vec<String> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["curvebs.toml", "curvefs.toml"]);
    }

    #[test]
    fn one_scan_brings_every_cluster_up() {
        let h = harness(&["curvebs.toml", "curvefs.toml"]);
        let rt = Runtime::new().unwrap();
        rt.block_on(reconcile_all(&h.ctx)).unwrap();

        for name in ["prod", "shared"] {
            assert_eq!(h.ctx.last_phase(&key(name)), Some(ClusterPhase::Running));
            let persisted = h.ctx.store.read(&key(name)).unwrap().unwrap();
            assert_eq!(persisted.status.phase, ClusterPhase::Running);
        }
        // 17 block instances and 9 file instances
        assert_eq!(h.substrate.services().len(), 26);

        let prod: Vec<Event> = h
            .ctx
            .journal
            .records()
            .unwrap()
            .into_iter()
            .filter(|r| r.cluster == "curve/prod")
            .map(|r| r.event)
            .collect();
        assert_eq!(
            prod,
            vec![
                Event::Phase(ClusterPhase::Creating),
                Event::Phase(ClusterPhase::Running),
            ]
        );

        // A settled cluster produces no new records.
        let before = h.ctx.journal.records().unwrap().len();
        rt.block_on(reconcile_all(&h.ctx)).unwrap();
        assert_eq!(h.ctx.journal.records().unwrap().len(), before);
    }

    #[test]
    fn failed_pass_is_journaled_and_retried() {
        let h = harness(&["curvebs.toml"]);
        h.substrate.fail_next("create_service", 1);

        let rt = Runtime::new().unwrap();
        rt.block_on(reconcile_all(&h.ctx)).unwrap();
        assert_eq!(h.ctx.last_phase(&key("prod")), Some(ClusterPhase::Creating));
        let records = h.ctx.journal.records().unwrap();
        let failed = records.iter().find(|r| r.event == Event::Failed).unwrap();
        assert!(failed
            .comment
            .as_deref()
            .unwrap()
            .contains("injected failure"));

        rt.block_on(reconcile_all(&h.ctx)).unwrap();
        assert_eq!(h.ctx.last_phase(&key("prod")), Some(ClusterPhase::Running));
    }

    #[test]
    fn deletion_is_finalized_once() {
        let h = harness(&["curvebs.toml"]);
        let rt = Runtime::new().unwrap();
        rt.block_on(reconcile_all(&h.ctx)).unwrap();

        h.ctx.store.request_deletion(&key("prod")).unwrap();
        rt.block_on(reconcile_all(&h.ctx)).unwrap();

        let persisted = h.ctx.store.read(&key("prod")).unwrap().unwrap();
        assert_eq!(persisted.status.phase, ClusterPhase::Deleting);
        assert!(persisted.metadata.finalizers.is_empty());
        assert!(h.substrate.services().is_empty());
        assert!(h.substrate.config_names().is_empty());

        let count = |event: Event| {
            h.ctx
                .journal
                .records()
                .unwrap()
                .iter()
                .filter(|r| r.event == event)
                .count()
        };
        assert_eq!(count(Event::Phase(ClusterPhase::Deleting)), 1);
        assert_eq!(count(Event::Deleted), 1);
        assert_eq!(h.ctx.last_phase(&key("prod")), None);

        // The descriptor is still on disk; later scans leave the finalized cluster alone.
        h.substrate.clear_ops();
        rt.block_on(reconcile_all(&h.ctx)).unwrap();
        assert_eq!(count(Event::Deleted), 1);
        assert!(h.substrate.ops().is_empty());
        assert_eq!(h.ctx.last_phase(&key("prod")), None);
    }
}
