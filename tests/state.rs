// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

#[cfg(test)]
mod tests {
    use chrono::Local;

    use curveop_lib::{
        cluster::{ClusterKey, ClusterPhase, ClusterSpec, ConditionStatus, ConditionType},
        state::*,
        test_env::bs_config,
    };

    fn key() -> ClusterKey {
        ClusterKey {
            namespace: "curve".to_string(),
            name: "bs1".to_string(),
        }
    }

    #[test]
    fn serde1() {
        let record = Record {
            timestamp: Local::now().naive_local(),
            event: Event::Phase(ClusterPhase::Upgrading),
            cluster: "curve/bs1".to_string(),
            comment: Some("from 'Running'".to_string()),
        };
        let output = record.as_string();

        let new_record = Record::from_string(&output).unwrap();

        assert_eq!(record, new_record);
    }

    #[test]
    fn serde_without_comment() {
        let record = Record::new(Event::Deleted, &key(), None);
        let output = record.as_string();
        assert!(output.ends_with("\tdeleted\tcurve/bs1\t"));

        assert_eq!(Record::from_string(&output).unwrap(), record);
    }

    #[test]
    fn malformed_records() {
        assert!(Record::from_string("not a record").is_err());
        assert!(Record::from_string("2025-01-01T00:00:00.0\texploded\tcurve/bs1\t").is_err());
        assert!(Record::from_string("yesterday\tfailed\tcurve/bs1\t").is_err());
    }

    #[test]
    fn journal_keeps_records_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::open(dir.path().join("curveop.journal")).unwrap();

        let events = [
            Event::Phase(ClusterPhase::Creating),
            Event::Failed,
            Event::Phase(ClusterPhase::Running),
        ];
        for event in events {
            journal
                .write_record(&Record::new(event, &key(), None))
                .unwrap();
        }

        let records = journal.records().unwrap();
        assert_eq!(
            records.iter().map(|r| r.event).collect::<Vec<_>>(),
            events.to_vec()
        );
        assert!(records.iter().all(|r| r.cluster == "curve/bs1"));

        // Reopening appends to the same file.
        drop(journal);
        let journal = Journal::open(dir.path().join("curveop.journal")).unwrap();
        journal
            .write_record(&Record::new(Event::Deleted, &key(), None))
            .unwrap();
        assert_eq!(journal.records().unwrap().len(), 4);
    }

    #[test]
    fn store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ClusterStore::new(dir.path());
        let spec = ClusterSpec::from_config(&bs_config(3)).unwrap();

        // Nothing persisted yet: a fresh, unseen resource.
        let mut cluster = store.load(spec.clone()).unwrap();
        assert_eq!(cluster.status.phase, ClusterPhase::Unseen);
        assert!(store.read(&key()).unwrap().is_none());

        cluster.status.phase = ClusterPhase::Running;
        cluster.status.set_condition(
            ConditionType::Ready,
            ConditionStatus::True,
            "ClusterRunning",
            "",
        );
        store.save(&cluster).unwrap();
        assert!(dir.path().join("curve").join("bs1.json").exists());

        let loaded = store.load(spec).unwrap();
        assert_eq!(loaded.status, cluster.status);
        assert_eq!(loaded.metadata, cluster.metadata);
    }

    #[test]
    fn request_deletion() {
        let dir = tempfile::tempdir().unwrap();
        let store = ClusterStore::new(dir.path());
        let spec = ClusterSpec::from_config(&bs_config(3)).unwrap();

        let err = store.request_deletion(&key()).unwrap_err();
        assert!(err.is_not_found());

        store.save(&store.load(spec.clone()).unwrap()).unwrap();
        store.request_deletion(&key()).unwrap();

        let cluster = store.load(spec).unwrap();
        assert!(cluster.metadata.deletion_requested);
        assert!(!cluster.metadata.finalizers.is_empty());
    }

    #[test]
    fn save_keeps_a_concurrent_deletion_request() {
        let dir = tempfile::tempdir().unwrap();
        let store = ClusterStore::new(dir.path());
        let spec = ClusterSpec::from_config(&bs_config(3)).unwrap();

        store.save(&store.load(spec.clone()).unwrap()).unwrap();
        let mut in_flight = store.load(spec.clone()).unwrap();
        assert!(!store.deletion_requested(&key()).unwrap());

        store.request_deletion(&key()).unwrap();
        assert!(store.deletion_requested(&key()).unwrap());

        // A pass that loaded the cluster before the request saves its own copy.
        in_flight.status.phase = ClusterPhase::Running;
        store.save(&in_flight).unwrap();

        let persisted = store.read(&key()).unwrap().unwrap();
        assert!(persisted.metadata.deletion_requested);
        assert_eq!(persisted.status.phase, ClusterPhase::Running);
        assert_eq!(
            std::fs::read_dir(dir.path().join("curve")).unwrap().count(),
            1
        );
    }
}
