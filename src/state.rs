// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::{
    fmt,
    fs::{File, OpenOptions},
    io::{self, BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use {
    chrono::{Local, NaiveDateTime},
    serde::{Deserialize, Serialize},
};

use crate::{
    cluster::{ClusterKey, ClusterPhase, ClusterSpec, ClusterStatus, CurveCluster, ObjectMeta},
    error::{Error, Result},
};

/// The part of a cluster resource that is not in its descriptor file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PersistedResource {
    pub metadata: ObjectMeta,
    pub status: ClusterStatus,
}

/// Keeps every cluster's metadata and status as `<dir>/<namespace>/<name>.json`, so that a
/// restarted operator resumes each cluster from the phase it was in.
#[derive(Debug, Clone)]
pub struct ClusterStore {
    dir: PathBuf,
}

impl ClusterStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        ClusterStore {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path(&self, key: &ClusterKey) -> PathBuf {
        self.dir
            .join(&key.namespace)
            .join(format!("{}.json", key.name))
    }

    pub fn read(&self, key: &ClusterKey) -> Result<Option<PersistedResource>> {
        match std::fs::read(self.path(key)) {
            Ok(contents) => Ok(Some(serde_json::from_slice(&contents)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The resource for `spec`: its persisted metadata and status if there are any, otherwise a
    /// resource that has never been reconciled.
    pub fn load(&self, spec: ClusterSpec) -> Result<CurveCluster> {
        let mut cluster = CurveCluster::new(spec);
        if let Some(persisted) = self.read(&cluster.key())? {
            cluster.metadata = persisted.metadata;
            cluster.status = persisted.status;
        }
        Ok(cluster)
    }

    /// Persist `cluster`. A deletion request already on disk is kept even if `cluster` was loaded
    /// before the request was made.
    pub fn save(&self, cluster: &CurveCluster) -> Result<()> {
        let key = cluster.key();
        let mut persisted = PersistedResource {
            metadata: cluster.metadata.clone(),
            status: cluster.status.clone(),
        };
        if let Some(stored) = self.read(&key)? {
            persisted.metadata.deletion_requested |= stored.metadata.deletion_requested;
        }
        self.write(&key, &persisted)
    }

    /// Mark a known cluster for deletion. The operator picks this up on its next pass.
    pub fn request_deletion(&self, key: &ClusterKey) -> Result<()> {
        let mut persisted = self.read(key)?.ok_or_else(|| Error::NotFound {
            kind: "cluster",
            namespace: key.namespace.clone(),
            name: key.name.clone(),
        })?;
        persisted.metadata.deletion_requested = true;
        self.write(key, &persisted)
    }

    /// Whether a deletion has been requested for `key` since it was last loaded.
    pub fn deletion_requested(&self, key: &ClusterKey) -> Result<bool> {
        Ok(self
            .read(key)?
            .is_some_and(|p| p.metadata.deletion_requested))
    }

    fn write(&self, key: &ClusterKey, persisted: &PersistedResource) -> Result<()> {
        let path = self.path(key);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        // Write then rename, so a crash never leaves a half-written status behind.
        let tmp = path.with_extension(format!("json.{}.tmp", std::process::id()));
        std::fs::write(&tmp, serde_json::to_vec_pretty(persisted)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// An append-only log of lifecycle events, one TSV record per line.
#[derive(Debug)]
pub struct Journal {
    file: Mutex<File>,
    path: PathBuf,
}

impl Journal {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;
        Ok(Journal {
            file: Mutex::new(file),
            path,
        })
    }

    pub fn write_record(&self, record: &Record) -> Result<()> {
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        file.write_all(&[record.as_string().as_bytes(), b"\n"].concat())?;
        Ok(())
    }

    /// Every record in the journal, oldest first.
    pub fn records(&self) -> Result<Vec<Record>> {
        Record::get_all_from_file(&File::open(&self.path)?)
    }
}

/// A single journal entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub timestamp: NaiveDateTime,
    pub event: Event,
    pub cluster: String,
    pub comment: Option<String>,
}

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S.%f";

impl Record {
    pub fn new(event: Event, cluster: &ClusterKey, comment: Option<String>) -> Self {
        Record {
            timestamp: Local::now().naive_local(),
            event,
            cluster: cluster.to_string(),
            comment,
        }
    }

    /// All Records in `file`, sorted by timestamp in ascending order.
    pub fn get_all_from_file(file: &File) -> Result<Vec<Record>> {
        let mut records = BufReader::new(file)
            .lines()
            .filter(|line| !matches!(line, Ok(l) if l.is_empty()))
            .map(|line| Record::from_string(&line?))
            .collect::<Result<Vec<Record>>>()?;
        records.sort_by_key(|record| record.timestamp);
        Ok(records)
    }

    pub fn as_string(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.event,
            self.cluster,
            self.comment.as_deref().unwrap_or(""),
        )
    }

    pub fn from_string(record: &str) -> Result<Self> {
        let malformed = |what: &str| Error::MalformedRecord(format!("{what} in '{record}'"));

        let mut fields = record.splitn(4, '\t');
        let timestamp = fields.next().ok_or_else(|| malformed("missing timestamp"))?;
        let event = fields.next().ok_or_else(|| malformed("missing event"))?;
        let cluster = fields.next().ok_or_else(|| malformed("missing cluster"))?;
        let comment = fields.next().filter(|c| !c.is_empty());

        let timestamp = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)
            .map_err(|e| malformed(&format!("bad timestamp ({e})")))?;

        Ok(Self {
            timestamp,
            event: Event::try_from(event)?,
            cluster: cluster.to_string(),
            comment: comment.map(str::to_string),
        })
    }
}

/// Everything that is recorded in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The cluster entered a lifecycle phase.
    Phase(ClusterPhase),
    /// A pass failed.
    Failed,
    /// Cleanup finished and the resource was released.
    Deleted,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Phase(ClusterPhase::Unseen) => write!(f, "unseen"),
            Self::Phase(phase) => write!(f, "{}", phase.to_string().to_lowercase()),
            Self::Failed => write!(f, "failed"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

impl TryFrom<&str> for Event {
    type Error = Error;

    fn try_from(val: &str) -> Result<Self> {
        Ok(match val {
            "unseen" => Self::Phase(ClusterPhase::Unseen),
            "creating" => Self::Phase(ClusterPhase::Creating),
            "running" => Self::Phase(ClusterPhase::Running),
            "updating" => Self::Phase(ClusterPhase::Updating),
            "upgrading" => Self::Phase(ClusterPhase::Upgrading),
            "scaling" => Self::Phase(ClusterPhase::Scaling),
            "deleting" => Self::Phase(ClusterPhase::Deleting),
            "failed" => Self::Failed,
            "deleted" => Self::Deleted,
            _ => return Err(Error::MalformedRecord(format!("unknown event '{val}'"))),
        })
    }
}
