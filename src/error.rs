// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::time::Duration;

/// Every failure the library can produce.
///
/// The variants fall into four groups: construction errors (building the deploy topology),
/// resolution errors (rendering `${var}` templates), substrate errors (talking to the workload
/// platform) and timeouts. None of them are retried internally; they all bubble up to the
/// reconcile entry point, which records them in the cluster status.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config item '{0}' is registered more than once")]
    DuplicateItem(String),

    #[error("config item '{0}' not found")]
    ItemNotFound(String),

    #[error("unsupported value type '{found}' for key '{key}' of role {role}")]
    UnsupportedValueType {
        role: String,
        key: String,
        found: String,
    },

    #[error("value '{value}' for key '{key}' must be {requirement}")]
    InvalidValue {
        key: String,
        value: String,
        requirement: String,
    },

    #[error("node '{0}' not found in node inventory")]
    NodeNotFound(String),

    #[error("no valid node for quorum roles")]
    NoQuorumNodes,

    #[error("invalid cluster descriptor: {0}")]
    InvalidSpec(String),

    #[error("variable '{0}' is registered more than once")]
    DuplicateVariable(String),

    #[error("variable '{0}' is not defined")]
    UndefinedVariable(String),

    #[error("variable '{0}' is not resolved")]
    UnresolvedVariable(String),

    #[error("variable reference cycle: {}", .0.join(" -> "))]
    VariableCycle(Vec<String>),

    #[error("{kind} '{namespace}/{name}' already exists")]
    AlreadyExists {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("{kind} '{namespace}/{name}' not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("workload substrate: {0}")]
    Substrate(String),

    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout { what: String, waited: Duration },

    #[error("malformed journal record: {0}")]
    MalformedRecord(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// A short, stable name for the error, used as the `reason` of a failure condition.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::DuplicateItem(_)
            | Error::ItemNotFound(_)
            | Error::UnsupportedValueType { .. }
            | Error::InvalidValue { .. }
            | Error::NodeNotFound(_)
            | Error::NoQuorumNodes
            | Error::InvalidSpec(_) => "ConstructionFailed",
            Error::DuplicateVariable(_)
            | Error::UndefinedVariable(_)
            | Error::UnresolvedVariable(_)
            | Error::VariableCycle(_) => "RenderFailed",
            Error::AlreadyExists { .. } | Error::NotFound { .. } | Error::Substrate(_) => {
                "SubstrateFailed"
            }
            Error::Timeout { .. } => "Timeout",
            Error::MalformedRecord(_) | Error::Io(_) | Error::Toml(_) | Error::Json(_) => {
                "IoFailed"
            }
        }
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
