//! Messages exchanged with a remote worker.
//!
//! A request names an operation by its [`OpSpec`] and the dataset it targets.
//! Every streaming request carries an operation id; the worker answers with
//! any number of `Partial` replies followed by one `Completed` or `Failed`.
//! Messages travel as JSON documents encoded to bytes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::sketch::OpSpec;

pub type OpId = u64;
pub type DataSetId = u64;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Sketch {
        op: OpId,
        dataset: DataSetId,
        spec: OpSpec,
    },
    Map {
        op: OpId,
        dataset: DataSetId,
        spec: OpSpec,
    },
    FlatMap {
        op: OpId,
        dataset: DataSetId,
        spec: OpSpec,
    },
    Zip {
        op: OpId,
        left: DataSetId,
        right: DataSetId,
        /// Registered name of the partition type pair.
        kind: String,
    },
    /// Best-effort request to stop a running operation.
    Cancel { op: OpId },
    /// Drop a dataset from the worker's registry. Operations already
    /// running on it finish normally.
    Release { dataset: DataSetId },
    Shutdown,
}

impl Request {
    pub fn op(&self) -> Option<OpId> {
        match self {
            Request::Sketch { op, .. }
            | Request::Map { op, .. }
            | Request::FlatMap { op, .. }
            | Request::Zip { op, .. }
            | Request::Cancel { op } => Some(*op),
            Request::Release { .. } | Request::Shutdown => None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        decode(bytes)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Partial {
        op: OpId,
        done: f64,
        value: serde_json::Value,
    },
    Completed {
        op: OpId,
    },
    Failed {
        op: OpId,
        error: String,
    },
}

impl Reply {
    pub fn op(&self) -> OpId {
        match self {
            Reply::Partial { op, .. } | Reply::Completed { op } | Reply::Failed { op, .. } => *op,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        decode(bytes)
    }
}

#[inline]
fn encode<M: Serialize>(message: &M) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

#[inline]
fn decode<M: DeserializeOwned>(bytes: &[u8]) -> Result<M> {
    Ok(serde_json::from_slice(bytes)?)
}
