// Oracle cache: externally reported observations and deposit records.
// Ingestion writes, the ledger only reads (and deletes a deposit once it is claimed).

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

pub const MESSAGE_DATA: u8 = 0;
pub const MESSAGE_DEPOSIT: u8 = 1;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DepositRecord {
    pub address: String,
    pub amount: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DataObservation {
    pub data_feed: String,
    pub data_value: String,
    pub data_timestamp: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DepositObservation {
    pub transaction_hash: String,
    pub deposit_info: DepositRecord,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Observation {
    Data(DataObservation),
    Deposit(DepositObservation),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("feed message is not json: {0}")]
    Json(#[source] serde_json::Error),
    #[error("feed message has no valid MessageType")]
    MissingType,
    #[error("unknown feed message type {0}")]
    UnknownType(u64),
    #[error("malformed feed message body: {0}")]
    Body(#[source] serde_json::Error),
    #[error("deposit {0} has non-positive amount {1}")]
    NonPositiveDeposit(String, i64),
}

impl Observation {
    /// Decode a feed message: one JSON parse, then a typed view of the tagged body.
    pub fn decode(bytes: &[u8]) -> Result<Self, IngestError> {
        let value: Value = serde_json::from_slice(bytes).map_err(IngestError::Json)?;
        let tag = value
            .get("MessageType")
            .and_then(Value::as_u64)
            .ok_or(IngestError::MissingType)?;
        match tag {
            t if t == MESSAGE_DATA as u64 => serde_json::from_value(value)
                .map(Observation::Data)
                .map_err(IngestError::Body),
            t if t == MESSAGE_DEPOSIT as u64 => {
                let dep: DepositObservation =
                    serde_json::from_value(value).map_err(IngestError::Body)?;
                if dep.deposit_info.amount <= 0 {
                    return Err(IngestError::NonPositiveDeposit(
                        dep.transaction_hash,
                        dep.deposit_info.amount,
                    ));
                }
                Ok(Observation::Deposit(dep))
            }
            other => Err(IngestError::UnknownType(other)),
        }
    }
}

#[derive(Default, Debug)]
struct CacheInner {
    // feed -> timestamp -> value
    observations: RwLock<HashMap<String, BTreeMap<u64, String>>>,
    // transaction id -> deposit
    deposits: RwLock<HashMap<String, DepositRecord>>,
}

/// Shared handle; clones observe the same maps.
#[derive(Clone, Default, Debug)]
pub struct OracleCache {
    inner: Arc<CacheInner>,
}

impl OracleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert one observation.
    pub fn record_data(&self, feed: &str, timestamp: u64, value: &str) {
        let mut obs = self.inner.observations.write();
        obs.entry(feed.to_string())
            .or_default()
            .insert(timestamp, value.to_string());
    }

    /// Upsert one deposit record.
    pub fn record_deposit(&self, transaction_id: &str, record: DepositRecord) {
        self.inner
            .deposits
            .write()
            .insert(transaction_id.to_string(), record);
    }

    pub fn observation(&self, feed: &str, timestamp: u64) -> Option<String> {
        self.inner
            .observations
            .read()
            .get(feed)
            .and_then(|m| m.get(&timestamp))
            .cloned()
    }

    pub fn deposit(&self, transaction_id: &str) -> Option<DepositRecord> {
        self.inner.deposits.read().get(transaction_id).cloned()
    }

    /// Remove a deposit after a successful claim. Returns the removed record.
    pub fn take_deposit(&self, transaction_id: &str) -> Option<DepositRecord> {
        self.inner.deposits.write().remove(transaction_id)
    }

    pub fn newest_timestamp(&self, feed: &str) -> Option<u64> {
        self.inner
            .observations
            .read()
            .get(feed)
            .and_then(|m| m.keys().next_back().copied())
    }

    /// Drop observations for `feed` strictly older than `cutoff`. Returns the number removed.
    pub fn prune_observations_before(&self, feed: &str, cutoff: u64) -> usize {
        let mut obs = self.inner.observations.write();
        let Some(per_feed) = obs.get_mut(feed) else {
            return 0;
        };
        let keep = per_feed.split_off(&cutoff);
        let removed = per_feed.len();
        *per_feed = keep;
        if per_feed.is_empty() {
            obs.remove(feed);
        }
        removed
    }

    pub fn observation_count(&self) -> usize {
        self.inner.observations.read().values().map(BTreeMap::len).sum()
    }

    pub fn deposit_count(&self) -> usize {
        self.inner.deposits.read().len()
    }

    pub fn ingest(&self, observation: Observation) {
        match observation {
            Observation::Data(d) => {
                self.record_data(&d.data_feed, d.data_timestamp, &d.data_value);
                info!(
                    feed = %d.data_feed,
                    value = %d.data_value,
                    timestamp = d.data_timestamp,
                    "observation recorded"
                );
            }
            Observation::Deposit(d) => {
                info!(
                    tx = %d.transaction_hash,
                    amount = d.deposit_info.amount,
                    from = %d.deposit_info.address,
                    "deposit recorded"
                );
                self.record_deposit(&d.transaction_hash, d.deposit_info);
            }
        }
    }

    /// Decode and upsert a raw feed message.
    pub fn ingest_bytes(&self, bytes: &[u8]) -> Result<Observation, IngestError> {
        let observation = Observation::decode(bytes)?;
        debug!(len = bytes.len(), "feed message decoded");
        self.ingest(observation.clone());
        Ok(observation)
    }
}
