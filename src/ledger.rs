// Ledger state: validators and verified data, owned by the application.
// BTreeMaps keep iteration (and therefore hashing and JSON output) identical on every replica.

use crate::crypto::{Hash, PublicKey, ZERO_HASH, sha256};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

const LEAF_VALIDATOR: u8 = 1;
const LEAF_DATA: u8 = 2;
const NODE_PREFIX: u8 = 0;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    #[serde(with = "hex_key")]
    pub pub_key: PublicKey,
    /// Staked, voting-weighted balance.
    pub governance_power: i64,
    /// Unstaked balance, eligible for staking or withdrawal.
    pub free_tokens: i64,
    /// Bumped once per applied proof-bearing transaction.
    pub nonce: u32,
}

impl Validator {
    pub fn new(pub_key: PublicKey, governance_power: i64) -> Self {
        Self {
            pub_key,
            governance_power,
            free_tokens: 0,
            nonce: 0,
        }
    }

    /// Fold governance power under `min_power` into free tokens.
    /// Returns true if the validator was demoted. A fold that would not fit
    /// in `free_tokens` leaves the validator untouched.
    pub fn demote_if_below(&mut self, min_power: i64) -> bool {
        if self.governance_power <= 0 || self.governance_power >= min_power {
            return false;
        }
        match self.free_tokens.checked_add(self.governance_power) {
            Some(free) => {
                self.free_tokens = free;
                self.governance_power = 0;
                true
            }
            None => false,
        }
    }

    pub fn total_balance(&self) -> i128 {
        self.governance_power as i128 + self.free_tokens as i128
    }

    /// Tokens that can still be credited while power plus free tokens fits in an i64.
    pub fn headroom(&self) -> i64 {
        (i64::MAX as i128 - self.total_balance()).clamp(0, i64::MAX as i128) as i64
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedDataItem {
    pub feed: String,
    pub value: String,
    pub timestamp: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    pub validators: BTreeMap<String, Validator>,
    pub verified_data: BTreeMap<String, VerifiedDataItem>,
    /// Successfully applied transactions, rejected ones excluded.
    pub total_transactions: u64,
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validator(&self, address: &str) -> Option<&Validator> {
        self.validators.get(address)
    }

    pub fn validator_mut(&mut self, address: &str) -> Option<&mut Validator> {
        self.validators.get_mut(address)
    }

    /// Timestamp of the accepted value for `feed`, if any.
    pub fn latest_timestamp(&self, feed: &str) -> Option<u64> {
        self.verified_data.get(feed).map(|d| d.timestamp)
    }

    pub fn record_data(&mut self, feed: &str, value: &str, timestamp: u64) {
        self.verified_data.insert(
            feed.to_string(),
            VerifiedDataItem {
                feed: feed.to_string(),
                value: value.to_string(),
                timestamp,
            },
        );
    }

    pub fn leaf_hashes(&self) -> Vec<Hash> {
        let mut leaves = Vec::with_capacity(self.validators.len() + self.verified_data.len());
        for (address, v) in &self.validators {
            let mut buf = Vec::with_capacity(1 + 4 + address.len() + 32 + 8 + 8 + 4);
            buf.push(LEAF_VALIDATOR);
            put_str(&mut buf, address);
            buf.extend_from_slice(&v.pub_key);
            buf.extend_from_slice(&v.governance_power.to_be_bytes());
            buf.extend_from_slice(&v.free_tokens.to_be_bytes());
            buf.extend_from_slice(&v.nonce.to_be_bytes());
            leaves.push(sha256(&buf));
        }
        for (feed, d) in &self.verified_data {
            let mut buf = Vec::with_capacity(1 + 8 + feed.len() + d.value.len() + 8);
            buf.push(LEAF_DATA);
            put_str(&mut buf, feed);
            put_str(&mut buf, &d.value);
            buf.extend_from_slice(&d.timestamp.to_be_bytes());
            leaves.push(sha256(&buf));
        }
        leaves
    }

    /// Merkle root over all entries in key order; ZERO_HASH when empty.
    pub fn state_root(&self) -> Hash {
        merkle_root_hashes(&self.leaf_hashes())
    }

    /// Digest compared across replicas at Commit.
    pub fn app_hash(&self) -> Hash {
        let mut h = Sha256::new();
        h.update(self.total_transactions.to_be_bytes());
        h.update(self.state_root());
        h.finalize().into()
    }
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
}

/// Binary SHA-256 Merkle root. Interior nodes are hashed under `NODE_PREFIX`;
/// an unpaired node is carried up unchanged.
pub fn merkle_root_hashes(hashes: &[Hash]) -> Hash {
    if hashes.is_empty() {
        return ZERO_HASH;
    }
    let mut level = hashes.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => node_hash(left, right),
                _ => pair[0],
            })
            .collect();
    }
    level[0]
}

fn node_hash(left: &Hash, right: &Hash) -> Hash {
    let mut h = Sha256::new();
    h.update([NODE_PREFIX]);
    h.update(left);
    h.update(right);
    h.finalize().into()
}

pub(crate) mod hex_key {
    use crate::crypto::PublicKey;
    use hex::FromHex;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(key: &PublicKey, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(key))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<PublicKey, D::Error> {
        let s = String::deserialize(d)?;
        <[u8; 32]>::from_hex(s).map_err(serde::de::Error::custom)
    }
}
