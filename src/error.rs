// Result codes and error types.
// Codes are part of the externally observable contract: never renumber, only add within a band.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Flat numeric taxonomy reported to the consensus engine.
///
/// Bands: 0 ok, 1-9 decoding, 10-19 oracle data, 20-29 balances and proofs,
/// 30-39 deposit claims, 999 unclassified.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ResultCode {
    Ok = 0,

    TransactionTypeDecodingError = 1,
    TransactionDecodingError = 2,
    InvalidQueryPath = 3,

    DataNotVerified = 10,
    DataOutdated = 11,
    DataTooNew = 12,

    NotEnoughStakedTokens = 20,
    NotEnoughUnstakedTokens = 21,
    InvalidSignature = 22,
    InvalidAmount = 23,
    UnknownValidator = 24,

    DepositNotVerified = 30,
    DepositInvalidSignature = 31,

    UnknownError = 999,
}

impl ResultCode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn is_ok(self) -> bool {
        self == ResultCode::Ok
    }
}

/// A transaction that was refused, either at decoding or admissibility.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{log} (code {})", code.as_u32())]
pub struct Rejection {
    pub code: ResultCode,
    pub log: String,
}

impl Rejection {
    pub fn new(code: ResultCode, log: impl Into<String>) -> Self {
        Self {
            code,
            log: log.into(),
        }
    }
}

/// Misuse of the protocol surface. Never produced by adversarial transaction bytes.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("chain already initialised")]
    AlreadyInitialized,
    #[error("invalid genesis validator key: {0}")]
    InvalidGenesisKey(String),
    #[error("duplicate genesis validator {0}")]
    DuplicateGenesisValidator(String),
    #[error("negative genesis power {power} for validator {address}")]
    NegativeGenesisPower { address: String, power: i64 },
    #[error("block {0} is already open")]
    BlockAlreadyOpen(u64),
    #[error("no open block")]
    NoOpenBlock,
    #[error("snapshot app hash {expected} does not match restored state {actual}")]
    SnapshotMismatch { expected: String, actual: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ResultCode::Ok.as_u32(), 0);
        assert_eq!(ResultCode::TransactionTypeDecodingError.as_u32(), 1);
        assert_eq!(ResultCode::TransactionDecodingError.as_u32(), 2);
        assert_eq!(ResultCode::DataNotVerified.as_u32(), 10);
        assert_eq!(ResultCode::DataOutdated.as_u32(), 11);
        assert_eq!(ResultCode::DataTooNew.as_u32(), 12);
        assert_eq!(ResultCode::NotEnoughStakedTokens.as_u32(), 20);
        assert_eq!(ResultCode::NotEnoughUnstakedTokens.as_u32(), 21);
        assert_eq!(ResultCode::InvalidSignature.as_u32(), 22);
        assert_eq!(ResultCode::DepositNotVerified.as_u32(), 30);
        assert_eq!(ResultCode::DepositInvalidSignature.as_u32(), 31);
        assert_eq!(ResultCode::UnknownError.as_u32(), 999);
    }

    #[test]
    fn rejection_display_carries_code() {
        let r = Rejection::new(ResultCode::DataOutdated, "stale");
        assert_eq!(r.to_string(), "stale (code 11)");
    }
}
