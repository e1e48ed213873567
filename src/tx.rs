// Transactions: a closed sum type decoded in one pass from JSON bytes.

use crate::error::{Rejection, ResultCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const TX_VALIDATE_DATA: u8 = 0;
pub const TX_STAKE_TOKENS: u8 = 10;
pub const TX_CLAIM_TOKENS: u8 = 11;
pub const TX_WITHDRAW_TOKENS: u8 = 12;

const TYPE_FIELD: &str = "TransactionType";

/// Propose the latest value for a data feed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ValidateData {
    pub data_feed: String,
    pub data_value: String,
    pub data_timestamp: u64,
}

/// Move tokens between free balance and governance power. Negative amounts unstake.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StakeTokens {
    pub amount: i64,
    pub validator_address: String,
    pub proof: String,
}

/// Credit an externally attested deposit to a validator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClaimTokens {
    pub transaction_hash: String,
    pub validator_address: String,
    pub proof: String,
}

/// Burn free tokens for release to `address` on the external chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WithdrawTokens {
    pub amount: i64,
    pub address: String,
    pub validator_address: String,
    pub proof: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transaction {
    ValidateData(ValidateData),
    StakeTokens(StakeTokens),
    ClaimTokens(ClaimTokens),
    WithdrawTokens(WithdrawTokens),
}

impl Transaction {
    pub fn type_tag(&self) -> u8 {
        match self {
            Transaction::ValidateData(_) => TX_VALIDATE_DATA,
            Transaction::StakeTokens(_) => TX_STAKE_TOKENS,
            Transaction::ClaimTokens(_) => TX_CLAIM_TOKENS,
            Transaction::WithdrawTokens(_) => TX_WITHDRAW_TOKENS,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Transaction::ValidateData(_) => "validate_data",
            Transaction::StakeTokens(_) => "stake_tokens",
            Transaction::ClaimTokens(_) => "claim_tokens",
            Transaction::WithdrawTokens(_) => "withdraw_tokens",
        }
    }

    /// Decode raw transaction bytes.
    ///
    /// An unreadable envelope, missing tag or unknown tag is a type decoding error (1);
    /// a body that does not fit its kind is a transaction decoding error (2).
    pub fn decode(bytes: &[u8]) -> Result<Self, Rejection> {
        let value: Value = serde_json::from_slice(bytes).map_err(|e| {
            Rejection::new(
                ResultCode::TransactionTypeDecodingError,
                format!("not able to parse transaction type: {}", e),
            )
        })?;
        let tag = value
            .get(TYPE_FIELD)
            .and_then(Value::as_u64)
            .and_then(|t| u8::try_from(t).ok())
            .ok_or_else(|| {
                Rejection::new(
                    ResultCode::TransactionTypeDecodingError,
                    "missing or invalid TransactionType",
                )
            })?;

        match tag {
            TX_VALIDATE_DATA => body(value, "validate data").map(Transaction::ValidateData),
            TX_STAKE_TOKENS => body(value, "stake tokens").map(Transaction::StakeTokens),
            TX_CLAIM_TOKENS => body(value, "claim tokens").map(Transaction::ClaimTokens),
            TX_WITHDRAW_TOKENS => body(value, "withdraw tokens").map(Transaction::WithdrawTokens),
            other => Err(Rejection::new(
                ResultCode::TransactionTypeDecodingError,
                format!("unknown transaction type {}", other),
            )),
        }
    }

    /// Canonical JSON encoding, readable by `decode`.
    pub fn encode(&self) -> Vec<u8> {
        let mut value = match self {
            Transaction::ValidateData(t) => serde_json::to_value(t),
            Transaction::StakeTokens(t) => serde_json::to_value(t),
            Transaction::ClaimTokens(t) => serde_json::to_value(t),
            Transaction::WithdrawTokens(t) => serde_json::to_value(t),
        }
        .unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.insert(TYPE_FIELD.to_string(), Value::from(self.type_tag()));
        }
        value.to_string().into_bytes()
    }
}

fn body<T: DeserializeOwned>(value: Value, what: &str) -> Result<T, Rejection> {
    serde_json::from_value(value).map_err(|e| {
        Rejection::new(
            ResultCode::TransactionDecodingError,
            format!("not able to parse {} transaction: {}", what, e),
        )
    })
}
