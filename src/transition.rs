// State transition: applies admitted transactions to the ledger and reports what changed.

use crate::config::ChainParams;
use crate::error::{Rejection, ResultCode};
use crate::ledger::LedgerState;
use crate::oracle::OracleCache;
use crate::validation::{Admitted, AdmittedKind};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttribute {
    pub key: String,
    pub value: String,
}

/// Flat event handed back to the consensus engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: String,
    pub attributes: Vec<EventAttribute>,
}

impl Event {
    fn new(kind: &str, attributes: Vec<(&str, String)>) -> Self {
        Self {
            kind: kind.to_string(),
            attributes: attributes
                .into_iter()
                .map(|(key, value)| EventAttribute {
                    key: key.to_string(),
                    value,
                })
                .collect(),
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.key == key)
            .map(|a| a.value.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerEvent {
    DataVerified {
        feed: String,
        value: String,
        timestamp: u64,
    },
    TokensStaked {
        validator: String,
        amount: i64,
        demoted: bool,
    },
    TokensClaimed {
        validator: String,
        transaction_id: String,
        amount: i64,
    },
    TokensWithdrawn {
        validator: String,
        amount: i64,
        destination: String,
    },
}

impl LedgerEvent {
    pub fn to_event(&self) -> Event {
        match self {
            LedgerEvent::DataVerified {
                feed,
                value,
                timestamp,
            } => Event::new(
                "data_verified",
                vec![
                    ("feed", feed.clone()),
                    ("data", value.clone()),
                    ("timestamp", timestamp.to_string()),
                ],
            ),
            LedgerEvent::TokensStaked {
                validator,
                amount,
                demoted,
            } => Event::new(
                "tokens_staked",
                vec![
                    ("validator", validator.clone()),
                    ("amount", amount.to_string()),
                    ("demoted", demoted.to_string()),
                ],
            ),
            LedgerEvent::TokensClaimed {
                validator,
                transaction_id,
                amount,
            } => Event::new(
                "tokens_claimed",
                vec![
                    ("validator", validator.clone()),
                    ("transactionhash", transaction_id.clone()),
                    ("amount", amount.to_string()),
                ],
            ),
            LedgerEvent::TokensWithdrawn {
                validator,
                amount,
                destination,
            } => Event::new(
                "tokens_withdrawn",
                vec![
                    ("validator", validator.clone()),
                    ("amount", amount.to_string()),
                    ("destination", destination.clone()),
                ],
            ),
        }
    }
}

/// Apply a transaction that was validated against `state` immediately before.
///
/// Bumps the applied-transaction counter on success. The only failure is a
/// validator that vanished between validation and apply, which cannot happen
/// while validators are never removed; it is reported as code 999 and leaves
/// the state untouched.
pub fn apply_transaction(
    state: &mut LedgerState,
    oracle: &OracleCache,
    admitted: Admitted,
    params: &ChainParams,
) -> Result<LedgerEvent, Rejection> {
    let event = match admitted.kind {
        AdmittedKind::Data {
            feed,
            value,
            timestamp,
        } => {
            state.record_data(&feed, &value, timestamp);
            LedgerEvent::DataVerified {
                feed,
                value,
                timestamp,
            }
        }
        AdmittedKind::Stake { validator, amount } => {
            let v = state
                .validator_mut(&validator)
                .ok_or_else(|| vanished(&validator))?;
            v.governance_power = v.governance_power.saturating_add(amount);
            v.free_tokens = v.free_tokens.saturating_sub(amount);
            let demoted = v.demote_if_below(params.min_validator_power);
            v.nonce = v.nonce.wrapping_add(1);
            if demoted {
                info!(%validator, free_tokens = v.free_tokens, "validator demoted below minimum power");
            }
            LedgerEvent::TokensStaked {
                validator,
                amount,
                demoted,
            }
        }
        AdmittedKind::Claim {
            validator,
            transaction_id,
            deposit,
        } => {
            let v = state
                .validator_mut(&validator)
                .ok_or_else(|| vanished(&validator))?;
            v.free_tokens = v.free_tokens.saturating_add(deposit.amount);
            if oracle.take_deposit(&transaction_id).is_none() {
                // Pruned by the collaborator after validation; the credit still stands.
                warn!(%transaction_id, "deposit record already gone at apply");
            }
            LedgerEvent::TokensClaimed {
                validator,
                transaction_id,
                amount: deposit.amount,
            }
        }
        AdmittedKind::Withdraw {
            validator,
            amount,
            destination,
        } => {
            let v = state
                .validator_mut(&validator)
                .ok_or_else(|| vanished(&validator))?;
            v.free_tokens = v.free_tokens.saturating_sub(amount);
            v.nonce = v.nonce.wrapping_add(1);
            LedgerEvent::TokensWithdrawn {
                validator,
                amount,
                destination,
            }
        }
    };
    state.total_transactions += 1;
    Ok(event)
}

fn vanished(address: &str) -> Rejection {
    Rejection::new(
        ResultCode::UnknownError,
        format!("validator {} missing at apply", address),
    )
}
