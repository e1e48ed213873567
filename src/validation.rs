// Validation: deterministic admissibility checks per transaction kind.
// Pure function of (state, oracle cache, injected time, transaction); never mutates anything.

use crate::config::ChainParams;
use crate::crypto::{
    claim_message_hash, normalize_eth_address, stake_message, verify_deposit_proof,
    verify_stake_proof, withdraw_message,
};
use crate::error::{Rejection, ResultCode};
use crate::ledger::{LedgerState, Validator};
use crate::oracle::{DepositRecord, OracleCache};
use crate::tx::{ClaimTokens, StakeTokens, Transaction, ValidateData, WithdrawTokens};

/// Inputs every check may consult besides the ledger itself.
#[derive(Clone, Copy)]
pub struct ValidationContext<'a> {
    /// Admission uses the local clock; block application uses the block time.
    pub now_secs: u64,
    pub params: &'a ChainParams,
    pub oracle: &'a OracleCache,
}

/// Proof that a transaction passed validation against a given state.
/// Only `validate_transaction` constructs it, so only admitted work can be applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Admitted {
    pub(crate) kind: AdmittedKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum AdmittedKind {
    Data {
        feed: String,
        value: String,
        timestamp: u64,
    },
    Stake {
        validator: String,
        amount: i64,
    },
    Claim {
        validator: String,
        transaction_id: String,
        deposit: DepositRecord,
    },
    Withdraw {
        validator: String,
        amount: i64,
        destination: String,
    },
}

impl Admitted {
    pub fn kind(&self) -> &'static str {
        match self.kind {
            AdmittedKind::Data { .. } => "validate_data",
            AdmittedKind::Stake { .. } => "stake_tokens",
            AdmittedKind::Claim { .. } => "claim_tokens",
            AdmittedKind::Withdraw { .. } => "withdraw_tokens",
        }
    }
}

pub fn validate_transaction(
    state: &LedgerState,
    ctx: &ValidationContext<'_>,
    tx: &Transaction,
) -> Result<Admitted, Rejection> {
    let kind = match tx {
        Transaction::ValidateData(t) => check_data(state, ctx, t)?,
        Transaction::StakeTokens(t) => check_stake(state, t)?,
        Transaction::ClaimTokens(t) => check_claim(state, ctx, t)?,
        Transaction::WithdrawTokens(t) => check_withdraw(state, t)?,
    };
    Ok(Admitted { kind })
}

/// Decode then validate; the combined admission gate.
pub fn check_bytes(
    state: &LedgerState,
    ctx: &ValidationContext<'_>,
    bytes: &[u8],
) -> Result<Admitted, Rejection> {
    let tx = Transaction::decode(bytes)?;
    validate_transaction(state, ctx, &tx)
}

fn check_data(
    state: &LedgerState,
    ctx: &ValidationContext<'_>,
    tx: &ValidateData,
) -> Result<AdmittedKind, Rejection> {
    // Replicas need time to receive the observation before it can be agreed on.
    let latest_allowed = ctx.now_secs.saturating_sub(ctx.params.min_data_age_secs);
    if tx.data_timestamp >= latest_allowed {
        return Err(Rejection::new(
            ResultCode::DataTooNew,
            format!(
                "data timestamp is not old enough (attempted: {}, latest accepted: {})",
                tx.data_timestamp, latest_allowed
            ),
        ));
    }

    let latest = state.latest_timestamp(&tx.data_feed).unwrap_or(0);
    if tx.data_timestamp <= latest {
        return Err(Rejection::new(
            ResultCode::DataOutdated,
            format!(
                "data timestamp is not newer than the recorded one (attempted: {}, latest: {})",
                tx.data_timestamp, latest
            ),
        ));
    }

    match ctx.oracle.observation(&tx.data_feed, tx.data_timestamp) {
        Some(observed) if observed == tx.data_value => Ok(AdmittedKind::Data {
            feed: tx.data_feed.clone(),
            value: tx.data_value.clone(),
            timestamp: tx.data_timestamp,
        }),
        _ => Err(Rejection::new(
            ResultCode::DataNotVerified,
            format!(
                "data is not confirmed by the local oracle (attempted: {} at {})",
                tx.data_value, tx.data_timestamp
            ),
        )),
    }
}

fn known_validator<'s>(state: &'s LedgerState, address: &str) -> Result<&'s Validator, Rejection> {
    state.validator(address).ok_or_else(|| {
        Rejection::new(
            ResultCode::UnknownValidator,
            format!("unknown validator {}", address),
        )
    })
}

fn check_stake(state: &LedgerState, tx: &StakeTokens) -> Result<AdmittedKind, Rejection> {
    let validator = known_validator(state, &tx.validator_address)?;

    if tx.amount > 0 {
        let remaining = validator.free_tokens.checked_sub(tx.amount);
        if !matches!(remaining, Some(r) if r >= 0) {
            return Err(Rejection::new(
                ResultCode::NotEnoughUnstakedTokens,
                format!(
                    "trying to stake more tokens than unstaked (attempted: {}, unstaked: {})",
                    tx.amount, validator.free_tokens
                ),
            ));
        }
        if validator.governance_power.checked_add(tx.amount).is_none() {
            return Err(Rejection::new(
                ResultCode::InvalidAmount,
                "stake would overflow governance power",
            ));
        }
    } else if tx.amount < 0 {
        let remaining = validator.governance_power.checked_add(tx.amount);
        if !matches!(remaining, Some(r) if r >= 0) {
            return Err(Rejection::new(
                ResultCode::NotEnoughStakedTokens,
                format!(
                    "trying to unstake more tokens than staked (attempted: {}, staked: {})",
                    tx.amount.unsigned_abs(),
                    validator.governance_power
                ),
            ));
        }
        if validator.free_tokens.checked_sub(tx.amount).is_none() {
            return Err(Rejection::new(
                ResultCode::InvalidAmount,
                "unstake would overflow free tokens",
            ));
        }
    }

    if validator.total_balance() > i64::MAX as i128 {
        return Err(Rejection::new(
            ResultCode::InvalidAmount,
            "validator balance exceeds the token limit",
        ));
    }

    let message = stake_message(tx.amount, validator.nonce);
    if !verify_stake_proof(&validator.pub_key, &message, &tx.proof) {
        return Err(Rejection::new(
            ResultCode::InvalidSignature,
            format!("stake proof is not valid for nonce {}", validator.nonce),
        ));
    }

    Ok(AdmittedKind::Stake {
        validator: tx.validator_address.clone(),
        amount: tx.amount,
    })
}

fn check_claim(
    state: &LedgerState,
    ctx: &ValidationContext<'_>,
    tx: &ClaimTokens,
) -> Result<AdmittedKind, Rejection> {
    let deposit = ctx.oracle.deposit(&tx.transaction_hash).ok_or_else(|| {
        Rejection::new(
            ResultCode::DepositNotVerified,
            format!(
                "deposit is not confirmed by the local oracle (attempted: {})",
                tx.transaction_hash
            ),
        )
    })?;
    let validator = known_validator(state, &tx.validator_address)?;

    let hash = claim_message_hash(&tx.transaction_hash, &tx.validator_address);
    let expected = normalize_eth_address(&deposit.address);
    match verify_deposit_proof(&hash, &tx.proof) {
        Ok(signer) if normalize_eth_address(&signer) == expected => {}
        _ => {
            return Err(Rejection::new(
                ResultCode::DepositInvalidSignature,
                format!(
                    "signature does not match depositor address, it should be signed by: {}",
                    deposit.address
                ),
            ));
        }
    }

    if deposit.amount > validator.headroom() || validator.free_tokens.checked_add(deposit.amount).is_none() {
        return Err(Rejection::new(
            ResultCode::InvalidAmount,
            format!(
                "claim would overflow validator balance (attempted: {}, headroom: {})",
                deposit.amount,
                validator.headroom()
            ),
        ));
    }

    Ok(AdmittedKind::Claim {
        validator: tx.validator_address.clone(),
        transaction_id: tx.transaction_hash.clone(),
        deposit,
    })
}

fn check_withdraw(state: &LedgerState, tx: &WithdrawTokens) -> Result<AdmittedKind, Rejection> {
    let validator = known_validator(state, &tx.validator_address)?;

    if tx.amount <= 0 {
        return Err(Rejection::new(
            ResultCode::InvalidAmount,
            format!("withdrawal amount must be positive (attempted: {})", tx.amount),
        ));
    }
    if tx.amount > validator.free_tokens {
        return Err(Rejection::new(
            ResultCode::NotEnoughUnstakedTokens,
            format!(
                "trying to withdraw more tokens than unstaked (attempted: {}, unstaked: {})",
                tx.amount, validator.free_tokens
            ),
        ));
    }

    let message = withdraw_message(tx.amount, &tx.address, validator.nonce);
    if !verify_stake_proof(&validator.pub_key, &message, &tx.proof) {
        return Err(Rejection::new(
            ResultCode::InvalidSignature,
            format!("withdraw proof is not valid for nonce {}", validator.nonce),
        ));
    }

    Ok(AdmittedKind::Withdraw {
        validator: tx.validator_address.clone(),
        amount: tx.amount,
        destination: tx.address.clone(),
    })
}
