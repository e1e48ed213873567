// Incentives: per-block governance power rewards and misbehavior penalties.
// Runs once per block after the transaction batch; facts lag one block behind.

use crate::config::{BPS_DENOMINATOR, ChainParams};
use crate::crypto::PublicKey;
use crate::ledger::{LedgerState, Validator, hex_key};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// A validator's participation in the previous block's commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteInfo {
    /// Validator address, hex. Matched case-insensitively.
    pub address: String,
    pub signed_last_block: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MisbehaviorKind {
    DuplicateVote,
    LightClientAttack,
    Unknown,
}

/// Evidence of misbehavior reported by the consensus engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Misbehavior {
    pub kind: MisbehaviorKind,
    pub address: String,
    #[serde(default)]
    pub height: u64,
}

/// New voting power for a validator; the only channel for validator-set changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorUpdate {
    #[serde(with = "hex_key")]
    pub pub_key: PublicKey,
    pub power: i64,
}

impl ValidatorUpdate {
    fn of(v: &Validator) -> Self {
        Self {
            pub_key: v.pub_key,
            power: v.governance_power,
        }
    }
}

/// `power * bps / 10_000` in 128-bit arithmetic, clamped to i64.
pub fn rate_of(power: i64, bps: u32) -> i64 {
    let delta = power as i128 * bps as i128 / BPS_DENOMINATOR;
    delta.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Reward every signer, then penalize every offender.
///
/// A validator in both sets is rewarded first and penalized on the increased
/// power. Returns one update per touched validator, in address order.
pub fn apply_block_incentives(
    state: &mut LedgerState,
    votes: &[VoteInfo],
    misbehavior: &[Misbehavior],
    params: &ChainParams,
) -> Vec<ValidatorUpdate> {
    let mut touched: BTreeSet<String> = BTreeSet::new();

    for vote in votes {
        let address = vote.address.to_uppercase();
        if !vote.signed_last_block {
            debug!(%address, "validator did not sign last block, no reward");
            continue;
        }
        let Some(v) = state.validator_mut(&address) else {
            warn!(%address, "vote from unknown validator skipped");
            continue;
        };
        // Capped so power plus free tokens stays within an i64.
        let reward = rate_of(v.governance_power, params.reward_rate_bps).min(v.headroom());
        v.governance_power += reward;
        touched.insert(address);
    }

    for evidence in misbehavior {
        let address = evidence.address.to_uppercase();
        let Some(v) = state.validator_mut(&address) else {
            warn!(%address, kind = ?evidence.kind, "evidence against unknown validator skipped");
            continue;
        };
        let penalty = rate_of(v.governance_power, params.penalty_rate_bps);
        v.governance_power = v.governance_power.saturating_sub(penalty);
        let demoted = v.demote_if_below(params.min_validator_power);
        info!(
            %address,
            kind = ?evidence.kind,
            height = evidence.height,
            penalty,
            demoted,
            "validator penalized"
        );
        touched.insert(address);
    }

    touched
        .iter()
        .filter_map(|address| state.validator(address))
        .map(ValidatorUpdate::of)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: i64 = 10_000;

    fn params() -> ChainParams {
        ChainParams {
            min_validator_power: MIN,
            ..ChainParams::default()
        }
    }

    fn state() -> LedgerState {
        let mut s = LedgerState::new();
        s.validators
            .insert("AA".into(), Validator::new([1u8; 32], 1_000_000));
        s.validators
            .insert("BB".into(), Validator::new([2u8; 32], 10_050));
        s
    }

    fn vote(address: &str, signed: bool) -> VoteInfo {
        VoteInfo {
            address: address.into(),
            signed_last_block: signed,
        }
    }

    fn evidence(address: &str) -> Misbehavior {
        Misbehavior {
            kind: MisbehaviorKind::DuplicateVote,
            address: address.into(),
            height: 9,
        }
    }

    #[test]
    fn signers_are_rewarded() {
        let mut s = state();
        let updates = apply_block_incentives(
            &mut s,
            &[vote("aa", true), vote("BB", false)],
            &[],
            &params(),
        );
        // 1 bps of 1_000_000
        assert_eq!(s.validators["AA"].governance_power, 1_000_100);
        assert_eq!(s.validators["BB"].governance_power, 10_050);
        assert_eq!(
            updates,
            vec![ValidatorUpdate {
                pub_key: [1u8; 32],
                power: 1_000_100
            }]
        );
    }

    #[test]
    fn penalty_reduces_power_and_demotes() {
        let mut s = state();
        let updates = apply_block_incentives(&mut s, &[], &[evidence("AA"), evidence("BB")], &params());

        assert_eq!(s.validators["AA"].governance_power, 990_000);
        // 10_050 - 100 = 9_950 < MIN, folded into free tokens
        let bb = &s.validators["BB"];
        assert_eq!((bb.governance_power, bb.free_tokens), (0, 9_950));
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1].power, 0);
    }

    #[test]
    fn reward_applies_before_penalty() {
        let mut s = state();
        let updates =
            apply_block_incentives(&mut s, &[vote("AA", true)], &[evidence("AA")], &params());
        // 1_000_000 -> 1_000_100 -> minus 1% of 1_000_100 (10_001)
        assert_eq!(s.validators["AA"].governance_power, 990_099);
        assert_eq!(updates.len(), 1);
    }

    #[test]
    fn unknown_addresses_are_skipped() {
        let mut s = state();
        let before = s.clone();
        let updates =
            apply_block_incentives(&mut s, &[vote("CC", true)], &[evidence("DD")], &params());
        assert!(updates.is_empty());
        assert_eq!(s, before);
    }

    #[test]
    fn reward_is_capped_at_balance_limit() {
        let mut s = state();
        let aa = s.validator_mut("AA").expect("AA");
        aa.free_tokens = i64::MAX - 1_000_040;
        apply_block_incentives(&mut s, &[vote("AA", true)], &[], &params());

        let aa = &s.validators["AA"];
        assert_eq!(aa.governance_power, 1_000_040);
        assert_eq!(aa.total_balance(), i64::MAX as i128);
    }

    #[test]
    fn penalty_near_balance_limit_burns_only_the_penalty() {
        let mut s = LedgerState::new();
        let mut v = Validator::new([3u8; 32], MIN);
        v.free_tokens = i64::MAX - MIN - 10;
        s.validators.insert("CC".into(), v);
        let before = s.validators["CC"].total_balance();

        let updates = apply_block_incentives(&mut s, &[], &[evidence("CC")], &params());
        let cc = &s.validators["CC"];
        // 1% of MIN burned, the remaining 9_900 folded into free tokens
        assert_eq!(cc.total_balance(), before - 100);
        assert_eq!((cc.governance_power, cc.free_tokens), (0, i64::MAX - 110));
        assert_eq!(updates[0].power, 0);
    }

    #[test]
    fn vote_without_signed_flag_is_rejected() {
        let err = serde_json::from_str::<VoteInfo>(r#"{"address":"AA"}"#);
        assert!(err.is_err());
        let vote: VoteInfo =
            serde_json::from_str(r#"{"address":"AA","signed_last_block":true}"#).expect("vote");
        assert!(vote.signed_last_block);
    }

    #[test]
    fn rate_uses_wide_arithmetic() {
        assert_eq!(rate_of(i64::MAX, 10_000), i64::MAX);
        assert_eq!(rate_of(9_999, 1), 0);
        assert_eq!(rate_of(0, 100), 0);
    }
}
