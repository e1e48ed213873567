// Shared fixtures for unit tests: deterministic keys and proofs.

use crate::crypto::{
    PublicKey, claim_message_hash, eth_address, proof_digest, stake_message, validator_address,
    withdraw_message,
};
use crate::ledger::{LedgerState, Validator};
use ed25519_dalek::{Keypair, SecretKey, Signer};
use k256::ecdsa::SigningKey;

pub fn keypair(seed: u8) -> Keypair {
    let secret = SecretKey::from_bytes(&[seed; 32]).expect("secret key");
    let public: ed25519_dalek::PublicKey = (&secret).into();
    Keypair { secret, public }
}

pub fn pubkey(seed: u8) -> PublicKey {
    keypair(seed).public.to_bytes()
}

pub fn address(seed: u8) -> String {
    validator_address(&pubkey(seed))
}

pub fn sign(seed: u8, message: &[u8]) -> String {
    hex::encode(keypair(seed).sign(&proof_digest(message)).to_bytes())
}

pub fn stake_proof(seed: u8, amount: i64, nonce: u32) -> String {
    sign(seed, &stake_message(amount, nonce))
}

pub fn withdraw_proof(seed: u8, amount: i64, destination: &str, nonce: u32) -> String {
    sign(seed, &withdraw_message(amount, destination, nonce))
}

pub fn depositor(seed: u8) -> SigningKey {
    SigningKey::from_slice(&[seed; 32]).expect("signing key")
}

pub fn depositor_address(seed: u8) -> String {
    eth_address(depositor(seed).verifying_key())
}

pub fn claim_proof(depositor_seed: u8, transaction_id: &str, validator: &str) -> String {
    let hash = claim_message_hash(transaction_id, validator);
    let (sig, rec) = depositor(depositor_seed)
        .sign_prehash_recoverable(&hash)
        .expect("sign");
    let mut out = sig.to_bytes().to_vec();
    out.push(rec.to_byte() + 27);
    hex::encode(out)
}

/// State holding a single validator derived from `seed`.
pub fn state_with(seed: u8, power: i64, free: i64) -> LedgerState {
    let mut state = LedgerState::new();
    let mut v = Validator::new(pubkey(seed), power);
    v.free_tokens = free;
    state.validators.insert(address(seed), v);
    state
}
