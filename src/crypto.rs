// Proof verification: ed25519 stake/withdraw proofs over a nonce-bound message,
// and recoverable secp256k1 deposit proofs. Both primitives fail closed.

use ed25519_dalek::{PublicKey as DalekPublicKey, Signature as DalekSignature, Verifier};
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use sha2::{Digest, Sha256};
use sha3::Keccak256;
use thiserror::Error;

pub type Hash = [u8; 32];
pub type PublicKey = [u8; 32];

/// Empty-tree root marker.
pub const ZERO_HASH: Hash = [0u8; 32];

pub const ED25519_SIGNATURE_LEN: usize = 64;
pub const RECOVERABLE_SIGNATURE_LEN: usize = 65;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DepositProofError {
    #[error("proof is not valid hex")]
    Encoding,
    #[error("proof must be {RECOVERABLE_SIGNATURE_LEN} bytes, got {0}")]
    Length(usize),
    #[error("unsupported recovery byte {0}")]
    RecoveryByte(u8),
    #[error("malformed signature scalars")]
    Signature,
    #[error("public key recovery failed")]
    Recovery,
}

pub fn sha256(bytes: &[u8]) -> Hash {
    Sha256::digest(bytes).into()
}

pub fn keccak256(bytes: &[u8]) -> Hash {
    Keccak256::digest(bytes).into()
}

/// Lowercase `0x` hex with a leading `-` for negative values.
pub fn signed_hex(value: i64) -> String {
    if value < 0 {
        format!("-{:#x}", value.unsigned_abs())
    } else {
        format!("{:#x}", value)
    }
}

pub fn nonce_hex(nonce: u32) -> String {
    format!("{:#x}", nonce)
}

/// `"Stake" + hex(amount) + hex(nonce)`
pub fn stake_message(amount: i64, nonce: u32) -> Vec<u8> {
    format!("Stake{}{}", signed_hex(amount), nonce_hex(nonce)).into_bytes()
}

/// `"Withdraw" + hex(amount) + destination + hex(nonce)`
pub fn withdraw_message(amount: i64, destination: &str, nonce: u32) -> Vec<u8> {
    format!(
        "Withdraw{}{}{}",
        signed_hex(amount),
        destination,
        nonce_hex(nonce)
    )
    .into_bytes()
}

/// Hash the depositor signs to hand a deposit to a validator.
pub fn claim_message_hash(transaction_id: &str, validator_address: &str) -> Hash {
    keccak256(format!("Claim{}{}", transaction_id, validator_address).as_bytes())
}

/// Digest an ed25519 stake proof signs.
pub fn proof_digest(message: &[u8]) -> Hash {
    sha256(message)
}

fn decode_proof(proof: &str) -> Option<Vec<u8>> {
    let trimmed = proof.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    hex::decode(body).ok()
}

/// Verify an ed25519 proof over `SHA-256(message)`.
/// Any decoding or verification failure yields `false`.
pub fn verify_stake_proof(pubkey: &PublicKey, message: &[u8], proof: &str) -> bool {
    let Some(bytes) = decode_proof(proof) else {
        return false;
    };
    if bytes.len() != ED25519_SIGNATURE_LEN {
        return false;
    }
    let Ok(pk) = DalekPublicKey::from_bytes(pubkey) else {
        return false;
    };
    let Ok(sig) = DalekSignature::try_from(bytes.as_slice()) else {
        return false;
    };
    pk.verify(&proof_digest(message), &sig).is_ok()
}

/// Recover the Ethereum-style address that produced `proof` over `message_hash`.
pub fn verify_deposit_proof(message_hash: &Hash, proof: &str) -> Result<String, DepositProofError> {
    let bytes = decode_proof(proof).ok_or(DepositProofError::Encoding)?;
    if bytes.len() != RECOVERABLE_SIGNATURE_LEN {
        return Err(DepositProofError::Length(bytes.len()));
    }
    let v = bytes[64];
    let rec = match v {
        0 | 1 => v,
        27 | 28 => v - 27,
        other => return Err(DepositProofError::RecoveryByte(other)),
    };
    let recovery_id = RecoveryId::from_byte(rec).ok_or(DepositProofError::RecoveryByte(v))?;
    let signature =
        EcdsaSignature::from_slice(&bytes[..64]).map_err(|_| DepositProofError::Signature)?;
    let key = VerifyingKey::recover_from_prehash(message_hash, &signature, recovery_id)
        .map_err(|_| DepositProofError::Recovery)?;
    Ok(eth_address(&key))
}

/// `0x` + last 20 bytes of Keccak256 over the uncompressed point (prefix stripped).
pub fn eth_address(key: &VerifyingKey) -> String {
    let point = key.as_affine().to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

/// Case/prefix-insensitive form used to compare depositor addresses.
pub fn normalize_eth_address(address: &str) -> String {
    let trimmed = address.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    format!("0x{}", body.to_ascii_lowercase())
}

/// Ledger address of a validator: uppercase hex of the first 20 bytes of SHA-256(pubkey).
pub fn validator_address(pubkey: &PublicKey) -> String {
    address_from_bytes(&sha256(pubkey)[..20])
}

pub fn address_from_bytes(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}
