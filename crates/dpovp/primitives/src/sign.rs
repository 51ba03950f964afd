//! Recoverable secp256k1 signatures over block hashes.
//!
//! A deputy is identified on the network by its [`NodeId`], the 64-byte uncompressed public key
//! without the `0x04` prefix. Confirmations and header seals are [`SignData`]: `R || S || V`,
//! from which the node id is recovered.

use alloy_primitives::{FixedBytes, B256, B512};
use secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    Message, PublicKey, SecretKey, SECP256K1,
};
use serde::{Deserialize, Serialize};

/// Length of a serialized signature: 64 bytes of `R || S` followed by the recovery id.
pub const SIGNATURE_LENGTH: usize = 65;

/// Network identity of a node.
pub type NodeId = B512;

/// Signature recovery errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignError {
    /// Malformed signature bytes or recovery id
    #[error("invalid signature format")]
    InvalidFormat,

    /// The signature does not recover to a public key
    #[error("signature recovery failed")]
    RecoveryFailed,
}

/// A recoverable signature over a 32-byte hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignData(pub FixedBytes<SIGNATURE_LENGTH>);

impl SignData {
    /// Wrap raw `R || S || V` bytes.
    pub const fn new(bytes: [u8; SIGNATURE_LENGTH]) -> Self {
        Self(FixedBytes(bytes))
    }

    /// Raw signature bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }

    /// Recover the identity of the node that signed `hash`.
    ///
    /// The recovery id may be stored either as `0..=3` or in the legacy `27..=30` range.
    pub fn recover_node(&self, hash: &B256) -> Result<NodeId, SignError> {
        let bytes = self.as_bytes();
        let v = bytes[64];
        let v = if v >= 27 { v - 27 } else { v };

        let recovery_id =
            RecoveryId::from_i32(v as i32).map_err(|_| SignError::InvalidFormat)?;
        let sig = RecoverableSignature::from_compact(&bytes[..64], recovery_id)
            .map_err(|_| SignError::InvalidFormat)?;

        let message = Message::from_digest(hash.0);
        let public_key =
            SECP256K1.recover_ecdsa(&message, &sig).map_err(|_| SignError::RecoveryFailed)?;

        Ok(node_id_from_public_key(&public_key))
    }
}

/// Sign `hash` with `secret`, producing `R || S || V` with `V` in `0..=3`.
pub fn sign_hash(secret: &SecretKey, hash: &B256) -> SignData {
    let message = Message::from_digest(hash.0);
    let sig = SECP256K1.sign_ecdsa_recoverable(&message, secret);
    let (recovery_id, compact) = sig.serialize_compact();

    let mut bytes = [0u8; SIGNATURE_LENGTH];
    bytes[..64].copy_from_slice(&compact);
    bytes[64] = recovery_id.to_i32() as u8;
    SignData::new(bytes)
}

/// Derive a [`NodeId`] from a public key.
pub fn node_id_from_public_key(public_key: &PublicKey) -> NodeId {
    let uncompressed = public_key.serialize_uncompressed();
    B512::from_slice(&uncompressed[1..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn key(seed: u8) -> SecretKey {
        SecretKey::from_slice(&[seed; 32]).unwrap()
    }

    #[test]
    fn test_sign_and_recover() {
        let secret = key(1);
        let expected = node_id_from_public_key(&PublicKey::from_secret_key(SECP256K1, &secret));
        let hash = B256::with_last_byte(0x42);

        let sig = sign_hash(&secret, &hash);
        assert_eq!(sig.recover_node(&hash).unwrap(), expected);
    }

    #[test]
    fn test_recover_with_legacy_v() {
        let secret = key(2);
        let hash = B256::with_last_byte(9);
        let sig = sign_hash(&secret, &hash);

        let mut legacy = sig.0 .0;
        legacy[64] += 27;
        assert_eq!(
            SignData::new(legacy).recover_node(&hash).unwrap(),
            sig.recover_node(&hash).unwrap()
        );
    }

    #[test]
    fn test_other_hash_recovers_other_node() {
        let secret = key(3);
        let sig = sign_hash(&secret, &B256::with_last_byte(1));
        let signer = sig.recover_node(&B256::with_last_byte(1)).unwrap();

        // recovery over a different message yields some unrelated key
        if let Ok(other) = sig.recover_node(&B256::with_last_byte(2)) {
            assert_ne!(other, signer);
        }
    }

    #[test]
    fn test_bad_recovery_id() {
        let mut bytes = [1u8; SIGNATURE_LENGTH];
        bytes[64] = 9;
        assert_matches!(
            SignData::new(bytes).recover_node(&B256::ZERO),
            Err(SignError::InvalidFormat)
        );
    }
}
