//! Node signing context.

use alloy_primitives::B256;
use dpovp_primitives::{node_id_from_public_key, sign_hash, NodeId, SignData};
use lru::LruCache;
use parking_lot::Mutex;
use secp256k1::{PublicKey, SecretKey, SECP256K1};
use std::{fmt, num::NonZeroUsize};

/// Signs block hashes with this node's key.
///
/// The last produced signature is memoized: a node usually signs the same block hash several
/// times in a row (seal, then confirmation checks), and only the most recent hash is kept.
pub struct NodeSigner {
    secret: SecretKey,
    node_id: NodeId,
    last_signed: Mutex<LruCache<B256, SignData>>,
}

impl NodeSigner {
    /// Create a signer from a secret key
    pub fn new(secret: SecretKey) -> Self {
        let node_id = node_id_from_public_key(&PublicKey::from_secret_key(SECP256K1, &secret));
        Self { secret, node_id, last_signed: Mutex::new(LruCache::new(NonZeroUsize::MIN)) }
    }

    /// Create a signer from raw secret key bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, secp256k1::Error> {
        SecretKey::from_slice(bytes).map(Self::new)
    }

    /// Network identity of this node
    pub const fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Sign a block hash
    pub fn sign(&self, hash: &B256) -> SignData {
        let mut cache = self.last_signed.lock();
        if let Some(sig) = cache.get(hash) {
            return *sig
        }
        let sig = sign_hash(&self.secret, hash);
        cache.put(*hash, sig);
        sig
    }
}

impl fmt::Debug for NodeSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSigner").field("node_id", &self.node_id).finish_non_exhaustive()
    }
}
