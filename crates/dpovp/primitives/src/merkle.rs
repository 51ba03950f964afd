//! Binary keccak merkle tree over 32-byte leaves.

use alloy_primitives::{keccak256, B256, KECCAK256_EMPTY};

/// Root of a tree without leaves.
pub const EMPTY_MERKLE_ROOT: B256 = KECCAK256_EMPTY;

/// Compute the merkle root of `leaves`.
///
/// Pairs are hashed as `keccak256(left ++ right)`. An odd node at the end of a level is carried
/// up unchanged.
pub fn merkle_root<I>(leaves: I) -> B256
where
    I: IntoIterator<Item = B256>,
{
    let mut level: Vec<B256> = leaves.into_iter().collect();
    if level.is_empty() {
        return EMPTY_MERKLE_ROOT
    }

    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => hash_pair(left, right),
                [single] => *single,
                _ => unreachable!("chunks(2) yields one or two items"),
            })
            .collect();
    }

    level[0]
}

fn hash_pair(left: &B256, right: &B256) -> B256 {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left.as_slice());
    buf[32..].copy_from_slice(right.as_slice());
    keccak256(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_root() {
        assert_eq!(merkle_root(Vec::new()), EMPTY_MERKLE_ROOT);
    }

    #[test]
    fn test_single_leaf_is_root() {
        let leaf = B256::with_last_byte(7);
        assert_eq!(merkle_root([leaf]), leaf);
    }

    #[test]
    fn test_order_matters() {
        let a = B256::with_last_byte(1);
        let b = B256::with_last_byte(2);
        assert_ne!(merkle_root([a, b]), merkle_root([b, a]));
    }

    #[test]
    fn test_odd_leaf_carried_up() {
        let a = B256::with_last_byte(1);
        let b = B256::with_last_byte(2);
        let c = B256::with_last_byte(3);
        assert_eq!(merkle_root([a, b, c]), hash_pair(&hash_pair(&a, &b), &c));
    }
}
