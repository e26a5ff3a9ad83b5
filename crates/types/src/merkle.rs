//! Binary Merkle tree over transaction hashes.

use crate::H256;

/// Computes the Merkle root of a list of hashes.
///
/// Leaves are combined pairwise with Keccak256; an odd node is paired with
/// itself. The root of an empty list is the nil hash.
pub fn merkle_root(hashes: &[H256]) -> H256 {
    if hashes.is_empty() {
        return H256::NIL;
    }

    let mut level: Vec<H256> = hashes.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let right = pair.get(1).unwrap_or(&pair[0]);
            next.push(H256::keccak256_concat(&[pair[0].as_bytes(), right.as_bytes()]));
        }
        level = next;
    }
    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_nil() {
        assert_eq!(merkle_root(&[]), H256::NIL);
    }

    #[test]
    fn single_leaf_is_its_pair_hash() {
        let leaf = H256::keccak256(b"leaf");
        assert_eq!(
            merkle_root(&[leaf]),
            leaf
        );
    }

    #[test]
    fn order_matters() {
        let a = H256::keccak256(b"a");
        let b = H256::keccak256(b"b");
        assert_ne!(merkle_root(&[a, b]), merkle_root(&[b, a]));
    }

    #[test]
    fn odd_count_duplicates_last() {
        let a = H256::keccak256(b"a");
        let b = H256::keccak256(b"b");
        let c = H256::keccak256(b"c");
        let ab = H256::keccak256_concat(&[a.as_bytes(), b.as_bytes()]);
        let cc = H256::keccak256_concat(&[c.as_bytes(), c.as_bytes()]);
        let expected = H256::keccak256_concat(&[ab.as_bytes(), cc.as_bytes()]);
        assert_eq!(merkle_root(&[a, b, c]), expected);
    }
}
