//! Merkle tree root computation
//!
//! Leaves are transaction ids. Each level hashes concatenated sibling pairs
//! with double SHA-256; an odd node at the end of a level is paired with
//! itself.

use super::hash::double_sha256;

/// Calculate the merkle root from a list of leaf digests.
///
/// An empty list yields an empty root.
pub fn calculate_merkle_root(leaves: &[Vec<u8>]) -> Vec<u8> {
    if leaves.is_empty() {
        return Vec::new();
    }

    let mut current_level: Vec<Vec<u8>> = leaves.to_vec();

    while current_level.len() > 1 {
        let next_level = current_level
            .chunks(2)
            .map(|pair| {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(left);
                hash_pair(left, right)
            })
            .collect();
        current_level = next_level;
    }

    current_level.remove(0)
}

fn hash_pair(left: &[u8], right: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(left.len() + right.len());
    data.extend_from_slice(left);
    data.extend_from_slice(right);
    double_sha256(&data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sha256;

    #[test]
    fn test_merkle_root_single() {
        let hashes = vec![sha256(b"tx1")];
        assert_eq!(calculate_merkle_root(&hashes), hashes[0]);
    }

    #[test]
    fn test_merkle_root_two() {
        let hash1 = sha256(b"tx1");
        let hash2 = sha256(b"tx2");

        let root = calculate_merkle_root(&[hash1.clone(), hash2.clone()]);

        let mut expected = hash1;
        expected.extend_from_slice(&hash2);
        assert_eq!(root, double_sha256(&expected));
    }

    #[test]
    fn test_merkle_root_odd_duplicates_last() {
        let a = sha256(b"tx1");
        let b = sha256(b"tx2");
        let c = sha256(b"tx3");

        let root = calculate_merkle_root(&[a.clone(), b.clone(), c.clone()]);
        let expected = hash_pair(&hash_pair(&a, &b), &hash_pair(&c, &c));
        assert_eq!(root, expected);
    }

    #[test]
    fn test_empty_merkle_root() {
        assert!(calculate_merkle_root(&[]).is_empty());
    }
}
