//! Domain-separated SHA-256 Merkle tree.
//!
//! Leaf hashing prefixes a `0x00` domain byte, internal nodes prefix
//! `0x01`, so a leaf hash and an internal node hash can never collide
//! even if one is accidentally fed into the other's slot — the same
//! discipline the prior-generation batch sealer used for its top-level
//! batch digest, generalized here into a full binary tree. An odd
//! number of nodes at a level is completed by duplicating the last
//! node, the common fix for the "dangling node" ambiguity in naive
//! Merkle constructions.

use sha2::{Digest, Sha256};

use anchormatch_types::model::MerkleProof;

use crate::error::MerkleError;

const LEAF_DOMAIN: u8 = 0x00;
const NODE_DOMAIN: u8 = 0x01;

/// A built Merkle tree over a fixed, ordered set of match-hash leaves.
///
/// `levels[0]` holds the leaf hashes; each subsequent level halves (with
/// duplication on an odd count) until `levels.last()` is the single
/// root hash.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<[u8; 32]>>,
}

impl MerkleTree {
    /// Build a tree from hex-encoded match hashes, in the order given.
    /// Order matters: it determines each leaf's `index` for proof
    /// generation and must match whatever order the batch manifest
    /// records.
    ///
    /// # Errors
    /// Returns `MerkleError::EmptyInput` for an empty slice, or
    /// `MerkleError::InvalidHexEncoding`/`InvalidHashLength` if any
    /// entry isn't a 32-byte hex hash.
    pub fn build(match_hashes: &[String]) -> Result<Self, MerkleError> {
        if match_hashes.is_empty() {
            return Err(MerkleError::EmptyInput);
        }
        let mut leaves = Vec::with_capacity(match_hashes.len());
        for hash in match_hashes {
            leaves.push(leaf_hash(&decode32(hash)?));
        }

        let mut levels = vec![leaves];
        while levels.last().unwrap().len() > 1 {
            let prev = levels.last().unwrap();
            let mut next = Vec::with_capacity(prev.len().div_ceil(2));
            let mut i = 0;
            while i < prev.len() {
                let left = prev[i];
                let right = if i + 1 < prev.len() { prev[i + 1] } else { prev[i] };
                next.push(internal_hash(&left, &right));
                i += 2;
            }
            levels.push(next);
        }

        Ok(Self { levels })
    }

    /// Hex-encoded root hash.
    #[must_use]
    pub fn root(&self) -> String {
        hex::encode(self.levels.last().unwrap()[0])
    }

    /// Number of levels above the leaves (i.e. the proof length for any
    /// leaf in a full tree).
    #[must_use]
    pub fn height(&self) -> usize {
        self.levels.len() - 1
    }

    /// Number of leaves the tree was built from.
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    /// Build an inclusion proof for the leaf at `index`.
    ///
    /// # Errors
    /// Returns `MerkleError::IndexOutOfRange` if `index` is not a valid
    /// leaf position.
    pub fn generate_proof(
        &self,
        match_id: anchormatch_types::ids::MatchId,
        match_hash: &str,
        index: usize,
    ) -> Result<MerkleProof, MerkleError> {
        let leaf_count = self.leaf_count();
        if index >= leaf_count {
            return Err(MerkleError::IndexOutOfRange {
                index,
                len: leaf_count,
            });
        }

        let mut proof = Vec::with_capacity(self.height());
        let mut idx = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling_idx = if idx % 2 == 0 { idx + 1 } else { idx - 1 };
            let sibling = if sibling_idx < level.len() {
                level[sibling_idx]
            } else {
                level[idx]
            };
            proof.push(hex::encode(sibling));
            idx /= 2;
        }

        Ok(MerkleProof {
            match_id,
            sha256: match_hash.to_string(),
            proof,
            index,
        })
    }

    /// Verify `proof` folds up to this tree's root.
    ///
    /// # Errors
    /// Returns `MerkleError` if the proof is malformed (bad hex, wrong
    /// index, or a depth disagreeing with this tree's height). A
    /// well-formed proof that simply doesn't match the root returns
    /// `Ok(false)`, not an error.
    pub fn verify_proof(&self, proof: &MerkleProof) -> Result<bool, MerkleError> {
        verify_against_root(proof, &self.root(), self.height())
    }
}

/// Verify a proof against a known root hash and expected tree height,
/// without needing the full tree in memory. Used by the verifier, which
/// only ever holds manifests and proofs, never a live `MerkleTree`.
///
/// # Errors
/// Returns `MerkleError` for malformed input (bad hex, wrong proof
/// depth). A well-formed but non-matching proof returns `Ok(false)`.
pub fn verify_against_root(
    proof: &MerkleProof,
    root_hex: &str,
    expected_height: usize,
) -> Result<bool, MerkleError> {
    if proof.proof.len() != expected_height {
        return Err(MerkleError::LengthMismatch {
            expected: expected_height,
            actual: proof.proof.len(),
        });
    }

    let mut current = leaf_hash(&decode32(&proof.sha256)?);
    let mut idx = proof.index;
    for sibling_hex in &proof.proof {
        let sibling = decode32(sibling_hex)?;
        current = if idx % 2 == 0 {
            internal_hash(&current, &sibling)
        } else {
            internal_hash(&sibling, &current)
        };
        idx /= 2;
    }

    let root = decode32(root_hex)?;
    Ok(current == root)
}

fn leaf_hash(hash: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_DOMAIN]);
    hasher.update(hash);
    hasher.finalize().into()
}

fn internal_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([NODE_DOMAIN]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

fn decode32(hex_str: &str) -> Result<[u8; 32], MerkleError> {
    let bytes =
        hex::decode(hex_str).map_err(|e| MerkleError::InvalidHexEncoding(e.to_string()))?;
    bytes.try_into().map_err(|_| MerkleError::InvalidHashLength)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchormatch_types::ids::MatchId;

    fn hash_of(label: &str) -> String {
        crate::hash_sign::hash(label.as_bytes())
    }

    #[test]
    fn single_leaf_tree_root_is_leaf_hash() {
        let h = hash_of("only");
        let tree = MerkleTree::build(&[h.clone()]).unwrap();
        assert_eq!(tree.height(), 0);
        let expected = hex::encode(leaf_hash(&decode32(&h).unwrap()));
        assert_eq!(tree.root(), expected);
    }

    #[test]
    fn proof_verifies_for_every_leaf_in_odd_sized_tree() {
        let hashes: Vec<String> = (0..5).map(|i| hash_of(&format!("match-{i}"))).collect();
        let tree = MerkleTree::build(&hashes).unwrap();
        for (i, h) in hashes.iter().enumerate() {
            let proof = tree
                .generate_proof(MatchId::new(), h, i)
                .unwrap();
            assert!(tree.verify_proof(&proof).unwrap(), "leaf {i} failed to verify");
        }
    }

    #[test]
    fn tampered_leaf_hash_fails_verification() {
        let hashes: Vec<String> = (0..4).map(|i| hash_of(&format!("match-{i}"))).collect();
        let tree = MerkleTree::build(&hashes).unwrap();
        let mut proof = tree.generate_proof(MatchId::new(), &hashes[2], 2).unwrap();
        proof.sha256 = hash_of("not-match-2");
        assert!(!tree.verify_proof(&proof).unwrap());
    }

    #[test]
    fn verify_against_root_matches_full_tree_verification() {
        let hashes: Vec<String> = (0..3).map(|i| hash_of(&format!("match-{i}"))).collect();
        let tree = MerkleTree::build(&hashes).unwrap();
        let proof = tree.generate_proof(MatchId::new(), &hashes[1], 1).unwrap();
        assert!(verify_against_root(&proof, &tree.root(), tree.height()).unwrap());
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let hashes: Vec<String> = (0..2).map(|i| hash_of(&format!("match-{i}"))).collect();
        let tree = MerkleTree::build(&hashes).unwrap();
        let err = tree.generate_proof(MatchId::new(), &hashes[0], 5).unwrap_err();
        assert!(matches!(err, MerkleError::IndexOutOfRange { .. }));
    }

    #[test]
    fn empty_input_is_rejected() {
        let err = MerkleTree::build(&[]).unwrap_err();
        assert!(matches!(err, MerkleError::EmptyInput));
    }

    #[test]
    fn proof_depth_mismatch_is_rejected() {
        let hashes: Vec<String> = (0..4).map(|i| hash_of(&format!("match-{i}"))).collect();
        let tree = MerkleTree::build(&hashes).unwrap();
        let mut proof = tree.generate_proof(MatchId::new(), &hashes[0], 0).unwrap();
        proof.proof.push(hash_of("extra"));
        let err = verify_against_root(&proof, &tree.root(), tree.height()).unwrap_err();
        assert!(matches!(err, MerkleError::LengthMismatch { .. }));
    }
}
