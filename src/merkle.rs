//! Fixed-depth sparse Merkle tree backing each balance card.
//!
//! Leaves are indexed by motion id. Absent leaves equal the all-zero default
//! leaf, and a subtree holding only defaults collapses to a per-level constant
//! (`default[d + 1] = keccak256(default[d] || default[d])`), so only populated
//! paths are ever hashed. At level `d` (0 = leaves) bit `d` of the index picks
//! the side: a clear bit puts the running node on the left.

use std::collections::BTreeMap;

use serde_json::json;
use thiserror::Error;

use crate::digest::{digest_from_hex, digest_to_hex, hash_pair, Digest32, ZERO_DIGEST};

/// Depth used by booth deployments unless configured otherwise (512 leaves).
pub const DEFAULT_DEPTH: usize = 9;

/// Largest supported depth; leaf indices are `u64`.
pub const MAX_DEPTH: usize = 64;

const BITMAP_LEN: usize = 8;

/// Errors raised by tree construction, proof generation and verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MerkleError {
    /// Depth outside `1..=64`.
    #[error("tree depth {0} outside 1..=64")]
    InvalidDepth(usize),
    /// Leaf index does not fit the tree.
    #[error("leaf index {index} outside a depth-{depth} tree")]
    IndexOutOfRange {
        /// Offending index.
        index: u64,
        /// Depth of the tree.
        depth: usize,
    },
    /// Proof does not carry exactly one sibling per level.
    #[error("proof carries {actual} siblings, expected {expected}")]
    ProofLengthMismatch {
        /// Tree depth.
        expected: usize,
        /// Siblings supplied.
        actual: usize,
    },
    /// Folding the old leaf with the proof did not reproduce the claimed root.
    #[error("proof does not reproduce the claimed root")]
    ProofMismatch,
    /// Compact proof bytes are inconsistent with their bitmap.
    #[error("malformed compact proof: {0}")]
    MalformedCompactProof(String),
    /// JSON or hex decoding failure.
    #[error("invalid proof encoding: {0}")]
    Decode(String),
}

fn check_depth(depth: usize) -> Result<(), MerkleError> {
    if depth == 0 || depth > MAX_DEPTH {
        return Err(MerkleError::InvalidDepth(depth));
    }
    Ok(())
}

fn check_index(depth: usize, index: u64) -> Result<(), MerkleError> {
    if depth < MAX_DEPTH && index >> depth != 0 {
        return Err(MerkleError::IndexOutOfRange { index, depth });
    }
    Ok(())
}

/// Roots of all-default subtrees, one per level from the leaf up to the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultHashes {
    levels: Vec<Digest32>,
}

impl DefaultHashes {
    /// Precomputes the default node for every level of a depth-`depth` tree.
    pub fn new(depth: usize) -> Result<Self, MerkleError> {
        check_depth(depth)?;
        let mut levels = Vec::with_capacity(depth + 1);
        levels.push(ZERO_DIGEST);
        for level in 0..depth {
            let below = levels[level];
            levels.push(hash_pair(&below, &below));
        }
        Ok(Self { levels })
    }

    /// Tree depth these defaults were computed for.
    pub fn depth(&self) -> usize {
        self.levels.len() - 1
    }

    /// Default node at `level` (0 = leaf, `depth` = root).
    pub fn level(&self, level: usize) -> &Digest32 {
        &self.levels[level]
    }

    /// Root of a tree whose leaves are all default.
    pub fn empty_root(&self) -> Digest32 {
        self.levels[self.depth()]
    }
}

/// Sibling hashes along the path from a leaf to the root, leaf first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    /// One sibling per level.
    pub siblings: Vec<Digest32>,
}

impl MerkleProof {
    /// Wraps a leaf-to-root sibling sequence.
    pub fn new(siblings: Vec<Digest32>) -> Self {
        Self { siblings }
    }

    /// Number of levels the proof spans.
    pub fn len(&self) -> usize {
        self.siblings.len()
    }

    /// `true` when the proof carries no siblings.
    pub fn is_empty(&self) -> bool {
        self.siblings.is_empty()
    }

    /// Serialises the proof to a JSON string with hex-encoded siblings.
    pub fn to_json_string(&self) -> String {
        let siblings: Vec<_> = self.siblings.iter().map(digest_to_hex).collect();
        json!({ "siblings": siblings }).to_string()
    }

    /// Parses a proof previously emitted by [`MerkleProof::to_json_string`].
    pub fn from_json_str(input: &str) -> Result<Self, MerkleError> {
        let value: serde_json::Value = serde_json::from_str(input)
            .map_err(|err| MerkleError::Decode(format!("invalid proof JSON: {err}")))?;
        let array = value
            .get("siblings")
            .and_then(|v| v.as_array())
            .ok_or_else(|| MerkleError::Decode("missing siblings".to_string()))?;
        let mut siblings = Vec::with_capacity(array.len());
        for node in array {
            let text = node
                .as_str()
                .ok_or_else(|| MerkleError::Decode("sibling must be a hex string".to_string()))?;
            siblings.push(digest_from_hex(text).map_err(MerkleError::Decode)?);
        }
        Ok(Self { siblings })
    }
}

/// Wire form of a proof: a bitmap of explicit levels plus the non-default siblings.
///
/// Bit `d` of the bitmap is set when the sibling at level `d` is carried;
/// otherwise the verifier substitutes the level's default node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactProof {
    bitmap: u64,
    siblings: Vec<Digest32>,
}

impl CompactProof {
    /// Drops every sibling that equals its level's default node.
    pub fn compress(proof: &MerkleProof, defaults: &DefaultHashes) -> Result<Self, MerkleError> {
        ensure_length(defaults.depth(), proof)?;
        let mut bitmap = 0u64;
        let mut siblings = Vec::new();
        for (level, sibling) in proof.siblings.iter().enumerate() {
            if sibling != defaults.level(level) {
                bitmap |= 1 << level;
                siblings.push(*sibling);
            }
        }
        Ok(Self { bitmap, siblings })
    }

    /// Restores the full sibling sequence for a tree with the given defaults.
    pub fn expand(&self, defaults: &DefaultHashes) -> Result<MerkleProof, MerkleError> {
        let depth = defaults.depth();
        if depth < MAX_DEPTH && self.bitmap >> depth != 0 {
            return Err(MerkleError::MalformedCompactProof(format!(
                "bitmap {:#x} marks levels beyond depth {depth}",
                self.bitmap
            )));
        }
        let mut explicit = self.siblings.iter();
        let mut siblings = Vec::with_capacity(depth);
        for level in 0..depth {
            if (self.bitmap >> level) & 1 == 1 {
                let sibling = explicit.next().ok_or_else(|| {
                    MerkleError::MalformedCompactProof("bitmap exceeds sibling count".to_string())
                })?;
                siblings.push(*sibling);
            } else {
                siblings.push(*defaults.level(level));
            }
        }
        Ok(MerkleProof { siblings })
    }

    /// Bitmap of explicitly carried levels.
    pub fn bitmap(&self) -> u64 {
        self.bitmap
    }

    /// Explicit siblings, leaf first.
    pub fn siblings(&self) -> &[Digest32] {
        &self.siblings
    }

    /// Big-endian bitmap followed by the explicit siblings.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BITMAP_LEN + 32 * self.siblings.len());
        out.extend_from_slice(&self.bitmap.to_be_bytes());
        for sibling in &self.siblings {
            out.extend_from_slice(sibling);
        }
        out
    }

    /// Parses bytes produced by [`CompactProof::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MerkleError> {
        if bytes.len() < BITMAP_LEN || (bytes.len() - BITMAP_LEN) % 32 != 0 {
            return Err(MerkleError::MalformedCompactProof(format!(
                "length {} is not 8 + 32k",
                bytes.len()
            )));
        }
        let mut raw_bitmap = [0u8; BITMAP_LEN];
        raw_bitmap.copy_from_slice(&bytes[..BITMAP_LEN]);
        let bitmap = u64::from_be_bytes(raw_bitmap);
        let siblings: Vec<Digest32> = bytes[BITMAP_LEN..]
            .chunks_exact(32)
            .map(|chunk| {
                let mut sibling = [0u8; 32];
                sibling.copy_from_slice(chunk);
                sibling
            })
            .collect();
        if bitmap.count_ones() as usize != siblings.len() {
            return Err(MerkleError::MalformedCompactProof(format!(
                "bitmap marks {} levels but {} siblings follow",
                bitmap.count_ones(),
                siblings.len()
            )));
        }
        Ok(Self { bitmap, siblings })
    }
}

fn ensure_length(depth: usize, proof: &MerkleProof) -> Result<(), MerkleError> {
    if proof.len() != depth {
        return Err(MerkleError::ProofLengthMismatch {
            expected: depth,
            actual: proof.len(),
        });
    }
    Ok(())
}

/// Folds `leaf` up the tree along `proof` and returns the implied root.
pub fn root_from_proof(
    depth: usize,
    index: u64,
    leaf: &Digest32,
    proof: &MerkleProof,
) -> Result<Digest32, MerkleError> {
    check_depth(depth)?;
    check_index(depth, index)?;
    ensure_length(depth, proof)?;
    let mut node = *leaf;
    for (level, sibling) in proof.siblings.iter().enumerate() {
        node = if (index >> level) & 1 == 0 {
            hash_pair(&node, sibling)
        } else {
            hash_pair(sibling, &node)
        };
    }
    Ok(node)
}

/// Authenticates `old_leaf` against `claimed_old_root`, then returns the root
/// obtained by replacing it with `new_leaf`.
///
/// Both folds share the proof: siblings do not depend on the leaf being
/// replaced, so a single path authenticates the whole transition.
pub fn verify_and_compute_new_root(
    depth: usize,
    index: u64,
    proof: &MerkleProof,
    old_leaf: &Digest32,
    new_leaf: &Digest32,
    claimed_old_root: &Digest32,
) -> Result<Digest32, MerkleError> {
    let old_root = root_from_proof(depth, index, old_leaf, proof)?;
    if &old_root != claimed_old_root {
        return Err(MerkleError::ProofMismatch);
    }
    root_from_proof(depth, index, new_leaf, proof)
}

/// Root of a depth-`depth` tree holding `leaves`; absent indices are default.
pub fn compute_root(depth: usize, leaves: &BTreeMap<u64, Digest32>) -> Result<Digest32, MerkleError> {
    let tree = SparseMerkleTree::from_leaves(depth, leaves.iter().map(|(k, v)| (*k, *v)))?;
    Ok(tree.root())
}

/// Client-side tree holding only the populated leaves of one card.
#[derive(Debug, Clone)]
pub struct SparseMerkleTree {
    defaults: DefaultHashes,
    leaves: BTreeMap<u64, Digest32>,
}

impl SparseMerkleTree {
    /// Empty tree of the given depth.
    pub fn new(depth: usize) -> Result<Self, MerkleError> {
        Ok(Self {
            defaults: DefaultHashes::new(depth)?,
            leaves: BTreeMap::new(),
        })
    }

    /// Tree populated from `(index, leaf)` pairs; later pairs overwrite earlier ones.
    pub fn from_leaves<I>(depth: usize, leaves: I) -> Result<Self, MerkleError>
    where
        I: IntoIterator<Item = (u64, Digest32)>,
    {
        let mut tree = Self::new(depth)?;
        for (index, leaf) in leaves {
            tree.insert(index, leaf)?;
        }
        Ok(tree)
    }

    /// Tree depth.
    pub fn depth(&self) -> usize {
        self.defaults.depth()
    }

    /// Default node table for this depth.
    pub fn defaults(&self) -> &DefaultHashes {
        &self.defaults
    }

    /// Leaf at `index`, default when unpopulated.
    pub fn get(&self, index: u64) -> Result<Digest32, MerkleError> {
        check_index(self.depth(), index)?;
        Ok(self.leaves.get(&index).copied().unwrap_or(ZERO_DIGEST))
    }

    /// Sets the leaf at `index` and returns the previous value.
    ///
    /// Writing the default leaf removes the entry, keeping the map sparse.
    pub fn insert(&mut self, index: u64, leaf: Digest32) -> Result<Digest32, MerkleError> {
        check_index(self.depth(), index)?;
        let previous = if leaf == ZERO_DIGEST {
            self.leaves.remove(&index)
        } else {
            self.leaves.insert(index, leaf)
        };
        Ok(previous.unwrap_or(ZERO_DIGEST))
    }

    /// Populated leaves in index order.
    pub fn leaves(&self) -> impl Iterator<Item = (u64, &Digest32)> + '_ {
        self.leaves.iter().map(|(index, leaf)| (*index, leaf))
    }

    /// Number of non-default leaves.
    pub fn populated(&self) -> usize {
        self.leaves.len()
    }

    /// Current root.
    pub fn root(&self) -> Digest32 {
        let layers = self.layers();
        layers[self.depth()]
            .get(&0)
            .copied()
            .unwrap_or_else(|| self.defaults.empty_root())
    }

    /// Sibling path for `index`, leaf first.
    pub fn create_proof(&self, index: u64) -> Result<MerkleProof, MerkleError> {
        check_index(self.depth(), index)?;
        let layers = self.layers();
        let siblings = (0..self.depth())
            .map(|level| {
                let sibling = (index >> level) ^ 1;
                layers[level]
                    .get(&sibling)
                    .copied()
                    .unwrap_or(*self.defaults.level(level))
            })
            .collect();
        Ok(MerkleProof { siblings })
    }

    /// Populated nodes per level; level `depth` holds at most the root.
    fn layers(&self) -> Vec<BTreeMap<u64, Digest32>> {
        let depth = self.depth();
        let mut layers = Vec::with_capacity(depth + 1);
        layers.push(self.leaves.clone());
        for level in 0..depth {
            let mut next = BTreeMap::new();
            {
                let current = &layers[level];
                let default = self.defaults.level(level);
                for &index in current.keys() {
                    let parent = index >> 1;
                    if next.contains_key(&parent) {
                        continue;
                    }
                    let left = current.get(&(parent << 1)).unwrap_or(default);
                    let right = current.get(&((parent << 1) | 1)).unwrap_or(default);
                    next.insert(parent, hash_pair(left, right));
                }
            }
            layers.push(next);
        }
        layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const EMPTY_ROOT_D9: &str =
        "0xcefad4e508c098b9a7e1d8feb19955fb02ba9675585078710969d3440f5054e0";
    const THREE: &str = "0x00000000000000000000000000000000000000000000000029a2241af62c0000";
    const TWO: &str = "0x0000000000000000000000000000000000000000000000001bc16d674ec80000";

    fn leaf(hex: &str) -> Digest32 {
        digest_from_hex(hex).unwrap()
    }

    fn tagged(n: u8) -> Digest32 {
        let mut out = [0u8; 32];
        out[31] = n;
        out[0] = 0x42;
        out
    }

    #[test]
    fn empty_root_matches_known_constant() {
        let tree = SparseMerkleTree::new(DEFAULT_DEPTH).unwrap();
        assert_eq!(digest_to_hex(&tree.root()), EMPTY_ROOT_D9);
        assert_eq!(
            digest_to_hex(&compute_root(DEFAULT_DEPTH, &BTreeMap::new()).unwrap()),
            EMPTY_ROOT_D9
        );
        let defaults = DefaultHashes::new(DEFAULT_DEPTH).unwrap();
        assert_eq!(
            digest_to_hex(defaults.level(2)),
            "0xb4c11951957c6f8f642c4af61cd6b24640fec6dc7fc607ee8206a99e92410d30"
        );
    }

    #[test]
    fn explicit_defaults_match_sparse_tree() {
        let mut explicit = BTreeMap::new();
        explicit.insert(0, leaf(TWO));
        for index in 1..4 {
            explicit.insert(index, ZERO_DIGEST);
        }
        let mut sparse = BTreeMap::new();
        sparse.insert(0, leaf(TWO));
        assert_eq!(
            compute_root(DEFAULT_DEPTH, &explicit).unwrap(),
            compute_root(DEFAULT_DEPTH, &sparse).unwrap()
        );
    }

    #[test]
    fn single_leaf_root_matches_reference() {
        let tree = SparseMerkleTree::from_leaves(DEFAULT_DEPTH, [(0, leaf(THREE))]).unwrap();
        assert_eq!(
            digest_to_hex(&tree.root()),
            "0xfdd65cce6ce5756360c2a3865352de3e1bb3fda9d159eef16b55a93483471f89"
        );
    }

    #[test]
    fn update_through_proof_matches_rebuilt_tree() {
        let before =
            SparseMerkleTree::from_leaves(DEFAULT_DEPTH, [(5, leaf(TWO)), (7, leaf(TWO))]).unwrap();
        assert_eq!(
            digest_to_hex(&before.root()),
            "0xe1041ab1fea7506fbfe6bd2364a9a91bc8a5c9f32feb3322075acafa5d386e12"
        );
        let proof = before.create_proof(5).unwrap();
        let new_root = verify_and_compute_new_root(
            DEFAULT_DEPTH,
            5,
            &proof,
            &leaf(TWO),
            &leaf(THREE),
            &before.root(),
        )
        .unwrap();
        assert_eq!(
            digest_to_hex(&new_root),
            "0x5785d20e3b53658dafa7e6d2a5283d48848a527d44192806669a480e1c7e804f"
        );
    }

    #[test]
    fn wrong_old_leaf_is_rejected() {
        let tree = SparseMerkleTree::from_leaves(DEFAULT_DEPTH, [(5, leaf(TWO))]).unwrap();
        let proof = tree.create_proof(5).unwrap();
        let err = verify_and_compute_new_root(
            DEFAULT_DEPTH,
            5,
            &proof,
            &leaf(THREE),
            &ZERO_DIGEST,
            &tree.root(),
        )
        .unwrap_err();
        assert_eq!(err, MerkleError::ProofMismatch);
    }

    #[test]
    fn proof_replayed_after_update_fails() {
        let mut tree = SparseMerkleTree::new(DEFAULT_DEPTH).unwrap();
        let stale = tree.create_proof(3).unwrap();
        let stale_root = tree.root();
        tree.insert(3, tagged(1)).unwrap();
        let fresh_root = tree.root();
        assert_ne!(stale_root, fresh_root);
        let err = verify_and_compute_new_root(
            DEFAULT_DEPTH,
            3,
            &stale,
            &ZERO_DIGEST,
            &tagged(2),
            &fresh_root,
        )
        .unwrap_err();
        assert_eq!(err, MerkleError::ProofMismatch);
    }

    #[test]
    fn rejects_bad_index_and_length() {
        let tree = SparseMerkleTree::new(DEFAULT_DEPTH).unwrap();
        assert_eq!(
            tree.create_proof(512).unwrap_err(),
            MerkleError::IndexOutOfRange {
                index: 512,
                depth: DEFAULT_DEPTH
            }
        );
        let short = MerkleProof::new(vec![ZERO_DIGEST; 8]);
        assert_eq!(
            root_from_proof(DEFAULT_DEPTH, 0, &ZERO_DIGEST, &short).unwrap_err(),
            MerkleError::ProofLengthMismatch {
                expected: 9,
                actual: 8
            }
        );
        assert_eq!(
            SparseMerkleTree::new(0).unwrap_err(),
            MerkleError::InvalidDepth(0)
        );
        assert!(SparseMerkleTree::new(MAX_DEPTH).is_ok());
    }

    #[test]
    fn writing_default_keeps_tree_sparse() {
        let mut tree = SparseMerkleTree::new(4).unwrap();
        tree.insert(2, tagged(9)).unwrap();
        assert_eq!(tree.populated(), 1);
        assert_eq!(tree.insert(2, ZERO_DIGEST).unwrap(), tagged(9));
        assert_eq!(tree.populated(), 0);
        assert_eq!(tree.root(), tree.defaults().empty_root());
    }

    #[test]
    fn compact_proof_roundtrip() {
        let tree =
            SparseMerkleTree::from_leaves(DEFAULT_DEPTH, [(5, leaf(TWO)), (7, leaf(TWO))]).unwrap();
        let proof = tree.create_proof(5).unwrap();
        let compact = CompactProof::compress(&proof, tree.defaults()).unwrap();
        // only the subtree holding leaf 7 is non-default
        assert_eq!(compact.bitmap(), 0b10);
        assert_eq!(compact.siblings().len(), 1);
        let bytes = compact.to_bytes();
        assert_eq!(bytes.len(), 8 + 32);
        let parsed = CompactProof::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.expand(tree.defaults()).unwrap(), proof);
    }

    #[test]
    fn compact_proof_rejects_inconsistent_bytes() {
        let mut bytes = vec![0u8; 8];
        bytes[7] = 0b11;
        bytes.extend_from_slice(&tagged(1));
        assert!(matches!(
            CompactProof::from_bytes(&bytes),
            Err(MerkleError::MalformedCompactProof(_))
        ));
        assert!(CompactProof::from_bytes(&[0u8; 9]).is_err());

        let mut high = vec![0u8; 8];
        high[6] = 0x02; // level 9 of a depth-9 tree
        high.extend_from_slice(&tagged(1));
        let compact = CompactProof::from_bytes(&high).unwrap();
        let defaults = DefaultHashes::new(DEFAULT_DEPTH).unwrap();
        assert!(compact.expand(&defaults).is_err());
    }

    #[test]
    fn proof_json_roundtrip() {
        let tree = SparseMerkleTree::from_leaves(6, [(1, tagged(1)), (40, tagged(2))]).unwrap();
        let proof = tree.create_proof(40).unwrap();
        let parsed = MerkleProof::from_json_str(&proof.to_json_string()).unwrap();
        assert_eq!(parsed, proof);
        assert!(MerkleProof::from_json_str("{\"siblings\":[1]}").is_err());
    }

    proptest! {
        #[test]
        fn noop_update_returns_same_root(
            entries in proptest::collection::btree_map(0u64..64, any::<[u8; 32]>(), 0..12),
            index in 0u64..64,
        ) {
            let tree = SparseMerkleTree::from_leaves(6, entries).unwrap();
            let value = tree.get(index).unwrap();
            let proof = tree.create_proof(index).unwrap();
            let root = tree.root();
            let same = verify_and_compute_new_root(6, index, &proof, &value, &value, &root).unwrap();
            prop_assert_eq!(same, root);
        }

        #[test]
        fn updates_leave_other_proofs_valid(
            entries in proptest::collection::btree_map(0u64..64, any::<[u8; 32]>(), 0..12),
            i in 0u64..64,
            j in 0u64..64,
            fresh in any::<[u8; 32]>(),
        ) {
            prop_assume!(i != j);
            let mut tree = SparseMerkleTree::from_leaves(6, entries).unwrap();
            let proof_i = tree.create_proof(i).unwrap();
            let old = tree.get(i).unwrap();
            let new_root =
                verify_and_compute_new_root(6, i, &proof_i, &old, &fresh, &tree.root()).unwrap();
            tree.insert(i, fresh).unwrap();
            prop_assert_eq!(new_root, tree.root());

            let proof_j = tree.create_proof(j).unwrap();
            let leaf_j = tree.get(j).unwrap();
            prop_assert_eq!(root_from_proof(6, j, &leaf_j, &proof_j).unwrap(), new_root);
        }
    }
}
