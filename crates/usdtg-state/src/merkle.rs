//! Merkle root over the ledger's account records.
//!
//! Leaves are account digests in ascending address order, so the root depends
//! only on ledger contents, never on shard layout or map iteration. Levels are
//! folded pairwise, left to right; a node left without a sibling is paired
//! with the empty hash of its height.

use usdtg_core::{hash32, Hash32};

/// Domain separator for interior nodes.
const DS_STATE_NODE: &[u8] = b"USDTG::STATE_NODE::V1";
/// Domain separator for leaves.
const DS_STATE_LEAF: &[u8] = b"USDTG::STATE_LEAF::V1";
/// Domain separator for padding and the empty ledger.
const DS_STATE_EMPTY: &[u8] = b"USDTG::STATE_EMPTY::V1";

/// A 32-byte account digest.
pub type Leaf = [u8; 32];

/// Root of the tree whose leaves are `leaves`, in the given order.
pub fn merkle_root(leaves: &[Leaf]) -> Hash32 {
    let mut level: Vec<Hash32> = leaves
        .iter()
        .map(|leaf| hash32(DS_STATE_LEAF, leaf))
        .collect();

    let mut height: u8 = 0;
    while level.len() > 1 {
        let pad = empty_at(height);
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => parent_hash(left, right),
                [left] => parent_hash(left, &pad),
                _ => pad,
            })
            .collect();
        height = height.saturating_add(1);
    }
    level.pop().unwrap_or_else(|| empty_at(0))
}

fn parent_hash(left: &Hash32, right: &Hash32) -> Hash32 {
    let mut bytes = [0u8; 64];
    bytes[..32].copy_from_slice(left.as_bytes());
    bytes[32..].copy_from_slice(right.as_bytes());
    hash32(DS_STATE_NODE, &bytes)
}

fn empty_at(height: u8) -> Hash32 {
    hash32(DS_STATE_EMPTY, &[height])
}
