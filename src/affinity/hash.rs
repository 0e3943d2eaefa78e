//! Stable hashing shared by the placement strategies.
//!
//! Every node must compute identical values for identical inputs, so nothing
//! here may depend on process-local state such as `RandomState`.

use crate::core::{NodeId, Partition};

const FNV_OFFSET: u64 = 14695981039346656037;
const FNV_PRIME: u64 = 1099511628211;
const PARTITION_SEED: u64 = 0x9e37_79b9_7f4a_7c15;

fn fnv1a_extend(mut hash: u64, bytes: &[u8]) -> u64 {
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn fnv1a(bytes: &[u8]) -> u64 {
    fnv1a_extend(FNV_OFFSET, bytes)
}

/// Murmur3 finalizer; spreads FNV output across the whole ring.
pub(crate) fn mix64(mut hash: u64) -> u64 {
    hash ^= hash >> 33;
    hash = hash.wrapping_mul(0xff51_afd7_ed55_8ccd);
    hash ^= hash >> 33;
    hash = hash.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    hash ^= hash >> 33;
    hash
}

/// Ring position of a partition.
pub(crate) fn partition_hash(partition: Partition) -> u64 {
    mix64(fnv1a(&partition.to_be_bytes()) ^ PARTITION_SEED)
}

/// Ring position of the `index`-th virtual node of `node`.
pub(crate) fn virtual_node_hash(node: &NodeId, index: u32) -> u64 {
    let mut hash = fnv1a(node.as_str().as_bytes());
    hash ^= 0xff;
    hash = hash.wrapping_mul(FNV_PRIME);
    mix64(fnv1a_extend(hash, &index.to_be_bytes()))
}

/// Highest-random-weight score of `node` for `partition`.
pub(crate) fn rendezvous_weight(partition: Partition, node: &NodeId) -> u64 {
    mix64(fnv1a(node.as_str().as_bytes()) ^ partition_hash(partition))
}

/// Maps a key to its partition.
///
/// Stable across processes and platforms for a fixed `partition_count`.
pub fn partition_for_key(key: &[u8], partition_count: u32) -> Partition {
    if partition_count == 0 {
        return 0;
    }
    (mix64(fnv1a(key)) % partition_count as u64) as Partition
}
