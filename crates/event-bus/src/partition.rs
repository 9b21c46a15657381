//! Key-based partition routing.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Returns the partition a keyed message is routed to.
///
/// The hash is stable for the lifetime of a process, which is all the
/// in-memory bus needs for per-key ordering.
pub fn partition_for_key(key: &str, partitions: u32) -> u32 {
    let partitions = partitions.max(1);
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % u64::from(partitions)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_same_partition() {
        let a = partition_for_key("order-1", 8);
        let b = partition_for_key("order-1", 8);
        assert_eq!(a, b);
    }

    #[test]
    fn partition_is_in_range() {
        for i in 0..100 {
            assert!(partition_for_key(&format!("key-{i}"), 3) < 3);
        }
    }

    #[test]
    fn zero_partitions_collapses_to_one() {
        assert_eq!(partition_for_key("anything", 0), 0);
    }
}
