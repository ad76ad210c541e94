//! Graph node ids: 8 lowercase hex characters, unique within one graph.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashSet;

/// Length of every node id.
pub const NODE_ID_LEN: usize = 8;

/// Hands out fresh node ids for one lowering run.
///
/// With a seed the sequence is reproducible, which is what tests and
/// golden-file comparisons rely on.
#[derive(Debug)]
pub struct NodeIdAllocator {
    rng: StdRng,
    issued: FxHashSet<String>,
}

impl NodeIdAllocator {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            issued: FxHashSet::default(),
        }
    }

    /// Next id not issued before by this allocator.
    pub fn next_id(&mut self) -> String {
        loop {
            let id = format!("{:08x}", self.rng.gen::<u32>());
            if self.issued.insert(id.clone()) {
                return id;
            }
            tracing::debug!(id = %id, "node id collision, drawing again");
        }
    }

    pub fn issued(&self) -> usize {
        self.issued.len()
    }
}

/// Whether `id` has the node id format.
pub fn is_valid_node_id(id: &str) -> bool {
    id.len() == NODE_ID_LEN && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_and_uniqueness() {
        let mut alloc = NodeIdAllocator::new(None);
        let ids: Vec<String> = (0..500).map(|_| alloc.next_id()).collect();
        assert!(ids.iter().all(|id| is_valid_node_id(id)));
        let unique: FxHashSet<&String> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
        assert_eq!(alloc.issued(), 500);
    }

    #[test]
    fn test_seeded_sequence_is_reproducible() {
        let mut a = NodeIdAllocator::new(Some(7));
        let mut b = NodeIdAllocator::new(Some(7));
        for _ in 0..10 {
            assert_eq!(a.next_id(), b.next_id());
        }
    }

    #[test]
    fn test_is_valid_node_id() {
        assert!(is_valid_node_id("0a1b2c3d"));
        assert!(!is_valid_node_id("0A1B2C3D"));
        assert!(!is_valid_node_id("0a1b2c3"));
        assert!(!is_valid_node_id("0a1b2c3g"));
    }
}
