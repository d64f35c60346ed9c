#[cfg(test)]
mod tests {
    use crate::utils::poseidon_hash;
    use crate::{MerkleTree, MerkleWitness, TREE_HEIGHT};
    use pasta_curves::pallas;

    fn leaves(count: u64) -> Vec<pallas::Base> {
        (1..=count).map(pallas::Base::from).collect()
    }

    #[test]
    fn test_empty_tree_root_is_zero_subtree() {
        let tree = MerkleTree::new(2).unwrap();
        let zero = pallas::Base::zero();
        let level1 = poseidon_hash(zero, zero);
        assert_eq!(tree.root(), poseidon_hash(level1, level1));
    }

    #[test]
    fn test_small_tree_root_matches_manual_hashing() {
        let tree = MerkleTree::from_leaves(2, &leaves(4)).unwrap();
        let left = poseidon_hash(pallas::Base::from(1), pallas::Base::from(2));
        let right = poseidon_hash(pallas::Base::from(3), pallas::Base::from(4));
        assert_eq!(tree.root(), poseidon_hash(left, right));
    }

    #[test]
    fn test_witness_verification() {
        let tree = MerkleTree::from_leaves(4, &leaves(5)).unwrap();
        for index in 0..5 {
            let witness = tree.witness(index).unwrap();
            assert_eq!(witness.calculate_index(), index);
            assert!(tree.verify(tree.leaf(index), &witness));
        }
    }

    #[test]
    fn test_witness_for_empty_slot() {
        let tree = MerkleTree::from_leaves(3, &leaves(2)).unwrap();
        let witness = tree.witness(6).unwrap();
        assert!(tree.verify(pallas::Base::zero(), &witness));
    }

    #[test]
    fn test_witness_from_different_tree_fails() {
        let tree1 = MerkleTree::from_leaves(3, &leaves(4)).unwrap();
        let tree2 = MerkleTree::from_leaves(3, &[pallas::Base::from(9); 4]).unwrap();

        let witness = tree1.witness(0).unwrap();
        assert!(!tree2.verify(tree1.leaf(0), &witness));
    }

    #[test]
    fn test_full_height_tree() {
        let mut tree = MerkleTree::new(TREE_HEIGHT).unwrap();
        assert_eq!(tree.capacity(), 1 << 20);

        tree.set_leaf(0, pallas::Base::from(42)).unwrap();
        tree.set_leaf(512, pallas::Base::from(43)).unwrap();
        tree.set_leaf((1 << 20) - 1, pallas::Base::from(44)).unwrap();

        let witness = tree.witness(512).unwrap();
        assert_eq!(witness.height(), TREE_HEIGHT);
        assert!(tree.verify(pallas::Base::from(43), &witness));
    }

    #[test]
    fn test_updating_leaf_changes_root() {
        let mut tree = MerkleTree::from_leaves(3, &leaves(3)).unwrap();
        let before = tree.root();
        let stale = tree.witness(1).unwrap();

        tree.set_leaf(2, pallas::Base::from(100)).unwrap();
        assert_ne!(tree.root(), before);
        // A witness taken before the update no longer authenticates.
        assert!(!tree.verify(tree.leaf(1), &stale));
    }

    #[test]
    fn test_invalid_index() {
        let tree = MerkleTree::new(3).unwrap();
        assert!(tree.witness(8).is_err());
    }

    #[test]
    fn test_invalid_height() {
        assert!(MerkleTree::new(0).is_err());
        assert!(MerkleTree::new(33).is_err());
    }

    #[test]
    fn test_tampered_leaf() {
        let tree = MerkleTree::from_leaves(3, &leaves(4)).unwrap();
        let witness = tree.witness(0).unwrap();
        assert!(!tree.verify(pallas::Base::from(0xFF), &witness));
    }

    #[test]
    fn test_tampered_siblings() {
        let tree = MerkleTree::from_leaves(3, &leaves(4)).unwrap();
        let mut witness = tree.witness(0).unwrap();
        witness.siblings[0] = pallas::Base::from(0xFF);
        assert!(!tree.verify(tree.leaf(0), &witness));
    }

    #[test]
    fn test_tampered_positions() {
        let tree = MerkleTree::from_leaves(3, &leaves(4)).unwrap();
        let mut witness = tree.witness(0).unwrap();
        witness.positions[0] = true;
        assert!(!tree.verify(tree.leaf(0), &witness));
    }

    #[test]
    fn test_index_of_oversized_witness() {
        let mut positions = vec![false; 70];
        positions[0] = true;
        positions[66] = true;
        let witness = MerkleWitness {
            siblings: vec![pallas::Base::zero(); 70],
            positions,
        };

        assert_eq!(witness.calculate_index(), 1);
        assert!(witness.to_string().contains("Index: 1"));
    }

    #[test]
    fn test_read_leaves_file() {
        use crate::merkle::read_leaves;
        use crate::utils::field_to_hex;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leaves.txt");
        let content = format!(
            "{}\n\n0x{}\n",
            field_to_hex(pallas::Base::from(1)),
            field_to_hex(pallas::Base::from(2))
        );
        std::fs::write(&path, content).unwrap();

        let leaves = read_leaves(&path, 1024).unwrap();
        assert_eq!(leaves, vec![pallas::Base::from(1), pallas::Base::from(2)]);

        assert!(read_leaves(&path, 10).is_err());

        std::fs::write(&path, "\n\n").unwrap();
        assert!(read_leaves(&path, 1024).is_err());

        std::fs::write(&path, "zz\n").unwrap();
        assert!(read_leaves(&path, 1024).is_err());
    }
}
