//! Pure closure computation over parent pointers.
//!
//! Store-free: callers load the family's `(node, parent)` map and feed it here.
//! The query layer persists whatever these functions return.

use std::collections::HashMap;

use uuid::Uuid;

use super::HierarchyError;

/// One materialized `(ancestor, descendant, depth)` row. Depth starts at 1 for
/// the direct parent; nodes are never their own ancestor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosureRow {
    pub ancestor_id: Uuid,
    pub descendant_id: Uuid,
    pub depth: i32,
}

/// Walk `parent_id` pointers upward from `node`, collecting `(ancestor, depth)`
/// pairs in nearest-first order.
///
/// A node reachable from itself means the parent graph is corrupt; the walk
/// bails with [`HierarchyError::CycleDetected`] instead of recursing unbounded.
pub fn ancestor_chain(
    parents: &HashMap<Uuid, Option<Uuid>>,
    node: Uuid,
) -> Result<Vec<(Uuid, i32)>, HierarchyError> {
    let mut chain = Vec::new();
    let mut current = node;
    let mut depth = 0;

    while let Some(Some(parent)) = parents.get(&current) {
        depth += 1;
        if *parent == node || depth as usize > parents.len() {
            return Err(HierarchyError::CycleDetected(node));
        }
        chain.push((*parent, depth));
        current = *parent;
    }

    Ok(chain)
}

/// Recompute the full closure for a family from its parent map.
///
/// Returns closure rows plus each node's derived level (= ancestor count).
/// Used by the rebuild path after truncating the closure table.
pub fn compute_family_closure(
    parents: &HashMap<Uuid, Option<Uuid>>,
) -> Result<(Vec<ClosureRow>, HashMap<Uuid, i32>), HierarchyError> {
    let mut rows = Vec::new();
    let mut levels = HashMap::with_capacity(parents.len());

    for &node in parents.keys() {
        let chain = ancestor_chain(parents, node)?;
        levels.insert(node, chain.len() as i32);
        for (ancestor, depth) in chain {
            rows.push(ClosureRow {
                ancestor_id: ancestor,
                descendant_id: node,
                depth,
            });
        }
    }

    Ok((rows, levels))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(edges: &[(Uuid, Option<Uuid>)]) -> HashMap<Uuid, Option<Uuid>> {
        edges.iter().copied().collect()
    }

    #[test]
    fn test_root_has_no_ancestors() {
        let root = Uuid::new_v4();
        let parents = family(&[(root, None)]);

        let chain = ancestor_chain(&parents, root).unwrap();
        assert!(chain.is_empty());
    }

    #[test]
    fn test_chain_is_nearest_first() {
        let root = Uuid::new_v4();
        let mid = Uuid::new_v4();
        let leaf = Uuid::new_v4();
        let parents = family(&[(root, None), (mid, Some(root)), (leaf, Some(mid))]);

        let chain = ancestor_chain(&parents, leaf).unwrap();
        assert_eq!(chain, vec![(mid, 1), (root, 2)]);
    }

    #[test]
    fn test_self_parent_is_a_cycle() {
        let node = Uuid::new_v4();
        let parents = family(&[(node, Some(node))]);

        assert!(matches!(
            ancestor_chain(&parents, node),
            Err(HierarchyError::CycleDetected(n)) if n == node
        ));
    }

    #[test]
    fn test_two_node_cycle_detected() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let parents = family(&[(a, Some(b)), (b, Some(a))]);

        assert!(matches!(
            ancestor_chain(&parents, a),
            Err(HierarchyError::CycleDetected(_))
        ));
        assert!(matches!(
            ancestor_chain(&parents, b),
            Err(HierarchyError::CycleDetected(_))
        ));
    }

    #[test]
    fn test_family_closure_levels_match_chain_length() {
        let root = Uuid::new_v4();
        let mid = Uuid::new_v4();
        let leaf_a = Uuid::new_v4();
        let leaf_b = Uuid::new_v4();
        let parents = family(&[
            (root, None),
            (mid, Some(root)),
            (leaf_a, Some(mid)),
            (leaf_b, Some(root)),
        ]);

        let (rows, levels) = compute_family_closure(&parents).unwrap();

        assert_eq!(levels[&root], 0);
        assert_eq!(levels[&mid], 1);
        assert_eq!(levels[&leaf_a], 2);
        assert_eq!(levels[&leaf_b], 1);

        // level == length of the ancestor chain for every node
        for (&node, &level) in &levels {
            let chain_len = rows.iter().filter(|r| r.descendant_id == node).count();
            assert_eq!(level as usize, chain_len);
        }

        // no node is its own ancestor
        assert!(rows.iter().all(|r| r.ancestor_id != r.descendant_id));

        // depths are contiguous from 1 on each descendant's chain
        let mut leaf_depths: Vec<i32> = rows
            .iter()
            .filter(|r| r.descendant_id == leaf_a)
            .map(|r| r.depth)
            .collect();
        leaf_depths.sort_unstable();
        assert_eq!(leaf_depths, vec![1, 2]);
    }

    #[test]
    fn test_family_closure_rejects_corrupt_graph() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let parents = family(&[(a, Some(b)), (b, Some(c)), (c, Some(a))]);

        assert!(compute_family_closure(&parents).is_err());
    }

    #[test]
    fn test_parent_missing_from_map_ends_walk() {
        // A dangling parent pointer (row filtered out, partial load) ends the
        // walk rather than erroring; rebuild from a full load repairs levels.
        let ghost = Uuid::new_v4();
        let node = Uuid::new_v4();
        let parents = family(&[(node, Some(ghost))]);

        let chain = ancestor_chain(&parents, node).unwrap();
        assert_eq!(chain, vec![(ghost, 1)]);
    }
}
