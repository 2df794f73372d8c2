//! Chain arithmetic for re-delegations.
//!
//! Depth is tracked on the chain row when a re-delegation is created, not
//! recomputed by walking parent pointers at check time.

use serde_json::Value;
use uuid::Uuid;

use super::DelegationChain;

/// Computed placement of a new link in a delegation chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLink {
    pub depth: i32,
    pub root_delegation_id: Uuid,
    /// Ordered delegation ids from the root, ending with the new delegation.
    pub path: Vec<Uuid>,
}

/// Place a new delegation under its parent.
///
/// A parent without a chain row is an original (depth 0) delegation and
/// becomes the root of the new chain.
#[must_use]
pub fn extend_chain(
    parent_chain: Option<&DelegationChain>,
    parent_id: Uuid,
    child_id: Uuid,
) -> ChainLink {
    match parent_chain {
        Some(chain) => {
            let mut path = chain.path();
            if path.is_empty() {
                // Corrupt path column; fall back to the link we can prove.
                path.push(parent_id);
            }
            path.push(child_id);
            ChainLink {
                depth: chain.depth + 1,
                root_delegation_id: chain.root_delegation_id,
                path,
            }
        }
        None => ChainLink {
            depth: 1,
            root_delegation_id: parent_id,
            path: vec![parent_id, child_id],
        },
    }
}

/// Decode a stored `chain_path` jsonb array into delegation ids.
#[must_use]
pub fn chain_path_ids(value: &Value) -> Vec<Uuid> {
    value
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(Value::as_str)
                .filter_map(|raw| Uuid::parse_str(raw).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Encode a path for storage.
#[must_use]
pub fn chain_path_value(path: &[Uuid]) -> Value {
    Value::Array(path.iter().map(|id| Value::String(id.to_string())).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn chain_row(depth: i32, root: Uuid, path: &[Uuid]) -> DelegationChain {
        DelegationChain {
            id: Uuid::new_v4(),
            delegation_id: *path.last().unwrap(),
            parent_delegation_id: path[path.len() - 2],
            root_delegation_id: root,
            depth,
            chain_path: chain_path_value(path),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_first_redelegation_roots_at_parent() {
        let parent = Uuid::new_v4();
        let child = Uuid::new_v4();

        let link = extend_chain(None, parent, child);

        assert_eq!(link.depth, 1);
        assert_eq!(link.root_delegation_id, parent);
        assert_eq!(link.path, vec![parent, child]);
    }

    #[test]
    fn test_deeper_links_extend_the_path() {
        let root = Uuid::new_v4();
        let mid = Uuid::new_v4();
        let leaf = Uuid::new_v4();
        let parent_chain = chain_row(1, root, &[root, mid]);

        let link = extend_chain(Some(&parent_chain), mid, leaf);

        assert_eq!(link.depth, 2);
        assert_eq!(link.root_delegation_id, root);
        assert_eq!(link.path, vec![root, mid, leaf]);
    }

    #[test]
    fn test_path_round_trip() {
        let path = vec![Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        assert_eq!(chain_path_ids(&chain_path_value(&path)), path);
    }

    #[test]
    fn test_malformed_path_decodes_empty() {
        assert!(chain_path_ids(&serde_json::json!({"not": "a path"})).is_empty());
        assert!(chain_path_ids(&serde_json::json!(["not-a-uuid"])).is_empty());
    }
}
