//! Hierarchy closure maintenance.
//!
//! Three node families are independently hierarchical: permission templates,
//! user groups and permission groups. Each family keeps a materialized closure
//! table of `(ancestor, descendant, depth)` rows so reads never recurse.
//!
//! The closure table is a derived view. It can be dropped and rebuilt from the
//! `parent_id` pointers at any time via [`rebuild`], which is the recovery path
//! after any suspected corruption. A node's `level` column is always recomputed
//! from its ancestor count, never hand-set.
//!
//! Deleting a node deletes its entire descendant subtree: children are NOT
//! re-parented to the grandparent. This is destructive and intentional;
//! operators invoking a delete should know the blast radius (the audit entry
//! carries the descendant count).

pub mod closure;
pub mod handlers;
pub mod queries;

use std::fmt;

pub use closure::{ancestor_chain, compute_family_closure, ClosureRow};
pub use queries::{delete_subtree, rebuild, recompute_node};

/// The three hierarchical node families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HierarchyFamily {
    Template,
    UserGroup,
    PermissionGroup,
}

impl HierarchyFamily {
    #[must_use]
    pub const fn node_table(self) -> &'static str {
        match self {
            Self::Template => "permission_templates",
            Self::UserGroup => "user_groups",
            Self::PermissionGroup => "permission_groups",
        }
    }

    #[must_use]
    pub const fn closure_table(self) -> &'static str {
        match self {
            Self::Template => "template_closure",
            Self::UserGroup => "user_group_closure",
            Self::PermissionGroup => "permission_group_closure",
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Template => "templates",
            Self::UserGroup => "user-groups",
            Self::PermissionGroup => "permission-groups",
        }
    }

    /// Parse the wire form used by the maintenance endpoint.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "templates" => Some(Self::Template),
            "user-groups" => Some(Self::UserGroup),
            "permission-groups" => Some(Self::PermissionGroup),
            _ => None,
        }
    }
}

impl fmt::Display for HierarchyFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hierarchy maintenance errors.
#[derive(Debug, thiserror::Error)]
pub enum HierarchyError {
    #[error("Node not found")]
    NodeNotFound,

    #[error("Cycle detected through node {0}")]
    CycleDetected(uuid::Uuid),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}
