//! Department hierarchy traversal
//!
//! [`DepartmentTree`] is an in-memory index over a snapshot of departments.
//! The parent relation is a forest by write-time invariant, but every walk
//! here still carries a visited set so corrupted data cannot loop forever.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::department::Department;
use crate::error::{OrgError, OrgResult};

/// Indexed snapshot of the department forest.
///
/// # Examples
///
/// ```
/// use lms_org::{Department, DepartmentTree};
///
/// let root = Department::new("Faculty of Arts", "ART");
/// let music = Department::new("Music", "ART-MUS").with_parent(root.id);
/// let tree = DepartmentTree::new(vec![root.clone(), music.clone()]);
///
/// assert_eq!(tree.ancestors_of(music.id), vec![root.id]);
/// assert!(tree.descendants_of(root.id).contains(&music.id));
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DepartmentTree {
    departments: HashMap<Uuid, Department>,
    #[serde(skip)]
    children: HashMap<Uuid, Vec<Uuid>>,
}

impl DepartmentTree {
    /// Build a tree from a set of departments.
    pub fn new(departments: impl IntoIterator<Item = Department>) -> Self {
        let departments: HashMap<Uuid, Department> =
            departments.into_iter().map(|d| (d.id, d)).collect();
        let mut tree = Self {
            departments,
            children: HashMap::new(),
        };
        tree.reindex();
        tree
    }

    /// Rebuild the child index (needed after deserialization).
    pub fn reindex(&mut self) {
        let mut children: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for dept in self.departments.values() {
            if let Some(parent_id) = dept.parent_id {
                children.entry(parent_id).or_default().push(dept.id);
            }
        }
        for ids in children.values_mut() {
            ids.sort();
        }
        self.children = children;
    }

    /// Insert or replace a department.
    pub fn upsert(&mut self, department: Department) {
        self.departments.insert(department.id, department);
        self.reindex();
    }

    /// Look up a department by ID.
    pub fn get(&self, id: Uuid) -> Option<&Department> {
        self.departments.get(&id)
    }

    /// Number of departments in the snapshot.
    pub fn len(&self) -> usize {
        self.departments.len()
    }

    /// Check if the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.departments.is_empty()
    }

    /// Iterate over every department in the snapshot.
    pub fn iter(&self) -> impl Iterator<Item = &Department> {
        self.departments.values()
    }

    /// Parent of a department, if it has one and the parent is known.
    pub fn parent_of(&self, id: Uuid) -> Option<&Department> {
        self.get(id)
            .and_then(|d| d.parent_id)
            .and_then(|parent_id| self.get(parent_id))
    }

    /// Active, visible immediate children of a department.
    pub fn children_of(&self, id: Uuid) -> Vec<&Department> {
        self.children
            .get(&id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|child_id| self.get(*child_id))
                    .filter(|d| d.is_traversable())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Active, visible root departments.
    pub fn roots(&self) -> Vec<&Department> {
        let mut roots: Vec<&Department> = self
            .departments
            .values()
            .filter(|d| d.is_root() && d.is_traversable())
            .collect();
        roots.sort_by(|a, b| a.code.cmp(&b.code));
        roots
    }

    /// The department plus every transitive child, breadth-first.
    ///
    /// Inactive or invisible departments are excluded together with the
    /// subtree below them. An unknown or non-traversable start yields an
    /// empty list.
    pub fn descendants_of(&self, id: Uuid) -> Vec<Uuid> {
        let Some(start) = self.get(id) else {
            return Vec::new();
        };
        if !start.is_traversable() {
            return Vec::new();
        }

        let mut visited = HashSet::new();
        let mut result = Vec::new();
        let mut queue = VecDeque::from([id]);

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            result.push(current);
            for child in self.children_of(current) {
                if !visited.contains(&child.id) {
                    queue.push_back(child.id);
                }
            }
        }

        result
    }

    /// Parent chain, nearest first. Includes inactive ancestors.
    pub fn ancestors_of(&self, id: Uuid) -> Vec<Uuid> {
        let mut visited = HashSet::from([id]);
        let mut result = Vec::new();
        let mut current = self.get(id).and_then(|d| d.parent_id);

        while let Some(parent_id) = current {
            if !visited.insert(parent_id) {
                break;
            }
            result.push(parent_id);
            current = self.get(parent_id).and_then(|d| d.parent_id);
        }

        result
    }

    /// Whether a department starts its own scope.
    ///
    /// A department is a root of scope when it has no (known) parent, or
    /// when its parent requires explicit membership and therefore does not
    /// hand roles down to it.
    pub fn is_scope_root(&self, id: Uuid) -> bool {
        match self.get(id) {
            None => false,
            Some(dept) => match dept.parent_id.and_then(|p| self.get(p)) {
                None => true,
                Some(parent) => parent.require_explicit_membership,
            },
        }
    }

    /// Validate a proposed parent assignment before it is written.
    ///
    /// Rejects self-parenting, unknown parents, and any assignment that would
    /// make the department its own ancestor.
    pub fn validate_parent(&self, department_id: Uuid, parent_id: Option<Uuid>) -> OrgResult<()> {
        let Some(parent_id) = parent_id else {
            return Ok(());
        };
        if parent_id == department_id {
            return Err(OrgError::SelfParent(department_id));
        }
        if self.get(parent_id).is_none() {
            return Err(OrgError::DepartmentNotFound(parent_id));
        }

        let mut visited = HashSet::new();
        let mut current = Some(parent_id);
        while let Some(id) = current {
            // Reaching the department again, or looping on corrupt data,
            // both mean the write must be refused.
            if id == department_id || !visited.insert(id) {
                return Err(OrgError::CycleDetected {
                    department_id,
                    parent_id,
                });
            }
            current = self.get(id).and_then(|d| d.parent_id);
        }

        Ok(())
    }
}

impl FromIterator<Department> for DepartmentTree {
    fn from_iter<T: IntoIterator<Item = Department>>(iter: T) -> Self {
        DepartmentTree::new(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> (DepartmentTree, Department, Department, Department) {
        let root = Department::new("University", "UNI");
        let child = Department::new("Engineering", "UNI-ENG").with_parent(root.id);
        let grandchild = Department::new("Robotics", "UNI-ENG-ROB").with_parent(child.id);
        let tree = DepartmentTree::new(vec![root.clone(), child.clone(), grandchild.clone()]);
        (tree, root, child, grandchild)
    }

    #[test]
    fn test_descendants_include_self_and_transitive_children() {
        let (tree, root, child, grandchild) = sample_tree();
        let descendants = tree.descendants_of(root.id);
        assert_eq!(descendants, vec![root.id, child.id, grandchild.id]);
        assert_eq!(tree.descendants_of(grandchild.id), vec![grandchild.id]);
    }

    #[test]
    fn test_descendants_skip_hidden_and_inactive_subtrees() {
        let root = Department::new("University", "UNI");
        let hidden = Department::new("Secret Lab", "UNI-LAB").with_parent(root.id).hidden();
        let below_hidden = Department::new("Sub Lab", "UNI-LAB-SUB").with_parent(hidden.id);
        let mut inactive = Department::new("Closed", "UNI-OLD").with_parent(root.id);
        inactive.is_active = false;

        let tree = DepartmentTree::new(vec![
            root.clone(),
            hidden.clone(),
            below_hidden.clone(),
            inactive.clone(),
        ]);

        assert_eq!(tree.descendants_of(root.id), vec![root.id]);
        assert!(tree.descendants_of(hidden.id).is_empty());
        assert!(tree.descendants_of(Uuid::now_v7()).is_empty());
    }

    #[test]
    fn test_traversal_survives_corrupt_cycle() {
        let mut a = Department::new("A", "AA");
        let mut b = Department::new("B", "BB");
        a.parent_id = Some(b.id);
        b.parent_id = Some(a.id);
        let tree = DepartmentTree::new(vec![a.clone(), b.clone()]);

        assert_eq!(tree.descendants_of(a.id).len(), 2);
        assert_eq!(tree.ancestors_of(a.id), vec![b.id]);
    }

    #[test]
    fn test_ancestors_nearest_first() {
        let (tree, root, child, grandchild) = sample_tree();
        assert_eq!(tree.ancestors_of(grandchild.id), vec![child.id, root.id]);
        assert!(tree.ancestors_of(root.id).is_empty());
    }

    #[test]
    fn test_scope_roots() {
        let root = Department::new("University", "UNI");
        let gated = Department::new("Medicine", "UNI-MED")
            .with_parent(root.id)
            .with_explicit_membership();
        let ward = Department::new("Ward", "UNI-MED-W").with_parent(gated.id);
        let tree = DepartmentTree::new(vec![root.clone(), gated.clone(), ward.clone()]);

        assert!(tree.is_scope_root(root.id));
        assert!(!tree.is_scope_root(gated.id));
        assert!(tree.is_scope_root(ward.id));
        assert!(!tree.is_scope_root(Uuid::now_v7()));
    }

    #[test]
    fn test_validate_parent_rejects_cycles() {
        let (tree, root, child, grandchild) = sample_tree();

        assert!(tree.validate_parent(grandchild.id, Some(root.id)).is_ok());
        assert!(tree.validate_parent(root.id, None).is_ok());
        assert_eq!(
            tree.validate_parent(root.id, Some(root.id)),
            Err(OrgError::SelfParent(root.id))
        );
        assert_eq!(
            tree.validate_parent(root.id, Some(grandchild.id)),
            Err(OrgError::CycleDetected {
                department_id: root.id,
                parent_id: grandchild.id,
            })
        );
        assert!(tree.validate_parent(child.id, Some(Uuid::now_v7())).is_err());
    }

    #[test]
    fn test_reindex_after_deserialize() {
        let (tree, root, child, _) = sample_tree();
        let json = serde_json::to_string(&tree).unwrap();
        let mut restored: DepartmentTree = serde_json::from_str(&json).unwrap();
        restored.reindex();
        assert_eq!(restored.children_of(root.id).len(), 1);
        assert_eq!(restored.children_of(root.id)[0].id, child.id);
    }
}
