//! The scene forest: a DAG per root module so that scenes sharing a
//! prefix execute that prefix exactly once per pass.
//!
//! Nodes only reference their children; a scene keeps a `(SceneId -> leaf
//! NodeKey)` entry as the sole authority on its terminal module, rather than
//! re-deriving the leaf from tree shape (`original_source`'s
//! `tfv_scenetrees.c` documents a case where overlapping
//! `scene_add_module` calls make shape-based leaf detection ambiguous).
//! Removal is therefore a refcount decrement walking up from that entry,
//! never a pointer/pattern search.

use rustc_hash::FxHashMap;
use slotmap::{SlotMap, new_key_type};

use crate::errors::{Result, TvError};
use crate::modules::ModuleId;

new_key_type! {
    struct NodeKey;
}

/// Opaque, runtime-allocated scene identifier. Never reused within a
/// process session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SceneId(u64);

struct SceneNode {
    module_id: ModuleId,
    parent: Option<NodeKey>,
    children: Vec<NodeKey>,
    /// Number of scenes whose root-to-leaf path passes through this node.
    refcount: usize,
}

/// The forest of all currently-registered scenes.
#[derive(Default)]
pub struct SceneTrees {
    arena: SlotMap<NodeKey, SceneNode>,
    roots: FxHashMap<ModuleId, NodeKey>,
    roots_order: Vec<ModuleId>,
    leaf_of_scene: FxHashMap<SceneId, NodeKey>,
    next_scene_id: u64,
}

impl SceneTrees {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new scene rooted at `root_module_id`, creating the tree if
    /// this is the first scene to use that root.
    pub fn scene_start(&mut self, root_module_id: ModuleId) -> SceneId {
        let root_key = *self.roots.entry(root_module_id).or_insert_with(|| {
            self.roots_order.push(root_module_id);
            self.arena.insert(SceneNode {
                module_id: root_module_id,
                parent: None,
                children: Vec::new(),
                refcount: 0,
            })
        });
        self.arena[root_key].refcount += 1;

        let id = SceneId(self.next_scene_id);
        self.next_scene_id += 1;
        self.leaf_of_scene.insert(id, root_key);
        id
    }

    /// Extends `scene_id` by `module_id`. Reuses an existing child with the
    /// same `module_id` if the current leaf already has one (the scenes
    /// share that node from here on); otherwise creates a new child.
    pub fn scene_add_module(&mut self, scene_id: SceneId, module_id: ModuleId) -> Result<()> {
        let leaf_key = *self
            .leaf_of_scene
            .get(&scene_id)
            .ok_or(TvError::SceneUnknown(scene_id))?;

        let existing = self.arena[leaf_key]
            .children
            .iter()
            .copied()
            .find(|&child| self.arena[child].module_id == module_id);

        let next_leaf = match existing {
            Some(child_key) => {
                self.arena[child_key].refcount += 1;
                child_key
            }
            None => {
                let child_key = self.arena.insert(SceneNode {
                    module_id,
                    parent: Some(leaf_key),
                    children: Vec::new(),
                    refcount: 1,
                });
                self.arena[leaf_key].children.push(child_key);
                child_key
            }
        };

        self.leaf_of_scene.insert(scene_id, next_leaf);
        Ok(())
    }

    /// Walks from the scene's leaf upward, decrementing refcounts and
    /// pruning any node that drops to zero, stopping at the first node
    /// still shared by another scene.
    pub fn scene_remove(&mut self, scene_id: SceneId) -> Result<()> {
        let mut current = Some(
            self.leaf_of_scene
                .remove(&scene_id)
                .ok_or(TvError::SceneUnknown(scene_id))?,
        );

        while let Some(key) = current {
            let (parent, refcount, module_id) = {
                let node = &mut self.arena[key];
                node.refcount -= 1;
                (node.parent, node.refcount, node.module_id)
            };
            if refcount > 0 {
                break;
            }
            match parent {
                Some(parent_key) => {
                    self.arena[parent_key].children.retain(|&c| c != key);
                }
                None => {
                    self.roots.remove(&module_id);
                    self.roots_order.retain(|&m| m != module_id);
                }
            }
            self.arena.remove(key);
            current = parent;
        }
        Ok(())
    }

    /// Visits every node in every tree exactly once, depth-first pre-order,
    /// siblings in the order their defining scenes were added.
    pub fn exec_all(&self, mut visit: impl FnMut(ModuleId)) {
        for &root_module in &self.roots_order {
            let Some(&root_key) = self.roots.get(&root_module) else {
                continue;
            };
            self.visit_subtree(root_key, &mut visit);
        }
    }

    fn visit_subtree(&self, key: NodeKey, visit: &mut impl FnMut(ModuleId)) {
        let node = &self.arena[key];
        visit(node.module_id);
        for &child in &node.children {
            self.visit_subtree(child, visit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_prefix_executes_once_and_tails_execute_in_declared_order() {
        let mut trees = SceneTrees::new();
        let s1 = trees.scene_start(0);
        trees.scene_add_module(s1, 1).unwrap();
        trees.scene_add_module(s1, 2).unwrap();

        let s2 = trees.scene_start(0);
        trees.scene_add_module(s2, 1).unwrap();
        trees.scene_add_module(s2, 3).unwrap();

        let mut visits = Vec::new();
        trees.exec_all(|id| visits.push(id));

        assert_eq!(visits, vec![0, 1, 2, 3]);
    }

    #[test]
    fn exec_all_visits_each_shared_node_exactly_once() {
        let mut trees = SceneTrees::new();
        let s1 = trees.scene_start(0);
        trees.scene_add_module(s1, 1).unwrap();
        let s2 = trees.scene_start(0);
        trees.scene_add_module(s2, 1).unwrap();

        let mut visits = Vec::new();
        trees.exec_all(|id| visits.push(id));
        assert_eq!(visits.iter().filter(|&&id| id == 1).count(), 1);
    }

    #[test]
    fn scene_remove_stops_at_first_shared_ancestor() {
        let mut trees = SceneTrees::new();
        let s1 = trees.scene_start(0);
        trees.scene_add_module(s1, 1).unwrap();
        trees.scene_add_module(s1, 2).unwrap();

        let s2 = trees.scene_start(0);
        trees.scene_add_module(s2, 1).unwrap();
        trees.scene_add_module(s2, 3).unwrap();

        trees.scene_remove(s1).unwrap();

        // node 2 (only on s1's path) is gone; 0 and 1 (shared with s2) remain.
        let mut visits = Vec::new();
        trees.exec_all(|id| visits.push(id));
        assert_eq!(visits, vec![0, 1, 3]);
    }

    #[test]
    fn removing_last_scene_at_a_root_drops_the_tree() {
        let mut trees = SceneTrees::new();
        let s1 = trees.scene_start(5);
        trees.scene_remove(s1).unwrap();

        let mut visits = Vec::new();
        trees.exec_all(|id| visits.push(id));
        assert!(visits.is_empty());
    }

    #[test]
    fn scene_add_module_on_unknown_scene_fails() {
        let mut trees = SceneTrees::new();
        let bogus = SceneId(999);
        assert!(trees.scene_add_module(bogus, 1).is_err());
    }
}
