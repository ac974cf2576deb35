//! Ownership lookups over the live resource tree

use crate::models::{ApplicationTree, ResourceKey, ResourceNode, ResourceRef};
use std::collections::{HashMap, HashSet};

pub const POD_KIND: &str = "Pod";
pub const DAEMON_SET_KIND: &str = "DaemonSet";

/// Identity -> node lookup for one resource tree snapshot
pub struct TreeIndex<'a> {
    tree: &'a ApplicationTree,
    nodes: HashMap<ResourceKey, &'a ResourceNode>,
}

impl<'a> TreeIndex<'a> {
    pub fn new(tree: &'a ApplicationTree) -> Self {
        let mut nodes = HashMap::with_capacity(tree.nodes.len());
        for node in &tree.nodes {
            nodes.entry(node.key()).or_insert(node);
        }
        Self { tree, nodes }
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&'a ResourceNode> {
        self.nodes.get(key).copied()
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.nodes.contains_key(key)
    }

    /// All pod nodes of the tree
    pub fn pods(&self) -> impl Iterator<Item = &'a ResourceNode> + '_ {
        self.tree.nodes.iter().filter(|n| n.kind() == POD_KIND)
    }

    /// Whether `node` is `target` or is owned by it through any chain of parent references
    pub fn is_descendant(&self, node: &ResourceNode, target: &ResourceKey) -> bool {
        let mut visited = HashSet::new();
        self.descends(node, target, &mut visited)
    }

    fn descends(
        &self,
        node: &ResourceNode,
        target: &ResourceKey,
        visited: &mut HashSet<ResourceKey>,
    ) -> bool {
        if node.identity.matches(target) {
            return true;
        }
        // malformed trees may contain ownership cycles
        if !visited.insert(node.key()) {
            return false;
        }

        for parent in &node.parent_refs {
            if parent.matches(target) {
                return true;
            }
            if let Some(parent_node) = self.get(&parent.key()) {
                if self.descends(parent_node, target, visited) {
                    return true;
                }
            }
        }
        false
    }
}

/// Pods created by a DaemonSet are not governed by a replica count
pub fn is_daemon_set_pod(node: &ResourceNode) -> bool {
    node.parent_refs.iter().any(|p| p.kind == DAEMON_SET_KIND)
}

/// Pods of `target` that still have to disappear.
///
/// Returns `None` when the target itself is no longer part of the tree.
pub fn remaining_pods(tree: &ApplicationTree, target: &ResourceKey) -> Option<Vec<ResourceRef>> {
    let index = TreeIndex::new(tree);
    if !index.contains(target) {
        return None;
    }

    Some(
        index
            .pods()
            .filter(|pod| !is_daemon_set_pod(pod))
            .filter(|pod| index.is_descendant(pod, target))
            .map(|pod| pod.identity.clone())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(group: &str, kind: &str, name: &str, parents: &[(&str, &str, &str)]) -> ResourceNode {
        ResourceNode {
            identity: ResourceRef {
                group: group.into(),
                kind: kind.into(),
                namespace: "game".into(),
                name: name.into(),
                ..Default::default()
            },
            parent_refs: parents
                .iter()
                .map(|(g, k, n)| ResourceRef {
                    group: (*g).into(),
                    kind: (*k).into(),
                    namespace: "game".into(),
                    name: (*n).into(),
                    ..Default::default()
                })
                .collect(),
        }
    }

    fn deployment_key(name: &str) -> ResourceKey {
        ResourceKey::new("apps", "Deployment", "game", name)
    }

    fn deployment_tree() -> ApplicationTree {
        ApplicationTree {
            nodes: vec![
                node("apps", "Deployment", "api", &[]),
                node("apps", "ReplicaSet", "api-7d9f", &[("apps", "Deployment", "api")]),
                node("", "Pod", "api-7d9f-a", &[("apps", "ReplicaSet", "api-7d9f")]),
                node("", "Pod", "api-7d9f-b", &[("apps", "ReplicaSet", "api-7d9f")]),
                node("apps", "Deployment", "web", &[]),
                node("apps", "ReplicaSet", "web-55c", &[("apps", "Deployment", "web")]),
                node("", "Pod", "web-55c-a", &[("apps", "ReplicaSet", "web-55c")]),
            ],
        }
    }

    #[test]
    fn test_transitive_descendants() {
        let tree = deployment_tree();
        let pods = remaining_pods(&tree, &deployment_key("api")).unwrap();
        let names: Vec<_> = pods.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["api-7d9f-a", "api-7d9f-b"]);

        let pods = remaining_pods(&tree, &deployment_key("web")).unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].name, "web-55c-a");
    }

    #[test]
    fn test_direct_child_pod() {
        let tree = ApplicationTree {
            nodes: vec![
                node("apps", "StatefulSet", "db", &[]),
                node("", "Pod", "db-0", &[("apps", "StatefulSet", "db")]),
            ],
        };
        let target = ResourceKey::new("apps", "StatefulSet", "game", "db");
        assert_eq!(remaining_pods(&tree, &target).unwrap().len(), 1);
    }

    #[test]
    fn test_daemon_set_pods_excluded_even_with_matching_ancestor() {
        // a pod with two owners: a DaemonSet and a ReplicaSet of the target
        let tree = ApplicationTree {
            nodes: vec![
                node("apps", "Deployment", "api", &[]),
                node("apps", "ReplicaSet", "api-7d9f", &[("apps", "Deployment", "api")]),
                node("apps", "DaemonSet", "agent", &[("apps", "Deployment", "api")]),
                node(
                    "",
                    "Pod",
                    "mixed",
                    &[("apps", "DaemonSet", "agent"), ("apps", "ReplicaSet", "api-7d9f")],
                ),
                node("", "Pod", "agent-x", &[("apps", "DaemonSet", "agent")]),
                node("", "Pod", "api-7d9f-a", &[("apps", "ReplicaSet", "api-7d9f")]),
            ],
        };

        let pods = remaining_pods(&tree, &deployment_key("api")).unwrap();
        let names: Vec<_> = pods.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["api-7d9f-a"]);
    }

    #[test]
    fn test_absent_target() {
        let tree = deployment_tree();
        assert!(remaining_pods(&tree, &deployment_key("gone")).is_none());
    }

    #[test]
    fn test_present_target_without_pods() {
        let tree = ApplicationTree {
            nodes: vec![
                node("apps", "Deployment", "api", &[]),
                node("apps", "ReplicaSet", "api-7d9f", &[("apps", "Deployment", "api")]),
            ],
        };
        assert_eq!(remaining_pods(&tree, &deployment_key("api")), Some(vec![]));
    }

    #[test]
    fn test_multi_parent_and_orphan_parent_refs() {
        // parent ref to a node missing from the tree is still matched directly
        let tree = ApplicationTree {
            nodes: vec![
                node("apps", "Deployment", "api", &[]),
                node(
                    "",
                    "Pod",
                    "p",
                    &[("apps", "ReplicaSet", "not-in-tree"), ("apps", "Deployment", "api")],
                ),
            ],
        };
        assert_eq!(remaining_pods(&tree, &deployment_key("api")).unwrap().len(), 1);
    }

    #[test]
    fn test_cycle_terminates() {
        let tree = ApplicationTree {
            nodes: vec![
                node("apps", "Deployment", "api", &[]),
                node("x", "A", "a", &[("x", "B", "b")]),
                node("x", "B", "b", &[("x", "A", "a")]),
                node("", "Pod", "looped", &[("x", "A", "a")]),
            ],
        };
        let index = TreeIndex::new(&tree);
        let pod = &tree.nodes[3];
        assert!(!index.is_descendant(pod, &deployment_key("api")));
        assert_eq!(remaining_pods(&tree, &deployment_key("api")), Some(vec![]));
    }

    #[test]
    fn test_node_equal_to_target_is_descendant() {
        let tree = deployment_tree();
        let index = TreeIndex::new(&tree);
        assert!(index.is_descendant(&tree.nodes[0], &deployment_key("api")));
        assert!(!index.is_descendant(&tree.nodes[0], &deployment_key("web")));
    }
}
