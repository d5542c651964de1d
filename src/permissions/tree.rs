use std::collections::{HashMap, HashSet};

use super::{MenuTree, PermissionNode, ResolveError};

/// Build the forest hanging off `root` from a flat node list.
///
/// Siblings are ordered by `sort`, then by id, so the output does not depend on
/// input order. Nodes whose parent is neither `root` nor reachable from it are
/// left out. Reaching the same id twice (a cycle, or a repeated id under
/// reachable parents) fails with `DataIntegrity`.
///
/// The walk uses an explicit stack and assembles subtrees bottom-up, so depth
/// is bounded by memory rather than by the call stack.
pub fn build_tree(nodes: &[PermissionNode], root: i64) -> Result<Vec<MenuTree>, ResolveError> {
    let mut children: HashMap<i64, Vec<&PermissionNode>> = HashMap::new();
    for node in nodes {
        children.entry(node.parent_id).or_default().push(node);
    }
    for siblings in children.values_mut() {
        siblings.sort_by_key(|node| (node.sort, node.id));
    }

    let order = walk(&children, root)?;

    // Pre-order puts every child after its parent, so in reverse each node's
    // children are already assembled.
    let mut built: HashMap<i64, MenuTree> = HashMap::with_capacity(order.len());
    for node in order.into_iter().rev() {
        let subtree = MenuTree {
            node: node.clone(),
            children: take_children(&children, &mut built, node.id),
        };
        built.insert(node.id, subtree);
    }

    Ok(take_children(&children, &mut built, root))
}

/// Pre-order list of every node reachable from `root`.
fn walk<'a>(
    children: &HashMap<i64, Vec<&'a PermissionNode>>,
    root: i64,
) -> Result<Vec<&'a PermissionNode>, ResolveError> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    let mut stack: Vec<&PermissionNode> = Vec::new();

    if let Some(siblings) = children.get(&root) {
        stack.extend(siblings.iter().rev());
    }
    while let Some(node) = stack.pop() {
        if !visited.insert(node.id) {
            return Err(ResolveError::DataIntegrity { node_id: node.id });
        }
        order.push(node);
        if let Some(siblings) = children.get(&node.id) {
            stack.extend(siblings.iter().rev());
        }
    }
    Ok(order)
}

fn take_children(
    children: &HashMap<i64, Vec<&PermissionNode>>,
    built: &mut HashMap<i64, MenuTree>,
    parent_id: i64,
) -> Vec<MenuTree> {
    children
        .get(&parent_id)
        .map(|siblings| {
            siblings
                .iter()
                .filter_map(|node| built.remove(&node.id))
                .collect()
        })
        .unwrap_or_default()
}
