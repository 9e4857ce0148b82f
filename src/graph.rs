//! Dependency graph validation.
//!
//! Edges live on the records themselves; this module only answers whether a
//! proposed "A blocks B" edge is legal against the current adjacency.

use eyre::Result;
use std::collections::{HashMap, HashSet};

use crate::error::StoreError;
use crate::types::MAX_EDGES;

/// Read access to outgoing `blocks` edges.
pub trait BlocksGraph {
    /// Ids that `id` blocks.
    fn blocks_of(&self, id: &str) -> Result<Vec<String>>;
}

impl BlocksGraph for HashMap<String, Vec<String>> {
    fn blocks_of(&self, id: &str) -> Result<Vec<String>> {
        Ok(self.get(id).cloned().unwrap_or_default())
    }
}

/// Find the cycle that adding `from -> to` would close.
///
/// Returns the cycle in edge order starting and ending at `from`, e.g.
/// `[C, A, B, C]` when adding `C -> A` over `A -> B -> C`.
pub fn find_cycle<G: BlocksGraph + ?Sized>(graph: &G, from: &str, to: &str) -> Result<Option<Vec<String>>> {
    if from == to {
        return Ok(Some(vec![from.to_string(), to.to_string()]));
    }

    // DFS from 'to'; reaching 'from' means the new edge closes a loop
    let mut parent: HashMap<String, String> = HashMap::new();
    let mut visited = HashSet::new();
    let mut stack = vec![to.to_string()];

    while let Some(node) = stack.pop() {
        if node == from {
            let mut path = vec![node.clone()];
            let mut cursor = node;
            while let Some(prev) = parent.get(&cursor) {
                path.push(prev.clone());
                cursor = prev.clone();
            }
            path.push(from.to_string());
            path.reverse();
            return Ok(Some(path));
        }
        if !visited.insert(node.clone()) {
            continue;
        }
        let mut next = graph.blocks_of(&node)?;
        // Reverse so the first listed edge is explored first
        next.reverse();
        for child in next {
            if !visited.contains(&child) {
                parent.entry(child.clone()).or_insert_with(|| node.clone());
                stack.push(child);
            }
        }
    }

    Ok(None)
}

/// Reject a self edge or an edge that closes a cycle.
pub fn check_edge<G: BlocksGraph + ?Sized>(graph: &G, from: &str, to: &str) -> Result<()> {
    if from == to {
        return Err(StoreError::SelfReference(from.to_string()).into());
    }
    if let Some(path) = find_cycle(graph, from, to)? {
        return Err(StoreError::CircularDependency { path }.into());
    }
    Ok(())
}

/// Reject an edge set that is already at the ceiling.
pub fn check_edge_count(field: &str, id: &str, current: usize) -> Result<()> {
    if current >= MAX_EDGES {
        return Err(StoreError::LimitExceeded {
            what: format!("{} of {}", field, id),
            limit: MAX_EDGES,
        }
        .into());
    }
    Ok(())
}
