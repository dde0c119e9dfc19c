//! Dependency graph helpers shared by the tool and capability registries.
//!
//! Graphs are plain adjacency maps from node id to the ids it depends on.
//! Edges to nodes missing from the map are followed as leaves.

use std::collections::{BTreeMap, BTreeSet};

pub type Adjacency = BTreeMap<String, Vec<String>>;

/// Depth-first search from `start` with a recursion stack. Returns the first
/// cycle reachable from `start`, closed on its entry node (`a, b, c, a`).
pub fn find_cycle(adjacency: &Adjacency, start: &str) -> Option<Vec<String>> {
    let mut visited = BTreeSet::new();
    let mut in_progress = BTreeSet::new();
    let mut path = Vec::new();
    visit(adjacency, start, &mut visited, &mut in_progress, &mut path)
}

/// Checks every node, in key order.
pub fn find_any_cycle(adjacency: &Adjacency) -> Option<Vec<String>> {
    let mut visited = BTreeSet::new();
    for node in adjacency.keys() {
        if visited.contains(node) {
            continue;
        }
        let mut in_progress = BTreeSet::new();
        let mut path = Vec::new();
        if let Some(cycle) = visit(adjacency, node, &mut visited, &mut in_progress, &mut path) {
            return Some(cycle);
        }
    }
    None
}

fn visit(
    adjacency: &Adjacency,
    node: &str,
    visited: &mut BTreeSet<String>,
    in_progress: &mut BTreeSet<String>,
    path: &mut Vec<String>,
) -> Option<Vec<String>> {
    if in_progress.contains(node) {
        let entry = path.iter().position(|step| step == node).unwrap_or(0);
        let mut cycle = path[entry..].to_vec();
        cycle.push(node.to_string());
        return Some(cycle);
    }
    if !visited.insert(node.to_string()) {
        return None;
    }

    in_progress.insert(node.to_string());
    path.push(node.to_string());
    for next in adjacency.get(node).into_iter().flatten() {
        if let Some(cycle) = visit(adjacency, next, visited, in_progress, path) {
            return Some(cycle);
        }
    }
    path.pop();
    in_progress.remove(node);
    None
}

/// Post-order walk: every dependency appears before the nodes that need it,
/// `start` comes last. Nodes already on the stack are skipped, so callers
/// should reject cycles first.
pub fn dependencies_first(adjacency: &Adjacency, start: &str) -> Vec<String> {
    let mut ordered = Vec::new();
    let mut visited = BTreeSet::new();
    post_order(adjacency, start, &mut visited, &mut ordered);
    ordered
}

fn post_order(
    adjacency: &Adjacency,
    node: &str,
    visited: &mut BTreeSet<String>,
    ordered: &mut Vec<String>,
) {
    if !visited.insert(node.to_string()) {
        return;
    }
    for next in adjacency.get(node).into_iter().flatten() {
        post_order(adjacency, next, visited, ordered);
    }
    ordered.push(node.to_string());
}

#[cfg(test)]
mod tests {
    use super::{dependencies_first, find_any_cycle, find_cycle, Adjacency};

    fn graph(edges: &[(&str, &[&str])]) -> Adjacency {
        edges
            .iter()
            .map(|(node, deps)| {
                (node.to_string(), deps.iter().map(|dep| dep.to_string()).collect::<Vec<_>>())
            })
            .collect()
    }

    #[test]
    fn reports_full_cycle_path() {
        let adjacency = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"])]);

        assert_eq!(
            find_cycle(&adjacency, "a"),
            Some(vec!["a".to_string(), "b".to_string(), "c".to_string(), "a".to_string()])
        );
    }

    #[test]
    fn cycle_not_through_start_is_still_reported_from_its_entry() {
        let adjacency = graph(&[("root", &["x"]), ("x", &["y"]), ("y", &["x"])]);

        assert_eq!(
            find_cycle(&adjacency, "root"),
            Some(vec!["x".to_string(), "y".to_string(), "x".to_string()])
        );
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let adjacency = graph(&[("a", &["a"])]);
        assert_eq!(find_cycle(&adjacency, "a"), Some(vec!["a".to_string(), "a".to_string()]));
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let adjacency =
            graph(&[("top", &["left", "right"]), ("left", &["base"]), ("right", &["base"])]);

        assert_eq!(find_cycle(&adjacency, "top"), None);
        assert_eq!(find_any_cycle(&adjacency), None);
    }

    #[test]
    fn dependencies_come_before_dependents() {
        let adjacency = graph(&[
            ("bunker", &["route", "weather"]),
            ("weather", &["route"]),
            ("route", &[]),
        ]);

        assert_eq!(
            dependencies_first(&adjacency, "bunker"),
            vec!["route".to_string(), "weather".to_string(), "bunker".to_string()]
        );
    }
}
