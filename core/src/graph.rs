//! Pure dependency-graph algorithms.
//!
//! Edges point from a task to the task it depends on. The repository loads
//! the edge list and calls in here; nothing in this module touches storage.

use std::collections::{HashMap, HashSet};

/// A dependency edge `(task_id, depends_on_id)`.
pub type Edge = (String, String);

fn adjacency(edges: &[Edge]) -> HashMap<&str, Vec<&str>> {
    let mut adj: HashMap<&str, Vec<&str>> = HashMap::new();
    for (from, to) in edges {
        adj.entry(from.as_str()).or_default().push(to.as_str());
    }
    adj
}

/// Find a cycle in the graph formed by `existing` plus `candidate` edges.
///
/// Returns the vertices of one offending cycle (first vertex repeated at
/// the end) for diagnostics, or `None` when the combined graph is acyclic.
/// A self-edge is reported as the trivial two-element cycle.
pub fn find_cycle(existing: &[Edge], candidate: &[Edge]) -> Option<Vec<String>> {
    for (from, to) in candidate {
        if from == to {
            return Some(vec![from.clone(), to.clone()]);
        }
    }

    let mut combined: Vec<Edge> = existing.to_vec();
    combined.extend_from_slice(candidate);
    let adj = adjacency(&combined);

    // Iterative DFS with an explicit path stack so the cycle can be
    // reported, not just detected.
    let mut visited: HashSet<&str> = HashSet::new();
    let mut roots: Vec<&str> = adj.keys().copied().collect();
    roots.sort_unstable();

    for root in roots {
        if visited.contains(root) {
            continue;
        }
        let mut path: Vec<&str> = Vec::new();
        let mut on_path: HashSet<&str> = HashSet::new();
        // (node, next child index)
        let mut stack: Vec<(&str, usize)> = vec![(root, 0)];

        while let Some((node, child_idx)) = stack.pop() {
            if child_idx == 0 {
                path.push(node);
                on_path.insert(node);
            }
            let children = adj.get(node).map(Vec::as_slice).unwrap_or(&[]);
            if let Some(&next) = children.get(child_idx) {
                stack.push((node, child_idx + 1));
                if on_path.contains(next) {
                    let start = path.iter().position(|&n| n == next).unwrap();
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|s| s.to_string()).collect();
                    cycle.push(next.to_string());
                    return Some(cycle);
                }
                if !visited.contains(next) {
                    stack.push((next, 0));
                }
            } else {
                visited.insert(node);
                on_path.remove(node);
                path.pop();
            }
        }
    }

    None
}

/// Longest path through the DAG, weighted by per-task estimated hours
/// (missing estimates count as zero). Returns task ids in execution order
/// (dependencies first). Empty input yields an empty path.
///
/// Reporting only; never called from a write path.
pub fn critical_path(weights: &HashMap<String, f64>, edges: &[Edge]) -> Vec<String> {
    // Reverse the edges so traversal runs dependency -> dependent.
    let mut downstream: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut indegree: HashMap<&str, usize> = HashMap::new();
    for id in weights.keys() {
        indegree.entry(id.as_str()).or_insert(0);
    }
    for (task, dep) in edges {
        downstream
            .entry(dep.as_str())
            .or_default()
            .push(task.as_str());
        *indegree.entry(task.as_str()).or_insert(0) += 1;
    }

    // Kahn order, then relax each node's best incoming chain.
    let mut queue: Vec<&str> = indegree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&n, _)| n)
        .collect();
    queue.sort_unstable();

    let weight_of = |n: &str| weights.get(n).copied().unwrap_or(0.0);
    let mut best: HashMap<&str, (f64, Option<&str>)> = HashMap::new();
    for &n in &queue {
        best.insert(n, (weight_of(n), None));
    }

    let mut order: Vec<&str> = Vec::new();
    while let Some(node) = queue.pop() {
        order.push(node);
        let node_best = best.get(node).map(|&(w, _)| w).unwrap_or(0.0);
        if let Some(children) = downstream.get(node) {
            for &child in children {
                let candidate = node_best + weight_of(child);
                let entry = best.entry(child).or_insert((f64::MIN, None));
                if candidate > entry.0 {
                    *entry = (candidate, Some(node));
                }
                if let Some(d) = indegree.get_mut(child) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push(child);
                    }
                }
            }
        }
    }

    // A cycle would leave nodes unprocessed; the audit reports that case
    // and the path over the processed prefix is still well-defined.
    let end = order
        .iter()
        .max_by(|a, b| {
            let wa = best.get(*a).map(|&(w, _)| w).unwrap_or(0.0);
            let wb = best.get(*b).map(|&(w, _)| w).unwrap_or(0.0);
            wa.partial_cmp(&wb).unwrap_or(std::cmp::Ordering::Equal)
        })
        .copied();

    let mut path = Vec::new();
    let mut cursor = end;
    while let Some(node) = cursor {
        path.push(node.to_string());
        cursor = best.get(node).and_then(|&(_, prev)| prev);
    }
    path.reverse();
    path
}

/// Anomalies found by the defensive full-graph audit.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphAnomaly {
    /// An edge endpoint references a task id that does not exist
    DanglingEdge {
        task_id: String,
        depends_on: String,
        missing: String,
    },
    /// The stored graph contains a cycle (should never happen)
    Cycle { path: Vec<String> },
}

impl std::fmt::Display for GraphAnomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphAnomaly::DanglingEdge {
                task_id,
                depends_on,
                missing,
            } => {
                write!(
                    f,
                    "edge {task_id} -> {depends_on} references missing task {missing}"
                )
            }
            GraphAnomaly::Cycle { path } => {
                write!(f, "dependency cycle: {}", path.join(" -> "))
            }
        }
    }
}

/// Walk the full stored graph and report anomalies. Under normal operation
/// this returns empty; it exists as an audit for externally corrupted data.
pub fn audit(task_ids: &HashSet<String>, edges: &[Edge]) -> Vec<GraphAnomaly> {
    let mut anomalies = Vec::new();

    for (task, dep) in edges {
        for endpoint in [task, dep] {
            if !task_ids.contains(endpoint) {
                anomalies.push(GraphAnomaly::DanglingEdge {
                    task_id: task.clone(),
                    depends_on: dep.clone(),
                    missing: endpoint.clone(),
                });
            }
        }
    }

    if let Some(path) = find_cycle(edges, &[]) {
        anomalies.push(GraphAnomaly::Cycle { path });
    }

    anomalies
}
