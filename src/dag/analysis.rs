use super::graph::StepGraph;
use crate::error::DagError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// The longest dependency chain of a graph.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CriticalPath {
    /// Step ids from a root to the terminal step.
    pub steps: Vec<String>,
    /// Number of steps on the path.
    pub length: usize,
}

/// Steps at the same depth with no dependency on each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelBatch {
    pub depth: usize,
    pub step_ids: Vec<String>,
}

/// Kahn's algorithm. Ready nodes are taken in input order so the result is stable.
///
/// A result shorter than the graph means a cycle slipped past cycle detection.
pub(crate) fn topological_order(graph: &StepGraph<'_>) -> Result<Vec<usize>, DagError> {
    let mut in_degree: Vec<usize> = graph.nodes().map(|n| n.dependencies.len()).collect();
    let mut queue: VecDeque<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(i, _)| i)
        .collect();

    let mut order = Vec::with_capacity(graph.len());
    while let Some(node) = queue.pop_front() {
        order.push(node);
        for &dependent in &graph.node(node).dependents {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                queue.push_back(dependent);
            }
        }
    }

    if order.len() < graph.len() {
        return Err(invariant_violation(format!(
            "topological order covers {} of {} steps after cycle detection passed",
            order.len(),
            graph.len()
        )));
    }
    Ok(order)
}

/// Fills `depth` and `critical_path_length` on every node and returns each
/// node's predecessor on its longest incoming chain.
pub(crate) fn compute_longest_paths(
    graph: &mut StepGraph<'_>,
    order: &[usize],
) -> Vec<Option<usize>> {
    let mut predecessor = vec![None; graph.len()];

    for &node in order {
        // Ties go to the first-declared dependency.
        let best = graph.nodes[node]
            .dependencies
            .iter()
            .copied()
            .fold(None::<usize>, |best, dep| match best {
                Some(b)
                    if graph.nodes[b].critical_path_length
                        >= graph.nodes[dep].critical_path_length =>
                {
                    Some(b)
                }
                _ => Some(dep),
            });

        let length = best.map_or(1, |b| graph.nodes[b].critical_path_length + 1);
        graph.nodes[node].critical_path_length = length;
        graph.nodes[node].depth = length - 1;
        predecessor[node] = best;
    }
    predecessor
}

/// Reconstructs the critical path by walking predecessors back from the node with
/// the global maximum (first in topological order on ties).
pub(crate) fn critical_path(
    graph: &StepGraph<'_>,
    order: &[usize],
    predecessor: &[Option<usize>],
) -> CriticalPath {
    let terminal = order.iter().copied().fold(None::<usize>, |best, node| match best {
        Some(b) if graph.node(b).critical_path_length >= graph.node(node).critical_path_length => {
            Some(b)
        }
        _ => Some(node),
    });

    let Some(terminal) = terminal else {
        return CriticalPath::default();
    };

    let mut steps = Vec::new();
    let mut cursor = Some(terminal);
    while let Some(node) = cursor {
        steps.push(graph.id(node).to_string());
        cursor = predecessor[node];
    }
    steps.reverse();

    CriticalPath {
        length: steps.len(),
        steps,
    }
}

/// Groups steps by depth. Two steps at the same longest-path depth can never depend
/// on each other, so each group is safe to run concurrently. Singletons are not
/// parallelization opportunities and are left out.
pub(crate) fn parallel_batches(graph: &StepGraph<'_>, order: &[usize]) -> Vec<ParallelBatch> {
    let mut by_depth: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    for &node in order {
        by_depth
            .entry(graph.node(node).depth)
            .or_default()
            .push(graph.id(node).to_string());
    }

    by_depth
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(depth, step_ids)| ParallelBatch { depth, step_ids })
        .collect()
}

/// Defects in the validator itself fail loudly in development builds and degrade
/// to a generic error otherwise.
fn invariant_violation(detail: String) -> DagError {
    if cfg!(debug_assertions) {
        panic!("step graph invariant violated: {detail}");
    }
    tracing::error!(%detail, "step graph invariant violated");
    DagError::Internal
}
