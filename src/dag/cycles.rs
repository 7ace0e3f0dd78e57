use super::graph::StepGraph;

/// Depth-first search state for cycle detection.
///
/// The walk keeps its own frame stack of `(node, next dependent index)` so that
/// long dependency chains cannot exhaust the thread stack.
struct CycleSearch<'g, 'a> {
    graph: &'g StepGraph<'a>,
    visited: Vec<bool>,
    on_stack: Vec<bool>,
    path: Vec<usize>,
    cycles: Vec<Vec<String>>,
}

impl<'g, 'a> CycleSearch<'g, 'a> {
    fn enter(&mut self, node: usize, frames: &mut Vec<(usize, usize)>) {
        self.visited[node] = true;
        self.on_stack[node] = true;
        self.path.push(node);
        frames.push((node, 0));
    }

    fn visit(&mut self, root: usize) {
        let graph = self.graph;
        let mut frames: Vec<(usize, usize)> = Vec::new();
        self.enter(root, &mut frames);

        while let Some(frame) = frames.last_mut() {
            let (node, cursor) = *frame;
            let dependents = &graph.node(node).dependents;

            let Some(&next) = dependents.get(cursor) else {
                frames.pop();
                self.path.pop();
                self.on_stack[node] = false;
                continue;
            };
            frame.1 += 1;

            if self.on_stack[next] {
                // Back-edge: the cycle is the path slice starting at `next`.
                if let Some(start) = self.path.iter().position(|&n| n == next) {
                    let mut cycle: Vec<String> = self.path[start..]
                        .iter()
                        .map(|&n| graph.id(n).to_string())
                        .collect();
                    cycle.push(graph.id(next).to_string());
                    self.cycles.push(cycle);
                }
            } else if !self.visited[next] {
                self.enter(next, &mut frames);
            }
        }
    }
}

/// Finds cycles by following edges in execution order (dependency -> dependent).
///
/// Every back-edge yields one reported cycle, so independent cycles are all
/// collected. Each cycle is closed: its last id repeats the first.
pub(crate) fn find_cycles(graph: &StepGraph<'_>) -> Vec<Vec<String>> {
    let mut search = CycleSearch {
        graph,
        visited: vec![false; graph.len()],
        on_stack: vec![false; graph.len()],
        path: Vec::new(),
        cycles: Vec::new(),
    };

    for node in 0..graph.len() {
        if !search.visited[node] {
            search.visit(node);
        }
    }
    search.cycles
}
