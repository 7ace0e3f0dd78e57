use crate::error::DagError;
use crate::step::WorkflowStep;
use ahash::{AHashMap, AHashSet};

/// A step wrapped with validator-owned, derived data. Nodes only live for the
/// duration of one validation and never leak back into the step contract.
#[derive(Debug)]
pub struct DagNode<'a> {
    pub step: &'a WorkflowStep,
    /// Indices of the steps this one waits on.
    pub dependencies: Vec<usize>,
    /// Reverse edges: indices of the steps waiting on this one.
    pub dependents: Vec<usize>,
    /// Longest path length (in edges) from any root.
    pub depth: usize,
    /// Longest chain of steps (in nodes) ending at this step.
    pub critical_path_length: usize,
}

/// The dependency graph of a step list, indexed by position.
#[derive(Debug)]
pub struct StepGraph<'a> {
    pub(crate) nodes: Vec<DagNode<'a>>,
}

impl<'a> StepGraph<'a> {
    /// Builds one node per step and wires dependencies in both directions.
    ///
    /// The graph is always returned, even when structural errors are found, so that
    /// cycle detection can still run and report everything in one pass. Edges to
    /// unknown ids are dropped; a repeated id resolves to its first occurrence.
    pub fn build(steps: &'a [WorkflowStep]) -> (Self, Vec<DagError>) {
        let mut errors = Vec::new();
        let mut index: AHashMap<&str, usize> = AHashMap::with_capacity(steps.len());
        let mut reported: AHashSet<&str> = AHashSet::new();

        for (i, step) in steps.iter().enumerate() {
            if index.contains_key(step.id.as_str()) {
                if reported.insert(step.id.as_str()) {
                    errors.push(DagError::DuplicateStepId {
                        step_id: step.id.clone(),
                    });
                }
            } else {
                index.insert(step.id.as_str(), i);
            }
        }

        let mut nodes: Vec<DagNode<'a>> = steps
            .iter()
            .map(|step| DagNode {
                step,
                dependencies: Vec::new(),
                dependents: Vec::new(),
                depth: 0,
                critical_path_length: 0,
            })
            .collect();

        for (i, step) in steps.iter().enumerate() {
            for dependency in &step.dependencies {
                match index.get(dependency.as_str()) {
                    Some(&d) => {
                        if !nodes[i].dependencies.contains(&d) {
                            nodes[i].dependencies.push(d);
                            nodes[d].dependents.push(i);
                        }
                    }
                    None => errors.push(DagError::MissingDependency {
                        step_id: step.id.clone(),
                        dependency: dependency.clone(),
                    }),
                }
            }
        }

        (Self { nodes }, errors)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: usize) -> &DagNode<'a> {
        &self.nodes[index]
    }

    pub(crate) fn id(&self, index: usize) -> &'a str {
        self.nodes[index].step.id.as_str()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &DagNode<'a>> {
        self.nodes.iter()
    }
}
