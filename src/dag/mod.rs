//! Structural validation of an emitted step list.
//!
//! Validation runs as a small state machine: build the graph, run structural
//! checks and cycle detection, and stop there if anything is wrong. Only a sound
//! graph goes on to topological ordering, critical-path and depth analysis.
mod analysis;
mod cycles;
mod graph;
pub mod visualizer;

pub use analysis::{CriticalPath, ParallelBatch};
pub use graph::{DagNode, StepGraph};

use crate::config::CompilerConfig;
use crate::error::{DagError, Warning};
use crate::step::WorkflowStep;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Everything the runtime needs to schedule a valid step graph.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DagAnalysis {
    pub topological_order: Vec<String>,
    pub critical_path: CriticalPath,
    pub max_depth: usize,
    pub parallel_batches: Vec<ParallelBatch>,
    pub depths: BTreeMap<String, usize>,
}

/// Terminal state of a validation run.
#[derive(Debug, Clone, PartialEq)]
pub enum DagValidation {
    Valid {
        analysis: DagAnalysis,
        warnings: Vec<Warning>,
    },
    Invalid {
        errors: Vec<DagError>,
    },
}

impl DagValidation {
    pub fn is_valid(&self) -> bool {
        matches!(self, DagValidation::Valid { .. })
    }

    pub fn analysis(&self) -> Option<&DagAnalysis> {
        match self {
            DagValidation::Valid { analysis, .. } => Some(analysis),
            DagValidation::Invalid { .. } => None,
        }
    }

    pub fn errors(&self) -> &[DagError] {
        match self {
            DagValidation::Valid { .. } => &[],
            DagValidation::Invalid { errors } => errors,
        }
    }

    pub fn warnings(&self) -> &[Warning] {
        match self {
            DagValidation::Valid { warnings, .. } => warnings,
            DagValidation::Invalid { .. } => &[],
        }
    }
}

/// Validates step graphs against the advisory thresholds of a `CompilerConfig`.
#[derive(Debug, Clone)]
pub struct DagValidator {
    max_depth_warning: usize,
    critical_path_warning: usize,
}

impl Default for DagValidator {
    fn default() -> Self {
        Self::new(&CompilerConfig::default())
    }
}

impl DagValidator {
    pub fn new(config: &CompilerConfig) -> Self {
        Self {
            max_depth_warning: config.max_depth_warning,
            critical_path_warning: config.critical_path_warning,
        }
    }

    pub fn validate(&self, steps: &[WorkflowStep]) -> DagValidation {
        let (mut graph, mut errors) = StepGraph::build(steps);

        errors.extend(
            cycles::find_cycles(&graph)
                .into_iter()
                .map(|path| DagError::CycleDetected { path }),
        );
        if !errors.is_empty() {
            debug!(error_count = errors.len(), "step graph rejected");
            return DagValidation::Invalid { errors };
        }

        let order = match analysis::topological_order(&graph) {
            Ok(order) => order,
            Err(err) => return DagValidation::Invalid { errors: vec![err] },
        };
        let predecessor = analysis::compute_longest_paths(&mut graph, &order);
        let critical_path = analysis::critical_path(&graph, &order, &predecessor);
        let parallel_batches = analysis::parallel_batches(&graph, &order);
        let max_depth = graph.nodes().map(|n| n.depth).max().unwrap_or(0);

        let mut warnings: Vec<Warning> = graph
            .nodes()
            .filter(|n| n.dependencies.len() > 1)
            .map(|n| Warning::MergePoint {
                step_id: n.step.id.clone(),
                dependency_count: n.dependencies.len(),
            })
            .collect();
        if max_depth > self.max_depth_warning {
            warnings.push(Warning::ExcessiveDepth {
                depth: max_depth,
                threshold: self.max_depth_warning,
            });
        }
        if critical_path.length > self.critical_path_warning {
            warnings.push(Warning::LongCriticalPath {
                length: critical_path.length,
                threshold: self.critical_path_warning,
            });
        }

        let analysis = DagAnalysis {
            topological_order: order.iter().map(|&i| graph.id(i).to_string()).collect(),
            depths: graph
                .nodes()
                .map(|n| (n.step.id.clone(), n.depth))
                .collect(),
            critical_path,
            max_depth,
            parallel_batches,
        };
        debug!(
            steps = steps.len(),
            max_depth,
            critical_path = analysis.critical_path.length,
            "step graph validated"
        );
        DagValidation::Valid { analysis, warnings }
    }
}

/// Returns every cycle in a step list, ignoring other structural defects.
pub fn detect_cycles(steps: &[WorkflowStep]) -> Vec<Vec<String>> {
    let (graph, _) = StepGraph::build(steps);
    cycles::find_cycles(&graph)
}

/// Orders a step list so every step follows its dependencies.
pub fn topological_sort(steps: &[WorkflowStep]) -> Result<Vec<String>, Vec<DagError>> {
    match DagValidator::default().validate(steps) {
        DagValidation::Valid { analysis, .. } => Ok(analysis.topological_order),
        DagValidation::Invalid { errors } => Err(errors),
    }
}
