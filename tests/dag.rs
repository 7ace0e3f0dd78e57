//! Tests for step graph validation: structure, cycles, ordering and analysis.
mod common;
use common::*;
use pilotc::config::CompilerConfig;
use pilotc::dag::{detect_cycles, topological_sort, visualizer::render_execution_plan};
use pilotc::prelude::*;

/// a -> b -> d -> e, a -> c -> e
fn create_diamond() -> Vec<WorkflowStep> {
    vec![
        step("a", &[]),
        step("b", &["a"]),
        step("c", &["a"]),
        step("d", &["b"]),
        step("e", &["d", "c"]),
    ]
}

fn create_chain(len: usize) -> Vec<WorkflowStep> {
    (0..len)
        .map(|i| {
            let id = format!("s{}", i);
            let dep = format!("s{}", i.saturating_sub(1));
            if i == 0 {
                step(&id, &[])
            } else {
                step(&id, &[dep.as_str()])
            }
        })
        .collect()
}

#[test]
fn test_valid_graph_produces_analysis() {
    let steps = create_diamond();
    let validation = DagValidator::default().validate(&steps);

    assert!(validation.is_valid());
    let analysis = validation.analysis().expect("valid graph has an analysis");
    assert_eq!(analysis.topological_order.len(), steps.len());
    assert_eq!(analysis.max_depth, 3);
    assert_eq!(analysis.depths["c"], 1);
    assert_eq!(analysis.depths["e"], 3);
}

#[test]
fn test_topological_order_respects_dependencies() {
    let steps = create_diamond();
    let order = topological_sort(&steps).expect("diamond is acyclic");

    assert_eq!(order.len(), 5);
    for step in &steps {
        for dep in &step.dependencies {
            assert!(
                position(&order, dep) < position(&order, &step.id),
                "{} must come before {}",
                dep,
                step.id
            );
        }
    }
}

#[test]
fn test_topological_order_is_stable() {
    let steps = vec![step("z", &[]), step("y", &[]), step("x", &["z"])];
    let order = topological_sort(&steps).unwrap();
    assert_eq!(order, vec!["z", "y", "x"]);
}

#[test]
fn test_critical_path_matches_longest_chain() {
    let validation = DagValidator::default().validate(&create_diamond());
    let analysis = validation.analysis().unwrap();

    assert_eq!(analysis.critical_path.steps, vec!["a", "b", "d", "e"]);
    assert_eq!(analysis.critical_path.length, 4);
}

#[test]
fn test_parallel_batches_skip_singletons() {
    let validation = DagValidator::default().validate(&create_diamond());
    let analysis = validation.analysis().unwrap();

    assert_eq!(analysis.parallel_batches.len(), 1);
    let batch = &analysis.parallel_batches[0];
    assert_eq!(batch.depth, 1);
    assert_eq!(batch.step_ids, vec!["b", "c"]);
}

#[test]
fn test_independent_roots_form_a_batch() {
    let steps = vec![step("left", &[]), step("right", &[]), step("join", &["left", "right"])];
    let validation = DagValidator::default().validate(&steps);
    let analysis = validation.analysis().unwrap();

    assert_eq!(analysis.parallel_batches[0].step_ids, vec!["left", "right"]);
}

#[test]
fn test_merge_point_warning() {
    let validation = DagValidator::default().validate(&create_diamond());

    assert!(validation.warnings().contains(&Warning::MergePoint {
        step_id: "e".to_string(),
        dependency_count: 2,
    }));
}

#[test]
fn test_depth_and_critical_path_warnings() {
    let validation = DagValidator::default().validate(&create_chain(14));
    let warnings = validation.warnings();

    assert!(warnings.contains(&Warning::ExcessiveDepth {
        depth: 13,
        threshold: 10,
    }));
    assert!(warnings.contains(&Warning::LongCriticalPath {
        length: 14,
        threshold: 12,
    }));
}

#[test]
fn test_thresholds_come_from_config() {
    let config = CompilerConfig {
        max_depth_warning: 1,
        ..CompilerConfig::default()
    };
    let validation = DagValidator::new(&config).validate(&create_chain(3));

    assert!(validation.is_valid());
    assert!(
        validation
            .warnings()
            .iter()
            .any(|w| matches!(w, Warning::ExcessiveDepth { depth: 2, .. }))
    );
}

#[test]
fn test_cycle_is_detected() {
    let steps = vec![step("a", &["c"]), step("b", &["a"]), step("c", &["b"])];

    let cycles = detect_cycles(&steps);
    assert_eq!(cycles.len(), 1);
    let cycle = &cycles[0];
    assert_eq!(cycle.first(), cycle.last());
    for id in ["a", "b", "c"] {
        assert!(cycle.iter().any(|s| s == id));
    }

    let validation = DagValidator::default().validate(&steps);
    assert!(!validation.is_valid());
    match &validation.errors()[0] {
        DagError::CycleDetected { path } => assert_eq!(path.len(), 4),
        other => panic!("Expected CycleDetected, got {:?}", other),
    }
}

#[test]
fn test_independent_cycles_are_all_reported() {
    let steps = vec![
        step("x", &["y"]),
        step("y", &["x"]),
        step("p", &["q"]),
        step("q", &["p"]),
        step("free", &[]),
    ];

    assert_eq!(detect_cycles(&steps).len(), 2);
    let validation = DagValidator::default().validate(&steps);
    assert_eq!(validation.errors().len(), 2);
}

#[test]
fn test_acyclic_graph_has_no_cycles() {
    assert!(detect_cycles(&create_diamond()).is_empty());
    assert!(detect_cycles(&create_chain(20)).is_empty());
}

#[test]
fn test_long_chain_validates_without_recursion() {
    let steps = create_chain(100_000);

    let validation = DagValidator::default().validate(&steps);
    assert!(validation.is_valid());
    let analysis = validation.analysis().unwrap();
    assert_eq!(analysis.max_depth, 99_999);
    assert_eq!(analysis.critical_path.length, 100_000);
    assert_eq!(analysis.topological_order.first().map(String::as_str), Some("s0"));
}

#[test]
fn test_long_closed_chain_reports_one_cycle() {
    let mut steps = create_chain(100_000);
    steps[0].dependencies.push("s99999".to_string());

    let cycles = detect_cycles(&steps);
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0].len(), 100_001);
    assert_eq!(cycles[0].first(), cycles[0].last());
}

#[test]
fn test_self_dependency_is_a_cycle() {
    let steps = vec![step("loop", &["loop"])];
    assert_eq!(detect_cycles(&steps), vec![vec!["loop".to_string(), "loop".to_string()]]);
}

#[test]
fn test_missing_dependency_is_invalid() {
    let steps = vec![step("a", &[]), step("b", &["ghost"])];
    let validation = DagValidator::default().validate(&steps);

    assert!(!validation.is_valid());
    assert!(validation.analysis().is_none());
    assert_eq!(
        validation.errors(),
        &[DagError::MissingDependency {
            step_id: "b".to_string(),
            dependency: "ghost".to_string(),
        }]
    );
}

#[test]
fn test_duplicate_step_id_is_invalid() {
    let steps = vec![step("a", &[]), step("a", &[]), step("b", &["a"])];
    let validation = DagValidator::default().validate(&steps);

    assert!(validation.errors().contains(&DagError::DuplicateStepId {
        step_id: "a".to_string(),
    }));
}

#[test]
fn test_empty_step_list_is_valid() {
    let validation = DagValidator::default().validate(&[]);
    let analysis = validation.analysis().unwrap();

    assert!(analysis.topological_order.is_empty());
    assert_eq!(analysis.critical_path.length, 0);
}

#[test]
fn test_cycle_error_display_joins_path() {
    let err = DagError::CycleDetected {
        path: vec!["a".into(), "b".into(), "a".into()],
    };
    assert!(err.to_string().contains("a -> b -> a"));
    assert_eq!(err.code(), "E_CYCLE");
}

#[test]
fn test_execution_plan_rendering() {
    let steps = create_diamond();
    let validation = DagValidator::default().validate(&steps);
    let plan = render_execution_plan("diamond", &steps, validation.analysis().unwrap());

    assert!(plan.contains("EXECUTION PLAN for: diamond"));
    assert!(plan.contains("PARALLEL BATCHES"));
    assert!(plan.contains("a -> b -> d -> e"));
}
