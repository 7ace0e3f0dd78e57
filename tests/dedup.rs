//! Tests for the deduplication steps added for lookup sources.
mod common;
use common::*;
use pilotc::compiler::{DataRef, DeduplicationInjector};
use pilotc::ir::DataSource;
use pilotc::prelude::*;
use pilotc::step::TransformKind;
use serde_json::json;

fn lookup_source(key_field: Option<&str>) -> DataSource {
    serde_json::from_value(json!({
        "id": "seen",
        "type": "tabular",
        "source": "google-sheets",
        "location": "Seen!A:A",
        "role": "lookup",
        "key_field": key_field
    }))
    .unwrap()
}

#[test]
fn test_injector_adds_three_wired_steps() {
    let mut injector = DeduplicationInjector::new("id");
    let mut steps = vec![step("fetch_rows", &[])];

    let rows = injector.inject(&mut steps, &lookup_source(None), &DataRef::step("fetch_rows"));

    assert_eq!(rows, DataRef::step("filter_new_items_seen"));
    let ids: Vec<&str> = steps.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            "fetch_rows",
            "read_reference_seen",
            "extract_ids_seen",
            "filter_new_items_seen"
        ]
    );
    assert!(steps[1].dependencies.is_empty());
    assert_eq!(steps[2].dependencies, vec!["read_reference_seen"]);
    assert_eq!(steps[3].dependencies, vec!["fetch_rows", "extract_ids_seen"]);
    assert_eq!(
        steps[1].plugin_operation(),
        Some(("google-sheets", "read_range"))
    );
}

#[test]
fn test_injector_falls_back_to_default_key_field() {
    let mut injector = DeduplicationInjector::new("record_id");
    let mut steps = Vec::new();
    injector.inject(&mut steps, &lookup_source(None), &DataRef::input("rows"));

    match &steps[1].kind {
        StepKind::Transform {
            operation, config, ..
        } => {
            assert_eq!(*operation, TransformKind::ExtractKeys);
            assert_eq!(config["key_field"], json!("record_id"));
        }
        other => panic!("Expected transform, got {:?}", other),
    }
    match &steps[2].kind {
        StepKind::Transform {
            operation,
            input,
            config,
        } => {
            assert_eq!(*operation, TransformKind::ExcludeKnown);
            assert_eq!(input, "{{input.rows}}");
            assert_eq!(config["match_field"], json!("record_id"));
            assert_eq!(config["known_keys"], json!("{{extract_ids_seen.data}}"));
        }
        other => panic!("Expected transform, got {:?}", other),
    }
    // Runtime inputs are not steps, so only the extracted keys gate the filter.
    assert_eq!(steps[2].dependencies, vec!["extract_ids_seen"]);
}

#[test]
fn test_injector_is_idempotent() {
    let mut injector = DeduplicationInjector::new("id");
    let lookup = lookup_source(Some("message_id"));
    let mut steps = vec![step("fetch_rows", &[])];
    let candidates = DataRef::step("fetch_rows");

    let first = injector.inject(&mut steps, &lookup, &candidates);
    let after_first = steps.clone();
    let second = injector.inject(&mut steps, &lookup, &candidates);

    assert_eq!(first, second);
    assert_eq!(steps, after_first);
    assert_eq!(injector.injected().collect::<Vec<_>>(), vec!["seen"]);
}

#[test]
fn test_existing_step_id_does_not_suppress_injection() {
    let mut steps = vec![step("filter_new_items_seen", &[])];

    let rows = DeduplicationInjector::new("id").inject(&mut steps, &lookup_source(None), &DataRef::input("rows"));

    let ids: Vec<&str> = steps.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            "filter_new_items_seen",
            "read_reference_seen",
            "extract_ids_seen",
            "filter_new_items_seen"
        ]
    );
    assert_eq!(rows.reference(), "{{filter_new_items_seen.data}}");
}

#[test]
fn test_filter_id_colliding_with_dedup_step_fails_compilation() {
    let mut ir = create_dedup_ir();
    ir.filters[0].id = "new_items_processed".to_string();

    let output = create_compiler().compile(&ir);

    assert!(!output.is_success());
    assert!(output.errors().iter().any(|e| matches!(
        e,
        CompileError::Graph(DagError::DuplicateStepId { step_id }) if step_id == "filter_new_items_processed"
    )));
}

#[test]
fn test_dedup_runs_before_projection_and_limit() {
    let mut ir = create_dedup_ir();
    ir.transforms = serde_json::from_value(json!([
        { "id": "slim", "operation": "select_fields", "config": { "fields": ["subject", "from"] } },
        { "id": "top", "operation": "limit", "config": { "count": 10 } }
    ]))
    .unwrap();

    let workflow = create_compiler().compile(&ir).into_result().unwrap();

    assert_eq!(
        workflow.step_ids(),
        vec![
            "fetch_inbox",
            "filter_invoice_subject",
            "read_reference_processed",
            "extract_ids_processed",
            "filter_new_items_processed",
            "transform_slim",
            "transform_top",
            "render_output",
            "deliver_notify",
            "deliver_log",
        ]
    );
    assert_eq!(
        workflow.step("filter_new_items_processed").unwrap().dependencies,
        vec!["filter_invoice_subject", "extract_ids_processed"]
    );
    let slim = workflow.step("transform_slim").unwrap();
    assert_eq!(slim.dependencies, vec!["filter_new_items_processed"]);
    match &slim.kind {
        StepKind::Transform { input, .. } => {
            assert_eq!(input, "{{filter_new_items_processed.data}}")
        }
        other => panic!("Expected transform, got {:?}", other),
    }
    assert_eq!(
        workflow.step("render_output").unwrap().dependencies,
        vec!["transform_top"]
    );
}

#[test]
fn test_every_lookup_source_gets_its_own_triple() {
    let mut ir = create_dedup_ir();
    ir.data_sources.push(
        serde_json::from_value(json!({
            "id": "archived", "type": "tabular", "source": "google-sheets",
            "location": "Archive!A:A", "role": "lookup"
        }))
        .unwrap(),
    );
    let workflow = create_compiler().compile(&ir).into_result().unwrap();

    for lookup in ["processed", "archived"] {
        assert!(workflow.step(&format!("read_reference_{}", lookup)).is_some());
        assert!(workflow.step(&format!("extract_ids_{}", lookup)).is_some());
        assert!(workflow.step(&format!("filter_new_items_{}", lookup)).is_some());
    }
    assert_eq!(
        workflow.step("filter_new_items_archived").unwrap().dependencies,
        vec!["filter_new_items_processed", "extract_ids_archived"]
    );
    assert_eq!(
        workflow.step("render_output").unwrap().dependencies,
        vec!["filter_new_items_archived"]
    );
}

#[test]
fn test_dedup_compiles_identically_twice() {
    let compiler = create_compiler();
    let first = compiler.compile(&create_dedup_ir()).into_result().unwrap();
    let second = compiler.compile(&create_dedup_ir()).into_result().unwrap();

    assert_eq!(first.step_ids(), second.step_ids());
    let dedup_count = first
        .workflow_steps
        .iter()
        .filter(|s| {
            ["read_reference", "extract_ids", "filter_new_items"].contains(&s.name.as_str())
        })
        .count();
    assert_eq!(dedup_count, 3);
}

#[test]
fn test_no_lookup_means_no_dedup() {
    let workflow = create_compiler()
        .compile(&create_simple_ir())
        .into_result()
        .unwrap();
    assert!(
        workflow
            .workflow_steps
            .iter()
            .all(|s| !s.id.starts_with("read_reference_"))
    );
}
