use super::emitter::DataRef;
use crate::ir::DataSource;
use crate::step::{StepKind, TransformKind, WorkflowStep};
use serde_json::{Map, json};
use std::collections::BTreeSet;
use tracing::debug;

/// Inserts the read-reference / extract-ids / filter-new-items triple that keeps
/// already-processed records out of the pipeline.
///
/// Injection is keyed by the lookup source id: asking twice for the same lookup
/// adds nothing. Step ids already taken by other steps are left for graph
/// validation to report as duplicates.
#[derive(Debug, Clone)]
pub struct DeduplicationInjector {
    default_key_field: String,
    injected: BTreeSet<String>,
}

impl DeduplicationInjector {
    pub fn new(default_key_field: &str) -> Self {
        Self {
            default_key_field: default_key_field.to_string(),
            injected: BTreeSet::new(),
        }
    }

    pub fn read_step_id(lookup_id: &str) -> String {
        format!("read_reference_{}", lookup_id)
    }

    pub fn extract_step_id(lookup_id: &str) -> String {
        format!("extract_ids_{}", lookup_id)
    }

    pub fn filter_step_id(lookup_id: &str) -> String {
        format!("filter_new_items_{}", lookup_id)
    }

    /// Adds the triple for `lookup` in front of `candidates` and returns the
    /// deduplicated row set.
    pub fn inject(
        &mut self,
        steps: &mut Vec<WorkflowStep>,
        lookup: &DataSource,
        candidates: &DataRef,
    ) -> DataRef {
        let read_id = Self::read_step_id(&lookup.id);
        let extract_id = Self::extract_step_id(&lookup.id);
        let filter_id = Self::filter_step_id(&lookup.id);

        if self.injected.contains(&lookup.id) {
            debug!(lookup = %lookup.id, "deduplication already present");
            return DataRef::step(filter_id);
        }

        let key_field = lookup
            .key_field
            .clone()
            .unwrap_or_else(|| self.default_key_field.clone());
        let match_field = lookup.match_field.clone().unwrap_or_else(|| key_field.clone());

        let mut read_params = Map::new();
        read_params.insert("location".into(), json!(lookup.location));
        read_params.extend(lookup.config.clone());
        steps.push(WorkflowStep::new(
            read_id.clone(),
            "read_reference",
            StepKind::Action {
                plugin: lookup.source.clone(),
                operation: lookup.read_operation().unwrap_or("read").to_string(),
                params: read_params,
            },
        ));

        let mut extract_config = Map::new();
        extract_config.insert("key_field".into(), json!(key_field));
        steps.push(
            WorkflowStep::new(
                extract_id.clone(),
                "extract_ids",
                StepKind::Transform {
                    operation: TransformKind::ExtractKeys,
                    input: DataRef::step(read_id.as_str()).reference(),
                    config: extract_config,
                },
            )
            .with_dependencies([read_id]),
        );

        let mut filter_config = Map::new();
        filter_config.insert("match_field".into(), json!(match_field));
        filter_config.insert(
            "known_keys".into(),
            json!(DataRef::step(extract_id.as_str()).reference()),
        );
        let dependencies: Vec<String> = candidates
            .dependencies()
            .into_iter()
            .chain(std::iter::once(extract_id))
            .collect();
        steps.push(
            WorkflowStep::new(
                filter_id.clone(),
                "filter_new_items",
                StepKind::Transform {
                    operation: TransformKind::ExcludeKnown,
                    input: candidates.reference(),
                    config: filter_config,
                },
            )
            .with_dependencies(dependencies),
        );

        debug!(lookup = %lookup.id, key_field = %key_field, "injected deduplication");
        self.injected.insert(lookup.id.clone());
        DataRef::step(filter_id)
    }

    pub fn injected(&self) -> impl Iterator<Item = &str> {
        self.injected.iter().map(String::as_str)
    }
}
