use super::dedup::DeduplicationInjector;
use crate::config::CompilerConfig;
use crate::error::CompileError;
use crate::ir::*;
use crate::step::{StepKind, TransformKind, WorkflowStep};
use ahash::{AHashMap, AHashSet};
use itertools::Itertools;
use serde_json::{Map, Value, json};

/// A handle on data flowing between steps: the step that produces it (if any)
/// and the placeholder path the runtime resolves, e.g. `fetch_inbox.data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRef {
    pub step_id: Option<String>,
    pub path: String,
}

impl DataRef {
    /// The `data` output of a step.
    pub fn step(step_id: impl Into<String>) -> Self {
        let step_id = step_id.into();
        Self {
            path: format!("{}.data", step_id),
            step_id: Some(step_id),
        }
    }

    /// A runtime-supplied input that no step produces.
    pub fn input(name: &str) -> Self {
        Self {
            step_id: None,
            path: format!("input.{}", name),
        }
    }

    /// A loop item, available once the loop step has started.
    pub fn loop_item(loop_step_id: &str, item_name: &str) -> Self {
        Self {
            step_id: Some(loop_step_id.to_string()),
            path: item_name.to_string(),
        }
    }

    pub fn reference(&self) -> String {
        format!("{{{{{}}}}}", self.path)
    }

    /// Placeholder for one field of the referenced data.
    pub fn field(&self, field: &str) -> String {
        format!("{{{{{}.{}}}}}", self.path, field)
    }

    pub fn dependencies(&self) -> Vec<String> {
        self.step_id.iter().cloned().collect()
    }
}

/// A processing unit of the IR that becomes exactly one step.
#[derive(Debug, Clone, Copy)]
enum Unit<'a> {
    Filter(&'a Filter),
    Partition(&'a Partition),
    Transform(&'a Transform),
    Ai(&'a AiOperation),
}

impl<'a> Unit<'a> {
    fn id(&self) -> &'a str {
        match self {
            Unit::Filter(f) => &f.id,
            Unit::Partition(p) => &p.id,
            Unit::Transform(t) => &t.id,
            Unit::Ai(a) => &a.id,
        }
    }

    fn depends_on(&self) -> &'a [String] {
        match self {
            Unit::Filter(f) => &f.depends_on,
            Unit::Partition(p) => &p.depends_on,
            Unit::Transform(t) => &t.depends_on,
            Unit::Ai(a) => &a.depends_on,
        }
    }

    fn step_id(&self) -> String {
        match self {
            Unit::Filter(f) => format!("filter_{}", f.id),
            Unit::Partition(p) => format!("partition_{}", p.id),
            Unit::Transform(t) => format!("transform_{}", t.id),
            Unit::Ai(a) => format!("ai_{}", a.id),
        }
    }

    fn to_step(self, input: &DataRef) -> WorkflowStep {
        match self {
            Unit::Filter(f) => {
                let mut config = Map::new();
                config.insert("field".into(), json!(f.field));
                config.insert("operator".into(), json!(f.operator));
                if let Some(value) = &f.value {
                    config.insert("value".into(), value.clone());
                }
                WorkflowStep::new(
                    self.step_id(),
                    format!("Filter rows where {} {:?}", f.field, f.operator),
                    StepKind::Transform {
                        operation: TransformKind::Filter,
                        input: input.reference(),
                        config,
                    },
                )
            }
            Unit::Partition(p) => {
                let mut config = Map::new();
                config.insert("field".into(), json!(p.field));
                config.insert("buckets".into(), json!(p.buckets));
                WorkflowStep::new(
                    self.step_id(),
                    format!("Partition rows by {}", p.field),
                    StepKind::Transform {
                        operation: TransformKind::Partition,
                        input: input.reference(),
                        config,
                    },
                )
            }
            Unit::Transform(t) => WorkflowStep::new(
                self.step_id(),
                format!("{:?} rows", t.operation),
                StepKind::Transform {
                    operation: transform_kind(t.operation),
                    input: input.reference(),
                    config: t.config.clone(),
                },
            ),
            Unit::Ai(a) => {
                let input = match &a.input_field {
                    Some(field) => input.field(field),
                    None => input.reference(),
                };
                WorkflowStep::new(
                    self.step_id(),
                    format!("AI {:?}", a.kind),
                    StepKind::AiProcessing {
                        instruction: a.instruction.clone(),
                        input,
                        output_schema: a.output_schema.clone().or_else(|| label_schema(a)),
                        labels: a.labels.clone(),
                    },
                )
            }
        }
    }
}

fn transform_kind(operation: TransformOperation) -> TransformKind {
    match operation {
        TransformOperation::Map => TransformKind::Map,
        TransformOperation::Sort => TransformKind::Sort,
        TransformOperation::Deduplicate => TransformKind::Deduplicate,
        TransformOperation::Aggregate => TransformKind::Aggregate,
        TransformOperation::Flatten => TransformKind::Flatten,
        TransformOperation::SelectFields => TransformKind::SelectFields,
        TransformOperation::Limit => TransformKind::Limit,
    }
}

/// Classification without an explicit schema answers with one of its labels.
fn label_schema(operation: &AiOperation) -> Option<Value> {
    (operation.kind == AiOperationKind::Classify && !operation.labels.is_empty()).then(|| {
        json!({
            "type": "object",
            "properties": {
                "classification": { "type": "string", "enum": operation.labels }
            },
            "required": ["classification"]
        })
    })
}

/// Builds the step list for one compilation. Rules drive the emitter; it owns the
/// shared mechanics (source reads, the processing chain, IR loops, deduplication,
/// rendering and delivery steps) so every rule wires them the same way.
pub struct StepEmitter<'a> {
    ir: &'a LogicalIr,
    config: &'a CompilerConfig,
    steps: Vec<WorkflowStep>,
    /// Where the output of every IR unit can be found, keyed by IR id.
    planned: AHashMap<&'a str, DataRef>,
    body_units: AHashSet<&'a str>,
    emitted_loops: AHashSet<&'a str>,
    dedup: DeduplicationInjector,
}

impl<'a> StepEmitter<'a> {
    pub fn new(ir: &'a LogicalIr, config: &'a CompilerConfig) -> Self {
        let mut planned: AHashMap<&'a str, DataRef> = AHashMap::new();
        for source in &ir.data_sources {
            let location = match (source.role, source.read_operation()) {
                (SourceRole::Lookup, _) => {
                    DataRef::step(DeduplicationInjector::read_step_id(&source.id))
                }
                (_, Some(_)) => DataRef::step(format!("fetch_{}", source.id)),
                (_, None) => DataRef::input(&source.id),
            };
            planned.insert(source.id.as_str(), location);
        }
        for unit in Self::all_units(ir) {
            planned.insert(unit.id(), DataRef::step(unit.step_id()));
        }
        for spec in &ir.loops {
            planned.insert(spec.id.as_str(), DataRef::step(format!("loop_{}", spec.id)));
        }

        Self {
            ir,
            config,
            steps: Vec::new(),
            planned,
            body_units: ir
                .loops
                .iter()
                .flat_map(|l| l.body.iter().map(String::as_str))
                .collect(),
            emitted_loops: AHashSet::new(),
            dedup: DeduplicationInjector::new(&config.default_key_field),
        }
    }

    fn all_units(ir: &'a LogicalIr) -> impl Iterator<Item = Unit<'a>> {
        ir.filters
            .iter()
            .map(Unit::Filter)
            .chain(ir.partitions.iter().map(Unit::Partition))
            .chain(ir.transforms.iter().map(Unit::Transform))
            .chain(ir.ai_operations.iter().map(Unit::Ai))
    }

    pub fn ir(&self) -> &'a LogicalIr {
        self.ir
    }

    pub fn config(&self) -> &'a CompilerConfig {
        self.config
    }

    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    pub fn push(&mut self, step: WorkflowStep) {
        self.steps.push(step);
    }

    /// Reads every source, applies the filters, deduplicates against each lookup
    /// source, then runs the rest of the deterministic chain (partitions,
    /// transforms and any IR loops over them). Returns the resulting row set.
    ///
    /// Deduplication sees rows with their original fields, before any projection,
    /// limit or aggregation reshapes them.
    pub fn emit_ingestion(&mut self) -> Result<DataRef, CompileError> {
        let mut rows = self.emit_sources()?;

        let (filters, reshaping): (Vec<Unit<'a>>, Vec<Unit<'a>>) = Self::all_units(self.ir)
            .filter(|u| !matches!(u, Unit::Ai(_)))
            .filter(|u| !self.body_units.contains(u.id()))
            .partition(|u| matches!(u, Unit::Filter(_)));
        for unit in filters {
            rows = self.emit_unit(unit, &rows)?;
        }

        let ir = self.ir;
        for lookup in ir.lookup_sources() {
            rows = self.dedup.inject(&mut self.steps, lookup, &rows);
        }

        for unit in reshaping {
            rows = self.emit_unit(unit, &rows)?;
        }
        Ok(rows)
    }

    /// Chains the AI operations that are not part of a loop body.
    pub fn emit_ai_operations(&mut self, input: DataRef) -> Result<DataRef, CompileError> {
        let mut rows = input;
        let operations: Vec<Unit<'a>> = self
            .ir
            .ai_operations
            .iter()
            .map(Unit::Ai)
            .filter(|u| !self.body_units.contains(u.id()))
            .collect();
        for unit in operations {
            rows = self.emit_unit(unit, &rows)?;
        }
        Ok(rows)
    }

    fn emit_sources(&mut self) -> Result<DataRef, CompileError> {
        let ir = self.ir;
        let mut outputs = Vec::new();

        for source in ir.candidate_sources() {
            if let Some(operation) = source.read_operation() {
                let mut params = Map::new();
                params.insert("location".into(), json!(source.location));
                params.extend(source.config.clone());
                let step_id = format!("fetch_{}", source.id);
                self.steps.push(WorkflowStep::new(
                    step_id,
                    format!("Read {}", source.location),
                    StepKind::Action {
                        plugin: source.source.clone(),
                        operation: operation.to_string(),
                        params,
                    },
                ));
            }
            let output = self.planned_ref(&source.id)?;
            outputs.push(self.emit_loops_over(&source.id, output)?);
        }

        match outputs.len() {
            0 => Err(CompileError::MissingPrimarySource),
            1 => Ok(outputs.remove(0)),
            _ => {
                let dependencies: Vec<String> = outputs
                    .iter()
                    .flat_map(DataRef::dependencies)
                    .unique()
                    .collect();
                let mut config = Map::new();
                config.insert(
                    "sources".into(),
                    json!(outputs.iter().map(DataRef::reference).collect::<Vec<_>>()),
                );
                let primary = outputs[0].reference();
                self.steps.push(
                    WorkflowStep::new(
                        "merge_sources",
                        "Merge source rows",
                        StepKind::Transform {
                            operation: TransformKind::Merge,
                            input: primary,
                            config,
                        },
                    )
                    .with_dependencies(dependencies),
                );
                Ok(DataRef::step("merge_sources"))
            }
        }
    }

    fn planned_ref(&self, ir_id: &str) -> Result<DataRef, CompileError> {
        self.planned
            .get(ir_id)
            .cloned()
            .ok_or_else(|| CompileError::UnknownReference {
                referrer: "compiler".to_string(),
                missing: ir_id.to_string(),
            })
    }

    /// Emits one unit. Explicit `depends_on` replaces the default chain input;
    /// inside a loop body the loop dependency is always kept.
    fn emit_unit(&mut self, unit: Unit<'a>, chain: &DataRef) -> Result<DataRef, CompileError> {
        let (mut dependencies, input) = if unit.depends_on().is_empty() {
            (chain.dependencies(), chain.clone())
        } else {
            let refs: Vec<DataRef> = unit
                .depends_on()
                .iter()
                .map(|dep| {
                    self.planned
                        .get(dep.as_str())
                        .cloned()
                        .ok_or_else(|| CompileError::UnknownReference {
                            referrer: unit.id().to_string(),
                            missing: dep.clone(),
                        })
                })
                .collect::<Result<_, _>>()?;
            let dependencies = refs.iter().flat_map(DataRef::dependencies).collect();
            (dependencies, refs[0].clone())
        };
        if self.body_units.contains(unit.id()) {
            dependencies.extend(chain.dependencies());
        }
        let dependencies: Vec<String> = dependencies.into_iter().unique().collect();

        self.steps
            .push(unit.to_step(&input).with_dependencies(dependencies));
        self.emit_loops_over(unit.id(), DataRef::step(unit.step_id()))
    }

    /// Emits the IR loops iterating over `ir_id`, returning the output of the last
    /// one (or `output` when nothing iterates over it).
    fn emit_loops_over(&mut self, ir_id: &str, output: DataRef) -> Result<DataRef, CompileError> {
        let ir = self.ir;
        let mut result = output.clone();
        for spec in ir.loops.iter().filter(|l| l.iterate_over == ir_id) {
            if self.emitted_loops.contains(spec.id.as_str()) {
                continue;
            }
            result = self.emit_loop(spec, &output)?;
        }
        Ok(result)
    }

    fn emit_loop(&mut self, spec: &'a LoopSpec, over: &DataRef) -> Result<DataRef, CompileError> {
        self.emitted_loops.insert(spec.id.as_str());
        let loop_id = format!("loop_{}", spec.id);

        let body: Vec<String> = spec
            .body
            .iter()
            .map(|member| {
                self.planned_ref(member)
                    .map(|r| r.step_id.unwrap_or_else(|| member.clone()))
            })
            .collect::<Result<_, _>>()?;

        self.steps.push(
            WorkflowStep::new(
                loop_id.clone(),
                format!("For each {}", spec.item_name),
                StepKind::Loop {
                    iterate_over: over.reference(),
                    item_name: spec.item_name.clone(),
                    body,
                    max_iterations: spec.max_iterations,
                    max_concurrency: spec.max_concurrency,
                },
            )
            .with_dependencies(over.dependencies()),
        );

        let mut item = DataRef::loop_item(&loop_id, &spec.item_name);
        for member in &spec.body {
            let unit = Self::all_units(self.ir)
                .find(|u| u.id() == member)
                .ok_or_else(|| CompileError::UnknownReference {
                    referrer: spec.id.clone(),
                    missing: member.clone(),
                })?;
            item = self.emit_unit(unit, &item)?;
        }

        Ok(DataRef::step(loop_id))
    }

    /// Renders `input` according to the IR's rendering, if it asks for one.
    pub fn emit_render(&mut self, step_id: &str, input: &DataRef) -> Option<DataRef> {
        let rendering = self.ir.rendering.as_ref()?;
        if rendering.kind == RenderingKind::None {
            return None;
        }

        let mut config = Map::new();
        config.insert("format".into(), json!(rendering.kind));
        if !rendering.columns.is_empty() {
            config.insert("columns".into(), json!(rendering.columns));
        }
        if let Some(template) = &rendering.template {
            config.insert("template".into(), json!(template));
        }
        if let Some(message) = &rendering.empty_message {
            config.insert("empty_message".into(), json!(message));
        }
        if let Some(edge_case) = self.ir.has_edge_case(EdgeCaseCondition::NoRowsAfterFilter) {
            config.insert("on_empty".into(), json!(edge_case.action));
        }

        self.steps.push(
            WorkflowStep::new(
                step_id,
                format!("Render {}", rendering.kind),
                StepKind::Transform {
                    operation: TransformKind::Render,
                    input: input.reference(),
                    config,
                },
            )
            .with_dependencies(input.dependencies()),
        );
        Some(DataRef::step(step_id))
    }

    /// Emits the action that hands `payload` to a delivery sink and returns its id.
    pub fn emit_delivery(
        &mut self,
        key: &str,
        delivery: &Delivery,
        payload: &DataRef,
        extra_dependencies: &[String],
        recipient: Option<String>,
    ) -> String {
        let step_id = Self::delivery_step_id(key);

        let mut params = Map::new();
        if let Some(recipient) = recipient {
            params.insert("recipient".into(), json!(recipient));
        }
        let payload_key = if delivery.method.consumes_rendered() {
            "content"
        } else {
            "rows"
        };
        params.insert(payload_key.into(), json!(payload.reference()));
        if let Some(edge_case) = self.ir.has_edge_case(EdgeCaseCondition::NoRowsAfterFilter) {
            params.insert("on_empty".into(), json!(edge_case.action));
        }
        params.extend(delivery.config.clone());

        let dependencies: Vec<String> = extra_dependencies
            .iter()
            .cloned()
            .chain(payload.dependencies())
            .unique()
            .collect();

        self.steps.push(
            WorkflowStep::new(
                step_id.clone(),
                format!("Deliver via {}", delivery.method),
                StepKind::Action {
                    plugin: delivery.plugin_key.clone(),
                    operation: delivery.operation().to_string(),
                    params,
                },
            )
            .with_dependencies(dependencies),
        );
        step_id
    }

    pub fn delivery_step_id(key: &str) -> String {
        format!("deliver_{}", key)
    }

    /// Emits loops whose target never came up in the chain (e.g. loops over a
    /// lookup source or over another loop) and hands back the finished step list.
    pub fn finish(mut self) -> Result<Vec<WorkflowStep>, CompileError> {
        let ir = self.ir;
        for spec in &ir.loops {
            if self.emitted_loops.contains(spec.id.as_str()) {
                continue;
            }
            let over = self.planned_ref(&spec.iterate_over)?;
            self.emit_loop(spec, &over)?;
        }
        Ok(self.steps)
    }
}
