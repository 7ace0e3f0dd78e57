use super::emitter::{DataRef, StepEmitter};
use crate::error::CompileError;
use crate::ir::{Delivery, LogicalIr};
use crate::step::{StepKind, TransformKind, WorkflowStep};
use ahash::AHashMap;
use itertools::Itertools;
use serde_json::{Map, json};

/// Defines the contract for turning one IR shape into steps.
///
/// Rules are tried in ascending `priority`; the first whose `matches` returns true
/// emits the whole workflow.
pub trait CompilationRule: Send + Sync {
    fn name(&self) -> &str;
    fn priority(&self) -> u32;
    /// The workflow category reported in the wrapper and metadata.
    fn workflow_type(&self) -> &str;
    fn matches(&self, ir: &LogicalIr) -> bool;
    fn emit(&self, emitter: &mut StepEmitter<'_>) -> Result<(), CompileError>;
}

pub const RENDER_STEP_ID: &str = "render_output";
pub const GROUP_STEP_ID: &str = "group_rows";
pub const GROUP_LOOP_STEP_ID: &str = "loop_groups";
pub const GROUP_RENDER_STEP_ID: &str = "render_group";
const GROUP_ITEM: &str = "group";

/// What a delivery hands to its sink: rendered output when the channel takes a
/// message and rendering exists, the raw rows otherwise.
fn payload_for(delivery: &Delivery, rendered: Option<&DataRef>, rows: &DataRef) -> DataRef {
    match rendered {
        Some(rendered) if delivery.method.consumes_rendered() => rendered.clone(),
        _ => rows.clone(),
    }
}

/// Ingestion, AI operations, optional rendering, then every delivery.
fn emit_linear(emitter: &mut StepEmitter<'_>) -> Result<(), CompileError> {
    let ir = emitter.ir();
    let rows = emitter.emit_ingestion()?;
    let rows = emitter.emit_ai_operations(rows)?;
    let rendered = emitter.emit_render(RENDER_STEP_ID, &rows);

    for (key, delivery) in ir.deliveries() {
        let payload = payload_for(delivery, rendered.as_ref(), &rows);
        emitter.emit_delivery(&key, delivery, &payload, &[], delivery.recipient.clone());
    }
    Ok(())
}

/// Rows are read, filtered and delivered without AI steps or routing.
pub struct SimpleTabularDelivery;

impl SimpleTabularDelivery {
    pub const NAME: &'static str = "simple_tabular_delivery";
}

impl CompilationRule for SimpleTabularDelivery {
    fn name(&self) -> &str {
        Self::NAME
    }
    fn priority(&self) -> u32 {
        40
    }
    fn workflow_type(&self) -> &str {
        "linear"
    }
    fn matches(&self, ir: &LogicalIr) -> bool {
        !ir.emits_per_group() && ir.ai_operations.is_empty() && ir.conditionals.is_empty()
    }
    fn emit(&self, emitter: &mut StepEmitter<'_>) -> Result<(), CompileError> {
        emit_linear(emitter)
    }
}

/// Like the simple shape, with AI steps enriching rows before delivery.
pub struct AiEnrichedDelivery;

impl AiEnrichedDelivery {
    pub const NAME: &'static str = "ai_enriched_delivery";
}

impl CompilationRule for AiEnrichedDelivery {
    fn name(&self) -> &str {
        Self::NAME
    }
    fn priority(&self) -> u32 {
        30
    }
    fn workflow_type(&self) -> &str {
        "ai_enriched"
    }
    fn matches(&self, ir: &LogicalIr) -> bool {
        !ir.emits_per_group() && !ir.ai_operations.is_empty() && ir.conditionals.is_empty()
    }
    fn emit(&self, emitter: &mut StepEmitter<'_>) -> Result<(), CompileError> {
        emit_linear(emitter)
    }
}

/// One result per group: rows are grouped, then a loop renders and delivers each
/// group to its own recipient.
pub struct GroupedTabularDelivery;

impl GroupedTabularDelivery {
    pub const NAME: &'static str = "grouped_tabular_delivery";
}

impl CompilationRule for GroupedTabularDelivery {
    fn name(&self) -> &str {
        Self::NAME
    }
    fn priority(&self) -> u32 {
        10
    }
    fn workflow_type(&self) -> &str {
        "grouped"
    }
    fn matches(&self, ir: &LogicalIr) -> bool {
        ir.emits_per_group() && ir.group_by().is_some() && ir.conditionals.is_empty()
    }

    fn emit(&self, emitter: &mut StepEmitter<'_>) -> Result<(), CompileError> {
        let ir = emitter.ir();
        let group_by = ir.group_by().ok_or_else(|| CompileError::NoMatchingRule {
            shape: ir.shape_summary(),
        })?;

        let rows = emitter.emit_ingestion()?;
        let rows = emitter.emit_ai_operations(rows)?;

        let mut group_config = Map::new();
        group_config.insert("group_by".into(), json!(group_by));
        emitter.push(
            WorkflowStep::new(
                GROUP_STEP_ID,
                format!("Group rows by {}", group_by),
                StepKind::Transform {
                    operation: TransformKind::GroupBy,
                    input: rows.reference(),
                    config: group_config,
                },
            )
            .with_dependencies(rows.dependencies()),
        );

        // Messaging deliveries run once per group; data sinks take every row once.
        let (per_group, once): (Vec<(String, &Delivery)>, Vec<(String, &Delivery)>) = ir
            .deliveries()
            .partition(|(_, d)| d.method.consumes_rendered() || d.recipient_source.is_some());
        let renders = ir
            .rendering
            .as_ref()
            .is_some_and(|r| r.kind != crate::ir::RenderingKind::None);

        let body: Vec<String> = renders
            .then(|| GROUP_RENDER_STEP_ID.to_string())
            .into_iter()
            .chain(
                per_group
                    .iter()
                    .map(|(key, _)| StepEmitter::delivery_step_id(key)),
            )
            .collect();
        let groups = DataRef::step(GROUP_STEP_ID);
        emitter.push(
            WorkflowStep::new(
                GROUP_LOOP_STEP_ID,
                "For each group",
                StepKind::Loop {
                    iterate_over: groups.reference(),
                    item_name: GROUP_ITEM.to_string(),
                    body,
                    max_iterations: None,
                    max_concurrency: None,
                },
            )
            .with_dependencies([GROUP_STEP_ID]),
        );

        let group_rows = DataRef {
            step_id: Some(GROUP_LOOP_STEP_ID.to_string()),
            path: format!("{}.rows", GROUP_ITEM),
        };
        let rendered = emitter.emit_render(GROUP_RENDER_STEP_ID, &group_rows);
        for (key, delivery) in &per_group {
            let payload = payload_for(delivery, rendered.as_ref(), &group_rows);
            let recipient = match (&delivery.recipient_source, &delivery.recipient) {
                (Some(field), _) => Some(format!("{{{{{}.{}}}}}", GROUP_ITEM, field)),
                (None, recipient) => recipient.clone(),
            };
            emitter.emit_delivery(key, delivery, &payload, &[], recipient);
        }

        let after_loop = [GROUP_LOOP_STEP_ID.to_string()];
        for (key, delivery) in &once {
            emitter.emit_delivery(key, delivery, &rows, &after_loop, delivery.recipient.clone());
        }
        Ok(())
    }
}

/// AI classification feeding conditional routing: each branch delivers to its own
/// sinks.
pub struct AiClassificationRoutedDelivery;

impl AiClassificationRoutedDelivery {
    pub const NAME: &'static str = "ai_classification_routed_delivery";
}

impl CompilationRule for AiClassificationRoutedDelivery {
    fn name(&self) -> &str {
        Self::NAME
    }
    fn priority(&self) -> u32 {
        20
    }
    fn workflow_type(&self) -> &str {
        "routed"
    }
    fn matches(&self, ir: &LogicalIr) -> bool {
        !ir.emits_per_group() && !ir.ai_operations.is_empty() && !ir.conditionals.is_empty()
    }

    fn emit(&self, emitter: &mut StepEmitter<'_>) -> Result<(), CompileError> {
        let ir = emitter.ir();
        let rows = emitter.emit_ingestion()?;
        let rows = emitter.emit_ai_operations(rows)?;
        let rendered = emitter.emit_render(RENDER_STEP_ID, &rows);

        let mut routes: AHashMap<&str, Vec<String>> = AHashMap::new();
        for conditional in &ir.conditionals {
            let route_id = format!("route_{}", conditional.id);
            for key in conditional
                .then_deliver
                .iter()
                .chain(&conditional.else_deliver)
            {
                routes.entry(key.as_str()).or_default().push(route_id.clone());
            }
            let to_steps = |keys: &[String]| -> Vec<String> {
                keys.iter()
                    .map(|k| StepEmitter::delivery_step_id(k))
                    .collect()
            };
            emitter.push(
                WorkflowStep::new(
                    route_id.clone(),
                    format!("Route on {}", conditional.condition.field),
                    StepKind::Conditional {
                        condition: conditional.condition.clone(),
                        then_steps: to_steps(&conditional.then_deliver),
                        else_steps: to_steps(&conditional.else_deliver),
                    },
                )
                .with_dependencies(rows.dependencies()),
            );
        }

        for (key, delivery) in ir.deliveries() {
            let payload = payload_for(delivery, rendered.as_ref(), &rows);
            let gates: Vec<String> = routes
                .get(key.as_str())
                .map(|r| r.iter().unique().cloned().collect())
                .unwrap_or_default();
            emitter.emit_delivery(&key, delivery, &payload, &gates, delivery.recipient.clone());
        }
        Ok(())
    }
}

/// Master macro wiring the built-in rules into registration and by-name creation.
macro_rules! define_compilation_rules {
    ( $( $rule:ident ),* $(,)? ) => {
        /// Adds every built-in rule to `registry`.
        pub(super) fn register_default_rules(registry: &mut Vec<Box<dyn CompilationRule>>) {
            $( registry.push(Box::new($rule)); )*
        }

        /// Creates a built-in rule from its name.
        pub fn create_rule_by_name(name: &str) -> Option<Box<dyn CompilationRule>> {
            match name {
                $( $rule::NAME => Some(Box::new($rule)), )*
                _ => None,
            }
        }

        /// Names of all built-in rules in declaration order.
        pub fn default_rule_names() -> Vec<&'static str> {
            vec![$( $rule::NAME ),*]
        }
    };
}

define_compilation_rules! {
    GroupedTabularDelivery,
    AiClassificationRoutedDelivery,
    AiEnrichedDelivery,
    SimpleTabularDelivery,
}

/// Orders a registry for selection: ascending priority, then name.
pub(super) fn sort_rules(registry: &mut [Box<dyn CompilationRule>]) {
    registry.sort_by(|a, b| {
        a.priority()
            .cmp(&b.priority())
            .then_with(|| a.name().cmp(b.name()))
    });
}
