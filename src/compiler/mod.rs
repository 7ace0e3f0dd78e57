//! Turns a `LogicalIr` into a validated, dependency-annotated step list.
//!
//! Compilation is a fixed sequence: IR-level checks, rule selection, step
//! emission, capability checks against the catalog, and finally graph
//! validation. Every stage collects all of its errors before the run stops.
use crate::catalog::CapabilityCatalog;
use crate::config::CompilerConfig;
use crate::dag::{DagValidation, DagValidator};
use crate::error::{CompileError, Diagnostic, Warning};
use crate::ir::{IntoLogicalIr, LogicalIr, analyze_filters, validate_ir};
use crate::step::WorkflowStep;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub mod cache;
pub mod dedup;
pub mod emitter;
pub mod output;
pub mod rules;
pub mod wrapper;

pub use dedup::DeduplicationInjector;
pub use emitter::{DataRef, StepEmitter};
pub use output::{CompilationFailure, CompilationMetadata, CompilationOutput, CompiledWorkflow};
pub use rules::{CompilationRule, create_rule_by_name, default_rule_names};
pub use wrapper::DslWrapper;

use rules::{register_default_rules, sort_rules};

pub struct Compiler {
    catalog: Arc<dyn CapabilityCatalog>,
    config: CompilerConfig,
    rules: Vec<Box<dyn CompilationRule>>,
}

pub struct CompilerBuilder {
    catalog: Arc<dyn CapabilityCatalog>,
    config: CompilerConfig,
    rules: Vec<Box<dyn CompilationRule>>,
}

impl CompilerBuilder {
    pub fn new(catalog: Arc<dyn CapabilityCatalog>) -> Self {
        let mut rules: Vec<Box<dyn CompilationRule>> = Vec::new();
        register_default_rules(&mut rules);
        Self {
            catalog,
            config: CompilerConfig::default(),
            rules,
        }
    }

    pub fn with_config(mut self, config: CompilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds a rule, replacing any registered rule of the same name.
    pub fn with_custom_rule(mut self, rule: Box<dyn CompilationRule>) -> Self {
        self.rules.retain(|r| r.name() != rule.name());
        self.rules.push(rule);
        self
    }

    pub fn without_rule(mut self, name: &str) -> Self {
        self.rules.retain(|r| r.name() != name);
        self
    }

    pub fn build(mut self) -> Compiler {
        sort_rules(&mut self.rules);
        Compiler {
            catalog: self.catalog,
            config: self.config,
            rules: self.rules,
        }
    }
}

impl Compiler {
    pub fn builder(catalog: Arc<dyn CapabilityCatalog>) -> CompilerBuilder {
        CompilerBuilder::new(catalog)
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Registered rule names in selection order.
    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// The first rule, in priority order, that accepts the IR's shape.
    pub fn select_rule(&self, ir: &LogicalIr) -> Result<&dyn CompilationRule, CompileError> {
        self.rules
            .iter()
            .find(|rule| rule.matches(ir))
            .map(|rule| rule.as_ref())
            .ok_or_else(|| CompileError::NoMatchingRule {
                shape: ir.shape_summary(),
            })
    }

    /// Parses an IR document and compiles it.
    pub fn compile_json(&self, json: &str) -> CompilationOutput {
        match LogicalIr::from_json(json) {
            Ok(ir) => self.compile(&ir),
            Err(err) => Self::fail(vec![err], Vec::new()),
        }
    }

    /// Converts any pre-IR form and compiles the result.
    pub fn compile_from<T: IntoLogicalIr>(&self, source: T) -> CompilationOutput {
        match source.into_logical_ir() {
            Ok(ir) => self.compile(&ir),
            Err(err) => Self::fail(vec![CompileError::InvalidIr(err.to_string())], Vec::new()),
        }
    }

    pub fn compile(&self, ir: &LogicalIr) -> CompilationOutput {
        let started = Instant::now();
        let mut warnings = analyze_filters(ir);

        let errors = validate_ir(ir, &self.config);
        if !errors.is_empty() {
            warn!(error_count = errors.len(), "IR rejected before rule selection");
            return Self::fail(errors, warnings);
        }

        let rule = match self.select_rule(ir) {
            Ok(rule) => rule,
            Err(err) => {
                warn!(shape = %ir.shape_summary(), "no compilation rule matched");
                return Self::fail(vec![err], warnings);
            }
        };
        debug!(rule = rule.name(), "selected compilation rule");

        let mut emitter = StepEmitter::new(ir, &self.config);
        let steps = match rule.emit(&mut emitter).and_then(|()| emitter.finish()) {
            Ok(steps) => steps,
            Err(err) => return Self::fail(vec![err], warnings),
        };

        let (mut errors, capability_warnings) = self.check_capabilities(&steps);
        warnings.extend(capability_warnings);

        let analysis = match DagValidator::new(&self.config).validate(&steps) {
            DagValidation::Valid {
                analysis,
                warnings: graph_warnings,
            } => {
                warnings.extend(graph_warnings);
                Some(analysis)
            }
            DagValidation::Invalid { errors: graph_errors } => {
                errors.extend(graph_errors.into_iter().map(CompileError::from));
                None
            }
        };

        let analysis = match analysis {
            Some(analysis) if errors.is_empty() => analysis,
            _ => {
                warn!(
                    rule = rule.name(),
                    error_count = errors.len(),
                    "emitted workflow failed validation"
                );
                return Self::fail(errors, warnings);
            }
        };

        let elapsed_ms = (started.elapsed().as_secs_f64() * 1_000_000.0).round() / 1000.0;
        let metadata = output::CompilationMetadata::describe(
            &steps,
            rule.name(),
            rule.workflow_type(),
            &ir.ir_version,
            elapsed_ms,
        );
        let dsl_wrapper = DslWrapper::build(ir, &steps, rule.workflow_type());

        info!(
            rule = rule.name(),
            steps = steps.len(),
            warnings = warnings.len(),
            elapsed_ms,
            "compiled workflow"
        );
        CompilationOutput::Success(Box::new(CompiledWorkflow {
            workflow_steps: steps,
            dsl_wrapper,
            metadata,
            execution_plan: analysis,
            warnings: warnings.iter().map(Diagnostic::from).collect(),
        }))
    }

    /// Checks every action against the catalog. Unknown plugins and operations
    /// are errors; a missing required parameter is only a warning.
    fn check_capabilities(&self, steps: &[WorkflowStep]) -> (Vec<CompileError>, Vec<Warning>) {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for step in steps {
            let Some((plugin, operation)) = step.plugin_operation() else {
                continue;
            };
            if !self.catalog.has_plugin(plugin) {
                errors.push(CompileError::UnknownPlugin {
                    step_id: step.id.clone(),
                    plugin: plugin.to_string(),
                });
                continue;
            }
            let Some(schema) = self.catalog.action_schema(plugin, operation) else {
                errors.push(CompileError::UnknownOperation {
                    step_id: step.id.clone(),
                    plugin: plugin.to_string(),
                    operation: operation.to_string(),
                });
                continue;
            };
            if let crate::step::StepKind::Action { params, .. } = &step.kind {
                warnings.extend(
                    schema
                        .required
                        .iter()
                        .filter(|p| !params.contains_key(p.as_str()))
                        .map(|p| Warning::MissingActionParameter {
                            step_id: step.id.clone(),
                            plugin: plugin.to_string(),
                            operation: operation.to_string(),
                            parameter: p.clone(),
                        }),
                );
            }
        }
        (errors, warnings)
    }

    fn fail(errors: Vec<CompileError>, warnings: Vec<Warning>) -> CompilationOutput {
        CompilationOutput::Failure(CompilationFailure { errors, warnings })
    }
}
