use super::schema::{Filter, FilterOperator, LogicalIr};
use crate::config::CompilerConfig;
use crate::error::{CompileError, Warning};
use ahash::AHashSet;
use itertools::Itertools;
use serde_json::Value;

/// Checks the IR for defects that make compilation pointless. All findings are
/// collected rather than stopping at the first one.
pub fn validate_ir(ir: &LogicalIr, config: &CompilerConfig) -> Vec<CompileError> {
    let mut errors = Vec::new();

    let major = ir
        .ir_version
        .trim()
        .trim_start_matches('v')
        .split('.')
        .next()
        .and_then(|m| m.parse::<u32>().ok());
    if major != Some(config.supported_ir_major) {
        errors.push(CompileError::UnsupportedIrVersion {
            found: ir.ir_version.clone(),
            supported: config.supported_ir_major,
        });
    }

    let outstanding: Vec<String> = ir
        .clarifications_required
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();
    if !outstanding.is_empty() {
        errors.push(CompileError::ClarificationsRequired(outstanding));
    }

    if ir.data_sources.is_empty() {
        errors.push(CompileError::MissingDataSource);
    } else if ir.candidate_sources().next().is_none() {
        errors.push(CompileError::MissingPrimarySource);
    }
    if ir.delivery.is_empty() {
        errors.push(CompileError::MissingDelivery);
    }

    check_duplicate_ids(ir, &mut errors);
    check_references(ir, &mut errors);
    errors
}

fn check_duplicate_ids(ir: &LogicalIr, errors: &mut Vec<CompileError>) {
    let ids = ir
        .data_sources
        .iter()
        .map(|s| s.id.clone())
        .chain(ir.filters.iter().map(|f| f.id.clone()))
        .chain(ir.transforms.iter().map(|t| t.id.clone()))
        .chain(ir.ai_operations.iter().map(|a| a.id.clone()))
        .chain(ir.partitions.iter().map(|p| p.id.clone()))
        .chain(ir.loops.iter().map(|l| l.id.clone()))
        .chain(ir.conditionals.iter().map(|c| c.id.clone()))
        .chain(ir.deliveries().map(|(key, _)| key));

    for duplicate in ids.duplicates() {
        errors.push(CompileError::DuplicateIrId(duplicate));
    }
}

fn check_references(ir: &LogicalIr, errors: &mut Vec<CompileError>) {
    // Units whose output can be depended on or iterated over.
    let units: AHashSet<&str> = ir
        .data_sources
        .iter()
        .map(|s| s.id.as_str())
        .chain(ir.filters.iter().map(|f| f.id.as_str()))
        .chain(ir.transforms.iter().map(|t| t.id.as_str()))
        .chain(ir.ai_operations.iter().map(|a| a.id.as_str()))
        .chain(ir.partitions.iter().map(|p| p.id.as_str()))
        .chain(ir.loops.iter().map(|l| l.id.as_str()))
        .collect();
    // Units that may run inside a loop body.
    let body_units: AHashSet<&str> = ir
        .filters
        .iter()
        .map(|f| f.id.as_str())
        .chain(ir.transforms.iter().map(|t| t.id.as_str()))
        .chain(ir.ai_operations.iter().map(|a| a.id.as_str()))
        .chain(ir.partitions.iter().map(|p| p.id.as_str()))
        .collect();
    let deliveries: AHashSet<String> = ir.deliveries().map(|(key, _)| key).collect();

    let mut unknown = |referrer: &str, missing: &str| {
        errors.push(CompileError::UnknownReference {
            referrer: referrer.to_string(),
            missing: missing.to_string(),
        });
    };

    let depends = ir
        .filters
        .iter()
        .map(|f| (&f.id, &f.depends_on))
        .chain(ir.transforms.iter().map(|t| (&t.id, &t.depends_on)))
        .chain(ir.ai_operations.iter().map(|a| (&a.id, &a.depends_on)))
        .chain(ir.partitions.iter().map(|p| (&p.id, &p.depends_on)));
    for (id, deps) in depends {
        for dep in deps.iter().filter(|d| !units.contains(d.as_str())) {
            unknown(id, dep);
        }
    }

    for spec in &ir.loops {
        if !units.contains(spec.iterate_over.as_str()) {
            unknown(&spec.id, &spec.iterate_over);
        }
        for member in spec.body.iter().filter(|m| !body_units.contains(m.as_str())) {
            unknown(&spec.id, member);
        }
    }

    for conditional in &ir.conditionals {
        let targets = conditional
            .then_deliver
            .iter()
            .chain(conditional.else_deliver.iter());
        for target in targets.filter(|t| !deliveries.contains(t.as_str())) {
            unknown(&conditional.id, target);
        }
    }
}

/// Flags filters on the same field that no row can satisfy at once.
pub fn analyze_filters(ir: &LogicalIr) -> Vec<Warning> {
    let by_field = ir.filters.iter().into_group_map_by(|f| f.field.as_str());

    ir.filters
        .iter()
        .map(|f| f.field.as_str())
        .unique()
        .filter_map(|field| {
            let filters = by_field.get(field)?;
            let conflicting: Vec<String> = filters
                .iter()
                .tuple_combinations()
                .filter(|(a, b)| contradicts(a, b) || contradicts(b, a))
                .flat_map(|(a, b)| [a.id.clone(), b.id.clone()])
                .unique()
                .collect();
            (!conflicting.is_empty()).then(|| Warning::FilterDropsAllRows {
                field: field.to_string(),
                filter_ids: conflicting,
            })
        })
        .collect()
}

fn contradicts(a: &Filter, b: &Filter) -> bool {
    use FilterOperator::*;
    match (a.operator, b.operator) {
        (Equals, Equals) => a.value.is_some() && b.value.is_some() && a.value != b.value,
        (Equals, NotEquals) => a.value.is_some() && a.value == b.value,
        (IsEmpty, IsNotEmpty) => true,
        (GreaterThan, LessThan) => match (as_number(&a.value), as_number(&b.value)) {
            (Some(lower), Some(upper)) => lower >= upper,
            _ => false,
        },
        _ => false,
    }
}

fn as_number(value: &Option<Value>) -> Option<f64> {
    value.as_ref().and_then(Value::as_f64)
}
