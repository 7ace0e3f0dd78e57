use crate::ir::{EdgeCase, LogicalIr};
use crate::step::WorkflowStep;
use itertools::Itertools;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Agent-level metadata surrounding the compiled steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DslWrapper {
    pub agent_name: String,
    pub description: String,
    pub workflow_type: String,
    /// Every plugin an action step references, sorted and unique.
    pub suggested_plugins: Vec<String>,
    /// Runtime inputs referenced as `{{input.<name>}}`, in order of first appearance.
    pub required_inputs: Vec<String>,
    pub suggested_outputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edge_cases: Vec<EdgeCase>,
}

const AGENT_NAME_WORDS: usize = 6;

fn input_placeholder() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*input\.([A-Za-z0-9_]+)\s*\}\}").expect("placeholder pattern is valid")
    })
}

impl DslWrapper {
    pub fn build(ir: &LogicalIr, steps: &[WorkflowStep], workflow_type: &str) -> Self {
        Self {
            agent_name: agent_name(&ir.goal),
            description: ir.goal.clone(),
            workflow_type: workflow_type.to_string(),
            suggested_plugins: suggested_plugins(steps),
            required_inputs: required_inputs(steps),
            suggested_outputs: suggested_outputs(ir),
            edge_cases: ir.edge_cases.clone(),
        }
    }
}

/// Title-cases the first few words of the goal.
fn agent_name(goal: &str) -> String {
    let name = goal
        .split_whitespace()
        .take(AGENT_NAME_WORDS)
        .map(|word| {
            let word: String = word.chars().filter(|c| c.is_alphanumeric()).collect();
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .filter(|w| !w.is_empty())
        .join(" ");
    if name.is_empty() {
        "Workflow Agent".to_string()
    } else {
        name
    }
}

fn suggested_plugins(steps: &[WorkflowStep]) -> Vec<String> {
    steps
        .iter()
        .filter_map(WorkflowStep::plugin_operation)
        .map(|(plugin, _)| plugin.to_string())
        .sorted()
        .dedup()
        .collect()
}

fn required_inputs(steps: &[WorkflowStep]) -> Vec<String> {
    let pattern = input_placeholder();
    steps
        .iter()
        .flat_map(WorkflowStep::string_values)
        .flat_map(|value| {
            pattern
                .captures_iter(value)
                .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
                .collect::<Vec<_>>()
        })
        .unique()
        .collect()
}

fn suggested_outputs(ir: &LogicalIr) -> Vec<String> {
    ir.rendering
        .iter()
        .map(|r| r.kind.to_string())
        .chain(
            ir.deliveries()
                .map(|(key, d)| format!("{} via {}", key, d.method)),
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_name_title_cases_leading_words() {
        assert_eq!(
            agent_name("send me new invoice emails, each week, as a table please"),
            "Send Me New Invoice Emails Each"
        );
        assert_eq!(agent_name("   "), "Workflow Agent");
    }

    #[test]
    fn placeholder_pattern_accepts_padding() {
        let caps = input_placeholder().captures("to {{ input.manager_email }}").unwrap();
        assert_eq!(&caps[1], "manager_email");
    }
}
