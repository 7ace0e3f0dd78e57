use super::DagAnalysis;
use crate::step::WorkflowStep;
use ahash::AHashMap;
use std::fmt::Write;

/// Formats a validated execution plan into a human-readable string.
pub fn render_execution_plan(name: &str, steps: &[WorkflowStep], analysis: &DagAnalysis) -> String {
    let by_id: AHashMap<&str, &WorkflowStep> = steps.iter().map(|s| (s.id.as_str(), s)).collect();
    let mut output = String::new();
    let _ = writeln!(output, "======== EXECUTION PLAN for: {} ========", name);

    // 1. Steps in execution order, indented by depth.
    let _ = writeln!(output, "\n--- ORDER ---");
    for (i, id) in analysis.topological_order.iter().enumerate() {
        let depth = analysis.depths.get(id).copied().unwrap_or(0);
        let label = by_id
            .get(id.as_str())
            .map_or_else(|| id.clone(), |step| step.to_string());
        let _ = writeln!(output, "{:04}: {}{}", i, "  ".repeat(depth), label);
    }

    // 2. Groups the runtime may execute concurrently.
    if !analysis.parallel_batches.is_empty() {
        let _ = writeln!(output, "\n--- PARALLEL BATCHES ---");
        for batch in &analysis.parallel_batches {
            let _ = writeln!(
                output,
                "depth {:>2}: {}",
                batch.depth,
                batch.step_ids.join(" | ")
            );
        }
    }

    let _ = writeln!(
        output,
        "\n--- CRITICAL PATH ({} steps, max depth {}) ---",
        analysis.critical_path.length, analysis.max_depth
    );
    let _ = writeln!(output, "{}", analysis.critical_path.steps.join(" -> "));
    let _ = writeln!(output, "\n================ END OF PLAN ================");
    output
}
