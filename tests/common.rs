//! Common test utilities for building catalogs, IR documents and step lists.
use pilotc::catalog::ParameterSchema;
use pilotc::prelude::*;
use serde_json::{Value, json};
use std::sync::Arc;

/// A catalog with the mail, sheets, chat and helpdesk actions the fixtures use.
#[allow(dead_code)]
pub fn create_catalog() -> InMemoryCatalog {
    InMemoryCatalog::new()
        .with_action(
            "google-mail",
            "search_emails",
            ParameterSchema::with_required(["location"]),
        )
        .with_action(
            "google-mail",
            "send_email",
            ParameterSchema::with_required(["recipient", "content"]),
        )
        .with_action(
            "google-sheets",
            "read_range",
            ParameterSchema::with_required(["location"]),
        )
        .with_action(
            "google-sheets",
            "append_rows",
            ParameterSchema::with_required(["rows"]),
        )
        .with_action(
            "slack",
            "send_message",
            ParameterSchema::with_required(["recipient", "content"]),
        )
        .with_action(
            "helpdesk",
            "fetch",
            ParameterSchema::with_required(["location"]),
        )
}

#[allow(dead_code)]
pub fn create_compiler() -> Compiler {
    Compiler::builder(Arc::new(create_catalog())).build()
}

#[allow(dead_code)]
pub fn ir_from(value: Value) -> LogicalIr {
    serde_json::from_value(value).expect("fixture IR should deserialize")
}

/// New invoice emails, deduplicated against a tracking sheet, emailed as a
/// table and appended to the sheet.
#[allow(dead_code)]
pub fn create_dedup_ir() -> LogicalIr {
    ir_from(json!({
        "ir_version": "1.0",
        "goal": "Email me new invoice emails as a table and log them to the tracking sheet",
        "data_sources": [
            {
                "id": "inbox",
                "type": "tabular",
                "source": "google-mail",
                "operation": "search_emails",
                "location": "label:inbox",
                "role": "primary"
            },
            {
                "id": "processed",
                "type": "tabular",
                "source": "google-sheets",
                "location": "Processed!A:D",
                "role": "lookup",
                "key_field": "message_id",
                "match_field": "id"
            }
        ],
        "filters": [
            { "id": "invoice_subject", "field": "subject", "operator": "contains", "value": "invoice" }
        ],
        "rendering": { "type": "email_embedded_table", "columns": ["from", "subject", "date"] },
        "delivery": [
            {
                "id": "notify",
                "method": "email",
                "plugin_key": "google-mail",
                "recipient": "{{input.manager_email}}"
            },
            {
                "id": "log",
                "method": "database",
                "plugin_key": "google-sheets",
                "operation": "append_rows",
                "config": { "location": "Processed!A:D" }
            }
        ],
        "clarifications_required": []
    }))
}

/// Open leads grouped by sales rep, one table email per rep.
#[allow(dead_code)]
pub fn create_grouped_ir() -> LogicalIr {
    ir_from(json!({
        "ir_version": "1.0",
        "goal": "Send each sales rep a table of their open leads",
        "data_sources": [
            { "id": "leads", "type": "tabular", "source": "google-sheets", "location": "Leads!A:F" }
        ],
        "filters": [
            { "id": "open_only", "field": "status", "operator": "equals", "value": "open" }
        ],
        "grouping": { "group_by": "sales_rep", "emit_per_group": true },
        "rendering": { "type": "table" },
        "delivery": [
            {
                "id": "rep_digest",
                "method": "email",
                "plugin_key": "google-mail",
                "recipient_source": "sales_rep_email"
            }
        ],
        "clarifications_required": []
    }))
}

/// New tickets classified by urgency, urgent ones paged to chat, the rest queued.
#[allow(dead_code)]
pub fn create_routed_ir() -> LogicalIr {
    ir_from(json!({
        "ir_version": "1.0",
        "goal": "Page on-call about urgent tickets and queue the rest",
        "data_sources": [
            { "id": "tickets", "type": "api", "source": "helpdesk", "location": "/tickets?status=new" }
        ],
        "ai_operations": [
            {
                "id": "triage",
                "type": "classify",
                "instruction": "Classify the ticket urgency",
                "input_field": "body",
                "labels": ["urgent", "normal"]
            }
        ],
        "conditionals": [
            {
                "id": "is_urgent",
                "condition": { "field": "classification", "operator": "equals", "value": "urgent" },
                "then_deliver": ["page_oncall"],
                "else_deliver": ["queue"]
            }
        ],
        "delivery": [
            { "id": "page_oncall", "method": "chat", "plugin_key": "slack", "recipient": "#oncall" },
            {
                "id": "queue",
                "method": "database",
                "plugin_key": "google-sheets",
                "operation": "append_rows"
            }
        ],
        "clarifications_required": []
    }))
}

/// A plain read-filter-email flow.
#[allow(dead_code)]
pub fn create_simple_ir() -> LogicalIr {
    ir_from(json!({
        "ir_version": "1.0",
        "goal": "Email overdue invoices",
        "data_sources": [
            { "id": "invoices", "type": "tabular", "source": "google-sheets", "location": "Invoices!A:E" }
        ],
        "filters": [
            { "id": "overdue", "field": "status", "operator": "equals", "value": "overdue" }
        ],
        "rendering": { "type": "table" },
        "delivery": [
            {
                "id": "finance",
                "method": "email",
                "plugin_key": "google-mail",
                "recipient": "finance@example.com"
            }
        ],
        "clarifications_required": []
    }))
}

/// Creates an action step with the given dependencies.
#[allow(dead_code)]
pub fn step(id: &str, dependencies: &[&str]) -> WorkflowStep {
    WorkflowStep::new(
        id,
        id,
        StepKind::Action {
            plugin: "test".to_string(),
            operation: "noop".to_string(),
            params: serde_json::Map::new(),
        },
    )
    .with_dependencies(dependencies.iter().copied())
}

/// Position of `id` in `order`, panicking if absent.
#[allow(dead_code)]
pub fn position(order: &[String], id: &str) -> usize {
    order
        .iter()
        .position(|s| s == id)
        .unwrap_or_else(|| panic!("'{}' missing from order {:?}", id, order))
}
