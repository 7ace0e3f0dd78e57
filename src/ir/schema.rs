use crate::error::CompileError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// The Logical Intermediate Representation of a desired automation.
///
/// `goal`, `data_sources`, `delivery`, `clarifications_required` and `ir_version` are
/// required when deserializing; every other collection defaults to empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalIr {
    pub ir_version: String,
    pub goal: String,
    pub data_sources: Vec<DataSource>,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub transforms: Vec<Transform>,
    #[serde(default)]
    pub ai_operations: Vec<AiOperation>,
    #[serde(default)]
    pub conditionals: Vec<Conditional>,
    #[serde(default)]
    pub loops: Vec<LoopSpec>,
    #[serde(default)]
    pub partitions: Vec<Partition>,
    #[serde(default)]
    pub grouping: Option<Grouping>,
    #[serde(default)]
    pub rendering: Option<Rendering>,
    pub delivery: Vec<Delivery>,
    #[serde(default)]
    pub edge_cases: Vec<EdgeCase>,
    pub clarifications_required: Vec<String>,
}

impl LogicalIr {
    /// Parses an IR document, rejecting documents that miss a required field.
    pub fn from_json(json: &str) -> Result<Self, CompileError> {
        serde_json::from_str(json).map_err(|e| CompileError::InvalidIr(e.to_string()))
    }

    /// Whether results are delivered once per group rather than once overall.
    pub fn emits_per_group(&self) -> bool {
        self.grouping.as_ref().is_some_and(|g| g.emit_per_group)
    }

    pub fn group_by(&self) -> Option<&str> {
        self.grouping.as_ref().and_then(|g| g.group_by.as_deref())
    }

    pub fn lookup_sources(&self) -> impl Iterator<Item = &DataSource> {
        self.data_sources
            .iter()
            .filter(|s| s.role == SourceRole::Lookup)
    }

    /// Sources whose rows flow through the pipeline (everything except lookups).
    pub fn candidate_sources(&self) -> impl Iterator<Item = &DataSource> {
        self.data_sources
            .iter()
            .filter(|s| s.role != SourceRole::Lookup)
    }

    pub fn has_edge_case(&self, condition: EdgeCaseCondition) -> Option<&EdgeCase> {
        self.edge_cases.iter().find(|e| e.condition == condition)
    }

    /// Yields each delivery together with its effective id.
    pub fn deliveries(&self) -> impl Iterator<Item = (String, &Delivery)> {
        self.delivery
            .iter()
            .enumerate()
            .map(|(index, d)| (d.key(index), d))
    }

    /// A one-line description of the properties rule selection looks at.
    pub fn shape_summary(&self) -> String {
        format!(
            "emit_per_group={}, group_by={}, delivery_methods=[{}], ai_operations={}, conditionals={}",
            self.emits_per_group(),
            self.group_by().unwrap_or("none"),
            self.delivery
                .iter()
                .map(|d| d.method.to_string())
                .collect::<Vec<_>>()
                .join(", "),
            self.ai_operations.len(),
            self.conditionals.len()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Tabular,
    Api,
    Webhook,
    Database,
    File,
    Stream,
}

impl SourceType {
    /// The operation used to read a source when the IR does not name one.
    /// Webhook payloads arrive as runtime input and are never fetched.
    pub fn default_operation(self) -> Option<&'static str> {
        match self {
            SourceType::Tabular => Some("read_range"),
            SourceType::Api => Some("fetch"),
            SourceType::Database => Some("query"),
            SourceType::File => Some("read_file"),
            SourceType::Stream => Some("subscribe"),
            SourceType::Webhook => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRole {
    #[default]
    Primary,
    /// A reference set of already-processed items; triggers deduplication.
    Lookup,
    Secondary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub id: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    /// Plugin key of the service holding the data.
    pub source: String,
    #[serde(default)]
    pub operation: Option<String>,
    /// Business-facing location, e.g. a spreadsheet name or a mailbox query.
    pub location: String,
    #[serde(default)]
    pub role: SourceRole,
    #[serde(default)]
    pub key_field: Option<String>,
    #[serde(default)]
    pub match_field: Option<String>,
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl DataSource {
    pub fn read_operation(&self) -> Option<&str> {
        self.operation
            .as_deref()
            .or_else(|| self.source_type.default_operation())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
    In,
    IsEmpty,
    IsNotEmpty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub id: String,
    pub field: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformOperation {
    Map,
    Sort,
    Deduplicate,
    Aggregate,
    Flatten,
    SelectFields,
    Limit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub id: String,
    pub operation: TransformOperation,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiOperationKind {
    Classify,
    Summarize,
    Extract,
    Generate,
    Sentiment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiOperation {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AiOperationKind,
    pub instruction: String,
    #[serde(default)]
    pub input_field: Option<String>,
    #[serde(default)]
    pub output_schema: Option<Value>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conditional {
    pub id: String,
    pub condition: Condition,
    #[serde(default)]
    pub then_deliver: Vec<String>,
    #[serde(default)]
    pub else_deliver: Vec<String>,
}

fn default_item_name() -> String {
    "item".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopSpec {
    pub id: String,
    /// IR id of the unit whose output is iterated.
    pub iterate_over: String,
    #[serde(default = "default_item_name")]
    pub item_name: String,
    /// IR ids of the units executed once per item.
    #[serde(default)]
    pub body: Vec<String>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub max_concurrency: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    pub id: String,
    pub field: String,
    #[serde(default)]
    pub buckets: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Grouping {
    #[serde(default)]
    pub group_by: Option<String>,
    #[serde(default)]
    pub emit_per_group: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderingKind {
    EmailEmbeddedTable,
    Table,
    StructuredDocument,
    SummaryBlock,
    Alert,
    None,
}

impl fmt::Display for RenderingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RenderingKind::EmailEmbeddedTable => "email_embedded_table",
            RenderingKind::Table => "table",
            RenderingKind::StructuredDocument => "structured_document",
            RenderingKind::SummaryBlock => "summary_block",
            RenderingKind::Alert => "alert",
            RenderingKind::None => "none",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rendering {
    #[serde(rename = "type")]
    pub kind: RenderingKind,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub empty_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    Email,
    Chat,
    Webhook,
    Database,
    File,
    Sms,
}

impl DeliveryMethod {
    pub fn default_operation(self) -> &'static str {
        match self {
            DeliveryMethod::Email => "send_email",
            DeliveryMethod::Chat => "send_message",
            DeliveryMethod::Webhook => "post",
            DeliveryMethod::Database => "insert_rows",
            DeliveryMethod::File => "write_file",
            DeliveryMethod::Sms => "send_sms",
        }
    }

    /// Messaging sinks receive the rendered output; data sinks receive raw rows.
    pub fn consumes_rendered(self) -> bool {
        matches!(
            self,
            DeliveryMethod::Email | DeliveryMethod::Chat | DeliveryMethod::Sms | DeliveryMethod::Webhook
        )
    }
}

impl fmt::Display for DeliveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeliveryMethod::Email => "email",
            DeliveryMethod::Chat => "chat",
            DeliveryMethod::Webhook => "webhook",
            DeliveryMethod::Database => "database",
            DeliveryMethod::File => "file",
            DeliveryMethod::Sms => "sms",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    #[serde(default)]
    pub id: Option<String>,
    pub method: DeliveryMethod,
    pub plugin_key: String,
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub recipient: Option<String>,
    /// Group field that supplies the recipient when delivering per group.
    #[serde(default)]
    pub recipient_source: Option<String>,
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl Delivery {
    /// The delivery's id, falling back to its 1-based position.
    pub fn key(&self, index: usize) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| format!("delivery_{}", index + 1))
    }

    pub fn operation(&self) -> &str {
        self.operation
            .as_deref()
            .unwrap_or_else(|| self.method.default_operation())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeCaseCondition {
    NoRowsAfterFilter,
    EmptyDataSource,
    AiExtractionFailed,
    MissingRequiredField,
    DuplicateRecords,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeCaseAction {
    SkipDelivery,
    SendEmptyResultMessage,
    NotifyAdmin,
    UseDefault,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeCase {
    pub condition: EdgeCaseCondition,
    pub action: EdgeCaseAction,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub recipient: Option<String>,
}
