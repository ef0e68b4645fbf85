//! Core types shared across the router, registry, identity extractor and cache.
//!
//! This module contains:
//! - The request shape the [`crate::router::Router`] reads and rewrites
//! - The registry entities persisted to `projects.json` ([`Project`], [`Agent`], [`Workflow`])
//! - The global router configuration shape ([`RouterConfig`])
//! - The crate-wide error type and [`Result`] alias

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============= Request Shapes =============

/// A single content block inside `system` or a message's array-form `content`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    /// Block discriminator, e.g. `"text"`.
    #[serde(rename = "type")]
    pub block_type: String,
    /// The block's text, present when `block_type == "text"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// A message's `content` field: either a plain string or an ordered sequence
/// of strings / text blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Bare string content.
    Text(String),
    /// Array-form content, mixing bare strings and text blocks.
    Blocks(Vec<ContentItem>),
}

/// One item inside array-form message content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentItem {
    /// A bare string item.
    Text(String),
    /// A `{type, text}` block item.
    Block(ContentBlock),
}

/// A single message in the incoming chat-completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMessage {
    /// The message role (`"user"`, `"assistant"`, ...). Not interpreted by the router.
    pub role: String,
    /// The message content.
    pub content: MessageContent,
}

/// Tool entry as it appears in `body.tools`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEntry {
    /// Tool type discriminator, e.g. `"web_search_20250305"`.
    #[serde(rename = "type")]
    pub tool_type: String,
}

/// `body.metadata`, the out-of-band channel carrying session and parent-context data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestMetadata {
    /// Opaque user identifier, optionally encoding the session id after `"_session_"`.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Parent request id, present when this request is a sub-request of another.
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Parent request's resolved model string.
    #[serde(default)]
    pub parent_model: Option<String>,
    /// Parent identity kind: `"agent"` or `"workflow"`.
    #[serde(default)]
    pub parent_type: Option<String>,
}

/// The Claude-style chat-completion request body the router rewrites in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    /// The `provider,model` string, or a bare model name before routing rewrites it.
    #[serde(default)]
    pub model: String,
    /// Ordered system prompt text blocks.
    #[serde(default)]
    pub system: Vec<ContentBlock>,
    /// Ordered conversation messages.
    #[serde(default)]
    pub messages: Vec<RequestMessage>,
    /// Tool definitions available to the model.
    #[serde(default)]
    pub tools: Vec<ToolEntry>,
    /// Truthy when extended thinking mode is requested.
    #[serde(default)]
    pub thinking: Option<serde_json::Value>,
    /// Out-of-band metadata (session id, parent context).
    #[serde(default)]
    pub metadata: RequestMetadata,
}

/// The label the router attaches to a routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScenarioType {
    /// No special rule matched; `Router.default` (or an identity/override) was used.
    Default,
    /// The background-model heuristic matched (claude+haiku).
    Background,
    /// Extended thinking mode was requested.
    Think,
    /// The token count crossed the long-context threshold.
    LongContext,
    /// A web-search tool was present in `body.tools`.
    WebSearch,
}

impl ScenarioType {
    /// All scenario variants, in a stable order — used to seed metrics maps.
    pub const ALL: [ScenarioType; 5] = [
        ScenarioType::Default,
        ScenarioType::Background,
        ScenarioType::Think,
        ScenarioType::LongContext,
        ScenarioType::WebSearch,
    ];
}

impl std::fmt::Display for ScenarioType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScenarioType::Default => "default",
            ScenarioType::Background => "background",
            ScenarioType::Think => "think",
            ScenarioType::LongContext => "longContext",
            ScenarioType::WebSearch => "webSearch",
        };
        f.write_str(s)
    }
}

/// The kind of identity a routing id refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
    /// A `.md` agent file tagged with `CCR-AGENT-ID`.
    Agent,
    /// A `workflow.yaml` tagged with `CCR-WORKFLOW-ID`.
    Workflow,
}

impl std::fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentityKind::Agent => f.write_str("agent"),
            IdentityKind::Workflow => f.write_str("workflow"),
        }
    }
}

/// A routing identity extracted from a request: a `{kind, id}` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingIdentity {
    /// Whether this id names an agent or a workflow.
    pub kind: IdentityKind,
    /// The UUIDv4 identifying the agent or workflow.
    pub id: uuid::Uuid,
}

/// Parent-context metadata extracted from `body.metadata`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentContext {
    /// The parent request's id.
    pub parent_id: String,
    /// The parent request's resolved `provider,model` string.
    pub parent_model: String,
    /// Whether the parent was an agent or a workflow.
    pub parent_type: IdentityKind,
}

// ============= Registry Entities =============

/// How a workflow's model assignment relates to its parent routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelInheritance {
    /// Skip identity routing for this workflow and fall through to `Router.default`.
    Inherit,
    /// Use the workflow's own `model`, if any (the implicit default).
    Default,
}

impl Default for ModelInheritance {
    fn default() -> Self {
        ModelInheritance::Default
    }
}

/// An agent discovered under a project's `.bmad/bmm/agents/` (or `_bmad/...`) directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    /// UUIDv4 matching the `<!-- CCR-AGENT-ID: ... -->` tag in the file.
    pub id: uuid::Uuid,
    /// The agent file's name, e.g. `"dev.md"`.
    pub name: String,
    /// Path relative to the project root.
    pub relative_path: String,
    /// Absolute path to the agent file on disk.
    pub absolute_path: String,
    /// The `provider,model` assigned to this agent, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// A workflow discovered under a project's `_bmad/bmm/workflows/` (or `.bmad/...`) directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    /// UUIDv4 matching the `<!-- CCR-WORKFLOW-ID: ... -->` tag in `workflow.yaml`.
    pub id: uuid::Uuid,
    /// The workflow's declared name, or its directory name when absent.
    pub name: String,
    /// The workflow's declared description, or empty when absent.
    #[serde(default)]
    pub description: String,
    /// Path relative to the project root.
    pub relative_path: String,
    /// Absolute path to the workflow directory on disk.
    pub absolute_path: String,
    /// The `provider,model` assigned to this workflow, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// How this workflow's model relates to identity routing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_inheritance: Option<ModelInheritance>,
}

/// A registered project: a directory tree scanned for agents and workflows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// UUIDv4 identifying this project.
    pub id: uuid::Uuid,
    /// Human-readable project name (defaults to the directory's base name).
    pub name: String,
    /// Absolute path to the project root.
    pub path: String,
    /// When this project was first registered.
    pub created_at: DateTime<Utc>,
    /// When this project was last scanned or mutated.
    pub updated_at: DateTime<Utc>,
    /// Agents discovered under this project.
    #[serde(default)]
    pub agents: Vec<Agent>,
    /// Workflows discovered under this project.
    #[serde(default)]
    pub workflows: Vec<Workflow>,
}

/// The on-disk shape of `~/.claude-code-router/projects.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectsFile {
    /// Schema version, semver-formatted.
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    /// Projects keyed by their own id.
    pub projects: HashMap<String, Project>,
}

fn default_schema_version() -> String {
    "1.0.0".to_string()
}

impl Default for ProjectsFile {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            projects: HashMap::new(),
        }
    }
}

// ============= Router Configuration (external, consumed) =============

/// A named provider and the models it exposes, as declared in the global router config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    /// Provider name, e.g. `"anthropic"`.
    pub name: String,
    /// Model names this provider exposes.
    #[serde(default)]
    pub models: Vec<String>,
}

/// The `router` section of the global config: one `provider,model` string per priority rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Fallback model when no other rule matches.
    #[serde(default)]
    pub default: Option<String>,
    /// Model used for the background (claude+haiku) scenario.
    #[serde(default)]
    pub background: Option<String>,
    /// Model used when extended thinking is requested.
    #[serde(default)]
    pub think: Option<String>,
    /// Model used when the long-context threshold is crossed.
    #[serde(default, rename = "longContext")]
    pub long_context: Option<String>,
    /// Model used when a web-search tool is present.
    #[serde(default, rename = "webSearch")]
    pub web_search: Option<String>,
    /// Token count above which a request is considered long-context.
    #[serde(default = "default_long_context_threshold", rename = "longContextThreshold")]
    pub long_context_threshold: u64,
}

fn default_long_context_threshold() -> u64 {
    60_000
}

/// The full shape of `~/.claude-code-router/config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Priority-chain model assignments.
    #[serde(default)]
    pub router: RouterConfig,
    /// Providers and the models each one exposes, used to validate a direct `model` field.
    #[serde(default)]
    pub providers: Vec<ProviderEntry>,
}

/// The model used when no configured default exists anywhere in the chain.
pub const HARDCODED_FALLBACK_MODEL: &str = "anthropic,claude-sonnet-4";

// ============= Error Types =============

/// Crate-wide error type, tagged with the error-kind taxonomy the router and
/// registry use to decide whether a failure is recoverable.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A project, agent, or workflow id is unknown. Recoverable by the router
    /// (falls through to the next priority rule).
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed UUID, model string, path, or schema.
    #[error("invalid input: {0}")]
    Invalid(String),

    /// Filesystem write permission denied.
    #[error("permission denied: {0}")]
    Perm(String),

    /// A project with this path is already registered.
    #[error("already exists: {0}")]
    Exists(String),

    /// Transient filesystem or parse error.
    #[error("I/O error: {0}")]
    Io(String),

    /// Transient downstream/network error, eligible for retry.
    #[error("network error: {0}")]
    Network(String),

    /// Internal inconsistency (e.g. a UUID collision discovered mid-scan).
    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl AppError {
    /// The process exit code a CLI command should use for this error, per
    /// the three-valued exit code contract (0 success, 1 user error, 2 I/O/invariant).
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Invalid(_) | AppError::Exists(_) | AppError::NotFound(_) => 1,
            AppError::Perm(_) | AppError::Io(_) | AppError::Invariant(_) | AppError::Network(_) => 2,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::PermissionDenied => AppError::Perm(e.to_string()),
            std::io::ErrorKind::NotFound => AppError::NotFound(e.to_string()),
            _ => AppError::Io(e.to_string()),
        }
    }
}

impl From<uuid::Error> for AppError {
    fn from(e: uuid::Error) -> Self {
        AppError::Invalid(format!("malformed UUID: {e}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Invalid(format!("malformed JSON: {e}"))
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(e: serde_yaml::Error) -> Self {
        AppError::Invalid(format!("malformed YAML: {e}"))
    }
}

/// A specialized `Result` type for router/registry operations.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_type_display_matches_camel_case() {
        assert_eq!(ScenarioType::LongContext.to_string(), "longContext");
        assert_eq!(ScenarioType::WebSearch.to_string(), "webSearch");
        assert_eq!(ScenarioType::Default.to_string(), "default");
    }

    #[test]
    fn exit_codes_follow_the_three_valued_contract() {
        assert_eq!(AppError::Invalid("x".into()).exit_code(), 1);
        assert_eq!(AppError::Exists("x".into()).exit_code(), 1);
        assert_eq!(AppError::NotFound("x".into()).exit_code(), 1);
        assert_eq!(AppError::Perm("x".into()).exit_code(), 2);
        assert_eq!(AppError::Io("x".into()).exit_code(), 2);
        assert_eq!(AppError::Invariant("x".into()).exit_code(), 2);
        assert_eq!(AppError::Network("x".into()).exit_code(), 2);
    }

    #[test]
    fn projects_file_default_is_empty_with_schema_version() {
        let pf = ProjectsFile::default();
        assert_eq!(pf.schema_version, "1.0.0");
        assert!(pf.projects.is_empty());
    }
}
