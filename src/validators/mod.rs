//! Stateless predicates for the shapes the router and registry trade in:
//! UUIDv4 identity ids, `provider,model` strings, project paths,
//! inheritance modes, and the registry schema.
//!
//! Everything here is synchronous except [`is_valid_project_path`], which
//! has to stat the filesystem and is the crate's path-traversal defense.

use crate::types::{ModelInheritance, Workflow};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use uuid::Uuid;

/// The authoritative UUIDv4 shape, matched in addition to `uuid::Uuid::parse_str`
/// version-checking so a syntactically-valid-but-wrong-version UUID (v1, v7, ...)
/// is rejected the same way a malformed string is.
const UUID_V4_PATTERN: &str =
    r"^[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$";

/// `provider,model`: lowercase-ish provider on the left, a wider charset
/// (model names carry `.`, `/`) on the right.
const MODEL_STRING_PATTERN: &str = r"^[a-z0-9_-]+,[a-z0-9_./-]+$";

fn uuid_v4_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(UUID_V4_PATTERN).expect("static pattern"))
}

fn model_string_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(MODEL_STRING_PATTERN).expect("static pattern"))
}

/// API-key shapes that a `provider,model` component must never match, even
/// if it otherwise fits the grammar. A model string colliding with one of
/// these is almost certainly a pasted secret, not a model name.
fn api_key_shape_regexes() -> &'static Vec<regex::Regex> {
    static RE: OnceLock<Vec<regex::Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        [
            r"^sk-ant-[A-Za-z0-9_-]{20,}$", // Anthropic
            r"^sk-[A-Za-z0-9]{20,}$",       // OpenAI
            r"^pk-[A-Za-z0-9]{20,}$",       // Stripe
            r"^xox[baprs]-[A-Za-z0-9-]{10,}$", // Slack
            r"^gh[porus]_[A-Za-z0-9]{36}$", // GitHub
            r"^AKIA[A-Z0-9]{16}$",          // AWS
        ]
        .iter()
        .map(|p| regex::Regex::new(p).expect("static pattern"))
        .collect()
    })
}

fn looks_like_api_key(s: &str) -> bool {
    api_key_shape_regexes().iter().any(|re| re.is_match(s))
}

/// True if `s` is a syntactically valid agent id: a UUIDv4.
pub fn is_valid_agent_id(s: &str) -> bool {
    is_valid_uuid_v4(s)
}

/// True if `s` is a syntactically valid workflow id: the same UUIDv4 shape
/// agent ids use.
pub fn is_valid_workflow_id(s: &str) -> bool {
    is_valid_uuid_v4(s)
}

fn is_valid_uuid_v4(s: &str) -> bool {
    if !uuid_v4_regex().is_match(s) {
        return false;
    }
    matches!(Uuid::parse_str(s), Ok(u) if u.get_version_num() == 4)
}

/// True if `s` is a `provider,model` string: non-empty trimmed provider and
/// model, comma-separated into exactly two parts, neither side shaped like
/// a pasted API key or carrying the literal substring `"key"`/`"secret"`.
pub fn is_valid_model_string(s: &str) -> bool {
    let lower = s.to_ascii_lowercase();
    if !model_string_regex().is_match(&lower) {
        return false;
    }

    let Some((provider, model)) = lower.split_once(',') else {
        return false;
    };

    if provider.len() < 2 || provider.len() > 50 {
        return false;
    }
    if model.len() < 2 || model.len() > 100 {
        return false;
    }
    if provider.contains("key") || provider.contains("secret") {
        return false;
    }
    if model.contains("key") || model.contains("secret") {
        return false;
    }
    if looks_like_api_key(provider) || looks_like_api_key(model) {
        return false;
    }

    true
}

/// Splits a validated `provider,model` string into its two halves. Callers
/// should validate with [`is_valid_model_string`] first; this performs no
/// validation of its own.
pub fn split_model_string(s: &str) -> Option<(&str, &str)> {
    s.split_once(',')
}

/// Resolves `path` and checks it is an absolute, existing directory. This is
/// the crate's path-traversal defense for `project add`: it runs against the
/// filesystem, so it is async.
pub async fn is_valid_project_path(path: &Path) -> bool {
    if !path.is_absolute() {
        return false;
    }
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.is_dir(),
        Err(_) => false,
    }
}

/// Canonicalizes `path` for storage once it has already passed
/// [`is_valid_project_path`]. Falls back to the raw absolute path if
/// canonicalization fails (e.g. a dangling symlink component), since the
/// directory existence check already ran.
pub async fn canonical_project_path(path: &Path) -> PathBuf {
    tokio::fs::canonicalize(path)
        .await
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Type guard for a freshly-parsed projects-file body: `projects` must be a
/// JSON object (not an array, not null).
pub fn is_valid_projects_data(value: &serde_json::Value) -> bool {
    matches!(value.get("projects"), Some(serde_json::Value::Object(_)))
}

/// `"inherit"`, `"default"`, or absent are valid; anything else is not.
pub fn is_valid_inheritance_mode(mode: Option<&str>) -> bool {
    matches!(mode, None | Some("inherit") | Some("default"))
}

/// A workflow config is valid when its required fields are present and its
/// optional `model`/`modelInheritance` fields, if present, individually
/// validate.
pub fn is_valid_workflow_config(w: &Workflow) -> bool {
    if w.name.is_empty() || w.relative_path.is_empty() || w.absolute_path.is_empty() {
        return false;
    }
    if !is_valid_workflow_id(&w.id.to_string()) {
        return false;
    }
    if let Some(model) = &w.model {
        if !is_valid_model_string(model) {
            return false;
        }
    }
    // model_inheritance is already a typed `Option<ModelInheritance>` by the
    // time it reaches this check; invalid strings were coerced to `None`
    // during YAML parsing (see registry::scan_workflows).
    matches!(
        w.model_inheritance,
        None | Some(ModelInheritance::Inherit) | Some(ModelInheritance::Default)
    )
}
