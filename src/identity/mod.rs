//! Identity Extractor.
//!
//! Parses an incoming request for the four directive markers and the two
//! out-of-band metadata shapes the router needs. Pure function, no I/O: it
//! only ever reads from the request and, for the subagent tag, rewrites it
//! in place.

use crate::types::{
    ChatCompletionRequest, ContentItem, IdentityKind, MessageContent, ParentContext,
    RoutingIdentity,
};
use crate::validators::is_valid_model_string;
use std::sync::OnceLock;
use tracing::warn;
use uuid::Uuid;

const SESSION_MARKER: &str = "_session_";
const DEFAULT_SESSION_ID: &str = "default";

fn agent_id_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"(?i)<!--\s*CCR-AGENT-ID\s*:\s*([0-9a-fA-F-]{36})\s*-->")
            .expect("static pattern")
    })
}

fn workflow_id_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"(?i)<!--\s*CCR-WORKFLOW-ID\s*:\s*([0-9a-fA-F-]{36})\s*-->")
            .expect("static pattern")
    })
}

fn model_override_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"(?i)<!--\s*CCR-MODEL-OVERRIDE\s*:\s*([^\n>]+?)\s*-->")
            .expect("static pattern")
    })
}

fn subagent_model_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"(?is)<CCR-SUBAGENT-MODEL>\s*([^<]+?)\s*</CCR-SUBAGENT-MODEL>")
            .expect("static pattern")
    })
}

/// The fast-path gate: sub-microsecond cost for traffic carrying none of the
/// directive markers. Must run before any regex is evaluated — this is the
/// single most important performance decision in the extractor.
pub fn contains_ccr_marker(text: &str) -> bool {
    text.to_ascii_uppercase().contains("CCR-")
}

fn system_texts(req: &ChatCompletionRequest) -> Vec<&str> {
    req.system
        .iter()
        .filter(|b| b.block_type == "text")
        .filter_map(|b| b.text.as_deref())
        .collect()
}

fn message_texts(req: &ChatCompletionRequest) -> Vec<&str> {
    let mut out = Vec::new();
    for msg in &req.messages {
        match &msg.content {
            MessageContent::Text(s) => out.push(s.as_str()),
            MessageContent::Blocks(items) => {
                for item in items {
                    match item {
                        ContentItem::Text(s) => out.push(s.as_str()),
                        ContentItem::Block(b) if b.block_type == "text" => {
                            if let Some(t) = b.text.as_deref() {
                                out.push(t);
                            }
                        }
                        ContentItem::Block(_) => {}
                    }
                }
            }
        }
    }
    out
}

fn find_uuid_tag(texts: &[&str], re: &regex::Regex) -> Option<Uuid> {
    for text in texts {
        if let Some(caps) = re.captures(text) {
            let raw = caps.get(1)?.as_str();
            match Uuid::parse_str(raw) {
                Ok(u) if u.get_version_num() == 4 => return Some(u),
                _ => {
                    warn!(candidate = raw, "rejecting non-v4/malformed UUID in CCR tag");
                }
            }
        }
    }
    None
}

/// `ExtractRoutingId`: scans system text blocks first, falling back to
/// message content when a workflow id isn't found there. When both an agent
/// id and a workflow id are present, the workflow wins.
pub fn extract_routing_id(req: &ChatCompletionRequest) -> Option<RoutingIdentity> {
    let sys = system_texts(req);
    let has_ccr = sys.iter().any(|t| contains_ccr_marker(t))
        || message_texts(req).iter().any(|t| contains_ccr_marker(t));
    if !has_ccr {
        return None;
    }

    let workflow_re = workflow_id_regex();
    let agent_re = agent_id_regex();

    if let Some(id) = find_uuid_tag(&sys, workflow_re) {
        return Some(RoutingIdentity {
            kind: IdentityKind::Workflow,
            id,
        });
    }

    let msgs = message_texts(req);
    if let Some(id) = find_uuid_tag(&msgs, workflow_re) {
        return Some(RoutingIdentity {
            kind: IdentityKind::Workflow,
            id,
        });
    }

    if let Some(id) = find_uuid_tag(&sys, agent_re) {
        return Some(RoutingIdentity {
            kind: IdentityKind::Agent,
            id,
        });
    }

    if let Some(id) = find_uuid_tag(&msgs, agent_re) {
        return Some(RoutingIdentity {
            kind: IdentityKind::Agent,
            id,
        });
    }

    None
}

/// Backward-compatible projection of [`extract_routing_id`]: returns the id
/// only when the extracted identity is an agent.
pub fn extract_agent_id(req: &ChatCompletionRequest) -> Option<Uuid> {
    match extract_routing_id(req)? {
        RoutingIdentity {
            kind: IdentityKind::Agent,
            id,
        } => Some(id),
        _ => None,
    }
}

/// `ExtractSessionId`: `metadata.user_id` split on the literal `"_session_"`,
/// trimmed; `"default"` when missing, empty, or absent.
pub fn extract_session_id(req: &ChatCompletionRequest) -> String {
    let Some(user_id) = req.metadata.user_id.as_deref() else {
        return DEFAULT_SESSION_ID.to_string();
    };

    match user_id.split_once(SESSION_MARKER) {
        Some((_, rest)) => {
            let trimmed = rest.trim();
            if trimmed.is_empty() {
                DEFAULT_SESSION_ID.to_string()
            } else {
                trimmed.to_string()
            }
        }
        None => DEFAULT_SESSION_ID.to_string(),
    }
}

/// Lightweight `provider,model` shape check used only for directive bodies
/// (`CCR-MODEL-OVERRIDE`, `CCR-SUBAGENT-MODEL`): non-empty trimmed provider
/// and model, comma-separated into exactly two parts. Deliberately looser
/// than [`is_valid_model_string`], which additionally rejects API-key
/// shapes and over/under-length components for registry persistence.
fn looks_like_directive_model(s: &str) -> bool {
    let mut parts = s.splitn(3, ',');
    let provider = parts.next().unwrap_or("").trim();
    let model = parts.next().unwrap_or("").trim();
    let extra = parts.next();
    extra.is_none() && !provider.is_empty() && !model.is_empty()
}

/// `ExtractInlineOverride`: the highest-priority directive. Invalid
/// `provider,model` bodies are treated as absent (with a warning), not as a
/// parse error.
pub fn extract_inline_override(req: &ChatCompletionRequest) -> Option<String> {
    let sys = system_texts(req);
    let msgs = message_texts(req);
    let has_ccr = sys.iter().any(|t| contains_ccr_marker(t))
        || msgs.iter().any(|t| contains_ccr_marker(t));
    if !has_ccr {
        return None;
    }

    let re = model_override_regex();
    for text in sys.iter().chain(msgs.iter()) {
        if let Some(caps) = re.captures(text) {
            let raw = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
            if looks_like_directive_model(raw) {
                return Some(raw.to_string());
            }
            warn!(candidate = raw, "rejecting malformed CCR-MODEL-OVERRIDE body");
        }
    }
    None
}

/// The result of finding and stripping a `<CCR-SUBAGENT-MODEL>` tag: the
/// extracted `provider,model` and the text with the tag removed.
pub struct SubagentTag {
    /// The `provider,model` string carried inside the tag.
    pub model: String,
    /// `text` with the matched tag (and nothing else) removed.
    pub stripped_text: String,
}

/// Looks for a `<CCR-SUBAGENT-MODEL>` tag in `text` and, if found and its
/// body validates as a `provider,model` shape, returns the extracted model
/// plus the text with the tag stripped. The router calls this against
/// `system[1].text` specifically (step 3 of the priority chain).
pub fn extract_subagent_tag(text: &str) -> Option<SubagentTag> {
    if !contains_ccr_marker(text) {
        return None;
    }
    let re = subagent_model_regex();
    let caps = re.captures(text)?;
    let whole = caps.get(0)?;
    let body = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
    if !looks_like_directive_model(body) {
        warn!(candidate = body, "rejecting malformed CCR-SUBAGENT-MODEL body");
        return None;
    }

    let mut stripped = String::with_capacity(text.len() - whole.len());
    stripped.push_str(&text[..whole.start()]);
    stripped.push_str(&text[whole.end()..]);

    Some(SubagentTag {
        model: body.to_string(),
        stripped_text: stripped,
    })
}

/// `ExtractParentContext`: all three fields required; `parentModel` must
/// pass full model-string validation; `parentType` must be `"agent"` or
/// `"workflow"`.
pub fn extract_parent_context(req: &ChatCompletionRequest) -> Option<ParentContext> {
    let meta = &req.metadata;
    let parent_id = meta.parent_id.clone()?;
    let parent_model = meta.parent_model.clone()?;
    let parent_type_raw = meta.parent_type.as_deref()?;

    if !is_valid_model_string(&parent_model) {
        return None;
    }

    let parent_type = match parent_type_raw {
        "agent" => IdentityKind::Agent,
        "workflow" => IdentityKind::Workflow,
        _ => return None,
    };

    Some(ParentContext {
        parent_id,
        parent_model,
        parent_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContentBlock, RequestMetadata};

    fn req_with_system(text: &str) -> ChatCompletionRequest {
        ChatCompletionRequest {
            system: vec![ContentBlock {
                block_type: "text".to_string(),
                text: Some(text.to_string()),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn fast_path_rejects_plain_text() {
        let req = req_with_system("hello, how are you?");
        assert!(extract_routing_id(&req).is_none());
        assert!(extract_inline_override(&req).is_none());
    }

    #[test]
    fn extracts_agent_id_tag() {
        let req = req_with_system(
            "<!-- CCR-AGENT-ID: 550e8400-e29b-41d4-a716-446655440000 -->",
        );
        let id = extract_routing_id(&req).unwrap();
        assert_eq!(id.kind, IdentityKind::Agent);
    }

    #[test]
    fn workflow_wins_over_agent_when_both_present() {
        let req = req_with_system(
            "<!-- CCR-AGENT-ID: 550e8400-e29b-41d4-a716-446655440000 -->\n\
             <!-- CCR-WORKFLOW-ID: 650e8400-e29b-41d4-a716-446655440000 -->",
        );
        let id = extract_routing_id(&req).unwrap();
        assert_eq!(id.kind, IdentityKind::Workflow);
        assert_eq!(id.id.to_string(), "650e8400-e29b-41d4-a716-446655440000");
    }

    #[test]
    fn rejects_non_v4_uuid_tag_as_absent() {
        let req = req_with_system(
            "<!-- CCR-AGENT-ID: 550e8400-e29b-11d4-a716-446655440000 -->",
        );
        assert!(extract_routing_id(&req).is_none());
    }

    #[test]
    fn session_id_splits_on_marker() {
        let mut req = ChatCompletionRequest::default();
        req.metadata.user_id = Some("user_abc_session_s1".to_string());
        assert_eq!(extract_session_id(&req), "s1");
    }

    #[test]
    fn session_id_defaults_when_absent_or_empty() {
        let req = ChatCompletionRequest::default();
        assert_eq!(extract_session_id(&req), "default");

        let mut req2 = ChatCompletionRequest::default();
        req2.metadata.user_id = Some("user_abc_session_".to_string());
        assert_eq!(extract_session_id(&req2), "default");

        let mut req3 = ChatCompletionRequest::default();
        req3.metadata.user_id = Some("user_no_marker_here".to_string());
        assert_eq!(extract_session_id(&req3), "default");
    }

    #[test]
    fn inline_override_extracts_and_validates() {
        let req = req_with_system("<!-- CCR-MODEL-OVERRIDE: kiro,claude-sonnet-4 -->");
        assert_eq!(
            extract_inline_override(&req).as_deref(),
            Some("kiro,claude-sonnet-4")
        );
    }

    #[test]
    fn inline_override_rejects_malformed_body() {
        let req = req_with_system("<!-- CCR-MODEL-OVERRIDE: not-a-pair -->");
        assert!(extract_inline_override(&req).is_none());
    }

    #[test]
    fn subagent_tag_extracted_and_stripped() {
        let text = "preamble <CCR-SUBAGENT-MODEL>openai,gpt-4o</CCR-SUBAGENT-MODEL> trailer";
        let tag = extract_subagent_tag(text).unwrap();
        assert_eq!(tag.model, "openai,gpt-4o");
        assert_eq!(tag.stripped_text, "preamble  trailer");
    }

    #[test]
    fn parent_context_requires_all_three_fields() {
        let mut req = ChatCompletionRequest::default();
        req.metadata = RequestMetadata {
            user_id: None,
            parent_id: Some("p1".to_string()),
            parent_model: Some("anthropic,claude-sonnet-4".to_string()),
            parent_type: None,
        };
        assert!(extract_parent_context(&req).is_none());

        req.metadata.parent_type = Some("agent".to_string());
        let ctx = extract_parent_context(&req).unwrap();
        assert_eq!(ctx.parent_id, "p1");
        assert_eq!(ctx.parent_type, IdentityKind::Agent);
    }
}
