//! Router: the decision engine.
//!
//! Combines the Identity Extractor, per-project router overrides, the
//! global router config, token counts, and the Session Cache to pick a
//! `provider,model` and rewrite the request in place. Never panics and
//! never throws past its own boundary: any internal failure is caught,
//! logged, and downgraded to `Router.default` (or the hardcoded fallback).
//!
//! Modeled as a single async function with labelled suspension points
//! rather than a callback chain: the decision tree is short and linear
//! and reads better as a straight sequence of early-returns.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::{model_cache_key, SessionCache};
use crate::config::{resolve_router_config, RouterConfigManager};
use crate::identity;
use crate::registry::RegistryStore;
use crate::types::{
    ChatCompletionRequest, IdentityKind, ModelInheritance, ProviderEntry, RouterConfig,
    ScenarioType, HARDCODED_FALLBACK_MODEL,
};
use crate::validators::is_valid_model_string;

/// Estimates the token count of a request. Production deployments consult
/// an external tokenizer service; callers that have one should implement
/// this trait over it. [`FallbackTokenizer`] provides the chars/4 heuristic
/// used when no such service is configured.
pub trait TokenizerService: Send + Sync {
    /// Estimates the token count of `request`. An `Err` is treated exactly
    /// like a missing tokenizer: the router logs it and falls through to
    /// `Router.default`.
    fn count_tokens(&self, request: &ChatCompletionRequest) -> Result<u64, String>;
}

/// `chars / 4 ≈ tokens`, applied to `system` and `messages` text. Used when
/// no [`TokenizerService`] is configured.
pub struct FallbackTokenizer;

impl TokenizerService for FallbackTokenizer {
    fn count_tokens(&self, request: &ChatCompletionRequest) -> Result<u64, String> {
        let mut chars = 0usize;
        for block in &request.system {
            chars += block.text.as_deref().map(str::len).unwrap_or(0);
        }
        for message in &request.messages {
            chars += message_char_len(&message.content);
        }
        Ok((chars / 4) as u64)
    }
}

fn message_char_len(content: &crate::types::MessageContent) -> usize {
    use crate::types::{ContentItem, MessageContent};
    match content {
        MessageContent::Text(s) => s.len(),
        MessageContent::Blocks(items) => items
            .iter()
            .map(|item| match item {
                ContentItem::Text(s) => s.len(),
                ContentItem::Block(b) => b.text.as_deref().map(str::len).unwrap_or(0),
            })
            .sum(),
    }
}

/// An externally-configurable decider consulted before the internal
/// priority chain: if it returns a model, that wins outright with
/// `scenarioType = default`. Errors are logged and the internal chain runs
/// as if no custom router were configured.
pub trait CustomRouter: Send + Sync {
    /// Returns a `provider,model` override for `request`, or `Ok(None)` to
    /// defer to the internal chain.
    fn route(&self, request: &ChatCompletionRequest) -> Result<Option<String>, String>;
}

/// Observability sink for routing decisions. Optional; the router works
/// identically with or without one attached.
pub trait RouterEventSink: Send + Sync {
    /// Called once per request after a model has been chosen.
    fn emit(&self, scenario: ScenarioType, model: &str);
}

/// Everything the Router needs beyond the request itself: the registry, the
/// session cache, the global config, and the optional collaborators.
pub struct RouterContext {
    /// Global router config, with project/session-level override resolution.
    pub config_manager: Arc<RouterConfigManager>,
    /// Project/agent/workflow registry.
    pub registry: Arc<RegistryStore>,
    /// Session-scoped identity→model cache.
    pub cache: Arc<SessionCache>,
    /// Root under which `project add`-style auto-registration searches for
    /// an unregistered agent's file (typically `~/.claude/projects`).
    pub claude_projects_root: PathBuf,
    /// External tokenizer; falls back to [`FallbackTokenizer`] when absent.
    pub tokenizer: Option<Arc<dyn TokenizerService>>,
    /// Custom decider consulted before the internal chain.
    pub custom_router: Option<Arc<dyn CustomRouter>>,
    /// Observability sink.
    pub event_sink: Option<Arc<dyn RouterEventSink>>,
}

impl RouterContext {
    /// Builds a context with no optional collaborators attached.
    pub fn new(
        config_manager: Arc<RouterConfigManager>,
        registry: Arc<RegistryStore>,
        cache: Arc<SessionCache>,
        claude_projects_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            config_manager,
            registry,
            cache,
            claude_projects_root: claude_projects_root.into(),
            tokenizer: None,
            custom_router: None,
            event_sink: None,
        }
    }

    fn tokenizer(&self) -> Arc<dyn TokenizerService> {
        self.tokenizer
            .clone()
            .unwrap_or_else(|| Arc::new(FallbackTokenizer))
    }
}

fn background_model_matches(model: &str) -> bool {
    let lower = model.to_ascii_lowercase();
    lower.contains("claude") && lower.contains("haiku")
}

fn normalize_direct_model(model: &str, providers: &[ProviderEntry]) -> String {
    let Some((provider, name)) = model.split_once(',') else {
        return model.to_string();
    };
    for entry in providers {
        if entry.name.eq_ignore_ascii_case(provider) {
            if let Some(canonical_model) = entry
                .models
                .iter()
                .find(|m| m.eq_ignore_ascii_case(name))
            {
                return format!("{},{}", entry.name, canonical_model);
            }
        }
    }
    model.to_string()
}

fn finish(
    ctx: &RouterContext,
    request: &mut ChatCompletionRequest,
    model: String,
    scenario: ScenarioType,
) -> ScenarioType {
    request.model = model.clone();
    ctx.cache.record_scenario(scenario);
    if let Some(sink) = &ctx.event_sink {
        sink.emit(scenario, &model);
    }
    scenario
}

fn default_model(config: &RouterConfig) -> String {
    config
        .default
        .clone()
        .unwrap_or_else(|| HARDCODED_FALLBACK_MODEL.to_string())
}

/// Routes `request`, rewriting `request.model` in place and returning the
/// scenario tag. Internally infallible: any error in steps 0-8 downgrades
/// to step 9 (`Router.default`, or the hardcoded fallback) with a logged
/// warning.
pub async fn route(request: &mut ChatCompletionRequest, ctx: &RouterContext) -> ScenarioType {
    let global = ctx.config_manager.config();

    // Custom router path: consulted before the internal chain entirely.
    if let Some(custom) = &ctx.custom_router {
        match custom.route(request) {
            Ok(Some(model)) if !model.is_empty() => {
                return finish(ctx, request, model, ScenarioType::Default);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "custom router failed, falling through to internal chain"),
        }
    }

    // Step 0: inline override. Also strips a co-present subagent tag from
    // system[1], since step 3 (which normally does the stripping) never
    // runs once step 0 wins.
    if let Some(model) = identity::extract_inline_override(request) {
        strip_subagent_tag_if_present(request);
        return finish(ctx, request, model, ScenarioType::Default);
    }

    // Step 1: direct model field.
    if request.model.contains(',') {
        let normalized = normalize_direct_model(&request.model, &global.providers);
        return finish(ctx, request, normalized, ScenarioType::Default);
    }

    // Resolve the effective router config once per request: a per-project or
    // per-session override (looked up via the session's project folder)
    // takes priority over the global config for every remaining step,
    // including step 9's default.
    let session_id = identity::extract_session_id(request);
    let project_folder =
        resolve_project_folder(&ctx.cache, &ctx.claude_projects_root, &session_id).await;
    let effective_config = match &project_folder {
        Some(folder) => resolve_router_config(&global.router, folder, &session_id),
        None => global.router.clone(),
    };

    // Step 2: long-context.
    let threshold = effective_config.long_context_threshold;
    let token_count = ctx.tokenizer().count_tokens(request).unwrap_or_else(|e| {
        warn!(error = %e, "tokenizer failed, treating token count as zero");
        0
    });
    let previous_tokens = ctx.cache.previous_input_tokens(&session_id).unwrap_or(0);
    let long_context_triggered =
        token_count > threshold || (previous_tokens > threshold && token_count > 20_000);
    ctx.cache.set_previous_input_tokens(session_id.clone(), token_count);

    if long_context_triggered {
        if let Some(model) = &effective_config.long_context {
            return finish(ctx, request, model.clone(), ScenarioType::LongContext);
        }
    }

    // Step 3: subagent tag, read from system[1] specifically.
    if let Some(block) = request.system.get(1) {
        if let Some(text) = block.text.clone() {
            if let Some(tag) = identity::extract_subagent_tag(&text) {
                request.system[1].text = Some(tag.stripped_text);
                return finish(ctx, request, tag.model, ScenarioType::Default);
            }
        }
    }

    // Step 4: background.
    if background_model_matches(&request.model) {
        if let Some(model) = &effective_config.background {
            return finish(ctx, request, model.clone(), ScenarioType::Background);
        }
    }

    // Step 5: web search.
    if request
        .tools
        .iter()
        .any(|t| t.tool_type.starts_with("web_search"))
    {
        if let Some(model) = &effective_config.web_search {
            return finish(ctx, request, model.clone(), ScenarioType::WebSearch);
        }
    }

    // Step 6: think mode.
    if matches!(&request.thinking, Some(v) if truthy(v)) {
        if let Some(model) = &effective_config.think {
            return finish(ctx, request, model.clone(), ScenarioType::Think);
        }
    }

    // Steps 7-8: identity routing (workflow inheritance pre-check, then
    // agent/workflow resolution), gated by the fast-path marker check.
    if let Some(model) = resolve_identity(request, ctx, &session_id).await {
        return finish(ctx, request, model, ScenarioType::Default);
    }

    // Step 9: default.
    finish(ctx, request, default_model(&effective_config), ScenarioType::Default)
}

/// Strips a `<CCR-SUBAGENT-MODEL>` tag from `system[1]`, if present, without
/// consulting its extracted model. Called when an earlier priority step
/// (inline override) has already decided the model, so the tag must not
/// leak into the outgoing request even though it isn't the source of truth
/// for this decision.
fn strip_subagent_tag_if_present(request: &mut ChatCompletionRequest) {
    if let Some(block) = request.system.get(1) {
        if let Some(text) = block.text.clone() {
            if let Some(tag) = identity::extract_subagent_tag(&text) {
                request.system[1].text = Some(tag.stripped_text);
            }
        }
    }
}

fn truthy(value: &serde_json::Value) -> bool {
    !matches!(
        value,
        serde_json::Value::Null | serde_json::Value::Bool(false)
    )
}

/// Steps 7-8 of the priority chain: workflow-inheritance pre-check followed
/// by agent/workflow identity resolution through the session cache and
/// registry, with auto-registration for an unknown agent id.
async fn resolve_identity(
    request: &ChatCompletionRequest,
    ctx: &RouterContext,
    session_id: &str,
) -> Option<String> {
    let Some(identity) = identity::extract_routing_id(request) else {
        return None;
    };

    let project_id = match identity.kind {
        IdentityKind::Agent => ctx.registry.detect_project(identity.id).await,
        IdentityKind::Workflow => {
            ctx.registry
                .detect_project_by_workflow_id(identity.id)
                .await
        }
    };

    let project_id = match project_id {
        Ok(Some(id)) => Some(id),
        Ok(None) => None,
        Err(e) => {
            warn!(error = %e, "registry lookup failed while resolving identity, falling through");
            None
        }
    };

    // Step 7: a resolved inherit-mode workflow skips identity routing
    // entirely and falls straight through to default.
    if identity.kind == IdentityKind::Workflow {
        if let Some(pid) = project_id {
            match ctx.registry.get_workflow_inheritance(identity.id, pid).await {
                Ok(Some(ModelInheritance::Inherit)) => {
                    debug!(workflow_id = %identity.id, "workflow has inherit mode, skipping identity routing");
                    return None;
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "failed to read workflow inheritance mode"),
            }
        }
    }

    match project_id {
        Some(pid) => resolve_for_project(identity.kind, identity.id, pid, ctx, session_id).await,
        None if identity.kind == IdentityKind::Agent => {
            match auto_register_and_retry(identity.id, ctx).await {
                Some(pid) => resolve_for_project(identity.kind, identity.id, pid, ctx, session_id).await,
                None => None,
            }
        }
        None => None,
    }
}

async fn resolve_for_project(
    kind: IdentityKind,
    id: Uuid,
    project_id: Uuid,
    ctx: &RouterContext,
    session_id: &str,
) -> Option<String> {
    let key = model_cache_key(session_id, kind, &project_id.to_string(), &id.to_string());

    if let Some(model) = ctx.cache.get(&key) {
        return Some(model);
    }

    let lookup = match kind {
        IdentityKind::Agent => ctx.registry.get_model_by_agent_id(id, Some(project_id)).await,
        IdentityKind::Workflow => {
            ctx.registry
                .get_model_by_workflow_id(id, Some(project_id))
                .await
        }
    };

    match lookup {
        Ok(Some(model)) if is_valid_model_string(&model) => {
            ctx.cache.set(key, model.clone());
            Some(model)
        }
        Ok(Some(model)) => {
            warn!(model, "identity has an invalid model string assigned, ignoring");
            None
        }
        Ok(None) => None,
        Err(e) => {
            warn!(error = %e, "registry model lookup failed");
            None
        }
    }
}

async fn auto_register_and_retry(agent_id: Uuid, ctx: &RouterContext) -> Option<Uuid> {
    let file = ctx
        .registry
        .find_agent_file_by_id(agent_id, &ctx.claude_projects_root)
        .await
        .ok()??;

    match ctx.registry.auto_register_from_agent_file(&file).await {
        Ok(project) => {
            debug!(project_id = %project.id, "auto-registered project from agent file");
            Some(project.id)
        }
        Err(e) => {
            warn!(error = %e, "auto-registration failed");
            None
        }
    }
}

/// Resolves the project folder cached or searched for `session_id`, scanning
/// `<claude_projects_root>/*/{session_id}.jsonl` (`claude_projects_root` is
/// typically `~/.claude/projects`, the same root auto-registration searches
/// via [`crate::registry::RegistryStore::find_agent_file_by_id`]). An empty
/// cached value means "already searched, not found" and is itself treated as
/// a hit so a session that genuinely has no project folder doesn't re-walk
/// the filesystem on every request.
pub async fn resolve_project_folder(
    cache: &SessionCache,
    claude_projects_root: &Path,
    session_id: &str,
) -> Option<String> {
    if let Some(cached) = cache.get_session_project(session_id) {
        return if cached.is_empty() { None } else { Some(cached) };
    }

    let projects_dir = claude_projects_root.to_path_buf();
    let session_id_owned = session_id.to_string();
    let found = tokio::task::spawn_blocking(move || {
        let entries = std::fs::read_dir(&projects_dir).ok()?;
        for entry in entries.flatten() {
            let jsonl = entry.path().join(format!("{session_id_owned}.jsonl"));
            if jsonl.exists() {
                return entry.file_name().to_str().map(|s| s.to_string());
            }
        }
        None
    })
    .await
    .ok()
    .flatten();

    cache.set_session_project(session_id, found.clone().unwrap_or_default());
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContentBlock, GlobalConfig, Project, Workflow};

    fn ctx_with_config(config: GlobalConfig) -> (RouterContext, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(RegistryStore::new(dir.path().join("projects.json")));
        let ctx = RouterContext::new(
            Arc::new(RouterConfigManager::from_config(config)),
            registry,
            Arc::new(SessionCache::new()),
            dir.path().join("claude-projects"),
        );
        (ctx, dir)
    }

    fn req(system_text: &str) -> ChatCompletionRequest {
        ChatCompletionRequest {
            system: vec![ContentBlock {
                block_type: "text".to_string(),
                text: Some(system_text.to_string()),
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn vanilla_miss_uses_default() {
        let mut config = GlobalConfig::default();
        config.router.default = Some("openai,gpt-4o".to_string());
        let (ctx, _dir) = ctx_with_config(config);

        let mut request = req("hello");
        let scenario = route(&mut request, &ctx).await;

        assert_eq!(scenario, ScenarioType::Default);
        assert_eq!(request.model, "openai,gpt-4o");
        assert_eq!(ctx.cache.size(), 0);
    }

    #[tokio::test]
    async fn inline_override_beats_subagent_tag() {
        let mut config = GlobalConfig::default();
        config.router.default = Some("openai,gpt-4o".to_string());
        let (ctx, _dir) = ctx_with_config(config);

        let mut request = ChatCompletionRequest {
            system: vec![
                ContentBlock {
                    block_type: "text".to_string(),
                    text: Some("system preamble".to_string()),
                },
                ContentBlock {
                    block_type: "text".to_string(),
                    text: Some(
                        "<CCR-SUBAGENT-MODEL>openai,gpt-4o</CCR-SUBAGENT-MODEL> \
                         <!-- CCR-MODEL-OVERRIDE: kiro,claude-sonnet-4 -->"
                            .to_string(),
                    ),
                },
            ],
            ..Default::default()
        };

        let scenario = route(&mut request, &ctx).await;
        assert_eq!(scenario, ScenarioType::Default);
        assert_eq!(request.model, "kiro,claude-sonnet-4");
        // the subagent tag is stripped even though the override won, not the strip step
        assert!(!request.system[1].text.as_ref().unwrap().contains("CCR-SUBAGENT-MODEL"));
    }

    #[tokio::test]
    async fn background_scenario_matches_claude_haiku() {
        let mut config = GlobalConfig::default();
        config.router.background = Some("anthropic,claude-haiku".to_string());
        let (ctx, _dir) = ctx_with_config(config);

        let mut request = ChatCompletionRequest {
            model: "claude-3-haiku-something".to_string(),
            ..Default::default()
        };
        let scenario = route(&mut request, &ctx).await;
        assert_eq!(scenario, ScenarioType::Background);
        assert_eq!(request.model, "anthropic,claude-haiku");
    }

    #[tokio::test]
    async fn agent_identity_resolves_and_populates_cache() {
        let mut config = GlobalConfig::default();
        config.router.default = Some("openai,gpt-4o".to_string());
        let (ctx, dir) = ctx_with_config(config);

        // Register a project with one agent carrying a model.
        let project_dir = dir.path().join("proj");
        tokio::fs::create_dir_all(project_dir.join(".bmad/bmm/agents"))
            .await
            .unwrap();
        let agent_path = project_dir.join(".bmad/bmm/agents/dev.md");
        tokio::fs::write(&agent_path, "# Dev\n").await.unwrap();

        let project = ctx.registry.add_project(&project_dir).await.unwrap();
        let agent_id = project.agents[0].id;
        ctx.registry
            .set_agent_model(project.id, agent_id, Some("anthropic,claude-sonnet-4".to_string()))
            .await
            .unwrap();

        let mut request = ChatCompletionRequest {
            system: vec![ContentBlock {
                block_type: "text".to_string(),
                text: Some(format!("<!-- CCR-AGENT-ID: {agent_id} -->")),
            }],
            metadata: crate::types::RequestMetadata {
                user_id: Some("u_session_s1".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let scenario = route(&mut request, &ctx).await;
        assert_eq!(scenario, ScenarioType::Default);
        assert_eq!(request.model, "anthropic,claude-sonnet-4");
        assert_eq!(ctx.cache.size(), 1);

        // Second request with the same identity should hit the cache.
        let mut request2 = request.clone();
        route(&mut request2, &ctx).await;
        assert_eq!(ctx.cache.metrics().hits, 1);
    }

    #[tokio::test]
    async fn inherit_mode_workflow_falls_through_to_default_without_caching() {
        let mut config = GlobalConfig::default();
        config.router.default = Some("openai,gpt-4o".to_string());
        let (ctx, dir) = ctx_with_config(config);

        let project_dir = dir.path().join("proj");
        tokio::fs::create_dir_all(&project_dir).await.unwrap();
        let project = Project {
            id: Uuid::new_v4(),
            name: "proj".to_string(),
            path: project_dir.to_string_lossy().to_string(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            agents: vec![],
            workflows: vec![Workflow {
                id: Uuid::new_v4(),
                name: "party-mode".to_string(),
                description: String::new(),
                relative_path: "_bmad/bmm/workflows/party-mode".to_string(),
                absolute_path: project_dir
                    .join("_bmad/bmm/workflows/party-mode")
                    .to_string_lossy()
                    .to_string(),
                model: None,
                model_inheritance: Some(ModelInheritance::Inherit),
            }],
        };
        let workflow_id = project.workflows[0].id;

        let mut data = ctx.registry.load().await.unwrap();
        data.projects.insert(project.id.to_string(), project);
        let store_path = dir.path().join("projects.json");
        tokio::fs::write(
            &store_path,
            format!(
                "// Project configurations for CCR agent system\n{}\n",
                serde_json::to_string_pretty(&data).unwrap()
            ),
        )
        .await
        .unwrap();

        let mut request = ChatCompletionRequest {
            system: vec![ContentBlock {
                block_type: "text".to_string(),
                text: Some(format!("<!-- CCR-WORKFLOW-ID: {workflow_id} -->")),
            }],
            ..Default::default()
        };

        let scenario = route(&mut request, &ctx).await;
        assert_eq!(scenario, ScenarioType::Default);
        assert_eq!(request.model, "openai,gpt-4o");
        assert_eq!(ctx.cache.size(), 0);
    }

    #[test]
    fn normalize_direct_model_matches_case_insensitively() {
        let providers = vec![ProviderEntry {
            name: "OpenAI".to_string(),
            models: vec!["GPT-4o".to_string()],
        }];
        assert_eq!(
            normalize_direct_model("openai,gpt-4o", &providers),
            "OpenAI,GPT-4o"
        );
        assert_eq!(
            normalize_direct_model("openai,unknown-model", &providers),
            "openai,unknown-model"
        );
    }
}
