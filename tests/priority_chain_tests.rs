//! End-to-end tests for the router's priority chain, exercised against the
//! public `ccr_router` API exactly as an embedding transport would call it.

use std::sync::Arc;

use ccr_router::cache::SessionCache;
use ccr_router::config::RouterConfigManager;
use ccr_router::registry::RegistryStore;
use ccr_router::router::{self, RouterContext};
use ccr_router::types::{
    ChatCompletionRequest, ContentBlock, GlobalConfig, ProviderEntry, RequestMetadata,
    RouterConfig, ScenarioType, ToolEntry,
};
use rstest::rstest;

fn ctx_with_router_config(router: RouterConfig) -> (RouterContext, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = GlobalConfig {
        router,
        providers: vec![ProviderEntry {
            name: "openai".to_string(),
            models: vec!["gpt-4o".to_string()],
        }],
    };
    let registry = Arc::new(RegistryStore::new(dir.path().join("projects.json")));
    let ctx = RouterContext::new(
        Arc::new(RouterConfigManager::from_config(config)),
        registry,
        Arc::new(SessionCache::new()),
        dir.path().join("claude-projects"),
    );
    (ctx, dir)
}

fn system_request(text: &str) -> ChatCompletionRequest {
    ChatCompletionRequest {
        system: vec![ContentBlock {
            block_type: "text".to_string(),
            text: Some(text.to_string()),
        }],
        ..Default::default()
    }
}

#[rstest]
#[case::default_fallback("anthropic,claude-sonnet-4")]
#[case::configured_default("mistral,mistral-large")]
#[tokio::test]
async fn vanilla_request_falls_through_to_default(#[case] default: &str) {
    let router = RouterConfig {
        default: Some(default.to_string()),
        ..Default::default()
    };
    let (ctx, _dir) = ctx_with_router_config(router);

    let mut request = system_request("plain conversation, no directives at all");
    let scenario = router::route(&mut request, &ctx).await;

    assert_eq!(scenario, ScenarioType::Default);
    assert_eq!(request.model, default);
    assert_eq!(ctx.cache.size(), 0);
}

#[tokio::test]
async fn no_router_default_falls_back_to_hardcoded_model() {
    let (ctx, _dir) = ctx_with_router_config(RouterConfig::default());
    let mut request = system_request("hello");

    let scenario = router::route(&mut request, &ctx).await;

    assert_eq!(scenario, ScenarioType::Default);
    assert_eq!(request.model, ccr_router::types::HARDCODED_FALLBACK_MODEL);
}

#[tokio::test]
async fn direct_model_field_with_comma_is_normalized_against_providers() {
    let (ctx, _dir) = ctx_with_router_config(RouterConfig::default());
    let mut request = ChatCompletionRequest {
        model: "OpenAI,GPT-4O".to_string(),
        ..Default::default()
    };

    let scenario = router::route(&mut request, &ctx).await;

    assert_eq!(scenario, ScenarioType::Default);
    // Casing is normalized to the provider's own declared casing.
    assert_eq!(request.model, "openai,gpt-4o");
}

#[tokio::test]
async fn direct_model_not_in_provider_list_passes_through_unchanged() {
    let (ctx, _dir) = ctx_with_router_config(RouterConfig::default());
    let mut request = ChatCompletionRequest {
        model: "some-provider,some-model".to_string(),
        ..Default::default()
    };

    router::route(&mut request, &ctx).await;

    assert_eq!(request.model, "some-provider,some-model");
}

#[tokio::test]
async fn web_search_tool_routes_to_web_search_scenario() {
    let router = RouterConfig {
        web_search: Some("anthropic,claude-sonnet-4".to_string()),
        ..Default::default()
    };
    let (ctx, _dir) = ctx_with_router_config(router);

    let mut request = ChatCompletionRequest {
        tools: vec![ToolEntry {
            tool_type: "web_search_20250305".to_string(),
        }],
        ..Default::default()
    };

    let scenario = router::route(&mut request, &ctx).await;
    assert_eq!(scenario, ScenarioType::WebSearch);
    assert_eq!(request.model, "anthropic,claude-sonnet-4");
}

#[tokio::test]
async fn thinking_mode_routes_to_think_scenario_when_configured() {
    let router = RouterConfig {
        think: Some("anthropic,claude-opus-4".to_string()),
        ..Default::default()
    };
    let (ctx, _dir) = ctx_with_router_config(router);

    let mut request = ChatCompletionRequest {
        thinking: Some(serde_json::json!({"type": "enabled"})),
        ..Default::default()
    };

    let scenario = router::route(&mut request, &ctx).await;
    assert_eq!(scenario, ScenarioType::Think);
    assert_eq!(request.model, "anthropic,claude-opus-4");
}

#[tokio::test]
async fn thinking_mode_without_configured_model_falls_through_to_default() {
    let router = RouterConfig {
        default: Some("openai,gpt-4o".to_string()),
        think: None,
        ..Default::default()
    };
    let (ctx, _dir) = ctx_with_router_config(router);

    let mut request = ChatCompletionRequest {
        thinking: Some(serde_json::json!(true)),
        ..Default::default()
    };

    let scenario = router::route(&mut request, &ctx).await;
    assert_eq!(scenario, ScenarioType::Default);
    assert_eq!(request.model, "openai,gpt-4o");
}

#[tokio::test]
async fn long_context_threshold_crossed_routes_to_long_context_scenario() {
    let router = RouterConfig {
        long_context: Some("anthropic,claude-opus-4".to_string()),
        long_context_threshold: 100,
        ..Default::default()
    };
    let (ctx, _dir) = ctx_with_router_config(router);

    // ~4 chars/token heuristic: 500 chars ≈ 125 tokens, above the 100 threshold.
    let mut request = system_request(&"word ".repeat(120));

    let scenario = router::route(&mut request, &ctx).await;
    assert_eq!(scenario, ScenarioType::LongContext);
    assert_eq!(request.model, "anthropic,claude-opus-4");
}

#[tokio::test]
async fn agent_directive_with_no_matching_registration_falls_through_to_default() {
    let router = RouterConfig {
        default: Some("openai,gpt-4o".to_string()),
        ..Default::default()
    };
    let (ctx, _dir) = ctx_with_router_config(router);

    let mut request = ChatCompletionRequest {
        system: vec![ContentBlock {
            block_type: "text".to_string(),
            text: Some(
                "<!-- CCR-AGENT-ID: 550e8400-e29b-41d4-a716-446655440000 -->".to_string(),
            ),
        }],
        metadata: RequestMetadata {
            user_id: Some("u_session_s1".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };

    let scenario = router::route(&mut request, &ctx).await;
    assert_eq!(scenario, ScenarioType::Default);
    assert_eq!(request.model, "openai,gpt-4o");
    assert_eq!(ctx.cache.size(), 0);
}

#[tokio::test]
async fn corrupted_registry_falls_through_to_default_without_crashing() {
    let router = RouterConfig {
        default: Some("openai,gpt-4o".to_string()),
        ..Default::default()
    };
    let (ctx, dir) = ctx_with_router_config(router);

    let projects_path = dir.path().join("projects.json");
    tokio::fs::write(&projects_path, "{ invalid json")
        .await
        .unwrap();
    let before = tokio::fs::read_to_string(&projects_path).await.unwrap();

    let mut request = ChatCompletionRequest {
        system: vec![ContentBlock {
            block_type: "text".to_string(),
            text: Some(
                "<!-- CCR-WORKFLOW-ID: 650e8400-e29b-41d4-a716-446655440000 -->".to_string(),
            ),
        }],
        ..Default::default()
    };

    let scenario = router::route(&mut request, &ctx).await;

    assert_eq!(scenario, ScenarioType::Default);
    assert_eq!(request.model, "openai,gpt-4o");

    let after = tokio::fs::read_to_string(&projects_path).await.unwrap();
    assert_eq!(before, after, "a failed registry read must not touch the file");
}
