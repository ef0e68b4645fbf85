//! # ccr-router
//!
//! A request-routing engine for LLM API traffic: an in-process middleware
//! that inspects an incoming Claude-style chat-completion request and
//! selects a target `provider,model` pair according to a layered priority
//! chain, rewriting the outgoing request in place.
//!
//! Three pieces compose the engine:
//!
//! - [`router`] — the priority-chain decision engine (inline override,
//!   subagent tag, direct model, long-context, web-search, think-mode,
//!   background, agent/workflow identity, default).
//! - [`registry`] — the on-disk registry of projects, agents, and
//!   workflows, identified by injected UUIDv4 tags, with atomic
//!   backup-and-restore file mutation.
//! - [`cache`] — the session-scoped LRU that makes identity routing cheap
//!   across a reflection loop.
//!
//! [`identity`] and [`validators`] are the pure, I/O-free layers these sit
//! on; [`config`] owns the global and per-project router configuration;
//! [`retry`] wraps boundary calls that can fail transiently; [`cli`] is the
//! thin command surface over the registry that the `ccr` binary exposes.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use ccr_router::cache::SessionCache;
//! use ccr_router::config::RouterConfigManager;
//! use ccr_router::registry::RegistryStore;
//! use ccr_router::router::{self, RouterContext};
//! use ccr_router::types::ChatCompletionRequest;
//!
//! # async fn run(mut request: ChatCompletionRequest) {
//! let ctx = RouterContext::new(
//!     Arc::new(RouterConfigManager::open_default()),
//!     Arc::new(RegistryStore::open_default()),
//!     Arc::new(SessionCache::new()),
//!     dirs::home_dir().unwrap_or_default().join(".claude/projects"),
//! );
//! let scenario = router::route(&mut request, &ctx).await;
//! println!("routed to {} ({scenario})", request.model);
//! # }
//! ```

#![warn(missing_docs)]

/// Session-scoped LRU cache mapping identity to a resolved model.
pub mod cache;
/// Command-line surface over the registry operations.
pub mod cli;
/// Global and per-project router configuration.
pub mod config;
/// Pure request parsing: directive grammar, session id, parent context.
pub mod identity;
/// Comment-tolerant JSON parsing for the hand-edited on-disk files.
pub mod jsonc;
/// The on-disk project/agent/workflow registry.
pub mod registry;
/// Boundary-facing retry helper with exponential backoff.
pub mod retry;
/// The priority-chain decision engine.
pub mod router;
/// Shared request/response/registry/error types.
pub mod types;
/// Stateless validation predicates (UUIDs, model strings, paths, schema).
pub mod validators;

pub use cache::SessionCache;
pub use config::RouterConfigManager;
pub use registry::RegistryStore;
pub use router::{route, RouterContext};
pub use types::{AppError, Result};
