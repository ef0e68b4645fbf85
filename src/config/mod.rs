//! Configuration layer.
//!
//! `RouterConfigManager` owns the global router config file
//! (`~/.claude-code-router/config.json`, distinct from the projects-file the
//! Registry Store owns), exposing it via a lock-free [`ArcSwap`] snapshot
//! and optionally hot-reloading it on modification.
//!
//! Per-project and per-session router overrides are *not* watched: they're
//! read synchronously at resolution time since they're keyed by the
//! project/session pair of the current request, and a watcher per key isn't
//! warranted.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::RwLock;
use tracing::{error, info, warn};

use crate::jsonc::parse_jsonc;
use crate::types::{GlobalConfig, RouterConfig};

/// Returns `~/.claude-code-router/config.json`.
pub fn default_config_file_path() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(".claude-code-router").join("config.json"),
        None => PathBuf::from(".claude-code-router/config.json"),
    }
}

/// Returns the `~/.claude-code-router/` directory used for both the global
/// config and per-project/session router overrides.
pub fn ccr_home_dir() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(".claude-code-router"),
        None => PathBuf::from(".claude-code-router"),
    }
}

fn load_from_disk(path: &Path) -> GlobalConfig {
    match std::fs::read_to_string(path) {
        Ok(content) => match parse_jsonc(&content) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "failed to parse router config, using defaults");
                GlobalConfig::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => GlobalConfig::default(),
        Err(e) => {
            warn!(error = %e, path = %path.display(), "failed to read router config, using defaults");
            GlobalConfig::default()
        }
    }
}

/// Thread-safe, optionally hot-reloading holder of the global router
/// config.
pub struct RouterConfigManager {
    config: Arc<ArcSwap<GlobalConfig>>,
    config_path: PathBuf,
    #[cfg(feature = "watch")]
    watcher: RwLock<Option<notify::RecommendedWatcher>>,
    #[cfg(not(feature = "watch"))]
    _watcher: RwLock<()>,
}

impl RouterConfigManager {
    /// Loads the config at `path` (missing file = defaults; unparsable file
    /// = defaults, with a warning — the router must never be left without a
    /// usable config).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let config = load_from_disk(&path);
        Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            config_path: path,
            #[cfg(feature = "watch")]
            watcher: RwLock::new(None),
            #[cfg(not(feature = "watch"))]
            _watcher: RwLock::new(()),
        }
    }

    /// Loads from the default `~/.claude-code-router/config.json` location.
    pub fn open_default() -> Self {
        Self::new(default_config_file_path())
    }

    /// Builds a manager directly from an in-memory config, useful for tests
    /// and embedders that don't want file-backed config at all.
    pub fn from_config(config: GlobalConfig) -> Self {
        Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            config_path: PathBuf::from("in-memory"),
            #[cfg(feature = "watch")]
            watcher: RwLock::new(None),
            #[cfg(not(feature = "watch"))]
            _watcher: RwLock::new(()),
        }
    }

    /// Lock-free read of the current config snapshot.
    pub fn config(&self) -> Arc<GlobalConfig> {
        self.config.load_full()
    }

    /// Synchronously reloads the config from disk.
    pub fn reload(&self) {
        let new_config = load_from_disk(&self.config_path);
        self.config.store(Arc::new(new_config));
        info!(path = %self.config_path.display(), "router config reloaded");
    }

    /// Starts a debounced filesystem watcher that reloads the snapshot on
    /// modification. A parse failure during a reload logs a warning and
    /// keeps the previous snapshot rather than clearing it.
    #[cfg(feature = "watch")]
    pub fn start_watching(&self) -> crate::types::Result<()> {
        use notify::{Event, RecursiveMode, Watcher};

        let config_arc = Arc::clone(&self.config);
        let config_path = self.config_path.clone();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    match std::fs::read_to_string(&config_path) {
                        Ok(content) => match parse_jsonc::<GlobalConfig>(&content) {
                            Ok(new_config) => {
                                config_arc.store(Arc::new(new_config));
                                info!("router config hot-reloaded successfully");
                            }
                            Err(e) => {
                                warn!(error = %e, "failed to hot-reload router config, keeping previous snapshot");
                            }
                        },
                        Err(e) => {
                            warn!(error = %e, "failed to read router config during hot-reload");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "router config watcher error"),
            }
        })
        .map_err(|e| crate::types::AppError::Io(format!("failed to start config watcher: {e}")))?;

        if let Some(parent) = self.config_path.parent() {
            watcher
                .watch(parent, RecursiveMode::NonRecursive)
                .map_err(|e| crate::types::AppError::Io(format!("failed to watch config directory: {e}")))?;
        }

        *self.watcher.write() = Some(watcher);
        info!("router config hot-reload watcher started");
        Ok(())
    }

    /// Stops the hot-reload watcher, if running.
    #[cfg(feature = "watch")]
    pub fn stop_watching(&self) {
        *self.watcher.write() = None;
    }
}

/// Merges a per-project/session router override onto the global router
/// config, field by field: any field the override sets wins, anything it
/// leaves absent falls back to `base`.
fn merge_router_config(base: &RouterConfig, override_cfg: &RouterConfig) -> RouterConfig {
    RouterConfig {
        default: override_cfg.default.clone().or_else(|| base.default.clone()),
        background: override_cfg
            .background
            .clone()
            .or_else(|| base.background.clone()),
        think: override_cfg.think.clone().or_else(|| base.think.clone()),
        long_context: override_cfg
            .long_context
            .clone()
            .or_else(|| base.long_context.clone()),
        web_search: override_cfg
            .web_search
            .clone()
            .or_else(|| base.web_search.clone()),
        long_context_threshold: if override_cfg.long_context_threshold != RouterConfig::default().long_context_threshold {
            override_cfg.long_context_threshold
        } else {
            base.long_context_threshold
        },
    }
}

/// Resolves the effective `RouterConfig` for a request: reads
/// `~/.claude-code-router/<project_folder>/<session_id>.json` first (most
/// specific), then `~/.claude-code-router/<project_folder>/config.json`,
/// merging whichever is found onto `global`. Returns `global.router`
/// unchanged when neither file exists.
pub fn resolve_router_config(
    global: &RouterConfig,
    project_folder: &str,
    session_id: &str,
) -> RouterConfig {
    if project_folder.is_empty() {
        return global.clone();
    }

    let dir = ccr_home_dir().join(project_folder);
    let session_path = dir.join(format!("{session_id}.json"));
    let project_path = dir.join("config.json");

    for path in [&session_path, &project_path] {
        if let Ok(content) = std::fs::read_to_string(path) {
            match parse_jsonc::<GlobalConfig>(&content) {
                Ok(cfg) => return merge_router_config(global, &cfg.router),
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "failed to parse project router override, ignoring");
                }
            }
        }
    }

    global.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_yields_defaults() {
        let manager = RouterConfigManager::new("/nonexistent/path/config.json");
        let cfg = manager.config();
        assert!(cfg.router.default.is_none());
        assert_eq!(cfg.router.long_context_threshold, 60_000);
    }

    #[test]
    fn corrupt_config_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json at all").unwrap();

        let manager = RouterConfigManager::new(&path);
        assert!(manager.config().router.default.is_none());
    }

    #[test]
    fn valid_commented_config_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"// header
            { "router": { "default": "openai,gpt-4o" }, "providers": [] }"#,
        )
        .unwrap();

        let manager = RouterConfigManager::new(&path);
        assert_eq!(manager.config().router.default.as_deref(), Some("openai,gpt-4o"));
    }

    #[test]
    fn merge_prefers_override_fields_and_falls_back_for_the_rest() {
        let base = RouterConfig {
            default: Some("anthropic,claude-sonnet-4".to_string()),
            background: Some("anthropic,claude-haiku".to_string()),
            ..Default::default()
        };
        let over = RouterConfig {
            default: Some("openai,gpt-4o".to_string()),
            ..Default::default()
        };
        let merged = merge_router_config(&base, &over);
        assert_eq!(merged.default.as_deref(), Some("openai,gpt-4o"));
        assert_eq!(merged.background.as_deref(), Some("anthropic,claude-haiku"));
    }
}
