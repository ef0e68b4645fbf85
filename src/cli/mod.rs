//! Command-line surface over the Registry Store.
//!
//! Sub-commands: `project add`, `project list`, `project scan`,
//! `project configure`, `project rm`, `project model`. Exit codes follow
//! the three-valued contract: 0 success, 1 user error (invalid
//! path/UUID/model string), 2 I/O or registry invariant violation.
//! Unlike the router, these commands do not swallow errors: they print a
//! diagnostic to stderr and exit non-zero.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::cache::SessionCache;
use crate::config::ccr_home_dir;
use crate::registry::RegistryStore;
use crate::types::AppError;
use crate::validators;

/// `ccr` - CCR Router CLI: registry management for the request-routing engine.
#[derive(Parser, Debug)]
#[command(
    name = "ccr",
    author,
    version,
    about = "Registry management for the CCR request-routing engine",
    long_about = "Manages the projects/agents/workflows registry the router consults to pick a \
                  provider,model for identity-tagged requests.\n\n\
                  Run a `project` subcommand to add, list, scan, configure, or remove a \
                  project, or to assign a model override to one of its agents."
)]
pub struct Cli {
    /// Path to the projects-file (defaults to `~/.claude-code-router/projects.json`).
    #[arg(long, global = true)]
    pub projects_file: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage registered projects, their agents, and their workflows.
    #[command(subcommand)]
    Project(ProjectCommands),
    /// Inspect or reset the session cache's hit/miss/eviction and scenario counters.
    ///
    /// The Session Cache lives inside the long-running transport process
    /// the router is embedded in, not in this CLI invocation: these
    /// commands report on a cache scoped to this one-shot process,
    /// so `stats` always prints zeros and `reset` is a no-op. They exist to
    /// round out the contract's shape for a future long-running `ccr`
    /// daemon mode; a real deployment reads metrics from the embedding
    /// process instead.
    #[command(subcommand)]
    Cache(CacheCommands),
}

/// `ccr cache <...>` subcommands.
#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Print the current hit/miss/eviction counters and per-scenario tally.
    Stats,
    /// Reset the hit/miss/eviction counters and per-scenario tally to zero.
    Reset,
}

/// `ccr project <...>` subcommands.
#[derive(Subcommand, Debug)]
pub enum ProjectCommands {
    /// Register a new project and scan it for agents and workflows.
    Add {
        /// Absolute path to the project root.
        path: PathBuf,
    },
    /// List all registered projects, sorted by name.
    List,
    /// Re-scan a project's agents and workflows.
    Scan {
        /// The project's UUID.
        id: String,
    },
    /// Show a project's effective router configuration override, if any.
    Configure {
        /// The project's UUID.
        id: String,
    },
    /// Remove a registered project.
    Rm {
        /// The project's UUID.
        id: String,
    },
    /// Assign (or clear, with `--clear`) a `provider,model` override for an agent.
    Model {
        /// The agent's UUID.
        agent_id: String,
        /// The `provider,model` string, e.g. `openai,gpt-4o`. Omit with `--clear`.
        model: Option<String>,
        /// Clear the agent's model override instead of setting one.
        #[arg(long)]
        clear: bool,
    },
}

/// Parses a CLI-supplied UUID string, surfacing `eInvalid` (exit code 1) on failure.
fn parse_uuid(label: &str, s: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(s).map_err(|_| AppError::Invalid(format!("{label} is not a valid UUID: {s}")))
}

fn registry_for(projects_file: Option<PathBuf>) -> RegistryStore {
    match projects_file {
        Some(path) => RegistryStore::new(path),
        None => RegistryStore::open_default(),
    }
}

/// Runs the parsed CLI, printing output/diagnostics and returning the
/// process exit code per the three-valued contract (0 success, 1 user
/// error, 2 I/O/invariant violation).
pub async fn run(cli: Cli) -> i32 {
    let registry = registry_for(cli.projects_file);
    let result = match cli.command {
        Commands::Project(cmd) => run_project(&registry, cmd).await,
        Commands::Cache(cmd) => run_cache(cmd),
    };

    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            e.exit_code()
        }
    }
}

async fn run_project(registry: &RegistryStore, cmd: ProjectCommands) -> Result<(), AppError> {
    match cmd {
        ProjectCommands::Add { path } => {
            let project = registry.add_project(&path).await?;
            println!(
                "added project {} ({}) — {} agents, {} workflows",
                project.name,
                project.id,
                project.agents.len(),
                project.workflows.len()
            );
            Ok(())
        }
        ProjectCommands::List => {
            let projects = registry.list_projects().await?;
            if projects.is_empty() {
                println!("no projects registered");
                return Ok(());
            }
            for project in projects {
                println!(
                    "{}  {}  {}  ({} agents, {} workflows)",
                    project.id,
                    project.name,
                    project.path,
                    project.agents.len(),
                    project.workflows.len()
                );
            }
            Ok(())
        }
        ProjectCommands::Scan { id } => {
            let id = parse_uuid("project id", &id)?;
            let project = registry.scan_project(id).await?;
            println!(
                "scanned {} — {} agents, {} workflows",
                project.name,
                project.agents.len(),
                project.workflows.len()
            );
            Ok(())
        }
        ProjectCommands::Configure { id } => {
            let id = parse_uuid("project id", &id)?;
            let project = registry
                .get_project(id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("project {id}")))?;
            let folder = project_folder_name(&project.path);
            let dir = ccr_home_dir().join(&folder);
            let path = dir.join("config.json");
            match std::fs::read_to_string(&path) {
                Ok(content) => println!("{} ({}):\n{content}", project.name, path.display()),
                Err(_) => println!(
                    "{} has no router override at {} — requests fall through to the global config",
                    project.name,
                    path.display()
                ),
            }
            Ok(())
        }
        ProjectCommands::Rm { id } => {
            let id = parse_uuid("project id", &id)?;
            registry.remove_project(id).await?;
            println!("removed project {id}");
            Ok(())
        }
        ProjectCommands::Model { agent_id, model, clear } => {
            let agent_id = parse_uuid("agent id", &agent_id)?;
            let model = if clear {
                None
            } else {
                let m = model.ok_or_else(|| {
                    AppError::Invalid("MODEL is required unless --clear is given".to_string())
                })?;
                if !validators::is_valid_model_string(&m) {
                    return Err(AppError::Invalid(format!("not a valid provider,model string: {m}")));
                }
                Some(m)
            };
            let project_id = registry
                .detect_project(agent_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("no project owns agent {agent_id}")))?;
            registry.set_agent_model(project_id, agent_id, model.clone()).await?;
            match model {
                Some(m) => println!("set agent {agent_id} model to {m}"),
                None => println!("cleared agent {agent_id} model override"),
            }
            Ok(())
        }
    }
}

fn run_cache(cmd: CacheCommands) -> Result<(), AppError> {
    let cache = SessionCache::new();
    match cmd {
        CacheCommands::Stats => {
            let metrics = cache.router_metrics();
            println!(
                "hits={} misses={} evictions={} size={} hit_rate={:.2}",
                metrics.cache.hits,
                metrics.cache.misses,
                metrics.cache.evictions,
                metrics.cache.size,
                metrics.cache.hit_rate()
            );
            for scenario in crate::types::ScenarioType::ALL {
                println!("  {scenario}: {}", metrics.scenario_counts.get(&scenario).copied().unwrap_or(0));
            }
        }
        CacheCommands::Reset => {
            cache.reset();
            println!("cache reset");
        }
    }
    Ok(())
}

/// Derives a filesystem-safe project folder name from a project path, the
/// same convention the router's `resolve_project_folder` assumes for
/// per-project config overrides.
fn project_folder_name(path: &str) -> String {
    PathBuf::from(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.replace(['/', '\\'], "_"))
}
