//! Registry Store: owns `projects.json` end to end — load/save, discovery,
//! and the mutating operations the router and CLI call.

mod discovery;
mod store;

pub use store::default_projects_file_path;

use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;
use uuid::Uuid;

use crate::types::{AppError, ModelInheritance, Project, ProjectsFile, Result};
use crate::validators;

/// Owns the single projects-file for the process. Writes are serialized
/// through `write_lock`; reads may run concurrently with each other but not
/// with a write in flight (the lock is held for the whole read-modify-write
/// cycle of every mutation below, so there is no TOCTOU window).
pub struct RegistryStore {
    path: PathBuf,
    write_lock: AsyncMutex<()>,
}

impl RegistryStore {
    /// Opens the registry backed by `path`. Does not touch the filesystem
    /// until a load or save is requested.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: AsyncMutex::new(()),
        }
    }

    /// Opens the registry at the default location
    /// (`~/.claude-code-router/projects.json`).
    pub fn open_default() -> Self {
        Self::new(default_projects_file_path())
    }

    /// Loads the current projects-file. See [`store::load`] for the
    /// missing-file and corrupt-file semantics.
    pub async fn load(&self) -> Result<ProjectsFile> {
        store::load(&self.path).await
    }

    async fn save(&self, data: &ProjectsFile) -> Result<()> {
        store::save(&self.path, data).await
    }

    /// `AddProject`: validates the path, rejects a duplicate path with
    /// `eExists`, discovers its agents and workflows, and persists it.
    pub async fn add_project(&self, path: &Path) -> Result<Project> {
        if !validators::is_valid_project_path(path).await {
            return Err(AppError::Invalid(format!(
                "not an absolute, existing directory: {}",
                path.display()
            )));
        }
        let canonical = validators::canonical_project_path(path).await;
        let canonical_str = canonical.to_string_lossy().to_string();

        let _guard = self.write_lock.lock().await;
        let mut data = self.load().await?;

        if data
            .projects
            .values()
            .any(|p| p.path == canonical_str)
        {
            return Err(AppError::Exists(format!(
                "project already registered at {}",
                canonical_str
            )));
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        let agents = discovery::discover_agents(&canonical).await;
        let workflows = discovery::scan_workflows(&canonical).await;

        let project = Project {
            id,
            name: canonical
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| canonical_str.clone()),
            path: canonical_str,
            created_at: now,
            updated_at: now,
            agents,
            workflows,
        };

        data.projects.insert(id.to_string(), project.clone());
        self.save(&data).await?;
        Ok(project)
    }

    /// `ScanProject`: re-runs discovery for an existing project. Fails hard
    /// with `eInvariant` if the rescan produces a UUID collision across its
    /// own agents (discovery is expected to be idempotent per-file; a
    /// collision means two distinct files now share a tag, which breaks the
    /// unique-within-project invariant).
    pub async fn scan_project(&self, id: Uuid) -> Result<Project> {
        let _guard = self.write_lock.lock().await;
        let mut data = self.load().await?;

        let key = id.to_string();
        let existing = data
            .projects
            .get(&key)
            .ok_or_else(|| AppError::NotFound(format!("no project with id {id}")))?;

        let project_path = PathBuf::from(&existing.path);
        let agents = discovery::discover_agents(&project_path).await;
        let workflows = discovery::scan_workflows(&project_path).await;

        let mut seen = std::collections::HashSet::new();
        for agent in &agents {
            if !seen.insert(agent.id) {
                return Err(AppError::Invariant(format!(
                    "duplicate agent id {} discovered during rescan",
                    agent.id
                )));
            }
        }
        seen.clear();
        for workflow in &workflows {
            if !seen.insert(workflow.id) {
                return Err(AppError::Invariant(format!(
                    "duplicate workflow id {} discovered during rescan",
                    workflow.id
                )));
            }
        }

        let project = data.projects.get_mut(&key).expect("checked above");
        project.agents = agents;
        project.workflows = workflows;
        project.updated_at = Utc::now();
        let updated = project.clone();

        self.save(&data).await?;
        Ok(updated)
    }

    /// `RemoveProject`.
    pub async fn remove_project(&self, id: Uuid) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut data = self.load().await?;
        let key = id.to_string();
        if data.projects.remove(&key).is_none() {
            return Err(AppError::NotFound(format!("no project with id {id}")));
        }
        self.save(&data).await
    }

    /// `ListProjects`: sorted ascending by name.
    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let data = self.load().await?;
        let mut projects: Vec<Project> = data.projects.into_values().collect();
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(projects)
    }

    /// `GetProject`.
    pub async fn get_project(&self, id: Uuid) -> Result<Option<Project>> {
        let data = self.load().await?;
        Ok(data.projects.get(&id.to_string()).cloned())
    }

    /// `SetAgentModel`: `model = None` clears the assignment.
    pub async fn set_agent_model(
        &self,
        project_id: Uuid,
        agent_id: Uuid,
        model: Option<String>,
    ) -> Result<()> {
        if let Some(m) = &model {
            if !validators::is_valid_model_string(m) {
                return Err(AppError::Invalid(format!("not a valid model string: {m}")));
            }
        }

        let _guard = self.write_lock.lock().await;
        let mut data = self.load().await?;
        let key = project_id.to_string();
        let project = data
            .projects
            .get_mut(&key)
            .ok_or_else(|| AppError::NotFound(format!("no project with id {project_id}")))?;
        let agent = project
            .agents
            .iter_mut()
            .find(|a| a.id == agent_id)
            .ok_or_else(|| AppError::NotFound(format!("no agent with id {agent_id}")))?;
        agent.model = model;
        project.updated_at = Utc::now();
        self.save(&data).await
    }

    /// `SetWorkflowModel`: `model = None` clears the assignment.
    pub async fn set_workflow_model(
        &self,
        project_id: Uuid,
        workflow_id: Uuid,
        model: Option<String>,
    ) -> Result<()> {
        if let Some(m) = &model {
            if !validators::is_valid_model_string(m) {
                return Err(AppError::Invalid(format!("not a valid model string: {m}")));
            }
        }

        let _guard = self.write_lock.lock().await;
        let mut data = self.load().await?;
        let key = project_id.to_string();
        let project = data
            .projects
            .get_mut(&key)
            .ok_or_else(|| AppError::NotFound(format!("no project with id {project_id}")))?;
        let workflow = project
            .workflows
            .iter_mut()
            .find(|w| w.id == workflow_id)
            .ok_or_else(|| AppError::NotFound(format!("no workflow with id {workflow_id}")))?;
        workflow.model = model;
        project.updated_at = Utc::now();
        self.save(&data).await
    }

    /// Sets a workflow's `modelInheritance` directly, alongside
    /// `set_workflow_model`, so a caller can toggle it without re-running
    /// discovery (which would re-read it from `workflow.yaml` and clobber
    /// the override).
    pub async fn set_workflow_inheritance(
        &self,
        project_id: Uuid,
        workflow_id: Uuid,
        inheritance: Option<ModelInheritance>,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut data = self.load().await?;
        let key = project_id.to_string();
        let project = data
            .projects
            .get_mut(&key)
            .ok_or_else(|| AppError::NotFound(format!("no project with id {project_id}")))?;
        let workflow = project
            .workflows
            .iter_mut()
            .find(|w| w.id == workflow_id)
            .ok_or_else(|| AppError::NotFound(format!("no workflow with id {workflow_id}")))?;
        workflow.model_inheritance = inheritance;
        project.updated_at = Utc::now();
        self.save(&data).await
    }

    /// `GetModelByAgentId`: scoped to `project_id` when given, otherwise the
    /// first match across all projects.
    pub async fn get_model_by_agent_id(
        &self,
        agent_id: Uuid,
        project_id: Option<Uuid>,
    ) -> Result<Option<String>> {
        let data = self.load().await?;
        let projects: Box<dyn Iterator<Item = &Project>> = match project_id {
            Some(pid) => Box::new(data.projects.get(&pid.to_string()).into_iter()),
            None => Box::new(data.projects.values()),
        };
        for project in projects {
            if let Some(agent) = project.agents.iter().find(|a| a.id == agent_id) {
                return Ok(agent.model.clone());
            }
        }
        Ok(None)
    }

    /// `GetModelByWorkflowId`: analogous to [`Self::get_model_by_agent_id`].
    pub async fn get_model_by_workflow_id(
        &self,
        workflow_id: Uuid,
        project_id: Option<Uuid>,
    ) -> Result<Option<String>> {
        let data = self.load().await?;
        let projects: Box<dyn Iterator<Item = &Project>> = match project_id {
            Some(pid) => Box::new(data.projects.get(&pid.to_string()).into_iter()),
            None => Box::new(data.projects.values()),
        };
        for project in projects {
            if let Some(workflow) = project.workflows.iter().find(|w| w.id == workflow_id) {
                return Ok(workflow.model.clone());
            }
        }
        Ok(None)
    }

    /// `GetWorkflowInheritance`: the router needs the workflow's own
    /// inheritance mode (step 7 of the priority chain) even when it has no
    /// model assigned, so this is split out from `get_model_by_workflow_id`.
    pub async fn get_workflow_inheritance(
        &self,
        workflow_id: Uuid,
        project_id: Uuid,
    ) -> Result<Option<ModelInheritance>> {
        let data = self.load().await?;
        let project = data
            .projects
            .get(&project_id.to_string())
            .ok_or_else(|| AppError::NotFound(format!("no project with id {project_id}")))?;
        Ok(project
            .workflows
            .iter()
            .find(|w| w.id == workflow_id)
            .and_then(|w| w.model_inheritance))
    }

    /// `DetectProject`: linear scan, first match wins.
    pub async fn detect_project(&self, agent_id: Uuid) -> Result<Option<Uuid>> {
        let data = self.load().await?;
        Ok(data
            .projects
            .values()
            .find(|p| p.agents.iter().any(|a| a.id == agent_id))
            .map(|p| p.id))
    }

    /// `DetectProjectByWorkflowId`: linear scan, first match wins.
    pub async fn detect_project_by_workflow_id(&self, workflow_id: Uuid) -> Result<Option<Uuid>> {
        let data = self.load().await?;
        Ok(data
            .projects
            .values()
            .find(|p| p.workflows.iter().any(|w| w.id == workflow_id))
            .map(|p| p.id))
    }

    /// `FindAgentFileById`: filesystem search under `claude_projects_root`
    /// for an agent `.md` file already tagged with `agent_id`, used for
    /// auto-registration of an identity the registry doesn't yet know
    /// about. Bounded by a project-tree depth so a huge home directory
    /// doesn't turn one request into a full-disk walk.
    pub async fn find_agent_file_by_id(
        &self,
        agent_id: Uuid,
        claude_projects_root: &Path,
    ) -> Result<Option<PathBuf>> {
        let root = claude_projects_root.to_path_buf();
        let needle = agent_id.to_string();

        tokio::task::spawn_blocking(move || {
            for entry in walkdir::WalkDir::new(&root)
                .max_depth(8)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("md") {
                    continue;
                }
                let Ok(content) = std::fs::read_to_string(path) else {
                    continue;
                };
                if content.contains(&needle) {
                    return Some(path.to_path_buf());
                }
            }
            None
        })
        .await
        .map_err(|e| AppError::Io(format!("agent file search task panicked: {e}")))
    }

    /// `AutoRegisterFromAgentFile`: walks up from `agent_file_path` to find
    /// the project root (the first ancestor containing `.bmad/bmm/agents`
    /// or `_bmad/bmm/agents`), then registers it via [`Self::add_project`].
    pub async fn auto_register_from_agent_file(&self, agent_file_path: &Path) -> Result<Project> {
        let mut dir = agent_file_path
            .parent()
            .ok_or_else(|| AppError::Invalid("agent file has no parent directory".to_string()))?;

        loop {
            if tokio::fs::metadata(dir.join(".bmad/bmm/agents")).await.is_ok()
                || tokio::fs::metadata(dir.join("_bmad/bmm/agents")).await.is_ok()
            {
                return self.add_project(dir).await;
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => {
                    warn!(
                        path = %agent_file_path.display(),
                        "auto-registration failed: no project root found above agent file"
                    );
                    return Err(AppError::NotFound(
                        "no project root found above agent file".to_string(),
                    ));
                }
            }
        }
    }
}
