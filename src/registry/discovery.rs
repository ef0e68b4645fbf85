//! Agent/workflow discovery and ID injection.
//!
//! Discovery glob-scans a project tree for `.md` agent files and
//! `workflow.yaml` workflow files; injection is the idempotent "adopt the
//! existing tag, or append a fresh one" operation.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing::warn;
use uuid::Uuid;

use crate::types::{AppError, ModelInheritance, Result, Workflow};

fn agent_tag_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"(?i)<!--\s*CCR-AGENT-ID\s*:\s*([0-9a-fA-F-]{36})\s*-->")
            .expect("static pattern")
    })
}

fn workflow_tag_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"(?i)<!--\s*CCR-WORKFLOW-ID\s*:\s*([0-9a-fA-F-]{36})\s*-->")
            .expect("static pattern")
    })
}

fn find_tagged_id(content: &str, re: &regex::Regex) -> Option<Uuid> {
    let caps = re.captures(content)?;
    let raw = caps.get(1)?.as_str();
    match Uuid::parse_str(raw) {
        Ok(u) if u.get_version_num() == 4 => Some(u),
        _ => None,
    }
}

/// The separator prepended to a freshly-generated tag, chosen so the file
/// never ends with three-or-more blank lines nor runs the tag into existing
/// content.
fn append_separator(content: &str) -> &'static str {
    if content.is_empty() || content.ends_with("\n\n") {
        ""
    } else if content.ends_with('\n') {
        "\n"
    } else {
        "\n\n"
    }
}

async fn probe_file_writable(path: &Path) -> Result<()> {
    tokio::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .await
        .map(|_| ())
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                AppError::Perm(format!("file not writable: {}", path.display()))
            } else {
                AppError::from(e)
            }
        })
}

/// Idempotently ensures `path` (an agent `.md` file) carries a
/// `CCR-AGENT-ID` tag, returning the id. If a valid tag already exists it
/// is adopted unchanged; otherwise a fresh UUIDv4 is appended, guarded by
/// the same backup-and-restore rollback as the projects-file save.
pub async fn inject_agent_id(path: &Path) -> Result<Uuid> {
    inject_tag(path, "CCR-AGENT-ID", agent_tag_regex()).await
}

/// Same idempotent injection for a `workflow.yaml`'s `CCR-WORKFLOW-ID` tag.
/// The tag is appended as a YAML comment (`# <!-- CCR-WORKFLOW-ID: ... -->`)
/// so the file remains parseable as YAML after injection.
pub async fn inject_workflow_id(path: &Path) -> Result<Uuid> {
    inject_tag(path, "CCR-WORKFLOW-ID", workflow_tag_regex()).await
}

async fn inject_tag(path: &Path, marker: &str, re: &regex::Regex) -> Result<Uuid> {
    probe_file_writable(path).await?;

    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(AppError::from)?;

    if let Some(id) = find_tagged_id(&content, re) {
        return Ok(id);
    }

    let id = Uuid::new_v4();
    debug_assert_eq!(id.get_version_num(), 4);

    let backup = {
        let mut s = path.as_os_str().to_owned();
        s.push(".backup");
        PathBuf::from(s)
    };
    tokio::fs::copy(path, &backup)
        .await
        .map_err(AppError::from)?;

    let separator = append_separator(&content);
    let tag_line = if marker == "CCR-WORKFLOW-ID" {
        format!("# <!-- {marker}: {id} -->\n")
    } else {
        format!("<!-- {marker}: {id} -->")
    };
    let new_content = format!("{content}{separator}{tag_line}");

    match tokio::fs::write(path, &new_content).await {
        Ok(()) => {
            if let Err(e) = tokio::fs::remove_file(&backup).await {
                warn!(error = %e, path = %backup.display(), "failed to remove id-injection backup");
            }
            Ok(id)
        }
        Err(e) => {
            if let Err(restore_err) = tokio::fs::copy(&backup, path).await {
                warn!(error = %restore_err, "failed to restore file after failed id injection");
            }
            let _ = tokio::fs::remove_file(&backup).await;
            Err(AppError::from(e))
        }
    }
}

/// Both roots are tolerated for agent discovery; `.bmad` is tried
/// first and wins when both exist. See DESIGN.md for why both exist.
const AGENT_ROOTS: [&str; 2] = [".bmad/bmm/agents", "_bmad/bmm/agents"];
const WORKFLOW_ROOTS: [&str; 2] = [".bmad/bmm/workflows", "_bmad/bmm/workflows"];

/// Scans `<project_path>/.bmad/bmm/agents/*.md` (falling back to the
/// `_bmad` root) for agent files, injecting-or-reading an id for each.
/// Directory-level permission errors are swallowed with a warning and
/// yield an empty sequence; a failure on one file skips only that file.
pub async fn discover_agents(project_path: &Path) -> Vec<crate::types::Agent> {
    let mut agents = Vec::new();

    for root in AGENT_ROOTS {
        let dir = project_path.join(root);
        if tokio::fs::metadata(&dir).await.is_err() {
            continue;
        }

        let pattern = dir.join("*.md");
        let pattern_str = match pattern.to_str() {
            Some(s) => s,
            None => continue,
        };

        let paths = match glob::glob(pattern_str) {
            Ok(paths) => paths,
            Err(e) => {
                warn!(error = %e, dir = %dir.display(), "failed to glob agents directory");
                continue;
            }
        };

        for entry in paths {
            let path = match entry {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "failed to read a directory entry while discovering agents");
                    continue;
                }
            };

            match inject_agent_id(&path).await {
                Ok(id) => {
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default();
                    let relative_path = path
                        .strip_prefix(project_path)
                        .unwrap_or(&path)
                        .to_string_lossy()
                        .to_string();
                    agents.push(crate::types::Agent {
                        id,
                        name,
                        relative_path,
                        absolute_path: path.to_string_lossy().to_string(),
                        model: None,
                    });
                }
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "skipping agent file");
                }
            }
        }

        // Only scan one root: if `.bmad` exists we don't also read `_bmad`.
        break;
    }

    agents
}

#[derive(Debug, serde::Deserialize)]
struct RawWorkflowYaml {
    name: Option<String>,
    description: Option<String>,
    #[serde(rename = "modelInheritance")]
    model_inheritance: Option<String>,
    model: Option<String>,
}

/// Scans each subdirectory of `<project_path>/_bmad/bmm/workflows` (or the
/// `.bmad` root) containing a `workflow.yaml`, parsing it tolerantly:
/// `name` defaults to the directory name, `description` to empty, and an
/// invalid `modelInheritance` is coerced to absent with a warning.
pub async fn scan_workflows(project_path: &Path) -> Vec<Workflow> {
    let mut workflows = Vec::new();

    for root in WORKFLOW_ROOTS {
        let dir = project_path.join(root);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(_) => continue,
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(e)) => e,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "failed to read workflows directory entry");
                    break;
                }
            };

            let workflow_dir = entry.path();
            if !workflow_dir.is_dir() {
                continue;
            }
            let yaml_path = workflow_dir.join("workflow.yaml");
            if tokio::fs::metadata(&yaml_path).await.is_err() {
                continue;
            }

            match build_workflow(&yaml_path, &workflow_dir, project_path).await {
                Ok(wf) => workflows.push(wf),
                Err(e) => {
                    warn!(error = %e, path = %yaml_path.display(), "skipping workflow");
                }
            }
        }

        break;
    }

    workflows
}

async fn build_workflow(
    yaml_path: &Path,
    workflow_dir: &Path,
    project_path: &Path,
) -> Result<Workflow> {
    let id = inject_workflow_id(yaml_path).await?;

    let content = tokio::fs::read_to_string(yaml_path)
        .await
        .map_err(AppError::from)?;

    let raw: RawWorkflowYaml = serde_yaml::from_str(&content).unwrap_or(RawWorkflowYaml {
        name: None,
        description: None,
        model_inheritance: None,
        model: None,
    });

    let dir_name = workflow_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let model_inheritance = match raw.model_inheritance.as_deref() {
        None => None,
        Some("inherit") => Some(ModelInheritance::Inherit),
        Some("default") => Some(ModelInheritance::Default),
        Some(other) => {
            warn!(value = other, "invalid modelInheritance, coercing to absent");
            None
        }
    };

    Ok(Workflow {
        id,
        name: raw.name.unwrap_or(dir_name),
        description: raw.description.unwrap_or_default(),
        relative_path: workflow_dir
            .strip_prefix(project_path)
            .unwrap_or(workflow_dir)
            .to_string_lossy()
            .to_string(),
        absolute_path: workflow_dir.to_string_lossy().to_string(),
        model: raw.model,
        model_inheritance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_separator_adds_two_newlines_for_no_trailing_newline() {
        assert_eq!(append_separator("hello"), "\n\n");
    }

    #[test]
    fn append_separator_adds_one_newline_for_single_trailing_newline() {
        assert_eq!(append_separator("hello\n"), "\n");
    }

    #[test]
    fn append_separator_adds_nothing_for_double_trailing_newline() {
        assert_eq!(append_separator("hello\n\n"), "");
        assert_eq!(append_separator(""), "");
    }

    #[tokio::test]
    async fn inject_agent_id_is_idempotent_and_preserves_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dev.md");
        tokio::fs::write(&path, "# Dev Agent\n\nSome persona text.\n")
            .await
            .unwrap();

        let id1 = inject_agent_id(&path).await.unwrap();
        let content_after_first = tokio::fs::read_to_string(&path).await.unwrap();

        let id2 = inject_agent_id(&path).await.unwrap();
        let content_after_second = tokio::fs::read_to_string(&path).await.unwrap();

        assert_eq!(id1, id2);
        assert_eq!(content_after_first, content_after_second);
        assert!(content_after_first.contains("Some persona text."));
        assert!(content_after_first.contains(&id1.to_string()));
    }

    #[tokio::test]
    async fn inject_agent_id_adopts_existing_tag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dev.md");
        let existing = Uuid::new_v4();
        tokio::fs::write(
            &path,
            format!("# Dev\n\n<!-- CCR-AGENT-ID: {existing} -->"),
        )
        .await
        .unwrap();

        let id = inject_agent_id(&path).await.unwrap();
        assert_eq!(id, existing);
    }

    #[tokio::test]
    async fn inject_workflow_id_keeps_file_valid_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workflow.yaml");
        tokio::fs::write(&path, "name: party-mode\ndescription: test\n")
            .await
            .unwrap();

        inject_workflow_id(&path).await.unwrap();
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&content).unwrap();
        assert_eq!(parsed["name"], "party-mode");
    }
}
