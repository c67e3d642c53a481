//! Project records
//!
//! Persists projects and their container records to
//! `~/.local/share/devforge/projects.json`

use crate::{CoreError, Result};
use chrono::{DateTime, Utc};
use devforge_config::ForgeConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Write content to a file atomically using a temp-file-then-rename pattern.
pub(crate) fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(content)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Kind of starter application a project is created with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    Mern,
    React,
    Node,
    Python,
}

impl ProjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mern => "mern",
            Self::React => "react",
            Self::Node => "node",
            Self::Python => "python",
        }
    }

    /// Whether the project runs a Vite frontend that can be previewed
    pub fn has_frontend(&self) -> bool {
        matches!(self, Self::Mern | Self::React)
    }
}

impl std::fmt::Display for ProjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProjectType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "mern" => Ok(Self::Mern),
            "react" => Ok(Self::React),
            "node" => Ok(Self::Node),
            "python" => Ok(Self::Python),
            other => Err(CoreError::InvalidState(format!(
                "unknown project type '{}' (expected mern, react, node or python)",
                other
            ))),
        }
    }
}

/// Coarse container status kept on the project record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Running,
    Stopped,
    Error,
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Host ports bound to the container's 5173 and 3001
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortPair {
    pub frontend: u16,
    pub backend: u16,
}

/// The running environment bound to a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Engine-assigned container ID
    pub container_id: String,
    pub container_name: String,
    pub image: String,
    pub image_id: String,
    pub status: RecordStatus,
    pub ports: PortPair,
    pub memory_bytes: i64,
    pub nano_cpus: i64,
    pub created_at: DateTime<Utc>,
    pub last_health_check_at: Option<DateTime<Utc>>,
}

/// A user's isolated workspace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub project_type: ProjectType,
    /// Host directory bind-mounted at `/app`
    pub root_path: PathBuf,
    pub container: ContainerRecord,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

/// Store for all projects
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProjectStore {
    /// Version for forward compatibility
    pub version: u32,
    /// Projects indexed by ID
    pub projects: HashMap<String, Project>,
}

impl ProjectStore {
    const CURRENT_VERSION: u32 = 1;

    pub fn new() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            projects: HashMap::new(),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let content = std::fs::read_to_string(path)?;
        let store: Self = serde_json::from_str(&content)?;

        if store.version > Self::CURRENT_VERSION {
            tracing::warn!(
                "Project file version {} is newer than supported version {}",
                store.version,
                Self::CURRENT_VERSION
            );
        }

        Ok(store)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        atomic_write(path, content.as_bytes())?;

        Ok(())
    }

    /// Default path of the project file
    pub fn store_path() -> Result<PathBuf> {
        Ok(ForgeConfig::data_dir()?.join("projects.json"))
    }

    pub fn get(&self, id: &str) -> Option<&Project> {
        self.projects.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Project> {
        self.projects.get_mut(id)
    }

    /// All projects owned by `user_id`, oldest first
    pub fn find_by_owner(&self, user_id: &str) -> Vec<&Project> {
        let mut projects: Vec<_> = self
            .projects
            .values()
            .filter(|p| p.user_id == user_id)
            .collect();
        projects.sort_by_key(|p| p.created_at);
        projects
    }

    /// Find the project whose container has the given ID
    pub fn find_by_container(&self, container_id: &str) -> Option<&Project> {
        self.projects
            .values()
            .find(|p| p.container.container_id == container_id)
    }

    /// Insert or replace a project
    pub fn upsert(&mut self, mut project: Project) {
        project.updated_at = Utc::now();
        self.projects.insert(project.id.clone(), project);
    }

    pub fn remove(&mut self, id: &str) -> Option<Project> {
        self.projects.remove(id)
    }

    pub fn list(&self) -> Vec<&Project> {
        self.projects.values().collect()
    }

    /// Update last_accessed timestamp for a project
    pub fn touch(&mut self, id: &str) {
        if let Some(project) = self.projects.get_mut(id) {
            project.last_accessed = Utc::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn make_project(id: &str, user: &str) -> Project {
        let now = Utc::now();
        Project {
            id: id.to_string(),
            user_id: user.to_string(),
            name: format!("{}-name", id),
            project_type: ProjectType::React,
            root_path: PathBuf::from(format!("/docker-projects/{}/{}", user, id)),
            container: ContainerRecord {
                container_id: format!("cid-{}", id),
                container_name: format!("devforge-{}-{}", user, id),
                image: "node:18-alpine".to_string(),
                image_id: "sha256:abc".to_string(),
                status: RecordStatus::Running,
                ports: PortPair {
                    frontend: 50000,
                    backend: 60001,
                },
                memory_bytes: 512 * 1024 * 1024,
                nano_cpus: 500_000_000,
                created_at: now,
                last_health_check_at: None,
            },
            created_at: now,
            updated_at: now,
            last_accessed: now,
        }
    }

    #[test]
    fn test_project_type_parse() {
        assert_eq!("MERN".parse::<ProjectType>().unwrap(), ProjectType::Mern);
        assert_eq!("python".parse::<ProjectType>().unwrap(), ProjectType::Python);
        assert!("rust".parse::<ProjectType>().is_err());
        assert!(ProjectType::React.has_frontend());
        assert!(!ProjectType::Node.has_frontend());
    }

    #[test]
    fn test_store_crud() {
        let mut store = ProjectStore::new();
        store.upsert(make_project("p1", "alice"));
        store.upsert(make_project("p2", "bob"));

        assert!(store.get("p1").is_some());
        assert_eq!(store.find_by_owner("alice").len(), 1);
        assert_eq!(store.find_by_container("cid-p2").unwrap().id, "p2");

        assert!(store.remove("p1").is_some());
        assert!(store.get("p1").is_none());
        assert!(store.remove("p1").is_none());
    }

    #[test]
    fn test_find_by_owner_sorted() {
        let mut store = ProjectStore::new();
        let mut older = make_project("old", "alice");
        older.created_at = Utc::now() - Duration::hours(2);
        store.upsert(make_project("new", "alice"));
        store.upsert(older);

        let ids: Vec<_> = store.find_by_owner("alice").iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["old", "new"]);
    }

    #[test]
    fn test_touch_updates_last_accessed() {
        let mut store = ProjectStore::new();
        let mut project = make_project("p1", "alice");
        project.last_accessed = Utc::now() - Duration::days(1);
        let before = project.last_accessed;
        store.upsert(project);

        store.touch("p1");
        assert!(store.get("p1").unwrap().last_accessed > before);
        store.touch("missing");
    }

    #[test]
    fn test_save_load_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("projects.json");

        let mut store = ProjectStore::new();
        store.upsert(make_project("p1", "alice"));
        store.save_to(&path).unwrap();

        let loaded = ProjectStore::load_from(&path).unwrap();
        assert_eq!(loaded.get("p1"), store.get("p1"));
        assert_eq!(loaded.version, 1);
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("projects.json");
        ProjectStore::new().save_to(&path).unwrap();

        let names: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["projects.json"]);
    }

    #[test]
    fn test_load_missing_and_corrupted() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("projects.json");
        assert!(ProjectStore::load_from(&path).unwrap().projects.is_empty());

        std::fs::write(&path, "{ not json").unwrap();
        assert!(ProjectStore::load_from(&path).is_err());
    }
}
