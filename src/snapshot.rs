//! Snapshot Store
//!
//! On-disk layout under the data directory:
//!
//! ```text
//! projects.json              index: [{projectId, projectName}]
//! projects/<projectId>.json  one full project tree per file
//! refresh-report.json        summary of the last refresh
//! ```
//!
//! The index is replaced atomically. The details directory is wiped before
//! it is repopulated, so a project removed upstream never survives a
//! refresh.

use crate::model::{Inventory, Project, ProjectIndexEntry};
use crate::refresh::RefreshReport;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

const INDEX_FILE: &str = "projects.json";
const PROJECTS_DIR: &str = "projects";
const REPORT_FILE: &str = "refresh-report.json";

/// Snapshot read/write errors
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// The artifact does not exist yet
    #[error("No snapshot data at {path}. Run a refresh first")]
    NotFound { path: PathBuf },

    /// The artifact exists but cannot be decoded
    #[error("Snapshot data at {path} is unreadable. Run a refresh to rebuild it: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The id cannot name a project file
    #[error("Invalid project id '{id}'")]
    InvalidProjectId { id: String },

    /// Filesystem failure
    #[error("Snapshot I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SnapshotError {
    /// True when the caller should treat this as "no data, run a refresh"
    pub fn is_missing_data(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::Malformed { .. } | Self::InvalidProjectId { .. }
        )
    }

    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Project ids become file names; reject anything that could escape the
/// details directory
fn validate_project_id(id: &str) -> SnapshotResult<()> {
    let valid = !id.is_empty()
        && id != "."
        && id != ".."
        && !id.contains(|c: char| matches!(c, '/' | '\\' | '\0'))
        && !id.starts_with('.');

    if valid {
        Ok(())
    } else {
        Err(SnapshotError::InvalidProjectId { id: id.to_string() })
    }
}

/// Local snapshot rooted at one directory
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    fn projects_dir(&self) -> PathBuf {
        self.root.join(PROJECTS_DIR)
    }

    fn project_path(&self, project_id: &str) -> PathBuf {
        self.projects_dir().join(format!("{}.json", project_id))
    }

    fn report_path(&self) -> PathBuf {
        self.root.join(REPORT_FILE)
    }

    // =========================================================================
    // Write path
    // =========================================================================

    /// Persist a refreshed inventory.
    ///
    /// Writes the index first, then recreates the details directory and
    /// writes one file per project. The first failure aborts the rest.
    pub fn write(&self, inventory: &Inventory) -> SnapshotResult<()> {
        for project in &inventory.projects {
            validate_project_id(&project.id)?;
        }

        fs::create_dir_all(&self.root).map_err(|e| SnapshotError::io(&self.root, e))?;

        write_json_atomic(&self.index_path(), &inventory.index())?;

        let dir = self.projects_dir();
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(SnapshotError::io(&dir, e)),
        }
        fs::create_dir_all(&dir).map_err(|e| SnapshotError::io(&dir, e))?;

        for project in &inventory.projects {
            let path = self.project_path(&project.id);
            let content = serde_json::to_vec(project)
                .map_err(|e| SnapshotError::io(&path, io::Error::other(e)))?;
            fs::write(&path, content).map_err(|e| SnapshotError::io(&path, e))?;
        }

        tracing::info!(
            "Stored snapshot of {} projects in {}",
            inventory.projects.len(),
            self.root.display()
        );

        Ok(())
    }

    /// Persist the summary of the last refresh
    pub fn write_report(&self, report: &RefreshReport) -> SnapshotResult<()> {
        fs::create_dir_all(&self.root).map_err(|e| SnapshotError::io(&self.root, e))?;
        write_json_atomic(&self.report_path(), report)
    }

    // =========================================================================
    // Read path
    // =========================================================================

    /// Load the project index for browsing
    pub fn load_index(&self) -> SnapshotResult<Vec<ProjectIndexEntry>> {
        read_json(&self.index_path())
    }

    /// Load one project's full tree
    pub fn load_project(&self, project_id: &str) -> SnapshotResult<Project> {
        validate_project_id(project_id)?;
        read_json(&self.project_path(project_id))
    }

    /// Load the summary of the last refresh
    pub fn load_report(&self) -> SnapshotResult<RefreshReport> {
        read_json(&self.report_path())
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> SnapshotResult<T> {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(SnapshotError::NotFound {
                path: path.to_path_buf(),
            })
        }
        Err(e) => return Err(SnapshotError::io(path, e)),
    };

    serde_json::from_slice(&content).map_err(|source| SnapshotError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

/// Write to a temporary file next to `path`, then rename it into place
fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> SnapshotResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| SnapshotError::io(dir, e))?;

    let content = serde_json::to_vec(value).map_err(|e| SnapshotError::io(path, io::Error::other(e)))?;
    tmp.write_all(&content)
        .and_then(|()| tmp.flush())
        .map_err(|e| SnapshotError::io(path, e))?;
    tmp.persist(path).map_err(|e| SnapshotError::io(path, e.error))?;

    Ok(())
}
