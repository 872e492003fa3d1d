//! Inventory data model
//!
//! The project -> dataset -> table tree produced by a refresh and stored in
//! the snapshot. Field names on disk match what the browse front end reads.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A BigQuery table (leaf of the tree)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    #[serde(rename = "tableId")]
    pub id: String,
    /// Free-form labels; may be empty
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// A BigQuery dataset and the tables fetched for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(rename = "datasetId")]
    pub id: String,
    /// Tables in fetch order
    #[serde(default)]
    pub tables: Vec<Table>,
}

/// A GCP project with its full dataset/table tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Stable project identifier
    #[serde(rename = "projectId")]
    pub id: String,
    /// Human friendly name, may be empty
    #[serde(rename = "projectName", default)]
    pub display_name: String,
    #[serde(default)]
    pub datasets: Vec<Dataset>,
}

impl Project {
    pub fn dataset(&self, dataset_id: &str) -> Option<&Dataset> {
        self.datasets.iter().find(|d| d.id == dataset_id)
    }

    pub fn table_count(&self) -> usize {
        self.datasets.iter().map(|d| d.tables.len()).sum()
    }
}

/// Lightweight projection of [`Project`] used for the top-level browse list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectIndexEntry {
    #[serde(rename = "projectId")]
    pub id: String,
    #[serde(rename = "projectName", default)]
    pub display_name: String,
}

impl From<&Project> for ProjectIndexEntry {
    fn from(project: &Project) -> Self {
        Self {
            id: project.id.clone(),
            display_name: project.display_name.clone(),
        }
    }
}

/// The whole tree built by one refresh, projects ordered by id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    pub projects: Vec<Project>,
}

impl Inventory {
    pub fn index(&self) -> Vec<ProjectIndexEntry> {
        self.projects.iter().map(ProjectIndexEntry::from).collect()
    }

    pub fn project(&self, project_id: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.id == project_id)
    }

    pub fn dataset_count(&self) -> usize {
        self.projects.iter().map(|p| p.datasets.len()).sum()
    }

    pub fn table_count(&self) -> usize {
        self.projects.iter().map(Project::table_count).sum()
    }
}

/// Project metadata as returned by the project listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDescription {
    pub id: String,
    pub display_name: String,
}

/// Table metadata as returned by the table listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescription {
    pub id: String,
    pub labels: HashMap<String, String>,
}

impl From<TableDescription> for Table {
    fn from(desc: TableDescription) -> Self {
        Self {
            id: desc.id,
            labels: desc.labels,
        }
    }
}
