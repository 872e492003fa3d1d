//! Browse items
//!
//! Turns snapshot data into flat item lists for a launcher: one list per
//! level of the hierarchy, each item linking to the BigQuery console.

use crate::model::{Project, ProjectIndexEntry};
use serde::Serialize;
use std::collections::BTreeMap;
use urlencoding::encode;

const CONSOLE_URL: &str = "https://console.cloud.google.com/bigquery";

/// One selectable entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowseItem {
    pub title: String,
    pub subtitle: String,
    pub uid: String,
    /// Text handed to the launcher's matcher
    pub match_text: String,
    pub url: String,
    /// Values the launcher passes to the next drill-down step
    pub variables: BTreeMap<String, String>,
}

pub fn project_url(project_id: &str) -> String {
    let p = encode(project_id);
    format!("{CONSOLE_URL}?project={p}&p={p}")
}

pub fn dataset_url(project_id: &str, dataset_id: &str) -> String {
    format!(
        "{}&d={}&page=dataset",
        project_url(project_id),
        encode(dataset_id)
    )
}

pub fn table_url(project_id: &str, dataset_id: &str, table_id: &str) -> String {
    format!(
        "{}&d={}&t={}&page=table",
        project_url(project_id),
        encode(dataset_id),
        encode(table_id)
    )
}

fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Top-level list: one item per project
pub fn project_items(index: &[ProjectIndexEntry]) -> Vec<BrowseItem> {
    index
        .iter()
        .map(|entry| {
            let title = if entry.display_name.is_empty() {
                entry.id.clone()
            } else {
                entry.display_name.clone()
            };
            BrowseItem {
                match_text: format!("{} {}", title, entry.id),
                title,
                subtitle: entry.id.clone(),
                uid: entry.id.clone(),
                url: project_url(&entry.id),
                variables: vars(&[("project", entry.id.as_str())]),
            }
        })
        .collect()
}

/// Datasets of one project
pub fn dataset_items(project: &Project) -> Vec<BrowseItem> {
    project
        .datasets
        .iter()
        .map(|dataset| BrowseItem {
            title: dataset.id.clone(),
            subtitle: format!("{} tables", dataset.tables.len()),
            uid: format!("{}.{}", project.id, dataset.id),
            match_text: dataset.id.clone(),
            url: dataset_url(&project.id, &dataset.id),
            variables: vars(&[
                ("project", project.id.as_str()),
                ("dataset", dataset.id.as_str()),
            ]),
        })
        .collect()
}

/// Tables of one dataset; empty when the dataset is unknown.
///
/// Labelled tables get their labels as subtitle and their label values in
/// the match text, so searching for `prod` finds tables labelled `env: prod`.
pub fn table_items(project: &Project, dataset_id: &str) -> Vec<BrowseItem> {
    let Some(dataset) = project.dataset(dataset_id) else {
        return Vec::new();
    };

    dataset
        .tables
        .iter()
        .map(|table| {
            let mut labels: Vec<(&String, &String)> = table.labels.iter().collect();
            labels.sort();

            let spaced_id = table.id.replace('_', " ");
            let (subtitle, match_text) = if labels.is_empty() {
                (table.id.clone(), spaced_id)
            } else {
                let subtitle = labels
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v))
                    .collect::<Vec<_>>()
                    .join(", ");
                let values = labels
                    .iter()
                    .map(|(_, v)| v.as_str())
                    .collect::<Vec<_>>()
                    .join(" ");
                let match_text = format!("{} {} {}", values, spaced_id, subtitle);
                (subtitle, match_text)
            };

            BrowseItem {
                title: table.id.clone(),
                subtitle,
                uid: format!("{}.{}.{}", project.id, dataset.id, table.id),
                match_text,
                url: table_url(&project.id, &dataset.id, &table.id),
                variables: vars(&[
                    ("project", project.id.as_str()),
                    ("dataset", dataset.id.as_str()),
                    ("table", table.id.as_str()),
                ]),
            }
        })
        .collect()
}
