//! BigQuery listing endpoints
//!
//! The three paginated list calls a refresh needs. Each method fetches exactly
//! one page; [`crate::resource::fetch_all`] drives them to completion.

use super::client::GcpClient;
use crate::model::{ProjectDescription, TableDescription};
use crate::resource::{Page, PageRequest};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// Remote listing API
#[async_trait]
pub trait BigQueryApi: Send + Sync {
    /// List projects visible to the credentials in use
    async fn list_projects(&self, page: &PageRequest) -> Result<Page<ProjectDescription>>;

    /// List dataset ids in a project
    async fn list_datasets(&self, project_id: &str, page: &PageRequest) -> Result<Page<String>>;

    /// List tables in a dataset
    async fn list_tables(
        &self,
        project_id: &str,
        dataset_id: &str,
        page: &PageRequest,
    ) -> Result<Page<TableDescription>>;
}

fn page_query(page: &PageRequest) -> [(&'static str, Option<String>); 2] {
    [
        ("pageToken", page.page_token.clone()),
        ("maxResults", page.max_results.map(|n| n.to_string())),
    ]
}

fn next_page_token(response: &Value) -> Option<String> {
    response
        .get("nextPageToken")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn items<'a>(response: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    response
        .get(key)
        .and_then(|v| v.as_array())
        .into_iter()
        .flatten()
}

fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(value, |current, key| current.get(key))
        .and_then(|v| v.as_str())
}

fn parse_project(value: &Value) -> Option<ProjectDescription> {
    let id = str_at(value, &["projectReference", "projectId"]).or_else(|| str_at(value, &["id"]))?;
    Some(ProjectDescription {
        id: id.to_string(),
        display_name: str_at(value, &["friendlyName"]).unwrap_or_default().to_string(),
    })
}

fn parse_dataset_id(value: &Value) -> Option<String> {
    str_at(value, &["datasetReference", "datasetId"]).map(|s| s.to_string())
}

fn parse_table(value: &Value) -> Option<TableDescription> {
    let id = str_at(value, &["tableReference", "tableId"])?;
    let labels = value
        .get("labels")
        .and_then(|v| v.as_object())
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_else(HashMap::new);

    Some(TableDescription {
        id: id.to_string(),
        labels,
    })
}

fn collect_page<T>(response: &Value, key: &str, parse: impl Fn(&Value) -> Option<T>) -> Page<T> {
    let items = items(response, key)
        .filter_map(|item| {
            let parsed = parse(item);
            if parsed.is_none() {
                tracing::debug!("Skipping malformed {} entry", key);
            }
            parsed
        })
        .collect();

    Page {
        items,
        next_page_token: next_page_token(response),
    }
}

#[async_trait]
impl BigQueryApi for GcpClient {
    async fn list_projects(&self, page: &PageRequest) -> Result<Page<ProjectDescription>> {
        let url = self.bigquery_url(&["projects"], &page_query(page));
        let response = self.get(&url).await.context("Failed to list projects")?;
        Ok(collect_page(&response, "projects", parse_project))
    }

    async fn list_datasets(&self, project_id: &str, page: &PageRequest) -> Result<Page<String>> {
        let url = self.bigquery_url(&["projects", project_id, "datasets"], &page_query(page));
        let response = self
            .get(&url)
            .await
            .with_context(|| format!("Failed to list datasets of project {}", project_id))?;
        Ok(collect_page(&response, "datasets", parse_dataset_id))
    }

    async fn list_tables(
        &self,
        project_id: &str,
        dataset_id: &str,
        page: &PageRequest,
    ) -> Result<Page<TableDescription>> {
        let url = self.bigquery_url(
            &["projects", project_id, "datasets", dataset_id, "tables"],
            &page_query(page),
        );
        let response = self.get(&url).await.with_context(|| {
            format!("Failed to list tables of {}:{}", project_id, dataset_id)
        })?;
        Ok(collect_page(&response, "tables", parse_table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_project_prefers_project_reference() {
        let project = parse_project(&json!({
            "id": "opaque-id",
            "friendlyName": "Analytics",
            "projectReference": {"projectId": "analytics-prod"}
        }))
        .unwrap();
        assert_eq!(project.id, "analytics-prod");
        assert_eq!(project.display_name, "Analytics");

        let project = parse_project(&json!({"id": "bare-id"})).unwrap();
        assert_eq!(project.id, "bare-id");
        assert_eq!(project.display_name, "");
    }

    #[test]
    fn test_parse_table_keeps_string_labels() {
        let table = parse_table(&json!({
            "tableReference": {"projectId": "p", "datasetId": "d", "tableId": "orders"},
            "labels": {"env": "prod", "team": "billing"}
        }))
        .unwrap();
        assert_eq!(table.id, "orders");
        assert_eq!(table.labels.len(), 2);
        assert_eq!(table.labels["env"], "prod");
    }

    #[test]
    fn test_collect_page_skips_malformed_entries_and_empty_token() {
        let response = json!({
            "datasets": [
                {"datasetReference": {"projectId": "p", "datasetId": "raw"}},
                {"kind": "bigquery#dataset"},
                {"datasetReference": {"projectId": "p", "datasetId": "curated"}}
            ],
            "nextPageToken": ""
        });
        let page = collect_page(&response, "datasets", parse_dataset_id);
        assert_eq!(page.items, vec!["raw".to_string(), "curated".to_string()]);
        assert_eq!(page.next_page_token, None);
    }

    #[test]
    fn test_collect_page_without_items_key() {
        let page = collect_page(&json!({"kind": "bigquery#tableList"}), "tables", parse_table);
        assert!(page.items.is_empty());
    }
}
