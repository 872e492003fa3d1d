//! Inventory refresh
//!
//! Walks the project -> dataset -> table hierarchy in three stages:
//!
//! 1. list every visible project (one bulk listing, not throttled)
//! 2. list datasets, one task per project
//! 3. list tables, one task per (project, dataset)
//!
//! Stages 2 and 3 share a single [`Throttle`]. A failed dataset or table
//! listing only empties that scope; it is logged and recorded in the
//! [`RefreshReport`]. Failing to list projects aborts the refresh.

mod fanout;

pub use fanout::FanOut;

use crate::gcp::bigquery::BigQueryApi;
use crate::model::{Dataset, Inventory, Project, ProjectDescription, Table, TableDescription};
use crate::resource::{fetch_all, FetchLimit, Throttle, Unthrottled};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Tunables for one refresh run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshOptions {
    /// Upper bound on tables kept per dataset
    pub max_tables_per_dataset: usize,
    /// `maxResults` sent with each table listing page
    pub table_page_size: u32,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            max_tables_per_dataset: 1000,
            table_page_size: 1000,
        }
    }
}

/// A dataset or table listing that failed during a refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeFailure {
    pub project_id: String,
    /// `None` when the project's dataset listing failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<String>,
    pub error: String,
}

/// Summary of one refresh run, stored next to the snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub project_count: usize,
    pub dataset_count: usize,
    pub table_count: usize,
    #[serde(default)]
    pub failures: Vec<ScopeFailure>,
}

impl RefreshReport {
    /// True when no scope failed
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Whether the dataset listing of `project_id` failed, as opposed to the
    /// project genuinely having no datasets
    pub fn dataset_listing_failed(&self, project_id: &str) -> bool {
        self.failures
            .iter()
            .any(|f| f.project_id == project_id && f.dataset_id.is_none())
    }

    /// Whether the table listing of one dataset failed
    pub fn table_listing_failed(&self, project_id: &str, dataset_id: &str) -> bool {
        self.failures
            .iter()
            .any(|f| f.project_id == project_id && f.dataset_id.as_deref() == Some(dataset_id))
    }
}

/// Everything a refresh produced
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub inventory: Inventory,
    pub report: RefreshReport,
}

struct DatasetsResponse {
    project_id: String,
    result: Result<Vec<String>>,
}

struct TablesResponse {
    project_id: String,
    dataset_id: String,
    result: Result<Vec<TableDescription>>,
}

type TableKey = (String, String);

/// Orchestrates one refresh against a [`BigQueryApi`]
pub struct Refresher {
    api: Arc<dyn BigQueryApi>,
    throttle: Arc<dyn Throttle>,
    options: RefreshOptions,
}

impl Refresher {
    pub fn new(
        api: Arc<dyn BigQueryApi>,
        throttle: Arc<dyn Throttle>,
        options: RefreshOptions,
    ) -> Self {
        Self {
            api,
            throttle,
            options,
        }
    }

    /// Run all three stages and assemble the inventory.
    ///
    /// Only a failed project enumeration is an error; scoped failures are
    /// reported in [`RefreshOutcome::report`].
    pub async fn run(&self) -> Result<RefreshOutcome> {
        let started_at = Utc::now();

        tracing::info!("Refreshing projects");
        let projects = self
            .fetch_projects()
            .await
            .context("Failed to enumerate projects")?;
        tracing::info!("Found {} projects", projects.len());

        let mut failures = Vec::new();
        let datasets = self.fetch_datasets(&projects, &mut failures).await;
        let tables = self.fetch_tables(&datasets, &mut failures).await;

        failures.sort_by(|a, b| {
            (&a.project_id, &a.dataset_id).cmp(&(&b.project_id, &b.dataset_id))
        });

        let inventory = assemble(&projects, &datasets, tables);
        let report = RefreshReport {
            started_at,
            finished_at: Utc::now(),
            project_count: inventory.projects.len(),
            dataset_count: inventory.dataset_count(),
            table_count: inventory.table_count(),
            failures,
        };

        tracing::info!(
            "Refresh done: {} projects, {} datasets, {} tables, {} failed listings",
            report.project_count,
            report.dataset_count,
            report.table_count,
            report.failures.len()
        );

        Ok(RefreshOutcome { inventory, report })
    }

    async fn fetch_projects(&self) -> Result<BTreeMap<String, ProjectDescription>> {
        let listed = fetch_all(&Unthrottled, FetchLimit::unbounded(), |page| async move {
            self.api.list_projects(&page).await
        })
        .await?;

        Ok(listed.into_iter().map(|p| (p.id.clone(), p)).collect())
    }

    async fn fetch_datasets(
        &self,
        projects: &BTreeMap<String, ProjectDescription>,
        failures: &mut Vec<ScopeFailure>,
    ) -> BTreeMap<String, Vec<String>> {
        let mut fan_out = FanOut::new();
        for project_id in projects.keys() {
            let api = Arc::clone(&self.api);
            let throttle = Arc::clone(&self.throttle);
            let project_id = project_id.clone();

            fan_out.spawn(async move {
                let result = fetch_all(&*throttle, FetchLimit::unbounded(), |page| {
                    let api = &api;
                    let project_id = &project_id;
                    async move { api.list_datasets(project_id, &page).await }
                })
                .await;
                DatasetsResponse { project_id, result }
            });
        }

        let mut datasets = BTreeMap::new();
        for response in fan_out.drain().await {
            match response.result {
                Ok(ids) => {
                    tracing::debug!(
                        "Retrieved {} datasets from project {}",
                        ids.len(),
                        response.project_id
                    );
                    datasets.insert(response.project_id, dedup(ids));
                }
                Err(err) => {
                    tracing::warn!(
                        "Could not retrieve datasets for project {}: {:#}",
                        response.project_id,
                        err
                    );
                    failures.push(ScopeFailure {
                        project_id: response.project_id,
                        dataset_id: None,
                        error: format!("{err:#}"),
                    });
                }
            }
        }

        for project_id in projects.keys() {
            let reported = datasets.contains_key(project_id)
                || failures.iter().any(|f| &f.project_id == project_id);
            if !reported {
                failures.push(ScopeFailure {
                    project_id: project_id.clone(),
                    dataset_id: None,
                    error: "dataset listing task ended without a result".to_string(),
                });
            }
        }

        tracing::info!(
            "Retrieved datasets for {} of {} projects",
            datasets.len(),
            projects.len()
        );

        datasets
    }

    async fn fetch_tables(
        &self,
        datasets: &BTreeMap<String, Vec<String>>,
        failures: &mut Vec<ScopeFailure>,
    ) -> HashMap<TableKey, Vec<TableDescription>> {
        let limit = FetchLimit::new(
            self.options.table_page_size,
            self.options.max_tables_per_dataset,
        );

        let mut fan_out = FanOut::new();
        for (project_id, dataset_ids) in datasets {
            for dataset_id in dataset_ids {
                let api = Arc::clone(&self.api);
                let throttle = Arc::clone(&self.throttle);
                let project_id = project_id.clone();
                let dataset_id = dataset_id.clone();

                fan_out.spawn(async move {
                    let result = fetch_all(&*throttle, limit, |page| {
                        let api = &api;
                        let project_id = &project_id;
                        let dataset_id = &dataset_id;
                        async move { api.list_tables(project_id, dataset_id, &page).await }
                    })
                    .await;
                    TablesResponse {
                        project_id,
                        dataset_id,
                        result,
                    }
                });
            }
        }
        let launched = fan_out.launched();

        let mut tables = HashMap::new();
        let mut failed = HashSet::new();
        for response in fan_out.drain().await {
            match response.result {
                Ok(mut found) => {
                    let mut seen = HashSet::new();
                    found.retain(|table| seen.insert(table.id.clone()));
                    tracing::debug!(
                        "Retrieved {} tables from project {} dataset {}",
                        found.len(),
                        response.project_id,
                        response.dataset_id
                    );
                    tables.insert((response.project_id, response.dataset_id), found);
                }
                Err(err) => {
                    tracing::warn!(
                        "Could not retrieve tables for project {} dataset {}: {:#}",
                        response.project_id,
                        response.dataset_id,
                        err
                    );
                    failed.insert((response.project_id.clone(), response.dataset_id.clone()));
                    failures.push(ScopeFailure {
                        project_id: response.project_id,
                        dataset_id: Some(response.dataset_id),
                        error: format!("{err:#}"),
                    });
                }
            }
        }

        for (project_id, dataset_ids) in datasets {
            for dataset_id in dataset_ids {
                let key = (project_id.clone(), dataset_id.clone());
                if !tables.contains_key(&key) && !failed.contains(&key) {
                    failures.push(ScopeFailure {
                        project_id: key.0,
                        dataset_id: Some(key.1),
                        error: "table listing task ended without a result".to_string(),
                    });
                }
            }
        }

        tracing::info!(
            "Retrieved tables for {} of {} datasets",
            tables.len(),
            launched
        );

        tables
    }
}

/// Drop repeated ids, keeping the first occurrence
fn dedup(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

/// Build the tree from whatever succeeded. Every listed project is present;
/// failed scopes simply have no children.
fn assemble(
    projects: &BTreeMap<String, ProjectDescription>,
    datasets: &BTreeMap<String, Vec<String>>,
    mut tables: HashMap<TableKey, Vec<TableDescription>>,
) -> Inventory {
    let projects = projects
        .values()
        .map(|desc| {
            let datasets = datasets
                .get(&desc.id)
                .map(|ids| {
                    ids.iter()
                        .map(|dataset_id| Dataset {
                            id: dataset_id.clone(),
                            tables: tables
                                .remove(&(desc.id.clone(), dataset_id.clone()))
                                .unwrap_or_default()
                                .into_iter()
                                .map(Table::from)
                                .collect(),
                        })
                        .collect()
                })
                .unwrap_or_default();

            Project {
                id: desc.id.clone(),
                display_name: desc.display_name.clone(),
                datasets,
            }
        })
        .collect();

    Inventory { projects }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Page, PageRequest, RateLimiter};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    /// In-memory listing API serving fixed pages of `page_len` items
    #[derive(Default)]
    struct FakeApi {
        projects: Vec<ProjectDescription>,
        datasets: HashMap<String, Vec<String>>,
        tables: HashMap<TableKey, Vec<TableDescription>>,
        fail_projects: bool,
        fail_datasets: HashSet<String>,
        fail_tables: HashSet<TableKey>,
        /// Artificial latency per project, to shuffle completion order
        delays: HashMap<String, Duration>,
        page_len: usize,
        requests: Mutex<Vec<(String, Instant)>>,
    }

    impl FakeApi {
        fn new(page_len: usize) -> Self {
            Self {
                page_len,
                ..Self::default()
            }
        }

        fn project(mut self, id: &str, name: &str) -> Self {
            self.projects.push(ProjectDescription {
                id: id.to_string(),
                display_name: name.to_string(),
            });
            self
        }

        fn dataset(mut self, project: &str, dataset: &str, tables: &[&str]) -> Self {
            self.datasets
                .entry(project.to_string())
                .or_default()
                .push(dataset.to_string());
            self.tables.insert(
                (project.to_string(), dataset.to_string()),
                tables.iter().map(|t| table(t, &[])).collect(),
            );
            self
        }

        fn page<T: Clone>(&self, items: &[T], page: &PageRequest) -> Page<T> {
            let start: usize = page.page_token.as_deref().map_or(0, |t| t.parse().unwrap());
            let len = page
                .max_results
                .map_or(self.page_len, |m| (m as usize).min(self.page_len));
            let end = (start + len).min(items.len());
            Page {
                items: items[start..end].to_vec(),
                next_page_token: (end < items.len()).then(|| end.to_string()),
            }
        }

        async fn record(&self, scope: String) {
            let delay = self
                .delays
                .get(scope.split('/').next().unwrap_or_default())
                .copied();
            self.requests.lock().unwrap().push((scope, Instant::now()));
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }

        fn requests_for(&self, prefix: &str) -> usize {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|(scope, _)| scope.starts_with(prefix))
                .count()
        }
    }

    fn table(id: &str, labels: &[(&str, &str)]) -> TableDescription {
        TableDescription {
            id: id.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[async_trait]
    impl BigQueryApi for FakeApi {
        async fn list_projects(&self, page: &PageRequest) -> Result<Page<ProjectDescription>> {
            if self.fail_projects {
                anyhow::bail!("API request failed: 401 Unauthorized");
            }
            Ok(self.page(&self.projects, page))
        }

        async fn list_datasets(&self, project_id: &str, page: &PageRequest) -> Result<Page<String>> {
            self.record(project_id.to_string()).await;
            if self.fail_datasets.contains(project_id) {
                anyhow::bail!("API request failed: 403 Forbidden");
            }
            let ids = self.datasets.get(project_id).cloned().unwrap_or_default();
            Ok(self.page(&ids, page))
        }

        async fn list_tables(
            &self,
            project_id: &str,
            dataset_id: &str,
            page: &PageRequest,
        ) -> Result<Page<TableDescription>> {
            self.record(format!("{}/{}", project_id, dataset_id)).await;
            let key = (project_id.to_string(), dataset_id.to_string());
            if self.fail_tables.contains(&key) {
                anyhow::bail!("API request failed: 500 Internal Server Error");
            }
            let tables = self.tables.get(&key).cloned().unwrap_or_default();
            Ok(self.page(&tables, page))
        }
    }

    fn refresher(api: FakeApi, options: RefreshOptions) -> (Arc<FakeApi>, Refresher) {
        let api = Arc::new(api);
        let refresher = Refresher::new(api.clone(), Arc::new(Unthrottled), options);
        (api, refresher)
    }

    #[tokio::test]
    async fn test_failed_dataset_listing_keeps_project_without_datasets() {
        let mut api = FakeApi::new(10)
            .project("project-a", "Project A")
            .project("project-b", "Project B");
        api.datasets.insert("project-a".to_string(), vec!["sales".to_string()]);
        api.tables.insert(
            ("project-a".to_string(), "sales".to_string()),
            vec![table("orders", &[("env", "prod")]), table("customers", &[])],
        );
        api.fail_datasets.insert("project-b".to_string());

        let (_, refresher) = refresher(api, RefreshOptions::default());
        let outcome = refresher.run().await.unwrap();
        let inventory = outcome.inventory;

        assert_eq!(inventory.projects.len(), 2);
        let a = inventory.project("project-a").unwrap();
        assert_eq!(a.display_name, "Project A");
        assert_eq!(a.datasets.len(), 1);
        let sales = a.dataset("sales").unwrap();
        assert_eq!(sales.tables.len(), 2);
        assert_eq!(sales.tables[0].id, "orders");
        assert_eq!(sales.tables[0].labels["env"], "prod");
        assert!(sales.tables[1].labels.is_empty());

        let b = inventory.project("project-b").unwrap();
        assert!(b.datasets.is_empty());

        assert_eq!(outcome.report.failures.len(), 1);
        assert!(outcome.report.dataset_listing_failed("project-b"));
        assert!(!outcome.report.dataset_listing_failed("project-a"));
        assert!(outcome.report.failures[0].error.contains("403"));
    }

    #[tokio::test]
    async fn test_failed_table_listing_keeps_empty_dataset() {
        let mut api = FakeApi::new(10)
            .project("p", "P")
            .dataset("p", "good", &["t1", "t2"])
            .dataset("p", "bad", &["t3"]);
        api.fail_tables.insert(("p".to_string(), "bad".to_string()));

        let (_, refresher) = refresher(api, RefreshOptions::default());
        let outcome = refresher.run().await.unwrap();

        let project = outcome.inventory.project("p").unwrap();
        assert_eq!(
            project.datasets.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(),
            vec!["good", "bad"]
        );
        assert_eq!(project.dataset("good").unwrap().tables.len(), 2);
        assert!(project.dataset("bad").unwrap().tables.is_empty());
        assert!(outcome.report.table_listing_failed("p", "bad"));
        assert!(!outcome.report.table_listing_failed("p", "good"));
        assert_eq!(outcome.report.table_count, 2);
    }

    #[tokio::test]
    async fn test_project_listing_failure_is_fatal() {
        let mut api = FakeApi::new(10).project("p", "P");
        api.fail_projects = true;

        let (api, refresher) = refresher(api, RefreshOptions::default());
        let err = refresher.run().await.unwrap_err();

        assert!(format!("{err:#}").contains("Failed to enumerate projects"));
        assert_eq!(api.requests_for(""), 0);
    }

    #[tokio::test]
    async fn test_paginated_listings_are_concatenated() {
        let tables: Vec<String> = (0..7).map(|i| format!("t{}", i)).collect();
        let table_refs: Vec<&str> = tables.iter().map(String::as_str).collect();
        let mut api = FakeApi::new(3);
        for i in 0..5 {
            api = api.project(&format!("p{}", i), "");
        }
        for i in 0..4 {
            api = api.dataset("p0", &format!("d{}", i), &table_refs);
        }

        let (api, refresher) = refresher(api, RefreshOptions::default());
        let outcome = refresher.run().await.unwrap();

        assert_eq!(outcome.inventory.projects.len(), 5);
        let p0 = outcome.inventory.project("p0").unwrap();
        assert_eq!(p0.datasets.len(), 4);
        for dataset in &p0.datasets {
            assert_eq!(
                dataset.tables.iter().map(|t| t.id.clone()).collect::<Vec<_>>(),
                tables
            );
        }
        // 4 datasets fit in 2 pages, each table listing needs 3
        assert_eq!(api.requests_for("p0/"), 12);
        assert!(outcome.report.is_complete());
    }

    #[tokio::test]
    async fn test_table_cap_is_applied_per_dataset() {
        let api = FakeApi::new(4)
            .project("p", "P")
            .dataset("p", "big", &["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"])
            .dataset("p", "small", &["x", "y"]);

        let options = RefreshOptions {
            max_tables_per_dataset: 5,
            table_page_size: 4,
        };
        let (_, refresher) = refresher(api, options);
        let outcome = refresher.run().await.unwrap();

        let project = outcome.inventory.project("p").unwrap();
        let big: Vec<&str> = project.dataset("big").unwrap().tables.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(big, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(project.dataset("small").unwrap().tables.len(), 2);
    }

    #[tokio::test]
    async fn test_zero_table_cap_skips_table_listing() {
        let api = FakeApi::new(10)
            .project("p", "P")
            .dataset("p", "d", &["t1", "t2"]);

        let options = RefreshOptions {
            max_tables_per_dataset: 0,
            ..RefreshOptions::default()
        };
        let (api, refresher) = refresher(api, options);
        let outcome = refresher.run().await.unwrap();

        let project = outcome.inventory.project("p").unwrap();
        assert_eq!(project.datasets.len(), 1);
        assert!(project.datasets[0].tables.is_empty());
        assert_eq!(api.requests_for("p/"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_are_attributed_by_scope_not_arrival() {
        let mut api = FakeApi::new(10);
        for (i, delay) in [400u64, 10, 250, 0, 120].into_iter().enumerate() {
            let id = format!("p{}", i);
            api = api
                .project(&id, &format!("Project {}", i))
                .dataset(&id, &format!("{}-ds", id), &[format!("{}-table", id).as_str()]);
            api.delays.insert(id, Duration::from_millis(delay));
        }

        let (_, refresher) = refresher(api, RefreshOptions::default());
        let outcome = refresher.run().await.unwrap();

        let ids: Vec<&str> = outcome.inventory.projects.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["p0", "p1", "p2", "p3", "p4"]);
        for project in &outcome.inventory.projects {
            assert_eq!(project.datasets.len(), 1);
            assert_eq!(project.datasets[0].id, format!("{}-ds", project.id));
            assert_eq!(project.datasets[0].tables[0].id, format!("{}-table", project.id));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_rate_limiter_bounds_all_page_requests() {
        const RATE: usize = 10;
        let mut api = FakeApi::new(1);
        for i in 0..4 {
            let id = format!("p{}", i);
            api = api
                .project(&id, "")
                .dataset(&id, "a", &["t1", "t2"])
                .dataset(&id, "b", &["t3"]);
        }
        let api = Arc::new(api);
        let refresher = Refresher::new(
            api.clone(),
            Arc::new(RateLimiter::per_second(RATE as u32)),
            RefreshOptions::default(),
        );

        refresher.run().await.unwrap();

        let mut times: Vec<Instant> = api.requests.lock().unwrap().iter().map(|(_, t)| *t).collect();
        times.sort();
        // 4 projects x 2 dataset pages + 4 x (2 + 1) table pages
        assert_eq!(times.len(), 20);
        for window in times.windows(RATE + 1) {
            assert!(window[RATE] - window[0] >= Duration::from_secs(1));
        }
    }

    #[tokio::test]
    async fn test_duplicate_ids_collapse() {
        let mut api = FakeApi::new(10)
            .project("p", "First")
            .project("p", "Second")
            .dataset("p", "d", &["t", "u", "t"]);
        api.datasets.get_mut("p").unwrap().push("d".to_string());

        let (_, refresher) = refresher(api, RefreshOptions::default());
        let outcome = refresher.run().await.unwrap();

        assert_eq!(outcome.inventory.projects.len(), 1);
        assert_eq!(outcome.inventory.projects[0].datasets.len(), 1);
        let tables: Vec<&str> = outcome.inventory.projects[0].datasets[0]
            .tables
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(tables, vec!["t", "u"]);
    }

    #[tokio::test]
    async fn test_report_counts() {
        let api = FakeApi::new(2)
            .project("a", "A")
            .project("b", "B")
            .dataset("a", "d1", &["t1", "t2", "t3"])
            .dataset("b", "d2", &[]);

        let (_, refresher) = refresher(api, RefreshOptions::default());
        let report = refresher.run().await.unwrap().report;

        assert_eq!(report.project_count, 2);
        assert_eq!(report.dataset_count, 2);
        assert_eq!(report.table_count, 3);
        assert!(report.finished_at >= report.started_at);
        assert!(report.is_complete());
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let report = RefreshReport {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            project_count: 1,
            dataset_count: 0,
            table_count: 0,
            failures: vec![ScopeFailure {
                project_id: "p".to_string(),
                dataset_id: None,
                error: "boom".to_string(),
            }],
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["projectCount"], 1);
        assert_eq!(value["failures"][0]["projectId"], "p");
        assert!(value["failures"][0].get("datasetId").is_none());
    }
}
