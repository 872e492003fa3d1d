//! GCP Client
//!
//! Main client for interacting with GCP APIs, combining authentication
//! and HTTP functionality.

use super::auth::GcpCredentials;
use super::http::GcpHttpClient;
use anyhow::{Context, Result};
use serde_json::Value;
use url::Url;

/// Public BigQuery v2 REST endpoint
pub const DEFAULT_API_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// Main GCP client
#[derive(Clone)]
pub struct GcpClient {
    pub credentials: GcpCredentials,
    pub http: GcpHttpClient,
    api_base: Url,
}

impl GcpClient {
    /// Create a client authenticated with Application Default Credentials
    pub async fn new(api_base: &str) -> Result<Self> {
        let credentials = GcpCredentials::new()
            .await
            .context("Failed to initialize GCP credentials")?;

        Self::with_credentials(api_base, credentials)
    }

    /// Create a client that sends a fixed bearer token
    pub fn with_token(api_base: &str, token: &str) -> Result<Self> {
        Self::with_credentials(api_base, GcpCredentials::fixed(token))
    }

    fn with_credentials(api_base: &str, credentials: GcpCredentials) -> Result<Self> {
        let api_base = Url::parse(api_base)
            .with_context(|| format!("Invalid API base URL: {}", api_base))?;
        if api_base.cannot_be_a_base() {
            anyhow::bail!("API base URL cannot carry a path: {}", api_base);
        }

        Ok(Self {
            credentials,
            http: GcpHttpClient::new()?,
            api_base,
        })
    }

    /// Get the current access token
    pub async fn get_token(&self) -> Result<String> {
        self.credentials.get_token().await
    }

    /// Make a GET request to a GCP API
    pub async fn get(&self, url: &Url) -> Result<Value> {
        let token = self.get_token().await?;
        self.http.get(url.as_str(), &token).await
    }

    // =========================================================================
    // BigQuery API helpers
    // =========================================================================

    /// Build a BigQuery API URL from path segments and query parameters.
    /// Segments are percent-encoded; empty query values are skipped.
    pub fn bigquery_url(&self, segments: &[&str], query: &[(&str, Option<String>)]) -> Url {
        let mut url = self.api_base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }

        let pairs: Vec<(&str, &str)> = query
            .iter()
            .filter_map(|(key, value)| match value.as_deref() {
                Some(v) if !v.is_empty() => Some((*key, v)),
                _ => None,
            })
            .collect();

        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }

        url
    }
}

/// Format a GCP API error for display
pub fn format_gcp_error(error: &anyhow::Error) -> String {
    super::http::format_gcp_error(error)
}
