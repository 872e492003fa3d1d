//! GCP API interaction module
//!
//! Authentication, HTTP plumbing and the BigQuery listing endpoints used by a
//! refresh.
//!
//! # Module Structure
//!
//! - [`auth`] - GCP authentication using Application Default Credentials
//! - [`client`] - Main GCP client for making API requests
//! - [`http`] - HTTP utilities for REST API calls
//! - [`bigquery`] - Project, dataset and table listing
//!
//! # Example
//!
//! ```ignore
//! use crate::gcp::bigquery::BigQueryApi;
//! use crate::gcp::client::{GcpClient, DEFAULT_API_BASE};
//! use crate::resource::PageRequest;
//!
//! async fn example() -> anyhow::Result<()> {
//!     let client = GcpClient::new(DEFAULT_API_BASE).await?;
//!     let first = client.list_projects(&PageRequest::default()).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod bigquery;
pub mod client;
pub mod http;
