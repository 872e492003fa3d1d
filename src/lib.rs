//! Local BigQuery inventory for quick lookup
//!
//! A refresh walks every visible project, dataset and table through the
//! BigQuery REST API and stores the result as a JSON snapshot. The browse
//! side only ever reads that snapshot.
//!
//! # Module Structure
//!
//! - [`gcp`] - Authentication, HTTP and BigQuery listing endpoints
//! - [`resource`] - Pagination and the shared request-rate gate
//! - [`refresh`] - The three-stage fan-out that builds an [`model::Inventory`]
//! - [`snapshot`] - On-disk snapshot, write and read paths
//! - [`browse`] - Item lists derived from the snapshot
//! - [`config`] - Persistent user configuration

pub mod browse;
pub mod config;
pub mod gcp;
pub mod model;
pub mod refresh;
pub mod resource;
pub mod snapshot;
