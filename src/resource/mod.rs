//! Paginated listing primitives
//!
//! - [`fetcher`] - Drives one listing endpoint to completion, page by page
//! - [`throttle`] - The shared request-rate gate awaited before every page
//!
//! # Example
//!
//! ```ignore
//! use crate::resource::{fetch_all, FetchLimit, RateLimiter};
//!
//! async fn datasets(client: &GcpClient, limiter: &RateLimiter) -> anyhow::Result<Vec<String>> {
//!     fetch_all(limiter, FetchLimit::unbounded(), |page| async move {
//!         client.list_datasets("my-project", &page).await
//!     })
//!     .await
//! }
//! ```

mod fetcher;
mod throttle;

pub use fetcher::{fetch_all, FetchLimit, Page, PageRequest};
pub use throttle::{RateLimiter, Throttle, Unthrottled};
