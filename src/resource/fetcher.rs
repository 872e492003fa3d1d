//! Resource Fetcher
//!
//! Drives one paginated listing to completion.

use super::throttle::Throttle;
use anyhow::{Context, Result};
use std::future::Future;

/// Parameters for a single page request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    pub page_token: Option<String>,
    pub max_results: Option<u32>,
}

/// One page of a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Absent or empty on the last page
    pub next_page_token: Option<String>,
}

/// Bounds applied while paginating
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchLimit {
    /// Requested page size, the server may return fewer
    pub page_size: Option<u32>,
    /// Stop once this many items were collected
    pub max_items: Option<usize>,
}

impl FetchLimit {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn new(page_size: u32, max_items: usize) -> Self {
        Self {
            page_size: Some(page_size),
            max_items: Some(max_items),
        }
    }

    fn max_results(&self, collected: usize) -> Option<u32> {
        let remaining = self
            .max_items
            .map(|max| u32::try_from(max.saturating_sub(collected)).unwrap_or(u32::MAX));

        match (self.page_size, remaining) {
            (Some(size), Some(remaining)) => Some(size.min(remaining)),
            (size, remaining) => size.or(remaining),
        }
    }
}

/// Fetch all pages of a listing (auto-paginate).
///
/// Every page request, the first included, waits for one admission from
/// `throttle`. Any page error aborts the listing and the items collected so
/// far are dropped.
pub async fn fetch_all<T, F, Fut>(
    throttle: &dyn Throttle,
    limit: FetchLimit,
    mut fetch_page: F,
) -> Result<Vec<T>>
where
    F: FnMut(PageRequest) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let mut all_items = Vec::new();
    let mut page_token: Option<String> = None;
    let mut page_number = 0usize;

    loop {
        if limit.max_items.is_some_and(|max| all_items.len() >= max) {
            break;
        }

        page_number += 1;
        let request = PageRequest {
            page_token: page_token.clone(),
            max_results: limit.max_results(all_items.len()),
        };

        throttle.admit().await;
        let page = fetch_page(request)
            .await
            .with_context(|| format!("Listing failed on page {}", page_number))?;
        all_items.extend(page.items);

        match page.next_page_token {
            Some(token) if !token.is_empty() => {
                if page_token.as_deref() == Some(token.as_str()) {
                    anyhow::bail!("Page token did not advance after page {}", page_number);
                }
                page_token = Some(token);
            }
            _ => break,
        }
    }

    if let Some(max) = limit.max_items {
        all_items.truncate(max);
    }

    tracing::debug!("Fetched {} items in {} pages", all_items.len(), page_number);

    Ok(all_items)
}
