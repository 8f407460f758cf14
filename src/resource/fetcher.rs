//! Resource Fetcher
//!
//! Page-cursor loop used by every list-style read: repeatedly invokes a
//! caller-supplied fetch function with an evolving limit/cursor pair and
//! accumulates the returned items.

use crate::error::{EngineError, Result};
use crate::mapping::{items_at, value_at, ParamMap};
use serde::Deserialize;
use serde_json::Value;
use std::future::Future;

/// Cursor position; one per list invocation, never shared
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    /// `cursor += len(items)`
    Offset(u64),
    /// `cursor += 1`
    Page(u64),
    /// Adopt the marker returned by the last page; `None` on the first call
    Marker(Option<String>),
}

/// Pagination style as declared by a resource descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStyle {
    #[default]
    Offset,
    Page,
    Marker,
}

impl PageStyle {
    /// Starting cursor; offsets start at 0, page numbers at 1
    pub fn start(&self) -> Cursor {
        match self {
            PageStyle::Offset => Cursor::Offset(0),
            PageStyle::Page => Cursor::Page(1),
            PageStyle::Marker => Cursor::Marker(None),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PageRequest {
    pub limit_key: String,
    pub cursor_key: String,
    pub page_size: usize,
    pub start: Cursor,
}

impl PageRequest {
    pub fn new(limit_key: &str, cursor_key: &str, page_size: usize, start: Cursor) -> Self {
        Self {
            limit_key: limit_key.to_string(),
            cursor_key: cursor_key.to_string(),
            page_size,
            start,
        }
    }

    pub fn offset(limit_key: &str, cursor_key: &str, page_size: usize) -> Self {
        Self::new(limit_key, cursor_key, page_size, Cursor::Offset(0))
    }

    pub fn marker(limit_key: &str, cursor_key: &str, page_size: usize) -> Self {
        Self::new(limit_key, cursor_key, page_size, Cursor::Marker(None))
    }
}

/// Result of one fetch
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<Value>,
    /// The API's own "has more" flag, when it sends one
    pub has_more: Option<bool>,
    pub next_marker: Option<String>,
}

impl Page {
    pub fn new(items: Vec<Value>) -> Self {
        Self {
            items,
            ..Default::default()
        }
    }

    pub fn with_has_more(mut self, has_more: bool) -> Self {
        self.has_more = Some(has_more);
        self
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.next_marker = Some(marker.into());
        self
    }

    /// Build a page from a raw response
    pub fn from_response(
        response: &Value,
        items_path: &str,
        has_more_key: Option<&str>,
        marker_key: Option<&str>,
    ) -> Self {
        let has_more = has_more_key
            .and_then(|key| value_at(response, key))
            .and_then(|v| match v {
                Value::Bool(b) => Some(*b),
                Value::String(s) => s.parse().ok(),
                _ => None,
            });
        let next_marker = marker_key
            .and_then(|key| value_at(response, key))
            .and_then(|v| match v {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });

        Self {
            items: items_at(response, items_path).to_vec(),
            has_more,
            next_marker,
        }
    }
}

/// Fetch every page and return all items
///
/// Stops on a short page (including an empty one), when the API says there
/// is nothing more, or when a marker-style API returns no marker. Any fetch
/// error aborts the loop; no partial aggregate is returned.
pub async fn paginate<F, Fut>(
    initial: &ParamMap,
    request: &PageRequest,
    mut fetch: F,
) -> Result<Vec<Value>>
where
    F: FnMut(ParamMap) -> Fut,
    Fut: Future<Output = Result<Page>>,
{
    if request.page_size == 0 {
        return Err(EngineError::Pagination("page size must be positive".to_string()));
    }

    let mut cursor = request.start.clone();
    let mut all_items = Vec::new();
    let mut pages = 0usize;

    loop {
        let mut params = initial.clone();
        params.insert(request.limit_key.clone(), Value::from(request.page_size));
        match &cursor {
            Cursor::Offset(n) | Cursor::Page(n) => {
                params.insert(request.cursor_key.clone(), Value::from(*n));
            }
            Cursor::Marker(Some(marker)) => {
                params.insert(request.cursor_key.clone(), Value::String(marker.clone()));
            }
            Cursor::Marker(None) => {}
        }

        let page = fetch(params).await?;
        pages += 1;
        let count = page.items.len();
        all_items.extend(page.items);
        tracing::debug!("page {}: {} item(s), cursor {:?}", pages, count, cursor);

        if count < request.page_size || page.has_more == Some(false) {
            break;
        }

        cursor = match cursor {
            Cursor::Offset(n) => Cursor::Offset(n + count as u64),
            Cursor::Page(n) => Cursor::Page(n + 1),
            Cursor::Marker(_) => match page.next_marker {
                Some(marker) => Cursor::Marker(Some(marker)),
                None => break,
            },
        };
    }

    tracing::info!("fetched {} item(s) in {} page(s)", all_items.len(), pages);
    Ok(all_items)
}
