//! Pagination contract of the upstream catalog
//!
//! The catalog endpoint returns entities page by page together with a
//! pagination block. Only `current`, `total` and `perPage` are load
//! bearing; the navigation hints are kept because real responses carry
//! them and tests read nicer with them present.

use serde::{Deserialize, Serialize};

/// Pagination metadata attached to every catalog page response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    /// 1-based index of the page this metadata arrived with.
    pub current: u32,
    /// Total entity count across the whole collection.
    pub total: u32,
    pub per_page: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<u32>,
}

impl PageInfo {
    /// Page count implied by the totals, rounding the final partial page up.
    ///
    /// A zero `perPage` would otherwise divide by zero; it means the
    /// upstream reported an empty collection, so zero pages is the honest
    /// answer.
    pub const fn total_pages(&self) -> u32 {
        if self.per_page == 0 {
            0
        } else {
            self.total.div_ceil(self.per_page)
        }
    }
}

/// One fetched catalog page: raw entities plus the pagination block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogPage {
    #[serde(rename = "entities")]
    pub records: Vec<serde_json::Value>,
    pub pagination: PageInfo,
}

impl CatalogPage {
    /// An empty page is the upstream's end-of-collection signal, even when
    /// the advertised totals promise more.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
