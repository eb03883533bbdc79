//! Normalized product entity
//!
//! The structured output of normalization. Prices are stored in currency
//! units (the upstream reports integer cents), and the image fields keep
//! both the upstream URL and the optional locally cached copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One normalized catalog product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Same identifier as the raw record this row was projected from.
    pub id: i64,
    pub name: String,
    pub brand: Option<String>,
    pub description: Option<String>,
    /// Price in currency units, converted from upstream cents.
    pub price_amount: f64,
    pub price_currency: String,
    pub image_url: Option<String>,
    /// Filled only when image caching is enabled and the download succeeded.
    pub image_local_path: Option<String>,
    /// Primary category name, first entry of the upstream category tree.
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
