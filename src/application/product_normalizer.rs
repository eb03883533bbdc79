//! Raw payload to product projection
//!
//! The default [`RecordNormalizer`]: projects a stored catalog payload
//! into a `Product` row and optionally caches the primary image on disk.
//! Projection is a pure function over the payload so it can be tested
//! without a database; only persistence and image caching touch the
//! outside world.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::ingest::RawRecord;
use crate::domain::product::Product;
use crate::domain::services::{NormalizeError, RecordNormalizer};
use crate::infrastructure::asset_downloader::AssetDownloader;
use crate::infrastructure::config::aboutyou;
use crate::infrastructure::product_repository::ProductRepository;

struct ImageCache {
    downloader: AssetDownloader,
    dir: PathBuf,
}

pub struct ProductNormalizer {
    products: Arc<ProductRepository>,
    image_cache: Option<ImageCache>,
}

impl ProductNormalizer {
    pub fn new(products: Arc<ProductRepository>) -> Self {
        Self {
            products,
            image_cache: None,
        }
    }

    /// Enables image caching: the primary image of every normalized
    /// product is downloaded into `dir`.
    pub fn with_image_cache(mut self, downloader: AssetDownloader, dir: PathBuf) -> Self {
        self.image_cache = Some(ImageCache { downloader, dir });
        self
    }
}

#[async_trait]
impl RecordNormalizer for ProductNormalizer {
    async fn normalize(&self, record: &RawRecord) -> Result<(), NormalizeError> {
        let mut product = project_product(record)?;

        if let Some(cache) = &self.image_cache {
            if let Some(url) = product.image_url.clone() {
                let local_path = cache.dir.join(format!("{}.jpg", product.id));
                match cache.downloader.download(&url, &local_path).await {
                    Ok(()) => {
                        product.image_local_path =
                            Some(local_path.to_string_lossy().into_owned());
                    }
                    Err(e) => {
                        // The product is still usable without a cached
                        // image; keep the remote URL only.
                        warn!(
                            record_id = record.id,
                            error = %e,
                            "Image download failed, keeping product without cached image"
                        );
                    }
                }
            }
        }

        self.products
            .upsert(&product)
            .await
            .map_err(|e| NormalizeError::Transform {
                id: record.id,
                message: format!("failed to persist product: {e:#}"),
            })?;

        debug!(record_id = record.id, name = %product.name, "Projected product");
        Ok(())
    }
}

/// Projects a raw catalog payload into a [`Product`].
///
/// Field handling mirrors what the upstream actually serves: prices come
/// as integer cents under `priceRange.min.withTax`, images as CDN hashes,
/// and categories as nested groups. A missing name rejects the record;
/// everything else degrades to an empty or default value.
pub fn project_product(record: &RawRecord) -> Result<Product, NormalizeError> {
    let payload = &record.payload;

    let name = payload["name"]
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| NormalizeError::MissingContent {
            id: record.id,
            reason: "name is missing".into(),
        })?;

    let brand = payload["brand"].as_str().map(str::to_owned);
    let description = payload["description"].as_str().map(str::to_owned);

    let min_price = &payload["priceRange"]["min"];
    let price_amount = min_price["withTax"]
        .as_f64()
        .map_or(0.0, |cents| cents / 100.0);
    let price_currency = min_price["currencyCode"].as_str().unwrap_or("USD").to_owned();

    let image_url = payload["images"][0]["hash"].as_str().map(|hash| {
        format!(
            "{}/{}",
            aboutyou::CDN_IMAGE_BASE,
            hash.trim_start_matches('/')
        )
    });

    let category = first_category_name(&payload["categories"]);

    Ok(Product {
        id: record.id,
        name,
        brand,
        description,
        price_amount,
        price_currency,
        image_url,
        image_local_path: None,
        category,
        created_at: record.created_at,
        updated_at: record.source_updated_at,
    })
}

/// First `categoryName` found. The upstream nests categories in groups
/// (an array of arrays); flat lists are tolerated too.
fn first_category_name(categories: &Value) -> Option<String> {
    let groups = categories.as_array()?;
    groups.iter().find_map(|group| match group {
        Value::Array(entries) => entries
            .iter()
            .find_map(|cat| cat["categoryName"].as_str().map(str::to_owned)),
        other => other["categoryName"].as_str().map(str::to_owned),
    })
}
