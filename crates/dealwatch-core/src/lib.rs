//! Core domain model for dealwatch product snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "dealwatch-core";

/// Number of generations kept in the rotating window. Ingesting generation N
/// deletes generation N - RETAINED_GENERATIONS.
pub const RETAINED_GENERATIONS: i64 = 10;

/// One product as returned by the partner best-products API.
///
/// The wire format is camelCase JSON; everything except `productId` is
/// optional upstream and defaults to an empty/zero value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    pub product_id: i64,
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub product_price: i64,
    #[serde(default)]
    pub category_name: String,
    #[serde(default)]
    pub is_rocket: bool,
    #[serde(default)]
    pub is_free_shipping: bool,
    #[serde(default)]
    pub product_image: String,
    #[serde(default)]
    pub product_url: String,
}

/// Persisted snapshot: one row per (product_id, generation), carrying the
/// price-gap percentage computed at write time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub product_id: i64,
    pub product_name: String,
    pub product_price: i64,
    pub category_name: String,
    pub is_rocket: bool,
    pub is_free_shipping: bool,
    pub product_image: String,
    pub product_url: String,
    pub price_gap: f64,
    pub generation: i64,
    pub inserted_at: DateTime<Utc>,
}

impl ProductSnapshot {
    pub fn from_record(
        record: &ProductRecord,
        generation: i64,
        price_gap: f64,
        inserted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            product_id: record.product_id,
            product_name: record.product_name.clone(),
            product_price: record.product_price,
            category_name: record.category_name.clone(),
            is_rocket: record.is_rocket,
            is_free_shipping: record.is_free_shipping,
            product_image: record.product_image.clone(),
            product_url: record.product_url.clone(),
            price_gap,
            generation,
            inserted_at,
        }
    }
}

/// Signed percentage change of `incoming` versus the reference price from the
/// product's nearest earlier generation. Negative means the price dropped.
/// No reference (first appearance) or a zero reference yields 0.0.
pub fn price_gap(incoming: i64, reference: Option<i64>) -> f64 {
    match reference {
        Some(prev) if prev != 0 => (incoming - prev) as f64 / prev as f64 * 100.0,
        _ => 0.0,
    }
}
