//! Partner affiliate API client: HMAC request signing + best-products fetch.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dealwatch_core::ProductRecord;
use hmac::{Hmac, Mac};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;
use tracing::info;

pub const CRATE_NAME: &str = "dealwatch-partner";

type HmacSha256 = Hmac<Sha256>;

pub const BEST_CATEGORIES_PATH: &str =
    "/v2/providers/affiliate_open_api/apis/openapi/v1/products/bestcategories/";

/// Response-code sentinel the partner uses for success.
pub const SUCCESS_CODE: &str = "0";

#[derive(Debug, Clone)]
pub struct PartnerConfig {
    pub base_url: String,
    pub access_key: String,
    pub secret_key: String,
    pub sub_id: String,
    pub image_size: String,
    pub timeout: Duration,
}

impl Default for PartnerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api-gateway.coupang.com".to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            sub_id: "digitalbest".to_string(),
            image_size: "512x512".to_string(),
            timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Error)]
pub enum PartnerError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("partner response code {code}: {message}")]
    Api { code: String, message: String },
}

#[derive(Debug, Deserialize)]
pub struct BestProductsResponse {
    #[serde(rename = "rCode")]
    pub r_code: String,
    #[serde(rename = "rMessage", default)]
    pub r_message: Option<String>,
    #[serde(default)]
    pub data: Vec<ProductRecord>,
}

/// The `signed-date` timestamp: UTC as `YYMMDD'T'HHmmss'Z'`.
pub fn signed_date(at: DateTime<Utc>) -> String {
    at.format("%y%m%dT%H%M%SZ").to_string()
}

/// Authorization header for one request.
///
/// The remote verifies hex(HMAC-SHA256) over `datetime + method + path + query`,
/// where `path` carries no query string and `query` no leading `?`.
pub fn sign_request(
    access_key: &str,
    secret_key: &str,
    method: &str,
    path: &str,
    query: &str,
    signed_at: DateTime<Utc>,
) -> String {
    let datetime = signed_date(signed_at);
    let message = format!("{datetime}{method}{path}{query}");

    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(message.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    format!(
        "CEA algorithm=HmacSHA256, access-key={access_key}, signed-date={datetime}, signature={signature}"
    )
}

#[derive(Debug, Clone)]
pub struct PartnerClient {
    config: PartnerConfig,
    client: reqwest::Client,
}

impl PartnerClient {
    pub fn new(config: PartnerConfig) -> Result<Self, PartnerError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { config, client })
    }

    /// Fetch the current "best products in category" list.
    ///
    /// Any transport error, non-2xx status, or non-success response code is
    /// returned to the caller; the client never retries.
    pub async fn fetch_best_products(
        &self,
        category_id: &str,
        limit: u32,
    ) -> Result<Vec<ProductRecord>, PartnerError> {
        let path = format!("{BEST_CATEGORIES_PATH}{category_id}");
        let query = format!(
            "limit={limit}&subId={}&imageSize={}",
            self.config.sub_id, self.config.image_size
        );
        let authorization = sign_request(
            &self.config.access_key,
            &self.config.secret_key,
            "GET",
            &path,
            &query,
            Utc::now(),
        );
        let url = format!("{}{path}?{query}", self.config.base_url);

        let resp = self
            .client
            .get(&url)
            .header(AUTHORIZATION, authorization)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(PartnerError::HttpStatus {
                status: status.as_u16(),
                url: resp.url().to_string(),
            });
        }

        let body: BestProductsResponse = resp.json().await?;
        if body.r_code != SUCCESS_CODE {
            return Err(PartnerError::Api {
                code: body.r_code,
                message: body.r_message.unwrap_or_default(),
            });
        }

        info!(category_id, count = body.data.len(), "fetched best products");
        Ok(body.data)
    }
}
