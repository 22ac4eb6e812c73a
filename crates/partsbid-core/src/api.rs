// REST client for the marketplace backend.
//
// Only the three endpoints the live-bidding view needs are covered: the bid
// list for an RFQ, the signed-in identity, and the award command.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{RequestBuilder, Response, Url};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::auth::AuthContext;
use crate::config::ApiConfig;
use crate::protocol::{
    decode_bid_list, AwardReceipt, AwardRequest, Bid, BidId, CurrentUser, ErrorBody, RfqId,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid API URL: {0}")]
    Url(String),

    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    #[error("request timed out")]
    Timeout,

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected response body: {0}")]
    Decode(String),

    #[error("no bids selected")]
    NothingSelected,
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout
        } else {
            ApiError::Network(e)
        }
    }
}

fn decode_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Decode(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Service trait
// ---------------------------------------------------------------------------

/// Backend operations used by a live-bidding session. Implemented by
/// [`RestClient`] and by test doubles.
#[async_trait]
pub trait MarketplaceApi: Send + Sync {
    /// `GET /bids/?rfq={id}`
    async fn fetch_bids(&self, rfq_id: RfqId) -> Result<Vec<Bid>, ApiError>;

    /// `GET /auth/me/`
    async fn current_user(&self) -> Result<CurrentUser, ApiError>;

    /// `POST /rfqs/{id}/award_order/`
    async fn award_order(
        &self,
        rfq_id: RfqId,
        bid_ids: &[BidId],
    ) -> Result<AwardReceipt, ApiError>;
}

// ---------------------------------------------------------------------------
// RestClient
// ---------------------------------------------------------------------------

pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
    auth: Arc<dyn AuthContext>,
    award_timeout: Duration,
}

impl RestClient {
    /// Build a client from the `[api]` config section. The request timeout
    /// applies to every call; the award call uses its own timeout.
    pub fn new(config: &ApiConfig, auth: Arc<dyn AuthContext>) -> Result<Self, ApiError> {
        let mut base_url =
            Url::parse(&config.base_url).map_err(|e| ApiError::Url(e.to_string()))?;
        // Relative joins replace the last path segment unless it ends in '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(ApiError::Network)?;

        Ok(Self {
            http,
            base_url,
            auth,
            award_timeout: config.award_timeout(),
        })
    }

    pub fn with_award_timeout(mut self, timeout: Duration) -> Self {
        self.award_timeout = timeout;
        self
    }

    /// The normalized REST base address (always ends in `/`).
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::Url(format!("{path}: {e}")))
    }

    /// Attach the auth header, send, and turn non-2xx responses into
    /// [`ApiError::Status`].
    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let request = match self.auth.token() {
            Some(token) => request.header(AUTHORIZATION, format!("Token {token}")),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or_else(|_| {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            });
        warn!(status = status.as_u16(), %message, "API request failed");
        Err(ApiError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl MarketplaceApi for RestClient {
    #[tracing::instrument(skip(self), fields(rfq = %rfq_id))]
    async fn fetch_bids(&self, rfq_id: RfqId) -> Result<Vec<Bid>, ApiError> {
        let mut url = self.endpoint("bids/")?;
        url.query_pairs_mut()
            .append_pair("rfq", &rfq_id.to_string());

        let response = self.send(self.http.get(url)).await?;
        let body: serde_json::Value = response.json().await.map_err(decode_error)?;
        let bids = decode_bid_list(body).map_err(|e| ApiError::Decode(e.to_string()))?;
        debug!(count = bids.len(), "Fetched bid snapshot");
        Ok(bids)
    }

    #[tracing::instrument(skip(self))]
    async fn current_user(&self) -> Result<CurrentUser, ApiError> {
        let url = self.endpoint("auth/me/")?;
        let response = self.send(self.http.get(url)).await?;
        let user: CurrentUser = response.json().await.map_err(decode_error)?;
        debug!(user = %user.id, role = ?user.role, "Fetched current user");
        Ok(user)
    }

    #[tracing::instrument(skip(self, bid_ids), fields(rfq = %rfq_id, bids = bid_ids.len()))]
    async fn award_order(
        &self,
        rfq_id: RfqId,
        bid_ids: &[BidId],
    ) -> Result<AwardReceipt, ApiError> {
        if bid_ids.is_empty() {
            return Err(ApiError::NothingSelected);
        }

        let url = self.endpoint(&format!("rfqs/{rfq_id}/award_order/"))?;
        let request = self
            .http
            .post(url)
            .timeout(self.award_timeout)
            .json(&AwardRequest { bid_ids });

        let start = std::time::Instant::now();
        let response = self.send(request).await?;
        let receipt: AwardReceipt = response.json().await.map_err(decode_error)?;
        info!(
            orders = ?receipt.order_ids,
            duration_ms = start.elapsed().as_millis(),
            "Award accepted"
        );
        Ok(receipt)
    }
}
