// Wire types exchanged with the marketplace backend: REST bodies and the
// JSON text frames pushed over the per-RFQ bid channel.
//
// Payloads are validated here, at the boundary. Decimal fields arrive either
// as JSON numbers or as decimal strings ("100.00"); blank strings on optional
// text fields are treated as absent.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::warn;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }
    };
}

id_type!(
    /// Server-assigned bid identifier.
    BidId
);
id_type!(
    /// Identifier of a request for quotation.
    RfqId
);
id_type!(
    /// Identifier of a single requested part within an RFQ.
    LineItemId
);
id_type!(
    /// Identifier of a marketplace account (workshop, vendor or admin).
    UserId
);

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Workshop,
    Vendor,
}

/// Identity returned by `GET /auth/me/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: UserId,
    pub role: Role,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub shop_name: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub phone_number: Option<String>,
    #[serde(default, deserialize_with = "decimal_opt")]
    pub rating: Option<f64>,
}

// ---------------------------------------------------------------------------
// Bids
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartCategory {
    GenuineOem,
    AftermarketBranded,
    AftermarketUnbranded,
    UsedReconditioned,
    #[default]
    #[serde(other)]
    Unknown,
}

impl fmt::Display for PartCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PartCategory::GenuineOem => "Genuine OEM",
            PartCategory::AftermarketBranded => "Aftermarket (Branded)",
            PartCategory::AftermarketUnbranded => "Aftermarket (Unbranded)",
            PartCategory::UsedReconditioned => "Used/Reconditioned",
            PartCategory::Unknown => "Unspecified",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BidStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
}

/// A vendor's priced offer against one RFQ line item. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    pub id: BidId,
    /// Owning RFQ. The list endpoint does not always include it.
    #[serde(default)]
    pub rfq: Option<RfqId>,
    #[serde(rename = "rfq_item")]
    pub line_item: LineItemId,
    /// Placing vendor. The backend's bid serializer does not emit it, so it
    /// is usually absent.
    #[serde(default)]
    pub vendor: Option<UserId>,
    /// Vendor display name (the vendor's username on the backend).
    #[serde(default, deserialize_with = "blank_as_none")]
    pub vendor_name: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub vendor_shop_name: Option<String>,
    #[serde(default, deserialize_with = "decimal_opt")]
    pub vendor_rating: Option<f64>,
    #[serde(deserialize_with = "positive_decimal")]
    pub amount: f64,
    #[serde(default)]
    pub item_name: String,
    #[serde(default)]
    pub item_quantity: Option<u32>,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub part_category: PartCategory,
    #[serde(default = "default_availability")]
    pub availability: bool,
    /// Free-form fulfilment estimate, e.g. "2 hours".
    #[serde(default, deserialize_with = "blank_as_none")]
    pub eta: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub remarks: Option<String>,
    #[serde(default)]
    pub status: BidStatus,
    #[serde(default, deserialize_with = "timestamp_opt")]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_availability() -> bool {
    true
}

/// Decode a bid list body element by element.
///
/// A body that is not a JSON array is an error. Individual elements that fail
/// validation are skipped so one bad record does not blank the whole view.
pub fn decode_bid_list(body: serde_json::Value) -> Result<Vec<Bid>, PayloadError> {
    let serde_json::Value::Array(items) = body else {
        return Err(PayloadError::NotAList);
    };

    let mut bids = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<Bid>(item) {
            Ok(bid) => bids.push(bid),
            Err(e) => warn!("Skipping malformed bid in list response: {e}"),
        }
    }
    Ok(bids)
}

// ---------------------------------------------------------------------------
// Award
// ---------------------------------------------------------------------------

/// Body of `POST /rfqs/{id}/award_order/`.
#[derive(Debug, Clone, Serialize)]
pub struct AwardRequest<'a> {
    pub bid_ids: &'a [BidId],
}

/// Successful award response. The backend creates one order per vendor.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AwardReceipt {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub order_ids: Vec<u64>,
}

/// Error body shape used by the backend for 4xx responses. Framework-level
/// rejections (auth, permissions) use `detail` instead of `error`.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(alias = "detail")]
    pub error: String,
}

// ---------------------------------------------------------------------------
// Channel frames
// ---------------------------------------------------------------------------

/// A decoded text frame from `/ws/rfqs/{id}/`.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    BidPlaced(Bid),
    /// Any event type this client does not consume. Carries the type tag.
    Ignored(String),
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("`bid_placed` frame without a `bid` payload")]
    MissingBid,

    #[error("expected a JSON array of bids")]
    NotAList,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    bid: Option<serde_json::Value>,
}

pub const BID_PLACED: &str = "bid_placed";

/// Parse one channel text frame.
pub fn parse_channel_message(text: &str) -> Result<ChannelMessage, PayloadError> {
    let envelope: Envelope = serde_json::from_str(text)?;
    if envelope.kind != BID_PLACED {
        return Ok(ChannelMessage::Ignored(envelope.kind));
    }
    let bid = envelope.bid.ok_or(PayloadError::MissingBid)?;
    Ok(ChannelMessage::BidPlaced(serde_json::from_value(bid)?))
}

// ---------------------------------------------------------------------------
// Serde helpers
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    Text(String),
}

impl NumberOrString {
    fn into_f64<E: serde::de::Error>(self) -> Result<f64, E> {
        let n = match self {
            NumberOrString::Number(n) => n,
            NumberOrString::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| E::custom(format!("invalid decimal `{s}`")))?,
        };
        if n.is_finite() {
            Ok(n)
        } else {
            Err(E::custom("decimal must be finite"))
        }
    }
}

fn positive_decimal<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let n = NumberOrString::deserialize(deserializer)?.into_f64::<D::Error>()?;
    if n <= 0.0 {
        return Err(serde::de::Error::custom(format!(
            "amount must be positive, got {n}"
        )));
    }
    Ok(n)
}

fn decimal_opt<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<NumberOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrString::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(value) => value.into_f64().map(Some),
    }
}

fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;
    Ok(s.filter(|s| !s.trim().is_empty()))
}

fn timestamp_opt<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    match DateTime::parse_from_rfc3339(&raw) {
        Ok(ts) => Ok(Some(ts.with_timezone(&Utc))),
        Err(e) => {
            warn!("Ignoring unparseable bid timestamp `{raw}`: {e}");
            Ok(None)
        }
    }
}
