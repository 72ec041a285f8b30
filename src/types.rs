//! Core types for the parcel access layer
//!
//! Wire types mirror the DHL eCommerce payloads and parse defensively:
//! unknown statuses degrade to [`ParcelStatus::Unknown`], malformed
//! timestamps become `None`, and unmodeled carrier fields ride along in a
//! flattened `raw` map so resource reads never lose data.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{DhlError, Result};

/// Default carrier API base URL
pub const DEFAULT_BASE_URL: &str = "https://my.dhlecommerce.nl";
/// Default parcel cache staleness window in seconds
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;
/// Default carrier HTTP timeout in seconds
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
/// Default session lifetime before re-login in seconds
pub const DEFAULT_SESSION_TTL_SECS: u64 = 1800;
/// Default maximum transient retries per carrier operation
pub const DEFAULT_MAX_RETRIES: u32 = 5;
/// Default base delay for exponential retry backoff in milliseconds
pub const DEFAULT_RETRY_BASE_MS: u64 = 500;
/// Upper bound on a single retry backoff in seconds
pub const RETRY_MAX_BACKOFF_SECS: u64 = 15;
/// Default number of summaries returned by the filter tool
pub const DEFAULT_FILTER_LIMIT: usize = 5;
/// Widest accepted `delivered_within_days` window (ten years)
pub const MAX_FILTER_WINDOW_DAYS: i64 = 3650;

/// Carrier account credentials.
///
/// Read once at startup, immutable afterwards, and never logged: `Debug`
/// redacts both fields so accidental `{:?}` output stays safe.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Result<Self> {
        let username = username.into();
        let password = password.into();
        if username.trim().is_empty() {
            return Err(DhlError::Config("DHL_USERNAME must not be empty".to_string()));
        }
        if password.is_empty() {
            return Err(DhlError::Config("DHL_PASSWORD must not be empty".to_string()));
        }
        Ok(Self { username, password })
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &"<redacted>")
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Runtime configuration for the parcel access layer
#[derive(Debug, Clone)]
pub struct DhlConfig {
    pub credentials: Credentials,
    pub base_url: String,
    pub cache_ttl: Duration,
    pub http_timeout: Duration,
    pub session_ttl: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl DhlConfig {
    /// Configuration with validated credentials and stock defaults
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            base_url: DEFAULT_BASE_URL.to_string(),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_MS),
        }
    }
}

/// Authenticated carrier session.
///
/// Immutable once issued; re-authentication replaces the session wholesale
/// rather than mutating it. `Debug` redacts the bearer token.
#[derive(Clone)]
pub struct Session {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub account_id: Option<String>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("account_id", &self.account_id)
            .finish()
    }
}

/// Lifecycle status of a parcel.
///
/// Carrier payloads use free-form status strings; [`ParcelStatus::from_wire`]
/// maps the ones we know and degrades the rest to `Unknown` so a new carrier
/// status never breaks parsing. Caller-supplied filter values go through the
/// strict [`FromStr`] impl instead and are rejected when unrecognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParcelStatus {
    InTransit,
    Delivered,
    Returned,
    Exception,
    #[default]
    Unknown,
}

impl ParcelStatus {
    /// Tolerant mapping from a carrier wire status. Total: never fails.
    pub fn from_wire(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "DELIVERED" => ParcelStatus::Delivered,
            "IN_TRANSIT" | "INTRANSIT" | "TRANSIT" | "EN_ROUTE" | "OUT_FOR_DELIVERY" => {
                ParcelStatus::InTransit
            }
            "RETURNED" | "RETURNED_TO_SENDER" | "RETURN_TO_SENDER" => ParcelStatus::Returned,
            "EXCEPTION" | "DELIVERY_EXCEPTION" | "NOT_DELIVERED" | "FAILED" => {
                ParcelStatus::Exception
            }
            _ => ParcelStatus::Unknown,
        }
    }

    /// Canonical snake_case name, used in tool arguments and JSON output
    pub fn as_str(&self) -> &'static str {
        match self {
            ParcelStatus::InTransit => "in_transit",
            ParcelStatus::Delivered => "delivered",
            ParcelStatus::Returned => "returned",
            ParcelStatus::Exception => "exception",
            ParcelStatus::Unknown => "unknown",
        }
    }

    /// Human-readable phrase for summaries
    pub fn phrase(&self) -> &'static str {
        match self {
            ParcelStatus::InTransit => "In transit",
            ParcelStatus::Delivered => "Delivered",
            ParcelStatus::Returned => "Returned to sender",
            ParcelStatus::Exception => "Delivery exception",
            ParcelStatus::Unknown => "Status unknown",
        }
    }
}

impl fmt::Display for ParcelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ParcelStatus {
    type Err = DhlError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "in_transit" => Ok(ParcelStatus::InTransit),
            "delivered" => Ok(ParcelStatus::Delivered),
            "returned" => Ok(ParcelStatus::Returned),
            "exception" => Ok(ParcelStatus::Exception),
            "unknown" => Ok(ParcelStatus::Unknown),
            other => Err(DhlError::Validation(format!(
                "Unknown status '{}'. Valid values: in_transit, delivered, returned, exception, unknown",
                other
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for ParcelStatus {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Non-string statuses degrade to Unknown instead of failing the parcel
        let value = Value::deserialize(deserializer)?;
        Ok(value.as_str().map(ParcelStatus::from_wire).unwrap_or_default())
    }
}

/// Parse a carrier timestamp, tolerating both RFC 3339 and the zone-less
/// local form DHL sometimes emits. Unparseable input becomes `None`.
pub fn parse_carrier_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| Utc.from_utc_datetime(&naive))
        })
}

fn lenient_datetime<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(Value::as_str)
        .and_then(parse_carrier_timestamp))
}

fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }))
}

/// Delivery window hint from the carrier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceivingTimeIndication {
    #[serde(
        default,
        deserialize_with = "lenient_datetime",
        skip_serializing_if = "Option::is_none"
    )]
    pub moment: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub raw: Map<String, Value>,
}

/// Destination address block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    /// House numbers arrive as strings or bare numbers depending on endpoint
    #[serde(
        rename = "houseNumber",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub house_number: Option<String>,
    #[serde(rename = "postalCode", default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

/// Parcel destination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Destination {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(flatten)]
    pub raw: Map<String, Value>,
}

/// One tracked parcel as reported by the carrier.
///
/// Only `parcelId` is required; every other field is optional and parses
/// leniently. Fields we do not model are preserved in `raw` and re-emitted
/// verbatim when the parcel is served as a resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parcel {
    #[serde(rename = "parcelId")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barcode: Option<String>,
    #[serde(default)]
    pub status: ParcelStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returnable: Option<bool>,
    #[serde(
        rename = "createdAt",
        default,
        deserialize_with = "lenient_datetime",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        rename = "lastUpdatedAt",
        default,
        deserialize_with = "lenient_datetime",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_updated_at: Option<DateTime<Utc>>,
    #[serde(
        rename = "receivingTimeIndication",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub receiving_time_indication: Option<ReceivingTimeIndication>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<Destination>,
    /// Carrier fields not modeled above, passed through untouched
    #[serde(flatten)]
    pub raw: Map<String, Value>,
}

impl Parcel {
    /// Estimated delivery moment, if the carrier provided one
    pub fn estimated_delivery(&self) -> Option<DateTime<Utc>> {
        self.receiving_time_indication.as_ref().and_then(|r| r.moment)
    }

    /// True when `needle` equals the parcel id or its barcode
    pub fn matches_identifier(&self, needle: &str) -> bool {
        self.id == needle || self.barcode.as_deref() == Some(needle)
    }
}

/// A self-consistent snapshot of the account's parcels from one listing call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParcelCollection {
    pub parcels: Vec<Parcel>,
    /// When this snapshot was fetched from the carrier
    pub fetched_at: DateTime<Utc>,
}

impl ParcelCollection {
    pub fn new(parcels: Vec<Parcel>) -> Self {
        Self {
            parcels,
            fetched_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.parcels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parcels.is_empty()
    }
}

/// Authenticated account profile.
///
/// Loosely typed on purpose: the account endpoint changes more often than
/// the parcel one, so everything is optional and extras ride along in `raw`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(
        rename = "accountId",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(rename = "firstName", default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(rename = "lastName", default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(rename = "emailVerified", default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(flatten)]
    pub raw: Map<String, Value>,
}

/// Criteria for filtering a parcel collection.
///
/// Absent fields are unconstrained; present fields combine with logical AND.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterCriteria {
    pub status: Option<ParcelStatus>,
    pub category: Option<String>,
    pub within_days: Option<i64>,
    pub returnable: Option<bool>,
}

impl FilterCriteria {
    /// Parse and validate tool arguments.
    ///
    /// Validation happens before any carrier call: a bad status or a day
    /// window outside `1..=MAX_FILTER_WINDOW_DAYS` is rejected here with a
    /// message naming the accepted values.
    pub fn from_args(args: &Value) -> Result<Self> {
        let status = match args.get("status") {
            Some(Value::String(s)) => Some(s.parse::<ParcelStatus>()?),
            Some(Value::Null) | None => None,
            Some(other) => {
                return Err(DhlError::Validation(format!(
                    "status must be a string, got {}",
                    other
                )))
            }
        };

        let category = match args.get("category") {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
            Some(Value::String(_)) => {
                return Err(DhlError::Validation("category must not be empty".to_string()))
            }
            Some(Value::Null) | None => None,
            Some(other) => {
                return Err(DhlError::Validation(format!(
                    "category must be a string, got {}",
                    other
                )))
            }
        };

        let within_days = match args.get("delivered_within_days") {
            Some(v) if !v.is_null() => {
                let days = v.as_i64().ok_or_else(|| {
                    DhlError::Validation("delivered_within_days must be an integer".to_string())
                })?;
                if !(1..=MAX_FILTER_WINDOW_DAYS).contains(&days) {
                    return Err(DhlError::Validation(format!(
                        "delivered_within_days must be between 1 and {}",
                        MAX_FILTER_WINDOW_DAYS
                    )));
                }
                Some(days)
            }
            _ => None,
        };

        let returnable = match args.get("returnable") {
            Some(v) if !v.is_null() => Some(v.as_bool().ok_or_else(|| {
                DhlError::Validation("returnable must be a boolean".to_string())
            })?),
            _ => None,
        };

        Ok(Self {
            status,
            category,
            within_days,
            returnable,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.category.is_none()
            && self.within_days.is_none()
            && self.returnable.is_none()
    }
}

/// Concise, human-oriented view of one parcel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParcelSummary {
    pub identifier: String,
    pub status: ParcelStatus,
    pub status_phrase: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_delivery: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returnable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}
