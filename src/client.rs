//! Low-level DHL carrier client
//!
//! Thin wrapper over the DHL eCommerce consumer endpoints: login, parcel
//! listing, targeted parcel fetch, and the account profile. The client only
//! classifies failures (auth, not-found, transient, permanent); retry and
//! re-login policy lives in [`crate::session::SessionManager`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{DhlError, Result};
use crate::types::{Credentials, DhlConfig, Parcel, Session, UserProfile};

/// Carrier operations used by the session manager and parcel cache.
///
/// Implementations classify failures: 401/403 as authentication errors,
/// 404 on targeted lookup as not-found, network failures, 429 and 5xx as
/// transient, any other carrier status as permanent. They never retry.
#[async_trait]
pub trait CarrierApi: Send + Sync {
    /// Exchange credentials for a fresh session
    async fn login(&self, credentials: &Credentials) -> Result<Session>;

    /// Fetch every parcel visible to the account
    async fn list_parcels(&self, session: &Session) -> Result<Vec<Parcel>>;

    /// Fetch one parcel by id or barcode
    async fn get_parcel(&self, session: &Session, identifier: &str) -> Result<Parcel>;

    /// Fetch the authenticated account profile
    async fn get_profile(&self, session: &Session) -> Result<UserProfile>;
}

/// Production client for the DHL eCommerce API
pub struct DhlClient {
    http: reqwest::Client,
    base_url: String,
    session_ttl: chrono::Duration,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(rename = "accessToken")]
    access_token: String,
    #[serde(rename = "accountId", default)]
    account_id: Option<Value>,
}

impl DhlClient {
    pub fn new(config: &DhlConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;
        let session_ttl = chrono::Duration::from_std(config.session_ttl)
            .map_err(|e| DhlError::Config(format!("session TTL out of range: {}", e)))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            session_ttl,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[async_trait]
impl CarrierApi for DhlClient {
    async fn login(&self, credentials: &Credentials) -> Result<Session> {
        debug!("Logging in to carrier");
        let response = self
            .http
            .post(self.url("api/user/login"))
            .json(&serde_json::json!({
                "email": credentials.username,
                "password": credentials.password(),
            }))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED
            || status == StatusCode::FORBIDDEN
            || status == StatusCode::BAD_REQUEST
        {
            return Err(DhlError::Auth(format!(
                "carrier rejected credentials ({})",
                status
            )));
        }
        if !status.is_success() {
            return Err(classify_response("login", response).await);
        }

        let body: LoginResponse = response.json().await?;
        let issued_at = Utc::now();
        // A TTL too large to add saturates: the session simply never expires
        let expires_at = issued_at
            .checked_add_signed(self.session_ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Ok(Session {
            token: body.access_token,
            issued_at,
            expires_at,
            account_id: body.account_id.and_then(id_to_string),
        })
    }

    async fn list_parcels(&self, session: &Session) -> Result<Vec<Parcel>> {
        let response = self
            .http
            .get(self.url("receiver-parcel-api/parcels"))
            .bearer_auth(&session.token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(classify_response("list parcels", response).await);
        }

        // The carrier wraps the listing in {"parcels": [...]}; some deployments
        // return the bare array, so accept both
        let body: Value = response.json().await?;
        let entries = match body {
            Value::Array(entries) => entries,
            Value::Object(mut envelope) => match envelope.remove("parcels") {
                Some(Value::Array(entries)) => entries,
                _ => {
                    return Err(DhlError::Carrier(
                        "listing response carried no parcels array".to_string(),
                    ))
                }
            },
            _ => {
                return Err(DhlError::Carrier(
                    "listing response was neither an object nor an array".to_string(),
                ))
            }
        };

        // Parse entry by entry: one malformed parcel must not sink the listing
        let total = entries.len();
        let mut parcels = Vec::with_capacity(total);
        for entry in entries {
            match serde_json::from_value::<Parcel>(entry) {
                Ok(parcel) => parcels.push(parcel),
                Err(e) => warn!(error = %e, "Skipping parcel entry that failed to parse"),
            }
        }
        if parcels.len() < total {
            debug!(parsed = parcels.len(), total, "Dropped unparseable parcel entries");
        }
        Ok(parcels)
    }

    async fn get_parcel(&self, session: &Session, identifier: &str) -> Result<Parcel> {
        let response = self
            .http
            .get(self.url(&format!("receiver-parcel-api/parcels/{}", identifier)))
            .bearer_auth(&session.token)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(DhlError::NotFound(identifier.to_string()));
        }
        if !response.status().is_success() {
            return Err(classify_response("get parcel", response).await);
        }
        Ok(response.json().await?)
    }

    async fn get_profile(&self, session: &Session) -> Result<UserProfile> {
        let response = self
            .http
            .get(self.url("api/user"))
            .bearer_auth(&session.token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(classify_response("get profile", response).await);
        }
        Ok(response.json().await?)
    }
}

/// Map an unexpected carrier status to the error taxonomy.
///
/// Only 429 and 5xx are worth retrying; any other status reflects the
/// request itself and will fail the same way again.
async fn classify_response(context: &str, response: reqwest::Response) -> DhlError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        DhlError::Auth(format!("{} rejected with {}", context, status))
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        DhlError::Transient(format!("{} failed with {}: {}", context, status, excerpt(&body)))
    } else {
        DhlError::Carrier(format!("{} failed with {}: {}", context, status, excerpt(&body)))
    }
}

fn excerpt(body: &str) -> String {
    let mut taken: String = body.chars().take(160).collect();
    if body.chars().count() > 160 {
        taken.push_str("...");
    }
    taken
}

fn id_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
