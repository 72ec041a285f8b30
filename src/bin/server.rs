//! DHL parcel MCP server
//!
//! Run with: dhl-mcp-server (DHL_USERNAME and DHL_PASSWORD must be set)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use clap::Parser;
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dhl_mcp::cache::ParcelCache;
use dhl_mcp::client::{CarrierApi, DhlClient};
use dhl_mcp::error::{DhlError, Result};
use dhl_mcp::filter::{filter_parcels, summarize};
use dhl_mcp::mcp::{
    get_resource_definitions, get_resource_templates, get_tool_definitions, methods,
    InitializeResult, McpHandler, McpRequest, McpResponse, McpServer, ResourceReadResult,
    ToolCallResult, PARCELS_URI, PARCEL_URI_PREFIX, PROFILE_URI, SERVER_INSTRUCTIONS,
};
use dhl_mcp::session::SessionManager;
use dhl_mcp::types::{
    Credentials, DhlConfig, FilterCriteria, UserProfile, DEFAULT_BASE_URL, DEFAULT_FILTER_LIMIT,
};

#[derive(Parser, Debug)]
#[command(name = "dhl-mcp-server")]
#[command(about = "DHL parcel tracking MCP server")]
struct Args {
    /// Carrier account email
    #[arg(long, env = "DHL_USERNAME", hide_env_values = true)]
    username: String,

    /// Carrier account password
    #[arg(long, env = "DHL_PASSWORD", hide_env_values = true)]
    password: String,

    /// Carrier API base URL
    #[arg(long, env = "DHL_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Parcel cache staleness window in seconds
    #[arg(long, env = "DHL_CACHE_TTL_SECS", default_value = "300")]
    cache_ttl_secs: u64,

    /// Carrier HTTP timeout in seconds
    #[arg(long, env = "DHL_HTTP_TIMEOUT_SECS", default_value = "30")]
    http_timeout_secs: u64,

    /// Session lifetime before re-login in seconds
    #[arg(long, env = "DHL_SESSION_TTL_SECS", default_value = "1800")]
    session_ttl_secs: u64,

    /// Maximum transient retries per carrier operation
    #[arg(long, env = "DHL_MAX_RETRIES", default_value = "5")]
    max_retries: u32,
}

impl Args {
    fn into_config(self) -> Result<DhlConfig> {
        let credentials = Credentials::new(self.username, self.password)?;
        let mut config = DhlConfig::new(credentials);
        config.base_url = self.base_url;
        config.cache_ttl = Duration::from_secs(self.cache_ttl_secs);
        config.http_timeout = Duration::from_secs(self.http_timeout_secs);
        config.session_ttl = Duration::from_secs(self.session_ttl_secs);
        config.max_retries = self.max_retries;
        Ok(config)
    }
}

/// MCP request handler backed by the parcel access layer
struct DhlHandler {
    api: Arc<dyn CarrierApi>,
    sessions: Arc<SessionManager>,
    cache: ParcelCache,
}

impl DhlHandler {
    fn new(api: Arc<dyn CarrierApi>, config: &DhlConfig) -> Self {
        let sessions = Arc::new(SessionManager::new(api.clone(), config));
        let cache = ParcelCache::new(api.clone(), sessions.clone(), config);
        Self {
            api,
            sessions,
            cache,
        }
    }

    async fn handle_tool_call(&self, name: &str, params: Value) -> Result<Value> {
        match name {
            "filter_parcels" => self.tool_filter_parcels(params).await,
            "parcel_summary" => self.tool_parcel_summary(params).await,
            _ => Err(DhlError::Validation(format!("Unknown tool: {}", name))),
        }
    }

    async fn tool_filter_parcels(&self, params: Value) -> Result<Value> {
        // Arguments are validated before any carrier traffic
        let criteria = FilterCriteria::from_args(&params)?;
        let limit = match params.get("limit") {
            Some(v) if !v.is_null() => {
                let limit = v.as_u64().ok_or_else(|| {
                    DhlError::Validation("limit must be a positive integer".to_string())
                })?;
                if limit == 0 {
                    return Err(DhlError::Validation("limit must be at least 1".to_string()));
                }
                limit as usize
            }
            _ => DEFAULT_FILTER_LIMIT,
        };

        let collection = self.cache.get(false).await?;
        let matches = filter_parcels(&collection.parcels, &criteria, Utc::now());
        let summaries: Vec<_> = matches.iter().take(limit).map(|p| summarize(p)).collect();
        Ok(json!({
            "total_matches": matches.len(),
            "returned": summaries.len(),
            "parcels": summaries,
        }))
    }

    async fn tool_parcel_summary(&self, params: Value) -> Result<Value> {
        let identifier = params
            .get("identifier")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| DhlError::Validation("identifier is required".to_string()))?;
        let parcel = self.cache.lookup(identifier).await?;
        Ok(serde_json::to_value(summarize(&parcel))?)
    }

    async fn read_resource(&self, uri: &str) -> Result<Value> {
        if uri == PARCELS_URI {
            let collection = self.cache.get(false).await?;
            return Ok(serde_json::to_value(collection)?);
        }
        if uri == PROFILE_URI {
            let profile = self.fetch_profile().await?;
            return Ok(serde_json::to_value(profile)?);
        }
        if let Some(identifier) = uri.strip_prefix(PARCEL_URI_PREFIX) {
            if identifier.is_empty() {
                return Err(DhlError::Validation(format!(
                    "Missing parcel identifier in {}",
                    uri
                )));
            }
            let parcel = self.cache.lookup(identifier).await?;
            return Ok(serde_json::to_value(parcel)?);
        }
        Err(DhlError::Validation(format!("Unknown resource: {}", uri)))
    }

    /// Profile reads always hit the carrier: identity data is small and
    /// should never be served stale
    async fn fetch_profile(&self) -> Result<UserProfile> {
        let api = self.api.clone();
        self.sessions
            .with_session(move |session| {
                let api = api.clone();
                async move { api.get_profile(&session).await }
            })
            .await
    }
}

#[async_trait]
impl McpHandler for DhlHandler {
    async fn handle_request(&self, request: McpRequest) -> McpResponse {
        match request.method.as_str() {
            methods::INITIALIZE => {
                let result = InitializeResult::default().with_instructions(SERVER_INSTRUCTIONS);
                McpResponse::success(request.id, json!(result))
            }
            methods::INITIALIZED => McpResponse::success(request.id, json!({})),
            methods::PING => McpResponse::success(request.id, json!({})),
            methods::LIST_TOOLS => {
                McpResponse::success(request.id, json!({ "tools": get_tool_definitions() }))
            }
            methods::CALL_TOOL => {
                let name = request
                    .params
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                let arguments = request
                    .params
                    .get("arguments")
                    .cloned()
                    .unwrap_or(json!({}));
                let result = match self.handle_tool_call(name, arguments).await {
                    Ok(value) => ToolCallResult::json(&value),
                    Err(e) => {
                        tracing::warn!(tool = name, kind = e.kind(), error = %e, "Tool call failed");
                        ToolCallResult::failure(&e)
                    }
                };
                McpResponse::success(request.id, json!(result))
            }
            methods::LIST_RESOURCES => McpResponse::success(
                request.id,
                json!({ "resources": get_resource_definitions() }),
            ),
            methods::LIST_RESOURCE_TEMPLATES => McpResponse::success(
                request.id,
                json!({ "resourceTemplates": get_resource_templates() }),
            ),
            methods::READ_RESOURCE => {
                let uri = request
                    .params
                    .get("uri")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                match self.read_resource(&uri).await {
                    Ok(value) => McpResponse::success(
                        request.id,
                        json!(ResourceReadResult::json(&uri, &value)),
                    ),
                    Err(e) => {
                        tracing::warn!(uri = %uri, kind = e.kind(), error = %e, "Resource read failed");
                        McpResponse::from_error(request.id, &e)
                    }
                }
            }
            _ => McpResponse::error(
                request.id,
                -32601,
                format!("Method not found: {}", request.method),
            ),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logging goes to stderr; stdout carries the MCP protocol
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = args.into_config()?;

    let api: Arc<dyn CarrierApi> = Arc::new(DhlClient::new(&config)?);
    let handler = DhlHandler::new(api, &config);
    let server = McpServer::new(handler);

    tracing::info!("DHL parcel MCP server starting");
    server.run().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dhl_mcp::types::{Parcel, Session};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubCarrier {
        parcels: Vec<Parcel>,
        profile: UserProfile,
        login_count: AtomicU32,
        list_count: AtomicU32,
        auth_failures_remaining: AtomicU32,
    }

    impl StubCarrier {
        fn with_parcels(parcels: Vec<Parcel>) -> Self {
            Self {
                parcels,
                profile: serde_json::from_value(json!({
                    "accountId": "A-1",
                    "email": "user@example.com",
                    "firstName": "Jan"
                }))
                .unwrap(),
                login_count: AtomicU32::new(0),
                list_count: AtomicU32::new(0),
                auth_failures_remaining: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl CarrierApi for StubCarrier {
        async fn login(&self, _credentials: &Credentials) -> Result<Session> {
            self.login_count.fetch_add(1, Ordering::SeqCst);
            let now = Utc::now();
            Ok(Session {
                token: "tok".to_string(),
                issued_at: now,
                expires_at: now + chrono::Duration::hours(1),
                account_id: Some("A-1".to_string()),
            })
        }

        async fn list_parcels(&self, _session: &Session) -> Result<Vec<Parcel>> {
            self.list_count.fetch_add(1, Ordering::SeqCst);
            if self
                .auth_failures_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(DhlError::Auth("token expired".to_string()));
            }
            Ok(self.parcels.clone())
        }

        async fn get_parcel(&self, _session: &Session, identifier: &str) -> Result<Parcel> {
            self.parcels
                .iter()
                .find(|p| p.matches_identifier(identifier))
                .cloned()
                .ok_or_else(|| DhlError::NotFound(identifier.to_string()))
        }

        async fn get_profile(&self, _session: &Session) -> Result<UserProfile> {
            Ok(self.profile.clone())
        }
    }

    fn wire_parcel(id: &str, status: &str) -> Parcel {
        serde_json::from_value(json!({
            "parcelId": id,
            "barcode": format!("JVGL{}", id),
            "status": status,
            "returnable": false,
            "lastUpdatedAt": Utc::now().to_rfc3339()
        }))
        .unwrap()
    }

    fn test_handler(stub: StubCarrier) -> (DhlHandler, Arc<StubCarrier>) {
        let stub = Arc::new(stub);
        let credentials = Credentials::new("user@example.com", "pw").unwrap();
        let config = DhlConfig::new(credentials);
        (DhlHandler::new(stub.clone(), &config), stub)
    }

    fn request(method: &str, params: Value) -> McpRequest {
        McpRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(json!(1)),
            method: method.to_string(),
            params,
        }
    }

    /// Pull the JSON payload back out of a tool call response
    fn tool_payload(response: &McpResponse) -> (Value, bool) {
        let result = response.result.as_ref().expect("expected a result");
        let text = result["content"][0]["text"].as_str().expect("text content");
        let is_error = result["isError"].as_bool().unwrap_or(false);
        (serde_json::from_str(text).unwrap(), is_error)
    }

    #[tokio::test]
    async fn initialize_reports_capabilities_and_instructions() {
        let (handler, _) = test_handler(StubCarrier::with_parcels(Vec::new()));
        let response = handler
            .handle_request(request(methods::INITIALIZE, Value::Null))
            .await;
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], json!("2024-11-05"));
        assert_eq!(result["serverInfo"]["name"], json!("dhl-mcp"));
        assert!(result["capabilities"]["resources"].is_object());
        assert!(result["instructions"].as_str().unwrap().contains("dhl://parcels"));
    }

    #[tokio::test]
    async fn tools_list_exposes_both_tools() {
        let (handler, _) = test_handler(StubCarrier::with_parcels(Vec::new()));
        let response = handler
            .handle_request(request(methods::LIST_TOOLS, Value::Null))
            .await;
        let tools = response.result.unwrap()["tools"].clone();
        let names: Vec<_> = tools
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["filter_parcels", "parcel_summary"]);
    }

    #[tokio::test]
    async fn filter_tool_returns_delivered_summaries_in_order() {
        let (handler, _) = test_handler(StubCarrier::with_parcels(vec![
            wire_parcel("3SDEL1", "DELIVERED"),
            wire_parcel("3STRA1", "IN_TRANSIT"),
            wire_parcel("3SDEL2", "DELIVERED"),
        ]));
        let response = handler
            .handle_request(request(
                methods::CALL_TOOL,
                json!({
                    "name": "filter_parcels",
                    "arguments": { "status": "delivered" }
                }),
            ))
            .await;
        let (payload, is_error) = tool_payload(&response);
        assert!(!is_error);
        assert_eq!(payload["total_matches"], json!(2));
        let identifiers: Vec<_> = payload["parcels"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["identifier"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(identifiers, vec!["3SDEL1", "3SDEL2"]);
    }

    #[tokio::test]
    async fn filter_tool_caps_results_at_limit() {
        let (handler, _) = test_handler(StubCarrier::with_parcels(vec![
            wire_parcel("3SA", "DELIVERED"),
            wire_parcel("3SB", "DELIVERED"),
            wire_parcel("3SC", "DELIVERED"),
        ]));
        let response = handler
            .handle_request(request(
                methods::CALL_TOOL,
                json!({
                    "name": "filter_parcels",
                    "arguments": { "limit": 2 }
                }),
            ))
            .await;
        let (payload, _) = tool_payload(&response);
        assert_eq!(payload["total_matches"], json!(3));
        assert_eq!(payload["returned"], json!(2));
        assert_eq!(payload["parcels"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn invalid_status_is_rejected_before_any_carrier_call() {
        let (handler, stub) = test_handler(StubCarrier::with_parcels(Vec::new()));
        let response = handler
            .handle_request(request(
                methods::CALL_TOOL,
                json!({
                    "name": "filter_parcels",
                    "arguments": { "status": "teleported" }
                }),
            ))
            .await;
        let (payload, is_error) = tool_payload(&response);
        assert!(is_error);
        assert_eq!(payload["kind"], json!("validation"));
        assert_eq!(stub.list_count.load(Ordering::SeqCst), 0);
        assert_eq!(stub.login_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn oversized_day_window_is_a_validation_failure() {
        let (handler, stub) = test_handler(StubCarrier::with_parcels(vec![wire_parcel(
            "3SDEL1",
            "DELIVERED",
        )]));
        let response = handler
            .handle_request(request(
                methods::CALL_TOOL,
                json!({
                    "name": "filter_parcels",
                    "arguments": { "delivered_within_days": 100_000_000 }
                }),
            ))
            .await;
        let (payload, is_error) = tool_payload(&response);
        assert!(is_error);
        assert_eq!(payload["kind"], json!("validation"));
        assert_eq!(stub.list_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn summary_tool_finds_parcel_by_barcode() {
        let (handler, _) = test_handler(StubCarrier::with_parcels(vec![wire_parcel(
            "3SDEL1",
            "DELIVERED",
        )]));
        let response = handler
            .handle_request(request(
                methods::CALL_TOOL,
                json!({
                    "name": "parcel_summary",
                    "arguments": { "identifier": "JVGL3SDEL1" }
                }),
            ))
            .await;
        let (payload, is_error) = tool_payload(&response);
        assert!(!is_error);
        assert_eq!(payload["identifier"], json!("3SDEL1"));
        assert_eq!(payload["status_phrase"], json!("Delivered"));
    }

    #[tokio::test]
    async fn unknown_identifier_is_structured_not_found() {
        let (handler, _) = test_handler(StubCarrier::with_parcels(vec![wire_parcel(
            "3SDEL1",
            "DELIVERED",
        )]));
        let response = handler
            .handle_request(request(
                methods::CALL_TOOL,
                json!({
                    "name": "parcel_summary",
                    "arguments": { "identifier": "UNKNOWN123" }
                }),
            ))
            .await;
        let (payload, is_error) = tool_payload(&response);
        assert!(is_error);
        assert_eq!(payload["kind"], json!("not_found"));
        assert!(payload["message"].as_str().unwrap().contains("UNKNOWN123"));
    }

    #[tokio::test]
    async fn expired_session_relogin_is_invisible_to_the_client() {
        let stub = StubCarrier::with_parcels(vec![wire_parcel("3SDEL1", "DELIVERED")]);
        stub.auth_failures_remaining.store(1, Ordering::SeqCst);
        let (handler, stub) = test_handler(stub);

        let response = handler
            .handle_request(request(
                methods::CALL_TOOL,
                json!({ "name": "filter_parcels", "arguments": {} }),
            ))
            .await;
        let (payload, is_error) = tool_payload(&response);
        assert!(!is_error);
        assert_eq!(payload["total_matches"], json!(1));
        // First listing was rejected, so a second login happened behind the scenes
        assert_eq!(stub.login_count.load(Ordering::SeqCst), 2);
        assert_eq!(stub.list_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_tool_is_a_validation_failure() {
        let (handler, _) = test_handler(StubCarrier::with_parcels(Vec::new()));
        let response = handler
            .handle_request(request(
                methods::CALL_TOOL,
                json!({ "name": "memory_create", "arguments": {} }),
            ))
            .await;
        let (payload, is_error) = tool_payload(&response);
        assert!(is_error);
        assert_eq!(payload["kind"], json!("validation"));
    }

    #[tokio::test]
    async fn resources_list_names_listing_and_profile() {
        let (handler, _) = test_handler(StubCarrier::with_parcels(Vec::new()));
        let response = handler
            .handle_request(request(methods::LIST_RESOURCES, Value::Null))
            .await;
        let uris: Vec<_> = response.result.unwrap()["resources"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["uri"].as_str().unwrap().to_string())
            .collect();
        assert!(uris.contains(&PARCELS_URI.to_string()));
        assert!(uris.contains(&PROFILE_URI.to_string()));
    }

    #[tokio::test]
    async fn parcels_resource_serves_the_full_collection() {
        let (handler, _) = test_handler(StubCarrier::with_parcels(vec![
            wire_parcel("3SA", "DELIVERED"),
            wire_parcel("3SB", "IN_TRANSIT"),
        ]));
        let response = handler
            .handle_request(request(
                methods::READ_RESOURCE,
                json!({ "uri": PARCELS_URI }),
            ))
            .await;
        let contents = response.result.unwrap()["contents"].clone();
        assert_eq!(contents[0]["uri"], json!(PARCELS_URI));
        let body: Value =
            serde_json::from_str(contents[0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(body["parcels"].as_array().unwrap().len(), 2);
        assert!(body["fetched_at"].is_string());
    }

    #[tokio::test]
    async fn single_parcel_resource_resolves_by_id() {
        let (handler, _) = test_handler(StubCarrier::with_parcels(vec![wire_parcel(
            "3SA",
            "IN_TRANSIT",
        )]));
        let response = handler
            .handle_request(request(
                methods::READ_RESOURCE,
                json!({ "uri": "dhl://parcels/3SA" }),
            ))
            .await;
        let contents = response.result.unwrap()["contents"].clone();
        let body: Value =
            serde_json::from_str(contents[0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(body["parcelId"], json!("3SA"));
    }

    #[tokio::test]
    async fn profile_resource_is_fetched_fresh() {
        let (handler, _) = test_handler(StubCarrier::with_parcels(Vec::new()));
        let response = handler
            .handle_request(request(
                methods::READ_RESOURCE,
                json!({ "uri": PROFILE_URI }),
            ))
            .await;
        let contents = response.result.unwrap()["contents"].clone();
        let body: Value =
            serde_json::from_str(contents[0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(body["accountId"], json!("A-1"));
        assert_eq!(body["firstName"], json!("Jan"));
    }

    #[tokio::test]
    async fn missing_parcel_resource_is_a_protocol_error_with_kind() {
        let (handler, _) = test_handler(StubCarrier::with_parcels(Vec::new()));
        let response = handler
            .handle_request(request(
                methods::READ_RESOURCE,
                json!({ "uri": "dhl://parcels/UNKNOWN123" }),
            ))
            .await;
        let error = response.error.unwrap();
        assert_eq!(error.code, -32001);
        assert_eq!(error.data.unwrap()["kind"], json!("not_found"));
    }

    #[tokio::test]
    async fn unknown_resource_uri_is_rejected() {
        let (handler, _) = test_handler(StubCarrier::with_parcels(Vec::new()));
        let response = handler
            .handle_request(request(
                methods::READ_RESOURCE,
                json!({ "uri": "dhl://bogus" }),
            ))
            .await;
        let error = response.error.unwrap();
        assert_eq!(error.code, -32602);
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let (handler, _) = test_handler(StubCarrier::with_parcels(Vec::new()));
        let response = handler
            .handle_request(request("parcels/teleport", Value::Null))
            .await;
        let error = response.error.unwrap();
        assert_eq!(error.code, -32601);
        assert!(error.message.contains("parcels/teleport"));
    }

    #[tokio::test]
    async fn repeated_tool_calls_reuse_the_cached_listing() {
        let (handler, stub) = test_handler(StubCarrier::with_parcels(vec![wire_parcel(
            "3SA",
            "DELIVERED",
        )]));
        for _ in 0..3 {
            handler
                .handle_request(request(
                    methods::CALL_TOOL,
                    json!({ "name": "filter_parcels", "arguments": {} }),
                ))
                .await;
        }
        assert_eq!(stub.list_count.load(Ordering::SeqCst), 1);
        assert_eq!(stub.login_count.load(Ordering::SeqCst), 1);
    }
}
