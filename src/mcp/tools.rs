//! Tool and resource definitions exposed over MCP

use serde_json::json;

use super::protocol::{ResourceDefinition, ResourceTemplateDefinition, ToolDefinition};

/// Resource URI for the full parcel listing
pub const PARCELS_URI: &str = "dhl://parcels";
/// Resource URI prefix for single-parcel reads
pub const PARCEL_URI_PREFIX: &str = "dhl://parcels/";
/// Resource URI template for single-parcel reads
pub const PARCEL_URI_TEMPLATE: &str = "dhl://parcels/{identifier}";
/// Resource URI for the authenticated account profile
pub const PROFILE_URI: &str = "dhl://user/profile";

/// Guidance shown to MCP clients on initialize
pub const SERVER_INSTRUCTIONS: &str = "Track DHL parcels for the authenticated account. \
Read dhl://parcels for the full listing, dhl://parcels/{identifier} for one parcel by id \
or barcode, and dhl://user/profile for the account profile. Use the filter_parcels tool \
to narrow parcels by status, category, recency or returnability, and parcel_summary for \
a concise status of a single parcel.";

/// All tool definitions for the parcel server: (name, description, schema)
pub const TOOL_DEFINITIONS: &[(&str, &str, &str)] = &[
    (
        "filter_parcels",
        "Filter tracked parcels by status, category, recency, and returnability. Returns concise summaries in listing order (newest first).",
        r#"{
            "type": "object",
            "properties": {
                "status": {
                    "type": "string",
                    "enum": ["in_transit", "delivered", "returned", "exception", "unknown"],
                    "description": "Only parcels with this status"
                },
                "category": {
                    "type": "string",
                    "description": "Only parcels in this carrier category (e.g. RECEIVER, SHIPPER)"
                },
                "delivered_within_days": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 3650,
                    "description": "Only parcels updated within the last N days"
                },
                "returnable": {
                    "type": "boolean",
                    "description": "Only parcels whose returnability flag matches"
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "default": 5,
                    "description": "Maximum number of summaries to return"
                }
            }
        }"#,
    ),
    (
        "parcel_summary",
        "Summarize one parcel by id or barcode: status, estimated delivery, destination, and returnability.",
        r#"{
            "type": "object",
            "properties": {
                "identifier": {
                    "type": "string",
                    "description": "Parcel id or barcode"
                }
            },
            "required": ["identifier"]
        }"#,
    ),
];

/// Concrete resource definitions: (uri, name, description)
pub const RESOURCE_DEFINITIONS: &[(&str, &str, &str)] = &[
    (
        PARCELS_URI,
        "Tracked parcels",
        "All parcels visible to the authenticated account, from the most recent carrier fetch",
    ),
    (
        PROFILE_URI,
        "Account profile",
        "The authenticated DHL account profile, always fetched fresh",
    ),
];

/// Get all tool definitions as ToolDefinition structs
pub fn get_tool_definitions() -> Vec<ToolDefinition> {
    TOOL_DEFINITIONS
        .iter()
        .map(|(name, description, schema)| ToolDefinition {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: serde_json::from_str(schema).unwrap_or(json!({})),
        })
        .collect()
}

/// Get all resource definitions as ResourceDefinition structs
pub fn get_resource_definitions() -> Vec<ResourceDefinition> {
    RESOURCE_DEFINITIONS
        .iter()
        .map(|(uri, name, description)| ResourceDefinition {
            uri: uri.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            mime_type: "application/json".to_string(),
        })
        .collect()
}

/// Get the parameterized resource templates
pub fn get_resource_templates() -> Vec<ResourceTemplateDefinition> {
    vec![ResourceTemplateDefinition {
        uri_template: PARCEL_URI_TEMPLATE.to_string(),
        name: "Single parcel".to_string(),
        description: "One parcel by id or barcode".to_string(),
        mime_type: "application/json".to_string(),
    }]
}
