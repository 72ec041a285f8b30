//! MCP (Model Context Protocol) server implementation
//!
//! JSON-RPC over stdio for AI tool integration.

pub mod protocol;
pub mod tools;

pub use protocol::{
    methods, InitializeResult, McpHandler, McpRequest, McpResponse, McpServer, ResourceReadResult,
    ToolCallResult,
};
pub use tools::{
    get_resource_definitions, get_resource_templates, get_tool_definitions, PARCELS_URI,
    PARCEL_URI_PREFIX, PROFILE_URI, SERVER_INSTRUCTIONS, TOOL_DEFINITIONS,
};
