//! Result helpers for MCP tool responses
//!
//! Tools that report failures in-band return a `CallToolResult` with the
//! error flag set instead of a protocol error, so the caller sees the same
//! response shape either way.

use rmcp::model::{CallToolResult, Content};

/// Create a successful plain text response
///
/// # Example
///
/// ```rust,ignore
/// use mcp_common::text_success;
///
/// fn my_tool(&self) -> Result<CallToolResult, McpError> {
///     Ok(text_success("No rows returned."))
/// }
/// ```
pub fn text_success(text: impl Into<String>) -> CallToolResult {
    CallToolResult::success(vec![Content::text(text.into())])
}

/// Create an error-flagged plain text response
///
/// The text is delivered verbatim with `is_error` set; use it for failures
/// the caller is expected to correct and retry.
pub fn text_error(text: impl Into<String>) -> CallToolResult {
    CallToolResult::error(vec![Content::text(text.into())])
}
