//! Server initialization utilities
//!
//! Tracing setup and the `serve_stdio!` macro shared by MCP server binaries.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing for an MCP server
///
/// Logs go to stderr because stdout carries the MCP protocol. `RUST_LOG`
/// filters as usual on top of a default of `info` for `crate_name`.
///
/// Set `LOG_FORMAT=json` for one JSON object per event; the default is plain
/// text without ANSI colors.
///
/// # Example
///
/// ```rust,ignore
/// mcp_common::init_tracing("sql_gateway_mcp")?;
/// ```
pub fn init_tracing(crate_name: &str) -> anyhow::Result<()> {
    let directive = format!("{}=info", crate_name);
    let filter = EnvFilter::from_default_env().add_directive(directive.parse()?);
    let registry = tracing_subscriber::registry().with(filter);

    if json_logs(std::env::var("LOG_FORMAT").ok().as_deref()) {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .try_init()?;
    }

    Ok(())
}

fn json_logs(format: Option<&str>) -> bool {
    format.is_some_and(|v| v.trim().eq_ignore_ascii_case("json"))
}

/// Macro for standardized MCP server startup
///
/// Expands to a `#[tokio::main] async fn main()` that:
/// 1. Initializes tracing to stderr
/// 2. Creates the server with `<$server_type>::try_new()`, so missing
///    configuration stops the process before any request is served
/// 3. Serves via stdio transport
/// 4. Waits for shutdown
///
/// # Example
///
/// ```rust,ignore
/// use sql_gateway_mcp::SqlGatewayServer;
///
/// mcp_common::serve_stdio!(SqlGatewayServer, "sql_gateway_mcp");
/// ```
#[macro_export]
macro_rules! serve_stdio {
    ($server_type:ty, $crate_name:expr) => {
        #[tokio::main]
        async fn main() -> anyhow::Result<()> {
            use rmcp::ServiceExt;

            $crate::init_tracing($crate_name)?;

            tracing::info!(concat!("Starting ", $crate_name, " MCP Server"));

            let server = match <$server_type>::try_new() {
                Ok(server) => server,
                Err(e) => {
                    tracing::error!("Startup failed: {:#}", e);
                    return Err(e);
                }
            };
            let service = server.serve(rmcp::transport::stdio()).await?;

            tracing::info!("Server running, waiting for requests...");

            service.waiting().await?;

            tracing::info!("Server shutting down");
            Ok(())
        }
    };
}
