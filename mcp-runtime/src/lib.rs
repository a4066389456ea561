//! Metrics view query client: session resolution against the control plane,
//! runtime transport, and the stdio MCP tool server built on top of them.

pub mod config;
pub mod control_plane;
pub mod error;
pub mod executor;
pub mod server;
pub mod session;
pub mod transport;

pub use config::{McpCommands, McpServeArgs};
pub use error::{ControlPlaneError, QueryError, SessionError, TransportError};
pub use executor::MetricsViewClient;
pub use server::McpServer;
pub use session::SessionResolver;

/// Runs a subcommand to completion and returns the process exit code.
pub async fn run(command: McpCommands) -> i32 {
    match command {
        McpCommands::Serve(args) => {
            let client = match args.build_client() {
                Ok(client) => client,
                Err(err) => {
                    tracing::error!(error = %err, "failed to build HTTP client");
                    return 1;
                }
            };
            tracing::info!(
                admin_url = %args.admin_url,
                organization = %args.organization,
                project = %args.project,
                timeout_secs = args.request_timeout_secs,
                "starting MCP server over stdio"
            );
            let server = McpServer::new(client);
            match server.serve_stdio().await {
                Ok(()) => 0,
                Err(err) => {
                    tracing::error!(error = %err, "MCP server stopped");
                    1
                }
            }
        }
    }
}
