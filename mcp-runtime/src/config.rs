use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};

use crate::control_plane::HttpControlPlane;
use crate::executor::MetricsViewClient;
use crate::session::SessionResolver;
use crate::transport::HttpRuntimeTransport;

pub const DEFAULT_ADMIN_URL: &str = "https://admin.rilldata.com";

#[derive(Subcommand)]
pub enum McpCommands {
    /// Run the metrics view MCP server over stdio
    Serve(McpServeArgs),
}

#[derive(Args, Clone)]
pub struct McpServeArgs {
    /// Control plane (admin API) base URL
    #[arg(long, env = "RILL_ADMIN_BASE_URL", default_value = DEFAULT_ADMIN_URL)]
    pub admin_url: String,
    /// Organization that owns the project
    #[arg(long, env = "RILL_ORGANIZATION_NAME")]
    pub organization: String,
    /// Project whose production deployment is queried
    #[arg(long, env = "RILL_PROJECT_NAME")]
    pub project: String,
    /// Long-lived service token used for control plane lookups
    #[arg(long, env = "RILL_SERVICE_TOKEN", hide_env_values = true)]
    pub service_token: String,
    /// Timeout applied to every HTTP request, in seconds
    #[arg(long, env = "RILL_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,
    /// Request timeout as a duration string (`45s`, `1m30s`, `500ms`);
    /// takes precedence over `--request-timeout-secs` when set
    #[arg(long, env = "RILL_REQUEST_TIMEOUT", value_parser = parse_duration)]
    pub request_timeout: Option<Duration>,
}

/// Parses a sequence of `<number><unit>` pairs with units `ms`, `s`, `m`, `h`.
/// A bare number is read as seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("duration must not be empty".to_string());
    }
    if let Ok(secs) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = raw;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_len);
        let value: f64 = number
            .parse()
            .map_err(|_| format!("invalid duration '{raw}'"))?;
        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_len);
        let millis_per_unit = match unit {
            "ms" => 1.0,
            "s" => 1_000.0,
            "m" => 60_000.0,
            "h" => 3_600_000.0,
            _ => return Err(format!("invalid duration unit in '{raw}'")),
        };
        total += Duration::try_from_secs_f64(value * millis_per_unit / 1_000.0)
            .map_err(|e| format!("invalid duration '{raw}': {e}"))?;
        rest = next;
    }
    Ok(total)
}

// Manual impl keeps the service token out of debug output.
impl std::fmt::Debug for McpServeArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServeArgs")
            .field("admin_url", &self.admin_url)
            .field("organization", &self.organization)
            .field("project", &self.project)
            .field("service_token", &"<redacted>")
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl McpServeArgs {
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
            .unwrap_or(Duration::from_secs(self.request_timeout_secs))
    }

    /// One shared HTTP client for both the control plane and the runtime.
    pub fn build_client(&self) -> Result<MetricsViewClient, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(self.request_timeout())
            .build()?;
        let control_plane = HttpControlPlane::new(
            http.clone(),
            self.admin_url.clone(),
            self.organization.clone(),
            self.project.clone(),
            self.service_token.clone(),
        );
        let sessions = Arc::new(SessionResolver::new(Arc::new(control_plane)));
        Ok(MetricsViewClient::new(
            sessions,
            Arc::new(HttpRuntimeTransport::new(http)),
        ))
    }
}
