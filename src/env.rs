//! Defines the environment variables to use.

use crate::static_lazy_lock;

use std::{env, time::Duration};

/// Parses an environment variable from [`String`] to something else, wrapping any error in [`anyhow::Error`].
#[macro_export]
macro_rules! parse_env {
    ($key:expr => |$var:ident| $expr:expr) => {
        std::env::var($key)
            .map_err(|e| anyhow::anyhow!(e))
            .and_then(|$var| $expr)
    };
    ($key:expr => |$var:ident| $expr:expr; anyhow) => {
        $crate::parse_env!($key => |$var| $expr.map_err(|e| anyhow::anyhow!(e)))
    };
}

pub use parse_env;

/// The public GitHub REST API.
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

/// The hosted project the agent lives in.
pub const DEFAULT_AGENT_ENDPOINT: &str =
    "https://abpatra-7946-resource.services.ai.azure.com/api/projects/abpatra-7946";

/// Environment variables consulted for a Copilot token, in priority order.
pub const TOKEN_VARIABLES: [&str; 3] = ["COPILOT_GITHUB_TOKEN", "GH_TOKEN", "GITHUB_TOKEN"];

static_lazy_lock! {
    /// The base URL of the GitHub REST API.
    pub GITHUB_API_URL: String =
        env::var("GITHUB_API_URL").unwrap_or_else(|_| DEFAULT_GITHUB_API_URL.to_owned());

    /// The overall timeout applied to every upstream request.
    pub REQUEST_TIMEOUT: Duration = Duration::from_secs(
        parse_env!("REQUEST_TIMEOUT_SECS" => |s| s.parse::<u64>(); anyhow).unwrap_or(60),
    );

    /// The address the HTTP server binds to.
    pub BIND_ADDRESS: String =
        env::var("BIND_ADDRESS").unwrap_or_else(|_| String::from("127.0.0.1:8000"));

    /// The endpoint of the project hosting the agent.
    pub AGENT_ENDPOINT: String =
        env::var("AGENT_ENDPOINT").unwrap_or_else(|_| DEFAULT_AGENT_ENDPOINT.to_owned());

    /// The name of the agent to query.
    pub AGENT_NAME: String =
        env::var("AGENT_NAME").unwrap_or_else(|_| String::from("gatekeeper-agent"));

    /// The API version sent with agent requests.
    pub AGENT_API_VERSION: String =
        env::var("AGENT_API_VERSION").unwrap_or_else(|_| String::from("2025-05-15-preview"));

    /// The bearer token for the agent endpoint, if any.
    pub AGENT_TOKEN: Option<String> = env::var("AGENT_TOKEN").ok().filter(|s| !s.is_empty());

    /// The Copilot CLI executable.
    pub COPILOT_CLI_PATH: String =
        env::var("COPILOT_CLI_PATH").unwrap_or_else(|_| String::from("copilot"));
}

/// Resolves the token for the Copilot CLI: an explicit token first, then [`TOKEN_VARIABLES`] in order.
///
/// Returns [`None`] when the local CLI login should be used instead.
pub fn resolve_token(explicit: Option<String>) -> Option<String> {
    resolve_token_with(explicit, |key| env::var(key).ok())
}

/// Same as [`resolve_token`] but reads variables through `lookup`.
pub fn resolve_token_with<F>(explicit: Option<String>, lookup: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    explicit
        .into_iter()
        .chain(TOKEN_VARIABLES.iter().filter_map(|key| lookup(key)))
        .find(|token| !token.is_empty())
}
