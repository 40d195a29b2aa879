use crate::credentials::token_prefix;
use crate::metrics_defs::TOKEN_USAGE;
use shared::counter;

/// Records that a pooled credential was spent on a request.
pub fn track_token_usage(token: &str, host: &str, url: &str, accept: Option<&str>) {
    let prefix = token_prefix(token);

    counter!(TOKEN_USAGE, "token" => prefix.to_string(), "host" => host.to_string()).increment(1);
    tracing::info!(
        target: "spacegate::analytics",
        token = prefix,
        host,
        url,
        accept = accept.unwrap_or(""),
        "token usage"
    );
}
