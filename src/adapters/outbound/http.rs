use crate::core::error::{Error, Result};

/// Shared reqwest client for outbound calls.
pub fn build_http_client() -> Result<reqwest::Client> {
    // System proxy discovery is opt-in via `FLOWBENCH_ENABLE_SYSTEM_PROXY=1`.
    let mut builder = reqwest::Client::builder();
    if std::env::var_os("FLOWBENCH_ENABLE_SYSTEM_PROXY").is_none() {
        builder = builder.no_proxy();
    }
    builder
        .build()
        .map_err(|err| Error::System(format!("Failed to build HTTP client: {err}")))
}

/// Keeps error bodies readable in logs and run records.
pub(crate) fn truncate_body(body: &str, max_chars: usize) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut cut: String = trimmed.chars().take(max_chars).collect();
    cut.push('…');
    cut
}
