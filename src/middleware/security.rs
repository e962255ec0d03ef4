use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Rejects requests whose Host header is not on the configured trust list.
/// An empty list or a `*` entry disables the check.
pub async fn enforce_trusted_hosts(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> AppResult<Response> {
    let trusted = &state.config.trusted_hosts;
    if trusted.is_empty() || trusted.iter().any(|entry| entry.trim() == "*") {
        return Ok(next.run(request).await);
    }

    let host = request
        .headers()
        .get(axum::http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if host_is_trusted(host, trusted) {
        return Ok(next.run(request).await);
    }

    tracing::warn!(host = %host, "Rejected request from untrusted host");
    Err(AppError::BadRequest("Invalid host header.".to_string()))
}

fn host_is_trusted(raw_host: &str, trusted: &[String]) -> bool {
    let host = raw_host
        .split(':')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if host.is_empty() {
        return false;
    }

    trusted.iter().any(|entry| {
        let pattern = entry.trim().to_ascii_lowercase();
        if let Some(domain) = pattern.strip_prefix("*.") {
            let dotted = format!(".{domain}");
            return host.ends_with(&dotted) && host.len() > dotted.len();
        }
        pattern == host
    })
}

#[cfg(test)]
mod tests {
    use super::host_is_trusted;

    fn trusted(entries: &[&str]) -> Vec<String> {
        entries.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn matches_exact_host_ignoring_port() {
        let list = trusted(&["localhost", "127.0.0.1"]);
        assert!(host_is_trusted("localhost:5000", &list));
        assert!(host_is_trusted("127.0.0.1", &list));
        assert!(!host_is_trusted("evil.example", &list));
    }

    #[test]
    fn matches_wildcard_subdomains() {
        let list = trusted(&["*.pgnest.in"]);
        assert!(host_is_trusted("api.pgnest.in", &list));
        assert!(host_is_trusted("API.PGNest.in:443", &list));
        assert!(!host_is_trusted("pgnest.in.evil.example", &list));
        assert!(!host_is_trusted("evilpgnest.in", &list));
    }

    #[test]
    fn rejects_empty_host() {
        assert!(!host_is_trusted("", &trusted(&["localhost"])));
    }
}
