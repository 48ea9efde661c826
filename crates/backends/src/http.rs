//! Shared HTTP status classification for the adapters.

use crucible_core::error::BackendError;
use std::time::Duration;
use tracing::warn;

/// Turn a non-success response into a classified error.
///
/// 401/403 become `AuthenticationFailed`; everything else is an `Api` error
/// carrying the status and the `retry-after` hint, if the provider sent one.
pub(crate) async fn status_error(provider: &str, response: reqwest::Response) -> BackendError {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    let body = response.text().await.unwrap_or_default();
    warn!(provider, status, body = %body, "Backend returned error");
    classify(status, retry_after, body)
}

pub(crate) fn classify(status: u16, retry_after: Option<Duration>, body: String) -> BackendError {
    match status {
        401 | 403 => BackendError::AuthenticationFailed(if body.is_empty() {
            format!("status {status}")
        } else {
            body
        }),
        _ => BackendError::Api {
            status_code: status,
            message: body,
            retry_after,
        },
    }
}

/// Parse a `retry-after` header given in (possibly fractional) seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().parse().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}
