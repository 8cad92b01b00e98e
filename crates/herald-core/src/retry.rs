//! Retry policy shared by both platform API clients.

use std::time::Duration;

use chrono::{DateTime, Utc};

pub const DEFAULT_RETRY_MAX_ATTEMPTS: usize = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 200;

/// Statuses worth retrying: request timeouts, contention, early hints,
/// rate limits, and server-side failures.
pub fn should_retry_status(status: u16) -> bool {
    status == 408 || status == 409 || status == 425 || status == 429 || status >= 500
}

/// Errors raised before any response arrived; the request may be re-sent.
pub fn is_retryable_transport_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request() || error.is_body()
}

/// Deterministic exponential backoff, capped at 64x the base delay.
/// `attempt` is 1-based: the first retry waits the base delay.
pub fn next_backoff_ms(base_delay_ms: u64, attempt: usize) -> u64 {
    let shift = attempt.saturating_sub(1).min(6) as u32;
    base_delay_ms.saturating_mul(1_u64 << shift)
}

/// Reads a `retry-after` header, accepting both delta-seconds and HTTP
/// dates. Past dates collapse to zero delay.
pub fn parse_retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    let raw = headers.get("retry-after")?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(seconds.saturating_mul(1000));
    }

    let retry_at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let delay_ms = retry_at.signed_duration_since(Utc::now()).num_milliseconds();
    if delay_ms <= 0 {
        return Some(0);
    }
    u64::try_from(delay_ms).ok()
}

/// Sleep before the given retry attempt. A server-provided `retry-after`
/// acts as a floor under the backoff, never a ceiling.
pub fn retry_delay(base_delay_ms: u64, attempt: usize, retry_after_ms: Option<u64>) -> Duration {
    let backoff_ms = next_backoff_ms(base_delay_ms, attempt);
    let delay_ms = match retry_after_ms {
        Some(floor_ms) => backoff_ms.max(floor_ms),
        None => backoff_ms,
    };
    Duration::from_millis(delay_ms)
}

/// Clamps a response body for inclusion in an error message.
pub fn truncate_for_error(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let clipped: String = trimmed.chars().take(max_chars).collect();
    format!("{clipped}…")
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use reqwest::header::{HeaderMap, HeaderValue};

    use super::{
        next_backoff_ms, parse_retry_after_ms, retry_delay, should_retry_status,
        truncate_for_error,
    };

    #[test]
    fn unit_retry_status_selection_is_correct() {
        assert!(should_retry_status(408));
        assert!(should_retry_status(429));
        assert!(should_retry_status(503));
        assert!(!should_retry_status(400));
        assert!(!should_retry_status(404));
        assert!(!should_retry_status(422));
    }

    #[test]
    fn unit_backoff_doubles_per_attempt_and_caps() {
        assert_eq!(next_backoff_ms(200, 1), 200);
        assert_eq!(next_backoff_ms(200, 2), 400);
        assert_eq!(next_backoff_ms(200, 3), 800);
        assert_eq!(next_backoff_ms(200, 7), 12_800);
        assert_eq!(next_backoff_ms(200, 50), 12_800);
    }

    #[test]
    fn unit_parse_retry_after_ms_accepts_seconds_and_rejects_invalid_values() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("3"));
        assert_eq!(parse_retry_after_ms(&headers), Some(3_000));

        headers.insert("retry-after", HeaderValue::from_static("not-a-number"));
        assert_eq!(parse_retry_after_ms(&headers), None);
    }

    #[test]
    fn functional_parse_retry_after_ms_accepts_http_dates() {
        let mut headers = HeaderMap::new();
        let raw = (Utc::now() + Duration::seconds(2))
            .to_rfc2822()
            .replace("+0000", "GMT");
        headers.insert(
            "retry-after",
            HeaderValue::from_str(raw.as_str()).expect("retry-after date"),
        );
        let delay = parse_retry_after_ms(&headers).expect("delay from date");
        assert!(delay <= 2_500, "delay should be close to 2s, got {delay}");
        assert!(delay >= 500, "delay should be non-trivial, got {delay}");
    }

    #[test]
    fn regression_retry_delay_honors_retry_after_floor() {
        assert_eq!(retry_delay(200, 1, None).as_millis(), 200);
        assert_eq!(retry_delay(200, 3, Some(100)).as_millis(), 800);
        assert_eq!(retry_delay(200, 1, Some(1_500)).as_millis(), 1_500);
    }

    #[test]
    fn unit_truncate_for_error_clips_long_bodies_on_char_boundaries() {
        assert_eq!(truncate_for_error("  short  ", 10), "short");
        assert_eq!(truncate_for_error("abcdef", 4), "abcd…");
        assert_eq!(truncate_for_error("héllo wörld", 5), "héllo…");
    }
}
