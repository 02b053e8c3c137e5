//! Rate-limit header extraction.
//!
//! Providers report quota state through vendor-specific header schemes.
//! Extraction is a small table keyed by adapter kind; unknown schemes
//! yield an empty `RateLimitHints`.

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;

use super::types::{AdapterKind, RateLimitHints};

/// Extract rate-limit hints from response headers for the given adapter kind.
pub fn extract_hints(kind: AdapterKind, headers: &HeaderMap) -> RateLimitHints {
    let mut hints = match kind {
        AdapterKind::OpenaiCompatible | AdapterKind::Generic => openai_scheme(headers),
        AdapterKind::AnthropicNative => anthropic_scheme(headers),
        AdapterKind::GoogleNative => RateLimitHints::default(),
    };
    // retry-after is scheme-independent.
    hints.retry_after_secs = retry_after_secs(headers);
    hints
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok()
}

/// Parse `retry-after` as delta-seconds. HTTP-date forms are rare on
/// LLM endpoints and are ignored.
pub fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    header_u64(headers, "retry-after")
}

/// `x-ratelimit-*` scheme used by OpenAI and most compatible vendors.
fn openai_scheme(headers: &HeaderMap) -> RateLimitHints {
    RateLimitHints {
        requests_limit: header_u64(headers, "x-ratelimit-limit-requests"),
        requests_remaining: header_u64(headers, "x-ratelimit-remaining-requests"),
        tokens_remaining: header_u64(headers, "x-ratelimit-remaining-tokens"),
        reset_at: header_str(headers, "x-ratelimit-reset-requests")
            .and_then(parse_reset_duration)
            .map(|secs| Utc::now() + chrono::Duration::milliseconds((secs * 1000.0) as i64)),
        retry_after_secs: None,
    }
}

/// `anthropic-ratelimit-*` scheme; reset is an RFC 3339 instant.
fn anthropic_scheme(headers: &HeaderMap) -> RateLimitHints {
    RateLimitHints {
        requests_limit: header_u64(headers, "anthropic-ratelimit-requests-limit"),
        requests_remaining: header_u64(headers, "anthropic-ratelimit-requests-remaining"),
        tokens_remaining: header_u64(headers, "anthropic-ratelimit-tokens-remaining"),
        reset_at: header_str(headers, "anthropic-ratelimit-requests-reset")
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        retry_after_secs: None,
    }
}

/// Parse OpenAI-style reset durations: "1s", "6m0s", "250ms", "90".
fn parse_reset_duration(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(secs) = text.parse::<f64>() {
        return Some(secs);
    }

    let mut total = 0.0f64;
    let mut number = String::new();
    let mut chars = text.chars().peekable();
    let mut matched = false;
    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }
        let value: f64 = number.parse().ok()?;
        number.clear();
        let factor = match c {
            'h' => 3600.0,
            'm' => {
                if chars.peek() == Some(&'s') {
                    chars.next();
                    0.001
                } else {
                    60.0
                }
            }
            's' => 1.0,
            _ => return None,
        };
        total += value * factor;
        matched = true;
    }
    if !number.is_empty() || !matched {
        return None;
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderName, HeaderValue};

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                name.parse::<HeaderName>().unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_openai_scheme() {
        let h = headers(&[
            ("x-ratelimit-limit-requests", "500"),
            ("x-ratelimit-remaining-requests", "499"),
            ("x-ratelimit-remaining-tokens", "89999"),
        ]);
        let hints = extract_hints(AdapterKind::OpenaiCompatible, &h);
        assert_eq!(hints.requests_limit, Some(500));
        assert_eq!(hints.requests_remaining, Some(499));
        assert_eq!(hints.tokens_remaining, Some(89999));
    }

    #[test]
    fn test_anthropic_scheme() {
        let h = headers(&[
            ("anthropic-ratelimit-requests-limit", "50"),
            ("anthropic-ratelimit-requests-remaining", "49"),
            ("anthropic-ratelimit-requests-reset", "2026-01-01T00:00:00Z"),
        ]);
        let hints = extract_hints(AdapterKind::AnthropicNative, &h);
        assert_eq!(hints.requests_limit, Some(50));
        assert!(hints.reset_at.is_some());
    }

    #[test]
    fn test_unknown_scheme_yields_empty() {
        let h = headers(&[("x-vendor-quota", "12")]);
        let hints = extract_hints(AdapterKind::GoogleNative, &h);
        assert!(hints.is_empty());
    }

    #[test]
    fn test_retry_after_always_extracted() {
        let h = headers(&[("retry-after", "2")]);
        let hints = extract_hints(AdapterKind::GoogleNative, &h);
        assert_eq!(hints.retry_after_secs, Some(2));
    }

    #[test]
    fn test_parse_reset_duration_forms() {
        assert_eq!(parse_reset_duration("1s"), Some(1.0));
        assert_eq!(parse_reset_duration("6m0s"), Some(360.0));
        assert_eq!(parse_reset_duration("250ms"), Some(0.25));
        assert_eq!(parse_reset_duration("90"), Some(90.0));
        assert_eq!(parse_reset_duration("garbage"), None);
    }
}
