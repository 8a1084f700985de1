//! HTTP freshness rules applied to raw response header lines.
//!
//! Headers are kept as the raw `Name: value` lines the transfer collected,
//! so everything here works on that representation.

use chrono::DateTime;

/// Sentinel freshness window: the entry must always be revalidated.
pub(crate) const MUST_REVALIDATE: i64 = -1;

/// Freshness verdict derived from response headers at store time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Freshness {
    /// `false` when `no-store`/`no-cache`/`Pragma: no-cache` forbid caching.
    pub cacheable: bool,
    /// Seconds the entry stays fresh, or [`MUST_REVALIDATE`].
    pub max_age: i64,
}

/// Case-insensitive lookup of a header value among raw lines.
pub(crate) fn header_value<'a>(lines: &'a [String], name: &str) -> Option<&'a str> {
    lines.iter().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim().eq_ignore_ascii_case(name) {
            Some(value.trim())
        } else {
            None
        }
    })
}

/// Derive the freshness window for a response stored at `stored_at`.
///
/// Priority order: `Cache-Control: max-age=N`, then `Expires`, else the
/// entry must always be revalidated.
pub(crate) fn evaluate(lines: &[String], stored_at: i64) -> Freshness {
    let mut cacheable = true;
    let mut max_age = MUST_REVALIDATE;

    if let Some(cache_control) = header_value(lines, "Cache-Control") {
        for directive in cache_control.split(',') {
            let directive = directive.trim();
            if directive.eq_ignore_ascii_case("no-cache")
                || directive.eq_ignore_ascii_case("no-store")
            {
                cacheable = false;
            } else if let Some(seconds) = directive
                .strip_prefix("max-age=")
                .or_else(|| directive.strip_prefix("MAX-AGE="))
            {
                if let Ok(seconds) = seconds.trim().parse::<i64>() {
                    max_age = seconds;
                }
            }
        }
    }

    if max_age == MUST_REVALIDATE {
        if let Some(expires) = header_value(lines, "Expires") {
            if let Some(expires_epoch) = parse_http_date(expires) {
                max_age = expires_epoch - stored_at;
            }
        }
    }

    if let Some(pragma) = header_value(lines, "Pragma") {
        if pragma.eq_ignore_ascii_case("no-cache") {
            cacheable = false;
        }
    }

    Freshness { cacheable, max_age }
}

/// Conditional-request headers derived from a stored entry's header lines.
pub(crate) fn validation_headers(lines: &[String]) -> Vec<String> {
    let mut validators = Vec::new();
    if let Some(etag) = header_value(lines, "ETag") {
        validators.push(format!("If-None-Match: {etag}"));
    }
    if let Some(last_modified) = header_value(lines, "Last-Modified") {
        validators.push(format!("If-Modified-Since: {last_modified}"));
    }
    validators
}

/// Parse an HTTP date (IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`)
/// into epoch seconds. The obsolete GMT zone name is accepted by the RFC 2822
/// parser.
fn parse_http_date(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|date| date.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_max_age_directive() {
        let headers = lines(&["Content-Type: text/html", "Cache-Control: max-age=60"]);
        let freshness = evaluate(&headers, 1_000);
        assert!(freshness.cacheable);
        assert_eq!(freshness.max_age, 60);
    }

    #[test]
    fn test_no_store_forbids_caching() {
        let headers = lines(&["Cache-Control: no-store, max-age=60"]);
        let freshness = evaluate(&headers, 1_000);
        assert!(!freshness.cacheable);
    }

    #[test]
    fn test_pragma_no_cache_forbids_caching() {
        let headers = lines(&["Pragma: no-cache", "Cache-Control: max-age=60"]);
        let freshness = evaluate(&headers, 1_000);
        assert!(!freshness.cacheable);
    }

    #[test]
    fn test_expires_fallback() {
        // Sun, 06 Nov 1994 08:49:37 GMT == 784111777
        let headers = lines(&["Expires: Sun, 06 Nov 1994 08:49:37 GMT"]);
        let freshness = evaluate(&headers, 784111777 - 120);
        assert!(freshness.cacheable);
        assert_eq!(freshness.max_age, 120);
    }

    #[test]
    fn test_max_age_takes_priority_over_expires() {
        let headers = lines(&[
            "Cache-Control: max-age=30",
            "Expires: Sun, 06 Nov 1994 08:49:37 GMT",
        ]);
        let freshness = evaluate(&headers, 0);
        assert_eq!(freshness.max_age, 30);
    }

    #[test]
    fn test_missing_headers_means_revalidate() {
        let headers = lines(&["Content-Type: application/json"]);
        let freshness = evaluate(&headers, 1_000);
        assert!(freshness.cacheable);
        assert_eq!(freshness.max_age, MUST_REVALIDATE);
    }

    #[test]
    fn test_invalid_expires_means_revalidate() {
        let headers = lines(&["Expires: 0"]);
        let freshness = evaluate(&headers, 1_000);
        assert_eq!(freshness.max_age, MUST_REVALIDATE);
    }

    #[test]
    fn test_validation_headers_from_stored_lines() {
        let headers = lines(&[
            "ETag: \"abc123\"",
            "Last-Modified: Sun, 06 Nov 1994 08:49:37 GMT",
        ]);
        let validators = validation_headers(&headers);
        assert_eq!(
            validators,
            vec![
                "If-None-Match: \"abc123\"".to_string(),
                "If-Modified-Since: Sun, 06 Nov 1994 08:49:37 GMT".to_string(),
            ]
        );
    }

    #[test]
    fn test_header_value_is_case_insensitive() {
        let headers = lines(&["etag: xyz"]);
        assert_eq!(header_value(&headers, "ETag"), Some("xyz"));
    }
}
