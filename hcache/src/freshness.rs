//! Freshness and revalidation rules.
//!
//! Given a stored [`CacheEntry`], the incoming request headers and the
//! current time, [`FreshnessEngine::evaluate`] decides whether the entry can
//! be served as is, must be revalidated with a conditional request, or is
//! useless and has to be refetched.
//!
//! Lifetime precedence on the stored response:
//! 1. `Cache-Control: max-age`
//! 2. `Expires` minus `Date` (the storage time when `Date` is missing)
//! 3. heuristic lifetime, only when enabled
//! 4. zero
//!
//! Malformed `max-age` or `Expires` values count as a zero lifetime.
use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use http::header::{
    AGE, CACHE_CONTROL, DATE, EXPIRES, HeaderValue, IF_MODIFIED_SINCE,
    IF_NONE_MATCH, PRAGMA, RANGE,
};
use http::{HeaderMap, Method, StatusCode};

use crate::entry::{CacheEntry, header_lines};

/// Heuristic lifetime is this fraction of the time since Last-Modified.
const HEURISTIC_FRACTION: u32 = 10;
const HEURISTIC_MAX: Duration = Duration::from_secs(24 * 60 * 60);

/// Largest delta-seconds value honoured (RFC 9111 section 1.2.2).
const MAX_DELTA: Duration = Duration::from_secs(1 << 31);

/// Statuses cacheable by default (RFC 7231 section 6.1).
const STORABLE_STATUSES: [u16; 11] =
    [200, 203, 204, 300, 301, 308, 404, 405, 410, 414, 501];

/// Never copied from a 304 into the stored entry.
const NOT_MERGED: [&str; 10] = [
    "content-length",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-encoding",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Nothing usable is stored.
    Absent,
    /// Serve the stored entry without touching the network.
    Fresh,
    /// Stale or marked `no-cache`, but a validator allows a conditional
    /// request.
    StaleRevalidatable,
    /// Stale with no validator: refetch in full.
    StaleTerminal,
}

/// Parsed `Cache-Control` directives. Names are lowercased; values keep
/// their case with surrounding quotes removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    directives: HashMap<String, Option<String>>,
}

impl CacheControl {
    pub fn parse<'a, I>(lines: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut directives = HashMap::new();
        for line in lines {
            for part in split_unquoted(line) {
                let part = part.trim();
                if part.is_empty() {
                    continue;
                }
                let (name, value) = match part.split_once('=') {
                    Some((name, value)) => (
                        name.trim(),
                        Some(value.trim().trim_matches('"').to_string()),
                    ),
                    None => (part, None),
                };
                directives
                    .entry(name.to_ascii_lowercase())
                    .or_insert(value);
            }
        }
        Self { directives }
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self::parse(
            headers
                .get_all(CACHE_CONTROL)
                .iter()
                .filter_map(|value| value.to_str().ok()),
        )
    }

    /// Request directives. `Pragma: no-cache` counts as `no-cache` when the
    /// request carries no `Cache-Control`.
    pub fn from_request(headers: &HeaderMap) -> Self {
        let mut cc = Self::from_headers(headers);
        if !headers.contains_key(CACHE_CONTROL) {
            let pragma_no_cache = headers
                .get_all(PRAGMA)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .any(|value| value.to_ascii_lowercase().contains("no-cache"));
            if pragma_no_cache {
                cc.directives.insert("no-cache".to_string(), None);
            }
        }
        cc
    }

    pub fn from_entry(entry: &CacheEntry) -> Self {
        Self::parse(entry.header_values(CACHE_CONTROL.as_str()))
    }

    pub fn has(&self, name: &str) -> bool {
        self.directives.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Option<&str>> {
        self.directives.get(name).map(|value| value.as_deref())
    }

    /// Delta-seconds value of a directive.
    pub fn seconds(&self, name: &str) -> Delta {
        match self.get(name) {
            None => Delta::Absent,
            Some(Some(value)) => match parse_delta(value) {
                Some(delta) => Delta::Value(delta),
                None => Delta::Malformed,
            },
            Some(None) => Delta::Malformed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delta {
    Absent,
    Value(Duration),
    Malformed,
}

/// Non-negative integer seconds, clamped to [`MAX_DELTA`].
fn parse_delta(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // too many digits for u64 is still a valid, very large delta
    let delta = value
        .parse::<u64>()
        .map(Duration::from_secs)
        .unwrap_or(MAX_DELTA);
    Some(delta.min(MAX_DELTA))
}

/// Split on commas that are not inside a quoted string.
fn split_unquoted(line: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&line[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    parts.push(&line[start..]);
    parts
}

/// Parse an HTTP-date in any of the three formats allowed by RFC 7231.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date.with_timezone(&Utc));
    }
    // RFC 850 and asctime
    ["%A, %d-%b-%y %H:%M:%S GMT", "%a %b %e %H:%M:%S %Y"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

fn positive(delta: chrono::TimeDelta) -> Duration {
    delta.to_std().unwrap_or(Duration::ZERO)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FreshnessEngine {
    /// Assign a bounded lifetime to responses that only carry
    /// `Last-Modified`. This is an approximation, off by default.
    pub heuristic: bool,
}

impl FreshnessEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_heuristic(mut self, heuristic: bool) -> Self {
        self.heuristic = heuristic;
        self
    }

    pub fn evaluate(
        &self,
        entry: Option<&CacheEntry>,
        request_headers: &HeaderMap,
        now: DateTime<Utc>,
    ) -> CacheState {
        let Some(entry) = entry else {
            return CacheState::Absent;
        };
        if !entry.matches_vary(request_headers) {
            return CacheState::Absent;
        }

        let stale = if entry.has_validator() {
            CacheState::StaleRevalidatable
        } else {
            CacheState::StaleTerminal
        };

        let response_cc = CacheControl::from_entry(entry);
        let request_cc = CacheControl::from_request(request_headers);
        if response_cc.has("no-cache") || request_cc.has("no-cache") {
            return stale;
        }

        let mut lifetime = self.freshness_lifetime(entry, &response_cc);
        let mut age = self.current_age(entry, now);

        match request_cc.seconds("max-age") {
            Delta::Value(max_age) => lifetime = lifetime.min(max_age),
            Delta::Malformed => return stale,
            Delta::Absent => {}
        }
        match request_cc.seconds("min-fresh") {
            Delta::Value(min_fresh) => age = age.saturating_add(min_fresh),
            Delta::Malformed => return stale,
            Delta::Absent => {}
        }

        if age < lifetime {
            return CacheState::Fresh;
        }

        let must_revalidate = response_cc.has("must-revalidate");
        if !must_revalidate && request_cc.has("max-stale") {
            match request_cc.get("max-stale").flatten() {
                // any staleness is acceptable
                None => return CacheState::Fresh,
                Some(value) => {
                    if let Some(max_stale) = parse_delta(value) {
                        if age < lifetime.saturating_add(max_stale) {
                            return CacheState::Fresh;
                        }
                    }
                }
            }
        }

        stale
    }

    pub fn freshness_lifetime(
        &self,
        entry: &CacheEntry,
        response_cc: &CacheControl,
    ) -> Duration {
        match response_cc.seconds("max-age") {
            Delta::Value(max_age) => return max_age,
            Delta::Malformed => return Duration::ZERO,
            Delta::Absent => {}
        }

        let date = entry
            .header(DATE.as_str())
            .and_then(parse_http_date)
            .unwrap_or(entry.stored_at);

        if let Some(expires) = entry.header(EXPIRES.as_str()) {
            return match parse_http_date(expires) {
                Some(expires) => positive(expires - date),
                None => Duration::ZERO,
            };
        }

        if self.heuristic {
            if let Some(last_modified) =
                entry.last_modified().and_then(parse_http_date)
            {
                let since = positive(date - last_modified);
                return (since / HEURISTIC_FRACTION).min(HEURISTIC_MAX);
            }
        }

        Duration::ZERO
    }

    /// Time since storage plus whatever `Age` the origin reported.
    pub fn current_age(&self, entry: &CacheEntry, now: DateTime<Utc>) -> Duration {
        let initial = entry
            .header(AGE.as_str())
            .and_then(parse_delta)
            .unwrap_or(Duration::ZERO);
        positive(now - entry.stored_at).saturating_add(initial)
    }

    /// Validators to send with a revalidation request.
    pub fn conditional_headers(&self, entry: &CacheEntry) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(etag) = entry.etag().and_then(|v| HeaderValue::from_str(v).ok()) {
            headers.insert(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = entry
            .last_modified()
            .and_then(|v| HeaderValue::from_str(v).ok())
        {
            headers.insert(IF_MODIFIED_SINCE, last_modified);
        }
        headers
    }

    /// Fold a `304 Not Modified` into the stored entry: headers present on
    /// the 304 replace the stored ones, body and status stay, the storage
    /// time restarts.
    pub fn merge_not_modified(
        &self,
        entry: &CacheEntry,
        not_modified: &HeaderMap,
        now: DateTime<Utc>,
    ) -> CacheEntry {
        let updates: Vec<(String, String)> = header_lines(not_modified)
            .into_iter()
            .filter(|(name, _)| !NOT_MERGED.contains(&name.as_str()))
            .collect();

        let mut merged = entry.clone();
        merged
            .headers
            .retain(|(name, _)| !updates.iter().any(|(updated, _)| updated == name));
        merged.headers.extend(updates);
        merged.stored_at = now;
        merged
    }

    /// Whether a fetched response may be written to the cache.
    pub fn is_storable(
        &self,
        method: &Method,
        request_headers: &HeaderMap,
        status: StatusCode,
        response_headers: &HeaderMap,
    ) -> bool {
        if *method != Method::GET || request_headers.contains_key(RANGE) {
            return false;
        }
        if !STORABLE_STATUSES.contains(&status.as_u16()) {
            return false;
        }
        let request_cc = CacheControl::from_request(request_headers);
        let response_cc = CacheControl::from_headers(response_headers);
        !(request_cc.has("no-store") || response_cc.has("no-store"))
    }
}
