//! Cache key derivation.
//!
//! A key is the normalized request URL, optionally followed by the values
//! of a configured set of request headers:
//!
//! `https://example.com/path?q=1|accept-language:en,authorization:Bearer t1`
//!
//! `%`, `,` and `|` inside header values are percent-encoded so a value
//! can never pass for another header. Headers that are not configured
//! never affect the key. This is separate
//! from the response-declared `Vary` mechanism, which is checked against the
//! stored entry instead.
use std::fmt;

use http::{HeaderMap, HeaderName, Method, Uri};
use tracing::warn;

use crate::entry::joined_values;

const HEADERS_DELIMITER: char = '|';
const HEADERS_SEPARATOR: &str = ",";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// SHA-256 of the key. Safe to log: header values such as bearer
    /// tokens end up in keys.
    pub fn digest(&self) -> String {
        hcache_storage::hash_key(&self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct KeyDeriver {
    header_names: Vec<HeaderName>,
}

impl KeyDeriver {
    /// Names are case-insensitive and order-insensitive; duplicates and
    /// blanks are dropped.
    pub fn new<I, S>(header_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut names: Vec<HeaderName> = header_names
            .into_iter()
            .filter_map(|name| {
                let name = name.as_ref().trim();
                if name.is_empty() {
                    return None;
                }
                match HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes()) {
                    Ok(name) => Some(name),
                    Err(_) => {
                        warn!(header = name, "Ignoring invalid key header name");
                        None
                    }
                }
            })
            .collect();
        names.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        names.dedup();
        Self {
            header_names: names,
        }
    }

    pub fn header_names(&self) -> &[HeaderName] {
        &self.header_names
    }

    pub fn is_cacheable_method(method: &Method) -> bool {
        *method == Method::GET
    }

    /// `None` for methods whose responses are never cached.
    pub fn derive(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
    ) -> Option<CacheKey> {
        Self::is_cacheable_method(method).then(|| self.build(uri, headers))
    }

    /// The key a GET with this URL and these headers would use. Unsafe
    /// methods invalidate it.
    pub fn derive_for_invalidation(&self, uri: &Uri, headers: &HeaderMap) -> CacheKey {
        self.build(uri, headers)
    }

    fn build(&self, uri: &Uri, headers: &HeaderMap) -> CacheKey {
        let mut key = normalize_uri(uri);

        let pairs: Vec<String> = self
            .header_names
            .iter()
            .filter_map(|name| {
                joined_values(headers, name.as_str())
                    .filter(|value| !value.is_empty())
                    .map(|value| format!("{}:{}", name.as_str(), escape_value(&value)))
            })
            .collect();

        if !pairs.is_empty() {
            key.push(HEADERS_DELIMITER);
            key.push_str(&pairs.join(HEADERS_SEPARATOR));
        }
        CacheKey(key)
    }
}

fn escape_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '%' => escaped.push_str("%25"),
            ',' => escaped.push_str("%2C"),
            '|' => escaped.push_str("%7C"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Lowercase scheme and host; keep userinfo, port, path and query as sent.
pub fn normalize_uri(uri: &Uri) -> String {
    let (Some(scheme), Some(authority)) = (uri.scheme_str(), uri.authority()) else {
        return uri.to_string();
    };

    let userinfo = authority
        .as_str()
        .rsplit_once('@')
        .map(|(userinfo, _)| format!("{userinfo}@"))
        .unwrap_or_default();
    let port = authority
        .port()
        .map(|port| format!(":{}", port.as_str()))
        .unwrap_or_default();
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

    format!(
        "{}://{}{}{}{}",
        scheme.to_ascii_lowercase(),
        userinfo,
        authority.host().to_ascii_lowercase(),
        port,
        path_and_query
    )
}
