use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{HeaderMap, HeaderName, HeaderValue, Response, StatusCode};
use serde::{Deserialize, Serialize};

/// A stored response plus the metadata needed to judge its freshness.
///
/// Freshness directives and validators are read from `headers` on demand,
/// so merging a `304 Not Modified` into the entry updates them in one go.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    pub status: u16,
    /// Header lines in arrival order, names lowercased.
    pub headers: Vec<(String, String)>,
    #[serde(with = "body_base64")]
    pub body: Vec<u8>,
    /// When the response was stored or last revalidated.
    pub stored_at: DateTime<Utc>,
    /// Request header values for every header named by the response's
    /// `Vary`, captured at store time. `("*", None)` matches nothing.
    #[serde(default)]
    pub varied: Vec<(String, Option<String>)>,
}

impl CacheEntry {
    /// Header values that are not valid UTF-8 are not kept.
    pub fn from_response(response: &Response<Bytes>, stored_at: DateTime<Utc>) -> Self {
        Self {
            status: response.status().as_u16(),
            headers: header_lines(response.headers()),
            body: response.body().to_vec(),
            stored_at,
            varied: Vec::new(),
        }
    }

    /// Capture the request's values for the headers the response varies on.
    pub fn with_vary(mut self, request_headers: &HeaderMap) -> Self {
        let varied_names: Vec<String> = self
            .header_values("vary")
            .flat_map(|line| line.split(','))
            .map(|name| name.trim().to_ascii_lowercase())
            .filter(|name| !name.is_empty())
            .collect();

        self.varied = varied_names
            .into_iter()
            .map(|name| {
                if name == "*" {
                    (name, None)
                } else {
                    let value = joined_values(request_headers, &name);
                    (name, value)
                }
            })
            .collect();
        self
    }

    /// Whether a new request selects this entry under its `Vary` rules.
    pub fn matches_vary(&self, request_headers: &HeaderMap) -> bool {
        self.varied.iter().all(|(name, stored)| {
            name != "*" && joined_values(request_headers, name) == *stored
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn header_values<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn etag(&self) -> Option<&str> {
        self.header("etag")
    }

    pub fn last_modified(&self) -> Option<&str> {
        self.header("last-modified")
    }

    pub fn has_validator(&self) -> bool {
        self.etag().is_some() || self.last_modified().is_some()
    }

    pub fn header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                map.append(name, value);
            }
        }
        map
    }

    pub fn to_response(&self) -> Response<Bytes> {
        let mut response = Response::new(Bytes::from(self.body.clone()));
        *response.status_mut() =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        *response.headers_mut() = self.header_map();
        response
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

pub(crate) fn header_lines(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

/// All values of a header joined with ", ", or `None` when absent.
pub(crate) fn joined_values(headers: &HeaderMap, name: &str) -> Option<String> {
    let values: Vec<String> = headers
        .get_all(name)
        .iter()
        .map(|value| String::from_utf8_lossy(value.as_bytes()).trim().to_string())
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.join(", "))
    }
}

mod body_base64 {
    use super::{Engine, STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(headers: &[(&str, &str)], body: &'static str) -> Response<Bytes> {
        let mut builder = Response::builder().status(200);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Bytes::from_static(body.as_bytes())).unwrap()
    }

    #[test]
    fn test_entry_from_response() {
        let resp = response(
            &[("ETag", "\"v1\""), ("Set-Cookie", "a=1"), ("Set-Cookie", "b=2")],
            "hello",
        );
        let entry = CacheEntry::from_response(&resp, Utc::now());

        assert_eq!(entry.status, 200);
        assert_eq!(entry.etag(), Some("\"v1\""));
        assert_eq!(entry.header_values("set-cookie").count(), 2);
        assert!(entry.has_validator());
        assert_eq!(entry.body, b"hello");
    }

    #[test]
    fn test_header_outlives_name() {
        let entry = CacheEntry::from_response(&response(&[("ETag", "\"v1\"")], "x"), Utc::now());
        let etag = {
            let name = String::from("ETag");
            entry.header(&name)
        };
        assert_eq!(etag, Some("\"v1\""));
        assert_eq!(entry.header("missing"), None);
    }

    #[test]
    fn test_encode_decode() {
        let resp = response(&[("Content-Type", "application/octet-stream")], "\u{0}\u{1}");
        let entry = CacheEntry::from_response(&resp, Utc::now());

        let bytes = entry.encode().unwrap();
        assert_eq!(CacheEntry::decode(&bytes).unwrap(), entry);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(CacheEntry::decode(b"not json").is_err());
        assert!(CacheEntry::decode(br#"{"status": 200}"#).is_err());
    }

    #[test]
    fn test_to_response_keeps_headers_and_body() {
        let resp = response(&[("Cache-Control", "max-age=60")], "body");
        let entry = CacheEntry::from_response(&resp, Utc::now());
        let rebuilt = entry.to_response();

        assert_eq!(rebuilt.status(), StatusCode::OK);
        assert_eq!(rebuilt.headers()["cache-control"], "max-age=60");
        assert_eq!(rebuilt.body().as_ref(), b"body");
    }

    #[test]
    fn test_vary_matching() {
        let resp = response(&[("Vary", "Accept-Encoding, Accept-Language")], "x");
        let mut request = HeaderMap::new();
        request.insert("accept-encoding", HeaderValue::from_static("gzip"));
        let entry = CacheEntry::from_response(&resp, Utc::now()).with_vary(&request);

        assert!(entry.matches_vary(&request));

        let mut other = request.clone();
        other.insert("accept-encoding", HeaderValue::from_static("br"));
        assert!(!entry.matches_vary(&other));

        let mut added = request.clone();
        added.insert("accept-language", HeaderValue::from_static("en"));
        assert!(!entry.matches_vary(&added));
    }

    #[test]
    fn test_vary_star_never_matches() {
        let resp = response(&[("Vary", "*")], "x");
        let entry = CacheEntry::from_response(&resp, Utc::now()).with_vary(&HeaderMap::new());
        assert!(!entry.matches_vary(&HeaderMap::new()));
    }
}
