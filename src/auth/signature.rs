//! Canonical query-string construction and HMAC-SHA256 request signing.
//!
//! Binance signed endpoints require a signature computed as:
//! ```text
//! HMAC-SHA256(canonical_query_string, api_secret)
//! ```
//!
//! The signature is hex-encoded (lowercase) and appended to the query string
//! as the `signature` parameter. The canonical string must match the query
//! string sent on the wire byte-for-byte, including Binance's bracketed
//! rendering of array parameters, or the exchange rejects the request.

use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha2::Sha256;

use crate::auth::Credentials;

type HmacSha256 = Hmac<Sha256>;

/// Characters escaped the same way as JavaScript's `encodeURIComponent`:
/// everything except alphanumerics and `-_.!~*'()`.
const QUERY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// A single query parameter value.
///
/// Array values render as a JSON-style bracketed, comma-quoted list
/// (`["a","b"]`) before percent-encoding, matching the exchange convention.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// Plain string value.
    Str(String),
    /// Signed integer value.
    Int(i64),
    /// Unsigned integer value (timestamps, ids).
    Uint(u64),
    /// Array of strings, rendered as `["a","b"]`.
    Array(Vec<String>),
}

impl ParamValue {
    /// Render the value to the exact string that gets percent-encoded.
    pub fn render(&self) -> String {
        match self {
            ParamValue::Str(s) => s.clone(),
            ParamValue::Int(i) => i.to_string(),
            ParamValue::Uint(u) => u.to_string(),
            ParamValue::Array(items) => format!("[\"{}\"]", items.join("\",\"")),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Str(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Str(s)
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        ParamValue::Int(i)
    }
}

impl From<u64> for ParamValue {
    fn from(u: u64) -> Self {
        ParamValue::Uint(u)
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(items: Vec<String>) -> Self {
        ParamValue::Array(items)
    }
}

impl From<Vec<&str>> for ParamValue {
    fn from(items: Vec<&str>) -> Self {
        ParamValue::Array(items.into_iter().map(String::from).collect())
    }
}

/// An insertion-ordered collection of query parameters.
///
/// Order matters: the canonical string iterates entries in the order they
/// were inserted, and the signature is computed over that exact string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    entries: Vec<(String, ParamValue)>,
}

impl Params {
    /// Create an empty parameter list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parameter, preserving insertion order.
    pub fn insert(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.entries.push((key.into(), value.into()));
        self
    }

    /// Append a parameter in place.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        self.entries.push((key.into(), value.into()));
    }

    /// Whether the list contains no parameters.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over the entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &(String, ParamValue)> {
        self.entries.iter()
    }
}

/// Build the canonical query string from a parameter list.
///
/// Entries are joined as `key=value` pairs with `&`, in insertion order,
/// with each rendered value percent-encoded. An empty list yields the empty
/// string.
pub fn canonical_query_string(params: &Params) -> String {
    params
        .iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                key,
                utf8_percent_encode(&value.render(), QUERY_ENCODE_SET)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Sign a canonical query string with the API secret.
///
/// Returns the lowercase hex HMAC-SHA256 digest. Pure and deterministic:
/// equal inputs always yield equal digests.
///
/// # Example
///
/// ```rust
/// use binance_api_client::auth::{Credentials, sign};
///
/// let credentials = Credentials::new("api_key", "api_secret");
/// let signature = sign(&credentials, "symbol=BTCUSDT&timestamp=1616492376594");
/// assert_eq!(signature.len(), 64);
/// ```
pub fn sign(credentials: &Credentials, canonical: &str) -> String {
    // HMAC accepts keys of any length, so new_from_slice cannot fail here.
    let mut mac = HmacSha256::new_from_slice(credentials.expose_secret().as_bytes())
        .expect("HMAC can take a key of any size");
    mac.update(canonical.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_empty_params() {
        assert_eq!(canonical_query_string(&Params::new()), "");
    }

    #[test]
    fn test_canonical_preserves_insertion_order() {
        let params = Params::new()
            .insert("symbol", "BTCUSDT")
            .insert("side", "BUY")
            .insert("timestamp", 1616492376594u64);
        assert_eq!(
            canonical_query_string(&params),
            "symbol=BTCUSDT&side=BUY&timestamp=1616492376594"
        );
    }

    #[test]
    fn test_canonical_is_deterministic() {
        let params = Params::new().insert("a", "1").insert("b", "2");
        assert_eq!(
            canonical_query_string(&params),
            canonical_query_string(&params.clone())
        );
    }

    #[test]
    fn test_array_renders_bracketed_then_encoded() {
        // ["1","2"] before encoding; brackets, quotes and commas are escaped.
        let value = ParamValue::Array(vec!["1".into(), "2".into()]);
        assert_eq!(value.render(), "[\"1\",\"2\"]");

        let params = Params::new().insert("symbols", vec!["1", "2"]);
        assert_eq!(
            canonical_query_string(&params),
            "symbols=%5B%221%22%2C%222%22%5D"
        );
    }

    #[test]
    fn test_value_percent_encoding_matches_encode_uri_component() {
        let params = Params::new().insert("note", "a b/c&d=e!~*'()");
        assert_eq!(
            canonical_query_string(&params),
            "note=a%20b%2Fc%26d%3De!~*'()"
        );
    }

    #[test]
    fn test_sign_is_deterministic() {
        let credentials = Credentials::new("key", "secret");
        let sig1 = sign(&credentials, "symbol=BTCUSDT&timestamp=12345");
        let sig2 = sign(&credentials, "symbol=BTCUSDT&timestamp=12345");
        assert_eq!(sig1, sig2);
        // SHA-256 digest is 32 bytes, 64 hex characters, lowercase.
        assert_eq!(sig1.len(), 64);
        assert_eq!(sig1, sig1.to_lowercase());
    }

    #[test]
    fn test_sign_changes_with_payload() {
        let credentials = Credentials::new("key", "secret");
        let sig1 = sign(&credentials, "timestamp=12345");
        let sig2 = sign(&credentials, "timestamp=12346");
        assert_ne!(sig1, sig2);
    }

    #[test]
    fn test_sign_changes_with_secret() {
        let sig1 = sign(&Credentials::new("key", "secret_a"), "timestamp=12345");
        let sig2 = sign(&Credentials::new("key", "secret_b"), "timestamp=12345");
        assert_ne!(sig1, sig2);
    }

    #[test]
    fn test_sign_known_vector() {
        // Vector from the Binance API documentation's signed endpoint example.
        let credentials = Credentials::new(
            "vmPUZE6mv9SD5VNHk4HlWFsOr6aKE2zvsw0MuIgwCIPy6utIco14y7Ju91duEh8A",
            "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j",
        );
        let canonical = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            sign(&credentials, canonical),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }
}
