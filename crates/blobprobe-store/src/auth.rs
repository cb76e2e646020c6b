//! Shared Key request signing for the Blob service.
//!
//! The signature is `Base64(HMAC-SHA256(account_key, string_to_sign))`, sent as
//! `Authorization: SharedKey <account>:<signature>`. The string-to-sign layout is:
//!
//! ```text
//! VERB
//! Content-Encoding
//! Content-Language
//! Content-Length        (empty when zero)
//! Content-MD5
//! Content-Type
//! Date                  (empty; x-ms-date is used instead)
//! If-Modified-Since
//! If-Match
//! If-None-Match
//! If-Unmodified-Since
//! Range
//! CanonicalizedHeaders  (x-ms-* headers, lowercased and sorted)
//! CanonicalizedResource (/account/path plus sorted query parameters)
//! ```

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Request;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use sha2::Sha256;

use crate::error::{StorageError, StorageResult};

/// Blob service REST API version sent with every request.
pub const API_VERSION: &str = "2021-08-06";

/// Header carrying the request timestamp.
pub const MS_DATE: &str = "x-ms-date";

/// Header carrying the REST API version.
pub const MS_VERSION: &str = "x-ms-version";

type HmacSha256 = Hmac<Sha256>;

const STANDARD_HEADERS: [&str; 11] = [
    "content-encoding",
    "content-language",
    "content-length",
    "content-md5",
    "content-type",
    "date",
    "if-modified-since",
    "if-match",
    "if-none-match",
    "if-unmodified-since",
    "range",
];

/// Format a timestamp the way `x-ms-date` expects (RFC 1123, GMT).
#[must_use]
pub fn format_ms_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Build the canonical string-to-sign for a request.
#[must_use]
pub fn string_to_sign(
    method: &str,
    headers: &HeaderMap,
    content_length: Option<usize>,
    account: &str,
    url: &url::Url,
) -> String {
    let mut out = String::with_capacity(256);
    out.push_str(method);
    out.push('\n');

    for name in STANDARD_HEADERS {
        if name == "content-length" {
            if let Some(len) = content_length.filter(|len| *len > 0) {
                out.push_str(&len.to_string());
            }
        } else if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            out.push_str(value.trim());
        }
        out.push('\n');
    }

    let ms_headers: BTreeMap<String, &str> = headers
        .iter()
        .filter_map(|(name, value)| {
            let name = name.as_str().to_ascii_lowercase();
            if !name.starts_with("x-ms-") {
                return None;
            }
            value.to_str().ok().map(|value| (name, value.trim()))
        })
        .collect();
    for (name, value) in ms_headers {
        out.push_str(&name);
        out.push(':');
        out.push_str(value);
        out.push('\n');
    }

    out.push_str(&canonicalized_resource(account, url));
    out
}

/// `/account/path` followed by `\nname:value` for each sorted query parameter.
#[must_use]
pub fn canonicalized_resource(account: &str, url: &url::Url) -> String {
    let mut out = format!("/{account}{}", url.path());

    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in url.query_pairs() {
        params
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into_owned());
    }
    for (name, mut values) in params {
        values.sort();
        out.push('\n');
        out.push_str(&name);
        out.push(':');
        out.push_str(&values.join(","));
    }
    out
}

/// Compute the Base64 HMAC-SHA256 signature of `payload`.
///
/// # Errors
/// Returns [`StorageError::Signing`] if the key is rejected by the MAC.
pub fn sign(key: &[u8], payload: &str) -> StorageResult<String> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|err| StorageError::Signing(format!("invalid account key: {err}")))?;
    mac.update(payload.as_bytes());
    Ok(B64.encode(mac.finalize().into_bytes()))
}

/// Stamp `x-ms-date` and `x-ms-version` on a request and add its Shared Key
/// `Authorization` header.
///
/// # Errors
/// Returns [`StorageError::Signing`] if the signature cannot be produced.
pub fn authorize_shared_key(
    request: &mut Request,
    account: &str,
    key: &[u8],
    now: DateTime<Utc>,
) -> StorageResult<()> {
    let date = HeaderValue::from_str(&format_ms_date(now))
        .map_err(|err| StorageError::Signing(err.to_string()))?;
    request.headers_mut().insert(MS_DATE, date);
    request
        .headers_mut()
        .insert(MS_VERSION, HeaderValue::from_static(API_VERSION));

    let content_length = request
        .body()
        .and_then(reqwest::Body::as_bytes)
        .map(<[u8]>::len);
    let payload = string_to_sign(
        request.method().as_str(),
        request.headers(),
        content_length,
        account,
        request.url(),
    );
    let signature = sign(key, &payload)?;

    let value = HeaderValue::from_str(&format!("SharedKey {account}:{signature}"))
        .map_err(|err| StorageError::Signing(err.to_string()))?;
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use reqwest::header::{CONTENT_TYPE, IF_MATCH};

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn ms_date_is_rfc1123() {
        assert_eq!(format_ms_date(fixed_time()), "Tue, 05 Mar 2024 07:08:09 GMT");
    }

    #[test]
    fn canonical_resource_sorts_query() {
        let url = url::Url::parse(
            "https://acct.blob.core.windows.net/probe?restype=container&Comp=list&comp=b",
        )
        .expect("url");
        assert_eq!(
            canonicalized_resource("acct", &url),
            "/acct/probe\ncomp:b,list\nrestype:container"
        );
    }

    #[test]
    fn canonical_resource_keeps_encoded_path() {
        let url = url::Url::parse("http://127.0.0.1:10000/devstoreaccount1/probe/a%252Fb")
            .expect("url");
        assert_eq!(
            canonicalized_resource("devstoreaccount1", &url),
            "/devstoreaccount1/devstoreaccount1/probe/a%252Fb"
        );
    }

    #[test]
    fn string_to_sign_for_put_blob() {
        let url = url::Url::parse("https://acct.blob.core.windows.net/probe/MyKey").expect("url");
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(IF_MATCH, HeaderValue::from_static("\"0x1\""));
        headers.insert("x-ms-version", HeaderValue::from_static(API_VERSION));
        headers.insert(
            "x-ms-date",
            HeaderValue::from_static("Tue, 05 Mar 2024 07:08:09 GMT"),
        );
        headers.insert("x-ms-blob-type", HeaderValue::from_static("BlockBlob"));

        let expected = [
            "PUT",
            "",
            "",
            "42",
            "",
            "application/json",
            "",
            "",
            "\"0x1\"",
            "",
            "",
            "",
            "x-ms-blob-type:BlockBlob",
            "x-ms-date:Tue, 05 Mar 2024 07:08:09 GMT",
            "x-ms-version:2021-08-06",
            "/acct/probe/MyKey",
        ]
        .join("\n");

        assert_eq!(
            string_to_sign("PUT", &headers, Some(42), "acct", &url),
            expected
        );
    }

    #[test]
    fn zero_content_length_is_blank() {
        let url = url::Url::parse("https://acct.blob.core.windows.net/probe/k").expect("url");
        let signed = string_to_sign("GET", &HeaderMap::new(), Some(0), "acct", &url);
        let lines: Vec<&str> = signed.split('\n').collect();
        assert_eq!(lines[0], "GET");
        assert_eq!(lines[3], "");
    }

    #[test]
    fn signature_is_deterministic() {
        let first = sign(b"secret", "payload").expect("sign");
        let second = sign(b"secret", "payload").expect("sign");
        let other = sign(b"other", "payload").expect("sign");
        assert_eq!(first, second);
        assert_ne!(first, other);
        // 32-byte MAC, base64 encoded.
        assert_eq!(first.len(), 44);
    }

    #[test]
    fn authorize_sets_headers() {
        let client = reqwest::Client::new();
        let mut request = client
            .put("https://acct.blob.core.windows.net/probe/k")
            .body("{}")
            .build()
            .expect("request");

        authorize_shared_key(&mut request, "acct", b"secret", fixed_time()).expect("authorize");

        let headers = request.headers();
        assert_eq!(headers[MS_VERSION], API_VERSION);
        assert_eq!(headers[MS_DATE], "Tue, 05 Mar 2024 07:08:09 GMT");
        let auth = headers[AUTHORIZATION].to_str().expect("ascii");
        assert!(auth.starts_with("SharedKey acct:"), "got {auth}");
    }
}
