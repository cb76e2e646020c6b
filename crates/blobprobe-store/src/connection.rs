//! Azure Storage connection string parsing.
//!
//! Recognised settings (names are case-insensitive):
//!
//! | setting | meaning |
//! |---|---|
//! | `AccountName` / `AccountKey` | Shared Key credentials |
//! | `SharedAccessSignature` | SAS token appended to every request |
//! | `DefaultEndpointsProtocol` | `https` (default) or `http` |
//! | `EndpointSuffix` | defaults to `core.windows.net` |
//! | `BlobEndpoint` | explicit blob service URL, overrides the derived one |
//! | `UseDevelopmentStorage` | `true` selects the local emulator account |
//! | `DevelopmentStorageProxyUri` | emulator host override |

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use url::Url;

use crate::error::{StorageError, StorageResult};

/// Account name of the local storage emulator.
pub const DEVELOPMENT_ACCOUNT_NAME: &str = "devstoreaccount1";

/// Published key of the local storage emulator account.
pub const DEVELOPMENT_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";

const DEVELOPMENT_BLOB_HOST: &str = "http://127.0.0.1:10000";
const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";

/// How requests are authorized.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Shared Key: HMAC-SHA256 signature over each request.
    SharedKey {
        /// Storage account name.
        account: String,
        /// Decoded account key bytes.
        key: Vec<u8>,
    },
    /// Pre-signed SAS query string (without a leading `?`).
    SharedAccessSignature(String),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SharedKey { account, .. } => f
                .debug_struct("SharedKey")
                .field("account", account)
                .field("key", &"<redacted>")
                .finish(),
            Self::SharedAccessSignature(_) => f.write_str("SharedAccessSignature(<redacted>)"),
        }
    }
}

/// Parsed connection settings for the blob service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Blob service base URL, e.g. `https://acct.blob.core.windows.net`.
    pub blob_endpoint: Url,
    /// Request authorization.
    pub credentials: Credentials,
}

impl ConnectionSettings {
    /// Account name, when using Shared Key credentials.
    #[must_use]
    pub fn account_name(&self) -> Option<&str> {
        match &self.credentials {
            Credentials::SharedKey { account, .. } => Some(account),
            Credentials::SharedAccessSignature(_) => None,
        }
    }
}

/// Parse an Azure Storage connection string.
///
/// # Errors
/// Returns [`StorageError::InvalidConnectionString`] when the string is empty,
/// malformed, or carries neither Shared Key nor SAS credentials.
pub fn parse_connection_string(raw: &str) -> StorageResult<ConnectionSettings> {
    let mut account_name = None;
    let mut account_key = None;
    let mut sas = None;
    let mut protocol = None;
    let mut suffix = None;
    let mut blob_endpoint = None;
    let mut development = false;
    let mut proxy_uri = None;

    for segment in raw.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let (name, value) = segment.split_once('=').ok_or_else(|| {
            StorageError::InvalidConnectionString(format!("setting '{segment}' has no value"))
        })?;
        let value = value.trim().to_string();
        match name.trim().to_ascii_lowercase().as_str() {
            "accountname" => account_name = Some(value),
            "accountkey" => account_key = Some(value),
            "sharedaccesssignature" => sas = Some(value),
            "defaultendpointsprotocol" => protocol = Some(value),
            "endpointsuffix" => suffix = Some(value),
            "blobendpoint" => blob_endpoint = Some(value),
            "usedevelopmentstorage" => development = value.eq_ignore_ascii_case("true"),
            "developmentstorageproxyuri" => proxy_uri = Some(value),
            other => {
                tracing::debug!(setting = other, "Ignoring unrecognised connection string setting");
            }
        }
    }

    if development {
        let host = proxy_uri.as_deref().unwrap_or(DEVELOPMENT_BLOB_HOST);
        let host = host.trim_end_matches('/');
        let endpoint = parse_endpoint(&format!("{host}/{DEVELOPMENT_ACCOUNT_NAME}"))?;
        return Ok(ConnectionSettings {
            blob_endpoint: endpoint,
            credentials: shared_key(DEVELOPMENT_ACCOUNT_NAME, DEVELOPMENT_ACCOUNT_KEY)?,
        });
    }

    let credentials = match (&account_name, account_key, sas) {
        (Some(account), Some(key), _) => shared_key(account, &key)?,
        (_, None, Some(token)) => {
            Credentials::SharedAccessSignature(token.trim_start_matches('?').to_string())
        }
        (None, Some(_), _) => {
            return Err(StorageError::InvalidConnectionString(
                "AccountKey requires AccountName".into(),
            ));
        }
        (_, None, None) => {
            return Err(StorageError::InvalidConnectionString(
                "expected AccountName/AccountKey or SharedAccessSignature".into(),
            ));
        }
    };

    let blob_endpoint = if let Some(explicit) = blob_endpoint {
        parse_endpoint(&explicit)?
    } else {
        let account = account_name.ok_or_else(|| {
            StorageError::InvalidConnectionString(
                "BlobEndpoint or AccountName is required to locate the blob service".into(),
            )
        })?;
        let protocol = protocol.unwrap_or_else(|| "https".to_string());
        if protocol != "https" && protocol != "http" {
            return Err(StorageError::InvalidConnectionString(format!(
                "unsupported DefaultEndpointsProtocol '{protocol}'"
            )));
        }
        let suffix = suffix.unwrap_or_else(|| DEFAULT_ENDPOINT_SUFFIX.to_string());
        parse_endpoint(&format!("{protocol}://{account}.blob.{suffix}"))?
    };

    Ok(ConnectionSettings {
        blob_endpoint,
        credentials,
    })
}

fn shared_key(account: &str, key: &str) -> StorageResult<Credentials> {
    if account.is_empty() {
        return Err(StorageError::InvalidConnectionString(
            "AccountName cannot be empty".into(),
        ));
    }
    let key = B64.decode(key).map_err(|err| {
        StorageError::InvalidConnectionString(format!("AccountKey is not valid base64: {err}"))
    })?;
    Ok(Credentials::SharedKey {
        account: account.to_string(),
        key,
    })
}

fn parse_endpoint(raw: &str) -> StorageResult<Url> {
    let trimmed = raw.trim_end_matches('/');
    Url::parse(trimmed).map_err(|err| {
        StorageError::InvalidConnectionString(format!("invalid blob endpoint '{raw}': {err}"))
    })
}
