//! Azure Blob Storage backend: one JSON block blob per key.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::try_join_all;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::{CONTENT_TYPE, ETAG, HeaderValue, IF_MATCH};
use reqwest::{Client, Method, Request, StatusCode};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};
use url::Url;

use crate::auth::{self, API_VERSION, MS_VERSION};
use crate::cancel::CancellationSignal;
use crate::connection::{ConnectionSettings, Credentials, parse_connection_string};
use crate::error::{StorageError, StorageResult};
use crate::storage::{ETAG_FIELD, Record, Storage, StorageKey, record_etag};

/// Longest blob name the service accepts.
pub const MAX_BLOB_NAME_LEN: usize = 1024;

/// Everything but RFC 3986 unreserved characters. Applied once to turn a key
/// into a blob name and again to place that name in a URL path.
const ESCAPE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Map a key to its blob name (percent-encoded so any key is a single flat name).
///
/// # Errors
/// Returns [`StorageError::InvalidKey`] for empty keys or names over
/// [`MAX_BLOB_NAME_LEN`].
pub fn blob_name_for_key(key: &StorageKey) -> StorageResult<String> {
    if key.as_str().is_empty() {
        return Err(StorageError::InvalidKey("key cannot be empty".into()));
    }
    let name = utf8_percent_encode(key.as_str(), ESCAPE_SET).to_string();
    if name.len() > MAX_BLOB_NAME_LEN {
        return Err(StorageError::InvalidKey(format!(
            "blob name for '{key}' exceeds {MAX_BLOB_NAME_LEN} characters"
        )));
    }
    Ok(name)
}

/// Check a container name against the service's naming rules.
///
/// # Errors
/// Returns [`StorageError::InvalidContainerName`] naming the broken rule.
pub fn validate_container_name(name: &str) -> StorageResult<()> {
    let invalid = |reason| StorageError::InvalidContainerName {
        name: name.to_string(),
        reason,
    };
    if !(3..=63).contains(&name.len()) {
        return Err(invalid("must be 3-63 characters"));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        return Err(invalid(
            "only lowercase letters, digits and hyphens are allowed",
        ));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(invalid("must start and end with a letter or digit"));
    }
    if name.contains("--") {
        return Err(invalid("consecutive hyphens are not allowed"));
    }
    Ok(())
}

/// Storage backed by one container of an Azure Storage account.
///
/// Each key is stored as a JSON block blob. The container is created on first
/// use. Cloning shares the HTTP connection pool and the container-created flag.
#[derive(Clone)]
pub struct AzureBlobStorage {
    inner: std::sync::Arc<Inner>,
}

struct Inner {
    client: Client,
    settings: ConnectionSettings,
    container: String,
    container_ready: OnceCell<()>,
}

impl fmt::Debug for AzureBlobStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureBlobStorage")
            .field("endpoint", &self.inner.settings.blob_endpoint.as_str())
            .field("container", &self.inner.container)
            .finish_non_exhaustive()
    }
}

impl AzureBlobStorage {
    /// Create a backend from a connection string and container name.
    ///
    /// # Errors
    /// Returns [`StorageError::InvalidConnectionString`] or
    /// [`StorageError::InvalidContainerName`] when either input is rejected.
    pub fn new(connection_string: &str, container: impl Into<String>) -> StorageResult<Self> {
        let settings = parse_connection_string(connection_string)?;
        Self::with_settings(settings, container, Client::new())
    }

    /// Create a backend from parsed settings and an existing HTTP client.
    ///
    /// # Errors
    /// Returns [`StorageError::InvalidContainerName`] if the name is rejected.
    pub fn with_settings(
        settings: ConnectionSettings,
        container: impl Into<String>,
        client: Client,
    ) -> StorageResult<Self> {
        let container = container.into();
        validate_container_name(&container)?;
        info!(
            endpoint = %settings.blob_endpoint,
            container = %container,
            "Azure blob storage configured"
        );
        Ok(Self {
            inner: std::sync::Arc::new(Inner {
                client,
                settings,
                container,
                container_ready: OnceCell::new(),
            }),
        })
    }

    /// Container this backend reads and writes.
    #[must_use]
    pub fn container(&self) -> &str {
        &self.inner.container
    }

    fn container_url(&self) -> StorageResult<Url> {
        let base = self.inner.settings.blob_endpoint.as_str().trim_end_matches('/');
        self.with_sas(&format!("{base}/{}?restype=container", self.inner.container))
    }

    fn blob_url(&self, blob_name: &str) -> StorageResult<Url> {
        let base = self.inner.settings.blob_endpoint.as_str().trim_end_matches('/');
        let segment = utf8_percent_encode(blob_name, ESCAPE_SET);
        self.with_sas(&format!("{base}/{}/{segment}", self.inner.container))
    }

    fn with_sas(&self, raw: &str) -> StorageResult<Url> {
        let mut url = Url::parse(raw)
            .map_err(|err| StorageError::InvalidKey(format!("cannot build url '{raw}': {err}")))?;
        if let Credentials::SharedAccessSignature(token) = &self.inner.settings.credentials {
            let query = match url.query() {
                Some(existing) if !existing.is_empty() => format!("{existing}&{token}"),
                _ => token.clone(),
            };
            url.set_query(Some(&query));
        }
        Ok(url)
    }

    fn authorize(&self, mut request: Request) -> StorageResult<Request> {
        match &self.inner.settings.credentials {
            Credentials::SharedKey { account, key } => {
                auth::authorize_shared_key(&mut request, account, key, Utc::now())?;
            }
            Credentials::SharedAccessSignature(_) => {
                request
                    .headers_mut()
                    .insert(MS_VERSION, HeaderValue::from_static(API_VERSION));
            }
        }
        Ok(request)
    }

    async fn send(
        &self,
        request: Request,
        cancel: &CancellationSignal,
    ) -> StorageResult<reqwest::Response> {
        let request = self.authorize(request)?;
        let response = cancel
            .run_until_cancelled(self.inner.client.execute(request))
            .await??;
        Ok(response)
    }

    async fn ensure_container(&self, cancel: &CancellationSignal) -> StorageResult<()> {
        self.inner
            .container_ready
            .get_or_try_init(|| self.create_container(cancel))
            .await
            .map(|_| ())
    }

    async fn create_container(&self, cancel: &CancellationSignal) -> StorageResult<()> {
        let request = self
            .inner
            .client
            .request(Method::PUT, self.container_url()?)
            .build()?;
        let response = self.send(request, cancel).await?;
        match response.status() {
            StatusCode::CREATED => {
                info!(container = %self.inner.container, "Created blob container");
                Ok(())
            }
            StatusCode::CONFLICT => {
                debug!(container = %self.inner.container, "Blob container already exists");
                Ok(())
            }
            status => Err(http_error(
                "create_container",
                self.inner.container.clone(),
                status,
                response,
                cancel,
            )
            .await),
        }
    }

    fn target(&self, blob_name: &str) -> String {
        format!("{}/{blob_name}", self.inner.container)
    }

    async fn read_one(
        &self,
        key: &StorageKey,
        cancel: &CancellationSignal,
    ) -> StorageResult<Option<(StorageKey, Record)>> {
        let blob_name = blob_name_for_key(key)?;
        let request = self
            .inner
            .client
            .request(Method::GET, self.blob_url(&blob_name)?)
            .build()?;
        let response = self.send(request, cancel).await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let etag = response
                    .headers()
                    .get(ETAG)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let body = cancel.run_until_cancelled(response.bytes()).await??;
                let value: serde_json::Value = serde_json::from_slice(&body)?;
                let serde_json::Value::Object(mut record) = value else {
                    return Err(StorageError::NotAnObject {
                        key: key.to_string(),
                    });
                };
                if let Some(etag) = etag {
                    record.insert(ETAG_FIELD.to_string(), serde_json::Value::String(etag));
                }
                Ok(Some((key.clone(), record)))
            }
            status => {
                Err(http_error("read", self.target(&blob_name), status, response, cancel).await)
            }
        }
    }

    async fn write_one(
        &self,
        key: &StorageKey,
        record: &Record,
        cancel: &CancellationSignal,
    ) -> StorageResult<()> {
        let blob_name = blob_name_for_key(key)?;
        let body = serde_json::to_vec(record)?;
        let mut builder = self
            .inner
            .client
            .request(Method::PUT, self.blob_url(&blob_name)?)
            .header(CONTENT_TYPE, "application/json")
            .header("x-ms-blob-type", "BlockBlob")
            .body(body);
        if let Some(etag) = record_etag(record) {
            builder = builder.header(IF_MATCH, etag);
        }
        let response = self.send(builder.build()?, cancel).await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::PRECONDITION_FAILED => Err(StorageError::PreconditionFailed {
                key: key.to_string(),
            }),
            status => {
                Err(http_error("write", self.target(&blob_name), status, response, cancel).await)
            }
        }
    }

    async fn delete_one(&self, key: &StorageKey, cancel: &CancellationSignal) -> StorageResult<()> {
        let blob_name = blob_name_for_key(key)?;
        let request = self
            .inner
            .client
            .request(Method::DELETE, self.blob_url(&blob_name)?)
            .build()?;
        let response = self.send(request, cancel).await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            status => {
                Err(http_error("delete", self.target(&blob_name), status, response, cancel).await)
            }
        }
    }
}

/// Map a non-success response to an error. Reading the body for the message
/// still honours `cancel`; a cancelled read yields [`StorageError::Cancelled`].
async fn http_error(
    operation: &'static str,
    target: String,
    status: StatusCode,
    response: reqwest::Response,
    cancel: &CancellationSignal,
) -> StorageError {
    let error_code = response
        .headers()
        .get("x-ms-error-code")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let message = match error_code {
        Some(code) => code,
        None => match cancel.run_until_cancelled(response.text()).await {
            Ok(body) => body
                .ok()
                .filter(|body| !body.is_empty())
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string()),
            Err(cancelled) => return cancelled,
        },
    };
    StorageError::Http {
        operation,
        target,
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl Storage for AzureBlobStorage {
    #[instrument(skip_all, fields(container = %self.inner.container, keys = keys.len()))]
    async fn read(
        &self,
        keys: &[StorageKey],
        cancel: &CancellationSignal,
    ) -> StorageResult<HashMap<StorageKey, Record>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        self.ensure_container(cancel).await?;
        let found = try_join_all(keys.iter().map(|key| self.read_one(key, cancel))).await?;
        Ok(found.into_iter().flatten().collect())
    }

    #[instrument(skip_all, fields(container = %self.inner.container, keys = changes.len()))]
    async fn write(
        &self,
        changes: &HashMap<StorageKey, Record>,
        cancel: &CancellationSignal,
    ) -> StorageResult<()> {
        if changes.is_empty() {
            return Ok(());
        }
        self.ensure_container(cancel).await?;
        try_join_all(
            changes
                .iter()
                .map(|(key, record)| self.write_one(key, record, cancel)),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(container = %self.inner.container, keys = keys.len()))]
    async fn delete(&self, keys: &[StorageKey], cancel: &CancellationSignal) -> StorageResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        self.ensure_container(cancel).await?;
        try_join_all(keys.iter().map(|key| self.delete_one(key, cancel))).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_name_passes_plain_keys() {
        let name = blob_name_for_key(&StorageKey::new("MyAmazingStorageKey")).expect("valid");
        assert_eq!(name, "MyAmazingStorageKey");
    }

    #[test]
    fn blob_name_escapes_separators() {
        let name = blob_name_for_key(&StorageKey::new("conv/user 1")).expect("valid");
        assert_eq!(name, "conv%2Fuser%201");
    }

    #[test]
    fn blob_name_rejects_empty() {
        assert!(matches!(
            blob_name_for_key(&StorageKey::new("")),
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[test]
    fn blob_name_rejects_oversized() {
        let key = StorageKey::new("k".repeat(MAX_BLOB_NAME_LEN + 1));
        assert!(matches!(
            blob_name_for_key(&key),
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[test]
    fn container_name_rules() {
        assert!(validate_container_name("testbotstorage").is_ok());
        assert!(validate_container_name("a-1-b").is_ok());
        assert!(validate_container_name("ab").is_err());
        assert!(validate_container_name(&"a".repeat(64)).is_err());
        assert!(validate_container_name("Upper").is_err());
        assert!(validate_container_name("-lead").is_err());
        assert!(validate_container_name("trail-").is_err());
        assert!(validate_container_name("dou--ble").is_err());
        assert!(validate_container_name("under_score").is_err());
    }

    #[test]
    fn blob_url_double_encodes_escaped_names() {
        let storage = AzureBlobStorage::new(
            "AccountName=acct;AccountKey=YQ==;BlobEndpoint=http://localhost:10000/acct",
            "probe",
        )
        .expect("valid");
        let url = storage.blob_url("a%2Fb").expect("url");
        assert_eq!(url.as_str(), "http://localhost:10000/acct/probe/a%252Fb");
    }

    #[test]
    fn sas_token_appended_to_urls() {
        let storage = AzureBlobStorage::new(
            "BlobEndpoint=https://acct.blob.core.windows.net;SharedAccessSignature=sv=1&sig=x",
            "probe",
        )
        .expect("valid");
        assert_eq!(
            storage.container_url().expect("url").as_str(),
            "https://acct.blob.core.windows.net/probe?restype=container&sv=1&sig=x"
        );
        assert_eq!(
            storage.blob_url("k").expect("url").as_str(),
            "https://acct.blob.core.windows.net/probe/k?sv=1&sig=x"
        );
    }

    #[test]
    fn rejects_invalid_container() {
        let err = AzureBlobStorage::new("UseDevelopmentStorage=true", "Bad_Name")
            .expect_err("invalid container");
        assert!(matches!(err, StorageError::InvalidContainerName { .. }));
    }
}
