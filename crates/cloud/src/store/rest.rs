//! HTTP client for the remote document service.
//!
//! Routes: `{endpoint}/v1/users/{uid}/{collection}[/{id}]`.

use async_trait::async_trait;
use log::{debug, warn};
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::time::sleep;

use finsync_core::auth::Session;
use finsync_core::storage::Subscription;

use super::{CloudCollection, DocumentStore, RemoteChangeCallback, StoredDocument, DEVICE_ID_FIELD};
use crate::config::CloudConfig;
use crate::error::{CloudError, Result};

const MAX_LOG_BODY_CHARS: usize = 512;

/// Error code the service returns when a collection has never been written.
const COLLECTION_NOT_FOUND_CODE: &str = "collection_not_found";

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    documents: Vec<Value>,
}

/// Interprets a 404 from a collection listing. Only an explicit
/// "collection absent" answer means an empty listing; anything else (a wrong
/// endpoint, a proxy page) means the service is not reachable as configured.
fn missing_collection(collection: CloudCollection, body: &str) -> Result<Vec<StoredDocument>> {
    match serde_json::from_str::<ApiErrorResponse>(body) {
        Ok(error) if error.code == COLLECTION_NOT_FOUND_CODE => {
            debug!("[CloudStorage] {} has no documents yet", collection);
            Ok(Vec::new())
        }
        Ok(error) => Err(CloudError::unavailable(format!(
            "Listing {} returned 404 ({}: {})",
            collection, error.code, error.message
        ))),
        Err(_) => Err(CloudError::unavailable(format!(
            "Listing {} returned 404 from an unexpected endpoint",
            collection
        ))),
    }
}

/// Order-independent digest of a listing's `(id, updatedAt)` pairs.
fn listing_fingerprint(docs: &[StoredDocument]) -> String {
    let mut entries = docs
        .iter()
        .map(|doc| {
            format!(
                "{}:{}",
                doc.id,
                doc.updated_at.map(|t| t.to_rfc3339()).unwrap_or_default()
            )
        })
        .collect::<Vec<_>>();
    entries.sort();

    let mut hasher = Sha256::new();
    for entry in &entries {
        hasher.update(entry.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// Poll interval plus up to 20% jitter so devices don't poll in lockstep.
fn poll_delay_with_jitter(interval: Duration) -> Duration {
    let base_ms = interval.as_millis().min(u64::MAX as u128) as u64;
    let jitter = rand::thread_rng().gen_range(0..=(base_ms / 5).max(1));
    Duration::from_millis(base_ms.saturating_add(jitter))
}

#[derive(Debug, Clone)]
pub struct RestDocumentStore {
    client: reqwest::Client,
    config: CloudConfig,
}

impl RestDocumentStore {
    pub fn new(config: CloudConfig) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &CloudConfig {
        &self.config
    }

    fn collection_url(&self, session: &Session, collection: CloudCollection) -> String {
        format!(
            "{}/v1/users/{}/{}",
            self.config.endpoint,
            urlencoding::encode(&session.user_id),
            collection.as_str()
        )
    }

    fn document_url(&self, session: &Session, collection: CloudCollection, id: &str) -> String {
        format!(
            "{}/{}",
            self.collection_url(session, collection),
            urlencoding::encode(id)
        )
    }

    fn headers(&self, session: &Session, device_id: Option<&str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let auth_value = HeaderValue::from_str(&format!("Bearer {}", session.access_token))
            .map_err(|_| CloudError::auth("Invalid access token format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        if let Some(api_key) = &self.config.api_key {
            let key_value = HeaderValue::from_str(api_key)
                .map_err(|_| CloudError::auth("Invalid API key format"))?;
            headers.insert("x-api-key", key_value);
        }

        if let Some(device_id) = device_id {
            let device_value = HeaderValue::from_str(device_id)
                .map_err(|_| CloudError::auth("Invalid device ID format"))?;
            headers.insert("x-device-id", device_value);
        }

        Ok(headers)
    }

    fn log_response(status: StatusCode, body: &str) {
        if status.is_success() {
            debug!("[CloudStorage] API response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("[CloudStorage] API response error ({}): {}", status, preview);
    }

    /// Reads the body, turning non-2xx statuses into `CloudError::Api`.
    async fn read_body(response: reqwest::Response) -> Result<(StatusCode, String)> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok((status, body));
        }

        if let Ok(error) = serde_json::from_str::<ApiErrorResponse>(&body) {
            return Err(CloudError::api(
                status.as_u16(),
                format!("{}: {}", error.code, error.message),
            ));
        }
        Err(CloudError::api(
            status.as_u16(),
            format!("Request failed: {}", body),
        ))
    }

    fn parse_document(body: &str) -> Result<StoredDocument> {
        StoredDocument::from_wire(serde_json::from_str(body)?)
    }

    async fn write(
        &self,
        request: reqwest::RequestBuilder,
        collection: CloudCollection,
        id: &str,
        mut fields: Map<String, Value>,
        device_id: &str,
    ) -> Result<StoredDocument> {
        fields.insert("id".to_string(), Value::String(id.to_string()));
        fields.insert(
            DEVICE_ID_FIELD.to_string(),
            Value::String(device_id.to_string()),
        );

        let response = request.json(&Value::Object(fields)).send().await?;
        let (status, body) = Self::read_body(response).await?;
        if status == StatusCode::NOT_FOUND {
            return Err(CloudError::not_found(collection, id));
        }
        Self::parse_document(&body)
    }
}

#[async_trait]
impl DocumentStore for RestDocumentStore {
    async fn list(
        &self,
        session: &Session,
        collection: CloudCollection,
    ) -> Result<Vec<StoredDocument>> {
        let response = self
            .client
            .get(self.collection_url(session, collection))
            .headers(self.headers(session, None)?)
            .send()
            .await?;
        let (status, body) = Self::read_body(response).await?;
        if status == StatusCode::NOT_FOUND {
            return missing_collection(collection, &body);
        }

        let listing: ListResponse = serde_json::from_str(&body)?;
        listing
            .documents
            .into_iter()
            .map(StoredDocument::from_wire)
            .collect()
    }

    async fn get(
        &self,
        session: &Session,
        collection: CloudCollection,
        id: &str,
    ) -> Result<Option<StoredDocument>> {
        let response = self
            .client
            .get(self.document_url(session, collection, id))
            .headers(self.headers(session, None)?)
            .send()
            .await?;
        let (status, body) = Self::read_body(response).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::parse_document(&body).map(Some)
    }

    async fn set(
        &self,
        session: &Session,
        collection: CloudCollection,
        id: &str,
        fields: Map<String, Value>,
        device_id: &str,
    ) -> Result<StoredDocument> {
        let request = self
            .client
            .put(self.document_url(session, collection, id))
            .headers(self.headers(session, Some(device_id))?);
        self.write(request, collection, id, fields, device_id).await
    }

    async fn update(
        &self,
        session: &Session,
        collection: CloudCollection,
        id: &str,
        fields: Map<String, Value>,
        device_id: &str,
    ) -> Result<StoredDocument> {
        let request = self
            .client
            .patch(self.document_url(session, collection, id))
            .headers(self.headers(session, Some(device_id))?);
        self.write(request, collection, id, fields, device_id).await
    }

    async fn delete(
        &self,
        session: &Session,
        collection: CloudCollection,
        id: &str,
    ) -> Result<()> {
        let response = self
            .client
            .delete(self.document_url(session, collection, id))
            .headers(self.headers(session, None)?)
            .send()
            .await?;
        let (status, _) = Self::read_body(response).await?;
        if status == StatusCode::NOT_FOUND {
            return Err(CloudError::not_found(collection, id));
        }
        Ok(())
    }

    /// Polls the collection and fires when its fingerprint changes. The first
    /// poll only records a baseline.
    fn watch(
        &self,
        session: &Session,
        collection: CloudCollection,
        on_change: RemoteChangeCallback,
    ) -> Result<Subscription> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| CloudError::unavailable("watching requires a running tokio runtime"))?;

        let store = self.clone();
        let session = session.clone();
        let interval = self.config.poll_interval;

        let task = handle.spawn(async move {
            let mut last_fingerprint: Option<String> = None;
            loop {
                match store.list(&session, collection).await {
                    Ok(docs) => {
                        let fingerprint = listing_fingerprint(&docs);
                        let changed = last_fingerprint
                            .as_ref()
                            .is_some_and(|previous| *previous != fingerprint);
                        last_fingerprint = Some(fingerprint);
                        if changed {
                            debug!("[CloudStorage] Remote change detected in {}", collection);
                            on_change();
                        }
                    }
                    Err(err) => {
                        warn!("[CloudStorage] Polling {} failed: {}", collection, err);
                    }
                }
                sleep(poll_delay_with_jitter(interval)).await;
            }
        });

        Ok(Subscription::new(move || task.abort()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn doc(id: &str, secs: i64) -> StoredDocument {
        StoredDocument {
            id: id.to_string(),
            fields: Map::new(),
            updated_at: Utc.timestamp_opt(secs, 0).single(),
            device_id: None,
        }
    }

    fn store() -> RestDocumentStore {
        RestDocumentStore::new(CloudConfig::new("https://sync.example.com/")).expect("client")
    }

    #[test]
    fn fingerprint_ignores_order_but_tracks_stamps() {
        let a = listing_fingerprint(&[doc("a", 1), doc("b", 2)]);
        let b = listing_fingerprint(&[doc("b", 2), doc("a", 1)]);
        let c = listing_fingerprint(&[doc("a", 1), doc("b", 3)]);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn urls_escape_path_segments() {
        let store = store();
        let session = Session::new("user 1", "token");
        assert_eq!(
            store.document_url(&session, CloudCollection::Transactions, "tx/1"),
            "https://sync.example.com/v1/users/user%201/transactions/tx%2F1"
        );
    }

    #[test]
    fn headers_carry_token_api_key_and_device() {
        let store = RestDocumentStore::new(
            CloudConfig::new("https://sync.example.com").with_api_key("key-1"),
        )
        .expect("client");
        let session = Session::new("user-1", "secret");

        let headers = store.headers(&session, Some("device-9")).expect("headers");

        assert_eq!(headers[AUTHORIZATION], "Bearer secret");
        assert_eq!(headers["x-api-key"], "key-1");
        assert_eq!(headers["x-device-id"], "device-9");
    }

    #[test]
    fn only_an_explicit_missing_collection_lists_as_empty() {
        let absent = r#"{"code":"collection_not_found","message":"no documents"}"#;
        let docs = missing_collection(CloudCollection::Budgets, absent).expect("empty");
        assert!(docs.is_empty());

        let unknown_user = r#"{"code":"user_not_found","message":"no such user"}"#;
        let err = missing_collection(CloudCollection::Budgets, unknown_user).expect_err("user");
        assert!(matches!(err, CloudError::Unavailable(_)));

        let html = "<html><body>Not Found</body></html>";
        let err: finsync_core::Error = missing_collection(CloudCollection::Budgets, html)
            .expect_err("proxy page")
            .into();
        assert!(matches!(err, finsync_core::Error::NotAvailable(_)));
    }

    #[test]
    fn jitter_stays_within_a_fifth_of_the_interval() {
        let delay = poll_delay_with_jitter(Duration::from_secs(10));
        assert!(delay >= Duration::from_secs(10));
        assert!(delay <= Duration::from_secs(12));
    }
}
