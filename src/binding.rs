use std::{ops::Range, sync::Arc};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use blob_store::{
    DeleteObjectOptions,
    DeleteSnapshots,
    ListInclude,
    ListRequest,
    ListedBlob,
    ObjectStoreAdapter,
    PutObjectOptions,
    MAX_PAGE_SIZE,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    error::{BindingError, Result},
    metrics::BindingMetrics,
    multipart::{MultipartSessionManager, PutOutcome, DEFAULT_MIN_PART_SIZE},
    request::*,
};

/// A component the host runtime sends operations to.
#[async_trait]
pub trait OutputBinding: Send + Sync {
    fn operations(&self) -> Vec<OperationKind>;

    async fn invoke(&self, request: InvokeRequest) -> Result<InvokeResponse>;
}

/// Behaviour that differs between the S3 and Azure flavours of the binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingOptions {
    /// `create` fails when the key is already taken.
    pub reject_existing: bool,

    /// `create` payloads are base64 text.
    pub decode_base64: bool,

    /// `create` payloads that are JSON string literals are stored unquoted.
    pub unquote_payload: bool,

    pub min_part_size: usize,
}

impl Default for BindingOptions {
    fn default() -> Self {
        Self {
            reject_existing: false,
            decode_base64: false,
            unquote_payload: false,
            min_part_size: DEFAULT_MIN_PART_SIZE,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CreateResponse {
    #[serde(rename = "blobURL")]
    blob_url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ListPayload {
    marker: String,
    prefix: String,
    max_results: usize,
    include: ListInclude,
}

/// Output binding over one bucket or container.
pub struct StorageBinding {
    name: String,
    store: Arc<dyn ObjectStoreAdapter>,
    sessions: MultipartSessionManager,
    options: BindingOptions,
    metrics: Option<BindingMetrics>,
}

impl StorageBinding {
    pub fn new(name: &str, store: Arc<dyn ObjectStoreAdapter>, options: BindingOptions) -> Self {
        let sessions =
            MultipartSessionManager::with_min_part_size(store.clone(), options.min_part_size);
        Self {
            name: name.to_string(),
            store,
            sessions,
            options,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: BindingMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sessions(&self) -> &MultipartSessionManager {
        &self.sessions
    }

    async fn dispatch(&self, request: InvokeRequest) -> Result<InvokeResponse> {
        match request.operation {
            OperationKind::Create => self.create(request).await,
            OperationKind::Get => self.get(request).await,
            OperationKind::Delete => self.delete(request).await,
            OperationKind::List => self.list(request).await,
            OperationKind::Head => self.head(request).await,
            OperationKind::Put => self.put(request).await,
            OperationKind::PutBlockList => self.complete(request).await,
            OperationKind::Abort => self.abort(request).await,
        }
    }

    async fn create(&self, request: InvokeRequest) -> Result<InvokeResponse> {
        let op = OperationKind::Create;
        let key = match request.get(METADATA_KEY_BLOB_NAME) {
            Some(key) => key.to_string(),
            None => {
                let key = Uuid::new_v4().to_string();
                debug!(blob_key = %key, "blobName not set, generated key");
                key
            }
        };

        let content_md5 = request
            .get(METADATA_KEY_CONTENT_MD5)
            .map(parse_content_md5)
            .transpose()?;

        if self.options.reject_existing {
            match self.store.head_object(&key).await {
                Ok(_) => return Err(BindingError::AlreadyExists { key }),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(BindingError::store(op, &key, e)),
            }
        }

        let data = self.decode_payload(request.data.clone())?;
        let options = PutObjectOptions {
            content_type: request.get(METADATA_KEY_CONTENT_TYPE).map(String::from),
            content_encoding: request.get(METADATA_KEY_CONTENT_ENCODING).map(String::from),
            content_language: request.get(METADATA_KEY_CONTENT_LANGUAGE).map(String::from),
            content_disposition: request
                .get(METADATA_KEY_CONTENT_DISPOSITION)
                .map(String::from),
            cache_control: request.get(METADATA_KEY_CACHE_CONTROL).map(String::from),
            content_md5,
            metadata: request.user_metadata(),
        };
        let size = data.len();
        let blob_url = self
            .store
            .put_object(&key, data, options)
            .await
            .map_err(|e| BindingError::store(op, &key, e))?;
        debug!(blob_key = %key, size, "created blob");

        Ok(InvokeResponse::default()
            .with_data(serde_json::to_vec(&CreateResponse { blob_url })?)
            .with_metadata(METADATA_KEY_BLOB_NAME, key))
    }

    fn decode_payload(&self, data: Bytes) -> Result<Bytes> {
        let mut data = data;
        if self.options.unquote_payload {
            if let Ok(unquoted) = serde_json::from_slice::<String>(&data) {
                data = Bytes::from(unquoted);
            }
        }
        if self.options.decode_base64 {
            let decoded = BASE64.decode(&data).map_err(|e| {
                BindingError::validation(format!("payload is not valid base64: {}", e))
            })?;
            data = Bytes::from(decoded);
        }
        Ok(data)
    }

    async fn get(&self, request: InvokeRequest) -> Result<InvokeResponse> {
        let op = OperationKind::Get;
        let key = request.blob_name()?;
        let include_metadata = request.get_bool(METADATA_KEY_INCLUDE_METADATA)?;
        let range = parse_range(
            request.get(METADATA_KEY_OFFSET),
            request.get(METADATA_KEY_COUNT),
        );

        let data = self
            .store
            .get_object(key, range)
            .await
            .map_err(|e| BindingError::store(op, key, e))?;
        let mut response = InvokeResponse::default().with_data(data.to_vec());

        if include_metadata {
            let metadata = self
                .store
                .head_object(key)
                .await
                .map_err(|e| BindingError::store(op, key, e))?;
            response.metadata.extend(metadata.user_metadata);
        }
        Ok(response)
    }

    async fn delete(&self, request: InvokeRequest) -> Result<InvokeResponse> {
        let key = request.blob_name()?;
        let snapshots = request
            .get(METADATA_KEY_DELETE_SNAPSHOTS)
            .map(|value| value.parse::<DeleteSnapshots>())
            .transpose()
            .map_err(BindingError::validation)?;
        self.store
            .delete_object(key, DeleteObjectOptions { snapshots })
            .await
            .map_err(|e| BindingError::store(OperationKind::Delete, key, e))?;
        Ok(InvokeResponse::default())
    }

    async fn head(&self, request: InvokeRequest) -> Result<InvokeResponse> {
        let key = request.blob_name()?;
        let metadata = self
            .store
            .head_object(key)
            .await
            .map_err(|e| BindingError::store(OperationKind::Head, key, e))?;
        Ok(InvokeResponse::default()
            .with_metadata(METADATA_KEY_CONTENT_LENGTH, metadata.size_bytes))
    }

    async fn list(&self, request: InvokeRequest) -> Result<InvokeResponse> {
        let payload: ListPayload = if request.data.is_empty() {
            ListPayload::default()
        } else {
            serde_json::from_slice(&request.data)?
        };
        let total = match payload.max_results {
            0 => MAX_PAGE_SIZE,
            n => n,
        };
        let prefix = Some(payload.prefix).filter(|p| !p.is_empty());
        let mut marker = Some(payload.marker).filter(|m| !m.is_empty());

        let mut blobs: Vec<ListedBlob> = Vec::new();
        loop {
            let round = ListRequest {
                prefix: prefix.clone(),
                marker: marker.clone(),
                max_results: (total - blobs.len()).min(MAX_PAGE_SIZE),
                include: payload.include,
            };
            let page = self.store.list_objects(&round).await.map_err(|e| {
                BindingError::store(OperationKind::List, prefix.as_deref().unwrap_or_default(), e)
            })?;
            let empty = page.blobs.is_empty();
            blobs.extend(page.blobs);
            marker = page.next_marker;
            if marker.is_none() || empty || blobs.len() >= total {
                break;
            }
        }

        let number = blobs.len();
        Ok(InvokeResponse::default()
            .with_data(serde_json::to_vec(&blobs)?)
            .with_metadata(METADATA_KEY_MARKER, marker.unwrap_or_default())
            .with_metadata(METADATA_KEY_NUMBER, number))
    }

    async fn put(&self, request: InvokeRequest) -> Result<InvokeResponse> {
        let key = request.blob_name()?;
        let offset = request
            .get(METADATA_KEY_OFFSET)
            .ok_or_else(|| BindingError::validation("offset is required"))?;
        let offset: u64 = offset.parse().map_err(|_| {
            BindingError::validation(format!(
                "offset must be a non-negative integer, got {}",
                offset
            ))
        })?;
        let data = request
            .metadata
            .get(METADATA_KEY_DATA)
            .ok_or_else(|| BindingError::validation("data is required"))?;
        let chunk = hex::decode(data)
            .map_err(|e| BindingError::validation(format!("data is not valid hex: {}", e)))?;

        let response = match self.sessions.put(key, offset, Bytes::from(chunk)).await? {
            PutOutcome::Buffered { buffered_bytes } => {
                InvokeResponse::default().with_metadata(METADATA_KEY_BUFFERED_BYTES, buffered_bytes)
            }
            PutOutcome::Flushed { part_number, .. } => {
                InvokeResponse::default().with_metadata(METADATA_KEY_PART_NUMBER, part_number)
            }
        };
        Ok(response)
    }

    async fn complete(&self, request: InvokeRequest) -> Result<InvokeResponse> {
        let key = request.blob_name()?;
        let outcome = self.sessions.complete(key).await?;
        Ok(InvokeResponse::default()
            .with_metadata(METADATA_KEY_PARTS, outcome.parts)
            .with_metadata(METADATA_KEY_SIZE, outcome.size_bytes))
    }

    async fn abort(&self, request: InvokeRequest) -> Result<InvokeResponse> {
        let key = request.blob_name()?;
        let aborted = self.sessions.abort(key).await?;
        Ok(InvokeResponse::default().with_metadata(METADATA_KEY_ABORTED, aborted))
    }
}

#[async_trait]
impl OutputBinding for StorageBinding {
    fn operations(&self) -> Vec<OperationKind> {
        OperationKind::iter().collect()
    }

    async fn invoke(&self, mut request: InvokeRequest) -> Result<InvokeResponse> {
        request.normalize_metadata();
        let operation = request.operation;
        let _timer = self
            .metrics
            .as_ref()
            .map(|m| m.time(&self.name, operation));

        let result = self.dispatch(request).await;
        if let Err(e) = &result {
            warn!(binding = %self.name, %operation, error = %e, "binding operation failed");
            if let Some(metrics) = &self.metrics {
                metrics.record_error(&self.name, operation, e);
            }
        }
        result
    }
}

/// Content-MD5 values are the base64 form of a 128-bit digest.
fn parse_content_md5(value: &str) -> Result<[u8; 16]> {
    BASE64
        .decode(value)
        .ok()
        .and_then(|digest| <[u8; 16]>::try_from(digest).ok())
        .ok_or_else(|| {
            BindingError::validation(
                "the MD5 value specified in contentMD5 is invalid, \
                 MD5 value must be 128 bits and base64 encoded",
            )
        })
}

/// Byte range of a ranged read. Both values must parse and the count must be
/// positive, anything else reads the whole object.
fn parse_range(offset: Option<&str>, count: Option<&str>) -> Option<Range<u64>> {
    let offset: u64 = offset?.parse().ok()?;
    let count: u64 = count?.parse().ok()?;
    if count == 0 {
        return None;
    }
    Some(offset..offset.checked_add(count)?)
}
