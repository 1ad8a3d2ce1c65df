//! Azure Blob Storage backend using object_store for data I/O and block
//! uploads, and azure_storage_blobs for container provisioning, listings and
//! the blob options object_store does not carry.

use std::{num::NonZeroU32, ops::Range, str::FromStr, sync::Arc};

use async_trait::async_trait;
use azure_core::request_options::Metadata;
use azure_storage::{CloudLocation, ErrorKind, StorageCredentials};
use azure_storage_blobs::prelude::*;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use object_store::{
    azure::{MicrosoftAzure, MicrosoftAzureBuilder},
    multipart::{MultipartStore, PartId},
    path::Path as ObjectPath,
    GetOptions,
    GetRange,
    ObjectStore,
    PutOptions,
    RetryConfig,
};
use tracing::{debug, info, warn};

use crate::{
    metadata::metadata_from_attributes,
    BlobError,
    BlobMetadata,
    BlobResult,
    CompletedPart,
    DeleteObjectOptions,
    DeleteSnapshots,
    ListInclude,
    ListPage,
    ListRequest,
    ListedBlob,
    ObjectStoreAdapter,
    PutObjectOptions,
};

pub const DEFAULT_MAX_RETRIES: usize = 10;

/// Anonymous read access granted on a freshly created container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContainerAccess {
    #[default]
    Private,
    Blob,
    Container,
}

impl FromStr for ContainerAccess {
    type Err = BlobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "none" | "private" => Ok(ContainerAccess::Private),
            "blob" => Ok(ContainerAccess::Blob),
            "container" => Ok(ContainerAccess::Container),
            other => Err(BlobError::Configuration {
                reason: format!(
                    "invalid public access level: {}; allowed: none, blob, container",
                    other
                ),
            }),
        }
    }
}

impl From<ContainerAccess> for PublicAccess {
    fn from(access: ContainerAccess) -> Self {
        match access {
            ContainerAccess::Private => PublicAccess::None,
            ContainerAccess::Blob => PublicAccess::Blob,
            ContainerAccess::Container => PublicAccess::Container,
        }
    }
}

/// Connection settings for [`AzureStore`].
#[derive(Debug, Clone, Default)]
pub struct AzureStoreConfig {
    pub account: String,
    pub access_key: String,
    pub container: String,
    pub public_access: ContainerAccess,

    /// Retries applied to every request, reads included.
    pub max_retries: Option<usize>,

    /// Blob service endpoint override (Azurite or sovereign clouds).
    pub endpoint: Option<String>,
}

/// Azure Blob Storage backend.
pub struct AzureStore {
    /// object_store client for data I/O and block uploads.
    object_store: Arc<MicrosoftAzure>,

    /// Azure storage client for container management.
    blob_service_client: BlobServiceClient,

    account: String,
    container: String,
    public_access: ContainerAccess,
    endpoint: Option<String>,
}

impl AzureStore {
    /// Build the clients and create the container if it is missing.
    pub async fn connect(config: AzureStoreConfig) -> BlobResult<Self> {
        let store = Self::new(config)?;
        store.ensure_container_exists().await;
        Ok(store)
    }

    /// Build the clients without touching the network.
    pub fn new(config: AzureStoreConfig) -> BlobResult<Self> {
        for (field, value) in [
            ("account", &config.account),
            ("access key", &config.access_key),
            ("container", &config.container),
        ] {
            if value.is_empty() {
                return Err(BlobError::Configuration {
                    reason: format!("storage {} is required", field),
                });
            }
        }

        let retry = RetryConfig {
            max_retries: config.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            ..Default::default()
        };
        let mut builder = MicrosoftAzureBuilder::new()
            .with_account(&config.account)
            .with_access_key(&config.access_key)
            .with_container_name(&config.container)
            .with_retry(retry);
        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(endpoint.starts_with("http://"));
        }
        let object_store = builder.build().map_err(|e| BlobError::Configuration {
            reason: format!("failed to build Azure client: {}", e),
        })?;

        let credentials =
            StorageCredentials::access_key(config.account.clone(), config.access_key.clone());
        let blob_service_client = match &config.endpoint {
            Some(endpoint) => {
                let location = CloudLocation::Custom {
                    account: config.account.clone(),
                    uri: endpoint.trim_end_matches('/').to_string(),
                };
                ClientBuilder::with_location(location, credentials).blob_service_client()
            }
            None => BlobServiceClient::new(&config.account, credentials),
        };

        debug!(
            account = %config.account,
            container = %config.container,
            "Created Azure blob store"
        );

        Ok(Self {
            object_store: Arc::new(object_store),
            blob_service_client,
            account: config.account,
            container: config.container,
            public_access: config.public_access,
            endpoint: config.endpoint,
        })
    }

    /// Creating an existing container fails; that and any other failure is
    /// logged and otherwise ignored.
    async fn ensure_container_exists(&self) {
        let result = self
            .container_client()
            .create()
            .public_access(PublicAccess::from(self.public_access))
            .await;
        match result {
            Ok(_) => info!(container = %self.container, "created container"),
            Err(e) => warn!(
                container = %self.container,
                error = %e,
                "container create skipped"
            ),
        }
    }

    fn container_client(&self) -> ContainerClient {
        self.blob_service_client.container_client(&self.container)
    }

    /// Upload through the blob API, which carries a Content-MD5 the service
    /// verifies and stores with the blob.
    async fn put_block_blob(
        &self,
        key: &str,
        data: Bytes,
        options: PutObjectOptions,
        md5: [u8; 16],
    ) -> BlobResult<()> {
        let mut builder = self
            .container_client()
            .blob_client(key)
            .put_block_blob(data)
            .hash(md5);
        if let Some(content_type) = options.content_type {
            builder = builder.content_type(content_type);
        }
        if let Some(content_encoding) = options.content_encoding {
            builder = builder.content_encoding(content_encoding);
        }
        if let Some(content_language) = options.content_language {
            builder = builder.content_language(content_language);
        }
        if let Some(content_disposition) = options.content_disposition {
            builder = builder.content_disposition(content_disposition);
        }
        if options.cache_control.is_some() {
            debug!(key, "cacheControl is not sent with an MD5-checked upload");
        }
        if !options.metadata.is_empty() {
            let mut metadata = Metadata::new();
            for (name, value) in options.metadata {
                metadata.insert(name, value);
            }
            builder = builder.metadata(metadata);
        }
        builder.await.map_err(|e| azure_error(key, e))?;
        Ok(())
    }

    /// Convert a key to an ObjectPath for object_store.
    fn key_to_path(key: &str) -> ObjectPath {
        ObjectPath::from(key)
    }

    /// object_store numbers blocks from zero.
    fn part_index(part_number: u32) -> BlobResult<usize> {
        part_number
            .checked_sub(1)
            .map(|idx| idx as usize)
            .ok_or_else(|| BlobError::multipart("part numbers start from 1"))
    }
}

#[async_trait]
impl ObjectStoreAdapter for AzureStore {
    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        options: PutObjectOptions,
    ) -> BlobResult<String> {
        if let Some(md5) = options.content_md5 {
            self.put_block_blob(key, data, options, md5).await?;
            return Ok(self.object_url(key));
        }
        let path = Self::key_to_path(key);
        let opts = PutOptions {
            attributes: options.to_attributes(),
            ..Default::default()
        };
        self.object_store.put_opts(&path, data.into(), opts).await?;
        Ok(self.object_url(key))
    }

    async fn get_object(&self, key: &str, range: Option<Range<u64>>) -> BlobResult<Bytes> {
        let path = Self::key_to_path(key);
        let options = GetOptions {
            range: range.map(GetRange::Bounded),
            ..Default::default()
        };

        let result = self.object_store.get_opts(&path, options).await?;
        let bytes = result.bytes().await?;
        Ok(bytes)
    }

    async fn delete_object(&self, key: &str, options: DeleteObjectOptions) -> BlobResult<()> {
        let Some(snapshots) = options.snapshots else {
            let path = Self::key_to_path(key);
            self.object_store.delete(&path).await?;
            return Ok(());
        };
        self.container_client()
            .blob_client(key)
            .delete()
            .delete_snapshots_method(delete_snapshots_method(snapshots))
            .await
            .map_err(|e| azure_error(key, e))?;
        Ok(())
    }

    async fn head_object(&self, key: &str) -> BlobResult<BlobMetadata> {
        let path = Self::key_to_path(key);
        let options = GetOptions {
            head: true,
            ..Default::default()
        };
        let result = self.object_store.get_opts(&path, options).await?;
        Ok(metadata_from_attributes(&result.meta, &result.attributes))
    }

    async fn list_objects(&self, request: &ListRequest) -> BlobResult<ListPage> {
        let include = request.include;
        let mut builder = self
            .container_client()
            .list_blobs()
            .include_copy(include.copy)
            .include_metadata(include.metadata)
            .include_snapshots(include.snapshots)
            .include_uncommitted_blobs(include.uncommitted_blobs)
            .include_deleted(include.deleted);
        if let Some(prefix) = &request.prefix {
            builder = builder.prefix(prefix.clone());
        }
        if let Some(marker) = &request.marker {
            builder = builder.marker(marker.clone());
        }
        if let Some(max_results) = NonZeroU32::new(request.page_size() as u32) {
            builder = builder.max_results(max_results);
        }

        let mut pages = builder.into_stream();
        let Some(page) = pages.next().await else {
            return Ok(ListPage::default());
        };
        let prefix = request.prefix.as_deref().unwrap_or_default();
        let page = page.map_err(|e| azure_error(prefix, e))?;
        let blobs = page
            .blobs
            .blobs()
            .map(|blob| listed_blob(blob, &include))
            .collect();
        Ok(ListPage {
            blobs,
            next_marker: page.next_marker.map(|m| m.as_str().to_string()),
        })
    }

    async fn create_multipart_upload(&self, key: &str) -> BlobResult<String> {
        // Block blobs have no server-side session; staged blocks hang off the
        // blob name until a block list is committed.
        let path = Self::key_to_path(key);
        let id = self
            .object_store
            .create_multipart(&path)
            .await
            .map_err(|e| BlobError::MultipartError {
                reason: format!("Failed to create multipart upload: {}", e),
            })?;
        Ok(id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> BlobResult<String> {
        let path = Self::key_to_path(key);
        let part_idx = Self::part_index(part_number)?;
        let upload_id = upload_id.to_string();
        let part = self
            .object_store
            .put_part(&path, &upload_id, part_idx, data.into())
            .await
            .map_err(|e| BlobError::MultipartError {
                reason: format!("Failed to upload part {}: {}", part_number, e),
            })?;
        Ok(part.content_id)
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> BlobResult<()> {
        // The committed block list defines the blob content, in list order.
        let path = Self::key_to_path(key);
        let upload_id = upload_id.to_string();
        let block_list = parts
            .into_iter()
            .map(|part| PartId {
                content_id: part.tag,
            })
            .collect();
        self.object_store
            .complete_multipart(&path, &upload_id, block_list)
            .await
            .map_err(|e| BlobError::MultipartError {
                reason: format!("Failed to commit block list: {}", e),
            })?;
        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> BlobResult<()> {
        let path = Self::key_to_path(key);
        let upload_id = upload_id.to_string();
        // Uncommitted blocks are garbage collected by the service.
        if let Err(e) = self.object_store.abort_multipart(&path, &upload_id).await {
            warn!(key, error = %e, "failed to abort block upload");
        }
        Ok(())
    }

    fn object_url(&self, key: &str) -> String {
        match &self.endpoint {
            Some(endpoint) => format!(
                "{}/{}/{}",
                endpoint.trim_end_matches('/'),
                self.container,
                key
            ),
            None => format!(
                "https://{}.blob.core.windows.net/{}/{}",
                self.account, self.container, key
            ),
        }
    }
}

fn delete_snapshots_method(snapshots: DeleteSnapshots) -> DeleteSnapshotsMethod {
    match snapshots {
        DeleteSnapshots::Include => DeleteSnapshotsMethod::Include,
        DeleteSnapshots::Only => DeleteSnapshotsMethod::Only,
    }
}

fn azure_error(key: &str, err: azure_storage::Error) -> BlobError {
    match err.kind() {
        ErrorKind::HttpResponse { status, .. } if *status as u16 == 404 => BlobError::NotFound {
            key: key.to_string(),
        },
        _ => BlobError::NetworkError {
            source: anyhow::Error::from(err),
        },
    }
}

fn listed_blob(blob: &Blob, include: &ListInclude) -> ListedBlob {
    let properties = &blob.properties;
    let last_modified = DateTime::<Utc>::from_timestamp(
        properties.last_modified.unix_timestamp(),
        properties.last_modified.nanosecond(),
    );
    // Snapshot ids are opaque timestamps; serde exposes the raw string.
    let snapshot = blob
        .snapshot
        .as_ref()
        .and_then(|s| serde_json::to_value(s).ok())
        .and_then(|v| v.as_str().map(str::to_string));
    ListedBlob {
        etag: Some(properties.etag.to_string()),
        last_modified,
        metadata: include
            .metadata
            .then(|| blob.metadata.clone().unwrap_or_default()),
        snapshot,
        deleted: blob.deleted.unwrap_or(false),
        copy_source: properties.copy_source.clone(),
        ..ListedBlob::new(blob.name.clone(), properties.content_length)
    }
}
