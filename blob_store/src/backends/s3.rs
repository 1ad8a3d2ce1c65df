//! S3 object store backend using object_store for data I/O and aws-sdk-s3 for
//! the multipart protocol.

use std::{collections::HashMap, ops::Range, sync::Arc};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Credentials, Region},
    error::SdkError,
    primitives::ByteStream,
    types::{
        BucketLocationConstraint,
        CompletedMultipartUpload,
        CompletedPart as S3CompletedPart,
        CreateBucketConfiguration,
    },
    Client as S3Client,
};
use bytes::Bytes;
use futures::StreamExt;
use object_store::{
    aws::{AmazonS3, AmazonS3Builder},
    path::Path as ObjectPath,
    GetOptions,
    GetRange,
    ObjectStore,
    PutOptions,
};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    metadata::metadata_from_attributes,
    multipart::in_part_number_order,
    BlobError,
    BlobMetadata,
    BlobResult,
    CompletedPart,
    DeleteObjectOptions,
    ListPage,
    ListRequest,
    ListedBlob,
    ObjectStoreAdapter,
    PutObjectOptions,
};

/// Smallest part S3 accepts, except for the last part of an upload.
pub const S3_MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

const DEFAULT_REGION: &str = "us-east-1";

/// Connection settings for [`S3Store`].
#[derive(Debug, Clone, Default)]
pub struct S3StoreConfig {
    pub bucket: String,
    pub region: Option<String>,

    /// Custom endpoint for S3-compatible stores (MinIO, localstack).
    pub endpoint: Option<String>,

    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub session_token: Option<String>,
}

/// S3 object store backend.
pub struct S3Store {
    /// object_store client for data I/O.
    object_store: Arc<AmazonS3>,

    /// AWS SDK S3 client for multipart uploads.
    s3_client: S3Client,

    bucket: String,
    region: String,
    endpoint: Option<String>,
}

impl S3Store {
    /// Build the clients and make sure the bucket exists.
    pub async fn connect(config: S3StoreConfig) -> BlobResult<Self> {
        let store = Self::new(config).await?;
        store.ensure_bucket_exists().await?;
        Ok(store)
    }

    /// Build the clients without touching the network.
    pub async fn new(config: S3StoreConfig) -> BlobResult<Self> {
        if config.bucket.is_empty() {
            return Err(BlobError::Configuration {
                reason: "bucket is required".to_string(),
            });
        }
        let region = config
            .region
            .clone()
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&config.bucket)
            .with_region(&region);
        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            builder = builder
                .with_access_key_id(access_key)
                .with_secret_access_key(secret_key);
        }
        if let Some(token) = &config.session_token {
            builder = builder.with_token(token);
        }
        // For supporting localstack/minio
        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"))
                .with_virtual_hosted_style_request(false);
        }
        let object_store = builder.build().map_err(|e| BlobError::Configuration {
            reason: format!("failed to build S3 client: {}", e),
        })?;

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.clone()))
            .load()
            .await;
        let mut s3_config = S3ConfigBuilder::from(&sdk_config);
        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            s3_config = s3_config.credentials_provider(Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                config.session_token.clone(),
                None,
                "binding-metadata",
            ));
        }
        if let Some(endpoint) = &config.endpoint {
            s3_config = s3_config.endpoint_url(endpoint).force_path_style(true);
        }
        let s3_client = S3Client::from_conf(s3_config.build());

        debug!(bucket = %config.bucket, region = %region, "Created S3 object store");

        Ok(Self {
            object_store: Arc::new(object_store),
            s3_client,
            bucket: config.bucket,
            region,
            endpoint: config.endpoint,
        })
    }

    async fn ensure_bucket_exists(&self) -> BlobResult<()> {
        match self.s3_client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(()),
            Err(SdkError::ServiceError(service_err)) if service_err.err().is_not_found() => {
                info!(bucket = %self.bucket, "bucket not found, creating it");
                let mut request = self.s3_client.create_bucket().bucket(&self.bucket);
                if self.region != DEFAULT_REGION {
                    request = request.create_bucket_configuration(
                        CreateBucketConfiguration::builder()
                            .location_constraint(BucketLocationConstraint::from(
                                self.region.as_str(),
                            ))
                            .build(),
                    );
                }
                match request.send().await {
                    Ok(_) => Ok(()),
                    Err(SdkError::ServiceError(e))
                        if e.err().is_bucket_already_owned_by_you() ||
                            e.err().is_bucket_already_exists() =>
                    {
                        debug!(bucket = %self.bucket, "bucket created concurrently");
                        Ok(())
                    }
                    Err(e) => Err(BlobError::Configuration {
                        reason: format!("failed to create bucket {}: {}", self.bucket, e),
                    }),
                }
            }
            Err(e) => Err(BlobError::Configuration {
                reason: format!("failed to probe bucket {}: {}", self.bucket, e),
            }),
        }
    }

    /// Convert a key to an ObjectPath for object_store.
    fn key_to_path(key: &str) -> ObjectPath {
        ObjectPath::from(key)
    }

    /// Directory-aligned part of a string prefix, usable as an object_store
    /// list prefix.
    fn list_prefix(prefix: Option<&str>) -> Option<ObjectPath> {
        let prefix = prefix?;
        let (dir, _) = prefix.rsplit_once('/')?;
        (!dir.is_empty()).then(|| ObjectPath::from(dir))
    }

    async fn complete_in_part_order(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> BlobResult<()> {
        let completed: Vec<S3CompletedPart> = parts
            .iter()
            .map(|part| {
                S3CompletedPart::builder()
                    .e_tag(&part.tag)
                    .part_number(part.part_number as i32)
                    .build()
            })
            .collect();

        let multipart_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed))
            .build();

        self.s3_client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(multipart_upload)
            .send()
            .await
            .map_err(|e| BlobError::MultipartError {
                reason: format!("Failed to complete multipart upload: {}", e),
            })?;

        Ok(())
    }

    /// Rewrite the committed object at `key` so that its parts follow
    /// `content_order` instead of part-number order.
    ///
    /// The object currently holds the parts concatenated by ascending part
    /// number; each part is copied server side from its byte range.
    async fn rewrite_in_content_order(
        &self,
        key: &str,
        content_order: &[CompletedPart],
    ) -> BlobResult<()> {
        let upload_id = self.create_multipart_upload(key).await?;
        let copy_source = copy_source(&self.bucket, key)?;
        let mut rewritten = Vec::with_capacity(content_order.len());
        for (idx, (part, range)) in copy_ranges(content_order).into_iter().enumerate() {
            let part_number = idx as u32 + 1;
            let output = self
                .s3_client
                .upload_part_copy()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(&upload_id)
                .part_number(part_number as i32)
                .copy_source(&copy_source)
                .copy_source_range(range)
                .send()
                .await;
            let tag = match output {
                Ok(output) => output
                    .copy_part_result()
                    .and_then(|r| r.e_tag())
                    .map(str::to_string),
                Err(e) => {
                    self.abort_rewrite(key, &upload_id).await;
                    return Err(BlobError::MultipartError {
                        reason: format!("Failed to copy part {}: {}", part.part_number, e),
                    });
                }
            };
            let Some(tag) = tag else {
                self.abort_rewrite(key, &upload_id).await;
                return Err(BlobError::multipart("No ETag returned for copied part"));
            };
            rewritten.push(CompletedPart {
                part_number,
                tag,
                size_bytes: part.size_bytes,
            });
        }

        if let Err(e) = self.complete_in_part_order(key, &upload_id, &rewritten).await {
            self.abort_rewrite(key, &upload_id).await;
            return Err(e);
        }
        Ok(())
    }

    async fn abort_rewrite(&self, key: &str, upload_id: &str) {
        if let Err(e) = self.abort_multipart_upload(key, upload_id).await {
            error!(
                key,
                upload_id,
                error = %e,
                "failed to abort content-order rewrite"
            );
        }
    }
}

/// Copy ranges that lay out an object committed in part-number order in
/// `content_order` instead. Ranges are inclusive `bytes=first-last` values.
/// Empty parts add no bytes and get no range.
fn copy_ranges(content_order: &[CompletedPart]) -> Vec<(&CompletedPart, String)> {
    let mut by_number: Vec<&CompletedPart> = content_order.iter().collect();
    by_number.sort_by_key(|p| p.part_number);
    let mut starts = HashMap::with_capacity(by_number.len());
    let mut start = 0u64;
    for part in by_number {
        starts.insert(part.part_number, start);
        start += part.size_bytes;
    }

    content_order
        .iter()
        .filter(|part| part.size_bytes > 0)
        .filter_map(|part| {
            let first = *starts.get(&part.part_number)?;
            let last = first + part.size_bytes - 1;
            Some((part, format!("bytes={}-{}", first, last)))
        })
        .collect()
}

/// `x-amz-copy-source` value for `key`, with every path segment escaped.
fn copy_source(bucket: &str, key: &str) -> BlobResult<String> {
    let invalid = |reason: String| BlobError::InvalidKey {
        key: key.to_string(),
        reason,
    };
    let mut url = Url::parse("s3://copy-source/").map_err(|e| invalid(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| invalid("key cannot be used as a copy source".to_string()))?
        .pop_if_empty()
        .extend(key.split('/'));
    Ok(format!("{}{}", bucket, url.path()))
}

/// S3 only composes parts by part number. Rewriting into content order copies
/// every part as-is, so each one but the last must meet the minimum size.
fn check_reorderable(parts: &[CompletedPart]) -> BlobResult<()> {
    let Some((_, leading)) = parts.split_last() else {
        return Ok(());
    };
    if let Some(small) = leading.iter().find(|p| p.size_bytes < S3_MIN_PART_SIZE) {
        return Err(BlobError::multipart(format!(
            "part {} is {} bytes; out-of-order parts other than the last must be at least {} bytes",
            small.part_number, small.size_bytes, S3_MIN_PART_SIZE
        )));
    }
    Ok(())
}

#[async_trait]
impl ObjectStoreAdapter for S3Store {
    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        options: PutObjectOptions,
    ) -> BlobResult<String> {
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
        if options.snapshots.is_some() {
            debug!(key, "S3 keeps no snapshots, deleting the object only");
        }
        let path = Self::key_to_path(key);
        self.object_store.delete(&path).await?;
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
        if request.include.snapshots || request.include.deleted || request.include.copy {
            debug!("S3 listing ignores snapshot, deleted and copy datasets");
        }
        let prefix = Self::list_prefix(request.prefix.as_deref());
        let mut stream = match &request.marker {
            Some(marker) => self
                .object_store
                .list_with_offset(prefix.as_ref(), &Self::key_to_path(marker)),
            None => self.object_store.list(prefix.as_ref()),
        };

        let page_size = request.page_size();
        let mut blobs = Vec::with_capacity(page_size);
        let mut has_more = false;
        while let Some(meta) = stream.next().await {
            let meta = meta?;
            let name = meta.location.to_string();
            if !request.matches(&name) || !request.after_marker(&name) {
                continue;
            }
            if blobs.len() == page_size {
                has_more = true;
                break;
            }
            let metadata = if request.include.metadata {
                Some(self.head_object(&name).await?.user_metadata)
            } else {
                None
            };
            blobs.push(ListedBlob {
                etag: meta.e_tag,
                last_modified: Some(meta.last_modified),
                metadata,
                ..ListedBlob::new(name, meta.size)
            });
        }

        let next_marker = if has_more {
            blobs.last().map(|b| b.name.clone())
        } else {
            None
        };
        Ok(ListPage { blobs, next_marker })
    }

    async fn create_multipart_upload(&self, key: &str) -> BlobResult<String> {
        let output = self
            .s3_client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| BlobError::MultipartError {
                reason: format!("Failed to create multipart upload: {}", e),
            })?;

        let upload_id = output
            .upload_id()
            .ok_or_else(|| BlobError::MultipartError {
                reason: "No upload ID returned from S3".to_string(),
            })?;

        Ok(upload_id.to_string())
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> BlobResult<String> {
        let content_length = data.len() as i64;
        let output = self
            .s3_client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number as i32)
            .content_length(content_length)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| BlobError::MultipartError {
                reason: format!("Failed to upload part {}: {}", part_number, e),
            })?;

        output
            .e_tag()
            .map(str::to_string)
            .ok_or_else(|| BlobError::multipart("No ETag returned from S3"))
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> BlobResult<()> {
        if in_part_number_order(&parts) {
            return self.complete_in_part_order(key, upload_id, &parts).await;
        }

        check_reorderable(&parts)?;
        let mut by_number = parts.clone();
        by_number.sort_by_key(|p| p.part_number);
        self.complete_in_part_order(key, upload_id, &by_number).await?;

        info!(key, parts = parts.len(), "rewriting S3 object in content order");
        if let Err(e) = self.rewrite_in_content_order(key, &parts).await {
            warn!(key, error = %e, "content-order rewrite failed, removing object");
            if let Err(delete_err) = self.delete_object(key, Default::default()).await {
                warn!(key, error = %delete_err, "failed to remove misordered object");
            }
            return Err(e);
        }
        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> BlobResult<()> {
        self.s3_client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| BlobError::MultipartError {
                reason: format!("Failed to abort multipart upload: {}", e),
            })?;

        Ok(())
    }

    fn object_url(&self, key: &str) -> String {
        match &self.endpoint {
            Some(endpoint) => format!("{}/{}/{}", endpoint.trim_end_matches('/'), self.bucket, key),
            None => format!("https://{}.s3.{}.amazonaws.com/{}", self.bucket, self.region, key),
        }
    }
}
