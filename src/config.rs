use std::{collections::HashMap, fmt::Display, path::Path, str::FromStr, sync::Arc};

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{de, de::DeserializeOwned, Deserialize, Deserializer};
use serde_json::Value;

use crate::{
    binding::{BindingOptions, StorageBinding},
    error::{BindingError, Result},
    multipart::DEFAULT_MIN_PART_SIZE,
    request::parse_bool,
};

/// Prefix of environment variables overriding the component file, e.g.
/// `STORAGE_BINDING_METADATA__BUCKET`.
pub const ENV_PREFIX: &str = "STORAGE_BINDING_";

fn default_min_part_size() -> usize {
    DEFAULT_MIN_PART_SIZE
}

fn default_get_blob_retry_count() -> usize {
    10
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum BindingKind {
    #[serde(rename = "bindings.aws.s3")]
    AwsS3,
    #[serde(rename = "bindings.azure.blobstorage")]
    AzureBlobStorage,
}

/// A binding component definition.
///
/// Metadata may be written either as a map or as a list of `name`/`value`
/// pairs; scalar values of any type are kept as strings.
#[derive(Debug, Clone, Deserialize)]
pub struct ComponentConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: BindingKind,
    #[serde(default, deserialize_with = "metadata_strings")]
    pub metadata: HashMap<String, String>,
}

impl ComponentConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_str = std::fs::read_to_string(path).map_err(|e| {
            BindingError::configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(config_str: &str) -> Result<Self> {
        Figment::new()
            .merge(Yaml::string(config_str))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| BindingError::configuration(e.to_string()))
    }

    /// Connect to the configured store and build the binding.
    pub async fn build(&self) -> Result<StorageBinding> {
        match self.kind {
            BindingKind::AwsS3 => self.build_s3().await,
            BindingKind::AzureBlobStorage => self.build_azure().await,
        }
    }

    #[cfg(feature = "aws")]
    async fn build_s3(&self) -> Result<StorageBinding> {
        let metadata = S3Metadata::parse(&self.metadata)?;
        let options = metadata.binding_options();
        let store = blob_store::S3Store::connect(metadata.into_store_config())
            .await
            .map_err(|e| BindingError::configuration(e.to_string()))?;
        Ok(StorageBinding::new(&self.name, Arc::new(store), options))
    }

    #[cfg(not(feature = "aws"))]
    async fn build_s3(&self) -> Result<StorageBinding> {
        Err(BindingError::configuration(
            "S3 bindings require the `aws` feature",
        ))
    }

    #[cfg(feature = "azure")]
    async fn build_azure(&self) -> Result<StorageBinding> {
        let metadata = AzureMetadata::parse(&self.metadata)?;
        let options = metadata.binding_options();
        let store = blob_store::AzureStore::connect(metadata.into_store_config()?)
            .await
            .map_err(|e| BindingError::configuration(e.to_string()))?;
        Ok(StorageBinding::new(&self.name, Arc::new(store), options))
    }

    #[cfg(not(feature = "azure"))]
    async fn build_azure(&self) -> Result<StorageBinding> {
        Err(BindingError::configuration(
            "Azure bindings require the `azure` feature",
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Metadata {
    pub bucket: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default = "default_min_part_size", deserialize_with = "from_str")]
    pub min_part_size: usize,
    #[serde(default = "default_true", deserialize_with = "bool_from_str")]
    pub reject_existing: bool,
}

impl S3Metadata {
    const FIELDS: &'static [&'static str] = &[
        "bucket",
        "region",
        "endpoint",
        "accessKey",
        "secretKey",
        "sessionToken",
        "minPartSize",
        "rejectExisting",
    ];

    pub fn parse(metadata: &HashMap<String, String>) -> Result<Self> {
        let parsed: Self = typed_metadata(metadata, Self::FIELDS)?;
        // S3 rejects every part but the last below 5 MiB.
        validate_min_part_size(parsed.min_part_size, DEFAULT_MIN_PART_SIZE)?;
        Ok(parsed)
    }

    pub fn binding_options(&self) -> BindingOptions {
        BindingOptions {
            reject_existing: self.reject_existing,
            decode_base64: false,
            unquote_payload: false,
            min_part_size: self.min_part_size,
        }
    }

    #[cfg(feature = "aws")]
    pub fn into_store_config(self) -> blob_store::S3StoreConfig {
        blob_store::S3StoreConfig {
            bucket: self.bucket,
            region: self.region,
            endpoint: self.endpoint,
            access_key: self.access_key,
            secret_key: self.secret_key,
            session_token: self.session_token,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureMetadata {
    pub storage_account: String,
    pub storage_access_key: String,
    pub container: String,
    #[serde(
        default = "default_get_blob_retry_count",
        deserialize_with = "from_str"
    )]
    pub get_blob_retry_count: usize,
    #[serde(default, deserialize_with = "bool_from_str")]
    pub decode_base64: bool,
    #[serde(default)]
    pub public_access_level: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_min_part_size", deserialize_with = "from_str")]
    pub min_part_size: usize,
}

impl AzureMetadata {
    const FIELDS: &'static [&'static str] = &[
        "storageAccount",
        "storageAccessKey",
        "container",
        "getBlobRetryCount",
        "decodeBase64",
        "publicAccessLevel",
        "endpoint",
        "minPartSize",
    ];

    pub fn parse(metadata: &HashMap<String, String>) -> Result<Self> {
        let parsed: Self = typed_metadata(metadata, Self::FIELDS)?;
        validate_min_part_size(parsed.min_part_size, 1)?;
        Ok(parsed)
    }

    pub fn binding_options(&self) -> BindingOptions {
        BindingOptions {
            reject_existing: false,
            decode_base64: self.decode_base64,
            unquote_payload: true,
            min_part_size: self.min_part_size,
        }
    }

    #[cfg(feature = "azure")]
    pub fn into_store_config(self) -> Result<blob_store::AzureStoreConfig> {
        let public_access = self
            .public_access_level
            .parse::<blob_store::ContainerAccess>()
            .map_err(|e| BindingError::configuration(e.to_string()))?;
        Ok(blob_store::AzureStoreConfig {
            account: self.storage_account,
            access_key: self.storage_access_key,
            container: self.container,
            public_access,
            max_retries: Some(self.get_blob_retry_count),
            endpoint: self.endpoint,
        })
    }
}

fn validate_min_part_size(min_part_size: usize, floor: usize) -> Result<()> {
    if min_part_size < floor {
        return Err(BindingError::configuration(format!(
            "minPartSize must be at least {floor} bytes, got {min_part_size}"
        )));
    }
    Ok(())
}

/// Deserialize `T` from a string map whose keys match `fields` without regard
/// to case. Empty values count as absent.
fn typed_metadata<T: DeserializeOwned>(
    metadata: &HashMap<String, String>,
    fields: &[&str],
) -> Result<T> {
    let mut object = serde_json::Map::new();
    for (key, value) in metadata {
        if value.is_empty() {
            continue;
        }
        if let Some(field) = fields.iter().find(|f| f.eq_ignore_ascii_case(key)) {
            object.insert(field.to_string(), Value::String(value.clone()));
        }
    }
    serde_json::from_value(Value::Object(object))
        .map_err(|e| BindingError::configuration(format!("invalid metadata: {}", e)))
}

fn from_str<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let value = String::deserialize(deserializer)?;
    value.trim().parse().map_err(de::Error::custom)
}

fn bool_from_str<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    parse_bool(value.trim())
        .ok_or_else(|| de::Error::custom(format!("invalid boolean: {}", value)))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMetadata {
    Map(HashMap<String, Value>),
    Items(Vec<MetadataItem>),
}

#[derive(Deserialize)]
struct MetadataItem {
    name: String,
    #[serde(default)]
    value: Value,
}

fn metadata_strings<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries: Vec<(String, Value)> = match RawMetadata::deserialize(deserializer)? {
        RawMetadata::Map(map) => map.into_iter().collect(),
        RawMetadata::Items(items) => items.into_iter().map(|i| (i.name, i.value)).collect(),
    };
    Ok(entries
        .into_iter()
        .map(|(name, value)| {
            let value = match value {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (name, value)
        })
        .collect())
}
