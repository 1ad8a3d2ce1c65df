use std::sync::Arc;

use blob_store::MemoryStore;
use tracing::subscriber;
use tracing_subscriber::{layer::SubscriberExt, Layer};

use crate::binding::{BindingOptions, StorageBinding};

/// Part threshold used by tests; small enough to keep payloads tiny.
pub const TEST_MIN_PART_SIZE: usize = 16;

pub struct TestBinding {
    pub store: Arc<MemoryStore>,
    pub binding: StorageBinding,
}

impl TestBinding {
    pub fn new(options: BindingOptions) -> Self {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"));
        let _ = subscriber::set_global_default(
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().with_filter(env_filter)),
        );

        let store = Arc::new(MemoryStore::new());
        let binding = StorageBinding::new("test", store.clone(), options);
        Self { store, binding }
    }

    /// Binding with the store's real 5 MiB part threshold.
    pub fn with_default_part_size() -> Self {
        Self::new(BindingOptions::default())
    }

    pub fn with_small_parts() -> Self {
        Self::new(BindingOptions {
            min_part_size: TEST_MIN_PART_SIZE,
            ..Default::default()
        })
    }
}
