//! Durable object storage for published artifacts.

use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::ObjectStore;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub enum StorageConfig {
    /// S3 bucket; credentials and region come from the standard AWS env vars.
    S3 { bucket: String },
    /// A directory on local disk, created if missing.
    Local { root: PathBuf },
    /// Process memory. Artifacts vanish with the process.
    Memory,
}

impl StorageConfig {
    /// Local disk cannot store per-object content types.
    pub fn supports_attributes(&self) -> bool {
        !matches!(self, StorageConfig::Local { .. })
    }
}

pub fn resolve_object_store(cfg: &StorageConfig) -> anyhow::Result<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match cfg {
        StorageConfig::S3 { bucket } => Arc::new(
            AmazonS3Builder::from_env()
                .with_bucket_name(bucket)
                .build()?,
        ),
        StorageConfig::Local { root } => {
            std::fs::create_dir_all(root)?;
            Arc::new(LocalFileSystem::new_with_prefix(root)?)
        }
        StorageConfig::Memory => Arc::new(InMemory::new()),
    };
    Ok(store)
}
