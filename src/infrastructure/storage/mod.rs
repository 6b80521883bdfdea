//! Storage backends implementing the [`StorageBackend`] capability
//! contract, selected at startup from configuration.

pub mod file;
pub mod mongo;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::StorageBackend;
use crate::infrastructure::config::{Config, StorageProvider};

/// Build the configured storage backend.
pub async fn create_backend(config: &Config) -> DomainResult<Arc<dyn StorageBackend>> {
    match config.storage_provider {
        StorageProvider::File => {
            let backend = file::FileBackend::new(
                &config.file_data_dir,
                Duration::from_secs(config.file_lock_timeout),
            )?;
            Ok(Arc::new(backend))
        }
        StorageProvider::Mongodb => {
            let uri = config
                .storage_connection_string
                .as_deref()
                .ok_or_else(|| DomainError::validation("mongodb connection string missing"))?;
            let backend = mongo::MongoBackend::connect(uri).await?;
            Ok(Arc::new(backend))
        }
        StorageProvider::Redis => {
            let uri = config
                .storage_connection_string
                .as_deref()
                .ok_or_else(|| DomainError::validation("redis connection string missing"))?;
            let backend = redis::RedisBackend::connect(uri).await?;
            Ok(Arc::new(backend))
        }
    }
}
