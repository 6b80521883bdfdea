//! Shared service context handed to command handlers.

use std::sync::Arc;

use anyhow::{Context as _, Result};

use crate::domain::models::ProjectConfig;
use crate::domain::ports::StorageBackend;
use crate::infrastructure::config::{model::DEV_SESSION_SECRET, Config};
use crate::infrastructure::storage::create_backend;
use crate::services::{
    AgentService, ProjectService, SessionService, TaskService, TaskTypeService, TokenSigner,
};

/// Everything a command handler needs: configuration, the storage backend,
/// and the service layer built over it.
pub struct CommandContext {
    pub config: Config,
    pub storage: Arc<dyn StorageBackend>,
    pub projects: ProjectService,
    pub task_types: TaskTypeService,
    pub tasks: TaskService,
    pub agents: AgentService,
    pub sessions: SessionService,
}

impl CommandContext {
    pub fn new(config: Config, storage: Arc<dyn StorageBackend>) -> Self {
        let defaults = ProjectConfig {
            default_max_retries: config.default_max_retries,
            default_lease_duration_minutes: config.default_lease_duration,
            reaper_interval_minutes: config.reaper_interval,
        };
        let signer = TokenSigner::new(config.session_secret.as_bytes().to_vec());
        Self {
            projects: ProjectService::new(storage.clone(), defaults),
            task_types: TaskTypeService::new(storage.clone()),
            tasks: TaskService::new(storage.clone()),
            agents: AgentService::new(storage.clone()),
            sessions: SessionService::new(storage.clone(), signer, config.session_timeout),
            storage,
            config,
        }
    }

    /// Build the configured backend and wire the service layer over it.
    pub async fn bootstrap(config: Config) -> Result<Arc<Self>> {
        if config.enable_auth && config.session_secret == DEV_SESSION_SECRET {
            tracing::warn!(
                "FOREMAN_SESSION_SECRET is unset; using the built-in development secret"
            );
        }
        let storage = create_backend(&config)
            .await
            .context("Failed to initialize storage backend")?;
        Ok(Arc::new(Self::new(config, storage)))
    }
}
