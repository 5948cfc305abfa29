use std::sync::Arc;
use fileport_core::{Config, FileService, SanitizedConfig};

/// Shared application state
pub struct AppState {
    config: Config,
    service: Arc<FileService>,
}

impl AppState {
    pub fn new(config: Config, service: Arc<FileService>) -> Self {
        Self { config, service }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn service(&self) -> &FileService {
        self.service.as_ref()
    }
}
