//! Testing utilities and mock implementations.
//!
//! Mock implementations of the external collaborator traits, so the booking
//! engine, streaming transfers and HTTP surface can be tested without catalog
//! tooling, a token server or real transfer processes.
//!
//! # Example
//!
//! ```rust,ignore
//! use fileport_core::testing::{MockCatalog, MockProcessRunner, MockProxyIssuer};
//!
//! let runner = Arc::new(MockProcessRunner::new());
//! let catalog = Arc::new(MockCatalog::new(runner.clone()));
//! let issuer = Arc::new(MockProxyIssuer::new());
//!
//! catalog.add_file("/grid/gridit/sgfs/astro/alice/data.csv", vec![0u8; 1000]).await;
//! ```

mod mock_catalog;
mod mock_process_runner;
mod mock_proxy_issuer;

pub use mock_catalog::{MockCatalog, RecordedRegistration};
pub use mock_process_runner::MockProcessRunner;
pub use mock_proxy_issuer::MockProxyIssuer;

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::PathBuf;

    use crate::catalog::CatalogContext;
    use crate::config::{ApplicationConfig, Config, InfrastructureConfig, UserConfig};

    /// Infrastructure `gridit` with vo `gridit`.
    pub fn infrastructure() -> InfrastructureConfig {
        InfrastructureConfig {
            name: "gridit".to_string(),
            description: "Test infrastructure".to_string(),
            proxy_host: "etoken.example.org".to_string(),
            proxy_port: 8082,
            proxy_id: "332576f78a4fe70a52048043e90cd11f".to_string(),
            vo: "gridit".to_string(),
            role: "gridit".to_string(),
            proxy_renewal: true,
            info_system: "bdii.example.org:2170".to_string(),
            catalog_host: "lfc.example.org".to_string(),
        }
    }

    /// Application `astro` on `gridit`, user `alice`, rooted in `root`.
    pub fn config(root: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.database.path = root.join("fileport.db");
        config.staging.root = root.join("staging");
        config.staging.sync_wait_attempts = 3;
        config.staging.sync_wait_interval_ms = 10;
        config.staging.growth_poll_interval_ms = 10;
        config.proxy.dir = root.join("proxies");
        config.registry.infrastructures = vec![infrastructure()];
        config.registry.applications = vec![ApplicationConfig {
            name: "astro".to_string(),
            catalog_dir: "astro".to_string(),
            infrastructure: "gridit".to_string(),
        }];
        config.registry.users = vec![
            UserConfig {
                name: "alice".to_string(),
            },
            UserConfig {
                name: "bob".to_string(),
            },
        ];
        config
    }

    /// Catalog context for alice in astro.
    pub fn catalog_context() -> CatalogContext {
        CatalogContext {
            info_system: "bdii.example.org:2170".to_string(),
            catalog_host: "lfc.example.org".to_string(),
            proxy_path: PathBuf::from("/tmp/proxy-test"),
            vo: "gridit".to_string(),
            app_dir: "astro".to_string(),
            user_name: "alice".to_string(),
        }
    }

    /// Logical path of alice's file `name` in astro.
    pub fn scoped_path(name: &str) -> String {
        format!("/grid/gridit/sgfs/astro/alice/{}", name)
    }
}
