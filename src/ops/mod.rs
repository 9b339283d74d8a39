//! The operation layer: every agent-facing tool, assembled from the
//! supervisor primitives in `crate::lsp`.
//!
//! Operations take plain inputs (paths, names, 0-indexed positions) and
//! return serializable result structs. Errors are converted to structured
//! results at this boundary; the agent channel above never sees a raw
//! [`crate::error::BridgeError`].

use std::sync::Arc;

use crate::config::BridgeConfig;
use crate::error::Result;
use crate::lsp::registry::ServerRegistry;

pub mod actions;
pub mod delete;
pub mod diagnostics;
pub mod edits;
pub mod members;
pub mod navigate;
pub mod probe;
pub mod workspace;

/// The core context: the server pool plus the process-wide RPC id space it
/// carries. Created once at startup and passed explicitly; there is no
/// ambient global.
pub struct Bridge {
    pub registry: Arc<ServerRegistry>,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Bridge {
            registry: ServerRegistry::new(config),
        })
    }

    /// Starts every configured server up front instead of on first demand.
    pub async fn preload(&self) {
        let ready = self.registry.ensure_all_ready().await;
        tracing::info!("preloaded {} language server(s)", ready.len());
    }

    pub async fn shutdown(&self) {
        self.registry.shutdown_all().await;
    }
}
