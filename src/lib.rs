pub mod agent;
pub mod config;
pub mod error;
pub mod logging;
pub mod lsp;
pub mod ops;
pub mod uri;
