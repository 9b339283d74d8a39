//! In-memory server configuration model.
//!
//! The bridge is configured with a list of language server definitions, each
//! owning a set of file extensions. The file format and discovery path live
//! in `main.rs`; the core only ever sees the deserialized values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BridgeError, Result};

/// Minimum restart interval. Sub-minute values are useful in tests, but a
/// zero or negative interval would respawn the child in a tight loop.
const MIN_RESTART_MINUTES: f64 = 0.1;

/// A single language server definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// File extensions (without the dot) routed to this server.
    pub extensions: Vec<String>,
    /// Full command line: executable followed by its arguments.
    pub command: Vec<String>,
    /// Workspace root handed to the server. Defaults to the process cwd.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_dir: Option<PathBuf>,
    /// Restart interval in minutes. Unset means the child lives forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_interval: Option<f64>,
    /// Server-specific settings forwarded verbatim in the `initialize`
    /// request's `initializationOptions`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialization_options: Option<Value>,
}

impl ServerConfig {
    /// Registry key: identical configs collapse to one child process.
    pub fn key(&self) -> String {
        serde_json::to_string(self).expect("server config serializes")
    }

    /// The workspace root this server is anchored to.
    pub fn resolved_root(&self) -> PathBuf {
        self.root_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    /// Restart delay with the documented floor, if restarts are enabled.
    pub fn restart_delay(&self) -> Option<Duration> {
        self.restart_interval
            .map(|minutes| Duration::from_secs_f64(minutes.max(MIN_RESTART_MINUTES) * 60.0))
    }

    /// Whether this server is responsible for the given extension.
    pub fn handles_extension(&self, ext: &str) -> bool {
        self.extensions.iter().any(|e| e == ext)
    }

    fn validate(&self) -> Result<()> {
        if self.command.is_empty() {
            return Err(BridgeError::Configuration(
                "server command must not be empty".to_string(),
            ));
        }
        if self.extensions.is_empty() {
            return Err(BridgeError::Configuration(format!(
                "server {:?} declares no file extensions",
                self.command[0]
            )));
        }
        Ok(())
    }
}

/// Top-level configuration: the ordered list of server definitions. Routing
/// picks the first config whose extension set matches, so order matters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub servers: Vec<ServerConfig>,
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(BridgeError::Configuration(
                "no language servers configured".to_string(),
            ));
        }
        for server in &self.servers {
            server.validate()?;
        }
        Ok(())
    }

    /// First config responsible for the extension, in declaration order.
    pub fn server_for_extension(&self, ext: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.handles_extension(ext))
    }
}

/// Extension taken from the last dot-separated segment of the basename.
pub fn file_extension(path: &Path) -> Option<&str> {
    path.file_name()?.to_str()?.rsplit('.').next()
}

/// LSP `languageId` for a path, falling back to `plaintext` for anything the
/// table does not know about.
pub fn language_id_for(path: &Path) -> &'static str {
    match file_extension(path).unwrap_or("") {
        "rs" => "rust",
        "ts" | "mts" | "cts" => "typescript",
        "tsx" => "typescriptreact",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "javascriptreact",
        "py" | "pyi" => "python",
        "go" => "go",
        "c" => "c",
        "h" | "hpp" | "hh" | "cpp" | "cc" | "cxx" => "cpp",
        "java" => "java",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "kt" | "kts" => "kotlin",
        "scala" => "scala",
        "lua" => "lua",
        "sh" | "bash" | "zsh" => "shellscript",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "md" | "markdown" => "markdown",
        "html" | "htm" => "html",
        "css" => "css",
        "scss" => "scss",
        "sql" => "sql",
        "xml" => "xml",
        "zig" => "zig",
        "hs" => "haskell",
        "ml" | "mli" => "ocaml",
        "ex" | "exs" => "elixir",
        "erl" => "erlang",
        "vue" => "vue",
        "svelte" => "svelte",
        "tf" => "terraform",
        "proto" => "proto",
        "dart" => "dart",
        _ => "plaintext",
    }
}
