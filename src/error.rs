use thiserror::Error;

/// Error kinds surfaced by the supervisor core and the operation layer.
///
/// Every operation entry point catches these and converts them into a
/// structured result for the agent channel; callers above the operation
/// boundary never see a raw error.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// No server configured for a file's extension, or a bad config at
    /// startup. Fatal at startup, per-call otherwise.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Malformed framing or a broken pipe. The child is treated as crashed
    /// and restarted on next demand.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed JSON or missing fields in an LSP response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An outbound request exceeded its timeout; the pending entry has
    /// already been released.
    #[error("request {method} timed out after {timeout_ms}ms")]
    RequestTimeout { method: String, timeout_ms: u64 },

    /// An `error` object in a JSON-RPC response, propagated verbatim.
    #[error("server error {code}: {message}")]
    ServerReported { code: i64, message: String },

    /// The server does not implement a method (e.g. pull diagnostics).
    /// Never user-visible; triggers fallback paths.
    #[error("not supported by server: {0}")]
    NotSupported(String),

    /// File read/write failure during document sync or edit application.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Zero symbol matches, or an ambiguity that requires the strict
    /// variant. Returned as a structured result, not raised.
    #[error("{0}")]
    Resolution(String),
}

/// JSON-RPC error code for a method the server does not implement.
pub const METHOD_NOT_FOUND: i64 = -32601;

impl BridgeError {
    /// Whether this is a `MethodNotFound` style rejection, which the
    /// diagnostic waiter and other callers treat as "fall back", not "fail".
    pub fn is_method_not_found(&self) -> bool {
        matches!(
            self,
            BridgeError::ServerReported { code, .. } if *code == METHOD_NOT_FOUND
        ) || matches!(self, BridgeError::NotSupported(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
