//! Bidirectional path <-> `file://` URI conversion.
//!
//! `lsp-types` 0.97 models URIs as an opaque string wrapper, so the actual
//! encoding work is delegated to the `url` crate and the result re-parsed.

use std::path::{Path, PathBuf};

use lsp_types::Uri;

use crate::error::{BridgeError, Result};

/// Converts an absolute filesystem path into a `file://` URI.
pub fn path_to_uri(path: &Path) -> Result<Uri> {
    let url = url::Url::from_file_path(path).map_err(|_| {
        BridgeError::Protocol(format!("not an absolute path: {}", path.display()))
    })?;
    url.as_str()
        .parse::<Uri>()
        .map_err(|e| BridgeError::Protocol(format!("invalid file URI for {}: {e}", path.display())))
}

/// Converts a `file://` URI back into a filesystem path.
pub fn uri_to_path(uri: &Uri) -> Result<PathBuf> {
    let url = url::Url::parse(uri.as_str())
        .map_err(|e| BridgeError::Protocol(format!("unparseable URI {}: {e}", uri.as_str())))?;
    url.to_file_path()
        .map_err(|_| BridgeError::Protocol(format!("not a file URI: {}", uri.as_str())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_plain_path() {
        let path = Path::new("/workspace/src/main.rs");
        let uri = path_to_uri(path).unwrap();
        assert_eq!(uri.as_str(), "file:///workspace/src/main.rs");
        assert_eq!(uri_to_path(&uri).unwrap(), path);
    }

    #[test]
    fn percent_encodes_spaces() {
        let path = Path::new("/workspace/My Project/a.ts");
        let uri = path_to_uri(path).unwrap();
        assert_eq!(uri.as_str(), "file:///workspace/My%20Project/a.ts");
        assert_eq!(uri_to_path(&uri).unwrap(), path);
    }

    #[test]
    fn rejects_relative_path() {
        assert!(path_to_uri(Path::new("relative/file.rs")).is_err());
    }

    #[test]
    fn rejects_non_file_uri() {
        let uri: Uri = "https://example.com/a.rs".parse().unwrap();
        assert!(uri_to_path(&uri).is_err());
    }

    quickcheck::quickcheck! {
        fn round_trips_arbitrary_segments(segments: Vec<u8>) -> bool {
            // Build an absolute path out of short alphanumeric segments so the
            // property stays within what a filesystem path may contain.
            let mut path = PathBuf::from("/");
            for (i, b) in segments.iter().take(6).enumerate() {
                path.push(format!("d{i}x{b}"));
            }
            let uri = match path_to_uri(&path) {
                Ok(uri) => uri,
                Err(_) => return false,
            };
            uri_to_path(&uri).map(|p| p == path).unwrap_or(false)
        }
    }
}
