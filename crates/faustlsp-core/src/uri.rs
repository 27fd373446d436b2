//! File URI and OS path handling.
//!
//! Every tracked file is identified by a [`Handle`]: the pair of its
//! `file://` URI (the editor's view) and its absolute OS path (ours). The
//! mapping is bidirectional and lossless; Windows drive letters are
//! uppercased so that the same file never appears under two keys.

use std::path::{Path, PathBuf};

use lsp_types::Url;

use crate::{Error, Result};

/// Stable identity of a file: its URI and its absolute path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Handle {
    pub uri: Url,
    pub path: PathBuf,
}

impl Handle {
    pub fn from_path(path: PathBuf) -> Result<Handle> {
        let uri = path_to_uri(&path)?;
        Ok(Handle { uri, path })
    }

    pub fn from_uri(uri: Url) -> Result<Handle> {
        let path = uri_to_path(&uri)?;
        Ok(Handle { uri, path })
    }
}

/// Converts an absolute OS path into a `file://` URI.
pub fn path_to_uri(path: &Path) -> Result<Url> {
    Url::from_file_path(path).map_err(|_| Error::InvalidUri(path.display().to_string()))
}

/// Converts a `file://` URI into an absolute OS path, normalising the
/// Windows drive letter to upper case.
pub fn uri_to_path(uri: &Url) -> Result<PathBuf> {
    if uri.scheme() != "file" {
        return Err(Error::InvalidUri(uri.to_string()));
    }
    let path = uri
        .to_file_path()
        .map_err(|_| Error::InvalidUri(uri.to_string()))?;
    Ok(normalize_drive(path))
}

/// Uppercases the drive letter of a Windows-style path. Unix paths pass
/// through unchanged.
pub fn normalize_drive(path: PathBuf) -> PathBuf {
    let Some(s) = path.to_str() else {
        return path;
    };
    if is_windows_drive_path(s) {
        let mut owned = s.to_string();
        owned[..1].make_ascii_uppercase();
        return PathBuf::from(owned);
    }
    path
}

/// True for URI path components of the form `/c:/...`.
pub fn is_windows_drive_uri_path(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 4 && bytes[0] == b'/' && bytes[1].is_ascii_alphabetic() && bytes[2] == b':'
}

/// True for OS paths of the form `c:\...` or `c:/...`.
pub fn is_windows_drive_path(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_round_trips_through_uri() {
        let path = PathBuf::from("/home/user/project/main.dsp");
        let uri = path_to_uri(&path).unwrap();
        assert_eq!(uri.as_str(), "file:///home/user/project/main.dsp");
        assert_eq!(uri_to_path(&uri).unwrap(), path);
    }

    #[test]
    fn rejects_non_file_schemes() {
        let uri = Url::parse("https://example.com/main.dsp").unwrap();
        assert!(uri_to_path(&uri).is_err());
    }

    #[test]
    fn windows_drive_predicates() {
        assert!(is_windows_drive_uri_path("/c:/Users/x"));
        assert!(!is_windows_drive_uri_path("/home/user"));
        assert!(!is_windows_drive_uri_path("/c"));
        assert!(is_windows_drive_path("c:\\Users\\x"));
        assert!(is_windows_drive_path("C:/Users/x"));
        assert!(!is_windows_drive_path("/home/user"));
    }

    #[test]
    fn drive_letter_is_uppercased() {
        assert_eq!(
            normalize_drive(PathBuf::from("c:\\Users\\x")),
            PathBuf::from("C:\\Users\\x")
        );
        assert_eq!(
            normalize_drive(PathBuf::from("/home/user")),
            PathBuf::from("/home/user")
        );
    }

    #[test]
    fn handle_carries_both_views() {
        let handle = Handle::from_path(PathBuf::from("/tmp/a.dsp")).unwrap();
        assert_eq!(handle.path, PathBuf::from("/tmp/a.dsp"));
        assert_eq!(handle.uri.as_str(), "file:///tmp/a.dsp");

        let back = Handle::from_uri(handle.uri.clone()).unwrap();
        assert_eq!(back.path, handle.path);
    }
}
