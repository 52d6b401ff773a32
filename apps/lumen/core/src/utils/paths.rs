//! Path and URI utilities
//!
//! Documents are keyed by `file://` URIs everywhere in the core; these helpers
//! convert between URIs and filesystem paths.

use std::path::{Path, PathBuf};

const FILE_SCHEME: &str = "file://";

/// Expand tilde (~) to the user's home directory
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(stripped);
        }
    } else if path == "~" {
        if let Some(home) = home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf())
}

/// Build a `file://` URI from a filesystem path, percent-encoding each segment
pub fn path_to_uri(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");
    let encoded: Vec<String> = raw
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect();
    let joined = encoded.join("/");
    if joined.starts_with('/') {
        format!("{}{}", FILE_SCHEME, joined)
    } else {
        format!("{}/{}", FILE_SCHEME, joined)
    }
}

/// Convert a `file://` URI back into a path. Returns None for other schemes.
pub fn uri_to_path(uri: &str) -> Option<PathBuf> {
    let rest = uri.strip_prefix(FILE_SCHEME)?;
    let decoded = urlencoding::decode(rest).ok()?;
    Some(PathBuf::from(decoded.into_owned()))
}

/// The scheme part of a URI (`file`, `untitled`, ...)
pub fn uri_scheme(uri: &str) -> Option<&str> {
    uri.split_once(':').map(|(scheme, _)| scheme)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_to_uri_encodes_segments() {
        let uri = path_to_uri(Path::new("/home/me/my project/a.js"));
        assert_eq!(uri, "file:///home/me/my%20project/a.js");
    }

    #[test]
    fn test_uri_round_trip() {
        let path = Path::new("/tmp/with space/b.py");
        let uri = path_to_uri(path);
        assert_eq!(uri_to_path(&uri).unwrap(), path);
    }

    #[test]
    fn test_uri_to_path_rejects_other_schemes() {
        assert!(uri_to_path("untitled:Untitled-1").is_none());
        assert_eq!(uri_scheme("untitled:Untitled-1"), Some("untitled"));
    }

    #[test]
    fn test_expand_tilde_leaves_plain_paths() {
        assert_eq!(expand_tilde("/opt/lumen"), PathBuf::from("/opt/lumen"));
    }
}
