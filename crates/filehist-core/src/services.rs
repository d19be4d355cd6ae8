//! Host collaborator seams: display labels and remote environments.

use std::path::PathBuf;

use async_trait::async_trait;
use url::Url;

use crate::domain::Result;

/// Converts a resource URI into a short display name.
pub trait LabelService: Send + Sync {
    fn basename(&self, resource: &Url) -> String;
}

/// Default label service: the last path segment, percent-decoded.
#[derive(Debug, Default, Clone, Copy)]
pub struct PathLabelService;

impl LabelService for PathLabelService {
    fn basename(&self, resource: &Url) -> String {
        let segment = resource
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| resource.path());
        percent_decode(segment)
    }
}

fn percent_decode(s: &str) -> String {
    fn hex_val(b: u8) -> Option<u8> {
        match b {
            b'0'..=b'9' => Some(b - b'0'),
            b'a'..=b'f' => Some(b - b'a' + 10),
            b'A'..=b'F' => Some(b - b'A' + 10),
            _ => None,
        }
    }
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                out.push(hi * 16 + lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Probes whether a remote connection provides its own history root.
#[async_trait]
pub trait RemoteEnvironment: Send + Sync {
    /// The remote-provided history home, if a remote connection is
    /// active and reachable. `Ok(None)` means "no remote"; errors are
    /// treated by the registry as "use the local root".
    async fn history_home(&self) -> Result<Option<PathBuf>>;
}

/// Local-only environment: no remote history root.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRemoteEnvironment;

#[async_trait]
impl RemoteEnvironment for NoRemoteEnvironment {
    async fn history_home(&self) -> Result<Option<PathBuf>> {
        Ok(None)
    }
}
