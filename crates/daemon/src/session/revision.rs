// Content fingerprints for change detection.
//
// A revision is `sha256:<lowercase hex>` of the document bytes. Two writes
// with identical content produce identical revisions, which is how the
// session tells a real change from a no-op save or an mtime-only bump.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const REVISION_ALGORITHM: &str = "sha256";

/// Fingerprint of a document's content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Revision {
    digest: String,
}

impl Revision {
    /// Compute the revision of the given bytes.
    pub fn of(content: &[u8]) -> Self {
        let digest = Sha256::digest(content);
        Self { digest: hex_encode(&digest) }
    }

    pub fn of_text(content: &str) -> Self {
        Self::of(content.as_bytes())
    }

    /// Compute the revision of a file on disk.
    pub fn of_file(path: &Path) -> std::io::Result<Self> {
        std::fs::read(path).map(|content| Self::of(&content))
    }

    pub fn algorithm(&self) -> &'static str {
        REVISION_ALGORITHM
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{REVISION_ALGORITHM}:{}", self.digest)
    }
}

impl From<Revision> for String {
    fn from(revision: Revision) -> Self {
        revision.to_string()
    }
}

impl TryFrom<String> for Revision {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let Some(digest) = value.strip_prefix(REVISION_ALGORITHM).and_then(|v| v.strip_prefix(':'))
        else {
            return Err(format!("revision `{value}` is missing the `{REVISION_ALGORITHM}:` prefix"));
        };
        if digest.len() != 64 || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(format!("revision `{value}` does not carry a sha256 hex digest"));
        }
        Ok(Self { digest: digest.to_ascii_lowercase() })
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}
