//! Document identity
//!
//! Every document is keyed by a stable identity that does not depend on its
//! file name or location. A document that has already been through OCR
//! carries its identity in the `/Keywords` entry of the PDF info dictionary
//! (`"sha256 <hex>"`); anything else is identified by a SHA-256 hash of its
//! bytes.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use lopdf::{Document, Object};
use md5::Md5;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Identity resolution errors
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl IdentityError {
    /// Whether the document disappeared between listing and reading
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Read { source, .. } => source.kind() == io::ErrorKind::NotFound,
        }
    }
}

/// Tag in front of an embedded identity token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityTag {
    /// SHA-256 content hash (written by this pipeline)
    Sha256,
    /// MD5 content hash written by older tooling
    Md5,
}

impl IdentityTag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Md5 => "md5",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "sha256" => Some(Self::Sha256),
            "md5" => Some(Self::Md5),
            _ => None,
        }
    }

    /// Expected length of a hex token for this tag
    fn token_len(self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Md5 => 32,
        }
    }
}

impl fmt::Display for IdentityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an identity came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentitySource {
    /// Read from the document metadata
    Embedded,
    /// Computed over the document bytes
    ContentHash,
}

/// Stable content identity of a document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    tag: IdentityTag,
    token: String,
    source: IdentitySource,
}

impl Identity {
    /// Identity computed from the document bytes
    pub fn from_content_hash(hash: impl Into<String>) -> Self {
        Self {
            tag: IdentityTag::Sha256,
            token: hash.into(),
            source: IdentitySource::ContentHash,
        }
    }

    /// Token used as the ledger key
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn tag(&self) -> IdentityTag {
        self.tag
    }

    pub fn source(&self) -> IdentitySource {
        self.source
    }

    pub fn is_embedded(&self) -> bool {
        self.source == IdentitySource::Embedded
    }

    /// Metadata value the transform embeds into its output
    pub fn keywords(&self) -> String {
        format!("{} {}", self.tag, self.token)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token)
    }
}

/// Resolve the identity of a document.
///
/// An embedded identity always wins; the content hash is only computed when
/// the metadata carries no well-formed `"<tag> <token>"` value.
pub fn resolve(path: &Path) -> Result<Identity, IdentityError> {
    if let Some(identity) = embedded_identity(path) {
        return Ok(identity);
    }

    let hash = content_hash(path).map_err(|source| IdentityError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Identity::from_content_hash(hash))
}

/// Read the embedded identity, if any.
///
/// Files that cannot be parsed as PDF have no embedded identity.
pub fn embedded_identity(path: &Path) -> Option<Identity> {
    let doc = Document::load(path).ok()?;
    let keywords = info_keywords(&doc)?;
    parse_keywords(&keywords)
}

/// Parse a `"<tag> <token>"` keywords value
pub fn parse_keywords(keywords: &str) -> Option<Identity> {
    let mut parts = keywords.split_whitespace();
    let tag = IdentityTag::parse(parts.next()?)?;
    let token = parts.next()?;

    if token.len() != tag.token_len() || !token.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    Some(Identity {
        tag,
        token: token.to_ascii_lowercase(),
        source: IdentitySource::Embedded,
    })
}

fn info_keywords(doc: &Document) -> Option<String> {
    let info = match doc.trailer.get(b"Info").ok()? {
        Object::Reference(id) => doc.get_dictionary(*id).ok()?,
        Object::Dictionary(dict) => dict,
        _ => return None,
    };
    let raw = info.get(b"Keywords").ok()?.as_str().ok()?;
    Some(decode_pdf_text(raw))
}

/// Decode a PDF text string (UTF-16BE with BOM, otherwise PDFDocEncoding)
fn decode_pdf_text(raw: &[u8]) -> String {
    match raw {
        [0xFE, 0xFF, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => raw.iter().map(|&b| b as char).collect(),
    }
}

/// Compute the SHA-256 hash of a file, streaming its contents
pub fn content_hash(path: &Path) -> io::Result<String> {
    content_hash_with(path, IdentityTag::Sha256)
}

/// Hash a file with the algorithm named by `tag`
pub fn content_hash_with(path: &Path, tag: IdentityTag) -> io::Result<String> {
    match tag {
        IdentityTag::Sha256 => hash_file::<Sha256>(path),
        IdentityTag::Md5 => hash_file::<Md5>(path),
    }
}

fn hash_file<D: Digest + io::Write>(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = D::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Compute the SHA-256 hash of in-memory data
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
