//! Content fingerprints.
//!
//! A [`Fingerprint`] is a SHA-256 over everything that can change a
//! document's rendered fragment:
//!
//! - the raw source bytes (front matter included)
//! - the resolved metadata, serialized canonically
//! - the converter identity (name + version)
//! - the fingerprints of all dependencies, in graph order
//!
//! Dependencies are folded in recursively, so the hash covers the transitive
//! closure. Nothing time-based goes in: the same inputs always hash the same.

use crate::types::Document;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

/// Bump to invalidate every fingerprint when the hashing scheme changes.
const SCHEME: &[u8] = b"plume-fingerprint-v1\0";

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 64 || !hex.is_ascii() {
            return None;
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk).ok()?;
            bytes[i] = u8::from_str_radix(pair, 16).ok()?;
        }
        Some(Self(bytes))
    }

    /// First eight hex characters, for logs and directive tokens.
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Fingerprint::from_hex(&s).ok_or_else(|| serde::de::Error::custom("invalid fingerprint"))
    }
}

/// Hash of a document's own inputs, before dependencies are folded in.
///
/// Computed for all documents up front (in parallel); cheap to combine later.
pub fn content_hash(doc: &Document) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update((doc.content.len() as u64).to_le_bytes());
    hasher.update(&doc.content);
    // serde_json output is deterministic for this struct: fields in
    // declaration order, tags already sorted.
    let meta = serde_json::to_vec(&doc.metadata).unwrap_or_default();
    hasher.update((meta.len() as u64).to_le_bytes());
    hasher.update(&meta);
    hasher.finalize().into()
}

/// Combine a document's content hash, converter identity and dependency
/// fingerprints into its final fingerprint.
pub fn combine<'a>(
    content: &[u8; 32],
    converter_identity: &str,
    dependencies: impl IntoIterator<Item = (&'a str, &'a [u8; 32])>,
) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(SCHEME);
    hasher.update(content);
    hasher.update((converter_identity.len() as u64).to_le_bytes());
    hasher.update(converter_identity.as_bytes());
    for (name, digest) in dependencies {
        hasher.update(b"\x01");
        hasher.update((name.len() as u64).to_le_bytes());
        hasher.update(name.as_bytes());
        hasher.update(digest);
    }
    Fingerprint(hasher.finalize().into())
}
