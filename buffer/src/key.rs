//! Key trait and the tagged-identity key type.
//!
//! The buffer is parametric over its key. A key only has to be comparable,
//! cloneable and reducible to a canonical byte form; the byte form drives
//! spill-file naming and log output. Types that need a different on-disk
//! layout override [`BufferKey::spill_name`].

use std::path::PathBuf;

/// Requirements on a buffer key.
pub trait BufferKey: Clone + Eq + Send + 'static {
    /// Canonical byte form of the key.
    ///
    /// Two keys that compare equal must produce identical bytes; the spill
    /// file name is derived from them.
    fn canonical_bytes(&self) -> Vec<u8>;

    /// Relative path of this key's spill file under the spill root.
    ///
    /// Defaults to the lowercase hex encoding of the canonical bytes.
    fn spill_name(&self) -> PathBuf {
        PathBuf::from(hex_encode(&self.canonical_bytes()))
    }
}

impl BufferKey for Vec<u8> {
    fn canonical_bytes(&self) -> Vec<u8> {
        self.clone()
    }
}

impl BufferKey for String {
    fn canonical_bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

/// A key carrying a type tag alongside an opaque identity.
///
/// Spill files for tagged keys are grouped into one folder per tag, so
/// identities of different kinds never collide on disk even when their
/// identity bytes are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaggedKey {
    tag: u16,
    id: Vec<u8>,
}

impl TaggedKey {
    /// Create a tagged key from a tag value and identity bytes.
    pub fn new(tag: u16, id: impl Into<Vec<u8>>) -> Self {
        Self { tag, id: id.into() }
    }

    /// The type tag.
    pub fn tag(&self) -> u16 {
        self.tag
    }

    /// The identity bytes.
    pub fn id(&self) -> &[u8] {
        &self.id
    }
}

impl BufferKey for TaggedKey {
    fn canonical_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(2 + self.id.len());
        bytes.extend_from_slice(&self.tag.to_be_bytes());
        bytes.extend_from_slice(&self.id);
        bytes
    }

    fn spill_name(&self) -> PathBuf {
        PathBuf::from(self.tag.to_string()).join(hex_encode(&self.id))
    }
}

/// Lowercase hex encoding of a byte slice.
pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Short hex digest of a key's canonical bytes, for log output.
pub(crate) fn short_hex(bytes: &[u8]) -> String {
    if bytes.len() <= 6 {
        hex_encode(bytes)
    } else {
        format!("{}..", hex_encode(&bytes[..6]))
    }
}
