//! Spill-file I/O.
//!
//! One file per completed disk record, named by the key's spill name
//! under the spill root. File content is the raw value bytes: no header,
//! no checksum. Readers only touch a file after its record is observed
//! `Completed` under the disk lock, so a plain write is sufficient.

use std::fs;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::error;

use crate::error::{BufferError, BufferResult};
use crate::key::BufferKey;

/// Absolute path of the spill file for `key`.
pub(crate) fn file_path<K: BufferKey>(root: &Path, key: &K) -> PathBuf {
    root.join(key.spill_name())
}

/// Write a value to its spill file, creating any per-key folder layer.
///
/// Only the folder layer below the root is created; a vanished root is an
/// I/O failure, not something to silently rebuild.
pub(crate) fn write<K: BufferKey>(root: &Path, key: &K, value: &[u8]) -> BufferResult<()> {
    let path = file_path(root, key);
    if let Some(parent) = path.parent()
        && parent != root
        && let Err(err) = fs::create_dir_all(parent)
    {
        error!(path = %parent.display(), error = %err, "failed to create spill subdirectory");
        return Err(BufferError::FilesystemIo);
    }
    fs::write(&path, value).map_err(|err| {
        error!(path = %path.display(), error = %err, "failed to write spill file");
        BufferError::FilesystemIo
    })
}

/// Read a spill file back.
pub(crate) fn read(path: &Path) -> BufferResult<Bytes> {
    fs::read(path).map(Bytes::from).map_err(|err| {
        error!(path = %path.display(), error = %err, "failed to read spill file");
        BufferError::FilesystemIo
    })
}

/// Remove a spill file, returning the number of bytes it occupied.
pub(crate) fn remove(path: &Path) -> BufferResult<u64> {
    let size = fs::metadata(path)
        .map_err(|err| {
            error!(path = %path.display(), error = %err, "failed to size spill file");
            BufferError::FilesystemIo
        })?
        .len();
    fs::remove_file(path).map_err(|err| {
        error!(path = %path.display(), error = %err, "failed to remove spill file");
        BufferError::FilesystemIo
    })?;
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::TaggedKey;
    use tempfile::tempdir;

    #[test]
    fn test_write_read_remove_round_trip() {
        let dir = tempdir().unwrap();
        let key = b"key".to_vec();
        let path = file_path(dir.path(), &key);

        write(dir.path(), &key, b"payload").unwrap();
        assert_eq!(read(&path).unwrap().as_ref(), b"payload");
        assert_eq!(remove(&path).unwrap(), 7);
        assert!(!path.exists());
    }

    #[test]
    fn test_tagged_key_creates_folder_layer() {
        let dir = tempdir().unwrap();
        let key = TaggedKey::new(7, vec![0xab]);
        let path = file_path(dir.path(), &key);

        write(dir.path(), &key, b"v").unwrap();
        assert!(dir.path().join("7").is_dir());
        assert_eq!(read(&path).unwrap().as_ref(), b"v");
    }

    #[test]
    fn test_write_does_not_recreate_missing_root() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("gone");
        let key = b"key".to_vec();
        assert_eq!(write(&root, &key, b"v"), Err(BufferError::FilesystemIo));
        assert!(!root.exists());
    }

    #[test]
    fn test_read_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let path = file_path(dir.path(), &b"absent".to_vec());
        assert_eq!(read(&path), Err(BufferError::FilesystemIo));
        assert_eq!(remove(&path), Err(BufferError::FilesystemIo));
    }
}
