//! Atomic on-disk snapshots shared by stores, vectorizer models, and indexes.
//!
//! Payloads are bincode-encoded and written to a sibling temp file which is
//! fsynced and then renamed over the target, so a concurrent reader sees
//! either the old file or the new one and a returned write survives a crash. A CRC32 footer `[magic "DSC1"][u32 BE]` guards
//! against truncated or corrupted artifacts.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const SNAPSHOT_CRC_MAGIC: &[u8; 4] = b"DSC1";

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".tmp.{}", std::process::id()));
    path.with_file_name(name)
}

/// Serialize `value` and atomically replace `path` with it.
pub fn write_snapshot<T: Serialize>(path: &Path, value: &T) -> io::Result<u64> {
    let bytes = bincode::serialize(value).map_err(|e| io::Error::other(e.to_string()))?;
    let crc = crc32fast::hash(&bytes);

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let mut output = Vec::with_capacity(bytes.len() + 8);
    output.extend_from_slice(&bytes);
    output.extend_from_slice(SNAPSHOT_CRC_MAGIC);
    output.extend_from_slice(&crc.to_be_bytes());

    let tmp = tmp_path(path);
    if let Err(err) = write_synced(&tmp, &output).and_then(|()| fs::rename(&tmp, path)) {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    sync_parent(path)?;

    tracing::debug!(path = %path.display(), bytes = output.len(), crc = format_args!("{crc:#010x}"), "snapshot written");
    Ok(output.len() as u64)
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Persist the rename itself. Directories cannot be opened for syncing on
/// every platform, so this is unix-only.
#[cfg(unix)]
fn sync_parent(path: &Path) -> io::Result<()> {
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(dir) => fs::File::open(dir)?.sync_all(),
        None => fs::File::open(".")?.sync_all(),
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Read and verify a snapshot written by [`write_snapshot`].
pub fn read_snapshot<T: DeserializeOwned>(path: &Path) -> io::Result<T> {
    let raw = fs::read(path)?;
    if raw.len() < 8 || &raw[raw.len() - 8..raw.len() - 4] != SNAPSHOT_CRC_MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{} is missing its checksum footer", path.display()),
        ));
    }

    let (payload, footer) = raw.split_at(raw.len() - 8);
    let stored = u32::from_be_bytes([footer[4], footer[5], footer[6], footer[7]]);
    let computed = crc32fast::hash(payload);
    if stored != computed {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "snapshot CRC32 mismatch for {}: expected {stored:#010x}, got {computed:#010x}",
                path.display()
            ),
        ));
    }

    bincode::deserialize(payload).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
}

/// Remove an artifact if present; a missing file is not an error.
pub fn remove_snapshot(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn snapshot_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("data.bin");
        write_snapshot(&path, &vec![1u32, 2, 3]).unwrap();
        let back: Vec<u32> = read_snapshot(&path).unwrap();
        assert_eq!(back, vec![1, 2, 3]);
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn overwrite_replaces_the_previous_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        write_snapshot(&path, &String::from("first")).unwrap();
        let len = write_snapshot(&path, &String::from("second, longer")).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), len);
        assert_eq!(read_snapshot::<String>(&path).unwrap(), "second, longer");
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn corrupted_snapshot_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        write_snapshot(&path, &String::from("payload")).unwrap();
        let mut raw = fs::read(&path).unwrap();
        raw[0] ^= 0xFF;
        fs::write(&path, raw).unwrap();
        let err = read_snapshot::<String>(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn truncated_snapshot_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        fs::write(&path, b"abc").unwrap();
        assert!(read_snapshot::<String>(&path).is_err());
    }

    #[test]
    fn removing_missing_snapshot_is_ok() {
        let dir = tempdir().unwrap();
        assert!(!remove_snapshot(&dir.path().join("nope.bin")).unwrap());
    }
}
