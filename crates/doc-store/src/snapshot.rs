use crate::memory::{DocumentMap, ids_since, insert_new, merge_meta, select};
use crate::{DocumentStore, StoreError, StoreResult};
use core_types::persist::{read_snapshot, write_snapshot};
use core_types::{DocId, Document, Metadata, Timestamp};
use fs2::FileExt;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const SNAPSHOT_FILE: &str = "documents.snap";
const LOCK_FILE: &str = "documents.lock";

/// File-backed store rooted at a directory.
///
/// Several handles, in this process or others, may share one root. Reads
/// serve a cached copy of the snapshot and reload it whenever the file on
/// disk has changed. Mutations take an exclusive advisory lock on the root,
/// reload the latest snapshot, apply the change, and rewrite the snapshot
/// atomically, so no writer overwrites documents it has not seen. A failed
/// mutation leaves the file untouched.
///
/// The "connection" is the root directory: if it disappears (an unmounted
/// share, say) the store reports itself disconnected until a reconnect
/// reloads it.
#[derive(Debug)]
pub struct SnapshotStore {
    name: String,
    root: PathBuf,
    cache: RwLock<Option<Cached>>,
}

#[derive(Debug)]
struct Cached {
    docs: DocumentMap,
    stamp: Option<FileStamp>,
}

/// Identity of one snapshot file version. Every write renames a fresh file
/// into place, so any rewrite changes at least one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
    inode: u64,
}

impl FileStamp {
    fn of(path: &Path) -> io::Result<Option<Self>> {
        match fs::metadata(path) {
            Ok(meta) => Ok(Some(Self {
                len: meta.len(),
                modified: meta.modified().ok(),
                inode: inode(&meta),
            })),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }
}

#[cfg(unix)]
fn inode(meta: &fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
const fn inode(_meta: &fs::Metadata) -> u64 {
    0
}

impl SnapshotStore {
    /// Open the store at `root`, creating the directory if needed.
    pub fn open(name: impl Into<String>, root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let cached = load(&root)?;
        let store = Self {
            name: name.into(),
            root,
            cache: RwLock::new(Some(cached)),
        };
        tracing::info!(store = %store.name, root = %store.root.display(), "opened snapshot store");
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn snapshot_path(&self) -> PathBuf {
        self.root.join(SNAPSHOT_FILE)
    }

    fn unavailable(&self) -> StoreError {
        StoreError::Unavailable(self.name.clone())
    }

    fn read<T>(&self, f: impl FnOnce(&DocumentMap) -> T) -> StoreResult<T> {
        if !self.root.is_dir() {
            return Err(self.unavailable());
        }
        let stamp = FileStamp::of(&self.snapshot_path())?;
        {
            let guard = self.cache.read();
            match guard.as_ref() {
                None => return Err(self.unavailable()),
                Some(cached) if cached.stamp == stamp => return Ok(f(&cached.docs)),
                Some(_) => {}
            }
        }

        let mut guard = self.cache.write();
        if guard.is_none() {
            return Err(self.unavailable());
        }
        let cached = load(&self.root)?;
        tracing::debug!(store = %self.name, documents = cached.docs.len(), "snapshot changed on disk, reloaded");
        Ok(f(&guard.insert(cached).docs))
    }

    /// Reload under the root lock, apply `f`, persist, then publish.
    fn mutate<T>(&self, f: impl FnOnce(&mut DocumentMap) -> StoreResult<T>) -> StoreResult<T> {
        if !self.root.is_dir() {
            return Err(self.unavailable());
        }
        let mut guard = self.cache.write();
        if guard.is_none() {
            return Err(self.unavailable());
        }
        let _lock = self.lock_root()?;
        let mut docs = load(&self.root)?.docs;
        let out = f(&mut docs)?;
        let path = self.snapshot_path();
        write_snapshot(&path, &docs)?;
        *guard = Some(Cached {
            docs,
            stamp: FileStamp::of(&path)?,
        });
        Ok(out)
    }

    /// Exclusive advisory lock on the root, released when the file drops.
    fn lock_root(&self) -> StoreResult<File> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.root.join(LOCK_FILE))?;
        file.lock_exclusive()?;
        Ok(file)
    }
}

fn load(root: &Path) -> StoreResult<Cached> {
    let path = root.join(SNAPSHOT_FILE);
    let stamp = FileStamp::of(&path)?;
    let docs = match read_snapshot::<DocumentMap>(&path) {
        Ok(map) => map,
        Err(err) if err.kind() == io::ErrorKind::NotFound => DocumentMap::new(),
        Err(err) if err.kind() == io::ErrorKind::InvalidData => {
            return Err(StoreError::Corrupt(err.to_string()));
        }
        Err(err) => return Err(err.into()),
    };
    Ok(Cached { docs, stamp })
}

impl DocumentStore for SnapshotStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.root.is_dir() && self.cache.read().is_some()
    }

    fn reconnect(&self) -> StoreResult<()> {
        if !self.root.is_dir() {
            *self.cache.write() = None;
            return Err(self.unavailable());
        }
        let cached = load(&self.root)?;
        tracing::info!(store = %self.name, documents = cached.docs.len(), "snapshot store reloaded");
        *self.cache.write() = Some(cached);
        Ok(())
    }

    fn get_document_ids(&self, from_time: Option<Timestamp>) -> StoreResult<BTreeSet<DocId>> {
        self.read(|docs| ids_since(docs, from_time))
    }

    fn get_document_by_id(&self, ids: &[DocId]) -> StoreResult<Vec<Document>> {
        self.read(|docs| select(docs, ids))
    }

    fn get_all_documents(&self) -> StoreResult<Vec<Document>> {
        self.read(|docs| docs.values().cloned().collect())
    }

    fn write_documents(&self, docs: &[Document]) -> StoreResult<usize> {
        if docs.is_empty() {
            return Ok(0);
        }
        self.mutate(|map| Ok(insert_new(map, docs)))
    }

    fn update_document_meta(&self, id: &DocId, patch: &Metadata) -> StoreResult<()> {
        self.mutate(|map| merge_meta(map, id, patch))
    }

    fn delete_all_documents(&self) -> StoreResult<()> {
        self.mutate(|map| {
            map.clear();
            Ok(())
        })
    }
}
