//
// store.rs
//
// Storage for the persisted influence map payload
//

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Where the encoded influence map lives between runs.
pub trait MapStore: Send + Sync {
    /// Read the stored payload. `Ok(None)` means nothing has been persisted yet.
    fn load(&self) -> io::Result<Option<Vec<u8>>>;

    /// Replace the stored payload.
    fn save(&self, bytes: &[u8]) -> io::Result<()>;
}

/// Map payload stored in a single file on disk.
#[derive(Debug, Clone)]
pub struct FileMapStore {
    path: PathBuf,
}

impl FileMapStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl MapStore for FileMapStore {
    fn load(&self) -> io::Result<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Writes to a sibling temp file and renames it into place, so an
    /// interrupted write leaves the previous map intact.
    fn save(&self, bytes: &[u8]) -> io::Result<()> {
        let temp = self.temp_path();
        std::fs::write(&temp, bytes)?;
        if let Err(e) = std::fs::rename(&temp, &self.path) {
            let _ = std::fs::remove_file(&temp);
            return Err(e);
        }
        log::trace!("Wrote {} bytes to {}", bytes.len(), self.path.display());
        Ok(())
    }
}

/// In-memory store that counts writes.
#[derive(Debug, Default)]
pub struct MemoryMapStore {
    payload: Mutex<Option<Vec<u8>>>,
    writes: AtomicUsize,
}

impl MemoryMapStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `save` calls so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl MapStore for MemoryMapStore {
    fn load(&self) -> io::Result<Option<Vec<u8>>> {
        Ok(self
            .payload
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, bytes: &[u8]) -> io::Result<()> {
        *self.payload.lock().unwrap_or_else(PoisonError::into_inner) = Some(bytes.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
