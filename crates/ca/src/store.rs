use std::{
    collections::HashMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use parking_lot::Mutex;

use crate::error::StoreError;

/// Persistence boundary for the root key and certificate.
pub trait CaStore: Send + Sync {
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn store(&self, name: &str, data: &[u8]) -> Result<(), StoreError>;
}

/// Stores each item as a file in one directory, readable by the owner only.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

impl CaStore for FileStore {
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path(name);
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Read { path, source }),
        }
    }

    fn store(&self, name: &str, data: &[u8]) -> Result<(), StoreError> {
        let path = self.path(name);
        let tmp = self.path(&format!(".{name}.tmp"));

        let write = || -> io::Result<()> {
            fs::create_dir_all(&self.dir)?;

            let mut options = fs::OpenOptions::new();
            options.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(0o600);
            }

            let mut file = options.open(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
            fs::rename(&tmp, &path)
        };

        write().map_err(|source| StoreError::Write {
            path: path.clone(),
            source,
        })
    }
}

/// In-memory store, for ephemeral roots.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CaStore for MemoryStore {
    fn load(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.items.lock().get(name).cloned())
    }

    fn store(&self, name: &str, data: &[u8]) -> Result<(), StoreError> {
        self.items.lock().insert(name.to_string(), data.to_vec());
        Ok(())
    }
}
