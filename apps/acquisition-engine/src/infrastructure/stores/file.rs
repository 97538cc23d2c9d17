//! File-backed local session store.
//!
//! One file per key under a directory. Writes go to a temporary file that is
//! renamed over the target, so a crash mid-write never leaves a torn record.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::application::ports::LocalStore;
use crate::error::PersistenceError;

/// Directory-backed [`LocalStore`].
#[derive(Debug, Clone)]
pub struct FileLocalStore {
    dir: PathBuf,
}

impl FileLocalStore {
    /// Store rooted at `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Local`] if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| local(&dir, &e))?;
        Ok(Self { dir })
    }

    /// Root directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_name(key)))
    }
}

/// Map a key to a file name that cannot escape the store directory.
fn file_name(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn local(path: &Path, e: &std::io::Error) -> PersistenceError {
    PersistenceError::Local(format!("{}: {e}", path.display()))
}

impl LocalStore for FileLocalStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(local(&path, &e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");

        let mut file = fs::File::create(&tmp).map_err(|e| local(&tmp, &e))?;
        file.write_all(value.as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| local(&tmp, &e))?;
        fs::rename(&tmp, &path).map_err(|e| local(&path, &e))
    }
}
