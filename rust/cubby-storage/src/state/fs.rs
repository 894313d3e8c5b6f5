use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base58::ToBase58;

use crate::{DurableState, StateError};

/// A [DurableState] kept in a directory, one file per key. File names are
/// the base58-encoded keys.
#[derive(Clone, Debug)]
pub struct FileSystemState {
    root_dir: PathBuf,
}

impl FileSystemState {
    /// Keep state in `root_dir`, creating it if needed.
    pub async fn new(root_dir: impl AsRef<Path>) -> Result<Self, StateError> {
        let root_dir = root_dir.as_ref().to_owned();
        tokio::fs::create_dir_all(&root_dir)
            .await
            .map_err(|error| StateError::Unavailable(format!("{error}")))?;
        Ok(Self { root_dir })
    }

    fn make_path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key.as_bytes().to_base58())
    }
}

#[async_trait]
impl DurableState for FileSystemState {
    async fn get(&self, key: &str) -> Result<Option<String>, StateError> {
        match tokio::fs::read(self.make_path(key)).await {
            Ok(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|error| StateError::Corrupt(format!("{key}: {error}"))),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(StateError::Unavailable(format!("{error}"))),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StateError> {
        // Write beside the target and rename so a crash never leaves a
        // truncated value behind.
        let path = self.make_path(key);
        let staged = path.with_extension("staged");
        tokio::fs::write(&staged, value)
            .await
            .map_err(|error| StateError::Unavailable(format!("{error}")))?;
        tokio::fs::rename(&staged, &path)
            .await
            .map_err(|error| StateError::Unavailable(format!("{error}")))
    }

    async fn remove(&self, key: &str) -> Result<(), StateError> {
        match tokio::fs::remove_file(self.make_path(key)).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(StateError::Unavailable(format!("{error}"))),
        }
    }
}
