//! Cross-platform application paths

use std::fs;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("could not determine data directory")]
    NoDataDir,
    #[error("failed to create data directory {path:?}: {source}")]
    Create { path: PathBuf, source: io::Error },
}

#[derive(Debug, Clone)]
pub struct AppPaths {
    data_dir: PathBuf,
}

impl AppPaths {
    pub fn new() -> Result<Self, PathError> {
        let data_dir = dirs::data_dir().ok_or(PathError::NoDataDir)?.join("convis");
        Self::at(data_dir)
    }

    /// Paths rooted at an explicit directory, created if missing.
    pub fn at(data_dir: PathBuf) -> Result<Self, PathError> {
        fs::create_dir_all(&data_dir).map_err(|source| PathError::Create {
            path: data_dir.clone(),
            source,
        })?;
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    /// Default location of the unpacked MNIST files.
    pub fn mnist_dir(&self) -> PathBuf {
        self.data_dir.join("mnist")
    }

    pub fn snapshot_file(&self) -> PathBuf {
        self.data_dir.join("snapshot.json")
    }
}
