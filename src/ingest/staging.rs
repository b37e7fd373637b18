//! Filesystem staging area for uploaded spreadsheets.
//!
//! Files are keyed deterministically by `(job_id, extension)` and live from
//! submission until the job's terminal transition. The store assumes nothing
//! beyond write-once/read-once/idempotent-delete, so any object store could
//! stand in behind the same operations.

use std::fs::{self, File};
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

use crate::{Error, ErrorKind, Result};

#[derive(Debug, Clone)]
pub struct FileStaging {
    root: PathBuf,
}

impl FileStaging {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileStaging { root: root.into() }
    }

    /// Creates the staging directory if needed. Called once at startup.
    pub fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// Deterministic location of a staged file.
    pub fn path_for(&self, job_id: &Uuid, extension: &str) -> PathBuf {
        self.root.join(format!("{job_id}.{extension}"))
    }

    /// Writes the uploaded bytes once. Overwriting an existing staged file
    /// is undefined and should not occur; we fail loudly instead.
    pub fn put(&self, job_id: &Uuid, extension: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(job_id, extension);
        if path.exists() {
            return Err((
                ErrorKind::StagingError,
                "staged file already exists",
                path.display().to_string(),
            )
                .into());
        }
        fs::write(&path, bytes).map_err(|err| {
            Error::from((
                ErrorKind::StagingError,
                "failed to write staged file",
                format!("{}: {}", path.display(), err),
            ))
        })?;
        debug!(%job_id, path = %path.display(), bytes = bytes.len(), "staged upload");
        Ok(path)
    }

    /// Opens a staged file for reading.
    pub fn open(&self, job_id: &Uuid, extension: &str) -> Result<File> {
        let path = self.path_for(job_id, extension);
        File::open(&path).map_err(|err| {
            if err.kind() == IoErrorKind::NotFound {
                (
                    ErrorKind::MissingStagedFile,
                    "staged file not found",
                    path.display().to_string(),
                )
                    .into()
            } else {
                Error::from(err)
            }
        })
    }

    /// Removes a staged file. Idempotent: deleting an absent file succeeds.
    pub fn delete(&self, job_id: &Uuid, extension: &str) -> Result<()> {
        let path = self.path_for(job_id, extension);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(%job_id, path = %path.display(), "deleted staged file");
                Ok(())
            }
            Err(err) if err.kind() == IoErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
