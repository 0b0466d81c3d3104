//! Saving result and input files to disk.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::api::JobApi;
use crate::error::{DownloadError, Result};
use crate::sanitize::{redact_path, safe_filename};

/// Writes downloaded bytes into one directory.
#[derive(Debug, Clone)]
pub struct DownloadTarget {
    directory: PathBuf,
}

impl DownloadTarget {
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }

    /// The configured directory, or the current directory.
    pub fn from_config(download_dir: Option<&Path>) -> Self {
        Self::new(download_dir.unwrap_or_else(|| Path::new(".")))
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Stores `content` under a sanitised `filename`, replacing an existing
    /// file of that name. Readers never see a partially written file.
    pub fn store(&self, filename: &str, content: &[u8]) -> std::result::Result<PathBuf, DownloadError> {
        let name =
            safe_filename(filename).ok_or_else(|| DownloadError::UnsafeFilename(filename.to_string()))?;

        std::fs::create_dir_all(&self.directory).map_err(|e| DownloadError::CreateDirectory {
            path: self.directory.clone(),
            source: e,
        })?;

        let final_path = self.directory.join(&name);
        let temp_path = self
            .directory
            .join(format!(".{}.{}.part", name, std::process::id()));

        let written = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .and_then(|mut file| {
                file.write_all(content)?;
                file.sync_all()
            });
        if let Err(e) = written {
            let _ = std::fs::remove_file(&temp_path);
            return Err(DownloadError::WriteFile {
                path: temp_path,
                source: e,
            });
        }

        if let Err(e) = std::fs::rename(&temp_path, &final_path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(DownloadError::WriteFile {
                path: final_path,
                source: e,
            });
        }

        log::info!(
            "Saved {} ({} bytes)",
            redact_path(&final_path),
            content.len()
        );
        Ok(final_path)
    }
}

/// Fetches an analysis result file and stores it under its own name.
pub async fn download_result(
    api: &dyn JobApi,
    filename: &str,
    target: &DownloadTarget,
) -> Result<PathBuf> {
    let bytes = api.result_file(filename).await?;
    Ok(target.store(filename, &bytes)?)
}

/// Fetches a stored input file by id and stores it as `filename`.
pub async fn download_file(
    api: &dyn JobApi,
    file_id: &str,
    filename: &str,
    target: &DownloadTarget,
) -> Result<PathBuf> {
    let bytes = api.download_file(file_id).await?;
    Ok(target.store(filename, &bytes)?)
}
