use std::path::{Path, PathBuf};

use tracing::debug;

use crate::cleanup::TempFiles;
use crate::error::{Error, Result};
use crate::format::{self, MediaKind, SNIFF_LEN};

/// Where the media bytes come from.
#[derive(Debug, Clone)]
enum MediaSource {
    Path(PathBuf),
    Bytes {
        data: Vec<u8>,
        file_name: Option<String>,
    },
}

/// Classified input media. Built only through the constructors, which run
/// format detection, so every value holds a supported [`MediaKind`].
#[derive(Debug, Clone)]
pub struct MediaInput {
    source: MediaSource,
    kind: MediaKind,
}

impl MediaInput {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let kind = format::detect_file(path)?;
        Ok(Self {
            source: MediaSource::Path(path.to_path_buf()),
            kind,
        })
    }

    /// Classify an in-memory upload. `file_name` supplies the extension used for
    /// MPEG-4 containers.
    pub fn from_bytes(data: Vec<u8>, file_name: Option<&str>) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::InvalidInputFormat("input is empty".into()));
        }

        let extension = file_name
            .map(Path::new)
            .and_then(|p| p.extension())
            .and_then(|e| e.to_str());
        let prefix = &data[..data.len().min(SNIFF_LEN)];
        let kind = format::detect(prefix, extension)?;

        Ok(Self {
            source: MediaSource::Bytes {
                data,
                file_name: file_name.map(str::to_string),
            },
            kind,
        })
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// File name for reporting, if one is known.
    pub fn display_name(&self) -> Option<String> {
        match &self.source {
            MediaSource::Path(path) => path
                .file_name()
                .map(|f| f.to_string_lossy().into_owned()),
            MediaSource::Bytes { file_name, .. } => file_name.clone(),
        }
    }

    /// A filesystem path holding the media. Paths are used in place; byte buffers
    /// are written to a file tracked by `temp_files`.
    pub async fn stage(&self, temp_files: &mut TempFiles) -> Result<PathBuf> {
        match &self.source {
            MediaSource::Path(path) => Ok(path.clone()),
            MediaSource::Bytes { data, .. } => {
                let path = temp_files.create(&format!("upload.{}", self.kind.name()))?;
                tokio::fs::write(&path, data).await?;
                debug!(path = %path.display(), bytes = data.len(), "staged upload");
                Ok(path)
            }
        }
    }
}
