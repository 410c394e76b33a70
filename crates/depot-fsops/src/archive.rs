//! Archive detection, staging, expansion, and export.
//!
//! # Design
//! - Expansion happens only when the caller asked for it and the payload looks like a zip.
//! - Archives are opened from a local file; inline bytes are staged first.
//! - Failure to open an archive is request-fatal; no partial result is produced.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Component, Path};

use depot_telemetry::Metrics;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::error::{FsOpsError, FsOpsResult};
use crate::model::{ArchivePayload, ArchiveRequest, Envelope, ItemRecord};
use crate::path;
use crate::provider::StorageProvider;

/// File extension identifying an archive.
pub const ARCHIVE_EXTENSION: &str = "zip";

/// Media types identifying an archive.
pub const ARCHIVE_MEDIA_TYPES: [&str; 3] = [
    "application/zip",
    "application/x-zip-compressed",
    "application/x-zip",
];

/// Zip local-file header signature.
pub const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Pick a media type: declared type, then zip magic, then extension, then octet-stream.
#[must_use]
pub fn detect_content_type(name: &str, declared: Option<&str>, head: &[u8]) -> String {
    if let Some(declared) = declared.map(str::trim).filter(|value| !value.is_empty()) {
        return declared.to_string();
    }
    if head.starts_with(ZIP_MAGIC) {
        return ARCHIVE_MEDIA_TYPES[0].to_string();
    }
    mime_guess::from_path(name)
        .first_raw()
        .unwrap_or(FALLBACK_CONTENT_TYPE)
        .to_string()
}

/// First bytes of a local file for magic sniffing; empty when unreadable.
#[must_use]
pub fn read_head(location: &Path) -> Vec<u8> {
    let mut head = Vec::with_capacity(ZIP_MAGIC.len());
    match File::open(location) {
        Ok(handle) => {
            if let Err(err) = handle.take(ZIP_MAGIC.len() as u64).read_to_end(&mut head) {
                debug!(path = %location.display(), error = %err, "failed to read staged head");
                head.clear();
            }
        }
        Err(err) => debug!(path = %location.display(), error = %err, "failed to open staged file"),
    }
    head
}

/// Whether a payload should be treated as an archive.
#[must_use]
pub fn is_archive(name: &str, content_type: &str) -> bool {
    let media = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    ARCHIVE_MEDIA_TYPES.contains(&media.as_str())
        || Path::new(name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(ARCHIVE_EXTENSION))
}

/// Normalize an archive entry name into a relative, separator-joined path.
///
/// # Errors
///
/// Returns `FsOpsError::InvalidInput` for absolute names or names that climb out with `..`.
pub fn sanitize_entry_path(entry: &str) -> FsOpsResult<String> {
    let candidate = Path::new(entry);
    if candidate.is_absolute() || entry.starts_with(path::SEPARATOR) {
        return Err(FsOpsError::invalid(
            "archive_entry",
            "absolute_path",
            Some(entry.to_string()),
        ));
    }

    let mut segments = Vec::new();
    for component in candidate.components() {
        match component {
            Component::Normal(segment) => segments.push(segment.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => {
                return Err(FsOpsError::invalid(
                    "archive_entry",
                    "invalid_segment",
                    Some(entry.to_string()),
                ));
            }
        }
    }
    Ok(segments.join("/"))
}

/// Expands archives into storage and exports folders as archives.
pub struct ArchiveHandler<'a> {
    provider: &'a dyn StorageProvider,
    staging_dir: &'a Path,
    metrics: Option<&'a Metrics>,
}

impl<'a> ArchiveHandler<'a> {
    /// Handler staging transient files under `staging_dir`.
    #[must_use]
    pub fn new(provider: &'a dyn StorageProvider, staging_dir: &'a Path) -> Self {
        Self {
            provider,
            staging_dir,
            metrics: None,
        }
    }

    /// Record expanded entries on a metrics registry.
    #[must_use]
    pub const fn with_metrics(mut self, metrics: Option<&'a Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Expand an archive into the target folder. Local payloads are consumed.
    ///
    /// # Errors
    ///
    /// Returns `FsOpsError::ArchiveOpen` when the archive cannot be opened, or the
    /// first error raised while populating the folder.
    pub fn extract(&self, request: ArchiveRequest<'_>) -> FsOpsResult<Envelope> {
        let target = path::container(request.target_folder);
        let result = match request.payload {
            ArchivePayload::Inline(bytes) => {
                let staged = self.stage(bytes)?;
                let outcome = self.expand(staged.path(), &target, request.clean);
                if let Err(err) = staged.close() {
                    warn!(error = %err, "failed to remove staged archive");
                }
                outcome
            }
            ArchivePayload::Local(location) => {
                let outcome = self.expand(location, &target, request.clean);
                if let Err(err) = fs::remove_file(location)
                    && err.kind() != std::io::ErrorKind::NotFound
                {
                    warn!(path = %location.display(), error = %err, "failed to remove staged archive");
                }
                outcome
            }
        };

        let entries = result?;
        if let Some(metrics) = self.metrics {
            metrics.add_archive_entries(entries);
        }
        info!(target_folder = %target, entries, clean = request.clean, "archive extracted");
        Ok(Envelope::single_folder(ItemRecord::success(
            path::leaf_name(&target),
            target.as_str(),
        )))
    }

    /// Write a folder's subtree into a transient archive, rewound for reading.
    /// Returns the archive and its entry count; dropping the archive removes it.
    ///
    /// # Errors
    ///
    /// Returns an error when the staging file cannot be created or the export fails.
    pub fn export(&self, folder: &str) -> FsOpsResult<(NamedTempFile, u64)> {
        let mut staged = tempfile::Builder::new()
            .prefix("depot-export-")
            .suffix(".zip")
            .tempfile_in(self.staging_dir)
            .map_err(|source| FsOpsError::io("archive.stage_export", self.staging_dir, source))?;
        let entries = self.provider.export_archive(folder, staged.as_file_mut())?;
        staged
            .as_file_mut()
            .seek(SeekFrom::Start(0))
            .map_err(|source| FsOpsError::io("archive.rewind_export", staged.path(), source))?;
        debug!(folder, entries, staged = %staged.path().display(), "folder exported");
        Ok((staged, entries))
    }

    fn stage(&self, bytes: &[u8]) -> FsOpsResult<NamedTempFile> {
        let mut staged = tempfile::Builder::new()
            .prefix("depot-archive-")
            .suffix(".zip")
            .tempfile_in(self.staging_dir)
            .map_err(|source| FsOpsError::io("archive.stage", self.staging_dir, source))?;
        if let Err(source) = staged.write_all(bytes).and_then(|()| staged.flush()) {
            return Err(FsOpsError::io("archive.stage_write", staged.path(), source));
        }
        debug!(staged = %staged.path().display(), bytes = bytes.len(), "archive staged");
        Ok(staged)
    }

    fn expand(&self, location: &Path, target: &str, clean: bool) -> FsOpsResult<u64> {
        let file = File::open(location).map_err(|source| FsOpsError::ArchiveOpen {
            path: location.to_path_buf(),
            source: zip::result::ZipError::Io(source),
        })?;
        let mut archive = ZipArchive::new(file).map_err(|source| FsOpsError::ArchiveOpen {
            path: location.to_path_buf(),
            source,
        })?;
        self.provider.import_archive(target, &mut archive, clean)
    }
}
