//! Storage backend capability interface.
//!
//! # Design
//! - Backends implement only file/folder primitives; dispatch, ingestion, and batching stay generic.
//! - Archive export/import have default implementations built from those primitives.
//! - Paths are service-relative: folders end with the separator, files do not, root is `""`.

mod local;
mod memory;

pub use local::LocalDiskProvider;
pub use memory::MemoryProvider;

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use tracing::debug;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::archive::{detect_content_type, sanitize_entry_path};
use crate::error::{FsOpsError, FsOpsResult};
use crate::model::{FileProperties, FolderListing, FolderProperties, ListOptions, Properties};
use crate::path;

/// File/folder primitives a storage backend must provide.
pub trait StorageProvider: Send + Sync {
    /// Whether a folder exists. The root always exists.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend cannot be queried.
    fn folder_exists(&self, path: &str) -> FsOpsResult<bool>;

    /// Whether a file exists.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend cannot be queried.
    fn file_exists(&self, path: &str) -> FsOpsResult<bool>;

    /// List a folder's children, or its whole subtree when `options.full_tree` is set.
    ///
    /// # Errors
    ///
    /// Returns `FsOpsError::NotFound` when the folder does not exist.
    fn list_folder(&self, path: &str, options: ListOptions) -> FsOpsResult<FolderListing>;

    /// Folder metadata and stored properties.
    ///
    /// # Errors
    ///
    /// Returns `FsOpsError::NotFound` when the folder does not exist.
    fn folder_properties(&self, path: &str) -> FsOpsResult<FolderProperties>;

    /// Create a folder and any missing parents. When the folder exists and
    /// `check_exist` is false its properties are merged instead.
    ///
    /// # Errors
    ///
    /// Returns `FsOpsError::AlreadyExists` when the folder exists and `check_exist` is set.
    fn create_folder(&self, path: &str, properties: &Properties, check_exist: bool)
    -> FsOpsResult<()>;

    /// Merge properties into an existing folder.
    ///
    /// # Errors
    ///
    /// Returns `FsOpsError::NotFound` when the folder does not exist.
    fn update_folder_properties(&self, path: &str, properties: &Properties) -> FsOpsResult<()>;

    /// Recursively copy `source` to `dest`.
    ///
    /// # Errors
    ///
    /// Returns `FsOpsError::NotFound` for a missing source, `FsOpsError::AlreadyExists`
    /// when `dest` exists and `check_exist` is set, or `FsOpsError::InvalidInput` when
    /// `dest` lies inside `source`.
    fn copy_folder(&self, dest: &str, source: &str, check_exist: bool) -> FsOpsResult<()>;

    /// Delete a folder. Non-empty folders require `force`.
    ///
    /// # Errors
    ///
    /// Returns `FsOpsError::NotFound`, `FsOpsError::FolderNotEmpty`, or
    /// `FsOpsError::InvalidInput` when asked to delete the root.
    fn delete_folder(&self, path: &str, force: bool) -> FsOpsResult<()>;

    /// File metadata without content.
    ///
    /// # Errors
    ///
    /// Returns `FsOpsError::NotFound` when the file does not exist.
    fn file_properties(&self, path: &str) -> FsOpsResult<FileProperties>;

    /// Read a whole file into memory.
    ///
    /// # Errors
    ///
    /// Returns `FsOpsError::NotFound` when the file does not exist.
    fn read_file(&self, path: &str) -> FsOpsResult<Vec<u8>>;

    /// Open a file for streaming.
    ///
    /// # Errors
    ///
    /// Returns `FsOpsError::NotFound` when the file does not exist.
    fn open_file(&self, path: &str) -> FsOpsResult<Box<dyn Read + Send>>;

    /// Write a file, creating missing parent folders.
    ///
    /// # Errors
    ///
    /// Returns `FsOpsError::AlreadyExists` when the file exists and `check_exist` is set.
    fn write_file(
        &self,
        path: &str,
        content: &[u8],
        content_type: Option<&str>,
        check_exist: bool,
    ) -> FsOpsResult<()>;

    /// Move a local file (upload or fetch staging) into storage.
    ///
    /// # Errors
    ///
    /// Returns `FsOpsError::AlreadyExists` when the file exists and `check_exist` is set.
    fn move_file(
        &self,
        path: &str,
        local: &Path,
        content_type: Option<&str>,
        check_exist: bool,
    ) -> FsOpsResult<()>;

    /// Copy an existing file.
    ///
    /// # Errors
    ///
    /// Returns `FsOpsError::NotFound` for a missing source or `FsOpsError::AlreadyExists`
    /// when `dest` exists and `check_exist` is set.
    fn copy_file(&self, dest: &str, source: &str, check_exist: bool) -> FsOpsResult<()>;

    /// Delete a file.
    ///
    /// # Errors
    ///
    /// Returns `FsOpsError::NotFound` when the file does not exist.
    fn delete_file(&self, path: &str) -> FsOpsResult<()>;

    /// Write a folder's subtree into `dest` as a zip archive. Returns the entry count.
    ///
    /// # Errors
    ///
    /// Returns an error when the folder cannot be listed or the archive cannot be written.
    fn export_archive(&self, path: &str, dest: &mut File) -> FsOpsResult<u64> {
        let base = path::container(path);
        let listing = self.list_folder(&base, ListOptions::everything())?;
        let mut writer = ZipWriter::new(dest);
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut entries = 0_u64;

        for folder in &listing.folder {
            let relative = folder.path.strip_prefix(base.as_str()).unwrap_or(&folder.path);
            writer
                .add_directory(relative, options)
                .map_err(|source| FsOpsError::zip("export_archive.add_directory", &folder.path, source))?;
            entries += 1;
        }
        for file in &listing.file {
            let relative = file.path.strip_prefix(base.as_str()).unwrap_or(&file.path);
            writer
                .start_file(relative, options)
                .map_err(|source| FsOpsError::zip("export_archive.start_file", &file.path, source))?;
            let mut reader = self.open_file(&file.path)?;
            io::copy(&mut reader, &mut writer)
                .map_err(|source| FsOpsError::io("export_archive.copy", &file.path, source))?;
            entries += 1;
        }
        writer
            .finish()
            .map_err(|source| FsOpsError::zip("export_archive.finish", &base, source))?
            .flush()
            .map_err(|source| FsOpsError::io("export_archive.flush", &base, source))?;

        debug!(path = %base, entries, "exported folder archive");
        Ok(entries)
    }

    /// Expand an opened archive into a folder, optionally emptying it first.
    /// Returns the number of entries written.
    ///
    /// # Errors
    ///
    /// Returns `FsOpsError::InvalidInput` for unsafe entry names, or any error raised
    /// by the primitives used to clean and populate the folder.
    fn import_archive(
        &self,
        path: &str,
        archive: &mut ZipArchive<File>,
        clean: bool,
    ) -> FsOpsResult<u64> {
        let base = path::container(path);
        let mut plan = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let entry = archive
                .by_index(index)
                .map_err(|source| FsOpsError::zip("import_archive.read_entry", &base, source))?;
            let relative = sanitize_entry_path(entry.name())?;
            if !relative.is_empty() {
                plan.push((index, relative, entry.is_dir()));
            }
        }

        if self.folder_exists(&base)? {
            if clean {
                let existing = self.list_folder(&base, ListOptions::default())?;
                for folder in &existing.folder {
                    self.delete_folder(&folder.path, true)?;
                }
                for file in &existing.file {
                    self.delete_file(&file.path)?;
                }
            }
        } else {
            self.create_folder(&base, &Properties::new(), false)?;
        }

        let mut entries = 0_u64;
        for (index, relative, is_dir) in plan {
            if is_dir {
                self.create_folder(&path::folder_path(&base, &relative), &Properties::new(), false)?;
            } else {
                let mut entry = archive
                    .by_index(index)
                    .map_err(|source| FsOpsError::zip("import_archive.read_entry", &base, source))?;
                let destination = path::file_path(&base, &relative);
                let mut content = Vec::new();
                entry
                    .read_to_end(&mut content)
                    .map_err(|source| FsOpsError::io("import_archive.read", &destination, source))?;
                let content_type = detect_content_type(&relative, None, &content);
                self.write_file(&destination, &content, Some(&content_type), false)?;
            }
            entries += 1;
        }

        debug!(path = %base, entries, clean, "imported archive");
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_test_support::archive::{write_zip_archive, zip_entries};
    use depot_test_support::fixtures::temp_dir;
    use std::fs;

    type TestResult<T> = anyhow::Result<T>;

    #[test]
    fn default_export_writes_relative_entries() -> TestResult<()> {
        let provider = MemoryProvider::new();
        provider.write_file("docs/a.txt", b"alpha", None, false)?;
        provider.write_file("docs/sub/b.txt", b"beta", None, false)?;
        provider.write_file("other.txt", b"skip", None, false)?;

        let scratch = temp_dir("depot-export-")?;
        let archive_path = scratch.path().join("out.zip");
        let mut file = File::create(&archive_path)?;
        let entries = provider.export_archive("docs/", &mut file)?;
        drop(file);

        assert_eq!(entries, 3);
        let decoded = zip_entries(&fs::read(&archive_path)?)?;
        let names: Vec<_> = decoded.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, ["a.txt", "sub/", "sub/b.txt"]);
        assert_eq!(decoded[2].1, b"beta");
        Ok(())
    }

    #[test]
    fn default_import_rejects_escaping_entries() -> TestResult<()> {
        let provider = MemoryProvider::new();
        let scratch = temp_dir("depot-import-")?;
        let archive_path = scratch.path().join("bad.zip");
        write_zip_archive(&archive_path, &[("../escape.txt", b"x")])?;

        let mut archive = ZipArchive::new(File::open(&archive_path)?)?;
        let err = provider.import_archive("target/", &mut archive, false);
        assert!(matches!(err, Err(FsOpsError::InvalidInput { field: "archive_entry", .. })));
        assert!(!provider.file_exists("escape.txt")?);
        Ok(())
    }

    #[test]
    fn unsafe_entry_leaves_cleaned_target_untouched() -> TestResult<()> {
        let provider = MemoryProvider::new();
        provider.write_file("site/precious.txt", b"keep", None, false)?;
        let scratch = temp_dir("depot-import-")?;
        let archive_path = scratch.path().join("mixed.zip");
        write_zip_archive(&archive_path, &[("ok.txt", b"ok"), ("../evil.txt", b"x")])?;

        let mut archive = ZipArchive::new(File::open(&archive_path)?)?;
        let result = provider.import_archive("site/", &mut archive, true);

        assert!(matches!(result, Err(FsOpsError::InvalidInput { field: "archive_entry", .. })));
        assert_eq!(provider.read_file("site/precious.txt")?, b"keep");
        assert!(!provider.file_exists("site/ok.txt")?);
        assert!(!provider.file_exists("evil.txt")?);
        Ok(())
    }
}
