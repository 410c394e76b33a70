//! Local-disk storage backend rooted at a single directory.
//!
//! # Design
//! - Every service path is resolved segment by segment beneath the root; `.`/`..` never resolve.
//! - Folder properties persist in `<folder>/.depot/properties.json`, hidden from listings.
//! - Moves prefer `rename` and fall back to copy + remove across filesystems.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use super::StorageProvider;
use crate::archive::{detect_content_type, read_head};
use crate::error::{FsOpsError, FsOpsResult, ResourceKind};
use crate::model::{
    FileEntry, FileProperties, FolderEntry, FolderListing, FolderProperties, ListOptions,
    Properties,
};
use crate::path;

/// Name of the per-folder metadata directory.
const META_DIR: &str = ".depot";
const PROPERTIES_FILE: &str = "properties.json";

/// Backend storing folders and files under a local directory.
#[derive(Debug, Clone)]
pub struct LocalDiskProvider {
    root: PathBuf,
}

impl LocalDiskProvider {
    /// Open (and create if needed) a storage root.
    ///
    /// # Errors
    ///
    /// Returns `FsOpsError::Io` when the root cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> FsOpsResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| FsOpsError::io("local.create_root", &root, source))?;
        debug!(root = %root.display(), "local storage root ready");
        Ok(Self { root })
    }

    /// Storage root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn locate(&self, service_path: &str) -> FsOpsResult<PathBuf> {
        let mut resolved = self.root.clone();
        for segment in service_path.split(path::SEPARATOR).filter(|s| !s.is_empty()) {
            let mut components = Path::new(segment).components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(name)), None) if name != META_DIR => resolved.push(name),
                _ => {
                    return Err(FsOpsError::invalid(
                        "path",
                        "invalid_segment",
                        Some(service_path.to_string()),
                    ));
                }
            }
        }
        Ok(resolved)
    }

    fn locate_folder(&self, service_path: &str) -> FsOpsResult<PathBuf> {
        let dir = self.locate(service_path)?;
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(FsOpsError::not_found(ResourceKind::Folder, path::container(service_path)))
        }
    }

    fn locate_file(&self, service_path: &str) -> FsOpsResult<PathBuf> {
        let file = self.locate(service_path)?;
        if file.is_file() {
            Ok(file)
        } else {
            Err(FsOpsError::not_found(ResourceKind::File, service_path))
        }
    }

    fn prepare_file_target(&self, service_path: &str, check_exist: bool) -> FsOpsResult<PathBuf> {
        if service_path.is_empty() || service_path.ends_with(path::SEPARATOR) {
            return Err(FsOpsError::invalid(
                "path",
                "not_a_file_path",
                Some(service_path.to_string()),
            ));
        }
        let target = self.locate(service_path)?;
        if target.is_dir() {
            return Err(FsOpsError::already_exists(
                ResourceKind::Folder,
                path::container(service_path),
            ));
        }
        if check_exist && target.is_file() {
            return Err(FsOpsError::already_exists(ResourceKind::File, service_path));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| FsOpsError::io("local.create_parent", parent, source))?;
        }
        Ok(target)
    }

    fn service_path(&self, absolute: &Path, is_dir: bool) -> FsOpsResult<String> {
        let relative = absolute.strip_prefix(&self.root).map_err(|_| {
            FsOpsError::invalid(
                "path",
                "outside_root",
                Some(absolute.to_string_lossy().into_owned()),
            )
        })?;
        let mut joined = relative
            .components()
            .filter_map(|component| match component {
                Component::Normal(segment) => Some(segment.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/");
        if is_dir && !joined.is_empty() {
            joined.push(path::SEPARATOR);
        }
        Ok(joined)
    }

    fn read_properties(dir: &Path) -> FsOpsResult<Properties> {
        let file = dir.join(META_DIR).join(PROPERTIES_FILE);
        if !file.is_file() {
            return Ok(Properties::new());
        }
        let raw = fs::read(&file).map_err(|source| FsOpsError::io("local.read_properties", &file, source))?;
        serde_json::from_slice(&raw)
            .map_err(|source| FsOpsError::json("local.parse_properties", &file, source))
    }

    fn merge_properties(dir: &Path, properties: &Properties) -> FsOpsResult<()> {
        if properties.is_empty() {
            return Ok(());
        }
        let mut stored = Self::read_properties(dir)?;
        stored.extend(properties.iter().map(|(k, v)| (k.clone(), v.clone())));

        let meta_dir = dir.join(META_DIR);
        fs::create_dir_all(&meta_dir)
            .map_err(|source| FsOpsError::io("local.create_meta_dir", &meta_dir, source))?;
        let file = meta_dir.join(PROPERTIES_FILE);
        let encoded = serde_json::to_vec_pretty(&stored)
            .map_err(|source| FsOpsError::json("local.encode_properties", &file, source))?;
        fs::write(&file, encoded).map_err(|source| FsOpsError::io("local.write_properties", &file, source))
    }

    fn has_visible_children(dir: &Path) -> FsOpsResult<bool> {
        let mut entries =
            fs::read_dir(dir).map_err(|source| FsOpsError::io("local.read_dir", dir, source))?;
        entries.try_fold(false, |found, entry| {
            let entry = entry.map_err(|source| FsOpsError::io("local.read_dir", dir, source))?;
            Ok(found || entry.file_name() != META_DIR)
        })
    }
}

fn is_meta(entry: &DirEntry) -> bool {
    entry.file_name() == META_DIR
}

fn modified_at(metadata: &fs::Metadata) -> Option<DateTime<Utc>> {
    metadata.modified().ok().map(DateTime::<Utc>::from)
}

fn copy_tree(source: &Path, destination: &Path) -> FsOpsResult<()> {
    fs::create_dir_all(destination)
        .map_err(|source_err| FsOpsError::io("copy_tree.create_dir", destination, source_err))?;

    for entry in WalkDir::new(source) {
        let entry =
            entry.map_err(|source_err| FsOpsError::walkdir("copy_tree.walk", source, source_err))?;
        let relative = entry.path().strip_prefix(source).map_err(|_| {
            FsOpsError::invalid(
                "source_path",
                "strip_prefix",
                Some(entry.path().to_string_lossy().into_owned()),
            )
        })?;
        let target_path = destination.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target_path).map_err(|source_err| {
                FsOpsError::io("copy_tree.create_dir", &target_path, source_err)
            })?;
        } else {
            fs::copy(entry.path(), &target_path).map_err(|source_err| {
                FsOpsError::io("copy_tree.copy_file", &target_path, source_err)
            })?;
        }
    }
    Ok(())
}

fn move_local_file(source: &Path, destination: &Path) -> FsOpsResult<()> {
    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(_rename_err) => {
            fs::copy(source, destination).map_err(|source_err| {
                FsOpsError::io("move_file.copy", destination, source_err)
            })?;
            match fs::remove_file(source) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(FsOpsError::io("move_file.cleanup", source, err)),
            }
        }
    }
}

impl StorageProvider for LocalDiskProvider {
    fn folder_exists(&self, path: &str) -> FsOpsResult<bool> {
        Ok(self.locate(path)?.is_dir())
    }

    fn file_exists(&self, path: &str) -> FsOpsResult<bool> {
        Ok(self.locate(path)?.is_file())
    }

    fn list_folder(&self, path: &str, options: ListOptions) -> FsOpsResult<FolderListing> {
        let dir = self.locate_folder(path)?;
        let max_depth = if options.full_tree { usize::MAX } else { 1 };
        let mut listing = FolderListing {
            path: path::container(path),
            ..FolderListing::default()
        };

        let walker = WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(max_depth)
            .into_iter()
            .filter_entry(|entry| !is_meta(entry));
        for entry in walker {
            let entry = entry.map_err(|source| FsOpsError::walkdir("local.list", &dir, source))?;
            let is_dir = entry.file_type().is_dir();
            if (is_dir && !options.include_folders) || (!is_dir && !options.include_files) {
                continue;
            }
            let metadata = entry
                .metadata()
                .map_err(|source| FsOpsError::walkdir("local.metadata", entry.path(), source))?;
            let service_path = self.service_path(entry.path(), is_dir)?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_dir {
                listing.folder.push(FolderEntry {
                    name,
                    path: service_path,
                    last_modified: modified_at(&metadata),
                });
            } else {
                listing.file.push(FileEntry {
                    content_type: detect_content_type(&name, None, &read_head(entry.path())),
                    name,
                    path: service_path,
                    size: metadata.len(),
                    last_modified: modified_at(&metadata),
                });
            }
        }
        listing.folder.sort_by(|a, b| a.path.cmp(&b.path));
        listing.file.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(listing)
    }

    fn folder_properties(&self, path: &str) -> FsOpsResult<FolderProperties> {
        let dir = self.locate_folder(path)?;
        let metadata =
            fs::metadata(&dir).map_err(|source| FsOpsError::io("local.metadata", &dir, source))?;
        let base = path::container(path);
        Ok(FolderProperties {
            name: path::leaf_name(&base).to_string(),
            properties: Self::read_properties(&dir)?,
            path: base,
            last_modified: modified_at(&metadata),
        })
    }

    fn create_folder(
        &self,
        path: &str,
        properties: &Properties,
        check_exist: bool,
    ) -> FsOpsResult<()> {
        let dir = self.locate(path)?;
        if dir.is_file() {
            return Err(FsOpsError::already_exists(
                ResourceKind::File,
                path.trim_end_matches(path::SEPARATOR),
            ));
        }
        if check_exist && dir.is_dir() {
            return Err(FsOpsError::already_exists(ResourceKind::Folder, path::container(path)));
        }
        fs::create_dir_all(&dir).map_err(|source| FsOpsError::io("local.create_folder", &dir, source))?;
        Self::merge_properties(&dir, properties)
    }

    fn update_folder_properties(&self, path: &str, properties: &Properties) -> FsOpsResult<()> {
        let dir = self.locate_folder(path)?;
        Self::merge_properties(&dir, properties)
    }

    fn copy_folder(&self, dest: &str, source: &str, check_exist: bool) -> FsOpsResult<()> {
        let from = self.locate_folder(source)?;
        let dest_path = path::container(dest);
        let source_path = path::container(source);
        if dest_path == source_path || path::is_within(&source_path, &dest_path) {
            return Err(FsOpsError::invalid("dest", "inside_source", Some(dest_path)));
        }
        let to = self.locate(&dest_path)?;
        if check_exist && to.is_dir() {
            return Err(FsOpsError::already_exists(ResourceKind::Folder, dest_path));
        }
        copy_tree(&from, &to)
    }

    fn delete_folder(&self, path: &str, force: bool) -> FsOpsResult<()> {
        if path::container(path).is_empty() {
            return Err(FsOpsError::invalid("path", "root_folder", None));
        }
        let dir = self.locate_folder(path)?;
        if !force && Self::has_visible_children(&dir)? {
            return Err(FsOpsError::FolderNotEmpty {
                path: path::container(path),
            });
        }
        fs::remove_dir_all(&dir).map_err(|source| FsOpsError::io("local.delete_folder", &dir, source))
    }

    fn file_properties(&self, path: &str) -> FsOpsResult<FileProperties> {
        let file = self.locate_file(path)?;
        let metadata =
            fs::metadata(&file).map_err(|source| FsOpsError::io("local.metadata", &file, source))?;
        let name = path::leaf_name(path).to_string();
        Ok(FileProperties {
            content_type: detect_content_type(&name, None, &read_head(&file)),
            name,
            path: path.to_string(),
            size: metadata.len(),
            last_modified: modified_at(&metadata),
            content: None,
        })
    }

    fn read_file(&self, path: &str) -> FsOpsResult<Vec<u8>> {
        let file = self.locate_file(path)?;
        fs::read(&file).map_err(|source| FsOpsError::io("local.read_file", &file, source))
    }

    fn open_file(&self, path: &str) -> FsOpsResult<Box<dyn Read + Send>> {
        let file = self.locate_file(path)?;
        let handle =
            File::open(&file).map_err(|source| FsOpsError::io("local.open_file", &file, source))?;
        Ok(Box::new(handle))
    }

    fn write_file(
        &self,
        path: &str,
        content: &[u8],
        _content_type: Option<&str>,
        check_exist: bool,
    ) -> FsOpsResult<()> {
        let target = self.prepare_file_target(path, check_exist)?;
        fs::write(&target, content).map_err(|source| FsOpsError::io("local.write_file", &target, source))
    }

    fn move_file(
        &self,
        path: &str,
        local: &Path,
        _content_type: Option<&str>,
        check_exist: bool,
    ) -> FsOpsResult<()> {
        let target = self.prepare_file_target(path, check_exist)?;
        move_local_file(local, &target)
    }

    fn copy_file(&self, dest: &str, source: &str, check_exist: bool) -> FsOpsResult<()> {
        let from = self.locate_file(source)?;
        let target = self.prepare_file_target(dest, check_exist)?;
        fs::copy(&from, &target)
            .map(|_| ())
            .map_err(|source| FsOpsError::io("local.copy_file", &target, source))
    }

    fn delete_file(&self, path: &str) -> FsOpsResult<()> {
        let file = self.locate_file(path)?;
        fs::remove_file(&file).map_err(|source| FsOpsError::io("local.delete_file", &file, source))
    }
}
