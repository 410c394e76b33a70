//! In-memory storage backend.
//!
//! Folders and files live in ordered maps keyed by service-relative path, so
//! listings come out sorted without extra work.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::error;

use super::StorageProvider;
use crate::archive::detect_content_type;
use crate::error::{FsOpsError, FsOpsResult, ResourceKind};
use crate::model::{
    FileEntry, FileProperties, FolderEntry, FolderListing, FolderProperties, ListOptions,
    Properties,
};
use crate::path;

#[derive(Debug, Clone)]
struct FolderNode {
    properties: Properties,
    modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct FileNode {
    content: Vec<u8>,
    content_type: String,
    modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemoryState {
    folders: BTreeMap<String, FolderNode>,
    files: BTreeMap<String, FileNode>,
}

impl MemoryState {
    fn ensure_folder(&mut self, folder: &str) {
        let mut current = String::new();
        for segment in folder.split(path::SEPARATOR).filter(|s| !s.is_empty()) {
            current = path::folder_path(&current, segment);
            self.folders
                .entry(current.clone())
                .or_insert_with(|| FolderNode {
                    properties: Properties::new(),
                    modified: Utc::now(),
                });
        }
    }

    fn folder_node(&self, folder: &str) -> FsOpsResult<&FolderNode> {
        self.folders
            .get(folder)
            .ok_or_else(|| FsOpsError::not_found(ResourceKind::Folder, folder))
    }

    fn file_node(&self, file: &str) -> FsOpsResult<&FileNode> {
        self.files
            .get(file)
            .ok_or_else(|| FsOpsError::not_found(ResourceKind::File, file))
    }

    fn has_children(&self, folder: &str) -> bool {
        self.folders.keys().any(|key| path::is_within(folder, key))
            || self.files.keys().any(|key| path::is_within(folder, key))
    }

    fn remove_subtree(&mut self, folder: &str) {
        self.folders
            .retain(|key, _| key != folder && !path::is_within(folder, key));
        self.files.retain(|key, _| !path::is_within(folder, key));
    }

    fn put_file(&mut self, file: &str, content: Vec<u8>, content_type: Option<&str>) {
        self.ensure_folder(&path::parent_folder(file));
        let content_type =
            detect_content_type(path::leaf_name(file), content_type, &content);
        self.files.insert(
            file.to_string(),
            FileNode {
                content,
                content_type,
                modified: Utc::now(),
            },
        );
    }

    fn check_file_target(&self, file: &str, check_exist: bool) -> FsOpsResult<()> {
        if file.is_empty() || file.ends_with(path::SEPARATOR) {
            return Err(FsOpsError::invalid("path", "not_a_file_path", Some(file.to_string())));
        }
        if self.folders.contains_key(&path::container(file)) {
            return Err(FsOpsError::already_exists(ResourceKind::Folder, path::container(file)));
        }
        if check_exist && self.files.contains_key(file) {
            return Err(FsOpsError::already_exists(ResourceKind::File, file));
        }
        Ok(())
    }
}

/// Mutex-guarded in-memory backend.
#[derive(Debug)]
pub struct MemoryProvider {
    state: Mutex<MemoryState>,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider {
    /// Empty store containing only the root folder.
    #[must_use]
    pub fn new() -> Self {
        let mut state = MemoryState::default();
        state.folders.insert(
            String::new(),
            FolderNode {
                properties: Properties::new(),
                modified: Utc::now(),
            },
        );
        Self {
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("memory provider mutex poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }
}

impl StorageProvider for MemoryProvider {
    fn folder_exists(&self, path: &str) -> FsOpsResult<bool> {
        Ok(self.lock().folders.contains_key(&path::container(path)))
    }

    fn file_exists(&self, path: &str) -> FsOpsResult<bool> {
        Ok(self.lock().files.contains_key(path))
    }

    fn list_folder(&self, path: &str, options: ListOptions) -> FsOpsResult<FolderListing> {
        let base = path::container(path);
        let state = self.lock();
        state.folder_node(&base)?;

        let in_scope = |key: &str| {
            path::is_within(&base, key) && (options.full_tree || path::parent_folder(key) == base)
        };
        let mut listing = FolderListing {
            path: base.clone(),
            ..FolderListing::default()
        };
        if options.include_folders {
            listing.folder = state
                .folders
                .iter()
                .filter(|(key, _)| in_scope(key.as_str()))
                .map(|(key, node)| FolderEntry {
                    name: path::leaf_name(key).to_string(),
                    path: key.clone(),
                    last_modified: Some(node.modified),
                })
                .collect();
        }
        if options.include_files {
            listing.file = state
                .files
                .iter()
                .filter(|(key, _)| in_scope(key.as_str()))
                .map(|(key, node)| FileEntry {
                    name: path::leaf_name(key).to_string(),
                    path: key.clone(),
                    content_type: node.content_type.clone(),
                    size: node.content.len() as u64,
                    last_modified: Some(node.modified),
                })
                .collect();
        }
        Ok(listing)
    }

    fn folder_properties(&self, path: &str) -> FsOpsResult<FolderProperties> {
        let base = path::container(path);
        let state = self.lock();
        let node = state.folder_node(&base)?;
        Ok(FolderProperties {
            name: path::leaf_name(&base).to_string(),
            path: base.clone(),
            properties: node.properties.clone(),
            last_modified: Some(node.modified),
        })
    }

    fn create_folder(
        &self,
        path: &str,
        properties: &Properties,
        check_exist: bool,
    ) -> FsOpsResult<()> {
        let base = path::container(path);
        let mut state = self.lock();
        if state.files.contains_key(base.trim_end_matches(path::SEPARATOR)) {
            return Err(FsOpsError::already_exists(
                ResourceKind::File,
                base.trim_end_matches(path::SEPARATOR),
            ));
        }
        if state.folders.contains_key(&base) && check_exist {
            return Err(FsOpsError::already_exists(ResourceKind::Folder, base));
        }
        state.ensure_folder(&base);
        if let Some(node) = state.folders.get_mut(&base) {
            node.properties
                .extend(properties.iter().map(|(k, v)| (k.clone(), v.clone())));
            node.modified = Utc::now();
        }
        Ok(())
    }

    fn update_folder_properties(&self, path: &str, properties: &Properties) -> FsOpsResult<()> {
        let base = path::container(path);
        let mut state = self.lock();
        let node = state
            .folders
            .get_mut(&base)
            .ok_or_else(|| FsOpsError::not_found(ResourceKind::Folder, base.as_str()))?;
        node.properties
            .extend(properties.iter().map(|(k, v)| (k.clone(), v.clone())));
        node.modified = Utc::now();
        Ok(())
    }

    fn copy_folder(&self, dest: &str, source: &str, check_exist: bool) -> FsOpsResult<()> {
        let dest = path::container(dest);
        let source = path::container(source);
        let mut state = self.lock();
        state.folder_node(&source)?;
        if dest == source || path::is_within(&source, &dest) {
            return Err(FsOpsError::invalid("dest", "inside_source", Some(dest)));
        }
        if check_exist && state.folders.contains_key(&dest) {
            return Err(FsOpsError::already_exists(ResourceKind::Folder, dest));
        }

        let rebase = |key: &str| format!("{dest}{}", &key[source.len()..]);
        let folders: Vec<_> = state
            .folders
            .iter()
            .filter(|(key, _)| key.as_str() == source || path::is_within(&source, key))
            .map(|(key, node)| (rebase(key.as_str()), node.clone()))
            .collect();
        let files: Vec<_> = state
            .files
            .iter()
            .filter(|(key, _)| path::is_within(&source, key))
            .map(|(key, node)| (rebase(key.as_str()), node.clone()))
            .collect();

        state.ensure_folder(&dest);
        state.folders.extend(folders);
        state.files.extend(files);
        Ok(())
    }

    fn delete_folder(&self, path: &str, force: bool) -> FsOpsResult<()> {
        let base = path::container(path);
        if base.is_empty() {
            return Err(FsOpsError::invalid("path", "root_folder", None));
        }
        let mut state = self.lock();
        state.folder_node(&base)?;
        if !force && state.has_children(&base) {
            return Err(FsOpsError::FolderNotEmpty { path: base });
        }
        state.remove_subtree(&base);
        Ok(())
    }

    fn file_properties(&self, path: &str) -> FsOpsResult<FileProperties> {
        let state = self.lock();
        let node = state.file_node(path)?;
        Ok(FileProperties {
            name: path::leaf_name(path).to_string(),
            path: path.to_string(),
            content_type: node.content_type.clone(),
            size: node.content.len() as u64,
            last_modified: Some(node.modified),
            content: None,
        })
    }

    fn read_file(&self, path: &str) -> FsOpsResult<Vec<u8>> {
        Ok(self.lock().file_node(path)?.content.clone())
    }

    fn open_file(&self, path: &str) -> FsOpsResult<Box<dyn Read + Send>> {
        let content = self.read_file(path)?;
        Ok(Box::new(Cursor::new(content)))
    }

    fn write_file(
        &self,
        path: &str,
        content: &[u8],
        content_type: Option<&str>,
        check_exist: bool,
    ) -> FsOpsResult<()> {
        let mut state = self.lock();
        state.check_file_target(path, check_exist)?;
        state.put_file(path, content.to_vec(), content_type);
        Ok(())
    }

    fn move_file(
        &self,
        path: &str,
        local: &Path,
        content_type: Option<&str>,
        check_exist: bool,
    ) -> FsOpsResult<()> {
        let mut state = self.lock();
        state.check_file_target(path, check_exist)?;
        let content =
            fs::read(local).map_err(|source| FsOpsError::io("move_file.read", local, source))?;
        state.put_file(path, content, content_type);
        drop(state);
        fs::remove_file(local).map_err(|source| FsOpsError::io("move_file.remove", local, source))
    }

    fn copy_file(&self, dest: &str, source: &str, check_exist: bool) -> FsOpsResult<()> {
        let mut state = self.lock();
        let node = state.file_node(source)?.clone();
        state.check_file_target(dest, check_exist)?;
        state.put_file(dest, node.content, Some(&node.content_type));
        Ok(())
    }

    fn delete_file(&self, path: &str) -> FsOpsResult<()> {
        self.lock()
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| FsOpsError::not_found(ResourceKind::File, path))
    }
}
