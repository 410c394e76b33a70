//! Request-scoped descriptors and read models.

mod envelope;

pub use envelope::{Envelope, ItemError, ItemRecord};

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Free-form folder properties.
pub type Properties = BTreeMap<String, Value>;

/// Existing location to copy from, optionally removed once copied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopySource {
    /// Source path relative to the service root.
    pub path: String,
    /// Delete the source after a successful copy (move semantics).
    pub delete_source: bool,
}

/// Folder to create or copy.
#[derive(Debug, Clone, PartialEq)]
pub struct FolderDescriptor {
    /// Folder name as supplied by the caller.
    pub name: String,
    /// Destination path with a trailing separator.
    pub path: String,
    /// Properties to attach on creation.
    pub properties: Properties,
    /// Copy source when the entry describes a copy or move.
    pub source: Option<CopySource>,
}

/// Content carried by a file descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    /// Bytes to write directly (already decoded).
    Inline(Vec<u8>),
    /// Existing file to copy or move.
    Copy(CopySource),
}

/// File to write or copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    /// File name as supplied by the caller.
    pub name: String,
    /// Destination path.
    pub path: String,
    /// Payload or copy source.
    pub content: FileContent,
    /// Declared media type, if any.
    pub content_type: Option<String>,
    /// Whether the payload arrived base64 encoded.
    pub is_base64: bool,
}

/// Item addressed by a batch delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteTarget {
    /// Name echoed back in the result record.
    pub name: String,
    /// Path to delete relative to the service root.
    pub path: String,
}

/// Location of an archive to expand.
#[derive(Debug, Clone, Copy)]
pub enum ArchivePayload<'a> {
    /// Archive bytes held in memory.
    Inline(&'a [u8]),
    /// Archive already on local disk (upload or fetch staging).
    Local(&'a std::path::Path),
}

/// Archive expansion request.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveRequest<'a> {
    /// Folder the entries land in.
    pub target_folder: &'a str,
    /// Archive bytes or staged location.
    pub payload: ArchivePayload<'a>,
    /// Remove the target folder's existing content first.
    pub clean: bool,
}

/// Filters applied to folder listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListOptions {
    /// Include file entries.
    pub include_files: bool,
    /// Include folder entries.
    pub include_folders: bool,
    /// Recurse into sub-folders.
    pub full_tree: bool,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            include_files: true,
            include_folders: true,
            full_tree: false,
        }
    }
}

impl ListOptions {
    /// Every folder and file beneath a folder.
    #[must_use]
    pub const fn everything() -> Self {
        Self {
            include_files: true,
            include_folders: true,
            full_tree: true,
        }
    }
}

/// Folder entry in a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderEntry {
    /// Folder name.
    pub name: String,
    /// Folder path with a trailing separator.
    pub path: String,
    /// Last modification time when the backend tracks one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

/// File entry in a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    /// File name.
    pub name: String,
    /// File path.
    pub path: String,
    /// Detected or stored media type.
    pub content_type: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time when the backend tracks one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

/// Folder listing returned by read requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FolderListing {
    /// Listed folder path.
    pub path: String,
    /// Folder entries, sorted by path.
    pub folder: Vec<FolderEntry>,
    /// File entries, sorted by path.
    pub file: Vec<FileEntry>,
}

/// Folder metadata returned by properties requests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FolderProperties {
    /// Folder name; empty for the root.
    pub name: String,
    /// Folder path.
    pub path: String,
    /// Stored properties.
    pub properties: Properties,
    /// Last modification time when the backend tracks one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

/// File metadata returned by properties requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileProperties {
    /// File name.
    pub name: String,
    /// File path.
    pub path: String,
    /// Detected or stored media type.
    pub content_type: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time when the backend tracks one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    /// Base64 content when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Local file produced by upload staging or remote fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    /// Client-facing file name.
    pub name: String,
    /// Declared media type.
    pub content_type: Option<String>,
    /// Location on local disk.
    pub location: PathBuf,
}
