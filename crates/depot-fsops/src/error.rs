//! # Design
//!
//! - Provide structured, constant-message errors for the storage request pipeline.
//! - Capture operation context (paths, fields, inputs) in variant fields, not messages.
//! - Classify every failure into a small category set callers can map to responses.

use std::fmt::{self, Display, Formatter};
use std::io;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::request::{Permission, Verb};

/// Result type for storage operations.
pub type FsOpsResult<T> = Result<T, FsOpsError>;

/// Kind of resource an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// A folder (or the service root).
    Folder,
    /// A single file.
    File,
}

impl ResourceKind {
    /// Lowercase label used in logs, metrics, and envelopes.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Folder => "folder",
            Self::File => "file",
        }
    }
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification of failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed or contradictory request input.
    Validation,
    /// The addressed file or folder does not exist.
    NotFound,
    /// The operation collides with existing state.
    Conflict,
    /// The caller lacks the permission for the verb.
    Permission,
    /// Storage, archive, or transport failure.
    Backend,
}

/// Errors produced while serving storage requests.
#[derive(Debug, Error)]
pub enum FsOpsError {
    /// Input validation failures.
    #[error("fsops invalid input")]
    InvalidInput {
        /// Field that failed validation.
        field: &'static str,
        /// Static reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// Header-declared name disagrees with the addressed resource.
    #[error("fsops name mismatch")]
    NameMismatch {
        /// Name declared by the request header.
        header: String,
        /// Leaf name of the resource path.
        resource: String,
    },
    /// Request body could not be parsed as structured data.
    #[error("fsops malformed request body")]
    MalformedBody {
        /// Underlying JSON error.
        source: serde_json::Error,
    },
    /// Base64 payload could not be decoded.
    #[error("fsops base64 decode failure")]
    Base64 {
        /// Field carrying the payload.
        field: &'static str,
        /// Underlying decode error.
        source: base64::DecodeError,
    },
    /// Addressed resource does not exist.
    #[error("fsops resource not found")]
    NotFound {
        /// Kind of resource that was looked up.
        kind: ResourceKind,
        /// Resource path relative to the service root.
        path: String,
    },
    /// Resource already exists and the request asked for an existence check.
    #[error("fsops resource already exists")]
    AlreadyExists {
        /// Kind of resource that collided.
        kind: ResourceKind,
        /// Resource path relative to the service root.
        path: String,
    },
    /// Folder still has content and deletion was not forced.
    #[error("fsops folder not empty")]
    FolderNotEmpty {
        /// Folder path relative to the service root.
        path: String,
    },
    /// Authorizer rejected the request.
    #[error("fsops permission denied")]
    PermissionDenied {
        /// Permission that was required.
        permission: Permission,
        /// Resource path relative to the service root.
        path: String,
    },
    /// Upload layer reported a failed transfer for an item.
    #[error("fsops upload failed")]
    UploadFailed {
        /// Client-supplied file name.
        name: String,
        /// Reason reported by the upload layer.
        reason: String,
    },
    /// Archive could not be opened; aborts the whole request.
    #[error("fsops archive unreadable")]
    ArchiveOpen {
        /// Staged archive location.
        path: PathBuf,
        /// Underlying zip error.
        source: zip::result::ZipError,
    },
    /// IO failures while interacting with the filesystem.
    #[error("fsops io failure")]
    Io {
        /// Operation that triggered the IO failure.
        operation: &'static str,
        /// Path involved in the IO failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// JSON serialization failures for stored metadata.
    #[error("fsops json failure")]
    Json {
        /// Operation that triggered the JSON failure.
        operation: &'static str,
        /// Path involved in the JSON failure.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
    /// Walkdir traversal failures.
    #[error("fsops walkdir failure")]
    Walkdir {
        /// Operation that triggered the walkdir failure.
        operation: &'static str,
        /// Path involved in the walkdir failure.
        path: PathBuf,
        /// Underlying walkdir error.
        source: walkdir::Error,
    },
    /// Zip archive failures after the archive was opened.
    #[error("fsops zip failure")]
    Zip {
        /// Operation that triggered the archive failure.
        operation: &'static str,
        /// Path involved in the archive failure.
        path: String,
        /// Underlying zip error.
        source: zip::result::ZipError,
    },
    /// Remote fetch transport failures.
    #[error("fsops remote fetch failure")]
    Fetch {
        /// URL being fetched.
        url: String,
        /// Underlying HTTP client error.
        source: reqwest::Error,
    },
    /// Remote payload exceeded the configured ceiling.
    #[error("fsops remote payload too large")]
    FetchTooLarge {
        /// URL being fetched.
        url: String,
        /// Configured ceiling in bytes.
        limit: u64,
    },
    /// Operation is not available in this deployment.
    #[error("fsops unsupported operation")]
    Unsupported {
        /// Operation that is unsupported.
        operation: &'static str,
        /// Optional value that triggered the unsupported error.
        value: Option<String>,
    },
    /// Request-level wrapper adding verb and path context.
    #[error("fsops request failed")]
    Request {
        /// Verb being served.
        verb: Verb,
        /// Normalized resource path of the request.
        path: String,
        /// Underlying failure.
        source: Box<FsOpsError>,
    },
}

impl FsOpsError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: serde_json::Error,
    ) -> Self {
        Self::Json {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn walkdir(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: walkdir::Error,
    ) -> Self {
        Self::Walkdir {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn zip(
        operation: &'static str,
        path: impl Into<String>,
        source: zip::result::ZipError,
    ) -> Self {
        Self::Zip {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid(
        field: &'static str,
        reason: &'static str,
        value: Option<String>,
    ) -> Self {
        Self::InvalidInput {
            field,
            reason,
            value,
        }
    }

    pub(crate) fn not_found(kind: ResourceKind, path: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            path: path.into(),
        }
    }

    pub(crate) fn already_exists(kind: ResourceKind, path: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind,
            path: path.into(),
        }
    }

    /// Wrap a request-fatal error with the verb and path being served.
    #[must_use]
    pub fn in_request(self, verb: Verb, path: impl Into<String>) -> Self {
        match self {
            wrapped @ Self::Request { .. } => wrapped,
            other => Self::Request {
                verb,
                path: path.into(),
                source: Box::new(other),
            },
        }
    }

    /// Innermost error, looking through request wrappers.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Request { source, .. } => source.root(),
            other => other,
        }
    }

    /// Classify the failure.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self.root() {
            Self::InvalidInput { .. }
            | Self::NameMismatch { .. }
            | Self::MalformedBody { .. }
            | Self::Base64 { .. } => ErrorCategory::Validation,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::AlreadyExists { .. } | Self::FolderNotEmpty { .. } => ErrorCategory::Conflict,
            Self::PermissionDenied { .. } => ErrorCategory::Permission,
            _ => ErrorCategory::Backend,
        }
    }

    /// Whether the failure must abort the request even inside a batch.
    #[must_use]
    pub fn is_request_fatal(&self) -> bool {
        matches!(
            self.root(),
            Self::ArchiveOpen { .. }
                | Self::InvalidInput {
                    field: "archive_entry",
                    ..
                }
        )
    }

    /// Human-readable rendering of the message with its context fields.
    #[must_use]
    pub fn describe(&self) -> String {
        let context = match self {
            Self::InvalidInput {
                field,
                reason,
                value,
            } => match value {
                Some(value) => format!("field={field}, reason={reason}, value={value}"),
                None => format!("field={field}, reason={reason}"),
            },
            Self::NameMismatch { header, resource } => {
                format!("header={header}, resource={resource}")
            }
            Self::MalformedBody { source } => source.to_string(),
            Self::Base64 { field, source } => format!("field={field}, {source}"),
            Self::NotFound { kind, path } | Self::AlreadyExists { kind, path } => {
                format!("kind={kind}, path={path}")
            }
            Self::FolderNotEmpty { path } => format!("path={path}"),
            Self::PermissionDenied { permission, path } => {
                format!("permission={}, path={path}", permission.as_str())
            }
            Self::UploadFailed { name, reason } => format!("name={name}, reason={reason}"),
            Self::ArchiveOpen { path, source } => format!("path={}, {source}", path.display()),
            Self::Io {
                operation,
                path,
                source,
            } => format!("operation={operation}, path={}, {source}", path.display()),
            Self::Json {
                operation,
                path,
                source,
            } => format!("operation={operation}, path={}, {source}", path.display()),
            Self::Walkdir {
                operation,
                path,
                source,
            } => format!("operation={operation}, path={}, {source}", path.display()),
            Self::Zip {
                operation,
                path,
                source,
            } => format!("operation={operation}, path={path}, {source}"),
            Self::Fetch { url, source } => format!("url={url}, {source}"),
            Self::FetchTooLarge { url, limit } => format!("url={url}, limit={limit}"),
            Self::Unsupported { operation, value } => match value {
                Some(value) => format!("operation={operation}, value={value}"),
                None => format!("operation={operation}"),
            },
            Self::Request { verb, path, source } => {
                return format!("{} '{path}': {}", verb.as_str(), source.describe());
            }
        };
        format!("{self} ({context})")
    }
}
