//! Explicit, immutable request context threaded through dispatch.
//!
//! # Design
//! - Everything a handler may consult (verb, flags, headers, body, uploads) is captured up front.
//! - Flag parsing is lenient: a present flag without a value counts as `true`.

use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;

use crate::error::{FsOpsError, FsOpsResult};

/// Request verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verb {
    /// Read a folder listing, properties, or content.
    Read,
    /// Create new folders/files.
    Create,
    /// Replace existing folders/files.
    Replace,
    /// Merge into existing folders/files.
    Merge,
    /// Delete folders/files.
    Delete,
}

impl Verb {
    /// Lowercase label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Create => "create",
            Self::Replace => "replace",
            Self::Merge => "merge",
            Self::Delete => "delete",
        }
    }

    /// Permission checked before the verb is dispatched.
    #[must_use]
    pub const fn permission(self) -> Permission {
        match self {
            Self::Read => Permission::Read,
            Self::Create => Permission::Create,
            Self::Replace | Self::Merge => Permission::Update,
            Self::Delete => Permission::Delete,
        }
    }

    /// Map an HTTP method onto a verb.
    #[must_use]
    pub fn from_method(method: &str) -> Option<Self> {
        match method.to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Read),
            "POST" => Some(Self::Create),
            "PUT" => Some(Self::Replace),
            "PATCH" | "MERGE" => Some(Self::Merge),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }

    /// Parse a verb label (`read`, `create`, ...).
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "read" => Some(Self::Read),
            "create" => Some(Self::Create),
            "replace" => Some(Self::Replace),
            "merge" => Some(Self::Merge),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl Display for Verb {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Permission required to serve a verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Read access.
    Read,
    /// Create access.
    Create,
    /// Update access (replace and merge).
    Update,
    /// Delete access.
    Delete,
}

impl Permission {
    /// Lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// Recognized request flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct RequestParams {
    /// Restrict listings to folders.
    pub folders_only: bool,
    /// Restrict listings to files.
    pub files_only: bool,
    /// Recurse into sub-folders when listing.
    pub full_tree: bool,
    /// Return folder content as a streamed archive.
    pub zip: bool,
    /// Return metadata only.
    pub properties: bool,
    /// Include base64 content with file properties.
    pub content: bool,
    /// Stream files with an attachment disposition.
    pub download: bool,
    /// Remote source to fetch.
    pub url: Option<String>,
    /// Expand archive payloads.
    pub extract: bool,
    /// Empty the target folder before expanding.
    pub clean: bool,
    /// Existence check override; the verb default applies when absent.
    pub check_exist: Option<bool>,
    /// Allow deleting non-empty folders.
    pub force: bool,
}

impl RequestParams {
    /// Build flags from query-style key/value pairs. Unknown keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns `FsOpsError::InvalidInput` when a flag carries an unrecognized value.
    pub fn from_pairs<'a, I>(pairs: I) -> FsOpsResult<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut params = Self::default();
        for (key, value) in pairs {
            match key {
                "folders_only" => params.folders_only = parse_flag("folders_only", value)?,
                "files_only" => params.files_only = parse_flag("files_only", value)?,
                "full_tree" => params.full_tree = parse_flag("full_tree", value)?,
                "zip" => params.zip = parse_flag("zip", value)?,
                "properties" => params.properties = parse_flag("properties", value)?,
                "content" => params.content = parse_flag("content", value)?,
                "download" => params.download = parse_flag("download", value)?,
                "extract" => params.extract = parse_flag("extract", value)?,
                "clean" => params.clean = parse_flag("clean", value)?,
                "force" => params.force = parse_flag("force", value)?,
                "check_exist" => params.check_exist = Some(parse_flag("check_exist", value)?),
                "url" => {
                    let trimmed = value.trim();
                    params.url = (!trimmed.is_empty()).then(|| trimmed.to_string());
                }
                _ => {}
            }
        }
        Ok(params)
    }
}

/// Parse a boolean flag value.
///
/// # Errors
///
/// Returns `FsOpsError::InvalidInput` for values outside the accepted vocabulary.
pub fn parse_flag(field: &'static str, value: &str) -> FsOpsResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(FsOpsError::invalid(field, "not_a_flag", Some(value.to_string()))),
    }
}

/// Header name carrying a single file name.
pub const FILE_NAME_HEADER: &str = "x-file-name";
/// Header name carrying a single folder name.
pub const FOLDER_NAME_HEADER: &str = "x-folder-name";
/// Header name carrying the payload media type.
pub const CONTENT_TYPE_HEADER: &str = "content-type";

/// Headers the dispatcher consults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHeaders {
    /// `X-File-Name`: the body is the raw payload of this file.
    pub file_name: Option<String>,
    /// `X-Folder-Name`: the body holds properties for this folder.
    pub folder_name: Option<String>,
    /// `Content-Type` of the body.
    pub content_type: Option<String>,
}

impl RequestHeaders {
    /// Collect recognized headers from name/value pairs (case-insensitive names).
    #[must_use]
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut headers = Self::default();
        for (name, value) in pairs {
            let value = non_blank(value);
            match name.to_ascii_lowercase().as_str() {
                FILE_NAME_HEADER => headers.file_name = value,
                FOLDER_NAME_HEADER => headers.folder_name = value,
                CONTENT_TYPE_HEADER => headers.content_type = value,
                _ => {}
            }
        }
        headers
    }
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Where an uploaded item's bytes ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadPayload {
    /// Upload layer staged the bytes on local disk.
    Staged(PathBuf),
    /// Upload layer reported a failure for this item.
    Failed(String),
}

/// One multipart upload item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// Client-supplied file name.
    pub name: String,
    /// Client-declared media type.
    pub content_type: Option<String>,
    /// Staged bytes or failure reason.
    pub payload: UploadPayload,
}

impl UploadedFile {
    /// Successfully staged upload.
    #[must_use]
    pub fn staged(
        name: impl Into<String>,
        content_type: Option<String>,
        location: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            content_type,
            payload: UploadPayload::Staged(location.into()),
        }
    }

    /// Upload the transport layer could not complete.
    #[must_use]
    pub fn failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content_type: None,
            payload: UploadPayload::Failed(reason.into()),
        }
    }
}

/// Multipart uploads attached to the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Uploads {
    /// Form field carried exactly one file.
    Single(UploadedFile),
    /// Form field carried an array of files.
    Multiple(Vec<UploadedFile>),
}

/// Immutable description of one storage request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Request verb.
    pub verb: Verb,
    /// Raw resource path relative to the service root.
    pub resource: String,
    /// Parsed flags.
    pub params: RequestParams,
    /// Recognized headers.
    pub headers: RequestHeaders,
    /// Raw request body.
    pub body: Vec<u8>,
    /// Multipart uploads, if any.
    pub uploads: Option<Uploads>,
}

impl RequestContext {
    /// Context with no flags, headers, body, or uploads.
    #[must_use]
    pub fn new(verb: Verb, resource: impl Into<String>) -> Self {
        Self {
            verb,
            resource: resource.into(),
            params: RequestParams::default(),
            headers: RequestHeaders::default(),
            body: Vec::new(),
            uploads: None,
        }
    }

    /// Replace the flags.
    #[must_use]
    pub fn with_params(mut self, params: RequestParams) -> Self {
        self.params = params;
        self
    }

    /// Replace the headers.
    #[must_use]
    pub fn with_headers(mut self, headers: RequestHeaders) -> Self {
        self.headers = headers;
        self
    }

    /// Attach a raw body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Attach a JSON body.
    #[must_use]
    pub fn with_json(self, value: &Value) -> Self {
        let body = value.to_string().into_bytes();
        self.with_body(body)
    }

    /// Attach multipart uploads.
    #[must_use]
    pub fn with_uploads(mut self, uploads: Uploads) -> Self {
        self.uploads = Some(uploads);
        self
    }

    /// Parse the body as JSON; `None` when the body is empty.
    ///
    /// # Errors
    ///
    /// Returns `FsOpsError::MalformedBody` when a non-empty body is not valid JSON.
    pub fn body_json(&self) -> FsOpsResult<Option<Value>> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(&self.body)
            .map(Some)
            .map_err(|source| FsOpsError::MalformedBody { source })
    }
}
