//! Input normalization: one ordered match over the request's possible sources.
//!
//! # Design
//! - Source selection is a single ordered match; the first present source wins.
//! - Structured entries are parsed individually so one bad entry never hides its siblings.
//! - Singleton objects are wrapped into one-element arrays before parsing.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;

use crate::error::{FsOpsError, FsOpsResult};
use crate::model::{
    CopySource, DeleteTarget, FileContent, FileDescriptor, FolderDescriptor, Properties,
};
use crate::path;
use crate::request::{RequestContext, UploadedFile, Uploads, parse_flag};

/// Structured entry that could not be turned into a descriptor.
#[derive(Debug)]
pub struct RejectedEntry {
    /// Name echoed back in the result record (may be empty).
    pub name: String,
    /// Why the entry was rejected.
    pub error: FsOpsError,
}

/// Parsed entry or the reason it was rejected.
pub type Entry<T> = Result<T, RejectedEntry>;

/// Folder and file entries of a structured body, in input order.
#[derive(Debug, Default)]
pub struct StructuredBody {
    /// Folder entries.
    pub folders: Vec<Entry<FolderDescriptor>>,
    /// File entries.
    pub files: Vec<Entry<FileDescriptor>>,
}

/// The one source selected for a write request.
#[derive(Debug)]
pub enum IngestSource {
    /// `X-File-Name` header; the body is the raw payload.
    HeaderFile {
        /// Declared file name.
        name: String,
        /// Raw body bytes.
        content: Vec<u8>,
        /// Declared body media type.
        content_type: Option<String>,
    },
    /// `X-Folder-Name` header; the body holds folder properties.
    HeaderFolder {
        /// Declared folder name.
        name: String,
        /// Properties parsed from the body.
        properties: Properties,
    },
    /// Multipart form with exactly one file.
    SingleUpload(UploadedFile),
    /// Multipart form with an array of files.
    MultiUpload(Vec<UploadedFile>),
    /// Remote URL to fetch.
    RemoteUrl(String),
    /// Structured `folder`/`file` body.
    Structured(StructuredBody),
    /// No recognized source.
    Empty,
}

impl IngestSource {
    /// Label used in logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::HeaderFile { .. } => "header_file",
            Self::HeaderFolder { .. } => "header_folder",
            Self::SingleUpload(_) => "single_upload",
            Self::MultiUpload(_) => "multi_upload",
            Self::RemoteUrl(_) => "remote_url",
            Self::Structured(_) => "structured",
            Self::Empty => "empty",
        }
    }
}

/// Select the request's source using the fixed precedence order.
/// Structured entry paths are resolved against `base`.
///
/// # Errors
///
/// Returns `FsOpsError::MalformedBody` or `FsOpsError::InvalidInput` when the body
/// cannot be parsed for the source it was selected for.
pub fn select_source(ctx: &RequestContext, base: &str) -> FsOpsResult<IngestSource> {
    let source = if let Some(name) = &ctx.headers.file_name {
        IngestSource::HeaderFile {
            name: name.clone(),
            content: ctx.body.clone(),
            content_type: ctx.headers.content_type.clone(),
        }
    } else if let Some(name) = &ctx.headers.folder_name {
        IngestSource::HeaderFolder {
            name: name.clone(),
            properties: body_properties(ctx)?,
        }
    } else {
        match &ctx.uploads {
            Some(Uploads::Single(upload)) => IngestSource::SingleUpload(upload.clone()),
            Some(Uploads::Multiple(uploads)) if !uploads.is_empty() => {
                IngestSource::MultiUpload(uploads.clone())
            }
            _ => match &ctx.params.url {
                Some(url) => IngestSource::RemoteUrl(url.clone()),
                None => match ctx.body_json()? {
                    Some(Value::Object(map)) if map.is_empty() => IngestSource::Empty,
                    Some(value @ Value::Object(_)) => {
                        IngestSource::Structured(StructuredBody::parse(base, &value))
                    }
                    Some(_) => {
                        return Err(FsOpsError::invalid("body", "not_an_object", None));
                    }
                    None => IngestSource::Empty,
                },
            },
        }
    };
    debug!(source = source.label(), "ingestion source selected");
    Ok(source)
}

fn body_properties(ctx: &RequestContext) -> FsOpsResult<Properties> {
    match ctx.body_json()? {
        None | Some(Value::Null) => Ok(Properties::new()),
        Some(Value::Object(map)) => Ok(map.into_iter().collect()),
        Some(_) => Err(FsOpsError::invalid("body", "not_an_object", None)),
    }
}

/// Section of a structured body: `key`, or the `<key>s.<key>` document wrapper.
fn section<'v>(body: &'v Value, key: &str, wrapper: &str) -> Option<&'v Value> {
    let direct = body.get(key).filter(|value| !is_blank(value));
    direct.or_else(|| {
        body.get(wrapper)
            .and_then(|inner| inner.get(key))
            .filter(|value| !is_blank(value))
    })
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::String(text) => text.is_empty(),
        _ => false,
    }
}

/// Wrap a singleton into a one-element list.
fn as_list(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

fn lenient_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(flag) => flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n.abs() > f64::EPSILON),
        Value::String(text) => parse_flag("flag", &text).unwrap_or(false),
        _ => false,
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawFolder {
    name: Option<String>,
    source_path: Option<String>,
    #[serde(deserialize_with = "lenient_flag")]
    delete_source: bool,
    properties: Option<Properties>,
    content: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawFile {
    name: Option<String>,
    source_path: Option<String>,
    #[serde(deserialize_with = "lenient_flag")]
    delete_source: bool,
    content: Option<String>,
    content_type: Option<String>,
    #[serde(deserialize_with = "lenient_flag")]
    is_base64: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawTarget {
    name: Option<String>,
    path: Option<String>,
}

fn entry_name(value: &Value) -> String {
    value
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn decode<T: for<'de> Deserialize<'de>>(value: &Value) -> Entry<T> {
    T::deserialize(value).map_err(|source| RejectedEntry {
        name: entry_name(value),
        error: FsOpsError::MalformedBody { source },
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.trim().is_empty())
}

fn missing(name: String, field: &'static str) -> RejectedEntry {
    RejectedEntry {
        name,
        error: FsOpsError::invalid(field, "missing", None),
    }
}

impl StructuredBody {
    /// Parse `folder`/`file` sections (or `folders.folder`/`files.file`) against `base`.
    #[must_use]
    pub fn parse(base: &str, body: &Value) -> Self {
        let folders = section(body, "folder", "folders")
            .map(|value| {
                as_list(value)
                    .into_iter()
                    .map(|item| folder_entry(base, item))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let files = section(body, "file", "files")
            .map(|value| {
                as_list(value)
                    .into_iter()
                    .map(|item| file_entry(base, item))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Self { folders, files }
    }
}

fn folder_entry(base: &str, value: &Value) -> Entry<FolderDescriptor> {
    let raw: RawFolder = decode(value)?;
    let name = non_empty(raw.name);
    if let Some(source) = non_empty(raw.source_path) {
        let name = name.unwrap_or_else(|| path::leaf_name(&source).to_string());
        return Ok(FolderDescriptor {
            path: path::folder_path(base, &name),
            name,
            properties: Properties::new(),
            source: Some(CopySource {
                path: path::container(&source),
                delete_source: raw.delete_source,
            }),
        });
    }

    let Some(name) = name else {
        return Err(missing(String::new(), "name"));
    };
    let properties = match (raw.properties, raw.content) {
        (Some(properties), _) => properties,
        (None, Some(Value::Object(map))) => map.into_iter().collect(),
        _ => Properties::new(),
    };
    Ok(FolderDescriptor {
        path: path::folder_path(base, &name),
        name,
        properties,
        source: None,
    })
}

fn file_entry(base: &str, value: &Value) -> Entry<FileDescriptor> {
    let raw: RawFile = decode(value)?;
    let name = non_empty(raw.name);
    if let Some(source) = non_empty(raw.source_path) {
        let name = name.unwrap_or_else(|| path::leaf_name(&source).to_string());
        return Ok(FileDescriptor {
            path: path::file_path(base, &name),
            name,
            content: FileContent::Copy(CopySource {
                path: source.trim_start_matches(path::SEPARATOR).to_string(),
                delete_source: raw.delete_source,
            }),
            content_type: raw.content_type,
            is_base64: false,
        });
    }

    let Some(name) = name else {
        return Err(missing(String::new(), "name"));
    };
    let Some(content) = raw.content else {
        return Err(missing(name, "content"));
    };
    let bytes = if raw.is_base64 {
        match STANDARD.decode(content.trim()) {
            Ok(bytes) => bytes,
            Err(source) => {
                return Err(RejectedEntry {
                    name,
                    error: FsOpsError::Base64 {
                        field: "content",
                        source,
                    },
                });
            }
        }
    } else {
        content.into_bytes()
    };
    Ok(FileDescriptor {
        path: path::file_path(base, &name),
        name,
        content: FileContent::Inline(bytes),
        content_type: raw.content_type,
        is_base64: raw.is_base64,
    })
}

/// Items addressed by a structured delete body. Sections absent from the body stay `None`.
#[derive(Debug, Default)]
pub struct DeleteBatch {
    /// Folder targets, in input order.
    pub folders: Option<Vec<Entry<DeleteTarget>>>,
    /// File targets, in input order.
    pub files: Option<Vec<Entry<DeleteTarget>>>,
}

impl DeleteBatch {
    /// Parse a delete body; entries are names/paths relative to `base`, as strings or
    /// `{name, path}` objects.
    #[must_use]
    pub fn parse(base: &str, body: &Value) -> Self {
        let folders = section(body, "folder", "folders").map(|value| {
            as_list(value)
                .into_iter()
                .map(|item| delete_entry(base, item, true))
                .collect::<Vec<_>>()
        });
        let files = section(body, "file", "files").map(|value| {
            as_list(value)
                .into_iter()
                .map(|item| delete_entry(base, item, false))
                .collect::<Vec<_>>()
        });
        Self { folders, files }
    }

    /// Whether the body named nothing to delete.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.folders.is_none() && self.files.is_none()
    }
}

fn delete_entry(base: &str, value: &Value, folder: bool) -> Entry<DeleteTarget> {
    let raw = match value {
        Value::String(text) => RawTarget {
            name: None,
            path: Some(text.clone()),
        },
        other => decode(other)?,
    };
    let name = non_empty(raw.name);
    let relative = non_empty(raw.path).or_else(|| name.clone());
    let Some(relative) = relative else {
        return Err(missing(String::new(), "path"));
    };
    let path = if folder {
        path::folder_path(base, &relative)
    } else {
        path::file_path(base, relative.trim_end_matches(path::SEPARATOR))
    };
    Ok(DeleteTarget {
        name: name.unwrap_or_else(|| path::leaf_name(&relative).to_string()),
        path,
    })
}
