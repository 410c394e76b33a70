//! Verb handlers orchestrating path resolution, ingestion, archives, and batches.
//!
//! # Design
//! - Every request runs inside a `depot.request` span and ends in exactly one of:
//!   a response body, a completed stream, or a request-level error.
//! - Create, replace, and merge share one write algorithm parameterized by the
//!   verb's existence-check default and permission.
//! - Errors leaving the dispatcher are wrapped once with verb and path context.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use depot_config::{CheckExistDefaults, DepotConfig};
use depot_telemetry::Metrics;
use serde::Serialize;
use tracing::{debug, info, info_span, warn};

use crate::archive::{
    ARCHIVE_EXTENSION, ARCHIVE_MEDIA_TYPES, ArchiveHandler, detect_content_type, is_archive,
    read_head,
};
use crate::batch::BatchExecutor;
use crate::error::{FsOpsError, FsOpsResult, ResourceKind};
use crate::fetch::RemoteFetcher;
use crate::ingest::{DeleteBatch, IngestSource, select_source};
use crate::model::{
    ArchivePayload, ArchiveRequest, Envelope, FileProperties, FolderListing, FolderProperties,
    ItemRecord, ListOptions, LocalFile,
};
use crate::path::{self, PathKind, ResolvedPath};
use crate::provider::StorageProvider;
use crate::request::{Permission, RequestContext, UploadPayload, UploadedFile, Verb};

/// Dispatcher settings derived from service configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Per-verb defaults for `check_exist`.
    pub check_exist: CheckExistDefaults,
    /// Directory for transient archive and fetch files.
    pub staging_dir: PathBuf,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            check_exist: CheckExistDefaults::default(),
            staging_dir: std::env::temp_dir(),
        }
    }
}

impl DispatchSettings {
    /// Settings taken from a loaded configuration.
    #[must_use]
    pub fn from_config(config: &DepotConfig) -> Self {
        Self {
            check_exist: config.check_exist,
            staging_dir: config.staging_dir(),
        }
    }

    /// Existence-check default for a verb.
    #[must_use]
    pub const fn check_exist_for(&self, verb: Verb) -> bool {
        match verb {
            Verb::Create => self.check_exist.create,
            Verb::Replace => self.check_exist.replace,
            Verb::Merge => self.check_exist.merge,
            Verb::Read | Verb::Delete => false,
        }
    }
}

/// Permission hook consulted before any dispatch.
pub trait Authorizer: Send + Sync {
    /// Allow or reject `permission` on `path`.
    ///
    /// # Errors
    ///
    /// Returns `FsOpsError::PermissionDenied` to reject the request.
    fn authorize(&self, permission: Permission, path: &str) -> FsOpsResult<()>;
}

/// Authorizer that permits everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(&self, _permission: Permission, _path: &str) -> FsOpsResult<()> {
        Ok(())
    }
}

/// How a streamed body should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Display in place.
    Inline,
    /// Save as a download.
    Attachment,
}

/// Metadata sent ahead of a streamed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHead {
    /// Body media type.
    pub content_type: String,
    /// Presentation hint.
    pub disposition: Disposition,
    /// Suggested file name.
    pub file_name: String,
    /// Body length when known.
    pub content_length: Option<u64>,
}

impl StreamHead {
    /// `Content-Disposition` header value.
    #[must_use]
    pub fn content_disposition(&self) -> String {
        let kind = match self.disposition {
            Disposition::Inline => "inline",
            Disposition::Attachment => "attachment",
        };
        let escaped = self.file_name.replace('\\', "\\\\").replace('"', "\\\"");
        format!("{kind}; filename=\"{escaped}\"")
    }
}

/// Destination for streamed response bodies.
pub trait ResponseSink {
    /// Write the head and copy the whole body. Returns the bytes written.
    ///
    /// # Errors
    ///
    /// Returns any IO error raised while flushing the body.
    fn stream(&mut self, head: &StreamHead, body: &mut dyn Read) -> io::Result<u64>;
}

/// Sink copying bodies into any writer and remembering the last head.
#[derive(Debug)]
pub struct WriterSink<W> {
    writer: W,
    head: Option<StreamHead>,
}

impl<W: Write> WriterSink<W> {
    /// Wrap a writer.
    pub const fn new(writer: W) -> Self {
        Self { writer, head: None }
    }

    /// Head of the last streamed body.
    #[must_use]
    pub const fn head(&self) -> Option<&StreamHead> {
        self.head.as_ref()
    }

    /// Recover the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ResponseSink for WriterSink<W> {
    fn stream(&mut self, head: &StreamHead, body: &mut dyn Read) -> io::Result<u64> {
        self.head = Some(head.clone());
        let copied = io::copy(body, &mut self.writer)?;
        self.writer.flush()?;
        Ok(copied)
    }
}

/// Serializable response bodies.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    /// Write/delete result envelope.
    Envelope(Envelope),
    /// Folder listing.
    Listing(FolderListing),
    /// Folder metadata.
    FolderProperties(FolderProperties),
    /// File metadata.
    FileProperties(FileProperties),
}

/// Result of a dispatched request.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A body for the caller to serialize.
    Body(ResponseBody),
    /// The body was already streamed to the sink.
    Streamed {
        /// Bytes written to the sink.
        bytes: u64,
    },
}

impl Outcome {
    const fn label(&self) -> &'static str {
        match self {
            Self::Body(_) => "ok",
            Self::Streamed { .. } => "streamed",
        }
    }
}

/// Where an ingested payload ended up.
enum Ingested {
    File { name: String, path: String },
    Extracted(Envelope),
}

impl Ingested {
    fn into_envelope(self) -> Envelope {
        match self {
            Self::File { name, path } => Envelope::single_file(ItemRecord::success(name, path)),
            Self::Extracted(envelope) => envelope,
        }
    }
}

/// Serves storage requests against a provider.
pub struct RequestDispatcher {
    provider: Arc<dyn StorageProvider>,
    settings: DispatchSettings,
    fetcher: Option<Arc<dyn RemoteFetcher>>,
    authorizer: Arc<dyn Authorizer>,
    metrics: Option<Metrics>,
}

impl RequestDispatcher {
    /// Dispatcher with no fetcher, no metrics, and an allow-all authorizer.
    #[must_use]
    pub fn new(provider: Arc<dyn StorageProvider>, settings: DispatchSettings) -> Self {
        Self {
            provider,
            settings,
            fetcher: None,
            authorizer: Arc::new(AllowAll),
            metrics: None,
        }
    }

    /// Enable URL-sourced writes.
    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn RemoteFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Replace the permission hook.
    #[must_use]
    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    /// Record request and item counters.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Serve one request. Streamed bodies go to `sink`.
    ///
    /// # Errors
    ///
    /// Returns a `FsOpsError::Request` wrapping validation, permission, not-found,
    /// or backend failures that abort the request.
    pub fn dispatch(
        &self,
        ctx: &RequestContext,
        sink: &mut dyn ResponseSink,
    ) -> FsOpsResult<Outcome> {
        let target = path::resolve(&ctx.resource);
        let span = info_span!("depot.request", verb = ctx.verb.as_str(), path = %target.path);
        let _guard = span.enter();

        let result = self
            .authorizer
            .authorize(ctx.verb.permission(), &target.path)
            .and_then(|()| match ctx.verb {
                Verb::Read => self.read(ctx, &target, sink),
                Verb::Delete => self
                    .delete(ctx, &target)
                    .map(|envelope| Outcome::Body(ResponseBody::Envelope(envelope))),
                Verb::Create | Verb::Replace | Verb::Merge => self
                    .write(ctx, &target)
                    .map(|envelope| Outcome::Body(ResponseBody::Envelope(envelope))),
            });

        match result {
            Ok(outcome) => {
                self.count_request(ctx.verb, outcome.label());
                info!(outcome = outcome.label(), "request completed");
                Ok(outcome)
            }
            Err(err) => {
                self.count_request(ctx.verb, "failed");
                warn!(category = ?err.category(), error = %err.describe(), "request failed");
                Err(err.in_request(ctx.verb, target.path))
            }
        }
    }

    fn count_request(&self, verb: Verb, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_request(verb.as_str(), outcome);
        }
    }

    fn archive_handler(&self) -> ArchiveHandler<'_> {
        ArchiveHandler::new(self.provider.as_ref(), &self.settings.staging_dir)
            .with_metrics(self.metrics.as_ref())
    }

    fn batch_executor(&self, check_exist: bool) -> BatchExecutor<'_> {
        BatchExecutor::new(self.provider.as_ref(), check_exist).with_metrics(self.metrics.as_ref())
    }

    fn read(
        &self,
        ctx: &RequestContext,
        target: &ResolvedPath,
        sink: &mut dyn ResponseSink,
    ) -> FsOpsResult<Outcome> {
        let params = &ctx.params;
        if target.kind.is_container() {
            if params.properties {
                let properties = self.provider.folder_properties(&target.path)?;
                return Ok(Outcome::Body(ResponseBody::FolderProperties(properties)));
            }
            if params.zip {
                return self.stream_folder_archive(target, sink);
            }
            let options = ListOptions {
                include_files: !params.folders_only,
                include_folders: !params.files_only,
                full_tree: params.full_tree,
            };
            let listing = self.provider.list_folder(&target.path, options)?;
            return Ok(Outcome::Body(ResponseBody::Listing(listing)));
        }

        let mut properties = self.provider.file_properties(&target.path)?;
        if params.properties {
            if params.content {
                properties.content = Some(STANDARD.encode(self.provider.read_file(&target.path)?));
            }
            return Ok(Outcome::Body(ResponseBody::FileProperties(properties)));
        }

        let head = StreamHead {
            content_type: properties.content_type,
            disposition: if params.download {
                Disposition::Attachment
            } else {
                Disposition::Inline
            },
            file_name: target.leaf.clone(),
            content_length: Some(properties.size),
        };
        let mut reader = self.provider.open_file(&target.path)?;
        let bytes = sink
            .stream(&head, &mut reader)
            .map_err(|source| FsOpsError::io("read.stream_file", &target.path, source))?;
        self.count_streamed(bytes);
        Ok(Outcome::Streamed { bytes })
    }

    fn stream_folder_archive(
        &self,
        target: &ResolvedPath,
        sink: &mut dyn ResponseSink,
    ) -> FsOpsResult<Outcome> {
        if !self.provider.folder_exists(&target.path)? {
            return Err(FsOpsError::not_found(ResourceKind::Folder, target.path.as_str()));
        }
        let (mut staged, entries) = self.archive_handler().export(&target.path)?;
        let stem = if target.leaf.is_empty() { "root" } else { target.leaf.as_str() };
        let head = StreamHead {
            content_type: ARCHIVE_MEDIA_TYPES[0].to_string(),
            disposition: Disposition::Attachment,
            file_name: format!("{stem}.{}", ARCHIVE_EXTENSION),
            content_length: staged.as_file().metadata().ok().map(|meta| meta.len()),
        };

        let streamed = sink.stream(&head, staged.as_file_mut());
        let staged_path = staged.path().to_path_buf();
        if let Err(err) = staged.close() {
            warn!(staged = %staged_path.display(), error = %err, "failed to remove exported archive");
        }
        let bytes =
            streamed.map_err(|source| FsOpsError::io("read.stream_archive", staged_path, source))?;
        debug!(entries, bytes, "folder archive streamed");
        self.count_streamed(bytes);
        Ok(Outcome::Streamed { bytes })
    }

    fn count_streamed(&self, bytes: u64) {
        if let Some(metrics) = &self.metrics {
            metrics.add_streamed_bytes(bytes);
        }
    }

    fn write(&self, ctx: &RequestContext, target: &ResolvedPath) -> FsOpsResult<Envelope> {
        let check_exist = ctx
            .params
            .check_exist
            .unwrap_or_else(|| self.settings.check_exist_for(ctx.verb));
        debug!(check_exist, kind = ?target.kind, "write flow selected");
        match target.kind {
            PathKind::Root | PathKind::Folder => self.write_into_folder(ctx, &target.path, check_exist),
            PathKind::File => self.write_file_resource(ctx, target, check_exist),
        }
    }

    fn write_into_folder(
        &self,
        ctx: &RequestContext,
        folder: &str,
        check_exist: bool,
    ) -> FsOpsResult<Envelope> {
        let base = path::container(folder);
        match select_source(ctx, &base)? {
            IngestSource::HeaderFile {
                name,
                content,
                content_type,
            } => {
                if content.is_empty() {
                    warn!(name = %name, "empty raw upload");
                }
                self.ingest_content(ctx, &base, &name, &content, content_type.as_deref(), check_exist)
                    .map(Ingested::into_envelope)
            }
            IngestSource::HeaderFolder { name, properties } => {
                let created = path::folder_path(&base, &name);
                self.provider.create_folder(&created, &properties, check_exist)?;
                Ok(Envelope::single_folder(ItemRecord::success(name, created)))
            }
            IngestSource::SingleUpload(upload) => match upload.payload {
                UploadPayload::Staged(location) => self
                    .ingest_local(
                        ctx,
                        &base,
                        LocalFile {
                            name: upload.name,
                            content_type: upload.content_type,
                            location,
                        },
                        check_exist,
                    )
                    .map(Ingested::into_envelope),
                UploadPayload::Failed(reason) => {
                    let err = FsOpsError::UploadFailed {
                        name: upload.name.clone(),
                        reason,
                    };
                    warn!(error = %err.describe(), "upload failed");
                    Ok(Envelope::single_file(ItemRecord::failure(upload.name, &err)))
                }
            },
            IngestSource::MultiUpload(uploads) => self.ingest_uploads(ctx, &base, uploads, check_exist),
            IngestSource::RemoteUrl(url) => {
                let Some(fetcher) = &self.fetcher else {
                    return Err(FsOpsError::Unsupported {
                        operation: "remote_fetch",
                        value: Some(url),
                    });
                };
                let fetched = fetcher.fetch(&url, &self.settings.staging_dir)?;
                let local = LocalFile {
                    name: fetched.file_name.clone(),
                    content_type: fetched.content_type.clone(),
                    location: fetched.staged.path().to_path_buf(),
                };
                let ingested = self.ingest_local(ctx, &base, local, check_exist);
                drop(fetched);
                ingested.map(Ingested::into_envelope)
            }
            IngestSource::Structured(body) => Ok(self.batch_executor(check_exist).run(body)),
            IngestSource::Empty => Ok(Envelope::empty()),
        }
    }

    fn ingest_uploads(
        &self,
        ctx: &RequestContext,
        base: &str,
        uploads: Vec<UploadedFile>,
        check_exist: bool,
    ) -> FsOpsResult<Envelope> {
        let mut envelope = Envelope::default();
        for (index, upload) in uploads.into_iter().enumerate() {
            let name = upload.name.clone();
            let result = match upload.payload {
                UploadPayload::Staged(location) => self.ingest_local(
                    ctx,
                    base,
                    LocalFile {
                        name: upload.name,
                        content_type: upload.content_type,
                        location,
                    },
                    check_exist,
                ),
                UploadPayload::Failed(reason) => Err(FsOpsError::UploadFailed {
                    name: upload.name,
                    reason,
                }),
            };
            let record = match result {
                Ok(Ingested::File { name, path }) => ItemRecord::success(name, path),
                Ok(Ingested::Extracted(_)) => ItemRecord::success(name, base),
                Err(err) if err.is_request_fatal() => return Err(err),
                Err(err) => {
                    warn!(index, name = %name, error = %err.describe(), "upload item failed");
                    ItemRecord::failure(name, &err)
                }
            };
            if let Some(metrics) = &self.metrics {
                let outcome = if record.is_success() { "ok" } else { "error" };
                metrics.inc_batch_item("file", outcome);
            }
            envelope.push_file(record);
        }
        Ok(envelope)
    }

    fn ingest_content(
        &self,
        ctx: &RequestContext,
        base: &str,
        name: &str,
        content: &[u8],
        content_type: Option<&str>,
        check_exist: bool,
    ) -> FsOpsResult<Ingested> {
        let detected = detect_content_type(name, content_type, content);
        if ctx.params.extract && is_archive(name, &detected) {
            return self
                .archive_handler()
                .extract(ArchiveRequest {
                    target_folder: base,
                    payload: ArchivePayload::Inline(content),
                    clean: ctx.params.clean,
                })
                .map(Ingested::Extracted);
        }
        let destination = path::file_path(base, name);
        self.provider
            .write_file(&destination, content, Some(&detected), check_exist)?;
        Ok(Ingested::File {
            name: name.to_string(),
            path: destination,
        })
    }

    fn ingest_local(
        &self,
        ctx: &RequestContext,
        base: &str,
        local: LocalFile,
        check_exist: bool,
    ) -> FsOpsResult<Ingested> {
        let detected = detect_content_type(
            &local.name,
            local.content_type.as_deref(),
            &read_head(&local.location),
        );
        if ctx.params.extract && is_archive(&local.name, &detected) {
            return self
                .archive_handler()
                .extract(ArchiveRequest {
                    target_folder: base,
                    payload: ArchivePayload::Local(&local.location),
                    clean: ctx.params.clean,
                })
                .map(Ingested::Extracted);
        }
        let destination = path::file_path(base, &local.name);
        self.provider
            .move_file(&destination, &local.location, Some(&detected), check_exist)?;
        Ok(Ingested::File {
            name: local.name,
            path: destination,
        })
    }

    fn write_file_resource(
        &self,
        ctx: &RequestContext,
        target: &ResolvedPath,
        check_exist: bool,
    ) -> FsOpsResult<Envelope> {
        let parent = path::parent_folder(&target.path);
        match select_source(ctx, &parent)? {
            IngestSource::HeaderFile {
                name,
                content,
                content_type,
            } => {
                ensure_name_matches(&name, &target.leaf)?;
                if content.is_empty() {
                    warn!(name = %name, "empty raw upload");
                }
                let detected = detect_content_type(&target.leaf, content_type.as_deref(), &content);
                self.provider
                    .write_file(&target.path, &content, Some(&detected), check_exist)?;
                Ok(Envelope::single_file(ItemRecord::success(
                    target.leaf.as_str(),
                    target.path.as_str(),
                )))
            }
            IngestSource::HeaderFolder { name, properties } => {
                ensure_name_matches(&name, &target.leaf)?;
                let folder = path::container(&target.path);
                if ctx.verb == Verb::Create {
                    self.provider.create_folder(&folder, &properties, check_exist)?;
                } else {
                    self.provider.update_folder_properties(&folder, &properties)?;
                }
                Ok(Envelope::single_folder(ItemRecord::success(
                    target.leaf.as_str(),
                    folder,
                )))
            }
            IngestSource::SingleUpload(upload) => self.upload_to_resource(target, upload, check_exist),
            IngestSource::MultiUpload(uploads) if uploads.len() == 1 => {
                match uploads.into_iter().next() {
                    Some(upload) => self.upload_to_resource(target, upload, check_exist),
                    None => Err(FsOpsError::invalid("uploads", "missing", None)),
                }
            }
            IngestSource::MultiUpload(uploads) => Err(FsOpsError::invalid(
                "uploads",
                "multiple_files_for_single_resource",
                Some(uploads.len().to_string()),
            )),
            other => Err(FsOpsError::invalid(
                "source",
                "unsupported_for_file_resource",
                Some(other.label().to_string()),
            )),
        }
    }

    fn upload_to_resource(
        &self,
        target: &ResolvedPath,
        upload: UploadedFile,
        check_exist: bool,
    ) -> FsOpsResult<Envelope> {
        let location = match upload.payload {
            UploadPayload::Staged(location) => location,
            UploadPayload::Failed(reason) => {
                return Err(FsOpsError::UploadFailed {
                    name: upload.name,
                    reason,
                });
            }
        };
        let detected = detect_content_type(
            &target.leaf,
            upload.content_type.as_deref(),
            &read_head(&location),
        );
        self.provider
            .move_file(&target.path, &location, Some(&detected), check_exist)?;
        Ok(Envelope::single_file(ItemRecord::success(
            target.leaf.as_str(),
            target.path.as_str(),
        )))
    }

    fn delete(&self, ctx: &RequestContext, target: &ResolvedPath) -> FsOpsResult<Envelope> {
        if target.kind == PathKind::File {
            self.provider.delete_file(&target.path)?;
            return Ok(Envelope::single_file(ItemRecord::success(
                target.leaf.as_str(),
                target.path.as_str(),
            )));
        }

        let batch = ctx
            .body_json()?
            .map(|body| DeleteBatch::parse(&target.path, &body))
            .filter(|batch| !batch.is_empty());
        if let Some(batch) = batch {
            return Ok(self.batch_executor(false).delete(batch, ctx.params.force));
        }
        if target.path.is_empty() {
            return Err(FsOpsError::invalid("resource", "empty_path", None));
        }
        self.provider.delete_folder(&target.path, ctx.params.force)?;
        Ok(Envelope::single_folder(ItemRecord::success(
            target.leaf.as_str(),
            target.path.as_str(),
        )))
    }
}

fn ensure_name_matches(header: &str, leaf: &str) -> FsOpsResult<()> {
    if header.eq_ignore_ascii_case(leaf) {
        Ok(())
    } else {
        Err(FsOpsError::NameMismatch {
            header: header.to_string(),
            resource: leaf.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use crate::fetch::FetchedFile;
    use crate::model::Properties;
    use crate::provider::MemoryProvider;
    use crate::request::{RequestHeaders, RequestParams, Uploads};
    use depot_test_support::archive::{zip_bytes, zip_entries};
    use depot_test_support::fixtures::temp_dir;
    use serde_json::json;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    type TestResult<T> = anyhow::Result<T>;

    struct Harness {
        provider: Arc<MemoryProvider>,
        dispatcher: RequestDispatcher,
        metrics: Metrics,
        staging: TempDir,
    }

    fn harness() -> TestResult<Harness> {
        let provider = Arc::new(MemoryProvider::new());
        let staging = temp_dir("depot-dispatch-")?;
        let metrics = Metrics::new()?;
        let settings = DispatchSettings {
            check_exist: CheckExistDefaults::default(),
            staging_dir: staging.path().to_path_buf(),
        };
        let dispatcher =
            RequestDispatcher::new(provider.clone(), settings).with_metrics(metrics.clone());
        Ok(Harness {
            provider,
            dispatcher,
            metrics,
            staging,
        })
    }

    fn run(dispatcher: &RequestDispatcher, ctx: &RequestContext) -> FsOpsResult<Outcome> {
        let mut sink = WriterSink::new(Vec::new());
        dispatcher.dispatch(ctx, &mut sink)
    }

    fn envelope(outcome: Outcome) -> TestResult<Envelope> {
        match outcome {
            Outcome::Body(ResponseBody::Envelope(envelope)) => Ok(envelope),
            other => Err(anyhow::anyhow!("expected envelope, got {other:?}")),
        }
    }

    fn stage_upload(dir: &Path, name: &str, bytes: &[u8]) -> TestResult<UploadedFile> {
        let location = dir.join(format!("upload-{name}"));
        fs::write(&location, bytes)?;
        Ok(UploadedFile::staged(name, None, location))
    }

    struct StaticFetcher {
        name: &'static str,
        bytes: Vec<u8>,
    }

    impl RemoteFetcher for StaticFetcher {
        fn fetch(&self, _url: &str, staging_dir: &Path) -> FsOpsResult<FetchedFile> {
            let mut staged = tempfile::Builder::new()
                .tempfile_in(staging_dir)
                .map_err(|source| FsOpsError::io("test.stage", staging_dir, source))?;
            staged
                .write_all(&self.bytes)
                .map_err(|source| FsOpsError::io("test.write", staging_dir, source))?;
            Ok(FetchedFile {
                file_name: self.name.to_string(),
                content_type: None,
                staged,
            })
        }
    }

    struct DenyDeletes;

    impl Authorizer for DenyDeletes {
        fn authorize(&self, permission: Permission, path: &str) -> FsOpsResult<()> {
            if permission == Permission::Delete {
                Err(FsOpsError::PermissionDenied {
                    permission,
                    path: path.to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn structured_create_at_root_builds_folders_and_files() -> TestResult<()> {
        let h = harness()?;
        let ctx = RequestContext::new(Verb::Create, "").with_json(&json!({
            "folder": [{"name": "docs"}],
            "file": [{"name": "a.txt", "content": "SGVsbG8=", "is_base64": true}]
        }));

        let body = envelope(run(&h.dispatcher, &ctx)?)?;
        assert_eq!(
            serde_json::to_value(&body)?,
            json!({
                "folder": [{"name": "docs", "path": "docs/"}],
                "file": [{"name": "a.txt", "path": "a.txt"}]
            })
        );
        assert!(h.provider.folder_exists("docs/")?);
        assert_eq!(h.provider.read_file("a.txt")?, b"Hello");
        assert_eq!(h.metrics.request_count("create", "ok"), 1);
        Ok(())
    }

    #[test]
    fn header_name_mismatch_fails_before_write() -> TestResult<()> {
        let h = harness()?;
        h.provider.write_file("docs/b.txt", b"original", None, false)?;
        let ctx = RequestContext::new(Verb::Replace, "docs/b.txt")
            .with_headers(RequestHeaders {
                file_name: Some("a.txt".to_string()),
                ..RequestHeaders::default()
            })
            .with_body(b"replacement".to_vec());

        let err = run(&h.dispatcher, &ctx).err().ok_or_else(|| anyhow::anyhow!("expected failure"))?;
        assert_eq!(err.category(), ErrorCategory::Validation);
        assert!(matches!(err.root(), FsOpsError::NameMismatch { .. }));
        assert!(matches!(err, FsOpsError::Request { verb: Verb::Replace, .. }));
        assert_eq!(h.provider.read_file("docs/b.txt")?, b"original");
        assert!(!h.provider.file_exists("docs/a.txt")?);
        assert_eq!(h.metrics.request_count("replace", "failed"), 1);
        Ok(())
    }

    #[test]
    fn header_name_match_is_case_insensitive() -> TestResult<()> {
        let h = harness()?;
        let ctx = RequestContext::new(Verb::Replace, "docs/Report.TXT")
            .with_headers(RequestHeaders {
                file_name: Some("report.txt".to_string()),
                ..RequestHeaders::default()
            })
            .with_body(b"v2".to_vec());

        let body = envelope(run(&h.dispatcher, &ctx)?)?;
        assert_eq!(body.files(), [ItemRecord::success("Report.TXT", "docs/Report.TXT")]);
        assert_eq!(h.provider.read_file("docs/Report.TXT")?, b"v2");
        Ok(())
    }

    #[test]
    fn base64_round_trip_through_properties() -> TestResult<()> {
        let h = harness()?;
        let create = RequestContext::new(Verb::Create, "notes/").with_json(&json!({
            "file": {"name": "hello.txt", "content": "SGVsbG8=", "is_base64": true}
        }));
        run(&h.dispatcher, &create)?;

        let read = RequestContext::new(Verb::Read, "notes/hello.txt").with_params(RequestParams {
            properties: true,
            content: true,
            ..RequestParams::default()
        });
        match run(&h.dispatcher, &read)? {
            Outcome::Body(ResponseBody::FileProperties(props)) => {
                let encoded = props.content.ok_or_else(|| anyhow::anyhow!("missing content"))?;
                assert_eq!(STANDARD.decode(encoded)?, b"Hello");
                assert_eq!(props.size, 5);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn archive_upload_with_clean_replaces_folder_content() -> TestResult<()> {
        let h = harness()?;
        h.provider.write_file("site/stale.txt", b"old", None, false)?;
        let bytes = zip_bytes(&[("index.html", b"<html>"), ("css/app.css", b"body{}")])?;
        let ctx = RequestContext::new(Verb::Create, "site/")
            .with_headers(RequestHeaders {
                file_name: Some("bundle.zip".to_string()),
                ..RequestHeaders::default()
            })
            .with_params(RequestParams {
                extract: true,
                clean: true,
                ..RequestParams::default()
            })
            .with_body(bytes);

        let body = envelope(run(&h.dispatcher, &ctx)?)?;
        assert_eq!(body.folders(), [ItemRecord::success("site", "site/")]);
        let listing = h.provider.list_folder("site/", ListOptions::everything())?;
        let files: Vec<_> = listing.file.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(files, ["site/css/app.css", "site/index.html"]);
        assert_eq!(h.metrics.snapshot().archive_entries_total, 2);
        Ok(())
    }

    #[test]
    fn archive_upload_without_clean_keeps_existing_files() -> TestResult<()> {
        let h = harness()?;
        h.provider.write_file("site/keep.txt", b"keep", None, false)?;
        let upload = stage_upload(h.staging.path(), "bundle.zip", &zip_bytes(&[("new.txt", b"n")])?)?;
        let ctx = RequestContext::new(Verb::Create, "site/")
            .with_params(RequestParams {
                extract: true,
                ..RequestParams::default()
            })
            .with_uploads(Uploads::Single(upload));

        run(&h.dispatcher, &ctx)?;
        assert_eq!(h.provider.read_file("site/keep.txt")?, b"keep");
        assert_eq!(h.provider.read_file("site/new.txt")?, b"n");
        Ok(())
    }

    #[test]
    fn archive_without_extract_is_stored_as_file() -> TestResult<()> {
        let h = harness()?;
        let bytes = zip_bytes(&[("a.txt", b"a")])?;
        let ctx = RequestContext::new(Verb::Create, "")
            .with_headers(RequestHeaders {
                file_name: Some("bundle.zip".to_string()),
                ..RequestHeaders::default()
            })
            .with_body(bytes.clone());

        let body = envelope(run(&h.dispatcher, &ctx)?)?;
        assert_eq!(body.files(), [ItemRecord::success("bundle.zip", "bundle.zip")]);
        assert_eq!(h.provider.read_file("bundle.zip")?, bytes);
        Ok(())
    }

    #[test]
    fn corrupt_archive_aborts_request() -> TestResult<()> {
        let h = harness()?;
        let ctx = RequestContext::new(Verb::Create, "site/")
            .with_headers(RequestHeaders {
                file_name: Some("broken.zip".to_string()),
                ..RequestHeaders::default()
            })
            .with_params(RequestParams {
                extract: true,
                ..RequestParams::default()
            })
            .with_body(b"not really a zip".to_vec());

        let err = run(&h.dispatcher, &ctx).err().ok_or_else(|| anyhow::anyhow!("expected failure"))?;
        assert!(matches!(err.root(), FsOpsError::ArchiveOpen { .. }));
        assert_eq!(err.category(), ErrorCategory::Backend);
        assert_eq!(fs::read_dir(h.staging.path())?.count(), 0);
        Ok(())
    }

    #[test]
    fn multi_upload_continues_past_failed_items() -> TestResult<()> {
        let h = harness()?;
        let first = stage_upload(h.staging.path(), "one.txt", b"1")?;
        let third = stage_upload(h.staging.path(), "three.txt", b"3")?;
        let ctx = RequestContext::new(Verb::Create, "inbox/").with_uploads(Uploads::Multiple(vec![
            first,
            UploadedFile::failed("two.txt", "partial transfer"),
            third,
        ]));

        let body = envelope(run(&h.dispatcher, &ctx)?)?;
        let outcomes: Vec<_> = body.files().iter().map(ItemRecord::is_success).collect();
        assert_eq!(outcomes, [true, false, true]);
        assert_eq!(body.files()[1].name(), "two.txt");
        assert_eq!(h.provider.read_file("inbox/three.txt")?, b"3");
        assert_eq!(h.metrics.batch_item_count("file", "error"), 1);
        Ok(())
    }

    #[test]
    fn single_failed_upload_on_folder_is_an_item_error() -> TestResult<()> {
        let h = harness()?;
        let ctx = RequestContext::new(Verb::Create, "inbox/")
            .with_uploads(Uploads::Single(UploadedFile::failed("big.iso", "too large")));
        let body = envelope(run(&h.dispatcher, &ctx)?)?;
        assert_eq!(body.files().len(), 1);
        assert!(!body.files()[0].is_success());
        Ok(())
    }

    #[test]
    fn multiple_uploads_to_one_file_resource_are_rejected() -> TestResult<()> {
        let h = harness()?;
        let a = stage_upload(h.staging.path(), "a.txt", b"a")?;
        let b = stage_upload(h.staging.path(), "b.txt", b"b")?;
        let ctx = RequestContext::new(Verb::Create, "docs/a.txt")
            .with_uploads(Uploads::Multiple(vec![a, b]));

        let err = run(&h.dispatcher, &ctx).err().ok_or_else(|| anyhow::anyhow!("expected failure"))?;
        assert!(matches!(
            err.root(),
            FsOpsError::InvalidInput {
                reason: "multiple_files_for_single_resource",
                ..
            }
        ));
        assert!(!h.provider.file_exists("docs/a.txt")?);
        Ok(())
    }

    #[test]
    fn single_upload_writes_to_addressed_file() -> TestResult<()> {
        let h = harness()?;
        let upload = stage_upload(h.staging.path(), "whatever.bin", b"data")?;
        let ctx = RequestContext::new(Verb::Create, "docs/target.bin")
            .with_uploads(Uploads::Multiple(vec![upload]));
        let body = envelope(run(&h.dispatcher, &ctx)?)?;
        assert_eq!(body.files(), [ItemRecord::success("target.bin", "docs/target.bin")]);
        assert_eq!(h.provider.read_file("docs/target.bin")?, b"data");
        Ok(())
    }

    #[test]
    fn header_folder_on_file_path_creates_then_updates() -> TestResult<()> {
        let h = harness()?;
        let create = RequestContext::new(Verb::Create, "projects/alpha")
            .with_headers(RequestHeaders {
                folder_name: Some("alpha".to_string()),
                ..RequestHeaders::default()
            })
            .with_json(&json!({"owner": "ops"}));
        let body = envelope(run(&h.dispatcher, &create)?)?;
        assert_eq!(body.folders(), [ItemRecord::success("alpha", "projects/alpha/")]);

        let merge = RequestContext {
            verb: Verb::Merge,
            ..create.with_json(&json!({"tier": 2}))
        };
        run(&h.dispatcher, &merge)?;
        let stored = h.provider.folder_properties("projects/alpha/")?.properties;
        assert_eq!(stored.get("owner"), Some(&json!("ops")));
        assert_eq!(stored.get("tier"), Some(&json!(2)));
        Ok(())
    }

    #[test]
    fn remote_url_goes_through_local_ingestion() -> TestResult<()> {
        let h = harness()?;
        let dispatcher = RequestDispatcher::new(
            h.provider.clone(),
            DispatchSettings {
                check_exist: CheckExistDefaults::default(),
                staging_dir: h.staging.path().to_path_buf(),
            },
        )
        .with_fetcher(Arc::new(StaticFetcher {
            name: "report.csv",
            bytes: b"a,b\n1,2\n".to_vec(),
        }));
        let ctx = RequestContext::new(Verb::Create, "imports/").with_params(RequestParams {
            url: Some("https://data.test/report.csv".to_string()),
            ..RequestParams::default()
        });

        let body = envelope(run(&dispatcher, &ctx)?)?;
        assert_eq!(body.files(), [ItemRecord::success("report.csv", "imports/report.csv")]);
        assert_eq!(h.provider.read_file("imports/report.csv")?, b"a,b\n1,2\n");

        let err = run(&h.dispatcher, &ctx).err().ok_or_else(|| anyhow::anyhow!("expected failure"))?;
        assert!(matches!(err.root(), FsOpsError::Unsupported { .. }));
        Ok(())
    }

    #[test]
    fn empty_source_yields_empty_envelope() -> TestResult<()> {
        let h = harness()?;
        let body = envelope(run(&h.dispatcher, &RequestContext::new(Verb::Create, "docs/"))?)?;
        assert_eq!(body, Envelope::empty());
        Ok(())
    }

    #[test]
    fn delete_missing_file_is_not_found() -> TestResult<()> {
        let h = harness()?;
        let err = run(&h.dispatcher, &RequestContext::new(Verb::Delete, "nope.txt"))
            .err()
            .ok_or_else(|| anyhow::anyhow!("expected failure"))?;
        assert_eq!(err.category(), ErrorCategory::NotFound);
        Ok(())
    }

    #[test]
    fn forced_folder_delete_removes_descendants() -> TestResult<()> {
        let h = harness()?;
        h.provider.write_file("tree/a.txt", b"a", None, false)?;
        h.provider.write_file("tree/sub/b.txt", b"b", None, false)?;
        h.provider.create_folder("tree/sub/deeper/", &Properties::new(), false)?;

        let refused = run(&h.dispatcher, &RequestContext::new(Verb::Delete, "tree/"));
        assert!(matches!(refused.map_err(|err| err.category()), Err(ErrorCategory::Conflict)));

        let ctx = RequestContext::new(Verb::Delete, "tree/").with_params(RequestParams {
            force: true,
            ..RequestParams::default()
        });
        let body = envelope(run(&h.dispatcher, &ctx)?)?;
        assert_eq!(body.folders(), [ItemRecord::success("tree", "tree/")]);
        assert!(!h.provider.folder_exists("tree/")?);
        assert!(!h.provider.folder_exists("tree/sub/deeper/")?);
        assert!(!h.provider.file_exists("tree/sub/b.txt")?);
        Ok(())
    }

    #[test]
    fn delete_of_root_without_payload_is_rejected() -> TestResult<()> {
        let h = harness()?;
        let err = run(&h.dispatcher, &RequestContext::new(Verb::Delete, ""))
            .err()
            .ok_or_else(|| anyhow::anyhow!("expected failure"))?;
        assert!(matches!(err.root(), FsOpsError::InvalidInput { reason: "empty_path", .. }));
        Ok(())
    }

    #[test]
    fn structured_delete_reports_per_item() -> TestResult<()> {
        let h = harness()?;
        h.provider.write_file("a.txt", b"a", None, false)?;
        let ctx = RequestContext::new(Verb::Delete, "")
            .with_json(&json!({"file": ["a.txt", "ghost.txt"]}));
        let body = envelope(run(&h.dispatcher, &ctx)?)?;
        assert!(body.folder.is_none());
        let outcomes: Vec<_> = body.files().iter().map(ItemRecord::is_success).collect();
        assert_eq!(outcomes, [true, false]);
        Ok(())
    }

    #[test]
    fn listing_respects_filters() -> TestResult<()> {
        let h = harness()?;
        h.provider.write_file("docs/a.txt", b"a", None, false)?;
        h.provider.write_file("docs/sub/b.txt", b"b", None, false)?;
        let ctx = RequestContext::new(Verb::Read, "docs/").with_params(RequestParams {
            files_only: true,
            full_tree: true,
            ..RequestParams::default()
        });
        match run(&h.dispatcher, &ctx)? {
            Outcome::Body(ResponseBody::Listing(listing)) => {
                assert!(listing.folder.is_empty());
                assert_eq!(listing.file.len(), 2);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn file_read_streams_with_disposition() -> TestResult<()> {
        let h = harness()?;
        h.provider.write_file("docs/a.txt", b"alpha", None, false)?;
        let ctx = RequestContext::new(Verb::Read, "docs/a.txt").with_params(RequestParams {
            download: true,
            ..RequestParams::default()
        });
        let mut sink = WriterSink::new(Vec::new());
        let outcome = h.dispatcher.dispatch(&ctx, &mut sink)?;
        assert_eq!(outcome, Outcome::Streamed { bytes: 5 });
        let head = sink.head().cloned().ok_or_else(|| anyhow::anyhow!("missing head"))?;
        assert_eq!(head.content_disposition(), "attachment; filename=\"a.txt\"");
        assert_eq!(head.content_type, "text/plain");
        assert_eq!(sink.into_inner(), b"alpha");
        assert_eq!(h.metrics.request_count("read", "streamed"), 1);
        Ok(())
    }

    #[test]
    fn folder_zip_streams_and_removes_temp_archive() -> TestResult<()> {
        let h = harness()?;
        h.provider.write_file("docs/a.txt", b"alpha", None, false)?;
        h.provider.write_file("docs/sub/b.txt", b"beta", None, false)?;
        let ctx = RequestContext::new(Verb::Read, "docs/").with_params(RequestParams {
            zip: true,
            ..RequestParams::default()
        });
        let mut sink = WriterSink::new(Vec::new());
        h.dispatcher.dispatch(&ctx, &mut sink)?;
        assert_eq!(
            sink.head().map(|head| head.file_name.as_str()),
            Some("docs.zip")
        );
        let entries = zip_entries(&sink.into_inner())?;
        let names: Vec<_> = entries.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, ["a.txt", "sub/", "sub/b.txt"]);
        assert_eq!(fs::read_dir(h.staging.path())?.count(), 0);
        Ok(())
    }

    struct BrokenSink;

    impl ResponseSink for BrokenSink {
        fn stream(&mut self, _head: &StreamHead, _body: &mut dyn Read) -> io::Result<u64> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }
    }

    #[test]
    fn folder_zip_send_failure_still_removes_temp_archive() -> TestResult<()> {
        let h = harness()?;
        h.provider.write_file("docs/a.txt", b"alpha", None, false)?;
        let ctx = RequestContext::new(Verb::Read, "docs/").with_params(RequestParams {
            zip: true,
            ..RequestParams::default()
        });
        let err = h
            .dispatcher
            .dispatch(&ctx, &mut BrokenSink)
            .err()
            .ok_or_else(|| anyhow::anyhow!("expected failure"))?;
        assert_eq!(err.category(), ErrorCategory::Backend);
        assert_eq!(fs::read_dir(h.staging.path())?.count(), 0);
        assert_eq!(h.metrics.request_count("read", "failed"), 1);
        Ok(())
    }

    #[test]
    fn file_stream_send_failure_is_request_fatal() -> TestResult<()> {
        let h = harness()?;
        h.provider.write_file("docs/a.txt", b"alpha", None, false)?;
        let ctx = RequestContext::new(Verb::Read, "docs/a.txt");
        let err = h
            .dispatcher
            .dispatch(&ctx, &mut BrokenSink)
            .err()
            .ok_or_else(|| anyhow::anyhow!("expected failure"))?;
        assert_eq!(err.category(), ErrorCategory::Backend);
        assert_eq!(fs::read_dir(h.staging.path())?.count(), 0);
        assert_eq!(h.provider.read_file("docs/a.txt")?, b"alpha");
        assert_eq!(h.metrics.request_count("read", "failed"), 1);
        Ok(())
    }

    #[test]
    fn permission_hook_runs_before_dispatch() -> TestResult<()> {
        let h = harness()?;
        h.provider.write_file("a.txt", b"a", None, false)?;
        let dispatcher = RequestDispatcher::new(h.provider.clone(), DispatchSettings::default())
            .with_authorizer(Arc::new(DenyDeletes));
        let err = run(&dispatcher, &RequestContext::new(Verb::Delete, "a.txt"))
            .err()
            .ok_or_else(|| anyhow::anyhow!("expected failure"))?;
        assert_eq!(err.category(), ErrorCategory::Permission);
        assert!(h.provider.file_exists("a.txt")?);
        Ok(())
    }

    #[test]
    fn merge_default_existence_check_is_configurable() -> TestResult<()> {
        let provider = Arc::new(MemoryProvider::new());
        provider.write_file("a.txt", b"old", None, false)?;
        let ctx = RequestContext::new(Verb::Merge, "")
            .with_json(&json!({"file": {"name": "a.txt", "content": "new"}}));

        let lenient = RequestDispatcher::new(provider.clone(), DispatchSettings::default());
        let body = envelope(run(&lenient, &ctx)?)?;
        assert!(body.files()[0].is_success());

        let strict = RequestDispatcher::new(
            provider.clone(),
            DispatchSettings {
                check_exist: CheckExistDefaults {
                    merge: true,
                    ..CheckExistDefaults::default()
                },
                ..DispatchSettings::default()
            },
        );
        let body = envelope(run(&strict, &ctx)?)?;
        assert!(!body.files()[0].is_success());
        assert_eq!(provider.read_file("a.txt")?, b"new");
        Ok(())
    }
}
