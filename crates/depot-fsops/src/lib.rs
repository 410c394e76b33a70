#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

//! Provider-agnostic virtual file storage.
//!
//! A request names a resource path and a verb. The dispatcher resolves the path,
//! picks the content source (raw body, uploads, remote URL, or a structured
//! document), and applies it to a [`StorageProvider`]. Write and delete results
//! come back as a `{folder, file}` envelope with one record per item.
//!
//! Layout: `path.rs` (path classification), `request.rs` (verbs and request
//! context), `ingest.rs` (source selection and body parsing), `archive.rs` (zip
//! import/export), `batch.rs` (per-item execution), `dispatch.rs` (verb
//! handlers), `provider/` (backend trait, local disk and in-memory backends),
//! `fetch.rs` (remote URL retrieval).

pub mod archive;
pub mod batch;
pub mod dispatch;
pub mod error;
pub mod fetch;
pub mod ingest;
pub mod model;
pub mod path;
pub mod provider;
pub mod request;

pub use dispatch::{
    AllowAll, Authorizer, DispatchSettings, Disposition, Outcome, RequestDispatcher, ResponseBody,
    ResponseSink, StreamHead, WriterSink,
};
pub use error::{ErrorCategory, FsOpsError, FsOpsResult, ResourceKind};
pub use fetch::{HttpFetcher, RemoteFetcher};
pub use model::{Envelope, ItemError, ItemRecord};
pub use provider::{LocalDiskProvider, MemoryProvider, StorageProvider};
pub use request::{
    Permission, RequestContext, RequestHeaders, RequestParams, UploadPayload, UploadedFile,
    Uploads, Verb,
};
