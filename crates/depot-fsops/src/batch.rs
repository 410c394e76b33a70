//! Sequential per-item execution with isolated failures.
//!
//! Every input entry yields exactly one record at the same position; a failed
//! item never stops its siblings.

use depot_telemetry::Metrics;
use tracing::{debug, warn};

use crate::error::{FsOpsResult, ResourceKind};
use crate::ingest::{DeleteBatch, Entry, RejectedEntry, StructuredBody};
use crate::model::{
    DeleteTarget, Envelope, FileContent, FileDescriptor, FolderDescriptor, ItemRecord,
};
use crate::provider::StorageProvider;

/// Applies folder/file descriptors to a provider, one at a time, in input order.
pub struct BatchExecutor<'a> {
    provider: &'a dyn StorageProvider,
    check_exist: bool,
    metrics: Option<&'a Metrics>,
}

impl<'a> BatchExecutor<'a> {
    /// Executor using `check_exist` for every create, write, and copy.
    #[must_use]
    pub fn new(provider: &'a dyn StorageProvider, check_exist: bool) -> Self {
        Self {
            provider,
            check_exist,
            metrics: None,
        }
    }

    /// Record item outcomes on a metrics registry.
    #[must_use]
    pub const fn with_metrics(mut self, metrics: Option<&'a Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Apply a structured body; both sections are always present in the result.
    #[must_use]
    pub fn run(&self, body: StructuredBody) -> Envelope {
        Envelope::batch(
            Some(self.run_folders(body.folders)),
            Some(self.run_files(body.files)),
        )
    }

    /// Create, copy, or move folders.
    #[must_use]
    pub fn run_folders(&self, entries: Vec<Entry<FolderDescriptor>>) -> Vec<ItemRecord> {
        entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| {
                self.settle(ResourceKind::Folder, index, entry, |folder| {
                    self.apply_folder(folder)
                })
            })
            .collect()
    }

    /// Write, copy, or move files.
    #[must_use]
    pub fn run_files(&self, entries: Vec<Entry<FileDescriptor>>) -> Vec<ItemRecord> {
        entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| {
                self.settle(ResourceKind::File, index, entry, |file| self.apply_file(file))
            })
            .collect()
    }

    /// Delete the items named by a structured delete body.
    #[must_use]
    pub fn delete(&self, batch: DeleteBatch, force: bool) -> Envelope {
        let folders = batch.folders.map(|entries| {
            entries
                .into_iter()
                .enumerate()
                .map(|(index, entry)| {
                    self.settle(ResourceKind::Folder, index, entry, |target| {
                        self.provider.delete_folder(&target.path, force)
                    })
                })
                .collect()
        });
        let files = batch.files.map(|entries| {
            entries
                .into_iter()
                .enumerate()
                .map(|(index, entry)| {
                    self.settle(ResourceKind::File, index, entry, |target| {
                        self.provider.delete_file(&target.path)
                    })
                })
                .collect()
        });
        Envelope::batch(folders, files)
    }

    fn apply_folder(&self, folder: &FolderDescriptor) -> FsOpsResult<()> {
        match &folder.source {
            Some(source) => {
                self.provider
                    .copy_folder(&folder.path, &source.path, self.check_exist)?;
                if source.delete_source {
                    self.provider.delete_folder(&source.path, true)?;
                }
                Ok(())
            }
            None => self
                .provider
                .create_folder(&folder.path, &folder.properties, self.check_exist),
        }
    }

    fn apply_file(&self, file: &FileDescriptor) -> FsOpsResult<()> {
        match &file.content {
            FileContent::Copy(source) => {
                self.provider
                    .copy_file(&file.path, &source.path, self.check_exist)?;
                if source.delete_source {
                    self.provider.delete_file(&source.path)?;
                }
                Ok(())
            }
            FileContent::Inline(bytes) => self.provider.write_file(
                &file.path,
                bytes,
                file.content_type.as_deref(),
                self.check_exist,
            ),
        }
    }

    fn settle<T, F>(&self, kind: ResourceKind, index: usize, entry: Entry<T>, apply: F) -> ItemRecord
    where
        T: Target,
        F: FnOnce(&T) -> FsOpsResult<()>,
    {
        let record = match entry {
            Ok(item) => match apply(&item) {
                Ok(()) => ItemRecord::success(item.name(), item.path()),
                Err(err) => {
                    warn!(kind = kind.as_str(), index, name = item.name(), error = %err.describe(), "batch item failed");
                    ItemRecord::failure(item.name(), &err)
                }
            },
            Err(RejectedEntry { name, error }) => {
                warn!(kind = kind.as_str(), index, name = %name, error = %error.describe(), "batch item rejected");
                ItemRecord::failure(name, &error)
            }
        };
        if let Some(metrics) = self.metrics {
            let outcome = if record.is_success() { "ok" } else { "error" };
            metrics.inc_batch_item(kind.as_str(), outcome);
        }
        debug!(kind = kind.as_str(), index, success = record.is_success(), "batch item settled");
        record
    }
}

/// Anything a batch item reports back as `{name, path}`.
trait Target {
    fn name(&self) -> &str;
    fn path(&self) -> &str;
}

impl Target for FolderDescriptor {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &str {
        &self.path
    }
}

impl Target for FileDescriptor {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &str {
        &self.path
    }
}

impl Target for DeleteTarget {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &str {
        &self.path
    }
}
