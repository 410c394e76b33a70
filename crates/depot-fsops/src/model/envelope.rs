//! Response envelope mirroring the request's folder/file shape.

use serde::Serialize;

use crate::error::{ErrorCategory, FsOpsError};

/// Error detail attached to a failed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemError {
    /// Failure classification.
    pub kind: ErrorCategory,
    /// Rendered failure detail.
    pub message: String,
}

impl From<&FsOpsError> for ItemError {
    fn from(err: &FsOpsError) -> Self {
        Self {
            kind: err.category(),
            message: err.describe(),
        }
    }
}

/// Outcome of one batch item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ItemRecord {
    /// Item was applied.
    Success {
        /// Item name.
        name: String,
        /// Resolved destination path.
        path: String,
    },
    /// Item failed; siblings were still attempted.
    Failure {
        /// Item name.
        name: String,
        /// Failure detail.
        error: ItemError,
    },
}

impl ItemRecord {
    /// Success record.
    #[must_use]
    pub fn success(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::Success {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Failure record built from an error.
    #[must_use]
    pub fn failure(name: impl Into<String>, err: &FsOpsError) -> Self {
        Self::Failure {
            name: name.into(),
            error: ItemError::from(err),
        }
    }

    /// Item name regardless of outcome.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Success { name, .. } | Self::Failure { name, .. } => name,
        }
    }

    /// Whether the item succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Aggregated result of a write or delete request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Envelope {
    /// Folder results, in input order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<Vec<ItemRecord>>,
    /// File results, in input order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<Vec<ItemRecord>>,
}

impl Envelope {
    /// Envelope with only the sections that were present in the request.
    #[must_use]
    pub const fn batch(folder: Option<Vec<ItemRecord>>, file: Option<Vec<ItemRecord>>) -> Self {
        Self { folder, file }
    }

    /// Envelope for a request with no recognized source.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            folder: Some(Vec::new()),
            file: Some(Vec::new()),
        }
    }

    /// Envelope holding a single file record.
    #[must_use]
    pub fn single_file(record: ItemRecord) -> Self {
        Self {
            folder: None,
            file: Some(vec![record]),
        }
    }

    /// Envelope holding a single folder record.
    #[must_use]
    pub fn single_folder(record: ItemRecord) -> Self {
        Self {
            folder: Some(vec![record]),
            file: None,
        }
    }

    /// Append a file record, creating the section if needed.
    pub fn push_file(&mut self, record: ItemRecord) {
        self.file.get_or_insert_with(Vec::new).push(record);
    }

    /// File records, empty when the section is absent.
    #[must_use]
    pub fn files(&self) -> &[ItemRecord] {
        self.file.as_deref().unwrap_or_default()
    }

    /// Folder records, empty when the section is absent.
    #[must_use]
    pub fn folders(&self) -> &[ItemRecord] {
        self.folder.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResourceKind;
    use serde_json::json;

    type TestResult<T> = anyhow::Result<T>;

    #[test]
    fn envelope_serializes_success_and_error_records() -> TestResult<()> {
        let missing = FsOpsError::not_found(ResourceKind::File, "b.txt");
        let envelope = Envelope::batch(
            Some(vec![ItemRecord::success("docs", "docs/")]),
            Some(vec![
                ItemRecord::success("a.txt", "a.txt"),
                ItemRecord::failure("b.txt", &missing),
            ]),
        );
        let value = serde_json::to_value(&envelope)?;
        assert_eq!(value["folder"], json!([{"name": "docs", "path": "docs/"}]));
        assert_eq!(value["file"][0], json!({"name": "a.txt", "path": "a.txt"}));
        assert_eq!(value["file"][1]["name"], "b.txt");
        assert_eq!(value["file"][1]["error"]["kind"], "not_found");
        Ok(())
    }

    #[test]
    fn absent_sections_are_omitted() -> TestResult<()> {
        let envelope = Envelope::single_file(ItemRecord::success("a.txt", "a.txt"));
        let value = serde_json::to_value(&envelope)?;
        assert!(value.get("folder").is_none());
        assert_eq!(serde_json::to_value(Envelope::empty())?, json!({"folder": [], "file": []}));
        Ok(())
    }
}
